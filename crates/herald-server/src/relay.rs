//! Built-in relay handlers.
//!
//! Small handlers that turn one client's event into a broadcast:
//! typing indicators and chat messages.

use async_trait::async_trait;
use herald_core::{EventContext, EventHandler, Hub};
use serde_json::{json, Value};
use tracing::debug;

/// Inbound event names handled here.
pub mod events {
    pub const USER_TYPING: &str = "user_typing";
    pub const USER_STOPPED_TYPING: &str = "user_stopped_typing";
    pub const CHAT_MESSAGE: &str = "chat_message";
    pub const NEW_CHAT_MESSAGE: &str = "new_chat_message";
}

/// Broadcasts `user_typing` with `{userId, typing}` for subscribed users.
///
/// Connections that never sent `subscribe_user` are ignored.
#[derive(Debug, Clone, Copy)]
pub struct TypingRelay {
    typing: bool,
}

#[async_trait]
impl EventHandler for TypingRelay {
    async fn handle(&self, ctx: EventContext, _data: Value) -> anyhow::Result<()> {
        let Some(user_id) = ctx.user_id() else {
            debug!(connection = %ctx.connection_id(), "Typing event from anonymous connection");
            return Ok(());
        };

        ctx.hub.emit_to_all(
            events::USER_TYPING,
            json!({ "userId": user_id, "typing": self.typing }),
        );
        Ok(())
    }
}

/// Rebroadcasts `chat_message` payloads as `new_chat_message`.
#[derive(Debug, Clone, Copy)]
pub struct ChatRelay;

#[async_trait]
impl EventHandler for ChatRelay {
    async fn handle(&self, ctx: EventContext, data: Value) -> anyhow::Result<()> {
        ctx.hub.emit_to_all(events::NEW_CHAT_MESSAGE, data);
        Ok(())
    }
}

/// Register every relay handler on the hub.
pub fn install(hub: &Hub) {
    hub.on_event(events::USER_TYPING, TypingRelay { typing: true });
    hub.on_event(events::USER_STOPPED_TYPING, TypingRelay { typing: false });
    hub.on_event(events::CHAT_MESSAGE, ChatRelay);
}
