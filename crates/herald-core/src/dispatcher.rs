//! Inbound event dispatch.
//!
//! Handlers are registered per event name and invoked concurrently, each in
//! its own task. A failing or panicking handler is logged and counted; it
//! never affects the connection that sent the event or the other handlers.

use crate::connection::Connection;
use crate::hub::Hub;
use crate::metrics;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use herald_protocol::{control, Event, UserId};
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// What a handler gets to work with.
#[derive(Clone)]
pub struct EventContext {
    /// Hub the event arrived on; use it to publish.
    pub hub: Hub,
    /// Connection that sent the event.
    pub connection: Arc<Connection>,
}

impl EventContext {
    /// Id of the sending connection.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        self.connection.id().as_str()
    }

    /// User id the sender subscribed to, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.connection.user_id()
    }

    /// Send an event back to the sender only.
    pub fn reply(&self, name: &str, data: impl Into<Value>) -> bool {
        self.hub.emit_to_connection(self.connection_id(), name, data)
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("connection", self.connection.id())
            .finish_non_exhaustive()
    }
}

/// A callback for a named inbound event.
///
/// Implemented for any `Fn(EventContext, Value) -> impl Future<Output =
/// anyhow::Result<()>>`, so closures can be registered directly.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Errors are logged by the dispatcher and otherwise ignored.
    async fn handle(&self, ctx: EventContext, data: Value) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(EventContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: EventContext, data: Value) -> anyhow::Result<()> {
        (self)(ctx, data).await
    }
}

type HandlerList = Arc<Vec<Arc<dyn EventHandler>>>;

/// Event name to handler list.
///
/// Lists are replaced wholesale on registration, so a dispatch in flight
/// always sees a complete list.
#[derive(Default)]
pub struct Dispatcher {
    handlers: DashMap<String, HandlerList>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `name`.
    pub fn on(&self, name: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let name = name.into();
        if control::is_reserved(&name) {
            warn!(event = %name, "Handler registered for a reserved event will never run");
        }

        let mut entry = self.handlers.entry(name).or_default();
        let mut next = Vec::with_capacity(entry.len() + 1);
        next.extend(entry.iter().cloned());
        next.push(handler);
        *entry = Arc::new(next);
    }

    /// Number of handlers registered for `name`.
    #[must_use]
    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.get(name).map_or(0, |h| h.len())
    }

    /// Registered event names, sorted.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Spawn every handler registered for the event.
    ///
    /// Returns the number of handlers started.
    pub fn dispatch(&self, ctx: EventContext, event: Event) -> usize {
        let Some(handlers) = self
            .handlers
            .get(event.name.as_str())
            .map(|h| Arc::clone(h.value()))
        else {
            debug!(event = %event.name, connection = %ctx.connection.id(), "No handlers for event");
            return 0;
        };

        trace!(event = %event.name, handlers = handlers.len(), "Dispatching event");

        let name: Arc<str> = Arc::from(event.name);
        for handler in handlers.iter() {
            let handler = Arc::clone(handler);
            let ctx = ctx.clone();
            let data = event.data.clone();
            let name = Arc::clone(&name);

            tokio::spawn(async move {
                let connection = ctx.connection.id().clone();
                let outcome = AssertUnwindSafe(handler.handle(ctx, data))
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(event = %name, connection = %connection, error = %e, "Event handler failed");
                        metrics::record_handler_failure(&name, false);
                    }
                    Err(panic) => {
                        error!(
                            event = %name,
                            connection = %connection,
                            panic = %panic_message(panic.as_ref()),
                            "Event handler panicked"
                        );
                        metrics::record_handler_failure(&name, true);
                    }
                }
            });
        }

        handlers.len()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn context(hub: &Hub) -> EventContext {
        let (connection, _rx) = Connection::new(4);
        EventContext {
            hub: hub.clone(),
            connection,
        }
    }

    #[tokio::test]
    async fn test_no_handlers() {
        let hub = Hub::spawn(HubConfig::default());
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.dispatch(context(&hub), Event::named("unknown")), 0);
    }

    #[tokio::test]
    async fn test_all_handlers_run() {
        let hub = Hub::spawn(HubConfig::default());
        let dispatcher = Dispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..3 {
            let tx = tx.clone();
            dispatcher.on(
                "chat",
                Arc::new(move |_ctx: EventContext, data: Value| {
                    let tx = tx.clone();
                    async move {
                        tx.send((i, data)).ok();
                        anyhow::Ok(())
                    }
                }),
            );
        }

        assert_eq!(dispatcher.handler_count("chat"), 3);
        assert_eq!(
            dispatcher.dispatch(context(&hub), Event::new("chat", "hi")),
            3
        );

        let mut seen = Vec::new();
        for _ in 0..3 {
            let (i, data) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(data, "hi");
            seen.push(i);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let hub = Hub::spawn(HubConfig::default());
        let dispatcher = Dispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

        dispatcher.on(
            "work",
            Arc::new(|_ctx: EventContext, _data: Value| async move {
                if true {
                    panic!("handler blew up");
                }
                anyhow::Ok(())
            }),
        );
        dispatcher.on(
            "work",
            Arc::new(|_ctx: EventContext, _data: Value| async move {
                Err::<(), _>(anyhow::anyhow!("handler failed"))
            }),
        );
        {
            let ran = Arc::clone(&ran);
            dispatcher.on(
                "work",
                Arc::new(move |_ctx: EventContext, _data: Value| {
                    let ran = Arc::clone(&ran);
                    let done_tx = done_tx.clone();
                    async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        done_tx.send(()).ok();
                        anyhow::Ok(())
                    }
                }),
            );
        }

        dispatcher.dispatch(context(&hub), Event::named("work"));
        dispatcher.dispatch(context(&hub), Event::named("work"));

        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(1), done_rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_events_listing() {
        let dispatcher = Dispatcher::new();
        let noop = |_ctx: EventContext, _data: Value| async { anyhow::Ok(()) };
        dispatcher.on("b", Arc::new(noop));
        dispatcher.on("a", Arc::new(noop));
        assert_eq!(dispatcher.events(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(dispatcher.handler_count("missing"), 0);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(3_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
