//! # herald-protocol
//!
//! Wire protocol definitions for the Herald realtime hub.
//!
//! Every message in either direction is the same envelope:
//!
//! ```text
//! {"event": "<name>", "data": <any>}
//! ```
//!
//! JSON travels in text frames, MessagePack in binary frames. A handful of
//! inbound names (`ping`, `subscribe_user`, `join_group`, `leave_group`) are
//! reserved for the hub itself; see [`control`].
//!
//! ## Example
//!
//! ```rust
//! use herald_protocol::{codec, Encoding, Event};
//!
//! let event = Event::new("notification", serde_json::json!({"text": "hi"}));
//! let encoded = codec::encode(&event, Encoding::Json).unwrap();
//! let decoded = codec::decode(&encoded.to_frame()).unwrap();
//! assert_eq!(decoded, event);
//! ```

pub mod codec;
pub mod control;
pub mod event;
pub mod frames;

pub use codec::{decode, encode, Encoding, ProtocolError};
pub use control::{Control, Inbound, UserId};
pub use event::Event;
pub use frames::{Encoded, Frame};
