//! # meshchat-core
//!
//! Secure-session and delivery core of the mesh chat: identity resolution
//! across rotating mesh addresses, out-of-band verification, dual-transport
//! routing with a store-and-forward outbox, monotonic delivery tracking and
//! bounded, deduplicated timelines behind a spam limiter.
//!
//! Everything here is synchronous and single-owner. The [`engine`] module
//! wraps a [`MessageRouter`] in one tokio task so that every network event
//! and API call goes through the same serialization point.

pub mod chats;
pub mod clock;
pub mod config;
pub mod content;
pub mod contracts;
pub mod delivery;
pub mod engine;
pub mod events;
pub mod identity;
pub mod outbox;
pub mod rate_limit;
pub mod router;
pub mod timeline;
pub mod verification;

mod inbound;

pub use clock::{Clock, SystemClock};
pub use config::CoreConfig;
pub use contracts::{FavoritesStore, MeshTransport, RelayTransport, SessionState, TransportError};
pub use engine::{spawn_engine, EngineCommand, EngineError, EngineHandle};
pub use events::{CoreNotification, NetworkEvent};
pub use router::{MessageRouter, RouterParts, SendOutcome};
