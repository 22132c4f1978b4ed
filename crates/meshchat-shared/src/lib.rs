// Types, wire protocol and identity shared by every meshchat crate.

pub mod constants;
pub mod credential;
pub mod error;
pub mod identity;
pub mod message;
pub mod protocol;
pub mod types;

pub use error::{IdentityError, MeshChatError};
pub use message::{DeliveryStatus, Message, Sender};
pub use protocol::WireMessage;
pub use types::{ChannelId, Fingerprint, MessageId, PeerAddress, TransportKind};
