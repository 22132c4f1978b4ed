use chrono::{DateTime, Utc};
use meshchat_shared::{ChannelId, DeliveryStatus, Fingerprint, Message, MessageId, PeerAddress};

/// Everything the outside world tells the core, delivered one at a time
/// through the engine.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// The session layer finished a handshake and authenticated a key.
    SessionAuthenticated {
        address: PeerAddress,
        noise_key_hex: String,
        nickname: Option<String>,
    },
    PeerConnected {
        address: PeerAddress,
    },
    PeerDisconnected {
        address: PeerAddress,
    },
    /// Decrypted packet from a mesh session.
    MeshPacket {
        from: PeerAddress,
        data: Vec<u8>,
    },
    /// Packet from the relay fallback. `from_key` is the sender's noise key.
    RelayPacket {
        from_key: String,
        nickname: String,
        data: Vec<u8>,
    },
    /// Broadcast chat on the mesh or a geohash channel.
    PublicMessage {
        id: MessageId,
        from: Option<PeerAddress>,
        nickname: String,
        content: String,
        timestamp: DateTime<Utc>,
        channel: ChannelId,
    },
    /// Relay connectivity came up (again).
    RelayConnected,
    RelayDisconnected,
}

/// Events the core emits for the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreNotification {
    /// A public message made it into a timeline.
    MessageCommitted { channel: ChannelId, message: Message },
    PrivateMessageReceived { peer: PeerAddress, message: Message },
    DeliveryStatusChanged { id: MessageId, status: DeliveryStatus },
    /// Local notice shown in a conversation.
    SystemMessage { peer: Option<PeerAddress>, message: Message },
    PeerVerified { fingerprint: Fingerprint },
    MutualVerification { fingerprint: Fingerprint },
    FavoriteChanged {
        fingerprint: Fingerprint,
        is_favorite: bool,
        they_favorited_us: bool,
    },
}
