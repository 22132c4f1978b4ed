//! Single-task actor around [`MessageRouter`].
//!
//! API calls, network events and the maintenance tick are all applied by
//! one tokio task, in arrival order. Callers talk to it through an
//! [`EngineHandle`]; notifications come back on an mpsc receiver.

use std::time::Duration;

use meshchat_shared::credential::{CredentialError, VerificationQr};
use meshchat_shared::{Fingerprint, MeshChatError, MessageId, PeerAddress};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::events::{CoreNotification, NetworkEvent};
use crate::router::{MessageRouter, SendOutcome};

const COMMAND_CHANNEL_SIZE: usize = 256;
const NOTIFICATION_CHANNEL_SIZE: usize = 256;
const MIN_TICK: Duration = Duration::from_millis(10);

type Reply<T> = oneshot::Sender<T>;

/// Commands sent *into* the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    SendPrivate {
        to: PeerAddress,
        content: String,
        reply: Reply<Result<(MessageId, SendOutcome), MeshChatError>>,
    },
    /// The user opened a conversation.
    MarkRead(PeerAddress),
    SetFavorite {
        peer: Fingerprint,
        favorite: bool,
    },
    SetBlocked {
        peer: Fingerprint,
        blocked: bool,
    },
    /// Scanned QR code text.
    BeginVerification {
        code: String,
        reply: Reply<Result<Fingerprint, MeshChatError>>,
    },
    ShowQr(Reply<Result<String, CredentialError>>),
    Network(NetworkEvent),
    Shutdown,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine task is not running")]
    Closed,

    #[error(transparent)]
    Core(#[from] MeshChatError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Cloneable front door to the engine task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn send_private(
        &self,
        to: PeerAddress,
        content: impl Into<String>,
    ) -> Result<(MessageId, SendOutcome), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command(EngineCommand::SendPrivate {
            to,
            content: content.into(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| EngineError::Closed)??)
    }

    pub async fn mark_read(&self, peer: PeerAddress) -> Result<(), EngineError> {
        self.command(EngineCommand::MarkRead(peer)).await
    }

    pub async fn set_favorite(&self, peer: Fingerprint, favorite: bool) -> Result<(), EngineError> {
        self.command(EngineCommand::SetFavorite { peer, favorite }).await
    }

    pub async fn set_blocked(&self, peer: Fingerprint, blocked: bool) -> Result<(), EngineError> {
        self.command(EngineCommand::SetBlocked { peer, blocked }).await
    }

    pub async fn begin_verification(&self, code: impl Into<String>) -> Result<Fingerprint, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command(EngineCommand::BeginVerification {
            code: code.into(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| EngineError::Closed)??)
    }

    pub async fn verification_qr(&self) -> Result<String, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command(EngineCommand::ShowQr(reply)).await?;
        Ok(rx.await.map_err(|_| EngineError::Closed)??)
    }

    pub async fn network(&self, event: NetworkEvent) -> Result<(), EngineError> {
        self.command(EngineCommand::Network(event)).await
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.command(EngineCommand::Shutdown).await
    }

    async fn command(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.tx.send(command).await.map_err(|_| EngineError::Closed)
    }
}

/// Move `router` into a background task.
///
/// Returns `(handle, notification_rx, join_handle)`. The task stops on
/// [`EngineCommand::Shutdown`] or when every handle is dropped.
pub fn spawn_engine(
    mut router: MessageRouter,
) -> (EngineHandle, mpsc::Receiver<CoreNotification>, JoinHandle<()>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<EngineCommand>(COMMAND_CHANNEL_SIZE);
    let (notif_tx, notif_rx) = mpsc::channel::<CoreNotification>(NOTIFICATION_CHANNEL_SIZE);
    let period = router.config.maintenance_interval.max(MIN_TICK);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = period.as_millis() as u64, "Engine started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(EngineCommand::Shutdown) => {
                            info!("Engine shutdown requested");
                            break;
                        }
                        Some(command) => apply(&mut router, command),
                        None => {
                            info!("Command channel closed, stopping engine");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => router.tick(),
            }

            for notification in router.drain_notifications() {
                if notif_tx.send(notification).await.is_err() {
                    debug!("Notification receiver dropped");
                    break;
                }
            }
        }

        info!("Engine loop terminated");
    });

    (EngineHandle { tx: cmd_tx }, notif_rx, task)
}

fn apply(router: &mut MessageRouter, command: EngineCommand) {
    match command {
        EngineCommand::SendPrivate { to, content, reply } => {
            let _ = reply.send(router.send(&content, &to));
        }
        EngineCommand::MarkRead(peer) => {
            let sent = router.mark_chat_read(&peer);
            debug!(peer = %peer, receipts = sent, "Chat marked read");
        }
        EngineCommand::SetFavorite { peer, favorite } => {
            if let Err(e) = router.set_favorite(&peer, favorite) {
                warn!(error = %e, "Failed to update favorite");
            }
        }
        EngineCommand::SetBlocked { peer, blocked } => {
            if let Err(e) = router.set_blocked(&peer, blocked) {
                warn!(error = %e, "Failed to update block list");
            }
        }
        EngineCommand::BeginVerification { code, reply } => {
            let result = VerificationQr::decode(&code)
                .map_err(MeshChatError::from)
                .and_then(|qr| router.begin_verification(&qr));
            let _ = reply.send(result);
        }
        EngineCommand::ShowQr(reply) => {
            let _ = reply.send(router.verification_qr());
        }
        EngineCommand::Network(event) => router.handle_event(event),
        EngineCommand::Shutdown => {}
    }
}
