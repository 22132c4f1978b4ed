//! Top-level entry point: picks mesh or relay for each send, keeps the
//! store-and-forward outbox, and owns every other core component.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use meshchat_shared::credential::{CredentialError, VerificationQr};
use meshchat_shared::identity::Identity;
use meshchat_shared::protocol::{FavoriteNotification, PrivateMessage, ReadReceipt};
use meshchat_shared::{
    DeliveryStatus, Fingerprint, MeshChatError, Message, MessageId, PeerAddress, TransportKind,
    WireMessage,
};
use meshchat_store::{Database, FavoriteRecord, OutboxEntry, StoreError};
use tracing::{debug, info, warn};

use crate::chats::PrivateChats;
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::contracts::{FavoritesStore, MeshTransport, RelayTransport, SessionState};
use crate::delivery::{DeliveryTracker, StatusTarget};
use crate::events::CoreNotification;
use crate::identity::IdentityResolver;
use crate::outbox::Outbox;
use crate::rate_limit::RateLimiter;
use crate::timeline::TimelineStore;
use crate::verification::{ScannedCredential, VerificationProtocol};

/// Idle time after which a rate-limiter bucket is forgotten.
const LIMITER_IDLE: Duration = Duration::from_secs(300);

/// How often stored direct messages are checked against the retention window.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Minimum spacing between read-receipt prunes once the startup grace is over.
const RECEIPT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// What happened to a `send` from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(TransportKind),
    /// Waiting in the outbox for a handshake or relay connectivity.
    Queued,
    /// Neither transport usable; marked failed and kept for retry.
    Unreachable,
}

/// Result of one transmission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Sent(TransportKind),
    Deferred,
    Unreachable,
}

/// Collaborators and persisted state handed to the router.
pub struct RouterParts {
    pub identity: Identity,
    pub nickname: String,
    pub mesh: Box<dyn MeshTransport>,
    pub relay: Box<dyn RelayTransport>,
    pub favorites: Box<dyn FavoritesStore>,
    pub db: Database,
    pub clock: Box<dyn Clock>,
}

pub struct MessageRouter {
    pub(crate) config: CoreConfig,
    pub(crate) identity: Identity,
    pub(crate) nickname: String,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) mesh: Box<dyn MeshTransport>,
    pub(crate) relay: Box<dyn RelayTransport>,
    pub(crate) favorites: Box<dyn FavoritesStore>,
    pub(crate) db: Database,
    pub(crate) resolver: IdentityResolver,
    pub(crate) chats: PrivateChats,
    pub(crate) timelines: TimelineStore,
    pub(crate) verification: VerificationProtocol,
    pub(crate) delivery: DeliveryTracker,
    pub(crate) limiter: RateLimiter,
    pub(crate) outbox: Outbox,
    /// Sends to addresses whose fingerprint is not known until the handshake.
    pub(crate) awaiting_session: HashMap<PeerAddress, Vec<MessageId>>,
    pub(crate) last_seen_on_mesh: HashMap<Fingerprint, Instant>,
    last_retention_sweep: Instant,
    last_receipt_prune: Option<Instant>,
    notifications: Vec<CoreNotification>,
}

impl MessageRouter {
    /// Build the router and load persisted state.
    pub fn new(config: CoreConfig, parts: RouterParts) -> Result<Self, StoreError> {
        let started = parts.clock.instant();
        let verified = parts.db.load_verified()?;
        let receipts = parts.db.load_sent_receipts()?;
        let blocked = parts.db.load_blocked()?;
        let queued = parts.db.load_outbox()?;

        let cutoff = retention_cutoff(parts.clock.now(), config.message_retention);
        let expired = parts.db.delete_private_messages_before(cutoff)?;
        let chats = restore_chats(
            parts.db.load_private_messages()?,
            parts.db.load_unread_chats()?,
            &receipts,
            &parts.identity.fingerprint(),
        );

        let mut resolver = IdentityResolver::new();
        for record in parts.favorites.favorites() {
            let peer = resolver.ensure_peer(record.fingerprint, &record.nickname);
            peer.is_favorite = record.is_favorite;
        }
        for fp in &verified {
            resolver.ensure_peer(*fp, &fp.short()).is_verified = true;
        }
        for fp in &blocked {
            resolver.ensure_peer(*fp, &fp.short()).is_blocked = true;
        }

        let mut outbox = Outbox::new(config.outbox_max_age, config.outbox_per_peer_cap);
        let restored = queued.len();
        outbox.restore(queued);

        info!(
            verified = verified.len(),
            receipts = receipts.len(),
            blocked = blocked.len(),
            outbox = restored,
            messages = chats.all_message_ids().len(),
            expired,
            "Message router ready"
        );

        Ok(Self {
            timelines: TimelineStore::new(&config, started),
            verification: VerificationProtocol::new(&config, verified),
            delivery: DeliveryTracker::new(receipts, started, config.receipt_prune_grace),
            limiter: RateLimiter::new(&config),
            outbox,
            resolver,
            chats,
            awaiting_session: HashMap::new(),
            last_seen_on_mesh: HashMap::new(),
            last_retention_sweep: started,
            last_receipt_prune: None,
            notifications: Vec::new(),
            identity: parts.identity,
            nickname: parts.nickname,
            clock: parts.clock,
            mesh: parts.mesh,
            relay: parts.relay,
            favorites: parts.favorites,
            db: parts.db,
            config,
        })
    }

    // ------------------------------------------------------------------
    // Outbound API
    // ------------------------------------------------------------------

    /// Send a direct message. The message lands in the peer's chat buffer
    /// whatever the outcome.
    pub fn send(
        &mut self,
        content: &str,
        to: &PeerAddress,
    ) -> Result<(MessageId, SendOutcome), MeshChatError> {
        if content.len() > self.config.max_content_bytes {
            return Err(MeshChatError::OversizedMessage {
                size: content.len(),
                max: self.config.max_content_bytes,
            });
        }
        let now = self.clock.now();
        let instant = self.clock.instant();

        let fingerprint = self.resolver.resolve_or_derive(to);
        let chat_key = self.chat_key(fingerprint.as_ref(), to);
        let recipient = self.display_name(fingerprint.as_ref(), &chat_key);

        let message = Message::outgoing_private(
            self.identity.fingerprint(),
            self.nickname.clone(),
            fingerprint,
            recipient.clone(),
            content,
            now,
        );
        let id = message.id.clone();
        self.append_private(&chat_key, message);

        let wire = self.private_wire(&id, content, now);
        let outcome = match self.dispatch(fingerprint.as_ref(), &chat_key, &wire, instant) {
            Dispatch::Sent(kind) => {
                self.set_status(&id, DeliveryStatus::Sent);
                SendOutcome::Sent(kind)
            }
            Dispatch::Deferred => {
                self.queue(fingerprint, &chat_key, &id, &recipient, content, now);
                SendOutcome::Queued
            }
            Dispatch::Unreachable => {
                self.set_status(
                    &id,
                    DeliveryStatus::Failed {
                        reason: "peer not reachable".into(),
                    },
                );
                self.push_system(
                    Some(&chat_key),
                    format!("{recipient} is not reachable over mesh or relay; will retry when they reconnect"),
                );
                self.queue(fingerprint, &chat_key, &id, &recipient, content, now);
                SendOutcome::Unreachable
            }
        };

        debug!(id = %id, outcome = ?outcome, "Direct message send");
        Ok((id, outcome))
    }

    /// Send a read receipt for `message_id`, preferring the transport the
    /// message arrived on. Returns whether a receipt went out.
    pub fn send_read_receipt(
        &mut self,
        message_id: &MessageId,
        to: &PeerAddress,
        original_transport: Option<TransportKind>,
    ) -> bool {
        if self.delivery.receipt_already_sent(message_id) {
            return false;
        }
        let instant = self.clock.instant();
        let fingerprint = self.resolver.resolve_or_derive(to);
        let wire = WireMessage::ReadReceipt(ReadReceipt {
            message_id: message_id.clone(),
            reader_id: self.identity.fingerprint().to_hex(),
            reader_nickname: self.nickname.clone(),
        });

        let transport = original_transport.or_else(|| self.delivery.arrival_transport(message_id));
        let result = match transport {
            Some(kind) => self.send_via(kind, fingerprint.as_ref(), to, &wire),
            None => self.dispatch(fingerprint.as_ref(), to, &wire, instant),
        };

        let Dispatch::Sent(kind) = result else {
            return false;
        };
        self.delivery.record_receipt_sent(message_id);
        if let Err(e) = self.db.mark_receipt_sent(message_id, self.clock.now()) {
            warn!(error = %e, "Failed to persist read receipt");
        }
        debug!(id = %message_id, transport = ?kind, "Read receipt sent");
        true
    }

    /// The user opened the conversation: clear unread and send owed receipts.
    pub fn mark_chat_read(&mut self, peer: &PeerAddress) -> usize {
        if self.chats.clear_unread(peer) {
            if let Err(e) = self.db.set_chat_unread(peer, false, self.clock.now()) {
                warn!(error = %e, "Failed to persist read state");
            }
        }
        let mut sent = 0;
        for id in self.chats.take_pending_receipts(peer) {
            if self.delivery.receipt_already_sent(&id) {
                continue;
            }
            if self.send_read_receipt(&id, peer, None) {
                sent += 1;
            } else {
                self.chats.add_pending_receipt(peer, id);
            }
        }
        sent
    }

    /// Retry everything queued for one peer, oldest first. Stops at the
    /// first entry that still cannot go out. Returns how many were sent.
    pub fn flush_outbox(&mut self, peer: &Fingerprint) -> usize {
        self.expire_outbox();
        let instant = self.clock.instant();
        let address = self.route_address(peer);

        let mut sent = 0;
        for entry in self.outbox.entries_for(peer) {
            let wire = self.private_wire(&entry.message_id, &entry.content, entry.queued_at);
            match self.dispatch(Some(peer), &address, &wire, instant) {
                Dispatch::Sent(_) => {
                    self.outbox.remove(&entry.message_id);
                    if let Err(e) = self.db.remove_outbox(&entry.message_id) {
                        warn!(error = %e, "Failed to remove outbox entry");
                    }
                    self.set_status(&entry.message_id, DeliveryStatus::Sent);
                    sent += 1;
                }
                Dispatch::Deferred | Dispatch::Unreachable => break,
            }
        }
        if sent > 0 {
            info!(peer = %peer.short(), sent, "Flushed outbox");
        }
        sent
    }

    pub fn flush_all_outbox(&mut self) -> usize {
        self.outbox
            .peers()
            .iter()
            .map(|peer| self.flush_outbox(peer))
            .sum()
    }

    /// Change our favorite flag for a peer and tell them, best effort.
    pub fn set_favorite(&mut self, peer: &Fingerprint, favorite: bool) -> Result<(), StoreError> {
        let now = self.clock.now();
        let nickname = self.display_name(Some(peer), &self.route_address(peer));
        let mut record = self
            .favorites
            .favorite(peer)
            .unwrap_or_else(|| FavoriteRecord::new(*peer, nickname, now));
        if record.is_favorite == favorite {
            return Ok(());
        }
        record.is_favorite = favorite;
        record.updated_at = now;
        self.favorites.save_favorite(&record)?;
        self.resolver
            .ensure_peer(*peer, &record.nickname)
            .is_favorite = favorite;

        self.notify(CoreNotification::FavoriteChanged {
            fingerprint: *peer,
            is_favorite: favorite,
            they_favorited_us: record.they_favorited_us,
        });

        let wire = WireMessage::FavoriteNotification(FavoriteNotification {
            is_favorite: favorite,
            relay_public_key: self.relay.local_key(),
        });
        let address = self.route_address(peer);
        let instant = self.clock.instant();
        let result = self.dispatch(Some(peer), &address, &wire, instant);
        debug!(peer = %peer.short(), result = ?result, "Favorite notification");
        Ok(())
    }

    pub fn set_blocked(&mut self, peer: &Fingerprint, blocked: bool) -> Result<(), StoreError> {
        self.db.set_blocked(peer, blocked, self.clock.now())?;
        self.resolver.ensure_peer(*peer, &peer.short()).is_blocked = blocked;
        info!(peer = %peer.short(), blocked, "Block state changed");
        Ok(())
    }

    /// Start verifying the owner of a scanned QR code.
    pub fn begin_verification(&mut self, qr: &VerificationQr) -> Result<Fingerprint, MeshChatError> {
        qr.verify(self.clock.now())?;
        let credential = ScannedCredential::from(qr);
        let fingerprint = credential.fingerprint()?;
        self.resolver.ensure_peer(fingerprint, &credential.nickname);

        let address = self.resolver.live_address(&fingerprint).cloned();
        let established = address
            .as_ref()
            .is_some_and(|a| self.mesh.session_state(a) == SessionState::Established);

        let instant = self.clock.instant();
        match (self.verification.begin(&credential, established, instant)?, address) {
            (Some(challenge), Some(address)) => {
                if let Err(e) = self.mesh.send(&address, &challenge) {
                    warn!(error = %e, "Failed to send verification challenge");
                }
            }
            (None, Some(address)) => self.mesh.trigger_handshake(&address),
            _ => debug!(peer = %fingerprint.short(), "Verification waits for a session"),
        }
        Ok(fingerprint)
    }

    /// Our own QR code, as a `meshchat://verify/...` string.
    pub fn verification_qr(&self) -> Result<String, CredentialError> {
        VerificationQr::create(&self.identity, &self.nickname, self.clock.now())?.encode()
    }

    /// Periodic housekeeping, driven by the engine.
    pub fn tick(&mut self) {
        let instant = self.clock.instant();

        if self.timelines.flush_due(instant) {
            for (channel, message) in self.timelines.flush_public(instant) {
                self.notify(CoreNotification::MessageCommitted { channel, message });
            }
        }

        for fp in self.verification.expire(instant) {
            debug!(peer = %fp.short(), "Pending verification expired");
        }

        if instant.saturating_duration_since(self.last_retention_sweep) >= RETENTION_SWEEP_INTERVAL {
            self.last_retention_sweep = instant;
            let cutoff = retention_cutoff(self.clock.now(), self.config.message_retention);
            match self.db.delete_private_messages_before(cutoff) {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Expired stored direct messages"),
                Err(e) => warn!(error = %e, "Failed to expire stored direct messages"),
            }
        }

        let prune_due = self
            .last_receipt_prune
            .map_or(true, |at| instant.saturating_duration_since(at) >= RECEIPT_PRUNE_INTERVAL);
        if prune_due && !self.delivery.in_grace(instant) {
            self.last_receipt_prune = Some(instant);
            self.prune_receipts(instant);
        }

        self.limiter.purge_stale(LIMITER_IDLE, instant);
        self.expire_outbox();

        let window = self.config.recently_reachable_window;
        self.last_seen_on_mesh
            .retain(|_, seen| instant.saturating_duration_since(*seen) <= window);
    }

    pub fn drain_notifications(&mut self) -> Vec<CoreNotification> {
        std::mem::take(&mut self.notifications)
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn chats(&self) -> &PrivateChats {
        &self.chats
    }

    pub fn timelines(&self) -> &TimelineStore {
        &self.timelines
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn verification(&self) -> &VerificationProtocol {
        &self.verification
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn local_fingerprint(&self) -> Fingerprint {
        self.identity.fingerprint()
    }

    // ------------------------------------------------------------------
    // Transport selection
    // ------------------------------------------------------------------

    /// Mesh if connected or recently reachable, else relay for a mutual
    /// favorite with a known relay key, else nothing.
    pub(crate) fn select_transport(
        &self,
        fingerprint: Option<&Fingerprint>,
        address: &PeerAddress,
        now: Instant,
    ) -> Option<TransportKind> {
        let recently_seen = fingerprint
            .and_then(|fp| self.last_seen_on_mesh.get(fp))
            .is_some_and(|seen| {
                now.saturating_duration_since(*seen) <= self.config.recently_reachable_window
            });
        if self.mesh.is_peer_connected(address) || self.mesh.is_peer_reachable(address) || recently_seen
        {
            return Some(TransportKind::Mesh);
        }
        if fingerprint.and_then(|fp| self.relay_key_for(fp)).is_some() {
            return Some(TransportKind::Relay);
        }
        None
    }

    pub(crate) fn dispatch(
        &mut self,
        fingerprint: Option<&Fingerprint>,
        address: &PeerAddress,
        wire: &WireMessage,
        now: Instant,
    ) -> Dispatch {
        match self.select_transport(fingerprint, address, now) {
            Some(kind) => self.send_via(kind, fingerprint, address, wire),
            None => Dispatch::Unreachable,
        }
    }

    /// Transmit over a specific transport.
    pub(crate) fn send_via(
        &mut self,
        kind: TransportKind,
        fingerprint: Option<&Fingerprint>,
        address: &PeerAddress,
        wire: &WireMessage,
    ) -> Dispatch {
        match kind {
            TransportKind::Mesh => {
                let address = fingerprint
                    .and_then(|fp| self.resolver.live_address(fp))
                    .cloned()
                    .unwrap_or_else(|| address.clone());
                match self.mesh.session_state(&address) {
                    SessionState::Established => match self.mesh.send(&address, wire) {
                        Ok(()) => Dispatch::Sent(TransportKind::Mesh),
                        Err(e) => {
                            warn!(error = %e, kind = wire.kind(), "Mesh send failed");
                            Dispatch::Deferred
                        }
                    },
                    SessionState::Handshaking => Dispatch::Deferred,
                    SessionState::None | SessionState::Failed => {
                        debug!(kind = wire.kind(), "No session yet, triggering handshake");
                        self.mesh.trigger_handshake(&address);
                        Dispatch::Deferred
                    }
                }
            }
            TransportKind::Relay => {
                let Some(fp) = fingerprint else {
                    return Dispatch::Unreachable;
                };
                let Some(relay_key) = self.relay_key_for(fp) else {
                    return Dispatch::Unreachable;
                };
                if !self.relay.is_connected() {
                    return Dispatch::Deferred;
                }
                match self.relay.publish(fp, &relay_key, wire) {
                    Ok(()) => Dispatch::Sent(TransportKind::Relay),
                    Err(e) => {
                        warn!(error = %e, kind = wire.kind(), "Relay publish failed");
                        Dispatch::Deferred
                    }
                }
            }
        }
    }

    /// Relay key of a mutual favorite, if we have one.
    pub(crate) fn relay_key_for(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.favorites
            .favorite(fingerprint)
            .filter(FavoriteRecord::is_mutual)
            .and_then(|record| record.relay_public_key)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Where a peer's conversation lives: the live mesh address when known.
    pub(crate) fn chat_key(&self, fingerprint: Option<&Fingerprint>, fallback: &PeerAddress) -> PeerAddress {
        fingerprint
            .and_then(|fp| self.resolver.live_address(fp))
            .cloned()
            .unwrap_or_else(|| fallback.clone())
    }

    /// Best routing handle for a peer: live address, else its full key.
    /// Unknown peers get a placeholder that only the relay path can use.
    pub(crate) fn route_address(&self, fingerprint: &Fingerprint) -> PeerAddress {
        self.resolver
            .peer(fingerprint)
            .and_then(|p| {
                p.live_address()
                    .cloned()
                    .or_else(|| p.noise_key_hex.as_deref().map(PeerAddress::new))
            })
            .unwrap_or_else(|| PeerAddress::new(fingerprint.to_hex()))
    }

    pub(crate) fn display_name(&self, fingerprint: Option<&Fingerprint>, address: &PeerAddress) -> String {
        fingerprint
            .and_then(|fp| self.resolver.nickname(fp))
            .map(str::to_string)
            .or_else(|| self.mesh.peer_nickname(address))
            .unwrap_or_else(|| address.to_string())
    }

    pub(crate) fn private_wire(&self, id: &MessageId, content: &str, at: DateTime<Utc>) -> WireMessage {
        WireMessage::PrivateMessage(PrivateMessage {
            id: id.clone(),
            content: content.to_string(),
            sender_nickname: self.nickname.clone(),
            timestamp_ms: at.timestamp_millis(),
        })
    }

    /// Forget receipt records for messages that are neither buffered nor
    /// stored, once the receipt is older than the message retention window.
    /// Skipped entirely if the store cannot be read.
    fn prune_receipts(&mut self, instant: Instant) {
        let cutoff = retention_cutoff(self.clock.now(), self.config.message_retention);
        let retained = self
            .db
            .private_message_ids()
            .and_then(|mut ids| {
                ids.extend(self.db.sent_receipts_since(cutoff)?);
                Ok(ids)
            });
        let mut keep = match retained {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Skipping receipt prune, store unreadable");
                return;
            }
        };
        keep.extend(self.chats.all_message_ids());

        if let Some(removed) = self.delivery.prune(&keep, instant) {
            if removed > 0 {
                match self.db.prune_sent_receipts(&keep) {
                    Ok(pruned) => debug!(pruned, "Pruned read receipts"),
                    Err(e) => warn!(error = %e, "Failed to prune read receipts"),
                }
            }
        }
    }

    /// Buffer a direct message and store it.
    pub(crate) fn append_private(&mut self, chat: &PeerAddress, message: Message) -> bool {
        if let Err(e) = self.db.insert_private_message(chat, &message) {
            warn!(error = %e, "Failed to persist direct message");
        }
        self.chats.append(chat, message)
    }

    pub(crate) fn set_unread(&mut self, chat: &PeerAddress) {
        self.chats.mark_unread(chat);
        if let Err(e) = self.db.set_chat_unread(chat, true, self.clock.now()) {
            warn!(error = %e, "Failed to persist unread marker");
        }
    }

    /// Mirror an in-memory conversation move into the store.
    pub(crate) fn persist_migration(&mut self, old: &PeerAddress, new: &PeerAddress) {
        if old == new {
            return;
        }
        let now = self.clock.now();
        let result = self
            .db
            .save_chat(new, self.chats.messages(new))
            .and_then(|_| self.db.set_chat_unread(old, false, now))
            .and_then(|_| self.db.set_chat_unread(new, self.chats.is_unread(new), now));
        if let Err(e) = result {
            warn!(error = %e, old = %old, new = %new, "Failed to persist chat migration");
        }
    }

    fn queue(
        &mut self,
        fingerprint: Option<Fingerprint>,
        chat_key: &PeerAddress,
        id: &MessageId,
        recipient: &str,
        content: &str,
        at: DateTime<Utc>,
    ) {
        let Some(peer) = fingerprint else {
            self.awaiting_session
                .entry(chat_key.clone())
                .or_default()
                .push(id.clone());
            return;
        };
        self.enqueue_outbox(OutboxEntry {
            message_id: id.clone(),
            peer,
            recipient_nickname: recipient.to_string(),
            content: content.to_string(),
            queued_at: at,
        });
    }

    pub(crate) fn enqueue_outbox(&mut self, entry: OutboxEntry) {
        if let Err(e) = self.db.enqueue_outbox(&entry) {
            warn!(error = %e, "Failed to persist outbox entry");
        }
        for evicted in self.outbox.enqueue(entry) {
            if let Err(e) = self.db.remove_outbox(&evicted) {
                warn!(error = %e, "Failed to remove evicted outbox entry");
            }
            self.set_status(
                &evicted,
                DeliveryStatus::Failed {
                    reason: "outbox full".into(),
                },
            );
        }
    }

    /// Move sends that waited for a handshake on `address` into the outbox.
    pub(crate) fn adopt_awaiting(&mut self, address: &PeerAddress, peer: Fingerprint) {
        let Some(ids) = self.awaiting_session.remove(address) else {
            return;
        };
        for id in ids {
            let Some(message) = self.chats.find_mut(&id) else {
                continue;
            };
            message.recipient = Some(peer);
            if let Err(e) = self.db.update_private_message(message) {
                warn!(error = %e, "Failed to persist message recipient");
            }
            let entry = OutboxEntry {
                message_id: id.clone(),
                peer,
                recipient_nickname: message.recipient_nickname.clone().unwrap_or_default(),
                content: message.content.clone(),
                queued_at: message.timestamp,
            };
            self.enqueue_outbox(entry);
        }
    }

    fn expire_outbox(&mut self) {
        let now = self.clock.now();
        for id in self.outbox.expire(now) {
            if let Err(e) = self.db.remove_outbox(&id) {
                warn!(error = %e, "Failed to remove expired outbox entry");
            }
            self.set_status(
                &id,
                DeliveryStatus::Failed {
                    reason: "expired".into(),
                },
            );
        }
    }

    /// Apply a delivery transition everywhere the message lives.
    pub(crate) fn set_status(&mut self, id: &MessageId, status: DeliveryStatus) -> bool {
        let changed = self
            .delivery
            .update(id, &status, &mut [&mut self.chats as &mut dyn StatusTarget, &mut self.timelines]);
        if changed > 0 {
            if let Some((_, message)) = self.chats.find(id) {
                if let Err(e) = self.db.update_private_message(message) {
                    warn!(error = %e, "Failed to persist delivery status");
                }
            }
            self.notify(CoreNotification::DeliveryStatusChanged {
                id: id.clone(),
                status,
            });
        }
        changed > 0
    }

    pub(crate) fn push_system(&mut self, peer: Option<&PeerAddress>, text: String) {
        let message = Message::system(text, self.clock.now());
        if let Some(peer) = peer {
            self.chats.append(peer, message.clone());
        }
        self.notify(CoreNotification::SystemMessage {
            peer: peer.cloned(),
            message,
        });
    }

    pub(crate) fn notify(&mut self, notification: CoreNotification) {
        self.notifications.push(notification);
    }

    pub(crate) fn timestamp_from_millis(&self, millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(|| self.clock.now())
    }
}

fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    now - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(7))
}

/// Rebuild chat buffers from stored history. Incoming messages without a
/// recorded receipt are owed one again.
fn restore_chats(
    history: Vec<(PeerAddress, Message)>,
    unread: HashSet<PeerAddress>,
    receipts_sent: &HashSet<MessageId>,
    local: &Fingerprint,
) -> PrivateChats {
    let mut chats = PrivateChats::new();
    for (chat, message) in history {
        let owed = !message.is_outgoing_from(local) && !receipts_sent.contains(&message.id);
        let id = message.id.clone();
        if chats.append(&chat, message) && owed {
            chats.add_pending_receipt(&chat, id);
        }
    }
    for chat in &unread {
        chats.mark_unread(chat);
    }
    chats
}

#[cfg(test)]
pub(crate) mod testkit {
    use super::*;
    use crate::clock::manual::ManualClock;
    use crate::contracts::fakes::{FakeMesh, FakeRelay};

    pub struct Harness {
        pub router: MessageRouter,
        pub mesh: FakeMesh,
        pub relay: FakeRelay,
        pub clock: ManualClock,
    }

    pub fn harness() -> Harness {
        harness_with(Identity::generate(), CoreConfig::default())
    }

    pub fn harness_with(identity: Identity, config: CoreConfig) -> Harness {
        harness_on(identity, config, Database::open_in_memory().unwrap())
    }

    /// Router over an existing database, e.g. one reopened from disk.
    pub fn harness_on(identity: Identity, config: CoreConfig, db: Database) -> Harness {
        let mesh = FakeMesh::default();
        let relay = FakeRelay::default();
        let clock = ManualClock::new();
        let router = MessageRouter::new(
            config,
            RouterParts {
                identity,
                nickname: "me".into(),
                mesh: Box::new(mesh.clone()),
                relay: Box::new(relay.clone()),
                favorites: Box::new(Database::open_in_memory().unwrap()),
                db,
                clock: Box::new(clock.clone()),
            },
        )
        .unwrap();
        Harness {
            router,
            mesh,
            relay,
            clock,
        }
    }

    /// A remote peer with a real identity, authenticated on `address`.
    pub fn authenticate(h: &mut Harness, peer: &Identity, address: &str, nickname: &str) -> PeerAddress {
        let address = PeerAddress::new(address);
        h.mesh.connect(&address, nickname);
        h.router.handle_event(crate::events::NetworkEvent::SessionAuthenticated {
            address: address.clone(),
            noise_key_hex: peer.noise_public_key_hex(),
            nickname: Some(nickname.to_string()),
        });
        address
    }

    pub fn make_mutual_favorite(h: &mut Harness, peer: &Fingerprint, relay_key: &str) {
        let mut record = FavoriteRecord::new(*peer, "bob", Utc::now());
        record.is_favorite = true;
        record.they_favorited_us = true;
        record.relay_public_key = Some(relay_key.to_string());
        h.router.favorites.save_favorite(&record).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::testkit::*;
    use super::*;
    use crate::events::NetworkEvent;

    fn status_of(h: &Harness, id: &MessageId) -> Option<DeliveryStatus> {
        h.router
            .chats()
            .find(id)
            .and_then(|(_, m)| m.delivery_status.clone())
    }

    #[test]
    fn test_send_over_mesh_when_connected() {
        let mut h = harness();
        let bob = Identity::generate();
        let addr = authenticate(&mut h, &bob, "0011223344556677", "bob");

        let (id, outcome) = h.router.send("hello", &addr).unwrap();

        assert_eq!(outcome, SendOutcome::Sent(TransportKind::Mesh));
        assert_eq!(status_of(&h, &id), Some(DeliveryStatus::Sent));
        let sent = h.mesh.sent();
        assert!(matches!(
            &sent.last().unwrap().1,
            WireMessage::PrivateMessage(pm) if pm.id == id && pm.content == "hello"
        ));
    }

    #[test]
    fn test_reachable_without_session_triggers_handshake_and_queues() {
        let mut h = harness();
        let addr = PeerAddress::new("0011223344556677");
        h.mesh.0.lock().unwrap().reachable.insert(addr.clone());

        let (id, outcome) = h.router.send("hi", &addr).unwrap();

        assert_eq!(outcome, SendOutcome::Queued);
        assert_eq!(h.mesh.handshakes(), vec![addr.clone()]);
        assert_eq!(status_of(&h, &id), Some(DeliveryStatus::Sending));

        // handshake completes; queued message goes out with the same id
        let bob = Identity::generate();
        h.mesh.connect(&addr, "bob");
        h.router.handle_event(NetworkEvent::SessionAuthenticated {
            address: addr.clone(),
            noise_key_hex: bob.noise_public_key_hex(),
            nickname: Some("bob".into()),
        });

        assert_eq!(status_of(&h, &id), Some(DeliveryStatus::Sent));
        assert!(h.router.outbox().is_empty());
        assert!(h
            .mesh
            .sent()
            .iter()
            .any(|(_, w)| matches!(w, WireMessage::PrivateMessage(pm) if pm.id == id)));
    }

    #[test]
    fn test_relay_only_for_mutual_favorite_with_key() {
        let mut h = harness();
        let bob = Identity::generate();
        let bob_fp = bob.fingerprint();
        let full = PeerAddress::new(bob.noise_public_key_hex());
        h.relay.set_connected(true);

        let (_, outcome) = h.router.send("one", &full).unwrap();
        assert_eq!(outcome, SendOutcome::Unreachable);

        make_mutual_favorite(&mut h, &bob_fp, "bob-relay");
        let (id, outcome) = h.router.send("two", &full).unwrap();
        assert_eq!(outcome, SendOutcome::Sent(TransportKind::Relay));
        assert_eq!(status_of(&h, &id), Some(DeliveryStatus::Sent));

        let published = h.relay.published();
        let (to, key, _) = published.last().unwrap();
        assert_eq!(to, &bob_fp);
        assert_eq!(key, "bob-relay");
    }

    #[test]
    fn test_unreachable_marks_failed_and_surfaces_system_message() {
        let mut h = harness();
        let bob = Identity::generate();
        let full = PeerAddress::new(bob.noise_public_key_hex());

        let (id, outcome) = h.router.send("anyone there?", &full).unwrap();

        assert_eq!(outcome, SendOutcome::Unreachable);
        assert!(status_of(&h, &id).unwrap().is_failed());
        assert_eq!(h.router.outbox().len(), 1);
        let notes = h.router.drain_notifications();
        assert!(notes.iter().any(|n| matches!(
            n,
            CoreNotification::SystemMessage { message, .. } if message.content.contains("not reachable")
        )));
        // kept in the chat buffer, not dropped
        assert!(h.router.chats().find(&id).is_some());
    }

    #[test]
    fn test_failed_message_retried_on_reconnect_with_same_id() {
        let mut h = harness();
        let bob = Identity::generate();
        let full = PeerAddress::new(bob.noise_public_key_hex());
        let (id, _) = h.router.send("later", &full).unwrap();

        authenticate(&mut h, &bob, "0011223344556677", "bob");

        assert_eq!(status_of(&h, &id), Some(DeliveryStatus::Sent));
        let ids: Vec<MessageId> = h
            .mesh
            .sent()
            .into_iter()
            .filter_map(|(_, w)| match w {
                WireMessage::PrivateMessage(pm) => Some(pm.id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![id]);
    }

    #[test]
    fn test_relay_outbox_flushes_when_relay_connects() {
        let mut h = harness();
        let bob = Identity::generate();
        let full = PeerAddress::new(bob.noise_public_key_hex());
        make_mutual_favorite(&mut h, &bob.fingerprint(), "bob-relay");

        let (id, outcome) = h.router.send("via relay", &full).unwrap();
        assert_eq!(outcome, SendOutcome::Queued);

        h.relay.set_connected(true);
        h.router.handle_event(NetworkEvent::RelayConnected);

        assert_eq!(status_of(&h, &id), Some(DeliveryStatus::Sent));
        assert_eq!(h.relay.published().len(), 1);
    }

    #[test]
    fn test_outbox_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.db");
        let bob = Identity::generate();
        let full = PeerAddress::new(bob.noise_public_key_hex());

        {
            let mut h = harness();
            h.router.db = Database::open_at(&path).unwrap();
            h.router.send("persist me", &full).unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        let queued = db.outbox_for_peer(&bob.fingerprint()).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].content, "persist me");
    }

    #[test]
    fn test_receipts_survive_restart_past_grace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.db");
        let m1 = MessageId::from("m1");
        Database::open_at(&path)
            .unwrap()
            .mark_receipt_sent(&m1, Utc::now())
            .unwrap();

        let mut h = harness_on(
            Identity::generate(),
            CoreConfig::default(),
            Database::open_at(&path).unwrap(),
        );
        h.clock.advance(Duration::from_secs(11));
        h.router.tick();
        assert!(h.router.delivery.receipt_already_sent(&m1));
        drop(h);

        let db = Database::open_at(&path).unwrap();
        assert!(db.receipt_sent(&m1).unwrap());
    }

    #[test]
    fn test_receipts_past_retention_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.db");
        let stale = MessageId::from("stale");
        Database::open_at(&path)
            .unwrap()
            .mark_receipt_sent(&stale, Utc::now() - chrono::Duration::days(8))
            .unwrap();

        let mut h = harness_on(
            Identity::generate(),
            CoreConfig::default(),
            Database::open_at(&path).unwrap(),
        );
        h.router.tick();
        assert!(h.router.delivery.receipt_already_sent(&stale));

        h.clock.advance(Duration::from_secs(11));
        h.router.tick();
        assert!(!h.router.delivery.receipt_already_sent(&stale));
        assert!(!h.router.db.receipt_sent(&stale).unwrap());
    }

    #[test]
    fn test_chat_history_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.db");
        let me = Identity::generate();
        let bob = Identity::generate();
        let addr = PeerAddress::new("0011223344556677");

        let sent_id = {
            let mut h = harness_on(me.clone(), CoreConfig::default(), Database::open_at(&path).unwrap());
            authenticate(&mut h, &bob, addr.as_str(), "bob");
            let (id, _) = h.router.send("hello bob", &addr).unwrap();
            let incoming = WireMessage::PrivateMessage(PrivateMessage {
                id: MessageId::from("in-1"),
                content: "hi back".into(),
                sender_nickname: "bob".into(),
                timestamp_ms: h.clock.now().timestamp_millis(),
            });
            h.router.handle_event(NetworkEvent::MeshPacket {
                from: addr.clone(),
                data: incoming.to_bytes().unwrap(),
            });
            id
        };

        let mut h = harness_on(me, CoreConfig::default(), Database::open_at(&path).unwrap());
        let history = h.router.chats().messages(&addr);
        assert_eq!(history.len(), 2);
        assert_eq!(status_of(&h, &sent_id), Some(DeliveryStatus::Sent));
        assert_eq!(
            h.router.chats().find(&sent_id).unwrap().1.recipient,
            Some(bob.fingerprint())
        );
        assert!(h.router.chats().is_unread(&addr));
        assert_eq!(h.router.chats().pending_receipts(&addr), 1);

        // the owed receipt goes out once the chat is opened
        authenticate(&mut h, &bob, addr.as_str(), "bob");
        assert_eq!(h.router.mark_chat_read(&addr), 1);
        drop(h);
        let db = Database::open_at(&path).unwrap();
        assert!(db.receipt_sent(&MessageId::from("in-1")).unwrap());
        assert!(db.load_unread_chats().unwrap().is_empty());
    }

    #[test]
    fn test_old_history_expires_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.db");
        let addr = PeerAddress::new("0011223344556677");
        {
            let db = Database::open_at(&path).unwrap();
            let old = Message::incoming_private(
                MessageId::from("old"),
                meshchat_shared::Sender::Named("bob".into()),
                "bob",
                "last week",
                Utc::now() - chrono::Duration::days(8),
                None,
            );
            db.insert_private_message(&addr, &old).unwrap();
        }

        let h = harness_on(
            Identity::generate(),
            CoreConfig::default(),
            Database::open_at(&path).unwrap(),
        );
        assert!(h.router.chats().messages(&addr).is_empty());
        assert!(h.router.db.private_message_ids().unwrap().is_empty());
    }

    #[test]
    fn test_oversized_send_rejected() {
        let mut h = harness();
        let big = "x".repeat(16 * 1024 + 1);
        let addr = PeerAddress::new("0011223344556677");
        assert!(matches!(
            h.router.send(&big, &addr),
            Err(MeshChatError::OversizedMessage { .. })
        ));
        assert!(h.router.chats().messages(&addr).is_empty());
    }

    #[test]
    fn test_favorite_toggle_notifies_peer_once() {
        let mut h = harness();
        let bob = Identity::generate();
        authenticate(&mut h, &bob, "0011223344556677", "bob");
        h.mesh.clear_sent();

        h.router.set_favorite(&bob.fingerprint(), true).unwrap();
        h.router.set_favorite(&bob.fingerprint(), true).unwrap();

        let notices: Vec<_> = h
            .mesh
            .sent()
            .into_iter()
            .filter(|(_, w)| matches!(w, WireMessage::FavoriteNotification(_)))
            .collect();
        assert_eq!(notices.len(), 1);
        assert!(matches!(
            &notices[0].1,
            WireMessage::FavoriteNotification(n)
                if n.is_favorite && n.relay_public_key.as_deref() == Some("local-relay-key")
        ));
    }

    #[test]
    fn test_begin_verification_with_session_sends_challenge() {
        let mut h = harness();
        let bob = Identity::generate();
        authenticate(&mut h, &bob, "0011223344556677", "bob");
        let qr = VerificationQr::create(&bob, "bob", h.clock.now()).unwrap();

        let fp = h.router.begin_verification(&qr).unwrap();

        assert_eq!(fp, bob.fingerprint());
        assert!(h.router.verification().pending(&fp).unwrap().sent);
        assert!(h
            .mesh
            .sent()
            .iter()
            .any(|(_, w)| matches!(w, WireMessage::VerifyChallenge(c) if c.pubkey_hex == bob.noise_public_key_hex())));
    }

    #[test]
    fn test_verification_qr_round_trip() {
        let h = harness();
        let code = h.router.verification_qr().unwrap();
        let qr = VerificationQr::decode(&code).unwrap();
        assert_eq!(qr.fingerprint(), h.router.local_fingerprint());
    }

    #[test]
    fn test_tick_expires_old_outbox_entries() {
        let mut h = harness();
        let bob = Identity::generate();
        let full = PeerAddress::new(bob.noise_public_key_hex());
        h.router.send("stale", &full).unwrap();

        h.clock.advance(Duration::from_secs(25 * 60 * 60));
        h.router.tick();

        assert!(h.router.outbox().is_empty());
    }
}
