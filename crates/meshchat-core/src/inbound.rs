//! Network events into router state.

use chrono::Duration as ChronoDuration;
use meshchat_shared::protocol::{
    DeliveryAck, FavoriteNotification, PrivateMessage, ReadReceipt, VerifyChallenge,
    VerifyResponse,
};
use meshchat_shared::{
    ChannelId, DeliveryStatus, Fingerprint, MeshChatError, Message, MessageId, PeerAddress,
    Sender, TransportKind, WireMessage,
};
use meshchat_store::FavoriteRecord;
use tracing::{debug, info, warn};

use crate::content::content_fingerprint;
use crate::events::{CoreNotification, NetworkEvent};
use crate::rate_limit::sender_key;
use crate::router::{Dispatch, MessageRouter};

/// Where a packet came from; replies go back the same way.
#[derive(Debug, Clone)]
enum Origin {
    Mesh(PeerAddress),
    /// Full noise-key address of a relay sender.
    Relay(PeerAddress),
}

impl Origin {
    fn kind(&self) -> TransportKind {
        match self {
            Origin::Mesh(_) => TransportKind::Mesh,
            Origin::Relay(_) => TransportKind::Relay,
        }
    }

    fn address(&self) -> &PeerAddress {
        match self {
            Origin::Mesh(a) | Origin::Relay(a) => a,
        }
    }
}

impl MessageRouter {
    /// Apply one network event. Protocol failures are logged and dropped;
    /// nothing here is fatal.
    pub fn handle_event(&mut self, event: NetworkEvent) {
        if let Err(e) = self.dispatch_event(event) {
            if e.is_silent() {
                debug!(error = %e, "Dropped inbound event");
            } else {
                warn!(error = %e, "Inbound event failed");
            }
        }
    }

    fn dispatch_event(&mut self, event: NetworkEvent) -> Result<(), MeshChatError> {
        match event {
            NetworkEvent::SessionAuthenticated {
                address,
                noise_key_hex,
                nickname,
            } => self.on_session_authenticated(&address, &noise_key_hex, nickname.as_deref()),
            NetworkEvent::PeerConnected { address } => {
                if let Some(fp) = self.resolver.resolve(&address) {
                    self.last_seen_on_mesh.insert(fp, self.clock.instant());
                    self.flush_outbox(&fp);
                }
                Ok(())
            }
            NetworkEvent::PeerDisconnected { address } => {
                debug!(address = %address, "Peer disconnected");
                Ok(())
            }
            NetworkEvent::MeshPacket { from, data } => {
                let wire = WireMessage::from_bytes(&data)?;
                let fingerprint = self.resolver.resolve(&from);
                if let Some(fp) = fingerprint {
                    self.last_seen_on_mesh.insert(fp, self.clock.instant());
                }
                let nickname = self
                    .mesh
                    .peer_nickname(&from)
                    .unwrap_or_else(|| from.to_string());
                self.on_wire(Origin::Mesh(from), fingerprint, &nickname, wire)
            }
            NetworkEvent::RelayPacket {
                from_key,
                nickname,
                data,
            } => {
                let wire = WireMessage::from_bytes(&data)?;
                let fingerprint = Fingerprint::from_noise_key_hex(&from_key)?;
                let peer = self.resolver.ensure_peer(fingerprint, &nickname);
                if peer.noise_key_hex.is_none() {
                    peer.noise_key_hex = Some(from_key.to_ascii_lowercase());
                }
                self.on_wire(
                    Origin::Relay(PeerAddress::new(from_key)),
                    Some(fingerprint),
                    &nickname,
                    wire,
                )
            }
            NetworkEvent::PublicMessage {
                id,
                from,
                nickname,
                content,
                timestamp,
                channel,
            } => self.on_public_message(id, from, nickname, content, timestamp, channel),
            NetworkEvent::RelayConnected => {
                info!("Relay connected");
                self.flush_all_outbox();
                Ok(())
            }
            NetworkEvent::RelayDisconnected => {
                info!("Relay disconnected");
                Ok(())
            }
        }
    }

    fn on_session_authenticated(
        &mut self,
        address: &PeerAddress,
        noise_key_hex: &str,
        nickname: Option<&str>,
    ) -> Result<(), MeshChatError> {
        let auth = self
            .resolver
            .record_authenticated(address, noise_key_hex, nickname)?;
        let fp = auth.fingerprint;
        let retain_since = self.clock.now()
            - ChronoDuration::from_std(self.config.migration_retention)
                .unwrap_or_else(|_| ChronoDuration::hours(24));

        for stale in &auth.stale_addresses {
            self.resolver
                .migrate(stale, address, &mut self.chats, retain_since);
            self.persist_migration(stale, address);
            self.adopt_awaiting(stale, fp);
        }
        self.adopt_awaiting(address, fp);

        let verified = self.verification.is_verified(&fp);
        if let Some(peer) = self.resolver.peer_mut(&fp) {
            peer.is_verified = verified;
        }
        self.last_seen_on_mesh.insert(fp, self.clock.instant());

        if let Some(challenge) = self.verification.on_session_authenticated(&fp) {
            if let Err(e) = self.mesh.send(address, &challenge) {
                warn!(error = %e, "Failed to send deferred verification challenge");
            }
        }
        self.flush_outbox(&fp);
        Ok(())
    }

    fn on_wire(
        &mut self,
        origin: Origin,
        fingerprint: Option<Fingerprint>,
        nickname: &str,
        wire: WireMessage,
    ) -> Result<(), MeshChatError> {
        if fingerprint.is_some_and(|fp| self.resolver.is_blocked(&fp)) {
            debug!(kind = wire.kind(), "Dropped packet from blocked peer");
            return Ok(());
        }
        match wire {
            WireMessage::PrivateMessage(pm) => {
                self.on_private_message(origin, fingerprint, nickname, pm)
            }
            WireMessage::DeliveryAck(ack) => {
                self.on_delivery_ack(fingerprint, nickname, ack);
                Ok(())
            }
            WireMessage::ReadReceipt(receipt) => {
                self.on_read_receipt(fingerprint, receipt);
                Ok(())
            }
            WireMessage::VerifyChallenge(challenge) => {
                self.on_verify_challenge(origin, fingerprint, challenge)
            }
            WireMessage::VerifyResponse(response) => self.on_verify_response(fingerprint, response),
            WireMessage::FavoriteNotification(notice) => {
                self.on_favorite_notification(origin, fingerprint, nickname, notice)
            }
        }
    }

    fn on_private_message(
        &mut self,
        origin: Origin,
        fingerprint: Option<Fingerprint>,
        nickname: &str,
        pm: PrivateMessage,
    ) -> Result<(), MeshChatError> {
        if pm.content.len() > self.config.max_content_bytes {
            return Err(MeshChatError::OversizedMessage {
                size: pm.content.len(),
                max: self.config.max_content_bytes,
            });
        }

        self.delivery.record_arrival(&pm.id, origin.kind());
        if self.delivery.record_ack_sent(&pm.id) {
            let ack = WireMessage::DeliveryAck(DeliveryAck {
                message_id: pm.id.clone(),
            });
            let result = self.send_via(origin.kind(), fingerprint.as_ref(), origin.address(), &ack);
            if result != Dispatch::Sent(origin.kind()) {
                debug!(id = %pm.id, result = ?result, "Delivery ack not sent");
            }
        }

        if self.chats.find(&pm.id).is_some() {
            return Err(MeshChatError::DuplicateMessage);
        }

        let chat_key = self.chat_key(fingerprint.as_ref(), origin.address());
        let sender = fingerprint
            .map(Sender::Peer)
            .unwrap_or_else(|| Sender::Named(nickname.to_string()));
        let sender_address = match &origin {
            Origin::Mesh(address) => Some(address.clone()),
            Origin::Relay(_) => None,
        };
        let message = Message::incoming_private(
            pm.id.clone(),
            sender,
            pm.sender_nickname.clone(),
            pm.content,
            self.timestamp_from_millis(pm.timestamp_ms),
            sender_address,
        );

        self.append_private(&chat_key, message.clone());
        self.set_unread(&chat_key);
        if !self.delivery.receipt_already_sent(&pm.id) {
            self.chats.add_pending_receipt(&chat_key, pm.id);
        }
        self.notify(CoreNotification::PrivateMessageReceived {
            peer: chat_key,
            message,
        });
        Ok(())
    }

    fn on_delivery_ack(&mut self, fingerprint: Option<Fingerprint>, nickname: &str, ack: DeliveryAck) {
        if !self.is_recipient_of(&ack.message_id, fingerprint.as_ref()) {
            debug!(id = %ack.message_id, "Ignored delivery ack from non-recipient");
            return;
        }
        let to = fingerprint
            .and_then(|fp| self.resolver.nickname(&fp))
            .unwrap_or(nickname)
            .to_string();
        self.set_status(
            &ack.message_id,
            DeliveryStatus::Delivered {
                to,
                at: self.clock.now(),
            },
        );
        self.drop_from_outbox(&ack.message_id);
    }

    fn on_read_receipt(&mut self, fingerprint: Option<Fingerprint>, receipt: ReadReceipt) {
        if !self.is_recipient_of(&receipt.message_id, fingerprint.as_ref()) {
            debug!(id = %receipt.message_id, "Ignored read receipt from non-recipient");
            return;
        }
        self.set_status(
            &receipt.message_id,
            DeliveryStatus::Read {
                by: receipt.reader_nickname,
                at: self.clock.now(),
            },
        );
        self.drop_from_outbox(&receipt.message_id);
    }

    /// Acks and receipts only count from the peer an outgoing direct
    /// message was addressed to.
    fn is_recipient_of(&self, id: &MessageId, from: Option<&Fingerprint>) -> bool {
        let Some(from) = from else {
            return false;
        };
        let local = self.identity.fingerprint();
        self.chats
            .find(id)
            .is_some_and(|(_, m)| m.is_outgoing_from(&local) && m.recipient.as_ref() == Some(from))
    }

    /// The peer has it, whichever copy got there.
    fn drop_from_outbox(&mut self, id: &MessageId) {
        if self.outbox.remove(id).is_some() {
            if let Err(e) = self.db.remove_outbox(id) {
                warn!(error = %e, "Failed to remove acknowledged outbox entry");
            }
        }
    }

    fn on_verify_challenge(
        &mut self,
        origin: Origin,
        fingerprint: Option<Fingerprint>,
        challenge: VerifyChallenge,
    ) -> Result<(), MeshChatError> {
        let from = fingerprint
            .ok_or_else(|| MeshChatError::SessionNotEstablished(origin.address().to_string()))?;
        let instant = self.clock.instant();
        let response = self
            .verification
            .on_challenge(&from, &challenge, &self.identity, instant)?;
        let result = self.send_via(origin.kind(), Some(&from), origin.address(), &response);
        debug!(peer = %from.short(), result = ?result, "Answered verification challenge");
        Ok(())
    }

    fn on_verify_response(
        &mut self,
        fingerprint: Option<Fingerprint>,
        response: VerifyResponse,
    ) -> Result<(), MeshChatError> {
        let from = fingerprint.ok_or(MeshChatError::NonceMismatch)?;
        let verified = self
            .verification
            .on_response(&from, &response, self.clock.instant())?;

        if let Err(e) = self.db.mark_verified(&from, self.clock.now()) {
            warn!(error = %e, "Failed to persist verification");
        }
        if let Some(peer) = self.resolver.peer_mut(&from) {
            peer.is_verified = true;
        }
        info!(peer = %from.short(), mutual = verified.mutual, "Peer verified");

        self.notify(CoreNotification::PeerVerified { fingerprint: from });
        if verified.mutual {
            self.notify(CoreNotification::MutualVerification { fingerprint: from });
        }
        Ok(())
    }

    fn on_favorite_notification(
        &mut self,
        origin: Origin,
        fingerprint: Option<Fingerprint>,
        nickname: &str,
        notice: FavoriteNotification,
    ) -> Result<(), MeshChatError> {
        let from = fingerprint
            .ok_or_else(|| MeshChatError::SessionNotEstablished(origin.address().to_string()))?;
        let now = self.clock.now();
        let mut record = self
            .favorites
            .favorite(&from)
            .unwrap_or_else(|| FavoriteRecord::new(from, nickname, now));

        let flag_changed = record.they_favorited_us != notice.is_favorite;
        let key_changed = notice.relay_public_key.is_some()
            && record.relay_public_key != notice.relay_public_key;
        if !flag_changed && !key_changed {
            return Err(MeshChatError::DuplicateMessage);
        }

        record.they_favorited_us = notice.is_favorite;
        if notice.relay_public_key.is_some() {
            record.relay_public_key = notice.relay_public_key;
        }
        record.updated_at = now;
        if let Err(e) = self.favorites.save_favorite(&record) {
            warn!(error = %e, "Failed to persist favorite notification");
        }

        if flag_changed {
            let chat_key = self.chat_key(Some(&from), origin.address());
            let text = if notice.is_favorite {
                format!("{} favorited you", record.nickname)
            } else {
                format!("{} unfavorited you", record.nickname)
            };
            self.push_system(Some(&chat_key), text);
            self.notify(CoreNotification::FavoriteChanged {
                fingerprint: from,
                is_favorite: record.is_favorite,
                they_favorited_us: record.they_favorited_us,
            });
        }
        Ok(())
    }

    fn on_public_message(
        &mut self,
        id: MessageId,
        from: Option<PeerAddress>,
        nickname: String,
        content: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        channel: ChannelId,
    ) -> Result<(), MeshChatError> {
        let fingerprint = from.as_ref().and_then(|a| self.resolver.resolve(a));
        if fingerprint.is_some_and(|fp| self.resolver.is_blocked(&fp)) {
            return Ok(());
        }

        let key = sender_key(fingerprint.as_ref(), from.as_ref(), &nickname);
        self.limiter.admit(
            &key,
            &content_fingerprint(&content),
            content.len(),
            self.clock.instant(),
        )?;

        let sender = fingerprint
            .map(Sender::Peer)
            .unwrap_or_else(|| Sender::Named(nickname.clone()));
        let mut message = Message::public(id, sender, nickname, content, timestamp, channel.clone());
        message.sender_address = from;
        self.timelines.enqueue_public(message, channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use meshchat_shared::credential::VerificationQr;
    use meshchat_shared::identity::Identity;

    use crate::clock::Clock;
    use crate::config::CoreConfig;
    use crate::router::testkit::*;

    use super::*;

    fn packet(wire: &WireMessage) -> Vec<u8> {
        wire.to_bytes().unwrap()
    }

    fn dm(id: &str, content: &str) -> WireMessage {
        WireMessage::PrivateMessage(PrivateMessage {
            id: MessageId::from(id),
            content: content.into(),
            sender_nickname: "bob".into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        })
    }

    fn acks(h: &Harness) -> usize {
        h.mesh
            .sent()
            .iter()
            .filter(|(_, w)| matches!(w, WireMessage::DeliveryAck(_)))
            .count()
    }

    #[test]
    fn test_incoming_dm_acked_once_and_deduped() {
        let mut h = harness();
        let bob = Identity::generate();
        let addr = authenticate(&mut h, &bob, "0011223344556677", "bob");

        for _ in 0..2 {
            h.router.handle_event(NetworkEvent::MeshPacket {
                from: addr.clone(),
                data: packet(&dm("m1", "hello")),
            });
        }

        assert_eq!(h.router.chats().messages(&addr).len(), 1);
        assert!(h.router.chats().is_unread(&addr));
        assert_eq!(acks(&h), 1);
        let received = h
            .router
            .drain_notifications()
            .into_iter()
            .filter(|n| matches!(n, CoreNotification::PrivateMessageReceived { .. }))
            .count();
        assert_eq!(received, 1);
    }

    #[test]
    fn test_status_never_regresses() {
        let mut h = harness();
        let bob = Identity::generate();
        let addr = authenticate(&mut h, &bob, "0011223344556677", "bob");
        let (id, _) = h.router.send("hi", &addr).unwrap();

        let read = WireMessage::ReadReceipt(ReadReceipt {
            message_id: id.clone(),
            reader_id: bob.fingerprint().to_hex(),
            reader_nickname: "bob".into(),
        });
        let ack = WireMessage::DeliveryAck(DeliveryAck {
            message_id: id.clone(),
        });
        h.router.handle_event(NetworkEvent::MeshPacket {
            from: addr.clone(),
            data: packet(&read),
        });
        h.router.handle_event(NetworkEvent::MeshPacket {
            from: addr.clone(),
            data: packet(&ack),
        });

        let (_, message) = h.router.chats().find(&id).unwrap();
        assert!(matches!(
            message.delivery_status,
            Some(DeliveryStatus::Read { ref by, .. }) if by == "bob"
        ));
    }

    #[test]
    fn test_receipts_only_count_from_recipient() {
        let mut h = harness();
        let bob = Identity::generate();
        let carol = Identity::generate();
        let bob_addr = authenticate(&mut h, &bob, "0011223344556677", "bob");
        let carol_addr = authenticate(&mut h, &carol, "8899aabbccddeeff", "carol");
        let (id, _) = h.router.send("for bob only", &bob_addr).unwrap();

        let read = WireMessage::ReadReceipt(ReadReceipt {
            message_id: id.clone(),
            reader_id: bob.fingerprint().to_hex(),
            reader_nickname: "bob".into(),
        });
        let ack = WireMessage::DeliveryAck(DeliveryAck {
            message_id: id.clone(),
        });
        for wire in [&read, &ack] {
            h.router.handle_event(NetworkEvent::MeshPacket {
                from: carol_addr.clone(),
                data: packet(wire),
            });
        }

        let (_, message) = h.router.chats().find(&id).unwrap();
        assert_eq!(message.delivery_status, Some(DeliveryStatus::Sent));

        h.router.handle_event(NetworkEvent::MeshPacket {
            from: bob_addr.clone(),
            data: packet(&ack),
        });
        let (_, message) = h.router.chats().find(&id).unwrap();
        assert!(matches!(
            message.delivery_status,
            Some(DeliveryStatus::Delivered { ref to, .. }) if to == "bob"
        ));
    }

    #[test]
    fn test_receipt_for_incoming_message_ignored() {
        let mut h = harness();
        let bob = Identity::generate();
        let addr = authenticate(&mut h, &bob, "0011223344556677", "bob");
        h.router.handle_event(NetworkEvent::MeshPacket {
            from: addr.clone(),
            data: packet(&dm("m1", "hello")),
        });
        h.router.drain_notifications();

        let read = WireMessage::ReadReceipt(ReadReceipt {
            message_id: MessageId::from("m1"),
            reader_id: bob.fingerprint().to_hex(),
            reader_nickname: "bob".into(),
        });
        h.router.handle_event(NetworkEvent::MeshPacket {
            from: addr.clone(),
            data: packet(&read),
        });

        let (_, message) = h.router.chats().find(&MessageId::from("m1")).unwrap();
        assert_eq!(message.delivery_status, None);
        assert!(h.router.drain_notifications().is_empty());
    }

    #[test]
    fn test_read_receipt_sent_once_across_reopen() {
        let mut h = harness();
        let bob = Identity::generate();
        let addr = authenticate(&mut h, &bob, "0011223344556677", "bob");
        h.router.handle_event(NetworkEvent::MeshPacket {
            from: addr.clone(),
            data: packet(&dm("m1", "hello")),
        });

        assert_eq!(h.router.mark_chat_read(&addr), 1);
        assert!(!h.router.chats().is_unread(&addr));
        assert_eq!(h.router.mark_chat_read(&addr), 0);
        assert!(!h.router.send_read_receipt(&MessageId::from("m1"), &addr, None));

        let receipts = h
            .mesh
            .sent()
            .iter()
            .filter(|(_, w)| matches!(w, WireMessage::ReadReceipt(_)))
            .count();
        assert_eq!(receipts, 1);
        assert!(h.router.db.receipt_sent(&MessageId::from("m1")).unwrap());
    }

    #[test]
    fn test_receipt_follows_arrival_transport() {
        let mut h = harness();
        let bob = Identity::generate();
        make_mutual_favorite(&mut h, &bob.fingerprint(), "bob-relay");
        h.relay.set_connected(true);

        // first copy over relay, second over mesh
        h.router.handle_event(NetworkEvent::RelayPacket {
            from_key: bob.noise_public_key_hex(),
            nickname: "bob".into(),
            data: packet(&dm("m1", "hello")),
        });
        let addr = authenticate(&mut h, &bob, "0011223344556677", "bob");
        h.router.handle_event(NetworkEvent::MeshPacket {
            from: addr.clone(),
            data: packet(&dm("m1", "hello")),
        });

        assert_eq!(h.router.mark_chat_read(&addr), 1);
        let relay_receipts = h
            .relay
            .published()
            .iter()
            .filter(|(_, _, w)| matches!(w, WireMessage::ReadReceipt(_)))
            .count();
        let mesh_receipts = h
            .mesh
            .sent()
            .iter()
            .filter(|(_, w)| matches!(w, WireMessage::ReadReceipt(_)))
            .count();
        assert_eq!((relay_receipts, mesh_receipts), (1, 0));
    }

    #[test]
    fn test_relay_chat_migrates_to_mesh_address() {
        let mut h = harness();
        let bob = Identity::generate();
        let full = PeerAddress::new(bob.noise_public_key_hex());
        h.router.handle_event(NetworkEvent::RelayPacket {
            from_key: bob.noise_public_key_hex(),
            nickname: "bob".into(),
            data: packet(&dm("r1", "from afar")),
        });
        assert_eq!(h.router.chats().messages(&full).len(), 1);
        assert!(h.router.chats().is_unread(&full));

        let addr = authenticate(&mut h, &bob, "0011223344556677", "bob");

        assert!(h.router.chats().messages(&full).is_empty());
        assert_eq!(h.router.chats().messages(&addr).len(), 1);
        assert!(h.router.chats().is_unread(&addr));
        assert_eq!(h.router.chats().pending_receipts(&addr), 1);

        let stored = h.router.db.load_private_messages().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0, addr);
        let unread: Vec<PeerAddress> = h.router.db.load_unread_chats().unwrap().into_iter().collect();
        assert_eq!(unread, vec![addr]);
    }

    #[test]
    fn test_address_rotation_moves_conversation() {
        let mut h = harness();
        let bob = Identity::generate();
        let first = authenticate(&mut h, &bob, "0011223344556677", "bob");
        h.router.handle_event(NetworkEvent::MeshPacket {
            from: first.clone(),
            data: packet(&dm("m1", "before")),
        });

        h.mesh.disconnect(&first);
        let second = authenticate(&mut h, &bob, "8899aabbccddeeff", "bob");

        assert!(h.router.chats().messages(&first).is_empty());
        let moved = h.router.chats().messages(&second);
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].sender_address.as_ref(), Some(&second));
        assert_eq!(
            h.router.resolver().live_address(&bob.fingerprint()),
            Some(&second)
        );
    }

    #[test]
    fn test_duplicate_favorite_notification_has_no_effect() {
        let mut h = harness();
        let bob = Identity::generate();
        let addr = authenticate(&mut h, &bob, "0011223344556677", "bob");
        let notice = WireMessage::FavoriteNotification(FavoriteNotification {
            is_favorite: true,
            relay_public_key: Some("bob-relay".into()),
        });

        for _ in 0..2 {
            h.router.handle_event(NetworkEvent::MeshPacket {
                from: addr.clone(),
                data: packet(&notice),
            });
        }

        let system = h
            .router
            .drain_notifications()
            .into_iter()
            .filter(|n| matches!(n, CoreNotification::SystemMessage { .. }))
            .count();
        assert_eq!(system, 1);
        let record = h.router.favorites.favorite(&bob.fingerprint()).unwrap();
        assert!(record.they_favorited_us);
        assert_eq!(record.relay_public_key.as_deref(), Some("bob-relay"));
        assert_eq!(h.router.chats().messages(&addr).len(), 1);
    }

    #[test]
    fn test_blocked_peer_is_ignored() {
        let mut h = harness();
        let bob = Identity::generate();
        let addr = authenticate(&mut h, &bob, "0011223344556677", "bob");
        h.router.set_blocked(&bob.fingerprint(), true).unwrap();

        h.router.handle_event(NetworkEvent::MeshPacket {
            from: addr.clone(),
            data: packet(&dm("m1", "spam")),
        });

        assert!(h.router.chats().messages(&addr).is_empty());
        assert_eq!(acks(&h), 0);
    }

    #[test]
    fn test_malformed_packet_is_dropped() {
        let mut h = harness();
        let addr = PeerAddress::new("0011223344556677");
        h.router.handle_event(NetworkEvent::MeshPacket {
            from: addr.clone(),
            data: vec![0xff; 3],
        });
        assert!(h.router.chats().messages(&addr).is_empty());
        assert!(h.router.drain_notifications().is_empty());
    }

    #[test]
    fn test_public_flood_is_rate_limited() {
        let mut h = harness();
        let from = PeerAddress::new("0011223344556677");
        let channel = ChannelId::Mesh;
        for i in 0..8 {
            h.router.handle_event(NetworkEvent::PublicMessage {
                id: MessageId::from(format!("p{i}").as_str()),
                from: Some(from.clone()),
                nickname: "spammer".into(),
                content: format!("message number {i}"),
                timestamp: h.clock.now(),
                channel: channel.clone(),
            });
        }

        h.clock.advance(Duration::from_millis(500));
        h.router.tick();

        let committed = h
            .router
            .drain_notifications()
            .into_iter()
            .filter(|n| matches!(n, CoreNotification::MessageCommitted { .. }))
            .count();
        assert_eq!(committed, 5);
        assert_eq!(h.router.timelines().timeline(&channel).unwrap().len(), 5);
    }

    #[test]
    fn test_verification_round_trip_between_routers() {
        let alice_id = Identity::generate();
        let bob_id = Identity::generate();
        let alice_key = alice_id.noise_public_key_hex();
        let bob_key = bob_id.noise_public_key_hex();
        let alice_fp = alice_id.fingerprint();
        let bob_fp = bob_id.fingerprint();
        let bob_qr = VerificationQr::create(&bob_id, "bob", chrono::Utc::now()).unwrap();

        let mut alice = harness_with(alice_id, CoreConfig::default());
        let mut bob = harness_with(bob_id, CoreConfig::default());

        let bob_addr = PeerAddress::new("b0b0b0b0b0b0b0b0");
        let alice_addr = PeerAddress::new("a1a1a1a1a1a1a1a1");
        alice.mesh.connect(&bob_addr, "bob");
        alice.router.handle_event(NetworkEvent::SessionAuthenticated {
            address: bob_addr.clone(),
            noise_key_hex: bob_key,
            nickname: Some("bob".into()),
        });
        bob.mesh.connect(&alice_addr, "alice");
        bob.router.handle_event(NetworkEvent::SessionAuthenticated {
            address: alice_addr.clone(),
            noise_key_hex: alice_key,
            nickname: Some("alice".into()),
        });

        alice.router.begin_verification(&bob_qr).unwrap();
        let challenge = alice.mesh.sent().pop().unwrap().1;
        bob.router.handle_event(NetworkEvent::MeshPacket {
            from: alice_addr.clone(),
            data: packet(&challenge),
        });
        let response = bob.mesh.sent().pop().unwrap().1;
        assert!(matches!(response, WireMessage::VerifyResponse(_)));
        alice.router.handle_event(NetworkEvent::MeshPacket {
            from: bob_addr.clone(),
            data: packet(&response),
        });

        assert!(alice.router.verification().is_verified(&bob_fp));
        assert!(alice.router.resolver().peer(&bob_fp).unwrap().is_verified);
        assert!(alice.router.db.load_verified().unwrap().contains(&bob_fp));
        let notes = alice.router.drain_notifications();
        assert!(notes.contains(&CoreNotification::PeerVerified { fingerprint: bob_fp }));
        // bob never challenged alice
        assert!(!notes.contains(&CoreNotification::MutualVerification { fingerprint: bob_fp }));
        assert!(!bob.router.verification().is_verified(&alice_fp));

        // replayed response after success is ignored
        alice.router.handle_event(NetworkEvent::MeshPacket {
            from: bob_addr,
            data: packet(&response),
        });
        assert!(alice.router.drain_notifications().is_empty());
    }

    #[test]
    fn test_deferred_challenge_released_on_session() {
        let mut h = harness();
        let bob = Identity::generate();
        let qr = VerificationQr::create(&bob, "bob", h.clock.now()).unwrap();

        h.router.begin_verification(&qr).unwrap();
        assert!(h.mesh.sent().is_empty());

        authenticate(&mut h, &bob, "0011223344556677", "bob");
        let challenges = h
            .mesh
            .sent()
            .iter()
            .filter(|(_, w)| matches!(w, WireMessage::VerifyChallenge(_)))
            .count();
        assert_eq!(challenges, 1);

        // a second session does not resend it
        authenticate(&mut h, &bob, "8899aabbccddeeff", "bob");
        let challenges = h
            .mesh
            .sent()
            .iter()
            .filter(|(_, w)| matches!(w, WireMessage::VerifyChallenge(_)))
            .count();
        assert_eq!(challenges, 1);
    }
}
