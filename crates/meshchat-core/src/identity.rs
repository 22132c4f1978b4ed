//! Maps rotating mesh addresses to stable fingerprints.
//!
//! Business state hangs off the [`Fingerprint`]; a [`PeerAddress`] is a
//! routing handle that is replaced wholesale when the peer reconnects.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use meshchat_shared::{Fingerprint, IdentityError, PeerAddress};

use crate::chats::{MigrationReport, PrivateChats};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub fingerprint: Fingerprint,
    pub nickname: String,
    /// Full noise key, once a session authenticated it.
    pub noise_key_hex: Option<String>,
    /// Every address seen for this peer, oldest first. The last one is live.
    pub addresses: Vec<PeerAddress>,
    pub is_favorite: bool,
    pub is_verified: bool,
    pub is_blocked: bool,
}

impl PeerIdentity {
    fn new(fingerprint: Fingerprint, nickname: impl Into<String>) -> Self {
        Self {
            fingerprint,
            nickname: nickname.into(),
            noise_key_hex: None,
            addresses: Vec::new(),
            is_favorite: false,
            is_verified: false,
            is_blocked: false,
        }
    }

    pub fn live_address(&self) -> Option<&PeerAddress> {
        self.addresses.last()
    }
}

/// Result of recording an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub fingerprint: Fingerprint,
    /// Addresses whose conversations should now move to the live one.
    pub stale_addresses: Vec<PeerAddress>,
}

#[derive(Debug, Default)]
pub struct IdentityResolver {
    by_address: HashMap<PeerAddress, Fingerprint>,
    peers: HashMap<Fingerprint, PeerIdentity>,
    short_to_full: HashMap<PeerAddress, PeerAddress>,
    full_to_short: HashMap<PeerAddress, PeerAddress>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint behind an address, in either of its forms.
    pub fn resolve(&self, address: &PeerAddress) -> Option<Fingerprint> {
        if let Some(fp) = self.by_address.get(address) {
            return Some(*fp);
        }
        if let Some(full) = self.short_to_full.get(address) {
            return self.by_address.get(full).copied();
        }
        if let Some(short) = self.full_to_short.get(address) {
            return self.by_address.get(short).copied();
        }
        None
    }

    /// Like [`resolve`](Self::resolve), but a full-key address is its own
    /// proof of identity even if no session was seen yet.
    pub fn resolve_or_derive(&self, address: &PeerAddress) -> Option<Fingerprint> {
        self.resolve(address).or_else(|| {
            address
                .is_full_key()
                .then(|| Fingerprint::from_noise_key_hex(address.as_str()).ok())
                .flatten()
        })
    }

    /// A session with `address` authenticated the noise key `noise_key_hex`.
    ///
    /// Makes `address` the live address of the resulting fingerprint and
    /// caches the short/full pair when `address` is the condensed form.
    pub fn record_authenticated(
        &mut self,
        address: &PeerAddress,
        noise_key_hex: &str,
        nickname: Option<&str>,
    ) -> Result<Authenticated, IdentityError> {
        let fingerprint = Fingerprint::from_noise_key_hex(noise_key_hex)?;
        let full = PeerAddress::new(noise_key_hex);

        let peer = self
            .peers
            .entry(fingerprint)
            .or_insert_with(|| PeerIdentity::new(fingerprint, fingerprint.short()));
        if let Some(nickname) = nickname {
            peer.nickname = nickname.to_string();
        }
        peer.noise_key_hex = Some(full.as_str().to_string());

        let mut stale_addresses = Vec::new();
        if let Some(previous) = peer.live_address() {
            if previous != address {
                stale_addresses.push(previous.clone());
            }
        }
        peer.addresses.retain(|a| a != address);
        peer.addresses.push(address.clone());

        if address.is_short() {
            self.short_to_full.insert(address.clone(), full.clone());
            self.full_to_short.insert(full.clone(), address.clone());
            if !stale_addresses.contains(&full) {
                stale_addresses.push(full.clone());
            }
        }
        self.by_address.insert(address.clone(), fingerprint);
        self.by_address.insert(full, fingerprint);

        tracing::debug!(
            peer = %fingerprint.short(),
            stale = stale_addresses.len(),
            "Session authenticated"
        );

        Ok(Authenticated {
            fingerprint,
            stale_addresses,
        })
    }

    /// Move everything keyed by `old` to `new`. Messages older than
    /// `retain_since` stay behind.
    pub fn migrate(
        &mut self,
        old: &PeerAddress,
        new: &PeerAddress,
        chats: &mut PrivateChats,
        retain_since: DateTime<Utc>,
    ) -> MigrationReport {
        let report = chats.migrate(old, new, retain_since);
        if report.moved > 0 || report.duplicates > 0 {
            tracing::info!(
                moved = report.moved,
                duplicates = report.duplicates,
                left_behind = report.left_behind,
                "Migrated conversation to new address"
            );
        }
        report
    }

    /// Known peer, created on demand.
    pub fn ensure_peer(&mut self, fingerprint: Fingerprint, nickname: &str) -> &mut PeerIdentity {
        self.peers
            .entry(fingerprint)
            .or_insert_with(|| PeerIdentity::new(fingerprint, nickname))
    }

    pub fn peer(&self, fingerprint: &Fingerprint) -> Option<&PeerIdentity> {
        self.peers.get(fingerprint)
    }

    pub fn peer_mut(&mut self, fingerprint: &Fingerprint) -> Option<&mut PeerIdentity> {
        self.peers.get_mut(fingerprint)
    }

    pub fn live_address(&self, fingerprint: &Fingerprint) -> Option<&PeerAddress> {
        self.peers.get(fingerprint).and_then(PeerIdentity::live_address)
    }

    pub fn full_key_for(&self, short: &PeerAddress) -> Option<&PeerAddress> {
        self.short_to_full.get(short)
    }

    pub fn short_for(&self, full: &PeerAddress) -> Option<&PeerAddress> {
        self.full_to_short.get(full)
    }

    pub fn nickname(&self, fingerprint: &Fingerprint) -> Option<&str> {
        self.peers.get(fingerprint).map(|p| p.nickname.as_str())
    }

    pub fn is_blocked(&self, fingerprint: &Fingerprint) -> bool {
        self.peers.get(fingerprint).is_some_and(|p| p.is_blocked)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerIdentity> {
        self.peers.values()
    }
}
