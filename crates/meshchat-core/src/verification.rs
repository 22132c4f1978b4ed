//! Out-of-band mutual verification.
//!
//! The initiator scans a peer's [`VerificationQr`], then proves over the
//! encrypted session that the peer holds the signing key from that QR:
//! it sends a fresh nonce and expects it back signed together with the
//! peer's noise key. Every failure is silent.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use meshchat_shared::constants::VERIFY_NONCE_SIZE;
use meshchat_shared::credential::VerificationQr;
use meshchat_shared::identity::{verify_signature_hex, Identity};
use meshchat_shared::protocol::{verification_payload, VerifyChallenge, VerifyResponse};
use meshchat_shared::{Fingerprint, MeshChatError, WireMessage};
use rand::RngCore;

use crate::config::CoreConfig;

/// Key material taken from a scanned QR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedCredential {
    pub nickname: String,
    pub noise_key_hex: String,
    pub sign_key_hex: String,
}

impl ScannedCredential {
    pub fn fingerprint(&self) -> Result<Fingerprint, MeshChatError> {
        Ok(Fingerprint::from_noise_key_hex(&self.noise_key_hex)?)
    }
}

impl From<&VerificationQr> for ScannedCredential {
    fn from(qr: &VerificationQr) -> Self {
        Self {
            nickname: qr.payload.nickname.clone(),
            noise_key_hex: qr.noise_key_hex(),
            sign_key_hex: qr.sign_key_hex(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingVerification {
    pub noise_key_hex: String,
    pub sign_key_hex: String,
    pub nonce_a: [u8; VERIFY_NONCE_SIZE],
    pub created_at: Instant,
    pub sent: bool,
}

impl PendingVerification {
    fn challenge(&self) -> WireMessage {
        WireMessage::VerifyChallenge(VerifyChallenge {
            pubkey_hex: self.noise_key_hex.clone(),
            nonce_a: self.nonce_a,
        })
    }
}

/// Result of a successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub fingerprint: Fingerprint,
    /// They verified us recently too; throttled per peer.
    pub mutual: bool,
}

#[derive(Debug)]
pub struct VerificationProtocol {
    pending: HashMap<Fingerprint, PendingVerification>,
    last_inbound_nonce: HashMap<Fingerprint, [u8; VERIFY_NONCE_SIZE]>,
    inbound_challenges: HashMap<Fingerprint, Instant>,
    last_mutual_notice: HashMap<Fingerprint, Instant>,
    verified: HashSet<Fingerprint>,
    timeout: Duration,
    mutual_window: Duration,
    mutual_throttle: Duration,
}

impl VerificationProtocol {
    pub fn new(config: &CoreConfig, verified: HashSet<Fingerprint>) -> Self {
        Self {
            pending: HashMap::new(),
            last_inbound_nonce: HashMap::new(),
            inbound_challenges: HashMap::new(),
            last_mutual_notice: HashMap::new(),
            verified,
            timeout: config.verification_timeout,
            mutual_window: config.mutual_window,
            mutual_throttle: config.mutual_toast_throttle,
        }
    }

    /// Start verifying `target`, replacing any earlier attempt.
    ///
    /// Returns the challenge to send now when the session is already up;
    /// otherwise the caller triggers a handshake and the challenge goes out
    /// from [`on_session_authenticated`](Self::on_session_authenticated).
    pub fn begin(
        &mut self,
        target: &ScannedCredential,
        session_established: bool,
        now: Instant,
    ) -> Result<Option<WireMessage>, MeshChatError> {
        let mut nonce_a = [0u8; VERIFY_NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_a);
        self.begin_with_nonce(target, nonce_a, session_established, now)
    }

    pub(crate) fn begin_with_nonce(
        &mut self,
        target: &ScannedCredential,
        nonce_a: [u8; VERIFY_NONCE_SIZE],
        session_established: bool,
        now: Instant,
    ) -> Result<Option<WireMessage>, MeshChatError> {
        let fingerprint = target.fingerprint()?;
        let pending = PendingVerification {
            noise_key_hex: target.noise_key_hex.to_ascii_lowercase(),
            sign_key_hex: target.sign_key_hex.to_ascii_lowercase(),
            nonce_a,
            created_at: now,
            sent: session_established,
        };
        let challenge = session_established.then(|| pending.challenge());
        if self.pending.insert(fingerprint, pending).is_some() {
            tracing::debug!(peer = %fingerprint.short(), "Superseded pending verification");
        }
        Ok(challenge)
    }

    /// Session with `fingerprint` came up: release a deferred challenge,
    /// exactly once.
    pub fn on_session_authenticated(&mut self, fingerprint: &Fingerprint) -> Option<WireMessage> {
        let pending = self.pending.get_mut(fingerprint)?;
        if pending.sent {
            return None;
        }
        pending.sent = true;
        Some(pending.challenge())
    }

    /// Responder side. Returns the response to send back.
    pub fn on_challenge(
        &mut self,
        from: &Fingerprint,
        challenge: &VerifyChallenge,
        identity: &Identity,
        now: Instant,
    ) -> Result<WireMessage, MeshChatError> {
        if !challenge
            .pubkey_hex
            .eq_ignore_ascii_case(&identity.noise_public_key_hex())
        {
            return Err(MeshChatError::KeyMismatch);
        }
        if self.last_inbound_nonce.get(from) == Some(&challenge.nonce_a) {
            return Err(MeshChatError::DuplicateMessage);
        }
        self.last_inbound_nonce.insert(*from, challenge.nonce_a);
        self.inbound_challenges.insert(*from, now);

        let signature = identity.sign(&verification_payload(
            &challenge.pubkey_hex,
            &challenge.nonce_a,
        ));
        Ok(WireMessage::VerifyResponse(VerifyResponse {
            pubkey_hex: challenge.pubkey_hex.clone(),
            nonce_a: challenge.nonce_a,
            signature: signature.to_bytes().to_vec(),
        }))
    }

    /// Initiator side. On success the fingerprint is verified and the
    /// pending record is gone, so a repeated response is ignored.
    pub fn on_response(
        &mut self,
        from: &Fingerprint,
        response: &VerifyResponse,
        now: Instant,
    ) -> Result<Verified, MeshChatError> {
        let pending = self
            .pending
            .get(from)
            .ok_or(MeshChatError::NonceMismatch)?;
        if !response.pubkey_hex.eq_ignore_ascii_case(&pending.noise_key_hex) {
            return Err(MeshChatError::KeyMismatch);
        }
        if response.nonce_a != pending.nonce_a {
            return Err(MeshChatError::NonceMismatch);
        }
        verify_signature_hex(
            &pending.sign_key_hex,
            &verification_payload(&response.pubkey_hex, &response.nonce_a),
            &response.signature,
        )
        .map_err(|_| MeshChatError::SignatureInvalid)?;

        self.pending.remove(from);
        self.verified.insert(*from);

        let they_challenged_us = self
            .inbound_challenges
            .get(from)
            .is_some_and(|at| now.saturating_duration_since(*at) <= self.mutual_window);
        let throttled = self
            .last_mutual_notice
            .get(from)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.mutual_throttle);
        let mutual = they_challenged_us && !throttled;
        if mutual {
            self.last_mutual_notice.insert(*from, now);
        }

        Ok(Verified {
            fingerprint: *from,
            mutual,
        })
    }

    /// Drop pending verifications past the timeout and stale bookkeeping.
    /// Returns the fingerprints whose attempt expired.
    pub fn expire(&mut self, now: Instant) -> Vec<Fingerprint> {
        let timeout = self.timeout;
        let expired: Vec<Fingerprint> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.created_at) >= timeout)
            .map(|(fp, _)| *fp)
            .collect();
        for fp in &expired {
            self.pending.remove(fp);
        }

        let window = self.mutual_window;
        self.inbound_challenges
            .retain(|_, at| now.saturating_duration_since(*at) <= window);
        let throttle = self.mutual_throttle;
        self.last_mutual_notice
            .retain(|_, at| now.saturating_duration_since(*at) < throttle);

        expired
    }

    pub fn pending(&self, fingerprint: &Fingerprint) -> Option<&PendingVerification> {
        self.pending.get(fingerprint)
    }

    pub fn is_verified(&self, fingerprint: &Fingerprint) -> bool {
        self.verified.contains(fingerprint)
    }

    pub fn verified(&self) -> &HashSet<Fingerprint> {
        &self.verified
    }
}
