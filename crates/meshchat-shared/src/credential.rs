use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::constants::{CREDENTIAL_MAX_AGE_SECS, CREDENTIAL_MAX_SKEW_SECS, CREDENTIAL_URI_PREFIX};
use crate::identity::{verify_signature, Identity};
use crate::types::Fingerprint;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialPayload {
    pub nickname: String,
    pub noise_key: [u8; 32],
    pub sign_key: [u8; 32],
    pub issued_at: DateTime<Utc>,
}

/// What a peer shows as a QR code so others can verify them in person.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationQr {
    pub payload: CredentialPayload,
    pub signature: Vec<u8>,
}

impl VerificationQr {
    /// Create a signed credential for the local identity.
    pub fn create(
        identity: &Identity,
        nickname: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, CredentialError> {
        let payload = CredentialPayload {
            nickname: nickname.to_string(),
            noise_key: identity.noise_public_key(),
            sign_key: identity.signing_public_key(),
            issued_at,
        };

        let payload_bytes =
            bincode::serialize(&payload).map_err(|_| CredentialError::InvalidFormat)?;
        let signature = identity.sign(&payload_bytes);

        Ok(Self {
            payload,
            signature: signature.to_bytes().to_vec(),
        })
    }

    /// Encode as `meshchat://verify/<base64url>`.
    pub fn encode(&self) -> Result<String, CredentialError> {
        let bytes = bincode::serialize(self).map_err(|_| CredentialError::InvalidFormat)?;
        Ok(format!("{CREDENTIAL_URI_PREFIX}{}", base64_url_encode(&bytes)))
    }

    /// Decode a scanned string; the URI prefix is optional.
    pub fn decode(code: &str) -> Result<Self, CredentialError> {
        let code = code.trim();
        let body = code.strip_prefix(CREDENTIAL_URI_PREFIX).unwrap_or(code);
        let bytes = base64_url_decode(body)?;
        bincode::deserialize(&bytes).map_err(|_| CredentialError::InvalidFormat)
    }

    /// Check the self-signature and the freshness window.
    pub fn verify(&self, now: DateTime<Utc>) -> Result<(), CredentialError> {
        if now - self.payload.issued_at > Duration::seconds(CREDENTIAL_MAX_AGE_SECS) {
            return Err(CredentialError::Expired);
        }
        if self.payload.issued_at - now > Duration::seconds(CREDENTIAL_MAX_SKEW_SECS) {
            return Err(CredentialError::Expired);
        }

        let payload_bytes =
            bincode::serialize(&self.payload).map_err(|_| CredentialError::InvalidFormat)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| CredentialError::InvalidSignature)?;

        verify_signature(&self.payload.sign_key, &payload_bytes, &signature)
            .map_err(|_| CredentialError::InvalidSignature)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_noise_key(&self.payload.noise_key)
    }

    pub fn noise_key_hex(&self) -> String {
        hex::encode(self.payload.noise_key)
    }

    pub fn sign_key_hex(&self) -> String {
        hex::encode(self.payload.sign_key)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Invalid credential format")]
    InvalidFormat,

    #[error("Credential has expired")]
    Expired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Base64 decode error")]
    Base64Decode,
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD.encode(data)
}

fn base64_url_decode(s: &str) -> Result<Vec<u8>, CredentialError> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD
        .decode(s.trim())
        .map_err(|_| CredentialError::Base64Decode)
}
