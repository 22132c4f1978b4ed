use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::IdentityError;
use crate::types::{decode_key_hex, Fingerprint};

/// The local node's long-term keys.
///
/// The X25519 static key is what the session layer authenticates and what
/// peers fingerprint; the Ed25519 key signs verification responses and QR
/// credentials.
#[derive(Clone)]
pub struct Identity {
    noise_secret: StaticSecret,
    signing_key: SigningKey,
}

/// Serializable format for storing/exporting identity
#[derive(Serialize, Deserialize)]
pub struct IdentityExport {
    pub noise_secret: [u8; 32],
    pub signing_secret: [u8; 32],
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self {
            noise_secret: StaticSecret::random_from_rng(OsRng),
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore identity from a serialized export
    pub fn from_export(export: &IdentityExport) -> Self {
        Self {
            noise_secret: StaticSecret::from(export.noise_secret),
            signing_key: SigningKey::from_bytes(&export.signing_secret),
        }
    }

    /// Export identity for serialization
    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            noise_secret: self.noise_secret.to_bytes(),
            signing_secret: *self.signing_key.as_bytes(),
        }
    }

    pub fn noise_public_key(&self) -> [u8; 32] {
        PublicKey::from(&self.noise_secret).to_bytes()
    }

    pub fn noise_public_key_hex(&self) -> String {
        hex::encode(self.noise_public_key())
    }

    pub fn signing_public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn signing_public_key_hex(&self) -> String {
        hex::encode(self.signing_public_key())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_noise_key(&self.noise_public_key())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Get the verifying (public) key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

/// Verify a signature against a public key
pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &Signature,
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| IdentityError::InvalidKeyBytes)
}

/// Same as [`verify_signature`] for the hex key / raw signature bytes found on the wire.
pub fn verify_signature_hex(
    pubkey_hex: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let key = decode_key_hex(pubkey_hex)?;
    let signature = Signature::from_slice(signature).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verify_signature(&key, message, &signature)
}
