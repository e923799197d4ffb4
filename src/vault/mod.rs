//! Symmetric secret custody for at-rest values.
//!
//! Every logically secret field (TOTP seeds, third-party tenant credentials)
//! is stored as a vault envelope: `base64(nonce):base64(tag):base64(ciphertext)`
//! under ChaCha20-Poly1305 with a process-wide 256-bit key. The key is derived
//! once at startup from a required passphrase; a missing passphrase aborts
//! startup instead of serving without confidentiality guarantees.
//!
//! Envelopes from before the encryption rollout are bare plaintext without a
//! `:` delimiter. `decrypt` passes those through unchanged so old rows stay
//! readable until the one-time migration rewrites them.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::CustodyError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const ENVELOPE_DELIMITER: char = ':';

/// Derive 32 bytes of key material from a configured secret, bound to a
/// context string so different subsystems never share raw key bytes.
#[must_use]
pub fn derive_key_material(context: &str, secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(context.as_bytes());
    hasher.update([0x1f]);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Process-wide authenticated encryption for secrets at rest.
///
/// Constructed once at startup and passed by reference to every consumer.
#[derive(Clone)]
pub struct SecretVault {
    key: Key,
}

impl SecretVault {
    /// Build the vault from the configured passphrase.
    ///
    /// # Errors
    /// Returns [`CustodyError::Configuration`] when the passphrase is empty.
    pub fn new(passphrase: &SecretString) -> Result<Self, CustodyError> {
        let raw = passphrase.expose_secret();
        if raw.trim().is_empty() {
            return Err(CustodyError::Configuration(
                "vault passphrase must not be empty".to_string(),
            ));
        }
        let key_bytes = derive_key_material("custodia/vault/v1", raw);
        Ok(Self {
            key: Key::from(key_bytes),
        })
    }

    /// Encrypt a plaintext into a storable envelope with a fresh random nonce.
    ///
    /// # Errors
    /// Returns [`CustodyError::Integrity`] if the cipher rejects the input.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CustodyError> {
        let cipher = ChaCha20Poly1305::new(&self.key);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let mut sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|err| CustodyError::Integrity(format!("encryption failure: {err}")))?;

        // The AEAD appends the 16-byte tag; the envelope stores it as its own field.
        let tag = sealed.split_off(sealed.len().saturating_sub(TAG_LEN));

        Ok(format!(
            "{}{ENVELOPE_DELIMITER}{}{ENVELOPE_DELIMITER}{}",
            BASE64.encode(nonce_bytes),
            BASE64.encode(tag),
            BASE64.encode(sealed),
        ))
    }

    /// Decrypt an envelope back to plaintext.
    ///
    /// Inputs without a delimiter are legacy plaintext and are returned
    /// unchanged; this path never fails.
    ///
    /// # Errors
    /// Returns [`CustodyError::Integrity`] for malformed envelopes and for
    /// tag verification failures (tampering or wrong key).
    pub fn decrypt(&self, envelope: &str) -> Result<String, CustodyError> {
        if !envelope.contains(ENVELOPE_DELIMITER) {
            return Ok(envelope.to_string());
        }

        let mut parts = envelope.split(ENVELOPE_DELIMITER);
        let (Some(nonce_part), Some(tag_part), Some(body_part), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CustodyError::Integrity(
                "envelope must have exactly three fields".to_string(),
            ));
        };

        let nonce_bytes = decode_field(nonce_part, "nonce")?;
        let tag = decode_field(tag_part, "tag")?;
        let mut sealed = decode_field(body_part, "ciphertext")?;

        if nonce_bytes.len() != NONCE_LEN {
            return Err(CustodyError::Integrity("invalid nonce length".to_string()));
        }
        if tag.len() != TAG_LEN {
            return Err(CustodyError::Integrity("invalid tag length".to_string()));
        }

        let nonce = Nonce::from_slice(&nonce_bytes);
        sealed.extend_from_slice(&tag);

        let cipher = ChaCha20Poly1305::new(&self.key);
        let plaintext = cipher
            .decrypt(nonce, sealed.as_ref())
            .map_err(|_| CustodyError::Integrity("tag verification failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CustodyError::Integrity("plaintext is not valid UTF-8".to_string()))
    }
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, CustodyError> {
    BASE64
        .decode(value)
        .map_err(|_| CustodyError::Integrity(format!("invalid base64 in {field} field")))
}
