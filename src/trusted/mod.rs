//! Stateless trusted-device bypass tokens.
//!
//! A device that completed MFA can hold a bearer value
//! `{userId}.{expiryEpochMs}.{hmacHex}` signed with a server-held key. The
//! token is self-describing and verified without any server-side registry,
//! which also means it cannot be revoked before expiry; the mitigation is a
//! short, configurable validity window.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::{error::CustodyError, vault::derive_key_material};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_DELIMITER: char = '.';

/// Cookie name pattern for trusted-device tokens.
#[must_use]
pub fn cookie_name(user_id: Uuid) -> String {
    format!("trusted_{user_id}")
}

/// Mints and verifies trusted-device bypass tokens.
#[derive(Clone)]
pub struct TrustedDeviceTokenService {
    signing_key: [u8; 32],
    validity: Duration,
}

impl TrustedDeviceTokenService {
    /// Build the service from the configured signing key.
    ///
    /// # Errors
    /// Returns [`CustodyError::Configuration`] when the signing key is empty.
    pub fn new(signing_key: &str, validity: Duration) -> Result<Self, CustodyError> {
        if signing_key.trim().is_empty() {
            return Err(CustodyError::Configuration(
                "trusted-device signing key must not be empty".to_string(),
            ));
        }
        Ok(Self {
            signing_key: derive_key_material("custodia/trusted-device/v1", signing_key),
            validity,
        })
    }

    /// Validity window applied to freshly minted tokens.
    #[must_use]
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Mint a token for `user_id` expiring one validity window from now.
    #[must_use]
    pub fn mint(&self, user_id: Uuid) -> String {
        let expiry_ms = epoch_millis_now().saturating_add(
            i64::try_from(self.validity.as_millis()).unwrap_or(i64::MAX),
        );
        self.mint_with_expiry(user_id, expiry_ms)
    }

    fn mint_with_expiry(&self, user_id: Uuid, expiry_ms: i64) -> String {
        let signature = self.sign(user_id, expiry_ms);
        format!("{user_id}{TOKEN_DELIMITER}{expiry_ms}{TOKEN_DELIMITER}{signature}")
    }

    /// Verify a presented token for the expected user.
    ///
    /// Fails closed on any structural deviation: wrong field count, foreign
    /// user id, past expiry, or signature mismatch.
    ///
    /// # Errors
    /// Returns [`CustodyError::Integrity`] on every rejection; callers treat
    /// the token as absent and fall back to the normal challenge.
    pub fn verify(&self, token: &str, expected_user_id: Uuid) -> Result<(), CustodyError> {
        let mut parts = token.split(TOKEN_DELIMITER);
        let (Some(user_part), Some(expiry_part), Some(signature_part), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CustodyError::Integrity(
                "token must have exactly three fields".to_string(),
            ));
        };

        let user_id = Uuid::parse_str(user_part)
            .map_err(|_| CustodyError::Integrity("invalid user id field".to_string()))?;
        if user_id != expected_user_id {
            return Err(CustodyError::Integrity(
                "token was minted for another user".to_string(),
            ));
        }

        let expiry_ms: i64 = expiry_part
            .parse()
            .map_err(|_| CustodyError::Integrity("invalid expiry field".to_string()))?;
        if expiry_ms <= epoch_millis_now() {
            return Err(CustodyError::Integrity("token has expired".to_string()));
        }

        let signature = hex::decode(signature_part)
            .map_err(|_| CustodyError::Integrity("invalid signature encoding".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|err| CustodyError::Integrity(format!("hmac init failure: {err}")))?;
        mac.update(signing_payload(user_id, expiry_ms).as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| CustodyError::Integrity("signature mismatch".to_string()))
    }

    fn sign(&self, user_id: Uuid, expiry_ms: i64) -> String {
        // new_from_slice only fails for invalid lengths; the key is fixed at 32 bytes.
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .unwrap_or_else(|_| unreachable!("32-byte HMAC key is always valid"));
        mac.update(signing_payload(user_id, expiry_ms).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn signing_payload(user_id: Uuid, expiry_ms: i64) -> String {
    format!("{user_id}{TOKEN_DELIMITER}{expiry_ms}")
}

fn epoch_millis_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}
