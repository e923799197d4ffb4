//! Machine API key issuance and verification.
//!
//! Raw keys are high-entropy random values shown exactly once at creation.
//! Storage holds only a keyed HMAC-SHA256 digest (hex), so keys are not
//! recoverable even with full database access. Verification meters usage per
//! (key, source address); that bookkeeping never fails the authenticating
//! request.

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::CustodyError,
    store::{ApiKey, CredentialStore},
    vault::derive_key_material,
};

type HmacSha256 = Hmac<Sha256>;

const RAW_KEY_BYTES: usize = 32;
const DIGEST_HEX_LEN: usize = 64;

/// Identity attached to a request that authenticated with an API key.
#[derive(Clone, Debug)]
pub struct ApiKeyIdentity {
    pub key_id: Uuid,
    pub description: String,
}

/// Verifies machine credentials and meters their usage.
#[derive(Clone)]
pub struct ApiKeyAuthenticator {
    hash_key: [u8; 32],
    store: Arc<dyn CredentialStore>,
}

impl ApiKeyAuthenticator {
    /// Build the authenticator from the configured signing key.
    ///
    /// # Errors
    /// Returns [`CustodyError::Configuration`] when the signing key is empty.
    pub fn new(
        signing_key: &str,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, CustodyError> {
        if signing_key.trim().is_empty() {
            return Err(CustodyError::Configuration(
                "api-key signing key must not be empty".to_string(),
            ));
        }
        Ok(Self {
            hash_key: derive_key_material("custodia/api-key/v1", signing_key),
            store,
        })
    }

    /// Generate a fresh raw key. The caller must hand it to the user now;
    /// it is never derivable again.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub fn generate_key() -> Result<String> {
        let mut bytes = [0u8; RAW_KEY_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate api key")?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Keyed digest of a raw key, as stored in the database.
    #[must_use]
    pub fn digest(&self, raw_key: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.hash_key)
            .unwrap_or_else(|_| unreachable!("32-byte HMAC key is always valid"));
        mac.update(raw_key.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Create a new key and return `(id, raw_key)`. The raw form is returned
    /// exactly once.
    ///
    /// # Errors
    /// Returns an error if key generation or persistence fails.
    pub async fn create(
        &self,
        description: &str,
        expires_at_unix: Option<i64>,
    ) -> Result<(Uuid, String)> {
        let raw_key = Self::generate_key()?;
        let digest = self.digest(&raw_key);
        let key_id = self
            .store
            .insert_api_key(&digest, description, expires_at_unix)
            .await?;
        Ok((key_id, raw_key))
    }

    /// Verify a presented raw key.
    ///
    /// Returns `Ok(None)` for unknown and expired keys alike; the caller maps
    /// both to the same generic rejection. On success the usage counter for
    /// `(key, source_addr)` is bumped; a failed bump is logged and swallowed.
    ///
    /// # Errors
    /// Returns an error only when the store lookup itself fails.
    pub async fn verify(
        &self,
        presented_key: &str,
        source_addr: &str,
    ) -> Result<Option<ApiKeyIdentity>> {
        let digest = self.digest(presented_key);
        let Some(key) = self.store.api_key_by_digest(&digest).await? else {
            return Ok(None);
        };

        if key.is_expired(now_unix()) {
            return Ok(None);
        }

        if let Err(err) = self.store.record_api_key_usage(key.id, source_addr).await {
            warn!(key_id = %key.id, "failed to record api key usage: {err}");
        }

        Ok(Some(ApiKeyIdentity {
            key_id: key.id,
            description: key.description,
        }))
    }

    /// One-time migration: rewrite legacy raw-stored keys through the hash.
    ///
    /// Detection is by shape: anything not matching the fixed-length hex
    /// digest is a legacy raw value, so the sweep is idempotent.
    ///
    /// # Errors
    /// Returns an error if the store sweep or a rewrite fails.
    pub async fn migrate_legacy_keys(&self) -> Result<usize> {
        let keys = self.store.list_api_keys().await?;
        let mut rewritten = 0usize;
        for key in keys.iter().filter(|key| !is_digest_shaped(&key.digest)) {
            let digest = self.digest(&key.digest);
            self.store.rewrite_api_key_digest(key.id, &digest).await?;
            rewritten += 1;
        }
        if rewritten > 0 {
            info!(rewritten, "migrated legacy raw-stored api keys");
        }
        Ok(rewritten)
    }

    /// Lookup by digest for administrative surfaces.
    ///
    /// # Errors
    /// Returns an error if the store lookup fails.
    pub async fn find(&self, raw_key: &str) -> Result<Option<ApiKey>> {
        self.store.api_key_by_digest(&self.digest(raw_key)).await
    }
}

fn is_digest_shaped(value: &str) -> bool {
    value.len() == DIGEST_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
