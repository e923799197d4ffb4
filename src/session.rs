//! In-process session store.
//!
//! Holds both the short-lived challenge state of a login in progress (the
//! pending TOTP secret lives only here, never in the database) and fully
//! authenticated sessions, keyed by a random bearer token. The tagged
//! [`SessionState`] makes invalid combinations unrepresentable. Concurrent
//! requests against the same not-yet-authenticated session are not
//! serialized; last write wins.

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::AccountRole;

const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);
const DEFAULT_EXTENDED_SESSION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Where a session is in the login state machine.
///
/// `Anonymous` has no entry at all; `LoginFailed` loops back to no entry.
#[derive(Clone, Debug)]
pub enum SessionState {
    /// Password accepted, no enrolled authenticator: a provisioning secret is
    /// pending confirmation.
    SetupRequired {
        user_id: Uuid,
        tenant_id: Uuid,
        pending_secret: Vec<u8>,
        remember: bool,
    },
    /// Password accepted, at least one enrolled authenticator to check.
    VerifyRequired {
        user_id: Uuid,
        tenant_id: Uuid,
        remember: bool,
    },
    /// Fully authenticated and bound to a user and default tenant context.
    Authenticated {
        user_id: Uuid,
        tenant_id: Uuid,
        role: AccountRole,
    },
}

struct SessionEntry {
    state: SessionState,
    created_at: Instant,
    ttl: Duration,
}

/// Token-keyed store for challenge and authenticated sessions.
pub struct SessionStore {
    entries: Mutex<HashMap<String, SessionEntry>>,
    challenge_ttl: Duration,
    session_ttl: Duration,
    extended_session_ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(
            DEFAULT_CHALLENGE_TTL,
            DEFAULT_SESSION_TTL,
            DEFAULT_EXTENDED_SESSION_TTL,
        )
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(
        challenge_ttl: Duration,
        session_ttl: Duration,
        extended_session_ttl: Duration,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            challenge_ttl,
            session_ttl,
            extended_session_ttl,
        }
    }

    #[must_use]
    pub fn challenge_ttl(&self) -> Duration {
        self.challenge_ttl
    }

    /// Session lifetime for an authenticated login, honoring the persistence
    /// request made at the password step.
    #[must_use]
    pub fn session_ttl(&self, remember: bool) -> Duration {
        if remember {
            self.extended_session_ttl
        } else {
            self.session_ttl
        }
    }

    /// Store challenge state under a fresh token.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub async fn insert_challenge(&self, state: SessionState) -> Result<String> {
        self.insert(state, self.challenge_ttl).await
    }

    /// Store an authenticated session under a fresh token, returning the
    /// token and its lifetime.
    ///
    /// # Errors
    /// Returns an error if the system RNG fails.
    pub async fn insert_authenticated(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        role: AccountRole,
        remember: bool,
    ) -> Result<(String, Duration)> {
        let ttl = self.session_ttl(remember);
        let token = self
            .insert(
                SessionState::Authenticated {
                    user_id,
                    tenant_id,
                    role,
                },
                ttl,
            )
            .await?;
        Ok((token, ttl))
    }

    async fn insert(&self, state: SessionState, ttl: Duration) -> Result<String> {
        let token = generate_session_token()?;
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.created_at.elapsed() < entry.ttl);
        entries.insert(
            token.clone(),
            SessionEntry {
                state,
                created_at: Instant::now(),
                ttl,
            },
        );
        Ok(token)
    }

    /// Current state for a token, if present and not expired.
    pub async fn get(&self, token: &str) -> Option<SessionState> {
        let mut entries = self.entries.lock().await;
        match entries.get(token) {
            Some(entry) if entry.created_at.elapsed() < entry.ttl => Some(entry.state.clone()),
            Some(_) => {
                entries.remove(token);
                None
            }
            None => None,
        }
    }

    /// Drop a session (logout, or challenge consumed).
    pub async fn remove(&self, token: &str) {
        self.entries.lock().await.remove(token);
    }
}

/// Random bearer token for the session cookie. Only ever held by the client
/// and this in-process map.
fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
