//! Auth state and configuration.

use std::sync::Arc;
use url::Url;

use crate::{mfa::MfaChallenge, session::SessionStore, store::CredentialStore};

const DEFAULT_TRUSTED_DEVICE_MAX_AGE_SECONDS: i64 = 14 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_cookie_secure: bool,
    trusted_device_max_age_seconds: i64,
}

impl AuthConfig {
    /// Cookie security defaults follow the frontend scheme: HTTPS frontends
    /// get `Secure` cookies.
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        let secure = Url::parse(&frontend_base_url).is_ok_and(|url| url.scheme() == "https");
        Self {
            frontend_base_url,
            session_cookie_secure: secure,
            trusted_device_max_age_seconds: DEFAULT_TRUSTED_DEVICE_MAX_AGE_SECONDS,
        }
    }

    #[must_use]
    pub fn with_session_cookie_secure(mut self, secure: bool) -> Self {
        self.session_cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_trusted_device_max_age_seconds(mut self, seconds: i64) -> Self {
        self.trusted_device_max_age_seconds = seconds;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.session_cookie_secure
    }

    #[must_use]
    pub fn trusted_device_max_age_seconds(&self) -> i64 {
        self.trusted_device_max_age_seconds
    }
}

/// Shared state for the auth endpoints.
pub struct AuthState {
    config: AuthConfig,
    mfa: MfaChallenge,
    sessions: Arc<SessionStore>,
    store: Arc<dyn CredentialStore>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        mfa: MfaChallenge,
        sessions: Arc<SessionStore>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            mfa,
            sessions,
            store,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn mfa(&self) -> &MfaChallenge {
        &self.mfa
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_frontend_defaults_to_secure_cookies() {
        assert!(AuthConfig::new("https://portal.example.com".to_string()).session_cookie_secure());
        assert!(!AuthConfig::new("http://localhost:5173".to_string()).session_cookie_secure());
    }
}
