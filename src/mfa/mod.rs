//! Login and MFA challenge flow.
//!
//! Drives a session from anonymous through password verification and, for
//! elevated accounts, a TOTP setup or verification step, ending in an
//! authenticated session. The pending provisioning secret lives only in the
//! challenge state; it reaches the database encrypted and only after the
//! user proves possession with a first valid code.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, Params,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use std::sync::Arc;
use std::time::Duration;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::warn;

use crate::error::CustodyError;
use crate::session::{SessionState, SessionStore};
use crate::store::{CredentialStore, UserAccount};
use crate::trusted::TrustedDeviceTokenService;
use crate::vault::SecretVault;

const DEFAULT_AUTHENTICATOR_LABEL: &str = "Authenticator app";

/// Argon2id with OWASP-recommended parameters (19 MiB, t=2, p=1).
fn argon2() -> Argon2<'static> {
    // Constant parameters, always valid.
    let params = Params::new(19456, 2, 1, None).unwrap_or_else(|_| Params::default());
    Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
}

/// Hash a password into a PHC-formatted Argon2id string.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

/// Constant-time check of a candidate password against a stored PHC hash.
/// An unparseable hash counts as a mismatch.
#[must_use]
pub fn password_matches(stored_hash: &str, candidate: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        argon2()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Everything the user needs to enroll an authenticator app.
#[derive(Clone, Debug)]
pub struct ProvisioningDetails {
    pub secret_base32: String,
    pub otpauth_url: String,
    /// PNG data URL, ready for an `<img src>`.
    pub qr_data_url: String,
}

/// Authenticated session handed back to the caller.
#[derive(Clone, Debug)]
pub struct EstablishedSession {
    pub token: String,
    pub ttl: Duration,
}

/// Result of the password step.
#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated {
        session: EstablishedSession,
        user: UserAccount,
    },
    SetupRequired {
        challenge_token: String,
        provisioning: ProvisioningDetails,
    },
    VerifyRequired {
        challenge_token: String,
    },
    /// Unknown account or wrong password. Indistinguishable on purpose.
    Rejected,
}

/// Result of a setup or verify step. On rejection the challenge stays
/// usable so the user can retry with the next code.
#[derive(Debug)]
pub enum ChallengeOutcome {
    Authenticated {
        session: EstablishedSession,
        user: UserAccount,
        trusted_device_token: Option<String>,
    },
    Rejected,
}

/// Orchestrates the login state machine over the credential store, the
/// secret vault, and the trusted-device token service.
pub struct MfaChallenge {
    vault: Arc<SecretVault>,
    trusted: TrustedDeviceTokenService,
    store: Arc<dyn CredentialStore>,
    sessions: Arc<SessionStore>,
    issuer: String,
}

impl MfaChallenge {
    #[must_use]
    pub fn new(
        vault: Arc<SecretVault>,
        trusted: TrustedDeviceTokenService,
        store: Arc<dyn CredentialStore>,
        sessions: Arc<SessionStore>,
        issuer: String,
    ) -> Self {
        Self {
            vault,
            trusted,
            store,
            sessions,
            issuer,
        }
    }

    /// Password step. Verifies the credentials and decides whether the login
    /// completes immediately, needs authenticator enrollment, or needs a
    /// code check.
    ///
    /// `trusted_tokens` carries the values of any trusted-device cookies the
    /// caller presented; one that verifies for the account skips the code
    /// check for elevated accounts.
    ///
    /// # Errors
    /// Returns an error only on infrastructure failures (store, RNG).
    /// Credential mismatches come back as [`LoginOutcome::Rejected`].
    pub async fn password_step(
        &self,
        email: &str,
        password: &str,
        trusted_tokens: &[String],
        remember: bool,
    ) -> Result<LoginOutcome> {
        let email = email.trim().to_lowercase();
        let Some(user) = self.store.user_by_email(&email).await? else {
            return Ok(LoginOutcome::Rejected);
        };
        if !password_matches(&user.password_hash, password) {
            return Ok(LoginOutcome::Rejected);
        }

        if !user.requires_mfa() {
            return self.establish(user, remember).await;
        }

        if trusted_tokens
            .iter()
            .any(|token| self.trusted.verify(token, user.id).is_ok())
        {
            return self.establish(user, remember).await;
        }

        let authenticators = self.store.authenticators_for_user(user.id).await?;
        if authenticators.is_empty() {
            return self.begin_setup(user, remember).await;
        }

        let challenge_token = self
            .sessions
            .insert_challenge(SessionState::VerifyRequired {
                user_id: user.id,
                tenant_id: user.tenant_id,
                remember,
            })
            .await?;
        Ok(LoginOutcome::VerifyRequired { challenge_token })
    }

    async fn begin_setup(&self, user: UserAccount, remember: bool) -> Result<LoginOutcome> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("secret generation failed: {e}"))?;

        let totp = self.totp_for(secret_bytes.clone(), &user.email)?;
        let qr = totp
            .get_qr_base64()
            .map_err(|e| anyhow!("QR generation failed: {e}"))?;
        let provisioning = ProvisioningDetails {
            secret_base32: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
            qr_data_url: format!("data:image/png;base64,{qr}"),
        };

        let challenge_token = self
            .sessions
            .insert_challenge(SessionState::SetupRequired {
                user_id: user.id,
                tenant_id: user.tenant_id,
                pending_secret: secret_bytes,
                remember,
            })
            .await?;
        Ok(LoginOutcome::SetupRequired {
            challenge_token,
            provisioning,
        })
    }

    /// Setup step. Checks the first code against the pending secret; on
    /// success the secret is vault-encrypted, persisted as the user's
    /// authenticator, and the session becomes authenticated.
    ///
    /// # Errors
    /// Returns an error on store or vault failures. A wrong code comes back
    /// as [`ChallengeOutcome::Rejected`] with the challenge intact.
    pub async fn setup_step(
        &self,
        challenge_token: &str,
        code: &str,
        label: Option<&str>,
    ) -> Result<ChallengeOutcome> {
        let Some(SessionState::SetupRequired {
            user_id,
            pending_secret,
            remember,
            ..
        }) = self.sessions.get(challenge_token).await
        else {
            return Ok(ChallengeOutcome::Rejected);
        };

        let totp = self.totp_for(pending_secret.clone(), "user")?;
        if !totp.check_current(code).unwrap_or(false) {
            return Ok(ChallengeOutcome::Rejected);
        }

        let Some(user) = self.store.user_by_id(user_id).await? else {
            return Ok(ChallengeOutcome::Rejected);
        };

        let envelope = self.vault.encrypt(&totp.get_secret_base32())?;
        self.store
            .add_authenticator(
                user.id,
                label.unwrap_or(DEFAULT_AUTHENTICATOR_LABEL),
                &envelope,
            )
            .await?;

        self.sessions.remove(challenge_token).await;
        match self.establish(user, remember).await? {
            LoginOutcome::Authenticated { session, user } => Ok(ChallengeOutcome::Authenticated {
                session,
                user,
                trusted_device_token: None,
            }),
            _ => Ok(ChallengeOutcome::Rejected),
        }
    }

    /// Verify step. Accepts a code matching any of the user's enrolled
    /// authenticators. Authenticators whose secret fails to decrypt are
    /// skipped, never fatal. With `remember_device` a trusted-device token
    /// is minted alongside the session.
    ///
    /// # Errors
    /// Returns an error on store failures. A wrong code comes back as
    /// [`ChallengeOutcome::Rejected`] with the challenge intact.
    pub async fn verify_step(
        &self,
        challenge_token: &str,
        code: &str,
        remember_device: bool,
    ) -> Result<ChallengeOutcome> {
        let Some(SessionState::VerifyRequired {
            user_id, remember, ..
        }) = self.sessions.get(challenge_token).await
        else {
            return Ok(ChallengeOutcome::Rejected);
        };

        let authenticators = self.store.authenticators_for_user(user_id).await?;
        let mut matched = false;
        for authenticator in &authenticators {
            let secret_base32 = match self.vault.decrypt(&authenticator.secret) {
                Ok(plaintext) => plaintext,
                Err(CustodyError::Integrity(reason)) => {
                    warn!(
                        authenticator_id = %authenticator.id,
                        reason,
                        "skipping authenticator with undecryptable secret"
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let secret_bytes = match Secret::Encoded(secret_base32).to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        authenticator_id = %authenticator.id,
                        "skipping authenticator with malformed secret: {e}"
                    );
                    continue;
                }
            };
            let totp = self.totp_for(secret_bytes, "user")?;
            if totp.check_current(code).unwrap_or(false) {
                matched = true;
                break;
            }
        }
        if !matched {
            return Ok(ChallengeOutcome::Rejected);
        }

        let Some(user) = self.store.user_by_id(user_id).await? else {
            return Ok(ChallengeOutcome::Rejected);
        };

        let trusted_device_token = remember_device.then(|| self.trusted.mint(user.id));

        self.sessions.remove(challenge_token).await;
        match self.establish(user, remember).await? {
            LoginOutcome::Authenticated { session, user } => Ok(ChallengeOutcome::Authenticated {
                session,
                user,
                trusted_device_token,
            }),
            _ => Ok(ChallengeOutcome::Rejected),
        }
    }

    /// Re-encrypts any authenticator secret still stored in plaintext.
    /// Idempotent; returns the number of secrets rewritten.
    ///
    /// # Errors
    /// Returns an error if the store or the vault fails.
    pub async fn migrate_legacy_secrets(&self) -> Result<usize> {
        let mut migrated = 0;
        for authenticator in self.store.list_all_authenticators().await? {
            if !authenticator.has_legacy_secret() {
                continue;
            }
            let envelope = self
                .vault
                .encrypt(&authenticator.secret)
                .context("failed to encrypt legacy authenticator secret")?;
            self.store
                .rewrite_authenticator_secret(authenticator.id, &envelope)
                .await?;
            migrated += 1;
        }
        Ok(migrated)
    }

    async fn establish(&self, user: UserAccount, remember: bool) -> Result<LoginOutcome> {
        let (token, ttl) = self
            .sessions
            .insert_authenticated(user.id, user.tenant_id, user.role, remember)
            .await?;
        Ok(LoginOutcome::Authenticated {
            session: EstablishedSession { token, ttl },
            user,
        })
    }

    fn totp_for(&self, secret_bytes: Vec<u8>, account: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{AccountRole, memory::InMemoryCredentialStore};
    use secrecy::SecretString;
    use uuid::Uuid;

    struct Harness {
        mfa: MfaChallenge,
        store: Arc<InMemoryCredentialStore>,
        vault: Arc<SecretVault>,
        trusted: TrustedDeviceTokenService,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryCredentialStore::new());
        let sessions = Arc::new(SessionStore::default());
        let vault = Arc::new(SecretVault::new(&SecretString::from("test-passphrase")).unwrap());
        let trusted =
            TrustedDeviceTokenService::new("test-signing-key", Duration::from_secs(14 * 86_400))
                .unwrap();
        let mfa = MfaChallenge::new(
            Arc::clone(&vault),
            trusted.clone(),
            store.clone() as Arc<dyn CredentialStore>,
            sessions,
            "Custodia Test".to_string(),
        );
        Harness {
            mfa,
            store,
            vault,
            trusted,
        }
    }

    fn seed_user(store: &InMemoryCredentialStore, role: AccountRole, password: &str) -> UserAccount {
        let user = UserAccount {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", Uuid::new_v4()),
            password_hash: hash_password(password).unwrap(),
            tenant_id: Uuid::new_v4(),
            force_password_change: false,
            role,
        };
        store.seed_user(user.clone());
        user
    }

    fn totp_from_base32(base32: &str) -> TOTP {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            Secret::Encoded(base32.to_string()).to_bytes().unwrap(),
            Some("Custodia Test".to_string()),
            "user".to_string(),
        )
        .unwrap()
    }

    fn current_code(base32: &str) -> String {
        totp_from_base32(base32).generate_current().unwrap()
    }

    fn wrong_code(base32: &str) -> &'static str {
        if current_code(base32) == "000000" {
            "111111"
        } else {
            "000000"
        }
    }

    /// Seed a confirmed authenticator, returning its base32 secret.
    fn seed_authenticator(h: &Harness, user_id: Uuid) -> String {
        let secret = Secret::generate_secret();
        let base32 = secret.to_encoded().to_string();
        let envelope = h.vault.encrypt(&base32).unwrap();
        h.store.seed_authenticator(crate::store::TotpAuthenticator {
            id: Uuid::new_v4(),
            user_id,
            label: "phone".to_string(),
            secret: envelope,
            created_at_unix: 0,
        });
        base32
    }

    #[tokio::test]
    async fn standard_account_authenticates_at_the_password_step() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Standard, "hunter2!");
        let outcome = h
            .mfa
            .password_step(&user.email, "hunter2!", &[], false)
            .await
            .unwrap();
        match outcome {
            LoginOutcome::Authenticated { session, user: got } => {
                assert!(!session.token.is_empty());
                assert_eq!(got.id, user.id);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Standard, "hunter2!");
        let shouted = user.email.to_uppercase();
        let outcome = h
            .mfa
            .password_step(&format!("  {shouted} "), "hunter2!", &[], false)
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Authenticated { .. }));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_account_are_indistinguishable() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Standard, "hunter2!");
        let wrong = h
            .mfa
            .password_step(&user.email, "not-it", &[], false)
            .await
            .unwrap();
        let unknown = h
            .mfa
            .password_step("nobody@example.com", "hunter2!", &[], false)
            .await
            .unwrap();
        assert!(matches!(wrong, LoginOutcome::Rejected));
        assert!(matches!(unknown, LoginOutcome::Rejected));
    }

    #[tokio::test]
    async fn elevated_account_without_authenticator_enters_setup() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Elevated, "hunter2!");
        let outcome = h
            .mfa
            .password_step(&user.email, "hunter2!", &[], false)
            .await
            .unwrap();
        match outcome {
            LoginOutcome::SetupRequired { provisioning, .. } => {
                assert!(!provisioning.secret_base32.is_empty());
                assert!(provisioning.otpauth_url.starts_with("otpauth://totp/"));
                assert!(provisioning.qr_data_url.starts_with("data:image/png;base64,"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Nothing persisted until the first code is confirmed.
        assert!(h.store.authenticators_for_user(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn setup_confirms_with_first_valid_code() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Elevated, "hunter2!");
        let LoginOutcome::SetupRequired {
            challenge_token,
            provisioning,
        } = h
            .mfa
            .password_step(&user.email, "hunter2!", &[], false)
            .await
            .unwrap()
        else {
            panic!("expected setup");
        };

        let outcome = h
            .mfa
            .setup_step(&challenge_token, &current_code(&provisioning.secret_base32), None)
            .await
            .unwrap();
        assert!(matches!(outcome, ChallengeOutcome::Authenticated { .. }));

        let stored = h.store.authenticators_for_user(user.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_ne!(stored[0].secret, provisioning.secret_base32);
        assert!(!stored[0].has_legacy_secret());
        assert_eq!(
            h.vault.decrypt(&stored[0].secret).unwrap(),
            provisioning.secret_base32
        );
    }

    #[tokio::test]
    async fn setup_rejects_wrong_code_and_keeps_the_challenge() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Elevated, "hunter2!");
        let LoginOutcome::SetupRequired {
            challenge_token,
            provisioning,
        } = h
            .mfa
            .password_step(&user.email, "hunter2!", &[], false)
            .await
            .unwrap()
        else {
            panic!("expected setup");
        };

        let rejected = h
            .mfa
            .setup_step(&challenge_token, wrong_code(&provisioning.secret_base32), None)
            .await
            .unwrap();
        assert!(matches!(rejected, ChallengeOutcome::Rejected));
        assert!(h.store.authenticators_for_user(user.id).await.unwrap().is_empty());

        // Same challenge retried with the right code still completes.
        let accepted = h
            .mfa
            .setup_step(&challenge_token, &current_code(&provisioning.secret_base32), None)
            .await
            .unwrap();
        assert!(matches!(accepted, ChallengeOutcome::Authenticated { .. }));
    }

    #[tokio::test]
    async fn verify_accepts_a_valid_code_and_mints_a_trusted_token() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Elevated, "hunter2!");
        let base32 = seed_authenticator(&h, user.id);

        let LoginOutcome::VerifyRequired { challenge_token } = h
            .mfa
            .password_step(&user.email, "hunter2!", &[], true)
            .await
            .unwrap()
        else {
            panic!("expected verify");
        };

        let outcome = h
            .mfa
            .verify_step(&challenge_token, &current_code(&base32), true)
            .await
            .unwrap();
        match outcome {
            ChallengeOutcome::Authenticated {
                trusted_device_token: Some(token),
                user: got,
                ..
            } => {
                assert!(h.trusted.verify(&token, got.id).is_ok());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_rejects_a_wrong_code_then_allows_retry() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Elevated, "hunter2!");
        let base32 = seed_authenticator(&h, user.id);

        let LoginOutcome::VerifyRequired { challenge_token } = h
            .mfa
            .password_step(&user.email, "hunter2!", &[], false)
            .await
            .unwrap()
        else {
            panic!("expected verify");
        };

        let rejected = h
            .mfa
            .verify_step(&challenge_token, wrong_code(&base32), false)
            .await
            .unwrap();
        assert!(matches!(rejected, ChallengeOutcome::Rejected));

        let accepted = h
            .mfa
            .verify_step(&challenge_token, &current_code(&base32), false)
            .await
            .unwrap();
        match accepted {
            ChallengeOutcome::Authenticated {
                trusted_device_token,
                ..
            } => assert!(trusted_device_token.is_none()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn trusted_device_token_skips_the_code_check() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Elevated, "hunter2!");
        seed_authenticator(&h, user.id);

        let token = h.trusted.mint(user.id);
        let outcome = h
            .mfa
            .password_step(&user.email, "hunter2!", std::slice::from_ref(&token), false)
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Authenticated { .. }));
    }

    #[tokio::test]
    async fn trusted_token_for_another_user_is_ignored() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Elevated, "hunter2!");
        seed_authenticator(&h, user.id);

        let foreign = h.trusted.mint(Uuid::new_v4());
        let outcome = h
            .mfa
            .password_step(&user.email, "hunter2!", std::slice::from_ref(&foreign), false)
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::VerifyRequired { .. }));
    }

    #[tokio::test]
    async fn undecryptable_authenticator_is_skipped_not_fatal() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Elevated, "hunter2!");
        // Valid envelope shape, garbage under it.
        h.store.seed_authenticator(crate::store::TotpAuthenticator {
            id: Uuid::new_v4(),
            user_id: user.id,
            label: "broken".to_string(),
            secret: "AAAAAAAAAAAAAAAA:AAAAAAAAAAAAAAAAAAAAAA:AAAA".to_string(),
            created_at_unix: 0,
        });
        let base32 = seed_authenticator(&h, user.id);

        let LoginOutcome::VerifyRequired { challenge_token } = h
            .mfa
            .password_step(&user.email, "hunter2!", &[], false)
            .await
            .unwrap()
        else {
            panic!("expected verify");
        };

        let outcome = h
            .mfa
            .verify_step(&challenge_token, &current_code(&base32), false)
            .await
            .unwrap();
        assert!(matches!(outcome, ChallengeOutcome::Authenticated { .. }));
    }

    #[tokio::test]
    async fn legacy_plaintext_secrets_migrate_once() {
        let h = harness();
        let user = seed_user(&h.store, AccountRole::Elevated, "hunter2!");
        let base32 = Secret::generate_secret().to_encoded().to_string();
        let id = Uuid::new_v4();
        h.store.seed_authenticator(crate::store::TotpAuthenticator {
            id,
            user_id: user.id,
            label: "phone".to_string(),
            secret: base32.clone(),
            created_at_unix: 0,
        });

        assert_eq!(h.mfa.migrate_legacy_secrets().await.unwrap(), 1);
        assert_eq!(h.mfa.migrate_legacy_secrets().await.unwrap(), 0);

        let stored = &h.store.authenticators_for_user(user.id).await.unwrap()[0];
        assert!(!stored.has_legacy_secret());
        assert_eq!(h.vault.decrypt(&stored.secret).unwrap(), base32);
    }

    #[test]
    fn password_hashing_round_trips() {
        let hash = hash_password("hunter2!").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(password_matches(&hash, "hunter2!"));
        assert!(!password_matches(&hash, "hunter3!"));
        assert!(!password_matches("not-a-phc-string", "hunter2!"));
    }
}
