//! Entities exposed through the credential store port.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// Explicit account role. Elevated accounts carry MFA obligations and may use
/// the administrative surfaces; anything role-based hangs off this claim
/// instead of a magic user id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Standard,
    Elevated,
}

impl AccountRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Elevated => "elevated",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "standard" => Some(Self::Standard),
            "elevated" => Some(Self::Elevated),
            _ => None,
        }
    }
}

/// A portal user account.
#[derive(Clone, Debug)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub tenant_id: Uuid,
    pub force_password_change: bool,
    pub role: AccountRole,
}

impl UserAccount {
    /// Elevated accounts must complete a second factor at login.
    #[must_use]
    pub fn requires_mfa(&self) -> bool {
        self.role == AccountRole::Elevated
    }
}

/// An enrolled TOTP authenticator. `secret` is always a vault envelope;
/// rows without a `:` are legacy plaintext awaiting the one-time migration.
#[derive(Clone, Debug)]
pub struct TotpAuthenticator {
    pub id: Uuid,
    pub user_id: Uuid,
    pub label: String,
    pub secret: String,
    pub created_at_unix: i64,
}

impl TotpAuthenticator {
    #[must_use]
    pub fn has_legacy_secret(&self) -> bool {
        !self.secret.contains(':')
    }
}

/// A machine credential. Only the keyed-hash digest is stored; the raw key is
/// shown once at creation and never persisted in recoverable form.
#[derive(Clone, Debug)]
pub struct ApiKey {
    pub id: Uuid,
    pub digest: String,
    pub description: String,
    pub expires_at_unix: Option<i64>,
    pub created_at_unix: i64,
}

impl ApiKey {
    #[must_use]
    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at_unix.is_some_and(|expiry| expiry <= now_unix)
    }
}

/// A new audit record handed to the store for appending.
#[derive(Clone, Debug)]
pub struct NewAuditEntry {
    pub user_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub action: String,
    pub previous_value: Option<Value>,
    pub new_value: Option<Value>,
    pub api_key_fingerprint: Option<String>,
    pub source_addr: Option<String>,
}

/// A persisted audit record. Immutable once written.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub action: String,
    #[schema(value_type = Object)]
    pub previous_value: Option<Value>,
    #[schema(value_type = Object)]
    pub new_value: Option<Value>,
    pub api_key_fingerprint: Option<String>,
    pub source_addr: Option<String>,
    pub created_at_unix: i64,
}

/// Third-party credentials held for a tenant, protected by the same vault
/// mechanism as TOTP seeds.
#[derive(Clone, Debug)]
pub struct EncryptedCredentialRecord {
    pub tenant_id: Uuid,
    pub provider: String,
    pub client_id: String,
    pub secret: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at_unix: Option<i64>,
}

/// Id-shaped parameters the audit recorder can resolve to an owning tenant,
/// in the order they are consulted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TenantHint {
    User(Uuid),
    Staff(Uuid),
    Asset(Uuid),
    Invoice(Uuid),
    Entity(Uuid),
}
