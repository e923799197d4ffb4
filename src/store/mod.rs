//! The credential store port.
//!
//! All persistent entity access flows through [`CredentialStore`]; nothing in
//! the core touches a database driver directly. The production implementation
//! is [`postgres::PgCredentialStore`]; tests use an in-memory double.

pub mod models;
pub mod postgres;

#[cfg(test)]
pub(crate) mod memory;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub use models::{
    AccountRole, ApiKey, AuditLogEntry, EncryptedCredentialRecord, NewAuditEntry, TenantHint,
    TotpAuthenticator, UserAccount,
};
pub use postgres::PgCredentialStore;

/// Narrow persistence port for accounts, authenticators, API keys, audit
/// entries, and tenant credential records.
///
/// Implementations must provide an atomic upsert for
/// [`record_api_key_usage`](Self::record_api_key_usage); the usage counter is
/// incremented concurrently without any coordination in this core.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn user_by_id(&self, id: Uuid) -> Result<Option<UserAccount>>;

    async fn user_by_email(&self, email: &str) -> Result<Option<UserAccount>>;

    /// Replace the password hash, optionally clearing the
    /// force-password-change flag.
    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
        force_change: bool,
    ) -> Result<()>;

    async fn authenticators_for_user(&self, user_id: Uuid) -> Result<Vec<TotpAuthenticator>>;

    async fn add_authenticator(
        &self,
        user_id: Uuid,
        label: &str,
        secret_envelope: &str,
    ) -> Result<Uuid>;

    async fn delete_authenticator(&self, user_id: Uuid, authenticator_id: Uuid) -> Result<bool>;

    /// Full sweep used only by the one-time secret migration.
    async fn list_all_authenticators(&self) -> Result<Vec<TotpAuthenticator>>;

    async fn rewrite_authenticator_secret(
        &self,
        authenticator_id: Uuid,
        secret_envelope: &str,
    ) -> Result<()>;

    async fn api_key_by_digest(&self, digest: &str) -> Result<Option<ApiKey>>;

    async fn insert_api_key(
        &self,
        digest: &str,
        description: &str,
        expires_at_unix: Option<i64>,
    ) -> Result<Uuid>;

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>>;

    async fn delete_api_key(&self, key_id: Uuid) -> Result<bool>;

    /// Rewrite used only by the one-time legacy raw-key migration.
    async fn rewrite_api_key_digest(&self, key_id: Uuid, digest: &str) -> Result<()>;

    /// Atomically bump the per-(key, source) usage counter and last-used
    /// timestamp.
    async fn record_api_key_usage(&self, key_id: Uuid, source_addr: &str) -> Result<()>;

    async fn append_audit_entry(&self, entry: &NewAuditEntry) -> Result<()>;

    /// Entries for a tenant, newest first.
    async fn audit_entries_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>>;

    /// Resolve the tenant owning the hinted entity, if any.
    async fn owning_tenant(&self, hint: TenantHint) -> Result<Option<Uuid>>;

    async fn tenant_credential(
        &self,
        tenant_id: Uuid,
        provider: &str,
    ) -> Result<Option<EncryptedCredentialRecord>>;

    async fn upsert_tenant_credential(&self, record: &EncryptedCredentialRecord) -> Result<()>;
}
