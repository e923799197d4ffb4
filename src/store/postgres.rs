//! Postgres-backed credential store.
//!
//! Queries follow the portal schema under `migrations/`. Timestamps
//! are kept in the database and surfaced as epoch seconds; JSON columns are
//! bound as text and cast to `jsonb` in SQL.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::{
    AccountRole, ApiKey, AuditLogEntry, CredentialStore, EncryptedCredentialRecord, NewAuditEntry,
    TenantHint, TotpAuthenticator, UserAccount,
};

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> UserAccount {
    let role: String = row.get("role");
    UserAccount {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        tenant_id: row.get("tenant_id"),
        force_password_change: row.get("force_password_change"),
        role: AccountRole::from_str(&role).unwrap_or(AccountRole::Standard),
    }
}

fn authenticator_from_row(row: &PgRow) -> TotpAuthenticator {
    TotpAuthenticator {
        id: row.get("id"),
        user_id: row.get("user_id"),
        label: row.get("label"),
        secret: row.get("secret"),
        created_at_unix: row.get("created_at_unix"),
    }
}

fn api_key_from_row(row: &PgRow) -> ApiKey {
    ApiKey {
        id: row.get("id"),
        digest: row.get("digest"),
        description: row.get("description"),
        expires_at_unix: row.get("expires_at_unix"),
        created_at_unix: row.get("created_at_unix"),
    }
}

fn parse_json_column(raw: Option<String>) -> Option<Value> {
    raw.and_then(|text| serde_json::from_str(&text).ok())
}

const USER_COLUMNS: &str =
    "id, email, password_hash, tenant_id, force_password_change, role::text AS role";

const AUTHENTICATOR_COLUMNS: &str =
    "id, user_id, label, secret, EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix";

const API_KEY_COLUMNS: &str = "id, digest, description, \
     EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at_unix, \
     EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix";

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn user_by_id(&self, id: Uuid) -> Result<Option<UserAccount>> {
        let query = format!("SELECT {USER_COLUMNS} FROM user_accounts WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch user by id")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        let query = format!("SELECT {USER_COLUMNS} FROM user_accounts WHERE email = $1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch user by email")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
        force_change: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE user_accounts SET password_hash = $2, force_password_change = $3 WHERE id = $1",
        )
        .bind(user_id)
        .bind(password_hash)
        .bind(force_change)
        .execute(&self.pool)
        .await
        .context("failed to update password hash")?;
        Ok(())
    }

    async fn authenticators_for_user(&self, user_id: Uuid) -> Result<Vec<TotpAuthenticator>> {
        let query = format!(
            "SELECT {AUTHENTICATOR_COLUMNS} FROM totp_authenticators \
             WHERE user_id = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to list authenticators")?;
        Ok(rows.iter().map(authenticator_from_row).collect())
    }

    async fn add_authenticator(
        &self,
        user_id: Uuid,
        label: &str,
        secret_envelope: &str,
    ) -> Result<Uuid> {
        let row = sqlx::query(
            "INSERT INTO totp_authenticators (id, user_id, label, secret) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(label)
        .bind(secret_envelope)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert authenticator")?;
        Ok(row.get("id"))
    }

    async fn delete_authenticator(&self, user_id: Uuid, authenticator_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM totp_authenticators WHERE id = $1 AND user_id = $2",
        )
        .bind(authenticator_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("failed to delete authenticator")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_all_authenticators(&self) -> Result<Vec<TotpAuthenticator>> {
        let query = format!("SELECT {AUTHENTICATOR_COLUMNS} FROM totp_authenticators");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("failed to list all authenticators")?;
        Ok(rows.iter().map(authenticator_from_row).collect())
    }

    async fn rewrite_authenticator_secret(
        &self,
        authenticator_id: Uuid,
        secret_envelope: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE totp_authenticators SET secret = $2 WHERE id = $1")
            .bind(authenticator_id)
            .bind(secret_envelope)
            .execute(&self.pool)
            .await
            .context("failed to rewrite authenticator secret")?;
        Ok(())
    }

    async fn api_key_by_digest(&self, digest: &str) -> Result<Option<ApiKey>> {
        let query = format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE digest = $1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(digest)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch api key by digest")?;
        Ok(row.as_ref().map(api_key_from_row))
    }

    async fn insert_api_key(
        &self,
        digest: &str,
        description: &str,
        expires_at_unix: Option<i64>,
    ) -> Result<Uuid> {
        let row = sqlx::query(
            "INSERT INTO api_keys (id, digest, description, expires_at) \
             VALUES ($1, $2, $3, to_timestamp($4)) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(digest)
        .bind(description)
        .bind(expires_at_unix)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert api key")?;
        Ok(row.get("id"))
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>> {
        let query = format!("SELECT {API_KEY_COLUMNS} FROM api_keys ORDER BY created_at ASC");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("failed to list api keys")?;
        Ok(rows.iter().map(api_key_from_row).collect())
    }

    async fn delete_api_key(&self, key_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await
            .context("failed to delete api key")?;
        Ok(result.rows_affected() > 0)
    }

    async fn rewrite_api_key_digest(&self, key_id: Uuid, digest: &str) -> Result<()> {
        sqlx::query("UPDATE api_keys SET digest = $2 WHERE id = $1")
            .bind(key_id)
            .bind(digest)
            .execute(&self.pool)
            .await
            .context("failed to rewrite api key digest")?;
        Ok(())
    }

    async fn record_api_key_usage(&self, key_id: Uuid, source_addr: &str) -> Result<()> {
        // Single-statement upsert; the conflict arm is the atomic increment
        // the concurrency model relies on.
        let query = "INSERT INTO api_key_usage (api_key_id, source_addr, use_count, last_used_at) \
             VALUES ($1, $2, 1, NOW()) \
             ON CONFLICT (api_key_id, source_addr) \
             DO UPDATE SET use_count = api_key_usage.use_count + 1, last_used_at = NOW()";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key_id)
            .bind(source_addr)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert api key usage")?;
        Ok(())
    }

    async fn append_audit_entry(&self, entry: &NewAuditEntry) -> Result<()> {
        let query = "INSERT INTO audit_log \
             (user_id, tenant_id, action, previous_value, new_value, api_key_fingerprint, source_addr) \
             VALUES ($1, $2, $3, $4::jsonb, $5::jsonb, $6, $7)";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(entry.user_id)
            .bind(entry.tenant_id)
            .bind(&entry.action)
            .bind(entry.previous_value.as_ref().map(Value::to_string))
            .bind(entry.new_value.as_ref().map(Value::to_string))
            .bind(&entry.api_key_fingerprint)
            .bind(&entry.source_addr)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to append audit entry")?;
        Ok(())
    }

    async fn audit_entries_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, user_id, tenant_id, action, \
                    previous_value::text AS previous_value, new_value::text AS new_value, \
                    api_key_fingerprint, source_addr, \
                    EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix \
             FROM audit_log WHERE tenant_id = $1 \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list audit entries")?;

        Ok(rows
            .into_iter()
            .map(|row| AuditLogEntry {
                id: row.get("id"),
                user_id: row.get("user_id"),
                tenant_id: row.get("tenant_id"),
                action: row.get("action"),
                previous_value: parse_json_column(row.get("previous_value")),
                new_value: parse_json_column(row.get("new_value")),
                api_key_fingerprint: row.get("api_key_fingerprint"),
                source_addr: row.get("source_addr"),
                created_at_unix: row.get("created_at_unix"),
            })
            .collect())
    }

    async fn owning_tenant(&self, hint: TenantHint) -> Result<Option<Uuid>> {
        // The staff/assets/invoices tables belong to the surrounding portal;
        // only their (id, tenant_id) columns are read here.
        let (query, id) = match hint {
            TenantHint::User(id) => ("SELECT tenant_id FROM user_accounts WHERE id = $1", id),
            TenantHint::Staff(id) => ("SELECT tenant_id FROM staff WHERE id = $1", id),
            TenantHint::Asset(id) => ("SELECT tenant_id FROM assets WHERE id = $1", id),
            TenantHint::Invoice(id) => ("SELECT tenant_id FROM invoices WHERE id = $1", id),
            TenantHint::Entity(id) => (
                "SELECT tenant_id FROM staff WHERE id = $1 \
                 UNION ALL SELECT tenant_id FROM assets WHERE id = $1 \
                 UNION ALL SELECT tenant_id FROM invoices WHERE id = $1 \
                 LIMIT 1",
                id,
            ),
        };
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to resolve owning tenant")?;
        Ok(row.map(|row| row.get("tenant_id")))
    }

    async fn tenant_credential(
        &self,
        tenant_id: Uuid,
        provider: &str,
    ) -> Result<Option<EncryptedCredentialRecord>> {
        let row = sqlx::query(
            "SELECT tenant_id, provider, client_id, secret, access_token, refresh_token, \
                    EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at_unix \
             FROM tenant_credentials WHERE tenant_id = $1 AND provider = $2",
        )
        .bind(tenant_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch tenant credential")?;

        Ok(row.map(|row| EncryptedCredentialRecord {
            tenant_id: row.get("tenant_id"),
            provider: row.get("provider"),
            client_id: row.get("client_id"),
            secret: row.get("secret"),
            access_token: row.get("access_token"),
            refresh_token: row.get("refresh_token"),
            expires_at_unix: row.get("expires_at_unix"),
        }))
    }

    async fn upsert_tenant_credential(&self, record: &EncryptedCredentialRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO tenant_credentials \
             (tenant_id, provider, client_id, secret, access_token, refresh_token, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, to_timestamp($7)) \
             ON CONFLICT (tenant_id, provider) DO UPDATE SET \
                 client_id = EXCLUDED.client_id, \
                 secret = EXCLUDED.secret, \
                 access_token = EXCLUDED.access_token, \
                 refresh_token = EXCLUDED.refresh_token, \
                 expires_at = EXCLUDED.expires_at, \
                 updated_at = NOW()",
        )
        .bind(record.tenant_id)
        .bind(&record.provider)
        .bind(&record.client_id)
        .bind(&record.secret)
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(record.expires_at_unix)
        .execute(&self.pool)
        .await
        .context("failed to upsert tenant credential")?;
        Ok(())
    }
}
