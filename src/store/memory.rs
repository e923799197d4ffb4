//! In-memory credential store used by unit tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use super::{
    ApiKey, AuditLogEntry, CredentialStore, EncryptedCredentialRecord, NewAuditEntry, TenantHint,
    TotpAuthenticator, UserAccount,
};

#[derive(Default)]
struct Inner {
    users: Vec<UserAccount>,
    authenticators: Vec<TotpAuthenticator>,
    api_keys: Vec<ApiKey>,
    usage: HashMap<(Uuid, String), (i64, i64)>,
    audit: Vec<AuditLogEntry>,
    tenant_credentials: HashMap<(Uuid, String), EncryptedCredentialRecord>,
    owners: HashMap<Uuid, Uuid>,
}

#[derive(Default)]
pub(crate) struct InMemoryCredentialStore {
    inner: Mutex<Inner>,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(0))
}

#[allow(clippy::unwrap_used)]
impl InMemoryCredentialStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seed_user(&self, user: UserAccount) {
        self.inner.lock().unwrap().users.push(user);
    }

    pub(crate) fn seed_api_key(&self, key: ApiKey) {
        self.inner.lock().unwrap().api_keys.push(key);
    }

    pub(crate) fn seed_authenticator(&self, authenticator: TotpAuthenticator) {
        self.inner.lock().unwrap().authenticators.push(authenticator);
    }

    pub(crate) fn seed_owner(&self, entity_id: Uuid, tenant_id: Uuid) {
        self.inner.lock().unwrap().owners.insert(entity_id, tenant_id);
    }

    pub(crate) fn usage_count(&self, key_id: Uuid, source_addr: &str) -> i64 {
        self.inner
            .lock()
            .unwrap()
            .usage
            .get(&(key_id, source_addr.to_string()))
            .map_or(0, |(count, _)| *count)
    }

    pub(crate) fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.inner.lock().unwrap().audit.clone()
    }
}

#[async_trait]
#[allow(clippy::unwrap_used)]
impl CredentialStore for InMemoryCredentialStore {
    async fn user_by_id(&self, id: Uuid) -> Result<Option<UserAccount>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().find(|user| user.id == id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().find(|user| user.email == email).cloned())
    }

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
        force_change: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter_mut().find(|user| user.id == user_id) {
            user.password_hash = password_hash.to_string();
            user.force_password_change = force_change;
        }
        Ok(())
    }

    async fn authenticators_for_user(&self, user_id: Uuid) -> Result<Vec<TotpAuthenticator>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .authenticators
            .iter()
            .filter(|authenticator| authenticator.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn add_authenticator(
        &self,
        user_id: Uuid,
        label: &str,
        secret_envelope: &str,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.inner.lock().unwrap().authenticators.push(TotpAuthenticator {
            id,
            user_id,
            label: label.to_string(),
            secret: secret_envelope.to_string(),
            created_at_unix: now_unix(),
        });
        Ok(id)
    }

    async fn delete_authenticator(&self, user_id: Uuid, authenticator_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.authenticators.len();
        inner
            .authenticators
            .retain(|authenticator| {
                authenticator.id != authenticator_id || authenticator.user_id != user_id
            });
        Ok(inner.authenticators.len() < before)
    }

    async fn list_all_authenticators(&self) -> Result<Vec<TotpAuthenticator>> {
        Ok(self.inner.lock().unwrap().authenticators.clone())
    }

    async fn rewrite_authenticator_secret(
        &self,
        authenticator_id: Uuid,
        secret_envelope: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(authenticator) = inner
            .authenticators
            .iter_mut()
            .find(|authenticator| authenticator.id == authenticator_id)
        {
            authenticator.secret = secret_envelope.to_string();
        }
        Ok(())
    }

    async fn api_key_by_digest(&self, digest: &str) -> Result<Option<ApiKey>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.api_keys.iter().find(|key| key.digest == digest).cloned())
    }

    async fn insert_api_key(
        &self,
        digest: &str,
        description: &str,
        expires_at_unix: Option<i64>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.inner.lock().unwrap().api_keys.push(ApiKey {
            id,
            digest: digest.to_string(),
            description: description.to_string(),
            expires_at_unix,
            created_at_unix: now_unix(),
        });
        Ok(id)
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>> {
        Ok(self.inner.lock().unwrap().api_keys.clone())
    }

    async fn delete_api_key(&self, key_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.api_keys.len();
        inner.api_keys.retain(|key| key.id != key_id);
        Ok(inner.api_keys.len() < before)
    }

    async fn rewrite_api_key_digest(&self, key_id: Uuid, digest: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(key) = inner.api_keys.iter_mut().find(|key| key.id == key_id) {
            key.digest = digest.to_string();
        }
        Ok(())
    }

    async fn record_api_key_usage(&self, key_id: Uuid, source_addr: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .usage
            .entry((key_id, source_addr.to_string()))
            .or_insert((0, 0));
        entry.0 += 1;
        entry.1 = now_unix();
        Ok(())
    }

    async fn append_audit_entry(&self, entry: &NewAuditEntry) -> Result<()> {
        self.inner.lock().unwrap().audit.push(AuditLogEntry {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            tenant_id: entry.tenant_id,
            action: entry.action.clone(),
            previous_value: entry.previous_value.clone(),
            new_value: entry.new_value.clone(),
            api_key_fingerprint: entry.api_key_fingerprint.clone(),
            source_addr: entry.source_addr.clone(),
            created_at_unix: now_unix(),
        });
        Ok(())
    }

    async fn audit_entries_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<AuditLogEntry> = inner
            .audit
            .iter()
            .filter(|entry| entry.tenant_id == Some(tenant_id))
            .cloned()
            .collect();
        entries.reverse();
        entries.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(entries)
    }

    async fn owning_tenant(&self, hint: TenantHint) -> Result<Option<Uuid>> {
        let inner = self.inner.lock().unwrap();
        let id = match hint {
            TenantHint::User(id) => {
                return Ok(inner
                    .users
                    .iter()
                    .find(|user| user.id == id)
                    .map(|user| user.tenant_id));
            }
            TenantHint::Staff(id)
            | TenantHint::Asset(id)
            | TenantHint::Invoice(id)
            | TenantHint::Entity(id) => id,
        };
        Ok(inner.owners.get(&id).copied())
    }

    async fn tenant_credential(
        &self,
        tenant_id: Uuid,
        provider: &str,
    ) -> Result<Option<EncryptedCredentialRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tenant_credentials
            .get(&(tenant_id, provider.to_string()))
            .cloned())
    }

    async fn upsert_tenant_credential(&self, record: &EncryptedCredentialRecord) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .tenant_credentials
            .insert((record.tenant_id, record.provider.clone()), record.clone());
        Ok(())
    }
}
