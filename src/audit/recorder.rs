//! Asynchronous audit recorder.
//!
//! The request path hands completed mutating actions to a channel and moves
//! on; a spawned worker resolves tenant context, sanitizes and diffs the
//! payload, and appends through the credential store. The handoff is the
//! structural guarantee that audit capture never blocks a response and a
//! failed write never rolls back the action it describes.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    error::CustodyError,
    store::{CredentialStore, NewAuditEntry, TenantHint},
};

use super::{fingerprint, sanitize, shallow_diff};

/// One completed mutating action, as captured by the request layer.
#[derive(Clone, Debug, Default)]
pub struct AuditEvent {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub source_addr: Option<String>,
    /// Tenant id found directly in body, query, or path.
    pub explicit_tenant: Option<Uuid>,
    /// Owning-tenant lookups to try, in order, when no explicit tenant exists.
    pub tenant_hints: Vec<TenantHint>,
    /// Raw request body; sanitized by the worker before persistence.
    pub body: Option<Value>,
    /// Previous value supplied by the handler for diffing.
    pub previous: Option<Value>,
    /// Raw API-key identifier; reduced to a fingerprint before persistence.
    pub api_key: Option<String>,
}

/// Fire-and-forget sink for audit events.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditRecorder {
    /// Spawn the worker task and return the sender handle.
    #[must_use]
    pub fn spawn(store: Arc<dyn CredentialStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let action = event.action.clone();
                if let Err(err) = write_entry(store.as_ref(), event).await {
                    // Logged only; the triggering action already completed.
                    error!(action, "{err}");
                }
            }
        });
        Self { tx }
    }

    /// Queue an event. Dropped (with a warning) if the worker is gone;
    /// never an error for the caller.
    pub fn record(&self, event: AuditEvent) {
        if self.tx.send(event).is_err() {
            warn!("audit worker unavailable; entry dropped");
        }
    }
}

async fn resolve_tenant(store: &dyn CredentialStore, event: &AuditEvent) -> Option<Uuid> {
    if let Some(tenant_id) = event.explicit_tenant {
        return Some(tenant_id);
    }
    for hint in &event.tenant_hints {
        match store.owning_tenant(*hint).await {
            Ok(Some(tenant_id)) => return Some(tenant_id),
            Ok(None) => {}
            Err(err) => debug!("owning-tenant lookup failed for {hint:?}: {err}"),
        }
    }
    None
}

pub(crate) async fn write_entry(
    store: &dyn CredentialStore,
    event: AuditEvent,
) -> Result<(), CustodyError> {
    let tenant_id = resolve_tenant(store, &event).await;

    let sanitized_new = event.body.as_ref().map(sanitize);
    let sanitized_previous = event.previous.as_ref().map(sanitize);

    let new_value = match (&sanitized_previous, &sanitized_new) {
        (Some(previous), Some(new)) => Some(shallow_diff(previous, new)),
        _ => sanitized_new,
    };

    let entry = NewAuditEntry {
        user_id: event.user_id,
        tenant_id,
        action: event.action,
        previous_value: sanitized_previous,
        new_value,
        api_key_fingerprint: event.api_key.as_deref().map(fingerprint),
        source_addr: event.source_addr,
    };

    store
        .append_audit_entry(&entry)
        .await
        .map_err(|err| CustodyError::AuditWrite(err.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryCredentialStore;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn persists_sanitized_body_and_resolved_tenant() {
        let store = InMemoryCredentialStore::new();
        let staff_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        store.seed_owner(staff_id, tenant_id);

        let event = AuditEvent {
            action: "POST /v1/staff".to_string(),
            tenant_hints: vec![TenantHint::Staff(staff_id)],
            body: Some(json!({ "name": "Ada", "password": "hunter2" })),
            source_addr: Some("10.0.0.7".to_string()),
            ..AuditEvent::default()
        };
        write_entry(&store, event).await.unwrap();

        let entries = store.audit_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tenant_id, Some(tenant_id));
        assert_eq!(
            entries[0].new_value,
            Some(json!({ "name": "Ada", "password": "***" }))
        );
    }

    #[tokio::test]
    async fn explicit_tenant_wins_over_hints() {
        let store = InMemoryCredentialStore::new();
        let explicit = Uuid::new_v4();
        store.seed_owner(Uuid::new_v4(), Uuid::new_v4());

        let event = AuditEvent {
            action: "DELETE /v1/assets/1".to_string(),
            explicit_tenant: Some(explicit),
            tenant_hints: vec![TenantHint::Entity(Uuid::new_v4())],
            ..AuditEvent::default()
        };
        write_entry(&store, event).await.unwrap();
        assert_eq!(store.audit_entries()[0].tenant_id, Some(explicit));
    }

    #[tokio::test]
    async fn updates_persist_only_the_shallow_diff() {
        let store = InMemoryCredentialStore::new();
        let event = AuditEvent {
            action: "PUT /v1/invoices/7".to_string(),
            previous: Some(json!({ "a": 1, "b": 2 })),
            body: Some(json!({ "a": 1, "b": 3 })),
            ..AuditEvent::default()
        };
        write_entry(&store, event).await.unwrap();

        let entries = store.audit_entries();
        assert_eq!(entries[0].previous_value, Some(json!({ "a": 1, "b": 2 })));
        assert_eq!(entries[0].new_value, Some(json!({ "b": 3 })));
    }

    #[tokio::test]
    async fn api_key_identifiers_are_stored_as_fingerprints() {
        let store = InMemoryCredentialStore::new();
        let event = AuditEvent {
            action: "POST /v1/machine/sync".to_string(),
            api_key: Some("abcdefghijklmnop".to_string()),
            ..AuditEvent::default()
        };
        write_entry(&store, event).await.unwrap();
        assert_eq!(
            store.audit_entries()[0].api_key_fingerprint.as_deref(),
            Some("abc...nop")
        );
    }

    #[tokio::test]
    async fn recorder_hands_off_to_the_worker() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let recorder = AuditRecorder::spawn(store.clone());
        recorder.record(AuditEvent {
            action: "POST /v1/auth/password".to_string(),
            ..AuditEvent::default()
        });

        // The write happens off the request path; give the worker a moment.
        for _ in 0..50 {
            if !store.audit_entries().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.audit_entries().len(), 1);
    }
}
