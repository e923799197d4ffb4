//! Tenant third-party credential custody.
//!
//! Secrets cross the process boundary in plaintext only here; everything at
//! rest goes through the vault.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::api_keys::{forbidden, require_elevated};
use super::auth::{AuthState, types::ErrorResponse};
use crate::api::audit_capture::AuditPrevious;
use crate::error::CustodyError;
use crate::store::EncryptedCredentialRecord;
use crate::vault::SecretVault;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CredentialResponse {
    pub client_id: String,
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_unix: Option<i64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UpsertCredentialRequest {
    pub client_id: String,
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_unix: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/credentials/{provider}",
    params(
        ("tenant_id" = String, Path, description = "Tenant id"),
        ("provider" = String, Path, description = "Provider slug, e.g. `stripe`")
    ),
    responses(
        (status = 200, description = "Decrypted credentials", body = CredentialResponse),
        (status = 403, description = "Elevated role required", body = ErrorResponse),
        (status = 404, description = "No credentials on file", body = ErrorResponse)
    ),
    tag = "credentials"
)]
pub async fn get_credential(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    vault: Extension<Arc<SecretVault>>,
    Path((tenant_id, provider)): Path<(Uuid, String)>,
) -> impl IntoResponse {
    let Some(()) = require_elevated(&headers, &auth_state).await else {
        return forbidden();
    };
    let record = match auth_state.store().tenant_credential(tenant_id, &provider).await {
        Ok(Some(record)) => record,
        Ok(None) => return not_found(),
        Err(err) => {
            error!("Failed to load tenant credential: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match decrypt_record(&vault, &record) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            error!(%tenant_id, provider, "Failed to decrypt tenant credential: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    put,
    path = "/v1/tenants/{tenant_id}/credentials/{provider}",
    params(
        ("tenant_id" = String, Path, description = "Tenant id"),
        ("provider" = String, Path, description = "Provider slug, e.g. `stripe`")
    ),
    request_body = UpsertCredentialRequest,
    responses(
        (status = 204, description = "Credentials stored"),
        (status = 403, description = "Elevated role required", body = ErrorResponse)
    ),
    tag = "credentials"
)]
pub async fn put_credential(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    vault: Extension<Arc<SecretVault>>,
    Path((tenant_id, provider)): Path<(Uuid, String)>,
    Json(payload): Json<UpsertCredentialRequest>,
) -> impl IntoResponse {
    let Some(()) = require_elevated(&headers, &auth_state).await else {
        return forbidden();
    };
    if !valid_provider(&provider) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: "Invalid provider slug".to_string(),
            }),
        )
            .into_response();
    }

    // Snapshot the stored (still encrypted) row so the audit entry can diff
    // without exposing plaintext.
    let previous = match auth_state.store().tenant_credential(tenant_id, &provider).await {
        Ok(previous) => previous,
        Err(err) => {
            error!("Failed to load prior tenant credential: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let record = match encrypt_record(&vault, tenant_id, &provider, &payload) {
        Ok(record) => record,
        Err(err) => {
            error!(%tenant_id, provider, "Failed to encrypt tenant credential: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match auth_state.store().upsert_tenant_credential(&record).await {
        Ok(()) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            if let Some(previous) = previous {
                response
                    .extensions_mut()
                    .insert(AuditPrevious(stored_value(&previous)));
            }
            response
        }
        Err(err) => {
            error!("Failed to store tenant credential: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn encrypt_record(
    vault: &SecretVault,
    tenant_id: Uuid,
    provider: &str,
    payload: &UpsertCredentialRequest,
) -> Result<EncryptedCredentialRecord, CustodyError> {
    Ok(EncryptedCredentialRecord {
        tenant_id,
        provider: provider.to_string(),
        client_id: payload.client_id.clone(),
        secret: vault.encrypt(&payload.secret)?,
        access_token: payload
            .access_token
            .as_deref()
            .map(|token| vault.encrypt(token))
            .transpose()?,
        refresh_token: payload
            .refresh_token
            .as_deref()
            .map(|token| vault.encrypt(token))
            .transpose()?,
        expires_at_unix: payload.expires_at_unix,
    })
}

fn decrypt_record(
    vault: &SecretVault,
    record: &EncryptedCredentialRecord,
) -> Result<CredentialResponse, CustodyError> {
    Ok(CredentialResponse {
        client_id: record.client_id.clone(),
        secret: vault.decrypt(&record.secret)?,
        access_token: record
            .access_token
            .as_deref()
            .map(|token| vault.decrypt(token))
            .transpose()?,
        refresh_token: record
            .refresh_token
            .as_deref()
            .map(|token| vault.decrypt(token))
            .transpose()?,
        expires_at_unix: record.expires_at_unix,
    })
}

/// The stored row as JSON, envelopes and all.
fn stored_value(record: &EncryptedCredentialRecord) -> serde_json::Value {
    json!({
        "tenant_id": record.tenant_id.to_string(),
        "provider": record.provider,
        "client_id": record.client_id,
        "secret": record.secret,
        "access_token": record.access_token,
        "refresh_token": record.refresh_token,
        "expires_at_unix": record.expires_at_unix,
    })
}

fn valid_provider(provider: &str) -> bool {
    Regex::new(r"^[a-z0-9][a-z0-9_-]*$").is_ok_and(|regex| regex.is_match(provider))
}

fn not_found() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "No credentials on file".to_string(),
        }),
    )
        .into_response()
}
