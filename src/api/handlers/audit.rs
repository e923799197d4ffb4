//! Audit trail queries.

use axum::{
    Json,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use utoipa::IntoParams;
use uuid::Uuid;

use super::api_keys::{forbidden, require_elevated};
use super::auth::{AuthState, types::ErrorResponse};
use crate::store::AuditLogEntry;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Deserialize, IntoParams, Debug)]
pub struct AuditQuery {
    /// Tenant whose trail to read.
    pub tenant_id: Uuid,
    /// Page size, capped at 500.
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/v1/audit",
    params(AuditQuery),
    responses(
        (status = 200, description = "Newest entries first", body = [AuditLogEntry]),
        (status = 403, description = "Elevated role required", body = ErrorResponse)
    ),
    tag = "audit"
)]
pub async fn list_audit_entries(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let Some(()) = require_elevated(&headers, &auth_state).await else {
        return forbidden();
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    match auth_state
        .store()
        .audit_entries_for_tenant(query.tenant_id, limit)
        .await
    {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(err) => {
            error!("Failed to list audit entries: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
