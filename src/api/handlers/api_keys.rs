//! API key management, restricted to elevated accounts.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::{AuthState, authenticate, types::ErrorResponse};
use crate::apikey::ApiKeyAuthenticator;
use crate::store::ApiKey;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ApiKeyResponse {
    pub id: String,
    pub description: String,
    pub created_at_unix: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_unix: Option<i64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateApiKeyRequest {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_unix: Option<i64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreatedApiKeyResponse {
    pub id: String,
    /// The raw key. Shown exactly once; only a keyed digest is stored.
    pub key: String,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id.to_string(),
            description: key.description,
            created_at_unix: key.created_at_unix,
            expires_at_unix: key.expires_at_unix,
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/api-keys",
    responses(
        (status = 200, description = "All keys, digests omitted", body = [ApiKeyResponse]),
        (status = 403, description = "Elevated role required", body = ErrorResponse)
    ),
    tag = "api-keys"
)]
pub async fn list_api_keys(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let Some(()) = require_elevated(&headers, &auth_state).await else {
        return forbidden();
    };
    match auth_state.store().list_api_keys().await {
        Ok(keys) => {
            let keys: Vec<ApiKeyResponse> = keys.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(keys)).into_response()
        }
        Err(err) => {
            error!("Failed to list API keys: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/api-keys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, description = "Key created; the raw key is not retrievable again", body = CreatedApiKeyResponse),
        (status = 403, description = "Elevated role required", body = ErrorResponse)
    ),
    tag = "api-keys"
)]
pub async fn create_api_key(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    api_keys: Extension<Arc<ApiKeyAuthenticator>>,
    Json(payload): Json<CreateApiKeyRequest>,
) -> impl IntoResponse {
    let Some(()) = require_elevated(&headers, &auth_state).await else {
        return forbidden();
    };
    match api_keys
        .create(&payload.description, payload.expires_at_unix)
        .await
    {
        Ok((id, raw_key)) => (
            StatusCode::CREATED,
            Json(CreatedApiKeyResponse {
                id: id.to_string(),
                key: raw_key,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to create API key: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/v1/api-keys/{id}",
    params(("id" = String, Path, description = "Key id")),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 403, description = "Elevated role required", body = ErrorResponse),
        (status = 404, description = "Unknown key", body = ErrorResponse)
    ),
    tag = "api-keys"
)]
pub async fn delete_api_key(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let Some(()) = require_elevated(&headers, &auth_state).await else {
        return forbidden();
    };
    match auth_state.store().delete_api_key(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Unknown key".to_string(),
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to delete API key: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) async fn require_elevated(headers: &HeaderMap, state: &AuthState) -> Option<()> {
    let principal = authenticate(headers, state).await?;
    principal.is_elevated().then_some(())
}

pub(crate) fn forbidden() -> axum::response::Response {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse {
            error: "Elevated role required".to_string(),
        }),
    )
        .into_response()
}
