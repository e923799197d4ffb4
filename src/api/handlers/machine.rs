//! Machine-to-machine surface, authenticated by `x-api-key`.

use axum::{
    Json,
    extract::{Extension, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::auth::types::ErrorResponse;
use crate::api::audit_capture::client_addr;
use crate::apikey::{ApiKeyAuthenticator, ApiKeyIdentity};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct WhoamiResponse {
    pub key_id: String,
    pub description: String,
}

/// Gate for machine routes. A missing key is a 401, a key that does not
/// verify (unknown, tampered, expired) is a 403; the reasons are never
/// distinguished for the caller.
pub(crate) async fn require_api_key(mut request: Request, next: Next) -> Response {
    let Some(authenticator) = request
        .extensions()
        .get::<Arc<ApiKeyAuthenticator>>()
        .cloned()
    else {
        error!("API key authenticator missing from request extensions");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let Some(presented) = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
    else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "API key required".to_string(),
            }),
        )
            .into_response();
    };

    let source_addr = client_addr(request.headers());
    match authenticator.verify(&presented, &source_addr).await {
        Ok(Some(identity)) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Ok(None) => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "Invalid API key".to_string(),
            }),
        )
            .into_response(),
        Err(err) => {
            error!("API key verification failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/machine/whoami",
    responses(
        (status = 200, description = "Identity behind the presented key", body = WhoamiResponse),
        (status = 401, description = "API key required", body = ErrorResponse),
        (status = 403, description = "Invalid API key", body = ErrorResponse)
    ),
    security(("api_key" = [])),
    tag = "machine"
)]
pub async fn whoami(identity: Extension<ApiKeyIdentity>) -> impl IntoResponse {
    Json(WhoamiResponse {
        key_id: identity.key_id.to_string(),
        description: identity.description.clone(),
    })
}
