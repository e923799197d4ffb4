//! Password change for the authenticated user.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::error;

use super::{
    session::authenticate,
    state::AuthState,
    types::{ChangePasswordRequest, ErrorResponse},
};
use crate::mfa::{hash_password, password_matches};

const MIN_PASSWORD_LENGTH: usize = 8;

#[utoipa::path(
    post,
    path = "/v1/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Current password does not match", body = ErrorResponse),
        (status = 422, description = "New password rejected", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<ChangePasswordRequest>,
) -> impl IntoResponse {
    let Some(principal) = authenticate(&headers, &auth_state).await else {
        return unauthorized();
    };
    if payload.new_password.len() < MIN_PASSWORD_LENGTH {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
            }),
        )
            .into_response();
    }

    let user = match auth_state.store().user_by_id(principal.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return unauthorized(),
        Err(err) => {
            error!("Failed to load user for password change: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if !password_matches(&user.password_hash, &payload.current_password) {
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "Current password does not match".to_string(),
            }),
        )
            .into_response();
    }

    let new_hash = match hash_password(&payload.new_password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash new password: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    // A completed change clears any pending force-change flag.
    match auth_state
        .store()
        .update_password_hash(user.id, &new_hash, false)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to persist new password hash: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn unauthorized() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "Authentication required".to_string(),
        }),
    )
        .into_response()
}
