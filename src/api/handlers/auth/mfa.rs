//! MFA setup and verification steps.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::error;

use super::{
    login::authenticated_response,
    session::{extract_session_token, trusted_device_cookie},
    state::AuthState,
    types::{ErrorResponse, LoginResponse, MfaSetupRequest, MfaVerifyRequest},
};
use crate::mfa::ChallengeOutcome;

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/setup",
    request_body = MfaSetupRequest,
    responses(
        (status = 200, description = "Authenticator enrolled and session authenticated", body = LoginResponse),
        (status = 401, description = "Invalid code or no pending setup", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn mfa_setup(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<MfaSetupRequest>,
) -> impl IntoResponse {
    let Some(challenge_token) = extract_session_token(&headers) else {
        return invalid_code();
    };
    let outcome = auth_state
        .mfa()
        .setup_step(&challenge_token, &payload.code, payload.label.as_deref())
        .await;
    match outcome {
        Ok(ChallengeOutcome::Authenticated { session, user, .. }) => {
            authenticated_response(&auth_state, session, &user)
        }
        Ok(ChallengeOutcome::Rejected) => invalid_code(),
        Err(err) => {
            error!("MFA setup failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/verify",
    request_body = MfaVerifyRequest,
    responses(
        (status = 200, description = "Code accepted and session authenticated", body = LoginResponse),
        (status = 401, description = "Invalid code or no pending verification", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn mfa_verify(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<MfaVerifyRequest>,
) -> impl IntoResponse {
    let Some(challenge_token) = extract_session_token(&headers) else {
        return invalid_code();
    };
    let outcome = auth_state
        .mfa()
        .verify_step(&challenge_token, &payload.code, payload.remember_device)
        .await;
    match outcome {
        Ok(ChallengeOutcome::Authenticated {
            session,
            user,
            trusted_device_token,
        }) => {
            let mut response = authenticated_response(&auth_state, session, &user);
            if let Some(token) = trusted_device_token {
                match trusted_device_cookie(auth_state.config(), user.id, &token) {
                    Ok(cookie) => {
                        response.headers_mut().append(SET_COOKIE, cookie);
                    }
                    Err(err) => {
                        // Session is already established; the device just
                        // won't be remembered.
                        error!("Failed to build trusted-device cookie: {err}");
                    }
                }
            }
            response
        }
        Ok(ChallengeOutcome::Rejected) => invalid_code(),
        Err(err) => {
            error!("MFA verification failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Wrong codes and missing challenges share one rejection.
fn invalid_code() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "Invalid code".to_string(),
        }),
    )
        .into_response()
}
