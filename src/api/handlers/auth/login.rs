//! Password step of the login flow.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::error;

use super::{
    session::{session_cookie, session_response, trusted_device_tokens},
    state::AuthState,
    types::{ErrorResponse, LoginRequest, LoginResponse, LoginStatus, ProvisioningResponse},
};
use crate::mfa::{EstablishedSession, LoginOutcome, ProvisioningDetails};
use crate::store::UserAccount;

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login accepted; check `status` for the next step", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<LoginRequest>,
) -> impl IntoResponse {
    let trusted = trusted_device_tokens(&headers);
    let outcome = auth_state
        .mfa()
        .password_step(&payload.email, &payload.password, &trusted, payload.remember)
        .await;
    match outcome {
        Ok(LoginOutcome::Authenticated { session, user }) => {
            authenticated_response(&auth_state, session, &user)
        }
        Ok(LoginOutcome::SetupRequired {
            challenge_token,
            provisioning,
        }) => challenge_response(
            &auth_state,
            &challenge_token,
            LoginStatus::MfaSetupRequired,
            Some(provisioning),
        ),
        Ok(LoginOutcome::VerifyRequired { challenge_token }) => challenge_response(
            &auth_state,
            &challenge_token,
            LoginStatus::MfaVerifyRequired,
            None,
        ),
        Ok(LoginOutcome::Rejected) => invalid_credentials(),
        Err(err) => {
            error!("Login failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Generic rejection shared by unknown accounts and wrong passwords.
pub(super) fn invalid_credentials() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "Invalid credentials".to_string(),
        }),
    )
        .into_response()
}

pub(super) fn authenticated_response(
    auth_state: &AuthState,
    session: EstablishedSession,
    user: &UserAccount,
) -> axum::response::Response {
    let mut headers = HeaderMap::new();
    match session_cookie(auth_state.config(), &session.token, session.ttl.as_secs()) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    let body = LoginResponse {
        status: LoginStatus::Ok,
        user: Some(session_response(user)),
        provisioning: None,
    };
    (StatusCode::OK, headers, Json(body)).into_response()
}

fn challenge_response(
    auth_state: &AuthState,
    challenge_token: &str,
    status: LoginStatus,
    provisioning: Option<ProvisioningDetails>,
) -> axum::response::Response {
    let ttl = auth_state.sessions().challenge_ttl().as_secs();
    let mut headers = HeaderMap::new();
    match session_cookie(auth_state.config(), challenge_token, ttl) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build challenge cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    let body = LoginResponse {
        status,
        user: None,
        provisioning: provisioning.map(|details| ProvisioningResponse {
            secret_base32: details.secret_base32,
            otpauth_url: details.otpauth_url,
            qr_data_url: details.qr_data_url,
        }),
    };
    (StatusCode::OK, headers, Json(body)).into_response()
}
