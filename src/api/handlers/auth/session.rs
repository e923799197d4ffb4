//! Session endpoints for cookie and bearer auth.

use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::{
    state::{AuthConfig, AuthState},
    types::SessionResponse,
};
use crate::{
    session::SessionState,
    store::{AccountRole, UserAccount},
    trusted,
};

pub(crate) const SESSION_COOKIE_NAME: &str = "custodia_session";

/// The authenticated caller behind a request, as resolved from its session.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Principal {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: AccountRole,
}

impl Principal {
    pub(crate) fn is_elevated(&self) -> bool {
        self.role == AccountRole::Elevated
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    // Missing or expired sessions both answer 204 to avoid leaking auth state.
    let Some(principal) = authenticate(&headers, &auth_state).await else {
        return StatusCode::NO_CONTENT.into_response();
    };
    match auth_state.store().user_by_id(principal.user_id).await {
        Ok(Some(user)) => (StatusCode::OK, Json(session_response(&user))).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to load session user: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        auth_state.sessions().remove(&token).await;
    }

    // Always clear the cookie, even if no session existed.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

/// Resolve the request's session token into an authenticated principal.
/// Challenge-stage sessions do not count.
pub(crate) async fn authenticate(headers: &HeaderMap, state: &AuthState) -> Option<Principal> {
    let token = extract_session_token(headers)?;
    match state.sessions().get(&token).await? {
        SessionState::Authenticated {
            user_id,
            tenant_id,
            role,
        } => Some(Principal {
            user_id,
            tenant_id,
            role,
        }),
        _ => None,
    }
}

pub(crate) fn session_response(user: &UserAccount) -> SessionResponse {
    SessionResponse {
        user_id: user.id.to_string(),
        email: user.email.clone(),
        tenant_id: user.tenant_id.to_string(),
        role: user.role.as_str().to_string(),
        force_password_change: user.force_password_change,
    }
}

/// Build a secure `HttpOnly` cookie holding the session token.
pub(crate) fn session_cookie(
    config: &AuthConfig,
    token: &str,
    max_age_seconds: u64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(
    config: &AuthConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Per-user trusted-device cookie, scoped to the MFA endpoints only.
pub(crate) fn trusted_device_cookie(
    config: &AuthConfig,
    user_id: Uuid,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let name = trusted::cookie_name(user_id);
    let max_age = config.trusted_device_max_age_seconds();
    let mut cookie =
        format!("{name}={token}; Path=/v1/auth; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    cookie_value(headers, SESSION_COOKIE_NAME)
}

/// All trusted-device cookie values on the request, regardless of which user
/// they were minted for. Verification binds them to the account later.
pub(crate) fn trusted_device_tokens(headers: &HeaderMap) -> Vec<String> {
    let mut tokens = Vec::new();
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else { continue };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let Some(key) = parts.next() else { continue };
            let Some(val) = parts.next() else { continue };
            if key.trim().starts_with("trusted_") {
                tokens.push(val.trim().to_string());
            }
        }
    }
    tokens
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
