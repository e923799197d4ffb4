//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Keep the session alive past the default lifetime.
    #[serde(default)]
    pub remember: bool,
}

/// Login status discriminator; tells the frontend which screen comes next.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    Ok,
    MfaSetupRequired,
    MfaVerifyRequired,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub status: LoginStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<ProvisioningResponse>,
}

/// Enrollment material shown exactly once during MFA setup.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProvisioningResponse {
    pub secret_base32: String,
    pub otpauth_url: String,
    /// PNG data URL for direct rendering.
    pub qr_data_url: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaSetupRequest {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaVerifyRequest {
    pub code: String,
    /// Mint a trusted-device token so this browser skips future code checks.
    #[serde(default)]
    pub remember_device: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: String,
    pub tenant_id: String,
    pub role: String,
    pub force_password_change: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
