//! Auth handlers and supporting modules.
//!
//! The login flow is a small state machine: the password step either
//! completes the session directly or parks it in a challenge stage, and the
//! MFA endpoints advance it from there. All rejections along the way are
//! deliberately generic.

pub(crate) mod login;
pub(crate) mod mfa;
pub(crate) mod password;
pub(crate) mod session;
mod state;
pub(crate) mod types;

pub use state::{AuthConfig, AuthState};

pub(crate) use session::authenticate;
