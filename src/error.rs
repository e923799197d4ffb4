//! Error taxonomy for the custody core.
//!
//! Handlers map these to HTTP statuses; [`CustodyError::Integrity`] in
//! particular never surfaces its detail to callers, only to the logs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CustodyError {
    /// A service was constructed with unusable settings, such as an
    /// empty passphrase or signing key.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A sealed value failed authentication or decoding. Covers tampered
    /// vault envelopes, forged trusted-device tokens, and expired or
    /// malformed signatures.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The audit log rejected an append.
    #[error("audit write failed: {0}")]
    AuditWrite(String),
}
