//! Custodia - Authentication and secret custody for the business portal
//!
//! Custodia fronts the portal's `/v1` API with password + TOTP logins,
//! trusted-device cookies, opaque session tokens, and API keys for
//! machine callers. Tenant provider credentials are sealed in an
//! envelope-encrypted vault, and every mutating request is recorded in
//! an append-only audit log.
//!
//! Modules:
//!
//! - `api`: axum router, HTTP handlers, and the audit capture middleware
//! - `apikey`: HMAC-digested API keys for the machine surface
//! - `audit`: background audit log recorder
//! - `cli`: command-line interface and telemetry bootstrap
//! - `mfa`: login challenge state machine (password, TOTP setup, verify)
//! - `session`: in-memory session and challenge store
//! - `store`: Postgres-backed credential and account storage
//! - `trusted`: signed trusted-device tokens
//! - `vault`: passphrase-derived envelope encryption for stored secrets

pub mod api;
pub mod apikey;
pub mod audit;
pub mod cli;
pub mod error;
pub mod mfa;
pub mod session;
pub mod store;
pub mod trusted;
pub mod vault;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
