//! API handlers for the custody service.
//!
//! Interactive routes authenticate through the session cookie; the machine
//! surface under `/v1/machine` authenticates through `x-api-key` instead.

pub mod api_keys;
pub mod audit;
pub mod auth;
pub mod credentials;
pub mod health;
pub mod machine;
