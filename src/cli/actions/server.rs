use crate::api;
use anyhow::Result;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub vault_passphrase: SecretString,
    pub signing_key: SecretString,
    pub issuer: String,
    pub frontend_base_url: String,
    pub session_ttl_seconds: u64,
    pub extended_session_ttl_seconds: u64,
    pub challenge_ttl_seconds: u64,
    pub trusted_device_ttl_days: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let trusted_device_max_age_seconds =
        i64::try_from(args.trusted_device_ttl_days * 24 * 60 * 60).unwrap_or(i64::MAX);

    let auth_config = api::AuthConfig::new(args.frontend_base_url)
        .with_trusted_device_max_age_seconds(trusted_device_max_age_seconds);

    let options = api::ServerOptions {
        vault_passphrase: args.vault_passphrase,
        signing_key: args.signing_key,
        issuer: args.issuer,
        auth_config,
        challenge_ttl_seconds: args.challenge_ttl_seconds,
        session_ttl_seconds: args.session_ttl_seconds,
        extended_session_ttl_seconds: args.extended_session_ttl_seconds,
        trusted_device_ttl_days: args.trusted_device_ttl_days,
    };

    api::new(args.port, args.dsn, options).await
}
