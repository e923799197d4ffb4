//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let vault_passphrase = matches
        .get_one::<String>("vault-passphrase")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --vault-passphrase")?;

    let signing_key = matches
        .get_one::<String>("signing-key")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --signing-key")?;

    let issuer = matches
        .get_one::<String>("issuer")
        .cloned()
        .unwrap_or_else(|| "Custodia".to_string());

    let frontend_base_url = matches
        .get_one::<String>("frontend-base-url")
        .cloned()
        .unwrap_or_else(|| "http://localhost:5173".to_string());

    let session_ttl_seconds = matches
        .get_one::<u64>("session-ttl-seconds")
        .copied()
        .unwrap_or(43_200);

    let extended_session_ttl_seconds = matches
        .get_one::<u64>("extended-session-ttl-seconds")
        .copied()
        .unwrap_or(2_592_000);

    let challenge_ttl_seconds = matches
        .get_one::<u64>("challenge-ttl-seconds")
        .copied()
        .unwrap_or(600);

    let trusted_device_ttl_days = matches
        .get_one::<u64>("trusted-device-ttl-days")
        .copied()
        .unwrap_or(14);

    Ok(Action::Server(Box::new(Args {
        port,
        dsn,
        vault_passphrase,
        signing_key,
        issuer,
        frontend_base_url,
        session_ttl_seconds,
        extended_session_ttl_seconds,
        challenge_ttl_seconds,
        trusted_device_ttl_days,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsn_required() {
        temp_env::with_vars(
            [
                ("CUSTODIA_DSN", None::<&str>),
                ("CUSTODIA_VAULT_PASSPHRASE", Some("passphrase")),
                ("CUSTODIA_SIGNING_KEY", Some("signing-key")),
            ],
            || {
                let command = crate::cli::commands::new();
                let result = command.try_get_matches_from(vec!["custodia"]);
                assert!(result.is_err());
            },
        );
    }

    #[test]
    fn handler_builds_server_action() {
        temp_env::with_vars(
            [
                (
                    "CUSTODIA_DSN",
                    Some("postgres://user@localhost:5432/custodia"),
                ),
                ("CUSTODIA_VAULT_PASSPHRASE", Some("passphrase")),
                ("CUSTODIA_SIGNING_KEY", Some("signing-key")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["custodia"]);
                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.port, 8080);
                    assert_eq!(args.issuer, "Custodia");
                    assert_eq!(args.challenge_ttl_seconds, 600);
                    assert_eq!(args.trusted_device_ttl_days, 14);
                }
            },
        );
    }
}
