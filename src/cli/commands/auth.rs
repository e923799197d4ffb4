use clap::{Arg, Command};

pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    with_mfa_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL, used for CORS and cookie security")
                .env("CUSTODIA_FRONTEND_BASE_URL")
                .default_value("http://localhost:5173"),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session TTL in seconds")
                .env("CUSTODIA_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("extended-session-ttl-seconds")
                .long("extended-session-ttl-seconds")
                .help("Session TTL in seconds when the user asks to be remembered")
                .env("CUSTODIA_EXTENDED_SESSION_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_mfa_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("issuer")
                .long("issuer")
                .help("Issuer name shown in authenticator apps")
                .env("CUSTODIA_ISSUER")
                .default_value("Custodia"),
        )
        .arg(
            Arg::new("challenge-ttl-seconds")
                .long("challenge-ttl-seconds")
                .help("TTL for pending MFA challenges in seconds")
                .env("CUSTODIA_CHALLENGE_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("trusted-device-ttl-days")
                .long("trusted-device-ttl-days")
                .help("Validity of trusted-device tokens in days")
                .env("CUSTODIA_TRUSTED_DEVICE_TTL_DAYS")
                .default_value("14")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_args_parse() {
        let command = with_args(Command::new("test"));
        let matches = command.get_matches_from(vec![
            "test",
            "--challenge-ttl-seconds",
            "120",
            "--trusted-device-ttl-days",
            "30",
        ]);

        assert_eq!(
            matches.get_one::<u64>("challenge-ttl-seconds").copied(),
            Some(120)
        );
        assert_eq!(
            matches.get_one::<u64>("trusted-device-ttl-days").copied(),
            Some(30)
        );
        assert_eq!(
            matches.get_one::<u64>("extended-session-ttl-seconds").copied(),
            Some(2_592_000)
        );
    }
}
