//! CLI entry: parse arguments, bring up tracing, resolve the action.

use crate::cli::{actions::Action, commands, dispatch, telemetry};
use anyhow::Result;
use tracing::Level;

/// Parse the command line and hand back the action for the binary to run.
/// Telemetry is initialized here so dispatch failures are already traced.
///
/// # Errors
///
/// Returns an error if telemetry setup or argument dispatch fails.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let verbosity = matches
        .get_one::<u8>(commands::logging::ARG_VERBOSITY)
        .copied()
        .unwrap_or(0);
    telemetry::init(verbosity_level(verbosity))?;

    dispatch::handler(&matches)
}

// Silent by default; each -v raises the floor, four or more means TRACE.
const fn verbosity_level(occurrences: u8) -> Option<Level> {
    match occurrences {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(verbosity_level(0), None);
        assert_eq!(verbosity_level(1), Some(Level::WARN));
        assert_eq!(verbosity_level(2), Some(Level::INFO));
        assert_eq!(verbosity_level(3), Some(Level::DEBUG));
        assert_eq!(verbosity_level(4), Some(Level::TRACE));
        assert_eq!(verbosity_level(42), Some(Level::TRACE));
    }
}
