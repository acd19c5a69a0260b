use crate::api::DeploymentMode;
use clap::{Arg, ArgMatches, Command, builder::ValueParser};

pub const ARG_MODE: &str = "mode";

#[must_use]
pub fn validator_mode() -> ValueParser {
    ValueParser::from(|mode: &str| mode.parse::<DeploymentMode>())
}

/// Deployment mode from matches, development when unset.
#[must_use]
pub fn parse(matches: &ArgMatches) -> DeploymentMode {
    matches
        .get_one::<DeploymentMode>(ARG_MODE)
        .copied()
        .unwrap_or_default()
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_MODE)
            .short('m')
            .long(ARG_MODE)
            .help("Runtime mode: production or development")
            .long_help(
                "Runtime mode: production or development.\n\nIn production the session cookie is marked `Secure` and is only sent over HTTPS.",
            )
            .env("SESSIONBRIDGE_MODE")
            .default_value("development")
            .value_parser(validator_mode()),
    )
}
