pub mod credential;
pub mod logging;
pub mod mode;

use crate::identity::SECURE_TOKEN_JWKS_URL;
use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_KEYS_URL: &str = "keys-url";
pub const ARG_FRONTEND_ORIGIN: &str = "frontend-origin";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("sessionbridge")
        .about("Exchange identity-provider ID tokens for session cookies")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("SESSIONBRIDGE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_KEYS_URL)
                .long(ARG_KEYS_URL)
                .help("JWKS URL of the secure-token service that signs ID tokens")
                .long_help(
                    "JWKS URL of the secure-token service that signs ID tokens.\n\nKeys are cached for the `Cache-Control: max-age` of the response and refreshed on unknown `kid` with a cooldown.",
                )
                .default_value(SECURE_TOKEN_JWKS_URL)
                .env("SESSIONBRIDGE_KEYS_URL"),
        )
        .arg(
            Arg::new(ARG_FRONTEND_ORIGIN)
                .long(ARG_FRONTEND_ORIGIN)
                .help("Allow credentialed cross-origin requests from this origin")
                .env("SESSIONBRIDGE_FRONTEND_ORIGIN"),
        );

    let command = mode::with_args(command);
    let command = credential::with_args(command);
    logging::with_args(command)
}
