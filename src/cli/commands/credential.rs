use crate::credential::{
    CredentialSources, DEFAULT_METADATA_HOST, well_known_application_credentials,
};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::path::PathBuf;

pub const ARG_SERVICE_ACCOUNT_KEY: &str = "service-account-key";
pub const ARG_PROJECT_ID: &str = "project-id";
pub const ARG_CLIENT_EMAIL: &str = "client-email";
pub const ARG_PRIVATE_KEY: &str = "private-key";
pub const ARG_APPLICATION_CREDENTIALS: &str = "application-credentials";
pub const ARG_METADATA_HOST: &str = "metadata-host";
pub const ARG_NO_METADATA_SERVER: &str = "no-metadata-server";

/// Collect credential sources from matches.
///
/// Without an explicit application-credentials path the well-known gcloud location
/// is used when it exists. The metadata server is queried last unless disabled.
#[must_use]
pub fn parse(matches: &ArgMatches) -> CredentialSources {
    // clap passes through empty env vars; treat them as unset
    let get_non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };

    CredentialSources {
        service_account_key: get_non_empty(ARG_SERVICE_ACCOUNT_KEY).map(SecretString::from),
        project_id: get_non_empty(ARG_PROJECT_ID),
        client_email: get_non_empty(ARG_CLIENT_EMAIL),
        private_key: get_non_empty(ARG_PRIVATE_KEY).map(SecretString::from),
        application_credentials: get_non_empty(ARG_APPLICATION_CREDENTIALS)
            .map(PathBuf::from)
            .or_else(well_known_application_credentials),
        metadata_server: if matches.get_flag(ARG_NO_METADATA_SERVER) {
            None
        } else {
            get_non_empty(ARG_METADATA_HOST)
        },
        ..CredentialSources::default()
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SERVICE_ACCOUNT_KEY)
                .long(ARG_SERVICE_ACCOUNT_KEY)
                .help("Service-account key: JSON, base64-encoded JSON, or a key file path")
                .env("FIREBASE_SERVICE_ACCOUNT_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_PROJECT_ID)
                .long(ARG_PROJECT_ID)
                .help("Project id, used with --client-email and --private-key")
                .env("FIREBASE_PROJECT_ID"),
        )
        .arg(
            Arg::new(ARG_CLIENT_EMAIL)
                .long(ARG_CLIENT_EMAIL)
                .help("Service-account client email")
                .env("FIREBASE_CLIENT_EMAIL"),
        )
        .arg(
            Arg::new(ARG_PRIVATE_KEY)
                .long(ARG_PRIVATE_KEY)
                .help("Service-account PEM private key; literal \\n sequences are accepted")
                .env("FIREBASE_PRIVATE_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_APPLICATION_CREDENTIALS)
                .long(ARG_APPLICATION_CREDENTIALS)
                .help("Path to application-default credentials (service-account or authorized_user file)")
                .env("GOOGLE_APPLICATION_CREDENTIALS"),
        )
        .arg(
            Arg::new(ARG_METADATA_HOST)
                .long(ARG_METADATA_HOST)
                .help("Metadata server queried for ambient credentials when no other source is usable")
                .env("GCE_METADATA_HOST")
                .default_value(DEFAULT_METADATA_HOST),
        )
        .arg(
            Arg::new(ARG_NO_METADATA_SERVER)
                .long(ARG_NO_METADATA_SERVER)
                .help("Do not query the metadata server for ambient credentials")
                .action(ArgAction::SetTrue),
        )
}
