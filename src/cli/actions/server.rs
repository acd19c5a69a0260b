use crate::{
    api::{self, DeploymentMode, SessionState},
    credential::{CredentialSources, CredentialStore},
    identity::KeyStore,
};
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub mode: DeploymentMode,
    pub keys_url: String,
    pub frontend_origin: Option<String>,
    pub credentials: CredentialSources,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the key store cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let keys = Arc::new(KeyStore::new_remote(&args.keys_url)?);

    // The credential itself is loaded on the first session request.
    if is_unconfigured(&args.credentials) {
        warn!("no credential source configured; POST /api/session will answer 500");
    }

    let state = Arc::new(
        SessionState::new(CredentialStore::new(args.credentials), keys).with_mode(args.mode),
    );

    info!(mode = %args.mode, keys_url = %args.keys_url, "starting session endpoint");

    api::new(args.port, state, args.frontend_origin.as_deref()).await
}

fn is_unconfigured(sources: &CredentialSources) -> bool {
    sources.service_account_key.is_none()
        && sources.client_email.is_none()
        && sources.private_key.is_none()
        && sources.application_credentials.is_none()
        && sources.metadata_server.is_none()
}
