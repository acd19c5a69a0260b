//! Transport from the bridge to the session endpoint.
//!
//! The HTTP client keeps a cookie store, so the `__session` cookie the endpoint sets
//! is replayed on later requests the same way a browser cookie jar would.

use super::{error::BridgeError, provider::IdentityToken};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Endpoint path relative to the application base URL.
const SESSION_PATH: &str = "api/session";
/// Maximum number of error body characters kept in [`BridgeError::Http`].
const MAX_ERROR_CHARS: usize = 200;

/// Establish and clear calls against the session endpoint.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Exchange `id_token` for a session cookie (`POST`).
    async fn establish(&self, id_token: &IdentityToken) -> Result<(), BridgeError>;

    /// Ask the endpoint to clear the session cookie (`DELETE`).
    async fn clear(&self) -> Result<(), BridgeError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EstablishBody<'a> {
    id_token: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpSessionClient {
    client: Client,
    endpoint: Url,
}

impl HttpSessionClient {
    /// Build a client for the endpoint served under `base_url`.
    ///
    /// The endpoint is `api/session` below the base path, so an application mounted
    /// at `https://host/app` talks to `https://host/app/api/session`.
    ///
    /// # Errors
    /// Returns an error if `base_url` is not an http(s) URL or the client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| BridgeError::Config(format!("Failed to build HTTP client: {err}")))?;
        Self::with_client(client, base_url)
    }

    /// Use a preconfigured client, e.g. one sharing a cookie jar with other requests.
    ///
    /// # Errors
    /// Returns an error if `base_url` is not an http(s) URL.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, BridgeError> {
        let mut base = Url::parse(base_url)
            .map_err(|err| BridgeError::Config(format!("Invalid base URL {base_url}: {err}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(BridgeError::Config(format!(
                "Base URL must use http(s): {base_url}"
            )));
        }
        // Without a trailing slash `join` would replace the last path segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join(SESSION_PATH)
            .map_err(|err| BridgeError::Config(format!("Invalid base URL {base_url}: {err}")))?;
        Ok(Self { client, endpoint })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SessionTransport for HttpSessionClient {
    async fn establish(&self, id_token: &IdentityToken) -> Result<(), BridgeError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EstablishBody {
                id_token: id_token.expose(),
            })
            .send()
            .await?;
        handle_empty_response(response).await?;
        debug!(endpoint = %self.endpoint, "session established");
        Ok(())
    }

    async fn clear(&self) -> Result<(), BridgeError> {
        let response = self.client.delete(self.endpoint.clone()).send().await?;
        handle_empty_response(response).await?;
        debug!(endpoint = %self.endpoint, "session cleared");
        Ok(())
    }
}

/// Accept any 2xx and surface other statuses with a sanitized body.
async fn handle_empty_response(response: Response) -> Result<(), BridgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(BridgeError::Http {
        status: status.as_u16(),
        message: sanitize_body(&body),
    })
}

fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}
