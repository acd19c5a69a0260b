//! OAuth access tokens for ambient credentials that carry no signing key.
//!
//! `authorized_user` files exchange their refresh token at the OAuth token endpoint;
//! on Compute Engine, Cloud Run and similar platforms the metadata server hands out
//! tokens for the attached service account. Tokens are cached until shortly before
//! they expire.

use super::error::CredentialError;
use reqwest::{Client, Response, header::HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

const METADATA_FLAVOR: &str = "Metadata-Flavor";
const METADATA_ROOT_PATH: &str = "/computeMetadata/v1/";
const METADATA_PROJECT_PATH: &str = "/computeMetadata/v1/project/project-id";
const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Renew this long before the provider-reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME_SECONDS: u64 = 3600;

/// How access tokens are obtained.
pub(super) enum TokenGrant {
    RefreshToken {
        token_url: String,
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
    },
    Metadata {
        base_url: String,
    },
}

impl TokenGrant {
    pub(super) const fn as_str(&self) -> &'static str {
        match self {
            Self::RefreshToken { .. } => "refresh_token",
            Self::Metadata { .. } => "metadata_server",
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    authorization: HeaderValue,
    expires_at: Instant,
}

pub(super) struct AccessTokens {
    client: Client,
    grant: TokenGrant,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokens {
    pub(super) fn new(client: Client, grant: TokenGrant) -> Self {
        Self {
            client,
            grant,
            cached: Mutex::new(None),
        }
    }

    pub(super) const fn grant(&self) -> &TokenGrant {
        &self.grant
    }

    /// `Authorization` header value carrying a current access token.
    ///
    /// Concurrent callers wait on one fetch instead of each requesting a token.
    pub(super) async fn authorization(&self) -> Result<HeaderValue, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.authorization.clone());
        }

        let response = self.fetch().await?;
        let lifetime = Duration::from_secs(
            response
                .expires_in
                .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECONDS),
        )
        .saturating_sub(EXPIRY_MARGIN);

        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", response.access_token))
            .map_err(|_| CredentialError::AccessToken("malformed access token".to_string()))?;
        authorization.set_sensitive(true);

        debug!(
            grant = self.grant.as_str(),
            lifetime_seconds = lifetime.as_secs(),
            "access token refreshed"
        );
        *cached = Some(CachedToken {
            authorization: authorization.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(authorization)
    }

    async fn fetch(&self) -> Result<TokenResponse, CredentialError> {
        let request = match &self.grant {
            TokenGrant::RefreshToken {
                token_url,
                client_id,
                client_secret,
                refresh_token,
            } => self.client.post(token_url).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.expose_secret()),
                ("refresh_token", refresh_token.expose_secret()),
            ]),
            TokenGrant::Metadata { base_url } => self
                .client
                .get(format!("{base_url}{METADATA_TOKEN_PATH}"))
                .header(METADATA_FLAVOR, "Google"),
        };

        let response = request
            .send()
            .await
            .map_err(|err| CredentialError::AccessToken(err.to_string()))?;
        if !response.status().is_success() {
            return Err(CredentialError::AccessToken(failure_detail(response).await));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| CredentialError::AccessToken(format!("invalid token response: {err}")))?;
        if token.access_token.is_empty() {
            return Err(CredentialError::AccessToken(
                "token response has no access_token".to_string(),
            ));
        }
        Ok(token)
    }
}

/// Base URL for a metadata host given as `host[:port]` or as a full URL.
pub(super) fn metadata_base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Whether a metadata server answers at `base_url`.
pub(super) async fn metadata_server_available(client: &Client, base_url: &str) -> bool {
    let response = client
        .get(format!("{base_url}{METADATA_ROOT_PATH}"))
        .header(METADATA_FLAVOR, "Google")
        .timeout(METADATA_CHECK_TIMEOUT)
        .send()
        .await;

    match response {
        Ok(response) => response
            .headers()
            .get(METADATA_FLAVOR)
            .is_some_and(|flavor| flavor == "Google"),
        Err(err) => {
            debug!(base_url, error = %err, "metadata server not reachable");
            false
        }
    }
}

/// Project id of the environment the metadata server describes.
pub(super) async fn metadata_project_id(
    client: &Client,
    base_url: &str,
) -> Result<String, CredentialError> {
    let response = client
        .get(format!("{base_url}{METADATA_PROJECT_PATH}"))
        .header(METADATA_FLAVOR, "Google")
        .send()
        .await
        .map_err(|err| CredentialError::Provider(err.to_string()))?;
    if !response.status().is_success() {
        return Err(CredentialError::Provider(failure_detail(response).await));
    }

    let project_id = response
        .text()
        .await
        .map_err(|err| CredentialError::Provider(err.to_string()))?;
    let project_id = project_id.trim();
    if project_id.is_empty() {
        return Err(CredentialError::MissingField("project_id"));
    }
    Ok(project_id.to_string())
}

/// `"<status> <message>"` for a failed Google API response.
///
/// OAuth errors put the message in `error_description`, API errors in
/// `error.message`.
pub(super) async fn failure_detail(response: Response) -> String {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body["error"]["message"]
        .as_str()
        .or_else(|| body["error_description"].as_str())
        .or_else(|| body["error"].as_str())
        .unwrap_or("");
    format!("{status} {message}").trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_host_accepts_host_or_url() {
        assert_eq!(
            metadata_base_url("metadata.google.internal"),
            "http://metadata.google.internal"
        );
        assert_eq!(
            metadata_base_url("http://127.0.0.1:8080/"),
            "http://127.0.0.1:8080"
        );
        assert_eq!(metadata_base_url(" 169.254.169.254 "), "http://169.254.169.254");
    }

    #[tokio::test]
    async fn unreachable_metadata_server_is_not_available() -> anyhow::Result<()> {
        let client = Client::builder().build()?;
        assert!(!metadata_server_available(&client, "http://127.0.0.1:9").await);
        Ok(())
    }
}
