//! Session cookies minted by the identity provider's `createSessionCookie` API.

use super::{error::CredentialError, oauth::failure_detail};
use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderValue},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com";

/// Header naming the project billed for calls made with user credentials.
const USER_PROJECT_HEADER: &str = "x-goog-user-project";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionCookieRequest<'a> {
    id_token: &'a str,
    valid_duration: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionCookieResponse {
    #[serde(default)]
    session_cookie: String,
}

/// Client for the project-scoped identity toolkit endpoints.
pub(super) struct IdentityToolkit {
    pub(super) client: Client,
    pub(super) base_url: String,
    pub(super) quota_project: Option<String>,
}

impl IdentityToolkit {
    /// Exchange a verified ID token for a provider-signed session cookie.
    pub(super) async fn create_session_cookie(
        &self,
        project_id: &str,
        authorization: HeaderValue,
        id_token: &str,
        ttl: Duration,
    ) -> Result<String, CredentialError> {
        let url = format!(
            "{}/v1/projects/{project_id}:createSessionCookie",
            self.base_url.trim_end_matches('/')
        );

        let mut request = self
            .client
            .post(&url)
            .header(AUTHORIZATION, authorization)
            .json(&CreateSessionCookieRequest {
                id_token,
                valid_duration: ttl.as_secs(),
            });
        if let Some(quota_project) = &self.quota_project {
            request = request.header(USER_PROJECT_HEADER, quota_project);
        }

        let response = request
            .send()
            .await
            .map_err(|err| CredentialError::Provider(err.to_string()))?;
        if !response.status().is_success() {
            return Err(CredentialError::Provider(failure_detail(response).await));
        }

        let body: CreateSessionCookieResponse = response
            .json()
            .await
            .map_err(|err| CredentialError::Provider(format!("invalid response: {err}")))?;
        if body.session_cookie.is_empty() {
            return Err(CredentialError::Provider(
                "response has no sessionCookie".to_string(),
            ));
        }
        Ok(body.session_cookie)
    }
}
