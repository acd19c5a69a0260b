//! Shared fixtures for unit tests.

use crate::credential::{AdminCredential, ProviderEndpoints};
use crate::identity::{IdTokenClaims, Jwks, sign_rs256};
use anyhow::Result;
use axum::{
    Form, Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    io::Write,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tokio::net::TcpListener;

pub const TEST_PRIVATE_KEY_PEM: &str = include_str!("../tests/fixtures/test_key.pem");
pub const OTHER_PRIVATE_KEY_PEM: &str = include_str!("../tests/fixtures/other_key.pem");

pub const TEST_PROJECT_ID: &str = "demo-project";
pub const TEST_CLIENT_EMAIL: &str = "admin@demo-project.iam.gserviceaccount.com";
pub const TEST_KID: &str = "k1";
pub const NOW: i64 = 1_700_000_000;

pub fn test_credential() -> Result<AdminCredential> {
    Ok(AdminCredential::from_pem(
        TEST_PROJECT_ID,
        TEST_CLIENT_EMAIL,
        Some("sa-key-1".to_string()),
        TEST_PRIVATE_KEY_PEM,
    )?)
}

pub fn test_jwks() -> Result<Jwks> {
    Ok(Jwks::from_rsa_private_key_pem_or_der(
        TEST_PRIVATE_KEY_PEM.as_bytes(),
        TEST_KID,
    )?)
}

pub fn id_token_claims(now: i64) -> IdTokenClaims {
    IdTokenClaims {
        iss: format!("https://securetoken.google.com/{TEST_PROJECT_ID}"),
        aud: TEST_PROJECT_ID.to_string(),
        sub: "uid-ada".to_string(),
        iat: now - 60,
        exp: now + 3600,
        auth_time: Some(now - 60),
        email: Some("ada@example.com".to_string()),
        name: Some("Ada".to_string()),
        picture: None,
    }
}

/// Sign an ID token the way the identity provider would, with the shared test key.
pub fn signed_id_token(claims: &IdTokenClaims) -> Result<String> {
    let key = crate::identity::decode_private_key(TEST_PRIVATE_KEY_PEM.as_bytes())?;
    Ok(sign_rs256(&key, Some(TEST_KID), claims)?)
}

pub const FAKE_REFRESH_TOKEN: &str = "1//fake-refresh-token";
pub const FAKE_USER_ACCESS_TOKEN: &str = "user-access-token";
pub const FAKE_METADATA_ACCESS_TOKEN: &str = "metadata-access-token";
pub const FAKE_METADATA_PROJECT: &str = "metadata-project";

/// An `authorized_user` credentials file, as written by gcloud.
pub fn authorized_user_file(quota_project: Option<&str>) -> Result<tempfile::NamedTempFile> {
    let mut contents = json!({
        "type": "authorized_user",
        "client_id": "fake-client.apps.googleusercontent.com",
        "client_secret": "fake-client-secret",
        "refresh_token": FAKE_REFRESH_TOKEN,
    });
    if let Some(project) = quota_project {
        contents["quota_project_id"] = json!(project);
    }
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(contents.to_string().as_bytes())?;
    Ok(file)
}

/// A `createSessionCookie` call as seen by [`FakeProvider`].
#[derive(Debug, Clone)]
pub struct SessionCookieCall {
    pub project_id: String,
    pub authorization: Option<String>,
    pub user_project: Option<String>,
    pub body: Value,
}

#[derive(Default)]
pub struct ProviderCalls {
    pub token_requests: AtomicUsize,
    pub reject_id_tokens: AtomicBool,
    session_cookies: Mutex<Vec<SessionCookieCall>>,
}

impl ProviderCalls {
    pub fn session_cookie_calls(&self) -> Vec<SessionCookieCall> {
        self.session_cookies
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

/// Local stand-in for the provider's OAuth token endpoint, metadata server and
/// identity toolkit, on an ephemeral port.
pub struct FakeProvider {
    pub base_url: String,
    pub calls: Arc<ProviderCalls>,
}

impl FakeProvider {
    pub async fn spawn() -> Result<Self> {
        let calls = Arc::new(ProviderCalls::default());
        let app = Router::new()
            .route("/token", post(oauth_token))
            .route("/computeMetadata/v1/", get(metadata_root))
            .route("/computeMetadata/v1/project/project-id", get(metadata_project))
            .route(
                "/computeMetadata/v1/instance/service-accounts/default/token",
                get(metadata_token),
            )
            .route("/v1/*rest", post(create_session_cookie))
            .with_state(calls.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            calls,
        })
    }

    pub fn endpoints(&self) -> ProviderEndpoints {
        ProviderEndpoints {
            oauth_token_url: format!("{}/token", self.base_url),
            identity_toolkit_url: self.base_url.clone(),
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn is_metadata_request(headers: &HeaderMap) -> bool {
    header(headers, "metadata-flavor").as_deref() == Some("Google")
}

async fn oauth_token(
    State(calls): State<Arc<ProviderCalls>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    calls.token_requests.fetch_add(1, Ordering::SeqCst);
    let valid = form.get("grant_type").map(String::as_str) == Some("refresh_token")
        && form.get("refresh_token").map(String::as_str) == Some(FAKE_REFRESH_TOKEN);
    if !valid {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant", "error_description": "Bad Request" })),
        )
            .into_response();
    }
    Json(json!({
        "access_token": FAKE_USER_ACCESS_TOKEN,
        "expires_in": 3599,
        "token_type": "Bearer",
    }))
    .into_response()
}

async fn metadata_root(headers: HeaderMap) -> Response {
    if !is_metadata_request(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    ([("metadata-flavor", "Google")], "").into_response()
}

async fn metadata_project(headers: HeaderMap) -> Response {
    if !is_metadata_request(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    ([("metadata-flavor", "Google")], FAKE_METADATA_PROJECT).into_response()
}

async fn metadata_token(State(calls): State<Arc<ProviderCalls>>, headers: HeaderMap) -> Response {
    if !is_metadata_request(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    calls.token_requests.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "access_token": FAKE_METADATA_ACCESS_TOKEN,
        "expires_in": 3599,
        "token_type": "Bearer",
    }))
    .into_response()
}

async fn create_session_cookie(
    State(calls): State<Arc<ProviderCalls>>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(project_id) = rest
        .trim_start_matches('/')
        .strip_prefix("projects/")
        .and_then(|rest| rest.strip_suffix(":createSessionCookie"))
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if let Ok(mut recorded) = calls.session_cookies.lock() {
        recorded.push(SessionCookieCall {
            project_id: project_id.to_string(),
            authorization: header(&headers, "authorization"),
            user_project: header(&headers, "x-goog-user-project"),
            body,
        });
    }

    if calls.reject_id_tokens.load(Ordering::SeqCst) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "code": 400, "message": "INVALID_ID_TOKEN" } })),
        )
            .into_response();
    }
    Json(json!({ "sessionCookie": format!("provider-cookie-{project_id}") })).into_response()
}
