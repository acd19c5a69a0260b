//! Session cookie endpoint.
//!
//! `POST /api/session` verifies a short-lived ID token and answers with a signed,
//! five-day `__session` cookie. `DELETE /api/session` always answers with a cookie
//! that expires immediately. The handlers keep no per-user state; the only shared
//! state is the lazily loaded admin credential and the signing-key cache.
//!
//! The admin credential is resolved before the body is read, so a deployment
//! without credentials reports a 500 even for malformed requests.

mod cookie;
mod error;
mod state;
pub(crate) mod types;

pub use cookie::{SESSION_COOKIE_NAME, SESSION_TTL_SECONDS, SessionCookie};
pub use error::SessionError;
pub use state::{DeploymentMode, SessionState};

use crate::identity::now_unix_seconds;
use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{HeaderValue, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};
use types::{EstablishSessionRequest, SessionStatusResponse};

// axum handler for POST /api/session
pub async fn establish(state: Extension<Arc<SessionState>>, body: Bytes) -> Response {
    match establish_session(&state, &body).await {
        Ok(cookie) => (
            StatusCode::OK,
            [(SET_COOKIE, cookie)],
            Json(SessionStatusResponse::ok()),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

// axum handler for DELETE /api/session
pub async fn clear(state: Extension<Arc<SessionState>>) -> Response {
    match SessionCookie::clear(state.cookie_secure()).to_header_value() {
        Ok(cookie) => (
            StatusCode::OK,
            [(SET_COOKIE, cookie)],
            Json(SessionStatusResponse::cleared()),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to build clearing cookie: {err}");
            SessionError::Cookie(err).into_response()
        }
    }
}

async fn establish_session(state: &SessionState, body: &[u8]) -> Result<HeaderValue, SessionError> {
    let credential = state
        .credentials()
        .get_or_init()
        .await
        .map_err(SessionError::Configuration)?;

    let id_token = parse_id_token(body)?;

    let claims = state
        .keys()
        .verify_id_token(&id_token, credential.project_id())
        .await
        .map_err(SessionError::Unauthorized)?;

    let value = credential
        .create_session_cookie(
            &id_token,
            &claims,
            Duration::from_secs(SESSION_TTL_SECONDS),
            now_unix_seconds(),
        )
        .await
        .map_err(SessionError::Mint)?;

    let cookie = SessionCookie::issue(value, state.cookie_secure()).to_header_value()?;
    info!(uid = %claims.sub, "session cookie issued");
    Ok(cookie)
}

fn parse_id_token(body: &[u8]) -> Result<String, SessionError> {
    let request: EstablishSessionRequest = serde_json::from_slice(body).map_err(|err| {
        SessionError::MalformedRequest(format!("request body is not valid JSON: {err}"))
    })?;
    request
        .id_token
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| {
            SessionError::MalformedRequest("idToken must be a non-empty string".to_string())
        })
}
