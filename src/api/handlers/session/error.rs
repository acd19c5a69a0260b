use super::types::ErrorResponse;
use crate::{credential::CredentialError, identity::TokenError};
use axum::{
    Json,
    http::{StatusCode, header::InvalidHeaderValue},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Why a session could not be established. Error responses never carry `Set-Cookie`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("admin credential not initialized")]
    Configuration(#[source] CredentialError),
    #[error("Missing idToken")]
    MalformedRequest(String),
    #[error("UNAUTHORIZED")]
    Unauthorized(#[source] TokenError),
    #[error("UNAUTHORIZED")]
    Mint(#[source] CredentialError),
    #[error("INTERNAL")]
    Cookie(#[from] InvalidHeaderValue),
}

impl SessionError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Configuration(_) | Self::Cookie(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) | Self::Mint(_) => StatusCode::UNAUTHORIZED,
        }
    }

    fn details(&self) -> String {
        match self {
            Self::Configuration(err) => err.to_string(),
            Self::MalformedRequest(reason) => reason.clone(),
            Self::Unauthorized(err) => err.to_string(),
            Self::Mint(err) => err.to_string(),
            Self::Cookie(_) => "failed to encode session cookie".to_string(),
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let details = self.details();
        match &self {
            Self::Configuration(_) | Self::Cookie(_) => {
                error!(error = %self, details = %details, "session request failed");
            }
            Self::Unauthorized(_) => warn!(details = %details, "rejected identity token"),
            Self::Mint(_) => warn!(details = %details, "session cookie could not be minted"),
            Self::MalformedRequest(_) => debug!(details = %details, "malformed session request"),
        }
        let body = ErrorResponse {
            error: self.to_string(),
            details,
        };
        (self.status(), Json(body)).into_response()
    }
}
