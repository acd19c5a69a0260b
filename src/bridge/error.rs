use thiserror::Error;

/// Failures seen by the session bridge. None of them are retried.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("Identity provider error: {0}")]
    Provider(String),
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}
