use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstablishSessionRequest {
    #[serde(default)]
    pub id_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatusResponse {
    pub status: String,
}

impl SessionStatusResponse {
    pub(super) fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    pub(super) fn cleared() -> Self {
        Self {
            status: "cleared".to_string(),
        }
    }
}

/// Failure body: a machine-readable `error` plus human-readable `details`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    pub details: String,
}
