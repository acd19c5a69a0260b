use super::error::CredentialError;
use base64ct::{Base64, Encoding};
use serde::Deserialize;
use std::{fs, path::Path};

pub(super) const SERVICE_ACCOUNT_TYPE: &str = "service_account";
pub(super) const AUTHORIZED_USER_TYPE: &str = "authorized_user";

/// The fields of a Google credential file this crate understands.
///
/// Service-account keys carry `client_email` and `private_key`; `authorized_user`
/// files, as written by `gcloud auth application-default login`, carry an OAuth
/// client and refresh token instead.
#[derive(Deserialize)]
pub(super) struct CredentialFile {
    #[serde(rename = "type", default)]
    pub(super) kind: Option<String>,
    #[serde(default)]
    pub(super) project_id: Option<String>,
    #[serde(default)]
    pub(super) private_key_id: Option<String>,
    #[serde(default)]
    pub(super) private_key: Option<String>,
    #[serde(default)]
    pub(super) client_email: Option<String>,
    #[serde(default)]
    pub(super) client_id: Option<String>,
    #[serde(default)]
    pub(super) client_secret: Option<String>,
    #[serde(default)]
    pub(super) refresh_token: Option<String>,
    #[serde(default)]
    pub(super) quota_project_id: Option<String>,
}

impl CredentialFile {
    /// The declared `type`, defaulting to a service-account key.
    pub(super) fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(SERVICE_ACCOUNT_TYPE)
    }

    fn from_json(json: &str) -> Result<Self, CredentialError> {
        serde_json::from_str(json).map_err(|err| CredentialError::InvalidKeyFile(err.to_string()))
    }

    /// Read and parse a credential file, as referenced by a path or ambient discovery.
    pub(super) fn from_file(path: &Path) -> Result<Self, CredentialError> {
        let contents = fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Decode a pre-encoded service-account blob: inline JSON, base64-encoded JSON,
    /// or a path to a key file.
    pub(super) fn from_blob(blob: &str) -> Result<Self, CredentialError> {
        let blob = blob.trim();
        if blob.starts_with('{') {
            return Self::from_json(blob);
        }

        if let Ok(decoded) = Base64::decode_vec(blob) {
            if let Ok(json) = String::from_utf8(decoded) {
                if json.trim_start().starts_with('{') {
                    return Self::from_json(&json);
                }
            }
        }

        let path = Path::new(blob);
        if path.is_file() {
            return Self::from_file(path);
        }

        Err(CredentialError::InvalidKeyFile(
            "expected JSON, base64-encoded JSON, or a path to a key file".to_string(),
        ))
    }
}

/// Turn literal `\n` escape sequences into line breaks.
///
/// Private keys passed through environment variables usually arrive with their
/// newlines escaped; PEM decoding requires real ones.
#[must_use]
pub fn normalize_private_key(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.replace("\\n", "\n")
}
