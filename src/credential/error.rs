use crate::identity::TokenError;
use thiserror::Error;

/// Why an admin credential could not be established or used.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential source configured")]
    NoSource,
    #[error("invalid credential file: {0}")]
    InvalidKeyFile(String),
    #[error("credential is missing `{0}`")]
    MissingField(&'static str),
    #[error("invalid private key: {0}")]
    PrivateKey(String),
    #[error("unsupported credential type `{0}`")]
    UnsupportedType(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no usable credential source: {0}")]
    Exhausted(String),
    #[error("access token request failed: {0}")]
    AccessToken(String),
    #[error("identity provider rejected the request: {0}")]
    Provider(String),
    #[error("failed to sign session cookie: {0}")]
    Signing(#[from] TokenError),
}
