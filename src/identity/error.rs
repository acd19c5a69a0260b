use thiserror::Error;

/// Reasons an ID token is rejected or a session cookie cannot be signed.
///
/// The `Display` text is returned to callers as the `details` of a 401 response,
/// so it names the failed check without echoing token contents.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("token header has no key id")]
    MissingKid,
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("failed to parse RSA key")]
    KeyParse,
    #[error("rsa error")]
    Rsa(#[from] rsa::errors::Error),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token issued in the future")]
    IssuedInFuture,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("invalid subject")]
    InvalidSubject,
    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),
    #[error("session cookie was minted by the identity provider and cannot be verified locally")]
    ProviderMinted,
}
