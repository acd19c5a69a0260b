//! ID token verification and session cookie signing primitives.

mod error;
mod jwks;
mod keys;
mod token;

pub use error::TokenError;
pub use jwks::{Jwk, Jwks, decode_private_key};
pub use keys::{KeyStore, SECURE_TOKEN_JWKS_URL};
pub(crate) use keys::now_unix_seconds;
pub use token::{
    ID_TOKEN_ISSUER_PREFIX, IdTokenClaims, SESSION_COOKIE_ISSUER_PREFIX, SessionCookieClaims,
    TokenHeader, sign_rs256, verify_id_token, verify_session_cookie,
};
