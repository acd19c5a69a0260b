//! # sessionbridge
//!
//! `sessionbridge` keeps a client-side identity-provider session and a server-side
//! `HttpOnly` session cookie in sync, so server-rendered requests can authenticate a
//! user without re-running client-side sign-in.
//!
//! ## Session Endpoint (`api`)
//!
//! `POST /api/session` exchanges a short-lived ID token (`{"idToken": "..."}`) for a
//! `__session` cookie valid for five days. `DELETE /api/session` always clears the
//! cookie. The endpoint is stateless apart from the admin credential, which is
//! loaded once per process from the first usable source:
//!
//! 1. a service-account blob (`FIREBASE_SERVICE_ACCOUNT_KEY`),
//! 2. discrete `FIREBASE_PROJECT_ID` / `FIREBASE_CLIENT_EMAIL` / `FIREBASE_PRIVATE_KEY`,
//! 3. ambient application-default credentials.
//!
//! ## Session Bridge (`bridge`)
//!
//! The bridge subscribes to the identity provider's token-change stream and turns every
//! notification into an establish (`POST`) or clear (`DELETE`) call, while exposing a
//! read-only [`bridge::UserSnapshot`] for presentation code. Sign-in and sign-out are
//! delegated to the provider; the notification stream is the single source of truth.

pub mod api;
pub mod bridge;
pub mod cli;
pub mod credential;
pub mod identity;

#[cfg(test)]
pub(crate) mod test_support;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
