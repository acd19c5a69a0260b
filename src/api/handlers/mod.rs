//! Route handlers for the session endpoint and service health.

pub mod health;
pub mod session;
