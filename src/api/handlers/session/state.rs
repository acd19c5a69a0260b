//! Session endpoint state: the admin credential, signing keys and deployment mode.

use crate::{credential::CredentialStore, identity::KeyStore};
use std::{fmt, str::FromStr, sync::Arc};

/// Runtime mode; production marks session cookies `Secure`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeploymentMode {
    Production,
    #[default]
    Development,
}

impl DeploymentMode {
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            other => Err(format!(
                "unknown mode `{other}`, expected `production` or `development`"
            )),
        }
    }
}

#[derive(Debug)]
pub struct SessionState {
    credentials: CredentialStore,
    keys: Arc<KeyStore>,
    mode: DeploymentMode,
}

impl SessionState {
    #[must_use]
    pub fn new(credentials: CredentialStore, keys: Arc<KeyStore>) -> Self {
        Self {
            credentials,
            keys,
            mode: DeploymentMode::default(),
        }
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: DeploymentMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub const fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    #[must_use]
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    #[must_use]
    pub const fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub(super) const fn cookie_secure(&self) -> bool {
        self.mode.is_production()
    }
}
