//! Identity-provider collaborators consumed by the bridge.

use super::error::BridgeError;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, sync::Arc};
use tokio::sync::mpsc;

/// A short-lived bearer ID token minted by the identity provider.
#[derive(Clone)]
pub struct IdentityToken(SecretString);

impl IdentityToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityToken(***)")
    }
}

/// The provider's signed-in user.
#[async_trait]
pub trait IdentityUser: Send + Sync {
    fn uid(&self) -> &str;

    fn email(&self) -> Option<&str>;

    fn display_name(&self) -> Option<&str>;

    fn photo_url(&self) -> Option<&str>;

    /// Fetch the user's current ID token, refreshing it if the provider deems it stale.
    async fn id_token(&self) -> Result<IdentityToken, BridgeError>;
}

/// A token-change notification.
#[derive(Clone)]
pub enum TokenChange {
    SignedIn(Arc<dyn IdentityUser>),
    SignedOut,
}

impl fmt::Debug for TokenChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignedIn(user) => f.debug_tuple("SignedIn").field(&user.uid()).finish(),
            Self::SignedOut => f.write_str("SignedOut"),
        }
    }
}

/// The identity provider: sign-in UI, token minting and refresh.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Run the provider's interactive sign-in.
    async fn sign_in(&self) -> Result<(), BridgeError>;

    async fn sign_out(&self) -> Result<(), BridgeError>;

    /// Subscribe to token changes, delivered in order. Providers usually emit the
    /// current state right after subscription.
    fn subscribe_token_changes(&self) -> TokenSubscription;
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// A live token-change subscription.
///
/// Unsubscribing (or dropping) closes the stream and runs the provider's release hook
/// exactly once.
pub struct TokenSubscription {
    receiver: mpsc::UnboundedReceiver<TokenChange>,
    release: Option<ReleaseHook>,
}

impl TokenSubscription {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<TokenChange>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            release: Some(Box::new(release)),
        }
    }

    /// A subscription with nothing to release on the provider side.
    #[must_use]
    pub fn from_receiver(receiver: mpsc::UnboundedReceiver<TokenChange>) -> Self {
        Self {
            receiver,
            release: None,
        }
    }

    /// Wait for the next change; `None` once the provider stops publishing.
    pub async fn next(&mut self) -> Option<TokenChange> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.receiver.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for TokenSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for TokenSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSubscription")
            .field("released", &self.release.is_none())
            .finish_non_exhaustive()
    }
}
