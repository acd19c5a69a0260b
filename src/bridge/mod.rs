//! Client-side session bridge.
//!
//! The bridge owns a single token-change subscription and turns each notification
//! into a call against the session endpoint:
//!
//! - `SignedIn(user)`: fetch the user's ID token and establish a session. On success
//!   the [`UserSnapshot`] is replaced; on failure it is left as it was.
//! - `SignedOut`: clear the session, then drop the snapshot whatever the outcome.
//!
//! Notifications are processed one at a time in delivery order; each request finishes
//! before the next notification is read. [`SessionBridge::sign_in`] and
//! [`SessionBridge::sign_out`] only call the provider, whose notification then drives
//! the cookie.

mod client;
mod error;
mod provider;
mod snapshot;

pub use client::{HttpSessionClient, SessionTransport};
pub use error::BridgeError;
pub use provider::{IdentityProvider, IdentityToken, IdentityUser, TokenChange, TokenSubscription};
pub use snapshot::UserSnapshot;

use std::sync::Arc;
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, info_span};

pub struct SessionBridge {
    provider: Arc<dyn IdentityProvider>,
    snapshot: watch::Receiver<Option<UserSnapshot>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionBridge {
    /// Subscribe to `provider` and start processing token changes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        provider: Arc<dyn IdentityProvider>,
        transport: Arc<dyn SessionTransport>,
    ) -> Self {
        let subscription = provider.subscribe_token_changes();
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(
            run(subscription, transport, snapshot_tx, stop_rx)
                .instrument(info_span!("session.bridge")),
        );

        Self {
            provider,
            snapshot: snapshot_rx,
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// The current user snapshot, `None` when signed out.
    #[must_use]
    pub fn snapshot(&self) -> Option<UserSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// A receiver notified whenever the snapshot changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<UserSnapshot>> {
        self.snapshot.clone()
    }

    /// # Errors
    /// Returns the provider's sign-in error.
    pub async fn sign_in(&self) -> Result<(), BridgeError> {
        self.provider.sign_in().await
    }

    /// # Errors
    /// Returns the provider's sign-out error.
    pub async fn sign_out(&self) -> Result<(), BridgeError> {
        self.provider.sign_out().await
    }

    /// Stop processing, release the subscription and wait for the worker to exit.
    ///
    /// A request already in flight is allowed to finish.
    pub async fn shutdown(mut self) {
        self.signal_stop();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                error!("Session bridge task failed: {err}");
            }
        }
    }

    fn signal_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for SessionBridge {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

async fn run(
    mut subscription: TokenSubscription,
    transport: Arc<dyn SessionTransport>,
    snapshot: watch::Sender<Option<UserSnapshot>>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let change = tokio::select! {
            biased;
            _ = &mut stop => break,
            change = subscription.next() => change,
        };
        let Some(change) = change else {
            debug!("token change stream closed");
            break;
        };
        apply_change(change, transport.as_ref(), &snapshot).await;
    }
    subscription.unsubscribe();
    debug!("session bridge stopped");
}

async fn apply_change(
    change: TokenChange,
    transport: &dyn SessionTransport,
    snapshot: &watch::Sender<Option<UserSnapshot>>,
) {
    match change {
        TokenChange::SignedIn(user) => {
            let result = match user.id_token().await {
                Ok(token) => transport.establish(&token).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => {
                    let next = UserSnapshot::from_user(user.as_ref());
                    info!(uid = %next.uid, "server session established");
                    snapshot.send_replace(Some(next));
                }
                Err(err) => {
                    error!(uid = %user.uid(), error = %err, "failed to establish server session");
                }
            }
        }
        TokenChange::SignedOut => {
            if let Err(err) = transport.clear().await {
                error!(error = %err, "failed to clear server session");
            }
            snapshot.send_replace(None);
            info!("signed out");
        }
    }
}
