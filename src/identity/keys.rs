//! Cached public signing keys for ID token verification.
//!
//! The secure-token service rotates its keys and advertises how long a key set may
//! be cached through `Cache-Control: max-age`. The store keeps the last fetched key
//! set, refreshes it once stale, and refreshes early when a token names an unknown
//! `kid`, at most once per cooldown. A failed refresh keeps the previous key set and
//! is not retried until the retry delay has passed.

use super::{
    error::TokenError,
    jwks::Jwks,
    token::{IdTokenClaims, verify_id_token},
};
use anyhow::{Context, Result, anyhow};
use reqwest::{Client, header::CACHE_CONTROL};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime},
};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use url::Url;

/// Public JWKS of the secure-token service that signs ID tokens.
pub const SECURE_TOKEN_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const DEFAULT_CACHE_TTL_SECONDS: u64 = 60 * 60;
const UNKNOWN_KID_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);
const FAILED_REFRESH_RETRY: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum KeySource {
    /// Keys supplied at construction and never refreshed.
    Static,
    /// Keys fetched from a JWKS URL and refreshed as needed.
    Remote { url: String, client: Client },
}

#[derive(Debug, Clone)]
struct KeyCache {
    jwks: Jwks,
    fetched_at: Instant,
    ttl: Duration,
    /// Why the last refresh failed; cleared by the next successful one.
    last_error: Option<String>,
}

impl KeyCache {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Verifies ID tokens against the identity provider's cached public keys.
#[derive(Debug)]
pub struct KeyStore {
    source: KeySource,
    cache: RwLock<KeyCache>,
    /// Held while fetching so concurrent stale requests share one fetch.
    refresh_lock: Mutex<()>,
    /// Unix seconds of the last unknown-`kid` refresh; 0 before the first.
    last_kid_refresh: AtomicU64,
    kid_refresh_cooldown: Duration,
    retry_after_failure: Duration,
}

impl KeyStore {
    fn with_source(source: KeySource, cache: KeyCache) -> Self {
        Self {
            source,
            cache: RwLock::new(cache),
            refresh_lock: Mutex::new(()),
            last_kid_refresh: AtomicU64::new(0),
            kid_refresh_cooldown: UNKNOWN_KID_REFRESH_COOLDOWN,
            retry_after_failure: FAILED_REFRESH_RETRY,
        }
    }

    /// Build from a fixed key set, no remote refresh.
    #[must_use]
    pub fn new_static(jwks: Jwks) -> Self {
        Self::with_source(
            KeySource::Static,
            KeyCache {
                jwks,
                fetched_at: Instant::now(),
                ttl: Duration::MAX,
                last_error: None,
            },
        )
    }

    /// Build a store that fetches keys from `url` on first use.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new_remote(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("Invalid JWKS URL: {url}"))?;
        if !matches!(parsed.scheme(), "https" | "http") {
            return Err(anyhow!("JWKS URL must use http(s): {url}"));
        }

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build JWKS HTTP client")?;

        // Start stale and empty so the first verification triggers a fetch.
        Ok(Self::with_source(
            KeySource::Remote {
                url: url.to_string(),
                client,
            },
            KeyCache {
                jwks: Jwks::default(),
                fetched_at: Instant::now(),
                ttl: Duration::ZERO,
                last_error: None,
            },
        ))
    }

    /// Minimum time between two refreshes triggered by unknown `kid`s (default 30 s).
    #[must_use]
    pub const fn with_kid_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.kid_refresh_cooldown = cooldown;
        self
    }

    /// How long a failed refresh is remembered before the next attempt (default 10 s).
    #[must_use]
    pub const fn with_retry_after_failure(mut self, delay: Duration) -> Self {
        self.retry_after_failure = delay;
        self
    }

    /// Return the JWKS URL when keys are fetched remotely.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match &self.source {
            KeySource::Static => None,
            KeySource::Remote { url, .. } => Some(url.as_str()),
        }
    }

    /// Verify `token` for `project_id` at the current time.
    ///
    /// # Errors
    /// Returns a [`TokenError`] describing the failed check.
    pub async fn verify_id_token(
        &self,
        token: &str,
        project_id: &str,
    ) -> Result<IdTokenClaims, TokenError> {
        self.verify_id_token_at(token, project_id, now_unix_seconds())
            .await
    }

    /// Verify `token` for `project_id` as of `now_unix_seconds`.
    ///
    /// # Errors
    /// Returns a [`TokenError`] describing the failed check.
    pub async fn verify_id_token_at(
        &self,
        token: &str,
        project_id: &str,
        now_unix_seconds: i64,
    ) -> Result<IdTokenClaims, TokenError> {
        let jwks = self.key_set().await?;
        match verify_id_token(token, &jwks, project_id, now_unix_seconds) {
            Err(TokenError::UnknownKid(kid)) => match self.refresh_on_unknown_kid().await {
                Some(jwks) => verify_id_token(token, &jwks, project_id, now_unix_seconds),
                None => Err(TokenError::UnknownKid(kid)),
            },
            other => other,
        }
    }

    /// Return a key set snapshot, refreshing it first when stale.
    async fn key_set(&self) -> Result<Jwks, TokenError> {
        if let Some(jwks) = self.cached_if_fresh().await? {
            return Ok(jwks);
        }

        let _refresh = self.refresh_lock.lock().await;
        // Another caller may have refreshed while this one waited for the lock.
        if let Some(jwks) = self.cached_if_fresh().await? {
            return Ok(jwks);
        }

        match self.refresh().await {
            Ok(jwks) => Ok(jwks),
            Err(err) => self.back_off(&err).await,
        }
    }

    async fn cached_if_fresh(&self) -> Result<Option<Jwks>, TokenError> {
        let cache = self.cache.read().await;
        if !cache.is_fresh() {
            return Ok(None);
        }
        match &cache.last_error {
            Some(err) if cache.jwks.keys.is_empty() => {
                Err(TokenError::KeysUnavailable(err.clone()))
            }
            _ => Ok(Some(cache.jwks.clone())),
        }
    }

    /// Remember a failed refresh so the next attempt waits for the retry delay.
    async fn back_off(&self, err: &anyhow::Error) -> Result<Jwks, TokenError> {
        let mut cache = self.cache.write().await;
        cache.fetched_at = Instant::now();
        cache.ttl = self.retry_after_failure;
        cache.last_error = Some(err.to_string());

        if cache.jwks.keys.is_empty() {
            return Err(TokenError::KeysUnavailable(err.to_string()));
        }
        warn!(
            error = %err,
            retry_seconds = self.retry_after_failure.as_secs(),
            "failed to refresh signing keys; using cached key set"
        );
        Ok(cache.jwks.clone())
    }

    /// Fetch the key set and replace the cache. Callers hold `refresh_lock`.
    async fn refresh(&self) -> Result<Jwks> {
        let KeySource::Remote { url, client } = &self.source else {
            return Ok(self.cache.read().await.jwks.clone());
        };

        let (jwks, max_age) = fetch_jwks(client, url).await?;
        let mut cache = self.cache.write().await;
        cache.jwks = jwks;
        cache.fetched_at = Instant::now();
        cache.ttl = max_age.unwrap_or(Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS));
        cache.last_error = None;
        info!(
            keys = cache.jwks.keys.len(),
            ttl_seconds = cache.ttl.as_secs(),
            "signing key cache refreshed"
        );
        Ok(cache.jwks.clone())
    }

    /// Refresh when a token names an unknown `kid`, at most once per cooldown.
    ///
    /// Returns the refreshed key set, or `None` when the refresh was suppressed or
    /// failed.
    async fn refresh_on_unknown_kid(&self) -> Option<Jwks> {
        if matches!(&self.source, KeySource::Static) {
            return None;
        }

        let now = now_unix_seconds_u64();
        let last = self.last_kid_refresh.load(Ordering::Acquire);
        if last != 0 && now.saturating_sub(last) < self.kid_refresh_cooldown.as_secs() {
            return None;
        }
        // Only the caller that wins the exchange refreshes; the others keep their error.
        if self
            .last_kid_refresh
            .compare_exchange(last, now.max(1), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let _refresh = self.refresh_lock.lock().await;
        match self.refresh().await {
            Ok(jwks) => Some(jwks),
            Err(err) => {
                warn!(error = %err, "signing key refresh on unknown kid failed");
                None
            }
        }
    }
}

async fn fetch_jwks(client: &Client, url: &str) -> Result<(Jwks, Option<Duration>)> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch JWKS from {url}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("JWKS fetch from {url} failed with status {status}"));
    }

    let max_age = response
        .headers()
        .get(CACHE_CONTROL)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_max_age);

    let jwks: Jwks = response.json().await.context("Invalid JWKS JSON")?;
    if jwks.keys.is_empty() {
        return Err(anyhow!("JWKS from {url} contains no keys"));
    }
    Ok((jwks, max_age))
}

/// Extract `max-age` from a `Cache-Control` header value.
fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().parse::<u64>().ok().map(Duration::from_secs)
        } else {
            None
        }
    })
}

/// Unix seconds for token expiry validation.
pub(crate) fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn now_unix_seconds_u64() -> u64 {
    u64::try_from(now_unix_seconds()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{decode_private_key, sign_rs256};
    use crate::test_support::{
        NOW, TEST_KID, TEST_PRIVATE_KEY_PEM, TEST_PROJECT_ID, id_token_claims, signed_id_token,
        test_jwks,
    };
    use axum::{
        Json, Router,
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
    };
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize},
    };
    use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

    /// Key set served by the local JWKS endpoint; swappable between requests.
    struct ServedKeys {
        jwks: std::sync::Mutex<Jwks>,
        cache_control: &'static str,
        healthy: AtomicBool,
        hits: AtomicUsize,
    }

    impl ServedKeys {
        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        fn rotate(&self, jwks: Jwks) {
            if let Ok(mut current) = self.jwks.lock() {
                *current = jwks;
            }
        }
    }

    async fn serve_keys(State(keys): State<Arc<ServedKeys>>) -> Response {
        keys.hits.fetch_add(1, Ordering::SeqCst);
        if !keys.healthy.load(Ordering::SeqCst) {
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
        let jwks = keys
            .jwks
            .lock()
            .map(|jwks| jwks.clone())
            .unwrap_or_default();
        ([(CACHE_CONTROL, keys.cache_control)], Json(jwks)).into_response()
    }

    struct JwksServer {
        url: String,
        keys: Arc<ServedKeys>,
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    }

    impl JwksServer {
        async fn spawn(jwks: Jwks, cache_control: &'static str) -> anyhow::Result<Self> {
            let keys = Arc::new(ServedKeys {
                jwks: std::sync::Mutex::new(jwks),
                cache_control,
                healthy: AtomicBool::new(true),
                hits: AtomicUsize::new(0),
            });
            let app = Router::new()
                .route("/jwks", get(serve_keys))
                .with_state(keys.clone());
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let addr = listener.local_addr()?;
            let (stop, stopped) = oneshot::channel::<()>();
            let task = tokio::spawn(async move {
                let _ = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stopped.await;
                    })
                    .await;
            });
            Ok(Self {
                url: format!("http://{addr}/jwks"),
                keys,
                stop,
                task,
            })
        }

        async fn shut_down(self) -> anyhow::Result<()> {
            let _ = self.stop.send(());
            self.task.await?;
            Ok(())
        }
    }

    fn token_with_kid(kid: &str) -> anyhow::Result<String> {
        let key = decode_private_key(TEST_PRIVATE_KEY_PEM.as_bytes())?;
        Ok(sign_rs256(&key, Some(kid), &id_token_claims(NOW))?)
    }

    fn rotated_jwks() -> anyhow::Result<Jwks> {
        let mut jwks = test_jwks()?;
        jwks.keys.extend(
            Jwks::from_rsa_private_key_pem_or_der(TEST_PRIVATE_KEY_PEM.as_bytes(), "k2")?.keys,
        );
        Ok(jwks)
    }

    #[test]
    fn parse_max_age_reads_directive() {
        assert_eq!(
            parse_max_age("public, max-age=19302, must-revalidate, no-transform"),
            Some(Duration::from_secs(19302))
        );
        assert_eq!(parse_max_age("no-cache"), None);
        assert_eq!(parse_max_age("max-age=abc"), None);
    }

    #[tokio::test]
    async fn static_store_verifies_tokens() -> anyhow::Result<()> {
        let store = KeyStore::new_static(test_jwks()?);
        assert!(store.url().is_none());
        let token = signed_id_token(&id_token_claims(NOW))?;
        let claims = store
            .verify_id_token_at(&token, TEST_PROJECT_ID, NOW)
            .await?;
        assert_eq!(claims.sub, "uid-ada");
        Ok(())
    }

    #[tokio::test]
    async fn static_store_does_not_refresh_on_unknown_kid() -> anyhow::Result<()> {
        let store = KeyStore::new_static(Jwks::default());
        let token = signed_id_token(&id_token_claims(NOW))?;
        let result = store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await;
        assert!(matches!(result, Err(TokenError::UnknownKid(_))));
        Ok(())
    }

    #[tokio::test]
    async fn remote_store_reports_unreachable_keys() -> anyhow::Result<()> {
        // Port 9 (discard) on loopback refuses connections.
        let store = KeyStore::new_remote("http://127.0.0.1:9/jwks")?;
        let token = signed_id_token(&id_token_claims(NOW))?;
        let result = store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await;
        assert!(matches!(result, Err(TokenError::KeysUnavailable(_))));

        // The failure is remembered instead of refetched on every call.
        let result = store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await;
        assert!(matches!(result, Err(TokenError::KeysUnavailable(_))));
        Ok(())
    }

    #[test]
    fn new_remote_rejects_bad_urls() {
        assert!(KeyStore::new_remote("not a url").is_err());
        assert!(KeyStore::new_remote("ftp://keys.example.com/jwks").is_err());
    }

    #[tokio::test]
    async fn keys_are_cached_for_max_age() -> anyhow::Result<()> {
        let server = JwksServer::spawn(test_jwks()?, "public, max-age=600").await?;
        let store = KeyStore::new_remote(&server.url)?;
        let token = signed_id_token(&id_token_claims(NOW))?;

        store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await?;
        store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await?;
        assert_eq!(server.keys.hits(), 1);

        server.shut_down().await
    }

    #[tokio::test]
    async fn zero_max_age_refetches_each_time() -> anyhow::Result<()> {
        let server = JwksServer::spawn(test_jwks()?, "max-age=0").await?;
        let store = KeyStore::new_remote(&server.url)?;
        let token = signed_id_token(&id_token_claims(NOW))?;

        store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await?;
        store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await?;
        assert_eq!(server.keys.hits(), 2);

        server.shut_down().await
    }

    #[tokio::test]
    async fn concurrent_first_requests_share_one_fetch() -> anyhow::Result<()> {
        let server = JwksServer::spawn(test_jwks()?, "max-age=600").await?;
        let store = Arc::new(KeyStore::new_remote(&server.url)?);
        let token = signed_id_token(&id_token_claims(NOW))?;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await
                })
            })
            .collect();
        for task in tasks {
            task.await??;
        }
        assert_eq!(server.keys.hits(), 1);

        server.shut_down().await
    }

    #[tokio::test]
    async fn rotated_kid_verifies_after_refresh_once_per_cooldown() -> anyhow::Result<()> {
        let server = JwksServer::spawn(test_jwks()?, "max-age=600").await?;
        let store = KeyStore::new_remote(&server.url)?;

        store
            .verify_id_token_at(&token_with_kid(TEST_KID)?, TEST_PROJECT_ID, NOW)
            .await?;
        assert_eq!(server.keys.hits(), 1);

        server.keys.rotate(rotated_jwks()?);
        let claims = store
            .verify_id_token_at(&token_with_kid("k2")?, TEST_PROJECT_ID, NOW)
            .await?;
        assert_eq!(claims.sub, "uid-ada");
        assert_eq!(server.keys.hits(), 2);

        // A second unknown kid inside the cooldown does not hit the endpoint again.
        let result = store
            .verify_id_token_at(&token_with_kid("k3")?, TEST_PROJECT_ID, NOW)
            .await;
        assert!(matches!(result, Err(TokenError::UnknownKid(kid)) if kid == "k3"));
        assert_eq!(server.keys.hits(), 2);

        server.shut_down().await
    }

    #[tokio::test]
    async fn unknown_kid_refresh_resumes_after_cooldown() -> anyhow::Result<()> {
        let server = JwksServer::spawn(test_jwks()?, "max-age=600").await?;
        let store = KeyStore::new_remote(&server.url)?.with_kid_refresh_cooldown(Duration::ZERO);

        let result = store
            .verify_id_token_at(&token_with_kid("k2")?, TEST_PROJECT_ID, NOW)
            .await;
        assert!(matches!(result, Err(TokenError::UnknownKid(_))));
        assert_eq!(server.keys.hits(), 2);

        server.keys.rotate(rotated_jwks()?);
        store
            .verify_id_token_at(&token_with_kid("k2")?, TEST_PROJECT_ID, NOW)
            .await?;
        assert_eq!(server.keys.hits(), 3);

        server.shut_down().await
    }

    #[tokio::test]
    async fn failed_refresh_keeps_keys_and_backs_off() -> anyhow::Result<()> {
        let server = JwksServer::spawn(test_jwks()?, "max-age=0").await?;
        let store = KeyStore::new_remote(&server.url)?;
        let token = signed_id_token(&id_token_claims(NOW))?;

        store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await?;
        assert_eq!(server.keys.hits(), 1);

        server.keys.healthy.store(false, Ordering::SeqCst);
        store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await?;
        assert_eq!(server.keys.hits(), 2);

        // Inside the retry delay the cached set is used without another fetch.
        store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await?;
        assert_eq!(server.keys.hits(), 2);

        server.shut_down().await
    }

    #[tokio::test]
    async fn stale_keys_survive_endpoint_outage() -> anyhow::Result<()> {
        let server = JwksServer::spawn(test_jwks()?, "max-age=0").await?;
        let store = KeyStore::new_remote(&server.url)?;
        let token = signed_id_token(&id_token_claims(NOW))?;

        store.verify_id_token_at(&token, TEST_PROJECT_ID, NOW).await?;
        server.shut_down().await?;

        let claims = store
            .verify_id_token_at(&token, TEST_PROJECT_ID, NOW)
            .await?;
        assert_eq!(claims.sub, "uid-ada");
        Ok(())
    }
}
