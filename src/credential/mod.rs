//! Admin credential used to verify ID tokens and mint session cookies.
//!
//! The credential is resolved lazily, once per [`CredentialStore`], from the first
//! usable source in priority order:
//!
//! 1. a service-account blob (inline JSON, base64 JSON, or a key file path),
//! 2. discrete project id / client email / private key fields,
//! 3. ambient application-default credentials: a service-account key file or an
//!    `authorized_user` file, then the platform metadata server.
//!
//! A source that is configured but broken is logged and skipped, so a valid
//! lower-priority source still yields a credential. Once a credential is loaded it
//! is never replaced; a failed resolution is retried on the next request.
//!
//! Credentials holding a private key sign session cookies locally. Ambient
//! credentials without one ask the identity provider to mint the cookie, using an
//! OAuth access token.

mod error;
mod key_file;
mod oauth;
mod toolkit;

pub use error::CredentialError;
pub use key_file::normalize_private_key;
pub use oauth::{DEFAULT_METADATA_HOST, DEFAULT_TOKEN_URL};
pub use toolkit::DEFAULT_IDENTITY_TOOLKIT_URL;

use crate::identity::{
    IdTokenClaims, SessionCookieClaims, TokenError, decode_private_key, sign_rs256,
    verify_session_cookie,
};
use key_file::{AUTHORIZED_USER_TYPE, CredentialFile, SERVICE_ACCOUNT_TYPE};
use oauth::{AccessTokens, TokenGrant};
use reqwest::Client;
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use std::{env, fmt, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use toolkit::IdentityToolkit;
use tracing::{debug, info, warn};

/// Where a loaded credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    ServiceAccountKey,
    DiscreteFields,
    ApplicationDefault,
    MetadataServer,
}

impl CredentialKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServiceAccountKey => "service_account_key",
            Self::DiscreteFields => "discrete_fields",
            Self::ApplicationDefault => "application_default",
            Self::MetadataServer => "metadata_server",
        }
    }
}

/// How session cookies are minted for this credential.
enum CookieMinter {
    /// Signed here with the service account's private key.
    LocalKey {
        client_email: String,
        private_key_id: Option<String>,
        signing_key: RsaPrivateKey,
    },
    /// Minted by the identity provider on behalf of an OAuth identity.
    Provider {
        tokens: AccessTokens,
        toolkit: IdentityToolkit,
    },
}

pub struct AdminCredential {
    project_id: String,
    kind: CredentialKind,
    minter: CookieMinter,
}

impl AdminCredential {
    /// Build a credential from a PEM private key (PKCS#8 or PKCS#1).
    ///
    /// # Errors
    /// Returns an error if the key cannot be decoded or a field is empty.
    pub fn from_pem(
        project_id: impl Into<String>,
        client_email: impl Into<String>,
        private_key_id: Option<String>,
        private_key_pem: &str,
    ) -> Result<Self, CredentialError> {
        Self::from_key_parts(
            CredentialKind::DiscreteFields,
            project_id.into(),
            client_email.into(),
            private_key_id,
            private_key_pem,
        )
    }

    fn from_key_parts(
        kind: CredentialKind,
        project_id: String,
        client_email: String,
        private_key_id: Option<String>,
        private_key_pem: &str,
    ) -> Result<Self, CredentialError> {
        if project_id.trim().is_empty() {
            return Err(CredentialError::MissingField("project_id"));
        }
        if client_email.trim().is_empty() {
            return Err(CredentialError::MissingField("client_email"));
        }
        let pem = normalize_private_key(private_key_pem);
        let signing_key = decode_private_key(pem.as_bytes())
            .map_err(|err| CredentialError::PrivateKey(err.to_string()))?;
        Ok(Self {
            project_id,
            kind,
            minter: CookieMinter::LocalKey {
                client_email,
                private_key_id: private_key_id.filter(|id| !id.is_empty()),
                signing_key,
            },
        })
    }

    fn from_key_file(
        file: CredentialFile,
        kind: CredentialKind,
        fallback_project_id: Option<&str>,
    ) -> Result<Self, CredentialError> {
        if file.kind() != SERVICE_ACCOUNT_TYPE {
            return Err(CredentialError::UnsupportedType(file.kind().to_string()));
        }
        let project_id = file
            .project_id
            .or_else(|| fallback_project_id.map(ToString::to_string))
            .ok_or(CredentialError::MissingField("project_id"))?;
        let client_email = file
            .client_email
            .ok_or(CredentialError::MissingField("client_email"))?;
        let private_key = file
            .private_key
            .ok_or(CredentialError::MissingField("private_key"))?;
        Self::from_key_parts(
            kind,
            project_id,
            client_email,
            file.private_key_id,
            &private_key,
        )
    }

    fn with_provider_minter(
        kind: CredentialKind,
        project_id: String,
        tokens: AccessTokens,
        toolkit: IdentityToolkit,
    ) -> Self {
        Self {
            project_id,
            kind,
            minter: CookieMinter::Provider { tokens, toolkit },
        }
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Service-account email, for credentials that sign locally.
    #[must_use]
    pub fn client_email(&self) -> Option<&str> {
        match &self.minter {
            CookieMinter::LocalKey { client_email, .. } => Some(client_email),
            CookieMinter::Provider { .. } => None,
        }
    }

    #[must_use]
    pub fn private_key_id(&self) -> Option<&str> {
        match &self.minter {
            CookieMinter::LocalKey { private_key_id, .. } => private_key_id.as_deref(),
            CookieMinter::Provider { .. } => None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// Whether session cookies are signed in-process rather than by the provider.
    #[must_use]
    pub const fn signs_locally(&self) -> bool {
        matches!(self.minter, CookieMinter::LocalKey { .. })
    }

    /// Mint a session cookie value for an ID token that has already been verified.
    ///
    /// `id_token` is the raw token, forwarded when the provider mints the cookie;
    /// `claims` are its verified claims, used when signing locally.
    ///
    /// # Errors
    /// Returns an error if signing fails, or if the provider cannot be reached or
    /// rejects the token.
    pub async fn create_session_cookie(
        &self,
        id_token: &str,
        claims: &IdTokenClaims,
        ttl: Duration,
        now_unix_seconds: i64,
    ) -> Result<String, CredentialError> {
        match &self.minter {
            CookieMinter::LocalKey {
                private_key_id,
                signing_key,
                ..
            } => {
                let ttl_seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
                let claims = SessionCookieClaims::from_id_token(
                    &self.project_id,
                    claims,
                    now_unix_seconds,
                    ttl_seconds,
                );
                Ok(sign_rs256(signing_key, private_key_id.as_deref(), &claims)?)
            }
            CookieMinter::Provider { tokens, toolkit } => {
                let authorization = tokens.authorization().await?;
                toolkit
                    .create_session_cookie(&self.project_id, authorization, id_token, ttl)
                    .await
            }
        }
    }

    /// Verify a session cookie minted by this credential and return its claims.
    ///
    /// # Errors
    /// Returns [`TokenError::ProviderMinted`] for credentials whose cookies are
    /// signed by the identity provider, or the failed check otherwise.
    pub fn verify_session_cookie(
        &self,
        cookie: &str,
        now_unix_seconds: i64,
    ) -> Result<SessionCookieClaims, TokenError> {
        match &self.minter {
            CookieMinter::LocalKey { signing_key, .. } => verify_session_cookie(
                cookie,
                &RsaPublicKey::from(signing_key),
                &self.project_id,
                now_unix_seconds,
            ),
            CookieMinter::Provider { .. } => Err(TokenError::ProviderMinted),
        }
    }
}

impl fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("AdminCredential");
        debug
            .field("project_id", &self.project_id)
            .field("kind", &self.kind);
        match &self.minter {
            CookieMinter::LocalKey {
                client_email,
                private_key_id,
                ..
            } => debug
                .field("client_email", client_email)
                .field("private_key_id", private_key_id)
                .field("signing_key", &"***"),
            CookieMinter::Provider { tokens, toolkit } => debug
                .field("grant", &tokens.grant().as_str())
                .field("identity_toolkit", &toolkit.base_url),
        };
        debug.finish()
    }
}

/// Provider endpoints used by credentials that mint cookies remotely.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub oauth_token_url: String,
    pub identity_toolkit_url: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            oauth_token_url: DEFAULT_TOKEN_URL.to_string(),
            identity_toolkit_url: DEFAULT_IDENTITY_TOOLKIT_URL.to_string(),
        }
    }
}

/// Configured credential inputs, normally read from the environment by the CLI.
#[derive(Clone, Default)]
pub struct CredentialSources {
    pub service_account_key: Option<SecretString>,
    pub project_id: Option<String>,
    pub client_email: Option<String>,
    pub private_key: Option<SecretString>,
    pub application_credentials: Option<PathBuf>,
    /// Metadata server host or URL queried for ambient credentials; `None` skips it.
    pub metadata_server: Option<String>,
    pub endpoints: ProviderEndpoints,
}

impl CredentialSources {
    /// Resolve the first usable credential source.
    ///
    /// # Errors
    /// Returns [`CredentialError::NoSource`] when nothing is configured, or
    /// [`CredentialError::Exhausted`] listing why every configured source failed.
    pub async fn resolve(&self) -> Result<AdminCredential, CredentialError> {
        let mut failures = Vec::new();

        if let Some(blob) = non_empty_secret(self.service_account_key.as_ref()) {
            match CredentialFile::from_blob(blob).and_then(|file| {
                AdminCredential::from_key_file(
                    file,
                    CredentialKind::ServiceAccountKey,
                    self.project_id.as_deref(),
                )
            }) {
                Ok(credential) => return Ok(credential),
                Err(err) => {
                    warn!(source = "service_account_key", error = %err, "skipping credential source");
                    failures.push(format!("service account key: {err}"));
                }
            }
        }

        match self.discrete_fields() {
            Some(Ok((project_id, client_email, private_key))) => {
                match AdminCredential::from_key_parts(
                    CredentialKind::DiscreteFields,
                    project_id.to_string(),
                    client_email.to_string(),
                    None,
                    private_key,
                ) {
                    Ok(credential) => return Ok(credential),
                    Err(err) => {
                        warn!(source = "discrete_fields", error = %err, "skipping credential source");
                        failures.push(format!("discrete fields: {err}"));
                    }
                }
            }
            Some(Err(err)) => {
                warn!(source = "discrete_fields", error = %err, "skipping credential source");
                failures.push(format!("discrete fields: {err}"));
            }
            None => {}
        }

        if let Some(path) = &self.application_credentials {
            match CredentialFile::from_file(path).and_then(|file| self.application_default(file)) {
                Ok(credential) => return Ok(credential),
                Err(err) => {
                    warn!(
                        source = "application_default",
                        path = %path.display(),
                        error = %err,
                        "skipping credential source"
                    );
                    failures.push(format!("application default credentials: {err}"));
                }
            }
        }

        if let Some(host) = non_empty(self.metadata_server.as_deref()) {
            match self.metadata_credential(host).await {
                Ok(Some(credential)) => return Ok(credential),
                Ok(None) => debug!(host, "no metadata server; skipping ambient credentials"),
                Err(err) => {
                    warn!(source = "metadata_server", error = %err, "skipping credential source");
                    failures.push(format!("metadata server: {err}"));
                }
            }
        }

        if failures.is_empty() {
            Err(CredentialError::NoSource)
        } else {
            Err(CredentialError::Exhausted(failures.join("; ")))
        }
    }

    /// The project id / client email / private key triple, when any part is set.
    fn discrete_fields(&self) -> Option<Result<(&str, &str, &str), CredentialError>> {
        let project_id = non_empty(self.project_id.as_deref());
        let client_email = non_empty(self.client_email.as_deref());
        let private_key = non_empty_secret(self.private_key.as_ref());

        match (project_id, client_email, private_key) {
            (Some(project_id), Some(client_email), Some(private_key)) => {
                Some(Ok((project_id, client_email, private_key)))
            }
            // A bare project id is a hint for the other sources, not a credential.
            (_, None, None) => None,
            (None, _, _) => Some(Err(CredentialError::MissingField("project_id"))),
            (_, None, _) => Some(Err(CredentialError::MissingField("client_email"))),
            (_, _, None) => Some(Err(CredentialError::MissingField("private_key"))),
        }
    }

    fn application_default(&self, file: CredentialFile) -> Result<AdminCredential, CredentialError> {
        let kind = file.kind().to_string();
        match kind.as_str() {
            SERVICE_ACCOUNT_TYPE => AdminCredential::from_key_file(
                file,
                CredentialKind::ApplicationDefault,
                self.project_id.as_deref(),
            ),
            AUTHORIZED_USER_TYPE => self.authorized_user(file),
            other => Err(CredentialError::UnsupportedType(other.to_string())),
        }
    }

    /// `gcloud auth application-default login` credentials.
    fn authorized_user(&self, file: CredentialFile) -> Result<AdminCredential, CredentialError> {
        // An explicit project id wins over the file's quota project.
        let project_id = non_empty(self.project_id.as_deref())
            .map(ToString::to_string)
            .or_else(|| file.quota_project_id.clone())
            .filter(|project_id| !project_id.trim().is_empty())
            .ok_or(CredentialError::MissingField("project_id"))?;
        let grant = TokenGrant::RefreshToken {
            token_url: self.endpoints.oauth_token_url.clone(),
            client_id: file
                .client_id
                .ok_or(CredentialError::MissingField("client_id"))?,
            client_secret: file
                .client_secret
                .map(SecretString::from)
                .ok_or(CredentialError::MissingField("client_secret"))?,
            refresh_token: file
                .refresh_token
                .map(SecretString::from)
                .ok_or(CredentialError::MissingField("refresh_token"))?,
        };

        let client = provider_client()?;
        Ok(AdminCredential::with_provider_minter(
            CredentialKind::ApplicationDefault,
            project_id,
            AccessTokens::new(client.clone(), grant),
            IdentityToolkit {
                client,
                base_url: self.endpoints.identity_toolkit_url.clone(),
                quota_project: file.quota_project_id,
            },
        ))
    }

    /// Service account attached to the runtime, when a metadata server answers.
    async fn metadata_credential(&self, host: &str) -> Result<Option<AdminCredential>, CredentialError> {
        let base_url = oauth::metadata_base_url(host);
        let client = provider_client()?;
        if !oauth::metadata_server_available(&client, &base_url).await {
            return Ok(None);
        }

        let project_id = match non_empty(self.project_id.as_deref()) {
            Some(project_id) => project_id.to_string(),
            None => oauth::metadata_project_id(&client, &base_url).await?,
        };

        Ok(Some(AdminCredential::with_provider_minter(
            CredentialKind::MetadataServer,
            project_id,
            AccessTokens::new(client.clone(), TokenGrant::Metadata { base_url }),
            IdentityToolkit {
                client,
                base_url: self.endpoints.identity_toolkit_url.clone(),
                quota_project: None,
            },
        )))
    }
}

impl fmt::Debug for CredentialSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSources")
            .field(
                "service_account_key",
                &self.service_account_key.as_ref().map(|_| "***"),
            )
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .field("application_credentials", &self.application_credentials)
            .field("metadata_server", &self.metadata_server)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn non_empty_secret(value: Option<&SecretString>) -> Option<&str> {
    non_empty(value.map(ExposeSecret::expose_secret))
}

fn provider_client() -> Result<Client, CredentialError> {
    Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|err| CredentialError::Provider(format!("failed to build HTTP client: {err}")))
}

/// Well-known location of gcloud application-default credentials, if present.
#[must_use]
pub fn well_known_application_credentials() -> Option<PathBuf> {
    let base = if cfg!(windows) {
        PathBuf::from(env::var_os("APPDATA")?).join("gcloud")
    } else {
        PathBuf::from(env::var_os("HOME")?).join(".config").join("gcloud")
    };
    let path = base.join("application_default_credentials.json");
    path.is_file().then_some(path)
}

/// Initialize-once holder for the process admin credential.
///
/// Concurrent first callers wait on a single resolution; every caller then shares
/// the same [`AdminCredential`].
#[derive(Debug)]
pub struct CredentialStore {
    sources: CredentialSources,
    credential: OnceCell<Arc<AdminCredential>>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(sources: CredentialSources) -> Self {
        Self {
            sources,
            credential: OnceCell::new(),
        }
    }

    /// A store that already holds `credential`.
    #[must_use]
    pub fn with_credential(credential: AdminCredential) -> Self {
        Self {
            sources: CredentialSources::default(),
            credential: OnceCell::new_with(Some(Arc::new(credential))),
        }
    }

    /// Return the loaded credential, resolving it on first use.
    ///
    /// # Errors
    /// Returns an error if no credential source is usable.
    pub async fn get_or_init(&self) -> Result<Arc<AdminCredential>, CredentialError> {
        self.credential
            .get_or_try_init(|| async {
                let credential = self.sources.resolve().await?;
                info!(
                    source = credential.kind().as_str(),
                    project_id = credential.project_id(),
                    signs_locally = credential.signs_locally(),
                    "admin credential initialized"
                );
                Ok::<_, CredentialError>(Arc::new(credential))
            })
            .await
            .cloned()
    }

    /// Return the credential if it has been initialized.
    #[must_use]
    pub fn get(&self) -> Option<Arc<AdminCredential>> {
        self.credential.get().cloned()
    }
}
