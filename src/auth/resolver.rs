//! Credential source selection.
//!
//! # Responsibilities
//! - Pick the first configured credential source in priority order
//! - Parse it into [`Credentials`] and wrap it in an HTTP client
//! - Report which source was used (principal email when known)

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth::credentials::{parse_credentials, Credentials};
use crate::auth::gcloud::cli_access_token;
use crate::auth::{AuthError, TokenExchange, SQL_SCOPE};

/// Well-known application default credential file name.
const ADC_FILE: &str = "application_default_credentials.json";

/// Explicit authentication material for one instance.
///
/// Empty strings are treated as absent so callers crossing the native
/// boundary can pass `""` for unused parameters.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub token_json: Option<String>,
    pub token_file: Option<PathBuf>,
    pub token: Option<String>,
}

impl AuthConfig {
    /// Inline credential JSON.
    pub fn json(json: impl Into<String>) -> Self {
        Self {
            token_json: non_empty(json.into()),
            ..Self::default()
        }
    }

    /// Credential file path.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            token_file: non_empty(path.into()).map(PathBuf::from),
            ..Self::default()
        }
    }

    /// Pre-issued bearer token.
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: non_empty(token.into()),
            ..Self::default()
        }
    }

    /// No explicit material; rely on the ambient chain.
    pub fn ambient() -> Self {
        Self::default()
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_json", &self.token_json.as_ref().map(|_| "<redacted>"))
            .field("token_file", &self.token_file)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Ambient credential locations, captured once from the process environment.
#[derive(Debug, Clone, Default)]
pub struct AmbientEnv {
    /// `GOOGLE_APPLICATION_CREDENTIALS`.
    pub credential_file: Option<PathBuf>,
    /// gcloud binary used for the CLI credential.
    pub cli_tool: Option<PathBuf>,
    /// Application default credential file.
    pub default_credential_file: Option<PathBuf>,
}

impl AmbientEnv {
    /// No ambient sources at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read ambient sources from the environment.
    pub fn from_process_env() -> Self {
        let credential_file = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let gcloud_dir = std::env::var_os("CLOUDSDK_CONFIG")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(default_gcloud_dir);

        Self {
            credential_file,
            cli_tool: Some(PathBuf::from(if cfg!(windows) { "gcloud.cmd" } else { "gcloud" })),
            default_credential_file: gcloud_dir.map(|dir| dir.join(ADC_FILE)),
        }
    }
}

fn default_gcloud_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("APPDATA").map(|d| PathBuf::from(d).join("gcloud"))
    } else {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config").join("gcloud"))
    }
}

/// Where the resolved credentials came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    InlineJson,
    File(PathBuf),
    Token,
    EnvironmentFile(PathBuf),
    CliTool,
    ApplicationDefault(PathBuf),
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::InlineJson => f.write_str("credential json"),
            CredentialSource::File(p) => write!(f, "credential file {}", p.display()),
            CredentialSource::Token => f.write_str("token"),
            CredentialSource::EnvironmentFile(p) => {
                write!(f, "GOOGLE_APPLICATION_CREDENTIALS file {}", p.display())
            }
            CredentialSource::CliTool => f.write_str("gcloud credential"),
            CredentialSource::ApplicationDefault(p) => {
                write!(f, "application default credentials {}", p.display())
            }
        }
    }
}

/// An HTTP client bound to one instance's credentials.
#[derive(Clone)]
pub struct AuthenticatedClient {
    http: reqwest::Client,
    credentials: Arc<Credentials>,
    source: CredentialSource,
}

impl AuthenticatedClient {
    fn new(credentials: Credentials, source: CredentialSource) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("sqlproxy-manager/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            credentials: Arc::new(credentials),
            source,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    /// Bearer token for SQL admin calls, exchanging credentials when needed.
    pub async fn bearer_token(&self, exchange: &dyn TokenExchange) -> Result<String, AuthError> {
        match self.credentials.as_ref() {
            Credentials::AccessToken(token) => Ok(token.clone()),
            other => exchange.access_token(other, SQL_SCOPE).await,
        }
    }
}

impl fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("credentials", &self.credentials)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Resolve credentials for one instance.
pub async fn resolve(
    config: &AuthConfig,
    ambient: &AmbientEnv,
) -> Result<AuthenticatedClient, AuthError> {
    if let Some(json) = &config.token_json {
        return from_document(json.as_bytes(), CredentialSource::InlineJson);
    }
    if let Some(path) = &config.token_file {
        return from_path(path, CredentialSource::File(path.clone())).await;
    }
    if let Some(token) = &config.token {
        tracing::info!("Using token for authentication");
        return AuthenticatedClient::new(
            Credentials::AccessToken(token.clone()),
            CredentialSource::Token,
        );
    }
    if let Some(path) = &ambient.credential_file {
        return from_path(path, CredentialSource::EnvironmentFile(path.clone())).await;
    }

    let mut attempted = Vec::new();

    if let Some(binary) = &ambient.cli_tool {
        match cli_access_token(binary).await {
            Ok(token) => {
                tracing::info!("Using gcloud credential for authentication");
                return AuthenticatedClient::new(
                    Credentials::AccessToken(token),
                    CredentialSource::CliTool,
                );
            }
            Err(e) => {
                tracing::debug!(error = %e, "gcloud credential unavailable");
                attempted.push(format!("{}: {e}", CredentialSource::CliTool));
            }
        }
    }

    if let Some(path) = &ambient.default_credential_file {
        let source = CredentialSource::ApplicationDefault(path.clone());
        if path.exists() {
            return from_path(path, source).await;
        }
        attempted.push(format!("{source}: not found"));
    }

    Err(AuthError::NoCredentials {
        attempted: if attempted.is_empty() {
            "no sources configured".to_string()
        } else {
            attempted.join("; ")
        },
    })
}

async fn from_path(
    path: &Path,
    source: CredentialSource,
) -> Result<AuthenticatedClient, AuthError> {
    let bytes = tokio::fs::read(path).await.map_err(|err| AuthError::Read {
        path: path.to_path_buf(),
        err,
    })?;
    from_document(&bytes, source)
}

fn from_document(bytes: &[u8], source: CredentialSource) -> Result<AuthenticatedClient, AuthError> {
    let credentials = parse_credentials(bytes).map_err(|reason| AuthError::Invalid {
        origin: source.to_string(),
        reason,
    })?;

    match credentials.principal() {
        Some(email) => tracing::info!(email = %email, source = %source, "Using service account for authentication"),
        None => tracing::info!(kind = credentials.kind(), source = %source, "Using credentials for authentication"),
    }

    AuthenticatedClient::new(credentials, source)
}
