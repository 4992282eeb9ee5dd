//! Credential resolution subsystem.
//!
//! # Data Flow
//! ```text
//! AuthConfig (inline json / file / token) + AmbientEnv
//!     → resolver.rs (priority order, first match wins)
//!         1. inline JSON blob
//!         2. credential file path
//!         3. bearer token
//!         4. GOOGLE_APPLICATION_CREDENTIALS file
//!         5. gcloud CLI credential (gcloud.rs)
//!         6. application default credential file
//!     → credentials.rs (service account first, generic parse second)
//!     → AuthenticatedClient (owned by one instance)
//! ```
//!
//! # Design Decisions
//! - Resolution is a pure function of its inputs; ambient state is injected
//! - Explicit sources never fall back; only the ambient chain does
//! - OAuth token exchange is an external collaborator ([`TokenExchange`])

pub mod credentials;
pub mod gcloud;
pub mod resolver;

use async_trait::async_trait;
use thiserror::Error;

pub use credentials::{Credentials, ServiceAccountKey};
pub use resolver::{resolve, AmbientEnv, AuthConfig, AuthenticatedClient, CredentialSource};

/// OAuth scope required by the SQL admin API.
pub const SQL_SCOPE: &str = "https://www.googleapis.com/auth/sqlservice.admin";

/// Errors produced while resolving or using credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials from {origin}: {reason}")]
    Invalid { origin: String, reason: String },

    #[error("failed to read credential file {}: {err}", .path.display())]
    Read {
        path: std::path::PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("gcloud credential unavailable: {0}")]
    Cli(String),

    #[error("no usable credentials found (tried: {attempted})")]
    NoCredentials { attempted: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("no token exchange available for {0} credentials")]
    ExchangeUnavailable(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),
}

/// Exchanges long-lived credentials for an OAuth access token carrying `scope`.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn access_token(&self, credentials: &Credentials, scope: &str)
        -> Result<String, AuthError>;
}

/// Exchange used when none is configured. Only static tokens work.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExchange;

#[async_trait]
impl TokenExchange for NoExchange {
    async fn access_token(
        &self,
        credentials: &Credentials,
        _scope: &str,
    ) -> Result<String, AuthError> {
        Err(AuthError::ExchangeUnavailable(credentials.kind().to_string()))
    }
}
