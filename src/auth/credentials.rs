//! Credential document parsing.

use std::fmt;

use serde::Deserialize;

/// Credential `type` values accepted by the generic parse.
const GENERIC_TYPES: &[&str] = &[
    "authorized_user",
    "external_account",
    "external_account_authorized_user",
    "impersonated_service_account",
    "gdch_service_account",
];

/// A service account key file.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub kind: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("project_id", &self.project_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Resolved credential material.
#[derive(Clone)]
pub enum Credentials {
    /// Service account key; identifies a principal.
    ServiceAccount(ServiceAccountKey),
    /// Any other recognised credential document.
    Generic {
        kind: String,
        document: serde_json::Value,
    },
    /// Pre-issued OAuth access token.
    AccessToken(String),
}

impl Credentials {
    /// Short label for logs and errors.
    pub fn kind(&self) -> &str {
        match self {
            Credentials::ServiceAccount(_) => "service_account",
            Credentials::Generic { kind, .. } => kind,
            Credentials::AccessToken(_) => "access_token",
        }
    }

    /// The service account email, when known.
    pub fn principal(&self) -> Option<&str> {
        match self {
            Credentials::ServiceAccount(key) => Some(&key.client_email),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ServiceAccount(key) => f.debug_tuple("ServiceAccount").field(key).finish(),
            Credentials::Generic { kind, .. } => {
                f.debug_struct("Generic").field("kind", kind).finish_non_exhaustive()
            }
            Credentials::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
        }
    }
}

/// Try the document as a service account key.
pub fn parse_service_account(bytes: &[u8]) -> Option<ServiceAccountKey> {
    let key: ServiceAccountKey = serde_json::from_slice(bytes).ok()?;
    let usable = key.kind == "service_account"
        && !key.client_email.is_empty()
        && !key.private_key.is_empty();
    usable.then_some(key)
}

/// Parse a credential document: service account first, then any recognised type.
pub fn parse_credentials(bytes: &[u8]) -> Result<Credentials, String> {
    if let Some(key) = parse_service_account(bytes) {
        return Ok(Credentials::ServiceAccount(key));
    }

    let document: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| format!("invalid json: {e}"))?;
    let kind = document
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| "missing credential type".to_string())?
        .to_string();

    if kind == "service_account" {
        return Err("service account key is missing client_email or private_key".to_string());
    }
    if !GENERIC_TYPES.contains(&kind.as_str()) {
        return Err(format!("unsupported credential type {kind:?}"));
    }

    Ok(Credentials::Generic { kind, document })
}
