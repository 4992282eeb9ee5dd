//! gcloud CLI credential source.
//!
//! Runs `gcloud config config-helper --format=json` and reads the access
//! token the CLI currently holds for its active account.

use std::path::Path;

use tokio::process::Command;

use crate::auth::AuthError;

/// Fetch the active access token from the gcloud CLI.
pub async fn cli_access_token(binary: &Path) -> Result<String, AuthError> {
    let output = Command::new(binary)
        .args(["config", "config-helper", "--format=json"])
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AuthError::Cli(format!("failed to run {}: {e}", binary.display())))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AuthError::Cli(format!(
            "{} exited with {}: {}",
            binary.display(),
            output.status,
            stderr.trim()
        )));
    }

    parse_config_helper(&output.stdout)
}

/// Extract `credential.access_token` from config-helper output.
pub fn parse_config_helper(stdout: &[u8]) -> Result<String, AuthError> {
    let value: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| AuthError::Cli(format!("unparseable config-helper output: {e}")))?;

    value
        .pointer("/credential/access_token")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AuthError::Cli("config-helper output has no access token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_access_token() {
        let out = br#"{"configuration":{"active_configuration":"default"},"credential":{"access_token":"ya29.abc","token_expiry":"2030-01-01T00:00:00Z"}}"#;
        assert_eq!(parse_config_helper(out).unwrap(), "ya29.abc");
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(parse_config_helper(br#"{"credential":{}}"#).is_err());
        assert!(parse_config_helper(b"garbage").is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let err = cli_access_token(Path::new("/nonexistent/gcloud")).await.unwrap_err();
        assert!(matches!(err, AuthError::Cli(_)));
    }
}
