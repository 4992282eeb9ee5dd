//! Push-style instance list discovery from the compute metadata server.

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::discovery::DiscoveryError;

/// Compute metadata server base URL.
pub const DEFAULT_METADATA_HOST: &str = "http://metadata.google.internal/computeMetadata/v1/";

/// Blocking subscription to a metadata value.
#[async_trait]
pub trait MetadataSubscriber: Send + Sync {
    /// Calls `on_update` with every new value of `source`.
    ///
    /// Returns only on error or when the subscription ends; the caller
    /// decides whether to resubscribe.
    async fn subscribe(
        &self,
        source: &str,
        on_update: &(dyn Fn(String) + Send + Sync),
    ) -> Result<(), DiscoveryError>;
}

/// Long-polls the metadata server with `wait_for_change`.
pub struct GceMetadataSubscriber {
    http: reqwest::Client,
    base: Url,
}

impl GceMetadataSubscriber {
    pub fn new(base: Option<&str>) -> Result<Self, DiscoveryError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: Url::parse(base.unwrap_or(DEFAULT_METADATA_HOST))?,
        })
    }
}

#[async_trait]
impl MetadataSubscriber for GceMetadataSubscriber {
    async fn subscribe(
        &self,
        source: &str,
        on_update: &(dyn Fn(String) + Send + Sync),
    ) -> Result<(), DiscoveryError> {
        let url = self.base.join(source.trim_start_matches('/'))?;
        let mut etag = String::from("0");
        let mut last: Option<String> = None;

        loop {
            let response = self
                .http
                .get(url.clone())
                .header("Metadata-Flavor", "Google")
                .query(&[("wait_for_change", "true"), ("last_etag", etag.as_str())])
                .send()
                .await?;

            match response.status() {
                StatusCode::OK => {}
                StatusCode::NOT_FOUND => {
                    return Err(DiscoveryError::Subscribe(format!(
                        "metadata key {source:?} is not defined"
                    )));
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(DiscoveryError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }
            }

            if let Some(tag) = response.headers().get("etag").and_then(|v| v.to_str().ok()) {
                etag = tag.to_string();
            }
            let value = response.text().await?;
            if last.as_deref() != Some(value.as_str()) {
                on_update(value.clone());
                last = Some(value);
            }
        }
    }
}
