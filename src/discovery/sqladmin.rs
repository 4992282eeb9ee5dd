//! SQL admin API instance lister.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::auth::{AuthenticatedClient, TokenExchange};
use crate::discovery::lister::{DatabaseInstance, InstanceLister};
use crate::discovery::DiscoveryError;

/// Public SQL admin API endpoint.
pub const DEFAULT_API_HOST: &str = "https://sqladmin.googleapis.com/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstancesListResponse {
    #[serde(default)]
    items: Vec<DatabaseInstance>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Lists instances through `sql/v1beta4/projects/{project}/instances`.
pub struct SqlAdminLister {
    base: Url,
    exchange: Arc<dyn TokenExchange>,
}

impl SqlAdminLister {
    /// Create a lister against `api_host` (default public endpoint when `None`).
    pub fn new(
        api_host: Option<&str>,
        exchange: Arc<dyn TokenExchange>,
    ) -> Result<Self, DiscoveryError> {
        let base = Url::parse(api_host.unwrap_or(DEFAULT_API_HOST))?;
        Ok(Self { base, exchange })
    }

    fn instances_url(&self, project: &str) -> Result<Url, DiscoveryError> {
        Ok(self
            .base
            .join(&format!("sql/v1beta4/projects/{project}/instances"))?)
    }
}

#[async_trait]
impl InstanceLister for SqlAdminLister {
    async fn list(
        &self,
        client: &AuthenticatedClient,
        project: &str,
    ) -> Result<Vec<DatabaseInstance>, DiscoveryError> {
        let url = self.instances_url(project)?;
        let token = client.bearer_token(self.exchange.as_ref()).await?;

        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = client.http().get(url.clone()).bearer_auth(&token);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page)]);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(DiscoveryError::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            let page: InstancesListResponse = response.json().await?;
            instances.extend(page.items);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        tracing::debug!(project = %project, count = instances.len(), "Listed instances");
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoExchange;

    #[test]
    fn builds_instances_url() {
        let lister = SqlAdminLister::new(None, Arc::new(NoExchange)).unwrap();
        assert_eq!(
            lister.instances_url("my-proj").unwrap().as_str(),
            "https://sqladmin.googleapis.com/sql/v1beta4/projects/my-proj/instances"
        );

        let lister =
            SqlAdminLister::new(Some("http://127.0.0.1:8080/api/"), Arc::new(NoExchange)).unwrap();
        assert_eq!(
            lister.instances_url("p").unwrap().as_str(),
            "http://127.0.0.1:8080/api/sql/v1beta4/projects/p/instances"
        );
    }

    #[test]
    fn parses_list_response() {
        let body = r#"{
            "kind": "sql#instancesList",
            "items": [
                {"project": "p", "region": "us-east1", "name": "db", "backendType": "SECOND_GEN", "state": "RUNNABLE"},
                {"project": "p", "region": "us-east1", "name": "old"}
            ],
            "nextPageToken": "abc"
        }"#;
        let page: InstancesListResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].is_supported());
        assert!(!page.items[1].is_supported());
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));

        let empty: InstancesListResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
    }
}
