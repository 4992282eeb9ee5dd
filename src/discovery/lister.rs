//! Project-wide instance listing.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinSet;

use crate::auth::AuthenticatedClient;
use crate::discovery::DiscoveryError;

/// Backend generation the proxy supports.
pub const SUPPORTED_BACKEND: &str = "SECOND_GEN";

/// One database instance as reported by the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInstance {
    pub project: String,
    pub region: String,
    pub name: String,
    #[serde(default)]
    pub backend_type: String,
}

impl DatabaseInstance {
    /// `project:region:name`.
    pub fn connection_name(&self) -> String {
        format!("{}:{}:{}", self.project, self.region, self.name)
    }

    pub fn is_supported(&self) -> bool {
        self.backend_type == SUPPORTED_BACKEND
    }
}

/// Lists the instances of one project.
#[async_trait]
pub trait InstanceLister: Send + Sync {
    async fn list(
        &self,
        client: &AuthenticatedClient,
        project: &str,
    ) -> Result<Vec<DatabaseInstance>, DiscoveryError>;
}

/// List supported endpoints across `projects`, one concurrent request per project.
///
/// Fails only when nothing was found in any project. No projects means no
/// endpoints and no error. Dropping the returned future aborts the requests
/// still in flight.
pub async fn list_endpoints(
    lister: Arc<dyn InstanceLister>,
    client: &AuthenticatedClient,
    projects: &[String],
) -> Result<Vec<String>, DiscoveryError> {
    if projects.is_empty() {
        return Ok(Vec::new());
    }

    let mut requests = JoinSet::new();
    for project in projects {
        let lister = Arc::clone(&lister);
        let client = client.clone();
        let project = project.clone();
        requests.spawn(async move {
            let result = lister.list(&client, &project).await;
            (project, result)
        });
    }

    let mut endpoints = Vec::new();
    while let Some(joined) = requests.join_next().await {
        match joined {
            Ok((_, Ok(instances))) => endpoints.extend(
                instances
                    .iter()
                    .filter(|i| i.is_supported())
                    .map(DatabaseInstance::connection_name),
            ),
            Ok((project, Err(e))) => {
                tracing::error!(project = %project, error = %e, "Error listing instances");
            }
            Err(e) => tracing::error!(error = %e, "Instance listing task failed"),
        }
    }

    if endpoints.is_empty() {
        return Err(DiscoveryError::NoInstances {
            projects: projects.to_vec(),
        });
    }
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{resolve, AmbientEnv, AuthConfig};
    use std::collections::HashMap;

    struct FakeLister(HashMap<&'static str, Result<Vec<DatabaseInstance>, ()>>);

    #[async_trait]
    impl InstanceLister for FakeLister {
        async fn list(
            &self,
            _client: &AuthenticatedClient,
            project: &str,
        ) -> Result<Vec<DatabaseInstance>, DiscoveryError> {
            match self.0.get(project) {
                Some(Ok(list)) => Ok(list.clone()),
                _ => Err(DiscoveryError::Subscribe("boom".into())),
            }
        }
    }

    fn instance(project: &str, name: &str, backend: &str) -> DatabaseInstance {
        DatabaseInstance {
            project: project.into(),
            region: "us-central1".into(),
            name: name.into(),
            backend_type: backend.into(),
        }
    }

    async fn client() -> AuthenticatedClient {
        resolve(&AuthConfig::token("t"), &AmbientEnv::empty()).await.unwrap()
    }

    #[tokio::test]
    async fn partial_failures_are_skipped() {
        let lister = FakeLister(HashMap::from([
            (
                "a",
                Ok(vec![
                    instance("a", "db1", "SECOND_GEN"),
                    instance("a", "legacy", "FIRST_GEN"),
                ]),
            ),
            ("b", Err(())),
            ("c", Ok(vec![instance("c", "db2", "SECOND_GEN")])),
        ]));

        let mut endpoints = list_endpoints(
            Arc::new(lister),
            &client().await,
            &["a".into(), "b".into(), "c".into()],
        )
        .await
        .unwrap();
        endpoints.sort();

        assert_eq!(endpoints, vec!["a:us-central1:db1", "c:us-central1:db2"]);
    }

    #[tokio::test]
    async fn nothing_found_is_an_error() {
        let lister = FakeLister(HashMap::from([("a", Err(()))]));
        let err = list_endpoints(Arc::new(lister), &client().await, &["a".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoInstances { .. }));
    }

    #[tokio::test]
    async fn no_projects_is_empty() {
        let lister = FakeLister(HashMap::new());
        let endpoints = list_endpoints(Arc::new(lister), &client().await, &[])
            .await
            .unwrap();
        assert!(endpoints.is_empty());
    }

    struct HangingLister(tokio::sync::Notify);

    #[async_trait]
    impl InstanceLister for HangingLister {
        async fn list(
            &self,
            _client: &AuthenticatedClient,
            _project: &str,
        ) -> Result<Vec<DatabaseInstance>, DiscoveryError> {
            self.0.notify_one();
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn dropping_the_listing_aborts_requests() {
        let lister = Arc::new(HangingLister(tokio::sync::Notify::new()));
        let client = client().await;

        let projects: [String; 2] = ["a".into(), "b".into()];
        let listing = list_endpoints(lister.clone(), &client, &projects);
        tokio::select! {
            _ = listing => panic!("listing should hang"),
            _ = lister.0.notified() => {}
        }

        for _ in 0..50 {
            if Arc::strong_count(&lister) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&lister), 1);
    }
}
