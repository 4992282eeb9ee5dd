//! Backend dialing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::config::ManagerConfig;
use crate::runtime::RuntimeError;

/// Opens a stream to the backend behind an endpoint id.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, endpoint: &str) -> Result<TcpStream, RuntimeError>;
}

/// Dials fixed `host:port` addresses from the `[backends]` table.
#[derive(Debug, Clone)]
pub struct StaticDialer {
    routes: HashMap<String, String>,
    timeout: Duration,
}

impl StaticDialer {
    pub fn new(routes: impl IntoIterator<Item = (String, String)>, timeout: Duration) -> Self {
        Self {
            routes: routes.into_iter().collect(),
            timeout,
        }
    }

    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::new(
            config.backends.clone(),
            config.timeouts.dial_timeout(),
        )
    }
}

#[async_trait]
impl Dialer for StaticDialer {
    async fn dial(&self, endpoint: &str) -> Result<TcpStream, RuntimeError> {
        let addr = self
            .routes
            .get(endpoint)
            .ok_or_else(|| RuntimeError::UnknownEndpoint(endpoint.to_string()))?;

        tokio::time::timeout(self.timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| RuntimeError::DialTimeout(endpoint.to_string()))?
            .map_err(|source| RuntimeError::Dial {
                endpoint: endpoint.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dials_known_endpoint() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = backend.local_addr().unwrap();
        let dialer = StaticDialer::new(
            [("p:r:db".to_string(), addr.to_string())],
            Duration::from_secs(1),
        );

        let stream = dialer.dial("p:r:db").await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn unknown_endpoint_is_an_error() {
        let dialer = StaticDialer::new([], Duration::from_secs(1));
        assert!(matches!(
            dialer.dial("p:r:missing").await,
            Err(RuntimeError::UnknownEndpoint(_))
        ));
    }
}
