//! Cancellable metadata watch loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::discovery::metadata::MetadataSubscriber;
use crate::discovery::DiscoveryError;

/// Subscribe to `source` forever, forwarding every value to `updates`.
///
/// Any subscription failure is logged and handed to `on_error`, then the loop
/// waits `backoff` and resubscribes. Cancellation is checked before each
/// subscription, while subscribed, and during the backoff wait.
pub async fn watch<F>(
    subscriber: Arc<dyn MetadataSubscriber>,
    source: String,
    updates: mpsc::UnboundedSender<String>,
    backoff: Duration,
    cancel: CancellationToken,
    on_error: F,
) where
    F: Fn(&DiscoveryError) + Send,
{
    let on_update = move |value: String| {
        let _ = updates.send(value);
    };

    tracing::debug!(source = %source, "Metadata watch started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = subscriber.subscribe(&source, &on_update) => result,
        };
        if let Err(e) = result {
            tracing::error!(source = %source, error = %e, "Error on receiving new instances from metadata");
            on_error(&e);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
    }
    tracing::debug!(source = %source, "Metadata watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        attempts: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl MetadataSubscriber for Scripted {
        async fn subscribe(
            &self,
            _source: &str,
            on_update: &(dyn Fn(String) + Send + Sync),
        ) -> Result<(), DiscoveryError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DiscoveryError::Subscribe("unavailable".into()));
            }
            on_update(format!("p:r:db{n}"));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_backoff() {
        let subscriber = Arc::new(Scripted {
            attempts: AtomicU32::new(0),
            fail: true,
        });
        let errors = Arc::new(AtomicU32::new(0));
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let seen = errors.clone();
        let handle = tokio::spawn(watch(
            subscriber.clone(),
            "instance/attributes/instances".into(),
            tx,
            Duration::from_secs(3600),
            cancel.clone(),
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        ));

        while subscriber.attempts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watch should exit promptly")
            .unwrap();
        assert_eq!(subscriber.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_after_backoff() {
        let subscriber = Arc::new(Scripted {
            attempts: AtomicU32::new(0),
            fail: false,
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watch(
            subscriber.clone(),
            "src".into(),
            tx,
            Duration::from_secs(5),
            cancel.clone(),
            |_| {},
        ));

        assert_eq!(rx.recv().await.as_deref(), Some("p:r:db0"));
        assert_eq!(rx.recv().await.as_deref(), Some("p:r:db1"));

        cancel.cancel();
        handle.await.unwrap();
        assert!(subscriber.attempts.load(Ordering::SeqCst) >= 2);
    }
}
