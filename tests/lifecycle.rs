//! Lifecycle tests for the proxy manager: start, stop, stop-all and status reporting.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use sqlproxy_manager::lifecycle::signals::shutdown_once;
use sqlproxy_manager::{AuthConfig, ManagerError, Shutdown, Status};

mod common;
use common::{
    eventually, harness, harness_with, test_config, FakeLister, FakeSubscriber, RuntimeEvent,
    ShutdownView, SubscribeScript, SERVICE_ACCOUNT_JSON,
};

const DB1: &str = "proj:region:db1";

fn token() -> AuthConfig {
    AuthConfig::token("test-token")
}

#[tokio::test]
async fn start_then_stop_leaves_nothing_behind() {
    let h = harness(test_config());

    let port = h.manager.start(DB1, token()).await.unwrap();
    assert_ne!(port, 0);
    assert_eq!(h.manager.status(DB1), Some(Status::Connected));
    assert_eq!(h.manager.port(DB1), Some(port));
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_ok());
    assert_eq!(h.factory.running.load(Ordering::SeqCst), 1);

    h.manager.stop(DB1).await;

    assert_eq!(h.manager.status(DB1), None);
    assert!(h.manager.names().is_empty());
    assert_eq!(h.factory.running.load(Ordering::SeqCst), 0);
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    assert_eq!(
        h.factory.events(),
        vec![
            RuntimeEvent::Created(DB1.into()),
            RuntimeEvent::RunStarted(DB1.into()),
            RuntimeEvent::Shutdown(DB1.into(), Duration::ZERO),
            RuntimeEvent::RunExited(DB1.into()),
        ]
    );
}

#[tokio::test]
async fn duplicate_start_is_rejected_without_side_effects() {
    let h = harness(test_config());
    let port = h.manager.start(DB1, token()).await.unwrap();

    let err = h.manager.start(DB1, token()).await.unwrap_err();
    assert!(matches!(err, ManagerError::AlreadyRunning(ref name) if name == DB1));

    assert_eq!(h.manager.status(DB1), Some(Status::Connected));
    assert_eq!(h.manager.port(DB1), Some(port));
    assert_eq!(h.factory.created(), 1);
    assert_eq!(h.sink.statuses(DB1), [Status::Connecting, Status::Connected]);

    h.manager.stop(DB1).await;
}

#[tokio::test]
async fn stop_of_unknown_instance_is_a_noop() {
    let h = harness(test_config());
    h.manager.stop("proj:region:missing").await;
    assert!(h.manager.names().is_empty());
    assert!(h.sink.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stop_all_races_an_in_flight_start() {
    let mut config = test_config();
    config.instances.projects = vec!["proj".into()];
    let h = harness_with(
        config,
        FakeLister::with_project("proj", &["listed"]),
        FakeSubscriber::new(SubscribeScript::Updates(Vec::new())),
        None,
    );

    h.manager.start("proj:region:a", token()).await.unwrap();

    h.lister.block.store(true, Ordering::SeqCst);
    let pending = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.start("proj:region:b", token()).await })
    };
    h.lister.entered.notified().await;
    assert_eq!(h.manager.status("proj:region:b"), Some(Status::Connecting));

    h.manager.stop_all().await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(ManagerError::Cancelled(_))));
    assert!(h.manager.names().is_empty());
    assert_eq!(h.factory.running.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.sink.statuses("proj:region:b"),
        [Status::Connecting, Status::Disconnected]
    );
}

#[tokio::test]
async fn cancelled_start_releases_the_project_listing() {
    let mut config = test_config();
    config.instances.projects = vec!["proj".into()];
    let h = harness_with(
        config,
        FakeLister::with_project("proj", &["listed"]),
        FakeSubscriber::new(SubscribeScript::Updates(Vec::new())),
        None,
    );
    let baseline = Arc::strong_count(&h.lister);

    h.lister.block.store(true, Ordering::SeqCst);
    let pending = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.start(DB1, token()).await })
    };
    h.lister.entered.notified().await;
    assert!(Arc::strong_count(&h.lister) > baseline);

    h.manager.stop(DB1).await;
    assert!(matches!(pending.await.unwrap(), Err(ManagerError::Cancelled(_))));

    // The blocked request is never released; only an abort frees the lister.
    assert!(eventually(|| Arc::strong_count(&h.lister) == baseline).await);
    assert!(h.manager.names().is_empty());
    assert_eq!(h.factory.created(), 0);
}

#[tokio::test]
async fn every_transition_reaches_the_sink_once() {
    let h = harness(test_config());

    h.manager.start(DB1, token()).await.unwrap();
    h.manager.stop(DB1).await;

    assert_eq!(
        h.sink.statuses(DB1),
        [Status::Connecting, Status::Connected, Status::Disconnected]
    );
}

#[tokio::test]
async fn removed_sink_sees_nothing_more() {
    let h = harness(test_config());

    h.manager.start(DB1, token()).await.unwrap();
    h.manager.remove_sink();
    h.manager.stop(DB1).await;

    assert_eq!(h.sink.statuses(DB1), [Status::Connecting, Status::Connected]);
}

#[tokio::test]
async fn invalid_credential_json_reports_error_and_binds_nothing() {
    let h = harness(test_config());

    let err = h
        .manager
        .start(DB1, AuthConfig::json("{not json"))
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Auth(_)));

    assert_eq!(h.manager.status(DB1), Some(Status::Error));
    assert!(!h.manager.last_error(DB1).unwrap_or_default().is_empty());
    assert_eq!(h.manager.port(DB1), None);
    assert_eq!(h.factory.created(), 0);
    assert_eq!(h.sink.statuses(DB1), [Status::Connecting, Status::Error]);
    assert!(!h.sink.details(DB1, Status::Error)[0].is_empty());

    h.manager.stop(DB1).await;
    assert_eq!(h.manager.status(DB1), None);
}

#[tokio::test]
async fn service_account_json_scenario() {
    let h = harness(test_config());

    h.manager
        .start(DB1, AuthConfig::json(SERVICE_ACCOUNT_JSON))
        .await
        .unwrap();
    assert_eq!(h.manager.status(DB1).map(|s| s.as_str()), Some("connected"));

    h.manager.stop(DB1).await;
    assert_eq!(
        h.sink.statuses(DB1),
        [Status::Connecting, Status::Connected, Status::Disconnected]
    );
    assert_eq!(h.manager.status(DB1), None);
}

#[tokio::test]
async fn restart_after_stop_is_a_fresh_run() {
    let h = harness(test_config());

    h.manager.start(DB1, token()).await.unwrap();
    h.manager.stop(DB1).await;
    h.manager.start(DB1, token()).await.unwrap();

    assert_eq!(h.manager.status(DB1), Some(Status::Connected));
    assert_eq!(h.factory.created(), 2);
    h.manager.stop(DB1).await;
}

#[tokio::test]
async fn malformed_spec_is_an_error_status() {
    let h = harness(test_config());

    let err = h.manager.start("not-a-connection-name", token()).await.unwrap_err();
    assert!(matches!(err, ManagerError::Spec(_)));
    assert_eq!(h.manager.status("not-a-connection-name"), Some(Status::Error));
    h.manager.stop("not-a-connection-name").await;
    assert!(h.manager.names().is_empty());
}

#[tokio::test]
async fn empty_name_uses_ambient_instances() {
    let h = harness_with(
        test_config(),
        FakeLister::default(),
        FakeSubscriber::new(SubscribeScript::Updates(Vec::new())),
        Some("proj:region:ambient".into()),
    );

    h.manager.start("", token()).await.unwrap();
    assert_eq!(h.manager.names(), ["proj:region:ambient"]);
    h.manager.stop_all().await;
}

#[tokio::test]
async fn surrounding_whitespace_names_the_same_instance() {
    let h = harness(test_config());
    let padded = " proj:region:db1 ";

    let port = h.manager.start(padded, token()).await.unwrap();
    assert_eq!(h.manager.names(), [DB1]);
    assert_eq!(h.manager.status(padded), Some(Status::Connected));
    assert_eq!(h.manager.port(padded), Some(port));

    let err = h.manager.start(DB1, token()).await.unwrap_err();
    assert!(matches!(err, ManagerError::AlreadyRunning(_)));

    h.manager.stop(padded).await;
    assert!(h.manager.names().is_empty());
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn empty_name_stops_the_ambient_instances() {
    let h = harness_with(
        test_config(),
        FakeLister::default(),
        FakeSubscriber::new(SubscribeScript::Updates(Vec::new())),
        Some("proj:region:ambient".into()),
    );

    h.manager.start("", token()).await.unwrap();
    assert_eq!(h.manager.status(""), Some(Status::Connected));
    h.manager.stop("").await;
    assert!(h.manager.names().is_empty());
}

#[tokio::test]
async fn empty_name_without_any_source_is_rejected() {
    let h = harness(test_config());
    let err = h.manager.start("  ", token()).await.unwrap_err();
    assert!(matches!(err, ManagerError::EmptyName));
    assert!(h.manager.names().is_empty());
}

#[tokio::test]
async fn project_listing_adds_listeners() {
    let mut config = test_config();
    config.instances.projects = vec!["proj".into()];
    let h = harness_with(
        config,
        FakeLister::with_project("proj", &["one", "two"]),
        FakeSubscriber::new(SubscribeScript::Updates(Vec::new())),
        None,
    );

    h.manager.start("", token()).await.unwrap();
    assert_eq!(h.manager.status(""), Some(Status::Connected));
    assert_eq!(h.lister.calls.load(Ordering::SeqCst), 1);
    h.manager.stop("").await;
}

#[tokio::test]
async fn runtime_failure_after_launch_reports_error() {
    let h = harness(test_config());
    h.factory.fail_runs.store(true, Ordering::SeqCst);

    h.manager.start(DB1, token()).await.unwrap();
    assert!(eventually(|| h.manager.status(DB1) == Some(Status::Error)).await);
    assert!(h
        .manager
        .last_error(DB1)
        .unwrap_or_default()
        .contains("injected"));

    h.manager.stop(DB1).await;
    assert!(h.manager.names().is_empty());
}

#[tokio::test]
async fn runtime_exit_without_stop_reports_error() {
    let h = harness(test_config());
    h.factory.exit_runs.store(true, Ordering::SeqCst);

    h.manager.start(DB1, token()).await.unwrap();
    assert!(eventually(|| h.manager.status(DB1) == Some(Status::Error)).await);
    assert_eq!(h.manager.last_error(DB1).as_deref(), Some("proxy runtime exited"));
    assert_eq!(h.sink.statuses(DB1).last(), Some(&Status::Error));

    h.manager.stop(DB1).await;
    assert!(h.manager.names().is_empty());
}

#[tokio::test]
async fn stop_tears_resources_down_in_order() {
    let mut config = test_config();
    config.instances.track_connections = true;
    config.instances.metadata_source = Some("instance/attributes/instances".into());
    let h = harness(config);

    let port = h.manager.start(DB1, token()).await.unwrap();
    let active = h.subscriber.active.clone();
    assert!(eventually(|| active.load(Ordering::SeqCst) == 1).await);
    h.factory.observe(port, Some(active.clone()));

    h.manager.stop(DB1).await;

    // At runtime shutdown the connection set is already closed while the
    // listener and the metadata watch are still up.
    assert_eq!(
        h.factory.shutdown_views(),
        [ShutdownView {
            instance: DB1.into(),
            conn_set_closed: Some(true),
            listener_accepting: Some(true),
            watch_active: Some(1),
        }]
    );
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    assert_eq!(active.load(Ordering::SeqCst), 0);
    assert!(h.manager.names().is_empty());
}

#[tokio::test]
async fn metadata_updates_open_listeners_and_stop_cancels_the_watch() {
    let mut config = test_config();
    config.instances.metadata_source = Some("instance/attributes/instances".into());
    let h = harness_with(
        config,
        FakeLister::default(),
        FakeSubscriber::new(SubscribeScript::Updates(vec![
            "proj:region:late=tcp:0".into(),
        ])),
        None,
    );

    h.manager.start(DB1, token()).await.unwrap();
    let active = h.subscriber.active.clone();
    assert!(eventually(|| active.load(Ordering::SeqCst) == 1).await);

    h.manager.stop(DB1).await;
    assert_eq!(active.load(Ordering::SeqCst), 0);
    assert_eq!(h.subscriber.subscriptions.load(Ordering::SeqCst), 1);
    assert!(h.manager.names().is_empty());
}

#[tokio::test]
async fn metadata_errors_are_reported_and_retried_until_stop() {
    let mut config = test_config();
    config.instances.metadata_source = Some("instance/attributes/instances".into());
    config.timeouts.watch_backoff_secs = 3600;
    let h = harness_with(
        config,
        FakeLister::default(),
        FakeSubscriber::new(SubscribeScript::Fail("metadata unavailable".into())),
        None,
    );

    h.manager.start(DB1, token()).await.unwrap();
    assert!(eventually(|| h.manager.status(DB1) == Some(Status::Error)).await);
    assert!(h.sink.details(DB1, Status::Error)[0].contains("metadata unavailable"));

    // The watch is asleep in its backoff; stop must still end it promptly.
    tokio::time::timeout(Duration::from_secs(5), h.manager.stop(DB1))
        .await
        .unwrap();
    assert!(h.manager.names().is_empty());
    assert_eq!(h.subscriber.subscriptions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_runs_stop_all_once() {
    let h = harness(test_config());
    h.manager.start(DB1, token()).await.unwrap();
    h.manager.start("proj:region:db2", token()).await.unwrap();

    let shutdown = Shutdown::new();
    let mut notified = shutdown.subscribe();

    assert!(shutdown_once(&h.manager, &shutdown).await);
    assert!(!shutdown_once(&h.manager, &shutdown).await);

    notified.recv().await.unwrap();
    assert!(h.manager.names().is_empty());
    assert_eq!(
        h.sink
            .seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, status, _)| *status == Status::Disconnected)
            .count(),
        2
    );
}
