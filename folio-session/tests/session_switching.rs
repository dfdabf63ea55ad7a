//! Switching behaviour of `SessionManager` against in-process doubles.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    documents, drain_notices, expect_notice, harness, wait_for_status, LinkScript, ManualStore,
    MockTransport,
};
use folio_collab::{MemoryStore, TransportEvent};
use folio_core::{CoreError, DocumentId};
use folio_session::{
    ConnectionState, EditorView, HydrationOutcome, SessionConfig, SessionError, SessionNotice,
    SwitchOutcome,
};

const ENDPOINT: &str = "ws://sync.test";

fn config() -> SessionConfig {
    SessionConfig::for_testing(Some(ENDPOINT))
}

fn is_hydrated(doc: &'static str) -> impl Fn(&SessionNotice) -> bool {
    move |n| matches!(n, SessionNotice::Hydrated { id, .. } if id.as_str() == doc)
}

#[tokio::test]
async fn test_activation_publishes_status_and_location() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let mut h = harness(
        config(),
        documents(&[("doc1", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    let outcome = h.manager.activate("doc1").await.unwrap();
    assert_eq!(outcome, SwitchOutcome::Activated { epoch: 1 });

    let status = h.manager.status();
    assert_eq!(status.active_id, Some(DocumentId::from("doc1")));
    assert_eq!(status.connection, ConnectionState::Connected);
    assert!(status.persistence_ready);
    assert!(!status.switching);
    assert!(!h.manager.is_switching());

    let notices = drain_notices(&mut h.notices);
    assert!(notices.contains(&SessionNotice::Activated { id: DocumentId::from("doc1") }));
    assert!(notices.contains(&SessionNotice::LocationChanged { path: "/notes/doc1".into() }));
    assert_eq!(transport.live_links(), 1);
}

#[tokio::test]
async fn test_activating_current_document_is_noop() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let h = harness(
        config(),
        documents(&[("doc1", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    h.manager.activate("doc1").await.unwrap();
    assert_eq!(h.manager.activate("doc1").await.unwrap(), SwitchOutcome::AlreadyActive);
    assert_eq!(transport.opened_count(), 1);
}

#[tokio::test]
async fn test_hydration_waits_for_persistence_ready() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let store = ManualStore::new();
    let mut h = harness(
        config(),
        documents(&[("doc1", Some("<p>Hello</p>"))]),
        transport,
        store.clone(),
    );

    h.manager.activate("doc1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!h.manager.status().persistence_ready);
    assert_eq!(h.editor.content(), "");
    assert!(!drain_notices(&mut h.notices).iter().any(is_hydrated("doc1")));

    assert!(store.release("doc1"));
    let notice = expect_notice(&mut h.notices, is_hydrated("doc1")).await;
    assert!(matches!(
        notice,
        SessionNotice::Hydrated { outcome: HydrationOutcome::Written { .. }, .. }
    ));
    assert!(h.manager.status().persistence_ready);
    assert_eq!(h.editor.content(), "<p>Hello</p>");
}

#[tokio::test]
async fn test_switch_before_connected_shows_only_new_content() {
    let transport = MockTransport::new(LinkScript::Hold);
    let mut h = harness(
        config(),
        documents(&[("doc1", Some("<p>Hello</p>")), ("doc2", Some("<p>World</p>"))]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    h.manager.activate("doc1").await.unwrap();
    expect_notice(&mut h.notices, is_hydrated("doc1")).await;
    assert_eq!(h.editor.content(), "<p>Hello</p>");
    assert_eq!(h.manager.status().connection, ConnectionState::Connecting);

    h.manager.activate("doc2").await.unwrap();
    expect_notice(&mut h.notices, is_hydrated("doc2")).await;
    assert_eq!(h.editor.content(), "<p>World</p>");

    // doc1's link finally connects: nothing about doc2 may change.
    transport.links_for("doc1")[0].events.emit(TransportEvent::Connected);
    let status = h.manager.status();
    assert_eq!(status.active_id, Some(DocumentId::from("doc2")));
    assert_eq!(status.connection, ConnectionState::Connecting);
    assert_eq!(h.editor.content(), "<p>World</p>");
    assert_eq!(transport.links_for("doc1")[0].replica.content(), "<p>Hello</p>");
    assert_eq!(transport.live_links(), 1);
}

#[tokio::test]
async fn test_remote_content_is_not_overwritten() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    transport.remote_content("doc1", "<p>Existing</p>");
    let mut h = harness(
        config(),
        documents(&[("doc1", Some("<p>Fallback</p>"))]),
        transport,
        Arc::new(MemoryStore::new()),
    );

    h.manager.activate("doc1").await.unwrap();
    let notice = expect_notice(&mut h.notices, is_hydrated("doc1")).await;
    assert_eq!(
        notice,
        SessionNotice::Hydrated {
            id: DocumentId::from("doc1"),
            outcome: HydrationOutcome::AlreadyPopulated,
        }
    );
    assert_eq!(h.editor.content(), "<p>Existing</p>");
}

#[tokio::test]
async fn test_locally_persisted_content_is_not_overwritten() {
    let store = MemoryStore::new();
    store.seed_content(&DocumentId::from("doc1"), "<p>Offline edit</p>").unwrap();
    let mut h = harness(
        config(),
        documents(&[("doc1", Some("<p>Fallback</p>"))]),
        MockTransport::new(LinkScript::Hold),
        Arc::new(store),
    );

    h.manager.activate("doc1").await.unwrap();
    expect_notice(&mut h.notices, is_hydrated("doc1")).await;
    assert_eq!(h.editor.content(), "<p>Offline edit</p>");
}

#[tokio::test]
async fn test_connection_error_then_recovery() {
    let transport = MockTransport::new(LinkScript::FailImmediately);
    let mut h = harness(
        config(),
        documents(&[("doc1", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    h.manager.activate("doc1").await.unwrap();
    assert_eq!(h.manager.status().connection, ConnectionState::Error);
    expect_notice(&mut h.notices, |n| matches!(n, SessionNotice::Offline { .. })).await;

    // Still editable while offline.
    h.editor.type_text("typed offline").unwrap();
    assert_eq!(h.editor.content(), "typed offline");

    let link = transport.last_link();
    link.events.emit(TransportEvent::Connecting);
    assert_eq!(h.manager.status().connection, ConnectionState::Connecting);
    link.events.emit(TransportEvent::Connected);

    let status = wait_for_status(&h.manager, |s| s.connection == ConnectionState::Connected).await;
    assert_eq!(status.active_id, Some(DocumentId::from("doc1")));
    expect_notice(&mut h.notices, |n| matches!(n, SessionNotice::Online { .. })).await;
    assert_eq!(transport.opened_count(), 1);
}

#[tokio::test]
async fn test_rapid_alternating_activations_settle_on_last() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let h = harness(
        config(),
        documents(&[("a", Some("<p>A</p>")), ("b", Some("<p>B</p>"))]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    let started = tokio::time::Instant::now();
    for i in 0..10 {
        let id = if i % 2 == 0 { "a" } else { "b" };
        h.manager.activate(id).await.unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(500));

    let status = wait_for_status(&h.manager, |s| s.persistence_ready).await;
    assert_eq!(status.active_id, Some(DocumentId::from("b")));
    assert_eq!(transport.live_links(), 1);
    assert_eq!(transport.live_replicas_for("a"), 1);
    assert_eq!(transport.live_replicas_for("b"), 1);
    assert_eq!(
        h.manager.active_replica().await.unwrap().instance(),
        transport.links_for("b").last().unwrap().replica.instance()
    );
}

#[tokio::test]
async fn test_concurrent_request_is_rejected_not_queued() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let mut config = config();
    config.switch_debounce_ms = 50;
    let mut h = harness(
        config,
        documents(&[("a", None), ("b", None), ("c", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    let manager = h.manager.clone();
    let first = tokio::spawn(async move { manager.activate("a").await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.manager.status().switching);

    for id in ["b", "c"] {
        match h.manager.activate(id).await {
            Err(SessionError::SwitchInProgress { requested }) => assert_eq!(requested.as_str(), id),
            other => panic!("expected rejection for {id}, got {other:?}"),
        }
    }
    expect_notice(&mut h.notices, |n| matches!(n, SessionNotice::SwitchRejected { .. })).await;

    assert!(first.await.unwrap().is_ok());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.manager.status().active_id, Some(DocumentId::from("a")));
    assert!(!h.manager.status().switching);
    assert_eq!(transport.opened_count(), 1);
}

#[tokio::test]
async fn test_concurrent_burst_accepts_exactly_one() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let mut config = config();
    config.switch_debounce_ms = 20;
    let h = harness(
        config,
        documents(&[("a", None), ("b", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let manager = h.manager.clone();
            let id = if i % 2 == 0 { "a" } else { "b" };
            tokio::spawn(async move { manager.activate(id).await })
        })
        .collect();

    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(SessionError::SwitchInProgress { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(transport.live_links(), 1);
}

#[tokio::test]
async fn test_at_most_one_live_replica_per_document() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let h = harness(
        config(),
        documents(&[("a", None), ("b", None), ("c", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    for id in ["a", "b", "a", "c", "a", "b", "b", "c"] {
        let _ = h.manager.activate(id).await.unwrap();
        for doc in ["a", "b", "c"] {
            assert!(transport.live_replicas_for(doc) <= 1, "{doc} has several live replicas");
        }
    }
}

#[tokio::test]
async fn test_eviction_destroys_least_recent_once() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let mut config = config();
    config.max_cached_replicas = 2;
    let h = harness(
        config,
        documents(&[("a", None), ("b", None), ("c", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    for id in ["a", "b", "c"] {
        h.manager.activate(id).await.unwrap();
    }

    assert_eq!(
        h.manager.cached_documents().await,
        vec![DocumentId::from("c"), DocumentId::from("b")]
    );
    let evicted = transport.links_for("a")[0].replica.clone();
    assert!(evicted.is_destroyed());
    assert!(matches!(evicted.destroy(), Err(CoreError::AlreadyDestroyed(_))));
    assert!(!transport.links_for("b")[0].replica.is_destroyed());
}

#[tokio::test]
async fn test_content_isolation_across_reactivation() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let h = harness(
        config(),
        documents(&[("a", None), ("b", None)]),
        transport,
        Arc::new(MemoryStore::new()),
    );

    h.manager.activate("a").await.unwrap();
    h.editor.type_text("alpha").unwrap();
    h.manager.activate("b").await.unwrap();
    assert_eq!(h.editor.content(), "");
    h.editor.type_text("beta").unwrap();

    h.manager.activate("a").await.unwrap();
    assert_eq!(h.editor.content(), "alpha");

    h.manager.activate("b").await.unwrap();
    assert_eq!(h.editor.content(), "beta");
}

#[tokio::test]
async fn test_late_readiness_for_previous_document_is_discarded() {
    let store = ManualStore::new();
    let mut h = harness(
        config(),
        documents(&[("doc1", Some("<p>Hello</p>")), ("doc2", Some("<p>World</p>"))]),
        MockTransport::new(LinkScript::Hold),
        store.clone(),
    );

    h.manager.activate("doc1").await.unwrap();
    h.manager.activate("doc2").await.unwrap();

    assert!(store.release("doc1"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!h.manager.status().persistence_ready);
    assert_eq!(h.editor.content(), "");

    assert!(store.release("doc2"));
    expect_notice(&mut h.notices, is_hydrated("doc2")).await;
    assert_eq!(h.editor.content(), "<p>World</p>");
    assert!(!drain_notices(&mut h.notices).iter().any(is_hydrated("doc1")));
    assert_eq!(store.closed(), 1);
}

#[tokio::test]
async fn test_timeout_discards_partial_session() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    transport.script("doc2", LinkScript::HangOpen);
    let mut config = config();
    config.switch_timeout_ms = 100;
    let mut h = harness(
        config,
        documents(&[("doc1", None), ("doc2", None), ("doc3", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    h.manager.activate("doc1").await.unwrap();
    let err = h.manager.activate("doc2").await.unwrap_err();
    assert!(matches!(err, SessionError::SwitchTimedOut(_)));

    expect_notice(&mut h.notices, |n| matches!(n, SessionNotice::SwitchTimedOut { .. })).await;
    let failed = expect_notice(&mut h.notices, |n| matches!(n, SessionNotice::SwitchFailed { .. })).await;
    assert!(matches!(failed, SessionNotice::SwitchFailed { fallback_navigation: true, .. }));

    let status = h.manager.status();
    assert_eq!(status.active_id, None);
    assert!(!status.switching);
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert_eq!(transport.live_links(), 0);
    assert_eq!(h.editor.content(), "");
    assert!(h.manager.active_replica().await.is_none());
    assert!(!h.manager.cached_documents().await.contains(&DocumentId::from("doc2")));

    h.manager.activate("doc3").await.unwrap();
    assert_eq!(h.manager.status().active_id, Some(DocumentId::from("doc3")));
    assert_eq!(transport.live_links(), 1);
}

#[tokio::test]
async fn test_link_stuck_connecting_reports_timeout() {
    let transport = MockTransport::new(LinkScript::Hold);
    transport.script("doc2", LinkScript::ConnectImmediately);
    let mut config = config();
    config.switch_timeout_ms = 100;
    let mut h = harness(
        config,
        documents(&[("doc1", None), ("doc2", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    h.manager.activate("doc1").await.unwrap();
    let notice =
        expect_notice(&mut h.notices, |n| matches!(n, SessionNotice::SwitchTimedOut { .. })).await;
    assert_eq!(notice, SessionNotice::SwitchTimedOut { id: DocumentId::from("doc1") });

    // The session survives: still active, still editable, still trying.
    let status = h.manager.status();
    assert_eq!(status.active_id, Some(DocumentId::from("doc1")));
    assert_eq!(status.connection, ConnectionState::Connecting);
    assert!(!status.switching);
    h.editor.type_text("offline draft").unwrap();
    assert_eq!(transport.live_links(), 1);

    // A link that settles in time gets no such notice.
    h.manager.activate("doc2").await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!drain_notices(&mut h.notices)
        .iter()
        .any(|n| matches!(n, SessionNotice::SwitchTimedOut { .. })));
    assert_eq!(h.manager.status().connection, ConnectionState::Connected);
}

#[tokio::test]
async fn test_switch_completes_after_caller_stops_waiting() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    transport.script("doc2", LinkScript::SlowOpen(100));
    let h = harness(
        config(),
        documents(&[("doc1", None), ("doc2", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );
    h.manager.activate("doc1").await.unwrap();

    let gave_up = tokio::time::timeout(Duration::from_millis(20), h.manager.activate("doc2")).await;
    assert!(gave_up.is_err());
    assert!(h.manager.is_switching());

    let status = wait_for_status(&h.manager, |s| !s.switching).await;
    assert_eq!(status.active_id, Some(DocumentId::from("doc2")));
    assert_eq!(status.connection, ConnectionState::Connected);

    let replica = h.manager.active_replica().await.unwrap();
    assert_eq!(replica.id(), &DocumentId::from("doc2"));
    assert_eq!(h.editor.attached_instance(), Some(replica.instance()));
    assert_eq!(transport.live_links(), 1);
    assert_eq!(transport.links_for("doc2").len(), 1);

    // Undo is bound to the new document.
    h.editor.type_text("x").unwrap();
    assert!(h.manager.undo());
    assert_eq!(h.editor.content(), "");
}

#[tokio::test]
async fn test_metadata_failure_keeps_previous_session() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let mut h = harness(
        config(),
        documents(&[("doc1", Some("<p>Hello</p>"))]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    h.manager.activate("doc1").await.unwrap();
    expect_notice(&mut h.notices, is_hydrated("doc1")).await;

    let err = h.manager.activate("missing").await.unwrap_err();
    assert!(matches!(err, SessionError::Metadata { .. }));
    let failed = expect_notice(&mut h.notices, |n| matches!(n, SessionNotice::SwitchFailed { .. })).await;
    assert!(matches!(failed, SessionNotice::SwitchFailed { fallback_navigation: false, .. }));

    let status = h.manager.status();
    assert_eq!(status.active_id, Some(DocumentId::from("doc1")));
    assert_eq!(status.connection, ConnectionState::Connected);
    assert!(!status.switching);
    assert_eq!(transport.live_links(), 1);
    assert_eq!(h.editor.content(), "<p>Hello</p>");
}

#[tokio::test]
async fn test_store_failure_after_teardown_forces_fallback() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let store = ManualStore::new();
    store.fail_on("doc2");
    let mut h = harness(
        config(),
        documents(&[("doc1", None), ("doc2", None)]),
        transport.clone(),
        store,
    );

    h.manager.activate("doc1").await.unwrap();
    let err = h.manager.activate("doc2").await.unwrap_err();
    assert!(matches!(err, SessionError::Store(_)));

    let failed = expect_notice(&mut h.notices, |n| matches!(n, SessionNotice::SwitchFailed { .. })).await;
    assert!(matches!(failed, SessionNotice::SwitchFailed { fallback_navigation: true, .. }));
    assert_eq!(h.manager.status().active_id, None);
    assert_eq!(transport.live_links(), 0);
}

#[tokio::test]
async fn test_missing_endpoint_runs_local_only() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let mut h = harness(
        SessionConfig::for_testing(None),
        documents(&[("doc1", Some("<p>Hello</p>")), ("doc2", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );
    let mut all_notices = h.manager.subscribe_notices();

    h.manager.activate("doc1").await.unwrap();
    expect_notice(&mut h.notices, is_hydrated("doc1")).await;
    assert_eq!(h.editor.content(), "<p>Hello</p>");
    h.manager.activate("doc2").await.unwrap();
    h.manager.activate("doc1").await.unwrap();

    let status = h.manager.status();
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert_eq!(status.active_id, Some(DocumentId::from("doc1")));
    assert_eq!(transport.opened_count(), 0);

    let local_only = drain_notices(&mut all_notices)
        .into_iter()
        .filter(|n| *n == SessionNotice::LocalOnly)
        .count();
    assert_eq!(local_only, 1);
}

#[tokio::test]
async fn test_undo_is_scoped_to_active_document() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let h = harness(
        config(),
        documents(&[("a", None), ("b", None)]),
        transport.clone(),
        Arc::new(MemoryStore::new()),
    );

    assert!(!h.manager.undo());

    h.manager.activate("a").await.unwrap();
    h.editor.type_text("a").unwrap();
    assert!(h.manager.undo());
    assert_eq!(h.editor.content(), "");
    assert!(h.manager.redo());
    assert_eq!(h.editor.content(), "a");

    h.manager.activate("b").await.unwrap();
    h.editor.type_text("b").unwrap();
    assert!(h.manager.undo());
    assert_eq!(h.editor.content(), "");
    assert_eq!(transport.links_for("a")[0].replica.content(), "a");
    assert!(!h.manager.undo());

    // A fresh activation starts with an empty history.
    h.manager.activate("a").await.unwrap();
    assert_eq!(h.editor.content(), "a");
    assert!(!h.manager.undo());
    assert_eq!(h.editor.content(), "a");
}

#[tokio::test]
async fn test_hydration_gives_up_when_editor_never_ready() {
    let mut h = harness(
        config(),
        documents(&[("doc1", Some("<p>Hello</p>"))]),
        MockTransport::new(LinkScript::ConnectImmediately),
        Arc::new(MemoryStore::new()),
    );
    h.editor.set_ready(false);

    h.manager.activate("doc1").await.unwrap();
    let notice = expect_notice(&mut h.notices, is_hydrated("doc1")).await;
    assert_eq!(
        notice,
        SessionNotice::Hydrated {
            id: DocumentId::from("doc1"),
            outcome: HydrationOutcome::GaveUp { attempts: 4 },
        }
    );
    assert_eq!(h.editor.content(), "");
    assert!(h.editor.is_empty());
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_releases_everything() {
    let transport = MockTransport::new(LinkScript::ConnectImmediately);
    let store = ManualStore::new();
    let h = harness(
        config(),
        documents(&[("a", None), ("b", None)]),
        transport.clone(),
        store.clone(),
    );

    h.manager.activate("a").await.unwrap();
    h.manager.activate("b").await.unwrap();

    h.manager.shutdown().await;
    h.manager.shutdown().await;

    assert_eq!(transport.live_links(), 0);
    assert_eq!(transport.live_replicas_for("a"), 0);
    assert_eq!(transport.live_replicas_for("b"), 0);
    assert_eq!(store.closed(), store.opened());
    assert!(h.manager.cached_documents().await.is_empty());

    let status = h.manager.status();
    assert_eq!(status.active_id, None);
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert!(!status.persistence_ready);
    assert_eq!(h.editor.content(), "");

    assert!(matches!(h.manager.activate("a").await, Err(SessionError::ShutDown)));
}
