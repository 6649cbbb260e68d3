mod support;

use shellcn_domain::events::{SessionEventKind, SessionLifecycleEvent};
use shellcn_domain::session::AccessMode;
use shellcn_event_bus::{EventBus, EventReceiverExt};
use shellcn_repository::{MemoryStore, SessionFilter, SessionRepo};
use shellcn_sessions::{SessionCoordinator, SessionError, StartSession};
use std::sync::Arc;
use support::FakeHandle;

fn start_params(
    handle: Arc<FakeHandle>,
    connection: &str,
    owner: &str,
    limit: u32,
) -> StartSession {
    StartSession {
        connection_id: connection.to_owned(),
        protocol_id: "ssh".to_owned(),
        owner_id: owner.to_owned(),
        host: "127.0.0.1".to_owned(),
        port: 22,
        concurrent_limit: limit,
        handle,
        recorder: None,
        owner_consented_to_recording: false,
    }
}

fn coordinator(store: &MemoryStore) -> (SessionCoordinator, EventBus) {
    let events = EventBus::new();
    (SessionCoordinator::new(Arc::new(store.clone()), events.clone(), false), events)
}

#[tokio::test]
async fn concurrency_limits_are_enforced() {
    let store = MemoryStore::new();
    let (coordinator, _events) = coordinator(&store);

    coordinator
        .start_session(start_params(FakeHandle::new("s1"), "c1", "alice", 2))
        .await
        .unwrap();
    coordinator
        .start_session(start_params(FakeHandle::new("s2"), "c1", "bob", 2))
        .await
        .unwrap();

    // Third session on the same connection hits the cap, carrying the limit.
    let err = coordinator
        .start_session(start_params(FakeHandle::new("s3"), "c1", "carol", 2))
        .await
        .unwrap_err();
    match err {
        SessionError::ConcurrentLimitReached { limit, .. } => assert_eq!(limit, 2),
        other => panic!("expected ConcurrentLimitReached, got {other}"),
    }

    // No persistent row was created for the rejected session.
    assert!(store.find_session("s3").await.is_err());

    // A different connection is unaffected.
    coordinator
        .start_session(start_params(FakeHandle::new("s4"), "c2", "carol", 2))
        .await
        .unwrap();
}

#[tokio::test]
async fn same_owner_cannot_double_launch() {
    let store = MemoryStore::new();
    let (coordinator, _events) = coordinator(&store);

    coordinator
        .start_session(start_params(FakeHandle::new("s1"), "c1", "alice", 5))
        .await
        .unwrap();
    let err = coordinator
        .start_session(start_params(FakeHandle::new("s2"), "c1", "alice", 5))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ActiveSessionExists { .. }));
}

#[tokio::test]
async fn write_token_arbitration() {
    let store = MemoryStore::new();
    let (coordinator, _events) = coordinator(&store);
    let handle = FakeHandle::new("s1");

    let record = coordinator
        .start_session(start_params(Arc::clone(&handle), "c1", "alice", 5))
        .await
        .unwrap();
    assert_eq!(record.write_holder.as_deref(), Some("alice"));

    // A joiner asking for write degrades to read while the token is held.
    let participant = coordinator
        .attach_participant("s1", "bob", AccessMode::Write, false)
        .await
        .unwrap();
    assert_eq!(participant.access_mode, AccessMode::Read);

    // Only the holder may write.
    coordinator.write_input("s1", "alice", b"ls\n").await.unwrap();
    let err = coordinator.write_input("s1", "bob", b"rm -rf\n").await.unwrap_err();
    assert!(matches!(err, SessionError::Forbidden { .. }));
    assert_eq!(handle.written.lock().as_slice(), b"ls\n");

    // Transfer, then the roles flip.
    coordinator.grant_write("s1", "bob").await.unwrap();
    coordinator.write_input("s1", "bob", b"pwd\n").await.unwrap();
    let err = coordinator.write_input("s1", "alice", b"x").await.unwrap_err();
    assert!(matches!(err, SessionError::Forbidden { .. }));

    // Releasing leaves nobody writable until the next grant.
    coordinator.relinquish_write("s1", "bob").await.unwrap();
    let err = coordinator.write_input("s1", "bob", b"x").await.unwrap_err();
    assert!(matches!(err, SessionError::Forbidden { .. }));

    let session = coordinator.get_session("s1").await.unwrap();
    assert!(session.write_holder.is_none());
}

#[tokio::test]
async fn close_cascades_and_is_idempotent() {
    let store = MemoryStore::new();
    let (coordinator, _events) = coordinator(&store);
    let handle = FakeHandle::new("s1");

    coordinator
        .start_session(start_params(Arc::clone(&handle), "c1", "alice", 5))
        .await
        .unwrap();

    let closed = coordinator.close_session("s1", "test over").await.unwrap();
    assert!(closed.closed_at.is_some());
    assert!(handle.is_closed());

    // Closing again returns the persisted record instead of failing.
    let again = coordinator.close_session("s1", "test over").await.unwrap();
    assert!(again.closed_at.is_some());

    // Gone from the live listing, still persisted.
    assert!(coordinator.list_sessions(&SessionFilter::default()).is_empty());
    assert!(store.find_session("s1").await.unwrap().is_closed());
}

#[tokio::test]
async fn lifecycle_events_arrive_in_order() {
    let store = MemoryStore::new();
    let (coordinator, events) = coordinator(&store);
    let mut rx = events.subscribe::<SessionLifecycleEvent>().unwrap();

    coordinator
        .start_session(start_params(FakeHandle::new("s1"), "c1", "alice", 5))
        .await
        .unwrap();
    coordinator.attach_participant("s1", "bob", AccessMode::Read, false).await.unwrap();
    coordinator.grant_write("s1", "bob").await.unwrap();
    coordinator.detach_participant("s1", "bob").await.unwrap();
    coordinator.close_session("s1", "done").await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) =
        tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await
    {
        let Some(event) = event else { break };
        kinds.push(event.kind.clone());
        if matches!(event.kind, SessionEventKind::Closed { .. }) {
            break;
        }
    }

    assert!(matches!(kinds[0], SessionEventKind::Started));
    assert!(
        matches!(&kinds[1], SessionEventKind::ParticipantJoined { user_id } if user_id == "bob")
    );
    assert!(matches!(&kinds[2], SessionEventKind::WriteGranted { user_id } if user_id == "bob"));
    // Detaching the holder releases the token before the leave event.
    assert!(matches!(kinds[3], SessionEventKind::WriteReleased));
    assert!(
        matches!(&kinds[4], SessionEventKind::ParticipantLeft { user_id } if user_id == "bob")
    );
    assert!(matches!(kinds.last(), Some(SessionEventKind::Closed { .. })));
}

#[tokio::test]
async fn output_fans_out_to_subscribers() {
    let store = MemoryStore::new();
    let (coordinator, _events) = coordinator(&store);
    let handle = FakeHandle::new("s1");

    coordinator
        .start_session(start_params(Arc::clone(&handle), "c1", "alice", 5))
        .await
        .unwrap();
    let mut output = coordinator.subscribe_output("s1").unwrap();

    handle.emit_stdout(b"remote says hi").await;

    let bytes = tokio::time::timeout(std::time::Duration::from_secs(1), output.recv())
        .await
        .expect("output within deadline")
        .expect("stream open");
    assert_eq!(bytes, b"remote says hi".to_vec());
}

#[tokio::test]
async fn heartbeat_and_stale_sweep() {
    let store = MemoryStore::new();
    let (coordinator, _events) = coordinator(&store);

    coordinator
        .start_session(start_params(FakeHandle::new("s1"), "c1", "alice", 5))
        .await
        .unwrap();
    coordinator.heartbeat("s1", "alice").unwrap();

    // Fresh heartbeat: nothing to sweep.
    assert_eq!(coordinator.sweep_stale(std::time::Duration::from_secs(60)).await, 0);

    // Zero TTL: everything is stale.
    assert_eq!(coordinator.sweep_stale(std::time::Duration::from_secs(0)).await, 1);
    assert!(coordinator.list_sessions(&SessionFilter::default()).is_empty());
}

#[tokio::test]
async fn shutdown_closes_every_session() {
    let store = MemoryStore::new();
    let (coordinator, _events) = coordinator(&store);
    let h1 = FakeHandle::new("s1");
    let h2 = FakeHandle::new("s2");

    coordinator.start_session(start_params(Arc::clone(&h1), "c1", "alice", 5)).await.unwrap();
    coordinator.start_session(start_params(Arc::clone(&h2), "c2", "bob", 5)).await.unwrap();

    coordinator.shutdown(std::time::Duration::from_secs(5)).await;

    assert!(h1.is_closed());
    assert!(h2.is_closed());
    assert!(coordinator.list_sessions(&SessionFilter::default()).is_empty());
}
