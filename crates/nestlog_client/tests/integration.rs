//! Offline-first flows across simulated restarts.

use nestlog_client::{
    ConnectionStatus, FileDeviceStore, MockSink, ReconnectPolicy, SyncClient,
};
use nestlog_protocol::{ClientFrame, Entry, ServerFrame, DEFAULT_SYNC_LIMIT};

fn server_entry(id: &str, seq: i64) -> Entry {
    let mut entry = Entry::new(id, 1000, "feed", "bottle");
    entry.family_id = "fam1".into();
    entry.seq = seq;
    entry
}

#[test]
fn offline_writes_survive_restart_and_flush_on_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.json");

    // First process life: two offline writes, then a crash.
    let (id1, id2) = {
        let store = FileDeviceStore::open(&path).unwrap();
        let client = SyncClient::new(store, MockSink::new()).unwrap();

        let e1 = client.log_entry("feed", "bottle", 1000).unwrap();
        let e2 = client.log_entry("sleep", "start", 2000).unwrap();
        assert_eq!(client.pending_len(), 2);
        (e1.id, e2.id)
    };

    // Second life: the queue comes back from storage.
    let store = FileDeviceStore::open(&path).unwrap();
    let sink = MockSink::new();
    let client = SyncClient::new(store, sink).unwrap();
    assert_eq!(client.pending_len(), 2);

    // Reconnect: catch-up first, then the flush in insertion order.
    client.on_open().unwrap();
    client
        .handle_frame(ServerFrame::SyncResponse {
            entries: vec![],
            cursor: 0,
            has_more: false,
        })
        .unwrap();

    let sent = client.sink().sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(
        sent[0],
        ClientFrame::sync_request(0, Some(DEFAULT_SYNC_LIMIT))
    );
    for (frame, expected_id) in sent[1..].iter().zip([&id1, &id2]) {
        match frame {
            ClientFrame::Entry {
                entry: Some(entry), ..
            } => assert_eq!(&entry.id, expected_id),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    // Acks drain the queue and the cursor persists.
    client.handle_frame(ServerFrame::ack(&id1, 1)).unwrap();
    client.handle_frame(ServerFrame::ack(&id2, 2)).unwrap();
    assert_eq!(client.pending_len(), 0);
    assert_eq!(client.cursor(), 2);

    // Third life: nothing pending, cursor intact.
    drop(client);
    let store = FileDeviceStore::open(&path).unwrap();
    let client = SyncClient::new(store, MockSink::new()).unwrap();
    assert_eq!(client.pending_len(), 0);
    assert_eq!(client.cursor(), 2);
}

#[test]
fn duplicate_ack_and_rebroadcast_converge() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileDeviceStore::open(dir.path().join("device.json")).unwrap();
    let client = SyncClient::new(store, MockSink::new()).unwrap();

    let entry = client.log_entry("feed", "bottle", 1000).unwrap();
    client.handle_frame(ServerFrame::ack(&entry.id, 3)).unwrap();
    // The same ack again, and the same row via a sync page.
    client.handle_frame(ServerFrame::ack(&entry.id, 3)).unwrap();
    client
        .handle_frame(ServerFrame::SyncResponse {
            entries: vec![server_entry(&entry.id, 3)],
            cursor: 3,
            has_more: false,
        })
        .unwrap();

    assert_eq!(client.pending_len(), 0);
    assert_eq!(client.cursor(), 3);
    assert_eq!(client.entry(&entry.id).unwrap().seq, 3);
}

#[test]
fn give_up_after_retry_budget_requires_user_action() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileDeviceStore::open(dir.path().join("device.json")).unwrap();
    let policy = ReconnectPolicy {
        max_attempts: 2,
        ..ReconnectPolicy::default()
    };
    let client = SyncClient::with_policy(store, MockSink::new(), policy).unwrap();

    assert!(client.on_close().is_some());
    assert!(client.on_close().is_some());
    assert!(client.on_close().is_none());
    assert_eq!(client.status(), ConnectionStatus::Disconnected);

    // The queue is untouched by the give-up; a manual reconnect resumes.
    client.log_entry("feed", "bottle", 1000).unwrap();
    assert_eq!(client.pending_len(), 1);
    client.on_open().unwrap();
    assert_eq!(client.status(), ConnectionStatus::Connected);
}
