//! The client sync engine: produce, ack, catch-up, flush.

use crate::config::ReconnectPolicy;
use crate::error::ClientResult;
use crate::storage::DeviceStore;
use crate::transport::FrameSink;
use nestlog_protocol::{ClientFrame, Entry, EntryAction, ServerFrame, DEFAULT_SYNC_LIMIT};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const KEY_CURSOR: &str = "sync-cursor";
const KEY_PENDING: &str = "sync-pending-queue";
const KEY_PENDING_CONFIG: &str = "sync-pending-config";

/// Connection status surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Transport open, frames flowing.
    Connected,
    /// Transport down, a reconnect is scheduled.
    Connecting,
    /// Transport down and the retry budget is spent.
    Disconnected,
}

/// One frame awaiting its server ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingItem {
    /// The frame to (re-)send.
    pub msg: ClientFrame,
    /// Enqueue wall clock (epoch ms).
    #[serde(rename = "addedAt")]
    pub added_at: i64,
}

/// Mutable engine state behind the client's lock.
struct ClientState {
    cursor: i64,
    /// Insertion-ordered id → frame map; persisted before transmission.
    pending: Vec<(String, PendingItem)>,
    pending_config: Option<String>,
    /// Local replica of the family log, keyed by entry id.
    entries: HashMap<String, Entry>,
    config: Option<String>,
    members: Vec<String>,
    status: ConnectionStatus,
    /// True between `on_open` and the final `sync_response` page.
    catching_up: bool,
    reconnect_attempts: u32,
}

/// The client-side reliability core.
///
/// Owns the persisted cursor and pending queue, a local replica of the
/// log, and the connection status. All persistence goes through the
/// [`DeviceStore`] and is committed before the corresponding frame is
/// transmitted, so a crash between the two re-sends rather than loses.
pub struct SyncClient<S: DeviceStore, T: FrameSink> {
    store: S,
    sink: T,
    policy: ReconnectPolicy,
    state: Mutex<ClientState>,
}

impl<S: DeviceStore, T: FrameSink> SyncClient<S, T> {
    /// Creates a client, restoring cursor and pending queue from storage.
    pub fn new(store: S, sink: T) -> ClientResult<Self> {
        Self::with_policy(store, sink, ReconnectPolicy::default())
    }

    /// Creates a client with a custom reconnect policy.
    pub fn with_policy(store: S, sink: T, policy: ReconnectPolicy) -> ClientResult<Self> {
        let cursor = store
            .get(KEY_CURSOR)?
            .and_then(|text| text.parse().ok())
            .unwrap_or(0);
        let pending = match store.get(KEY_PENDING)? {
            Some(text) => serde_json::from_str(&text)?,
            None => Vec::new(),
        };
        let pending_config = store.get(KEY_PENDING_CONFIG)?;

        Ok(Self {
            store,
            sink,
            policy,
            state: Mutex::new(ClientState {
                cursor,
                pending,
                pending_config,
                entries: HashMap::new(),
                config: None,
                members: Vec::new(),
                status: ConnectionStatus::Disconnected,
                catching_up: false,
                reconnect_attempts: 0,
            }),
        })
    }

    // --- Observers ---------------------------------------------------------

    /// The outbound sink, mostly useful for inspecting a mock in tests.
    pub fn sink(&self) -> &T {
        &self.sink
    }

    /// The highest seq this client has observed, from any source.
    pub fn cursor(&self) -> i64 {
        self.state.lock().cursor
    }

    /// Number of frames awaiting an ack.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    /// A copy of one local entry.
    pub fn entry(&self, id: &str) -> Option<Entry> {
        self.state.lock().entries.get(id).cloned()
    }

    /// A snapshot of the local replica.
    pub fn entries(&self) -> Vec<Entry> {
        self.state.lock().entries.values().cloned().collect()
    }

    /// The last received config blob.
    pub fn config(&self) -> Option<String> {
        self.state.lock().config.clone()
    }

    /// The last received presence list.
    pub fn members(&self) -> Vec<String> {
        self.state.lock().members.clone()
    }

    // --- Produce -----------------------------------------------------------

    /// Logs a new event: fresh UUID, local write, durable enqueue, then an
    /// immediate send attempt. Being offline is not an error; the frame
    /// stays queued.
    pub fn log_entry(
        &self,
        kind: impl Into<String>,
        value: impl Into<String>,
        ts: i64,
    ) -> ClientResult<Entry> {
        let entry = Entry::new(uuid::Uuid::new_v4().to_string(), ts, kind, value);
        self.produce(EntryAction::Add, entry.clone())?;
        Ok(entry)
    }

    /// Re-logs an existing entry with changed fields.
    pub fn update_entry(&self, entry: Entry) -> ClientResult<()> {
        self.produce(EntryAction::Update, entry)
    }

    /// Tombstones an entry locally and queues the delete.
    pub fn delete_entry(&self, id: &str) -> ClientResult<()> {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(id) {
            entry.deleted = true;
        }
        let frame = ClientFrame::delete(id);
        self.enqueue(&mut state, id.to_string(), frame)
    }

    /// Stores a config write in its single pending slot and tries to send.
    pub fn save_config(&self, data: &str) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.config = Some(data.to_string());
        state.pending_config = Some(data.to_string());
        self.store.put(KEY_PENDING_CONFIG, data)?;

        if state.status == ConnectionStatus::Connected {
            let frame = ClientFrame::Config { data: data.into() };
            if self.sink.send(&frame).is_ok() {
                state.pending_config = None;
                self.store.remove(KEY_PENDING_CONFIG)?;
            }
        }
        Ok(())
    }

    fn produce(&self, action: EntryAction, entry: Entry) -> ClientResult<()> {
        let mut state = self.state.lock();
        let id = entry.id.clone();
        state.entries.insert(id.clone(), entry.clone());
        let frame = ClientFrame::entry(action, entry);
        self.enqueue(&mut state, id, frame)
    }

    /// Queue-then-send: the pending write hits durable storage before the
    /// frame can reach the wire.
    fn enqueue(&self, state: &mut ClientState, id: String, frame: ClientFrame) -> ClientResult<()> {
        state.pending.retain(|(existing, _)| *existing != id);
        state.pending.push((
            id,
            PendingItem {
                msg: frame.clone(),
                added_at: now_ms(),
            },
        ));
        self.persist_pending(state)?;

        if state.status == ConnectionStatus::Connected {
            if let Err(err) = self.sink.send(&frame) {
                tracing::debug!(error = %err, "send failed, frame stays pending");
            }
        }
        Ok(())
    }

    // --- Connection lifecycle ----------------------------------------------

    /// Transport opened: start the catch-up scan from the persisted cursor.
    pub fn on_open(&self) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.status = ConnectionStatus::Connected;
        state.catching_up = true;
        state.reconnect_attempts = 0;

        let frame = ClientFrame::sync_request(state.cursor, Some(DEFAULT_SYNC_LIMIT));
        if let Err(err) = self.sink.send(&frame) {
            tracing::debug!(error = %err, "sync_request failed on open");
        }
        Ok(())
    }

    /// Transport closed: returns the backoff delay before the next
    /// reconnect attempt, or `None` once the budget is spent.
    pub fn on_close(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        let attempt = state.reconnect_attempts;
        state.reconnect_attempts += 1;

        match self.policy.delay_for_attempt(attempt) {
            Some(delay) => {
                state.status = ConnectionStatus::Connecting;
                Some(delay)
            }
            None => {
                state.status = ConnectionStatus::Disconnected;
                None
            }
        }
    }

    // --- Receive -----------------------------------------------------------

    /// Applies one inbound server frame.
    pub fn handle_frame(&self, frame: ServerFrame) -> ClientResult<()> {
        match frame {
            ServerFrame::Init { entries, config } => self.handle_init(entries, config),
            ServerFrame::SyncResponse {
                entries,
                cursor,
                has_more,
            } => self.handle_sync_response(entries, cursor, has_more),
            ServerFrame::EntryAck { id, seq } => self.handle_ack(&id, seq),
            ServerFrame::Entry {
                action,
                entry,
                id,
                seq,
            } => self.handle_broadcast(action, entry, id, seq),
            ServerFrame::Config { data } => {
                self.state.lock().config = Some(data);
                Ok(())
            }
            ServerFrame::Presence { members } => {
                self.state.lock().members = members;
                Ok(())
            }
            ServerFrame::Pong => Ok(()),
        }
    }

    /// Init replaces local state per id unconditionally: an init row with
    /// `seq ≤ cursor` may still carry the latest state. Ids appearing in
    /// init leave the pending queue; the server already has them.
    fn handle_init(&self, entries: Vec<Entry>, config: String) -> ClientResult<()> {
        let mut state = self.state.lock();
        let before = state.pending.len();
        let mut max_seq = state.cursor;

        for entry in entries {
            max_seq = max_seq.max(entry.seq);
            state.pending.retain(|(id, _)| *id != entry.id);
            state.entries.insert(entry.id.clone(), entry);
        }
        state.config = Some(config);

        if state.pending.len() != before {
            self.persist_pending(&state)?;
        }
        self.advance_cursor(&mut state, max_seq)?;
        Ok(())
    }

    fn handle_sync_response(
        &self,
        entries: Vec<Entry>,
        cursor: i64,
        has_more: bool,
    ) -> ClientResult<()> {
        let mut state = self.state.lock();
        let mut max_seq = cursor;
        for entry in entries {
            max_seq = max_seq.max(entry.seq);
            state.entries.insert(entry.id.clone(), entry);
        }
        self.advance_cursor(&mut state, max_seq)?;

        if has_more {
            let frame = ClientFrame::sync_request(state.cursor, Some(DEFAULT_SYNC_LIMIT));
            if let Err(err) = self.sink.send(&frame) {
                tracing::debug!(error = %err, "follow-up sync_request failed");
            }
        } else if state.catching_up {
            state.catching_up = false;
            self.flush_pending(&mut state)?;
        }
        Ok(())
    }

    /// Ack: drop the frame from the pending queue and advance the cursor.
    /// An id missing from the queue (storage wipe, duplicate ack) is a
    /// no-op.
    fn handle_ack(&self, id: &str, seq: i64) -> ClientResult<()> {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|(pending_id, _)| pending_id != id);
        if state.pending.len() != before {
            self.persist_pending(&state)?;
        }

        if let Some(entry) = state.entries.get_mut(id) {
            if entry.seq < seq {
                entry.seq = seq;
            }
        }
        self.advance_cursor(&mut state, seq)?;
        Ok(())
    }

    fn handle_broadcast(
        &self,
        action: EntryAction,
        entry: Option<Entry>,
        id: Option<String>,
        seq: Option<i64>,
    ) -> ClientResult<()> {
        let mut state = self.state.lock();
        match action {
            EntryAction::Add | EntryAction::Update => {
                let Some(entry) = entry else {
                    tracing::debug!("entry broadcast without body");
                    return Ok(());
                };
                let seq = entry.seq;
                state.entries.insert(entry.id.clone(), entry);
                self.advance_cursor(&mut state, seq)?;
            }
            EntryAction::Delete => {
                let (Some(id), Some(seq)) = (id, seq) else {
                    tracing::debug!("delete broadcast without id or seq");
                    return Ok(());
                };
                if let Some(entry) = state.entries.get_mut(&id) {
                    entry.deleted = true;
                    entry.seq = seq;
                }
                self.advance_cursor(&mut state, seq)?;
            }
        }
        Ok(())
    }

    // --- Internals ---------------------------------------------------------

    /// Re-sends everything awaiting an ack, in insertion order, then the
    /// pending config. Nothing leaves the queue until its ack arrives.
    fn flush_pending(&self, state: &mut ClientState) -> ClientResult<()> {
        for (_, item) in &state.pending {
            if let Err(err) = self.sink.send(&item.msg) {
                tracing::debug!(error = %err, "flush interrupted, will retry next sync");
                return Ok(());
            }
        }
        if let Some(data) = state.pending_config.clone() {
            let frame = ClientFrame::Config { data };
            if self.sink.send(&frame).is_ok() {
                state.pending_config = None;
                self.store.remove(KEY_PENDING_CONFIG)?;
            }
        }
        Ok(())
    }

    fn advance_cursor(&self, state: &mut ClientState, seq: i64) -> ClientResult<()> {
        if seq > state.cursor {
            state.cursor = seq;
            self.store.put(KEY_CURSOR, &state.cursor.to_string())?;
        }
        Ok(())
    }

    fn persist_pending(&self, state: &ClientState) -> ClientResult<()> {
        let json = serde_json::to_string(&state.pending)?;
        self.store.put(KEY_PENDING, &json)
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
