//! In-memory registry of live sessions, grouped by family.

use nestlog_protocol::ServerFrame;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Outbound queue depth per session, in frames.
pub(crate) const OUTBOUND_BUFFER: usize = 256;

/// The sending half of one connected session.
///
/// Cloneable; the hub keeps one clone in its registry and the session task
/// keeps another for acks and direct replies. The outbound channel closes
/// once both are gone, which ends the session's write task.
#[derive(Clone)]
pub struct SessionHandle {
    /// Process-unique session id.
    pub id: u64,
    /// The family this session is subscribed to.
    pub family_id: String,
    /// Label from the access link; may be empty.
    pub label: String,
    tx: mpsc::Sender<ServerFrame>,
}

impl SessionHandle {
    /// Queues a frame to this session, waiting for buffer space.
    ///
    /// Used for point-to-point traffic (init, acks, sync responses, pong)
    /// where back-pressure should slow the submitter's own read loop.
    /// Returns false when the session is gone.
    pub async fn send(&self, frame: ServerFrame) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    /// Queues a frame without waiting; drops it when the buffer is full.
    fn try_send(&self, frame: ServerFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

/// Registry of connected sessions keyed by family.
///
/// Reads (broadcast fan-out, presence computation) take the shared lock;
/// registration churn takes the exclusive lock. Fan-out never blocks on a
/// slow recipient: a full outbound buffer drops that recipient's frame and
/// the recipient self-heals on its next sync request.
pub struct SyncHub {
    next_id: AtomicU64,
    families: RwLock<HashMap<String, HashMap<u64, SessionHandle>>>,
}

impl SyncHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            families: RwLock::new(HashMap::new()),
        }
    }

    /// Allocates a handle and the receiving end of its outbound queue.
    pub fn create_session(
        &self,
        family_id: &str,
        label: &str,
    ) -> (SessionHandle, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let handle = SessionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            family_id: family_id.to_string(),
            label: label.to_string(),
            tx,
        };
        (handle, rx)
    }

    /// Adds a session to its family's set and announces the new presence
    /// list to everyone in the family, the newcomer included.
    pub fn register(&self, session: SessionHandle) {
        let mut families = self.families.write();
        let sessions = families.entry(session.family_id.clone()).or_default();
        sessions.insert(session.id, session);
        broadcast_presence(sessions);
    }

    /// Removes a session, dropping the hub's half of its outbound channel.
    /// Announces the shrunk presence list when peers remain.
    pub fn unregister(&self, session: &SessionHandle) {
        let mut families = self.families.write();
        if let Some(sessions) = families.get_mut(&session.family_id) {
            sessions.remove(&session.id);
            if sessions.is_empty() {
                families.remove(&session.family_id);
            } else {
                broadcast_presence(sessions);
            }
        }
    }

    /// Sends a frame to every session in the family except `except`.
    pub fn broadcast(&self, family_id: &str, frame: &ServerFrame, except: u64) {
        let families = self.families.read();
        let Some(sessions) = families.get(family_id) else {
            return;
        };
        for session in sessions.values() {
            if session.id != except && !session.try_send(frame.clone()) {
                tracing::debug!(
                    session = session.id,
                    family = family_id,
                    "outbound buffer full, dropping broadcast"
                );
            }
        }
    }

    /// Number of sessions currently subscribed to a family.
    pub fn session_count(&self, family_id: &str) -> usize {
        self.families
            .read()
            .get(family_id)
            .map_or(0, HashMap::len)
    }
}

impl Default for SyncHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Emits the family's presence frame to every member. Called with the
/// registry lock held, so the membership snapshot is consistent.
fn broadcast_presence(sessions: &HashMap<u64, SessionHandle>) {
    let members: Vec<String> = sessions
        .values()
        .filter(|s| !s.label.is_empty())
        .map(|s| s.label.clone())
        .collect();
    let frame = ServerFrame::Presence { members };
    for session in sessions.values() {
        session.try_send(frame.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestlog_protocol::{Entry, EntryAction};
    use tokio::sync::mpsc::error::TryRecvError;

    fn recv_now(rx: &mut mpsc::Receiver<ServerFrame>) -> Option<ServerFrame> {
        match rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = recv_now(rx) {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn register_emits_presence_to_family() {
        let hub = SyncHub::new();
        let (a, mut rx_a) = hub.create_session("fam1", "Phone");
        let (b, mut rx_b) = hub.create_session("fam1", "Tablet");

        hub.register(a);
        let first = drain(&mut rx_a);
        assert_eq!(
            first,
            vec![ServerFrame::Presence {
                members: vec!["Phone".into()]
            }]
        );

        hub.register(b);
        // Both sessions learn about the newcomer.
        let frames_a = drain(&mut rx_a);
        let frames_b = drain(&mut rx_b);
        for frames in [frames_a, frames_b] {
            assert_eq!(frames.len(), 1);
            match &frames[0] {
                ServerFrame::Presence { members } => {
                    let mut members = members.clone();
                    members.sort();
                    assert_eq!(members, vec!["Phone".to_string(), "Tablet".to_string()]);
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[test]
    fn empty_labels_hidden_from_presence() {
        let hub = SyncHub::new();
        let (a, mut rx_a) = hub.create_session("fam1", "");
        hub.register(a);

        assert_eq!(
            drain(&mut rx_a),
            vec![ServerFrame::Presence { members: vec![] }]
        );
    }

    #[test]
    fn broadcast_excludes_submitter_and_other_families() {
        let hub = SyncHub::new();
        let (a, mut rx_a) = hub.create_session("fam1", "A");
        let (b, mut rx_b) = hub.create_session("fam1", "B");
        let (c, mut rx_c) = hub.create_session("fam2", "C");
        let a_id = a.id;
        hub.register(a);
        hub.register(b);
        hub.register(c);
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        let frame = ServerFrame::entry_broadcast(EntryAction::Add, Entry::new("e1", 1, "feed", "x"));
        hub.broadcast("fam1", &frame, a_id);

        assert_eq!(drain(&mut rx_a), vec![]);
        assert_eq!(drain(&mut rx_b), vec![frame]);
        assert_eq!(drain(&mut rx_c), vec![]);
    }

    #[test]
    fn full_buffer_drops_frame_for_that_recipient_only() {
        let hub = SyncHub::new();
        let (a, mut rx_a) = hub.create_session("fam1", "A");
        let (b, mut rx_b) = hub.create_session("fam1", "B");
        hub.register(a);
        hub.register(b);
        drain(&mut rx_a);
        // B never drains; its buffer holds one presence frame already.

        let frame = ServerFrame::Pong;
        for _ in 0..OUTBOUND_BUFFER + 10 {
            hub.broadcast("fam1", &frame, 0);
        }

        // A drained up front, so it holds exactly a full buffer; B's overflow
        // was dropped without wedging the fan-out.
        assert_eq!(drain(&mut rx_a).len(), OUTBOUND_BUFFER);
        assert_eq!(drain(&mut rx_b).len(), OUTBOUND_BUFFER);
    }

    #[test]
    fn unregister_closes_channel_and_updates_presence() {
        let hub = SyncHub::new();
        let (a, mut rx_a) = hub.create_session("fam1", "A");
        let (b, mut rx_b) = hub.create_session("fam1", "B");
        hub.register(a.clone());
        hub.register(b);
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.unregister(&a);
        drop(a); // session task's clone goes away with the task

        assert!(matches!(rx_a.try_recv(), Err(TryRecvError::Disconnected)));
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerFrame::Presence {
                members: vec!["B".into()]
            }]
        );
        assert_eq!(hub.session_count("fam1"), 1);
    }

    #[test]
    fn last_unregister_removes_family_set() {
        let hub = SyncHub::new();
        let (a, _rx_a) = hub.create_session("fam1", "A");
        hub.register(a.clone());
        assert_eq!(hub.session_count("fam1"), 1);

        hub.unregister(&a);
        assert_eq!(hub.session_count("fam1"), 0);
        assert!(hub.families.read().is_empty());
    }
}
