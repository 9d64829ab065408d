//! Wire frames for the sync protocol.
//!
//! Every frame is a UTF-8 JSON object tagged by a required `type` field.
//! Client frames flow client → server, server frames the other way; the
//! `entry` tag exists in both directions with different payloads
//! (submission vs broadcast).

use crate::entry::Entry;
use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};

/// The action carried by an `entry` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryAction {
    /// Create a new entry (first receipt of an id).
    Add,
    /// Overwrite an existing entry's fields.
    Update,
    /// Mark an entry deleted (tombstone).
    Delete,
}

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Cursor-based catch-up request; may piggy-back a batch of
    /// client-produced entries (legacy bulk push).
    #[serde(alias = "sync")]
    SyncRequest {
        /// Highest seq the client has observed; 0 means from the beginning.
        #[serde(default)]
        cursor: i64,
        /// Requested batch size; the server clamps it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
        /// Client-produced entries to push before the scan.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        entries: Vec<Entry>,
    },
    /// A single mutation: add/update carry the entry, delete carries the id.
    Entry {
        /// What to do with the entry.
        action: EntryAction,
        /// Full entry body for add/update.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entry: Option<Entry>,
        /// Entry id for delete.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Overwrite the family's presentation config (last writer wins).
    Config {
        /// Opaque JSON text.
        data: String,
    },
    /// Keep-alive probe.
    Ping,
}

impl ClientFrame {
    /// Builds a `sync_request` frame with no piggy-backed entries.
    pub fn sync_request(cursor: i64, limit: Option<u32>) -> Self {
        ClientFrame::SyncRequest {
            cursor,
            limit,
            entries: Vec::new(),
        }
    }

    /// Builds an `entry` frame for an add or update.
    pub fn entry(action: EntryAction, entry: Entry) -> Self {
        ClientFrame::Entry {
            action,
            entry: Some(entry),
            id: None,
        }
    }

    /// Builds an `entry` frame for a delete.
    pub fn delete(id: impl Into<String>) -> Self {
        ClientFrame::Entry {
            action: EntryAction::Delete,
            entry: None,
            id: Some(id.into()),
        }
    }

    /// Encodes to JSON text.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from JSON text.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame after connect: the family's full entry snapshot
    /// (tombstones included, ordered by `updated_at`) and the config blob.
    Init {
        /// All entries for the family.
        entries: Vec<Entry>,
        /// Opaque config JSON text (`{}` when never written).
        config: String,
    },
    /// One page of the cursor-based catch-up scan.
    SyncResponse {
        /// Entries with `seq` greater than the requested cursor.
        entries: Vec<Entry>,
        /// New cursor: max seq among `entries`, or the request cursor.
        cursor: i64,
        /// Whether another page exists past `cursor`.
        has_more: bool,
    },
    /// A mutation broadcast to the family's other sessions. Add/update
    /// carry the full entry (with its new seq); delete carries the id and
    /// seq at the top level.
    Entry {
        /// The mutation kind.
        action: EntryAction,
        /// Full entry body for add/update broadcasts.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entry: Option<Entry>,
        /// Entry id for delete broadcasts.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Assigned seq for delete broadcasts.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<i64>,
    },
    /// Point-to-point confirmation to the submitter that a mutation was
    /// persisted with the given seq.
    EntryAck {
        /// The acknowledged entry id.
        id: String,
        /// The assigned seq.
        seq: i64,
    },
    /// Config broadcast to the family's other sessions.
    Config {
        /// Opaque JSON text.
        data: String,
    },
    /// Currently-connected labels for the family; sent on membership churn.
    Presence {
        /// Non-empty session labels.
        members: Vec<String>,
    },
    /// Reply to a client `ping`.
    Pong,
}

impl ServerFrame {
    /// Builds an `entry_ack` frame.
    pub fn ack(id: impl Into<String>, seq: i64) -> Self {
        ServerFrame::EntryAck { id: id.into(), seq }
    }

    /// Builds an add/update broadcast carrying the full entry.
    pub fn entry_broadcast(action: EntryAction, entry: Entry) -> Self {
        ServerFrame::Entry {
            action,
            entry: Some(entry),
            id: None,
            seq: None,
        }
    }

    /// Builds a delete broadcast carrying only the id and seq.
    pub fn delete_broadcast(id: impl Into<String>, seq: i64) -> Self {
        ServerFrame::Entry {
            action: EntryAction::Delete,
            entry: None,
            id: Some(id.into()),
            seq: Some(seq),
        }
    }

    /// Encodes to JSON text.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from JSON text.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
