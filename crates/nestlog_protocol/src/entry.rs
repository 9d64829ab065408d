//! Logged-event records.

use serde::{Deserialize, Serialize};

/// A single logged event in a family's log.
///
/// The id is chosen by the client (a UUID); `seq` and `updated_at` are
/// assigned by the server on every mutation. A deleted entry stays in the
/// log as a tombstone so late-joining replicas learn of the deletion.
///
/// # Fields
///
/// - `id`: Client-chosen entry identifier, unique per family
/// - `family_id`: Owning family; the server rewrites this from the session
/// - `ts`: Event timestamp (epoch ms, client-chosen, may be back-dated)
/// - `kind`: Short event type string (serialized as `type`)
/// - `value`: Short event value string
/// - `deleted`: Tombstone flag
/// - `updated_at`: Server wall-clock ms of the last mutation
/// - `seq`: Server-assigned per-family sequence number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Client-chosen entry ID.
    pub id: String,
    /// Owning family ID.
    #[serde(default)]
    pub family_id: String,
    /// Event timestamp (epoch ms).
    pub ts: i64,
    /// Event type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event value.
    pub value: String,
    /// Tombstone flag.
    #[serde(default)]
    pub deleted: bool,
    /// Last-mutation wall clock (epoch ms), server-assigned.
    #[serde(default)]
    pub updated_at: i64,
    /// Per-family sequence number, server-assigned.
    #[serde(default)]
    pub seq: i64,
}

impl Entry {
    /// Creates a new entry as a client produces it: no family, no seq.
    pub fn new(
        id: impl Into<String>,
        ts: i64,
        kind: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            family_id: String::new(),
            ts,
            kind: kind.into(),
            value: value.into(),
            deleted: false,
            updated_at: 0,
            seq: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_json_shape() {
        let mut entry = Entry::new("e1", 1000, "feed", "bottle");
        entry.family_id = "fam1".into();
        entry.seq = 7;
        entry.updated_at = 2000;

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["id"], "e1");
        assert_eq!(json["family_id"], "fam1");
        assert_eq!(json["ts"], 1000);
        assert_eq!(json["type"], "feed");
        assert_eq!(json["value"], "bottle");
        assert_eq!(json["deleted"], false);
        assert_eq!(json["updated_at"], 2000);
        assert_eq!(json["seq"], 7);
    }

    #[test]
    fn entry_decodes_without_server_fields() {
        // A client-produced entry omits everything the server assigns.
        let entry: Entry =
            serde_json::from_str(r#"{"id":"e1","ts":5,"type":"sleep","value":"start"}"#).unwrap();
        assert_eq!(entry.id, "e1");
        assert_eq!(entry.kind, "sleep");
        assert!(!entry.deleted);
        assert_eq!(entry.seq, 0);
        assert_eq!(entry.updated_at, 0);
        assert!(entry.family_id.is_empty());
    }
}
