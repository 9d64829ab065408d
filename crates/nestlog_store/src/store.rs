//! The record store: families, entries, configs, access links, operators.

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::password;
use nestlog_protocol::Entry;
use parking_lot::Mutex;
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How long a writer waits on a contended database before the call fails
/// with a transient error.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// A logical tenant: one baby's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Family {
    /// Stable 8-hex-char id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form operator notes.
    pub notes: String,
    /// Creation wall clock (epoch ms).
    pub created_at: i64,
    /// Soft-archive flag; families are never destroyed.
    pub archived: bool,
    /// Current sequence number; bumped by every entry/delete mutation.
    pub seq: i64,
}

/// Activity statistics for one family, shown on the operator surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct FamilyStats {
    /// Number of non-deleted entries.
    pub entry_count: i64,
    /// Most recent event timestamp (epoch ms), 0 when empty.
    pub latest_activity: i64,
    /// Number of issued access links.
    pub link_count: i64,
}

/// A long-lived capability granting read/write access to one family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLink {
    /// 32-hex-char random token.
    pub token: String,
    /// The family this link opens.
    pub family_id: String,
    /// Human-readable device/person label, may be empty.
    pub label: String,
    /// Expiry wall clock (epoch ms); `None` means never.
    pub expires_at: Option<i64>,
    /// Creation wall clock (epoch ms).
    pub created_at: i64,
}

/// An operator account.
#[derive(Debug, Clone)]
pub struct Admin {
    /// Stable id.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Argon2id password hash.
    pub password_hash: String,
    /// Creation wall clock (epoch ms).
    pub created_at: i64,
}

/// Generates a random hex token of `bytes` bytes (2×`bytes` hex chars).
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Durable store for everything that survives a restart.
///
/// A single WAL-mode SQLite connection serialized by a mutex. Every entry
/// mutation bumps its family's `seq` and writes the row inside one
/// `BEGIN IMMEDIATE` transaction, so sequence values observed by scans and
/// post-commit broadcasts form a strict per-family total order.
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Opens (creating if absent) the store at `path` and applies migrations.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory store, for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --- Entries -----------------------------------------------------------

    /// Persists an entry, assigning the next family sequence number.
    ///
    /// A second write with an existing id overwrites `ts`, `type`, `value`,
    /// `deleted` and carries the fresh `seq`; the row keeps only its latest
    /// state. Fails with [`StoreError::NotFound`] when the family does not
    /// exist.
    pub fn upsert_entry(&self, mut entry: Entry) -> StoreResult<Entry> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let seq = bump_family_seq(&tx, &entry.family_id)?;
        entry.seq = seq;
        entry.updated_at = now_ms();

        tx.execute(
            "INSERT INTO entries (id, family_id, ts, type, value, deleted, updated_at, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
               ts = excluded.ts,
               type = excluded.type,
               value = excluded.value,
               deleted = excluded.deleted,
               updated_at = excluded.updated_at,
               seq = excluded.seq",
            params![
                entry.id,
                entry.family_id,
                entry.ts,
                entry.kind,
                entry.value,
                entry.deleted,
                entry.updated_at,
                entry.seq,
            ],
        )?;

        tx.commit()?;
        Ok(entry)
    }

    /// Marks an entry deleted, assigning a fresh sequence number.
    ///
    /// Returns the assigned seq. An id unknown to this family yields
    /// [`StoreError::NotFound`] without bumping the family sequence, so no
    /// tombstone is minted for ghost ids.
    pub fn delete_entry(&self, family_id: &str, id: &str) -> StoreResult<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM entries WHERE id = ?1 AND family_id = ?2",
                params![id, family_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        let seq = bump_family_seq(&tx, family_id)?;
        tx.execute(
            "UPDATE entries SET deleted = 1, updated_at = ?1, seq = ?2
             WHERE id = ?3 AND family_id = ?4",
            params![now_ms(), seq, id, family_id],
        )?;

        tx.commit()?;
        Ok(seq)
    }

    /// Returns up to `limit` entries with `seq` greater than `cursor`,
    /// ordered by seq ascending, plus whether more remain past them.
    ///
    /// Tombstones are never hidden; the caller needs them to converge.
    pub fn entries_since_cursor(
        &self,
        family_id: &str,
        cursor: i64,
        limit: u32,
    ) -> StoreResult<(Vec<Entry>, bool)> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, family_id, ts, type, value, deleted, updated_at, seq
             FROM entries
             WHERE family_id = ?1 AND seq > ?2
             ORDER BY seq ASC
             LIMIT ?3",
        )?;

        // Fetch one past the limit so has_more is exact.
        let mut entries: Vec<Entry> = stmt
            .query_map(params![family_id, cursor, limit + 1], entry_from_row)?
            .collect::<Result<_, _>>()?;

        let has_more = entries.len() > limit as usize;
        if has_more {
            entries.truncate(limit as usize);
        }
        Ok((entries, has_more))
    }

    /// Returns every entry for the family (tombstones included), ordered by
    /// `updated_at` ascending. Used for the init frame on subscribe.
    pub fn all_entries(&self, family_id: &str) -> StoreResult<Vec<Entry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, family_id, ts, type, value, deleted, updated_at, seq
             FROM entries
             WHERE family_id = ?1
             ORDER BY updated_at ASC",
        )?;
        let entries = stmt
            .query_map(params![family_id], entry_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(entries)
    }

    /// Returns non-deleted entries with event timestamps in
    /// `[start_ms, end_ms)`, ordered by event time. Feeds the daily summary.
    pub fn entries_in_range(
        &self,
        family_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> StoreResult<Vec<Entry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, family_id, ts, type, value, deleted, updated_at, seq
             FROM entries
             WHERE family_id = ?1 AND deleted = 0 AND ts >= ?2 AND ts < ?3
             ORDER BY ts ASC",
        )?;
        let entries = stmt
            .query_map(params![family_id, start_ms, end_ms], entry_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(entries)
    }

    // --- Configs -----------------------------------------------------------

    /// Returns the family's config blob, or `{}` when never written.
    pub fn get_config(&self, family_id: &str) -> StoreResult<String> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM configs WHERE family_id = ?1",
                params![family_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data.unwrap_or_else(|| "{}".to_string()))
    }

    /// Overwrites the family's config blob (last writer wins).
    pub fn save_config(&self, family_id: &str, data: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO configs (family_id, data, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(family_id) DO UPDATE SET
               data = excluded.data,
               updated_at = excluded.updated_at",
            params![family_id, data, now_ms()],
        )?;
        Ok(())
    }

    // --- Families ----------------------------------------------------------

    /// Creates a family with a random 8-hex-char id.
    pub fn create_family(&self, name: &str, notes: &str) -> StoreResult<Family> {
        let family = Family {
            id: generate_token(4),
            name: name.to_string(),
            notes: notes.to_string(),
            created_at: now_ms(),
            archived: false,
            seq: 0,
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO families (id, name, notes, created_at, archived, seq)
             VALUES (?1, ?2, ?3, ?4, 0, 0)",
            params![family.id, family.name, family.notes, family.created_at],
        )?;
        Ok(family)
    }

    /// Fetches a family by id.
    pub fn get_family(&self, id: &str) -> StoreResult<Family> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, notes, created_at, archived, seq FROM families WHERE id = ?1",
            params![id],
            family_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    /// Lists families, newest first, optionally including archived ones.
    pub fn list_families(&self, include_archived: bool) -> StoreResult<Vec<Family>> {
        let conn = self.conn.lock();
        let sql = if include_archived {
            "SELECT id, name, notes, created_at, archived, seq FROM families
             ORDER BY created_at DESC"
        } else {
            "SELECT id, name, notes, created_at, archived, seq FROM families
             WHERE archived = 0 ORDER BY created_at DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let families = stmt
            .query_map([], family_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(families)
    }

    /// Applies a partial update to a family. Absent fields are untouched.
    pub fn update_family(
        &self,
        id: &str,
        name: Option<&str>,
        notes: Option<&str>,
        archived: Option<bool>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        if let Some(name) = name {
            conn.execute(
                "UPDATE families SET name = ?1 WHERE id = ?2",
                params![name, id],
            )?;
        }
        if let Some(notes) = notes {
            conn.execute(
                "UPDATE families SET notes = ?1 WHERE id = ?2",
                params![notes, id],
            )?;
        }
        if let Some(archived) = archived {
            conn.execute(
                "UPDATE families SET archived = ?1 WHERE id = ?2",
                params![archived, id],
            )?;
        }
        Ok(())
    }

    /// Returns entry/activity/link counts for the operator listing.
    pub fn family_stats(&self, family_id: &str) -> StoreResult<FamilyStats> {
        let conn = self.conn.lock();
        let entry_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE family_id = ?1 AND deleted = 0",
            params![family_id],
            |row| row.get(0),
        )?;
        let latest_activity: i64 = conn.query_row(
            "SELECT COALESCE(MAX(ts), 0) FROM entries WHERE family_id = ?1 AND deleted = 0",
            params![family_id],
            |row| row.get(0),
        )?;
        let link_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM access_links WHERE family_id = ?1",
            params![family_id],
            |row| row.get(0),
        )?;
        Ok(FamilyStats {
            entry_count,
            latest_activity,
            link_count,
        })
    }

    // --- Access links ------------------------------------------------------

    /// Issues a new 32-hex-char access link for a family.
    pub fn create_access_link(
        &self,
        family_id: &str,
        label: &str,
        expires_at: Option<i64>,
    ) -> StoreResult<AccessLink> {
        let link = AccessLink {
            token: generate_token(16),
            family_id: family_id.to_string(),
            label: label.to_string(),
            expires_at,
            created_at: now_ms(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO access_links (token, family_id, label, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                link.token,
                link.family_id,
                link.label,
                link.expires_at,
                link.created_at
            ],
        )?;
        Ok(link)
    }

    /// Lists a family's access links, newest first.
    pub fn list_access_links(&self, family_id: &str) -> StoreResult<Vec<AccessLink>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT token, family_id, label, expires_at, created_at
             FROM access_links WHERE family_id = ?1 ORDER BY created_at DESC",
        )?;
        let links = stmt
            .query_map(params![family_id], link_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(links)
    }

    /// Resolves an access token to its link.
    ///
    /// Expired and unknown tokens both fail with [`StoreError::NotFound`];
    /// there is no caching, so revocation takes effect on the next connect.
    pub fn validate_access_link(&self, token: &str) -> StoreResult<AccessLink> {
        let conn = self.conn.lock();
        let link = conn
            .query_row(
                "SELECT token, family_id, label, expires_at, created_at
                 FROM access_links WHERE token = ?1",
                params![token],
                link_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        if let Some(expires_at) = link.expires_at {
            if now_ms() > expires_at {
                return Err(StoreError::NotFound);
            }
        }
        Ok(link)
    }

    /// Revokes an access link.
    pub fn delete_access_link(&self, token: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM access_links WHERE token = ?1", params![token])?;
        Ok(())
    }

    // --- Operators ---------------------------------------------------------

    /// Creates the operator account if it does not exist yet.
    pub fn ensure_admin(&self, username: &str, password: &str) -> StoreResult<()> {
        {
            let conn = self.conn.lock();
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM admins WHERE username = ?1",
                    params![username],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Ok(());
            }
        }

        // Hash outside the lock; argon2 is deliberately slow.
        let hash = password::hash_password(password)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO admins (id, username, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![generate_token(8), username, hash, now_ms()],
        )?;
        Ok(())
    }

    /// Fetches an operator account by username.
    pub fn admin_by_username(&self, username: &str) -> StoreResult<Admin> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password_hash, created_at FROM admins WHERE username = ?1",
            params![username],
            |row| {
                Ok(Admin {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    password_hash: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    /// Creates an operator session valid for `ttl_ms`, returning its token.
    pub fn create_admin_session(&self, admin_id: &str, ttl_ms: i64) -> StoreResult<String> {
        let token = generate_token(32);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO admin_sessions (token, admin_id, expires_at) VALUES (?1, ?2, ?3)",
            params![token, admin_id, now_ms() + ttl_ms],
        )?;
        Ok(token)
    }

    /// Resolves an operator session token to its admin id.
    ///
    /// Expired sessions are deleted on sight and reported as not found.
    pub fn validate_admin_session(&self, token: &str) -> StoreResult<String> {
        let conn = self.conn.lock();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT admin_id, expires_at FROM admin_sessions WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (admin_id, expires_at) = row.ok_or(StoreError::NotFound)?;
        if now_ms() > expires_at {
            conn.execute("DELETE FROM admin_sessions WHERE token = ?1", params![token])?;
            return Err(StoreError::NotFound);
        }
        Ok(admin_id)
    }

    /// Deletes an operator session (logout).
    pub fn delete_admin_session(&self, token: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM admin_sessions WHERE token = ?1", params![token])?;
        Ok(())
    }
}

/// Bumps and returns the family's sequence number. Must run inside the
/// caller's transaction so the bump and the row write commit together.
fn bump_family_seq(tx: &rusqlite::Transaction<'_>, family_id: &str) -> StoreResult<i64> {
    let updated = tx.execute(
        "UPDATE families SET seq = seq + 1 WHERE id = ?1",
        params![family_id],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound);
    }
    let seq = tx.query_row(
        "SELECT seq FROM families WHERE id = ?1",
        params![family_id],
        |row| row.get(0),
    )?;
    Ok(seq)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        family_id: row.get(1)?,
        ts: row.get(2)?,
        kind: row.get(3)?,
        value: row.get(4)?,
        deleted: row.get(5)?,
        updated_at: row.get(6)?,
        seq: row.get(7)?,
    })
}

fn family_from_row(row: &Row<'_>) -> rusqlite::Result<Family> {
    Ok(Family {
        id: row.get(0)?,
        name: row.get(1)?,
        notes: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        created_at: row.get(3)?,
        archived: row.get(4)?,
        seq: row.get(5)?,
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<AccessLink> {
    Ok(AccessLink {
        token: row.get(0)?,
        family_id: row.get(1)?,
        label: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        expires_at: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (RecordStore, Family) {
        let store = RecordStore::open_in_memory().unwrap();
        let family = store.create_family("Test Baby", "").unwrap();
        (store, family)
    }

    fn make_entry(id: &str, family_id: &str) -> Entry {
        let mut entry = Entry::new(id, 1000, "feed", "bottle");
        entry.family_id = family_id.to_string();
        entry
    }

    #[test]
    fn sequence_starts_at_one_and_increases() {
        let (store, family) = make_store();

        let e1 = store.upsert_entry(make_entry("e1", &family.id)).unwrap();
        let e2 = store.upsert_entry(make_entry("e2", &family.id)).unwrap();
        let e3 = store.upsert_entry(make_entry("e3", &family.id)).unwrap();

        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
        assert_eq!(e3.seq, 3);
        assert_eq!(store.get_family(&family.id).unwrap().seq, 3);
    }

    #[test]
    fn upsert_same_id_is_update() {
        let (store, family) = make_store();

        store.upsert_entry(make_entry("e1", &family.id)).unwrap();
        let mut again = make_entry("e1", &family.id);
        again.value = "breast".into();
        let updated = store.upsert_entry(again).unwrap();

        assert_eq!(updated.seq, 2);

        // Only one row, carrying the latest state and seq.
        let all = store.all_entries(&family.id).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].value, "breast");
        assert_eq!(all[0].seq, 2);
    }

    #[test]
    fn upsert_unknown_family_fails() {
        let (store, _family) = make_store();
        let err = store.upsert_entry(make_entry("e1", "nope")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn delete_sets_tombstone_with_fresh_seq() {
        let (store, family) = make_store();

        let e1 = store.upsert_entry(make_entry("e1", &family.id)).unwrap();
        let seq = store.delete_entry(&family.id, "e1").unwrap();
        assert!(seq > e1.seq);

        let all = store.all_entries(&family.id).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].deleted);
        assert_eq!(all[0].seq, seq);
    }

    #[test]
    fn delete_unknown_id_does_not_bump_sequence() {
        let (store, family) = make_store();
        store.upsert_entry(make_entry("e1", &family.id)).unwrap();

        let err = store.delete_entry(&family.id, "ghost").unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert_eq!(store.get_family(&family.id).unwrap().seq, 1);
    }

    #[test]
    fn delete_is_idempotent_but_advances_seq() {
        let (store, family) = make_store();
        store.upsert_entry(make_entry("e1", &family.id)).unwrap();

        let first = store.delete_entry(&family.id, "e1").unwrap();
        let second = store.delete_entry(&family.id, "e1").unwrap();
        assert!(second > first);

        let all = store.all_entries(&family.id).unwrap();
        assert!(all[0].deleted);
    }

    #[test]
    fn delete_scoped_to_family() {
        let (store, family) = make_store();
        let other = store.create_family("Other Baby", "").unwrap();
        store.upsert_entry(make_entry("e1", &family.id)).unwrap();

        let err = store.delete_entry(&other.id, "e1").unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn cursor_scan_pages_in_seq_order() {
        let (store, family) = make_store();
        for i in 0..5 {
            store
                .upsert_entry(make_entry(&format!("e{i}"), &family.id))
                .unwrap();
        }

        let (page, has_more) = store.entries_since_cursor(&family.id, 0, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert!(has_more);
        assert_eq!(page[0].seq, 1);
        assert_eq!(page[1].seq, 2);

        let (page, has_more) = store.entries_since_cursor(&family.id, 2, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert!(has_more);

        let (page, has_more) = store.entries_since_cursor(&family.id, 4, 2).unwrap();
        assert_eq!(page.len(), 1);
        assert!(!has_more);
    }

    #[test]
    fn cursor_at_head_returns_empty() {
        let (store, family) = make_store();
        store.upsert_entry(make_entry("e1", &family.id)).unwrap();

        let head = store.get_family(&family.id).unwrap().seq;
        let (page, has_more) = store.entries_since_cursor(&family.id, head, 10).unwrap();
        assert!(page.is_empty());
        assert!(!has_more);
    }

    #[test]
    fn cursor_scan_includes_tombstones() {
        let (store, family) = make_store();
        let e1 = store.upsert_entry(make_entry("e1", &family.id)).unwrap();
        store.delete_entry(&family.id, "e1").unwrap();

        // Any cursor strictly below the tombstone's seq returns it.
        let (page, _) = store.entries_since_cursor(&family.id, e1.seq, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert!(page[0].deleted);
    }

    #[test]
    fn config_last_writer_wins() {
        let (store, family) = make_store();

        assert_eq!(store.get_config(&family.id).unwrap(), "{}");
        store.save_config(&family.id, r#"{"theme":"day"}"#).unwrap();
        store
            .save_config(&family.id, r#"{"theme":"night"}"#)
            .unwrap();
        assert_eq!(store.get_config(&family.id).unwrap(), r#"{"theme":"night"}"#);
    }

    #[test]
    fn access_link_lifecycle() {
        let (store, family) = make_store();

        let link = store
            .create_access_link(&family.id, "Mom's phone", None)
            .unwrap();
        assert_eq!(link.token.len(), 32);

        let resolved = store.validate_access_link(&link.token).unwrap();
        assert_eq!(resolved.family_id, family.id);
        assert_eq!(resolved.label, "Mom's phone");

        store.delete_access_link(&link.token).unwrap();
        assert!(matches!(
            store.validate_access_link(&link.token),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn expired_access_link_rejected() {
        let (store, family) = make_store();
        let link = store
            .create_access_link(&family.id, "old", Some(1))
            .unwrap();
        assert!(matches!(
            store.validate_access_link(&link.token),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn family_crud_and_stats() {
        let (store, family) = make_store();

        store
            .update_family(&family.id, Some("Renamed"), None, Some(true))
            .unwrap();
        let updated = store.get_family(&family.id).unwrap();
        assert_eq!(updated.name, "Renamed");
        assert!(updated.archived);

        assert!(store.list_families(false).unwrap().is_empty());
        assert_eq!(store.list_families(true).unwrap().len(), 1);

        store.upsert_entry(make_entry("e1", &family.id)).unwrap();
        store.create_access_link(&family.id, "", None).unwrap();
        let stats = store.family_stats(&family.id).unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.latest_activity, 1000);
        assert_eq!(stats.link_count, 1);
    }

    #[test]
    fn summary_range_skips_tombstones() {
        let (store, family) = make_store();
        store.upsert_entry(make_entry("e1", &family.id)).unwrap();
        let mut e2 = make_entry("e2", &family.id);
        e2.ts = 5000;
        store.upsert_entry(e2).unwrap();
        store.delete_entry(&family.id, "e1").unwrap();

        let in_range = store.entries_in_range(&family.id, 0, 10_000).unwrap();
        assert_eq!(in_range.len(), 1);
        assert_eq!(in_range[0].id, "e2");
    }

    #[test]
    fn admin_account_and_sessions() {
        let (store, _family) = make_store();

        store.ensure_admin("op", "secret").unwrap();
        // Second call is a no-op, not a duplicate.
        store.ensure_admin("op", "other").unwrap();

        let admin = store.admin_by_username("op").unwrap();
        assert!(password::verify_password("secret", &admin.password_hash).unwrap());

        let token = store.create_admin_session(&admin.id, 60_000).unwrap();
        assert_eq!(store.validate_admin_session(&token).unwrap(), admin.id);

        store.delete_admin_session(&token).unwrap();
        assert!(matches!(
            store.validate_admin_session(&token),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn expired_admin_session_deleted_on_sight() {
        let (store, _family) = make_store();
        store.ensure_admin("op", "secret").unwrap();
        let admin = store.admin_by_username("op").unwrap();

        let token = store.create_admin_session(&admin.id, -1).unwrap();
        assert!(matches!(
            store.validate_admin_session(&token),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn store_reopens_with_data_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let family_id = {
            let store = RecordStore::open(&path).unwrap();
            let family = store.create_family("Test Baby", "").unwrap();
            store.upsert_entry(make_entry("e1", &family.id)).unwrap();
            family.id
        };

        let store = RecordStore::open(&path).unwrap();
        let family = store.get_family(&family_id).unwrap();
        assert_eq!(family.seq, 1);
        assert_eq!(store.all_entries(&family_id).unwrap().len(), 1);
    }

    #[test]
    fn generated_tokens_are_hex() {
        let token = generate_token(16);
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token(16));
    }
}
