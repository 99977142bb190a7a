// Update queue - durable record of mutations the server has not confirmed.
//
// One row per pending update. Rows are deleted once the server confirms or
// terminally rejects the update. `claimed_by`/`claimed_at` mark a row in-flight
// so two contexts sharing the file never replay the same row concurrently.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;
use waypoint_types::{
    Attachment, HttpMethod, Mutation, MutationKind, PendingUpdate, UpdateDraft, UpdateId,
};

use crate::sqlite_util::open_secure_db;
use crate::{Claim, ListOrder, QueueStore, StoreError};

const COLUMNS: &str = "id, kind, url, method, body, timestamp, attempts, last_tried, \
                       attachment, attachment_name, attachment_mime, request_key";

/// SQLite-backed [`QueueStore`].
pub struct SqliteQueueStore {
    db: Mutex<Connection>,
}

impl SqliteQueueStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS updates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            url TEXT NOT NULL,
            method TEXT NOT NULL,
            body TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_tried INTEGER,
            is_multipart INTEGER NOT NULL DEFAULT 0,
            attachment BLOB,
            attachment_name TEXT,
            attachment_mime TEXT,
            request_key TEXT NOT NULL,
            claimed_by TEXT,
            claimed_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_updates_timestamp
        ON updates(timestamp, id);
    ";

    /// Open or create the queue database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = open_secure_db(path.as_ref())?;
        Self::initialize(db)
    }

    /// Open an in-memory queue (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = Connection::open_in_memory()?;
        Self::initialize(db)
    }

    fn initialize(db: Connection) -> Result<Self, StoreError> {
        // WAL lets the other context read while one writes; busy_timeout makes
        // concurrent writers wait instead of failing.
        db.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA busy_timeout=5000;",
        )?;
        db.execute_batch(Self::SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("queue connection lock poisoned".to_string()))
    }
}

/// Raw column values; decoding happens outside the rusqlite row callback so a
/// bad row can be skipped instead of failing the whole listing.
struct RawRow {
    id: i64,
    kind: String,
    url: String,
    method: String,
    body: String,
    timestamp: i64,
    attempts: i64,
    last_tried: Option<i64>,
    attachment: Option<Vec<u8>>,
    attachment_name: Option<String>,
    attachment_mime: Option<String>,
    request_key: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            url: row.get(2)?,
            method: row.get(3)?,
            body: row.get(4)?,
            timestamp: row.get(5)?,
            attempts: row.get(6)?,
            last_tried: row.get(7)?,
            attachment: row.get(8)?,
            attachment_name: row.get(9)?,
            attachment_mime: row.get(10)?,
            request_key: row.get(11)?,
        })
    }

    fn decode(self) -> Result<PendingUpdate, String> {
        let kind = MutationKind::parse(&self.kind).map_err(|e| e.to_string())?;
        let body: Value = serde_json::from_str(&self.body).map_err(|e| e.to_string())?;
        let mutation = Mutation::decode(kind, &body).map_err(|e| e.to_string())?;
        let http_method = HttpMethod::parse(&self.method).map_err(|e| e.to_string())?;
        let attachment = self.attachment.map(|bytes| {
            Attachment::new(
                self.attachment_name.unwrap_or_else(|| "attachment".to_string()),
                self.attachment_mime
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                bytes,
            )
        });
        Ok(PendingUpdate {
            id: UpdateId::new(self.id),
            target_url: self.url,
            http_method,
            mutation,
            attachment,
            created_at: self.timestamp,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            last_attempt_at: self.last_tried,
            request_key: self.request_key,
        })
    }
}

fn decode_or_skip(raw: RawRow) -> Option<PendingUpdate> {
    let id = raw.id;
    match raw.decode() {
        Ok(update) => Some(update),
        Err(reason) => {
            tracing::warn!(update_id = id, %reason, "Skipping undecodable queue row");
            None
        }
    }
}

impl QueueStore for SqliteQueueStore {
    fn append(&self, draft: &UpdateDraft) -> Result<UpdateId, StoreError> {
        draft.validate()?;
        let body = serde_json::to_string(&draft.mutation.body())?;
        let attachment = draft.attachment.as_ref();
        let db = self.conn()?;
        db.execute(
            "INSERT INTO updates (kind, url, method, body, timestamp, attempts, last_tried,
                                  is_multipart, attachment, attachment_name, attachment_mime,
                                  request_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                draft.mutation.kind().as_str(),
                draft.mutation.endpoint(),
                draft.mutation.http_method().as_str(),
                body,
                draft.created_at,
                i64::from(draft.attempts),
                draft.last_attempt_at,
                draft.is_multipart(),
                attachment.map(|a| a.bytes.as_slice()),
                attachment.map(|a| a.file_name.as_str()),
                attachment.map(|a| a.mime_type.as_str()),
                &draft.request_key,
            ],
        )?;
        Ok(UpdateId::new(db.last_insert_rowid()))
    }

    fn list_all(&self, order: ListOrder) -> Result<Vec<PendingUpdate>, StoreError> {
        let order_by = match order {
            ListOrder::Created => "timestamp ASC, id ASC",
            ListOrder::Insertion => "id ASC",
        };
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("SELECT {COLUMNS} FROM updates ORDER BY {order_by}"))?;
        let raw = stmt
            .query_map([], RawRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(raw.into_iter().filter_map(decode_or_skip).collect())
    }

    fn get(&self, id: UpdateId) -> Result<Option<PendingUpdate>, StoreError> {
        let db = self.conn()?;
        let raw = db
            .query_row(
                &format!("SELECT {COLUMNS} FROM updates WHERE id = ?1"),
                params![id.value()],
                RawRow::from_row,
            )
            .optional()?;
        Ok(raw.and_then(decode_or_skip))
    }

    fn remove(&self, id: UpdateId) -> Result<bool, StoreError> {
        let db = self.conn()?;
        let changed = db.execute("DELETE FROM updates WHERE id = ?1", params![id.value()])?;
        Ok(changed > 0)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let db = self.conn()?;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM updates", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn clear(&self) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute("DELETE FROM updates", [])?;
        Ok(())
    }

    fn record_attempt(&self, id: UpdateId, attempts: u32, at: i64) -> Result<bool, StoreError> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE updates SET attempts = ?2, last_tried = ?3 WHERE id = ?1",
            params![id.value(), i64::from(attempts), at],
        )?;
        Ok(changed > 0)
    }

    fn try_claim(&self, id: UpdateId, claim: &Claim) -> Result<bool, StoreError> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE updates SET claimed_by = ?2, claimed_at = ?3
             WHERE id = ?1
               AND (claimed_by IS NULL OR claimed_by = ?2 OR claimed_at <= ?4)",
            params![id.value(), &claim.owner, claim.now, claim.expiry_cutoff()],
        )?;
        Ok(changed == 1)
    }

    fn release(&self, id: UpdateId, owner: &str) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "UPDATE updates SET claimed_by = NULL, claimed_at = NULL
             WHERE id = ?1 AND claimed_by = ?2",
            params![id.value(), owner],
        )?;
        Ok(())
    }
}
