//! SQLite-backed mail store
//!
//! One writer connection and a small pool of read-only connections share the
//! database file in WAL mode, so readers never wait for a sync commit.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{MailStore, StoreBatch};
use crate::models::{
    BodyKind, Channel, CursorAdvance, EmailAddress, HistoryToken, Importance, IndexEntry, Message,
    MessageBody, MessageId, Summary, SyncState, UNLISTED_CHANNEL_ORDER, advance_cursor,
    advance_history, sort_channels,
};

/// Read connections kept open for reuse
const MAX_IDLE_READERS: usize = 4;

/// zstd level for bodies (3 = good balance of speed vs size)
const BODY_COMPRESSION_LEVEL: i32 = 3;

/// Database migrations, tracked through the user_version pragma
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            r#"
            CREATE TABLE sync_state (
                scope TEXT PRIMARY KEY,
                incremental_cursor TEXT,
                historical_token TEXT,
                last_sync_at TEXT,
                failed_ids TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                from_name TEXT,
                from_email TEXT NOT NULL,
                to_json TEXT NOT NULL DEFAULT '[]',
                cc_json TEXT NOT NULL DEFAULT '[]',
                subject TEXT NOT NULL,
                snippet TEXT NOT NULL,
                received_at_ms INTEGER NOT NULL,
                labels_json TEXT NOT NULL DEFAULT '[]',
                channel TEXT NOT NULL,
                importance INTEGER NOT NULL DEFAULT 3,
                deadline TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_trashed INTEGER NOT NULL DEFAULT 0,
                revision INTEGER,
                updated_at TEXT NOT NULL,
                sync_pending INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_listing
                ON messages(is_trashed, channel, received_at_ms DESC);
            CREATE INDEX idx_messages_received ON messages(received_at_ms DESC);
            CREATE INDEX idx_messages_pending ON messages(sync_pending) WHERE sync_pending = 1;

            -- Immutable bodies, zstd compressed
            CREATE TABLE bodies (
                message_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                content BLOB NOT NULL
            );

            CREATE TABLE summaries (
                message_id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                model TEXT NOT NULL,
                generated_at TEXT NOT NULL
            );

            -- Embeddings as little-endian f32 blobs
            CREATE TABLE search_entries (
                message_id TEXT PRIMARY KEY,
                vector BLOB NOT NULL,
                from_body INTEGER NOT NULL DEFAULT 0,
                indexed_at TEXT NOT NULL
            );

            -- Channel taxonomy published by the last sync
            CREATE TABLE channels (
                name TEXT PRIMARY KEY,
                display_order INTEGER NOT NULL
            );
            "#,
        ),
    ])
}

const MESSAGE_COLUMNS: &str = "id, from_name, from_email, to_json, cc_json, subject, snippet,
     received_at_ms, labels_json, channel, importance, deadline, is_read, is_trashed,
     revision, updated_at, sync_pending";

/// Raw column values of a `messages` row
struct MessageRow {
    id: String,
    from_name: Option<String>,
    from_email: String,
    to_json: String,
    cc_json: String,
    subject: String,
    snippet: String,
    received_at_ms: i64,
    labels_json: String,
    channel: String,
    importance: i64,
    deadline: Option<String>,
    is_read: bool,
    is_trashed: bool,
    revision: Option<i64>,
    updated_at: String,
    sync_pending: bool,
}

impl MessageRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            from_name: row.get(1)?,
            from_email: row.get(2)?,
            to_json: row.get(3)?,
            cc_json: row.get(4)?,
            subject: row.get(5)?,
            snippet: row.get(6)?,
            received_at_ms: row.get(7)?,
            labels_json: row.get(8)?,
            channel: row.get(9)?,
            importance: row.get(10)?,
            deadline: row.get(11)?,
            is_read: row.get(12)?,
            is_trashed: row.get(13)?,
            revision: row.get(14)?,
            updated_at: row.get(15)?,
            sync_pending: row.get(16)?,
        })
    }

    fn into_message(self) -> Result<Message> {
        let to: Vec<EmailAddress> =
            serde_json::from_str(&self.to_json).context("Corrupt to_json column")?;
        let cc: Vec<EmailAddress> =
            serde_json::from_str(&self.cc_json).context("Corrupt cc_json column")?;
        let labels: Vec<String> =
            serde_json::from_str(&self.labels_json).context("Corrupt labels_json column")?;

        Ok(Message {
            id: MessageId::new(self.id),
            from: EmailAddress {
                name: self.from_name,
                email: self.from_email,
            },
            to,
            cc,
            subject: self.subject,
            snippet: self.snippet,
            received_at: millis_to_datetime(self.received_at_ms),
            labels,
            channel: self.channel,
            importance: Importance::clamped(self.importance as i32),
            deadline: self
                .deadline
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            is_read: self.is_read,
            is_trashed: self.is_trashed,
            revision: self.revision.map(|r| r as u64),
            updated_at: parse_timestamp(&self.updated_at),
            sync_pending: self.sync_pending,
        })
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// SQLite-based mail storage
pub struct SqliteMailStore {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let mut conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        // WAL lets the reader pool proceed while the writer commits.
        // NORMAL sync is durable enough under WAL.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA cache_size = -32000;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            path,
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
        })
    }

    fn open_reader(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open read connection at {:?}", self.path))?;
        conn.execute_batch("PRAGMA query_only = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(conn)
    }

    /// Run `f` on a pooled read connection
    fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let pooled = self
            .readers
            .lock()
            .map_err(|e| anyhow!("Lock poisoned: {}", e))?
            .pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => self.open_reader()?,
        };

        let result = f(&conn);

        if let Ok(mut readers) = self.readers.lock()
            && readers.len() < MAX_IDLE_READERS
        {
            readers.push(conn);
        }
        result
    }

    fn with_writer<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .writer
            .lock()
            .map_err(|e| anyhow!("Lock poisoned: {}", e))?;
        f(&mut conn)
    }

    fn query_messages(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Message>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, MessageRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    fn write_message(conn: &Connection, message: &Message) -> Result<()> {
        conn.execute(
            "INSERT INTO messages
             (id, from_name, from_email, to_json, cc_json, subject, snippet, received_at_ms,
              labels_json, channel, importance, deadline, is_read, is_trashed, revision,
              updated_at, sync_pending)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                from_name = excluded.from_name,
                from_email = excluded.from_email,
                to_json = excluded.to_json,
                cc_json = excluded.cc_json,
                subject = excluded.subject,
                snippet = excluded.snippet,
                received_at_ms = excluded.received_at_ms,
                labels_json = excluded.labels_json,
                channel = excluded.channel,
                importance = excluded.importance,
                deadline = excluded.deadline,
                is_read = excluded.is_read,
                is_trashed = excluded.is_trashed,
                revision = excluded.revision,
                updated_at = excluded.updated_at,
                sync_pending = excluded.sync_pending",
            params![
                message.id.as_str(),
                message.from.name,
                message.from.email,
                serde_json::to_string(&message.to)?,
                serde_json::to_string(&message.cc)?,
                message.subject,
                message.snippet,
                message.received_at.timestamp_millis(),
                serde_json::to_string(&message.labels)?,
                message.channel,
                message.importance.value() as i64,
                message.deadline.map(|d| d.format("%Y-%m-%d").to_string()),
                message.is_read,
                message.is_trashed,
                message.revision.map(|r| r as i64),
                message.updated_at.to_rfc3339(),
                message.sync_pending,
            ],
        )?;
        Ok(())
    }

    fn load_sync_state(conn: &Connection, scope: &str) -> Result<Option<SyncState>> {
        let row: Option<(String, Option<String>, Option<String>, Option<String>, String)> = conn
            .query_row(
                "SELECT scope, incremental_cursor, historical_token, last_sync_at, failed_ids
                 FROM sync_state WHERE scope = ?",
                [scope],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        let Some((scope, incremental_cursor, historical, last_sync_at, failed_ids)) = row else {
            return Ok(None);
        };

        Ok(Some(SyncState {
            scope,
            incremental_cursor,
            historical: historical.map(|t| HistoryToken::parse(&t)),
            last_sync_at: last_sync_at.map(|s| parse_timestamp(&s)),
            failed_ids: serde_json::from_str(&failed_ids).context("Corrupt failed_ids column")?,
        }))
    }

    fn save_sync_state(conn: &Connection, state: &SyncState) -> Result<()> {
        conn.execute(
            "INSERT INTO sync_state
                (scope, incremental_cursor, historical_token, last_sync_at, failed_ids)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(scope) DO UPDATE SET
                incremental_cursor = excluded.incremental_cursor,
                historical_token = excluded.historical_token,
                last_sync_at = excluded.last_sync_at,
                failed_ids = excluded.failed_ids",
            params![
                state.scope,
                state.incremental_cursor,
                state.historical.as_ref().map(HistoryToken::as_wire),
                state.last_sync_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&state.failed_ids)?,
            ],
        )?;
        Ok(())
    }
}

impl MailStore for SqliteMailStore {
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        self.with_reader(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS);
            let mut found = Self::query_messages(conn, &sql, [id.as_str()])?;
            Ok(found.pop())
        })
    }

    fn get_messages(&self, ids: &[MessageId]) -> Result<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.with_reader(|conn| {
            let mut messages = Vec::with_capacity(ids.len());
            // Chunked to stay under SQLite's bound-parameter limit
            for chunk in ids.chunks(500) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let sql = format!(
                    "SELECT {} FROM messages WHERE id IN ({})",
                    MESSAGE_COLUMNS, placeholders
                );
                let params = rusqlite::params_from_iter(chunk.iter().map(|id| id.as_str()));
                messages.extend(Self::query_messages(conn, &sql, params)?);
            }
            Ok(messages)
        })
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        self.with_reader(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?)",
                [id.as_str()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    fn list_messages(
        &self,
        channel: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        self.with_reader(|conn| match channel {
            Some(channel) => {
                let sql = format!(
                    "SELECT {} FROM messages
                     WHERE is_trashed = 0 AND channel = ?
                     ORDER BY received_at_ms DESC, id ASC LIMIT ? OFFSET ?",
                    MESSAGE_COLUMNS
                );
                Self::query_messages(conn, &sql, params![channel, limit as i64, offset as i64])
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM messages
                     WHERE is_trashed = 0
                     ORDER BY received_at_ms DESC, id ASC LIMIT ? OFFSET ?",
                    MESSAGE_COLUMNS
                );
                Self::query_messages(conn, &sql, params![limit as i64, offset as i64])
            }
        })
    }

    fn list_all_messages(&self) -> Result<Vec<Message>> {
        self.with_reader(|conn| {
            let sql = format!(
                "SELECT {} FROM messages ORDER BY received_at_ms DESC, id ASC",
                MESSAGE_COLUMNS
            );
            Self::query_messages(conn, &sql, [])
        })
    }

    fn list_pending(&self) -> Result<Vec<Message>> {
        self.with_reader(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE sync_pending = 1", MESSAGE_COLUMNS);
            Self::query_messages(conn, &sql, [])
        })
    }

    fn count_messages(&self) -> Result<usize> {
        self.with_reader(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    fn upsert_message(&self, message: Message) -> Result<()> {
        self.with_writer(|conn| Self::write_message(conn, &message))
    }

    fn commit_batch(&self, batch: StoreBatch) -> Result<()> {
        self.with_writer(|conn| {
            let tx = conn.transaction()?;

            for message in &batch.upserts {
                Self::write_message(&tx, message)?;
            }

            for id in &batch.deletions {
                for table in ["bodies", "summaries", "search_entries"] {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE message_id = ?", table),
                        [id.as_str()],
                    )?;
                }
                tx.execute("DELETE FROM messages WHERE id = ?", [id.as_str()])?;
            }

            if let Some(channels) = &batch.channels {
                tx.execute("DELETE FROM channels", [])?;
                let mut stmt =
                    tx.prepare("INSERT INTO channels (name, display_order) VALUES (?, ?)")?;
                for channel in channels {
                    stmt.execute(params![channel.name, channel.display_order as i64])?;
                }
            }

            let touches_state =
                batch.cursor != CursorAdvance::None || batch.synced_at.is_some();
            if touches_state {
                let mut state = Self::load_sync_state(&tx, &batch.scope)?
                    .unwrap_or_else(|| SyncState::new(batch.scope.clone()));

                match &batch.cursor {
                    CursorAdvance::Incremental { cursor, failed_ids } => {
                        state.incremental_cursor =
                            Some(advance_cursor(state.incremental_cursor.as_deref(), cursor));
                        state.failed_ids = failed_ids.clone();
                    }
                    CursorAdvance::Historical { from, next } => {
                        state.historical =
                            Some(advance_history(state.historical.as_ref(), from, next.clone()));
                    }
                    CursorAdvance::None => {}
                }
                if let Some(synced_at) = batch.synced_at {
                    state.last_sync_at = Some(synced_at);
                }

                Self::save_sync_state(&tx, &state)?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    fn list_channels(&self) -> Result<Vec<Channel>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.name, c.display_order,
                        (SELECT COUNT(*) FROM messages m
                         WHERE m.channel = c.name AND m.is_trashed = 0)
                 FROM channels c",
            )?;
            let mut channels = stmt
                .query_map([], |row| {
                    let order: i64 = row.get(1)?;
                    let count: i64 = row.get(2)?;
                    Ok(Channel::new(row.get::<_, String>(0)?, order as u32)
                        .with_message_count(count as usize))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            if channels.is_empty() {
                return Ok(channels);
            }

            // Channels still holding messages after the taxonomy changed
            let mut stmt = conn.prepare(
                "SELECT channel, COUNT(*) FROM messages
                 WHERE is_trashed = 0 AND channel NOT IN (SELECT name FROM channels)
                 GROUP BY channel",
            )?;
            let unlisted = stmt
                .query_map([], |row| {
                    let count: i64 = row.get(1)?;
                    Ok(Channel::new(row.get::<_, String>(0)?, UNLISTED_CHANNEL_ORDER)
                        .with_message_count(count as usize))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            channels.extend(unlisted);

            sort_channels(&mut channels);
            Ok(channels)
        })
    }

    fn get_sync_state(&self, scope: &str) -> Result<Option<SyncState>> {
        self.with_reader(|conn| Self::load_sync_state(conn, scope))
    }

    fn get_body(&self, id: &MessageId) -> Result<Option<MessageBody>> {
        let row: Option<(String, Vec<u8>)> = self.with_reader(|conn| {
            Ok(conn
                .query_row(
                    "SELECT kind, content FROM bodies WHERE message_id = ?",
                    [id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        let Some((kind, compressed)) = row else {
            return Ok(None);
        };

        let bytes = zstd::decode_all(compressed.as_slice()).context("Failed to decompress body")?;
        let content = String::from_utf8(bytes).context("Body is not valid UTF-8")?;
        Ok(Some(MessageBody {
            kind: BodyKind::parse(&kind),
            content,
        }))
    }

    fn save_body(&self, id: &MessageId, body: &MessageBody) -> Result<bool> {
        let compressed = zstd::encode_all(body.content.as_bytes(), BODY_COMPRESSION_LEVEL)
            .context("Failed to compress body")?;

        self.with_writer(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO bodies (message_id, kind, content) VALUES (?, ?, ?)",
                params![id.as_str(), body.kind.as_str(), compressed],
            )?;
            Ok(inserted > 0)
        })
    }

    fn get_summary(&self, id: &MessageId) -> Result<Option<Summary>> {
        self.with_reader(|conn| {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT text, model, generated_at FROM summaries WHERE message_id = ?",
                    [id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            Ok(row.map(|(text, model, generated_at)| Summary {
                message_id: id.clone(),
                text,
                model,
                generated_at: parse_timestamp(&generated_at),
            }))
        })
    }

    fn save_summary(&self, summary: &Summary) -> Result<()> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO summaries (message_id, text, model, generated_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(message_id) DO UPDATE SET
                    text = excluded.text,
                    model = excluded.model,
                    generated_at = excluded.generated_at",
                params![
                    summary.message_id.as_str(),
                    summary.text,
                    summary.model,
                    summary.generated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn save_index_entry(&self, entry: &IndexEntry) -> Result<()> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO search_entries (message_id, vector, from_body, indexed_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(message_id) DO UPDATE SET
                    vector = excluded.vector,
                    from_body = excluded.from_body,
                    indexed_at = excluded.indexed_at",
                params![
                    entry.message_id.as_str(),
                    encode_vector(&entry.vector),
                    entry.from_body,
                    entry.indexed_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn load_index_entries(&self) -> Result<Vec<IndexEntry>> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare("SELECT message_id, vector, from_body, indexed_at FROM search_entries")?;
            let entries = stmt
                .query_map([], |row| {
                    let vector: Vec<u8> = row.get(1)?;
                    let indexed_at: String = row.get(3)?;
                    Ok(IndexEntry {
                        message_id: MessageId::new(row.get::<_, String>(0)?),
                        vector: decode_vector(&vector),
                        from_body: row.get(2)?,
                        indexed_at: parse_timestamp(&indexed_at),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }

    fn clear(&self) -> Result<()> {
        self.with_writer(|conn| {
            conn.execute_batch(
                "DELETE FROM messages; DELETE FROM bodies; DELETE FROM summaries;
                 DELETE FROM search_entries; DELETE FROM channels; DELETE FROM sync_state;",
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, SqliteMailStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteMailStore::open(dir.path().join("mail.db")).unwrap();
        (dir, store)
    }

    fn make_message(id: &str, channel: &str, age_hours: i64) -> Message {
        Message::builder(MessageId::new(id))
            .from(EmailAddress::with_name("Sender", "sender@example.com"))
            .to(vec![EmailAddress::new("me@example.com")])
            .subject(format!("Subject {}", id))
            .snippet("preview")
            .channel(channel)
            .labels(vec!["INBOX".to_string()])
            .deadline(NaiveDate::from_ymd_opt(2024, 2, 14))
            .revision(Some(42))
            .received_at(Utc::now() - Duration::hours(age_hours))
            .build()
    }

    #[test]
    fn test_message_roundtrip() {
        let (_dir, store) = open_store();
        let message = make_message("m1", "People", 1);
        store.upsert_message(message.clone()).unwrap();

        let loaded = store.get_message(&message.id).unwrap().unwrap();
        assert_eq!(loaded.subject, message.subject);
        assert_eq!(loaded.to, message.to);
        assert_eq!(loaded.deadline, message.deadline);
        assert_eq!(loaded.revision, Some(42));
        assert_eq!(
            loaded.received_at.timestamp_millis(),
            message.received_at.timestamp_millis()
        );
    }

    #[test]
    fn test_upsert_does_not_duplicate() {
        let (_dir, store) = open_store();
        let message = make_message("m1", "People", 1);
        store.upsert_message(message.clone()).unwrap();
        store.upsert_message(message).unwrap();
        assert_eq!(store.count_messages().unwrap(), 1);
    }

    #[test]
    fn test_listing_order_and_trash_filter() {
        let (_dir, store) = open_store();
        store.upsert_message(make_message("a", "People", 3)).unwrap();
        store.upsert_message(make_message("b", "People", 1)).unwrap();
        let mut trashed = make_message("c", "People", 0);
        trashed.is_trashed = true;
        store.upsert_message(trashed).unwrap();

        let listed = store.list_messages(Some("People"), 10, 0).unwrap();
        let ids: Vec<_> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let paged = store.list_messages(Some("People"), 1, 1).unwrap();
        assert_eq!(paged[0].id.as_str(), "a");
    }

    #[test]
    fn test_body_compression_roundtrip() {
        let (_dir, store) = open_store();
        let id = MessageId::new("m1");
        let body = MessageBody::html("<p>".repeat(100) + "hello");
        assert!(store.save_body(&id, &body).unwrap());
        assert!(!store.save_body(&id, &MessageBody::plain("other")).unwrap());
        assert_eq!(store.get_body(&id).unwrap(), Some(body));
    }

    #[test]
    fn test_commit_batch_persists_cursors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mail.db");
        {
            let store = SqliteMailStore::open(&path).unwrap();
            let mut batch = StoreBatch::new("me");
            batch.upserts.push(make_message("m1", "People", 1));
            batch.channels = Some(vec![Channel::new("People", 1)]);
            batch.cursor = CursorAdvance::Incremental {
                cursor: "500".to_string(),
                failed_ids: vec![MessageId::new("m9")],
            };
            batch.synced_at = Some(Utc::now());
            store.commit_batch(batch).unwrap();

            let mut batch = StoreBatch::new("me");
            batch.cursor = CursorAdvance::Historical {
                from: HistoryToken::Start,
                next: HistoryToken::Page("p2".to_string()),
            };
            store.commit_batch(batch).unwrap();
        }

        let store = SqliteMailStore::open(&path).unwrap();
        let state = store.get_sync_state("me").unwrap().unwrap();
        assert_eq!(state.incremental_cursor.as_deref(), Some("500"));
        assert_eq!(state.historical, Some(HistoryToken::Page("p2".to_string())));
        assert_eq!(state.failed_ids, vec![MessageId::new("m9")]);
        assert!(state.has_synced());

        let channels = store.list_channels().unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].message_count, 1);
    }

    #[test]
    fn test_index_entries_roundtrip() {
        let (_dir, store) = open_store();
        let entry = IndexEntry {
            message_id: MessageId::new("m1"),
            vector: vec![0.5, -0.25, 1.0],
            from_body: true,
            indexed_at: Utc::now(),
        };
        store.save_index_entry(&entry).unwrap();
        let loaded = store.load_index_entries().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].vector, entry.vector);
        assert!(loaded[0].from_body);
    }

    #[test]
    fn test_get_messages_skips_missing() {
        let (_dir, store) = open_store();
        store.upsert_message(make_message("m1", "People", 1)).unwrap();
        let found = store
            .get_messages(&[MessageId::new("m1"), MessageId::new("missing")])
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
