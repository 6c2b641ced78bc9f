use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::task;

use crate::error::{StoreError, StoreResult};
use crate::models::{Conversation, Message, Role};

const CONVERSATION_COLUMNS: &str =
    "c.id, c.name, c.avatar, c.pinned, c.last_message_at, c.created_at,
     (SELECT m.text FROM messages m WHERE m.conversation_id = c.id
      ORDER BY m.created_at DESC, m.seq DESC LIMIT 1) AS last_text";

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, text, created_at";

/// SQLite-backed storage for conversations and their messages.
///
/// A single connection sits behind a mutex, so every statement batch runs
/// alone and readers never see a half-applied write. Blocking work is moved
/// off the async runtime with `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::Storage(format!(
                            "Failed to create data directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }

            let conn = Connection::open(&path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

            let db = Database {
                conn: Arc::new(Mutex::new(conn)),
            };
            db.run_migrations()?;
            tracing::info!("Opened chat database at {}", path.display());
            Ok(db)
        })
        .await?
    }

    /// Create an in-memory database (used for testing)
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
        conn.lock()
            .map_err(|_| StoreError::Storage("database lock poisoned".to_string()))
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let mut conn = Self::lock(&conn)?;
            f(&mut *conn)
        })
        .await?
    }

    fn run_migrations(&self) -> StoreResult<()> {
        let conn = Self::lock(&self.conn)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if version < 1 {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE conversations (
                    id TEXT PRIMARY KEY,
                    seq INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    avatar TEXT,
                    pinned INTEGER NOT NULL DEFAULT 0,
                    last_message_at TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE messages (
                    id TEXT PRIMARY KEY,
                    seq INTEGER NOT NULL,
                    conversation_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    text TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
                );

                CREATE INDEX idx_conversations_order ON conversations(pinned DESC, last_message_at DESC);
                CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at, seq);

                INSERT INTO schema_version (version) VALUES (1);
                COMMIT;",
            )?;
        }

        if version < 2 {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                UPDATE schema_version SET version = 2;
                COMMIT;",
            )?;
        }

        if version < 3 {
            conn.execute_batch(
                "BEGIN;
                 CREATE UNIQUE INDEX idx_conversations_seq ON conversations(seq);
                 CREATE UNIQUE INDEX idx_messages_seq ON messages(seq);

                 UPDATE schema_version SET version = 3;
                 COMMIT;",
            )?;
        }

        Ok(())
    }

    /// Flush the write-ahead log into the main database file.
    pub async fn checkpoint(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    // --- Conversations ---

    pub async fn insert_conversation(&self, conversation: &Conversation) -> StoreResult<()> {
        let conv = conversation.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversations (id, seq, name, avatar, pinned, last_message_at, created_at)
                 VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM conversations), ?2, ?3, ?4, ?5, ?6)",
                params![
                    conv.id,
                    conv.name,
                    conv.avatar,
                    conv.is_pinned as i32,
                    format_timestamp(&conv.last_message_at),
                    format_timestamp(&conv.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let id = id.to_string();
        self.with_conn(move |conn| Self::query_conversation(conn, &id))
            .await
    }

    pub async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS}
                 FROM conversations c
                 ORDER BY c.pinned DESC, c.last_message_at DESC, c.seq DESC"
            ))?;
            let conversations = stmt
                .query_map([], |row| Ok(Self::row_to_conversation(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(conversations)
        })
        .await
    }

    pub async fn count_conversations(&self) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    /// Returns `false` if no conversation had this id.
    pub async fn delete_conversation(&self, id: &str) -> StoreResult<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            // Explicit delete keeps the cascade independent of the foreign_keys pragma.
            tx.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                params![id],
            )?;
            let deleted = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Ok(false);
            }
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    /// Flip the pin flag and return the updated row.
    pub async fn toggle_conversation_pin(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let updated = tx.execute(
                "UPDATE conversations SET pinned = 1 - pinned WHERE id = ?1",
                params![id],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            let conversation = Self::query_conversation(&tx, &id)?;
            tx.commit()?;
            Ok(conversation)
        })
        .await
    }

    // --- Messages ---

    /// Insert a message and advance its conversation's `last_message_at` to
    /// the message date in one transaction. Returns `false` if the
    /// conversation does not exist.
    pub async fn insert_message(&self, message: &Message) -> StoreResult<bool> {
        let msg = message.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let created_at = format_timestamp(&msg.created_at);
            let touched = tx.execute(
                "UPDATE conversations SET last_message_at = MAX(last_message_at, ?1) WHERE id = ?2",
                params![created_at, msg.conversation_id],
            )?;
            if touched == 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO messages (id, seq, conversation_id, role, text, created_at)
                 VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages), ?2, ?3, ?4, ?5)",
                params![
                    msg.id,
                    msg.conversation_id,
                    msg.role.as_str(),
                    msg.text,
                    created_at,
                ],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    /// Messages oldest first, ties in insertion order. `None` if the
    /// conversation does not exist.
    pub async fn list_messages(&self, conversation_id: &str) -> StoreResult<Option<Vec<Message>>> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let exists: Option<i32> = conn
                .query_row(
                    "SELECT 1 FROM conversations WHERE id = ?1",
                    params![conversation_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, seq ASC"
            ))?;
            let messages = stmt
                .query_map(params![conversation_id], |row| {
                    Ok(Self::row_to_message(row))
                })?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(messages))
        })
        .await
    }

    pub async fn get_message(&self, id: &str) -> StoreResult<Option<Message>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
            ))?;
            let result = stmt
                .query_row(params![id], |row| Ok(Self::row_to_message(row)))
                .optional()?;
            result.transpose()
        })
        .await
    }

    /// Delete a message and recompute its conversation's `last_message_at`
    /// from what remains (creation time when nothing does). Returns `false`
    /// if no message had this id.
    pub async fn delete_message(&self, id: &str) -> StoreResult<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let conversation_id: Option<String> = tx
                .query_row(
                    "SELECT conversation_id FROM messages WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(conversation_id) = conversation_id else {
                return Ok(false);
            };

            tx.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
            tx.execute(
                "UPDATE conversations SET last_message_at = COALESCE(
                    (SELECT MAX(m.created_at) FROM messages m WHERE m.conversation_id = ?1),
                    created_at)
                 WHERE id = ?1",
                params![conversation_id],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    // --- Settings ---

    pub async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let result: Option<String> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(result)
        })
        .await
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    // --- Row helpers ---

    fn query_conversation(conn: &Connection, id: &str) -> StoreResult<Option<Conversation>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?1"
        ))?;
        let result = stmt
            .query_row(params![id], |row| Ok(Self::row_to_conversation(row)))
            .optional()?;
        result.transpose()
    }

    fn row_to_conversation(row: &rusqlite::Row) -> StoreResult<Conversation> {
        let pinned_int: i32 = row.get(3)?;
        let last_message_str: String = row.get(4)?;
        let created_str: String = row.get(5)?;

        Ok(Conversation {
            id: row.get(0)?,
            name: row.get(1)?,
            avatar: row.get(2)?,
            is_pinned: pinned_int != 0,
            last_message_at: parse_timestamp(&last_message_str)?,
            last_message_preview: row.get(6)?,
            created_at: parse_timestamp(&created_str)?,
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> StoreResult<Message> {
        let role_str: String = row.get(2)?;
        let created_str: String = row.get(4)?;

        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: Role::from_str(&role_str)
                .ok_or_else(|| StoreError::Storage(format!("Unknown role: {}", role_str)))?,
            text: row.get(3)?,
            created_at: parse_timestamp(&created_str)?,
        })
    }
}

/// Fixed-width UTC form, so that string order in SQL matches time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn conversation(name: &str, pinned: bool, last: DateTime<Utc>) -> Conversation {
        Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            avatar: None,
            is_pinned: pinned,
            last_message_at: last,
            last_message_preview: None,
            created_at: last,
        }
    }

    fn message(conversation_id: &str, text: &str, created_at: DateTime<Utc>) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role: Role::Friend,
            text: text.to_string(),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.list_conversations().await.unwrap().is_empty());
        assert_eq!(db.count_conversations().await.unwrap(), 0);
        // running migrations twice is a no-op
        db.run_migrations().unwrap();
    }

    #[tokio::test]
    async fn test_list_orders_pinned_then_recent() {
        let db = Database::new_in_memory().unwrap();
        let a = conversation("A", true, at(1));
        let b = conversation("B", false, at(3));
        let c = conversation("C", true, at(2));
        for conv in [&a, &b, &c] {
            db.insert_conversation(conv).await.unwrap();
        }

        let names: Vec<_> = db
            .list_conversations()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["C", "A", "B"]);
    }

    #[tokio::test]
    async fn test_equal_dates_list_newest_conversation_first() {
        let db = Database::new_in_memory().unwrap();
        let first = conversation("first", false, at(5));
        let second = conversation("second", false, at(5));
        db.insert_conversation(&first).await.unwrap();
        db.insert_conversation(&second).await.unwrap();

        let listed = db.list_conversations().await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn test_messages_sorted_by_date_then_insertion() {
        let db = Database::new_in_memory().unwrap();
        let conv = conversation("Chat", false, at(0));
        db.insert_conversation(&conv).await.unwrap();

        // Inserted out of date order, two share a timestamp.
        assert!(db.insert_message(&message(&conv.id, "late", at(10))).await.unwrap());
        assert!(db.insert_message(&message(&conv.id, "tie-1", at(5))).await.unwrap());
        assert!(db.insert_message(&message(&conv.id, "tie-2", at(5))).await.unwrap());
        assert!(db.insert_message(&message(&conv.id, "early", at(1))).await.unwrap());

        for _ in 0..2 {
            let texts: Vec<_> = db
                .list_messages(&conv.id)
                .await
                .unwrap()
                .unwrap()
                .into_iter()
                .map(|m| m.text)
                .collect();
            assert_eq!(texts, vec!["early", "tie-1", "tie-2", "late"]);
        }
    }

    #[tokio::test]
    async fn test_insert_message_updates_last_message_and_preview() {
        let db = Database::new_in_memory().unwrap();
        let conv = conversation("Chat", false, at(0));
        db.insert_conversation(&conv).await.unwrap();

        let now = Utc::now().trunc_subsecs(6);
        db.insert_message(&message(&conv.id, "hello there", now))
            .await
            .unwrap();

        let fetched = db.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_message_at, now);
        assert_eq!(fetched.last_message_preview.as_deref(), Some("hello there"));
    }

    #[tokio::test]
    async fn test_insert_message_into_missing_conversation() {
        let db = Database::new_in_memory().unwrap();
        let inserted = db
            .insert_message(&message("missing", "hi", at(0)))
            .await
            .unwrap();
        assert!(!inserted);
        assert!(db.list_messages("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_toggle_pin() {
        let db = Database::new_in_memory().unwrap();
        let conv = conversation("Chat", false, at(7));
        db.insert_conversation(&conv).await.unwrap();

        let toggled = db.toggle_conversation_pin(&conv.id).await.unwrap().unwrap();
        assert!(toggled.is_pinned);
        assert_eq!(toggled.last_message_at, at(7));

        let toggled = db.toggle_conversation_pin(&conv.id).await.unwrap().unwrap();
        assert!(!toggled.is_pinned);

        assert!(db.toggle_conversation_pin("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conversation_delete_cascades() {
        let db = Database::new_in_memory().unwrap();
        let conv = conversation("Chat", false, at(0));
        db.insert_conversation(&conv).await.unwrap();
        let msg = message(&conv.id, "Hello!", at(1));
        db.insert_message(&msg).await.unwrap();

        assert!(db.delete_conversation(&conv.id).await.unwrap());
        assert!(db.list_conversations().await.unwrap().is_empty());
        assert!(db.get_message(&msg.id).await.unwrap().is_none());
        assert!(!db.delete_conversation(&conv.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_message_recomputes_last_message_at() {
        let db = Database::new_in_memory().unwrap();
        let created = at(0);
        let conv = conversation("Chat", false, created);
        db.insert_conversation(&conv).await.unwrap();

        let older = message(&conv.id, "older", created + Duration::seconds(1));
        let newer = message(&conv.id, "newer", created + Duration::seconds(2));
        db.insert_message(&older).await.unwrap();
        db.insert_message(&newer).await.unwrap();

        assert!(db.delete_message(&newer.id).await.unwrap());
        let fetched = db.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_message_at, older.created_at);
        assert_eq!(fetched.last_message_preview.as_deref(), Some("older"));

        assert!(db.delete_message(&older.id).await.unwrap());
        let fetched = db.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_message_at, created);
        assert!(fetched.last_message_preview.is_none());

        assert!(!db.delete_message(&older.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_message_insert_rolls_back() {
        let db = Database::new_in_memory().unwrap();
        let conv = conversation("Chat", false, at(0));
        db.insert_conversation(&conv).await.unwrap();
        db.insert_message(&message(&conv.id, "kept", at(1)))
            .await
            .unwrap();

        // Abort the INSERT after the conversation UPDATE has already run.
        Database::lock(&db.conn)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER fail_message_insert BEFORE INSERT ON messages
                 BEGIN SELECT RAISE(ABORT, 'disk'); END;",
            )
            .unwrap();

        let err = db
            .insert_message(&message(&conv.id, "lost", at(9)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));

        let fetched = db.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_message_at, at(1));
        assert_eq!(fetched.last_message_preview.as_deref(), Some("kept"));
        let texts: Vec<_> = db
            .list_messages(&conv.id)
            .await
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["kept"]);
    }

    #[tokio::test]
    async fn test_unreadable_row_is_storage_error() {
        let db = Database::new_in_memory().unwrap();
        let conv = conversation("Chat", false, at(0));
        db.insert_conversation(&conv).await.unwrap();

        Database::lock(&db.conn)
            .unwrap()
            .execute(
                "UPDATE conversations SET created_at = 'garbage' WHERE id = ?1",
                params![conv.id],
            )
            .unwrap();

        let err = db.list_conversations().await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
        let err = db.get_conversation(&conv.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[tokio::test]
    async fn test_seq_columns_are_indexed() {
        let db = Database::new_in_memory().unwrap();
        let conn = Database::lock(&db.conn).unwrap();
        for index in ["idx_conversations_seq", "idx_messages_seq"] {
            let found: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
                    params![index],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(found, 1, "missing index {}", index);
        }
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.get_setting("k").await.unwrap().is_none());
        db.set_setting("k", "v1").await.unwrap();
        db.set_setting("k", "v2").await.unwrap();
        assert_eq!(db.get_setting("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let whole = format_timestamp(&at(0));
        let fractional = format_timestamp(&(at(0) + Duration::microseconds(1)));
        assert_eq!(whole.len(), fractional.len());
        assert!(whole < fractional);
    }
}
