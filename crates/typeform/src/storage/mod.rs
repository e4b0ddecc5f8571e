//! Local cache of fetched responses.
//!
//! This module provides `SQLite`-based persistent storage for responses,
//! keyed by form and response token, together with the per-form sync
//! cursor.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::Response;

/// Prefix of the metadata keys holding sync cursors.
const CURSOR_KEY_PREFIX: &str = "cursor:";

/// Newest first: submission time, falling back to landing time for partials.
const ORDER_NEWEST_FIRST: &str = "COALESCE(submitted_at, landed_at) DESC, id DESC";

/// What [`ResponseStore::upsert`] did with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The response was not cached before.
    Inserted,
    /// The response was cached with a different payload and was replaced.
    Updated,
    /// The cached payload is identical.
    Unchanged,
}

/// Storage engine for fetched responses.
#[derive(Debug)]
pub struct ResponseStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl ResponseStore {
    /// Open or create a cache database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a response, or replace it if its payload changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be serialized or the database
    /// operation fails.
    pub fn upsert(&self, form_id: &str, response: &Response) -> Result<UpsertOutcome> {
        let payload = serde_json::to_string(response)?;
        let hash = payload_hash(&payload);

        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT payload_hash FROM responses WHERE form_id = ?1 AND token = ?2",
                params![form_id, response.token],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            Some(existing) if existing == hash => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };

        self.conn.execute(
            r"
            INSERT INTO responses
                (form_id, token, response_id, landed_at, submitted_at, payload, payload_hash, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (form_id, token) DO UPDATE SET
                response_id = excluded.response_id,
                landed_at = excluded.landed_at,
                submitted_at = excluded.submitted_at,
                payload = excluded.payload,
                payload_hash = excluded.payload_hash,
                fetched_at = excluded.fetched_at
            ",
            params![
                form_id,
                response.token,
                response.response_id,
                format_time(response.landed_at),
                response.submitted_at.map(format_time),
                payload,
                hash,
                format_time(Utc::now()),
            ],
        )?;

        debug!(form_id, token = %response.token, ?outcome, "stored response");
        Ok(outcome)
    }

    /// Get a cached response by token.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the stored
    /// payload cannot be decoded.
    pub fn get(&self, form_id: &str, token: &str) -> Result<Option<Response>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM responses WHERE form_id = ?1 AND token = ?2",
                params![form_id, token],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(Error::from))
            .transpose()
    }

    /// Get the most recent cached responses of a form.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a stored payload
    /// cannot be decoded.
    pub fn list(&self, form_id: &str, limit: usize) -> Result<Vec<Response>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT payload FROM responses WHERE form_id = ?1 ORDER BY {ORDER_NEWEST_FIRST} LIMIT ?2"
        ))?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let payloads = stmt
            .query_map(params![form_id, limit_i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(Error::from))
            .collect()
    }

    /// Count cached responses of a form.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self, form_id: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM responses WHERE form_id = ?1",
            [form_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete a cached response.
    ///
    /// Returns `true` if a response was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete(&self, form_id: &str, token: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM responses WHERE form_id = ?1 AND token = ?2",
            params![form_id, token],
        )?;
        Ok(affected > 0)
    }

    /// Keep only the `keep_count` most recent responses of a form.
    ///
    /// Returns the number of responses deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_keep_recent(&self, form_id: &str, keep_count: usize) -> Result<usize> {
        let keep_i64 = i64::try_from(keep_count).unwrap_or(i64::MAX);
        let affected = self.conn.execute(
            &format!(
                r"
                DELETE FROM responses WHERE form_id = ?1 AND id NOT IN (
                    SELECT id FROM responses WHERE form_id = ?1
                    ORDER BY {ORDER_NEWEST_FIRST} LIMIT ?2
                )
                "
            ),
            params![form_id, keep_i64],
        )?;

        if affected > 0 {
            info!(
                "Pruned {} responses of form {} to keep {} recent",
                affected, form_id, keep_count
            );
        }
        Ok(affected)
    }

    /// The stored sync cursor of a form.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn cursor(&self, form_id: &str) -> Result<Option<String>> {
        let cursor = self
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                [cursor_key(form_id)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor)
    }

    /// Persist the sync cursor of a form.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_cursor(&self, form_id: &str, token: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![cursor_key(form_id), token],
        )?;
        Ok(())
    }

    /// Forget the sync cursor of a form, so the next sync starts over.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_cursor(&self, form_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM metadata WHERE key = ?1", [cursor_key(form_id)])?;
        Ok(())
    }

    /// Get cache statistics for a form.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self, form_id: &str) -> Result<StoreStats> {
        let total_responses = self.count(form_id)?;

        let completed_responses: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM responses WHERE form_id = ?1 AND submitted_at IS NOT NULL",
            [form_id],
            |row| row.get(0),
        )?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(submitted_at), MAX(submitted_at) FROM responses WHERE form_id = ?1",
            [form_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            form_id: form_id.to_string(),
            total_responses,
            completed_responses,
            oldest_submission: oldest.as_deref().and_then(parse_time),
            newest_submission: newest.as_deref().and_then(parse_time),
            cursor: self.cursor(form_id)?,
            db_size_bytes,
        })
    }
}

/// Statistics about the cached responses of one form.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    /// The form these statistics cover.
    pub form_id: String,
    /// Number of cached responses.
    pub total_responses: i64,
    /// Number of cached responses that were submitted.
    pub completed_responses: i64,
    /// Earliest submission time.
    pub oldest_submission: Option<DateTime<Utc>>,
    /// Latest submission time.
    pub newest_submission: Option<DateTime<Utc>>,
    /// Current sync cursor.
    pub cursor: Option<String>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

fn cursor_key(form_id: &str) -> String {
    format!("{CURSOR_KEY_PREFIX}{form_id}")
}

/// BLAKE3 hash of a serialized payload.
#[must_use]
pub fn payload_hash(payload: &str) -> String {
    blake3::hash(payload.as_bytes()).to_hex().to_string()
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnswerType;
    use chrono::{Duration, TimeZone};

    const FORM: &str = "form_a";

    fn create_test_store() -> ResponseStore {
        ResponseStore::open_in_memory().expect("failed to create test store")
    }

    fn response(token: &str, minutes: i64) -> Response {
        let landed =
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes);
        serde_json::from_value(serde_json::json!({
            "token": token,
            "landed_at": format_time(landed),
            "submitted_at": format_time(landed + Duration::minutes(2)),
            "answers": [
                {"field": {"id": "q1", "type": "short_text"}, "type": "text", "text": format!("answer {token}")}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        assert!(ResponseStore::open_in_memory().is_ok());
    }

    #[test]
    fn test_upsert_and_get() {
        let store = create_test_store();
        let r = response("tok1", 0);

        assert_eq!(store.upsert(FORM, &r).unwrap(), UpsertOutcome::Inserted);

        let cached = store.get(FORM, "tok1").unwrap().unwrap();
        assert_eq!(cached, r);
        assert!(store.get("other_form", "tok1").unwrap().is_none());
    }

    #[test]
    fn test_upsert_unchanged_and_updated() {
        let store = create_test_store();
        let mut r = response("tok1", 0);

        store.upsert(FORM, &r).unwrap();
        assert_eq!(store.upsert(FORM, &r).unwrap(), UpsertOutcome::Unchanged);

        r.calculated.score = 10;
        assert_eq!(store.upsert(FORM, &r).unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.get(FORM, "tok1").unwrap().unwrap().calculated.score, 10);
        assert_eq!(store.count(FORM).unwrap(), 1);
    }

    fn with_unknown_answer(token: &str, value: &serde_json::Value) -> Response {
        serde_json::from_value(serde_json::json!({
            "token": token,
            "landed_at": "2024-03-01T12:00:00Z",
            "answers": [
                {"field": {"id": "f", "type": "matrix"}, "type": "multi_format", "multi_format": value}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_unknown_answer_type_is_cached_intact() {
        let store = create_test_store();
        let r = with_unknown_answer("tok1", &serde_json::json!({"x": 1}));
        store.upsert(FORM, &r).unwrap();

        let cached = store.get(FORM, "tok1").unwrap().unwrap();
        assert_eq!(cached, r);
        let answer = &cached.answers[0];
        assert_eq!(answer.answer_type, AnswerType::Unknown("multi_format".to_owned()));
        assert_eq!(
            answer.extra.get("multi_format"),
            Some(&serde_json::json!({"x": 1}))
        );

        let changed = with_unknown_answer("tok1", &serde_json::json!({"x": 2}));
        assert_eq!(store.upsert(FORM, &changed).unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.get(FORM, "tok1").unwrap().unwrap(), changed);
    }

    #[test]
    fn test_same_token_in_two_forms() {
        let store = create_test_store();
        let r = response("shared", 0);

        assert_eq!(store.upsert("a", &r).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert("b", &r).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.count("a").unwrap(), 1);
        assert_eq!(store.count("b").unwrap(), 1);
    }

    #[test]
    fn test_list_newest_first() {
        let store = create_test_store();
        for (i, token) in ["t0", "t1", "t2", "t3"].iter().enumerate() {
            let minutes = i64::try_from(i).unwrap() * 10;
            store.upsert(FORM, &response(token, minutes)).unwrap();
        }

        let listed = store.list(FORM, 3).unwrap();
        let tokens: Vec<&str> = listed.iter().map(|r| r.token.as_str()).collect();
        assert_eq!(tokens, vec!["t3", "t2", "t1"]);
    }

    #[test]
    fn test_delete() {
        let store = create_test_store();
        store.upsert(FORM, &response("tok1", 0)).unwrap();

        assert!(store.delete(FORM, "tok1").unwrap());
        assert!(!store.delete(FORM, "tok1").unwrap());
        assert_eq!(store.count(FORM).unwrap(), 0);
    }

    #[test]
    fn test_prune_keep_recent() {
        let store = create_test_store();
        for i in 0..10 {
            store.upsert(FORM, &response(&format!("t{i}"), i)).unwrap();
        }
        store.upsert("other", &response("x", 0)).unwrap();

        let pruned = store.prune_keep_recent(FORM, 4).unwrap();
        assert_eq!(pruned, 6);
        assert_eq!(store.count(FORM).unwrap(), 4);
        assert_eq!(store.count("other").unwrap(), 1);
        assert!(store.get(FORM, "t9").unwrap().is_some());
        assert!(store.get(FORM, "t0").unwrap().is_none());
    }

    #[test]
    fn test_cursor_roundtrip() {
        let store = create_test_store();
        assert!(store.cursor(FORM).unwrap().is_none());

        store.set_cursor(FORM, "tok5").unwrap();
        store.set_cursor(FORM, "tok6").unwrap();
        assert_eq!(store.cursor(FORM).unwrap().as_deref(), Some("tok6"));
        assert!(store.cursor("other").unwrap().is_none());

        store.clear_cursor(FORM).unwrap();
        assert!(store.cursor(FORM).unwrap().is_none());
    }

    #[test]
    fn test_stats_empty() {
        let store = create_test_store();
        let stats = store.stats(FORM).unwrap();

        assert_eq!(stats.total_responses, 0);
        assert_eq!(stats.completed_responses, 0);
        assert!(stats.oldest_submission.is_none());
        assert!(stats.newest_submission.is_none());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_stats_with_data() {
        let store = create_test_store();
        store.upsert(FORM, &response("a", 0)).unwrap();
        store.upsert(FORM, &response("b", 60)).unwrap();

        let mut partial = response("c", 120);
        partial.submitted_at = None;
        store.upsert(FORM, &partial).unwrap();
        store.set_cursor(FORM, "b").unwrap();

        let stats = store.stats(FORM).unwrap();
        assert_eq!(stats.total_responses, 3);
        assert_eq!(stats.completed_responses, 2);
        assert_eq!(
            stats.oldest_submission,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 2, 0).unwrap())
        );
        assert_eq!(
            stats.newest_submission,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 13, 2, 0).unwrap())
        );
        assert_eq!(stats.cursor.as_deref(), Some("b"));
    }

    #[test]
    fn test_payload_hash_consistency() {
        assert_eq!(payload_hash("abc"), payload_hash("abc"));
        assert_ne!(payload_hash("abc"), payload_hash("abd"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        let store = ResponseStore::open(&path).unwrap();
        store.upsert(FORM, &response("tok", 0)).unwrap();
        assert!(path.exists());
        assert_eq!(store.count(FORM).unwrap(), 1);
    }
}
