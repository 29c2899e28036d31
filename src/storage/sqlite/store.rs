//! Signal persistence and keyword memory over `SQLite` + FTS5.

use super::connection::{acquire_lock, configure_connection};
use crate::models::{MemoryEntry, MessageEnvelope, SignalRecord, TradeAction};
use crate::storage::traits::{MemoryBackend, MemoryBackendKind, MemoryQuery, SignalSink};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

/// `SQLite`-backed signal store.
pub struct SqliteSignalStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

fn sql_error(operation: &str) -> impl FnOnce(rusqlite::Error) -> Error + '_ {
    move |e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

impl SqliteSignalStore {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_db_dir".to_string(),
                cause: e.to_string(),
            })?;
        }
        let conn = Connection::open(&db_path).map_err(sql_error("open_sqlite"))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_error("open_sqlite"))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Database path, if file-backed.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        configure_connection(&conn)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                envelope_id TEXT NOT NULL,
                source TEXT NOT NULL,
                text TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                media TEXT,
                summary TEXT NOT NULL,
                event_type TEXT NOT NULL,
                asset TEXT NOT NULL,
                action TEXT NOT NULL,
                confidence REAL NOT NULL,
                tier TEXT NOT NULL,
                provider TEXT NOT NULL,
                analyzed INTEGER NOT NULL,
                record_json TEXT NOT NULL,
                observed_at TEXT NOT NULL,
                emitted_at TEXT NOT NULL
            );
            CREATE VIRTUAL TABLE IF NOT EXISTS signals_fts USING fts5(
                id UNINDEXED,
                summary,
                text
            );
            CREATE INDEX IF NOT EXISTS idx_signals_asset ON signals(asset);
            CREATE INDEX IF NOT EXISTS idx_signals_observed_at ON signals(observed_at DESC);",
        )
        .map_err(sql_error("create_schema"))
    }

    /// Number of stored signals.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))
            .map_err(sql_error("count_signals"))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Loads a stored record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored JSON is unreadable.
    pub fn get(&self, id: &str) -> Result<Option<SignalRecord>> {
        let conn = acquire_lock(&self.conn);
        let json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM signals WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_error("get_signal"))?;
        drop(conn);

        json.map(|j| {
            serde_json::from_str(&j).map_err(|e| Error::OperationFailed {
                operation: "decode_signal".to_string(),
                cause: e.to_string(),
            })
        })
        .transpose()
    }

    /// Builds an FTS5 query that ORs quoted terms.
    ///
    /// Quoting neutralizes FTS5 operators (`-`, `*`, `:`) in user text.
    fn fts_query(text: &str) -> String {
        let terms: Vec<_> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let estimated_len = terms.iter().map(|t| t.len() + 6).sum::<usize>();
        let mut query = String::with_capacity(estimated_len);
        for (i, term) in terms.iter().enumerate() {
            if i > 0 {
                query.push_str(" OR ");
            }
            query.push('"');
            query.push_str(term);
            query.push('"');
        }
        query
    }

    /// Maps FTS5 `bm25()` (more negative = better) into `(0, 1)`.
    #[allow(clippy::cast_possible_truncation)]
    fn normalize_bm25(score: f64) -> f32 {
        let sigmoid = 1.0 / (1.0 + (0.5 * score).exp());
        sigmoid.clamp(0.0, 1.0) as f32
    }
}

impl SignalSink for SqliteSignalStore {
    #[instrument(skip_all, fields(signal_id = %record.id))]
    fn persist(&self, record: &SignalRecord, envelope: &MessageEnvelope) -> Result<()> {
        let record_json = serde_json::to_string(record).map_err(|e| Error::OperationFailed {
            operation: "encode_signal".to_string(),
            cause: e.to_string(),
        })?;

        let start = Instant::now();
        let mut conn = acquire_lock(&self.conn);
        let tx = conn.transaction().map_err(sql_error("begin_persist"))?;
        tx.execute(
            "INSERT OR REPLACE INTO signals (
                id, envelope_id, source, text, raw_text, media, summary, event_type,
                asset, action, confidence, tier, provider, analyzed, record_json,
                observed_at, emitted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                record.id,
                record.envelope_id,
                record.source,
                record.text,
                envelope.text,
                envelope.media,
                record.summary,
                record.event_type,
                record.asset,
                record.action.as_str(),
                f64::from(record.confidence),
                record.tier.as_str(),
                record.provider,
                record.analyzed,
                record_json,
                record.observed_at.to_rfc3339(),
                record.emitted_at.to_rfc3339(),
            ],
        )
        .map_err(sql_error("insert_signal"))?;
        tx.execute("DELETE FROM signals_fts WHERE id = ?1", params![record.id])
            .map_err(sql_error("delete_signal_fts"))?;
        tx.execute(
            "INSERT INTO signals_fts (id, summary, text) VALUES (?1, ?2, ?3)",
            params![record.id, record.summary, record.text],
        )
        .map_err(sql_error("insert_signal_fts"))?;
        tx.commit().map_err(sql_error("commit_persist"))?;
        drop(conn);

        metrics::histogram!("signal_store_persist_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }
}

impl MemoryBackend for SqliteSignalStore {
    fn name(&self) -> &str {
        "sqlite-fts"
    }

    fn kind(&self) -> MemoryBackendKind {
        MemoryBackendKind::Keyword
    }

    fn search(&self, query: &MemoryQuery) -> Result<Vec<(MemoryEntry, f32)>> {
        let fts_query = Self::fts_query(&query.text);
        if fts_query.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT s.id, s.summary, s.asset, s.event_type, s.action, s.observed_at,
                        s.source, s.provider, bm25(signals_fts) AS score
                 FROM signals_fts f
                 JOIN signals s ON f.id = s.id
                 WHERE signals_fts MATCH ?1
                   AND (?2 IS NULL OR s.asset = ?2 COLLATE NOCASE)
                 ORDER BY score
                 LIMIT ?3",
            )
            .map_err(sql_error("prepare_search"))?;

        let rows = stmt
            .query_map(params![fts_query, query.asset, limit], |row| {
                Ok(SearchRow {
                    id: row.get(0)?,
                    summary: row.get(1)?,
                    asset: row.get(2)?,
                    event_type: row.get(3)?,
                    action: row.get(4)?,
                    observed_at: row.get(5)?,
                    source: row.get(6)?,
                    provider: row.get(7)?,
                    score: row.get(8)?,
                })
            })
            .map_err(sql_error("execute_search"))?;

        let mut results = Vec::new();
        for row in rows {
            let row = row.map_err(sql_error("read_search_row"))?;
            let score = Self::normalize_bm25(row.score);
            results.push((row.into_entry(), score));
        }
        Ok(results)
    }
}

struct SearchRow {
    id: String,
    summary: String,
    asset: String,
    event_type: String,
    action: String,
    observed_at: String,
    source: String,
    provider: String,
    score: f64,
}

impl SearchRow {
    fn into_entry(self) -> MemoryEntry {
        let recorded_at = DateTime::parse_from_rfc3339(&self.observed_at)
            .map_or_else(|_| Utc::now(), |t| t.with_timezone(&Utc));
        let mut entry = MemoryEntry::new(
            self.id,
            self.summary,
            self.asset,
            self.event_type,
            recorded_at,
        )
        .with_action(TradeAction::parse(&self.action).unwrap_or_default());
        entry.metadata.insert("source".to_string(), self.source);
        entry.metadata.insert("provider".to_string(), self.provider);
        entry
    }
}
