use super::{StoreError, StoreResult, like_pattern, now_ms};
use anyhow::Context;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use url::Url;

pub const DEFAULT_LIST_LIMIT: i64 = 100;
pub const DEFAULT_SEARCH_LIMIT: i64 = 50;
pub const DEFAULT_TOP_VISITED_LIMIT: i64 = 10;
pub const DEFAULT_SEARCH_HISTORY_LIMIT: i64 = 50;

const CREATE_HISTORY: &str = r#"
CREATE TABLE IF NOT EXISTS history (
  id         INTEGER PRIMARY KEY AUTOINCREMENT,
  url        TEXT NOT NULL UNIQUE,
  title      TEXT NOT NULL,
  visitCount INTEGER NOT NULL DEFAULT 1,
  lastVisit  INTEGER NOT NULL,
  favicon    TEXT,
  duration   INTEGER NOT NULL DEFAULT 0
);
"#;

const CREATE_SEARCH_QUERIES: &str = r#"
CREATE TABLE IF NOT EXISTS search_queries (
  id        INTEGER PRIMARY KEY AUTOINCREMENT,
  query     TEXT NOT NULL,
  timestamp INTEGER NOT NULL,
  resultUrl TEXT
);
"#;

const INDEX_HISTORY_LAST_VISIT: &str =
    "CREATE INDEX IF NOT EXISTS idx_history_last_visit ON history(lastVisit DESC);";

const INDEX_HISTORY_URL: &str = "CREATE INDEX IF NOT EXISTS idx_history_url ON history(url);";

const INDEX_HISTORY_TITLE: &str = "CREATE INDEX IF NOT EXISTS idx_history_title ON history(title);";

const INDEX_SEARCH_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS idx_search_timestamp ON search_queries(timestamp DESC);";

pub fn schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_HISTORY,
        CREATE_SEARCH_QUERIES,
        INDEX_HISTORY_LAST_VISIT,
        INDEX_HISTORY_URL,
        INDEX_HISTORY_TITLE,
        INDEX_SEARCH_TIMESTAMP,
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRow {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub visit_count: i64,
    pub last_visit: i64,
    pub favicon: Option<String>,
    pub duration: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQueryRow {
    pub id: i64,
    pub query: String,
    pub timestamp: i64,
    pub result_url: Option<String>,
}

/// Visit log: one row per normalized URL plus an append-only log of the
/// search queries typed into the address bar.
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open history DB: {}", path.display()))?;

        let store = Self { conn };
        store.init_schema()?;

        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        schema_statements().iter().try_for_each(|statement| {
            self.conn
                .execute(statement, [])
                .map(|_| ())
                .map_err(StoreError::from)
        })
    }

    pub fn record_visit(
        &self,
        url: &str,
        title: &str,
        favicon: Option<&str>,
    ) -> StoreResult<()> {
        let normalized = normalize_url(url);
        if normalized.is_empty() {
            return Err(StoreError::Validation("url must not be empty".to_string()));
        }

        let favicon = favicon.map(str::trim).filter(|value| !value.is_empty());

        self.conn.execute(
            "INSERT INTO history (url, title, visitCount, lastVisit, favicon)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(url) DO UPDATE SET
               visitCount = visitCount + 1,
               lastVisit = excluded.lastVisit,
               title = excluded.title,
               favicon = COALESCE(excluded.favicon, favicon)",
            params![normalized, title, now_ms(), favicon],
        )?;

        Ok(())
    }

    pub fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<VisitRow>> {
        self.query_visits(
            "SELECT id, url, title, visitCount, lastVisit, favicon, duration
             FROM history
             ORDER BY lastVisit DESC
             LIMIT ?1 OFFSET ?2",
            params![limit, offset],
        )
    }

    pub fn search(&self, query: &str, limit: i64) -> StoreResult<Vec<VisitRow>> {
        let pattern = like_pattern(query);
        self.query_visits(
            "SELECT id, url, title, visitCount, lastVisit, favicon, duration
             FROM history
             WHERE url LIKE ?1 ESCAPE '\\' OR title LIKE ?1 ESCAPE '\\'
             ORDER BY lastVisit DESC
             LIMIT ?2",
            params![pattern, limit],
        )
    }

    pub fn by_date_range(&self, start: i64, end: i64) -> StoreResult<Vec<VisitRow>> {
        self.query_visits(
            "SELECT id, url, title, visitCount, lastVisit, favicon, duration
             FROM history
             WHERE lastVisit BETWEEN ?1 AND ?2
             ORDER BY lastVisit DESC",
            params![start, end],
        )
    }

    pub fn top_visited(&self, limit: i64) -> StoreResult<Vec<VisitRow>> {
        self.query_visits(
            "SELECT id, url, title, visitCount, lastVisit, favicon, duration
             FROM history
             ORDER BY visitCount DESC, lastVisit DESC
             LIMIT ?1",
            params![limit],
        )
    }

    pub fn delete(&self, url: &str) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM history WHERE url = ?1",
            params![normalize_url(url)],
        )?;

        Ok(())
    }

    pub fn clear(&self, older_than: Option<i64>) -> StoreResult<()> {
        match older_than {
            Some(threshold) => {
                self.conn.execute(
                    "DELETE FROM history WHERE lastVisit < ?1",
                    params![threshold],
                )?;
            }
            None => {
                self.conn.execute("DELETE FROM history", [])?;
            }
        }

        Ok(())
    }

    /// Adds `delta_seconds` onto the accumulated page duration. An unknown
    /// URL is a silent no-op; a negative delta is rejected so the
    /// accumulated value never decreases.
    pub fn update_duration(&self, url: &str, delta_seconds: i64) -> StoreResult<()> {
        if delta_seconds < 0 {
            return Err(StoreError::Validation(
                "duration delta must not be negative".to_string(),
            ));
        }

        self.conn.execute(
            "UPDATE history SET duration = duration + ?1 WHERE url = ?2",
            params![delta_seconds, normalize_url(url)],
        )?;

        Ok(())
    }

    pub fn add_search_query(&self, query: &str, result_url: Option<&str>) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO search_queries (query, timestamp, resultUrl) VALUES (?1, ?2, ?3)",
            params![query, now_ms(), result_url],
        )?;

        Ok(())
    }

    pub fn search_history(&self, limit: i64) -> StoreResult<Vec<SearchQueryRow>> {
        let mut statement = self.conn.prepare(
            "SELECT id, query, timestamp, resultUrl
             FROM search_queries
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1",
        )?;

        let rows = statement
            .query_map(params![limit], |row| {
                Ok(SearchQueryRow {
                    id: row.get(0)?,
                    query: row.get(1)?,
                    timestamp: row.get(2)?,
                    result_url: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn total_visits(&self) -> StoreResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;

        Ok(count)
    }

    pub fn close(self) -> StoreResult<()> {
        self.conn.close().map_err(|(_, error)| StoreError::from(error))
    }

    fn query_visits(
        &self,
        sql: &str,
        parameters: impl rusqlite::Params,
    ) -> StoreResult<Vec<VisitRow>> {
        let mut statement = self.conn.prepare(sql)?;

        let rows = statement
            .query_map(parameters, |row| {
                Ok(VisitRow {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    title: row.get(2)?,
                    visit_count: row.get(3)?,
                    last_visit: row.get(4)?,
                    favicon: row.get(5)?,
                    duration: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

/// Canonical form of a visit key: trimmed, parsed, and re-serialized so
/// scheme/host casing and default ports collapse onto one spelling.
/// Unparseable input is kept trimmed as-is.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    Url::parse(trimmed)
        .map(|parsed| parsed.to_string())
        .unwrap_or_else(|_| trimmed.to_string())
}
