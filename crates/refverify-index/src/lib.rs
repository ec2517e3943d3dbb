use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod builder;

pub use builder::{build_index, import_jsonl};

/// Minimum title score for [`LocalIndex::query`] to report a match.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.9;

/// Maximum number of candidate rows scored per title query.
const MAX_CANDIDATES: usize = 200;

/// Number of title words used to pull candidates from the word table.
const QUERY_WORDS: usize = 4;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid JSON on line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A publication record stored in the offline index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub arxiv_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Title query result from the offline index.
#[derive(Debug, Clone)]
pub struct IndexQueryResult {
    pub record: IndexRecord,
    pub score: f64,
}

/// Age information about an index, based on its recorded build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staleness {
    pub is_stale: bool,
    pub age_days: Option<u64>,
}

/// Offline index handle backed by SQLite.
pub struct LocalIndex {
    conn: Connection,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for LocalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIndex")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LocalIndex {
    /// Open an existing index. Fails if the file does not exist.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        if !path.exists() {
            return Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("index not found at {}", path.display()),
            )));
        }
        let conn = Connection::open(path)?;
        let has_papers: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'papers'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if has_papers.is_none() {
            return Err(IndexError::Parse(format!(
                "{} is not a reference index (missing papers table)",
                path.display()
            )));
        }
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Create (or reopen) an index at `path`, initializing the schema.
    pub fn create(path: &Path) -> Result<Self, IndexError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Create a throwaway in-memory index.
    pub fn in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    /// Location on disk, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert a single record.
    pub fn insert(&mut self, record: &IndexRecord) -> Result<i64, IndexError> {
        let tx = self.conn.transaction()?;
        let id = insert_record(&tx, record)?;
        tx.commit()?;
        Ok(id)
    }

    /// Insert many records in one transaction.
    pub fn insert_batch(&mut self, records: &[IndexRecord]) -> Result<usize, IndexError> {
        let tx = self.conn.transaction()?;
        for record in records {
            insert_record(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Number of records in the index.
    pub fn len(&self) -> Result<usize, IndexError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Whether the index holds no records.
    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }

    /// Exact lookup by DOI (case-insensitive, `doi.org` prefixes ignored).
    pub fn lookup_doi(&self, doi: &str) -> Result<Option<IndexRecord>, IndexError> {
        let key = normalize_doi_key(doi);
        if key.is_empty() {
            return Ok(None);
        }
        self.fetch_one("SELECT id, title, authors, year, venue, doi, arxiv_id, url FROM papers WHERE doi = ?1 LIMIT 1", &key)
    }

    /// Exact lookup by arXiv identifier; any version suffix is ignored.
    pub fn lookup_arxiv(&self, arxiv_id: &str) -> Result<Option<IndexRecord>, IndexError> {
        let key = normalize_arxiv_key(arxiv_id);
        if key.is_empty() {
            return Ok(None);
        }
        self.fetch_one("SELECT id, title, authors, year, venue, doi, arxiv_id, url FROM papers WHERE arxiv_id = ?1 LIMIT 1", &key)
    }

    /// Query the index for a title, returning the best match at or above
    /// [`DEFAULT_MATCH_THRESHOLD`].
    pub fn query(&self, title: &str) -> Result<Option<IndexQueryResult>, IndexError> {
        self.query_with_threshold(title, DEFAULT_MATCH_THRESHOLD)
    }

    /// Query the index for a title with a caller-supplied minimum score.
    pub fn query_with_threshold(
        &self,
        title: &str,
        threshold: f64,
    ) -> Result<Option<IndexQueryResult>, IndexError> {
        let norm = normalize_key(title);
        if norm.is_empty() {
            return Ok(None);
        }

        let mut words: Vec<&str> = title_words(&norm);
        words.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        words.dedup();
        words.truncate(QUERY_WORDS);

        let candidates: Vec<i64> = if words.is_empty() {
            let mut stmt = self
                .conn
                .prepare("SELECT id FROM papers WHERE norm_title = ?1 LIMIT 1")?;
            let ids = stmt
                .query_map([&norm], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            ids
        } else {
            let placeholders = vec!["?"; words.len()].join(", ");
            let sql = format!(
                "SELECT paper_id FROM title_words WHERE word IN ({placeholders}) \
                 GROUP BY paper_id ORDER BY COUNT(*) DESC LIMIT {MAX_CANDIDATES}"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let ids = stmt
                .query_map(params_from_iter(words.iter()), |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            ids
        };

        let mut best: Option<(f64, i64)> = None;
        {
            let mut stmt = self
                .conn
                .prepare_cached("SELECT norm_title FROM papers WHERE id = ?1")?;
            for id in candidates {
                let cand: String = stmt.query_row([id], |row| row.get(0))?;
                let score =
                    rapidfuzz::distance::indel::normalized_similarity(norm.chars(), cand.chars());
                if best.is_none_or(|(s, _)| score > s) {
                    best = Some((score, id));
                }
            }
        }

        match best {
            Some((score, id)) if score >= threshold => {
                let record = self.fetch_by_id(id)?;
                log::debug!("local index: {:?} matched with score {:.3}", title, score);
                Ok(record.map(|record| IndexQueryResult { record, score }))
            }
            _ => Ok(None),
        }
    }

    /// Check whether the index is older than `threshold_days`.
    ///
    /// Indexes without a recorded build time are reported as stale with an
    /// unknown age.
    pub fn check_staleness(&self, threshold_days: u64) -> Result<Staleness, IndexError> {
        let built_at: Option<String> = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = 'built_at'", [], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(built_at) = built_at.and_then(|v| v.parse::<u64>().ok()) else {
            return Ok(Staleness {
                is_stale: true,
                age_days: None,
            });
        };
        let age_days = now_secs().saturating_sub(built_at) / 86_400;
        Ok(Staleness {
            is_stale: age_days > threshold_days,
            age_days: Some(age_days),
        })
    }

    /// Record the current time as the index build time.
    pub fn mark_built(&self) -> Result<(), IndexError> {
        self.mark_built_at(now_secs())
    }

    fn mark_built_at(&self, secs: u64) -> Result<(), IndexError> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES ('built_at', ?1) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [secs.to_string()],
        )?;
        Ok(())
    }

    fn fetch_one(&self, sql: &str, key: &str) -> Result<Option<IndexRecord>, IndexError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let row = stmt.query_row([key], row_to_record).optional()?;
        row.map(|r| r.into_record()).transpose()
    }

    fn fetch_by_id(&self, id: i64) -> Result<Option<IndexRecord>, IndexError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, title, authors, year, venue, doi, arxiv_id, url FROM papers WHERE id = ?1",
        )?;
        let row = stmt.query_row([id], row_to_record).optional()?;
        row.map(|r| r.into_record()).transpose()
    }
}

/// Raw row before the JSON author list is decoded.
struct RawRow {
    title: String,
    authors: String,
    year: Option<i32>,
    venue: Option<String>,
    doi: Option<String>,
    arxiv_id: Option<String>,
    url: Option<String>,
}

impl RawRow {
    fn into_record(self) -> Result<IndexRecord, IndexError> {
        let authors: Vec<String> = serde_json::from_str(&self.authors)
            .map_err(|e| IndexError::Parse(format!("corrupt author list: {e}")))?;
        Ok(IndexRecord {
            title: self.title,
            authors,
            year: self.year,
            venue: self.venue,
            doi: self.doi,
            arxiv_id: self.arxiv_id,
            url: self.url,
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        title: row.get(1)?,
        authors: row.get(2)?,
        year: row.get(3)?,
        venue: row.get(4)?,
        doi: row.get(5)?,
        arxiv_id: row.get(6)?,
        url: row.get(7)?,
    })
}

fn init_schema(conn: &Connection) -> Result<(), IndexError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS papers (
             id INTEGER PRIMARY KEY,
             title TEXT NOT NULL,
             norm_title TEXT NOT NULL,
             authors TEXT NOT NULL,
             year INTEGER,
             venue TEXT,
             doi TEXT,
             arxiv_id TEXT,
             url TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_papers_doi ON papers(doi);
         CREATE INDEX IF NOT EXISTS idx_papers_arxiv ON papers(arxiv_id);
         CREATE INDEX IF NOT EXISTS idx_papers_norm_title ON papers(norm_title);
         CREATE TABLE IF NOT EXISTS title_words (
             word TEXT NOT NULL,
             paper_id INTEGER NOT NULL REFERENCES papers(id)
         );
         CREATE INDEX IF NOT EXISTS idx_title_words_word ON title_words(word);
         CREATE TABLE IF NOT EXISTS meta (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );",
    )?;
    Ok(())
}

fn insert_record(conn: &Connection, record: &IndexRecord) -> Result<i64, IndexError> {
    let norm = normalize_key(&record.title);
    if norm.is_empty() {
        return Err(IndexError::Parse(format!(
            "record has an empty title: {:?}",
            record.title
        )));
    }
    let authors = serde_json::to_string(&record.authors)
        .map_err(|e| IndexError::Parse(format!("cannot encode authors: {e}")))?;
    let doi = record
        .doi
        .as_deref()
        .map(normalize_doi_key)
        .filter(|d| !d.is_empty());
    let arxiv = record
        .arxiv_id
        .as_deref()
        .map(normalize_arxiv_key)
        .filter(|a| !a.is_empty());

    conn.execute(
        "INSERT INTO papers (title, norm_title, authors, year, venue, doi, arxiv_id, url) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.title,
            norm,
            authors,
            record.year,
            record.venue,
            doi,
            arxiv,
            record.url
        ],
    )?;
    let id = conn.last_insert_rowid();

    let mut words = title_words(&norm);
    words.sort_unstable();
    words.dedup();
    let mut stmt = conn.prepare_cached("INSERT INTO title_words (word, paper_id) VALUES (?1, ?2)")?;
    for word in words {
        stmt.execute(params![word, id])?;
    }
    Ok(id)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Lowercased, punctuation-free form of a title used for storage and scoring.
pub fn normalize_key(title: &str) -> String {
    let lowered: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn title_words(norm: &str) -> Vec<&str> {
    const STOP: &[&str] = &[
        "the", "and", "for", "with", "from", "into", "via", "using", "towards", "toward", "are",
        "its", "our", "how", "what", "when", "why",
    ];
    norm.split(' ')
        .filter(|w| w.len() >= 3 && !STOP.contains(w))
        .collect()
}

fn normalize_doi_key(doi: &str) -> String {
    static PREFIX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^(?:https?://(?:dx\.)?doi\.org/|doi:\s*)").unwrap());
    PREFIX
        .replace(doi.trim(), "")
        .trim_end_matches(['.', ',', ';'])
        .to_lowercase()
}

fn normalize_arxiv_key(id: &str) -> String {
    static VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").unwrap());
    let id = id.trim().trim_start_matches("arXiv:").trim_start_matches("arxiv:");
    VERSION.replace(id, "").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, authors: &[&str]) -> IndexRecord {
        IndexRecord {
            title: title.to_string(),
            authors: authors.iter().map(|s| s.to_string()).collect(),
            year: Some(2017),
            venue: Some("NeurIPS".into()),
            doi: None,
            arxiv_id: None,
            url: None,
        }
    }

    #[test]
    fn title_query_finds_close_match() {
        let mut idx = LocalIndex::in_memory().unwrap();
        idx.insert(&record("Attention Is All You Need", &["Ashish Vaswani"]))
            .unwrap();
        idx.insert(&record("Deep Residual Learning for Image Recognition", &["Kaiming He"]))
            .unwrap();

        let hit = idx.query("Attention is all you need.").unwrap().unwrap();
        assert_eq!(hit.record.title, "Attention Is All You Need");
        assert_eq!(hit.record.authors, vec!["Ashish Vaswani"]);
        assert!(hit.score >= 0.99);
    }

    #[test]
    fn title_query_rejects_unrelated() {
        let mut idx = LocalIndex::in_memory().unwrap();
        idx.insert(&record("Attention Is All You Need", &[])).unwrap();
        assert!(idx.query("Graph Attention Networks for Molecules").unwrap().is_none());
        assert!(idx.query("").unwrap().is_none());
    }

    #[test]
    fn doi_lookup_ignores_prefix_and_case() {
        let mut idx = LocalIndex::in_memory().unwrap();
        let mut rec = record("Some Paper Title Here", &["A. Author"]);
        rec.doi = Some("10.1000/ABC.123".into());
        idx.insert(&rec).unwrap();

        let hit = idx.lookup_doi("https://doi.org/10.1000/abc.123").unwrap();
        assert_eq!(hit.unwrap().title, "Some Paper Title Here");
        assert!(idx.lookup_doi("10.1000/other").unwrap().is_none());
    }

    #[test]
    fn arxiv_lookup_ignores_version() {
        let mut idx = LocalIndex::in_memory().unwrap();
        let mut rec = record("Attention Is All You Need", &[]);
        rec.arxiv_id = Some("1706.03762".into());
        idx.insert(&rec).unwrap();

        assert!(idx.lookup_arxiv("1706.03762v5").unwrap().is_some());
        assert!(idx.lookup_arxiv("arXiv:1706.03762").unwrap().is_some());
    }

    #[test]
    fn empty_title_rejected() {
        let mut idx = LocalIndex::in_memory().unwrap();
        assert!(matches!(
            idx.insert(&record("  ...  ", &[])),
            Err(IndexError::Parse(_))
        ));
        assert!(idx.is_empty().unwrap());
    }

    #[test]
    fn staleness_tracks_build_time() {
        let idx = LocalIndex::in_memory().unwrap();
        let unknown = idx.check_staleness(30).unwrap();
        assert!(unknown.is_stale);
        assert_eq!(unknown.age_days, None);

        idx.mark_built().unwrap();
        let fresh = idx.check_staleness(30).unwrap();
        assert!(!fresh.is_stale);
        assert_eq!(fresh.age_days, Some(0));

        idx.mark_built_at(now_secs() - 40 * 86_400).unwrap();
        let old = idx.check_staleness(30).unwrap();
        assert!(old.is_stale);
        assert_eq!(old.age_days, Some(40));
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalIndex::open(&dir.path().join("nope.db")).unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));
    }

    #[test]
    fn reopen_persists_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let mut idx = LocalIndex::create(&path).unwrap();
            idx.insert_batch(&[record("A Persistent Title", &[]), record("Another One Here", &[])])
                .unwrap();
        }
        let idx = LocalIndex::open(&path).unwrap();
        assert_eq!(idx.len().unwrap(), 2);
        assert_eq!(idx.path(), Some(path.as_path()));
    }
}
