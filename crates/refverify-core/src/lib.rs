use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod cache;
pub mod config_file;
pub mod diff;
pub mod matching;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod rate_limit;
pub mod sources;

pub use cache::QueryCache;
pub use diff::MatchOptions;
pub use metrics::{SourceMetrics, SourceStat};
pub use orchestrator::Verifier;
pub use pool::{BatchOptions, BatchReport};
pub use refverify_index::LocalIndex;
pub use sources::{Lookup, SourceAdapter, SourceError, SourceKind, SourceSet};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("local index error: {0}")]
    Index(#[from] refverify_index::IndexError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("verification cancelled")]
    Cancelled,
    #[error("worker pool failed: {0}")]
    Pool(String),
}

/// A citation as supplied by the parsing collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    /// ArXiv eprint field, when the bibliography carried one.
    #[serde(default)]
    pub eprint: Option<String>,
    #[serde(default, alias = "rawText")]
    pub raw_text: String,
}

impl Reference {
    /// Whether the citation carries any DOI evidence: an explicit DOI, a
    /// `doi.org` URL, or the word "doi" in the raw text.
    pub fn has_doi_evidence(&self) -> bool {
        matching::identifiers::has_doi_evidence(self)
    }

    /// The cited DOI, normalized, from the DOI field, URL, or raw text.
    pub fn cited_doi(&self) -> Option<String> {
        matching::identifiers::cited_doi(self)
    }

    /// The cited ArXiv identifier from the URL, eprint field, or raw text.
    pub fn arxiv_id(&self) -> Option<matching::ArxivId> {
        matching::identifiers::cited_arxiv_id(self)
    }
}

/// A single author on an authoritative record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
}

impl From<&str> for Author {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl From<String> for Author {
    fn from(name: String) -> Self {
        Self { name }
    }
}

/// Authoritative metadata for a work, as returned by one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifiedPaper {
    pub title: String,
    pub authors: Vec<Author>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    /// Identifier map; keys such as `DOI` and `ArXiv`.
    pub external_ids: BTreeMap<String, String>,
    pub url: Option<String>,
    pub open_access_pdf_url: Option<String>,
}

impl VerifiedPaper {
    pub fn author_names(&self) -> Vec<String> {
        self.authors.iter().map(|a| a.name.clone()).collect()
    }

    pub fn doi(&self) -> Option<&str> {
        self.external_ids.get("DOI").map(String::as_str)
    }

    pub fn arxiv_id(&self) -> Option<&str> {
        self.external_ids.get("ArXiv").map(String::as_str)
    }
}

/// What a discrepancy is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    Author,
    Title,
    Year,
    Venue,
    Doi,
    Arxiv,
    Version,
    Unverified,
    ApiFailure,
    CheckFailed,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// A flagged difference between cited and authoritative metadata, or a
/// terminal marker explaining why no comparison happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub severity: Severity,
    pub message: String,
    pub cited_value: Option<String>,
    pub correct_value: Option<String>,
}

impl Discrepancy {
    pub fn new(kind: DiscrepancyKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            cited_value: None,
            correct_value: None,
        }
    }

    pub fn with_values(
        mut self,
        cited: impl Into<Option<String>>,
        correct: impl Into<Option<String>>,
    ) -> Self {
        self.cited_value = cited.into();
        self.correct_value = correct.into();
        self
    }

    pub fn unverified() -> Self {
        Self::new(
            DiscrepancyKind::Unverified,
            Severity::Error,
            "Could not verify reference against any source",
        )
    }

    pub fn api_failure(failed_sources: &[String]) -> Self {
        Self::new(
            DiscrepancyKind::ApiFailure,
            Severity::Error,
            format!("All sources failed: {}", failed_sources.join(", ")),
        )
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            DiscrepancyKind::Timeout,
            Severity::Error,
            format!("Verification timed out after {}s", limit.as_secs()),
        )
    }

    pub fn check_failed(message: impl Into<String>) -> Self {
        Self::new(
            DiscrepancyKind::CheckFailed,
            Severity::Error,
            format!("Verification failed: {}", message.into()),
        )
    }
}

/// Verification outcome of a single reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Verified,
    Warning,
    Error,
    Unverified,
}

impl Status {
    /// Derive the status from a discrepancy list.
    ///
    /// `error` wins over `warning`, which wins over `unverified`; the
    /// `unverified` marker itself never counts as an error or warning.
    pub fn from_discrepancies(discrepancies: &[Discrepancy]) -> Self {
        let counted = || {
            discrepancies
                .iter()
                .filter(|d| d.kind != DiscrepancyKind::Unverified)
        };
        if counted().any(|d| d.severity == Severity::Error) {
            Status::Error
        } else if counted().any(|d| d.severity == Severity::Warning) {
            Status::Warning
        } else if discrepancies
            .iter()
            .any(|d| d.kind == DiscrepancyKind::Unverified)
        {
            Status::Unverified
        } else {
            Status::Verified
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Verified => "verified",
            Status::Warning => "warning",
            Status::Error => "error",
            Status::Unverified => "unverified",
        }
    }
}

/// The result of verifying a single reference.
///
/// Built once by [`VerificationResult::new`]; `status` is derived from the
/// discrepancy list at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub title: String,
    pub raw_text: String,
    pub status: Status,
    pub verified_paper: Option<VerifiedPaper>,
    pub discrepancies: Vec<Discrepancy>,
    pub canonical_url: Option<String>,
    /// Name of the source whose answer this result reflects.
    pub source: Option<String>,
    /// Sources that failed with a transport error during this verification.
    #[serde(default)]
    pub failed_sources: Vec<String>,
}

impl VerificationResult {
    pub fn new(
        reference: &Reference,
        verified_paper: Option<VerifiedPaper>,
        mut discrepancies: Vec<Discrepancy>,
        canonical_url: Option<String>,
        source: Option<String>,
        failed_sources: Vec<String>,
    ) -> Self {
        // `unverified` is exclusive: it only survives when nothing else was said.
        if discrepancies
            .iter()
            .any(|d| d.kind != DiscrepancyKind::Unverified)
        {
            discrepancies.retain(|d| d.kind != DiscrepancyKind::Unverified);
        } else if discrepancies.len() > 1 {
            discrepancies.truncate(1);
        }
        let status = Status::from_discrepancies(&discrepancies);
        Self {
            title: reference.title.clone(),
            raw_text: reference.raw_text.clone(),
            status,
            verified_paper,
            discrepancies,
            canonical_url,
            source,
            failed_sources,
        }
    }

    /// A result carrying a single operational failure (timeout, crash).
    pub fn failed(reference: &Reference, discrepancy: Discrepancy) -> Self {
        Self::new(reference, None, vec![discrepancy], None, None, Vec::new())
    }

    pub fn has_kind(&self, kind: DiscrepancyKind) -> bool {
        self.discrepancies.iter().any(|d| d.kind == kind)
    }
}

/// Progress events emitted while a batch runs.
///
/// Events arrive in completion order, not index order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Checking {
        index: usize,
        total: usize,
        title: String,
    },
    Result {
        index: usize,
        total: usize,
        result: Box<VerificationResult>,
    },
    Progress {
        current: usize,
        total: usize,
    },
    SummaryUpdate {
        summary: CheckStats,
    },
    Warning {
        index: usize,
        title: String,
        failed_sources: Vec<String>,
        message: String,
    },
    Completed {
        summary: CheckStats,
    },
    Cancelled {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Running counters for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStats {
    pub total: usize,
    pub completed: usize,
    pub verified: usize,
    pub warning: usize,
    pub error: usize,
    pub unverified: usize,
}

impl CheckStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record(&mut self, status: Status) {
        self.completed += 1;
        match status {
            Status::Verified => self.verified += 1,
            Status::Warning => self.warning += 1,
            Status::Error => self.error += 1,
            Status::Unverified => self.unverified += 1,
        }
    }

    /// Number of references needing attention.
    pub fn problems(&self) -> usize {
        self.warning + self.error + self.unverified
    }
}

/// Configuration for the reference checker.
#[derive(Debug, Clone)]
pub struct Config {
    pub s2_api_key: Option<String>,
    pub openalex_key: Option<String>,
    /// Contact address for CrossRef/OpenAlex polite pools.
    pub crossref_mailto: Option<String>,
    pub local_index_path: Option<PathBuf>,
    /// Already-opened local index; takes precedence over `local_index_path`.
    pub local_index: Option<Arc<Mutex<LocalIndex>>>,
    /// Source names to leave out of every plan (see [`SourceKind::from_name`]).
    pub disabled_sources: Vec<String>,
    pub max_concurrent_refs: usize,
    pub ref_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Per-request HTTP timeout.
    pub db_timeout_secs: u64,
    pub arxiv_delay_secs: f64,
    pub max_rate_limit_retries: u32,
    pub title_threshold: f64,
    pub min_candidate_similarity: f64,
    pub retry_failed_sources: bool,
    pub cache: Option<Arc<QueryCache>>,
    /// Per-source call statistics; keep a clone to read them after a run.
    pub metrics: Arc<SourceMetrics>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            s2_api_key: None,
            openalex_key: None,
            crossref_mailto: None,
            local_index_path: None,
            local_index: None,
            disabled_sources: Vec::new(),
            max_concurrent_refs: 6,
            ref_timeout_secs: 60,
            poll_interval_ms: 500,
            db_timeout_secs: 10,
            arxiv_delay_secs: 3.0,
            max_rate_limit_retries: 3,
            title_threshold: 0.8,
            min_candidate_similarity: 0.6,
            retry_failed_sources: true,
            cache: Some(Arc::new(QueryCache::default())),
            metrics: Arc::new(SourceMetrics::default()),
        }
    }
}

impl Config {
    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            title_threshold: self.title_threshold,
            min_candidate_similarity: self.min_candidate_similarity,
        }
    }
}

/// Check a list of references against the configured sources.
///
/// Verifies references concurrently with bounded parallelism, emitting
/// progress events via the callback. Results come back in input order. The
/// operation can be cancelled via the `CancellationToken`, in which case
/// [`CoreError::Cancelled`] is returned and partial results are discarded.
/// Adapter statistics accumulate in `config.metrics`.
pub async fn check_references(
    refs: Vec<Reference>,
    config: Config,
    progress: impl Fn(ProgressEvent) + Send + Sync,
    cancel: CancellationToken,
) -> Result<BatchReport, CoreError> {
    let verifier = Arc::new(Verifier::from_config(&config, Arc::clone(&config.metrics))?);
    let options = BatchOptions::from(&config);
    pool::run_batch(refs, verifier, options, progress, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(kind: DiscrepancyKind, severity: Severity) -> Discrepancy {
        Discrepancy::new(kind, severity, "x")
    }

    #[test]
    fn status_precedence() {
        assert_eq!(Status::from_discrepancies(&[]), Status::Verified);
        assert_eq!(
            Status::from_discrepancies(&[d(DiscrepancyKind::Year, Severity::Warning)]),
            Status::Warning
        );
        assert_eq!(
            Status::from_discrepancies(&[
                d(DiscrepancyKind::Year, Severity::Warning),
                d(DiscrepancyKind::Author, Severity::Error),
            ]),
            Status::Error
        );
        assert_eq!(
            Status::from_discrepancies(&[Discrepancy::unverified()]),
            Status::Unverified
        );
        assert_eq!(
            Status::from_discrepancies(&[Discrepancy::timeout(Duration::from_secs(60))]),
            Status::Error
        );
    }

    #[test]
    fn unverified_is_exclusive() {
        let reference = Reference {
            title: "T".into(),
            ..Default::default()
        };
        let r = VerificationResult::new(
            &reference,
            None,
            vec![
                Discrepancy::unverified(),
                d(DiscrepancyKind::Venue, Severity::Warning),
            ],
            None,
            None,
            vec![],
        );
        assert_eq!(r.discrepancies.len(), 1);
        assert_eq!(r.discrepancies[0].kind, DiscrepancyKind::Venue);
        assert_eq!(r.status, Status::Warning);

        let r = VerificationResult::new(
            &reference,
            None,
            vec![Discrepancy::unverified(), Discrepancy::unverified()],
            None,
            None,
            vec![],
        );
        assert_eq!(r.discrepancies.len(), 1);
        assert_eq!(r.status, Status::Unverified);
    }

    #[test]
    fn stats_record_each_status() {
        let mut stats = CheckStats::new(4);
        for s in [Status::Verified, Status::Warning, Status::Error, Status::Unverified] {
            stats.record(s);
        }
        assert_eq!(stats.completed, 4);
        assert_eq!(stats.problems(), 3);
    }

    #[test]
    fn reference_accepts_camel_case_raw_text() {
        let r: Reference =
            serde_json::from_str(r#"{"title": "A", "authors": ["B"], "rawText": "raw"}"#).unwrap();
        assert_eq!(r.raw_text, "raw");
        assert_eq!(r.year, None);
    }

    #[test]
    fn progress_events_are_tagged() {
        let ev = ProgressEvent::Progress {
            current: 1,
            total: 2,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["current"], 1);
    }
}
