//! Metadata source adapters.
//!
//! Every adapter resolves a [`Reference`] to an authoritative record and
//! compares the two. "Not found" is a normal outcome ([`Lookup::not_found`]);
//! only transport and decoding problems are errors.

pub(crate) mod arxiv;
mod crossref;
mod http;
mod local;
mod openalex;
mod scholar;
mod semantic_scholar;

pub use arxiv::ArxivSource;
pub use crossref::CrossrefSource;
pub use http::{RemoteClient, build_client};
pub use local::LocalIndexSource;
pub use openalex::OpenAlexSource;
pub use scholar::ScholarSource;
pub use semantic_scholar::SemanticScholarSource;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::diff::{self, AuthorCoverage, MatchOptions};
use crate::rate_limit::{ARXIV_DEFAULT_DELAY, RateLimiters};
use crate::{Config, CoreError, Discrepancy, LocalIndex, Reference, VerifiedPaper};

/// The providers a reference can be checked against, in no particular order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    LocalIndex,
    Crossref,
    Arxiv,
    SemanticScholar,
    OpenAlex,
    Scholar,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::LocalIndex,
        SourceKind::Crossref,
        SourceKind::Arxiv,
        SourceKind::SemanticScholar,
        SourceKind::OpenAlex,
        SourceKind::Scholar,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceKind::LocalIndex => "Local Index",
            SourceKind::Crossref => "CrossRef",
            SourceKind::Arxiv => "arXiv",
            SourceKind::SemanticScholar => "Semantic Scholar",
            SourceKind::OpenAlex => "OpenAlex",
            SourceKind::Scholar => "Scholar",
        }
    }

    /// Parse a user-supplied source name, ignoring case, spaces, `-` and `_`.
    pub fn from_name(name: &str) -> Option<Self> {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_lowercase();
        match key.as_str() {
            "local" | "localindex" | "index" | "offline" => Some(SourceKind::LocalIndex),
            "crossref" => Some(SourceKind::Crossref),
            "arxiv" => Some(SourceKind::Arxiv),
            "semanticscholar" | "s2" => Some(SourceKind::SemanticScholar),
            "openalex" => Some(SourceKind::OpenAlex),
            "scholar" | "googlescholar" => Some(SourceKind::Scholar),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure of a single adapter invocation.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("rate limited (429){}", retry_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode response: {0}")]
    Parse(String),
    #[error("local index error: {0}")]
    Index(String),
    #[error("cancelled")]
    Cancelled,
}

fn retry_suffix(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(", retry after {:.1}s", d.as_secs_f64()))
        .unwrap_or_default()
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Transport(format!("timed out: {e}"))
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

impl From<refverify_index::IndexError> for SourceError {
    fn from(e: refverify_index::IndexError) -> Self {
        SourceError::Index(e.to_string())
    }
}

/// Outcome of one adapter invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lookup {
    pub paper: Option<VerifiedPaper>,
    pub discrepancies: Vec<Discrepancy>,
    pub canonical_url: Option<String>,
}

impl Lookup {
    pub fn not_found() -> Self {
        Self::default()
    }

    /// A found record compared against the reference.
    pub fn found(
        reference: &Reference,
        paper: VerifiedPaper,
        options: &MatchOptions,
        canonical_url: Option<String>,
    ) -> Self {
        Self::found_with_coverage(
            reference,
            paper,
            options,
            canonical_url,
            AuthorCoverage::Complete,
        )
    }

    pub fn found_with_coverage(
        reference: &Reference,
        paper: VerifiedPaper,
        options: &MatchOptions,
        canonical_url: Option<String>,
        coverage: AuthorCoverage,
    ) -> Self {
        let discrepancies = diff::diff_with_coverage(reference, &paper, options, coverage);
        let canonical_url = canonical_url.or_else(|| paper.url.clone());
        Self {
            paper: Some(paper),
            discrepancies,
            canonical_url,
        }
    }

    /// Whether this outcome ends the fallback chain.
    pub fn is_informative(&self) -> bool {
        self.paper.is_some() || !self.discrepancies.is_empty()
    }
}

/// Per-call state handed to adapters.
#[derive(Debug, Clone, Default)]
pub struct LookupContext {
    pub options: MatchOptions,
    pub cancel: CancellationToken,
}

/// A metadata provider able to check a reference.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Look the reference up and compare it against what was found.
    async fn try_verify(
        &self,
        reference: &Reference,
        ctx: &LookupContext,
    ) -> Result<Lookup, SourceError>;
}

/// The adapters available for a run, keyed by kind.
#[derive(Clone, Default)]
pub struct SourceSet {
    adapters: BTreeMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.adapters.keys()).finish()
    }
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter, replacing any previous one of the same kind.
    pub fn insert(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(&kind)
    }

    pub fn contains(&self, kind: SourceKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = SourceKind> + '_ {
        self.adapters.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Build every adapter the configuration allows.
    ///
    /// Disabled sources are left out. A local index that is not configured
    /// or fails to open is left out with a warning, as are the remote
    /// sources when no HTTP client can be built. Unknown names in
    /// `disabled_sources` are a configuration error.
    pub fn from_config(config: &Config) -> Result<Self, CoreError> {
        let disabled = disabled_kinds(&config.disabled_sources)?;
        let mut set = SourceSet::new();

        if !disabled.contains(&SourceKind::LocalIndex) {
            if let Some(index) = open_local_index(config) {
                set.insert(Arc::new(LocalIndexSource::new(index)));
            }
        }

        let remote_wanted = SourceKind::ALL
            .iter()
            .any(|k| *k != SourceKind::LocalIndex && !disabled.contains(k));
        if !remote_wanted {
            return Ok(set);
        }

        let client = match build_client(Duration::from_secs(config.db_timeout_secs)) {
            Ok(client) => client,
            Err(e) => {
                log::warn!("HTTP client unavailable, remote sources disabled: {e}");
                return Ok(set);
            }
        };
        let arxiv_delay =
            Duration::try_from_secs_f64(config.arxiv_delay_secs).unwrap_or(ARXIV_DEFAULT_DELAY);
        let limiters = RateLimiters::new(
            config.crossref_mailto.is_some(),
            config.s2_api_key.is_some(),
            arxiv_delay,
        );
        let remote = |kind: SourceKind| {
            RemoteClient::new(
                client.clone(),
                limiters.get(kind),
                config.max_rate_limit_retries,
            )
        };

        for kind in SourceKind::ALL {
            if kind == SourceKind::LocalIndex || disabled.contains(&kind) {
                continue;
            }
            let adapter: Arc<dyn SourceAdapter> = match kind {
                SourceKind::Crossref => Arc::new(CrossrefSource::new(
                    remote(kind),
                    config.crossref_mailto.clone(),
                )),
                SourceKind::Arxiv => Arc::new(ArxivSource::new(remote(kind))),
                SourceKind::SemanticScholar => Arc::new(SemanticScholarSource::new(
                    remote(kind),
                    config.s2_api_key.clone(),
                )),
                SourceKind::OpenAlex => Arc::new(OpenAlexSource::new(
                    remote(kind),
                    config.openalex_key.clone(),
                    config.crossref_mailto.clone(),
                )),
                SourceKind::Scholar => Arc::new(ScholarSource::new(remote(kind))),
                SourceKind::LocalIndex => continue,
            };
            set.insert(adapter);
        }

        log::debug!("sources available: {set:?}");
        Ok(set)
    }
}

fn disabled_kinds(names: &[String]) -> Result<BTreeSet<SourceKind>, CoreError> {
    names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| {
            SourceKind::from_name(n)
                .ok_or_else(|| CoreError::Config(format!("unknown source '{}'", n.trim())))
        })
        .collect()
}

fn open_local_index(config: &Config) -> Option<Arc<Mutex<LocalIndex>>> {
    if let Some(index) = &config.local_index {
        return Some(Arc::clone(index));
    }
    let path = config.local_index_path.as_ref()?;
    match LocalIndex::open(path) {
        Ok(index) => {
            match index.check_staleness(local::STALE_AFTER_DAYS) {
                Ok(s) if s.is_stale => match s.age_days {
                    Some(days) => log::warn!(
                        "local index {} is {days} days old; consider rebuilding it",
                        path.display()
                    ),
                    None => log::warn!("local index {} has no build date", path.display()),
                },
                Ok(_) => {}
                Err(e) => log::debug!("staleness check failed: {e}"),
            }
            Some(Arc::new(Mutex::new(index)))
        }
        Err(e) => {
            log::warn!("local index {} unavailable: {e}", path.display());
            None
        }
    }
}
