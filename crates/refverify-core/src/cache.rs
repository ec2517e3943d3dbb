//! In-memory cache of adapter lookups.
//!
//! Avoids redundant HTTP calls when the same citation is checked against the
//! same source more than once (e.g. across bibliographies that share
//! references, or when a batch is re-run).
//!
//! Keys combine the source with a fingerprint of every cited field that
//! influences the comparison, so two citations of the same paper with
//! different author lists get separate entries. Titles go through
//! [`normalize_title`] so minor variations (diacritics, HTML entities, Greek
//! letters) share a key. Only `Ok` lookups are cached; transport errors never
//! are.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::Reference;
use crate::matching::{fold, normalize_title};
use crate::sources::{Lookup, SourceKind};

/// Default time-to-live for positive (informative) cache entries.
const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(24 * 60 * 60); // 24 hours

/// Default time-to-live for negative (not found) cache entries.
const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(6 * 60 * 60); // 6 hours

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct CacheKey {
    source: SourceKind,
    fingerprint: String,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    lookup: Lookup,
    inserted_at: Instant,
}

fn fingerprint(reference: &Reference) -> String {
    let authors: Vec<String> = reference.authors.iter().map(|a| fold(a.trim())).collect();
    format!(
        "{}|{}|{}|{}|{}|{}",
        normalize_title(&reference.title),
        authors.join(";"),
        reference.year.map(|y| y.to_string()).unwrap_or_default(),
        reference.venue.as_deref().map(fold).unwrap_or_default(),
        reference.cited_doi().unwrap_or_default(),
        reference.arxiv_id().map(|id| id.to_string()).unwrap_or_default(),
    )
}

/// Thread-safe lookup cache shared by every worker of every batch.
///
/// Uses [`DashMap`] for lock-free concurrent access from the worker tasks.
pub struct QueryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    positive_ttl: Duration,
    negative_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_POSITIVE_TTL, DEFAULT_NEGATIVE_TTL)
    }
}

impl QueryCache {
    pub fn new(positive_ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            positive_ttl,
            negative_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached lookup of `reference` against `source`, if present and fresh.
    pub fn get(&self, source: SourceKind, reference: &Reference) -> Option<Lookup> {
        let key = CacheKey {
            source,
            fingerprint: fingerprint(reference),
        };

        let entry = match self.entries.get(&key) {
            Some(e) => e,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        let ttl = if entry.lookup.is_informative() {
            self.positive_ttl
        } else {
            self.negative_ttl
        };

        if entry.inserted_at.elapsed() > ttl {
            drop(entry);
            self.entries.remove(&key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.lookup.clone())
    }

    /// Store a successful lookup. Errors must not be passed here.
    pub fn insert(&self, source: SourceKind, reference: &Reference, lookup: &Lookup) {
        let key = CacheKey {
            source,
            fingerprint: fingerprint(reference),
        };
        self.entries.insert(
            key,
            CacheEntry {
                lookup: lookup.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Number of cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.entries.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .field("positive_ttl", &self.positive_ttl)
            .field("negative_ttl", &self.negative_ttl)
            .finish()
    }
}
