//! Single-reference verification: pick the sources, walk them in order,
//! keep the first informative answer.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::cache::QueryCache;
use crate::diff::MatchOptions;
use crate::metrics::SourceMetrics;
use crate::sources::{Lookup, LookupContext, SourceError, SourceKind, SourceSet};
use crate::{Config, CoreError, Discrepancy, Reference, VerificationResult};

/// Sources tried after the identifier-driven ones, in order.
const FALLBACK_ORDER: [SourceKind; 4] = [
    SourceKind::SemanticScholar,
    SourceKind::OpenAlex,
    SourceKind::Crossref,
    SourceKind::Scholar,
];

/// Order in which sources are consulted for `reference`.
///
/// The local index always comes first. A cited DOI sends CrossRef next, an
/// ArXiv identifier sends ArXiv next, then the general fallbacks. Sources
/// missing from `available` are skipped.
pub fn plan_for(reference: &Reference, available: &SourceSet) -> Vec<SourceKind> {
    let mut plan = vec![SourceKind::LocalIndex];
    if reference.has_doi_evidence() {
        plan.push(SourceKind::Crossref);
    }
    if reference.arxiv_id().is_some() {
        plan.push(SourceKind::Arxiv);
    }
    for kind in FALLBACK_ORDER {
        if !plan.contains(&kind) {
            plan.push(kind);
        }
    }
    plan.retain(|k| available.contains(*k));
    plan
}

/// What a single adapter call amounted to.
enum Attempt {
    Answered(Lookup),
    Failed,
}

/// Verifies one reference at a time against a fixed set of sources.
///
/// Cheap to share behind an `Arc`; every batch worker uses the same one.
#[derive(Debug)]
pub struct Verifier {
    sources: SourceSet,
    metrics: Arc<SourceMetrics>,
    cache: Option<Arc<QueryCache>>,
    options: MatchOptions,
    retry_failed_sources: bool,
}

impl Verifier {
    pub fn new(sources: SourceSet, metrics: Arc<SourceMetrics>) -> Self {
        Self {
            sources,
            metrics,
            cache: None,
            options: MatchOptions::default(),
            retry_failed_sources: true,
        }
    }

    pub fn with_cache(mut self, cache: Option<Arc<QueryCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_options(mut self, options: MatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retry_failed_sources(mut self, retry: bool) -> Self {
        self.retry_failed_sources = retry;
        self
    }

    /// Build the sources the configuration allows and wrap them.
    pub fn from_config(config: &Config, metrics: Arc<SourceMetrics>) -> Result<Self, CoreError> {
        let sources = SourceSet::from_config(config)?;
        if sources.is_empty() {
            log::warn!("no sources available; every reference will be unverified");
        }
        Ok(Self::new(sources, metrics)
            .with_cache(config.cache.clone())
            .with_options(config.match_options())
            .with_retry_failed_sources(config.retry_failed_sources))
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn metrics(&self) -> &Arc<SourceMetrics> {
        &self.metrics
    }

    pub fn plan_for(&self, reference: &Reference) -> Vec<SourceKind> {
        plan_for(reference, &self.sources)
    }

    /// Verify one reference.
    ///
    /// Only cancellation is an error; every other outcome, including all
    /// sources failing, is expressed as a [`VerificationResult`].
    pub async fn verify(
        &self,
        reference: &Reference,
        cancel: &CancellationToken,
    ) -> Result<VerificationResult, CoreError> {
        let plan = self.plan_for(reference);
        let ctx = LookupContext {
            options: self.options,
            cancel: cancel.clone(),
        };

        let mut failed = Vec::new();
        for &kind in &plan {
            match self.attempt(kind, reference, &ctx).await? {
                Attempt::Answered(lookup) if lookup.is_informative() => {
                    return Ok(self.finish(reference, kind, lookup, &failed));
                }
                Attempt::Answered(_) => {}
                Attempt::Failed => failed.push(kind),
            }
        }

        let mut still_failed = failed.clone();
        if self.retry_failed_sources && !failed.is_empty() {
            log::info!(
                "retrying {} failed source(s) for '{}'",
                failed.len(),
                reference.title
            );
            still_failed.clear();
            for &kind in &failed {
                match self.attempt(kind, reference, &ctx).await? {
                    Attempt::Answered(lookup) if lookup.is_informative() => {
                        return Ok(self.finish(reference, kind, lookup, &failed));
                    }
                    Attempt::Answered(_) => {}
                    Attempt::Failed => still_failed.push(kind),
                }
            }
        }

        let failed_names = names(&failed);
        let discrepancy = if !plan.is_empty() && still_failed.len() == plan.len() {
            Discrepancy::api_failure(&names(&still_failed))
        } else {
            Discrepancy::unverified()
        };
        Ok(VerificationResult::new(
            reference,
            None,
            vec![discrepancy],
            None,
            None,
            failed_names,
        ))
    }

    async fn attempt(
        &self,
        kind: SourceKind,
        reference: &Reference,
        ctx: &LookupContext,
    ) -> Result<Attempt, CoreError> {
        let Some(adapter) = self.sources.get(kind) else {
            return Ok(Attempt::Answered(Lookup::not_found()));
        };
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(kind, reference)) {
            log::debug!("{}: cache hit for '{}'", adapter.name(), reference.title);
            return Ok(Attempt::Answered(hit));
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(CoreError::Cancelled),
            outcome = adapter.try_verify(reference, ctx) => outcome,
        };
        if matches!(outcome, Err(SourceError::Cancelled)) {
            return Err(CoreError::Cancelled);
        }
        self.metrics
            .record(adapter.name(), outcome.is_ok(), started.elapsed());

        match outcome {
            Ok(lookup) => {
                if let Some(cache) = &self.cache {
                    cache.insert(kind, reference, &lookup);
                }
                Ok(Attempt::Answered(lookup))
            }
            Err(e) => {
                log::warn!("{}: '{}': {e}", adapter.name(), reference.title);
                Ok(Attempt::Failed)
            }
        }
    }

    fn finish(
        &self,
        reference: &Reference,
        kind: SourceKind,
        lookup: Lookup,
        failed: &[SourceKind],
    ) -> VerificationResult {
        log::debug!("'{}' resolved by {kind}", reference.title);
        VerificationResult::new(
            reference,
            lookup.paper,
            lookup.discrepancies,
            lookup.canonical_url,
            Some(kind.name().to_string()),
            names(failed),
        )
    }
}

fn names(kinds: &[SourceKind]) -> Vec<String> {
    kinds.iter().map(|k| k.name().to_string()).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::sources::SourceAdapter;
    use crate::{Author, DiscrepancyKind, Status, VerifiedPaper};

    type CallLog = Arc<Mutex<Vec<SourceKind>>>;

    /// Adapter replaying scripted outcomes; not-found once the script runs out.
    pub(crate) struct StubSource {
        kind: SourceKind,
        script: Mutex<VecDeque<Result<Lookup, SourceError>>>,
        delay: Duration,
        calls: CallLog,
    }

    impl StubSource {
        pub(crate) fn new(kind: SourceKind, calls: &CallLog) -> Self {
            Self {
                kind,
                script: Mutex::new(VecDeque::new()),
                delay: Duration::ZERO,
                calls: Arc::clone(calls),
            }
        }

        pub(crate) fn then(self, outcome: Result<Lookup, SourceError>) -> Self {
            self.script.lock().unwrap().push_back(outcome);
            self
        }

        pub(crate) fn always(self, outcome: Result<Lookup, SourceError>, times: usize) -> Self {
            (0..times).fold(self, |s, _| s.then(outcome.clone()))
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl SourceAdapter for StubSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn try_verify(
            &self,
            _reference: &Reference,
            _ctx: &LookupContext,
        ) -> Result<Lookup, SourceError> {
            self.calls.lock().unwrap().push(self.kind);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Lookup::not_found()))
        }
    }

    pub(crate) fn found(title: &str) -> Lookup {
        Lookup {
            paper: Some(VerifiedPaper {
                title: title.into(),
                authors: vec![Author::from("Ashish Vaswani")],
                ..Default::default()
            }),
            discrepancies: Vec::new(),
            canonical_url: Some("https://example.org/paper".into()),
        }
    }

    fn transport() -> Result<Lookup, SourceError> {
        Err(SourceError::Transport("connection reset".into()))
    }

    fn all_stubs(calls: &CallLog) -> SourceSet {
        SourceKind::ALL
            .into_iter()
            .fold(SourceSet::new(), |set, kind| {
                set.with(Arc::new(StubSource::new(kind, calls)))
            })
    }

    fn verifier(sources: SourceSet) -> Verifier {
        Verifier::new(sources, Arc::new(SourceMetrics::new()))
    }

    fn plain(title: &str) -> Reference {
        Reference {
            title: title.into(),
            authors: vec!["Ashish Vaswani".into()],
            ..Default::default()
        }
    }

    #[test]
    fn doi_source_comes_before_arxiv() {
        let calls = CallLog::default();
        let reference = Reference {
            title: "T".into(),
            doi: Some("10.1000/xyz".into()),
            eprint: Some("1706.03762".into()),
            ..Default::default()
        };
        assert_eq!(
            plan_for(&reference, &all_stubs(&calls)),
            vec![
                SourceKind::LocalIndex,
                SourceKind::Crossref,
                SourceKind::Arxiv,
                SourceKind::SemanticScholar,
                SourceKind::OpenAlex,
                SourceKind::Scholar,
            ]
        );
    }

    #[test]
    fn no_identifiers_uses_fallback_order() {
        let calls = CallLog::default();
        assert_eq!(
            plan_for(&plain("T"), &all_stubs(&calls)),
            vec![
                SourceKind::LocalIndex,
                SourceKind::SemanticScholar,
                SourceKind::OpenAlex,
                SourceKind::Crossref,
                SourceKind::Scholar,
            ]
        );
    }

    #[test]
    fn doi_word_in_raw_text_counts_as_evidence() {
        let calls = CallLog::default();
        let reference = Reference {
            title: "T".into(),
            raw_text: "Smith. T. J. Foo, 2020. doi: see publisher".into(),
            ..Default::default()
        };
        assert_eq!(plan_for(&reference, &all_stubs(&calls))[1], SourceKind::Crossref);
    }

    #[test]
    fn unavailable_sources_are_skipped() {
        let calls = CallLog::default();
        let sources = SourceSet::new()
            .with(Arc::new(StubSource::new(SourceKind::OpenAlex, &calls)))
            .with(Arc::new(StubSource::new(SourceKind::Scholar, &calls)));
        assert_eq!(
            plan_for(&plain("T"), &sources),
            vec![SourceKind::OpenAlex, SourceKind::Scholar]
        );
    }

    #[tokio::test]
    async fn stops_at_first_informative_source() {
        let calls = CallLog::default();
        let sources = all_stubs(&calls).with(Arc::new(
            StubSource::new(SourceKind::SemanticScholar, &calls).then(Ok(found("T"))),
        ));
        let v = verifier(sources);
        let result = v.verify(&plain("T"), &CancellationToken::new()).await.unwrap();

        assert_eq!(result.status, Status::Verified);
        assert_eq!(result.source.as_deref(), Some("Semantic Scholar"));
        assert_eq!(result.canonical_url.as_deref(), Some("https://example.org/paper"));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![SourceKind::LocalIndex, SourceKind::SemanticScholar]
        );
        let stat = v.metrics().get("Semantic Scholar").unwrap();
        assert_eq!(stat.success_count, 1);
    }

    #[tokio::test]
    async fn nothing_found_is_unverified() {
        let calls = CallLog::default();
        let result = verifier(all_stubs(&calls))
            .verify(&plain("T"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, Status::Unverified);
        assert_eq!(result.discrepancies.len(), 1);
        assert_eq!(result.discrepancies[0].kind, DiscrepancyKind::Unverified);
        assert!(result.verified_paper.is_none());
        assert!(result.failed_sources.is_empty());
    }

    #[tokio::test]
    async fn every_source_failing_is_api_failure() {
        let calls = CallLog::default();
        let sources = SourceSet::new()
            .with(Arc::new(StubSource::new(SourceKind::OpenAlex, &calls).always(transport(), 2)))
            .with(Arc::new(StubSource::new(SourceKind::Scholar, &calls).always(transport(), 2)));
        let v = verifier(sources);
        let result = v.verify(&plain("T"), &CancellationToken::new()).await.unwrap();

        assert_eq!(result.status, Status::Error);
        assert_eq!(result.discrepancies.len(), 1);
        let d = &result.discrepancies[0];
        assert_eq!(d.kind, DiscrepancyKind::ApiFailure);
        assert!(d.message.contains("OpenAlex") && d.message.contains("Scholar"));
        assert_eq!(result.failed_sources, vec!["OpenAlex", "Scholar"]);
        // First pass plus one retry each.
        assert_eq!(calls.lock().unwrap().len(), 4);
        assert_eq!(v.metrics().get("OpenAlex").unwrap().failure_count, 2);
    }

    #[tokio::test]
    async fn partial_failure_is_unverified() {
        let calls = CallLog::default();
        let sources = SourceSet::new()
            .with(Arc::new(StubSource::new(SourceKind::OpenAlex, &calls).always(transport(), 2)))
            .with(Arc::new(StubSource::new(SourceKind::Scholar, &calls)));
        let result = verifier(sources)
            .verify(&plain("T"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, Status::Unverified);
        assert_eq!(result.failed_sources, vec!["OpenAlex"]);
    }

    #[tokio::test]
    async fn retry_pass_recovers_failed_source() {
        let calls = CallLog::default();
        let sources = SourceSet::new()
            .with(Arc::new(
                StubSource::new(SourceKind::SemanticScholar, &calls)
                    .then(transport())
                    .then(Ok(found("T"))),
            ))
            .with(Arc::new(StubSource::new(SourceKind::Scholar, &calls)));
        let result = verifier(sources)
            .verify(&plain("T"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, Status::Verified);
        assert_eq!(result.source.as_deref(), Some("Semantic Scholar"));
        assert_eq!(result.failed_sources, vec!["Semantic Scholar"]);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                SourceKind::SemanticScholar,
                SourceKind::Scholar,
                SourceKind::SemanticScholar
            ]
        );
    }

    #[tokio::test]
    async fn retry_pass_can_be_disabled() {
        let calls = CallLog::default();
        let sources = SourceSet::new().with(Arc::new(
            StubSource::new(SourceKind::OpenAlex, &calls)
                .then(transport())
                .then(Ok(found("T"))),
        ));
        let result = verifier(sources)
            .with_retry_failed_sources(false)
            .verify(&plain("T"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.has_kind(DiscrepancyKind::ApiFailure));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cached_lookups_skip_the_adapter() {
        let calls = CallLog::default();
        let sources = SourceSet::new().with(Arc::new(
            StubSource::new(SourceKind::OpenAlex, &calls).then(Ok(found("T"))),
        ));
        let cache = Arc::new(QueryCache::default());
        let v = verifier(sources).with_cache(Some(Arc::clone(&cache)));

        let first = v.verify(&plain("T"), &CancellationToken::new()).await.unwrap();
        let second = v.verify(&plain("T"), &CancellationToken::new()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let calls = CallLog::default();
        let sources = SourceSet::new().with(Arc::new(
            StubSource::new(SourceKind::OpenAlex, &calls).always(transport(), 2),
        ));
        let cache = Arc::new(QueryCache::default());
        let v = verifier(sources)
            .with_cache(Some(Arc::clone(&cache)))
            .with_retry_failed_sources(false);
        v.verify(&plain("T"), &CancellationToken::new()).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_slow_source() {
        let calls = CallLog::default();
        let sources = SourceSet::new().with(Arc::new(
            StubSource::new(SourceKind::OpenAlex, &calls).with_delay(Duration::from_secs(30)),
        ));
        let v = verifier(sources);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = v.verify(&plain("T"), &cancel).await.unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[tokio::test]
    async fn versioned_arxiv_citation_end_to_end() {
        use crate::sources::arxiv::tests::ATTENTION_FEED;
        use crate::sources::{ArxivSource, RemoteClient};
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("id_list", "1706.03762"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ATTENTION_FEED))
            .expect(1)
            .mount(&server)
            .await;

        let arxiv = ArxivSource::new(RemoteClient::new(reqwest::Client::new(), None, 0))
            .with_base_url(server.uri());
        let v = verifier(SourceSet::new().with(Arc::new(arxiv)));
        let reference = Reference {
            title: "Attention Is All You Need".into(),
            authors: vec!["Ashish Vaswani".into()],
            year: Some(2017),
            url: Some("https://arxiv.org/abs/1706.03762v5".into()),
            ..Default::default()
        };
        let result = v.verify(&reference, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.status, Status::Warning);
        assert_eq!(result.discrepancies.len(), 1);
        assert_eq!(result.discrepancies[0].kind, DiscrepancyKind::Version);
        assert!(result.discrepancies[0].message.contains("v5"));
        assert_eq!(
            result.canonical_url.as_deref(),
            Some("https://arxiv.org/abs/1706.03762")
        );
        assert_eq!(result.source.as_deref(), Some("arXiv"));
    }
}
