//! Comparing a cited reference against an authoritative record.

use crate::matching::{self, identifiers};
use crate::{Discrepancy, DiscrepancyKind, Reference, Severity, VerifiedPaper};

/// Thresholds used when comparing and when picking search candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    /// Titles scoring below this get a `title` discrepancy.
    pub title_threshold: f64,
    /// Search results scoring below this are not considered the cited work.
    pub min_candidate_similarity: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            title_threshold: 0.8,
            min_candidate_similarity: 0.6,
        }
    }
}

/// Whether the authoritative author list is complete or cut short by the
/// source (search-engine snippets end in "…").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorCoverage {
    Complete,
    Truncated,
}

/// All discrepancies between `reference` and `paper`.
pub fn diff_reference(
    reference: &Reference,
    paper: &VerifiedPaper,
    opts: &MatchOptions,
) -> Vec<Discrepancy> {
    diff_with_coverage(reference, paper, opts, AuthorCoverage::Complete)
}

pub fn diff_with_coverage(
    reference: &Reference,
    paper: &VerifiedPaper,
    opts: &MatchOptions,
    coverage: AuthorCoverage,
) -> Vec<Discrepancy> {
    let mut out = Vec::new();

    if !reference.title.trim().is_empty() && !paper.title.trim().is_empty() {
        let score = matching::title_similarity(&reference.title, &paper.title);
        if score < opts.title_threshold {
            out.push(
                Discrepancy::new(
                    DiscrepancyKind::Title,
                    Severity::Warning,
                    format!(
                        "Title mismatch (similarity {score:.2}): correct title is '{}'",
                        paper.title
                    ),
                )
                .with_values(reference.title.clone(), paper.title.clone()),
            );
        }
    }

    let correct_authors = paper.author_names();
    let authors_agree = match coverage {
        AuthorCoverage::Complete => matching::compare_authors(&reference.authors, &correct_authors),
        AuthorCoverage::Truncated => first_author_agrees(&reference.authors, &correct_authors),
    };
    if let (false, message) = authors_agree {
        out.push(
            Discrepancy::new(
                DiscrepancyKind::Author,
                Severity::Error,
                message.unwrap_or_else(|| "Author mismatch".to_string()),
            )
            .with_values(
                reference.authors.join(", "),
                correct_authors.join(", "),
            ),
        );
    }

    if let (true, Some(message)) = matching::year_differs(reference.year, paper.year) {
        out.push(
            Discrepancy::new(DiscrepancyKind::Year, Severity::Warning, message).with_values(
                reference.year.map(|y| y.to_string()),
                paper.year.map(|y| y.to_string()),
            ),
        );
    }

    if let (Some(cited), Some(correct)) = (reference.venue.as_deref(), paper.venue.as_deref()) {
        if matching::venues_differ(cited, correct) {
            out.push(
                Discrepancy::new(
                    DiscrepancyKind::Venue,
                    Severity::Warning,
                    format!("Venue mismatch: cited '{cited}', correct '{correct}'"),
                )
                .with_values(cited.to_string(), correct.to_string()),
            );
        }
    }

    if let (Some(cited), Some(correct)) = (reference.cited_doi(), paper.doi()) {
        if !identifiers::same_doi(&cited, correct) {
            out.push(
                Discrepancy::new(
                    DiscrepancyKind::Doi,
                    Severity::Error,
                    format!("DOI mismatch: cited {cited}, correct {correct}"),
                )
                .with_values(cited.clone(), correct.to_string()),
            );
        }
    }

    if let (Some(cited), Some(correct)) = (reference.arxiv_id(), paper.arxiv_id()) {
        let correct_base = matching::extract_arxiv_id(correct)
            .map(|id| id.id)
            .unwrap_or_else(|| correct.to_string());
        if !cited.base().eq_ignore_ascii_case(&correct_base) {
            out.push(
                Discrepancy::new(
                    DiscrepancyKind::Arxiv,
                    Severity::Error,
                    format!(
                        "ArXiv ID mismatch: cited {}, correct {}",
                        cited.base(),
                        correct_base
                    ),
                )
                .with_values(cited.to_string(), correct_base),
            );
        }
    }

    out
}

/// Compare only the first author; the rest of a truncated list is unknown.
fn first_author_agrees(cited: &[String], correct: &[String]) -> (bool, Option<String>) {
    let (cited, _) = matching::names::strip_et_al(cited);
    match (cited.first(), correct.first()) {
        (Some(c), Some(k)) if !matching::is_name_match(c, k) => (
            false,
            Some(format!("First author mismatch: cited '{c}', correct '{k}'")),
        ),
        _ => (true, None),
    }
}

/// The search result most similar to the cited title, if any reaches
/// `min_candidate_similarity`.
pub fn best_candidate(
    reference: &Reference,
    candidates: Vec<VerifiedPaper>,
    opts: &MatchOptions,
) -> Option<VerifiedPaper> {
    if reference.title.trim().is_empty() {
        return None;
    }
    candidates
        .into_iter()
        .map(|paper| {
            let score = matching::title_similarity(&reference.title, &paper.title);
            (score, paper)
        })
        .filter(|(score, _)| *score >= opts.min_candidate_similarity)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(score, paper)| {
            log::debug!("best candidate '{}' (similarity {score:.2})", paper.title);
            paper
        })
}
