//! DOI and ArXiv identifier extraction.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::Reference;

static DOI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(10\.\d{4,9}/[^\s"<>]+)"#).unwrap());

static DOI_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bdoi\b").unwrap());

// New style 1706.03762v5, old style hep-th/9901001v2 or math.GT/0309136.
const ARXIV_ID: &str = r"(\d{4}\.\d{4,5}|[a-z][a-z\-]*(?:\.[A-Z]{2})?/\d{7})(?:v(\d+))?";

static ARXIV_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)arxiv\.org/(?:abs|pdf)/{ARXIV_ID}")).unwrap()
});

static ARXIV_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)arxiv(?:\s+preprint)?\s*:?\s*(?:abs/)?{ARXIV_ID}")).unwrap()
});

static ARXIV_BARE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^\s*(?:arxiv:)?{ARXIV_ID}\s*$")).unwrap());

/// An ArXiv identifier split into its base ID and optional version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArxivId {
    pub id: String,
    pub version: Option<u32>,
}

impl ArxivId {
    /// Identifier without the version suffix.
    pub fn base(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ArxivId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}v{}", self.id, v),
            None => f.write_str(&self.id),
        }
    }
}

fn from_captures(caps: regex::Captures<'_>) -> Option<ArxivId> {
    let id = caps.get(1)?.as_str().to_string();
    let version = caps.get(2).and_then(|m| m.as_str().parse().ok());
    Some(ArxivId { id, version })
}

/// Extract an ArXiv ID from free text, an `arxiv.org` URL, or a bare ID.
///
/// Free text must mention arXiv next to the identifier, since a bare
/// `NNNN.NNNNN` in prose is as likely a page range or report number.
pub fn extract_arxiv_id(text: &str) -> Option<ArxivId> {
    ARXIV_URL_RE
        .captures(text)
        .or_else(|| ARXIV_TEXT_RE.captures(text))
        .or_else(|| ARXIV_BARE_RE.captures(text))
        .and_then(from_captures)
}

/// Extract the first DOI found in `text`, trailing punctuation trimmed.
pub fn extract_doi(text: &str) -> Option<String> {
    let raw = DOI_RE.captures(text)?.get(1)?.as_str();
    let trimmed = raw.trim_end_matches(['.', ',', ';', ')', ']', '}']);
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Normalize a DOI for comparison: resolver prefixes stripped, lowercased.
pub fn normalize_doi(doi: &str) -> String {
    let mut s = doi.trim();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi.org/",
        "doi:",
        "DOI:",
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim();
            break;
        }
    }
    s.to_lowercase()
}

/// Whether two DOIs name the same work.
pub fn same_doi(a: &str, b: &str) -> bool {
    normalize_doi(a) == normalize_doi(b)
}

pub fn has_doi_evidence(reference: &Reference) -> bool {
    reference.doi.as_deref().is_some_and(|d| !d.trim().is_empty())
        || reference
            .url
            .as_deref()
            .is_some_and(|u| u.to_lowercase().contains("doi.org/"))
        || DOI_WORD_RE.is_match(&reference.raw_text)
}

pub fn cited_doi(reference: &Reference) -> Option<String> {
    reference
        .doi
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(|d| extract_doi(d).unwrap_or_else(|| d.to_string()))
        .or_else(|| reference.url.as_deref().and_then(extract_doi))
        .or_else(|| extract_doi(&reference.raw_text))
        .map(|d| normalize_doi(&d))
}

pub fn cited_arxiv_id(reference: &Reference) -> Option<ArxivId> {
    reference
        .url
        .as_deref()
        .and_then(extract_arxiv_id)
        .or_else(|| reference.eprint.as_deref().and_then(extract_arxiv_id))
        .or_else(|| extract_arxiv_id(&reference.raw_text))
}
