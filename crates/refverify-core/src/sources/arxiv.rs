//! ArXiv adapter over the Atom export API.
//!
//! Lookups always ask for the base identifier, so the feed describes the
//! latest version. When the citation names a specific version the result
//! carries a `version` warning instead of treating the drift as an error.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::{Lookup, LookupContext, RemoteClient, SourceAdapter, SourceError, SourceKind};
use crate::diff::best_candidate;
use crate::matching::{ArxivId, extract_arxiv_id};
use crate::{Author, Discrepancy, DiscrepancyKind, Reference, Severity, VerifiedPaper};

const DEFAULT_BASE_URL: &str = "https://export.arxiv.org";
const SEARCH_RESULTS: &str = "5";

/// One `<entry>` of an Atom feed.
#[derive(Debug, Default, Clone, PartialEq)]
struct AtomEntry {
    id: String,
    title: String,
    published: String,
    authors: Vec<String>,
    doi: Option<String>,
    journal_ref: Option<String>,
    pdf_url: Option<String>,
}

pub struct ArxivSource {
    remote: RemoteClient,
    base_url: String,
}

impl ArxivSource {
    pub fn new(remote: RemoteClient) -> Self {
        Self {
            remote,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch(
        &self,
        query: &[(&str, String)],
        ctx: &LookupContext,
    ) -> Result<Vec<AtomEntry>, SourceError> {
        let url = format!("{}/api/query", self.base_url);
        let Some(xml) = self
            .remote
            .get_text(self.name(), &ctx.cancel, |c| c.get(&url).query(query))
            .await?
        else {
            return Ok(Vec::new());
        };
        let entries = parse_feed(&xml)?;
        // The API answers unknown IDs with a single error entry.
        Ok(entries
            .into_iter()
            .filter(|e| !e.id.contains("/api/errors") && !e.title.trim().is_empty())
            .collect())
    }

    async fn by_id(
        &self,
        reference: &Reference,
        cited: &ArxivId,
        ctx: &LookupContext,
    ) -> Result<Lookup, SourceError> {
        let query = [
            ("id_list", cited.base().to_string()),
            ("max_results", "1".to_string()),
        ];
        let Some(entry) = self.fetch(&query, ctx).await?.into_iter().next() else {
            return Ok(Lookup::not_found());
        };

        let latest = extract_arxiv_id(&entry.id).and_then(|id| id.version);
        let paper = to_paper(entry, cited.base());
        let canonical = format!("https://arxiv.org/abs/{}", cited.base());
        let mut lookup = Lookup::found(reference, paper, &ctx.options, Some(canonical));

        if let Some(version) = cited.version {
            let message = match latest {
                Some(latest) => format!(
                    "Cites arXiv version v{version}; metadata reflects the latest version (v{latest})"
                ),
                None => {
                    format!("Cites arXiv version v{version}; metadata reflects the latest version")
                }
            };
            lookup.discrepancies.push(
                Discrepancy::new(DiscrepancyKind::Version, Severity::Warning, message)
                    .with_values(format!("v{version}"), latest.map(|v| format!("v{v}"))),
            );
        }
        Ok(lookup)
    }

    async fn by_title(
        &self,
        reference: &Reference,
        ctx: &LookupContext,
    ) -> Result<Lookup, SourceError> {
        let title = reference.title.replace('"', " ");
        if title.trim().is_empty() {
            return Ok(Lookup::not_found());
        }
        let query = [
            ("search_query", format!("ti:\"{}\"", title.trim())),
            ("max_results", SEARCH_RESULTS.to_string()),
        ];
        let candidates = self
            .fetch(&query, ctx)
            .await?
            .into_iter()
            .map(|entry| {
                let base = extract_arxiv_id(&entry.id)
                    .map(|id| id.id)
                    .unwrap_or_default();
                to_paper(entry, &base)
            })
            .collect();
        Ok(match best_candidate(reference, candidates, &ctx.options) {
            Some(paper) => {
                let canonical = paper.url.clone();
                Lookup::found(reference, paper, &ctx.options, canonical)
            }
            None => Lookup::not_found(),
        })
    }
}

fn to_paper(entry: AtomEntry, base_id: &str) -> VerifiedPaper {
    let mut paper = VerifiedPaper {
        title: entry.title.split_whitespace().collect::<Vec<_>>().join(" "),
        authors: entry.authors.into_iter().map(Author::from).collect(),
        year: entry.published.get(..4).and_then(|y| y.parse().ok()),
        venue: entry.journal_ref,
        open_access_pdf_url: entry.pdf_url,
        ..Default::default()
    };
    if !base_id.is_empty() {
        paper.external_ids.insert("ArXiv".into(), base_id.to_string());
        paper.url = Some(format!("https://arxiv.org/abs/{base_id}"));
    }
    if let Some(doi) = entry.doi {
        paper.external_ids.insert("DOI".into(), doi);
    }
    paper
}

fn parse_feed(xml: &str) -> Result<Vec<AtomEntry>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<AtomEntry> = None;
    let mut path: Vec<Vec<u8>> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"entry" {
                    current = Some(AtomEntry::default());
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                let Some(entry) = current.as_mut() else {
                    continue;
                };
                if e.name().as_ref() != b"link" {
                    continue;
                }
                let mut href = None;
                let mut is_pdf = false;
                for attr in e.attributes().flatten() {
                    let value = attr
                        .decode_and_unescape_value(reader.decoder())
                        .map_err(|err| SourceError::Parse(format!("arXiv feed: {err}")))?;
                    match attr.key.as_ref() {
                        b"href" => href = Some(value.into_owned()),
                        b"title" => is_pdf = value == "pdf",
                        _ => {}
                    }
                }
                if is_pdf {
                    entry.pdf_url = href;
                }
            }
            Ok(Event::Text(t)) => {
                let Some(entry) = current.as_mut() else {
                    continue;
                };
                let text = t
                    .unescape()
                    .map_err(|err| SourceError::Parse(format!("arXiv feed: {err}")))?;
                let in_author = path.iter().any(|p| p == b"author");
                match path.last().map(Vec::as_slice) {
                    Some(b"id") => entry.id.push_str(&text),
                    Some(b"title") => {
                        if !entry.title.is_empty() {
                            entry.title.push(' ');
                        }
                        entry.title.push_str(&text);
                    }
                    Some(b"published") => entry.published.push_str(&text),
                    Some(b"name") if in_author => entry.authors.push(text.into_owned()),
                    Some(b"arxiv:doi") => entry.doi = Some(text.into_owned()),
                    Some(b"arxiv:journal_ref") => entry.journal_ref = Some(text.into_owned()),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"entry" {
                    entries.extend(current.take());
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("arXiv feed: {e}"))),
            _ => {}
        }
    }
    Ok(entries)
}

#[async_trait]
impl SourceAdapter for ArxivSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Arxiv
    }

    async fn try_verify(
        &self,
        reference: &Reference,
        ctx: &LookupContext,
    ) -> Result<Lookup, SourceError> {
        match reference.arxiv_id() {
            Some(id) => self.by_id(reference, &id, ctx).await,
            None => self.by_title(reference, ctx).await,
        }
    }
}
