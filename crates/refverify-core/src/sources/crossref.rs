//! CrossRef adapter: direct DOI lookup, bibliographic search otherwise.

use async_trait::async_trait;
use serde::Deserialize;

use super::http::endpoint;
use super::{Lookup, LookupContext, RemoteClient, SourceAdapter, SourceError, SourceKind};
use crate::diff::best_candidate;
use crate::{Author, Reference, VerifiedPaper};

const DEFAULT_BASE_URL: &str = "https://api.crossref.org";
const SEARCH_ROWS: &str = "5";

#[derive(Debug, Deserialize)]
struct WorkEnvelope {
    message: Work,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    message: SearchMessage,
}

#[derive(Debug, Deserialize)]
struct SearchMessage {
    #[serde(default)]
    items: Vec<Work>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Work {
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<WorkAuthor>,
    issued: Option<DateParts>,
    published_print: Option<DateParts>,
    published_online: Option<DateParts>,
    #[serde(default)]
    container_title: Vec<String>,
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkAuthor {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DateParts {
    #[serde(default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

impl DateParts {
    fn year(&self) -> Option<i32> {
        self.date_parts.first()?.first().copied().flatten()
    }
}

fn author_name(author: WorkAuthor) -> Option<String> {
    match (author.given, author.family, author.name) {
        (Some(given), Some(family), _) => Some(format!("{given} {family}")),
        (None, Some(family), _) => Some(family),
        (_, None, Some(name)) => Some(name),
        (Some(given), None, None) => Some(given),
        (None, None, None) => None,
    }
}

fn to_paper(work: Work) -> VerifiedPaper {
    let year = [&work.issued, &work.published_print, &work.published_online]
        .into_iter()
        .flatten()
        .find_map(DateParts::year);
    let mut paper = VerifiedPaper {
        title: work.title.into_iter().next().unwrap_or_default(),
        authors: work
            .author
            .into_iter()
            .filter_map(author_name)
            .map(Author::from)
            .collect(),
        year,
        venue: work.container_title.into_iter().find(|v| !v.trim().is_empty()),
        url: work.url,
        ..Default::default()
    };
    if let Some(doi) = work.doi {
        paper.external_ids.insert("DOI".into(), doi);
    }
    paper
}

pub struct CrossrefSource {
    remote: RemoteClient,
    mailto: Option<String>,
    base_url: String,
}

impl CrossrefSource {
    pub fn new(remote: RemoteClient, mailto: Option<String>) -> Self {
        Self {
            remote,
            mailto,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn polite(&self) -> Vec<(&'static str, String)> {
        self.mailto
            .iter()
            .map(|m| ("mailto", m.clone()))
            .collect()
    }

    async fn by_doi(&self, doi: &str, ctx: &LookupContext) -> Result<Option<Work>, SourceError> {
        let url = endpoint(&self.base_url, ["works"].into_iter().chain(doi.split('/')))?;
        let polite = self.polite();
        let envelope: Option<WorkEnvelope> = self
            .remote
            .get_json(self.name(), &ctx.cancel, |c| c.get(url.clone()).query(&polite))
            .await?;
        Ok(envelope.map(|e| e.message))
    }

    async fn search(
        &self,
        reference: &Reference,
        ctx: &LookupContext,
    ) -> Result<Vec<Work>, SourceError> {
        let mut bibliographic = reference.title.trim().to_string();
        if let Some(first) = reference.authors.first() {
            bibliographic.push(' ');
            bibliographic.push_str(first);
        }
        let url = format!("{}/works", self.base_url);
        let mut query = self.polite();
        query.push(("query.bibliographic", bibliographic));
        query.push(("rows", SEARCH_ROWS.to_string()));
        let envelope: Option<SearchEnvelope> = self
            .remote
            .get_json(self.name(), &ctx.cancel, |c| c.get(&url).query(&query))
            .await?;
        Ok(envelope.map(|e| e.message.items).unwrap_or_default())
    }
}

#[async_trait]
impl SourceAdapter for CrossrefSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Crossref
    }

    async fn try_verify(
        &self,
        reference: &Reference,
        ctx: &LookupContext,
    ) -> Result<Lookup, SourceError> {
        if let Some(doi) = reference.cited_doi() {
            if let Some(work) = self.by_doi(&doi, ctx).await? {
                let paper = to_paper(work);
                let canonical = format!("https://doi.org/{doi}");
                return Ok(Lookup::found(reference, paper, &ctx.options, Some(canonical)));
            }
            log::debug!("CrossRef: DOI {doi} not registered, falling back to search");
        }

        if reference.title.trim().is_empty() {
            return Ok(Lookup::not_found());
        }
        let candidates = self
            .search(reference, ctx)
            .await?
            .into_iter()
            .map(to_paper)
            .collect();
        Ok(match best_candidate(reference, candidates, &ctx.options) {
            Some(paper) => {
                let canonical = paper.doi().map(|d| format!("https://doi.org/{d}"));
                Lookup::found(reference, paper, &ctx.options, canonical)
            }
            None => Lookup::not_found(),
        })
    }
}
