//! Semantic Scholar Graph API adapter.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, IntoUrl, RequestBuilder};
use serde::Deserialize;

use super::http::endpoint;
use super::{Lookup, LookupContext, RemoteClient, SourceAdapter, SourceError, SourceKind};
use crate::diff::best_candidate;
use crate::{Author, Reference, VerifiedPaper};

const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org";
const FIELDS: &str = "title,authors,year,venue,externalIds,url,openAccessPdf";
const SEARCH_LIMIT: &str = "5";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<S2Author>,
    year: Option<i32>,
    venue: Option<String>,
    #[serde(default)]
    external_ids: Option<BTreeMap<String, serde_json::Value>>,
    url: Option<String>,
    open_access_pdf: Option<S2Pdf>,
}

#[derive(Debug, Deserialize)]
struct S2Author {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2Pdf {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2Search {
    #[serde(default)]
    data: Vec<S2Paper>,
}

fn to_paper(p: S2Paper) -> VerifiedPaper {
    // Identifier values are mostly strings, but CorpusId is a number.
    let external_ids = p
        .external_ids
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k, s)),
            serde_json::Value::Number(n) => Some((k, n.to_string())),
            _ => None,
        })
        .collect();
    VerifiedPaper {
        title: p.title.unwrap_or_default(),
        authors: p
            .authors
            .into_iter()
            .filter_map(|a| a.name)
            .map(Author::from)
            .collect(),
        year: p.year,
        venue: p.venue.filter(|v| !v.trim().is_empty()),
        external_ids,
        url: p.url,
        open_access_pdf_url: p.open_access_pdf.and_then(|pdf| pdf.url),
    }
}

pub struct SemanticScholarSource {
    remote: RemoteClient,
    api_key: Option<String>,
    base_url: String,
}

impl SemanticScholarSource {
    pub fn new(remote: RemoteClient, api_key: Option<String>) -> Self {
        Self {
            remote,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, c: &Client, url: impl IntoUrl) -> RequestBuilder {
        let req = c.get(url);
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }

    async fn by_id(&self, id: &str, ctx: &LookupContext) -> Result<Option<S2Paper>, SourceError> {
        let segments = ["graph", "v1", "paper"].into_iter().chain(id.split('/'));
        let url = endpoint(&self.base_url, segments)?;
        self.remote
            .get_json(self.name(), &ctx.cancel, |c| {
                self.request(c, url.clone()).query(&[("fields", FIELDS)])
            })
            .await
    }

    async fn search(&self, title: &str, ctx: &LookupContext) -> Result<Vec<S2Paper>, SourceError> {
        let url = format!("{}/graph/v1/paper/search", self.base_url);
        let found: Option<S2Search> = self
            .remote
            .get_json(self.name(), &ctx.cancel, |c| {
                self.request(c, &url).query(&[
                    ("query", title),
                    ("limit", SEARCH_LIMIT),
                    ("fields", FIELDS),
                ])
            })
            .await?;
        Ok(found.map(|s| s.data).unwrap_or_default())
    }
}

#[async_trait]
impl SourceAdapter for SemanticScholarSource {
    fn kind(&self) -> SourceKind {
        SourceKind::SemanticScholar
    }

    async fn try_verify(
        &self,
        reference: &Reference,
        ctx: &LookupContext,
    ) -> Result<Lookup, SourceError> {
        let direct = reference
            .cited_doi()
            .map(|doi| format!("DOI:{doi}"))
            .into_iter()
            .chain(reference.arxiv_id().map(|id| format!("ARXIV:{}", id.base())));
        for id in direct {
            if let Some(paper) = self.by_id(&id, ctx).await? {
                let paper = to_paper(paper);
                return Ok(Lookup::found(reference, paper, &ctx.options, None));
            }
        }

        let title = reference.title.trim();
        if title.is_empty() {
            return Ok(Lookup::not_found());
        }
        let candidates = self
            .search(title, ctx)
            .await?
            .into_iter()
            .map(to_paper)
            .collect();
        Ok(match best_candidate(reference, candidates, &ctx.options) {
            Some(paper) => Lookup::found(reference, paper, &ctx.options, None),
            None => Lookup::not_found(),
        })
    }
}
