//! OpenAlex works API adapter.

use async_trait::async_trait;
use serde::Deserialize;

use super::http::endpoint;
use super::{Lookup, LookupContext, RemoteClient, SourceAdapter, SourceError, SourceKind};
use crate::diff::best_candidate;
use crate::matching::normalize_doi;
use crate::{Author, Reference, VerifiedPaper};

const DEFAULT_BASE_URL: &str = "https://api.openalex.org";
const PER_PAGE: &str = "5";

#[derive(Debug, Deserialize)]
struct OaWork {
    id: Option<String>,
    title: Option<String>,
    display_name: Option<String>,
    publication_year: Option<i32>,
    doi: Option<String>,
    #[serde(default)]
    authorships: Vec<OaAuthorship>,
    primary_location: Option<OaLocation>,
    open_access: Option<OaOpenAccess>,
}

#[derive(Debug, Deserialize)]
struct OaAuthorship {
    author: Option<OaAuthor>,
    raw_author_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaAuthor {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaLocation {
    source: Option<OaSource>,
    landing_page_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaSource {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaOpenAccess {
    oa_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaResults {
    #[serde(default)]
    results: Vec<OaWork>,
}

fn to_paper(work: OaWork) -> VerifiedPaper {
    let (venue, landing) = match work.primary_location {
        Some(loc) => (loc.source.and_then(|s| s.display_name), loc.landing_page_url),
        None => (None, None),
    };
    let mut paper = VerifiedPaper {
        title: work.display_name.or(work.title).unwrap_or_default(),
        authors: work
            .authorships
            .into_iter()
            .filter_map(|a| a.author.and_then(|a| a.display_name).or(a.raw_author_name))
            .map(Author::from)
            .collect(),
        year: work.publication_year,
        venue,
        url: landing.or_else(|| work.id.clone()),
        open_access_pdf_url: work.open_access.and_then(|oa| oa.oa_url),
        ..Default::default()
    };
    if let Some(doi) = work.doi.as_deref().map(normalize_doi).filter(|d| !d.is_empty()) {
        paper.external_ids.insert("DOI".into(), doi);
    }
    if let Some(id) = work.id {
        paper.external_ids.insert("OpenAlex".into(), id);
    }
    paper
}

pub struct OpenAlexSource {
    remote: RemoteClient,
    api_key: Option<String>,
    mailto: Option<String>,
    base_url: String,
}

impl OpenAlexSource {
    pub fn new(remote: RemoteClient, api_key: Option<String>, mailto: Option<String>) -> Self {
        Self {
            remote,
            api_key,
            mailto,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn credentials(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }
        params
    }

    async fn by_doi(&self, doi: &str, ctx: &LookupContext) -> Result<Option<OaWork>, SourceError> {
        let key = format!("doi:{doi}");
        let url = endpoint(&self.base_url, ["works"].into_iter().chain(key.split('/')))?;
        let params = self.credentials();
        self.remote
            .get_json(self.name(), &ctx.cancel, |c| c.get(url.clone()).query(&params))
            .await
    }

    async fn search(&self, title: &str, ctx: &LookupContext) -> Result<Vec<OaWork>, SourceError> {
        let url = format!("{}/works", self.base_url);
        let mut params = self.credentials();
        params.push(("search", title.to_string()));
        params.push(("per-page", PER_PAGE.to_string()));
        let found: Option<OaResults> = self
            .remote
            .get_json(self.name(), &ctx.cancel, |c| c.get(&url).query(&params))
            .await?;
        Ok(found.map(|r| r.results).unwrap_or_default())
    }
}

#[async_trait]
impl SourceAdapter for OpenAlexSource {
    fn kind(&self) -> SourceKind {
        SourceKind::OpenAlex
    }

    async fn try_verify(
        &self,
        reference: &Reference,
        ctx: &LookupContext,
    ) -> Result<Lookup, SourceError> {
        if let Some(doi) = reference.cited_doi() {
            if let Some(work) = self.by_doi(&doi, ctx).await? {
                let paper = to_paper(work);
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

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ADAM: &str = r#"{
        "id": "https://openalex.org/W1522301498",
        "doi": "https://doi.org/10.48550/arxiv.1412.6980",
        "title": "Adam: A Method for Stochastic Optimization",
        "display_name": "Adam: A Method for Stochastic Optimization",
        "publication_year": 2014,
        "authorships": [
            {"author": {"display_name": "Diederik P. Kingma"}},
            {"author": {"display_name": "Jimmy Ba"}}
        ],
        "primary_location": {
            "landing_page_url": "https://arxiv.org/abs/1412.6980",
            "source": {"display_name": "arXiv (Cornell University)"}
        },
        "open_access": {"oa_url": "https://arxiv.org/pdf/1412.6980"}
    }"#;

    fn source(server: &MockServer) -> OpenAlexSource {
        OpenAlexSource::new(
            RemoteClient::new(reqwest::Client::new(), None, 0),
            Some("k3y".into()),
            Some("dev@example.org".into()),
        )
        .with_base_url(server.uri())
    }

    #[test]
    fn strips_doi_url_prefix() {
        let paper = to_paper(serde_json::from_str(ADAM).unwrap());
        assert_eq!(paper.doi(), Some("10.48550/arxiv.1412.6980"));
        assert_eq!(paper.author_names(), vec!["Diederik P. Kingma", "Jimmy Ba"]);
        assert_eq!(paper.url.as_deref(), Some("https://arxiv.org/abs/1412.6980"));
    }

    #[tokio::test]
    async fn doi_lookup_passes_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/doi:10.48550/arxiv.1412.6980"))
            .and(query_param("api_key", "k3y"))
            .and(query_param("mailto", "dev@example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ADAM))
            .expect(1)
            .mount(&server)
            .await;

        let reference = Reference {
            title: "Adam: A Method for Stochastic Optimization".into(),
            authors: vec!["D. P. Kingma".into(), "J. Ba".into()],
            year: Some(2014),
            doi: Some("10.48550/arXiv.1412.6980".into()),
            ..Default::default()
        };
        let lookup = source(&server)
            .try_verify(&reference, &LookupContext::default())
            .await
            .unwrap();
        assert!(lookup.discrepancies.is_empty(), "{:?}", lookup.discrepancies);
        assert_eq!(
            lookup.canonical_url.as_deref(),
            Some("https://arxiv.org/abs/1412.6980")
        );
    }

    #[tokio::test]
    async fn search_reports_author_mismatch() {
        let server = MockServer::start().await;
        let body = format!(r#"{{"meta": {{"count": 1}}, "results": [{ADAM}]}}"#);
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("per-page", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let reference = Reference {
            title: "Adam: a method for stochastic optimization".into(),
            authors: vec!["Geoffrey Hinton".into()],
            year: Some(2014),
            ..Default::default()
        };
        let lookup = source(&server)
            .try_verify(&reference, &LookupContext::default())
            .await
            .unwrap();
        assert_eq!(lookup.discrepancies.len(), 1);
        assert_eq!(lookup.discrepancies[0].kind, crate::DiscrepancyKind::Author);
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let reference = Reference {
            title: "Adam".into(),
            ..Default::default()
        };
        let err = source(&server)
            .try_verify(&reference, &LookupContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 500 }));
    }
}
