//! Google Scholar adapter, scraping the public results page.
//!
//! Scholar shortens long author lists and venue names with an ellipsis, so
//! matches from here only compare the first author.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{Lookup, LookupContext, RemoteClient, SourceAdapter, SourceError, SourceKind};
use crate::diff::{AuthorCoverage, best_candidate};
use crate::{Author, Reference, VerifiedPaper};

const DEFAULT_BASE_URL: &str = "https://scholar.google.com";

static RESULT: Lazy<Selector> = Lazy::new(|| Selector::parse("div.gs_ri").unwrap());
static RESULT_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h3.gs_rt").unwrap());
static RESULT_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("h3.gs_rt a").unwrap());
static RESULT_BYLINE: Lazy<Selector> = Lazy::new(|| Selector::parse("div.gs_a").unwrap());

static KIND_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\[[A-Z]+\]\s*)+").unwrap());
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").unwrap());

const BLOCK_MARKERS: &[&str] = &["gs_captcha", "recaptcha", "unusual traffic"];

#[derive(Debug, Clone, PartialEq)]
struct ScholarHit {
    title: String,
    authors: Vec<String>,
    venue: Option<String>,
    year: Option<i32>,
    link: Option<String>,
}

fn is_truncated(s: &str) -> bool {
    let s = s.trim_end();
    s.ends_with('…') || s.ends_with("...")
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a byline such as `A Vaswani, N Shazeer… - Advances in neural …, 2017 - neurips.cc`.
fn parse_byline(byline: &str) -> (Vec<String>, Option<String>, Option<i32>) {
    let mut parts = byline.split(" - ");
    let authors = parts
        .next()
        .unwrap_or_default()
        .split(',')
        .map(|a| a.trim().trim_end_matches('…').trim_end_matches("...").trim())
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();

    let publication = parts.next().unwrap_or_default().trim();
    let year = YEAR
        .captures_iter(publication)
        .last()
        .and_then(|c| c[1].parse().ok());
    let venue = YEAR
        .replace_all(publication, "")
        .trim()
        .trim_end_matches(',')
        .trim()
        .to_string();
    let venue = (!venue.is_empty() && !is_truncated(&venue)).then_some(venue);
    (authors, venue, year)
}

fn parse_results(html: &str) -> Result<Vec<ScholarHit>, SourceError> {
    if BLOCK_MARKERS.iter().any(|m| html.contains(m)) {
        return Err(SourceError::RateLimited { retry_after: None });
    }
    let doc = Html::parse_document(html);
    let hits = doc
        .select(&RESULT)
        .filter_map(|result| {
            let title = result.select(&RESULT_TITLE).next().map(element_text)?;
            let title = KIND_MARKER.replace(&title, "").trim().to_string();
            if title.is_empty() {
                return None;
            }
            let link = result
                .select(&RESULT_LINK)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string);
            let (authors, venue, year) = result
                .select(&RESULT_BYLINE)
                .next()
                .map(|b| parse_byline(&element_text(b)))
                .unwrap_or_default();
            Some(ScholarHit {
                title,
                authors,
                venue,
                year,
                link,
            })
        })
        .collect();
    Ok(hits)
}

fn to_paper(hit: ScholarHit) -> VerifiedPaper {
    VerifiedPaper {
        title: hit.title,
        authors: hit.authors.into_iter().map(Author::from).collect(),
        year: hit.year,
        venue: hit.venue,
        url: hit.link,
        ..Default::default()
    }
}

pub struct ScholarSource {
    remote: RemoteClient,
    base_url: String,
}

impl ScholarSource {
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
}

#[async_trait]
impl SourceAdapter for ScholarSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Scholar
    }

    async fn try_verify(
        &self,
        reference: &Reference,
        ctx: &LookupContext,
    ) -> Result<Lookup, SourceError> {
        let title = reference.title.trim();
        if title.is_empty() {
            return Ok(Lookup::not_found());
        }
        let url = format!("{}/scholar", self.base_url);
        let query = format!("\"{title}\"");
        let Some(html) = self
            .remote
            .get_text(self.name(), &ctx.cancel, |c| {
                c.get(&url).query(&[("q", query.as_str()), ("hl", "en")])
            })
            .await?
        else {
            return Ok(Lookup::not_found());
        };

        let candidates = parse_results(&html)?.into_iter().map(to_paper).collect();
        Ok(match best_candidate(reference, candidates, &ctx.options) {
            Some(paper) => Lookup::found_with_coverage(
                reference,
                paper,
                &ctx.options,
                None,
                AuthorCoverage::Truncated,
            ),
            None => Lookup::not_found(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiscrepancyKind;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS: &str = r#"<html><body><div id="gs_res_ccl_mid">
      <div class="gs_r gs_or gs_scl"><div class="gs_ri">
        <h3 class="gs_rt"><span class="gs_ctg2">[PDF]</span>
          <a href="https://proceedings.neurips.cc/paper/7181-attention-is-all-you-need.pdf">Attention is all you need</a></h3>
        <div class="gs_a">A Vaswani, N Shazeer, N Parmar… - Advances in neural …, 2017 - proceedings.neurips.cc</div>
      </div></div>
      <div class="gs_r gs_or gs_scl"><div class="gs_ri">
        <h3 class="gs_rt"><a href="https://example.org/other">Attention mechanisms in computer vision: A survey</a></h3>
        <div class="gs_a">MH Guo, TX Xu, JJ Liu - Computational visual media, 2022 - Springer</div>
      </div></div>
    </div></body></html>"#;

    fn source(server: &MockServer) -> ScholarSource {
        ScholarSource::new(RemoteClient::new(reqwest::Client::new(), None, 0))
            .with_base_url(server.uri())
    }

    #[test]
    fn parses_results_page() {
        let hits = parse_results(RESULTS).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Attention is all you need");
        assert_eq!(hits[0].authors, vec!["A Vaswani", "N Shazeer", "N Parmar"]);
        assert_eq!(hits[0].year, Some(2017));
        assert_eq!(hits[0].venue, None);
        assert_eq!(hits[1].venue.as_deref(), Some("Computational visual media"));
    }

    #[test]
    fn captcha_page_is_an_error() {
        let page = r#"<html><body><div id="gs_captcha_ccl">Please show you're not a robot</div></body></html>"#;
        assert!(matches!(
            parse_results(page),
            Err(SourceError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn truncated_author_list_only_checks_first_author() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/scholar"))
            .and(query_param("hl", "en"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS))
            .mount(&server)
            .await;

        let reference = Reference {
            title: "Attention Is All You Need".into(),
            authors: vec![
                "Ashish Vaswani".into(),
                "Noam Shazeer".into(),
                "Niki Parmar".into(),
                "Jakob Uszkoreit".into(),
                "Llion Jones".into(),
            ],
            year: Some(2017),
            ..Default::default()
        };
        let lookup = source(&server)
            .try_verify(&reference, &LookupContext::default())
            .await
            .unwrap();
        assert!(lookup.paper.is_some());
        assert!(lookup.discrepancies.is_empty(), "{:?}", lookup.discrepancies);
        assert_eq!(
            lookup.canonical_url.as_deref(),
            Some("https://proceedings.neurips.cc/paper/7181-attention-is-all-you-need.pdf")
        );
    }

    #[tokio::test]
    async fn wrong_first_author_is_flagged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS))
            .mount(&server)
            .await;

        let reference = Reference {
            title: "Attention Is All You Need".into(),
            authors: vec!["Yoshua Bengio".into()],
            ..Default::default()
        };
        let lookup = source(&server)
            .try_verify(&reference, &LookupContext::default())
            .await
            .unwrap();
        assert_eq!(lookup.discrepancies.len(), 1);
        assert_eq!(lookup.discrepancies[0].kind, DiscrepancyKind::Author);
    }
}
