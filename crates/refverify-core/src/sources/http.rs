//! Shared HTTP plumbing for the remote adapters.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::SourceError;
use crate::rate_limit::{RateLimiter, send_with_retry};

const USER_AGENT: &str = concat!(
    "refverify/",
    env!("CARGO_PKG_VERSION"),
    " (bibliographic reference checker)"
);

/// Build the HTTP client shared by the remote adapters.
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

/// `base` with `segments` appended to its path, each one percent-encoded.
///
/// Identifiers such as DOIs may contain `#`, `?` or `<>`; passing them as
/// segments keeps them in the path instead of turning into a fragment or query.
pub fn endpoint<'a>(
    base: &str,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, SourceError> {
    let mut url =
        Url::parse(base).map_err(|e| SourceError::Parse(format!("invalid base URL {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| SourceError::Parse(format!("base URL {base} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// An HTTP client bound to one source's rate gate and retry budget.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: Client,
    limiter: Option<Arc<RateLimiter>>,
    max_retries: u32,
}

impl RemoteClient {
    pub fn new(client: Client, limiter: Option<Arc<RateLimiter>>, max_retries: u32) -> Self {
        Self {
            client,
            limiter,
            max_retries,
        }
    }

    /// Send through the rate gate, retrying 429s. `Ok(None)` on 404; any
    /// other non-success status is an error.
    async fn send(
        &self,
        source: &str,
        cancel: &CancellationToken,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Option<reqwest::Response>, SourceError> {
        let resp = send_with_retry(
            source,
            self.limiter.as_deref(),
            self.max_retries,
            cancel,
            || build(&self.client),
        )
        .await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
            });
        }
        Ok(Some(resp))
    }

    async fn body(
        resp: reqwest::Response,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, SourceError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(SourceError::Cancelled),
            body = resp.bytes() => Ok(body?.to_vec()),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source: &str,
        cancel: &CancellationToken,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Option<T>, SourceError> {
        let Some(resp) = self.send(source, cancel, build).await? else {
            return Ok(None);
        };
        let body = Self::body(resp, cancel).await?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    pub async fn get_text(
        &self,
        source: &str,
        cancel: &CancellationToken,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Option<String>, SourceError> {
        let Some(resp) = self.send(source, cancel, build).await? else {
            return Ok(None);
        };
        let body = Self::body(resp, cancel).await?;
        Ok(Some(String::from_utf8_lossy(&body).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_encodes_reserved_characters() {
        let url = endpoint(
            "https://api.crossref.org",
            ["works"].into_iter().chain("10.1002/(sici)1097#4571?x<1>".split('/')),
        )
        .unwrap();
        assert_eq!(url.path(), "/works/10.1002/(sici)1097%234571%3Fx%3C1%3E");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let url = endpoint("http://127.0.0.1:8080/api/", ["paper", "DOI:10.1000", "xyz"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/paper/DOI:10.1000/xyz");
    }
}
