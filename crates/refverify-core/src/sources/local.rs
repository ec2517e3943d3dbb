//! Offline index adapter.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use refverify_index::{IndexRecord, LocalIndex};

use super::{Lookup, LookupContext, SourceAdapter, SourceError, SourceKind};
use crate::{Author, Reference, VerifiedPaper};

/// Indexes older than this many days are reported as stale.
pub const STALE_AFTER_DAYS: u64 = 30;

pub struct LocalIndexSource {
    index: Arc<Mutex<LocalIndex>>,
}

impl LocalIndexSource {
    pub fn new(index: Arc<Mutex<LocalIndex>>) -> Self {
        Self { index }
    }
}

fn to_paper(record: IndexRecord) -> VerifiedPaper {
    let mut paper = VerifiedPaper {
        title: record.title,
        authors: record.authors.into_iter().map(Author::from).collect(),
        year: record.year,
        venue: record.venue,
        url: record.url,
        ..Default::default()
    };
    if let Some(doi) = record.doi {
        paper.external_ids.insert("DOI".into(), doi);
    }
    if let Some(id) = record.arxiv_id {
        paper.external_ids.insert("ArXiv".into(), id);
    }
    paper
}

fn canonical_url(paper: &VerifiedPaper) -> Option<String> {
    paper
        .url
        .clone()
        .or_else(|| paper.doi().map(|d| format!("https://doi.org/{d}")))
        .or_else(|| paper.arxiv_id().map(|id| format!("https://arxiv.org/abs/{id}")))
}

#[async_trait]
impl SourceAdapter for LocalIndexSource {
    fn kind(&self) -> SourceKind {
        SourceKind::LocalIndex
    }

    async fn try_verify(
        &self,
        reference: &Reference,
        ctx: &LookupContext,
    ) -> Result<Lookup, SourceError> {
        let index = Arc::clone(&self.index);
        let doi = reference.cited_doi();
        let arxiv = reference.arxiv_id().map(|id| id.id);
        let title = reference.title.clone();

        let record = tokio::task::spawn_blocking(move || -> Result<_, SourceError> {
            let index = index
                .lock()
                .map_err(|_| SourceError::Index("index lock poisoned".into()))?;
            if let Some(doi) = &doi {
                if let Some(record) = index.lookup_doi(doi)? {
                    return Ok(Some(record));
                }
            }
            if let Some(id) = &arxiv {
                if let Some(record) = index.lookup_arxiv(id)? {
                    return Ok(Some(record));
                }
            }
            if title.trim().is_empty() {
                return Ok(None);
            }
            Ok(index.query(&title)?.map(|hit| hit.record))
        })
        .await
        .map_err(|e| SourceError::Index(format!("lookup task failed: {e}")))??;

        Ok(match record {
            Some(record) => {
                let paper = to_paper(record);
                let url = canonical_url(&paper);
                Lookup::found(reference, paper, &ctx.options, url)
            }
            None => Lookup::not_found(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiscrepancyKind;

    fn source() -> LocalIndexSource {
        let mut index = LocalIndex::in_memory().unwrap();
        index
            .insert(&IndexRecord {
                title: "Deep Residual Learning for Image Recognition".into(),
                authors: vec!["Kaiming He".into(), "Xiangyu Zhang".into()],
                year: Some(2016),
                venue: Some("CVPR".into()),
                doi: Some("10.1109/CVPR.2016.90".into()),
                arxiv_id: Some("1512.03385".into()),
                url: None,
            })
            .unwrap();
        LocalIndexSource::new(Arc::new(Mutex::new(index)))
    }

    #[tokio::test]
    async fn finds_by_title_and_compares() {
        let reference = Reference {
            title: "Deep residual learning for image recognition".into(),
            authors: vec!["K. He".into(), "X. Zhang".into()],
            year: Some(2015),
            ..Default::default()
        };
        let lookup = source()
            .try_verify(&reference, &LookupContext::default())
            .await
            .unwrap();
        assert!(lookup.is_informative());
        assert_eq!(lookup.discrepancies.len(), 1);
        assert_eq!(lookup.discrepancies[0].kind, DiscrepancyKind::Year);
        assert_eq!(
            lookup.canonical_url.as_deref(),
            Some("https://doi.org/10.1109/cvpr.2016.90")
        );
    }

    #[tokio::test]
    async fn finds_by_doi_despite_different_title() {
        let reference = Reference {
            title: "ResNet".into(),
            doi: Some("10.1109/cvpr.2016.90".into()),
            ..Default::default()
        };
        let lookup = source()
            .try_verify(&reference, &LookupContext::default())
            .await
            .unwrap();
        assert!(lookup.paper.is_some());
        assert!(lookup
            .discrepancies
            .iter()
            .any(|d| d.kind == DiscrepancyKind::Title));
    }

    #[tokio::test]
    async fn unknown_title_is_not_found() {
        let reference = Reference {
            title: "A Completely Unrelated Paper About Gardening".into(),
            ..Default::default()
        };
        let lookup = source()
            .try_verify(&reference, &LookupContext::default())
            .await
            .unwrap();
        assert_eq!(lookup, Lookup::not_found());
    }
}
