//! Content sources: where papers and their metadata come from.

pub mod pubmed;

use crate::error::PaperError;
use crate::paper::{PaperIdentifier, PaperMetadata, PaperSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWrite;

pub use pubmed::PubMedSource;

/// One bibliographic source.
#[async_trait]
pub trait ContentSource: Send + Sync {
    fn source(&self) -> PaperSource;

    async fn fetch_metadata(&self, id: &PaperIdentifier) -> Result<PaperMetadata, PaperError>;

    /// Stream the raw document into `sink` chunk by chunk and return the
    /// number of bytes written. The whole document is never held in memory.
    async fn stream_document(
        &self,
        id: &PaperIdentifier,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, PaperError>;
}

/// Maps each enabled [`PaperSource`] to its client.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<PaperSource, Arc<dyn ContentSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under the kind it reports, replacing any previous one.
    pub fn register(&mut self, source: Arc<dyn ContentSource>) {
        self.sources.insert(source.source(), source);
    }

    pub fn with(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.register(source);
        self
    }

    pub fn get(&self, kind: PaperSource) -> Result<Arc<dyn ContentSource>, PaperError> {
        self.sources
            .get(&kind)
            .cloned()
            .ok_or_else(|| PaperError::Internal(format!("no content source registered for {kind}")))
    }
}
