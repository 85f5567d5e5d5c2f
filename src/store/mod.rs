//! Durable per-paper artifacts.
//!
//! The store is the only shared state in the system. Every read and write is
//! keyed by the source-native paper id; callers never see paths.
//!
//! ```text
//! <root>/
//!   papers/<id>.pdf                 raw document
//!   metadata/<id>.json              PaperMetadata
//!   summaries/<id>.txt              summary text
//!   tables/<id>.csv                 main table, CSV half
//!   tables/<id>_table_meta.json     main table, description + footnotes half
//! ```

pub mod local;

use crate::error::{Artifact, StorageError};
use crate::paper::{PaperAnalysis, PaperMetadata, TableInfo};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

pub use local::LocalStore;

/// Readable handle over a stored document. Closed on drop.
pub type DocumentReader = Box<dyn AsyncRead + Send + Unpin>;

/// In-progress document write.
///
/// Bytes written through [`DocumentSink::writer`] are invisible to readers
/// until [`DocumentSink::commit`] succeeds. Dropping the sink without
/// committing discards everything written.
#[async_trait]
pub trait DocumentSink: Send {
    fn writer(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin);

    /// Flush and atomically publish the document.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn contains(&self, paper_id: &str, artifact: Artifact) -> bool;

    /// Whether the raw document is stored. This is the sole "downloaded" signal.
    async fn exists(&self, paper_id: &str) -> bool {
        self.contains(paper_id, Artifact::Document).await
    }

    /// Document and metadata are both stored.
    async fn is_download_complete(&self, paper_id: &str) -> bool {
        self.contains(paper_id, Artifact::Document).await
            && self.contains(paper_id, Artifact::Metadata).await
    }

    /// Every artifact of a finished analysis is stored.
    async fn is_analysis_complete(&self, paper_id: &str) -> bool {
        for artifact in Artifact::ALL {
            if !self.contains(paper_id, artifact).await {
                return false;
            }
        }
        true
    }

    /// Store `metadata` under `paper_id`, whatever id the metadata itself carries.
    async fn write_metadata(
        &self,
        paper_id: &str,
        metadata: &PaperMetadata,
    ) -> Result<(), StorageError>;

    async fn read_metadata(&self, paper_id: &str) -> Result<PaperMetadata, StorageError>;

    /// Delete one artifact. Removing an absent artifact is not an error.
    async fn remove(&self, paper_id: &str, artifact: Artifact) -> Result<(), StorageError>;

    async fn open_document_writer(
        &self,
        paper_id: &str,
    ) -> Result<Box<dyn DocumentSink>, StorageError>;

    async fn open_document_reader(&self, paper_id: &str) -> Result<DocumentReader, StorageError>;

    async fn write_summary(&self, paper_id: &str, summary: &str) -> Result<(), StorageError>;

    async fn read_summary(&self, paper_id: &str) -> Result<String, StorageError>;

    /// Persist both halves of the table. If the second half fails the first
    /// is removed, so a table is either fully stored or absent.
    async fn write_table(&self, paper_id: &str, table: &TableInfo) -> Result<(), StorageError>;

    async fn read_table(&self, paper_id: &str) -> Result<TableInfo, StorageError>;

    /// Compose metadata, summary and table into one view.
    async fn read_analysis(&self, paper_id: &str) -> Result<PaperAnalysis, StorageError> {
        let metadata = self.read_metadata(paper_id).await?;
        let summary = self.read_summary(paper_id).await?;
        let table = self.read_table(paper_id).await?;
        Ok(PaperAnalysis {
            paper_id: paper_id.to_string(),
            metadata,
            summary,
            main_table: Some(table),
        })
    }

    /// Metadata of every stored paper, sorted by paper id.
    async fn list_papers(&self) -> Result<Vec<PaperMetadata>, StorageError>;
}
