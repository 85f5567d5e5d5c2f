//! Filesystem-backed [`ArtifactStore`].
//!
//! Every single-file write goes to a hidden sibling first and is renamed into
//! place, so readers never observe a half-written artifact. Existence checks
//! only count regular files; hidden temp files are never listed.

use super::{ArtifactStore, DocumentReader, DocumentSink};
use crate::error::{Artifact, StorageError};
use crate::paper::{PaperMetadata, TableInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

const PAPERS_DIR: &str = "papers";
const METADATA_DIR: &str = "metadata";
const SUMMARIES_DIR: &str = "summaries";
const TABLES_DIR: &str = "tables";

/// On-disk shape of the non-CSV half of a table.
#[derive(Debug, Serialize, Deserialize)]
struct TableMeta {
    description: String,
    footnotes: String,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at `root`, creating the directory layout if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        for dir in [PAPERS_DIR, METADATA_DIR, SUMMARIES_DIR, TABLES_DIR] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path)
                .map_err(|e| StorageError::io("create storage directory", &path, e))?;
        }
        debug!("Artifact store ready at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `artifact` of `paper_id` lives on disk.
    pub fn artifact_path(&self, paper_id: &str, artifact: Artifact) -> PathBuf {
        match artifact {
            Artifact::Document => self.root.join(PAPERS_DIR).join(format!("{paper_id}.pdf")),
            Artifact::Metadata => self.root.join(METADATA_DIR).join(format!("{paper_id}.json")),
            Artifact::Summary => self.root.join(SUMMARIES_DIR).join(format!("{paper_id}.txt")),
            Artifact::TableContent => self.root.join(TABLES_DIR).join(format!("{paper_id}.csv")),
            Artifact::TableDescription => self
                .root
                .join(TABLES_DIR)
                .join(format!("{paper_id}_table_meta.json")),
        }
    }

    async fn read_text(&self, paper_id: &str, artifact: Artifact) -> Result<String, StorageError> {
        check_paper_id(paper_id)?;
        let path = self.artifact_path(paper_id, artifact);
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound {
                    artifact,
                    paper_id: paper_id.to_string(),
                }
            } else {
                StorageError::io(format!("read {}", artifact.label()), &path, e)
            }
        })
    }
}

/// Ids become file names; anything that could escape the layout is refused.
fn check_paper_id(paper_id: &str) -> Result<(), StorageError> {
    let valid = !paper_id.is_empty()
        && !paper_id.starts_with('.')
        && paper_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::io(
            "validate paper id",
            paper_id,
            io::Error::new(io::ErrorKind::InvalidInput, "paper id is not a safe file name"),
        ))
    }
}

/// Write `contents` to a hidden sibling of `path`, then rename it into place.
async fn write_atomic(path: &Path, contents: &[u8], context: &str) -> Result<(), StorageError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|e| StorageError::io(context, &tmp_path, e))?;

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(StorageError::io(context, path, e));
    }
    Ok(())
}

/// Document write in progress: a hidden temp file in `papers/`.
struct LocalDocumentSink {
    file: tokio::fs::File,
    tmp_path: TempPath,
    final_path: PathBuf,
}

#[async_trait]
impl DocumentSink for LocalDocumentSink {
    fn writer(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        &mut self.file
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let LocalDocumentSink {
            mut file,
            tmp_path,
            final_path,
        } = *self;

        file.flush()
            .await
            .map_err(|e| StorageError::io("flush document", &final_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io("sync document", &final_path, e))?;
        drop(file);

        tmp_path
            .persist(&final_path)
            .map_err(|e| StorageError::io("publish document", &final_path, e.error))?;
        debug!("Document stored at {}", final_path.display());
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn contains(&self, paper_id: &str, artifact: Artifact) -> bool {
        if check_paper_id(paper_id).is_err() {
            return false;
        }
        tokio::fs::metadata(self.artifact_path(paper_id, artifact))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn write_metadata(
        &self,
        paper_id: &str,
        metadata: &PaperMetadata,
    ) -> Result<(), StorageError> {
        check_paper_id(paper_id)?;
        let json = serde_json::to_vec_pretty(metadata).map_err(|e| StorageError::Corrupt {
            context: "metadata".into(),
            detail: e.to_string(),
        })?;
        let path = self.artifact_path(paper_id, Artifact::Metadata);
        write_atomic(&path, &json, "write metadata").await
    }

    async fn read_metadata(&self, paper_id: &str) -> Result<PaperMetadata, StorageError> {
        let raw = self.read_text(paper_id, Artifact::Metadata).await?;
        serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
            context: format!("metadata for paper '{paper_id}'"),
            detail: e.to_string(),
        })
    }

    async fn remove(&self, paper_id: &str, artifact: Artifact) -> Result<(), StorageError> {
        check_paper_id(paper_id)?;
        let path = self.artifact_path(paper_id, artifact);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(format!("remove {}", artifact.label()), &path, e)),
        }
    }

    async fn open_document_writer(
        &self,
        paper_id: &str,
    ) -> Result<Box<dyn DocumentSink>, StorageError> {
        check_paper_id(paper_id)?;
        let dir = self.root.join(PAPERS_DIR);
        let named = tempfile::Builder::new()
            .prefix(&format!(".{paper_id}."))
            .suffix(".part")
            .tempfile_in(&dir)
            .map_err(|e| StorageError::io("create document temp file", &dir, e))?;
        let (file, tmp_path) = named.into_parts();

        Ok(Box::new(LocalDocumentSink {
            file: tokio::fs::File::from_std(file),
            tmp_path,
            final_path: self.artifact_path(paper_id, Artifact::Document),
        }))
    }

    async fn open_document_reader(&self, paper_id: &str) -> Result<DocumentReader, StorageError> {
        check_paper_id(paper_id)?;
        let path = self.artifact_path(paper_id, Artifact::Document);
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound {
                artifact: Artifact::Document,
                paper_id: paper_id.to_string(),
            }),
            Err(e) => Err(StorageError::io("open document", &path, e)),
        }
    }

    async fn write_summary(&self, paper_id: &str, summary: &str) -> Result<(), StorageError> {
        check_paper_id(paper_id)?;
        let path = self.artifact_path(paper_id, Artifact::Summary);
        write_atomic(&path, summary.as_bytes(), "write summary").await
    }

    async fn read_summary(&self, paper_id: &str) -> Result<String, StorageError> {
        self.read_text(paper_id, Artifact::Summary).await
    }

    async fn write_table(&self, paper_id: &str, table: &TableInfo) -> Result<(), StorageError> {
        check_paper_id(paper_id)?;
        let csv_path = self.artifact_path(paper_id, Artifact::TableContent);
        let meta_path = self.artifact_path(paper_id, Artifact::TableDescription);

        write_atomic(&csv_path, table.csv_content.as_bytes(), "write table content").await?;

        let meta = TableMeta {
            description: table.description.clone(),
            footnotes: table.footnotes.clone(),
        };
        let written = match serde_json::to_vec_pretty(&meta) {
            Ok(json) => write_atomic(&meta_path, &json, "write table description").await,
            Err(e) => Err(StorageError::Corrupt {
                context: "table description".into(),
                detail: e.to_string(),
            }),
        };

        if let Err(e) = written {
            warn!("Table description for paper {paper_id} failed, removing CSV: {e}");
            if let Err(rm) = tokio::fs::remove_file(&csv_path).await {
                warn!("Could not remove {}: {rm}", csv_path.display());
            }
            return Err(e);
        }
        Ok(())
    }

    async fn read_table(&self, paper_id: &str) -> Result<TableInfo, StorageError> {
        let csv_content = self.read_text(paper_id, Artifact::TableContent).await?;
        let raw_meta = self.read_text(paper_id, Artifact::TableDescription).await?;
        let meta: TableMeta = serde_json::from_str(&raw_meta).map_err(|e| StorageError::Corrupt {
            context: format!("table description for paper '{paper_id}'"),
            detail: e.to_string(),
        })?;
        Ok(TableInfo {
            description: meta.description,
            csv_content,
            footnotes: meta.footnotes,
        })
    }

    async fn list_papers(&self) -> Result<Vec<PaperMetadata>, StorageError> {
        let dir = self.root.join(METADATA_DIR);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StorageError::io("list metadata", &dir, e))?;

        let mut papers = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io("list metadata", &dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(paper_id) = name.strip_suffix(".json") else {
                continue;
            };
            if paper_id.starts_with('.') {
                continue;
            }
            match self.read_metadata(paper_id).await {
                Ok(meta) => papers.push(meta),
                Err(e) => warn!("Skipping unreadable metadata {name}: {e}"),
            }
        }

        papers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(papers)
    }
}
