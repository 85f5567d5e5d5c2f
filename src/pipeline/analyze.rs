//! Content analysis: stored document → summary + main table.
//!
//! Stateless. Every call re-reads the document, re-extracts it and makes
//! exactly two engine calls (summary first, then table). [`AnalysisMode`]
//! picks whether the model sees the extracted page text or the rendered pages.

use super::extract::ContentExtractor;
use super::llm::{AnalysisEngine, StructuredResponse, SUMMARY_SHAPE, TABLE_SHAPE};
use crate::error::{PaperError, StorageError};
use crate::paper::{PaperAnalysis, PaperMetadata, TableInfo};
use crate::progress::{PipelineObserver, Stage};
use crate::prompts;
use crate::store::ArtifactStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tracing::info;

/// What the model is shown for each paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMode {
    /// Extracted text of every page, labelled `Page N:`.
    #[default]
    PageText,
    /// Every page rendered as an image, for vision-capable models.
    PageImages,
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisMode::PageText => f.write_str("text"),
            AnalysisMode::PageImages => f.write_str("images"),
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = PaperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "page-text" => Ok(AnalysisMode::PageText),
            "images" | "page-images" => Ok(AnalysisMode::PageImages),
            other => Err(PaperError::InvalidConfig(format!(
                "unknown analysis mode '{other}' (expected 'text' or 'images')"
            ))),
        }
    }
}

pub struct ContentAnalyzer {
    store: Arc<dyn ArtifactStore>,
    extractor: Arc<dyn ContentExtractor>,
    engine: AnalysisEngine,
    observer: Arc<dyn PipelineObserver>,
    mode: AnalysisMode,
}

impl ContentAnalyzer {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        extractor: Arc<dyn ContentExtractor>,
        engine: AnalysisEngine,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            store,
            extractor,
            engine,
            observer,
            mode: AnalysisMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub async fn analyze(&self, paper_id: &str) -> Result<PaperAnalysis, PaperError> {
        let metadata = self.store.read_metadata(paper_id).await?;

        let (summary, table) = match self.mode {
            AnalysisMode::PageText => self.analyze_text(paper_id, &metadata).await?,
            AnalysisMode::PageImages => self.analyze_images(paper_id, &metadata).await?,
        };

        Ok(PaperAnalysis {
            paper_id: paper_id.to_string(),
            metadata,
            summary,
            main_table: Some(table),
        })
    }

    async fn analyze_text(
        &self,
        paper_id: &str,
        metadata: &PaperMetadata,
    ) -> Result<(String, TableInfo), PaperError> {
        let start = self.stage_start(paper_id, Stage::Extract);
        let document = read_document(self.store.as_ref(), paper_id).await?;
        let content = self.extractor.extract(document, metadata).await?;
        self.stage_done(paper_id, Stage::Extract, start);

        let start = self.stage_start(paper_id, Stage::Summarize);
        let prompt = prompts::summary_prompt(&content);
        let mut reply = self.engine.complete(&prompt, &SUMMARY_SHAPE).await?;
        let summary = reply.take("summary");
        self.stage_done(paper_id, Stage::Summarize, start);

        let start = self.stage_start(paper_id, Stage::ExtractTable);
        let prompt = prompts::table_prompt(&content);
        let table = table_info(self.engine.complete(&prompt, &TABLE_SHAPE).await?);
        self.stage_done(paper_id, Stage::ExtractTable, start);

        info!(
            "Analysed paper {paper_id} with {}: {} pages of text, {} summary chars",
            self.engine.backend_name(),
            content.page_contents.len(),
            summary.len()
        );
        Ok((summary, table))
    }

    async fn analyze_images(
        &self,
        paper_id: &str,
        metadata: &PaperMetadata,
    ) -> Result<(String, TableInfo), PaperError> {
        let start = self.stage_start(paper_id, Stage::Extract);
        let document = read_document(self.store.as_ref(), paper_id).await?;
        let pages = self.extractor.render_pages(document).await?;
        self.stage_done(paper_id, Stage::Extract, start);
        let page_count = pages.len();

        let start = self.stage_start(paper_id, Stage::Summarize);
        let prompt = prompts::page_images_summary_prompt(metadata, page_count);
        let mut reply = self
            .engine
            .complete_with_images(&prompt, pages.clone(), &SUMMARY_SHAPE)
            .await?;
        let summary = reply.take("summary");
        self.stage_done(paper_id, Stage::Summarize, start);

        let start = self.stage_start(paper_id, Stage::ExtractTable);
        let prompt = prompts::page_images_table_prompt(metadata, page_count);
        let reply = self
            .engine
            .complete_with_images(&prompt, pages, &TABLE_SHAPE)
            .await?;
        let table = table_info(reply);
        self.stage_done(paper_id, Stage::ExtractTable, start);

        info!(
            "Analysed paper {paper_id} with {}: {page_count} page images, {} summary chars",
            self.engine.backend_name(),
            summary.len()
        );
        Ok((summary, table))
    }

    fn stage_start(&self, paper_id: &str, stage: Stage) -> Instant {
        info!("Paper {paper_id}: {stage}");
        self.observer.on_stage_start(paper_id, stage);
        Instant::now()
    }

    fn stage_done(&self, paper_id: &str, stage: Stage, start: Instant) {
        self.observer
            .on_stage_complete(paper_id, stage, start.elapsed().as_millis() as u64);
    }
}

fn table_info(mut reply: StructuredResponse) -> TableInfo {
    TableInfo {
        description: reply.take("table_description"),
        csv_content: reply.take("csv_content"),
        footnotes: reply.take("footnotes"),
    }
}

/// Read the whole stored document. pdfium needs the complete byte buffer.
pub(crate) async fn read_document(
    store: &dyn ArtifactStore,
    paper_id: &str,
) -> Result<Vec<u8>, PaperError> {
    let mut reader = store.open_document_reader(paper_id).await?;
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| StorageError::io("read document", paper_id, e))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_short_and_long_names() {
        assert_eq!("text".parse::<AnalysisMode>().unwrap(), AnalysisMode::PageText);
        assert_eq!("Images".parse::<AnalysisMode>().unwrap(), AnalysisMode::PageImages);
        assert_eq!("page-images".parse::<AnalysisMode>().unwrap(), AnalysisMode::PageImages);
        assert!(matches!(
            "pdf".parse::<AnalysisMode>(),
            Err(PaperError::InvalidConfig(_))
        ));
    }

    #[test]
    fn mode_display_round_trips() {
        for mode in [AnalysisMode::PageText, AnalysisMode::PageImages] {
            assert_eq!(mode.to_string().parse::<AnalysisMode>().unwrap(), mode);
        }
        assert_eq!(AnalysisMode::default(), AnalysisMode::PageText);
    }
}
