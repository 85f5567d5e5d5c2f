//! # paper-analyzer
//!
//! Fetch an academic paper from its URL, read it, and have an LLM produce a
//! short summary plus the paper's main results table as CSV. Every artifact is
//! stored, so asking about the same paper twice costs one download and one
//! pair of LLM calls in total.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL
//!  │
//!  ├─ 1. Resolve   URL → (source, paper id), no I/O
//!  ├─ 2. Cache     all artifacts stored? → answer from disk
//!  ├─ 3. Download  metadata (E-utilities) + PDF streamed from PMC
//!  ├─ 4. Extract   per-page text via pdfium (spawn_blocking), or every page
//!  │               rendered to PNG in `AnalysisMode::PageImages`
//!  ├─ 5. Analyze   summary prompt, then table prompt; JSON replies validated
//!  │               and resubmitted on failure
//!  └─ 6. Persist   summary, then both halves of the table
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paper_analyzer::{AnalyzerConfig, PaperService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = AnalyzerConfig::builder().storage_root("data").build()?;
//!     let service = PaperService::from_config(&config)?;
//!     let analysis = service
//!         .get_analysis("https://pubmed.ncbi.nlm.nih.gov/31452104/")
//!         .await?;
//!     println!("{}", analysis.summary);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paper-analyzer` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! paper-analyzer = { version = "0.1", default-features = false }
//! ```
//!
//! ## Extending
//!
//! Each role sits behind a trait: [`ContentSource`], [`ArtifactStore`],
//! [`ContentExtractor`] and [`CompletionBackend`]. [`PaperService::new`] takes
//! any implementation, which is how the integration tests run the full
//! pipeline without network, pdfium or an API key.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod identifier;
pub mod paper;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod service;
pub mod source;
pub mod store;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{AnalyzerConfig, AnalyzerConfigBuilder};
pub use error::{Artifact, PaperError, StorageError, INTERNAL_ERROR_MESSAGE};
pub use identifier::IdentifierResolver;
pub use paper::{
    PageImage, PaperAnalysis, PaperContent, PaperIdentifier, PaperMetadata, PaperSource, TableInfo,
};
pub use pipeline::analyze::{AnalysisMode, ContentAnalyzer};
pub use pipeline::extract::{ContentExtractor, PdfiumExtractor};
pub use pipeline::llm::{
    AnalysisEngine, CompletionBackend, ProviderBackend, ResponseShape, RetryPolicy, Role,
    StructuredResponse, Turn, SUMMARY_SHAPE, TABLE_SHAPE,
};
pub use progress::{NoopObserver, PipelineObserver, ProgressObserver, Stage};
pub use service::{KeyedLocks, PaperService};
pub use source::{ContentSource, PubMedSource, SourceRegistry};
pub use store::{ArtifactStore, DocumentReader, DocumentSink, LocalStore};
pub use stream::{DocumentStream, CHUNK_SIZE};
