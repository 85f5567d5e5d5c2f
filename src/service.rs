//! Request-level use cases over the cache-first pipeline.
//!
//! ```text
//! URL ─▶ resolve ─▶ store has it? ──yes──▶ read back
//!                        │ no
//!                        ▼
//!              per-paper lock, re-check
//!                        ▼
//!       download (metadata, then streamed PDF)
//!                        ▼
//!        analyze (extract, summary, table)
//!                        ▼
//!          persist (summary, then table)
//! ```
//!
//! Concurrent requests for the same paper share one download and one analysis:
//! later callers wait on the paper's lock and then find the artifacts stored.

use crate::config::AnalyzerConfig;
use crate::error::{Artifact, PaperError, StorageError};
use crate::identifier::IdentifierResolver;
use crate::paper::{PageImage, PaperAnalysis, PaperIdentifier, PaperMetadata, PaperSource};
use crate::pipeline::analyze::{read_document, AnalysisMode, ContentAnalyzer};
use crate::pipeline::extract::{ContentExtractor, PdfiumExtractor};
use crate::pipeline::llm::{AnalysisEngine, CompletionBackend, ProviderBackend, RetryPolicy, Turn};
use crate::progress::{NoopObserver, PipelineObserver, ProgressObserver, Stage};
use crate::source::{PubMedSource, SourceRegistry};
use crate::store::{ArtifactStore, LocalStore};
use crate::stream::{document_stream, DocumentStream};
use async_trait::async_trait;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

// ── Single-flight locks ──────────────────────────────────────────────────

/// A lock and the number of tasks holding or awaiting it.
struct LockEntry {
    lock: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

type LockTable = Arc<Mutex<HashMap<String, LockEntry>>>;

/// One async mutex per key, created on demand and dropped once no task holds
/// or waits for it.
#[derive(Default, Clone)]
pub struct KeyedLocks {
    table: LockTable,
}

/// Held while a key is locked, or while waiting for it. Dropping it in either
/// state releases the caller's slot in the table.
pub struct KeyedGuard {
    key: String,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = table.entry(key.to_string()).or_insert_with(|| LockEntry {
                lock: Arc::default(),
                users: 0,
            });
            entry.users += 1;
            Arc::clone(&entry.lock)
        };
        // Registered before the await so a cancelled waiter still cleans up.
        let mut keyed = KeyedGuard {
            key: key.to_string(),
            table: Arc::clone(&self.table),
            guard: None,
        };
        keyed.guard = Some(lock.lock_owned().await);
        keyed
    }

    /// Number of keys currently held or awaited.
    pub fn active(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = match table.get_mut(&self.key) {
            Some(entry) => {
                entry.users = entry.users.saturating_sub(1);
                entry.users == 0
            }
            None => false,
        };
        if idle {
            table.remove(&self.key);
        }
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Pick the LLM provider.
///
/// 1. `config.provider` (pre-built)
/// 2. `config.provider_name` + `config.model`
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
/// 4. `OPENAI_API_KEY` → OpenAI
/// 5. [`ProviderFactory::from_env`] auto-detection
pub fn resolve_provider(
    config: &AnalyzerConfig,
) -> Result<(Arc<dyn LLMProvider>, String), PaperError> {
    if let Some(ref provider) = config.provider {
        return Ok((Arc::clone(provider), "custom".to_string()));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (provider, _) =
        ProviderFactory::from_env().map_err(|e| PaperError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider auto-detected: {e}\n\
Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider/--model."
            ),
        })?;
    Ok((provider, "auto".to_string()))
}

fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<(Arc<dyn LLMProvider>, String), PaperError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PaperError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok((provider, format!("{provider_name}/{model}")))
}

/// Stands in for a provider that failed to initialise, so operations that
/// never reach the model keep working.
struct UnconfiguredBackend {
    provider: String,
    hint: String,
}

#[async_trait]
impl CompletionBackend for UnconfiguredBackend {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn send(&self, _turns: &[Turn]) -> Result<String, PaperError> {
        Err(PaperError::ProviderNotConfigured {
            provider: self.provider.clone(),
            hint: self.hint.clone(),
        })
    }
}

// ── Service ──────────────────────────────────────────────────────────────

pub struct PaperService {
    resolver: IdentifierResolver,
    sources: SourceRegistry,
    store: Arc<dyn ArtifactStore>,
    extractor: Arc<dyn ContentExtractor>,
    analyzer: ContentAnalyzer,
    locks: KeyedLocks,
    observer: Arc<dyn PipelineObserver>,
}

impl PaperService {
    pub fn new(
        resolver: IdentifierResolver,
        sources: SourceRegistry,
        store: Arc<dyn ArtifactStore>,
        extractor: Arc<dyn ContentExtractor>,
        engine: AnalysisEngine,
        observer: Option<ProgressObserver>,
    ) -> Self {
        let observer = observer.unwrap_or_else(|| Arc::new(NoopObserver) as ProgressObserver);
        let analyzer = ContentAnalyzer::new(
            Arc::clone(&store),
            Arc::clone(&extractor),
            engine,
            Arc::clone(&observer),
        );
        Self {
            resolver,
            sources,
            store,
            extractor,
            analyzer,
            locks: KeyedLocks::new(),
            observer,
        }
    }

    /// Wire the production components: local store, enabled sources,
    /// pdfium extractor and the resolved LLM provider.
    pub fn from_config(config: &AnalyzerConfig) -> Result<Self, PaperError> {
        let store: Arc<dyn ArtifactStore> = Arc::new(LocalStore::new(&config.storage_root)?);

        let mut sources = SourceRegistry::new();
        for kind in &config.sources {
            match kind {
                PaperSource::PubMed => sources.register(Arc::new(PubMedSource::new(config)?)),
            }
        }

        let extractor: Arc<dyn ContentExtractor> = Arc::new(PdfiumExtractor::new(
            config.pdfium_library.clone(),
            config.max_rendered_pixels,
        ));

        let backend: Arc<dyn CompletionBackend> = match resolve_provider(config) {
            Ok((provider, label)) => {
                info!("LLM provider: {label}");
                Arc::new(ProviderBackend::new(
                    provider,
                    label,
                    config.temperature,
                    config.max_tokens,
                    config.api_timeout_secs,
                ))
            }
            Err(PaperError::ProviderNotConfigured { provider, hint }) => {
                warn!("LLM provider '{provider}' unavailable; analysis requests will fail");
                Arc::new(UnconfiguredBackend { provider, hint })
            }
            Err(e) => return Err(e),
        };

        let engine = AnalysisEngine::new(
            backend,
            RetryPolicy {
                max_attempts: config.max_attempts,
                backoff_ms: config.retry_backoff_ms,
            },
        )
        .with_system_prompt(config.system_prompt.clone());

        Ok(Self::new(
            IdentifierResolver::new(config.sources.clone()),
            sources,
            store,
            extractor,
            engine,
            config.observer.clone(),
        )
        .with_analysis_mode(config.analysis_mode))
    }

    /// Choose what the model sees when an analysis is computed. Stored
    /// analyses are served as they are, whichever mode produced them.
    pub fn with_analysis_mode(mut self, mode: AnalysisMode) -> Self {
        self.analyzer = self.analyzer.with_mode(mode);
        self
    }

    pub fn analysis_mode(&self) -> AnalysisMode {
        self.analyzer.mode()
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Summary and main table for the paper at `url`, computing them on a miss.
    pub async fn get_analysis(&self, url: &str) -> Result<PaperAnalysis, PaperError> {
        let id = self.resolver.resolve(url)?;

        if let Some(cached) = self.cached_analysis(&id.id).await? {
            return Ok(cached);
        }

        let _guard = self.locks.lock(&id.id).await;
        if let Some(cached) = self.cached_analysis(&id.id).await? {
            return Ok(cached);
        }

        self.download_locked(&id).await?;
        let analysis = self.analyzer.analyze(&id.id).await?;

        let start = Instant::now();
        self.observer.on_stage_start(&id.id, Stage::Persist);
        self.store.write_summary(&id.id, &analysis.summary).await?;
        if let Some(ref table) = analysis.main_table {
            self.store.write_table(&id.id, table).await?;
        }
        self.observer
            .on_stage_complete(&id.id, Stage::Persist, start.elapsed().as_millis() as u64);

        info!("Paper {} analysed and stored", id.id);
        Ok(analysis)
    }

    /// Stored metadata, downloading the paper first if needed.
    pub async fn get_metadata(&self, url: &str) -> Result<PaperMetadata, PaperError> {
        let id = self.resolver.resolve(url)?;
        self.ensure_downloaded(&id).await?;
        Ok(self.store.read_metadata(&id.id).await?)
    }

    /// Raw document as bounded chunks, downloading it first if needed.
    pub async fn stream_document(&self, url: &str) -> Result<DocumentStream, PaperError> {
        let id = self.resolver.resolve(url)?;
        self.ensure_downloaded(&id).await?;
        let reader = self.store.open_document_reader(&id.id).await?;
        Ok(document_stream(reader, id.id))
    }

    /// PNG preview of one page (1-based), downloading the paper first if needed.
    pub async fn render_page(
        &self,
        url: &str,
        page_number: usize,
    ) -> Result<PageImage, PaperError> {
        let id = self.resolver.resolve(url)?;
        self.ensure_downloaded(&id).await?;
        let document = read_document(self.store.as_ref(), &id.id).await?;
        self.extractor.render_page(document, page_number).await
    }

    /// Every stored paper, sorted by id.
    pub async fn list_papers(&self) -> Result<Vec<PaperMetadata>, PaperError> {
        Ok(self.store.list_papers().await?)
    }

    async fn cached_analysis(&self, paper_id: &str) -> Result<Option<PaperAnalysis>, PaperError> {
        if !self.store.is_analysis_complete(paper_id).await {
            return Ok(None);
        }
        match self.store.read_analysis(paper_id).await {
            Ok(analysis) => {
                info!("Paper {paper_id} served from storage");
                self.observer.on_cache_hit(paper_id);
                Ok(Some(analysis))
            }
            // Deleted between the check and the read: recompute.
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_downloaded(&self, id: &PaperIdentifier) -> Result<(), PaperError> {
        if self.store.is_download_complete(&id.id).await {
            return Ok(());
        }
        let _guard = self.locks.lock(&id.id).await;
        self.download_locked(id).await
    }

    /// Fetch whatever half of the download is missing. Caller holds the paper lock.
    async fn download_locked(&self, id: &PaperIdentifier) -> Result<(), PaperError> {
        let has_metadata = self.store.contains(&id.id, Artifact::Metadata).await;
        let has_document = self.store.exists(&id.id).await;
        if has_metadata && has_document {
            return Ok(());
        }

        let start = Instant::now();
        self.observer.on_stage_start(&id.id, Stage::Download);
        info!("Downloading paper {} from {}", id.id, id.source);
        let source = self.sources.get(id.source)?;

        // Fetched first so an unknown article fails before any transfer, but
        // stored only once the document has arrived.
        let metadata = if has_metadata {
            None
        } else {
            Some(source.fetch_metadata(id).await?)
        };

        if has_document {
            if let Some(ref metadata) = metadata {
                self.store.write_metadata(&id.id, metadata).await?;
            }
        } else {
            let mut sink = self.store.open_document_writer(&id.id).await?;
            let bytes = source.stream_document(id, sink.writer()).await?;

            // Metadata lands before the document is published.
            if let Some(ref metadata) = metadata {
                self.store.write_metadata(&id.id, metadata).await?;
            }
            if let Err(e) = sink.commit().await {
                if metadata.is_some() {
                    if let Err(rm) = self.store.remove(&id.id, Artifact::Metadata).await {
                        warn!("Could not roll back metadata of paper {}: {rm}", id.id);
                    }
                }
                return Err(e.into());
            }
            info!("Stored document for paper {} ({bytes} bytes)", id.id);
        }

        self.observer
            .on_stage_complete(&id.id, Stage::Download, start.elapsed().as_millis() as u64);
        Ok(())
    }
}
