//! Integration tests for the cache-first pipeline.
//!
//! Every role is faked: the source serves an in-memory "document" whose pages
//! are separated by form feeds, the extractor splits on them, and the backend
//! answers from a script. No network, pdfium or API key is needed.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use futures::StreamExt;
use paper_analyzer::pipeline::extract::check_page_number;
use paper_analyzer::{
    AnalysisEngine, AnalysisMode, Artifact, ArtifactStore, CompletionBackend, ContentExtractor,
    ContentSource, IdentifierResolver, LocalStore, PageImage, PaperContent, PaperError,
    PaperIdentifier, PaperMetadata, PaperService, PaperSource, RetryPolicy, SourceRegistry, Turn,
    CHUNK_SIZE, INTERNAL_ERROR_MESSAGE,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

const URL: &str = "https://pubmed.ncbi.nlm.nih.gov/31452104/";
const PAPER_ID: &str = "31452104";

const SUMMARY_REPLY: &str = r#"{"summary": "A randomised trial of drug X in 412 patients."}"#;
const TABLE_REPLY: &str = r#"```json
{
  "table_description": "Primary and secondary outcomes",
  "csv_content": "Outcome,Drug X,Placebo\nMortality,12%,19%\n",
  "footnotes": "a p < 0.05"
}
```"#;

// ── Fakes ────────────────────────────────────────────────────────────────────

struct FakeSource {
    document: Vec<u8>,
    delay: Duration,
    fail_download: AtomicBool,
    /// Id reported inside the metadata, when the source normalises ids.
    metadata_id: Option<String>,
    metadata_fetches: AtomicUsize,
    downloads: AtomicUsize,
}

impl FakeSource {
    fn new(pages: &[&str]) -> Arc<Self> {
        Self::with_document(pages.join("\x0c").into_bytes())
    }

    fn with_document(document: Vec<u8>) -> Arc<Self> {
        Arc::new(Self::unshared(document))
    }

    fn unshared(document: Vec<u8>) -> Self {
        Self {
            document,
            delay: Duration::from_millis(20),
            fail_download: AtomicBool::new(false),
            metadata_id: None,
            metadata_fetches: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    fn source(&self) -> PaperSource {
        PaperSource::PubMed
    }

    async fn fetch_metadata(&self, id: &PaperIdentifier) -> Result<PaperMetadata, PaperError> {
        self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(PaperMetadata {
            id: self.metadata_id.clone().unwrap_or_else(|| id.id.clone()),
            title: format!("Paper {}", id.id),
            abstract_text: "Background. Methods. Results.".to_string(),
            url: id.url.clone(),
        })
    }

    async fn stream_document(
        &self,
        _id: &PaperIdentifier,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, PaperError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let half = self.document.len() / 2;
        sink.write_all(&self.document[..half]).await.unwrap();
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(PaperError::NotAccessible {
                status: 403,
                message: "connection dropped".to_string(),
            });
        }
        sink.write_all(&self.document[half..]).await.unwrap();
        Ok(self.document.len() as u64)
    }
}

/// Pages are separated by form feeds; rendering returns the page text as bytes.
struct FakeExtractor;

fn split_pages(document: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(document)
        .split('\x0c')
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ContentExtractor for FakeExtractor {
    async fn extract(
        &self,
        document: Vec<u8>,
        metadata: &PaperMetadata,
    ) -> Result<PaperContent, PaperError> {
        Ok(PaperContent {
            title: metadata.title.clone(),
            abstract_text: metadata.abstract_text.clone(),
            page_contents: split_pages(&document),
        })
    }

    async fn render_page(
        &self,
        document: Vec<u8>,
        page_number: usize,
    ) -> Result<PageImage, PaperError> {
        let pages = split_pages(&document);
        check_page_number(page_number, pages.len())?;
        Ok(PageImage {
            bytes: pages[page_number - 1].clone().into_bytes(),
            mime_type: "image/png",
        })
    }

    async fn render_pages(&self, document: Vec<u8>) -> Result<Vec<PageImage>, PaperError> {
        Ok(split_pages(&document)
            .into_iter()
            .map(|page| PageImage {
                bytes: page.into_bytes(),
                mime_type: "image/png",
            })
            .collect())
    }
}

/// Answers summary and table requests independently. Scripted replies are
/// served first, then the canned valid reply.
#[derive(Default)]
struct ScriptedBackend {
    summary_script: Mutex<VecDeque<String>>,
    table_script: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
    transcripts: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script_table(&self, replies: &[&str]) {
        let mut script = self.table_script.lock().unwrap();
        script.extend(replies.iter().map(|r| r.to_string()));
    }

    fn script_summary(&self, replies: &[&str]) {
        let mut script = self.summary_script.lock().unwrap();
        script.extend(replies.iter().map(|r| r.to_string()));
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, turns: &[Turn]) -> Result<String, PaperError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcripts.lock().unwrap().push(turns.to_vec());

        let is_table = turns.iter().any(|t| t.content.contains("csv_content"));
        let (script, fallback) = if is_table {
            (&self.table_script, TABLE_REPLY)
        } else {
            (&self.summary_script, SUMMARY_REPLY)
        };
        let scripted = script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| fallback.to_string()))
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    _dir: TempDir,
    store: Arc<LocalStore>,
    source: Arc<FakeSource>,
    backend: Arc<ScriptedBackend>,
    service: Arc<PaperService>,
}

/// Route library logs to the test output; `RUST_LOG=debug` to see them.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn harness_with(source: Arc<FakeSource>) -> Harness {
    harness_in_mode(source, AnalysisMode::PageText)
}

fn harness_in_mode(source: Arc<FakeSource>, mode: AnalysisMode) -> Harness {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(dir.path()).unwrap());
    let backend = ScriptedBackend::new();
    let engine = AnalysisEngine::new(
        Arc::clone(&backend) as Arc<dyn CompletionBackend>,
        RetryPolicy {
            max_attempts: 3,
            backoff_ms: 0,
        },
    );
    let service = PaperService::new(
        IdentifierResolver::default(),
        SourceRegistry::new().with(Arc::clone(&source) as Arc<dyn ContentSource>),
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::new(FakeExtractor),
        engine,
        None,
    )
    .with_analysis_mode(mode);
    Harness {
        _dir: dir,
        store,
        source,
        backend,
        service: Arc::new(service),
    }
}

fn harness() -> Harness {
    harness_with(FakeSource::new(&[
        "Introduction and methods",
        "Table 2. Outcomes\nMortality 12% 19%",
        "Discussion",
    ]))
}

// ── Analysis ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_analysis_downloads_once_and_calls_the_model_twice() {
    let h = harness();
    let analysis = h.service.get_analysis(URL).await.unwrap();

    assert_eq!(analysis.paper_id, PAPER_ID);
    assert_eq!(analysis.metadata.title, "Paper 31452104");
    assert_eq!(analysis.summary, "A randomised trial of drug X in 412 patients.");
    let table = analysis.main_table.as_ref().unwrap();
    assert_eq!(table.description, "Primary and secondary outcomes");
    assert!(table.csv_content.starts_with("Outcome,Drug X,Placebo"));
    assert_eq!(table.footnotes, "a p < 0.05");

    assert_eq!(h.source.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(h.source.metadata_fetches.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.calls(), 2);
    for artifact in Artifact::ALL {
        assert!(h.store.contains(PAPER_ID, artifact).await, "{artifact:?} missing");
    }
}

#[tokio::test]
async fn second_analysis_is_served_from_storage() {
    let h = harness();
    let first = h.service.get_analysis(URL).await.unwrap();
    let second = h.service.get_analysis(URL).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.source.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn summary_call_precedes_table_call_and_sees_every_page() {
    let h = harness();
    h.service.get_analysis(URL).await.unwrap();

    let transcripts = h.backend.transcripts.lock().unwrap();
    assert_eq!(transcripts.len(), 2);
    assert!(!transcripts[0].iter().any(|t| t.content.contains("csv_content")));
    assert!(transcripts[1].iter().any(|t| t.content.contains("csv_content")));

    let prompt = &transcripts[0][1].content;
    let p1 = prompt.find("Page 1:").unwrap();
    let p2 = prompt.find("Page 2:").unwrap();
    let p3 = prompt.find("Page 3:").unwrap();
    assert!(p1 < p2 && p2 < p3);
    assert!(prompt.contains("Title: Paper 31452104"));
}

#[tokio::test]
async fn image_mode_shows_the_model_every_page_instead_of_text() {
    let h = harness_in_mode(
        FakeSource::new(&["cover", "Table 2. Outcomes", "references"]),
        AnalysisMode::PageImages,
    );
    assert_eq!(h.service.analysis_mode(), AnalysisMode::PageImages);

    let analysis = h.service.get_analysis(URL).await.unwrap();
    assert_eq!(analysis.summary, "A randomised trial of drug X in 412 patients.");
    assert_eq!(analysis.main_table.unwrap().footnotes, "a p < 0.05");
    assert_eq!(h.backend.calls(), 2);

    let transcripts = h.backend.transcripts.lock().unwrap();
    for transcript in transcripts.iter() {
        let user = &transcript[1];
        let pages: Vec<&[u8]> = user.images.iter().map(|i| i.bytes.as_slice()).collect();
        assert_eq!(pages, [&b"cover"[..], b"Table 2. Outcomes", b"references"]);
        assert!(user.content.contains("3 attached images"));
        assert!(!user.content.contains("Page 1:"));
        assert!(user.content.contains("Title: Paper 31452104"));
    }
    assert!(transcripts[1][1].content.contains("csv_content"));
}

#[tokio::test]
async fn image_mode_serves_stored_analyses_without_rendering() {
    let h = harness_in_mode(FakeSource::new(&["only page"]), AnalysisMode::PageImages);
    let first = h.service.get_analysis(URL).await.unwrap();
    let second = h.service.get_analysis(URL).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn deleting_any_artifact_recomputes_the_analysis() {
    for artifact in Artifact::ALL {
        let h = harness();
        let original = h.service.get_analysis(URL).await.unwrap();

        std::fs::remove_file(h.store.artifact_path(PAPER_ID, artifact)).unwrap();
        assert!(!h.store.is_analysis_complete(PAPER_ID).await);

        let again = h.service.get_analysis(URL).await.unwrap();
        assert_eq!(original, again, "{artifact:?}");
        assert_eq!(h.backend.calls(), 4, "{artifact:?} should trigger a new analysis");

        let downloads = h.source.downloads.load(Ordering::SeqCst);
        let fetches = h.source.metadata_fetches.load(Ordering::SeqCst);
        match artifact {
            Artifact::Document => assert_eq!((downloads, fetches), (2, 1)),
            Artifact::Metadata => assert_eq!((downloads, fetches), (1, 2)),
            _ => assert_eq!((downloads, fetches), (1, 1), "{artifact:?}"),
        }
        assert!(h.store.is_analysis_complete(PAPER_ID).await);
    }
}

#[tokio::test]
async fn concurrent_requests_share_one_download_and_analysis() {
    let h = harness();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&h.service);
        handles.push(tokio::spawn(async move { service.get_analysis(URL).await }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(h.source.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(h.source.metadata_fetches.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn concurrent_requests_for_different_papers_both_complete() {
    let h = harness();
    let a = h.service.get_analysis("https://pubmed.ncbi.nlm.nih.gov/111/");
    let b = h.service.get_analysis("https://pubmed.ncbi.nlm.nih.gov/222/");
    let (a, b) = tokio::join!(a, b);

    assert_eq!(a.unwrap().paper_id, "111");
    assert_eq!(b.unwrap().paper_id, "222");
    assert_eq!(h.source.downloads.load(Ordering::SeqCst), 2);
    assert_eq!(h.backend.calls(), 4);
}

// ── Malformed replies ────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_table_replies_are_resubmitted() {
    let h = harness();
    h.backend.script_table(&[
        "Sure! Here is the table you asked for.",
        r#"{"table_description": "Outcomes"}"#,
    ]);

    let analysis = h.service.get_analysis(URL).await.unwrap();

    assert_eq!(h.backend.calls(), 4);
    assert_eq!(
        analysis.main_table.unwrap().description,
        "Primary and secondary outcomes"
    );

    // The last table transcript carries both rejected replies and a correction.
    let transcripts = h.backend.transcripts.lock().unwrap();
    let last = transcripts.last().unwrap();
    assert_eq!(last.len(), 6);
    assert!(last[5].content.contains("invalid JSON"));
}

#[tokio::test]
async fn exhausted_attempts_persist_nothing_from_the_analysis() {
    let h = harness();
    h.backend.script_summary(&["nope", "still nope", "{\"wrong\": 1}"]);

    let err = h.service.get_analysis(URL).await.unwrap_err();

    assert!(matches!(err, PaperError::MalformedResponse { attempts: 3, .. }));
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.public_message(), INTERNAL_ERROR_MESSAGE);
    assert_eq!(h.backend.calls(), 3);

    // The download is kept; no analysis artifact is.
    assert!(h.store.is_download_complete(PAPER_ID).await);
    assert!(!h.store.contains(PAPER_ID, Artifact::Summary).await);
    assert!(!h.store.contains(PAPER_ID, Artifact::TableContent).await);

    // A later request reuses the download.
    h.service.get_analysis(URL).await.unwrap();
    assert_eq!(h.source.downloads.load(Ordering::SeqCst), 1);
}

// ── Download failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_download_leaves_no_document() {
    let source = FakeSource::new(&["only page"]);
    source.fail_download.store(true, Ordering::SeqCst);
    let h = harness_with(source);

    let err = h.service.get_analysis(URL).await.unwrap_err();
    assert_eq!(err.status_code(), 403);
    assert!(err.is_user_facing());

    assert!(!h.store.exists(PAPER_ID).await);
    assert_eq!(h.backend.calls(), 0);
    let leftovers: Vec<_> = std::fs::read_dir(h.store.root().join("papers"))
        .unwrap()
        .collect();
    assert!(leftovers.is_empty(), "partial download left behind: {leftovers:?}");
    assert!(!h.store.contains(PAPER_ID, Artifact::Metadata).await);
    assert!(h.service.list_papers().await.unwrap().is_empty());

    // Retrying after the source recovers downloads again.
    h.source.fail_download.store(false, Ordering::SeqCst);
    h.service.get_analysis(URL).await.unwrap();
    assert_eq!(h.source.downloads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_metadata_only_request_stores_nothing() {
    let source = FakeSource::new(&["only page"]);
    source.fail_download.store(true, Ordering::SeqCst);
    let h = harness_with(source);

    assert!(h.service.get_metadata(URL).await.is_err());
    assert!(!h.store.contains(PAPER_ID, Artifact::Metadata).await);
    assert!(!h.store.exists(PAPER_ID).await);
    assert!(h.service.list_papers().await.unwrap().is_empty());
}

#[tokio::test]
async fn metadata_is_stored_under_the_resolved_id() {
    let source = Arc::new(FakeSource {
        metadata_id: Some(format!("PMID:{PAPER_ID}")),
        ..FakeSource::unshared(b"page".to_vec())
    });
    let h = harness_with(source);

    let metadata = h.service.get_metadata(URL).await.unwrap();
    assert_eq!(metadata.id, "PMID:31452104");
    assert!(h.store.is_download_complete(PAPER_ID).await);

    h.service.get_metadata(URL).await.unwrap();
    assert_eq!(h.source.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsupported_url_is_rejected_before_any_io() {
    let h = harness();
    let err = h
        .service
        .get_analysis("https://example.com/papers/31452104/")
        .await
        .unwrap_err();

    assert!(matches!(err, PaperError::UnsupportedSource { .. }));
    assert_eq!(err.status_code(), 400);
    assert_eq!(h.source.metadata_fetches.load(Ordering::SeqCst), 0);
    assert_eq!(h.source.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pubmed_url_without_id_is_invalid() {
    let h = harness();
    let err = h
        .service
        .get_metadata("https://pubmed.ncbi.nlm.nih.gov/?term=aspirin")
        .await
        .unwrap_err();
    assert!(matches!(err, PaperError::InvalidIdentifier { .. }));
    assert_eq!(err.status_code(), 400);
}

// ── Metadata, streaming, previews ────────────────────────────────────────────

#[tokio::test]
async fn metadata_downloads_without_analysing() {
    let h = harness();
    let metadata = h.service.get_metadata(URL).await.unwrap();
    assert_eq!(metadata.id, PAPER_ID);
    assert_eq!(metadata.url, URL);

    h.service.get_metadata(URL).await.unwrap();
    assert_eq!(h.source.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.calls(), 0);
    assert!(!h.store.contains(PAPER_ID, Artifact::Summary).await);
}

#[tokio::test]
async fn document_streams_in_bounded_chunks() {
    let document: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 97) as u8).collect();
    let h = harness_with(FakeSource::with_document(document.clone()));

    let mut stream = h.service.stream_document(URL).await.unwrap();
    let mut received = Vec::new();
    let mut chunks = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        assert!(!chunk.is_empty() && chunk.len() <= CHUNK_SIZE);
        received.extend_from_slice(&chunk);
        chunks += 1;
    }

    assert_eq!(received, document);
    assert!(chunks >= 4);
    assert_eq!(h.source.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn page_preview_respects_page_range() {
    let h = harness();

    let page = h.service.render_page(URL, 2).await.unwrap();
    assert_eq!(page.mime_type, "image/png");
    assert!(String::from_utf8(page.bytes).unwrap().starts_with("Table 2."));

    for bad in [0, 4] {
        let err = h.service.render_page(URL, bad).await.unwrap_err();
        assert!(matches!(err, PaperError::PageOutOfRange { total: 3, .. }));
        assert_eq!(err.status_code(), 400);
        assert!(err.public_message().contains("1 to 3"));
    }
    assert_eq!(h.source.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn list_papers_returns_every_downloaded_paper() {
    let h = harness();
    assert!(h.service.list_papers().await.unwrap().is_empty());

    h.service
        .get_metadata("https://pubmed.ncbi.nlm.nih.gov/222/")
        .await
        .unwrap();
    h.service.get_analysis("https://pubmed.ncbi.nlm.nih.gov/111/").await.unwrap();

    let papers = h.service.list_papers().await.unwrap();
    let ids: Vec<_> = papers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["111", "222"]);
    assert!(h.store.is_analysis_complete("111").await);
    assert!(!h.store.is_analysis_complete("222").await);
}
