//! Error types for the paper-analyzer library.
//!
//! Every failure in the pipeline is a [`PaperError`]. Variants fall into two
//! kinds that the request boundary treats differently:
//!
//! * **User-facing**: bad input or remote content that genuinely cannot be
//!   reached (malformed URL, unsupported source, article not open access).
//!   The message and [`PaperError::status_code`] are safe to show verbatim.
//!
//! * **Internal**: network, storage, parsing, LLM or configuration failures.
//!   These are logged with full detail but surfaced to callers only through
//!   [`PaperError::public_message`], which never leaks internals.
//!
//! Storage failures of any flavour are grouped under [`StorageError`] so
//! callers never need to distinguish I/O subtypes.

use std::path::PathBuf;
use thiserror::Error;

/// Generic message shown to callers for internal failures.
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred";

/// All errors returned by the paper-analyzer library.
#[derive(Debug, Error)]
pub enum PaperError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The URL does not match the shape expected by its source.
    #[error("Invalid paper URL '{url}': {reason}")]
    InvalidIdentifier { url: String, reason: String },

    /// The URL host is not one of the configured sources.
    #[error("Unsupported paper source '{host}'. Only PubMed URLs are currently supported")]
    UnsupportedSource { host: String },

    /// Requested preview page is outside the document.
    #[error("Page {page} is out of range. Valid range: 1 to {total}")]
    PageOutOfRange { page: usize, total: usize },

    // ── Remote source errors ──────────────────────────────────────────────
    /// The source answered but refused or could not find the article.
    #[error("This article is not accessible or does not exist: {message}")]
    NotAccessible { status: u16, message: String },

    /// An intermediate lookup (e.g. PMID → PMC id) found no linked record.
    #[error("{message}")]
    UpstreamLookup { message: String },

    /// Connection failure, timeout or 5xx from the source.
    #[error("Network error while contacting '{url}': {reason}")]
    Network { url: String, reason: String },

    // ── Storage errors ────────────────────────────────────────────────────
    #[error(transparent)]
    Storage(#[from] StorageError),

    // ── Document errors ───────────────────────────────────────────────────
    /// The stored document could not be parsed.
    #[error("Failed to parse document: {detail}")]
    Parse { detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error.
    #[error("LLM API error: {message}")]
    LlmApi { message: String },

    /// A single LLM call exceeded the configured timeout.
    #[error("LLM call timed out after {secs}s")]
    LlmTimeout { secs: u64 },

    /// Every attempt returned output that did not match the expected JSON shape.
    #[error("LLM returned malformed JSON after {attempts} attempts. Last error: {last_error}")]
    MalformedResponse { attempts: u32, last_error: String },

    // ── Config errors ─────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaperError {
    /// Whether the message is safe to show to the caller verbatim.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            PaperError::InvalidIdentifier { .. }
                | PaperError::UnsupportedSource { .. }
                | PaperError::PageOutOfRange { .. }
                | PaperError::NotAccessible { .. }
                | PaperError::UpstreamLookup { .. }
        )
    }

    /// HTTP-style status code for the boundary layer.
    pub fn status_code(&self) -> u16 {
        match self {
            PaperError::InvalidIdentifier { .. }
            | PaperError::UnsupportedSource { .. }
            | PaperError::PageOutOfRange { .. } => 400,
            PaperError::NotAccessible { status, .. } => *status,
            PaperError::UpstreamLookup { .. } => 404,
            _ => 500,
        }
    }

    /// Message for the caller: the error text for user-facing kinds, a
    /// generic string otherwise.
    pub fn public_message(&self) -> String {
        if self.is_user_facing() {
            self.to_string()
        } else {
            INTERNAL_ERROR_MESSAGE.to_string()
        }
    }
}

/// Which persisted piece of a paper an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Document,
    Metadata,
    Summary,
    /// CSV half of the main table.
    TableContent,
    /// Description + footnotes half of the main table.
    TableDescription,
}

impl Artifact {
    pub const ALL: [Artifact; 5] = [
        Artifact::Document,
        Artifact::Metadata,
        Artifact::Summary,
        Artifact::TableContent,
        Artifact::TableDescription,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Artifact::Document => "document",
            Artifact::Metadata => "metadata",
            Artifact::Summary => "summary",
            Artifact::TableContent => "table content",
            Artifact::TableDescription => "table description",
        }
    }
}

/// Any failure of the artifact store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{} not found for paper '{paper_id}'", artifact.label())]
    NotFound { artifact: Artifact, paper_id: String },

    #[error("Storage I/O failed ({context}) at '{path}': {source}")]
    Io {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifact exists but cannot be decoded.
    #[error("Stored {context} is corrupt: {detail}")]
    Corrupt { context: String, detail: String },
}

impl StorageError {
    pub fn io(
        context: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        StorageError::Io {
            context: context.into(),
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
