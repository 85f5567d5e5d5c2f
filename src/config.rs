//! Configuration for the paper analysis pipeline.
//!
//! Every knob lives in [`AnalyzerConfig`], built via [`AnalyzerConfigBuilder`].
//! The CLI maps its flags (and their environment variables) onto the builder;
//! library users set only what they care about and rely on the defaults below.

use crate::error::PaperError;
use crate::paper::PaperSource;
use crate::pipeline::analyze::AnalysisMode;
use crate::progress::ProgressObserver;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for [`crate::service::PaperService::from_config`].
///
/// # Example
/// ```rust
/// use paper_analyzer::AnalyzerConfig;
///
/// let config = AnalyzerConfig::builder()
///     .storage_root("/var/lib/papers")
///     .model("gpt-4.1-mini")
///     .max_attempts(3)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalyzerConfig {
    /// Root directory of the artifact store. Default: `data`.
    pub storage_root: PathBuf,

    /// Sources the resolver accepts. Default: PubMed only.
    pub sources: Vec<PaperSource>,

    /// Contact e-mail sent to NCBI E-utilities with every request.
    ///
    /// NCBI asks heavy users to identify themselves; requests without an
    /// e-mail still work but are more likely to be throttled.
    pub ncbi_email: Option<String>,

    /// NCBI API key. Raises the E-utilities limit from 3 to 10 requests/s.
    pub ncbi_api_key: Option<String>,

    /// `tool` parameter sent to NCBI E-utilities. Default: `paper-analyzer`.
    pub ncbi_tool: String,

    /// Timeout for every HTTP request to the paper source, in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// LLM model identifier, e.g. "gpt-4.1-mini", "claude-sonnet-4-20250514".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.3.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per call. Default: 4096.
    ///
    /// The table prompt returns the full CSV of the main results table;
    /// large tables need the headroom.
    pub max_tokens: usize,

    /// Attempts per structured completion before giving up on malformed
    /// JSON. Default: 3.
    pub max_attempts: u32,

    /// Delay before the first resubmission, doubled for each further one.
    /// Default: 0 (resubmit immediately).
    pub retry_backoff_ms: u64,

    /// Per-LLM-call timeout in seconds. Default: 180.
    ///
    /// Whole-paper prompts are long; a 20-page paper is 15–25k input tokens.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Explicit pdfium library (file or directory). Falls back to
    /// `PDFIUM_LIB_PATH`, then the system library.
    pub pdfium_library: Option<PathBuf>,

    /// Longest edge of rendered pages, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Page text or page images for the model. Default: page text.
    pub analysis_mode: AnalysisMode,

    /// Receives pipeline stage events.
    pub observer: Option<ProgressObserver>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("data"),
            sources: vec![PaperSource::PubMed],
            ncbi_email: None,
            ncbi_api_key: None,
            ncbi_tool: "paper-analyzer".to_string(),
            download_timeout_secs: 120,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.3,
            max_tokens: 4096,
            max_attempts: 3,
            retry_backoff_ms: 0,
            api_timeout_secs: 180,
            system_prompt: None,
            pdfium_library: None,
            max_rendered_pixels: 2000,
            analysis_mode: AnalysisMode::PageText,
            observer: None,
        }
    }
}

impl fmt::Debug for AnalyzerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzerConfig")
            .field("storage_root", &self.storage_root)
            .field("sources", &self.sources)
            .field("ncbi_email", &self.ncbi_email)
            .field("ncbi_api_key", &self.ncbi_api_key.as_ref().map(|_| "<redacted>"))
            .field("ncbi_tool", &self.ncbi_tool)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pdfium_library", &self.pdfium_library)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("analysis_mode", &self.analysis_mode)
            .finish()
    }
}

impl AnalyzerConfig {
    pub fn builder() -> AnalyzerConfigBuilder {
        AnalyzerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalyzerConfig`].
#[derive(Debug)]
pub struct AnalyzerConfigBuilder {
    config: AnalyzerConfig,
}

impl AnalyzerConfigBuilder {
    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.storage_root = root.into();
        self
    }

    pub fn sources(mut self, sources: Vec<PaperSource>) -> Self {
        self.config.sources = sources;
        self
    }

    pub fn ncbi_email(mut self, email: impl Into<String>) -> Self {
        self.config.ncbi_email = Some(email.into());
        self
    }

    pub fn ncbi_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.ncbi_api_key = Some(key.into());
        self
    }

    pub fn ncbi_tool(mut self, tool: impl Into<String>) -> Self {
        self.config.ncbi_tool = tool.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn analysis_mode(mut self, mode: AnalysisMode) -> Self {
        self.config.analysis_mode = mode;
        self
    }

    pub fn observer(mut self, observer: ProgressObserver) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalyzerConfig, PaperError> {
        let c = &self.config;
        if c.max_attempts == 0 {
            return Err(PaperError::InvalidConfig("max_attempts must be ≥ 1".into()));
        }
        if c.download_timeout_secs == 0 || c.api_timeout_secs == 0 {
            return Err(PaperError::InvalidConfig("timeouts must be ≥ 1 second".into()));
        }
        if c.sources.is_empty() {
            return Err(PaperError::InvalidConfig(
                "at least one paper source must be enabled".into(),
            ));
        }
        if c.storage_root.as_os_str().is_empty() {
            return Err(PaperError::InvalidConfig("storage_root is empty".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = AnalyzerConfig::builder().build().unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.storage_root, PathBuf::from("data"));
        assert_eq!(config.sources, vec![PaperSource::PubMed]);
        assert_eq!(config.analysis_mode, AnalysisMode::PageText);
    }

    #[test]
    fn short_validation_errors_read_cleanly() {
        let err = AnalyzerConfig::builder().api_timeout_secs(0).build().unwrap_err();
        assert_eq!(err.to_string(), "Invalid configuration: timeouts must be ≥ 1 second");
    }

    #[test]
    fn analysis_mode_is_carried_and_shown() {
        let config = AnalyzerConfig::builder()
            .analysis_mode(AnalysisMode::PageImages)
            .build()
            .unwrap();
        assert_eq!(config.analysis_mode, AnalysisMode::PageImages);
        assert!(format!("{config:?}").contains("PageImages"));
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = AnalyzerConfig::builder().max_attempts(0).build().unwrap_err();
        assert!(matches!(err, PaperError::InvalidConfig(_)));
    }

    #[test]
    fn temperature_is_clamped() {
        let config = AnalyzerConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(config.temperature, 2.0);
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AnalyzerConfig::builder()
            .ncbi_api_key("secret-key")
            .build()
            .unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }
}
