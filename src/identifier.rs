//! Identifier resolution: source URL → [`PaperIdentifier`].
//!
//! Pure and deterministic. No network access happens here; a URL that
//! resolves may still point to an article the source refuses to serve.

use crate::error::PaperError;
use crate::paper::{PaperIdentifier, PaperSource};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

static RE_TRAILING_NUMERIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(\d+)/?$").unwrap());

/// Resolves URLs for the enabled set of sources.
#[derive(Debug, Clone)]
pub struct IdentifierResolver {
    sources: Vec<PaperSource>,
}

impl Default for IdentifierResolver {
    fn default() -> Self {
        Self {
            sources: vec![PaperSource::PubMed],
        }
    }
}

impl IdentifierResolver {
    pub fn new(sources: impl Into<Vec<PaperSource>>) -> Self {
        Self {
            sources: sources.into(),
        }
    }

    pub fn sources(&self) -> &[PaperSource] {
        &self.sources
    }

    /// Resolve `url` into a canonical identifier.
    ///
    /// # Errors
    /// - [`PaperError::InvalidIdentifier`] when the string is not an http(s)
    ///   URL or the source-specific id segment is missing
    /// - [`PaperError::UnsupportedSource`] when no enabled source owns the host
    pub fn resolve(&self, url: &str) -> Result<PaperIdentifier, PaperError> {
        let url = url.trim();
        let parsed = Url::parse(url).map_err(|e| PaperError::InvalidIdentifier {
            url: url.to_string(),
            reason: format!("not a valid URL ({e})"),
        })?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(PaperError::InvalidIdentifier {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();

        for source in &self.sources {
            if source_owns_host(*source, &host) {
                return resolve_for_source(*source, url, &parsed);
            }
        }

        Err(PaperError::UnsupportedSource { host })
    }
}

fn source_owns_host(source: PaperSource, host: &str) -> bool {
    match source {
        PaperSource::PubMed => {
            host == "ncbi.nlm.nih.gov"
                || host.ends_with(".ncbi.nlm.nih.gov")
                || host.contains("pubmed")
        }
    }
}

fn resolve_for_source(
    source: PaperSource,
    url: &str,
    parsed: &Url,
) -> Result<PaperIdentifier, PaperError> {
    match source {
        PaperSource::PubMed => {
            let caps = RE_TRAILING_NUMERIC_ID.captures(parsed.path()).ok_or_else(|| {
                PaperError::InvalidIdentifier {
                    url: url.to_string(),
                    reason: "expected format: https://pubmed.ncbi.nlm.nih.gov/PMID/".to_string(),
                }
            })?;
            Ok(PaperIdentifier {
                id: caps[1].to_string(),
                url: url.to_string(),
                source,
            })
        }
    }
}
