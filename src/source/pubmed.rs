//! PubMed via NCBI E-utilities, full text via PubMed Central.
//!
//! Endpoints used:
//!   efetch: article title and abstract (XML)
//!   elink:  PMID → PMC id (JSON)
//!   PMC:    `/pmc/articles/PMC<id>/pdf/` for the document itself
//!
//! Only open-access articles with a PMC record can be downloaded. Everything
//! else surfaces as a user-facing [`PaperError::NotAccessible`] or
//! [`PaperError::UpstreamLookup`].

use super::ContentSource;
use crate::config::AnalyzerConfig;
use crate::error::{PaperError, StorageError};
use crate::paper::{PaperIdentifier, PaperMetadata, PaperSource};
use async_trait::async_trait;
use futures::StreamExt;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";
const ELINK_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/elink.fcgi";
const PMC_ARTICLES_URL: &str = "https://www.ncbi.nlm.nih.gov/pmc/articles";

// PMC refuses PDF downloads from non-browser agents.
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub struct PubMedSource {
    client: Client,
    tool: String,
    email: Option<String>,
    api_key: Option<String>,
}

impl PubMedSource {
    pub fn new(config: &AnalyzerConfig) -> Result<Self, PaperError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .user_agent(concat!("paper-analyzer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PaperError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            tool: config.ncbi_tool.clone(),
            email: config.ncbi_email.clone(),
            api_key: config.ncbi_api_key.clone(),
        })
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("tool", self.tool.clone())];
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    async fn eutils_get(
        &self,
        url: &str,
        params: Vec<(&'static str, String)>,
    ) -> Result<String, PaperError> {
        let response = self
            .client
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(|e| network_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(eutils_status_error(url, status));
        }

        response.text().await.map_err(|e| network_error(url, &e))
    }

    /// Resolve the PMC id linked to `pmid`.
    async fn lookup_pmc_id(&self, pmid: &str) -> Result<String, PaperError> {
        let mut params = self.base_params();
        params.extend([
            ("dbfrom", "pubmed".to_string()),
            ("db", "pmc".to_string()),
            ("id", pmid.to_string()),
            ("retmode", "json".to_string()),
        ]);

        let body = self.eutils_get(ELINK_URL, params).await?;
        let pmc_id = parse_elink_pmc_id(&body)?.ok_or_else(|| PaperError::UpstreamLookup {
            message: format!("No PMC ID found for PMID {pmid}; the article has no free full text"),
        })?;
        debug!("PMID {pmid} → PMC{pmc_id}");
        Ok(pmc_id)
    }
}

#[async_trait]
impl ContentSource for PubMedSource {
    fn source(&self) -> PaperSource {
        PaperSource::PubMed
    }

    async fn fetch_metadata(&self, id: &PaperIdentifier) -> Result<PaperMetadata, PaperError> {
        let mut params = self.base_params();
        params.extend([
            ("db", "pubmed".to_string()),
            ("id", id.id.clone()),
            ("retmode", "xml".to_string()),
        ]);

        let xml = self.eutils_get(EFETCH_URL, params).await?;
        let article = parse_efetch_article(&xml)?.ok_or_else(|| PaperError::NotAccessible {
            status: 404,
            message: format!("PubMed has no record for PMID {}", id.id),
        })?;

        info!("Fetched metadata for PMID {}: {}", id.id, article.title);
        Ok(PaperMetadata {
            id: id.id.clone(),
            title: article.title,
            abstract_text: article.abstract_text,
            url: id.url.clone(),
        })
    }

    async fn stream_document(
        &self,
        id: &PaperIdentifier,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, PaperError> {
        let pmc_id = self.lookup_pmc_id(&id.id).await?;
        let url = format!("{PMC_ARTICLES_URL}/PMC{pmc_id}/pdf/");
        info!("Downloading PDF: {url}");

        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
            .map_err(|e| network_error(&url, &e))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        check_pdf_response(response.status(), &content_type)?;

        let mut body = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| network_error(&url, &e))?;
            sink.write_all(&chunk)
                .await
                .map_err(|e| StorageError::io("write downloaded document", &id.id, e))?;
            written += chunk.len() as u64;
        }
        sink.flush()
            .await
            .map_err(|e| StorageError::io("flush downloaded document", &id.id, e))?;

        info!("Downloaded PMC{pmc_id}: {written} bytes");
        Ok(written)
    }
}

fn network_error(url: &str, e: &reqwest::Error) -> PaperError {
    let reason = if e.is_timeout() {
        "request timed out".to_string()
    } else {
        e.to_string()
    };
    PaperError::Network {
        url: url.to_string(),
        reason,
    }
}

/// 4xx from E-utilities means the record is refused or unknown; anything
/// else is a transport-level problem.
fn eutils_status_error(url: &str, status: StatusCode) -> PaperError {
    if status.is_client_error() {
        PaperError::NotAccessible {
            status: status.as_u16(),
            message: format!("NCBI E-utilities answered {status}"),
        }
    } else {
        PaperError::Network {
            url: url.to_string(),
            reason: format!("HTTP {status}"),
        }
    }
}

fn check_pdf_response(status: StatusCode, content_type: &str) -> Result<(), PaperError> {
    if status != StatusCode::OK {
        return Err(PaperError::NotAccessible {
            status: status.as_u16(),
            message: format!("PMC answered {status} for the PDF"),
        });
    }
    if !content_type.to_ascii_lowercase().contains("application/pdf") {
        warn!("PMC served '{content_type}' instead of a PDF");
        return Err(PaperError::NotAccessible {
            status: 403,
            message: format!("PMC did not serve a PDF (content type '{content_type}')"),
        });
    }
    Ok(())
}

// ── efetch XML ───────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
struct ArticleText {
    title: String,
    abstract_text: String,
}

/// Title and abstract of the first `PubmedArticle`, or `None` when the set
/// is empty. Inline markup inside either element is flattened and multiple
/// `AbstractText` sections are joined with a single space.
fn parse_efetch_article(xml: &str) -> Result<Option<ArticleText>, PaperError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut found = false;
    let mut title = String::new();
    let mut sections: Vec<String> = Vec::new();
    let mut in_title = false;
    let mut in_abstract = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"PubmedArticle" => found = true,
                b"ArticleTitle" if found => in_title = true,
                b"AbstractText" if found => {
                    in_abstract = true;
                    sections.push(String::new());
                }
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                if in_title || in_abstract {
                    let text = e.unescape().map_err(|err| PaperError::Parse {
                        detail: format!("PubMed XML: {err}"),
                    })?;
                    if in_title {
                        title.push_str(&text);
                    }
                    if in_abstract {
                        if let Some(section) = sections.last_mut() {
                            section.push_str(&text);
                        }
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if in_title || in_abstract {
                    let text = String::from_utf8_lossy(e).into_owned();
                    if in_title {
                        title.push_str(&text);
                    }
                    if let (true, Some(section)) = (in_abstract, sections.last_mut()) {
                        section.push_str(&text);
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"ArticleTitle" => in_title = false,
                b"AbstractText" => in_abstract = false,
                // Only the first article matters.
                b"PubmedArticle" => break,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PaperError::Parse {
                    detail: format!("PubMed XML at byte {}: {e}", reader.buffer_position()),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    if !found {
        return Ok(None);
    }

    let abstract_text = sections
        .iter()
        .map(|s| collapse_whitespace(s))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Ok(Some(ArticleText {
        title: collapse_whitespace(&title),
        abstract_text,
    }))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── elink JSON ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ElinkResponse {
    #[serde(default)]
    linksets: Vec<LinkSet>,
}

#[derive(Debug, Deserialize)]
struct LinkSet {
    #[serde(default)]
    linksetdbs: Vec<LinkSetDb>,
}

#[derive(Debug, Deserialize)]
struct LinkSetDb {
    dbto: String,
    #[serde(default)]
    links: Vec<serde_json::Value>,
}

/// First PMC id linked from the queried PMID, if any.
fn parse_elink_pmc_id(body: &str) -> Result<Option<String>, PaperError> {
    let response: ElinkResponse = serde_json::from_str(body).map_err(|e| PaperError::Parse {
        detail: format!("elink JSON: {e}"),
    })?;

    let id = response
        .linksets
        .iter()
        .flat_map(|set| set.linksetdbs.iter())
        .filter(|db| db.dbto == "pmc")
        .flat_map(|db| db.links.iter())
        .find_map(|link| match link {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

    Ok(id.map(|s| s.trim_start_matches("PMC").to_string()))
}
