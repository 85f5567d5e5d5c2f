//! LLM interaction: structured completions with bounded resubmission.
//!
//! [`AnalysisEngine::complete`] sends one prompt and insists on a JSON object
//! with the fields of a [`ResponseShape`]. A reply that does not parse is fed
//! back into the same transcript together with a sharper instruction, up to
//! [`RetryPolicy::max_attempts`] times. Provider-level failures (HTTP errors,
//! timeouts) are not retried here; they surface immediately.
//!
//! ## Backoff
//!
//! Resubmissions wait `backoff_ms * 2^(attempt-2)` before attempt 2, 3, …
//! With the default `backoff_ms = 0` they go out immediately.

use super::postprocess;
use crate::error::PaperError;
use crate::paper::PageImage;
use crate::prompts::{json_instruction, retry_instruction, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

// ── Response shapes ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeField {
    pub name: &'static str,
    pub description: &'static str,
}

/// Named, ordered set of string fields a reply must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseShape {
    pub name: &'static str,
    pub fields: &'static [ShapeField],
}

pub const SUMMARY_SHAPE: ResponseShape = ResponseShape {
    name: "summary",
    fields: &[ShapeField {
        name: "summary",
        description: "Concise summary (around 250 words) of objectives, methods and key findings",
    }],
};

pub const TABLE_SHAPE: ResponseShape = ResponseShape {
    name: "main table",
    fields: &[
        ShapeField {
            name: "table_description",
            description: "What the main results table shows, including its number/caption",
        },
        ShapeField {
            name: "csv_content",
            description: "The complete table as CSV, header row first",
        },
        ShapeField {
            name: "footnotes",
            description: "Footnotes attached to the table, empty string if none",
        },
    ],
};

impl ResponseShape {
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    /// `{"field": "description", …}` rendered for the prompt.
    pub fn template_json(&self) -> String {
        let mut map = serde_json::Map::new();
        for field in self.fields {
            map.insert(
                field.name.to_string(),
                serde_json::Value::String(field.description.to_string()),
            );
        }
        serde_json::to_string_pretty(&serde_json::Value::Object(map)).unwrap_or_default()
    }

    /// Validate a raw reply. Unknown keys are ignored; `null` reads as an
    /// empty string and numbers/booleans are stringified.
    pub fn parse(&self, reply: &str) -> Result<StructuredResponse, String> {
        let cleaned = postprocess::clean_llm_reply(reply);
        let value: serde_json::Value =
            serde_json::from_str(&cleaned).map_err(|e| e.to_string())?;
        let serde_json::Value::Object(mut object) = value else {
            return Err("expected a JSON object at the top level".to_string());
        };

        let mut fields = BTreeMap::new();
        for field in self.fields {
            let text = match object.remove(field.name) {
                Some(serde_json::Value::String(s)) => s,
                Some(serde_json::Value::Null) => String::new(),
                Some(v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_))) => {
                    v.to_string()
                }
                Some(_) => return Err(format!("field `{}` must be a string", field.name)),
                None => return Err(format!("missing field `{}`", field.name)),
            };
            fields.insert(field.name.to_string(), text);
        }
        Ok(StructuredResponse { fields })
    }
}

/// A reply that matched its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredResponse {
    fields: BTreeMap<String, String>,
}

impl StructuredResponse {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Move a field out. Shape fields are always present after parsing.
    pub fn take(&mut self, name: &str) -> String {
        self.fields.remove(name).unwrap_or_default()
    }
}

// ── Transcript ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Page images attached to a user turn.
    pub images: Vec<PageImage>,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn user_with_images(content: impl Into<String>, images: Vec<PageImage>) -> Self {
        Self {
            images,
            ..Self::new(Role::User, content)
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ── Backends ─────────────────────────────────────────────────────────────

/// One chat round-trip with a model.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, turns: &[Turn]) -> Result<String, PaperError>;
}

/// [`CompletionBackend`] over any edgequake-llm provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    label: String,
    temperature: f32,
    max_tokens: usize,
    call_timeout: Duration,
}

impl ProviderBackend {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        label: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
        timeout_secs: u64,
    ) -> Self {
        Self {
            provider,
            label: label.into(),
            temperature,
            max_tokens,
            call_timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl CompletionBackend for ProviderBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn send(&self, turns: &[Turn]) -> Result<String, PaperError> {
        let messages: Vec<ChatMessage> = turns
            .iter()
            .map(|t| match t.role {
                Role::System => ChatMessage::system(t.content.as_str()),
                Role::User if t.images.is_empty() => ChatMessage::user(t.content.as_str()),
                Role::User => ChatMessage::user_with_images(
                    t.content.as_str(),
                    t.images.iter().map(image_data).collect(),
                ),
                Role::Assistant => ChatMessage::assistant(t.content.as_str()),
            })
            .collect();
        let options = self.options();

        let start = Instant::now();
        let response = timeout(self.call_timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| PaperError::LlmTimeout {
                secs: self.call_timeout.as_secs(),
            })?
            .map_err(|e| PaperError::LlmApi {
                message: e.to_string(),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.label,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Base64 attachment for vision-capable providers.
fn image_data(image: &PageImage) -> ImageData {
    ImageData::new(STANDARD.encode(&image.bytes), image.mime_type).with_detail("high")
}

// ── Engine ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. At least 1.
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// Delay before `attempt` (1-based). Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempt - 2);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

pub struct AnalysisEngine {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
    system_prompt: Option<String>,
}

impl AnalysisEngine {
    pub fn new(backend: Arc<dyn CompletionBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Run `prompt` until the reply matches `shape` or attempts run out.
    ///
    /// Each call starts a fresh transcript.
    pub async fn complete(
        &self,
        prompt: &str,
        shape: &ResponseShape,
    ) -> Result<StructuredResponse, PaperError> {
        self.complete_with_images(prompt, Vec::new(), shape).await
    }

    /// Like [`AnalysisEngine::complete`], with `images` attached to the
    /// first user turn. Resubmissions keep the images in the transcript.
    pub async fn complete_with_images(
        &self,
        prompt: &str,
        images: Vec<PageImage>,
        shape: &ResponseShape,
    ) -> Result<StructuredResponse, PaperError> {
        let system = self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let request = format!("{prompt}\n\n{}", json_instruction(shape));
        let mut transcript = vec![
            Turn::system(system),
            Turn::user_with_images(request, images),
        ];

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            let reply = self.backend.send(&transcript).await?;

            match shape.parse(&reply) {
                Ok(parsed) => {
                    debug!("{} reply accepted on attempt {attempt}", shape.name);
                    return Ok(parsed);
                }
                Err(e) => {
                    warn!(
                        "{} reply {attempt}/{max_attempts} rejected: {e}",
                        shape.name
                    );
                    transcript.push(Turn::assistant(reply));
                    transcript.push(Turn::user(retry_instruction(shape, &e)));
                    last_error = e;
                }
            }
        }

        Err(PaperError::MalformedResponse {
            attempts: max_attempts,
            last_error,
        })
    }
}
