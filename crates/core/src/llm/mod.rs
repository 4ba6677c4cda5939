use crate::config::Settings;
use crate::prompt::{RenderedPrompt, StageKind};
use crate::schema::Schema;
use anyhow::Context;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub mod anthropic;
pub mod error;
pub mod gemini;
pub mod json;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;
#[cfg(test)]
mod test_server;

/// One stage's call: the rendered prompt plus, for structured stages, the
/// contract the answer must satisfy.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub stage: StageKind,
    pub prompt: RenderedPrompt,
    pub schema: Option<Schema>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// Already validated against the request's schema.
    Structured(serde_json::Value),
    Text(String),
}

impl StageOutput {
    pub fn into_structured(self) -> anyhow::Result<serde_json::Value> {
        match self {
            StageOutput::Structured(v) => Ok(v),
            StageOutput::Text(_) => anyhow::bail!("expected structured output, got text"),
        }
    }

    pub fn into_text(self) -> anyhow::Result<String> {
        match self {
            StageOutput::Text(s) => Ok(s),
            StageOutput::Structured(_) => anyhow::bail!("expected text output, got structured"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    Anthropic,
    #[cfg(any(test, feature = "testing"))]
    Scripted,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Anthropic => "anthropic",
            #[cfg(any(test, feature = "testing"))]
            Provider::Scripted => "scripted",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Provider::Gemini),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            other => anyhow::bail!("unknown LLM provider: {other}"),
        }
    }
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Runs one stage. Implementations do not retry.
    async fn generate(&self, request: GenerateRequest) -> anyhow::Result<StageOutput>;
}

/// Builds the client selected by `LLM_PROVIDER` (Gemini when unset).
pub fn client_from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn LlmClient>> {
    let provider = match settings.llm_provider.as_deref() {
        Some(raw) => raw.parse::<Provider>().context("LLM_PROVIDER is invalid")?,
        None => Provider::Gemini,
    };

    let client: Arc<dyn LlmClient> = match provider {
        Provider::Gemini => Arc::new(gemini::GeminiClient::from_settings(settings)?),
        Provider::Anthropic => Arc::new(anthropic::AnthropicClient::from_settings(settings)?),
        #[cfg(any(test, feature = "testing"))]
        Provider::Scripted => anyhow::bail!("the scripted client cannot be configured from settings"),
    };
    Ok(client)
}
