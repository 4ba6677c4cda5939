use crate::config::Settings;
use crate::llm::error::GenerationError;
use crate::llm::json;
use crate::llm::{GenerateRequest, LlmClient, Provider, StageOutput};
use crate::prompt::StageKind;
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-pro";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl GeminiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_google_api_key()?.to_string();
        let generation = &settings.generation;
        let base_url = generation
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = generation
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(generation.timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens: generation.max_tokens,
            temperature: generation.temperature,
        })
    }

    fn url(&self) -> String {
        // Accept ids written as "gemini/<model>" or "models/<model>".
        let model = self
            .model
            .trim_start_matches("gemini/")
            .trim_start_matches("models/");
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }

    fn build_request(&self, request: &GenerateRequest) -> GeminiRequest {
        let (response_mime_type, response_schema) = match &request.schema {
            Some(schema) => (Some("application/json"), Some(schema.to_gemini_schema())),
            None => (None, None),
        };

        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart {
                    text: request.prompt.user.clone(),
                }],
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: request.prompt.system.clone(),
                }],
            }),
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
                response_mime_type,
                response_schema,
            },
        }
    }

    async fn generate_content(
        &self,
        stage: StageKind,
        body: &GeminiRequest,
    ) -> Result<GeminiResponse, GenerationError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|e| {
                GenerationError::unavailable(
                    Provider::Gemini,
                    stage,
                    "auth",
                    format!("invalid API key header: {e}"),
                )
            })?,
        );

        let res = self
            .http
            .post(self.url())
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::transport(Provider::Gemini, stage, &e))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| GenerationError::transport(Provider::Gemini, stage, &e))?;
        if !status.is_success() {
            return Err(GenerationError::unavailable(
                Provider::Gemini,
                stage,
                "http",
                format!("status={status}"),
            )
            .with_raw_output(text));
        }

        serde_json::from_str::<GeminiResponse>(&text).map_err(|e| {
            GenerationError::unavailable(
                Provider::Gemini,
                stage,
                "decode",
                format!("failed to decode generateContent response: {e}"),
            )
            .with_raw_output(text.clone())
        })
    }

    fn interpret(
        request: &GenerateRequest,
        res: GeminiResponse,
    ) -> Result<StageOutput, GenerationError> {
        let unavailable = |step: &'static str, detail: String| {
            GenerationError::unavailable(Provider::Gemini, request.stage, step, detail)
        };

        if let Some(error) = res.error {
            return Err(unavailable("api", format!("Gemini API error: {}", error.message)));
        }
        if let Some(reason) = res.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(unavailable("blocked", format!("prompt blocked: {reason}")));
        }

        let Some(candidate) = res.candidates.into_iter().next() else {
            return Err(unavailable("content", "no candidates in response".to_string()));
        };
        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            tracing::warn!(
                stage = request.stage.as_str(),
                "Gemini finishReason=MAX_TOKENS; output may be truncated"
            );
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .unwrap_or_default();
        let no_text = || {
            let reason = candidate.finish_reason.as_deref().unwrap_or("unknown");
            unavailable(
                "content",
                format!("response contained no text (finishReason={reason})"),
            )
        };
        if text.trim().is_empty() {
            return Err(no_text());
        }

        match &request.schema {
            Some(schema) => {
                let value = json::parse_structured(&text, schema, Provider::Gemini, request.stage)?;
                Ok(StageOutput::Structured(value))
            }
            None => {
                let cleaned = json::clean_text(&text);
                if cleaned.is_empty() {
                    return Err(no_text());
                }
                Ok(StageOutput::Text(cleaned))
            }
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn generate(&self, request: GenerateRequest) -> anyhow::Result<StageOutput> {
        let body = self.build_request(&request);
        let res = self.generate_content(request.stage, &body).await?;
        Ok(Self::interpret(&request, res)?)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default)]
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}
