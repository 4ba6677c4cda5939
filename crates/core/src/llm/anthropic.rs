use crate::config::Settings;
use crate::llm::error::GenerationError;
use crate::llm::json;
use crate::llm::{GenerateRequest, LlmClient, Provider, StageOutput};
use crate::prompt::StageKind;
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";

const TOOL_NAME_EMIT_STRUCTURED: &str = "emit_structured_output";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
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
            // The Messages API caps temperature at 1.0.
            temperature: generation.temperature.clamp(0.0, 1.0),
        })
    }

    async fn create_message(
        &self,
        stage: StageKind,
        req: &CreateMessageRequest,
    ) -> Result<CreateMessageResponse, GenerationError> {
        let unavailable = |step: &'static str, detail: String| {
            GenerationError::unavailable(Provider::Anthropic, stage, step, detail)
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| unavailable("auth", format!("invalid API key header: {e}")))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(req)
            .send()
            .await
            .map_err(|e| GenerationError::transport(Provider::Anthropic, stage, &e))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| GenerationError::transport(Provider::Anthropic, stage, &e))?;
        if !status.is_success() {
            return Err(unavailable("http", format!("status={status}")).with_raw_output(text));
        }

        serde_json::from_str::<CreateMessageResponse>(&text).map_err(|e| {
            unavailable("decode", format!("failed to decode Messages response: {e}"))
                .with_raw_output(text.clone())
        })
    }

    fn build_request(&self, request: &GenerateRequest) -> CreateMessageRequest {
        let (tools, tool_choice) = match &request.schema {
            Some(schema) => (
                Some(vec![Tool {
                    name: TOOL_NAME_EMIT_STRUCTURED,
                    description: "Emit the final answer as structured JSON",
                    input_schema: schema.to_json_schema(),
                }]),
                Some(ToolChoice::Tool {
                    name: TOOL_NAME_EMIT_STRUCTURED,
                }),
            ),
            None => (None, None),
        };

        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: Some(request.prompt.system.clone()),
            messages: vec![Message {
                role: "user",
                content: request.prompt.user.clone(),
            }],
            tools,
            tool_choice,
        }
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_input(res: &CreateMessageResponse) -> Option<&serde_json::Value> {
        res.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse { name, input, .. } if name == TOOL_NAME_EMIT_STRUCTURED => {
                Some(input)
            }
            _ => None,
        })
    }

    fn interpret(
        request: &GenerateRequest,
        res: &CreateMessageResponse,
    ) -> Result<StageOutput, GenerationError> {
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            tracing::warn!(
                stage = request.stage.as_str(),
                "Anthropic stop_reason=max_tokens; output may be truncated"
            );
        }

        if let Some(schema) = &request.schema {
            // Tool output path.
            if let Some(input) = Self::response_tool_input(res) {
                let value =
                    json::validate_structured(input.clone(), schema, Provider::Anthropic, request.stage)?;
                return Ok(StageOutput::Structured(value));
            }

            // Fallback to text (should be rare).
            let text = Self::response_text(res);
            let value = json::parse_structured(&text, schema, Provider::Anthropic, request.stage)?;
            return Ok(StageOutput::Structured(value));
        }

        let text = json::clean_text(&Self::response_text(res));
        if text.is_empty() {
            return Err(GenerationError::unavailable(
                Provider::Anthropic,
                request.stage,
                "content",
                "response contained no text",
            ));
        }
        Ok(StageOutput::Text(text))
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn generate(&self, request: GenerateRequest) -> anyhow::Result<StageOutput> {
        let req = self.build_request(&request);
        let res = self.create_message(request.stage, &req).await?;
        Ok(Self::interpret(&request, &res)?)
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationSettings;
    use crate::domain::report::{sample_report, StructuredReport};
    use crate::llm::error::GenerationErrorKind;
    use crate::llm::test_server::{serve_once, Reply};
    use crate::prompt::RenderedPrompt;
    use serde_json::json;

    fn local_client(base_url: String, timeout: Duration) -> AnthropicClient {
        AnthropicClient {
            http: reqwest::Client::builder().timeout(timeout).build().unwrap(),
            base_url,
            ..client()
        }
    }

    fn client() -> AnthropicClient {
        AnthropicClient {
            http: reqwest::Client::new(),
            api_key: "test-key".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: GenerationSettings::default().max_tokens,
            temperature: 1.0,
        }
    }

    fn request(stage: StageKind) -> GenerateRequest {
        GenerateRequest {
            stage,
            prompt: RenderedPrompt {
                system: "You are the tester.".to_string(),
                user: "Do the thing.".to_string(),
            },
            schema: match stage {
                StageKind::Report => Some(StructuredReport::schema()),
                StageKind::Summary => None,
            },
        }
    }

    #[test]
    fn structured_request_forces_the_schema_tool() {
        let body = serde_json::to_value(client().build_request(&request(StageKind::Report))).unwrap();
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": TOOL_NAME_EMIT_STRUCTURED}));
        assert_eq!(body["tools"][0]["input_schema"], StructuredReport::schema().to_json_schema());
        assert_eq!(body["system"], "You are the tester.");
        assert_eq!(body["temperature"], 1.0);
    }

    #[test]
    fn text_request_has_no_tools() {
        let body = serde_json::to_value(client().build_request(&request(StageKind::Summary))).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["messages"][0]["content"], "Do the thing.");
    }

    #[test]
    fn parses_tool_use_report() {
        let input = serde_json::to_value(sample_report()).unwrap();
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "tool_use", "id": "toolu_1", "name": TOOL_NAME_EMIT_STRUCTURED, "input": input}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();

        let out = AnthropicClient::interpret(&request(StageKind::Report), &res).unwrap();
        assert_eq!(out, StageOutput::Structured(input));
    }

    #[test]
    fn tool_input_missing_fields_is_a_schema_violation() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [
                {"type": "tool_use", "name": TOOL_NAME_EMIT_STRUCTURED, "input": {"day_master": "甲"}}
            ]
        }))
        .unwrap();

        let err = AnthropicClient::interpret(&request(StageKind::Report), &res).unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::SchemaViolation);
        assert_eq!(err.detail, "$.current_luck_pillar: missing required field");
    }

    #[test]
    fn structured_stage_falls_back_to_text_json() {
        let report = serde_json::to_string(&sample_report()).unwrap();
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": format!("```json\n{report}\n```")}]
        }))
        .unwrap();

        let out = AnthropicClient::interpret(&request(StageKind::Report), &res).unwrap();
        assert!(matches!(out, StageOutput::Structured(_)));
    }

    #[test]
    fn text_stage_returns_cleaned_text() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "  \"今日は推し活日和！\" "}]
        }))
        .unwrap();

        let out = AnthropicClient::interpret(&request(StageKind::Summary), &res).unwrap();
        assert_eq!(out, StageOutput::Text("今日は推し活日和！".to_string()));
    }

    #[test]
    fn empty_text_is_unavailable() {
        let res: CreateMessageResponse =
            serde_json::from_value(json!({"content": []})).unwrap();
        let err = AnthropicClient::interpret(&request(StageKind::Summary), &res).unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn silent_server_times_out_as_unavailable() {
        let base_url = serve_once(Reply::Silent).await;
        let c = local_client(base_url, Duration::from_millis(300));
        let err = c.generate(request(StageKind::Report)).await.unwrap_err();
        let gen = GenerationError::find(&err).unwrap();
        assert_eq!(gen.kind, GenerationErrorKind::Unavailable);
        assert_eq!(gen.step, "timeout");
        assert_eq!(gen.provider, Provider::Anthropic);
    }

    #[tokio::test]
    async fn non_success_status_is_unavailable() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let base_url =
            serve_once(Reply::Status("529 Site Overloaded", body.to_string())).await;
        let c = local_client(base_url, Duration::from_secs(5));
        let err = c.generate(request(StageKind::Summary)).await.unwrap_err();
        let gen = GenerationError::find(&err).unwrap();
        assert_eq!(gen.kind, GenerationErrorKind::Unavailable);
        assert_eq!(gen.step, "http");
        assert_eq!(gen.stage, StageKind::Summary);
        assert_eq!(gen.raw_output.as_deref(), Some(body));
    }

    #[tokio::test]
    async fn generates_report_over_http() {
        let input = serde_json::to_value(sample_report()).unwrap();
        let body = json!({
            "content": [{"type": "tool_use", "id": "toolu_1", "name": TOOL_NAME_EMIT_STRUCTURED, "input": input}],
            "stop_reason": "tool_use"
        })
        .to_string();
        let base_url = serve_once(Reply::Status("200 OK", body)).await;
        let c = local_client(base_url, Duration::from_secs(5));
        let out = c.generate(request(StageKind::Report)).await.unwrap();
        assert_eq!(out, StageOutput::Structured(input));
    }
}
