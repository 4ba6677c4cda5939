use crate::llm::error::GenerationError;
use crate::llm::json;
use crate::llm::{GenerateRequest, LlmClient, Provider, StageOutput};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays queued answers in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<StageOutput, GenerationError>>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_structured(&self, value: serde_json::Value) -> &Self {
        self.push(Ok(StageOutput::Structured(value)))
    }

    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.push(Ok(StageOutput::Text(text.into())))
    }

    pub fn push_error(&self, err: GenerationError) -> &Self {
        self.push(Err(err))
    }

    fn push(&self, response: Result<StageOutput, GenerationError>) -> &Self {
        self.responses
            .lock()
            .expect("scripted responses lock poisoned")
            .push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .expect("scripted requests lock poisoned")
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .expect("scripted requests lock poisoned")
            .len()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedClient {
    fn provider(&self) -> Provider {
        Provider::Scripted
    }

    async fn generate(&self, request: GenerateRequest) -> anyhow::Result<StageOutput> {
        let stage = request.stage;
        let schema = request.schema.clone();
        self.requests
            .lock()
            .expect("scripted requests lock poisoned")
            .push(request);

        let next = self
            .responses
            .lock()
            .expect("scripted responses lock poisoned")
            .pop_front();
        let output = match next {
            Some(response) => response?,
            None => {
                return Err(GenerationError::unavailable(
                    Provider::Scripted,
                    stage,
                    "script",
                    "no scripted response left",
                )
                .into())
            }
        };

        // Hold scripted answers to the same contract as real providers.
        match (output, schema) {
            (StageOutput::Structured(v), Some(schema)) => Ok(StageOutput::Structured(
                json::validate_structured(v, &schema, Provider::Scripted, stage)?,
            )),
            (output, _) => Ok(output),
        }
    }
}
