use crate::llm::Provider;
use crate::prompt::StageKind;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// Unreachable, timed out, non-success status or no usable content.
    Unavailable,
    /// Structured output that does not satisfy the stage's schema.
    SchemaViolation,
}

impl GenerationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationErrorKind::Unavailable => "unavailable",
            GenerationErrorKind::SchemaViolation => "schema_violation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub provider: Provider,
    pub stage: StageKind,
    /// Where in the call it failed: `http`, `decode`, `schema`, ...
    pub step: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
}

impl GenerationError {
    pub fn unavailable(
        provider: Provider,
        stage: StageKind,
        step: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind: GenerationErrorKind::Unavailable,
            provider,
            stage,
            step,
            detail: detail.into(),
            raw_output: None,
        }
    }

    pub fn schema_violation(
        provider: Provider,
        stage: StageKind,
        detail: impl Into<String>,
        raw_output: Option<String>,
    ) -> Self {
        Self {
            kind: GenerationErrorKind::SchemaViolation,
            provider,
            stage,
            step: "schema",
            detail: detail.into(),
            raw_output,
        }
    }

    pub fn transport(provider: Provider, stage: StageKind, err: &reqwest::Error) -> Self {
        let step = if err.is_timeout() { "timeout" } else { "http" };
        Self::unavailable(provider, stage, step, format!("request failed: {err}"))
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }

    /// Finds a generation failure anywhere in an error's context chain.
    pub fn find(err: &anyhow::Error) -> Option<&GenerationError> {
        err.chain().find_map(|e| e.downcast_ref::<GenerationError>())
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == GenerationErrorKind::Unavailable
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={}, stage={}, kind={}, step={}): {}",
            self.provider,
            self.stage.as_str(),
            self.kind.as_str(),
            self.step,
            self.detail
        )
    }
}

impl std::error::Error for GenerationError {}
