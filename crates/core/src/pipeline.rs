use crate::domain::report::{GenerationContext, PipelineResult, StructuredReport};
use crate::llm::error::GenerationError;
use crate::llm::{GenerateRequest, LlmClient, StageOutput};
use crate::prompt::{self, RenderedPrompt, StageSpec, TEMPLATE_VERSION};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

pub struct Pipeline {
    client: Arc<dyn LlmClient>,
    report_stage: StageSpec,
    summary_stage: StageSpec,
    max_retries: u32,
    retry_backoff: Duration,
}

impl Pipeline {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            report_stage: StageSpec::report(),
            summary_stage: StageSpec::summary(),
            max_retries: 0,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Extra attempts per stage after an unavailable provider. Schema
    /// violations are never retried.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn report_prompt(&self, ctx: &GenerationContext) -> RenderedPrompt {
        prompt::report_prompt(&self.report_stage, ctx)
    }

    pub async fn run(&self, ctx: &GenerationContext) -> anyhow::Result<PipelineResult> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "pipeline",
            %run_id,
            provider = %self.client.provider(),
            template_version = TEMPLATE_VERSION,
            reference_date = %ctx.reference_date,
        );
        self.run_stages(ctx).instrument(span).await
    }

    async fn run_stages(&self, ctx: &GenerationContext) -> anyhow::Result<PipelineResult> {
        let started = std::time::Instant::now();

        let report_prompt = self.report_prompt(ctx);
        let report_value = self
            .run_stage(&self.report_stage, report_prompt)
            .await
            .context("report stage failed")?
            .into_structured()?;
        let report = serde_json::from_value::<StructuredReport>(report_value.clone())
            .map_err(|e| {
                GenerationError::schema_violation(
                    self.client.provider(),
                    self.report_stage.kind,
                    format!("report does not decode: {e}"),
                    Some(report_value.to_string()),
                )
            })
            .context("report stage failed")?;
        tracing::info!(
            ten_gods = report.ten_gods.len(),
            interactions = report.notable_interactions.len(),
            "report stage complete"
        );

        let summary_prompt = prompt::summary_prompt(&self.summary_stage, ctx, &report)?;
        let summary = self
            .run_stage(&self.summary_stage, summary_prompt)
            .await
            .context("summary stage failed")?
            .into_text()?;
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline complete"
        );

        Ok(PipelineResult { report, summary })
    }

    async fn run_stage(
        &self,
        spec: &StageSpec,
        prompt: RenderedPrompt,
    ) -> anyhow::Result<StageOutput> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let request = GenerateRequest {
                stage: spec.kind,
                prompt: prompt.clone(),
                schema: spec.schema.clone(),
            };
            match self.client.generate(request).await {
                Ok(output) => return Ok(output),
                Err(err) => {
                    let retryable = GenerationError::find(&err).is_some_and(|e| e.is_retryable());
                    if !retryable || attempt > self.max_retries {
                        return Err(err);
                    }
                    let backoff = retry_delay(self.retry_backoff, attempt);
                    tracing::warn!(
                        stage = spec.kind.as_str(),
                        attempt,
                        ?backoff,
                        error = %err,
                        "generation unavailable; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Exponential delay before retry `attempt` (1-based), capped at [`MAX_RETRY_BACKOFF`].
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
    base.saturating_mul(factor).min(MAX_RETRY_BACKOFF)
}
