use crate::error::ApiError;
use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use bazi_core::domain::report::{ChartReading, GenerationContext, PipelineResult};
use bazi_core::pipeline::Pipeline;
use bazi_core::time::Clock;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub clock: Arc<dyn Clock>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/bazi-report", post(generate_report))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// The body is the raw chart reading; Content-Type is not checked.
async fn generate_report(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PipelineResult>, ApiError> {
    let text = String::from_utf8(body.to_vec()).map_err(|_| ApiError::InvalidUtf8)?;
    let reading = ChartReading::new(text).ok_or(ApiError::NoReadings)?;

    let ctx = GenerationContext::new(reading, state.clock.today());
    tracing::info!(
        reading_len = ctx.reading.as_str().len(),
        reference_date = %ctx.reference_date,
        "generating report"
    );

    let result = state.pipeline.run(&ctx).await.map_err(ApiError::Pipeline)?;
    Ok(Json(result))
}
