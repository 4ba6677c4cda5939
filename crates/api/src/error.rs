use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bazi_core::llm::error::{GenerationError, GenerationErrorKind};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<&'static str>,
}

#[derive(Debug)]
pub enum ApiError {
    NoReadings,
    InvalidUtf8,
    Pipeline(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NoReadings => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "No readings provided".to_string(),
                    code: None,
                    stage: None,
                },
            ),
            ApiError::InvalidUtf8 => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "Request body must be valid UTF-8".to_string(),
                    code: None,
                    stage: None,
                },
            ),
            ApiError::Pipeline(err) => pipeline_failure(&err),
        };

        (status, Json(body)).into_response()
    }
}

fn pipeline_failure(err: &anyhow::Error) -> (StatusCode, ErrorBody) {
    sentry_anyhow::capture_anyhow(err);

    let detail = format!("{err:#}");
    let Some(gen) = GenerationError::find(err) else {
        tracing::error!(error = %detail, "report pipeline failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody {
                error: "An internal error occurred".to_string(),
                code: Some("INTERNAL"),
                stage: None,
            },
        );
    };

    tracing::error!(
        error = %detail,
        provider = %gen.provider,
        stage = gen.stage.as_str(),
        kind = gen.kind.as_str(),
        raw_output = gen.raw_output.as_deref().unwrap_or(""),
        "report pipeline failed"
    );

    let (status, code, message) = match gen.kind {
        GenerationErrorKind::Unavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            "GENERATION_UNAVAILABLE",
            "Report generation is temporarily unavailable",
        ),
        GenerationErrorKind::SchemaViolation => (
            StatusCode::BAD_GATEWAY,
            "GENERATION_SCHEMA_VIOLATION",
            "The generated report did not match the expected format",
        ),
    };

    (
        status,
        ErrorBody {
            error: message.to_string(),
            code: Some(code),
            stage: Some(gen.stage.as_str()),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use bazi_core::llm::Provider;
    use bazi_core::prompt::StageKind;
    use serde_json::{json, Value};

    async fn body_json(response: Response) -> Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn no_readings_has_only_an_error_key() {
        let response = ApiError::NoReadings.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({"error": "No readings provided"}));
    }

    #[tokio::test]
    async fn unavailable_maps_to_503() {
        let err = anyhow::Error::new(GenerationError::unavailable(
            Provider::Gemini,
            StageKind::Summary,
            "timeout",
            "request failed: operation timed out",
        ))
        .context("summary stage failed");
        let response = ApiError::Pipeline(err).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["code"], "GENERATION_UNAVAILABLE");
        assert_eq!(body["stage"], "summary");
    }

    #[tokio::test]
    async fn schema_violation_maps_to_502_without_raw_output() {
        let err = anyhow::Error::new(GenerationError::schema_violation(
            Provider::Gemini,
            StageKind::Report,
            "$.ten_gods: missing required field",
            Some("{\"secret\": \"raw model output\"}".to_string()),
        ));
        let response = ApiError::Pipeline(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["code"], "GENERATION_SCHEMA_VIOLATION");
        assert_eq!(body["stage"], "report");
        assert!(!body.to_string().contains("raw model output"));
    }

    #[tokio::test]
    async fn other_failures_map_to_500() {
        let response = ApiError::Pipeline(anyhow::anyhow!("serializer exploded")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"error": "An internal error occurred", "code": "INTERNAL"})
        );
    }
}
