pub mod domain;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod schema;
pub mod time;

pub mod config {
    use anyhow::Context;
    use std::str::FromStr;

    const DEFAULT_TEMPERATURE: f32 = 1.0;
    const DEFAULT_TIMEOUT_SECS: u64 = 60;
    const DEFAULT_MAX_TOKENS: u32 = 4096;
    const DEFAULT_PORT: u16 = 5000;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub llm_provider: Option<String>,
        pub google_api_key: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub generation: GenerationSettings,
        pub pipeline_max_retries: u32,
        pub report_utc_offset_hours: Option<i32>,
        pub port: u16,
    }

    /// Parameters shared by every generation call for the lifetime of the process.
    #[derive(Debug, Clone)]
    pub struct GenerationSettings {
        pub model: Option<String>,
        pub base_url: Option<String>,
        pub temperature: f32,
        pub timeout_secs: u64,
        pub max_tokens: u32,
    }

    impl Default for GenerationSettings {
        fn default() -> Self {
            Self {
                model: None,
                base_url: None,
                temperature: DEFAULT_TEMPERATURE,
                timeout_secs: DEFAULT_TIMEOUT_SECS,
                max_tokens: DEFAULT_MAX_TOKENS,
            }
        }
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                llm_provider: non_empty_var("LLM_PROVIDER"),
                google_api_key: non_empty_var("GOOGLE_API_KEY")
                    .or_else(|| non_empty_var("GEMINI_API_KEY")),
                anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                generation: GenerationSettings {
                    model: non_empty_var("LLM_MODEL"),
                    base_url: non_empty_var("LLM_BASE_URL"),
                    temperature: parse_var("LLM_TEMPERATURE")?.unwrap_or(DEFAULT_TEMPERATURE),
                    timeout_secs: parse_var("LLM_TIMEOUT_SECS")?.unwrap_or(DEFAULT_TIMEOUT_SECS),
                    max_tokens: parse_var("LLM_MAX_TOKENS")?.unwrap_or(DEFAULT_MAX_TOKENS),
                },
                pipeline_max_retries: parse_var("PIPELINE_MAX_RETRIES")?.unwrap_or(0),
                report_utc_offset_hours: parse_var("REPORT_UTC_OFFSET_HOURS")?,
                port: parse_var("PORT")?.unwrap_or(DEFAULT_PORT),
            })
        }

        pub fn require_google_api_key(&self) -> anyhow::Result<&str> {
            self.google_api_key
                .as_deref()
                .context("GOOGLE_API_KEY is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn parse_var<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        non_empty_var(key)
            .map(|raw| {
                raw.parse::<T>()
                    .with_context(|| format!("{key} has an invalid value: {raw}"))
            })
            .transpose()
    }
}
