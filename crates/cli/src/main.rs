use anyhow::Context;
use bazi_core::domain::report::{ChartReading, GenerationContext};
use bazi_core::pipeline::Pipeline;
use bazi_core::time::{Clock, SystemClock};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "bazi_cli", about = "Generate one daily BaZi report from a chart reading")]
struct Args {
    /// File holding the chart reading. Reads stdin when omitted or "-".
    #[arg(long)]
    reading_file: Option<PathBuf>,

    /// Reference date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    date: Option<String>,

    /// Print the rendered report prompt without calling the model.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = bazi_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let text = read_reading(args.reading_file.as_ref())?;
    let reading = ChartReading::new(text).context("No readings provided")?;
    let reference_date = resolve_reference_date(args.date.as_deref(), &SystemClock::from_settings(&settings)?)?;
    let ctx = GenerationContext::new(reading, reference_date);

    if args.dry_run {
        // The prompt does not depend on the provider, so no client is needed.
        let prompt = bazi_core::prompt::report_prompt(&bazi_core::prompt::StageSpec::report(), &ctx);
        tracing::info!(%reference_date, dry_run = true, "rendered report prompt");
        println!("=== system ===\n{}\n\n=== user ===\n{}", prompt.system, prompt.user);
        return Ok(());
    }

    let client = bazi_core::llm::client_from_settings(&settings)?;
    let pipeline = Pipeline::new(client).with_max_retries(settings.pipeline_max_retries);

    match pipeline.run(&ctx).await {
        Ok(result) => {
            let json = serde_json::to_string_pretty(&result).context("failed to serialize result")?;
            println!("{json}");
            tracing::info!(%reference_date, "report generated");
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            if let Some(gen) = bazi_core::llm::error::GenerationError::find(&err) {
                if let Some(raw) = gen.raw_output.as_deref() {
                    tracing::debug!(raw_output = raw, "raw model output");
                }
            }
            tracing::error!(%reference_date, error = %err, "report generation failed");
            Err(err)
        }
    }
}

fn read_reading(path: Option<&PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(p) if p.as_os_str() != "-" => std::fs::read_to_string(p)
            .with_context(|| format!("failed to read reading file {}", p.display())),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read reading from stdin")?;
            Ok(buf)
        }
    }
}

fn resolve_reference_date(
    date_arg: Option<&str>,
    clock: &dyn Clock,
) -> anyhow::Result<chrono::NaiveDate> {
    if let Some(s) = date_arg {
        return chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid --date {s}, expected YYYY-MM-DD"));
    }
    Ok(clock.today())
}

fn init_sentry(settings: &bazi_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazi_core::time::FixedClock;
    use chrono::NaiveDate;

    #[test]
    fn explicit_date_overrides_clock() {
        let clock = FixedClock(NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
        let d = resolve_reference_date(Some("2025-01-31"), &clock).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 1, 31).unwrap());
    }

    #[test]
    fn falls_back_to_clock() {
        let clock = FixedClock(NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
        assert_eq!(
            resolve_reference_date(None, &clock).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()
        );
    }

    #[test]
    fn rejects_malformed_dates() {
        let clock = FixedClock(NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
        assert!(resolve_reference_date(Some("07/03/2024"), &clock).is_err());
    }

    #[test]
    fn args_parse() {
        let args = Args::parse_from(["bazi_cli", "--reading-file", "r.txt", "--date", "2024-03-07", "--dry-run"]);
        assert_eq!(args.reading_file, Some(PathBuf::from("r.txt")));
        assert_eq!(args.date.as_deref(), Some("2024-03-07"));
        assert!(args.dry_run);
    }
}
