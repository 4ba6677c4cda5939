use crate::domain::report::{GenerationContext, StructuredReport};
use crate::schema::Schema;
use anyhow::Context;

pub const TEMPLATE_VERSION: &str = "2025-02.1";

const REPORT_BACKSTORY: &str = include_str!("../prompts/report/backstory.md");
const REPORT_DESCRIPTION: &str = include_str!("../prompts/report/description.md");
const REPORT_EXPECTED_OUTPUT: &str = include_str!("../prompts/report/expected_output.md");
pub const EXAMPLE_REPORT: &str = include_str!("../prompts/report/example_report.json");

const SUMMARY_BACKSTORY: &str = include_str!("../prompts/summary/backstory.md");
const SUMMARY_DESCRIPTION: &str = include_str!("../prompts/summary/description.md");
const SUMMARY_EXPECTED_OUTPUT: &str = include_str!("../prompts/summary/expected_output.md");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Report,
    Summary,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Report => "report",
            StageKind::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageSpec {
    pub kind: StageKind,
    pub role: &'static str,
    pub goal: &'static str,
    pub backstory: &'static str,
    pub description: &'static str,
    pub expected_output: &'static str,
    pub schema: Option<Schema>,
}

/// What is actually sent to the model for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl StageSpec {
    pub fn report() -> Self {
        Self {
            kind: StageKind::Report,
            role: "BaZi Report Expert",
            goal: "Generate a report of the day's fortune for {current_date} from the supplied BaZi chart readings",
            backstory: REPORT_BACKSTORY,
            description: REPORT_DESCRIPTION,
            expected_output: REPORT_EXPECTED_OUTPUT,
            schema: Some(StructuredReport::schema()),
        }
    }

    pub fn summary() -> Self {
        Self {
            kind: StageKind::Summary,
            role: "Today at a Glance Writer",
            goal: "Turn the BaZi report into one witty, accurate Japanese line for Gen Z readers",
            backstory: SUMMARY_BACKSTORY,
            description: SUMMARY_DESCRIPTION,
            expected_output: SUMMARY_EXPECTED_OUTPUT,
            schema: None,
        }
    }

    pub fn render(&self, vars: &[(&str, &str)]) -> RenderedPrompt {
        let system = format!(
            "You are the {}.\n\n{}\nYour goal: {}",
            self.role,
            fill(self.backstory, vars).trim_end(),
            fill(self.goal, vars)
        );

        let mut user = format!(
            "{}\n\nExpected output:\n{}",
            fill(self.description, vars).trim_end(),
            fill(self.expected_output, vars).trim_end()
        );
        if self.schema.is_some() {
            user.push_str("\n\nRespond with a single JSON object that matches the response schema.");
        }

        RenderedPrompt { system, user }
    }
}

pub fn report_prompt(spec: &StageSpec, ctx: &GenerationContext) -> RenderedPrompt {
    let date = ctx.reference_date_string();
    spec.render(&[
        ("reading", ctx.reading.as_str()),
        ("current_date", date.as_str()),
        ("example_report", EXAMPLE_REPORT.trim()),
    ])
}

pub fn summary_prompt(
    spec: &StageSpec,
    ctx: &GenerationContext,
    report: &StructuredReport,
) -> anyhow::Result<RenderedPrompt> {
    let date = ctx.reference_date_string();
    let report_json =
        serde_json::to_string_pretty(report).context("failed to serialize report for summary")?;
    Ok(spec.render(&[
        ("reading", ctx.reading.as_str()),
        ("current_date", date.as_str()),
        ("report", report_json.as_str()),
    ]))
}

/// Single-pass `{name}` substitution. Substituted values are never rescanned,
/// so braces inside a reading stay literal. Unknown placeholders are kept.
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });
        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
