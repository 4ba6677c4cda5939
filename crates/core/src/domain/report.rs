use crate::schema::{Field, Schema};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The chart reading exactly as the caller supplied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartReading(String);

impl ChartReading {
    /// Returns `None` for empty or whitespace-only input.
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }
        Some(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub reading: ChartReading,
    pub reference_date: NaiveDate,
}

impl GenerationContext {
    pub fn new(reading: ChartReading, reference_date: NaiveDate) -> Self {
        Self {
            reading,
            reference_date,
        }
    }

    /// `YYYY-MM-DD`, the form injected into both prompts.
    pub fn reference_date_string(&self) -> String {
        self.reference_date.format("%Y-%m-%d").to_string()
    }
}

/// Every report lists each Ten God category once.
pub const TEN_GOD_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredReport {
    pub day_master: String,
    pub current_luck_pillar: LuckPillar,
    pub ten_gods: Vec<TenGod>,
    pub notable_interactions: Vec<Interaction>,
    pub personality: String,
    pub emotional_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuckPillar {
    pub day: String,
    pub day_influence: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenGod {
    pub name: String,
    pub strength: String,
    pub score: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub interaction_type: String,
    pub description: String,
    pub emotional_keywords: Vec<String>,
    pub influence_score: i64,
}

/// Report and summary as returned to HTTP clients: the report's fields at the
/// top level, plus `summary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    #[serde(flatten)]
    pub report: StructuredReport,
    pub summary: String,
}

impl StructuredReport {
    /// Contract the report stage must satisfy. Every field is required.
    pub fn schema() -> Schema {
        let luck_pillar = Schema::Object(vec![
            Field::new(
                "day",
                "Pillar of the day and its interpretation",
                Schema::String,
            ),
            Field::new(
                "day_influence",
                "Influence score for the day",
                Schema::Integer,
            ),
        ]);

        let ten_god = Schema::Object(vec![
            Field::new("name", "Name of the Ten God", Schema::String),
            Field::new(
                "strength",
                "Strength level, e.g. strong, weak, absent",
                Schema::String,
            ),
            Field::new("score", "Numerical influence score", Schema::Integer),
            Field::new(
                "description",
                "How this Ten God influences the person today",
                Schema::String,
            ),
        ]);

        let interaction = Schema::Object(vec![
            Field::new(
                "type",
                "Kind of interaction, e.g. clash or combination",
                Schema::String,
            ),
            Field::new(
                "description",
                "Explanation of the interaction",
                Schema::String,
            ),
            Field::new(
                "emotional_keywords",
                "Emotional states tied to the interaction",
                Schema::array(Schema::String),
            ),
            Field::new(
                "influence_score",
                "Influence score of the interaction",
                Schema::Integer,
            ),
        ]);

        Schema::Object(vec![
            Field::new(
                "day_master",
                "Day Master element and its interpretation",
                Schema::String,
            ),
            Field::new("current_luck_pillar", "Current luck pillar", luck_pillar),
            Field::new(
                "ten_gods",
                "All ten Ten God categories for the day, in order",
                Schema::array_of_len(ten_god, TEN_GOD_COUNT),
            ),
            Field::new(
                "notable_interactions",
                "Clashes, combinations and similar interactions",
                Schema::array(interaction),
            ),
            Field::new(
                "personality",
                "Personality traits drawn from the chart",
                Schema::String,
            ),
            Field::new(
                "emotional_keywords",
                "Overall emotional themes for the day",
                Schema::array(Schema::String),
            ),
        ])
    }
}

#[cfg(test)]
pub(crate) fn sample_report() -> StructuredReport {
    StructuredReport {
        day_master: "甲 (きのえ)".to_string(),
        current_luck_pillar: LuckPillar {
            day: "乙巳 (きのとみ)".to_string(),
            day_influence: 7,
        },
        ten_gods: [
            "比肩", "劫財", "食神", "傷官", "偏財", "正財", "偏官", "正官", "偏印", "正印",
        ]
        .iter()
        .map(|name| TenGod {
            name: name.to_string(),
            strength: "普通".to_string(),
            score: 5,
            description: "直感が冴える日".to_string(),
        })
        .collect(),
        notable_interactions: vec![Interaction {
            interaction_type: "冲 (ちゅう)".to_string(),
            description: "変化の兆し".to_string(),
            emotional_keywords: vec!["変化".to_string(), "不安定".to_string()],
            influence_score: 5,
        }],
        personality: "好奇心旺盛なチャレンジャー".to_string(),
        emotional_keywords: vec!["ワクワク".to_string()],
    }
}
