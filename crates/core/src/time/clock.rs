use anyhow::Context;
use chrono::{DateTime, FixedOffset, Local, NaiveDate, Utc};

/// Source of the reference date a report is generated for.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall-clock date, either in process local time or at a fixed UTC offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    offset: Option<FixedOffset>,
}

impl SystemClock {
    pub fn local() -> Self {
        Self { offset: None }
    }

    pub fn with_offset_hours(hours: i32) -> anyhow::Result<Self> {
        let offset = hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .with_context(|| format!("invalid UTC offset: {hours} hours"))?;
        Ok(Self {
            offset: Some(offset),
        })
    }

    pub fn from_settings(settings: &crate::config::Settings) -> anyhow::Result<Self> {
        match settings.report_utc_offset_hours {
            Some(hours) => Self::with_offset_hours(hours).context("REPORT_UTC_OFFSET_HOURS"),
            None => Ok(Self::local()),
        }
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        reference_date(Utc::now(), self.offset)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

pub fn reference_date(now_utc: DateTime<Utc>, offset: Option<FixedOffset>) -> NaiveDate {
    match offset {
        Some(offset) => now_utc.with_timezone(&offset).date_naive(),
        None => now_utc.with_timezone(&Local).date_naive(),
    }
}
