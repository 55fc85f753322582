//! Conversion of schedule snapshots into downloadable artifacts.
//!
//! Conversion is a pure function of the snapshot: no clock reads, no I/O,
//! identical input gives byte-identical output.

pub mod ics;
pub mod json;
pub mod periods;

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::ScheduleSnapshot;

pub use periods::{period_times, PERIODS_PER_DAY};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("Term start date is unknown; supply term_start to export a calendar")]
    MissingTermStart,

    #[error("Period {0} is outside the daily timetable")]
    InvalidPeriod(u8),

    #[error("Term starting {0} runs past the supported calendar range")]
    DateOutOfRange(NaiveDate),

    #[error("Failed to serialize schedule: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// iCalendar (RFC 5545) text.
    Calendar,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Calendar => "text/calendar; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Calendar => "ics",
            ExportFormat::Json => "json",
        }
    }

    /// Pick a format from an HTTP `Accept` header. Anything that does not
    /// ask for a calendar gets JSON.
    pub fn from_accept(accept: Option<&str>) -> Self {
        match accept {
            Some(value) if value.to_ascii_lowercase().contains("text/calendar") => {
                ExportFormat::Calendar
            }
            _ => ExportFormat::Json,
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ics" | "ical" | "calendar" => Ok(ExportFormat::Calendar),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("Unknown export format '{}' (expected ics or json)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedArtifact {
    pub content_type: &'static str,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Render `snapshot` in `format`.
pub fn convert(
    snapshot: &ScheduleSnapshot,
    format: ExportFormat,
) -> Result<ExportedArtifact, ConvertError> {
    let bytes = match format {
        ExportFormat::Calendar => ics::render(snapshot)?.into_bytes(),
        ExportFormat::Json => json::render(snapshot)?,
    };

    Ok(ExportedArtifact {
        content_type: format.content_type(),
        file_name: format!(
            "schedule-{}-{}.{}",
            snapshot.user_id,
            snapshot.term_id,
            format.extension()
        ),
        bytes,
    })
}
