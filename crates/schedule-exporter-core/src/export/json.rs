//! Structured JSON rendering.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::periods::period_times;
use super::ConvertError;
use crate::models::{CourseSession, ScheduleSnapshot};

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ScheduleDocument {
    pub user_id: String,
    pub term: String,
    pub fetched_at: DateTime<Utc>,
    pub term_start: Option<NaiveDate>,
    pub classes: Vec<ClassEntry>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ClassEntry {
    pub name: String,
    pub course_id: Option<String>,
    pub class_id: Option<String>,
    /// 1 = Monday .. 7 = Sunday
    pub day: u8,
    pub weeks: Vec<u8>,
    /// First and last period, inclusive.
    pub periods: [u8; 2],
    /// Clock time of the first period start and last period end, `HH:MM`.
    pub time: [String; 2],
    pub location: Option<String>,
    pub teachers: Option<String>,
}

impl ClassEntry {
    fn from_session(session: &CourseSession) -> Result<Self, ConvertError> {
        let (start, end) = period_times(session.period_range)?;
        Ok(Self {
            name: session.course_name.clone(),
            course_id: session.course_id.clone(),
            class_id: session.class_id.clone(),
            day: session.weekday.number_from_monday() as u8,
            weeks: session.week_mask.weeks().collect(),
            periods: [session.period_range.start, session.period_range.end],
            time: [start.format("%H:%M").to_string(), end.format("%H:%M").to_string()],
            location: session.location.clone(),
            teachers: session.instructor.clone(),
        })
    }
}

impl ScheduleDocument {
    pub fn from_snapshot(snapshot: &ScheduleSnapshot) -> Result<Self, ConvertError> {
        Ok(Self {
            user_id: snapshot.user_id.clone(),
            term: snapshot.term_id.to_string(),
            fetched_at: snapshot.fetched_at,
            term_start: snapshot.term_start,
            classes: snapshot
                .sessions
                .iter()
                .map(ClassEntry::from_session)
                .collect::<Result<_, _>>()?,
        })
    }
}

pub fn render(snapshot: &ScheduleSnapshot) -> Result<Vec<u8>, ConvertError> {
    let document = ScheduleDocument::from_snapshot(snapshot)?;
    serde_json::to_vec_pretty(&document).map_err(|e| ConvertError::Serialize(e.to_string()))
}
