use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::{CourseSession, PeriodRange, TermId, WeekMask};
use crate::api::RemoteError;

/// Schedule payload as returned by the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawScheduleData {
    /// Monday of teaching week 1, when the portal reports it.
    #[serde(default)]
    pub term_start: Option<NaiveDate>,
    #[serde(default)]
    pub courses: Vec<RawCourse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCourse {
    pub name: String,
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub class_id: Option<String>,
    /// 1 = Monday .. 7 = Sunday
    pub day: u8,
    /// Periods the class occupies; only the first and last matter.
    pub periods: Vec<u8>,
    pub weeks: Vec<u8>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub teachers: Vec<String>,
}

impl RawCourse {
    fn weekday(&self) -> Option<Weekday> {
        match self.day {
            1 => Some(Weekday::Mon),
            2 => Some(Weekday::Tue),
            3 => Some(Weekday::Wed),
            4 => Some(Weekday::Thu),
            5 => Some(Weekday::Fri),
            6 => Some(Weekday::Sat),
            7 => Some(Weekday::Sun),
            _ => None,
        }
    }

    fn into_session(self) -> Result<CourseSession, RemoteError> {
        let invalid = |what: String| {
            RemoteError::InvalidResponse(format!("course {:?}: {}", self.name, what))
        };

        let weekday = self
            .weekday()
            .ok_or_else(|| invalid(format!("invalid day {}", self.day)))?;
        let period_range = match (self.periods.first(), self.periods.last()) {
            (Some(&start), Some(&end)) => PeriodRange::new(start, end),
            _ => None,
        }
        .ok_or_else(|| invalid(format!("invalid periods {:?}", self.periods)))?;
        let week_mask = WeekMask::from_weeks(self.weeks.iter().copied())
            .map_err(|week| invalid(format!("invalid week {}", week)))?;

        let teachers: Vec<&str> = self
            .teachers
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        let instructor = (!teachers.is_empty()).then(|| teachers.join(", "));

        Ok(CourseSession {
            course_name: self.name,
            course_id: self.course_id,
            class_id: self.class_id,
            weekday,
            period_range,
            week_mask,
            location: self.location.filter(|l| !l.trim().is_empty()),
            instructor,
        })
    }
}

/// Immutable copy of one user's schedule for one term, as of `fetched_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub user_id: String,
    pub term_id: TermId,
    pub fetched_at: DateTime<Utc>,
    pub term_start: Option<NaiveDate>,
    /// In the order the portal listed them.
    pub sessions: Vec<CourseSession>,
}

impl ScheduleSnapshot {
    /// Validate and normalize raw portal data.
    pub fn from_raw(
        user_id: &str,
        term_id: TermId,
        fetched_at: DateTime<Utc>,
        raw: RawScheduleData,
    ) -> Result<Self, RemoteError> {
        let sessions = raw
            .courses
            .into_iter()
            .map(RawCourse::into_session)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            user_id: user_id.to_string(),
            term_id,
            fetched_at,
            term_start: raw.term_start,
            sessions,
        })
    }
}
