use chrono::Weekday;
use serde::{Deserialize, Serialize};

/// Highest teaching week a [`WeekMask`] can hold.
pub const MAX_WEEK: u8 = 64;

/// Set of teaching weeks; bit `i` is week `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekMask(u64);

impl WeekMask {
    /// Build a mask from 1-based week numbers. Returns the first offending
    /// week when one is outside `1..=MAX_WEEK`.
    pub fn from_weeks<I: IntoIterator<Item = u8>>(weeks: I) -> Result<Self, u8> {
        let mut bits = 0u64;
        for week in weeks {
            if week == 0 || week > MAX_WEEK {
                return Err(week);
            }
            bits |= 1u64 << (week - 1);
        }
        Ok(Self(bits))
    }

    pub fn contains(&self, week: u8) -> bool {
        (1..=MAX_WEEK).contains(&week) && self.0 & (1u64 << (week - 1)) != 0
    }

    /// Weeks in ascending order.
    pub fn weeks(&self) -> impl Iterator<Item = u8> + '_ {
        (1..=MAX_WEEK).filter(move |w| self.contains(*w))
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn bits(&self) -> u64 {
        self.0
    }
}

/// Inclusive, 1-based range of class periods within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodRange {
    pub start: u8,
    pub end: u8,
}

impl PeriodRange {
    pub fn new(start: u8, end: u8) -> Option<Self> {
        (start >= 1 && start <= end).then_some(Self { start, end })
    }
}

/// One recurring class meeting within a term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSession {
    pub course_name: String,
    pub course_id: Option<String>,
    pub class_id: Option<String>,
    pub weekday: Weekday,
    pub period_range: PeriodRange,
    pub week_mask: WeekMask,
    pub location: Option<String>,
    pub instructor: Option<String>,
}
