use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// Earliest academic year accepted in a term identifier.
pub const MIN_YEAR: u16 = 1990;

/// Latest academic year accepted in a term identifier.
pub const MAX_YEAR: u16 = 2100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Semester {
    Autumn = 1,
    Spring = 2,
    Summer = 3,
}

impl Semester {
    fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Semester::Autumn),
            2 => Some(Semester::Spring),
            3 => Some(Semester::Summer),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Semester::Autumn => "Autumn",
            Semester::Spring => "Spring",
            Semester::Summer => "Summer",
        }
    }
}

/// An academic term: the year the academic year starts in, plus the semester.
///
/// Textual form is `YYYY-N`, e.g. `2024-1` for the autumn semester of
/// 2024-2025 and `2024-2` for the spring semester that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TermId {
    year: u16,
    semester: Semester,
}

impl TermId {
    pub fn new(year: u16, semester: Semester) -> Result<Self, ScheduleError> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(ScheduleError::Validation(format!(
                "term year {} outside {}..={}",
                year, MIN_YEAR, MAX_YEAR
            )));
        }
        Ok(Self { year, semester })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn semester(&self) -> Semester {
        self.semester
    }

    /// Human-friendly label such as "2024-2025 Autumn".
    pub fn display_name(&self) -> String {
        format!("{}-{} {}", self.year, self.year + 1, self.semester.display_name())
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.semester.number())
    }
}

impl FromStr for TermId {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::Validation(format!("malformed term identifier: {:?}", s));

        let (year, semester) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || semester.len() != 1 {
            return Err(invalid());
        }
        let year: u16 = year.parse().map_err(|_| invalid())?;
        let semester = semester
            .parse::<u8>()
            .ok()
            .and_then(Semester::from_number)
            .ok_or_else(invalid)?;
        TermId::new(year, semester)
    }
}

impl TryFrom<String> for TermId {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TermId> for String {
    fn from(term: TermId) -> Self {
        term.to_string()
    }
}
