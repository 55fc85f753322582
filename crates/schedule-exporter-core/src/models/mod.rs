//! Data models for terms, course sessions and schedule snapshots.
//!
//! - `TermId`: validated `YYYY-N` academic term identifier
//! - `CourseSession`, `WeekMask`, `PeriodRange`: one recurring class meeting
//! - `RawScheduleData`: schedule payload as the portal returns it
//! - `ScheduleSnapshot`: normalized, timestamped schedule for one user and term

pub mod course;
pub mod snapshot;
pub mod term;

pub use course::{CourseSession, PeriodRange, WeekMask, MAX_WEEK};
pub use snapshot::{RawCourse, RawScheduleData, ScheduleSnapshot};
pub use term::{Semester, TermId, MAX_YEAR, MIN_YEAR};
