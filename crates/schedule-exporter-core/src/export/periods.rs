//! Clock times of the teaching periods in a day.

use chrono::NaiveTime;

use super::ConvertError;
use crate::models::PeriodRange;

/// (start, end) of each period in minutes after midnight, period 1 first.
const LESSON_TIMES: [(u32, u32); 14] = [
    (8 * 60, 8 * 60 + 45),
    (8 * 60 + 55, 9 * 60 + 40),
    (10 * 60, 10 * 60 + 45),
    (10 * 60 + 55, 11 * 60 + 40),
    (12 * 60, 12 * 60 + 45),
    (12 * 60 + 55, 13 * 60 + 40),
    (14 * 60, 14 * 60 + 45),
    (14 * 60 + 55, 15 * 60 + 40),
    (16 * 60, 16 * 60 + 45),
    (16 * 60 + 55, 17 * 60 + 40),
    (18 * 60, 18 * 60 + 45),
    (18 * 60 + 55, 19 * 60 + 40),
    (19 * 60 + 55, 20 * 60 + 40),
    (20 * 60 + 55, 21 * 60 + 40),
];

pub const PERIODS_PER_DAY: u8 = LESSON_TIMES.len() as u8;

fn minutes_to_time(minutes: u32) -> Option<NaiveTime> {
    NaiveTime::from_num_seconds_from_midnight_opt(minutes * 60, 0)
}

/// Start of the first period and end of the last one.
pub fn period_times(range: PeriodRange) -> Result<(NaiveTime, NaiveTime), ConvertError> {
    let lookup = |period: u8| {
        (period as usize)
            .checked_sub(1)
            .and_then(|i| LESSON_TIMES.get(i))
            .ok_or(ConvertError::InvalidPeriod(period))
    };
    let (start, _) = lookup(range.start)?;
    let (_, end) = lookup(range.end)?;

    match (minutes_to_time(*start), minutes_to_time(*end)) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(ConvertError::InvalidPeriod(range.start)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_single_and_multi_period_times() {
        assert_eq!(
            period_times(PeriodRange { start: 1, end: 1 }).unwrap(),
            (hm(8, 0), hm(8, 45))
        );
        assert_eq!(
            period_times(PeriodRange { start: 3, end: 4 }).unwrap(),
            (hm(10, 0), hm(11, 40))
        );
        assert_eq!(
            period_times(PeriodRange { start: 13, end: 14 }).unwrap(),
            (hm(19, 55), hm(21, 40))
        );
    }

    #[test]
    fn test_out_of_range_period() {
        assert_eq!(
            period_times(PeriodRange { start: 12, end: 15 }),
            Err(ConvertError::InvalidPeriod(15))
        );
        assert_eq!(PERIODS_PER_DAY, 14);
    }
}
