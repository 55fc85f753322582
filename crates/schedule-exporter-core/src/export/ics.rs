//! iCalendar (RFC 5545) rendering.
//!
//! Each course session becomes one `VEVENT` per teaching week. Times are local
//! to the campus and tagged with a fixed `VTIMEZONE` for Asia/Shanghai, which
//! has had no daylight saving since 1991.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use super::periods::period_times;
use super::ConvertError;
use crate::models::{CourseSession, ScheduleSnapshot};

const PRODID: &str = "-//Schedule Exporter//Class Schedule//EN";
const TZID: &str = "Asia/Shanghai";

/// Maximum content line length in octets, excluding the CRLF.
const FOLD_LIMIT: usize = 75;

const VTIMEZONE: &[&str] = &[
    "BEGIN:VTIMEZONE",
    "TZID:Asia/Shanghai",
    "BEGIN:STANDARD",
    "DTSTART:19700101T000000",
    "TZOFFSETFROM:+0800",
    "TZOFFSETTO:+0800",
    "TZNAME:CST",
    "END:STANDARD",
    "END:VTIMEZONE",
];

/// Escape a TEXT property value.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

/// Fold a content line into CRLF-terminated chunks of at most 75 octets.
/// Continuation lines start with a single space, which counts toward the limit.
/// Never splits a UTF-8 sequence.
pub fn fold_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + 8);
    let mut width = 0;

    for c in line.chars() {
        let len = c.len_utf8();
        if width + len > FOLD_LIMIT {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(c);
        width += len;
    }
    out.push_str("\r\n");
    out
}

fn format_local(dt: NaiveDateTime) -> String {
    dt.format("%Y%m%dT%H%M%S").to_string()
}

/// Calendar date of `session` in teaching week `week`.
fn class_date(
    term_start: NaiveDate,
    session: &CourseSession,
    week: u8,
) -> Result<NaiveDate, ConvertError> {
    term_start
        .checked_add_signed(Duration::weeks(i64::from(week) - 1))
        .and_then(|d| {
            d.checked_add_signed(Duration::days(i64::from(session.weekday.num_days_from_monday())))
        })
        .ok_or(ConvertError::DateOutOfRange(term_start))
}

struct Writer {
    buf: String,
}

impl Writer {
    fn line(&mut self, line: &str) {
        self.buf.push_str(&fold_line(line));
    }

    fn prop(&mut self, name: &str, value: &str) {
        self.line(&format!("{}:{}", name, value));
    }
}

pub fn render(snapshot: &ScheduleSnapshot) -> Result<String, ConvertError> {
    let term_start = snapshot.term_start.ok_or(ConvertError::MissingTermStart)?;
    // Anchor week 1 on its Monday even if the portal reports another weekday.
    let term_start = term_start
        .checked_sub_signed(Duration::days(i64::from(term_start.weekday().num_days_from_monday())))
        .ok_or(ConvertError::DateOutOfRange(term_start))?;

    let stamp = snapshot.fetched_at.format("%Y%m%dT%H%M%SZ").to_string();
    let mut w = Writer { buf: String::new() };

    w.line("BEGIN:VCALENDAR");
    w.prop("VERSION", "2.0");
    w.prop("PRODID", PRODID);
    w.prop("CALSCALE", "GREGORIAN");
    w.prop("METHOD", "PUBLISH");
    w.prop(
        "X-WR-CALNAME",
        &escape_text(&format!("{} ({})", snapshot.term_id.display_name(), snapshot.user_id)),
    );
    w.prop("X-WR-TIMEZONE", TZID);
    for line in VTIMEZONE {
        w.line(line);
    }

    for (index, session) in snapshot.sessions.iter().enumerate() {
        let (start, end) = period_times(session.period_range)?;

        for week in session.week_mask.weeks() {
            let date = class_date(term_start, session, week)?;

            w.line("BEGIN:VEVENT");
            w.prop(
                "UID",
                &format!(
                    "{}-{}-{}-{}@schedule-exporter",
                    snapshot.user_id, snapshot.term_id, index, week
                ),
            );
            w.prop("DTSTAMP", &stamp);
            w.prop(&format!("DTSTART;TZID={}", TZID), &format_local(date.and_time(start)));
            w.prop(&format!("DTEND;TZID={}", TZID), &format_local(date.and_time(end)));
            w.prop("SUMMARY", &escape_text(&session.course_name));
            if let Some(location) = &session.location {
                w.prop("LOCATION", &escape_text(location));
            }
            if let Some(instructor) = &session.instructor {
                w.prop("DESCRIPTION", &escape_text(&format!("Instructor: {}", instructor)));
            }
            w.line("END:VEVENT");
        }
    }

    w.line("END:VCALENDAR");
    Ok(w.buf)
}
