//! Best-effort deadline extraction from cheap message fields
//!
//! Dates are only taken when they follow a deadline cue ("due", "by",
//! "expires", ...) so that dates merely mentioned in passing are ignored.
//! Relative phrases resolve against the message timestamp, never the clock,
//! so the same message always yields the same deadline.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// How far after a cue a date may start
const CUE_WINDOW_CHARS: usize = 48;

static CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        concat!(
            r"(?i)\b(due|deadline|by|before|until|till|expires?|expiring|expiry",
            r"|no later than|ends?|closes?|last day)\b",
        ),
    )
    .expect("valid cue regex")
});

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("valid iso regex"));

static SLASH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{4}|\d{2}))?\b").expect("valid slash regex")
});

static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        concat!(
            r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?",
            r"\s+(\d{1,2})(?:st|nd|rd|th)?\b(?:,?\s+(\d{4}))?",
        ),
    )
    .expect("valid month-day regex")
});

static DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        concat!(
            r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(?:of\s+)?",
            r"(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?(?:,?\s+(\d{4}))?",
        ),
    )
    .expect("valid day-month regex")
});

static CJK_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(\d{4})年)?(\d{1,2})月(\d{1,2})日").expect("valid cjk regex")
});

static CJK_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(締切|締め切り|期限|まで|截止)").expect("valid cjk cue regex")
});

static RELATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        concat!(
            r"(?i)^\W*(?:the\s+)?(?:end\s+of\s+)?",
            r"(today|tonight|tomorrow|monday|tuesday|wednesday|thursday|friday|saturday|sunday",
            r"|mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun)\b",
        ),
    )
    .expect("valid relative regex")
});

/// Extract a deadline from subject, snippet and an expiry header
pub fn extract_deadline(
    subject: &str,
    snippet: &str,
    expires_header: Option<&str>,
    received_at: DateTime<Utc>,
) -> Option<NaiveDate> {
    if let Some(date) = expires_header.and_then(parse_header_date) {
        return Some(date);
    }

    let reference = received_at.date_naive();
    [subject, snippet]
        .into_iter()
        .find_map(|text| find_in_text(text, reference))
}

fn parse_header_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc).date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
}

fn find_in_text(text: &str, reference: NaiveDate) -> Option<NaiveDate> {
    for cue in CUE.find_iter(text) {
        let window: String = text[cue.end()..].chars().take(CUE_WINDOW_CHARS).collect();
        if let Some(date) =
            parse_relative(&window, reference).or_else(|| parse_absolute(&window, reference))
        {
            return Some(date);
        }
    }

    // CJK cue words usually follow the date ("3月15日まで")
    if CJK_CUE.is_match(text) {
        return CJK_DATE
            .captures(text)
            .and_then(|caps| cjk_date(&caps, reference));
    }

    None
}

/// A date right at the start of the window, expressed relative to `reference`
fn parse_relative(window: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let word = RELATIVE.captures(window)?.get(1)?.as_str().to_lowercase();
    match word.as_str() {
        "today" | "tonight" => Some(reference),
        "tomorrow" => reference.checked_add_signed(Duration::days(1)),
        weekday => {
            let target: Weekday = weekday.parse().ok()?;
            let ahead = (7 + target.num_days_from_monday() as i64
                - reference.weekday().num_days_from_monday() as i64)
                % 7;
            reference.checked_add_signed(Duration::days(ahead))
        }
    }
}

/// The earliest absolute date appearing in the window
fn parse_absolute(window: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let candidates = [
        ISO_DATE.captures(window).map(|c| (c.get(0).map_or(0, |m| m.start()), iso_date(&c))),
        MONTH_DAY
            .captures(window)
            .map(|c| (c.get(0).map_or(0, |m| m.start()), month_day(&c, reference))),
        DAY_MONTH
            .captures(window)
            .map(|c| (c.get(0).map_or(0, |m| m.start()), day_month(&c, reference))),
        SLASH_DATE
            .captures(window)
            .map(|c| (c.get(0).map_or(0, |m| m.start()), slash_date(&c, reference))),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(|(start, date)| date.map(|d| (start, d)))
        .min_by_key(|(start, _)| *start)
        .map(|(_, date)| date)
}

fn number(caps: &Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index)?.as_str().parse().ok()
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Resolve a date without a year to its next occurrence on or after `reference`
fn with_inferred_year(
    year: Option<i32>,
    month: u32,
    day: u32,
    reference: NaiveDate,
) -> Option<NaiveDate> {
    if let Some(year) = year {
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    let this_year = NaiveDate::from_ymd_opt(reference.year(), month, day)?;
    if this_year >= reference {
        Some(this_year)
    } else {
        NaiveDate::from_ymd_opt(reference.year() + 1, month, day)
    }
}

fn iso_date(caps: &Captures<'_>) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(number(caps, 1)? as i32, number(caps, 2)?, number(caps, 3)?)
}

fn month_day(caps: &Captures<'_>, reference: NaiveDate) -> Option<NaiveDate> {
    let month = month_number(caps.get(1)?.as_str())?;
    let year = number(caps, 3).map(|y| y as i32);
    with_inferred_year(year, month, number(caps, 2)?, reference)
}

fn day_month(caps: &Captures<'_>, reference: NaiveDate) -> Option<NaiveDate> {
    let month = month_number(caps.get(2)?.as_str())?;
    let year = number(caps, 3).map(|y| y as i32);
    with_inferred_year(year, month, number(caps, 1)?, reference)
}

/// Slash dates are read month first
fn slash_date(caps: &Captures<'_>, reference: NaiveDate) -> Option<NaiveDate> {
    let year = number(caps, 3).map(|y| if y < 100 { 2000 + y as i32 } else { y as i32 });
    with_inferred_year(year, number(caps, 1)?, number(caps, 2)?, reference)
}

fn cjk_date(caps: &Captures<'_>, reference: NaiveDate) -> Option<NaiveDate> {
    let year = number(caps, 1).map(|y| y as i32);
    with_inferred_year(year, number(caps, 2)?, number(caps, 3)?, reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Wednesday
    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_iso_date_after_cue() {
        let found = extract_deadline("Report due 2024-03-15", "", None, received());
        assert_eq!(found, date(2024, 3, 15));
    }

    #[test]
    fn test_month_name_without_year() {
        let found = extract_deadline("", "Please RSVP by March 20th.", None, received());
        assert_eq!(found, date(2024, 3, 20));

        // Already past this year, so next year
        let found = extract_deadline("", "Renewal expires Jan 5", None, received());
        assert_eq!(found, date(2025, 1, 5));
    }

    #[test]
    fn test_day_month_order() {
        let found = extract_deadline("Submit before 12 April 2024", "", None, received());
        assert_eq!(found, date(2024, 4, 12));
    }

    #[test]
    fn test_relative_words() {
        assert_eq!(
            extract_deadline("Need this by tomorrow", "", None, received()),
            date(2024, 3, 7)
        );
        assert_eq!(
            extract_deadline("", "Send it by Friday please", None, received()),
            date(2024, 3, 8)
        );
        assert_eq!(
            extract_deadline("", "due today", None, received()),
            date(2024, 3, 6)
        );
    }

    #[test]
    fn test_expires_header_wins() {
        let found = extract_deadline(
            "Offer ends 2024-12-01",
            "",
            Some("Fri, 1 Mar 2024 00:00:00 +0000"),
            received(),
        );
        assert_eq!(found, date(2024, 3, 1));
    }

    #[test]
    fn test_cjk_date() {
        let found = extract_deadline("提出期限は3月15日まで", "", None, received());
        assert_eq!(found, date(2024, 3, 15));
    }

    #[test]
    fn test_dates_without_cue_are_ignored() {
        assert_eq!(extract_deadline("Notes from 2024-03-01", "", None, received()), None);
        assert_eq!(extract_deadline("Budget 2024", "Q1 numbers attached", None, received()), None);
    }

    #[test]
    fn test_invalid_dates_yield_none() {
        assert_eq!(extract_deadline("due 2024-13-45", "", None, received()), None);
    }
}
