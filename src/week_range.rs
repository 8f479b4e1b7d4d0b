// src/week_range.rs

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::WorkdayError;

// "Nov 24 - 30, 2025"
static SAME_MONTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]+)\s+(\d{1,2})\s*-\s*(\d{1,2}),\s*(\d{4})").expect("valid regex")
});
// "Dec 30, 2024 - Jan 5, 2025"
static EXPLICIT_YEARS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]+)\s+(\d{1,2}),\s*(\d{4})\s*-\s*([A-Za-z]+)\s+(\d{1,2}),\s*(\d{4})")
        .expect("valid regex")
});
// "Dec 30 - Jan 5, 2025"
static CROSS_MONTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]+)\s+(\d{1,2})\s*-\s*([A-Za-z]+)\s+(\d{1,2}),\s*(\d{4})")
        .expect("valid regex")
});

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_lowercase();
    let month = match prefix.as_str() {
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

fn ymd(year: &str, month: u32, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?)
}

fn try_parse(text: &str) -> Option<(NaiveDate, NaiveDate)> {
    if let Some(c) = SAME_MONTH_RE.captures(text) {
        let month = month_number(&c[1])?;
        return Some((ymd(&c[4], month, &c[2])?, ymd(&c[4], month, &c[3])?));
    }

    if let Some(c) = EXPLICIT_YEARS_RE.captures(text) {
        let start = ymd(&c[3], month_number(&c[1])?, &c[2])?;
        let end = ymd(&c[6], month_number(&c[4])?, &c[5])?;
        return Some((start, end));
    }

    if let Some(c) = CROSS_MONTH_RE.captures(text) {
        let start_month = month_number(&c[1])?;
        let end_month = month_number(&c[3])?;
        let end_year: i32 = c[5].parse().ok()?;
        // Dec -> Jan means the week started in the previous year
        let start_year = if start_month <= end_month {
            end_year
        } else {
            end_year - 1
        };
        let start = NaiveDate::from_ymd_opt(start_year, start_month, c[2].parse().ok()?)?;
        let end = NaiveDate::from_ymd_opt(end_year, end_month, c[4].parse().ok()?)?;
        return Some((start, end));
    }

    None
}

/// Parses the calendar's week heading into `(week_start, week_end)`.
pub fn parse_week_range(text: &str) -> Result<(NaiveDate, NaiveDate), WorkdayError> {
    let normalized = text.replace(['\u{2013}', '\u{2014}'], "-");
    let normalized = normalized.trim();
    try_parse(normalized)
        .ok_or_else(|| WorkdayError::Navigation(format!("Could not parse week range: {}", text)))
}
