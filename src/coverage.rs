// src/coverage.rs

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::calendar::CalendarEntry;

// --- Workday Iteration ---

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Ascending Monday..Friday dates of an inclusive range. Cloning restarts it.
#[derive(Debug, Clone)]
pub struct Workdays {
    next: NaiveDate,
    end: NaiveDate,
}

impl Iterator for Workdays {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        while self.next <= self.end {
            let current = self.next;
            self.next = current + Duration::days(1);
            if is_weekday(current) {
                return Some(current);
            }
        }
        None
    }
}

pub fn get_workdays_in_range(start: NaiveDate, end: NaiveDate) -> Workdays {
    Workdays { next: start, end }
}

/// Mon-Fri days in `[start, end]`; public holidays are not subtracted.
pub fn calculate_working_days(start: NaiveDate, end: NaiveDate) -> u32 {
    get_workdays_in_range(start, end).count() as u32
}

// --- Coverage Check ---

/// Workdays in `[start, end]` with no entry of any type.
pub fn validate_workday_coverage(
    entries: &[CalendarEntry],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<NaiveDate> {
    let covered: HashSet<NaiveDate> = entries
        .iter()
        .map(|e| e.entry_date)
        .filter(|d| start <= *d && *d <= end)
        .collect();

    get_workdays_in_range(start, end)
        .filter(|d| !covered.contains(d))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageReport {
    pub missing: Vec<NaiveDate>,
    pub validated: bool,
}

impl CoverageReport {
    pub fn check(entries: &[CalendarEntry], start: NaiveDate, end: NaiveDate) -> Self {
        let missing = validate_workday_coverage(entries, start, end);
        if missing.is_empty() {
            info!("All workdays between {} and {} have entries", start, end);
        } else {
            warn!(
                "Missing Workday entries for {} days between {} and {}",
                missing.len(),
                start,
                end
            );
        }
        Self {
            validated: missing.is_empty(),
            missing,
        }
    }
}
