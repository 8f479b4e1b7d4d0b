// src/timing.rs

use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::history::{HistoryError, HistoryStore};

/// Salaries must be paid before this day of the following month, so days
/// 1..=10 still belong to the previous month's report.
pub const PAYMENT_DEADLINE_DAY: u32 = 10;
/// Day of the preceding month the change-tracking window starts on when no
/// history exists yet.
pub const DEFAULT_DID_START_DAY: u32 = 25;

static MONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{1,2})$").expect("valid month regex"));

#[derive(Error, Debug)]
pub enum TimingError {
    #[error("Invalid month format '{0}'. Expected YYYY-MM, 'current', or 'last'")]
    InvalidMonthFormat(String),

    #[error("Invalid {label} range: start {start} is after end {end}")]
    InvertedRange {
        label: &'static str,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("Failed to read report history")]
    History(#[from] HistoryError),
}

// --- Year/Month Value ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // Constructor guarantees the first of the month exists
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day() - Duration::days(1)
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Given day of this month, clamped to the month's last day.
    pub fn day_or_last(&self, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, day).unwrap_or_else(|| self.last_day())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = TimingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TimingError::InvalidMonthFormat(s.to_string());
        let caps = MONTH_RE.captures(s.trim()).ok_or_else(invalid)?;
        let year: i32 = caps[1].parse().map_err(|_| invalid())?;
        let month: u32 = caps[2].parse().map_err(|_| invalid())?;
        YearMonth::new(year, month).ok_or_else(invalid)
    }
}

// --- Report Date Ranges ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDateRanges {
    pub workday_start: NaiveDate,
    pub workday_end: NaiveDate,
    pub did_start: NaiveDate,
    pub did_end: NaiveDate,
}

/// Explicit dates that replace the computed defaults, each independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRangeOverrides {
    pub workday_start: Option<NaiveDate>,
    pub workday_end: Option<NaiveDate>,
    pub did_start: Option<NaiveDate>,
    pub did_end: Option<NaiveDate>,
}

// --- Resolution Rules ---

pub fn is_finalization_window(today: NaiveDate) -> bool {
    today.day() <= PAYMENT_DEADLINE_DAY
}

/// Resolves `None`, `"current"`, `"last"` or `"YYYY-MM"` to a concrete month.
pub fn resolve_month_spec(spec: Option<&str>, today: NaiveDate) -> Result<YearMonth, TimingError> {
    let current = YearMonth::of(today);
    let resolved = match spec.map(str::trim) {
        None => {
            if is_finalization_window(today) {
                current.previous()
            } else {
                current
            }
        }
        Some("current") => current,
        Some("last") => current.previous(),
        Some(other) => other.parse()?,
    };
    debug!("Resolved month spec {:?} to {}", spec, resolved);
    Ok(resolved)
}

/// Always the whole calendar month, hours are filed ahead of time.
pub fn get_workday_range(month: YearMonth) -> (NaiveDate, NaiveDate) {
    (month.first_day(), month.last_day())
}

pub fn get_did_range(
    month: YearMonth,
    today: NaiveDate,
    last_report_date: Option<NaiveDate>,
) -> (NaiveDate, NaiveDate) {
    if is_finalization_window(today) {
        return get_workday_range(month);
    }

    let start = match last_report_date {
        Some(last) => last + Duration::days(1),
        None => month.previous().day_or_last(DEFAULT_DID_START_DAY),
    };
    (start, today)
}

pub fn resolve_date_ranges(
    spec: Option<&str>,
    today: NaiveDate,
    last_report_date: Option<NaiveDate>,
    overrides: DateRangeOverrides,
) -> Result<ReportDateRanges, TimingError> {
    let month = resolve_month_spec(spec, today)?;
    let (workday_start, workday_end) = get_workday_range(month);
    let (did_start, did_end) = get_did_range(month, today, last_report_date);

    let ranges = ReportDateRanges {
        workday_start: overrides.workday_start.unwrap_or(workday_start),
        workday_end: overrides.workday_end.unwrap_or(workday_end),
        did_start: overrides.did_start.unwrap_or(did_start),
        did_end: overrides.did_end.unwrap_or(did_end),
    };

    check_range("workday", ranges.workday_start, ranges.workday_end)?;
    check_range("did", ranges.did_start, ranges.did_end)?;

    info!(
        "Report {}: workday {}..{}, did {}..{}",
        month, ranges.workday_start, ranges.workday_end, ranges.did_start, ranges.did_end
    );
    Ok(ranges)
}

fn check_range(label: &'static str, start: NaiveDate, end: NaiveDate) -> Result<(), TimingError> {
    if start > end {
        return Err(TimingError::InvertedRange { label, start, end });
    }
    Ok(())
}

// --- Resolver With Injected Clock And History ---

#[derive(Clone)]
pub struct DateRangeResolver {
    clock: Arc<dyn Clock>,
    history: Arc<dyn HistoryStore>,
}

impl DateRangeResolver {
    pub fn new(clock: Arc<dyn Clock>, history: Arc<dyn HistoryStore>) -> Self {
        Self { clock, history }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn resolve_month_spec(&self, spec: Option<&str>) -> Result<YearMonth, TimingError> {
        resolve_month_spec(spec, self.clock.today())
    }

    pub fn get_did_range(&self, month: YearMonth) -> Result<(NaiveDate, NaiveDate), TimingError> {
        let today = self.clock.today();
        // History only matters outside the finalization window
        let last = if is_finalization_window(today) {
            None
        } else {
            self.history.last_report_date()?
        };
        Ok(get_did_range(month, today, last))
    }

    pub fn is_finalization_window(&self) -> bool {
        is_finalization_window(self.clock.today())
    }

    pub fn resolve_date_ranges(
        &self,
        spec: Option<&str>,
        overrides: DateRangeOverrides,
    ) -> Result<ReportDateRanges, TimingError> {
        let today = self.clock.today();
        let last = if is_finalization_window(today) {
            None
        } else {
            self.history.last_report_date()?
        };
        resolve_date_ranges(spec, today, last, overrides)
    }
}
