// src/calendar.rs

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::timing::YearMonth;

// --- Entry Types & Titles ---

pub const ENTRY_TYPE_TIME_TRACKING: &str = "Time Tracking";
pub const ENTRY_TYPE_TIME_OFF: &str = "Time Off";
pub const ENTRY_TYPE_HOLIDAY: &str = "Holiday Calendar Entry Type";

/// "Time Tracking" titles that carry the payable hours of an absence.
pub const PAID_ABSENCE_TITLES: &[&str] = &["Paid Holiday", "Paid Time Off in Hours"];

pub const HOURS_PER_DAY: f64 = 8.0;

const CALENDAR_ENTRY_WIDGET: &str = "calendarEntry";

static UTC_OFFSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[+-]\d{2}:\d{2}$").expect("valid offset regex"));

// --- Calendar Entry ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub entry_date: NaiveDate,
    pub title: String,
    /// Open set of category tags, e.g. "Time Tracking" or "Time Off".
    pub entry_type: String,
    pub hours: f64,
}

impl CalendarEntry {
    fn dedup_key(&self) -> (NaiveDate, String, String) {
        (self.entry_date, self.title.clone(), self.entry_type.clone())
    }
}

// Reasons a record is skipped, only ever logged
enum ParseFailure {
    MissingDate,
    BadDate(String),
    BadQuantity(Value),
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseFailure::MissingDate => write!(f, "missing date"),
            ParseFailure::BadDate(raw) => write!(f, "unparseable date {:?}", raw),
            ParseFailure::BadQuantity(raw) => write!(f, "unparseable quantity {}", raw),
        }
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn parse_quantity(entry: &Value) -> Result<f64, ParseFailure> {
    match entry.pointer("/quantity/value") {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ParseFailure::BadQuantity(Value::Number(n.clone()))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ParseFailure::BadQuantity(Value::String(s.clone()))),
        Some(other) => Err(ParseFailure::BadQuantity(other.clone())),
    }
}

/// Leading number of a label such as "8 Hours", only when it mentions hours.
fn hours_from_label(label: &str) -> Option<f64> {
    if !label.contains("Hour") {
        return None;
    }
    label
        .split_whitespace()
        .next()?
        .parse()
        .ok()
        .filter(|h: &f64| h.is_finite() && *h >= 0.0)
}

fn try_parse_entry(entry: &Value) -> Result<CalendarEntry, ParseFailure> {
    let raw_date = str_at(entry, "/date/value/V")
        .filter(|s| !s.is_empty())
        .ok_or(ParseFailure::MissingDate)?;
    let date_only = UTC_OFFSET_RE.replace(raw_date, "");
    let entry_date = NaiveDate::parse_from_str(&date_only, "%Y-%m-%d")
        .map_err(|_| ParseFailure::BadDate(raw_date.to_string()))?;

    let title = str_at(entry, "/title/value").unwrap_or_default().to_string();
    let entry_type = str_at(entry, "/type/instances/0/text")
        .unwrap_or_default()
        .to_string();

    let quantity = parse_quantity(entry)?;

    let hours = if entry_type == ENTRY_TYPE_TIME_OFF {
        // Time Off quantity counts days
        let subtitle = str_at(entry, "/subtitle1/value").unwrap_or_default();
        if subtitle.contains("Hour") {
            hours_from_label(subtitle).unwrap_or(if quantity > 0.0 {
                quantity * HOURS_PER_DAY
            } else {
                0.0
            })
        } else if quantity > 0.0 {
            quantity * HOURS_PER_DAY
        } else {
            0.0
        }
    } else if quantity > 0.0 {
        quantity
    } else {
        str_at(entry, "/subtitle2/value")
            .and_then(hours_from_label)
            .unwrap_or(0.0)
    };

    Ok(CalendarEntry {
        entry_date,
        title,
        entry_type,
        hours,
    })
}

/// Parses one raw `calendarEntry` widget; malformed records yield `None`.
pub fn parse_calendar_entry(entry: &Value) -> Option<CalendarEntry> {
    match try_parse_entry(entry) {
        Ok(parsed) => Some(parsed),
        Err(reason) => {
            debug!("Skipping calendar entry ({}): {}", reason, entry);
            None
        }
    }
}

// --- Aggregates ---

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MonthlyHours {
    pub working_hours: f64,
    pub time_off_hours: f64,
    pub total_hours: f64,
}

/// Final hour figures handed to the report. Not cross-checked against
/// `working_days * 8`, manual input may legitimately disagree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkHours {
    pub working_days: u32,
    pub absence_days: u32,
    pub total_hours: f64,
    #[serde(default)]
    pub calendar_entries: Vec<CalendarEntry>,
}

impl WorkHours {
    pub fn manual(working_days: u32, absence_days: u32, total_hours: f64) -> Self {
        Self {
            working_days,
            absence_days,
            total_hours,
            calendar_entries: Vec::new(),
        }
    }

    pub fn effective_days(&self) -> u32 {
        self.working_days.saturating_sub(self.absence_days)
    }
}

// --- Collector ---

/// Deduplicating store for entries seen across overlapping week fetches.
#[derive(Debug, Clone)]
pub struct CalendarEntriesCollector {
    entries: Vec<CalendarEntry>,
    seen: HashSet<(NaiveDate, String, String)>,
    paid_absence_titles: Vec<String>,
}

impl Default for CalendarEntriesCollector {
    fn default() -> Self {
        Self::with_paid_absence_titles(PAID_ABSENCE_TITLES.iter().map(|s| s.to_string()))
    }
}

impl CalendarEntriesCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paid_absence_titles<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: Vec::new(),
            seen: HashSet::new(),
            paid_absence_titles: titles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn entries(&self) -> &[CalendarEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds an entry unless its (date, title, type) was already seen.
    pub fn push(&mut self, entry: CalendarEntry) -> bool {
        if self.seen.insert(entry.dedup_key()) {
            self.entries.push(entry);
            true
        } else {
            false
        }
    }

    /// Ingests one intercepted calendar API payload; returns how many entries were new.
    pub fn add_entries_from_response(&mut self, response: &Value) -> usize {
        let Some(children) = response.pointer("/body/children").and_then(Value::as_array) else {
            warn!("Calendar response has no body.children, nothing to collect");
            return 0;
        };

        let mut added = 0;
        for child in children {
            let Some(items) = child
                .pointer("/consolidatedList/children")
                .and_then(Value::as_array)
            else {
                continue;
            };
            for item in items {
                if item.get("widget").and_then(Value::as_str) != Some(CALENDAR_ENTRY_WIDGET) {
                    continue;
                }
                if let Some(entry) = parse_calendar_entry(item) {
                    if self.push(entry) {
                        added += 1;
                    }
                }
            }
        }

        debug!("Collected {} new calendar entries ({} total)", added, self.entries.len());
        added
    }

    fn is_paid_absence(&self, title: &str) -> bool {
        self.paid_absence_titles.iter().any(|t| t == title)
    }

    /// Only "Time Tracking" entries carry hours. "Time Off" and holiday
    /// entries are presence markers whose payable hours arrive as a separate
    /// "Time Tracking" entry with a paid-absence title.
    pub fn get_hours_for_month(&self, month: YearMonth) -> MonthlyHours {
        let mut hours = MonthlyHours::default();
        for entry in self
            .entries
            .iter()
            .filter(|e| month.contains(e.entry_date) && e.entry_type == ENTRY_TYPE_TIME_TRACKING)
        {
            if self.is_paid_absence(&entry.title) {
                hours.time_off_hours += entry.hours;
            } else {
                hours.working_hours += entry.hours;
            }
        }
        hours.total_hours = hours.working_hours + hours.time_off_hours;
        hours
    }

    /// Entries dated within `[start, end]`, in discovery order.
    pub fn get_entries_for_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<CalendarEntry> {
        self.entries
            .iter()
            .filter(|e| start <= e.entry_date && e.entry_date <= end)
            .cloned()
            .collect()
    }
}
