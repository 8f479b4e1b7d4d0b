// src/lib.rs

//! Workday side of the IP-tax reporting assistant: resolves the report's
//! date ranges, logs into Workday through a real browser, and collects the
//! month's hours from the weekly time calendar.

pub mod auth;
pub mod browser;
pub mod calendar;
pub mod client;
pub mod clock;
pub mod config;
pub mod coverage;
pub mod error;
pub mod history;
pub mod logging;
pub mod prompts;
pub mod scraping;
pub mod session;
pub mod timing;
pub mod webdriver;
pub mod week_range;

#[cfg(test)]
mod testing;

mod scraping_tests;

pub use calendar::{CalendarEntriesCollector, CalendarEntry, WorkHours};
pub use client::WorkdayClient;
pub use config::{AppPaths, AuthMethod, WorkdayConfig};
pub use error::{ErrorKind, WorkdayError, WorkdayResult};
pub use timing::{DateRangeResolver, ReportDateRanges, YearMonth};
