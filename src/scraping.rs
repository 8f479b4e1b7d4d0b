// src/scraping.rs

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{
    BrowserDriver, BrowserEvent, ElementState, EventHandler, ListenerGuard, LoadState, RoleQuery,
    DEFAULT_TIMEOUT, ELEMENT_TIMEOUT, POLL_INTERVAL,
};
use crate::calendar::{CalendarEntriesCollector, WorkHours, HOURS_PER_DAY};
use crate::coverage::calculate_working_days;
use crate::error::{DriverError, WorkdayError};
use crate::prompts::ProgressController;
use crate::timing::YearMonth;
use crate::week_range::parse_week_range;

/// Path fragment of the XHR that returns a week's calendar entries.
pub const CALENDAR_ENTRIES_API_PATTERN: &str = "/rel-task/2997$9444.htmld";
pub const WEEK_CHANGE_TIMEOUT: Duration = Duration::from_secs(5);

const HTTP_OK: u16 = 200;
const PAGE_SETTLE_DELAY: Duration = Duration::from_millis(2000);
const MODAL_OPEN_DELAY: Duration = Duration::from_millis(1000);
const SCROLL_DELAY: Duration = Duration::from_millis(1000);
const INPUT_SETTLE_DELAY: Duration = Duration::from_millis(500);
const RESPONSE_SETTLE_DELAY: Duration = Duration::from_millis(500);

static WEEK_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+ \d+.*\d{4}").expect("valid heading regex"));
static SELECT_WEEK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Select Week").expect("valid select week regex"));

fn week_heading() -> RoleQuery {
    RoleQuery::new("heading")
        .pattern(WEEK_HEADING_RE.clone())
        .level(2)
}

fn nav(context: &'static str) -> impl FnOnce(DriverError) -> WorkdayError {
    move |e| WorkdayError::Navigation(format!("{}: {}", context, e))
}

// --- Page Navigation ---

/// From the home page to the weekly calendar showing `target`.
pub async fn navigate_to_time_page(
    driver: &dyn BrowserDriver,
    target: NaiveDate,
) -> Result<(), WorkdayError> {
    info!("Looking for Time button...");
    let time_button = driver.get_by_role(RoleQuery::new("button").exact("Time"));

    if let Err(e) = time_button
        .wait_for(ElementState::Visible, DEFAULT_TIMEOUT)
        .await
    {
        warn!("Time button not found on first attempt: {}", e);
        driver
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map_err(nav("Scrolling home page failed"))?;
        driver.wait_for_timeout(SCROLL_DELAY).await;
        time_button
            .wait_for(ElementState::Visible, ELEMENT_TIMEOUT)
            .await
            .map_err(nav("Time button not found"))?;
    }

    info!("Clicking Time button...");
    time_button
        .click(ELEMENT_TIMEOUT)
        .await
        .map_err(nav("Clicking Time button failed"))?;
    driver
        .wait_for_load_state(LoadState::DomContentLoaded, DEFAULT_TIMEOUT)
        .await?;
    driver.wait_for_timeout(PAGE_SETTLE_DELAY).await;

    select_week_via_modal(driver, target).await?;
    info!("Navigated to time entry page");
    Ok(())
}

async fn fill_spinbutton(
    driver: &dyn BrowserDriver,
    name: &'static str,
    value: u32,
) -> Result<(), WorkdayError> {
    driver
        .get_by_role(RoleQuery::new("spinbutton").name(name))
        .click(ELEMENT_TIMEOUT)
        .await
        .map_err(nav("Date field not clickable"))?;
    let keyboard = driver.keyboard();
    keyboard.press("Control+a").await?;
    keyboard.type_text(&value.to_string()).await?;
    Ok(())
}

/// Jumps straight to `target` through the "Select Week" date modal.
pub async fn select_week_via_modal(
    driver: &dyn BrowserDriver,
    target: NaiveDate,
) -> Result<(), WorkdayError> {
    info!("Selecting week for {}...", target);

    let as_link = driver.get_by_role(RoleQuery::new("link").pattern(SELECT_WEEK_RE.clone()));
    let select_week = match as_link.wait_for(ElementState::Visible, ELEMENT_TIMEOUT).await {
        Ok(()) => as_link,
        Err(_) => {
            debug!("'Select Week' is not a link here, trying button");
            let as_button =
                driver.get_by_role(RoleQuery::new("button").pattern(SELECT_WEEK_RE.clone()));
            as_button
                .wait_for(ElementState::Visible, ELEMENT_TIMEOUT)
                .await
                .map_err(nav("'Select Week' control not found"))?;
            as_button
        }
    };
    select_week
        .click(ELEMENT_TIMEOUT)
        .await
        .map_err(nav("Clicking 'Select Week' failed"))?;
    driver.wait_for_timeout(MODAL_OPEN_DELAY).await;

    driver
        .get_by_role(RoleQuery::new("spinbutton").name("Month"))
        .wait_for(ElementState::Visible, ELEMENT_TIMEOUT)
        .await
        .map_err(nav("Select Week modal did not open"))?;

    debug!(
        "Entering date: {}/{}/{}",
        target.month(),
        target.day(),
        target.year()
    );
    fill_spinbutton(driver, "Month", target.month()).await?;
    fill_spinbutton(driver, "Day", target.day()).await?;
    fill_spinbutton(driver, "Year", target.year() as u32).await?;
    driver.wait_for_timeout(INPUT_SETTLE_DELAY).await;

    driver
        .get_by_role(RoleQuery::new("button").name("OK"))
        .click(ELEMENT_TIMEOUT)
        .await
        .map_err(nav("Confirming Select Week failed"))?;
    driver
        .wait_for_load_state(LoadState::DomContentLoaded, DEFAULT_TIMEOUT)
        .await?;
    driver.wait_for_timeout(PAGE_SETTLE_DELAY).await;

    let (week_start, week_end) = get_current_week_range(driver).await?;
    info!("Navigated to week: {} - {}", week_start, week_end);
    Ok(())
}

// --- Week Heading ---

pub async fn get_week_heading_text(driver: &dyn BrowserDriver) -> Result<String, WorkdayError> {
    let text = driver
        .get_by_role(week_heading())
        .text_content(ELEMENT_TIMEOUT)
        .await
        .map_err(nav("Week heading not found"))?;
    Ok(text.unwrap_or_default())
}

pub async fn get_current_week_range(
    driver: &dyn BrowserDriver,
) -> Result<(NaiveDate, NaiveDate), WorkdayError> {
    let text = driver
        .get_by_role(week_heading())
        .text_content(ELEMENT_TIMEOUT)
        .await
        .map_err(nav("Week heading not found"))?
        .ok_or_else(|| WorkdayError::Navigation("Week heading has no text content".to_string()))?;
    debug!("Found week heading: {}", text);
    parse_week_range(text.trim())
}

/// Polls until the heading differs from `old_heading`. A timeout only warns,
/// the caller re-reads the heading anyway.
pub async fn wait_for_week_change(
    driver: &dyn BrowserDriver,
    old_heading: &str,
    timeout: Duration,
) -> Result<(), WorkdayError> {
    let deadline = Instant::now() + timeout;
    loop {
        let current = get_week_heading_text(driver).await?;
        if current != old_heading {
            debug!("Week heading changed to: {}", current);
            // Summary section updates a little later
            driver.wait_for_timeout(RESPONSE_SETTLE_DELAY).await;
            return Ok(());
        }
        if Instant::now() >= deadline {
            warn!("Timeout waiting for week change (still showing: {})", current);
            return Ok(());
        }
        driver.wait_for_timeout(POLL_INTERVAL).await;
    }
}

async fn step_week(driver: &dyn BrowserDriver, button: &'static str) -> Result<(), WorkdayError> {
    let before = get_week_heading_text(driver).await?;
    debug!("Current week heading before '{}': {}", button, before);
    driver
        .get_by_role(RoleQuery::new("button").name(button))
        .click(ELEMENT_TIMEOUT)
        .await
        .map_err(nav("Week navigation button not found"))?;
    wait_for_week_change(driver, &before, WEEK_CHANGE_TIMEOUT).await
}

pub async fn navigate_previous_week(driver: &dyn BrowserDriver) -> Result<(), WorkdayError> {
    step_week(driver, "Previous Week").await
}

pub async fn navigate_next_week(driver: &dyn BrowserDriver) -> Result<(), WorkdayError> {
    step_week(driver, "Next Week").await
}

// --- Response Interception ---

/// Feeds successful JSON calendar API responses into `collector`.
pub fn create_calendar_response_handler(
    collector: Arc<Mutex<CalendarEntriesCollector>>,
) -> EventHandler {
    Arc::new(move |event: &BrowserEvent| {
        let BrowserEvent::Response(response) = event else {
            return;
        };
        if !response.url.contains(CALENDAR_ENTRIES_API_PATTERN) || response.status != HTTP_OK {
            return;
        }
        let is_json = response
            .header("content-type")
            .map_or(false, |ct| ct.contains("application/json"));
        if !is_json {
            return;
        }
        match response.json() {
            Ok(payload) => {
                if let Ok(mut collector) = collector.lock() {
                    let added = collector.add_entries_from_response(&payload);
                    debug!(
                        "Calendar API response: added {} entries from {}",
                        added, response.url
                    );
                }
            }
            Err(e) => warn!("Failed to process calendar response: {}", e),
        }
    })
}

// --- Extraction ---

/// Walks the calendar week by week over `[start, end]`, collecting every
/// intercepted calendar response, and totals the month `start` falls in.
pub async fn extract_work_hours(
    driver: &dyn BrowserDriver,
    start: NaiveDate,
    end: NaiveDate,
    paid_absence_titles: &[String],
    progress: &ProgressController,
) -> Result<WorkHours, WorkdayError> {
    // Step back first so moving forward again re-fetches the first week
    info!("Navigating to previous week to prepare for data capture");
    navigate_previous_week(driver).await?;

    let collector = Arc::new(Mutex::new(CalendarEntriesCollector::with_paid_absence_titles(
        paid_absence_titles.iter().cloned(),
    )));
    let _listener = ListenerGuard::register(
        driver,
        create_calendar_response_handler(Arc::clone(&collector)),
    );

    info!("Navigating forward to start week to capture data");
    navigate_next_week(driver).await?;

    let mut weeks_visited: Vec<String> = Vec::new();
    let mut previous_start: Option<NaiveDate> = None;
    let mut week_number = 0;
    loop {
        let (week_start, week_end) = get_current_week_range(driver).await?;
        if previous_start == Some(week_start) {
            return Err(WorkdayError::Navigation(format!(
                "Week navigation stalled at {} - {}",
                week_start, week_end
            )));
        }
        previous_start = Some(week_start);
        weeks_visited.push(format!("{} - {}", week_start, week_end));

        if week_start > end {
            break;
        }

        week_number += 1;
        info!("Collecting data for week: {} - {}", week_start, week_end);
        progress.advance(&format!("Processing week {}...", week_number));
        driver.wait_for_timeout(RESPONSE_SETTLE_DELAY).await;

        if week_end >= end {
            break;
        }
        navigate_next_week(driver).await?;
    }

    let collector = collector
        .lock()
        .map_err(|_| WorkdayError::General("Calendar collector lock poisoned".to_string()))?;
    let month = YearMonth::of(start);
    let hours = collector.get_hours_for_month(month);

    let in_month: Vec<_> = collector
        .entries()
        .iter()
        .filter(|e| month.contains(e.entry_date))
        .collect();
    info!(
        "Collected {} entries for {} from {} total entries",
        in_month.len(),
        month,
        collector.len()
    );
    for entry in &in_month {
        debug!(
            "  {}: {} ({}) - {:.1} hours",
            entry.entry_date, entry.title, entry.entry_type, entry.hours
        );
    }
    info!(
        "Per-day calculation: working={:.1}, time_off={:.1}, total={:.1}",
        hours.working_hours, hours.time_off_hours, hours.total_hours
    );
    info!("Weeks visited: {:?}", weeks_visited);

    let working_days = calculate_working_days(start, end);
    let absence_days = (hours.time_off_hours / HOURS_PER_DAY).floor().max(0.0) as u32;
    info!(
        "Final: working_days={}, absence_days={}, total_hours={:.1}",
        working_days, absence_days, hours.total_hours
    );

    Ok(WorkHours {
        working_days,
        absence_days,
        total_hours: hours.total_hours,
        calendar_entries: collector.get_entries_for_range(start, end),
    })
}
