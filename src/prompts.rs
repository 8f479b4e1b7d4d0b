// src/prompts.rs

use async_trait::async_trait;
use chrono::NaiveDate;
use dialoguer::{Input, Password, Select};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt;
use std::sync::Mutex;
use tracing::debug;

use crate::calendar::{WorkHours, HOURS_PER_DAY};
use crate::coverage::calculate_working_days;
use crate::error::WorkdayError;

// --- Credentials ---

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// --- Manual Entry Defaults ---

/// Suggested values for manual entry: Mon-Fri count, no absence, 8h a day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualDefaults {
    pub working_days: u32,
    pub absence_days: u32,
    pub total_hours: f64,
}

impl ManualDefaults {
    pub fn for_range(start: NaiveDate, end: NaiveDate) -> Self {
        let working_days = calculate_working_days(start, end);
        Self {
            working_days,
            absence_days: 0,
            total_hours: working_days as f64 * HOURS_PER_DAY,
        }
    }
}

// --- Operator Choices ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Retry,
    Manual,
    Abort,
}

impl FailureAction {
    pub const ALL: [FailureAction; 3] = [
        FailureAction::Retry,
        FailureAction::Manual,
        FailureAction::Abort,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FailureAction::Retry => "Retry Workday automation",
            FailureAction::Manual => "Enter hours manually",
            FailureAction::Abort => "Exit",
        }
    }
}

/// Everything the Workday flow asks of the operator.
#[async_trait]
pub trait Prompter: Send + Sync {
    fn prompt_credentials(&self) -> Result<Credentials, WorkdayError>;

    /// Variant for callers already running on the async runtime.
    async fn prompt_credentials_async(&self) -> Result<Credentials, WorkdayError> {
        self.prompt_credentials()
    }

    fn prompt_manual_work_hours(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<WorkHours, WorkdayError>;

    fn choose_failure_action(&self) -> Result<FailureAction, WorkdayError>;

    fn show_telemetry(&self, lines: &[String]);

    /// One-line operator notice, e.g. a rejected login.
    fn notify(&self, message: &str);
}

// --- Terminal Implementation ---

fn prompt_err(e: impl fmt::Display) -> WorkdayError {
    WorkdayError::Prompt(e.to_string())
}

fn validate_total_hours(hours: f64) -> Result<(), &'static str> {
    if hours.is_finite() && hours >= 0.0 {
        Ok(())
    } else {
        Err("Must be a non-negative number")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_password() -> Result<String, WorkdayError> {
        loop {
            let password = Password::new()
                .with_prompt("Password")
                .interact()
                .map_err(prompt_err)?;
            if !password.trim().is_empty() {
                return Ok(password);
            }
            eprintln!("Password cannot be empty");
        }
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    fn prompt_credentials(&self) -> Result<Credentials, WorkdayError> {
        eprintln!("SSO login form detected. Please enter your credentials.");
        let username: String = Input::new()
            .with_prompt("Username")
            .validate_with(|input: &String| -> Result<(), &str> {
                if input.trim().is_empty() {
                    Err("Username cannot be empty")
                } else {
                    Ok(())
                }
            })
            .interact_text()
            .map_err(prompt_err)?;
        let password = Self::read_password()?;
        Ok(Credentials::new(username.trim(), password))
    }

    async fn prompt_credentials_async(&self) -> Result<Credentials, WorkdayError> {
        let prompter = *self;
        tokio::task::spawn_blocking(move || prompter.prompt_credentials())
            .await
            .map_err(prompt_err)?
    }

    fn prompt_manual_work_hours(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<WorkHours, WorkdayError> {
        let defaults = ManualDefaults::for_range(start, end);
        eprintln!();
        eprintln!("Enter work hours for {}:", start.format("%B %Y"));

        let working_days: u32 = Input::new()
            .with_prompt("Working days in the period")
            .default(defaults.working_days)
            .interact_text()
            .map_err(prompt_err)?;
        let absence_days: u32 = Input::new()
            .with_prompt("Absence days (vacation, sick leave, holidays)")
            .default(defaults.absence_days)
            .interact_text()
            .map_err(prompt_err)?;
        let total_hours: f64 = Input::new()
            .with_prompt("Total working hours")
            .default(working_days as f64 * HOURS_PER_DAY)
            .validate_with(|h: &f64| validate_total_hours(*h))
            .interact_text()
            .map_err(prompt_err)?;

        Ok(WorkHours::manual(working_days, absence_days, total_hours))
    }

    fn choose_failure_action(&self) -> Result<FailureAction, WorkdayError> {
        let labels: Vec<&str> = FailureAction::ALL.iter().map(|a| a.label()).collect();
        let index = Select::new()
            .with_prompt("Workday automation failed. What would you like to do?")
            .items(&labels)
            .default(1)
            .interact()
            .map_err(prompt_err)?;
        Ok(FailureAction::ALL
            .get(index)
            .copied()
            .unwrap_or(FailureAction::Manual))
    }

    fn show_telemetry(&self, lines: &[String]) {
        eprintln!();
        for line in lines {
            eprintln!("{}", line);
        }
        eprintln!();
    }

    fn notify(&self, message: &str) {
        eprintln!("{}", message);
    }
}

// --- Progress ---

const PROGRESS_TEMPLATE: &str = "{msg:40} [{bar:30}] {pos}/{len} {elapsed}";

/// Progress bar handle passed explicitly through the automation flow.
/// Drawing is suppressed when `visible` is false, counting still happens.
pub struct ProgressController {
    bar: Mutex<Option<ProgressBar>>,
    visible: bool,
}

impl ProgressController {
    pub fn new(visible: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            visible,
        }
    }

    pub fn hidden() -> Self {
        Self::new(false)
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }

    pub fn create(&self, total_steps: u64, description: &str) {
        let target = if self.visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total_steps), target);
        bar.set_style(
            ProgressStyle::with_template(PROGRESS_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(description.to_string());
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(bar) {
                old.finish_and_clear();
            }
        }
    }

    pub fn advance(&self, description: &str) {
        debug!("Progress: {}", description);
        self.with_bar(|bar| {
            bar.inc(1);
            bar.set_message(description.to_string());
        });
    }

    /// Hides the bar, e.g. while an interactive prompt owns the terminal.
    pub fn stop(&self) {
        self.with_bar(|bar| bar.set_draw_target(ProgressDrawTarget::hidden()));
    }

    pub fn resume(&self) {
        if self.visible {
            self.with_bar(|bar| bar.set_draw_target(ProgressDrawTarget::stderr()));
        }
    }

    pub fn close(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(bar) = guard.take() {
                bar.finish_and_clear();
            }
        }
    }

    pub fn position(&self) -> u64 {
        self.bar
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|bar| bar.position()))
            .unwrap_or(0)
    }

    pub fn length(&self) -> Option<u64> {
        self.bar
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().and_then(|bar| bar.length()))
    }

    pub fn message(&self) -> Option<String> {
        self.bar
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|bar| bar.message()))
    }

    pub fn is_active(&self) -> bool {
        self.bar.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

impl Drop for ProgressController {
    fn drop(&mut self) {
        self.close();
    }
}
