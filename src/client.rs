// src/client.rs

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auth::{authenticate, navigate_to_home};
use crate::browser::{
    BrowserDriver, BrowserLauncher, LaunchOptions, ListenerGuard, VIEWPORT_HEIGHT, VIEWPORT_WIDTH,
};
use crate::calendar::WorkHours;
use crate::config::{AppPaths, WorkdayConfig};
use crate::error::WorkdayError;
use crate::prompts::{FailureAction, ProgressController, Prompter};
use crate::scraping::{extract_work_hours, navigate_to_time_page};
use crate::session::{build_firefox_prefs, dump_debug_snapshot, setup_profile_directory, SessionLog};

/// Fixed progress steps around the per-week ones: connect, SSO, home,
/// time button, time page, collected.
const FIXED_PROGRESS_STEPS: u64 = 6;
const ERROR_SNAPSHOT_CONTEXT: &str = "workday_error";

/// Weeks needed to cover `[start, end]`, rounded up.
pub fn weeks_count(start: NaiveDate, end: NaiveDate) -> u64 {
    let days = (end - start).num_days() + 1;
    (days.max(0) as u64).div_ceil(7)
}

pub struct WorkdayClient {
    config: WorkdayConfig,
    launcher: Arc<dyn BrowserLauncher>,
    prompter: Arc<dyn Prompter>,
    paths: AppPaths,
    show_progress: bool,
}

impl WorkdayClient {
    pub fn new(
        config: WorkdayConfig,
        launcher: Arc<dyn BrowserLauncher>,
        prompter: Arc<dyn Prompter>,
        paths: AppPaths,
    ) -> Self {
        Self {
            config,
            launcher,
            prompter,
            paths,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &WorkdayConfig {
        &self.config
    }

    // --- Automation ---

    /// One full browser session: launch, log in, walk the calendar, close.
    pub async fn fetch_work_hours(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        headless: bool,
    ) -> Result<WorkHours, WorkdayError> {
        let profile_dir = setup_profile_directory(&self.paths.profile_dir())?;
        let options = LaunchOptions {
            profile_dir,
            headless,
            prefs: build_firefox_prefs(&self.config),
            viewport: (VIEWPORT_WIDTH, VIEWPORT_HEIGHT),
        };

        let progress = ProgressController::new(self.show_progress);
        progress.create(
            FIXED_PROGRESS_STEPS + weeks_count(start, end),
            "Connecting to Workday...",
        );

        info!("Launching Firefox for Kerberos/SPNEGO authentication");
        let driver = self.launcher.launch(&options).await?;
        let log = match SessionLog::open(&self.paths.browser_log()) {
            Ok(log) => log,
            Err(e) => {
                if let Err(close_err) = driver.close().await {
                    warn!("Failed to close browser: {}", close_err);
                }
                return Err(e);
            }
        };

        let result = {
            let _log_listener = ListenerGuard::register(driver.as_ref(), log.handler());
            info!(
                "Starting Workday navigation to: {}",
                self.config.url.as_deref().unwrap_or_default()
            );
            let outcome = self.drive(driver.as_ref(), start, end, &progress).await;
            if let Err(e) = &outcome {
                error!("Workday automation failed: {}", e);
                let bundle = dump_debug_snapshot(
                    driver.as_ref(),
                    ERROR_SNAPSHOT_CONTEXT,
                    &format!("{:?}", e.kind()),
                    &e.to_string(),
                    &self.paths.snapshot_dir(),
                )
                .await;
                if let Some(path) = &bundle.snapshot_path {
                    self.prompter
                        .notify(&format!("Debug snapshot saved: {}", path.display()));
                }
            }
            outcome
        };

        log.close();
        if let Err(e) = driver.close().await {
            warn!("Failed to close browser: {}", e);
        }
        progress.close();
        result
    }

    async fn drive(
        &self,
        driver: &dyn BrowserDriver,
        start: NaiveDate,
        end: NaiveDate,
        progress: &ProgressController,
    ) -> Result<WorkHours, WorkdayError> {
        self.config.url_or_err()?;
        progress.advance("Connecting to Workday...");
        authenticate(driver, &self.config, self.prompter.as_ref(), progress).await?;
        progress.advance("SSO authentication completed");

        navigate_to_home(driver, &self.config).await?;
        progress.advance("Workday home page loaded");

        progress.advance("Looking for Time button...");
        navigate_to_time_page(driver, start).await?;
        progress.advance("Navigated to time entry page");

        let hours = extract_work_hours(
            driver,
            start,
            end,
            &self.config.paid_absence_titles,
            progress,
        )
        .await?;
        progress.advance("Work hours collected");
        Ok(hours)
    }

    // --- Fallback Policy ---

    fn failure_telemetry(&self, error: &WorkdayError) -> Vec<String> {
        vec![
            "Workday authentication failed".to_string(),
            String::new(),
            "Diagnostic info:".to_string(),
            format!(
                "  - Workday URL: {}",
                self.config.url.as_deref().unwrap_or("(not configured)")
            ),
            format!("  - Auth method: {}", self.config.auth),
            format!("  - Error: {}", error),
        ]
    }

    /// Workday figures for `[start, end]`, falling back to the operator when
    /// automation is off or fails and `interactive` allows asking.
    pub async fn get_work_hours(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        interactive: bool,
        headless: bool,
    ) -> Result<WorkHours, WorkdayError> {
        if !self.config.enabled {
            if interactive {
                info!("Workday integration disabled, asking for manual hours");
                return self.prompter.prompt_manual_work_hours(start, end);
            }
            return Err(WorkdayError::Disabled);
        }

        loop {
            let e = match self.fetch_work_hours(start, end, headless).await {
                Ok(hours) => return Ok(hours),
                Err(e) => e,
            };

            if let WorkdayError::NotImplemented(_) = e {
                if interactive {
                    warn!("{}", e);
                    self.prompter.notify(
                        "Workday automation not yet implemented. Falling back to manual input.",
                    );
                    return self.prompter.prompt_manual_work_hours(start, end);
                }
                return Err(e);
            }

            if !interactive {
                return Err(into_authentication(e));
            }

            self.prompter.show_telemetry(&self.failure_telemetry(&e));
            match self.prompter.choose_failure_action()? {
                FailureAction::Retry => {
                    info!("Retrying Workday automation");
                    continue;
                }
                FailureAction::Manual => return self.prompter.prompt_manual_work_hours(start, end),
                FailureAction::Abort => return Err(into_authentication(e)),
            }
        }
    }
}

fn into_authentication(e: WorkdayError) -> WorkdayError {
    match e {
        WorkdayError::Authentication(_) => e,
        other => WorkdayError::Authentication(other.to_string()),
    }
}
