// src/auth.rs

use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::browser::{
    host_contains, BrowserDriver, ElementState, LoadState, RoleQuery, DEFAULT_TIMEOUT,
    ELEMENT_TIMEOUT,
};
use crate::config::{AuthMethod, WorkdayConfig};
use crate::error::WorkdayError;
use crate::prompts::{Credentials, ProgressController, Prompter};

pub const MAX_LOGIN_RETRIES: u32 = 3;
/// How long the first page gets to either land on the portal or show the form.
pub const DETECTION_TIMEOUT: Duration = Duration::from_secs(5);
pub const SSO_LOGIN_TIMEOUT: Duration = Duration::from_secs(15);
/// Pause after loading the home shell so the client app can boot.
pub const HOME_SETTLE_DELAY: Duration = Duration::from_millis(3000);

const HOME_PATH: &str = "/d/home.htmld";

fn username_field() -> RoleQuery {
    RoleQuery::new("textbox").name("Username")
}

fn password_field() -> RoleQuery {
    RoleQuery::new("textbox").name("Password")
}

fn login_button() -> RoleQuery {
    RoleQuery::new("button").name("Log in to SSO")
}

// --- States ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NotStarted,
    Navigating,
    KerberosSilentSuccess,
    SsoFormShown,
    CredentialsSubmitted { attempt: u32 },
    BadCredentials { attempt: u32 },
    Authenticated,
    Failed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::NotStarted => write!(f, "not started"),
            AuthState::Navigating => write!(f, "navigating"),
            AuthState::KerberosSilentSuccess => write!(f, "kerberos silent success"),
            AuthState::SsoFormShown => write!(f, "SSO form shown"),
            AuthState::CredentialsSubmitted { attempt } => {
                write!(f, "credentials submitted (attempt {})", attempt)
            }
            AuthState::BadCredentials { attempt } => {
                write!(f, "bad credentials (attempt {})", attempt)
            }
            AuthState::Authenticated => write!(f, "authenticated"),
            AuthState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Landed on the portal without seeing a login form.
    Kerberos,
    SsoLogin { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detection {
    OnPortal,
    LoginForm,
}

// Only drives the retry loop, never leaves this module
#[derive(Debug)]
enum LoginError {
    BadCredentials,
    Failed(WorkdayError),
}

impl From<crate::error::DriverError> for LoginError {
    fn from(e: crate::error::DriverError) -> Self {
        LoginError::Failed(WorkdayError::Authentication(format!("SSO login error: {}", e)))
    }
}

// --- Races ---

/// Portal URL versus visible login form; `None` if both waits time out.
async fn race_portal_or_form(
    driver: &dyn BrowserDriver,
    portal_host: &str,
    timeout: Duration,
) -> Option<Detection> {
    let on_portal = driver.wait_for_url(portal_host, timeout);
    let form_visible = async {
        driver
            .get_by_role(username_field())
            .wait_for(ElementState::Visible, timeout)
            .await
    };

    tokio::select! {
        biased;
        Ok(url) = on_portal => {
            debug!("Portal reached at {}", url);
            Some(Detection::OnPortal)
        }
        Ok(()) = form_visible => Some(Detection::LoginForm),
        else => None,
    }
}

// --- Authenticator ---

pub struct Authenticator<'a> {
    driver: &'a dyn BrowserDriver,
    config: &'a WorkdayConfig,
    prompter: &'a dyn Prompter,
    progress: &'a ProgressController,
    trail: Vec<AuthState>,
}

impl<'a> Authenticator<'a> {
    pub fn new(
        driver: &'a dyn BrowserDriver,
        config: &'a WorkdayConfig,
        prompter: &'a dyn Prompter,
        progress: &'a ProgressController,
    ) -> Self {
        Self {
            driver,
            config,
            prompter,
            progress,
            trail: vec![AuthState::NotStarted],
        }
    }

    pub fn state(&self) -> AuthState {
        self.trail.last().copied().unwrap_or(AuthState::NotStarted)
    }

    /// Every state visited so far, oldest first.
    pub fn trail(&self) -> &[AuthState] {
        &self.trail
    }

    fn transition(&mut self, next: AuthState) {
        info!("Auth state: {} -> {}", self.state(), next);
        self.trail.push(next);
    }

    pub async fn run(&mut self) -> Result<AuthOutcome, WorkdayError> {
        match self.authenticate().await {
            Ok(outcome) => {
                self.transition(AuthState::Authenticated);
                Ok(outcome)
            }
            Err(e) => {
                self.transition(AuthState::Failed);
                Err(e)
            }
        }
    }

    async fn authenticate(&mut self) -> Result<AuthOutcome, WorkdayError> {
        let url = self.config.url_or_err()?;
        self.transition(AuthState::Navigating);
        info!("Navigating to {}", url);
        self.driver.goto(url, LoadState::DomContentLoaded).await?;

        let detection =
            race_portal_or_form(self.driver, &self.config.portal_host, DETECTION_TIMEOUT).await;

        let outcome = match detection {
            Some(Detection::LoginForm) => {
                self.transition(AuthState::SsoFormShown);
                info!("SSO login form detected, Kerberos auth did not work");
                self.progress.stop();
                if self.config.auth == AuthMethod::SsoKerberos {
                    warn!("Kerberos authentication failed. SSO login required.");
                    self.prompter
                        .notify("Kerberos authentication failed. SSO login required.");
                }
                let attempts = self.login_with_retries().await?;
                self.progress.resume();
                AuthOutcome::SsoLogin { attempts }
            }
            Some(Detection::OnPortal) => {
                self.transition(AuthState::KerberosSilentSuccess);
                info!("Kerberos authentication succeeded, on Workday page");
                AuthOutcome::Kerberos
            }
            None => {
                // Page settled before the race began
                self.transition(AuthState::KerberosSilentSuccess);
                debug!("Neither portal URL nor login form seen, assuming existing session");
                AuthOutcome::Kerberos
            }
        };

        info!("SSO authentication completed");
        self.driver
            .wait_for_load_state(LoadState::DomContentLoaded, DEFAULT_TIMEOUT)
            .await?;
        Ok(outcome)
    }

    async fn login_with_retries(&mut self) -> Result<u32, WorkdayError> {
        for attempt in 1..=MAX_LOGIN_RETRIES {
            let credentials = self.prompter.prompt_credentials_async().await?;
            self.transition(AuthState::CredentialsSubmitted { attempt });

            match self.submit_once(&credentials).await {
                Ok(()) => return Ok(attempt),
                Err(LoginError::BadCredentials) => {
                    self.transition(AuthState::BadCredentials { attempt });
                    warn!("SSO login form reappeared, bad credentials");
                    if attempt < MAX_LOGIN_RETRIES {
                        self.prompter
                            .notify("Wrong username or password. Please try again.");
                        self.driver
                            .get_by_role(username_field())
                            .wait_for(ElementState::Visible, SSO_LOGIN_TIMEOUT)
                            .await?;
                    }
                }
                Err(LoginError::Failed(e)) => return Err(e),
            }
        }

        Err(WorkdayError::Authentication(format!(
            "Login failed after {} attempts",
            MAX_LOGIN_RETRIES
        )))
    }

    async fn submit_once(&self, credentials: &Credentials) -> Result<(), LoginError> {
        self.driver
            .get_by_role(username_field())
            .fill(&credentials.username, ELEMENT_TIMEOUT)
            .await?;
        self.driver
            .get_by_role(password_field())
            .fill(&credentials.password, ELEMENT_TIMEOUT)
            .await?;
        self.driver
            .get_by_role(login_button())
            .click(ELEMENT_TIMEOUT)
            .await?;

        match race_portal_or_form(self.driver, &self.config.portal_host, SSO_LOGIN_TIMEOUT).await {
            Some(Detection::OnPortal) => {
                info!("SSO login successful, redirected to Workday");
                Ok(())
            }
            Some(Detection::LoginForm) => Err(LoginError::BadCredentials),
            None => {
                let current = self.driver.current_url().await.unwrap_or_default();
                if host_contains(&current, &self.config.portal_host) {
                    return Ok(());
                }
                Err(LoginError::Failed(WorkdayError::Authentication(format!(
                    "SSO login failed. Current URL: {}",
                    current
                ))))
            }
        }
    }
}

/// Runs the login flow to completion on an already-open browser.
pub async fn authenticate(
    driver: &dyn BrowserDriver,
    config: &WorkdayConfig,
    prompter: &dyn Prompter,
    progress: &ProgressController,
) -> Result<AuthOutcome, WorkdayError> {
    Authenticator::new(driver, config, prompter, progress)
        .run()
        .await
}

pub fn home_url(base: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), HOME_PATH)
}

/// The SSO redirect lands on an intermediate page, so load the app shell explicitly.
pub async fn navigate_to_home(
    driver: &dyn BrowserDriver,
    config: &WorkdayConfig,
) -> Result<(), WorkdayError> {
    let home = home_url(config.url_or_err()?);
    info!("Navigating to home: {}", home);
    driver.goto(&home, LoadState::DomContentLoaded).await?;
    driver.wait_for_timeout(HOME_SETTLE_DELAY).await;
    Ok(())
}
