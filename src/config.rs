// src/config.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::calendar::PAID_ABSENCE_TITLES;
use crate::error::WorkdayError;

pub const ENV_PREFIX: &str = "IPTAX_WORKDAY_";
pub const CACHE_DIR_ENV: &str = "IPTAX_CACHE_DIR";
pub const DEFAULT_PORTAL_HOST: &str = "myworkday.com";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

// --- Workday Configuration ---

/// How the browser is allowed to authenticate against the SSO provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AuthMethod {
    /// Always go through the login form; Kerberos negotiation is switched off in the profile.
    #[serde(rename = "sso")]
    Sso,
    /// Let Firefox negotiate SPNEGO against the trusted URIs first.
    #[serde(rename = "sso+kerberos")]
    #[default]
    SsoKerberos,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Sso => write!(f, "sso"),
            AuthMethod::SsoKerberos => write!(f, "sso+kerberos"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkdayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub auth: AuthMethod,
    #[serde(default)]
    pub trusted_uris: Vec<String>,
    /// Host fragment that marks a URL as belonging to the portal (post-login).
    #[serde(default = "default_portal_host")]
    pub portal_host: String,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    /// "Time Tracking" titles that count as paid absence rather than work.
    #[serde(default = "default_paid_absence_titles")]
    pub paid_absence_titles: Vec<String>,
}

fn default_portal_host() -> String {
    DEFAULT_PORTAL_HOST.to_string()
}

fn default_webdriver_url() -> String {
    DEFAULT_WEBDRIVER_URL.to_string()
}

fn default_paid_absence_titles() -> Vec<String> {
    PAID_ABSENCE_TITLES.iter().map(|s| s.to_string()).collect()
}

impl Default for WorkdayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            auth: AuthMethod::default(),
            trusted_uris: Vec::new(),
            portal_host: default_portal_host(),
            webdriver_url: default_webdriver_url(),
            paid_absence_titles: default_paid_absence_titles(),
        }
    }
}

impl WorkdayConfig {
    /// Reads `IPTAX_WORKDAY_*` variables from the process environment.
    pub fn from_env() -> Result<Self, WorkdayError> {
        let config: WorkdayConfig = envy::prefixed(ENV_PREFIX)
            .from_env()
            .map_err(|e| WorkdayError::Config(e.to_string()))?;
        config.validate()?;
        debug!(
            "Loaded Workday config: enabled={}, auth={}, trusted_uris={}",
            config.enabled,
            config.auth,
            config.trusted_uris.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WorkdayError> {
        if self.enabled && self.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
            return Err(WorkdayError::Config(format!(
                "{}URL is required when the Workday integration is enabled",
                ENV_PREFIX
            )));
        }
        Ok(())
    }

    pub fn url_or_err(&self) -> Result<&str, WorkdayError> {
        self.url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| WorkdayError::Config("Workday URL is not configured".to_string()))
    }
}

// --- Application Paths ---

#[derive(Debug, Clone)]
pub struct AppPaths {
    cache_dir: PathBuf,
}

impl AppPaths {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// `IPTAX_CACHE_DIR`, else the platform cache dir, else `./cache`.
    pub fn from_env() -> Self {
        let cache_dir = std::env::var_os(CACHE_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::cache_dir().map(|d| d.join("iptax")))
            .unwrap_or_else(|| PathBuf::from("cache"));
        Self { cache_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.cache_dir.join("firefox-profile")
    }

    pub fn browser_log(&self) -> PathBuf {
        self.cache_dir.join("browser-devconsole.log")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.cache_dir.join("snapshots")
    }

    pub fn history_file(&self) -> PathBuf {
        self.cache_dir.join("history.json")
    }
}
