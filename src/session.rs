// src/session.rs

use chrono::Local;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, BrowserEvent, EventHandler};
use crate::config::{AuthMethod, WorkdayConfig};
use crate::error::{io_context, WorkdayError};

pub const DUMP_TIMESTAMP_ENV: &str = "IPTAX_WORKDAY_DUMP_TS";

const TRUSTED_URIS_PREF: &str = "network.negotiate-auth.trusted-uris";
const DELEGATION_URIS_PREF: &str = "network.negotiate-auth.delegation-uris";
const HTTP_UNAUTHORIZED: u16 = 401;

// --- Profile & Preferences ---

/// Deletes any previous profile and creates an empty one.
pub fn setup_profile_directory(profile_dir: &Path) -> Result<PathBuf, WorkdayError> {
    if profile_dir.exists() {
        info!("Removing old Firefox profile: {}", profile_dir.display());
        fs::remove_dir_all(profile_dir).map_err(|e| {
            io_context(e, format!("Failed to remove profile {}", profile_dir.display()))
        })?;
    }
    fs::create_dir_all(profile_dir).map_err(|e| {
        io_context(e, format!("Failed to create profile {}", profile_dir.display()))
    })?;
    info!("Created fresh Firefox profile at: {}", profile_dir.display());
    Ok(profile_dir.to_path_buf())
}

/// SPNEGO trust lists; emptied unless Kerberos is enabled with trusted URIs.
pub fn build_firefox_prefs(config: &WorkdayConfig) -> Map<String, Value> {
    let mut prefs = Map::new();
    let uris = match config.auth {
        AuthMethod::SsoKerberos if !config.trusted_uris.is_empty() => {
            let joined = config.trusted_uris.join(",");
            info!("Firefox SPNEGO enabled for URIs: {}", joined);
            joined
        }
        _ => {
            info!("Firefox SPNEGO disabled, using SSO login form");
            String::new()
        }
    };
    prefs.insert(TRUSTED_URIS_PREF.to_string(), Value::String(uris.clone()));
    prefs.insert(DELEGATION_URIS_PREF.to_string(), Value::String(uris));
    prefs
}

// --- Session Log ---

fn mentions_sso(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("auth") || lower.contains("sso")
}

/// Mirrors browser events to an append-only file for post-mortems.
#[derive(Clone)]
pub struct SessionLog {
    path: PathBuf,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl SessionLog {
    pub fn open(path: &Path) -> Result<Self, WorkdayError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                io_context(e, format!("Failed to create directory {}", parent.display()))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| io_context(e, format!("Failed to open browser log {}", path.display())))?;
        info!("Browser console logs: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: Arc::new(Mutex::new(Some(BufWriter::new(file)))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, line: &str) {
        if let Ok(mut guard) = self.writer.lock() {
            if let Some(writer) = guard.as_mut() {
                if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
                    debug!("Failed to write browser log line: {}", e);
                }
            }
        }
    }

    pub fn record(&self, event: &BrowserEvent) {
        match event {
            BrowserEvent::Console { level, text } => {
                self.write_line(&format!("[CONSOLE:{}] {}", level, text));
            }
            BrowserEvent::PageError(message) => {
                self.write_line(&format!("[PAGE ERROR] {}", message));
                warn!("Browser page error (Workday JS): {}", message);
            }
            BrowserEvent::Request {
                method,
                url,
                headers,
            } => {
                self.write_line(&format!("[REQUEST] {} {}", method, url));
                if let Some(auth) = headers.get("authorization") {
                    let scheme = auth.split_whitespace().next().unwrap_or_default();
                    warn!("AUTH REQUEST: {} - Authorization: {}...", url, scheme);
                } else if mentions_sso(url) {
                    debug!("SSO REQUEST: {}", url);
                }
            }
            BrowserEvent::Response(response) => {
                self.write_line(&format!("[RESPONSE] {} {}", response.status, response.url));
                let challenge = response.header("www-authenticate");
                if response.status == HTTP_UNAUTHORIZED || challenge.is_some() {
                    warn!(
                        "AUTH RESPONSE: {} {} - WWW-Authenticate: {}",
                        response.status,
                        response.url,
                        challenge.unwrap_or("NONE")
                    );
                } else if mentions_sso(&response.url) {
                    info!("SSO RESPONSE: {} {}", response.status, response.url);
                }
            }
        }
    }

    pub fn handler(&self) -> EventHandler {
        let log = self.clone();
        Arc::new(move |event| log.record(event))
    }

    /// Flushes and releases the file; later events are dropped.
    pub fn close(&self) {
        if let Ok(mut guard) = self.writer.lock() {
            if let Some(mut writer) = guard.take() {
                if let Err(e) = writer.flush() {
                    debug!("Failed to flush browser log: {}", e);
                }
            }
        }
    }
}

// --- Debug Snapshots ---

#[derive(Debug, Serialize)]
struct ErrorRecord {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct SnapshotRecord {
    context: String,
    timestamp: String,
    url: String,
    title: String,
    error: ErrorRecord,
    accessibility_snapshot: Value,
}

/// Files written by [`dump_debug_snapshot`]; `None` where a step failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugBundle {
    pub snapshot_path: Option<PathBuf>,
    pub screenshot_path: Option<PathBuf>,
}

fn timestamped_dumps() -> bool {
    std::env::var(DUMP_TIMESTAMP_ENV)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Writes `{context}.yaml` and `{context}.png` describing the page at failure time.
pub async fn dump_debug_snapshot(
    driver: &dyn BrowserDriver,
    context: &str,
    error_kind: &str,
    error_message: &str,
    snapshot_dir: &Path,
) -> DebugBundle {
    info!("Dumping debug snapshot for context: {}", context);
    let mut bundle = DebugBundle::default();

    if let Err(e) = fs::create_dir_all(snapshot_dir) {
        warn!("Cannot create snapshot dir {}: {}", snapshot_dir.display(), e);
        return bundle;
    }

    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let stem = if timestamped_dumps() {
        format!("{}_{}", context, timestamp)
    } else {
        context.to_string()
    };
    let yaml_path = snapshot_dir.join(format!("{}.yaml", stem));
    let png_path = snapshot_dir.join(format!("{}.png", stem));

    let url = driver
        .current_url()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    let title = driver.title().await.unwrap_or_else(|_| "unknown".to_string());
    let accessibility_snapshot = match driver.accessibility_snapshot().await {
        Ok(tree) => tree,
        Err(e) => {
            warn!("Failed to get accessibility snapshot: {}", e);
            serde_json::json!({ "error": e.to_string() })
        }
    };

    let record = SnapshotRecord {
        context: context.to_string(),
        timestamp,
        url,
        title,
        error: ErrorRecord {
            kind: error_kind.to_string(),
            message: error_message.to_string(),
        },
        accessibility_snapshot,
    };

    match serde_yaml::to_string(&record) {
        Ok(yaml) => match fs::write(&yaml_path, yaml) {
            Ok(()) => {
                info!("Debug snapshot saved to: {}", yaml_path.display());
                bundle.snapshot_path = Some(yaml_path);
            }
            Err(e) => warn!("Failed to write snapshot {}: {}", yaml_path.display(), e),
        },
        Err(e) => warn!("Failed to serialize debug snapshot: {}", e),
    }

    match driver.screenshot().await {
        Ok(png) => match fs::write(&png_path, png) {
            Ok(()) => {
                info!("Screenshot saved to: {}", png_path.display());
                bundle.screenshot_path = Some(png_path);
            }
            Err(e) => warn!("Failed to write screenshot {}: {}", png_path.display(), e),
        },
        Err(e) => warn!("Failed to save screenshot: {}", e),
    }

    bundle
}
