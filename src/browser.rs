// src/browser.rs

//! Capability interface the authentication and scraping flows are written
//! against. The WebDriver backend in `webdriver.rs` implements it for a real
//! Firefox; tests substitute a scripted fake.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::error::DriverError;

pub const VIEWPORT_WIDTH: u32 = 1280;
pub const VIEWPORT_HEIGHT: u32 = 720;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const ELEMENT_TIMEOUT: Duration = Duration::from_secs(10);
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

// --- Waiting Primitives ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// DOMContentLoaded; enough to observe SSO redirects.
    DomContentLoaded,
    Load,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Attached,
    Detached,
    Visible,
    Hidden,
}

// --- Role Queries ---

#[derive(Debug, Clone)]
pub enum NameMatch {
    /// Whole accessible name, after trimming.
    Exact(String),
    /// Case-insensitive substring.
    Contains(String),
    Pattern(Regex),
}

impl NameMatch {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMatch::Exact(expected) => name.trim() == expected,
            NameMatch::Contains(part) => name.to_lowercase().contains(&part.to_lowercase()),
            NameMatch::Pattern(re) => re.is_match(name),
        }
    }
}

impl fmt::Display for NameMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameMatch::Exact(s) => write!(f, "\"{}\"", s),
            NameMatch::Contains(s) => write!(f, "~\"{}\"", s),
            NameMatch::Pattern(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// ARIA role plus optional accessible-name and heading-level filters.
#[derive(Debug, Clone)]
pub struct RoleQuery {
    pub role: String,
    pub name: Option<NameMatch>,
    pub level: Option<u8>,
}

impl RoleQuery {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: None,
            level: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(NameMatch::Contains(name.into()));
        self
    }

    pub fn exact(mut self, name: impl Into<String>) -> Self {
        self.name = Some(NameMatch::Exact(name.into()));
        self
    }

    pub fn pattern(mut self, re: Regex) -> Self {
        self.name = Some(NameMatch::Pattern(re));
        self
    }

    pub fn level(mut self, level: u8) -> Self {
        self.level = Some(level);
        self
    }

    /// Whether an element with this role, name and level satisfies the query.
    pub fn accepts(&self, role: &str, name: &str, level: Option<u8>) -> bool {
        role == self.role
            && self.name.as_ref().map_or(true, |m| m.matches(name))
            && self.level.map_or(true, |l| level == Some(l))
    }
}

impl fmt::Display for RoleQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "role={}", self.role)?;
        if let Some(name) = &self.name {
            write!(f, " name={}", name)?;
        }
        if let Some(level) = self.level {
            write!(f, " level={}", level)?;
        }
        Ok(())
    }
}

// --- Network & Console Events ---

#[derive(Debug, Clone, Default)]
pub struct CapturedResponse {
    pub url: String,
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl CapturedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(self.body.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Clone)]
pub enum BrowserEvent {
    Console { level: String, text: String },
    PageError(String),
    Request {
        method: String,
        url: String,
        headers: HashMap<String, String>,
    },
    Response(CapturedResponse),
}

pub type EventHandler = Arc<dyn Fn(&BrowserEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event fan-out shared by driver implementations.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(ListenerId, EventHandler)>>,
}

impl ListenerRegistry {
    pub fn add(&self, handler: EventHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push((id, handler));
        }
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        match self.handlers.lock() {
            Ok(mut handlers) => {
                let before = handlers.len();
                handlers.retain(|(existing, _)| *existing != id);
                handlers.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispatch(&self, event: &BrowserEvent) {
        // Handlers run outside the lock so they may (un)register listeners
        let handlers: Vec<EventHandler> = match self.handlers.lock() {
            Ok(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            Err(_) => return,
        };
        for handler in handlers {
            handler(event);
        }
    }
}

// --- Capability Traits ---

/// Lazily-resolved element query. Actions apply to the first visible match.
#[async_trait]
pub trait Locator: Send + Sync {
    async fn wait_for(&self, state: ElementState, timeout: Duration) -> Result<(), DriverError>;
    async fn click(&self, timeout: Duration) -> Result<(), DriverError>;
    async fn fill(&self, value: &str, timeout: Duration) -> Result<(), DriverError>;
    async fn text_content(&self, timeout: Duration) -> Result<Option<String>, DriverError>;
    async fn is_visible(&self) -> Result<bool, DriverError>;
    fn describe(&self) -> String;
}

#[async_trait]
pub trait Keyboard: Send + Sync {
    /// A single key or a `Modifier+key` chord such as `Control+a`.
    async fn press(&self, key: &str) -> Result<(), DriverError>;
    async fn type_text(&self, text: &str) -> Result<(), DriverError>;
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&self, url: &str, wait_until: LoadState) -> Result<(), DriverError>;
    async fn current_url(&self) -> Result<String, DriverError>;
    async fn title(&self) -> Result<String, DriverError>;

    fn get_by_role(&self, query: RoleQuery) -> Box<dyn Locator>;
    fn locator(&self, css: &str) -> Box<dyn Locator>;
    fn keyboard(&self) -> &dyn Keyboard;

    async fn wait_for_timeout(&self, duration: Duration);
    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration)
        -> Result<(), DriverError>;
    async fn evaluate(&self, script: &str) -> Result<Value, DriverError>;

    fn add_listener(&self, handler: EventHandler) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);

    /// Full-page PNG.
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;
    async fn accessibility_snapshot(&self) -> Result<Value, DriverError>;
    async fn close(&self) -> Result<(), DriverError>;

    /// Polls until the current URL's host contains `host_fragment`.
    async fn wait_for_url(
        &self,
        host_fragment: &str,
        timeout: Duration,
    ) -> Result<String, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            let url = self.current_url().await?;
            if host_contains(&url, host_fragment) {
                return Ok(url);
            }
            if Instant::now() >= deadline {
                return Err(DriverError::timeout(
                    format!("URL on host {}", host_fragment),
                    timeout,
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Removes a listener when dropped, whichever way the owning scope exits.
pub struct ListenerGuard<'a> {
    driver: &'a dyn BrowserDriver,
    id: ListenerId,
}

impl<'a> ListenerGuard<'a> {
    pub fn register(driver: &'a dyn BrowserDriver, handler: EventHandler) -> Self {
        let id = driver.add_listener(handler);
        Self { driver, id }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.driver.remove_listener(self.id);
    }
}

pub fn host_contains(url: &str, host_fragment: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.contains(host_fragment)))
        .unwrap_or(false)
}

// --- Launching ---

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub profile_dir: PathBuf,
    pub headless: bool,
    pub prefs: Map<String, Value>,
    pub viewport: (u32, u32),
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserDriver>, DriverError>;
}
