// src/webdriver.rs

//! Firefox over the W3C WebDriver protocol (geckodriver), via fantoccini.
//!
//! WebDriver has no network or console events, so a small script is injected
//! into the page that records console output, errors, and fetch/XHR traffic
//! into a buffer. The buffer is drained whenever the flow waits, and the
//! drained records are dispatched to the registered listeners.

use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator as By};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::browser::{
    BrowserDriver, BrowserEvent, BrowserLauncher, CapturedResponse, ElementState, EventHandler,
    Keyboard, LaunchOptions, ListenerId, ListenerRegistry, LoadState, Locator, RoleQuery,
    POLL_INTERVAL,
};
use crate::config::WorkdayConfig;
use crate::error::{driver_io_context, DriverError};

const EVENT_PUMP_INTERVAL: Duration = Duration::from_millis(250);

impl From<CmdError> for DriverError {
    fn from(e: CmdError) -> Self {
        DriverError::Command(e.to_string())
    }
}

fn script_err(e: serde_json::Error) -> DriverError {
    DriverError::Script(e.to_string())
}

// --- Injected Scripts ---

const EVENT_HOOK_JS: &str = r#"
if (!window.__iptaxHooked) {
  window.__iptaxHooked = true;
  window.__iptaxEvents = [];
  window.__iptaxPending = 0;
  const MAX_EVENTS = 500;
  const push = (e) => {
    if (window.__iptaxEvents.length < MAX_EVENTS) window.__iptaxEvents.push(e);
  };
  const stringify = (a) => {
    if (typeof a === 'string') return a;
    try { return JSON.stringify(a); } catch (_) { return String(a); }
  };
  ['log', 'info', 'warn', 'error', 'debug'].forEach((level) => {
    const original = console[level];
    console[level] = function (...args) {
      push({ kind: 'console', level: level, text: args.map(stringify).join(' ') });
      return original.apply(console, args);
    };
  });
  window.addEventListener('error', (ev) => {
    push({ kind: 'pageerror', message: String(ev.message || ev.error) });
  });
  const parseHeaders = (raw) => {
    const headers = {};
    (raw || '').trim().split(/[\r\n]+/).forEach((line) => {
      const idx = line.indexOf(':');
      if (idx > 0) headers[line.slice(0, idx).trim().toLowerCase()] = line.slice(idx + 1).trim();
    });
    return headers;
  };
  const wantsBody = (headers) => (headers['content-type'] || '').includes('application/json');

  const originalFetch = window.fetch;
  window.fetch = async function (input, init) {
    const url = typeof input === 'string' ? input : (input && input.url) || String(input);
    const method = (init && init.method) || (input && input.method) || 'GET';
    push({ kind: 'request', method: method, url: url, headers: {} });
    window.__iptaxPending++;
    try {
      const response = await originalFetch.apply(this, arguments);
      const headers = {};
      response.headers.forEach((v, k) => { headers[k.toLowerCase()] = v; });
      let body = null;
      if (wantsBody(headers)) {
        try { body = await response.clone().text(); } catch (_) {}
      }
      push({ kind: 'response', url: response.url || url, status: response.status, headers: headers, body: body });
      return response;
    } finally {
      window.__iptaxPending--;
    }
  };

  const open = XMLHttpRequest.prototype.open;
  const send = XMLHttpRequest.prototype.send;
  const setHeader = XMLHttpRequest.prototype.setRequestHeader;
  XMLHttpRequest.prototype.open = function (method, url) {
    this.__iptax = { method: method, url: String(url), headers: {} };
    return open.apply(this, arguments);
  };
  XMLHttpRequest.prototype.setRequestHeader = function (name, value) {
    if (this.__iptax) this.__iptax.headers[String(name).toLowerCase()] = String(value);
    return setHeader.apply(this, arguments);
  };
  XMLHttpRequest.prototype.send = function () {
    const meta = this.__iptax || { method: 'GET', url: '', headers: {} };
    push({ kind: 'request', method: meta.method, url: meta.url, headers: meta.headers });
    window.__iptaxPending++;
    this.addEventListener('loadend', () => {
      window.__iptaxPending--;
      const headers = parseHeaders(this.getAllResponseHeaders());
      let body = null;
      if (wantsBody(headers) && (this.responseType === '' || this.responseType === 'text')) {
        body = this.responseText;
      }
      push({ kind: 'response', url: this.responseURL || meta.url, status: this.status, headers: headers, body: body });
    });
    return send.apply(this, arguments);
  };
}
"#;

const DRAIN_EVENTS_JS: &str = r#"
const drained = window.__iptaxEvents || [];
window.__iptaxEvents = [];
return drained;
"#;

const READY_STATE_JS: &str =
    "return { ready: document.readyState, pending: window.__iptaxPending || 0 };";

/// Accessible name and heading level, roughly following accname rules.
const ACCESSIBLE_INFO_JS: &str = r#"
const el = arguments[0];
const clean = (s) => (s || '').replace(/\s+/g, ' ').trim();
let name = el.getAttribute('aria-label');
if (!name && el.getAttribute('aria-labelledby')) {
  name = el.getAttribute('aria-labelledby').split(/\s+/)
    .map((id) => { const n = document.getElementById(id); return n ? n.textContent : ''; })
    .join(' ');
}
if (!name && el.labels && el.labels.length) {
  name = Array.from(el.labels).map((l) => l.textContent).join(' ');
}
if (!name) name = el.getAttribute('placeholder') || el.getAttribute('title');
if (!name && (el.tagName === 'INPUT') && ['submit', 'button'].includes(el.type)) name = el.value;
if (!name) name = el.textContent;
let level = null;
const m = /^H([1-6])$/.exec(el.tagName);
if (m) level = Number(m[1]);
else if (el.getAttribute('aria-level')) level = Number(el.getAttribute('aria-level'));
return { name: clean(name), level: level };
"#;

const TEXT_CONTENT_JS: &str = "return arguments[0].textContent;";

const SELECT_ACTIVE_JS: &str = r#"
const el = document.activeElement;
if (el && typeof el.select === 'function') el.select();
else document.execCommand('selectAll');
"#;

const ACCESSIBILITY_TREE_JS: &str = r#"
const IMPLICIT = { A: 'link', BUTTON: 'button', H1: 'heading', H2: 'heading', H3: 'heading',
  H4: 'heading', H5: 'heading', H6: 'heading', INPUT: 'textbox', TEXTAREA: 'textbox',
  SELECT: 'combobox', NAV: 'navigation', MAIN: 'main', UL: 'list', LI: 'listitem', TABLE: 'table' };
const clean = (s) => (s || '').replace(/\s+/g, ' ').trim().slice(0, 120);
const walk = (el, depth) => {
  const children = [];
  if (depth < 40) {
    for (const child of el.children) {
      const node = walk(child, depth + 1);
      if (node) Array.isArray(node) ? children.push(...node) : children.push(node);
    }
  }
  const style = window.getComputedStyle(el);
  if (style.display === 'none' || style.visibility === 'hidden') return null;
  const role = el.getAttribute('role') || IMPLICIT[el.tagName];
  if (!role) return children;
  const node = { role: role, name: clean(el.getAttribute('aria-label') || el.textContent) };
  if (children.length) node.children = children;
  return node;
};
const root = walk(document.body, 0);
return { role: 'document', name: document.title, children: Array.isArray(root) ? root : [root] };
"#;

fn role_xpath(role: &str) -> String {
    let native = match role {
        "button" => "self::button or (self::input and (@type='submit' or @type='button'))",
        "textbox" => {
            "self::textarea or (self::input and (not(@type) or @type='text' or @type='email' or @type='password'))"
        }
        "link" => "self::a[@href]",
        "heading" => "self::h1 or self::h2 or self::h3 or self::h4 or self::h5 or self::h6",
        "spinbutton" => "self::input[@type='number']",
        _ => "",
    };
    if native.is_empty() {
        format!(".//*[@role='{}']", role)
    } else {
        format!(".//*[@role='{}' or {}]", role, native)
    }
}

// --- Event Records ---

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum RawEvent {
    Console {
        level: String,
        text: String,
    },
    #[serde(rename = "pageerror")]
    PageError {
        message: String,
    },
    Request {
        method: String,
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Response {
        url: String,
        status: u16,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<String>,
    },
}

fn lowercase_keys(headers: HashMap<String, String>) -> HashMap<String, String> {
    headers
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect()
}

impl From<RawEvent> for BrowserEvent {
    fn from(raw: RawEvent) -> Self {
        match raw {
            RawEvent::Console { level, text } => BrowserEvent::Console { level, text },
            RawEvent::PageError { message } => BrowserEvent::PageError(message),
            RawEvent::Request {
                method,
                url,
                headers,
            } => BrowserEvent::Request {
                method,
                url,
                headers: lowercase_keys(headers),
            },
            RawEvent::Response {
                url,
                status,
                headers,
                body,
            } => BrowserEvent::Response(CapturedResponse {
                url,
                status,
                headers: lowercase_keys(headers),
                body,
            }),
        }
    }
}

fn decode_events(drained: Value) -> Vec<BrowserEvent> {
    let Value::Array(items) = drained else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawEvent>(item) {
            Ok(raw) => Some(raw.into()),
            Err(e) => {
                trace!("Dropping malformed browser event: {}", e);
                None
            }
        })
        .collect()
}

// --- Launcher ---

pub struct WebDriverLauncher {
    webdriver_url: String,
}

impl WebDriverLauncher {
    pub fn new(webdriver_url: impl Into<String>) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
        }
    }

    pub fn from_config(config: &WorkdayConfig) -> Self {
        Self::new(config.webdriver_url.clone())
    }
}

fn firefox_capabilities(options: &LaunchOptions) -> Map<String, Value> {
    let mut args = vec![
        Value::String("-profile".into()),
        Value::String(options.profile_dir.display().to_string()),
    ];
    if options.headless {
        args.push(Value::String("-headless".into()));
    }

    let mut caps = Map::new();
    caps.insert("browserName".into(), json!("firefox"));
    // goto returns at DOMContentLoaded, SSO redirects are observed by polling
    caps.insert("pageLoadStrategy".into(), json!("eager"));
    caps.insert(
        "moz:firefoxOptions".into(),
        json!({ "args": args, "prefs": options.prefs }),
    );
    caps
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserDriver>, DriverError> {
        info!(
            "Starting Firefox session via {} (headless: {})",
            self.webdriver_url, options.headless
        );
        std::fs::metadata(&options.profile_dir).map_err(|e| {
            driver_io_context(
                e,
                format!("Firefox profile {} is not accessible", options.profile_dir.display()),
            )
        })?;
        let mut builder = ClientBuilder::rustls()
            .map_err(|e| DriverError::Launch(format!("TLS setup failed: {}", e)))?;
        builder.capabilities(firefox_capabilities(options));
        let client = builder.connect(&self.webdriver_url).await.map_err(|e| {
            DriverError::Launch(format!(
                "Cannot open a WebDriver session at {}: {}",
                self.webdriver_url, e
            ))
        })?;

        let (width, height) = options.viewport;
        client.set_window_size(width, height).await?;
        Ok(Box::new(WebDriverBrowser::new(client)))
    }
}

// --- Browser ---

pub struct WebDriverBrowser {
    client: Client,
    listeners: Arc<ListenerRegistry>,
    keyboard: WebDriverKeyboard,
}

impl WebDriverBrowser {
    pub fn new(client: Client) -> Self {
        Self {
            keyboard: WebDriverKeyboard {
                client: client.clone(),
            },
            client,
            listeners: Arc::new(ListenerRegistry::default()),
        }
    }

    /// Installs the event hook if the page lost it and dispatches buffered events.
    async fn pump_events(&self) {
        let script = format!("{}\n{}", EVENT_HOOK_JS, DRAIN_EVENTS_JS);
        match self.client.execute(&script, Vec::new()).await {
            Ok(drained) => {
                for event in decode_events(drained) {
                    self.listeners.dispatch(&event);
                }
            }
            // Common mid-navigation, the next pump catches up
            Err(e) => trace!("Event pump skipped: {}", e),
        }
    }

    fn locator_for(&self, target: Target) -> Box<dyn Locator> {
        Box::new(WebDriverLocator {
            client: self.client.clone(),
            target,
        })
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn goto(&self, url: &str, wait_until: LoadState) -> Result<(), DriverError> {
        debug!("goto {}", url);
        self.client.goto(url).await?;
        self.pump_events().await;
        if wait_until != LoadState::DomContentLoaded {
            self.wait_for_load_state(wait_until, crate::browser::DEFAULT_TIMEOUT)
                .await?;
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.client.current_url().await?.to_string())
    }

    async fn title(&self) -> Result<String, DriverError> {
        Ok(self.client.title().await?)
    }

    fn get_by_role(&self, query: RoleQuery) -> Box<dyn Locator> {
        self.locator_for(Target::Role(query))
    }

    fn locator(&self, css: &str) -> Box<dyn Locator> {
        self.locator_for(Target::Css(css.to_string()))
    }

    fn keyboard(&self) -> &dyn Keyboard {
        &self.keyboard
    }

    async fn wait_for_timeout(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            self.pump_events().await;
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            tokio::time::sleep(EVENT_PUMP_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn wait_for_load_state(
        &self,
        state: LoadState,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump_events().await;
            let status = self.client.execute(READY_STATE_JS, Vec::new()).await?;
            let ready = status["ready"].as_str().unwrap_or_default();
            let pending = status["pending"].as_i64().unwrap_or(0);
            let reached = match state {
                LoadState::DomContentLoaded => ready == "interactive" || ready == "complete",
                LoadState::Load => ready == "complete",
                LoadState::NetworkIdle => ready == "complete" && pending <= 0,
            };
            if reached {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::timeout(format!("load state {:?}", state), timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        self.client
            .execute(&format!("return ({});", script), Vec::new())
            .await
            .map_err(|e| DriverError::Script(e.to_string()))
    }

    fn add_listener(&self, handler: EventHandler) -> ListenerId {
        self.listeners.add(handler)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        Ok(self.client.screenshot().await?)
    }

    async fn accessibility_snapshot(&self) -> Result<Value, DriverError> {
        self.client
            .execute(ACCESSIBILITY_TREE_JS, Vec::new())
            .await
            .map_err(|e| DriverError::Script(e.to_string()))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.pump_events().await;
        self.client.clone().close().await?;
        Ok(())
    }
}

// --- Keyboard ---

struct WebDriverKeyboard {
    client: Client,
}

/// WebDriver key codepoints for the named keys the flows use.
fn key_code(key: &str) -> Option<&'static str> {
    match key {
        "Enter" => Some("\u{E007}"),
        "Tab" => Some("\u{E004}"),
        "Escape" => Some("\u{E00C}"),
        "Backspace" => Some("\u{E003}"),
        "Delete" => Some("\u{E017}"),
        _ => None,
    }
}

#[async_trait]
impl Keyboard for WebDriverKeyboard {
    async fn press(&self, key: &str) -> Result<(), DriverError> {
        if matches!(key, "Control+a" | "Meta+a") {
            self.client.execute(SELECT_ACTIVE_JS, Vec::new()).await?;
            return Ok(());
        }
        let keys = match key_code(key) {
            Some(code) => code.to_string(),
            None if key.chars().count() == 1 => key.to_string(),
            None => return Err(DriverError::Command(format!("Unsupported key: {}", key))),
        };
        self.client.active_element().await?.send_keys(&keys).await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), DriverError> {
        self.client.active_element().await?.send_keys(text).await?;
        Ok(())
    }
}

// --- Locators ---

enum Target {
    Role(RoleQuery),
    Css(String),
}

struct WebDriverLocator {
    client: Client,
    target: Target,
}

impl WebDriverLocator {
    async fn matches(&self) -> Result<Vec<Element>, DriverError> {
        match &self.target {
            Target::Css(selector) => Ok(self.client.find_all(By::Css(selector)).await?),
            Target::Role(query) => {
                let xpath = role_xpath(&query.role);
                let candidates = self.client.find_all(By::XPath(&xpath)).await?;
                if query.name.is_none() && query.level.is_none() {
                    return Ok(candidates);
                }
                let mut matching = Vec::new();
                for element in candidates {
                    let arg = serde_json::to_value(&element).map_err(script_err)?;
                    let info = self.client.execute(ACCESSIBLE_INFO_JS, vec![arg]).await?;
                    let name = info["name"].as_str().unwrap_or_default();
                    let level = info["level"].as_u64().map(|l| l as u8);
                    if query.accepts(&query.role, name, level) {
                        matching.push(element);
                    }
                }
                Ok(matching)
            }
        }
    }

    async fn first(&self) -> Result<Option<Element>, DriverError> {
        Ok(self.matches().await?.into_iter().next())
    }

    async fn first_visible(&self) -> Result<Option<Element>, DriverError> {
        for element in self.matches().await? {
            if element.is_displayed().await.unwrap_or(false) {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    /// Polls until `state` holds; returns the element it settled on, if any.
    async fn settle(
        &self,
        state: ElementState,
        timeout: Duration,
    ) -> Result<Option<Element>, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Stale handles during re-renders count as a miss for this round
            let probe = match state {
                ElementState::Attached | ElementState::Detached => self.first().await,
                ElementState::Visible | ElementState::Hidden => self.first_visible().await,
            };
            let found = match probe {
                Ok(found) => found,
                Err(e) => {
                    trace!("{} probe failed: {}", self.describe(), e);
                    None
                }
            };
            let done = match state {
                ElementState::Attached | ElementState::Visible => found.is_some(),
                ElementState::Detached | ElementState::Hidden => found.is_none(),
            };
            if done {
                return Ok(found);
            }
            if Instant::now() >= deadline {
                return Err(DriverError::timeout(self.describe(), timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn visible(&self, timeout: Duration) -> Result<Element, DriverError> {
        self.settle(ElementState::Visible, timeout)
            .await?
            .ok_or_else(|| DriverError::ElementNotFound(self.describe()))
    }
}

#[async_trait]
impl Locator for WebDriverLocator {
    async fn wait_for(&self, state: ElementState, timeout: Duration) -> Result<(), DriverError> {
        self.settle(state, timeout).await.map(|_| ())
    }

    async fn click(&self, timeout: Duration) -> Result<(), DriverError> {
        let element = self.visible(timeout).await?;
        element.click().await?;
        Ok(())
    }

    async fn fill(&self, value: &str, timeout: Duration) -> Result<(), DriverError> {
        let element = self.visible(timeout).await?;
        element.clear().await?;
        element.send_keys(value).await?;
        Ok(())
    }

    async fn text_content(&self, timeout: Duration) -> Result<Option<String>, DriverError> {
        let Some(element) = self.settle(ElementState::Attached, timeout).await? else {
            return Ok(None);
        };
        let arg = serde_json::to_value(&element).map_err(script_err)?;
        let text = self.client.execute(TEXT_CONTENT_JS, vec![arg]).await?;
        Ok(text.as_str().map(str::to_string))
    }

    async fn is_visible(&self) -> Result<bool, DriverError> {
        Ok(self.first_visible().await?.is_some())
    }

    fn describe(&self) -> String {
        match &self.target {
            Target::Role(query) => query.to_string(),
            Target::Css(selector) => format!("css={}", selector),
        }
    }
}
