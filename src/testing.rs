// src/testing.rs

//! Scripted browser and prompter doubles for exercising the Workday flows
//! without a real Firefox.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::browser::*;
use crate::calendar::WorkHours;
use crate::error::{DriverError, WorkdayError};
use crate::prompts::{Credentials, FailureAction, Prompter};
use crate::scraping::CALENDAR_ENTRIES_API_PATTERN;

pub const PORTAL_URL: &str = "https://wd5.myworkday.com/acme/";
pub const SSO_URL: &str = "https://sso.example.com/login";

// --- Fake Page Model ---

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub id: String,
    pub role: String,
    pub name: String,
    pub level: Option<u8>,
    pub css: Option<String>,
    pub visible: bool,
    pub text: Option<String>,
}

impl FakeElement {
    pub fn new(id: &str, role: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            role: role.to_string(),
            name: name.to_string(),
            level: None,
            css: None,
            visible: true,
            text: Some(name.to_string()),
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn level(mut self, level: u8) -> Self {
        self.level = Some(level);
        self
    }

    pub fn css(mut self, selector: &str) -> Self {
        self.css = Some(selector.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub enum FakeAction {
    Navigate(String),
    Show(String),
    Hide(String),
    /// Jump the calendar to the given week index.
    ShowWeek(usize),
    WeekForward,
    WeekBack,
}

#[derive(Debug, Clone)]
pub struct FakeWeek {
    pub heading: String,
    pub payload: Option<Value>,
}

#[derive(Default)]
struct FakeState {
    url: String,
    title: String,
    elements: Vec<FakeElement>,
    click_queue: HashMap<String, VecDeque<Vec<FakeAction>>>,
    click_default: HashMap<String, Vec<FakeAction>>,
    goto_actions: HashMap<String, Vec<FakeAction>>,
    weeks: Vec<FakeWeek>,
    week_index: Option<usize>,
    log: Vec<String>,
    filled: HashMap<String, String>,
    closed: bool,
    screenshot_fails: bool,
    snapshot_fails: bool,
    close_fails: bool,
}

struct Inner {
    state: Mutex<FakeState>,
    listeners: ListenerRegistry,
}

impl Inner {
    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut guard = self.state.lock().unwrap();
        f(&mut guard)
    }

    fn apply(&self, actions: Vec<FakeAction>) {
        for action in actions {
            let events = self.with_state(|state| state.apply(action));
            for event in events {
                self.listeners.dispatch(&event);
            }
        }
    }
}

pub fn calendar_response(index: usize, payload: &Value) -> CapturedResponse {
    let mut headers = HashMap::new();
    headers.insert(
        "content-type".to_string(),
        "application/json;charset=UTF-8".to_string(),
    );
    CapturedResponse {
        url: format!(
            "https://wd5.myworkday.com/acme{}?week={}",
            CALENDAR_ENTRIES_API_PATTERN, index
        ),
        status: 200,
        headers,
        body: Some(payload.to_string()),
    }
}

impl FakeState {
    fn element_mut(&mut self, id: &str) -> Option<&mut FakeElement> {
        self.elements.iter_mut().find(|e| e.id == id)
    }

    fn show_week(&mut self, index: usize) -> Vec<BrowserEvent> {
        let Some(week) = self.weeks.get(index).cloned() else {
            return Vec::new();
        };
        self.week_index = Some(index);
        if let Some(heading) = self.element_mut("week-heading") {
            heading.name = week.heading.clone();
            heading.text = Some(week.heading.clone());
            heading.visible = true;
        }
        week.payload
            .map(|p| vec![BrowserEvent::Response(calendar_response(index, &p))])
            .unwrap_or_default()
    }

    fn apply(&mut self, action: FakeAction) -> Vec<BrowserEvent> {
        match action {
            FakeAction::Navigate(url) => {
                self.url = url;
                Vec::new()
            }
            FakeAction::Show(id) => {
                if let Some(e) = self.element_mut(&id) {
                    e.visible = true;
                }
                Vec::new()
            }
            FakeAction::Hide(id) => {
                if let Some(e) = self.element_mut(&id) {
                    e.visible = false;
                }
                Vec::new()
            }
            FakeAction::ShowWeek(index) => self.show_week(index),
            FakeAction::WeekForward => match self.week_index {
                Some(i) => self.show_week(i + 1),
                None => Vec::new(),
            },
            FakeAction::WeekBack => match self.week_index {
                Some(i) if i > 0 => self.show_week(i - 1),
                _ => Vec::new(),
            },
        }
    }

    // First visible match, else the first hidden one
    fn find(&self, query: &FakeQuery) -> Option<FakeElement> {
        let matching: Vec<&FakeElement> = self
            .elements
            .iter()
            .filter(|e| match query {
                FakeQuery::Role(q) => q.accepts(&e.role, &e.name, e.level),
                FakeQuery::Css(sel) => e.css.as_deref() == Some(sel.as_str()),
            })
            .collect();
        matching
            .iter()
            .find(|e| e.visible)
            .or_else(|| matching.first())
            .map(|e| (*e).clone())
    }
}

// --- Fake Browser ---

#[derive(Clone)]
pub struct FakeBrowser {
    inner: Arc<Inner>,
    keyboard: FakeKeyboard,
}

impl FakeBrowser {
    pub fn new(url: &str) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(FakeState {
                url: url.to_string(),
                title: "Workday".to_string(),
                ..FakeState::default()
            }),
            listeners: ListenerRegistry::default(),
        });
        Self {
            keyboard: FakeKeyboard {
                inner: Arc::clone(&inner),
            },
            inner,
        }
    }

    pub fn add_element(&self, element: FakeElement) -> &Self {
        self.inner.with_state(|s| s.elements.push(element));
        self
    }

    /// Actions for the next click on `id`; queued scripts run once each, in order.
    pub fn on_click_once(&self, id: &str, actions: Vec<FakeAction>) -> &Self {
        self.inner.with_state(|s| {
            s.click_queue
                .entry(id.to_string())
                .or_default()
                .push_back(actions)
        });
        self
    }

    /// Actions for every click on `id` once its queue is empty.
    pub fn on_click(&self, id: &str, actions: Vec<FakeAction>) -> &Self {
        self.inner
            .with_state(|s| s.click_default.insert(id.to_string(), actions));
        self
    }

    pub fn on_goto(&self, url: &str, actions: Vec<FakeAction>) -> &Self {
        self.inner
            .with_state(|s| s.goto_actions.insert(url.to_string(), actions));
        self
    }

    pub fn set_weeks(&self, weeks: Vec<FakeWeek>) -> &Self {
        self.inner.with_state(|s| s.weeks = weeks);
        self
    }

    pub fn fail_screenshots(&self) -> &Self {
        self.inner.with_state(|s| s.screenshot_fails = true);
        self
    }

    pub fn fail_accessibility_snapshot(&self) -> &Self {
        self.inner.with_state(|s| s.snapshot_fails = true);
        self
    }

    /// Close still marks the browser closed, then reports an error.
    pub fn fail_close(&self) -> &Self {
        self.inner.with_state(|s| s.close_fails = true);
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.inner.with_state(|s| s.log.clone())
    }

    pub fn filled(&self, id: &str) -> Option<String> {
        self.inner.with_state(|s| s.filled.get(id).cloned())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.with_state(|s| s.closed)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn url(&self) -> String {
        self.inner.with_state(|s| s.url.clone())
    }

    fn record(&self, line: String) {
        self.inner.with_state(|s| s.log.push(line));
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn goto(&self, url: &str, _wait_until: LoadState) -> Result<(), DriverError> {
        self.record(format!("goto {}", url));
        let actions = self.inner.with_state(|s| {
            s.url = url.to_string();
            s.goto_actions.get(url).cloned().unwrap_or_default()
        });
        self.inner.apply(actions);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.url())
    }

    async fn title(&self) -> Result<String, DriverError> {
        Ok(self.inner.with_state(|s| s.title.clone()))
    }

    fn get_by_role(&self, query: RoleQuery) -> Box<dyn Locator> {
        Box::new(FakeLocator {
            inner: Arc::clone(&self.inner),
            query: FakeQuery::Role(query),
        })
    }

    fn locator(&self, css: &str) -> Box<dyn Locator> {
        Box::new(FakeLocator {
            inner: Arc::clone(&self.inner),
            query: FakeQuery::Css(css.to_string()),
        })
    }

    fn keyboard(&self) -> &dyn Keyboard {
        &self.keyboard
    }

    async fn wait_for_timeout(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn wait_for_load_state(
        &self,
        _state: LoadState,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        self.record(format!("evaluate {}", script));
        Ok(Value::Null)
    }

    fn add_listener(&self, handler: EventHandler) -> ListenerId {
        self.inner.listeners.add(handler)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.inner.listeners.remove(id);
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        if self.inner.with_state(|s| s.screenshot_fails) {
            return Err(DriverError::Command("screenshot unavailable".into()));
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn accessibility_snapshot(&self) -> Result<Value, DriverError> {
        if self.inner.with_state(|s| s.snapshot_fails) {
            return Err(DriverError::Script("accessibility tree unavailable".into()));
        }
        let children: Vec<Value> = self.inner.with_state(|s| {
            s.elements
                .iter()
                .filter(|e| e.visible)
                .map(|e| json!({ "role": e.role, "name": e.name }))
                .collect()
        });
        Ok(json!({ "role": "document", "children": children }))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.record("close".to_string());
        if self.inner.with_state(|s| {
            s.closed = true;
            s.close_fails
        }) {
            return Err(DriverError::Command("session already gone".into()));
        }
        Ok(())
    }
}

#[derive(Clone)]
struct FakeKeyboard {
    inner: Arc<Inner>,
}

#[async_trait]
impl Keyboard for FakeKeyboard {
    async fn press(&self, key: &str) -> Result<(), DriverError> {
        self.inner
            .with_state(|s| s.log.push(format!("press {}", key)));
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), DriverError> {
        self.inner
            .with_state(|s| s.log.push(format!("type {}", text)));
        Ok(())
    }
}

enum FakeQuery {
    Role(RoleQuery),
    Css(String),
}

struct FakeLocator {
    inner: Arc<Inner>,
    query: FakeQuery,
}

impl FakeLocator {
    fn current(&self) -> Option<FakeElement> {
        self.inner.with_state(|s| s.find(&self.query))
    }

    async fn wait_until(
        &self,
        state: ElementState,
        timeout: Duration,
    ) -> Result<Option<FakeElement>, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            let found = self.current();
            let done = match state {
                ElementState::Attached => found.is_some(),
                ElementState::Detached => found.is_none(),
                ElementState::Visible => found.as_ref().map_or(false, |e| e.visible),
                ElementState::Hidden => found.as_ref().map_or(true, |e| !e.visible),
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

    async fn visible(&self, timeout: Duration) -> Result<FakeElement, DriverError> {
        self.wait_until(ElementState::Visible, timeout)
            .await?
            .ok_or_else(|| DriverError::ElementNotFound(self.describe()))
    }
}

#[async_trait]
impl Locator for FakeLocator {
    async fn wait_for(&self, state: ElementState, timeout: Duration) -> Result<(), DriverError> {
        self.wait_until(state, timeout).await.map(|_| ())
    }

    async fn click(&self, timeout: Duration) -> Result<(), DriverError> {
        let element = self.visible(timeout).await?;
        let actions = self.inner.with_state(|s| {
            s.log.push(format!("click {}", element.id));
            s.click_queue
                .get_mut(&element.id)
                .and_then(VecDeque::pop_front)
                .or_else(|| s.click_default.get(&element.id).cloned())
                .unwrap_or_default()
        });
        self.inner.apply(actions);
        Ok(())
    }

    async fn fill(&self, value: &str, timeout: Duration) -> Result<(), DriverError> {
        let element = self.visible(timeout).await?;
        self.inner.with_state(|s| {
            s.log.push(format!("fill {}", element.id));
            s.filled.insert(element.id.clone(), value.to_string());
        });
        Ok(())
    }

    async fn text_content(&self, timeout: Duration) -> Result<Option<String>, DriverError> {
        Ok(self
            .wait_until(ElementState::Attached, timeout)
            .await?
            .and_then(|e| e.text))
    }

    async fn is_visible(&self) -> Result<bool, DriverError> {
        Ok(self.current().map_or(false, |e| e.visible))
    }

    fn describe(&self) -> String {
        match &self.query {
            FakeQuery::Role(q) => q.to_string(),
            FakeQuery::Css(sel) => format!("css={}", sel),
        }
    }
}

// --- Fake Launcher ---

#[derive(Default)]
pub struct FakeLauncher {
    browsers: Mutex<VecDeque<Result<FakeBrowser, String>>>,
    pub launches: Mutex<Vec<LaunchOptions>>,
}

impl FakeLauncher {
    pub fn new(results: Vec<Result<FakeBrowser, String>>) -> Self {
        Self {
            browsers: Mutex::new(results.into()),
            launches: Mutex::new(Vec::new()),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserDriver>, DriverError> {
        self.launches.lock().unwrap().push(options.clone());
        match self.browsers.lock().unwrap().pop_front() {
            Some(Ok(browser)) => Ok(Box::new(browser)),
            Some(Err(message)) => Err(DriverError::Launch(message)),
            None => Err(DriverError::Launch("no browser scripted".into())),
        }
    }
}

// --- Scripted Prompter ---

#[derive(Default)]
pub struct ScriptedPrompter {
    credentials: Mutex<VecDeque<Credentials>>,
    actions: Mutex<VecDeque<FailureAction>>,
    manual: Mutex<Option<WorkHours>>,
    pub credential_prompts: Mutex<u32>,
    pub manual_prompts: Mutex<Vec<(NaiveDate, NaiveDate)>>,
    pub telemetry: Mutex<Vec<String>>,
    pub notices: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn with_credentials(credentials: Vec<Credentials>) -> Self {
        Self {
            credentials: Mutex::new(credentials.into()),
            ..Self::default()
        }
    }

    pub fn with_actions(self, actions: Vec<FailureAction>) -> Self {
        *self.actions.lock().unwrap() = actions.into();
        self
    }

    pub fn with_manual(self, hours: WorkHours) -> Self {
        *self.manual.lock().unwrap() = Some(hours);
        self
    }

    pub fn credential_prompt_count(&self) -> u32 {
        *self.credential_prompts.lock().unwrap()
    }

    pub fn manual_prompt_count(&self) -> usize {
        self.manual_prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    fn prompt_credentials(&self) -> Result<Credentials, WorkdayError> {
        *self.credential_prompts.lock().unwrap() += 1;
        self.credentials
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| WorkdayError::Prompt("no credentials scripted".into()))
    }

    fn prompt_manual_work_hours(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<WorkHours, WorkdayError> {
        self.manual_prompts.lock().unwrap().push((start, end));
        self.manual
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| WorkdayError::Prompt("no manual hours scripted".into()))
    }

    fn choose_failure_action(&self) -> Result<FailureAction, WorkdayError> {
        Ok(self
            .actions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FailureAction::Manual))
    }

    fn show_telemetry(&self, lines: &[String]) {
        self.telemetry.lock().unwrap().extend(lines.iter().cloned());
    }

    fn notify(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}

// --- Canned Pages ---

/// SSO page whose login button redirects to the portal on the given click (1-based);
/// earlier clicks leave the form in place.
pub fn sso_site(success_on_click: Option<usize>) -> FakeBrowser {
    let browser = FakeBrowser::new("about:blank");
    browser
        .add_element(FakeElement::new("username", "textbox", "Username").hidden())
        .add_element(FakeElement::new("password", "textbox", "Password").hidden())
        .add_element(FakeElement::new("login", "button", "Log in to SSO").hidden())
        .on_goto(
            PORTAL_URL,
            vec![
                FakeAction::Navigate(SSO_URL.to_string()),
                FakeAction::Show("username".into()),
                FakeAction::Show("password".into()),
                FakeAction::Show("login".into()),
            ],
        );
    if let Some(n) = success_on_click {
        for _ in 1..n {
            browser.on_click_once("login", Vec::new());
        }
        browser.on_click_once(
            "login",
            vec![
                FakeAction::Hide("username".into()),
                FakeAction::Hide("password".into()),
                FakeAction::Hide("login".into()),
                FakeAction::Navigate(format!("{}d/home.htmld", PORTAL_URL)),
            ],
        );
    }
    browser
}

/// Kerberos-enabled portal: the first navigation lands straight on Workday.
pub fn kerberos_site() -> FakeBrowser {
    let browser = FakeBrowser::new("about:blank");
    browser
        .add_element(FakeElement::new("username", "textbox", "Username").hidden())
        .on_goto(
            PORTAL_URL,
            vec![FakeAction::Navigate(format!("{}d/home.htmld", PORTAL_URL))],
        );
    browser
}

/// Adds the home page Time button, the Select Week modal and a calendar whose
/// OK button lands on `start_week`.
pub fn add_calendar(browser: &FakeBrowser, weeks: Vec<FakeWeek>, start_week: usize) {
    browser
        .add_element(FakeElement::new("time", "button", "Time"))
        .add_element(FakeElement::new("select-week", "link", "Select Week"))
        .add_element(FakeElement::new("month", "spinbutton", "Month").hidden())
        .add_element(FakeElement::new("day", "spinbutton", "Day").hidden())
        .add_element(FakeElement::new("year", "spinbutton", "Year").hidden())
        .add_element(FakeElement::new("ok", "button", "OK").hidden())
        .add_element(FakeElement::new("week-heading", "heading", "").level(2).hidden())
        .add_element(FakeElement::new("prev-week", "button", "Previous Week"))
        .add_element(FakeElement::new("next-week", "button", "Next Week"))
        .set_weeks(weeks)
        .on_click(
            "select-week",
            vec![
                FakeAction::Show("month".into()),
                FakeAction::Show("day".into()),
                FakeAction::Show("year".into()),
                FakeAction::Show("ok".into()),
            ],
        )
        .on_click(
            "ok",
            vec![
                FakeAction::Hide("month".into()),
                FakeAction::Hide("day".into()),
                FakeAction::Hide("year".into()),
                FakeAction::Hide("ok".into()),
                FakeAction::ShowWeek(start_week),
            ],
        )
        .on_click("next-week", vec![FakeAction::WeekForward])
        .on_click("prev-week", vec![FakeAction::WeekBack]);
}

pub fn credentials(user: &str) -> Credentials {
    Credentials::new(user, "secret")
}
