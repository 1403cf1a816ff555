//! Page driver abstraction.
//!
//! [`PageDriver`] is the narrow set of raw page operations the probe needs.
//! It is `?Send`: a driver lives on the browser worker thread for its whole
//! life and is never moved across threads. [`DriverLauncher`] creates the
//! browser/context/page triple behind a driver.
//!
//! [`MockDriver`] is a scripted in-memory driver for unit and integration
//! tests. Its state is shared between clones so that a test can keep a
//! handle while the worker owns the driver.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::BrowserConfig;
use crate::result::{ProbeError, ProbeResult};
use crate::selector::Selector;
use crate::snapshot::{snapshot_script, ElementSnapshot};

/// How a hover target is resolved and checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoverMode {
    /// Exactly one match; visible and hit-testable
    Direct,
    /// First match in document order; visible and hit-testable
    FirstMatch,
    /// First match; no actionability checks
    Forced,
}

impl fmt::Display for HoverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Direct => "direct",
            Self::FirstMatch => "first_match",
            Self::Forced => "forced",
        };
        f.write_str(name)
    }
}

/// Raw page operations
#[async_trait(?Send)]
pub trait PageDriver {
    /// Load `url`, wait for network idle (bounded) and return the page title
    async fn navigate(&mut self, url: &str) -> ProbeResult<String>;

    /// Evaluate a script expression and return its JSON value
    async fn evaluate(&mut self, script: &str) -> ProbeResult<serde_json::Value>;

    /// Move the pointer to viewport coordinates
    async fn mouse_move(&mut self, x: f64, y: f64) -> ProbeResult<()>;

    /// Press and release a key (`"Escape"`, ...)
    async fn press_key(&mut self, key: &str) -> ProbeResult<()>;

    /// Click at viewport coordinates without any actionability checks
    async fn click_at(&mut self, x: f64, y: f64) -> ProbeResult<()>;

    /// Scroll the first match into the center of the viewport
    async fn scroll_into_view(&mut self, selector: &Selector) -> ProbeResult<()>;

    /// Move the pointer onto the target resolved by `mode`
    ///
    /// Actionable modes keep retrying until the element is actionable; the
    /// caller bounds the attempt with a timeout.
    async fn hover(&mut self, selector: &Selector, mode: HoverMode) -> ProbeResult<()>;

    /// Capture a PNG of the viewport or the full page
    async fn screenshot(&mut self, full_page: bool) -> ProbeResult<Vec<u8>>;

    /// Current page URL
    async fn url(&mut self) -> ProbeResult<String>;

    /// Release the page and everything behind it
    async fn close(&mut self) -> ProbeResult<()>;
}

/// Creates drivers
#[async_trait(?Send)]
pub trait DriverLauncher {
    /// Driver produced by this launcher
    type Driver: PageDriver;

    /// Launch a browser, a fresh browsing context and one page in it
    async fn launch(&self, config: &BrowserConfig) -> ProbeResult<Self::Driver>;
}

/// Scripted outcome of a [`MockDriver`] hover
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockHover {
    /// Hover succeeds
    Succeed,
    /// Hover fails with the given message
    Fail(String),
    /// Hover never completes
    Hang,
}

#[derive(Debug)]
struct MockState {
    title: String,
    url: String,
    snapshots: VecDeque<ElementSnapshot>,
    script_results: Vec<(String, serde_json::Value)>,
    hover: HashMap<HoverMode, MockHover>,
    hover_delay: Duration,
    navigation_error: Option<String>,
    script_error: Option<String>,
    screenshot_error: Option<String>,
    screenshot: Vec<u8>,
    closed: bool,
    calls: Vec<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            title: String::from("Mock Page"),
            url: String::from("about:blank"),
            snapshots: VecDeque::new(),
            script_results: Vec::new(),
            hover: HashMap::new(),
            hover_delay: Duration::ZERO,
            navigation_error: None,
            script_error: None,
            screenshot_error: None,
            screenshot: PNG_SIGNATURE.to_vec(),
            closed: false,
            calls: Vec::new(),
        }
    }
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Mock driver for unit testing
///
/// Snapshot evaluations are served from a queue: each call pops the front
/// entry until one is left, which then answers every further call. Clones
/// share state.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Create new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, call: String) {
        self.state().calls.push(call);
    }

    /// Set the title returned by navigation
    #[must_use]
    pub fn with_title(self, title: impl Into<String>) -> Self {
        self.state().title = title.into();
        self
    }

    /// Queue a snapshot answer
    #[must_use]
    pub fn with_snapshot(self, snapshot: impl Into<ElementSnapshot>) -> Self {
        self.push_snapshot(snapshot);
        self
    }

    /// Queue a snapshot answer on a shared handle
    pub fn push_snapshot(&self, snapshot: impl Into<ElementSnapshot>) {
        self.state().snapshots.push_back(snapshot.into());
    }

    /// Answer any script containing `needle` with `value`
    #[must_use]
    pub fn with_script_result(self, needle: impl Into<String>, value: serde_json::Value) -> Self {
        self.state().script_results.push((needle.into(), value));
        self
    }

    /// Script the outcome of hovers in `mode`
    #[must_use]
    pub fn with_hover(self, mode: HoverMode, outcome: MockHover) -> Self {
        self.set_hover(mode, outcome);
        self
    }

    /// Script the outcome of hovers in `mode` on a shared handle
    pub fn set_hover(&self, mode: HoverMode, outcome: MockHover) {
        self.state().hover.insert(mode, outcome);
    }

    /// Delay every hover by `delay`
    #[must_use]
    pub fn with_hover_delay(self, delay: Duration) -> Self {
        self.state().hover_delay = delay;
        self
    }

    /// Make navigation fail
    #[must_use]
    pub fn with_navigation_error(self, message: impl Into<String>) -> Self {
        self.state().navigation_error = Some(message.into());
        self
    }

    /// Make every script evaluation fail
    #[must_use]
    pub fn with_script_error(self, message: impl Into<String>) -> Self {
        self.state().script_error = Some(message.into());
        self
    }

    /// Make screenshots fail
    #[must_use]
    pub fn with_screenshot_error(self, message: impl Into<String>) -> Self {
        self.state().screenshot_error = Some(message.into());
        self
    }

    /// Recorded calls, oldest first
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Check if a call with the given prefix was made
    #[must_use]
    pub fn was_called(&self, prefix: &str) -> bool {
        self.state().calls.iter().any(|c| c.starts_with(prefix))
    }

    /// Number of calls with the given prefix
    #[must_use]
    pub fn call_count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Whether `close` was called since the last launch
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn reopen(&self) {
        self.state().closed = false;
    }

    fn ensure_open(&self) -> ProbeResult<()> {
        if self.state().closed {
            return Err(ProbeError::page("page is closed"));
        }
        Ok(())
    }

    fn next_snapshot(&self) -> serde_json::Value {
        let mut state = self.state();
        let snapshot = if state.snapshots.len() > 1 {
            state.snapshots.pop_front()
        } else {
            state.snapshots.front().cloned()
        };
        serde_json::to_value(snapshot.unwrap_or_default()).unwrap_or(serde_json::Value::Null)
    }
}

#[async_trait(?Send)]
impl PageDriver for MockDriver {
    async fn navigate(&mut self, url: &str) -> ProbeResult<String> {
        self.log(format!("navigate:{url}"));
        self.ensure_open()?;
        let mut state = self.state();
        if let Some(message) = &state.navigation_error {
            let message = message.clone();
            return Err(ProbeError::navigation(url, message));
        }
        state.url = url.to_string();
        Ok(state.title.clone())
    }

    async fn evaluate(&mut self, script: &str) -> ProbeResult<serde_json::Value> {
        self.ensure_open()?;
        let script_error = self.state().script_error.clone();
        if let Some(message) = script_error {
            self.log(String::from("evaluate"));
            return Err(ProbeError::script(message));
        }
        if script == snapshot_script() {
            self.log(String::from("evaluate:snapshot"));
            return Ok(self.next_snapshot());
        }
        self.log(String::from("evaluate"));
        let state = self.state();
        Ok(state
            .script_results
            .iter()
            .find(|(needle, _)| script.contains(needle.as_str()))
            .map_or(serde_json::Value::Null, |(_, value)| value.clone()))
    }

    async fn mouse_move(&mut self, x: f64, y: f64) -> ProbeResult<()> {
        self.log(format!("mouse_move:{x},{y}"));
        self.ensure_open()
    }

    async fn press_key(&mut self, key: &str) -> ProbeResult<()> {
        self.log(format!("press_key:{key}"));
        self.ensure_open()
    }

    async fn click_at(&mut self, x: f64, y: f64) -> ProbeResult<()> {
        self.log(format!("click_at:{x},{y}"));
        self.ensure_open()
    }

    async fn scroll_into_view(&mut self, selector: &Selector) -> ProbeResult<()> {
        self.log(format!("scroll_into_view:{selector}"));
        self.ensure_open()
    }

    async fn hover(&mut self, selector: &Selector, mode: HoverMode) -> ProbeResult<()> {
        self.log(format!("hover:{mode}:{selector}"));
        self.ensure_open()?;
        let (outcome, delay) = {
            let state = self.state();
            let outcome = state.hover.get(&mode).cloned().unwrap_or(MockHover::Succeed);
            (outcome, state.hover_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match outcome {
            MockHover::Succeed => Ok(()),
            MockHover::Fail(message) => Err(ProbeError::NotActionable {
                selector: selector.to_string(),
                message,
            }),
            MockHover::Hang => futures::future::pending().await,
        }
    }

    async fn screenshot(&mut self, full_page: bool) -> ProbeResult<Vec<u8>> {
        self.log(format!("screenshot:{}", if full_page { "full" } else { "viewport" }));
        self.ensure_open()?;
        let state = self.state();
        match &state.screenshot_error {
            Some(message) => Err(ProbeError::Screenshot {
                message: message.clone(),
            }),
            None => Ok(state.screenshot.clone()),
        }
    }

    async fn url(&mut self) -> ProbeResult<String> {
        self.ensure_open()?;
        Ok(self.state().url.clone())
    }

    async fn close(&mut self) -> ProbeResult<()> {
        self.log(String::from("close"));
        self.state().closed = true;
        Ok(())
    }
}

/// Launcher handing out a shared [`MockDriver`]
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    driver: MockDriver,
    launches: Arc<AtomicUsize>,
    failure: Option<String>,
}

impl MockLauncher {
    /// Launcher for `driver`
    #[must_use]
    pub fn new(driver: MockDriver) -> Self {
        Self {
            driver,
            launches: Arc::new(AtomicUsize::new(0)),
            failure: None,
        }
    }

    /// Launcher whose every launch fails
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Number of launch attempts so far
    #[must_use]
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Shared driver handle
    #[must_use]
    pub fn driver(&self) -> MockDriver {
        self.driver.clone()
    }
}

#[async_trait(?Send)]
impl DriverLauncher for MockLauncher {
    type Driver = MockDriver;

    async fn launch(&self, _config: &BrowserConfig) -> ProbeResult<MockDriver> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(ProbeError::launch(message.clone()));
        }
        self.driver.reopen();
        self.driver.log(String::from("launch"));
        Ok(self.driver.clone())
    }
}
