//! The hover-and-detect protocol.
//!
//! One probe, strictly in order:
//!
//! 1. neutral reset (pointer away, Escape, body click, pointer away)
//! 2. pre-snapshot and optional "before" screenshot
//! 3. scroll the target into view (best effort)
//! 4. hover through the strategy chain, each attempt with its own timeout
//! 5. settle
//! 6. post-snapshot and optional "after" screenshot
//! 7. classify
//!
//! A probe never fails. Whatever goes wrong ends up as an
//! [`BehaviorCategory::Unreachable`] result carrying the error text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::artifact::{sanitize_label, ArtifactRef, ArtifactSink};
use crate::classifier::{classify, BehaviorCategory, BehaviorTally, Classification, RevealedLink};
use crate::config::ProbeConfig;
use crate::driver::{HoverMode, PageDriver};
use crate::result::{ProbeError, ProbeResult};
use crate::selector::Selector;
use crate::snapshot::{snapshot_script, ElementSnapshot};

/// Maximum label length used in probe screenshot names
pub const SCREENSHOT_LABEL_LIMIT: usize = 30;

/// Neutral pointer position
const POINTER_HOME: (f64, f64) = (0.0, 0.0);

/// Body click position used to dismiss open menus
const BODY_CLICK: (f64, f64) = (10.0, 10.0);

/// What to probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRequest {
    /// Target locator as supplied by the orchestrator
    pub selector: String,
    /// Human-readable element name; defaults to the selector
    #[serde(default)]
    pub label: Option<String>,
    /// Override the configured screenshot default
    #[serde(default)]
    pub capture_screenshots: Option<bool>,
    /// Append the forced hover strategy
    #[serde(default)]
    pub force: bool,
}

impl ProbeRequest {
    /// Probe `selector` with defaults
    #[must_use]
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            label: None,
            capture_screenshots: None,
            force: false,
        }
    }

    /// Set the element name
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Allow the forced strategy as a last resort
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Capture (or skip) before/after screenshots
    #[must_use]
    pub const fn with_screenshots(mut self, capture: bool) -> Self {
        self.capture_screenshots = Some(capture);
        self
    }

    /// Element name, falling back to the selector
    #[must_use]
    pub fn element_name(&self) -> &str {
        self.label
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&self.selector)
    }
}

/// Outcome of one probe
///
/// Built once by the probe and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionResult {
    selector: String,
    element_name: String,
    behavior: BehaviorCategory,
    new_elements_count: usize,
    revealed_links: Vec<RevealedLink>,
    new_element_types: Vec<String>,
    screenshot_before: Option<ArtifactRef>,
    screenshot_after: Option<ArtifactRef>,
    error: Option<String>,
}

impl InteractionResult {
    pub(crate) fn delivered(
        selector: impl Into<String>,
        element_name: impl Into<String>,
        classification: Classification,
        screenshot_before: Option<ArtifactRef>,
        screenshot_after: Option<ArtifactRef>,
    ) -> Self {
        Self {
            selector: selector.into(),
            element_name: element_name.into(),
            behavior: classification.behavior,
            new_elements_count: classification.new_elements_count,
            revealed_links: classification.revealed_links,
            new_element_types: classification.new_element_types,
            screenshot_before,
            screenshot_after,
            error: None,
        }
    }

    pub(crate) fn unreachable(
        selector: impl Into<String>,
        element_name: impl Into<String>,
        error: impl Into<String>,
        screenshot_before: Option<ArtifactRef>,
    ) -> Self {
        Self {
            selector: selector.into(),
            element_name: element_name.into(),
            behavior: BehaviorCategory::Unreachable,
            new_elements_count: 0,
            revealed_links: Vec::new(),
            new_element_types: Vec::new(),
            screenshot_before,
            screenshot_after: None,
            error: Some(error.into()),
        }
    }

    /// Selector as supplied
    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Element name (label)
    #[must_use]
    pub fn element_name(&self) -> &str {
        &self.element_name
    }

    /// Behavior category
    #[must_use]
    pub const fn behavior(&self) -> BehaviorCategory {
        self.behavior
    }

    /// Number of nodes that became visible
    #[must_use]
    pub const fn new_elements_count(&self) -> usize {
        self.new_elements_count
    }

    /// Links among the new nodes
    #[must_use]
    pub fn revealed_links(&self) -> &[RevealedLink] {
        &self.revealed_links
    }

    /// Distinct tag names of the new nodes
    #[must_use]
    pub fn new_element_types(&self) -> &[String] {
        &self.new_element_types
    }

    /// Screenshot taken before hovering
    #[must_use]
    pub const fn screenshot_before(&self) -> Option<&ArtifactRef> {
        self.screenshot_before.as_ref()
    }

    /// Screenshot taken after hovering
    #[must_use]
    pub const fn screenshot_after(&self) -> Option<&ArtifactRef> {
        self.screenshot_after.as_ref()
    }

    /// Diagnostic for unreachable results
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl<'a> FromIterator<&'a InteractionResult> for BehaviorTally {
    fn from_iter<I: IntoIterator<Item = &'a InteractionResult>>(iter: I) -> Self {
        iter.into_iter().map(InteractionResult::behavior).collect()
    }
}

/// One way of delivering a hover
#[async_trait(?Send)]
pub trait HoverStrategy: fmt::Debug {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Try once; the caller bounds the attempt with a timeout
    async fn attempt(&self, driver: &mut dyn PageDriver, selector: &Selector) -> ProbeResult<()>;
}

/// Pointer hover in a given [`HoverMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerHover {
    mode: HoverMode,
}

impl PointerHover {
    /// Strategy for `mode`
    #[must_use]
    pub const fn new(mode: HoverMode) -> Self {
        Self { mode }
    }
}

#[async_trait(?Send)]
impl HoverStrategy for PointerHover {
    fn name(&self) -> &'static str {
        match self.mode {
            HoverMode::Direct => "direct",
            HoverMode::FirstMatch => "first_match",
            HoverMode::Forced => "forced",
        }
    }

    async fn attempt(&self, driver: &mut dyn PageDriver, selector: &Selector) -> ProbeResult<()> {
        driver.hover(selector, self.mode).await
    }
}

/// Ordered strategy chain; `Forced` only when asked for
#[must_use]
pub fn strategy_chain(force: bool) -> Vec<Box<dyn HoverStrategy>> {
    let mut chain: Vec<Box<dyn HoverStrategy>> = vec![
        Box::new(PointerHover::new(HoverMode::Direct)),
        Box::new(PointerHover::new(HoverMode::FirstMatch)),
    ];
    if force {
        chain.push(Box::new(PointerHover::new(HoverMode::Forced)));
    }
    chain
}

/// Runs the protocol against a page driver
#[derive(Clone, Copy)]
pub struct InteractionProbe<'a> {
    config: &'a ProbeConfig,
    sink: &'a dyn ArtifactSink,
    namespace: Option<&'a str>,
}

impl fmt::Debug for InteractionProbe<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractionProbe")
            .field("config", self.config)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<'a> InteractionProbe<'a> {
    /// Probe with the given settings, storing screenshots in `sink` under `namespace`
    #[must_use]
    pub fn new(
        config: &'a ProbeConfig,
        sink: &'a dyn ArtifactSink,
        namespace: Option<&'a str>,
    ) -> Self {
        Self {
            config,
            sink,
            namespace,
        }
    }

    /// Run one probe; never fails
    pub async fn run(&self, driver: &mut dyn PageDriver, request: &ProbeRequest) -> InteractionResult {
        let name = request.element_name().to_string();
        info!(selector = %request.selector, element = %name, force = request.force, "probing");

        let mut before = None;
        let result = match self.protocol(driver, request, &name, &mut before).await {
            Ok(result) => result,
            Err(e) => {
                warn!(selector = %request.selector, error = %e, "hover not deliverable");
                InteractionResult::unreachable(&request.selector, name, e.to_string(), before)
            }
        };
        info!(
            selector = %request.selector,
            behavior = %result.behavior(),
            new_elements = result.new_elements_count(),
            links = result.revealed_links().len(),
            "probe complete"
        );
        result
    }

    async fn protocol(
        &self,
        driver: &mut dyn PageDriver,
        request: &ProbeRequest,
        name: &str,
        before: &mut Option<ArtifactRef>,
    ) -> ProbeResult<InteractionResult> {
        let capture = request
            .capture_screenshots
            .unwrap_or(self.config.capture_screenshots);
        let shot_label = sanitize_label(name, SCREENSHOT_LABEL_LIMIT);

        self.reset(driver).await?;

        let pre = capture_snapshot(driver).await?;
        debug!(nodes = pre.len(), "pre-hover snapshot");
        if capture {
            *before = self.capture(driver, &format!("{shot_label}_before")).await;
        }

        // A malformed selector fails here like any undeliverable hover
        let selector = &Selector::parse(&request.selector)?;

        if let Err(e) = driver.scroll_into_view(selector).await {
            debug!(selector = %selector, error = %e, "scroll into view failed, continuing");
        }
        pause(self.config.scroll_settle).await;

        self.hover(driver, selector, request.force).await?;

        pause(self.config.settle).await;

        let post = capture_snapshot(driver).await?;
        debug!(nodes = post.len(), "post-hover snapshot");
        let after = if capture {
            self.capture(driver, &format!("{shot_label}_after")).await
        } else {
            None
        };

        let classification = classify(&pre, &post, self.config.into());
        Ok(InteractionResult::delivered(
            &request.selector,
            name,
            classification,
            before.clone(),
            after,
        ))
    }

    async fn reset(&self, driver: &mut dyn PageDriver) -> ProbeResult<()> {
        let [away, escape, click, home] = self.config.reset_delays;
        driver.mouse_move(POINTER_HOME.0, POINTER_HOME.1).await?;
        pause(away).await;
        driver.press_key("Escape").await?;
        pause(escape).await;
        driver.click_at(BODY_CLICK.0, BODY_CLICK.1).await?;
        pause(click).await;
        driver.mouse_move(POINTER_HOME.0, POINTER_HOME.1).await?;
        pause(home).await;
        Ok(())
    }

    async fn hover(
        &self,
        driver: &mut dyn PageDriver,
        selector: &Selector,
        force: bool,
    ) -> ProbeResult<()> {
        let timeout = self.config.hover_timeout;
        let mut last_error = None;
        for strategy in strategy_chain(force) {
            let outcome = tokio::time::timeout(timeout, strategy.attempt(driver, selector)).await;
            match outcome {
                Ok(Ok(())) => {
                    debug!(selector = %selector, strategy = strategy.name(), "hover delivered");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    debug!(selector = %selector, strategy = strategy.name(), error = %e, "hover attempt failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    debug!(selector = %selector, strategy = strategy.name(), "hover attempt timed out");
                    last_error = Some(ProbeError::timeout(timeout));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ProbeError::NotActionable {
            selector: selector.to_string(),
            message: String::from("no hover strategy available"),
        }))
    }

    async fn capture(&self, driver: &mut dyn PageDriver, label: &str) -> Option<ArtifactRef> {
        let png = match driver.screenshot(false).await {
            Ok(png) => png,
            Err(e) => {
                warn!(label, error = %e, "screenshot failed");
                return None;
            }
        };
        match self.sink.save_screenshot(self.namespace, label, &png) {
            Ok(reference) => reference,
            Err(e) => {
                warn!(label, error = %e, "screenshot not stored");
                None
            }
        }
    }
}

/// Evaluate the snapshot script and decode its result
pub async fn capture_snapshot(driver: &mut dyn PageDriver) -> ProbeResult<ElementSnapshot> {
    let value = driver.evaluate(&snapshot_script()).await?;
    ElementSnapshot::from_json(value)
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
