//! Public async handle.
//!
//! [`HoverDetector`] composes the pieces: a [`SyncBridge`] whose worker owns
//! the [`SessionManager`], the probe settings and the artifact sink. Every
//! method is a job on that worker, so concurrent callers are served one at a
//! time in submission order.
//!
//! ```ignore
//! let detector = HoverDetector::with_launcher(launcher, DetectorConfig::default())?;
//! detector.navigate("https://shop.test").await?;
//! let result = detector
//!     .probe(ProbeRequest::new(r#"text="Products""#).with_label("Products"))
//!     .await?;
//! detector.record("Products", &result).await?;
//! detector.shutdown().await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::artifact::{ArtifactRef, ArtifactSink, FsArtifactSink};
use crate::bridge::SyncBridge;
use crate::config::{DetectorConfig, ProbeConfig};
use crate::driver::{DriverLauncher, PageDriver};
use crate::probe::{InteractionProbe, InteractionResult, ProbeRequest};
use crate::result::{ProbeError, ProbeResult};
use crate::session::SessionManager;
use crate::structure::{self, HoverableElement, PageStructure};

/// Name of the worker thread
pub const WORKER_NAME: &str = "hoverprobe-browser";

/// State owned by the browser worker
struct Worker<L: DriverLauncher> {
    sessions: SessionManager<L>,
    probe: ProbeConfig,
    sink: Arc<dyn ArtifactSink>,
}

impl<L: DriverLauncher> Worker<L> {
    fn namespace(&self) -> Option<String> {
        self.sessions.identity().map(str::to_string)
    }

    async fn ensure(&mut self) -> ProbeResult<()> {
        self.sessions.ensure_page().await?;
        Ok(())
    }

    async fn probe(&mut self, request: &ProbeRequest) -> ProbeResult<InteractionResult> {
        let namespace = self.namespace();
        let driver = self.sessions.ensure_page().await?;
        let probe = InteractionProbe::new(&self.probe, self.sink.as_ref(), namespace.as_deref());
        Ok(probe.run(driver, request).await)
    }

    async fn probe_all(&mut self, requests: &[ProbeRequest]) -> ProbeResult<Vec<InteractionResult>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.probe(request).await?);
        }
        Ok(results)
    }

    async fn screenshot(&mut self, label: &str, full_page: bool) -> ProbeResult<Option<ArtifactRef>> {
        let namespace = self.namespace();
        let driver = self.sessions.ensure_page().await?;
        let png = driver.screenshot(full_page).await?;
        Ok(store(self.sink.save_screenshot(namespace.as_deref(), label, &png), label))
    }

    fn record(&self, label: &str, result: &InteractionResult) -> Option<ArtifactRef> {
        let namespace = self.namespace();
        store(
            self.sink.save_behavior_record(namespace.as_deref(), label, result),
            label,
        )
    }
}

fn store(saved: ProbeResult<Option<ArtifactRef>>, label: &str) -> Option<ArtifactRef> {
    saved.unwrap_or_else(|e| {
        warn!(label, error = %e, "artifact not stored");
        None
    })
}

/// Async hover detector bound to one browser worker
pub struct HoverDetector<L: DriverLauncher> {
    bridge: SyncBridge<Worker<L>>,
}

impl<L: DriverLauncher> fmt::Debug for HoverDetector<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HoverDetector")
            .field("bridge", &self.bridge)
            .finish()
    }
}

#[cfg(feature = "browser")]
impl HoverDetector<crate::cdp::ChromiumLauncher> {
    /// Detector driving a real Chromium, artifacts under `config.output_dir`
    pub fn chromium(config: DetectorConfig) -> ProbeResult<Self> {
        Self::with_launcher(crate::cdp::ChromiumLauncher::new(), config)
    }
}

impl<L> HoverDetector<L>
where
    L: DriverLauncher + Send + 'static,
{
    /// Detector with a filesystem sink rooted at `config.output_dir`
    pub fn with_launcher(launcher: L, config: DetectorConfig) -> ProbeResult<Self> {
        let sink = Arc::new(FsArtifactSink::new(config.output_dir.clone()));
        Self::with_sink(launcher, config, sink)
    }

    /// Detector storing artifacts in `sink`
    ///
    /// Nothing is launched until the first operation that needs a page.
    pub fn with_sink(
        launcher: L,
        config: DetectorConfig,
        sink: Arc<dyn ArtifactSink>,
    ) -> ProbeResult<Self> {
        let DetectorConfig {
            browser,
            probe,
            session_id,
            ..
        } = config;
        let bridge = SyncBridge::spawn(WORKER_NAME, move || Worker {
            sessions: SessionManager::new(launcher, browser).with_identity(session_id),
            probe,
            sink,
        })?;
        Ok(Self { bridge })
    }

    /// Launch the session if there is none
    pub async fn ensure_session(&self) -> ProbeResult<()> {
        self.bridge
            .run(|w: &mut Worker<L>| Box::pin(async move { w.ensure().await }))
            .await
    }

    /// Whether a session is live
    pub async fn is_live(&self) -> ProbeResult<bool> {
        self.bridge
            .run(|w: &mut Worker<L>| Box::pin(async move { Ok(w.sessions.is_live()) }))
            .await
    }

    /// Load `url` and return the page title
    pub async fn navigate(&self, url: impl Into<String>) -> ProbeResult<String> {
        let url = url.into();
        self.bridge
            .run(move |w: &mut Worker<L>| Box::pin(async move { w.sessions.navigate(&url).await }))
            .await
    }

    /// Current page URL
    pub async fn current_url(&self) -> ProbeResult<String> {
        self.bridge
            .run(|w: &mut Worker<L>| {
                Box::pin(async move { w.sessions.ensure_page().await?.url().await })
            })
            .await
    }

    /// Hover one target and classify what it reveals
    ///
    /// Only session launch and worker failures are returned as errors; any
    /// failure inside the protocol yields an `unreachable` result.
    pub async fn probe(&self, request: ProbeRequest) -> ProbeResult<InteractionResult> {
        self.bridge
            .run(move |w: &mut Worker<L>| Box::pin(async move { w.probe(&request).await }))
            .await
    }

    /// Probe several targets in order as a single job
    pub async fn probe_all(&self, requests: Vec<ProbeRequest>) -> ProbeResult<Vec<InteractionResult>> {
        self.bridge
            .run(move |w: &mut Worker<L>| Box::pin(async move { w.probe_all(&requests).await }))
            .await
    }

    /// Store a behavior record; `None` when the sink kept nothing or failed
    pub async fn record(
        &self,
        label: impl Into<String>,
        result: &InteractionResult,
    ) -> ProbeResult<Option<ArtifactRef>> {
        let label = label.into();
        let result = result.clone();
        self.bridge
            .run(move |w: &mut Worker<L>| Box::pin(async move { Ok(w.record(&label, &result)) }))
            .await
    }

    /// Capture the viewport (or the full page) and store it
    pub async fn screenshot(
        &self,
        label: impl Into<String>,
        full_page: bool,
    ) -> ProbeResult<Option<ArtifactRef>> {
        let label = label.into();
        self.bridge
            .run(move |w: &mut Worker<L>| {
                Box::pin(async move { w.screenshot(&label, full_page).await })
            })
            .await
    }

    /// Interactive outline of the current page
    pub async fn page_structure(&self) -> ProbeResult<PageStructure> {
        self.bridge
            .run(|w: &mut Worker<L>| {
                Box::pin(async move {
                    let driver = w.sessions.ensure_page().await?;
                    structure::page_structure(driver).await
                })
            })
            .await
    }

    /// Visible elements that commonly react to hover
    pub async fn hoverable_elements(&self) -> ProbeResult<Vec<HoverableElement>> {
        self.bridge
            .run(|w: &mut Worker<L>| {
                Box::pin(async move {
                    let driver = w.sessions.ensure_page().await?;
                    structure::hoverable_elements(driver).await
                })
            })
            .await
    }

    /// Bind a logical session identifier
    ///
    /// A different identifier closes the live session; the next operation
    /// launches a fresh one and artifacts go to the new namespace.
    pub async fn bind_session(&self, id: Option<String>) -> ProbeResult<()> {
        self.bridge
            .run(move |w: &mut Worker<L>| Box::pin(async move { w.sessions.bind_identity(id).await }))
            .await
    }

    /// Bound logical session identifier
    pub async fn session_id(&self) -> ProbeResult<Option<String>> {
        self.bridge
            .run(|w: &mut Worker<L>| Box::pin(async move { Ok(w.namespace()) }))
            .await
    }

    /// Close the session; the detector stays usable
    pub async fn close(&self) -> ProbeResult<()> {
        self.bridge
            .run(|w: &mut Worker<L>| Box::pin(async move { w.sessions.close().await }))
            .await
    }

    /// Close the session and stop the worker
    pub async fn shutdown(self) -> ProbeResult<()> {
        let closed = self.close().await;
        self.bridge.shutdown().await?;
        closed
    }
}

/// Logical session identifier to detector mapping
///
/// Owned by the orchestrator. Each identifier gets its own detector (and so
/// its own worker and browser); all of them share one artifact sink.
pub struct DetectorRegistry<L: DriverLauncher> {
    launcher: L,
    config: DetectorConfig,
    sink: Arc<dyn ArtifactSink>,
    detectors: HashMap<String, HoverDetector<L>>,
}

impl<L: DriverLauncher> fmt::Debug for DetectorRegistry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("config", &self.config)
            .field("sessions", &self.detectors.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<L> DetectorRegistry<L>
where
    L: DriverLauncher + Clone + Send + 'static,
{
    /// Registry with a filesystem sink rooted at `config.output_dir`
    pub fn new(launcher: L, config: DetectorConfig) -> Self {
        let sink = Arc::new(FsArtifactSink::new(config.output_dir.clone()));
        Self::with_sink(launcher, config, sink)
    }

    /// Registry storing artifacts in `sink`
    pub fn with_sink(launcher: L, config: DetectorConfig, sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            launcher,
            config,
            sink,
            detectors: HashMap::new(),
        }
    }

    /// Detector for `id`, created on first use
    pub fn detector(&mut self, id: &str) -> ProbeResult<&HoverDetector<L>> {
        if !self.detectors.contains_key(id) {
            let config = self.config.clone().with_session_id(id);
            let detector = HoverDetector::with_sink(self.launcher.clone(), config, self.sink.clone())?;
            info!(session = id, "detector registered");
            self.detectors.insert(id.to_string(), detector);
        }
        self.detectors
            .get(id)
            .ok_or_else(|| ProbeError::config(format!("no detector for {id}")))
    }

    /// Existing detector for `id`
    pub fn get(&self, id: &str) -> Option<&HoverDetector<L>> {
        self.detectors.get(id)
    }

    /// Registered identifiers
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.detectors.keys().map(String::as_str)
    }

    /// Number of registered detectors
    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Shut down and forget the detector for `id`; `false` if there was none
    pub async fn remove(&mut self, id: &str) -> ProbeResult<bool> {
        match self.detectors.remove(id) {
            Some(detector) => {
                detector.shutdown().await?;
                info!(session = id, "detector removed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Shut down every detector; the first error is returned after all were tried
    pub async fn shutdown_all(&mut self) -> ProbeResult<()> {
        let mut first_error = None;
        for (id, detector) in self.detectors.drain() {
            if let Err(e) = detector.shutdown().await {
                warn!(session = %id, error = %e, "detector shutdown failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
