//! Chromium driver over the Chrome `DevTools` Protocol.
//!
//! Only compiled with the `browser` feature. The handler task is spawned on
//! the current runtime, which is the browser worker's single-threaded runtime.

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::dom::Rect;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, GetLayoutMetricsParams, Viewport,
};
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::driver::{DriverLauncher, HoverMode, PageDriver};
use crate::result::{ProbeError, ProbeResult};
use crate::selector::Selector;

const ACTIONABILITY_POLL: Duration = Duration::from_millis(100);

/// Resolves the hover target and reports its center, or why it is not actionable
const RESOLVE_SCRIPT: &str = r"(() => {
    const matches = __QUERY__;
    const mode = __MODE__;
    if (matches.length === 0) return { status: 'missing' };
    if (mode === 'direct' && matches.length > 1) {
        return { status: 'ambiguous', count: matches.length };
    }
    const el = matches[0];
    const rect = el.getBoundingClientRect();
    const x = rect.left + rect.width / 2;
    const y = rect.top + rect.height / 2;
    if (mode === 'forced') return { status: 'ok', x, y };
    const style = window.getComputedStyle(el);
    if (rect.width === 0 || rect.height === 0 || style.visibility === 'hidden' ||
        style.display === 'none') {
        return { status: 'hidden' };
    }
    const hit = document.elementFromPoint(x, y);
    if (!hit || !(hit === el || el.contains(hit))) return { status: 'covered' };
    return { status: 'ok', x, y };
})()";

const SCROLL_SCRIPT: &str = r"(() => {
    const el = (__QUERY__)[0];
    if (!el) return false;
    el.scrollIntoView({ block: 'center', inline: 'center' });
    return true;
})()";

const RESOURCE_COUNT_SCRIPT: &str = "performance.getEntriesByType('resource').length";

/// Clip covering the whole document at scale 1
fn full_page_clip(content: &Rect) -> Viewport {
    Viewport {
        x: 0.0,
        y: 0.0,
        width: content.width.max(1.0).ceil(),
        height: content.height.max(1.0).ceil(),
        scale: 1.0,
    }
}

fn virtual_key_code(key: &str) -> Option<i64> {
    match key {
        "Escape" => Some(27),
        "Enter" => Some(13),
        "Tab" => Some(9),
        _ => None,
    }
}

/// Launches Chromium through chromiumoxide
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    /// Create a launcher
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl DriverLauncher for ChromiumLauncher {
    type Driver = ChromiumDriver;

    async fn launch(&self, config: &BrowserConfig) -> ProbeResult<ChromiumDriver> {
        ChromiumDriver::launch(config.clone()).await
    }
}

/// Browser process, one isolated browsing context and one page
#[derive(Debug)]
pub struct ChromiumDriver {
    config: BrowserConfig,
    browser: CdpBrowser,
    page: CdpPage,
    handler: JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launch a browser and open a blank page in a fresh context
    pub async fn launch(config: BrowserConfig) -> ProbeResult<Self> {
        let mut builder = CdpConfig::builder()
            .window_size(config.viewport_width, config.viewport_height);

        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = config.chromium_path {
            builder = builder.chrome_executable(path);
        }
        if let Some(ref ua) = config.user_agent {
            builder = builder.arg(format!("--user-agent={ua}"));
        }
        for arg in &config.args {
            builder = builder.arg(arg.as_str());
        }

        let cdp_config = builder.build().map_err(ProbeError::launch)?;

        let (browser, mut handler) = CdpBrowser::launch(cdp_config)
            .await
            .map_err(|e| ProbeError::launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let context = browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(|e| ProbeError::launch(format!("browser context: {e}")))?;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context)
            .build()
            .map_err(ProbeError::launch)?;

        let page = browser
            .new_page(target)
            .await
            .map_err(|e| ProbeError::launch(format!("page: {e}")))?;

        info!(
            headless = config.headless,
            width = config.viewport_width,
            height = config.viewport_height,
            "browser launched"
        );

        Ok(Self {
            config,
            browser,
            page,
            handler,
        })
    }

    async fn wait_for_network_idle(&self, deadline: Instant) -> ProbeResult<()> {
        let quiet = self.config.network_idle;
        let mut last_count: Option<u64> = None;
        let mut stable_since = Instant::now();
        loop {
            let count: u64 = self
                .page
                .evaluate(RESOURCE_COUNT_SCRIPT)
                .await
                .map_err(|e| ProbeError::page(e.to_string()))?
                .into_value()
                .map_err(|e| ProbeError::script(e.to_string()))?;
            if last_count == Some(count) {
                if stable_since.elapsed() >= quiet {
                    return Ok(());
                }
            } else {
                last_count = Some(count);
                stable_since = Instant::now();
            }
            if Instant::now() >= deadline {
                return Err(ProbeError::timeout(self.config.navigation_timeout));
            }
            tokio::time::sleep(ACTIONABILITY_POLL).await;
        }
    }

    async fn dispatch_mouse(
        &self,
        kind: DispatchMouseEventType,
        x: f64,
        y: f64,
    ) -> ProbeResult<()> {
        let mut params = DispatchMouseEventParams::builder().r#type(kind.clone()).x(x).y(y);
        if kind != DispatchMouseEventType::MouseMoved {
            params = params.button(MouseButton::Left).click_count(1);
        }
        let params = params.build().map_err(ProbeError::input)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| ProbeError::input(e.to_string()))?;
        Ok(())
    }

    async fn resolve(&self, selector: &Selector, mode: HoverMode) -> ProbeResult<(f64, f64)> {
        let script = RESOLVE_SCRIPT
            .replace("__QUERY__", &selector.to_query())
            .replace("__MODE__", &format!("'{mode}'"));
        loop {
            let outcome: serde_json::Value = self
                .page
                .evaluate(script.as_str())
                .await
                .map_err(|e| ProbeError::script(e.to_string()))?
                .into_value()
                .map_err(|e| ProbeError::script(e.to_string()))?;

            let status = outcome["status"].as_str().unwrap_or_default();
            match status {
                "ok" => {
                    let x = outcome["x"].as_f64().unwrap_or_default();
                    let y = outcome["y"].as_f64().unwrap_or_default();
                    return Ok((x, y));
                }
                "missing" | "ambiguous" if mode == HoverMode::Forced => {
                    return Err(ProbeError::ElementNotFound {
                        selector: selector.to_string(),
                    });
                }
                other => {
                    debug!(selector = %selector, %mode, status = other, "target not actionable yet");
                }
            }
            tokio::time::sleep(ACTIONABILITY_POLL).await;
        }
    }
}

#[async_trait(?Send)]
impl PageDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str) -> ProbeResult<String> {
        let timeout = self.config.navigation_timeout;
        let deadline = Instant::now() + timeout;

        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| ProbeError::timeout(timeout))?
            .map_err(|e| ProbeError::navigation(url, e.to_string()))?;

        if let Err(e) = self.wait_for_network_idle(deadline).await {
            warn!(url, error = %e, "network did not settle, continuing");
        }

        let title = self
            .page
            .get_title()
            .await
            .map_err(|e| ProbeError::page(e.to_string()))?
            .unwrap_or_default();
        Ok(title)
    }

    async fn evaluate(&mut self, script: &str) -> ProbeResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| ProbeError::script(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn mouse_move(&mut self, x: f64, y: f64) -> ProbeResult<()> {
        self.dispatch_mouse(DispatchMouseEventType::MouseMoved, x, y).await
    }

    async fn press_key(&mut self, key: &str) -> ProbeResult<()> {
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let mut params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key(key)
                .code(key);
            if let Some(code) = virtual_key_code(key) {
                params = params.windows_virtual_key_code(code);
            }
            let params = params.build().map_err(ProbeError::input)?;
            self.page
                .execute(params)
                .await
                .map_err(|e| ProbeError::input(e.to_string()))?;
        }
        Ok(())
    }

    async fn click_at(&mut self, x: f64, y: f64) -> ProbeResult<()> {
        self.dispatch_mouse(DispatchMouseEventType::MouseMoved, x, y).await?;
        self.dispatch_mouse(DispatchMouseEventType::MousePressed, x, y).await?;
        self.dispatch_mouse(DispatchMouseEventType::MouseReleased, x, y).await
    }

    async fn scroll_into_view(&mut self, selector: &Selector) -> ProbeResult<()> {
        let script = SCROLL_SCRIPT.replace("__QUERY__", &selector.to_query());
        let found: bool = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(|e| ProbeError::script(e.to_string()))?
            .into_value()
            .map_err(|e| ProbeError::script(e.to_string()))?;
        if found {
            Ok(())
        } else {
            Err(ProbeError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }

    async fn hover(&mut self, selector: &Selector, mode: HoverMode) -> ProbeResult<()> {
        let (x, y) = self.resolve(selector, mode).await?;
        self.dispatch_mouse(DispatchMouseEventType::MouseMoved, x, y).await
    }

    async fn screenshot(&mut self, full_page: bool) -> ProbeResult<Vec<u8>> {
        let mut builder = CaptureScreenshotParams::builder().format(CaptureScreenshotFormat::Png);
        if full_page {
            // Without a clip Chrome still returns only the viewport
            let metrics = self
                .page
                .execute(GetLayoutMetricsParams::default())
                .await
                .map_err(|e| ProbeError::Screenshot {
                    message: e.to_string(),
                })?;
            builder = builder
                .capture_beyond_viewport(true)
                .clip(full_page_clip(&metrics.css_content_size));
        }
        let params = builder.build();

        let screenshot = self
            .page
            .execute(params)
            .await
            .map_err(|e| ProbeError::Screenshot {
                message: e.to_string(),
            })?;

        base64::engine::general_purpose::STANDARD
            .decode(&screenshot.data)
            .map_err(|e| ProbeError::Screenshot {
                message: e.to_string(),
            })
    }

    async fn url(&mut self) -> ProbeResult<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| ProbeError::page(e.to_string()))?
            .unwrap_or_default())
    }

    async fn close(&mut self) -> ProbeResult<()> {
        if let Err(e) = self.page.clone().close().await {
            debug!(error = %e, "page close failed");
        }
        let closed = self.browser.close().await;
        if let Err(e) = self.browser.wait().await {
            debug!(error = %e, "browser wait failed");
        }
        self.handler.abort();
        closed.map_err(|e| ProbeError::page(e.to_string()))?;
        info!("browser closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_page_clip_covers_document() {
        let content = Rect {
            x: 0.0,
            y: 0.0,
            width: 1280.0,
            height: 4210.5,
        };
        let clip = full_page_clip(&content);
        assert!((clip.width - 1280.0).abs() < f64::EPSILON);
        assert!((clip.height - 4211.0).abs() < f64::EPSILON);
        assert!((clip.scale - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_full_page_clip_never_empty() {
        let clip = full_page_clip(&Rect {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
        });
        assert!(clip.width >= 1.0 && clip.height >= 1.0);
    }

    #[test]
    fn test_virtual_key_codes() {
        assert_eq!(virtual_key_code("Escape"), Some(27));
        assert_eq!(virtual_key_code("NoSuchKey"), None);
    }
}
