//! Browser, probe and detector configuration.
//!
//! All durations (de)serialize as integer milliseconds so that a config file
//! reads `"hover_timeout": 8000`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::result::{ProbeError, ProbeResult};

/// Environment variable overriding [`BrowserConfig::headless`]
pub const ENV_HEADLESS: &str = "HOVERPROBE_HEADLESS";
/// Environment variable overriding [`BrowserConfig::chromium_path`]
pub const ENV_CHROMIUM_PATH: &str = "HOVERPROBE_CHROMIUM_PATH";
/// Environment variable overriding [`DetectorConfig::output_dir`]
pub const ENV_OUTPUT_DIR: &str = "HOVERPROBE_OUTPUT_DIR";

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Browser launch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
    /// User agent string
    pub user_agent: Option<String>,
    /// Upper bound for load + network idle
    #[serde(with = "duration_ms")]
    pub navigation_timeout: Duration,
    /// Quiet window that counts as network idle
    #[serde(with = "duration_ms")]
    pub network_idle: Duration,
    /// Extra command line switches
    pub args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            chromium_path: None,
            sandbox: true,
            user_agent: None,
            navigation_timeout: Duration::from_secs(30),
            network_idle: Duration::from_millis(500),
            args: Vec::new(),
        }
    }
}

impl BrowserConfig {
    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Set user agent
    #[must_use]
    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    /// Set navigation timeout
    #[must_use]
    pub const fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    /// Append a command line switch
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Timings and caps of the hover-and-detect protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Pause after each neutral-reset step (pointer away, Escape, body click, pointer away)
    #[serde(with = "reset_delays_ms")]
    pub reset_delays: [Duration; 4],
    /// Pause after scrolling the target into view
    #[serde(with = "duration_ms")]
    pub scroll_settle: Duration,
    /// Bound for each individual hover attempt
    #[serde(with = "duration_ms")]
    pub hover_timeout: Duration,
    /// Wait for transitions after a delivered hover
    #[serde(with = "duration_ms")]
    pub settle: Duration,
    /// Maximum revealed links kept per result
    pub max_revealed_links: usize,
    /// Maximum distinct new tag names kept per result
    pub max_new_element_types: usize,
    /// Capture before/after screenshots unless the request says otherwise
    pub capture_screenshots: bool,
}

mod reset_delays_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &[Duration; 4],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let ms = value.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        serde::Serialize::serialize(&ms, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[Duration; 4], D::Error> {
        <[u64; 4]>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            reset_delays: [
                Duration::from_millis(200),
                Duration::from_millis(200),
                Duration::from_millis(300),
                Duration::from_millis(300),
            ],
            scroll_settle: Duration::from_millis(300),
            hover_timeout: Duration::from_secs(8),
            settle: Duration::from_millis(600),
            max_revealed_links: 10,
            max_new_element_types: 5,
            capture_screenshots: true,
        }
    }
}

impl ProbeConfig {
    /// Create new config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// No settle pauses at all; for pages that do not animate (and for tests)
    #[must_use]
    pub fn instant() -> Self {
        Self {
            reset_delays: [Duration::ZERO; 4],
            scroll_settle: Duration::ZERO,
            settle: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the per-attempt hover timeout
    #[must_use]
    pub const fn with_hover_timeout(mut self, timeout: Duration) -> Self {
        self.hover_timeout = timeout;
        self
    }

    /// Set the post-hover settle delay
    #[must_use]
    pub const fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Set the revealed link cap
    #[must_use]
    pub const fn with_max_revealed_links(mut self, max: usize) -> Self {
        self.max_revealed_links = max;
        self
    }

    /// Set default screenshot capture
    #[must_use]
    pub const fn with_screenshots(mut self, capture: bool) -> Self {
        self.capture_screenshots = capture;
        self
    }
}

/// Everything a [`HoverDetector`](crate::HoverDetector) needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Browser launch settings
    pub browser: BrowserConfig,
    /// Probe protocol settings
    pub probe: ProbeConfig,
    /// Root directory for artifacts
    pub output_dir: PathBuf,
    /// Logical session identifier (artifact namespace)
    pub session_id: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            browser: BrowserConfig::default(),
            probe: ProbeConfig::default(),
            output_dir: PathBuf::from("output"),
            session_id: None,
        }
    }
}

impl DetectorConfig {
    /// Create new config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; missing fields fall back to defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProbeError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ProbeError::config(format!("invalid config {}: {e}", path.display())))
    }

    /// Apply `HOVERPROBE_*` environment overrides
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(ENV_HEADLESS) {
            self.browser.headless = matches!(value.trim(), "1" | "true" | "yes");
        }
        if let Some(path) = lookup(ENV_CHROMIUM_PATH).filter(|p| !p.is_empty()) {
            self.browser.chromium_path = Some(path);
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR).filter(|d| !d.is_empty()) {
            self.output_dir = PathBuf::from(dir);
        }
        self
    }

    /// Set the logical session identifier
    #[must_use]
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Set the artifact root
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Replace the browser settings
    #[must_use]
    pub fn with_browser(mut self, browser: BrowserConfig) -> Self {
        self.browser = browser;
        self
    }

    /// Replace the probe settings
    #[must_use]
    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    mod browser_config_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let config = BrowserConfig::default();
            assert!(config.headless);
            assert!(config.sandbox);
            assert_eq!(config.viewport_width, 1280);
            assert_eq!(config.navigation_timeout, Duration::from_secs(30));
        }

        #[test]
        fn test_builder() {
            let config = BrowserConfig::default()
                .with_headless(false)
                .with_viewport(800, 600)
                .with_no_sandbox()
                .with_chromium_path("/usr/bin/chromium")
                .with_arg("--disable-gpu");
            assert!(!config.headless);
            assert!(!config.sandbox);
            assert_eq!((config.viewport_width, config.viewport_height), (800, 600));
            assert_eq!(config.chromium_path.as_deref(), Some("/usr/bin/chromium"));
            assert_eq!(config.args, vec!["--disable-gpu".to_string()]);
        }
    }

    mod probe_config_tests {
        use super::*;

        #[test]
        fn test_protocol_defaults() {
            let config = ProbeConfig::default();
            assert_eq!(config.hover_timeout, Duration::from_secs(8));
            assert_eq!(config.settle, Duration::from_millis(600));
            assert_eq!(config.max_revealed_links, 10);
            assert_eq!(config.max_new_element_types, 5);
            assert_eq!(config.reset_delays[2], Duration::from_millis(300));
        }

        #[test]
        fn test_instant_keeps_timeouts() {
            let config = ProbeConfig::instant();
            assert!(config.reset_delays.iter().all(Duration::is_zero));
            assert!(config.settle.is_zero());
            assert_eq!(config.hover_timeout, Duration::from_secs(8));
        }

        #[test]
        fn test_durations_serialize_as_millis() {
            let json = serde_json::to_value(ProbeConfig::default()).unwrap();
            assert_eq!(json["hover_timeout"], 8000);
            assert_eq!(json["reset_delays"], serde_json::json!([200, 200, 300, 300]));
        }
    }

    mod detector_config_tests {
        use super::*;

        #[test]
        fn test_partial_json_uses_defaults() {
            let config: DetectorConfig = serde_json::from_str(
                r#"{"session_id": "run-7", "probe": {"hover_timeout": 250}}"#,
            )
            .unwrap();
            assert_eq!(config.session_id.as_deref(), Some("run-7"));
            assert_eq!(config.probe.hover_timeout, Duration::from_millis(250));
            assert_eq!(config.probe.max_revealed_links, 10);
            assert!(config.browser.headless);
        }

        #[test]
        fn test_from_json_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("hoverprobe.json");
            std::fs::write(&path, r#"{"output_dir": "artifacts"}"#).unwrap();
            let config = DetectorConfig::from_json_file(&path).unwrap();
            assert_eq!(config.output_dir, PathBuf::from("artifacts"));
        }

        #[test]
        fn test_from_json_file_reports_bad_json() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("broken.json");
            std::fs::write(&path, "{not json").unwrap();
            let err = DetectorConfig::from_json_file(&path).unwrap_err();
            assert!(matches!(err, ProbeError::Config { .. }));
        }

        #[test]
        fn test_overrides() {
            let env: HashMap<&str, &str> = HashMap::from([
                (ENV_HEADLESS, "false"),
                (ENV_CHROMIUM_PATH, "/opt/chrome"),
                (ENV_OUTPUT_DIR, ""),
            ]);
            let config =
                DetectorConfig::default().with_overrides(|k| env.get(k).map(ToString::to_string));
            assert!(!config.browser.headless);
            assert_eq!(config.browser.chromium_path.as_deref(), Some("/opt/chrome"));
            assert_eq!(config.output_dir, PathBuf::from("output"));
        }
    }
}
