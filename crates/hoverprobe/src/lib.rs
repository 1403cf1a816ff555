//! Hoverprobe: hover behavior discovery for web pages
//!
//! Drives one browser page, hovers a target, and classifies what the hover
//! revealed by diffing structural snapshots of the visible page taken before
//! and after.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   FIFO jobs   ┌───────────────────────── worker thread ─┐
//! │ HoverDetector│──────────────►│ SessionManager ─► PageDriver (Chromium) │
//! │ (async, any  │◄──────────────│ InteractionProbe ─► classify            │
//! │  task)       │   oneshot     │ ArtifactSink (screenshots, records)     │
//! └──────────────┘               └─────────────────────────────────────────┘
//! ```
//!
//! Every browser operation runs on a single dedicated worker, one job at a
//! time. Hover outcomes are one of five [`BehaviorCategory`] values; a hover
//! that cannot be delivered is reported as [`BehaviorCategory::Unreachable`]
//! rather than as an error.
//!
//! Real browser control needs the `browser` feature. Without it the crate
//! still runs the whole protocol over any [`PageDriver`], e.g. [`MockDriver`].

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod artifact;
mod bridge;
#[cfg(feature = "browser")]
mod cdp;
mod classifier;
mod config;
mod detector;
mod driver;
mod probe;
mod result;
mod selector;
mod session;
mod snapshot;

/// Read-only page structure queries for probe planning
pub mod structure;

/// Tracing subscriber setup
pub mod logging;

pub use artifact::{
    sanitize_label, ArtifactRef, ArtifactSink, FsArtifactSink, NullArtifactSink,
    BEHAVIOR_LABEL_LIMIT,
};
pub use bridge::SyncBridge;
#[cfg(feature = "browser")]
pub use cdp::{ChromiumDriver, ChromiumLauncher};
pub use classifier::{
    classify, BehaviorCategory, BehaviorTally, Classification, ClassifierLimits, RevealedLink,
    MENU_MARKERS, TOOLTIP_MARKERS,
};
pub use config::{
    BrowserConfig, DetectorConfig, ProbeConfig, ENV_CHROMIUM_PATH, ENV_HEADLESS, ENV_OUTPUT_DIR,
};
pub use detector::{DetectorRegistry, HoverDetector, WORKER_NAME};
pub use driver::{DriverLauncher, HoverMode, MockDriver, MockHover, MockLauncher, PageDriver};
pub use probe::{
    capture_snapshot, strategy_chain, HoverStrategy, InteractionProbe, InteractionResult,
    PointerHover, ProbeRequest, SCREENSHOT_LABEL_LIMIT,
};
pub use result::{ProbeError, ProbeResult};
pub use selector::Selector;
pub use session::{Session, SessionManager};
pub use snapshot::{
    snapshot_script, ElementSnapshot, VisibleNode, CANDIDATE_SELECTORS, KEY_TEXT_LIMIT, TEXT_LIMIT,
};
pub use structure::{HoverableElement, PageStructure};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        BehaviorCategory, BehaviorTally, BrowserConfig, DetectorConfig, HoverDetector,
        InteractionResult, PageDriver, ProbeConfig, ProbeError, ProbeRequest, ProbeResult,
        Selector,
    };
    #[cfg(feature = "browser")]
    pub use super::ChromiumLauncher;
}
