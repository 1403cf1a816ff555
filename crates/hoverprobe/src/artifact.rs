//! Persistence of screenshots and behavior records.
//!
//! The core only hands bytes and results to an [`ArtifactSink`]; where they
//! end up is the sink's business. [`FsArtifactSink`] writes numbered files:
//!
//! ```text
//! <root>/[<namespace>/]screenshots/001_Products_before.png
//! <root>/[<namespace>/]behaviors/001_Products.json
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::probe::InteractionResult;
use crate::result::{ProbeError, ProbeResult};

/// Maximum label length in behavior record file names
pub const BEHAVIOR_LABEL_LIMIT: usize = 50;

/// Reference to a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    /// Wrap a location
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    /// Location as stored
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Path> for ArtifactRef {
    fn from(path: &Path) -> Self {
        Self(path.display().to_string())
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Destination for probe artifacts
///
/// `namespace` is the bound logical session identifier (`None` = root).
/// A sink that keeps nothing returns `Ok(None)`.
pub trait ArtifactSink: Send + Sync {
    /// Store a PNG screenshot
    fn save_screenshot(
        &self,
        namespace: Option<&str>,
        label: &str,
        png: &[u8],
    ) -> ProbeResult<Option<ArtifactRef>>;

    /// Store one interaction result as pretty JSON
    fn save_behavior_record(
        &self,
        namespace: Option<&str>,
        label: &str,
        result: &InteractionResult,
    ) -> ProbeResult<Option<ArtifactRef>>;
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullArtifactSink;

impl ArtifactSink for NullArtifactSink {
    fn save_screenshot(
        &self,
        _namespace: Option<&str>,
        _label: &str,
        _png: &[u8],
    ) -> ProbeResult<Option<ArtifactRef>> {
        Ok(None)
    }

    fn save_behavior_record(
        &self,
        _namespace: Option<&str>,
        _label: &str,
        _result: &InteractionResult,
    ) -> ProbeResult<Option<ArtifactRef>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Screenshot,
    Behavior,
}

impl Kind {
    const fn dir_name(self) -> &'static str {
        match self {
            Self::Screenshot => "screenshots",
            Self::Behavior => "behaviors",
        }
    }
}

/// Writes artifacts below a root directory
///
/// Files are never overwritten: an index already taken on disk, e.g. by an
/// earlier run on the same root, is skipped.
#[derive(Debug)]
pub struct FsArtifactSink {
    root: PathBuf,
    counters: Mutex<HashMap<PathBuf, u32>>,
}

impl FsArtifactSink {
    /// Sink rooted at `root`; directories are created on first write
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, namespace: Option<&str>, kind: Kind) -> ProbeResult<PathBuf> {
        let mut dir = self.root.clone();
        if let Some(ns) = namespace {
            if ns.is_empty() {
                return Err(ProbeError::artifact("empty namespace"));
            }
            dir.push(namespace_dir(ns));
        }
        dir.push(kind.dir_name());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Next index for a `screenshots/` or `behaviors/` directory
    fn next(&self, dir: &Path) -> u32 {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = counters.entry(dir.to_path_buf()).or_default();
        *slot += 1;
        *slot
    }

    /// Create the next free `NNN_<stem>.<ext>` in `dir` and write `bytes`
    fn write_numbered(
        &self,
        dir: &Path,
        stem: &str,
        ext: &str,
        bytes: &[u8],
    ) -> ProbeResult<PathBuf> {
        loop {
            let n = self.next(dir);
            let path = dir.join(format!("{n:03}_{stem}.{ext}"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "artifact index taken, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl ArtifactSink for FsArtifactSink {
    fn save_screenshot(
        &self,
        namespace: Option<&str>,
        label: &str,
        png: &[u8],
    ) -> ProbeResult<Option<ArtifactRef>> {
        let dir = self.dir(namespace, Kind::Screenshot)?;
        let stem = sanitize_label(label, usize::MAX);
        let path = self.write_numbered(&dir, &stem, "png", png)?;
        debug!(path = %path.display(), bytes = png.len(), "screenshot saved");
        Ok(Some(ArtifactRef::from(path.as_path())))
    }

    fn save_behavior_record(
        &self,
        namespace: Option<&str>,
        label: &str,
        result: &InteractionResult,
    ) -> ProbeResult<Option<ArtifactRef>> {
        let dir = self.dir(namespace, Kind::Behavior)?;
        let json = serde_json::to_string_pretty(result)?;
        let stem = sanitize_label(label, BEHAVIOR_LABEL_LIMIT);
        let path = self.write_numbered(&dir, &stem, "json", json.as_bytes())?;
        debug!(path = %path.display(), behavior = %result.behavior(), "behavior record saved");
        Ok(Some(ArtifactRef::from(path.as_path())))
    }
}

/// Directory name for a namespace
///
/// `[A-Za-z0-9-]` is kept and every other byte becomes `_XX` (hex), so two
/// distinct namespaces never share a directory.
fn namespace_dir(namespace: &str) -> String {
    let mut out = String::with_capacity(namespace.len());
    for b in namespace.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "_{b:02X}");
        }
    }
    out
}

/// Replace everything outside `[A-Za-z0-9_-]` with `_` and keep at most `max` chars
#[must_use]
pub fn sanitize_label(label: &str, max: usize) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(max)
        .collect()
}
