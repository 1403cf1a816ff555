//! Browser session lifecycle.
//!
//! A [`SessionManager`] owns at most one live [`Session`]. It is itself owned
//! by the browser worker, so none of this needs locking.

use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::driver::{DriverLauncher, PageDriver};
use crate::result::{ProbeError, ProbeResult};

/// One live browser/context/page triple
#[derive(Debug)]
pub struct Session<D> {
    driver: D,
    serial: u64,
    launched_at: Instant,
}

impl<D> Session<D> {
    /// Launch counter value of this session, starting at 1
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    /// When the browser was launched
    #[must_use]
    pub const fn launched_at(&self) -> Instant {
        self.launched_at
    }
}

/// Lazily creates, reuses and tears down the session
pub struct SessionManager<L: DriverLauncher> {
    launcher: L,
    config: BrowserConfig,
    session: Option<Session<L::Driver>>,
    identity: Option<String>,
    launches: u64,
}

impl<L: DriverLauncher> fmt::Debug for SessionManager<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("serial", &self.session.as_ref().map(Session::serial))
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl<L: DriverLauncher> SessionManager<L> {
    /// Create a manager; nothing is launched yet
    #[must_use]
    pub const fn new(launcher: L, config: BrowserConfig) -> Self {
        Self {
            launcher,
            config,
            session: None,
            identity: None,
            launches: 0,
        }
    }

    /// Start with `identity` already bound
    #[must_use]
    pub fn with_identity(mut self, identity: Option<String>) -> Self {
        self.identity = identity;
        self
    }

    /// Browser settings used for launches
    #[must_use]
    pub const fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Whether a session is live
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.session.is_some()
    }

    /// The live session, if any
    #[must_use]
    pub const fn session(&self) -> Option<&Session<L::Driver>> {
        self.session.as_ref()
    }

    /// Bound logical identity (artifact namespace)
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Return the page driver, launching a session first if there is none
    ///
    /// Calling this again while a session is live returns the same driver.
    /// A failed launch leaves the manager without a session and is not retried.
    pub async fn ensure_page(&mut self) -> ProbeResult<&mut L::Driver> {
        if self.session.is_none() {
            self.launches += 1;
            debug!(serial = self.launches, "launching browser session");
            let driver = self.launcher.launch(&self.config).await.map_err(|e| match e {
                ProbeError::BrowserLaunch { .. } => e,
                other => ProbeError::launch(other.to_string()),
            })?;
            info!(serial = self.launches, identity = ?self.identity, "browser session ready");
            self.session = Some(Session {
                driver,
                serial: self.launches,
                launched_at: Instant::now(),
            });
        }
        self.session
            .as_mut()
            .map(|s| &mut s.driver)
            .ok_or(ProbeError::NoSession)
    }

    /// Load `url` in the session page and return its title
    pub async fn navigate(&mut self, url: &str) -> ProbeResult<String> {
        let driver = self.ensure_page().await?;
        info!(url, "navigating");
        let title = driver.navigate(url).await?;
        debug!(url, title = %title, "navigation complete");
        Ok(title)
    }

    /// Release the session; no-op when there is none
    ///
    /// The manager is reset even if the driver reports a close failure.
    pub async fn close(&mut self) -> ProbeResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let result = session.driver.close().await;
        match &result {
            Ok(()) => info!(serial = session.serial, "browser session closed"),
            Err(e) => warn!(serial = session.serial, error = %e, "browser close failed"),
        }
        result
    }

    /// Bind a logical identity
    ///
    /// A different identity closes the live session first so that the next
    /// access starts clean; the same identity changes nothing.
    pub async fn bind_identity(&mut self, identity: Option<String>) -> ProbeResult<()> {
        if self.identity == identity {
            return Ok(());
        }
        if self.is_live() {
            info!(from = ?self.identity, to = ?identity, "identity changed, closing session");
            if let Err(e) = self.close().await {
                debug!(error = %e, "ignoring close failure during rebind");
            }
        }
        self.identity = identity;
        Ok(())
    }
}
