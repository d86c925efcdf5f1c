//! Per-node switch owning the single open session.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::conn::{BmcConnection, BmcConnector};
use crate::{BmcError, Result};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// A node's power switch: exactly one session per endpoint.
///
/// When a send fails the session is discarded and the caller blocks in a
/// fixed-backoff reconnect loop until a fresh session is open; the failed
/// operation itself is reported to the caller, whose next tick retries it.
pub struct ServerSwitch {
    endpoint: String,
    connector: Box<dyn BmcConnector>,
    session: Mutex<Option<Box<dyn BmcConnection>>>,
    backoff: Duration,
}

impl ServerSwitch {
    /// Creates a switch with no open session.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, connector: Box<dyn BmcConnector>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connector,
            session: Mutex::new(None),
            backoff: RECONNECT_BACKOFF,
        }
    }

    /// Overrides the reconnect backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// The BMC endpoint this switch drives.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Opens the initial session.
    ///
    /// # Errors
    ///
    /// Returns the connect error; unlike mid-operation teardown this does
    /// not loop, so boot can decide what to do with a dead BMC.
    pub async fn connect(&self) -> Result<()> {
        let conn = self.connector.connect().await?;
        *self.session.lock().await = Some(conn);
        info!(endpoint = %self.endpoint, "bmc session opened");
        Ok(())
    }

    /// Whether a session is currently open.
    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Queries chassis power state.
    ///
    /// # Errors
    ///
    /// Returns [`BmcError::NoSession`] without a session, or the send error
    /// after tearing down and re-establishing the session.
    pub async fn is_power_on(&self) -> Result<bool> {
        let mut session = self.session.lock().await;
        let conn = session.as_ref().ok_or_else(|| self.no_session())?;
        match conn.chassis_power_status().await {
            Ok(on) => Ok(on),
            Err(e) => {
                self.recover(&mut session).await;
                Err(e)
            }
        }
    }

    /// Powers the chassis on.
    ///
    /// # Errors
    ///
    /// Same semantics as [`Self::is_power_on`].
    pub async fn power_on(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let conn = session.as_ref().ok_or_else(|| self.no_session())?;
        match conn.chassis_power_on().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.recover(&mut session).await;
                Err(e)
            }
        }
    }

    /// Powers the chassis off.
    ///
    /// # Errors
    ///
    /// Same semantics as [`Self::is_power_on`].
    pub async fn power_off(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let conn = session.as_ref().ok_or_else(|| self.no_session())?;
        match conn.chassis_power_off().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.recover(&mut session).await;
                Err(e)
            }
        }
    }

    fn no_session(&self) -> BmcError {
        BmcError::NoSession {
            endpoint: self.endpoint.clone(),
        }
    }

    /// Discards the broken session and redials until a new one is open.
    async fn recover(&self, slot: &mut Option<Box<dyn BmcConnection>>) {
        *slot = None;
        warn!(endpoint = %self.endpoint, "bmc session torn down, reconnecting");
        loop {
            tokio::time::sleep(self.backoff).await;
            match self.connector.connect().await {
                Ok(conn) => {
                    *slot = Some(conn);
                    info!(endpoint = %self.endpoint, "bmc session reopened");
                    return;
                }
                Err(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "bmc reconnect failed");
                }
            }
        }
    }
}
