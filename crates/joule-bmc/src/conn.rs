//! BMC connection seam and the `ipmitool`-backed implementation.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{BmcError, Result};

/// One open session to a node's management controller.
#[async_trait]
pub trait BmcConnection: Send + Sync {
    /// Whether the chassis is powered on.
    async fn chassis_power_status(&self) -> Result<bool>;

    /// Powers the chassis on.
    async fn chassis_power_on(&self) -> Result<()>;

    /// Powers the chassis off.
    async fn chassis_power_off(&self) -> Result<()>;
}

/// Opens sessions to one endpoint. Separated from the connection so the
/// switch can re-dial after a teardown.
#[async_trait]
pub trait BmcConnector: Send + Sync {
    /// Opens a fresh session, verifying the controller answers.
    async fn connect(&self) -> Result<Box<dyn BmcConnection>>;
}

/// Interprets `chassis power status` output.
///
/// # Errors
///
/// Returns [`BmcError::UnexpectedOutput`] when the output names neither
/// state.
pub fn parse_power_status(output: &str) -> Result<bool> {
    let lower = output.to_ascii_lowercase();
    if lower.contains("is on") {
        Ok(true)
    } else if lower.contains("is off") {
        Ok(false)
    } else {
        Err(BmcError::UnexpectedOutput {
            output: output.trim().to_string(),
        })
    }
}

/// Connector driving `ipmitool` over RMCP+.
#[derive(Debug, Clone)]
pub struct IpmiConnector {
    endpoint: String,
    username: String,
    password: String,
}

impl IpmiConnector {
    /// Creates a connector for one BMC endpoint.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl BmcConnector for IpmiConnector {
    async fn connect(&self) -> Result<Box<dyn BmcConnection>> {
        let conn = IpmiConnection {
            endpoint: self.endpoint.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        };
        // A session is only considered open once the controller answers.
        conn.chassis_power_status().await?;
        Ok(Box::new(conn))
    }
}

struct IpmiConnection {
    endpoint: String,
    username: String,
    password: String,
}

impl IpmiConnection {
    async fn run(&self, subcommand: &str) -> Result<String> {
        debug!(endpoint = %self.endpoint, subcommand, "ipmitool chassis power");
        let output = Command::new("ipmitool")
            .args([
                "-I",
                "lanplus",
                "-H",
                &self.endpoint,
                "-U",
                &self.username,
                "-P",
                &self.password,
                "chassis",
                "power",
                subcommand,
            ])
            .output()
            .await
            .map_err(|e| BmcError::CommandFailed {
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(BmcError::CommandFailed {
                endpoint: self.endpoint.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl BmcConnection for IpmiConnection {
    async fn chassis_power_status(&self) -> Result<bool> {
        let output = self.run("status").await?;
        parse_power_status(&output)
    }

    async fn chassis_power_on(&self) -> Result<()> {
        self.run("on").await.map(|_| ())
    }

    async fn chassis_power_off(&self) -> Result<()> {
        self.run("off").await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_on_and_off() {
        assert!(parse_power_status("Chassis Power is on\n").unwrap());
        assert!(!parse_power_status("Chassis Power is off\n").unwrap());
    }

    #[test]
    fn rejects_noise() {
        let err = parse_power_status("Error: Unable to establish IPMI session").unwrap_err();
        assert!(matches!(err, BmcError::UnexpectedOutput { .. }));
    }
}
