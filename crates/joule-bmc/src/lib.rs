//! Out-of-band server power control.
//!
//! Each managed node gets a [`ServerSwitch`] holding at most one open BMC
//! session. Operations on a switch with no session fail immediately; a send
//! error tears the session down and blocks the caller in a fixed-backoff
//! reconnect loop until a fresh session is established.

#![forbid(unsafe_code)]

mod conn;
mod switch;

pub use conn::{parse_power_status, BmcConnection, BmcConnector, IpmiConnector};
pub use switch::ServerSwitch;

use thiserror::Error;

/// Result type for BMC operations.
pub type Result<T> = std::result::Result<T, BmcError>;

/// Errors that can occur while driving a BMC.
#[derive(Error, Debug)]
pub enum BmcError {
    /// No session is open for the endpoint.
    #[error("no open session for {endpoint}")]
    NoSession {
        /// The affected endpoint.
        endpoint: String,
    },

    /// The management tool could not be spawned or exited abnormally.
    #[error("bmc command failed for {endpoint}: {message}")]
    CommandFailed {
        /// The affected endpoint.
        endpoint: String,
        /// Stderr or exit description.
        message: String,
    },

    /// The management tool produced output we cannot interpret.
    #[error("unexpected bmc output: {output}")]
    UnexpectedOutput {
        /// The raw output.
        output: String,
    },
}
