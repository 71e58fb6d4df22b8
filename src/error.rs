//! Error type shared by every stage of an acquisition.
//!
//! Each failure kind is its own variant so callers can tell them apart
//! without looking at messages. Variants carry what is needed to log the
//! failure meaningfully: which field, the raw device text, the helper path.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::response::Field;

pub type Result<T> = std::result::Result<T, PloadError>;

#[derive(Error, Debug)]
pub enum PloadError {
    #[error("Empty response from device")]
    EmptyResponse,

    #[error("Unable to parse pload for {field}. Output was: {raw}")]
    MissingField { field: Field, raw: String },

    #[error("Invalid {field} register encoding: {value:?}")]
    InvalidRegisterEncoding { field: Field, value: String },

    #[error("No data received from telnet")]
    NoData,

    #[error("Failed to start {}: {source}", .path.display())]
    LaunchFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Command channel at {endpoint} not reachable after {timeout:?}")]
    GatewayUnreachable { endpoint: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
