use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Outcome of the most recent command/response exchange, kept by the driver
/// so callers can inspect it after a getter returned a stale or default
/// value. Getters that only decode a stored buffer leave it unchanged,
/// except that a plausibility-filter rejection is always recorded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ResponseStatus {
    /// No exchange attempted yet.
    #[default]
    Null,
    /// Last exchange completed with a valid response.
    Ok,
    /// No complete frame arrived within the timeout window.
    Timeout,
    /// Response frame was valid but echoed a different opcode.
    Match,
    /// Response frame failed checksum validation.
    Crc,
    /// Reading was rejected by the plausibility filter.
    Filter,
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ResponseStatus::Null => write!(f, "no exchange attempted"),
            ResponseStatus::Ok => write!(f, "ok"),
            ResponseStatus::Timeout => write!(f, "response timeout"),
            ResponseStatus::Match => write!(f, "response opcode mismatch"),
            ResponseStatus::Crc => write!(f, "checksum mismatch"),
            ResponseStatus::Filter => write!(f, "reading rejected by filter"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No complete 9-byte frame arrived before the deadline. Partial data
    /// is discarded; the caller may simply retry.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// The received frame did not satisfy the checksum invariant.
    #[error("checksum mismatch - calculated={calculated:#04x} received={received:#04x}")]
    Checksum { calculated: u8, received: u8 },
    /// The received frame was intact but answered a different command.
    #[error("response opcode {received:#04x} does not match request {sent:#04x}")]
    Match { sent: u8, received: u8 },
    /// The plausibility filter judged the reading implausible.
    #[error("reading rejected by plausibility filter")]
    Filter,
    /// A parameter was outside the values the sensor accepts.
    #[error("value out of range")]
    Range,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wire-level status this error maps to. `Range` and `Io` happen outside
    /// the command/response exchange and carry no status.
    pub fn status(&self) -> Option<ResponseStatus> {
        match self {
            Error::Timeout(_) => Some(ResponseStatus::Timeout),
            Error::Checksum { .. } => Some(ResponseStatus::Crc),
            Error::Match { .. } => Some(ResponseStatus::Match),
            Error::Filter => Some(ResponseStatus::Filter),
            Error::Range | Error::Io(_) => None,
        }
    }
}
