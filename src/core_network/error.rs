// Error taxonomy for the session/connection engine.
use thiserror::Error;

use crate::core_transfer::state::TransferKind;

/// Direction of a third-party (FXP) transfer, from the server's viewpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FxpDirection {
    Receive,
    Send,
}

impl FxpDirection {
    pub fn from_kind(kind: TransferKind) -> Self {
        match kind {
            TransferKind::Upload => FxpDirection::Receive,
            _ => FxpDirection::Send,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FxpDirection::Receive => "upload",
            FxpDirection::Send => "download",
        }
    }
}

#[derive(Error, Debug)]
pub enum FtpError {
    #[error("Network error: {0}")]
    Network(#[source] std::io::Error),

    #[error("Operation timed out")]
    Timeout,

    #[error("End of stream")]
    EndOfStream,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transfer aborted")]
    TransferAborted,

    #[error("Transfer speed below minimum ({observed:.1} KiB/s < {limit} KiB/s)")]
    MinimumSpeed { limit: u64, observed: f64 },

    #[error("FXP {} not allowed", .direction.as_str())]
    FxpDenied { direction: FxpDirection },

    #[error("Unable to find a valid local address")]
    AddrsExhausted,

    #[error("All ports exhausted")]
    PortsExhausted,

    /// An error captured while servicing the control channel mid-transfer,
    /// re-raised from the data path at the next poll iteration.
    #[error("Control channel error during transfer: {0}")]
    Control(#[source] Box<FtpError>),
}

impl FtpError {
    /// Maps an I/O error, normalizing timeouts to the timeout variant so
    /// callers can always match on `FtpError::Timeout`.
    pub fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => FtpError::Timeout,
            std::io::ErrorKind::UnexpectedEof => FtpError::EndOfStream,
            _ => FtpError::Network(e),
        }
    }

    /// OS errno of the underlying transport failure, when there is one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            FtpError::Network(e) => e.raw_os_error(),
            FtpError::Control(inner) => inner.errno(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FtpError::Timeout)
    }

    pub fn to_ftp_response(&self) -> String {
        match self {
            FtpError::Timeout => "421 Timeout exceeded, closing control connection.".to_string(),
            FtpError::TransferAborted => "426 Connection closed; transfer aborted.".to_string(),
            FtpError::MinimumSpeed { limit, observed } => format!(
                "426 Transfer killed, below minimum speed ({:.1} KiB/s < {} KiB/s).",
                observed, limit
            ),
            FtpError::FxpDenied { direction } => {
                format!("435 FXP {} not allowed.", direction.as_str())
            }
            FtpError::AddrsExhausted | FtpError::PortsExhausted => {
                format!("425 Unable to listen for data connection: {}.", self)
            }
            _ => "451 Requested action aborted. Local error in processing.".to_string(),
        }
    }
}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        FtpError::from_io(e)
    }
}

pub type Result<T> = std::result::Result<T, FtpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeout_normalized() {
        let e = FtpError::from_io(std::io::Error::new(std::io::ErrorKind::TimedOut, "t"));
        assert!(e.is_timeout());
    }

    #[test]
    fn io_eof_is_end_of_stream() {
        let e = FtpError::from_io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "e"));
        assert!(matches!(e, FtpError::EndOfStream));
    }

    #[test]
    fn errno_passes_through_control_wrapper() {
        let inner = FtpError::Network(std::io::Error::from_raw_os_error(104));
        let e = FtpError::Control(Box::new(inner));
        assert_eq!(e.errno(), Some(104));
    }

    #[test]
    fn minimum_speed_response_carries_values() {
        let e = FtpError::MinimumSpeed {
            limit: 10,
            observed: 2.0,
        };
        let resp = e.to_ftp_response();
        assert!(resp.starts_with("426 "));
        assert!(resp.contains("10"));
        assert!(resp.contains("2.0"));
    }
}
