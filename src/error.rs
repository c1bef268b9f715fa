//! Error types for the O3D client.
//!
//! Device operations return [`O3dError`]. Control-channel
//! failures carry the device's raw status code untouched; byte-stream
//! failures distinguish a closed connection from an expired read deadline
//! so callers can decide whether a retry makes sense.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, O3dError>;

/// Why a frame could not be completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncompleteReason {
    /// The device closed the byte stream.
    Closed,
    /// The frame deadline expired before all bytes arrived.
    TimedOut,
}

impl fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncompleteReason::Closed => f.write_str("connection closed"),
            IncompleteReason::TimedOut => f.write_str("read timed out"),
        }
    }
}

/// O3D client error types
#[derive(Debug, thiserror::Error)]
pub enum O3dError {
    /// Nonzero status returned by a control call
    #[error("{method} returned status {code}")]
    Rpc {
        /// Remote procedure that failed
        method: &'static str,
        /// Device-specific status code
        code: i32,
    },

    /// The device refused to hand out a streaming port
    #[error("streaming port unavailable (status {code})")]
    PortUnavailable {
        /// Status code of the port query
        code: i32,
    },

    /// The byte-stream connection could not be opened
    #[error("connection to {addr} failed: {source}")]
    ConnectionFailed {
        /// Streaming endpoint
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// The byte-stream connection was not established in time
    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Streaming endpoint
        addr: SocketAddr,
        /// Configured connect timeout
        timeout: Duration,
    },

    /// A frame could not be read completely
    #[error("incomplete frame: {received} of {expected} bytes ({reason})")]
    IncompleteFrame {
        /// Bytes accumulated before the failure
        received: usize,
        /// Bytes in a full frame
        expected: usize,
        /// What ended the read
        reason: IncompleteReason,
    },

    /// A buffer of the wrong size reached the frame codec
    #[error("malformed frame: {len} bytes, expected {expected}")]
    MalformedFrame {
        /// Actual buffer length
        len: usize,
        /// Required buffer length
        expected: usize,
    },

    /// A control reply did not have the expected shape
    #[error("invalid response to {method}: {reason}")]
    InvalidResponse {
        /// Remote procedure that answered
        method: &'static str,
        /// What was wrong with the reply
        reason: String,
    },

    /// The external RPC capability failed before a status was available
    #[error("rpc transport error: {0}")]
    Transport(String),

    /// An acquire call named no images
    #[error("image request is empty")]
    EmptyRequest,

    /// Operation not allowed in the current session state
    #[error("{operation} not allowed while {state}")]
    InvalidState {
        /// Requested operation
        operation: &'static str,
        /// Session state at the time of the request
        state: &'static str,
    },

    /// I/O error on the byte stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl O3dError {
    /// Device status code, if the error came from a control call.
    pub fn status_code(&self) -> Option<i32> {
        match self {
            O3dError::Rpc { code, .. } | O3dError::PortUnavailable { code } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_is_exposed_for_control_failures() {
        let err = O3dError::Rpc {
            method: "MDAXMLGetProgram",
            code: 3,
        };
        assert_eq!(err.status_code(), Some(3));
        assert_eq!(O3dError::PortUnavailable { code: 9 }.status_code(), Some(9));
        assert_eq!(O3dError::EmptyRequest.status_code(), None);
    }

    #[test]
    fn incomplete_frame_message_names_reason() {
        let err = O3dError::IncompleteFrame {
            received: 10,
            expected: 20,
            reason: IncompleteReason::TimedOut,
        };
        assert_eq!(
            err.to_string(),
            "incomplete frame: 10 of 20 bytes (read timed out)"
        );
    }
}
