//! Error taxonomy for remote operations

use std::time::Duration;

use thiserror::Error;
use tonic::{Code, Status};

use crate::proto::SystemErrorCode;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by remote invocations, process streams and file handles.
///
/// Transport failures that the poll loop can ride out never reach the caller
/// as [`Error::Rpc`] while a deadline is still running; they become
/// [`Error::DeadlineExceeded`] once it passes.
#[derive(Debug, Error)]
pub enum Error {
    /// The RPC channel failed to complete a call.
    #[error("{operation} failed: {status}")]
    Rpc {
        /// Name of the operation or RPC method.
        operation: String,
        /// Status returned by the channel.
        status: Status,
    },
    /// A referenced remote resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The remote execution failed or raised.
    #[error("remote error: {message}")]
    Remote {
        /// Message reported by the platform.
        message: String,
    },
    /// The remote function exceeded its own execution time limit.
    #[error("function timed out: {0}")]
    FunctionTimeout(String),
    /// The platform failed internally; the input may be retried.
    #[error("internal failure: {0}")]
    InternalFailure(String),
    /// Operation attempted on a closed or otherwise unusable local handle.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    /// The caller cancelled the wait.
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that was interrupted.
        operation: String,
    },
    /// The caller's timeout elapsed before a terminal state was reached.
    #[error("{operation} timed out after {timeout:?}")]
    DeadlineExceeded {
        /// Operation that was interrupted.
        operation: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },
    /// A zero-timeout check found the result not yet available.
    #[error("{operation}: output not ready")]
    NotReady {
        /// Operation that was checked.
        operation: String,
    },
    /// The remote filesystem reported an error.
    #[error("{operation} failed ({code:?}): {message}")]
    Filesystem {
        /// Filesystem operation that failed.
        operation: String,
        /// Errno-style error code.
        code: SystemErrorCode,
        /// Message reported by the platform.
        message: String,
    },
    /// Caller input rejected before any RPC was issued.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Encoding arguments or decoding a result failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Loading client configuration failed.
    #[error("config error: {0}")]
    Config(String),
    /// A response message could not be decoded.
    #[error("{operation}: malformed response: {source}")]
    Decode {
        /// RPC method whose response was malformed.
        operation: String,
        /// Underlying decode error.
        #[source]
        source: prost::DecodeError,
    },
}

impl Error {
    /// Build an error from a channel status, keeping the operation name.
    pub(crate) fn from_status(operation: impl Into<String>, status: Status) -> Self {
        let operation = operation.into();
        match status.code() {
            Code::NotFound => Error::NotFound(format!("{operation}: {}", status.message())),
            _ => Error::Rpc { operation, status },
        }
    }

    /// Whether the poll loop may absorb this error and try again.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Rpc { status, .. } => matches!(
                status.code(),
                Code::DeadlineExceeded
                    | Code::Unavailable
                    | Code::Cancelled
                    | Code::Internal
                    | Code::Unknown
            ),
            _ => false,
        }
    }

    /// The channel status code, if this is a transport error.
    pub fn code(&self) -> Option<Code> {
        match self {
            Error::Rpc { status, .. } => Some(status.code()),
            _ => None,
        }
    }

    pub(crate) fn cancelled(operation: impl Into<String>) -> Self {
        Error::Cancelled {
            operation: operation.into(),
        }
    }

    pub(crate) fn filesystem(
        operation: impl Into<String>,
        code: SystemErrorCode,
        message: impl Into<String>,
    ) -> Self {
        let operation = operation.into();
        let message = message.into();
        match code {
            SystemErrorCode::Noent => Error::NotFound(format!("{operation}: {message}")),
            _ => Error::Filesystem {
                operation,
                code,
                message,
            },
        }
    }
}
