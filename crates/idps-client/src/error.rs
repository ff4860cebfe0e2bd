//! Error types for the IDPS client

use tonic::Code;

/// Result type alias using the IDPS client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the IDPS service
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// TLS material could not be loaded or applied
    #[error("TLS error: {0}")]
    Tls(String),

    /// Channel could not be established
    #[error("Failed to connect to '{endpoint}': {message}")]
    Connect {
        /// Endpoint that was dialled
        endpoint: String,
        /// Underlying transport error
        message: String,
    },

    /// Remote call returned a non-OK status
    #[error("Failed to {operation} data for [JobID={job_id}]: {status}")]
    Rpc {
        /// "Encrypt" or "Decrypt"
        operation: &'static str,
        /// Job the payload belonged to
        job_id: String,
        /// Status returned by the server or the transport
        status: tonic::Status,
    },

    /// The connection pool has been closed
    #[error("grpc pool: client pool is closed")]
    PoolClosed,

    /// No pooled connection became free in time
    #[error("grpc pool: client pool timed out")]
    PoolTimeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is transient
    ///
    /// Nothing in this crate re-sends a request; callers decide.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Rpc { status, .. } => matches!(
                status.code(),
                Code::Unavailable | Code::DeadlineExceeded | Code::ResourceExhausted
            ),
            Error::Connect { .. } | Error::PoolTimeout | Error::Io(_) => true,
            _ => false,
        }
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::Tls(_))
    }

    /// gRPC status of a failed call, if any
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            Error::Rpc { status, .. } => Some(status),
            _ => None,
        }
    }
}
