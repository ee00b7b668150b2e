//! Error types for vidgate
//!
//! Every failure class carries what the boundary needs explicitly; nothing
//! is recovered by downcasting a generic error value.

use hyper::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Content does not exist upstream. Terminal, never retried.
    #[error("Content not found upstream: {0}")]
    NotFound(String),

    /// Network failure, timeout or server error from an upstream instance.
    /// Triggers instance rotation and a bounded retry.
    #[error("Upstream transient failure (status {status})")]
    UpstreamTransient { status: u16 },

    /// The instance directory is unreachable or every candidate is
    /// blacklisted.
    #[error("No upstream instance available")]
    NoCandidateInstance,

    /// A candidate payload exceeds the configured in-memory ceiling.
    #[error("Payload too large: {length} bytes (max {max})")]
    SizeExceeded { length: u64, max: u64 },

    /// Bytes received did not match the declared content length.
    #[error("Transfer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    /// The metadata store failed to open, read or write. Caching is
    /// best-effort, so resolution still returns freshly-fetched values.
    #[error("Metadata store unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Metadata resolved fine but no format survived the container filter.
    #[error("No playable source for {0}")]
    NoPlayableSource(String),
}

impl Error {
    /// Classify a transport-level client failure, keeping the status
    /// explicit in the variant.
    pub fn transport(err: reqwest::Error) -> Self {
        let status = if err.is_timeout() { 504 } else { 502 };
        Error::UpstreamTransient { status }
    }

    /// HTTP status this error maps to at the service boundary.
    ///
    /// Terminal errors map to the not-found class, transient exhaustion to
    /// service-unavailable; transfer integrity failures to bad-gateway.
    /// Internal detail never leaks past this mapping.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) | Error::NoPlayableSource(_) => StatusCode::NOT_FOUND,
            Error::UpstreamTransient { .. } | Error::NoCandidateInstance => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::SizeExceeded { .. } | Error::LengthMismatch { .. } => StatusCode::BAD_GATEWAY,
            Error::PersistenceUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
