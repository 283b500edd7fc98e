//! Error types for the server lifecycle and job engine

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error
///
/// Everything except [`ErrorKind::Internal`] is surfaced synchronously from
/// the call that triggered it and can be retried once the caller has fixed
/// the state it complained about.
#[derive(Error, Debug)]
pub enum Error {
    /// The resource is already occupied
    #[error("conflict: {0}")]
    Conflict(String),

    /// The server cannot stop because a benchmark job is using it
    #[error("benchmark job {job_id} is running; cancel it first or stop with force")]
    BenchmarkRunning { job_id: String },

    /// The operation needs a state that does not currently hold
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Unknown job id
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed framework, model, or scenario identifier
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// Process launch or I/O failure
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    Precondition,
    NotFound,
    Invalid,
    Internal,
}

impl Error {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Conflict(_) | Error::BenchmarkRunning { .. } => ErrorKind::Conflict,
            Error::Precondition(_) => ErrorKind::Precondition,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Invalid(_) => ErrorKind::Invalid,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller can retry after correcting state
    pub fn is_recoverable(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(
            Error::BenchmarkRunning {
                job_id: "abc".into()
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(Error::precondition("x").kind(), ErrorKind::Precondition);
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::invalid("x").kind(), ErrorKind::Invalid);
        assert_eq!(Error::internal("boom").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::conflict("x").is_recoverable());
        assert!(Error::not_found("x").is_recoverable());
        assert!(!Error::internal("spawn failed").is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::BenchmarkRunning {
            job_id: "job-1".into(),
        };
        assert!(err.to_string().contains("job-1"));
        assert_eq!(
            Error::invalid("unknown framework: foo").to_string(),
            "invalid argument: unknown framework: foo"
        );
    }
}
