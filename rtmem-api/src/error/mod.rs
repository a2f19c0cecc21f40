//! Error handling module for the runtime memory subsystem

use core::fmt;
use alloc::string::{String, ToString};
use alloc::format;

/// Common error type used throughout the runtime memory subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A chunk or arena could not be obtained from the underlying allocator
    OutOfMemory,
    /// Request outside the supported range (size, alignment, unknown address)
    InvalidRequest(String),
    /// A statistics invariant did not hold; bookkeeping is broken upstream
    InternalConsistencyFault(String),
    /// Configuration error
    ConfigError(String),
}

impl Error {
    /// Returns true for consistency faults.
    pub fn is_consistency_fault(&self) -> bool {
        matches!(self, Error::InternalConsistencyFault(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Error::InternalConsistencyFault(msg) => write!(f, "Internal consistency fault: {}", msg),
            Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;

/// Error context trait for adding context to errors
pub trait ErrorContext<T> {
    /// Adds context to the error, keeping its kind
    fn context(self, context: &str) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|error| match error {
            Error::OutOfMemory => Error::OutOfMemory,
            Error::InvalidRequest(msg) => Error::InvalidRequest(format!("{}: {}", context, msg)),
            Error::InternalConsistencyFault(msg) => {
                Error::InternalConsistencyFault(format!("{}: {}", context, msg))
            }
            Error::ConfigError(msg) => Error::ConfigError(format!("{}: {}", context, msg)),
        })
    }
}

/// Creates a new out of memory error
pub fn out_of_memory() -> Error {
    Error::OutOfMemory
}

/// Creates a new invalid request error
pub fn invalid_request(msg: &str) -> Error {
    Error::InvalidRequest(msg.to_string())
}

/// Creates a new internal consistency fault
pub fn consistency_fault(msg: &str) -> Error {
    Error::InternalConsistencyFault(msg.to_string())
}

/// Creates a new config error
pub fn config_error(msg: &str) -> Error {
    Error::ConfigError(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display() {
        assert_eq!(out_of_memory().to_string(), "Out of memory");
        assert_eq!(
            invalid_request("size 17 exceeds tiny threshold").to_string(),
            "Invalid request: size 17 exceeds tiny threshold"
        );
    }

    #[test]
    fn test_context_keeps_kind() {
        let res: Result<()> = Err(consistency_fault("sys mismatch"));
        let err = res.context("snapshot").unwrap_err();
        assert!(err.is_consistency_fault());
        assert_eq!(err.to_string(), "Internal consistency fault: snapshot: sys mismatch");

        let res: Result<()> = Err(out_of_memory());
        assert_eq!(res.context("tiny").unwrap_err(), Error::OutOfMemory);
    }
}
