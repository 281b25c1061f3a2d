//! Error types for Fiberline.
//!
//! Failures that happen *inside* a fiber never surface here: they are captured
//! into the fiber's [`Exit`](crate::types::Exit) as a [`Cause`]. The types in
//! this module cover the boundary instead:
//!
//! - [`Error`]: runtime construction and configuration failures
//! - [`FiberFailure`]: a failed exit surfaced by a blocking run
//! - [`ParseFlagError`]: an unknown runtime flag name

use core::fmt;
use std::sync::Arc;

use crate::types::Cause;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A configuration value was missing or malformed.
    InvalidConfig,
    /// A worker thread could not be spawned.
    ThreadSpawn,
    /// Internal runtime error (bug).
    Internal,
}

/// The main error type for runtime operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig).with_message(detail)
    }

    /// Creates a thread spawn error.
    #[must_use]
    pub fn thread_spawn(source: std::io::Error) -> Self {
        Self::new(ErrorKind::ThreadSpawn)
            .with_message("failed to spawn worker thread")
            .with_source(source)
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<ParseFlagError> for Error {
    fn from(e: ParseFlagError) -> Self {
        Self::invalid_config(e.to_string()).with_source(e)
    }
}

/// A specialized Result type for runtime operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The failed exit of a fiber run with a blocking entry point.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fiber failed: {cause}")]
pub struct FiberFailure<E: fmt::Debug> {
    /// The full cause of the failure.
    pub cause: Cause<E>,
}

impl<E: fmt::Debug> FiberFailure<E> {
    /// Wraps a cause.
    #[must_use]
    pub const fn new(cause: Cause<E>) -> Self {
        Self { cause }
    }

    /// Returns true if the fiber was interrupted rather than failed.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.cause.is_interrupted()
    }

    /// Consumes the failure, returning its cause.
    #[must_use]
    pub fn into_cause(self) -> Cause<E> {
        self.cause
    }
}

/// A runtime flag name that did not match any known flag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown runtime flag {name:?}")]
pub struct ParseFlagError {
    /// The rejected input.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FiberId;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal");
    }

    #[test]
    fn display_with_message() {
        let err = Error::invalid_config("worker_threads must be a number");
        assert_eq!(
            err.to_string(),
            "InvalidConfig: worker_threads must be a number"
        );
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::new(ErrorKind::Internal)
            .with_message("outer")
            .with_source(Underlying);
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn parse_flag_error_converts_to_invalid_config() {
        let err: Error = ParseFlagError {
            name: "Turbo".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert_eq!(err.message(), Some("unknown runtime flag \"Turbo\""));
    }

    #[test]
    fn fiber_failure_reports_interruption() {
        let failure: FiberFailure<&str> = FiberFailure::new(Cause::interrupt(FiberId::NONE));
        assert!(failure.is_interrupted());

        let failure = FiberFailure::new(Cause::fail("boom"));
        assert!(!failure.is_interrupted());
        assert_eq!(failure.to_string(), "fiber failed: Fail(\"boom\")");
    }
}
