//! Terminal results of fibers.

use super::cause::Cause;
use super::id::FiberId;
use core::fmt;
use std::convert::Infallible;

/// How a fiber terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit<A, E = Infallible> {
    /// The fiber produced a value.
    Success(A),
    /// The fiber failed, died, or was interrupted.
    Failure(Cause<E>),
}

/// The type-erased exit seen by observers and supervisors.
pub type ErasedExit = Exit<(), ()>;

impl<A, E> Exit<A, E> {
    /// A successful exit.
    #[must_use]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// A typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// A defect.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::Failure(Cause::die(message))
    }

    /// An interruption by `fiber_id`.
    #[must_use]
    pub const fn interrupt(fiber_id: FiberId) -> Self {
        Self::Failure(Cause::Interrupt(fiber_id))
    }

    /// Returns true for a successful exit.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true for a failed exit.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if the fiber was interrupted.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Success(_) => false,
            Self::Failure(cause) => cause.is_interrupted(),
        }
    }

    /// Returns the failure cause, if any.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) => Some(cause),
        }
    }

    /// Maps the success value.
    pub fn map<B, F: FnOnce(A) -> B>(self, f: F) -> Exit<B, E> {
        match self {
            Self::Success(a) => Exit::Success(f(a)),
            Self::Failure(cause) => Exit::Failure(cause),
        }
    }

    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(a) => Ok(a),
            Self::Failure(cause) => Err(cause),
        }
    }

    /// The type-erased view of this exit.
    #[must_use]
    pub fn erase(&self) -> ErasedExit {
        match self {
            Self::Success(_) => Exit::Success(()),
            Self::Failure(cause) => Exit::Failure(cause.erase()),
        }
    }

    /// A short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(cause) if cause.is_die() => "die",
            Self::Failure(cause) if cause.is_failure() => "failure",
            Self::Failure(cause) if cause.is_interrupted() => "interrupted",
            Self::Failure(_) => "empty",
        }
    }
}

impl<A, E> From<Result<A, E>> for Exit<A, E> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(a) => Self::Success(a),
            Err(e) => Self::fail(e),
        }
    }
}

impl<A: fmt::Debug, E: fmt::Debug> fmt::Display for Exit<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(a) => write!(f, "Success({a:?})"),
            Self::Failure(cause) => write!(f, "Failure({cause})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_result() {
        let ok: Exit<i32, &str> = Ok(1).into();
        assert!(ok.is_success());
        let err: Exit<i32, &str> = Err("bad").into();
        assert_eq!(err.cause(), Some(&Cause::fail("bad")));
        assert_eq!(err.label(), "failure");
    }

    #[test]
    fn labels_prioritise_defects() {
        let exit: Exit<(), &str> =
            Exit::Failure(Cause::interrupt(FiberId::NONE).then(Cause::die("cleanup")));
        assert_eq!(exit.label(), "die");
        assert!(exit.is_interrupted());
        let exit: Exit<(), &str> = Exit::interrupt(FiberId::NONE);
        assert_eq!(exit.label(), "interrupted");
    }

    #[test]
    fn erase_keeps_shape() {
        let exit: Exit<String, u8> = Exit::Failure(Cause::fail(3).both(Cause::die("x")));
        assert_eq!(
            exit.erase(),
            Exit::Failure(Cause::Parallel(
                Box::new(Cause::Fail(())),
                Box::new(Cause::die("x"))
            ))
        );
        assert_eq!(Exit::<_, u8>::succeed("v".to_string()).erase(), Exit::Success(()));
    }
}
