//! Errors for configuration and integration failures.

use crate::Float;

/// Errors from validation of configuration input.
#[derive(Debug, Clone)]
pub enum Error {
    RelTolMustBePositive(Float),
    AbsTolMustBeNonNegative(Float),
    AbsTolLengthMismatch { expected: usize, got: usize },
    SingularMatrix(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::RelTolMustBePositive(v) => {
                write!(f, "relative tolerance must be positive (got {})", v)
            }
            Error::AbsTolMustBeNonNegative(v) => {
                write!(f, "absolute tolerance must be non-negative (got {})", v)
            }
            Error::AbsTolLengthMismatch { expected, got } => write!(
                f,
                "absolute tolerance vector must have one entry per equation (expected {}, got {})",
                expected, got
            ),
            Error::SingularMatrix(k) => {
                write!(f, "matrix is singular (zero pivot in column {})", k)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Classification of a failed step or integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The Newton iteration diverged, hit its iteration cap, the linear
    /// solve met a singular matrix, or the new-step filter rejected the
    /// solution. Recovered locally by quartering the step.
    Convergence,
    /// Predictor/corrector disagreement exceeded the tolerance envelope.
    /// Recovered locally by halving the step.
    Truncation,
    /// The bounded Newton step was damped to (effectively) zero: the
    /// iterate sits on the feasibility boundary and the step points out
    /// of it. Handled like a convergence failure.
    BoundaryStall,
    /// A [`DaeSystem`](crate::DaeSystem) callback reported an error.
    /// Handled like a convergence failure for the step in progress.
    Caller,
    /// The global step-attempt budget was exhausted. Fatal.
    AttemptBudget,
    /// Too many consecutive step failures. Fatal.
    ConsecutiveFailures,
}

/// A failed integration: what went wrong, and where.
#[derive(Debug, Clone)]
pub struct Failure {
    pub kind: FailureKind,
    /// Last time reached in accepted state.
    pub time: Float,
    /// Step size of the failed attempt.
    pub delta_t: Float,
    /// Consecutive failures for [`FailureKind::ConsecutiveFailures`],
    /// total attempts for [`FailureKind::AttemptBudget`].
    pub count: usize,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self.kind {
            FailureKind::Convergence => "nonlinear solver failed to converge",
            FailureKind::Truncation => "truncation error too large",
            FailureKind::BoundaryStall => "Newton step stalled at the solution bounds",
            FailureKind::Caller => "system callback reported an error",
            FailureKind::AttemptBudget => "step attempt budget exhausted",
            FailureKind::ConsecutiveFailures => "too many consecutive step failures",
        };
        write!(
            f,
            "{} (t = {:.6e}, delta_t = {:.6e}, count = {})",
            what, self.time, self.delta_t, self.count
        )
    }
}

impl std::error::Error for Failure {}
