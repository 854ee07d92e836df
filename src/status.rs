//! Status codes for the integrator.

/// How the last integration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Reached the requested output time.
    Success,
    /// The caller's stopping criterion fired.
    Interrupted,
    /// The step-attempt budget ran out.
    AttemptLimit,
    /// Gave up after repeated step failures.
    Failed,
}
