//! Cumulative work and failure counters.

/// Counters accumulated over the lifetime of an integrator instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    /// Residual evaluations.
    pub nfev: usize,
    /// Jacobian evaluations (analytic calls or finite-difference sweeps).
    pub njev: usize,
    /// Newton iterations.
    pub nnewt: usize,
    /// Linear system solves.
    pub nsol: usize,
    /// Backtracks taken by the damped line search.
    pub nbktrk: usize,
    /// Convergence failures (including bound stalls and caller errors).
    pub nconv: usize,
    /// Truncation-error failures.
    pub ntrunc: usize,
    /// Step attempts, successful or not.
    pub nattempt: usize,
    /// Accepted steps.
    pub nstep: usize,
}
