//! User-supplied DAE system in the implicit form F(t, y, y') = 0.

use crate::matrix::SquareMatrix;
use crate::Float;

/// Context of a residual evaluation.
///
/// `Base` marks an ordinary evaluation. `JacBase` and `JacDelta` mark
/// evaluations issued during a finite-difference Jacobian sweep, so that
/// caller-side caches of per-column sensitivities can be reused:
/// `JacBase` is the unperturbed base point of the sweep, and
/// `JacDelta { col, delta }` is the evaluation with solution component
/// `col` perturbed by `delta`. Columns are swept in order and each
/// perturbation is undone before the next column is touched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResidMode {
    Base,
    JacBase,
    JacDelta { col: usize, delta: Float },
}

/// Distinguishes the solution write at the initial time from writes after
/// accepted steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Initial,
    Accepted,
}

/// Phase tag for the general-purpose [`DaeSystem::user_out`] hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutPhase {
    Init,
    Success,
    Failure,
    Final,
}

/// Error reported by a [`DaeSystem`] callback.
///
/// Any callback failure aborts the step in progress; the integrator
/// treats it like a convergence failure, shrinks the step, and retries.
#[derive(Debug, Clone)]
pub struct EvalError {
    msg: String,
}

impl EvalError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "system evaluation failed: {}", self.msg)
    }
}

impl std::error::Error for EvalError {}

/// User-supplied residual/Jacobian provider.
///
/// Implement this trait for your problem. The only required methods are
/// [`n_equations`](DaeSystem::n_equations),
/// [`initial_conditions`](DaeSystem::initial_conditions), and
/// [`residual`](DaeSystem::residual); everything else has an inert
/// default. The integrator borrows the system for the duration of the
/// integration and calls back into it from the same thread.
///
/// # Example
///
/// ```ignore
/// struct VanDerPol { mu: f64 }
/// impl DaeSystem for VanDerPol {
///     fn n_equations(&self) -> usize { 2 }
///     fn initial_conditions(&mut self, _t0: f64, y: &mut [f64], ydot: &mut [f64]) {
///         y.copy_from_slice(&[2.0, 0.0]);
///         ydot.copy_from_slice(&[0.0, -2.0]);
///     }
///     fn residual(&mut self, _t: f64, _dt: f64, y: &[f64], ydot: &[f64],
///                 r: &mut [f64], _mode: ResidMode) -> Result<(), EvalError> {
///         r[0] = ydot[0] - y[1];
///         r[1] = ydot[1] - self.mu * (1.0 - y[0] * y[0]) * y[1] + y[0];
///         Ok(())
///     }
/// }
/// ```
pub trait DaeSystem {
    /// Number of equations (and solution components) in the system.
    fn n_equations(&self) -> usize;

    /// Fill `y` and `ydot` with the state and its time derivative at `t0`.
    fn initial_conditions(&mut self, t0: Float, y: &mut [Float], ydot: &mut [Float]);

    /// Evaluate the residual r = F(t, y, y') into `resid`.
    ///
    /// `delta_t` is the size of the step in progress (0 before the first
    /// step). `mode` tells the caller whether this evaluation is part of
    /// a numerical-Jacobian sweep; see [`ResidMode`].
    fn residual(
        &mut self,
        t: Float,
        delta_t: Float,
        y: &[Float],
        ydot: &[Float],
        resid: &mut [Float],
        mode: ResidMode,
    ) -> Result<(), EvalError>;

    /// Supply the analytic iteration matrix J = dF/dy + cj * dF/dy' and
    /// the residual at (y, y').
    ///
    /// Only called when the integrator is configured with
    /// [`JacobianMethod::Analytic`](crate::JacobianMethod). `cj` is the
    /// derivative of y' with respect to y under the backward-difference
    /// reconstruction (1/delta_t at first order).
    fn jacobian(
        &mut self,
        _t: Float,
        _delta_t: Float,
        _cj: Float,
        _y: &[Float],
        _ydot: &[Float],
        _jac: &mut SquareMatrix,
        _resid: &mut [Float],
    ) -> Result<(), EvalError> {
        Err(EvalError::new("analytic Jacobian not implemented"))
    }

    /// Choose per-component perturbations for the finite-difference
    /// Jacobian. The default mixes the error weights with the solution
    /// magnitude; override when the problem knows better scalings.
    fn jacobian_perturbations(
        &mut self,
        _t: Float,
        y: &[Float],
        _y_prev: &[Float],
        delta_y: &mut [Float],
        ewt: &[Float],
    ) {
        for i in 0..y.len() {
            delta_y[i] = (1.0e-6 * ewt[i]).max(1.0e-7 * y[i].abs());
        }
    }

    /// Project the predicted solution in place, e.g. to enforce
    /// positivity, before it seeds the Newton iteration.
    fn filter_prediction(&mut self, _t: Float, _y_pred: &mut [Float]) {}

    /// Adjust a freshly converged solution in place and return a
    /// non-negative norm of the adjustment: 0 means untouched, values in
    /// (0, 1] are logged, and values above 1 reject the step.
    fn filter_new_step(&mut self, _t: Float, _y: &mut [Float], _ydot: &mut [Float]) -> Float {
        0.0
    }

    /// Return true to stop the integration after the current step.
    fn stopping_criterion(
        &mut self,
        _t: Float,
        _delta_t: Float,
        _y: &[Float],
        _ydot: &[Float],
    ) -> bool {
        false
    }

    /// Supply the column-scaling vector for the iteration matrix. Only
    /// called when column scaling is enabled.
    fn soln_scales(&mut self, _t: Float, _y: &[Float], _y_prev: &[Float], scales: &mut [Float]) {
        for s in scales.iter_mut() {
            *s = 1.0;
        }
    }

    /// Precondition the iteration matrix and right-hand side. Only called
    /// when matrix conditioning is enabled; `jac` is `None` when the
    /// matrix is already factored and only the right-hand side may be
    /// touched.
    fn condition_matrix(&mut self, _jac: Option<&mut SquareMatrix>, _rhs: &mut [Float]) {}

    /// Evaluate time-integrated bookkeeping quantities. Called once after
    /// initialization and after every accepted step.
    fn eval_time_tracking(&mut self, _t: Float, _delta_t: Float, _y: &[Float], _ydot: &[Float]) {}

    /// Write the solution at an output point.
    fn write_solution(
        &mut self,
        _kind: WriteKind,
        _t: Float,
        _delta_t: Float,
        _step_no: usize,
        _y: &[Float],
        _ydot: &[Float],
    ) {
    }

    /// General-purpose output hook called at initialization, after every
    /// step (successful or not), and once at the end of the integration.
    fn user_out(&mut self, _phase: OutPhase, _t: Float, _delta_t: Float, _y: &[Float], _ydot: &[Float]) {
    }
}
