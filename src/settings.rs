//! Settings for the integrator.

use bon::Builder;
use std::ops::Index;

use crate::Float;

/// Time-stepping strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMethod {
    /// Adapt the step size from the truncation-error estimate.
    Variable,
    /// Keep the step size constant (failed steps still shrink it).
    Fixed,
}

/// How the iteration matrix is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianMethod {
    /// Column-by-column finite differences of the residual.
    Numerical,
    /// Caller-supplied [`DaeSystem::jacobian`](crate::DaeSystem::jacobian).
    Analytic,
}

/// Scalar or per-component absolute tolerance.
///
/// The [`From`] conversions let both a bare `f64` and a `Vec<f64>` (or
/// array) be passed wherever a tolerance is expected, so callers do not
/// need to name this type.
#[derive(Clone, Debug)]
pub enum Tolerance {
    Scalar(Float),
    Vector(Vec<Float>),
}

impl From<Float> for Tolerance {
    fn from(val: Float) -> Self {
        Tolerance::Scalar(val)
    }
}

impl From<&[Float]> for Tolerance {
    fn from(val: &[Float]) -> Self {
        Tolerance::Vector(val.to_vec())
    }
}

impl<const N: usize> From<[Float; N]> for Tolerance {
    fn from(val: [Float; N]) -> Self {
        Tolerance::Vector(val.to_vec())
    }
}

impl From<Vec<Float>> for Tolerance {
    fn from(val: Vec<Float>) -> Self {
        Tolerance::Vector(val)
    }
}

impl Index<usize> for Tolerance {
    type Output = Float;

    fn index(&self, index: usize) -> &Self::Output {
        match self {
            Tolerance::Scalar(v) => v,
            Tolerance::Vector(vs) => &vs[index],
        }
    }
}

/// Settings for the backward-Euler integrator.
///
/// Build one with `Settings::builder()` and hand it to
/// [`BackwardEuler::with_settings`](crate::BackwardEuler::with_settings),
/// or start from the defaults and use the integrator's setter methods.
#[derive(Builder, Clone, Debug)]
pub struct Settings {
    /// Relative tolerance.
    #[builder(default = 1.0e-4)]
    pub reltol: Float,
    /// Absolute tolerance, scalar or per component.
    #[builder(default = Tolerance::Scalar(1.0e-10))]
    pub abstol: Tolerance,
    /// Variable or fixed time stepping.
    #[builder(default = StepMethod::Variable)]
    pub method: StepMethod,
    /// Numerical or analytic Jacobian.
    #[builder(default = JacobianMethod::Numerical)]
    pub jacobian: JacobianMethod,
    /// Maximal step size. 0 disables the bound.
    #[builder(default = 0.0)]
    pub hmax: Float,
    /// Budget on the total number of step attempts.
    #[builder(default = 11_000_000)]
    pub max_attempts: usize,
    /// Step size proposed for the first step.
    #[builder(default = 1.0e-8)]
    pub initial_step: Float,
    /// Number of initial steps taken at the initial step size before the
    /// adaptive controller engages.
    #[builder(default = 0)]
    pub initial_constant_steps: usize,
    /// Minimum number of Newton iterations per nonlinear solve.
    #[builder(default = 0)]
    pub min_newt_its: usize,
    /// Hand the iteration matrix to the system's conditioning hook.
    #[builder(default = false)]
    pub matrix_conditioning: bool,
    /// Scale Jacobian columns by the system-supplied solution scales.
    #[builder(default = false)]
    pub col_scaling: bool,
    /// Scale Jacobian rows by their L1 norm before factoring.
    #[builder(default = true)]
    pub row_scaling: bool,
    /// Write the solution every this many accepted steps.
    #[builder(default = 1)]
    pub print_step_interval: usize,
    /// Write the solution at this many evenly spaced times up to tout.
    #[builder(default = 1)]
    pub print_number_to_tout: usize,
    /// Write the solution on each of the first few steps.
    #[builder(default = 0)]
    pub print_first_steps: usize,
    /// Dump each numerical Jacobian sweep to `NumJac.csv`.
    #[builder(default = false)]
    pub dump_jacobians: bool,
    /// Diagnostic verbosity, 0 (silent) to 5.
    #[builder(default = 3)]
    pub print_level: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::builder().build()
    }
}
