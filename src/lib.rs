//! beuler: implicit backward-Euler integration for stiff systems of
//! first-order differential and semi-explicit differential-algebraic
//! equations in the implicit form F(t, y, y') = 0.
//!
//! The integrator advances the solution with a predictor/corrector pair:
//! an explicit predictor supplies the initial guess for the new state and
//! a damped Newton iteration closes the implicit backward-Euler residual
//! to within a weighted tolerance. The difference between predictor and
//! corrector drives adaptive step-size control, and a damped line search
//! with bounds enforcement keeps the Newton iteration from leaving the
//! physical region.
//!
//! Highlights
//! - Implicit residual form: systems are posed as F(t, y, y') = 0, so
//!   semi-explicit DAEs need no special casing
//! - Variable or fixed step, scalar or per-component absolute tolerance
//! - Numerical (finite-difference) or caller-supplied analytic Jacobian
//! - Row and column scaling of the iteration matrix
//! - Diagnostics through the `log` facade, from one-line step summaries
//!   to Newton-internals tracing
//!
//! Quick start
//! ```rust,no_run
//! use beuler::prelude::*;
//!
//! /// y' = -10 y, posed as F = y' + 10 y.
//! struct Decay;
//!
//! impl DaeSystem for Decay {
//!     fn n_equations(&self) -> usize {
//!         1
//!     }
//!
//!     fn initial_conditions(&mut self, _t0: f64, y: &mut [f64], ydot: &mut [f64]) {
//!         y[0] = 1.0;
//!         ydot[0] = -10.0;
//!     }
//!
//!     fn residual(
//!         &mut self,
//!         _t: f64,
//!         _delta_t: f64,
//!         y: &[f64],
//!         ydot: &[f64],
//!         resid: &mut [f64],
//!         _mode: ResidMode,
//!     ) -> Result<(), EvalError> {
//!         resid[0] = ydot[0] + 10.0 * y[0];
//!         Ok(())
//!     }
//! }
//!
//! fn main() {
//!     let mut sys = Decay;
//!     let mut solver = BackwardEuler::new(0.0, &mut sys);
//!     solver.set_tolerances(1.0e-6, 1.0e-10).unwrap();
//!     let t = solver.integrate(1.0, 0.0).unwrap();
//!     println!("t = {}, y = {:?}", t, solver.solution());
//! }
//! ```
//!
//! See the demos folder for a stiff Van der Pol run with logging enabled.

mod error;
mod matrix;
mod norm;
mod settings;
mod solver;
mod stats;
mod status;
mod system;

pub mod prelude;

pub use error::{Error, Failure, FailureKind};
pub use matrix::SquareMatrix;
pub use settings::{JacobianMethod, Settings, StepMethod, Tolerance};
pub use solver::BackwardEuler;
pub use stats::Stats;
pub use status::Status;
pub use system::{DaeSystem, EvalError, OutPhase, ResidMode, WriteKind};

/// Scalar type used throughout the crate.
pub(crate) type Float = f64;
