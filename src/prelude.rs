//! Convenient prelude: import the commonly used traits and types.
//!
//! Bring this into scope with:
//!
//! ```rust
//! use beuler::prelude::*;
//! ```

pub use crate::error::{Error, Failure, FailureKind};
pub use crate::matrix::SquareMatrix;
pub use crate::settings::{JacobianMethod, Settings, StepMethod, Tolerance};
pub use crate::solver::BackwardEuler;
pub use crate::stats::Stats;
pub use crate::status::Status;
pub use crate::system::{DaeSystem, EvalError, OutPhase, ResidMode, WriteKind};
