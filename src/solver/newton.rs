//! Damped Newton solution of the implicit corrector equations.

use log::debug;

use crate::norm::weighted_rms;
use crate::system::{DaeSystem, EvalError, ResidMode};
use crate::Float;

use super::{calc_ydot, BackwardEuler};

/// Shrink factor for the damping coefficient between line-search trials.
const DAMP_FACTOR: Float = 4.0;
/// Maximum number of damped trials per Newton iteration.
const NDAMP: usize = 10;
/// Maximum Newton iterations per nonlinear solve.
const MAX_NEWT_ITS: usize = 20;
/// Below this bounding factor the iterate is stuck on the boundary.
const FBOUND_MIN: Float = 1.0e-10;

/// Why a nonlinear solve failed.
#[derive(Debug)]
pub(crate) enum NewtonError {
    /// The bounded step was damped to nothing; the iterate sits on the
    /// feasibility boundary and the step points out of it.
    AtBounds,
    /// No damping coefficient produced a shrinking step.
    Diverged,
    /// Iteration cap exceeded.
    MaxIterations,
    /// The iteration matrix could not be factored.
    Singular,
    /// The system reported an error mid-solve.
    Caller(EvalError),
}

impl std::fmt::Display for NewtonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NewtonError::AtBounds => write!(f, "newton step stalled at the solution bounds"),
            NewtonError::Diverged => write!(f, "damped newton search failed to make progress"),
            NewtonError::MaxIterations => {
                write!(f, "newton iteration cap ({}) exceeded", MAX_NEWT_ITS)
            }
            NewtonError::Singular => write!(f, "iteration matrix is singular"),
            NewtonError::Caller(e) => write!(f, "{}", e),
        }
    }
}

impl From<EvalError> for NewtonError {
    fn from(e: EvalError) -> Self {
        NewtonError::Caller(e)
    }
}

/// Result of one damped line search.
enum DampOutcome {
    /// The damped step also satisfies the convergence test.
    Converged,
    /// Progress was made; take another Newton iteration.
    Proceed,
}

impl<'a, S: DaeSystem> BackwardEuler<'a, S> {
    /// Compute the undamped Newton step into `delta_y`.
    ///
    /// Evaluates the residual at (y, y'), applies the configured column
    /// and row scalings to the (unfactored) iteration matrix, and solves
    /// against the cached factorization when one is current. `delta_y`
    /// comes back in unscaled solution units.
    fn newton_step(
        &mut self,
        time_curr: Float,
        y: &[Float],
        ydot: &[Float],
        delta_y: &mut [Float],
    ) -> Result<(), NewtonError> {
        let n = self.n;
        self.sys
            .residual(time_curr, self.delta_t_n, y, ydot, delta_y, ResidMode::Base)?;
        self.stats.nfev += 1;
        for r in delta_y.iter_mut() {
            *r = -*r;
        }

        if self.settings.col_scaling && !self.jac.factored() {
            self.sys
                .soln_scales(time_curr, &self.y_n, &self.y_nm1, &mut self.col_scales);
            for j in 0..n {
                let s = self.col_scales[j];
                for v in self.jac.column_mut(j) {
                    *v *= s;
                }
            }
        }

        if self.settings.matrix_conditioning {
            let jac = if self.jac.factored() {
                None
            } else {
                Some(&mut self.jac)
            };
            self.sys.condition_matrix(jac, delta_y);
        }

        // Row-sum scaling keeps rows of disparate magnitude from
        // swamping the pivoting. The scales persist across the damped
        // trials that reuse the factorization, so the right-hand side is
        // rescaled on every solve.
        if self.settings.row_scaling {
            if !self.jac.factored() {
                for s in self.row_scales.iter_mut() {
                    *s = 0.0;
                }
                for j in 0..n {
                    let col = self.jac.column(j);
                    for i in 0..n {
                        self.row_scales[i] += col[i].abs();
                    }
                }
                for j in 0..n {
                    let col = self.jac.column_mut(j);
                    for i in 0..n {
                        col[i] /= self.row_scales[i];
                    }
                }
            }
            for i in 0..n {
                delta_y[i] /= self.row_scales[i];
            }
        }

        self.jac
            .solve(delta_y)
            .map_err(|_| NewtonError::Singular)?;

        if self.settings.col_scaling {
            for i in 0..n {
                delta_y[i] *= self.col_scales[i];
            }
        }

        self.stats.nsol += 1;
        Ok(())
    }

    /// Largest fraction of `step0` that keeps the iterate inside the
    /// solution bounds.
    ///
    /// Lower bounds: components that are non-negative may not be driven
    /// below -0.01 * ewt; a violating step is cut to pull 90% of the way
    /// to zero. Delta bounds: no component may grow by more than a
    /// factor of 2 or shrink by more than a factor of 5 in one iteration
    /// once the change exceeds its error weight; the Jacobian cannot be
    /// trusted across larger swings.
    fn bound_step(&self, y: &[Float], step0: &[Float]) -> Float {
        let mut f_lowbounds: Float = 1.0;
        let mut f_delta_bounds: Float = 1.0;
        let mut i_lower = usize::MAX;
        let mut i_delta = usize::MAX;

        for i in 0..self.n {
            let y_new = y[i] + step0[i];

            if y_new < -0.01 * self.ewt[i] && y[i] >= 0.0 {
                let ff = 0.9 * (y[i] / (y[i] - y_new));
                if ff < f_lowbounds {
                    f_lowbounds = ff;
                    i_lower = i;
                }
            }

            let mut ff: Float = 1.0;
            if y_new.abs() > 2.0 * y[i].abs() && (y_new - y[i]).abs() > self.ewt[i] {
                ff = (y[i] / (y_new - y[i])).abs();
                let ff_alt = (self.ewt[i] / (y_new - y[i])).abs();
                ff = ff.max(ff_alt);
            }
            if 5.0 * y_new.abs() < y[i].abs() && (y_new - y[i]).abs() > self.ewt[i] {
                ff = y[i] / (y_new - y[i]) * (1.0 - 5.0) / 5.0;
                let ff_alt = (self.ewt[i] / (y_new - y[i])).abs();
                ff = ff.max(ff_alt);
            }
            if ff < f_delta_bounds {
                f_delta_bounds = ff;
                i_delta = i;
            }
        }

        let fbound = f_lowbounds.min(f_delta_bounds);
        if fbound != 1.0 && self.settings.print_level > 2 {
            if f_lowbounds < f_delta_bounds {
                debug!(
                    "\t\tbound_step: variable {} hit its lower bound, damping = {:.4e}",
                    i_lower, f_lowbounds
                );
            } else {
                debug!(
                    "\t\tbound_step: variable {} hit its delta bound, damping = {:.4e}",
                    i_delta, f_delta_bounds
                );
            }
        }
        fbound
    }

    /// Damped line search along the Newton direction `step0` from `y0`.
    ///
    /// Each trial steps by `fbound * damp * step0`, rebuilds the
    /// consistent derivative, and recomputes the undamped step at the
    /// trial point with the frozen factorization. A damping coefficient
    /// is accepted as soon as the trial step is no larger than the
    /// current one (the Newton sequence is contracting) or is already
    /// negligible. On acceptance `y1`/`ydot1` hold the damped iterate
    /// and `step1` the step evaluated there.
    #[allow(clippy::too_many_arguments)]
    fn damp_step(
        &mut self,
        time_curr: Float,
        y0: &[Float],
        step0: &[Float],
        y1: &mut [Float],
        ydot1: &mut [Float],
        step1: &mut [Float],
    ) -> Result<DampOutcome, NewtonError> {
        let s0 = weighted_rms(step0, &self.ewt);

        let fbound = self.bound_step(y0, step0);
        // A vanishing bound means y0 is already pinned to the boundary
        // and the step points out of the feasible region.
        if fbound < FBOUND_MIN {
            if self.settings.print_level > 1 {
                debug!("\t\tdamp_step: at limits, fbound = {:.4e}", fbound);
            }
            return Err(NewtonError::AtBounds);
        }

        let mut damp: Float = 1.0;
        let mut s1: Float = 0.0;
        for m in 0..NDAMP {
            let ff = fbound * damp;

            for j in 0..self.n {
                y1[j] = y0[j] + ff * step0[j];
            }
            calc_ydot(
                self.order,
                self.delta_t_n,
                y1,
                &self.y_nm1,
                &self.ydot_nm1,
                ydot1,
            );

            // Next undamped step at the trial point, reusing the current
            // factorization.
            self.newton_step(time_curr, y1, ydot1, step1)?;
            s1 = weighted_rms(step1, &self.ewt);

            if self.settings.print_level > 2 {
                debug!(
                    "\t\tdamp_step: s0 = {:.4e}, s1 = {:.4e}, fbound = {:.4e}, damp = {:.4e}",
                    s0, s1, fbound, damp
                );
            }

            if s1 < 1.0e-5 || s1 < s0 {
                return Ok(if s1 > 1.0 {
                    DampOutcome::Proceed
                } else {
                    DampOutcome::Converged
                });
            }

            if self.settings.print_level > 2 {
                let again = m + 1 < NDAMP;
                debug!(
                    "\t\tdamp_step: trial rejected (s1 = {:.4e} > s0 = {:.4e}){}",
                    s1,
                    s0,
                    if again { ", retrying" } else { ", giving up" }
                );
            }
            self.stats.nbktrk += 1;
            damp /= DAMP_FACTOR;
        }

        // Damping exhausted; salvage what the final trial earned.
        if s1 < 0.5 && s0 < 0.5 {
            return Ok(DampOutcome::Converged);
        }
        if s1 < 1.0 {
            return Ok(DampOutcome::Proceed);
        }
        Err(NewtonError::Diverged)
    }

    /// Solve F(y, y') = 0 at `time_curr` by damped Newton iteration.
    ///
    /// On entry `y_n`/`ydot_n` hold the predicted initial guess; on
    /// success they hold the converged solution and its consistent
    /// derivative.
    pub(crate) fn solve_nonlinear(&mut self, time_curr: Float, cj: Float) -> Result<(), NewtonError> {
        let n = self.n;
        let mut y_curr = self.y_n.clone();
        let mut ydot_curr = self.ydot_n.clone();
        let mut stp = vec![0.0; n];
        let mut stp1 = vec![0.0; n];
        let mut y_new = vec![0.0; n];
        let mut ydot_new = vec![0.0; n];

        let mut num_newt_its = 0usize;
        loop {
            self.stats.nnewt += 1;
            num_newt_its += 1;
            if self.settings.print_level > 1 {
                debug!("\t\tnewton iteration {}", num_newt_its);
            }

            // Fresh Jacobian every iteration; only the damped trials
            // below reuse its factorization.
            self.build_jacobian(time_curr, cj, &mut y_curr, &mut ydot_curr)?;
            if self.settings.print_level > 3 {
                self.log_resid_wts();
            }

            self.newton_step(time_curr, &y_curr, &ydot_curr, &mut stp)?;

            let outcome = self.damp_step(
                time_curr,
                &y_curr,
                &stp,
                &mut y_new,
                &mut ydot_new,
                &mut stp1,
            )?;

            // A converged damped step only counts once the minimum
            // iteration requirement is met.
            let converged = matches!(outcome, DampOutcome::Converged)
                && num_newt_its >= self.settings.min_newt_its;

            if num_newt_its > MAX_NEWT_ITS {
                return Err(NewtonError::MaxIterations);
            }

            y_curr.copy_from_slice(&y_new);
            calc_ydot(
                self.order,
                self.delta_t_n,
                &y_curr,
                &self.y_nm1,
                &self.ydot_nm1,
                &mut ydot_curr,
            );

            if converged {
                break;
            }
        }

        self.y_n.copy_from_slice(&y_curr);
        self.ydot_n.copy_from_slice(&ydot_curr);
        if self.settings.print_level > 1 {
            debug!(
                "\t\tnonlinear problem solved in {} iterations",
                num_newt_its
            );
        }
        Ok(())
    }

    /// Residual weights: for each equation, the largest Jacobian entry
    /// in its row scaled by the matching error weight. A small weight
    /// flags an equation whose solution is very sensitive to it.
    fn compute_resid_wts(&mut self) {
        for w in self.resid_wts.iter_mut() {
            *w = 0.0;
        }
        for j in 0..self.n {
            let col = self.jac.column(j);
            let ewt_j = self.ewt[j];
            for i in 0..self.n {
                let value = (col[i] * ewt_j).abs();
                if value > self.resid_wts[i] {
                    self.resid_wts[i] = value;
                }
            }
        }
    }

    fn log_resid_wts(&mut self) {
        self.compute_resid_wts();
        let mut min_w = Float::INFINITY;
        let mut max_w: Float = 0.0;
        for &w in &self.resid_wts {
            min_w = min_w.min(w);
            max_w = max_w.max(w);
        }
        log::trace!(
            "\t\tresidual weights: min = {:.4e}, max = {:.4e}",
            min_w,
            max_w
        );
    }
}
