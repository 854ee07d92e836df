//! The backward-Euler driver: predictor, step-size control, and the
//! outer time loop.

mod jacobian;
mod newton;

use log::{debug, info, warn};

use crate::error::{Error, Failure, FailureKind};
use crate::matrix::SquareMatrix;
use crate::settings::{JacobianMethod, Settings, StepMethod, Tolerance};
use crate::stats::Stats;
use crate::status::Status;
use crate::system::{DaeSystem, OutPhase, WriteKind};
use crate::Float;

/// Give up on a step after this many consecutive failed attempts.
const MAX_CONSECUTIVE_FAILURES: usize = 35;

/// Hard ceiling on the step size when no user maximum is set.
const DELTA_T_MAX: Float = 1.0e300;

/// Variable-step backward-Euler integrator with damped Newton correction.
///
/// One instance owns the full integration state: solution history, error
/// weights, scratch vectors, and the iteration matrix with its cached
/// factorization. The system is borrowed for the lifetime of the
/// integrator and called back into synchronously.
///
/// Typical use: construct with [`new`](BackwardEuler::new) (or
/// [`with_settings`](BackwardEuler::with_settings)), adjust options with
/// the setter methods, then call [`integrate`](BackwardEuler::integrate);
/// or drive the loop manually with [`step`](BackwardEuler::step).
pub struct BackwardEuler<'a, S: DaeSystem> {
    pub(crate) sys: &'a mut S,
    pub(crate) settings: Settings,
    pub(crate) n: usize,
    t0: Float,
    time_final: Float,

    // Solution history.
    pub(crate) y_n: Vec<Float>,
    pub(crate) y_nm1: Vec<Float>,
    pub(crate) y_pred_n: Vec<Float>,
    pub(crate) ydot_n: Vec<Float>,
    pub(crate) ydot_nm1: Vec<Float>,

    // Scratch.
    pub(crate) resid: Vec<Float>,
    pub(crate) resid_wts: Vec<Float>,
    pub(crate) wksp: Vec<Float>,
    pub(crate) ewt: Vec<Float>,
    pub(crate) row_scales: Vec<Float>,
    pub(crate) col_scales: Vec<Float>,

    pub(crate) jac: SquareMatrix,

    // Time history. delta_t_np1 is the proposed size of the next step.
    time_n: Float,
    time_nm1: Float,
    time_nm2: Float,
    pub(crate) delta_t_n: Float,
    delta_t_nm1: Float,
    delta_t_nm2: Float,
    delta_t_np1: Float,
    delta_t_max: Float,

    pub(crate) order: usize,
    failure_counter: usize,
    step_num: usize,
    status: Status,
    pub(crate) stats: Stats,
}

impl<'a, S: DaeSystem> BackwardEuler<'a, S> {
    /// Create an integrator with default settings, query the system for
    /// its size and initial conditions, and allocate all buffers.
    pub fn new(t0: Float, sys: &'a mut S) -> Self {
        Self::with_settings(t0, sys, Settings::default())
    }

    /// Like [`new`](BackwardEuler::new), with explicit settings.
    pub fn with_settings(t0: Float, sys: &'a mut S, settings: Settings) -> Self {
        let n = sys.n_equations();
        let mut solver = Self {
            sys,
            n,
            t0,
            time_final: t0,
            y_n: Vec::new(),
            y_nm1: Vec::new(),
            y_pred_n: Vec::new(),
            ydot_n: Vec::new(),
            ydot_nm1: Vec::new(),
            resid: Vec::new(),
            resid_wts: Vec::new(),
            wksp: Vec::new(),
            ewt: Vec::new(),
            row_scales: Vec::new(),
            col_scales: Vec::new(),
            jac: SquareMatrix::zeros(0),
            time_n: t0,
            time_nm1: t0,
            time_nm2: t0,
            delta_t_n: 0.0,
            delta_t_nm1: 0.0,
            delta_t_nm2: 0.0,
            delta_t_np1: settings.initial_step,
            delta_t_max: DELTA_T_MAX,
            order: 1,
            failure_counter: 0,
            step_num: 0,
            status: Status::Success,
            stats: Stats::default(),
            settings,
        };
        solver.internal_alloc();
        solver.sys.initial_conditions(t0, &mut solver.y_n, &mut solver.ydot_n);
        solver
    }

    /// Re-initialize for a fresh integration of `sys` from `t0`. Buffers
    /// are re-sized, the state and time history are reset; the cumulative
    /// counters in [`stats`](BackwardEuler::stats) are kept.
    pub fn reinit(&mut self, t0: Float, sys: &'a mut S) {
        self.sys = sys;
        self.n = self.sys.n_equations();
        self.t0 = t0;
        self.internal_alloc();
        self.sys.initial_conditions(t0, &mut self.y_n, &mut self.ydot_n);
        self.time_n = t0;
        self.time_nm1 = t0;
        self.time_nm2 = t0;
        self.delta_t_n = 0.0;
        self.delta_t_nm1 = 0.0;
        self.delta_t_nm2 = 0.0;
        self.delta_t_np1 = self.settings.initial_step;
        self.failure_counter = 0;
        self.step_num = 0;
        self.status = Status::Success;
        self.set_soln_weights();
    }

    fn internal_alloc(&mut self) {
        let n = self.n;
        self.y_n = vec![0.0; n];
        self.y_nm1 = vec![0.0; n];
        self.y_pred_n = vec![0.0; n];
        self.ydot_n = vec![0.0; n];
        self.ydot_nm1 = vec![0.0; n];
        self.resid = vec![0.0; n];
        self.resid_wts = vec![0.0; n];
        self.wksp = vec![0.0; n];
        self.ewt = vec![0.0; n];
        self.row_scales = vec![1.0; n];
        self.col_scales = vec![1.0; n];
        self.jac = SquareMatrix::zeros(n);
    }

    // ---- configuration -------------------------------------------------

    /// Set the relative tolerance and the absolute tolerance, which may
    /// be a scalar or a per-component vector.
    pub fn set_tolerances(&mut self, reltol: Float, abstol: impl Into<Tolerance>) -> Result<(), Error> {
        if reltol <= 0.0 {
            return Err(Error::RelTolMustBePositive(reltol));
        }
        let abstol = abstol.into();
        match &abstol {
            Tolerance::Scalar(a) => {
                if *a < 0.0 {
                    return Err(Error::AbsTolMustBeNonNegative(*a));
                }
            }
            Tolerance::Vector(v) => {
                if v.len() != self.n {
                    return Err(Error::AbsTolLengthMismatch {
                        expected: self.n,
                        got: v.len(),
                    });
                }
                if let Some(&a) = v.iter().find(|&&a| a < 0.0) {
                    return Err(Error::AbsTolMustBeNonNegative(a));
                }
            }
        }
        self.settings.reltol = reltol;
        self.settings.abstol = abstol;
        Ok(())
    }

    /// Choose variable or fixed time stepping.
    pub fn set_method(&mut self, method: StepMethod) {
        self.settings.method = method;
    }

    /// Choose how the iteration matrix is formed.
    pub fn set_jacobian_method(&mut self, jacobian: JacobianMethod) {
        self.settings.jacobian = jacobian;
    }

    /// Bound the step size from above. 0 disables the bound.
    pub fn set_max_step(&mut self, hmax: Float) {
        self.settings.hmax = hmax;
    }

    /// Budget on the total number of step attempts.
    pub fn set_max_attempts(&mut self, max_attempts: usize) {
        self.settings.max_attempts = max_attempts;
    }

    /// Step size to propose for the next (usually the first) step.
    pub fn set_initial_step(&mut self, delta_t: Float) {
        self.settings.initial_step = delta_t;
        self.delta_t_np1 = delta_t;
    }

    /// Hold the step size constant for the first `num` steps.
    pub fn set_initial_constant_steps(&mut self, num: usize) {
        self.settings.initial_constant_steps = num;
    }

    /// Options for the nonlinear solve: minimum Newton iterations per
    /// solve, matrix conditioning, column scaling, row scaling.
    pub fn set_nonlinear_options(
        &mut self,
        min_newt_its: usize,
        matrix_conditioning: bool,
        col_scaling: bool,
        row_scaling: bool,
    ) {
        self.settings.min_newt_its = min_newt_its;
        self.settings.matrix_conditioning = matrix_conditioning;
        self.settings.col_scaling = col_scaling;
        self.settings.row_scaling = row_scaling;
    }

    /// Solution output cadence; see the corresponding [`Settings`] fields.
    pub fn set_print_options(
        &mut self,
        step_interval: usize,
        number_to_tout: usize,
        first_steps: usize,
        dump_jacobians: bool,
    ) {
        self.settings.print_step_interval = step_interval;
        self.settings.print_number_to_tout = number_to_tout;
        self.settings.print_first_steps = first_steps;
        self.settings.dump_jacobians = dump_jacobians;
    }

    /// Diagnostic verbosity, clamped to 0..=5.
    pub fn set_print_level(&mut self, level: u8) {
        self.settings.print_level = level.min(5);
    }

    // ---- accessors -----------------------------------------------------

    /// Current accepted solution.
    pub fn solution(&self) -> &[Float] {
        &self.y_n
    }

    /// Current accepted time derivative.
    pub fn derivative(&self) -> &[Float] {
        &self.ydot_n
    }

    /// Current time.
    pub fn time(&self) -> Float {
        self.time_n
    }

    /// Size of the last executed step.
    pub fn step_size(&self) -> Float {
        self.delta_t_n
    }

    /// How the last integration ended.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Cumulative work counters.
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Total number of residual evaluations.
    pub fn n_evals(&self) -> usize {
        self.stats.nfev
    }

    // ---- weights and predictor ----------------------------------------

    /// Refresh the error weights from the current and predicted solution.
    fn set_soln_weights(&mut self) {
        for i in 0..self.n {
            self.ewt[i] = self.settings.abstol[i]
                + self.settings.reltol * 0.5 * (self.y_n[i].abs() + self.y_pred_n[i].abs());
        }
    }

    fn calc_y_pred(&mut self) {
        predict(
            self.order,
            self.delta_t_n,
            self.delta_t_nm1,
            &self.y_n,
            &self.ydot_n,
            &self.ydot_nm1,
            &mut self.y_pred_n,
        );
        self.sys.filter_prediction(self.time_n, &mut self.y_pred_n);
    }

    /// Weighted norm of the predictor/corrector difference, the
    /// truncation-error estimate for the step just solved.
    fn time_error_norm(&self) -> Float {
        let mut sum = 0.0;
        let mut worst = 0usize;
        let mut worst_err: Float = -1.0;
        for i in 0..self.n {
            let e = (self.y_n[i] - self.y_pred_n[i]) / self.ewt[i];
            sum += e * e;
            if e.abs() > worst_err {
                worst_err = e.abs();
                worst = i;
            }
        }
        let norm = (sum / self.n as Float).sqrt();
        if self.settings.print_level > 2 {
            debug!(
                "\ttruncation error norm = {:.4e}, worst component {} (|err| = {:.4e})",
                norm, worst, worst_err
            );
        }
        norm
    }

    // ---- stepping ------------------------------------------------------

    /// Advance one step toward `t_max`, retrying internally on failures.
    ///
    /// Returns the time reached on success. On final failure the return
    /// is sign-encoded for callers driving the loop themselves: exactly
    /// −1234.0 for a failure at t = 0, otherwise the negative of the
    /// failure time. [`integrate`](BackwardEuler::integrate) reports the
    /// same condition as a structured [`Failure`].
    pub fn step(&mut self, t_max: Float) -> Float {
        match self.try_step(t_max) {
            Ok(t) => t,
            Err(_) => {
                if self.time_n == 0.0 {
                    -1234.0
                } else {
                    -self.time_n
                }
            }
        }
    }

    fn try_step(&mut self, t_max: Float) -> Result<Float, Failure> {
        self.step_num += 1;
        let mut step_failed = false;
        let mut num_failures = 0usize;

        loop {
            self.stats.nattempt += 1;
            let mut comment = "";

            // Exact pre-step state; restored verbatim if the attempt is
            // rejected so a rejection leaves no arithmetic residue.
            let snap = (
                self.time_n,
                self.time_nm1,
                self.time_nm2,
                self.delta_t_n,
                self.delta_t_nm1,
                self.delta_t_nm2,
            );

            // Clamp the proposed step to the remaining interval and to
            // the step-size bounds.
            if self.time_n + self.delta_t_np1 >= t_max {
                self.delta_t_np1 = t_max - self.time_n;
            }
            if self.delta_t_np1 >= self.delta_t_max {
                self.delta_t_np1 = self.delta_t_max;
            }
            if self.settings.hmax > 0.0 && self.delta_t_np1 > self.settings.hmax {
                self.delta_t_np1 = self.settings.hmax;
            }

            // Shift the step history and advance the tentative time.
            self.delta_t_nm2 = self.delta_t_nm1;
            self.delta_t_nm1 = self.delta_t_n;
            self.delta_t_n = self.delta_t_np1;
            self.time_n += self.delta_t_n;

            // The first two steps and every retry after a failure run at
            // first order; second order is reserved.
            self.order = 1;

            if self.settings.print_level > 1 {
                self.log_step_start(step_failed);
            }

            // Predict, then shift the state history and seed the
            // corrector with the prediction.
            self.calc_y_pred();
            self.y_nm1.copy_from_slice(&self.y_n);
            self.y_n.copy_from_slice(&self.y_pred_n);
            self.ydot_nm1.copy_from_slice(&self.ydot_n);
            calc_ydot(
                self.order,
                self.delta_t_n,
                &self.y_n,
                &self.y_nm1,
                &self.ydot_nm1,
                &mut self.ydot_n,
            );

            let cj = if self.order < 2 {
                1.0 / self.delta_t_n
            } else {
                2.0 / self.delta_t_n
            };
            self.set_soln_weights();

            let nnewt_before = self.stats.nnewt;
            let nbktrk_before = self.stats.nbktrk;
            let solve = self.solve_nonlinear(self.time_n, cj);
            let num_newt_its = self.stats.nnewt - nnewt_before;
            let bktr_stps = self.stats.nbktrk - nbktrk_before;

            let mut rslt = "done";
            let mut norm_filter = 0.0;
            match solve {
                Err(err) => {
                    step_failed = true;
                    rslt = "fail";
                    self.stats.nconv += 1;
                    self.failure_counter += 3;
                    if self.settings.print_level > 1 {
                        debug!("\tstep rejected, nonlinear solve failed: {}", err);
                    }
                }
                Ok(()) => {
                    step_failed = false;
                    norm_filter =
                        self.sys
                            .filter_new_step(self.time_n, &mut self.y_n, &mut self.ydot_n);
                    if norm_filter > 1.0 {
                        step_failed = true;
                        rslt = "filt";
                        self.stats.nconv += 1;
                        self.failure_counter += 3;
                        if self.settings.print_level > 1 {
                            debug!(
                                "\tstep rejected, filter adjustment too large: {:.4e}",
                                norm_filter
                            );
                        }
                    } else if norm_filter > 0.0 && self.settings.print_level > 1 {
                        debug!("\tstep was filtered, norm = {:.4e}", norm_filter);
                    }
                }
            }
            let conv_failure = step_failed;

            let time_error_factor = if step_failed {
                1000.0
            } else {
                self.time_error_norm()
            };

            if step_failed {
                // Convergence failures quarter the step.
                self.delta_t_np1 = 0.25 * self.delta_t_n;
            } else if self.settings.method == StepMethod::Variable {
                if self.step_num > self.settings.initial_constant_steps {
                    self.delta_t_np1 = step_size_control(
                        self.order,
                        self.delta_t_n,
                        self.delta_t_nm1,
                        time_error_factor,
                    );
                    if norm_filter > 0.1 && self.delta_t_np1 > self.delta_t_n {
                        self.delta_t_np1 = self.delta_t_n;
                    }
                    if self.delta_t_np1 < 0.0 {
                        // Truncation failure: the controller flags the
                        // rejection with a negated proposal.
                        self.stats.ntrunc += 1;
                        step_failed = true;
                        self.delta_t_np1 = -self.delta_t_np1;
                        self.failure_counter += 2;
                        comment = "TIME TRUNC FAILURE";
                        rslt = "TRNC";
                    } else if self.failure_counter > 0 {
                        // Churning guard: no growth while the recent
                        // history is bad.
                        self.delta_t_np1 = self.delta_t_np1.min(self.delta_t_n);
                    }
                } else {
                    self.delta_t_np1 = self.delta_t_n;
                }
            }

            if step_failed {
                num_failures += 1;
                if self.settings.print_level > 1 {
                    self.log_step_fail(conv_failure, time_error_factor);
                } else if self.settings.print_level == 1 {
                    self.log_step_summary(rslt, num_newt_its, bktr_stps, time_error_factor, comment);
                }

                // Restore the pre-step state verbatim.
                self.time_n = snap.0;
                self.time_nm1 = snap.1;
                self.time_nm2 = snap.2;
                self.delta_t_n = snap.3;
                self.delta_t_nm1 = snap.4;
                self.delta_t_nm2 = snap.5;
                self.y_n.copy_from_slice(&self.y_nm1);
                self.ydot_n.copy_from_slice(&self.ydot_nm1);

                if num_failures > MAX_CONSECUTIVE_FAILURES {
                    self.status = Status::Failed;
                    if self.settings.print_level > 0 {
                        warn!(
                            "giving up after {} consecutive step failures at t = {:.6e}",
                            num_failures, self.time_n
                        );
                    }
                    return Err(Failure {
                        kind: FailureKind::ConsecutiveFailures,
                        time: self.time_n,
                        delta_t: self.delta_t_n,
                        count: num_failures,
                    });
                }
                continue;
            }

            // Success: heal the failure history and shift the time line.
            self.failure_counter = self.failure_counter.saturating_sub(1);
            self.stats.nstep += 1;
            self.time_nm2 = self.time_nm1;
            self.time_nm1 = snap.0;
            if self.settings.print_level > 1 {
                self.log_step_success(time_error_factor);
            } else if self.settings.print_level == 1 {
                self.log_step_summary(rslt, num_newt_its, bktr_stps, time_error_factor, comment);
            }
            return Ok(self.time_n);
        }
    }

    /// Integrate from `t_init` to `tout`.
    ///
    /// Returns the time reached (which can be short of `tout` when the
    /// system's stopping criterion fires). On a fatal failure the
    /// returned [`Failure`] carries the kind, the last time, the last
    /// step size, and the relevant counter.
    pub fn integrate(&mut self, tout: Float, t_init: Float) -> Result<Float, Failure> {
        self.time_final = tout;
        self.step_num = 0;
        self.status = Status::Success;
        let mut istep = 0usize;
        let mut print_step = 0usize;
        let mut time_current = t_init;
        self.time_n = t_init;
        self.time_nm1 = t_init;
        self.time_nm2 = t_init;

        if t_init >= tout {
            return Ok(t_init);
        }

        self.sys
            .eval_time_tracking(time_current, 0.0, &self.y_n, &self.ydot_n);
        if self.get_print_time(time_current) == time_current {
            self.sys.write_solution(
                WriteKind::Initial,
                time_current,
                self.delta_t_n,
                istep,
                &self.y_n,
                &self.ydot_n,
            );
        }
        if self.settings.print_level == 1 {
            log_summary_header(true);
        }
        self.sys
            .user_out(OutPhase::Init, time_current, 0.0, &self.y_n, &self.ydot_n);

        let mut failure: Option<Failure> = None;
        let mut finished = false;
        loop {
            let mut print_time = self.get_print_time(time_current);
            if print_time >= tout {
                print_time = tout;
            }

            match self.try_step(tout) {
                Ok(t) => time_current = t,
                Err(f) => {
                    time_current = f.time;
                    failure = Some(f);
                }
            }
            istep += 1;
            print_step += 1;
            let mut do_print = false;

            if failure.is_none()
                && self
                    .sys
                    .stopping_criterion(time_current, self.delta_t_n, &self.y_n, &self.ydot_n)
            {
                finished = true;
                do_print = true;
            }
            if time_current >= print_time {
                do_print = true;
            }
            if self.settings.print_step_interval == print_step {
                do_print = true;
            }
            if self.settings.print_first_steps > istep {
                do_print = true;
            }

            if failure.is_none() {
                self.sys
                    .eval_time_tracking(time_current, self.delta_t_n, &self.y_n, &self.ydot_n);
            }

            if do_print {
                self.sys.write_solution(
                    WriteKind::Accepted,
                    time_current,
                    self.delta_t_n,
                    istep,
                    &self.y_n,
                    &self.ydot_n,
                );
                print_step = 0;
                if self.settings.print_level == 1 {
                    log_summary_header(false);
                }
            }

            let phase = if failure.is_some() {
                OutPhase::Failure
            } else {
                OutPhase::Success
            };
            self.sys
                .user_out(phase, time_current, self.delta_t_n, &self.y_n, &self.ydot_n);

            if !(time_current < tout
                && self.stats.nattempt < self.settings.max_attempts
                && failure.is_none()
                && !finished)
            {
                break;
            }
        }

        if failure.is_none()
            && !finished
            && time_current < tout
            && self.stats.nattempt >= self.settings.max_attempts
        {
            self.status = Status::AttemptLimit;
            failure = Some(Failure {
                kind: FailureKind::AttemptBudget,
                time: time_current,
                delta_t: self.delta_t_n,
                count: self.stats.nattempt,
            });
        }

        if self.settings.print_level > 0 {
            self.log_final(time_current, failure.is_some());
        }
        self.sys.user_out(
            OutPhase::Final,
            time_current,
            self.delta_t_n,
            &self.y_n,
            &self.ydot_n,
        );

        match failure {
            Some(f) => Err(f),
            None => {
                if finished {
                    self.status = Status::Interrupted;
                }
                Ok(time_current)
            }
        }
    }

    /// Next output time at or after `time_current` on the evenly spaced
    /// output grid.
    fn get_print_time(&self, time_current: Float) -> Float {
        if self.settings.print_number_to_tout > 0 {
            let dt = (self.time_final - self.t0) / self.settings.print_number_to_tout as Float;
            for i in 0..=self.settings.print_number_to_tout {
                let tnext = self.t0 + dt * i as Float;
                if tnext >= time_current {
                    return tnext;
                }
            }
        }
        1.0e300
    }

    // ---- logging -------------------------------------------------------

    fn log_step_start(&self, prev_failed: bool) {
        debug!(
            "start of step {}: time_n = {:.6e}, delta_t_n = {:.6e}, delta_t_nm1 = {:.6e}",
            self.step_num, self.time_n, self.delta_t_n, self.delta_t_nm1
        );
        if prev_failed {
            debug!("\tpreviously attempted step was a failure");
        }
        if self.failure_counter > 0 {
            debug!("\tbad-history failure counter = {}", self.failure_counter);
        }
    }

    fn log_step_fail(&self, conv_failure: bool, time_error_factor: Float) {
        if conv_failure {
            debug!(
                "\tstep {} failed in the nonlinear solver: t = {:.6e}, delta_t = {:.6e}, next delta_t = {:.6e}",
                self.step_num, self.time_n, self.delta_t_n, self.delta_t_np1
            );
        } else {
            debug!(
                "\tstep {} failed on truncation error ({:.4e}): t = {:.6e}, delta_t = {:.6e}, next delta_t = {:.6e}",
                self.step_num, time_error_factor, self.time_n, self.delta_t_n, self.delta_t_np1
            );
        }
    }

    fn log_step_success(&self, time_error_factor: Float) {
        debug!(
            "\tstep {} succeeded: t = {:.6e}, estimated/tolerated error = {:.4e}, recommended next delta_t = {:.6e}",
            self.step_num, self.time_n, time_error_factor, self.delta_t_np1
        );
    }

    fn log_step_summary(
        &self,
        rslt: &str,
        newt_its: usize,
        bktr_stps: usize,
        time_error_factor: Float,
        comment: &str,
    ) {
        info!(
            "{:6} {:>12.6e} {:>4} {:>11.4e} {:>4} {:>4} {:>11.4e}{}{}",
            self.step_num,
            self.time_n,
            rslt,
            self.delta_t_n,
            newt_its,
            bktr_stps,
            time_error_factor,
            if comment.is_empty() { "" } else { " | " },
            comment
        );
    }

    fn log_final(&self, time: Float, failed: bool) {
        info!(
            "time integration finished: {}",
            if failed { "failure" } else { "success" }
        );
        info!("\tending time                  = {:.6e}", time);
        info!("\tnumber of time steps         = {}", self.stats.nstep);
        info!("\tnumber of newton its         = {}", self.stats.nnewt);
        info!("\tnumber of linear solves      = {}", self.stats.nsol);
        info!("\tnumber of convergence fails  = {}", self.stats.nconv);
        info!("\tnumber of truncation fails   = {}", self.stats.ntrunc);
        info!("\tnumber of function evals     = {}", self.stats.nfev);
        info!("\tnumber of jacobian evals     = {}", self.stats.njev);
    }
}

fn log_summary_header(start: bool) {
    info!(
        "  step         time rslt     delta_t newt bktr   trunc_err   {}",
        if start { "START" } else { "(continued)" }
    );
}

// ---- predictor/corrector kernels --------------------------------------

/// Explicit prediction of the solution at the end of the step.
///
/// Order 1 is forward Euler on the current derivative; order 2 is an
/// Adams-Bashforth-like formula on the last two derivatives with
/// non-uniform spacing.
pub(crate) fn predict(
    order: usize,
    delta_t_n: Float,
    delta_t_nm1: Float,
    y_n: &[Float],
    ydot_n: &[Float],
    ydot_nm1: &[Float],
    y_pred: &mut [Float],
) {
    match order {
        2 => {
            let c1 = delta_t_n * (2.0 + delta_t_n / delta_t_nm1) / 2.0;
            let c2 = delta_t_n * delta_t_n / (2.0 * delta_t_nm1);
            for i in 0..y_n.len() {
                y_pred[i] = y_n[i] + c1 * ydot_n[i] - c2 * ydot_nm1[i];
            }
        }
        _ => {
            for i in 0..y_n.len() {
                y_pred[i] = y_n[i] + delta_t_n * ydot_n[i];
            }
        }
    }
}

/// Reconstruct the time derivative consistent with the backward
/// difference the corrector closes.
pub(crate) fn calc_ydot(
    order: usize,
    delta_t: Float,
    y: &[Float],
    y_nm1: &[Float],
    ydot_nm1: &[Float],
    ydot: &mut [Float],
) {
    match order {
        2 => {
            let c = 2.0 / delta_t;
            for i in 0..y.len() {
                ydot[i] = c * (y[i] - y_nm1[i]) - ydot_nm1[i];
            }
        }
        _ => {
            let c = 1.0 / delta_t;
            for i in 0..y.len() {
                ydot[i] = c * (y[i] - y_nm1[i]);
            }
        }
    }
}

/// Step-size update law.
///
/// Returns the recommended next step size; a negative value flags a
/// truncation-error rejection and carries the (negated) size to retry
/// with.
pub(crate) fn step_size_control(
    order: usize,
    delta_t_n: Float,
    delta_t_nm1: Float,
    time_error_factor: Float,
) -> Float {
    // Keep a vanishing error estimate from blowing up the factor.
    let tau = time_error_factor.max(1.0e-50);
    let (factor, power) = match order {
        2 => (
            1.0 / (3.0 * (1.0 + delta_t_nm1 / delta_t_n) * tau),
            1.0 / 3.0,
        ),
        _ => (1.0 / (2.0 * tau), 0.5),
    };
    let factor = factor.powf(power);
    if factor < 0.5 {
        -0.5 * delta_t_n
    } else {
        factor.min(1.5) * delta_t_n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{EvalError, ResidMode};

    #[test]
    fn predictor_first_order() {
        let y = [1.0, -2.0];
        let ydot = [2.0, 4.0];
        let ydot_old = [0.0, 0.0];
        let mut pred = [0.0; 2];
        predict(1, 0.1, 0.0, &y, &ydot, &ydot_old, &mut pred);
        assert!((pred[0] - 1.2).abs() < 1e-14);
        assert!((pred[1] + 1.6).abs() < 1e-14);
    }

    #[test]
    fn predictor_second_order() {
        let y = [1.0];
        let ydot = [2.0];
        let ydot_old = [1.0];
        let mut pred = [0.0];
        // c1 = 0.1 (2 + 0.5) / 2 = 0.125, c2 = 0.01 / 0.4 = 0.025
        predict(2, 0.1, 0.2, &y, &ydot, &ydot_old, &mut pred);
        assert!((pred[0] - 1.225).abs() < 1e-14);
    }

    #[test]
    fn ydot_reconstruction() {
        let y = [1.5];
        let y_old = [1.0];
        let ydot_old = [3.0];
        let mut ydot = [0.0];
        calc_ydot(1, 0.25, &y, &y_old, &ydot_old, &mut ydot);
        assert!((ydot[0] - 2.0).abs() < 1e-14);
        calc_ydot(2, 0.25, &y, &y_old, &ydot_old, &mut ydot);
        assert!((ydot[0] - 1.0).abs() < 1e-14);
    }

    #[test]
    fn controller_first_order() {
        // At the design point tau = 0.5 the step is kept.
        assert!((step_size_control(1, 1.0e-3, 0.0, 0.5) - 1.0e-3).abs() < 1e-18);
        // Tiny error grows the step by at most 1.5.
        assert!((step_size_control(1, 1.0e-3, 0.0, 1.0e-60) - 1.5e-3).abs() < 1e-18);
        // Large error rejects with half the step, flagged negative.
        let d = step_size_control(1, 1.0e-3, 0.0, 3.0);
        assert!((d + 0.5e-3).abs() < 1e-18);
    }

    #[test]
    fn controller_second_order() {
        // Equal spacing, tau = 0.5: factor = (1/3)^(1/3).
        let d = step_size_control(2, 1.0e-3, 1.0e-3, 0.5);
        let expect = (1.0f64 / 3.0).powf(1.0 / 3.0) * 1.0e-3;
        assert!((d - expect).abs() < 1e-18);
    }

    /// y' = -lambda y posed in residual form, with consistent initial
    /// derivative. Failure injection: `fail_next` aborts the next
    /// Jacobian base evaluation once, `fail_after` breaks every
    /// evaluation past that time.
    struct Decay {
        lambda: f64,
        fail_next: bool,
        fail_after: f64,
    }

    impl Decay {
        fn new(lambda: f64) -> Self {
            Self {
                lambda,
                fail_next: false,
                fail_after: f64::INFINITY,
            }
        }
    }

    impl DaeSystem for Decay {
        fn n_equations(&self) -> usize {
            1
        }

        fn initial_conditions(&mut self, _t0: f64, y: &mut [f64], ydot: &mut [f64]) {
            y[0] = 1.0;
            ydot[0] = -self.lambda;
        }

        fn residual(
            &mut self,
            t: f64,
            _delta_t: f64,
            y: &[f64],
            ydot: &[f64],
            resid: &mut [f64],
            mode: ResidMode,
        ) -> Result<(), EvalError> {
            if t > self.fail_after {
                return Err(EvalError::new("injected failure"));
            }
            if self.fail_next && mode == ResidMode::JacBase {
                self.fail_next = false;
                return Err(EvalError::new("injected failure"));
            }
            resid[0] = ydot[0] + self.lambda * y[0];
            Ok(())
        }
    }

    /// F = y' - c with deliberately inconsistent (zero) initial
    /// derivative, so the first predictions lag the corrector and force
    /// truncation-error rejections.
    struct ConstantForcing {
        c: f64,
    }

    impl DaeSystem for ConstantForcing {
        fn n_equations(&self) -> usize {
            1
        }

        fn initial_conditions(&mut self, _t0: f64, y: &mut [f64], ydot: &mut [f64]) {
            y[0] = 1.0;
            ydot[0] = 0.0;
        }

        fn residual(
            &mut self,
            _t: f64,
            _delta_t: f64,
            _y: &[f64],
            ydot: &[f64],
            resid: &mut [f64],
            _mode: ResidMode,
        ) -> Result<(), EvalError> {
            resid[0] = ydot[0] - self.c;
            Ok(())
        }
    }

    #[test]
    fn failure_counter_decays_on_success() {
        let mut sys = Decay::new(1.0);
        let mut solver = BackwardEuler::new(0.0, &mut sys);
        solver.set_print_level(0);
        solver.failure_counter = 5;
        solver.try_step(1.0).unwrap();
        solver.try_step(1.0).unwrap();
        assert_eq!(solver.failure_counter, 3);
        assert_eq!(solver.stats.nstep, 2);
    }

    #[test]
    fn convergence_failure_adds_three() {
        let mut sys = Decay::new(1.0);
        sys.fail_next = true;
        let mut solver = BackwardEuler::new(0.0, &mut sys);
        solver.set_print_level(0);
        // One failed attempt (+3) followed by a successful retry (-1).
        solver.try_step(1.0).unwrap();
        assert_eq!(solver.failure_counter, 2);
        assert_eq!(solver.stats.nconv, 1);
        assert_eq!(solver.stats.nattempt, 2);
    }

    #[test]
    fn truncation_failure_adds_two() {
        let mut sys = ConstantForcing { c: 500.0 };
        let mut solver = BackwardEuler::new(0.0, &mut sys);
        solver.set_print_level(0);
        solver.set_tolerances(1.0e-6, 1.0e-10).unwrap();
        // ewt ~= 1e-6 and the corrector moves by c * delta_t per step, so
        // the first attempt (delta_t = 1e-8) sees tau ~= 5, the halved
        // retry tau ~= 2.5, and the third attempt (tau ~= 1.25) passes:
        // counter = 2 + 2 - 1.
        solver.try_step(1.0).unwrap();
        assert_eq!(solver.stats.ntrunc, 2);
        assert_eq!(solver.failure_counter, 3);
    }

    #[test]
    fn rejection_restores_history_exactly() {
        let mut sys = Decay::new(10.0);
        let mut solver = BackwardEuler::new(0.0, &mut sys);
        solver.set_print_level(0);
        // Take two good steps so the history is non-trivial.
        solver.try_step(1.0).unwrap();
        solver.try_step(1.0).unwrap();

        let time_n = solver.time_n;
        let time_nm1 = solver.time_nm1;
        let time_nm2 = solver.time_nm2;
        let delta_t_n = solver.delta_t_n;
        let delta_t_nm1 = solver.delta_t_nm1;
        let delta_t_nm2 = solver.delta_t_nm2;
        let y = solver.y_n.clone();
        let ydot = solver.ydot_n.clone();

        // Break every evaluation beyond the current time and watch the
        // step give up without disturbing the accepted state.
        solver.sys.fail_after = time_n * 0.99;
        let err = solver.try_step(1.0).unwrap_err();
        assert_eq!(err.kind, FailureKind::ConsecutiveFailures);
        assert_eq!(err.count, MAX_CONSECUTIVE_FAILURES + 1);
        assert_eq!(solver.stats.nconv, MAX_CONSECUTIVE_FAILURES + 1);

        assert_eq!(solver.time_n.to_bits(), time_n.to_bits());
        assert_eq!(solver.time_nm1.to_bits(), time_nm1.to_bits());
        assert_eq!(solver.time_nm2.to_bits(), time_nm2.to_bits());
        assert_eq!(solver.delta_t_n.to_bits(), delta_t_n.to_bits());
        assert_eq!(solver.delta_t_nm1.to_bits(), delta_t_nm1.to_bits());
        assert_eq!(solver.delta_t_nm2.to_bits(), delta_t_nm2.to_bits());
        assert_eq!(solver.y_n[0].to_bits(), y[0].to_bits());
        assert_eq!(solver.ydot_n[0].to_bits(), ydot[0].to_bits());
    }

    #[test]
    fn fixed_step_method_keeps_delta_t() {
        let mut sys = Decay::new(1.0);
        let mut solver = BackwardEuler::new(0.0, &mut sys);
        solver.set_print_level(0);
        solver.set_method(StepMethod::Fixed);
        solver.set_initial_step(1.0e-6);
        solver.try_step(1.0).unwrap();
        solver.try_step(1.0).unwrap();
        assert_eq!(solver.delta_t_n, 1.0e-6);
        assert_eq!(solver.delta_t_np1, 1.0e-6);
    }
}
