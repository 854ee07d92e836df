use beuler::prelude::*;

mod common;
use common::Linear2;

// For a linear system the residual is exactly linear in (y, y'), so once
// the iteration matrix is built the very first Newton step lands on the
// corrector and the follow-up step evaluated by the damped search is
// negligible: every step attempt must finish in exactly one iteration.
#[test]
fn linear_systems_take_one_newton_iteration_per_step() {
    let mut sys = Linear2;
    let (y, stats) = {
        let mut solver = BackwardEuler::new(0.0, &mut sys);
        solver.set_print_level(0);
        solver.integrate(0.5, 0.0).unwrap();
        (solver.solution().to_vec(), solver.stats())
    };

    assert_eq!(stats.nconv, 0);
    assert_eq!(
        stats.nnewt, stats.nattempt,
        "expected one Newton iteration per attempt ({} its over {} attempts)",
        stats.nnewt, stats.nattempt
    );

    let decay = 1.0 - (-1.5f64).exp();
    assert!((y[0] - decay / 6.0).abs() < 1.0e-3, "y0 = {}", y[0]);
    assert!((y[1] - 2.0 * decay / 3.0).abs() < 1.0e-3, "y1 = {}", y[1]);
}

#[test]
fn analytic_jacobian_agrees_with_finite_differences() {
    /// Linear2 with the iteration matrix supplied in closed form.
    struct Linear2Analytic;

    impl DaeSystem for Linear2Analytic {
        fn n_equations(&self) -> usize {
            2
        }

        fn initial_conditions(&mut self, t0: f64, y: &mut [f64], ydot: &mut [f64]) {
            Linear2.initial_conditions(t0, y, ydot);
        }

        fn residual(
            &mut self,
            t: f64,
            delta_t: f64,
            y: &[f64],
            ydot: &[f64],
            resid: &mut [f64],
            mode: ResidMode,
        ) -> Result<(), EvalError> {
            Linear2.residual(t, delta_t, y, ydot, resid, mode)
        }

        fn jacobian(
            &mut self,
            t: f64,
            delta_t: f64,
            cj: f64,
            y: &[f64],
            ydot: &[f64],
            jac: &mut SquareMatrix,
            resid: &mut [f64],
        ) -> Result<(), EvalError> {
            // J = B + cj * A
            jac[(0, 0)] = 2.0 + 2.0 * cj;
            jac[(0, 1)] = 1.0;
            jac[(1, 0)] = 0.0;
            jac[(1, 1)] = 3.0 + cj;
            Linear2.residual(t, delta_t, y, ydot, resid, ResidMode::Base)
        }
    }

    let mut fd_sys = Linear2;
    let (y_fd, stats_fd) = {
        let mut solver = BackwardEuler::new(0.0, &mut fd_sys);
        solver.set_print_level(0);
        solver.integrate(0.5, 0.0).unwrap();
        (solver.solution().to_vec(), solver.stats())
    };

    let mut an_sys = Linear2Analytic;
    let (y_an, stats_an) = {
        let mut solver = BackwardEuler::new(0.0, &mut an_sys);
        solver.set_print_level(0);
        solver.set_jacobian_method(JacobianMethod::Analytic);
        solver.integrate(0.5, 0.0).unwrap();
        (solver.solution().to_vec(), solver.stats())
    };

    assert_eq!(stats_an.nconv, 0);
    assert_eq!(stats_an.nnewt, stats_an.nattempt);
    // Both paths land on the closed-form solution and on each other to
    // within the tolerance envelope.
    let decay = 1.0 - (-1.5f64).exp();
    assert!((y_an[0] - decay / 6.0).abs() < 1.0e-3, "y0 = {}", y_an[0]);
    assert!((y_an[1] - 2.0 * decay / 3.0).abs() < 1.0e-3, "y1 = {}", y_an[1]);
    assert!((y_fd[0] - y_an[0]).abs() < 1.0e-4);
    assert!((y_fd[1] - y_an[1]).abs() < 1.0e-4);
    // The analytic path issues one residual evaluation per Jacobian
    // instead of n + 1.
    assert!(stats_an.nfev < stats_fd.nfev);
}
