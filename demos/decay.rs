//! # Demo: scalar decay
//!
//! Minimal usage: integrate F = y' + 10 y from y(0) = 1 to t = 1 and
//! compare against exp(-10).

use beuler::prelude::*;

struct Decay;

impl DaeSystem for Decay {
    fn n_equations(&self) -> usize {
        1
    }

    fn initial_conditions(&mut self, _t0: f64, y: &mut [f64], ydot: &mut [f64]) {
        y[0] = 1.0;
        ydot[0] = -10.0;
    }

    fn residual(
        &mut self,
        _t: f64,
        _delta_t: f64,
        y: &[f64],
        ydot: &[f64],
        resid: &mut [f64],
        _mode: ResidMode,
    ) -> Result<(), EvalError> {
        resid[0] = ydot[0] + 10.0 * y[0];
        Ok(())
    }
}

fn main() {
    let mut sys = Decay;
    let mut solver = BackwardEuler::new(0.0, &mut sys);
    solver.set_tolerances(1.0e-6, 1.0e-10).unwrap();
    solver.set_print_level(0);

    let t = solver.integrate(1.0, 0.0).expect("integration failed");
    let y = solver.solution()[0];
    println!("t = {:.3}, y = {:.8e}, exact = {:.8e}", t, y, (-10.0f64).exp());
    println!("steps = {}, residual evaluations = {}", solver.stats().nstep, solver.n_evals());
}
