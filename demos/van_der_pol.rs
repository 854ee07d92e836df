//! # Demo: stiff Van der Pol oscillator
//!
//! Integrate the Van der Pol relaxation oscillator with mu = 1000 as a
//! first-order implicit system:
//!
//! F0 = y0' - y1
//! F1 = y1' - mu (1 - y0^2) y1 + y0
//!
//! Initial conditions: y0(0) = 2, y1(0) = 0. Runs with one-line step
//! summaries on the terminal logger.

use beuler::prelude::*;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

struct VanDerPol {
    mu: f64,
}

impl DaeSystem for VanDerPol {
    fn n_equations(&self) -> usize {
        2
    }

    fn initial_conditions(&mut self, _t0: f64, y: &mut [f64], ydot: &mut [f64]) {
        y.copy_from_slice(&[2.0, 0.0]);
        ydot.copy_from_slice(&[0.0, -2.0]);
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
        resid[0] = ydot[0] - y[1];
        resid[1] = ydot[1] - self.mu * (1.0 - y[0] * y[0]) * y[1] + y[0];
        Ok(())
    }

    fn write_solution(
        &mut self,
        _kind: WriteKind,
        t: f64,
        delta_t: f64,
        _step_no: usize,
        y: &[f64],
        _ydot: &[f64],
    ) {
        println!(
            "t = {:12.5e}  delta_t = {:10.3e}  y = [{:12.5e}, {:12.5e}]",
            t, delta_t, y[0], y[1]
        );
    }
}

fn main() {
    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    let mut sys = VanDerPol { mu: 1000.0 };
    let mut solver = BackwardEuler::new(0.0, &mut sys);
    solver.set_tolerances(1.0e-4, 1.0e-6).unwrap();
    solver.set_print_level(1);
    // Write the solution at 30 evenly spaced output times only.
    solver.set_print_options(0, 30, 0, false);

    match solver.integrate(3000.0, 0.0) {
        Ok(t) => {
            println!("finished at t = {:.6e}", t);
            println!("final state: y = {:?}", solver.solution());
            let stats = solver.stats();
            println!("steps                = {}", stats.nstep);
            println!("newton iterations    = {}", stats.nnewt);
            println!("residual evaluations = {}", stats.nfev);
            println!("jacobian evaluations = {}", stats.njev);
            println!("convergence failures = {}", stats.nconv);
            println!("truncation failures  = {}", stats.ntrunc);
        }
        Err(e) => eprintln!("integration failed: {}", e),
    }
}
