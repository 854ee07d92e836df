#![allow(dead_code)]

use beuler::prelude::*;

/// Linear scalar decay, F = y' + lambda * y.
pub struct Decay {
    pub lambda: f64,
    pub y0: f64,
    /// (t, delta_t, y) at every accepted-step write.
    pub accepted: Vec<(f64, f64, f64)>,
}

impl Decay {
    pub fn new(lambda: f64, y0: f64) -> Self {
        Self {
            lambda,
            y0,
            accepted: Vec::new(),
        }
    }
}

impl DaeSystem for Decay {
    fn n_equations(&self) -> usize {
        1
    }

    fn initial_conditions(&mut self, _t0: f64, y: &mut [f64], ydot: &mut [f64]) {
        y[0] = self.y0;
        ydot[0] = -self.lambda * self.y0;
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
        resid[0] = ydot[0] + self.lambda * y[0];
        Ok(())
    }

    fn write_solution(
        &mut self,
        kind: WriteKind,
        t: f64,
        delta_t: f64,
        _step_no: usize,
        y: &[f64],
        _ydot: &[f64],
    ) {
        if kind == WriteKind::Accepted {
            self.accepted.push((t, delta_t, y[0]));
        }
    }
}

/// Constant-coefficient linear system A y' + B y = g with
/// A = [[2, 0], [0, 1]], B = [[2, 1], [0, 3]], g = [1, 2].
///
/// Closed form from the triangular structure:
/// y0(t) = (1 - exp(-3t)) / 6, y1(t) = 2/3 (1 - exp(-3t)).
pub struct Linear2;

impl DaeSystem for Linear2 {
    fn n_equations(&self) -> usize {
        2
    }

    fn initial_conditions(&mut self, _t0: f64, y: &mut [f64], ydot: &mut [f64]) {
        y.copy_from_slice(&[0.0, 0.0]);
        // ydot = A^-1 (g - B y)
        ydot.copy_from_slice(&[0.5, 2.0]);
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
        resid[0] = 2.0 * ydot[0] + 2.0 * y[0] + y[1] - 1.0;
        resid[1] = ydot[1] + 3.0 * y[1] - 2.0;
        Ok(())
    }
}

/// Van der Pol oscillator as a first-order system:
/// F0 = y0' - y1, F1 = y1' - mu (1 - y0^2) y1 + y0.
pub struct VanDerPol {
    pub mu: f64,
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
}
