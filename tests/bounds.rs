use beuler::prelude::*;

// Stiff linear push toward a strongly negative equilibrium,
// F = y' + k (y - target) with target < 0, started barely above zero.
struct PushDown {
    k: f64,
    target: f64,
    y0: f64,
    /// (t, y) at every accepted-step write.
    accepted: Vec<(f64, f64)>,
}

impl DaeSystem for PushDown {
    fn n_equations(&self) -> usize {
        1
    }

    fn initial_conditions(&mut self, _t0: f64, y: &mut [f64], ydot: &mut [f64]) {
        y[0] = self.y0;
        ydot[0] = -self.k * (self.y0 - self.target);
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
        resid[0] = ydot[0] + self.k * (y[0] - self.target);
        Ok(())
    }

    fn write_solution(
        &mut self,
        kind: WriteKind,
        t: f64,
        _delta_t: f64,
        _step_no: usize,
        y: &[f64],
        _ydot: &[f64],
    ) {
        if kind == WriteKind::Accepted {
            self.accepted.push((t, y[0]));
        }
    }
}

// With a residual dragging the solution hard below zero, the bounded
// Newton iteration and the truncation-error control between them must
// keep every accepted state above the -0.01 * ewt floor for as long as
// the run lasts (here it ends on the attempt budget).
#[test]
fn accepted_states_respect_the_lower_bound() {
    let reltol = 1.0e-6;
    let abstol = 1.0e-10;
    let mut sys = PushDown {
        k: 1.0e6,
        target: -0.2,
        y0: 1.0e-3,
        accepted: Vec::new(),
    };
    let result = {
        let mut solver = BackwardEuler::new(0.0, &mut sys);
        solver.set_print_level(0);
        solver.set_tolerances(reltol, abstol).unwrap();
        solver.set_max_attempts(40);
        solver.integrate(1.0, 0.0)
    };
    // The equilibrium is unreachable without going negative, so the run
    // spends its budget fighting the pull.
    let err = result.unwrap_err();
    assert_eq!(err.kind, FailureKind::AttemptBudget);

    assert!(!sys.accepted.is_empty());
    for &(_t, y) in &sys.accepted {
        let ewt = abstol + reltol * y.abs();
        assert!(
            y >= -0.01 * ewt,
            "accepted state y = {} violates the lower bound",
            y
        );
    }
}
