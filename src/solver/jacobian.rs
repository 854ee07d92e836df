//! Iteration-matrix construction: analytic call-through or column-wise
//! finite differences.

use std::fs::File;
use std::io::Write;

use log::warn;

use crate::settings::JacobianMethod;
use crate::system::{DaeSystem, EvalError, ResidMode};
use crate::Float;

use super::BackwardEuler;

/// Difference a - b with cancellation noise suppressed.
///
/// Returns exactly zero when the difference is below 1e-300 or below
/// 1e-14 times the smaller magnitude, else the plain difference.
/// Numerical differencing of residuals divides such differences by tiny
/// perturbations; without the cutoff, roundoff in near-equal residual
/// entries manufactures spurious Jacobian terms large enough to stall
/// the Newton iteration.
pub(crate) fn subtract_rd(a: Float, b: Float) -> Float {
    let diff = a - b;
    let d = a.abs().min(b.abs()) * 1.0e-14;
    let ad = diff.abs();
    if ad < 1.0e-300 || ad < d {
        return 0.0;
    }
    diff
}

impl<'a, S: DaeSystem> BackwardEuler<'a, S> {
    /// Build the iteration matrix J = dF/dy + cj * dF/dy' at (y, y') and
    /// leave the residual evaluated there in `self.resid`.
    ///
    /// In numerical mode each column j is formed by perturbing y[j] by a
    /// system-chosen amount, adjusting ydot[j] consistently through cj,
    /// differencing the residual, and restoring both entries before the
    /// next column. The perturbation is re-derived from the perturbed
    /// value so the divisor is the machine-representable delta actually
    /// applied.
    pub(crate) fn build_jacobian(
        &mut self,
        time_curr: Float,
        cj: Float,
        y: &mut [Float],
        ydot: &mut [Float],
    ) -> Result<(), EvalError> {
        self.jac.clear_factored();

        if self.settings.jacobian == JacobianMethod::Analytic {
            self.sys.jacobian(
                time_curr,
                self.delta_t_n,
                cj,
                y,
                ydot,
                &mut self.jac,
                &mut self.resid,
            )?;
            self.stats.njev += 1;
            self.stats.nfev += 1;
            return Ok(());
        }

        // Base residual for the sweep.
        self.sys.residual(
            time_curr,
            self.delta_t_n,
            y,
            ydot,
            &mut self.resid,
            ResidMode::JacBase,
        )?;
        self.stats.nfev += 1;
        self.stats.njev += 1;

        let mut dy_vec = vec![0.0; self.n];
        self.sys
            .jacobian_perturbations(time_curr, y, &self.y_nm1, &mut dy_vec, &self.ewt);

        if self.settings.dump_jacobians {
            dump_sweep(&self.ewt, y, &dy_vec, &self.resid);
        }

        for j in 0..self.n {
            let y_save = y[j];
            let ydot_save = ydot[j];
            let mut dy = dy_vec[j];

            y[j] = y_save + dy;
            dy = y[j] - y_save;
            ydot[j] += cj * dy;

            let status = self.sys.residual(
                time_curr,
                self.delta_t_n,
                y,
                ydot,
                &mut self.wksp,
                ResidMode::JacDelta { col: j, delta: dy },
            );
            self.stats.nfev += 1;
            y[j] = y_save;
            ydot[j] = ydot_save;
            status?;

            let col = self.jac.column_mut(j);
            for i in 0..col.len() {
                col[i] = subtract_rd(self.wksp[i], self.resid[i]) / dy;
            }
        }

        Ok(())
    }
}

/// Write the state of a numerical Jacobian sweep to `NumJac.csv`:
/// a header row, then one space-separated row per unknown.
fn dump_sweep(ewt: &[Float], y: &[Float], dy: &[Float], resid: &[Float]) {
    let path = "NumJac.csv";
    let write = |mut f: File| -> std::io::Result<()> {
        writeln!(f, "Unk, ewt, y, dy, Res")?;
        for i in 0..y.len() {
            writeln!(
                f,
                " {:4} {:16.8e} {:16.8e} {:16.8e} {:16.8e}",
                i, ewt[i], y[i], dy[i], resid[i]
            )?;
        }
        Ok(())
    };
    match File::create(path).and_then(write) {
        Ok(()) => {}
        Err(e) => warn!("could not dump jacobian sweep to {}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::subtract_rd;

    #[test]
    fn identical_values_difference_to_zero() {
        for a in [0.0, 1.0, -3.5e10, 7.2e-200, f64::MIN_POSITIVE] {
            assert_eq!(subtract_rd(a, a), 0.0);
        }
    }

    #[test]
    fn well_separated_values_subtract_exactly() {
        let cases = [(3.0, 1.0), (1.0e-5, -2.0e-5), (-4.0e100, 1.0e99)];
        for (a, b) in cases {
            assert_eq!(subtract_rd(a, b), a - b);
        }
    }

    #[test]
    fn cancellation_noise_is_squashed() {
        // Difference of one ulp at magnitude 1 is ~2.2e-16, far below
        // 1e-14 * 1.0.
        let a = 1.0;
        let b = 1.0 + f64::EPSILON;
        assert_eq!(subtract_rd(b, a), 0.0);
        // Below the absolute floor.
        assert_eq!(subtract_rd(1.0e-301, 0.0), 0.0);
    }

    #[test]
    fn threshold_is_relative_to_the_smaller_magnitude() {
        // |a - b| = 1e-10, min magnitude = 1: 1e-10 >= 1e-14 passes.
        assert_eq!(subtract_rd(1.0 + 1.0e-10, 1.0), (1.0 + 1.0e-10) - 1.0);
        // Same absolute difference against a huge partner is noise.
        assert_eq!(subtract_rd(1.0e12 + 1.0e-4, 1.0e12), 0.0);
    }
}
