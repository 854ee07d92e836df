//! LU factorization with partial pivoting and the paired solve.

use crate::error::Error;
use crate::Float;

use super::SquareMatrix;

impl SquareMatrix {
    /// Factor the matrix into LU form with partial pivoting, keeping the
    /// original entries intact.
    pub fn factor(&mut self) -> Result<(), Error> {
        let n = self.n;
        self.lu.copy_from_slice(&self.data);
        let a = &mut self.lu;

        for k in 0..n {
            // pivot search in column k
            let mut pivot_row = k;
            let mut pivot_val = a[k * n + k].abs();
            for i in (k + 1)..n {
                let val = a[k * n + i].abs();
                if val > pivot_val {
                    pivot_val = val;
                    pivot_row = i;
                }
            }
            if pivot_val == 0.0 {
                return Err(Error::SingularMatrix(k));
            }
            self.pivots[k] = pivot_row;
            if pivot_row != k {
                for j in 0..n {
                    a.swap(j * n + k, j * n + pivot_row);
                }
            }
            // Eliminate below the pivot, storing the multipliers in L.
            let akk = a[k * n + k];
            for i in (k + 1)..n {
                let factor = a[k * n + i] / akk;
                a[k * n + i] = factor;
                for j in (k + 1)..n {
                    a[j * n + i] -= factor * a[j * n + k];
                }
            }
        }

        self.factored = true;
        Ok(())
    }

    /// Solve A x = b in place, factoring first if needed. `b` is
    /// overwritten with `x`.
    pub fn solve(&mut self, b: &mut [Float]) -> Result<(), Error> {
        let n = self.n;
        assert_eq!(
            b.len(),
            n,
            "dimension mismatch in solve: A is {}x{}, b has length {}",
            n,
            n,
            b.len()
        );
        if !self.factored {
            self.factor()?;
        }
        let a = &self.lu;

        // Apply the row permutation to b.
        for k in 0..n {
            let p = self.pivots[k];
            if p != k {
                b.swap(k, p);
            }
        }
        // Forward solve L y = P b
        for i in 0..n {
            let mut sum = b[i];
            for k in 0..i {
                sum -= a[k * n + i] * b[k];
            }
            b[i] = sum;
        }
        // Backward solve U x = y
        for i in (0..n).rev() {
            let mut sum = b[i];
            for k in (i + 1)..n {
                sum -= a[k * n + i] * b[k];
            }
            b[i] = sum / a[i * n + i];
        }
        Ok(())
    }
}
