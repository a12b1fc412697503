//! Symmetric band matrices and the banded Cholesky solve used by the
//! Whittaker-Henderson smoother.
//!
//! A symmetric `n x n` matrix with bandwidth `p` has at most `p + 1` distinct
//! diagonals. They are stored row-wise in an `(p + 1) x n` array: row `d`
//! holds diagonal `d`, of which only the first `n - d` entries are used.
//! Factorisation and solves run in `O(n * p^2)`.

use ndarray::Array2;

use crate::{Result, SstError};

/// Pivots at or below this value mean the matrix is not positive definite.
const PIVOT_EPS: f64 = 1e-12;

#[derive(Clone, Debug)]
pub struct BandMatrix {
    bands: Array2<f64>,
    n: usize,
}

impl BandMatrix {
    /// All-zero `n x n` symmetric matrix with `bandwidth` off-diagonals.
    pub fn zeros(n: usize, bandwidth: usize) -> Self {
        Self {
            bands: Array2::zeros((bandwidth + 1, n)),
            n,
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn bandwidth(&self) -> usize {
        self.bands.nrows() - 1
    }

    fn slot(&self, row: usize, col: usize) -> Result<(usize, usize)> {
        let (hi, lo) = if row >= col { (row, col) } else { (col, row) };
        let d = hi - lo;
        if hi >= self.n || d > self.bandwidth() {
            return Err(SstError::OutOfBand {
                row,
                col,
                bandwidth: self.bandwidth(),
            });
        }
        Ok((d, lo))
    }

    /// Entry `(row, col)`; symmetric, so `(i, j)` and `(j, i)` alias.
    pub fn get(&self, row: usize, col: usize) -> Result<f64> {
        let (d, k) = self.slot(row, col)?;
        Ok(self.bands[[d, k]])
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let (d, k) = self.slot(row, col)?;
        self.bands[[d, k]] = value;
        Ok(())
    }

    /// In-band access for `row >= col`, `row - col <= bandwidth`.
    #[inline]
    fn lower(&self, row: usize, col: usize) -> f64 {
        debug_assert!(row >= col && row - col <= self.bandwidth());
        self.bands[[row - col, col]]
    }

    #[inline]
    fn set_lower(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row >= col && row - col <= self.bandwidth());
        self.bands[[row - col, col]] = value;
    }

    /// Replaces `B` with `I + lambda * B`.
    pub fn scale_plus_identity(&mut self, lambda: f64) {
        let n = self.n;
        for (d, mut band) in self.bands.outer_iter_mut().enumerate() {
            for value in band.iter_mut().take(n.saturating_sub(d)) {
                *value *= lambda;
            }
            if d == 0 {
                band.mapv_inplace(|v| v + 1.0);
            }
        }
    }

    /// Factors the matrix as `L * L^T`, consuming it. `L` reuses the storage.
    pub fn cholesky(mut self) -> Result<CholeskyFactor> {
        let n = self.n;
        let p = self.bandwidth();
        for i in 0..n {
            let first = i.saturating_sub(p);
            for j in first..=i {
                let mut sum = 0.0;
                for k in first..j {
                    sum += self.lower(i, k) * self.lower(j, k);
                }
                if i == j {
                    let pivot = self.lower(i, i) - sum;
                    if pivot <= PIVOT_EPS || !pivot.is_finite() {
                        return Err(SstError::NotPositiveDefinite { row: i, pivot });
                    }
                    self.set_lower(i, i, pivot.sqrt());
                } else {
                    let value = (self.lower(i, j) - sum) / self.lower(j, j);
                    self.set_lower(i, j, value);
                }
            }
        }
        Ok(CholeskyFactor { lower: self })
    }
}

/// Lower-triangular Cholesky factor of a [`BandMatrix`].
#[derive(Clone, Debug)]
pub struct CholeskyFactor {
    lower: BandMatrix,
}

impl CholeskyFactor {
    pub fn size(&self) -> usize {
        self.lower.size()
    }

    /// Solves `L * L^T * x = rhs` by forward then back substitution.
    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let n = self.lower.size();
        if rhs.len() != n {
            return Err(SstError::LengthMismatch {
                expected: n,
                actual: rhs.len(),
            });
        }
        let p = self.lower.bandwidth();
        let l = &self.lower;

        let mut out = vec![0.0; n];
        for i in 0..n {
            let mut sum = 0.0;
            for j in i.saturating_sub(p)..i {
                sum += l.lower(i, j) * out[j];
            }
            out[i] = (rhs[i] - sum) / l.lower(i, i);
        }

        for i in (0..n).rev() {
            let mut sum = 0.0;
            for j in (i + 1)..(i + p + 1).min(n) {
                sum += l.lower(j, i) * out[j];
            }
            out[i] = (out[i] - sum) / l.lower(i, i);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn tridiagonal(n: usize, diag: f64, off: f64) -> BandMatrix {
        let mut m = BandMatrix::zeros(n, 1);
        for i in 0..n {
            m.set(i, i, diag).unwrap();
            if i + 1 < n {
                m.set(i + 1, i, off).unwrap();
            }
        }
        m
    }

    #[test]
    fn test_get_set_symmetric() {
        let mut m = BandMatrix::zeros(5, 2);
        m.set(3, 1, 4.5).unwrap();
        assert_eq!(m.get(1, 3).unwrap(), 4.5);
        assert_eq!(m.get(3, 1).unwrap(), 4.5);
        assert_eq!(m.get(2, 2).unwrap(), 0.0);
    }

    #[test]
    fn test_out_of_band_rejected() {
        let mut m = BandMatrix::zeros(5, 1);
        assert!(matches!(
            m.set(4, 1, 1.0),
            Err(SstError::OutOfBand { bandwidth: 1, .. })
        ));
        assert!(m.get(5, 5).is_err());
    }

    #[test]
    fn test_scale_plus_identity() {
        let mut m = tridiagonal(4, 2.0, -1.0);
        m.scale_plus_identity(3.0);
        assert_eq!(m.get(0, 0).unwrap(), 7.0);
        assert_eq!(m.get(1, 0).unwrap(), -3.0);
    }

    #[test]
    fn test_solve_matches_dense_product() {
        let n = 6;
        let m = tridiagonal(n, 4.0, -1.0);
        let dense = m.clone();
        let x_true: Vec<f64> = (0..n).map(|i| (i as f64) * 0.5 - 1.0).collect();
        let rhs: Vec<f64> = (0..n)
            .map(|i| {
                let lo = i.saturating_sub(1);
                let hi = (i + 1).min(n - 1);
                (lo..=hi).map(|j| dense.get(i, j).unwrap() * x_true[j]).sum()
            })
            .collect();

        let x = m.cholesky().unwrap().solve(&rhs).unwrap();
        for (a, b) in x.iter().zip(x_true.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_not_positive_definite() {
        let m = tridiagonal(3, -1.0, 0.0);
        assert!(matches!(
            m.cholesky(),
            Err(SstError::NotPositiveDefinite { row: 0, .. })
        ));
    }

    #[test]
    fn test_solve_length_mismatch() {
        let factor = tridiagonal(4, 2.0, 0.5).cholesky().unwrap();
        assert!(matches!(
            factor.solve(&[1.0, 2.0]),
            Err(SstError::LengthMismatch {
                expected: 4,
                actual: 2
            })
        ));
    }
}
