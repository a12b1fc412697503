//! Travel smoothers.
//!
//! Both implementations produce a series of the same length as their input.
//! [`WhittakerHenderson`] is the default; [`ModifiedSinc`] is a convolution
//! alternative selected through [`crate::SmootherConfig`].

use std::f64::consts::PI;

use crate::band::{BandMatrix, CholeskyFactor};
use crate::{Result, SstError};

pub const WH_MAX_ORDER: usize = 5;

/// Difference coefficients for penalty orders 1..=5.
const WH_DIFF_COEFF: [&[f64]; WH_MAX_ORDER] = [
    &[-1.0, 1.0],
    &[1.0, -2.0, 1.0],
    &[-1.0, 3.0, -3.0, 1.0],
    &[1.0, -4.0, 6.0, -4.0, 1.0],
    &[-1.0, 5.0, -10.0, 10.0, -5.0, 1.0],
];

pub trait Smoother: Send + Sync {
    fn smooth(&self, series: &[f64]) -> Result<Vec<f64>>;
}

/// Builds `D'D` for the `order`-th difference operator `D` on `size` points.
pub fn difference_penalty(order: usize, size: usize) -> Result<BandMatrix> {
    if !(1..=WH_MAX_ORDER).contains(&order) {
        return Err(SstError::InvalidParameter(format!(
            "penalty order {order} outside 1..={WH_MAX_ORDER}"
        )));
    }
    if size <= order {
        return Err(SstError::InsufficientData {
            required: order + 1,
            available: size,
        });
    }
    let coeffs = WH_DIFF_COEFF[order - 1];
    // D has `size - order` rows; row i holds coeffs at columns i..=i+order.
    let last_row = size - order - 1;
    let mut m = BandMatrix::zeros(size, order);
    for d in 0..=order {
        for r in 0..size - d {
            let lo = r.saturating_sub(last_row);
            let hi = (order - d).min(r);
            let sum: f64 = (lo..=hi).map(|j| coeffs[j] * coeffs[j + d]).sum();
            m.set(r + d, r, sum)?;
        }
    }
    Ok(m)
}

/// Whittaker-Henderson smoother with a pre-factored `I + lambda * D'D`.
#[derive(Clone, Debug)]
pub struct WhittakerHenderson {
    factor: CholeskyFactor,
    order: usize,
    lambda: f64,
}

impl WhittakerHenderson {
    /// Prepares a smoother for series of exactly `len` samples.
    pub fn new(len: usize, order: usize, lambda: f64) -> Result<Self> {
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(SstError::InvalidParameter(format!(
                "lambda must be finite and >= 0, got {lambda}"
            )));
        }
        let mut a = difference_penalty(order, len)?;
        a.scale_plus_identity(lambda);
        let factor = a.cholesky()?;
        Ok(Self {
            factor,
            order,
            lambda,
        })
    }

    pub fn len(&self) -> usize {
        self.factor.size()
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}

impl Smoother for WhittakerHenderson {
    fn smooth(&self, series: &[f64]) -> Result<Vec<f64>> {
        self.factor.solve(series)
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Modified-sinc kernel smoother (Schmid, Rath & Diebold 2022, eq. 3-6).
///
/// No correction terms are applied, which is exact for degrees up to 4.
#[derive(Clone, Debug)]
pub struct ModifiedSinc {
    kernel: Vec<f64>,
    half_width: usize,
    degree: usize,
}

impl ModifiedSinc {
    pub fn new(degree: usize, half_width: usize, alpha: f64) -> Result<Self> {
        let min_half_width = degree / 2 + 2;
        if half_width < min_half_width {
            return Err(SstError::InvalidParameter(format!(
                "half width {half_width} too small for degree {degree}, need >= {min_half_width}"
            )));
        }
        if !alpha.is_finite() || alpha <= 0.0 {
            return Err(SstError::InvalidParameter(format!(
                "alpha must be finite and > 0, got {alpha}"
            )));
        }

        let m = half_width as f64;
        let sinc_scale = (degree as f64 + 4.0) / 2.0;
        let kernel: Vec<f64> = (0..=2 * half_width)
            .map(|k| {
                let x = (k as f64 - m) / (m + 1.0);
                let window = (-alpha * x * x).exp()
                    + (-alpha * (x + 2.0) * (x + 2.0)).exp()
                    + (-alpha * (x - 2.0) * (x - 2.0)).exp()
                    - 2.0 * (-alpha).exp()
                    - (-9.0 * alpha).exp();
                window * sinc(sinc_scale * x)
            })
            .collect();

        let sum: f64 = kernel.iter().sum();
        if sum == 0.0 || !sum.is_finite() {
            return Err(SstError::InvalidParameter(
                "sinc kernel sums to zero".into(),
            ));
        }
        Ok(Self {
            kernel: kernel.into_iter().map(|k| k / sum).collect(),
            half_width,
            degree,
        })
    }

    pub fn kernel(&self) -> &[f64] {
        &self.kernel
    }

    pub fn degree(&self) -> usize {
        self.degree
    }
}

impl Smoother for ModifiedSinc {
    fn smooth(&self, series: &[f64]) -> Result<Vec<f64>> {
        let n = series.len();
        let m = self.half_width;
        let out = (0..n)
            .map(|i| {
                // Samples outside [0, n) contribute nothing (zero padding).
                self.kernel
                    .iter()
                    .enumerate()
                    .filter_map(|(k, &w)| {
                        let idx = (i + m).checked_sub(k)?;
                        series.get(idx).map(|&x| x * w)
                    })
                    .sum()
            })
            .collect();
        Ok(out)
    }
}
