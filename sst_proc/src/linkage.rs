//! Rear linkage kinematics: leverage-ratio table to a cubic shock-to-wheel
//! travel curve.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Result, SstError};

const FIT_DEGREE: usize = 3;
const SVD_EPS: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkageRecord {
    pub shock_travel: f64,
    pub wheel_travel: f64,
    pub leverage_ratio: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Linkage {
    pub name: String,
    /// Degrees from horizontal.
    pub head_angle: f64,
    pub max_front_stroke: f64,
    pub max_rear_stroke: f64,
    /// `(wheel_travel, leverage_ratio)` pairs as given.
    pub leverage_ratio: Vec<[f64; 2]>,
    /// Shock stroke to wheel travel, ascending powers.
    pub shock_wheel_coeffs: Vec<f64>,
    pub max_front_travel: f64,
    pub max_rear_travel: f64,
}

/// Parses `"<wheel_travel>,<leverage_ratio>"` lines and integrates shock
/// travel as the running sum of `1 / leverage_ratio`.
///
/// Blank lines are ignored; malformed lines are skipped with a warning.
/// A zero or non-finite leverage ratio rejects the whole table.
pub fn parse_leverage_ratio_table(raw: &str) -> Result<Vec<LinkageRecord>> {
    let mut records = Vec::new();
    let mut skipped = 0usize;
    let mut shock = 0.0;
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((wheel, ratio)) = parse_pair(line) else {
            warn!(line = lineno + 1, content = line, "skipping malformed leverage ratio line");
            skipped += 1;
            continue;
        };
        if ratio == 0.0 || !ratio.is_finite() || !wheel.is_finite() {
            return Err(SstError::InvalidLinkage(format!(
                "line {}: unusable leverage ratio {ratio} at wheel travel {wheel}",
                lineno + 1
            )));
        }
        records.push(LinkageRecord {
            shock_travel: shock,
            wheel_travel: wheel,
            leverage_ratio: ratio,
        });
        shock += 1.0 / ratio;
    }
    if skipped > 0 {
        debug!(skipped, parsed = records.len(), "leverage ratio table parsed");
    }
    Ok(records)
}

fn parse_pair(line: &str) -> Option<(f64, f64)> {
    let (w, l) = line.split_once(',')?;
    Some((w.trim().parse().ok()?, l.trim().parse().ok()?))
}

/// Least-squares polynomial coefficients (ascending powers) of `y = f(x)`.
fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Result<Vec<f64>> {
    let vandermonde = DMatrix::from_fn(x.len(), degree + 1, |i, j| x[i].powi(j as i32));
    let rhs = DVector::from_column_slice(y);
    let coeffs = vandermonde
        .svd(true, true)
        .solve(&rhs, SVD_EPS)
        .map_err(|e| SstError::InvalidLinkage(format!("polynomial fit failed: {e}")))?;
    if coeffs.iter().any(|c| !c.is_finite()) {
        return Err(SstError::InvalidLinkage(
            "polynomial fit produced non-finite coefficients".into(),
        ));
    }
    Ok(coeffs.iter().copied().collect())
}

fn horner(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

impl Linkage {
    pub fn new(
        name: impl Into<String>,
        head_angle: f64,
        max_front_stroke: f64,
        max_rear_stroke: f64,
        records: &[LinkageRecord],
    ) -> Result<Self> {
        if records.len() <= FIT_DEGREE {
            return Err(SstError::InsufficientData {
                required: FIT_DEGREE + 1,
                available: records.len(),
            });
        }
        if let Some(bad) = records
            .iter()
            .find(|r| r.leverage_ratio == 0.0 || !r.leverage_ratio.is_finite())
        {
            return Err(SstError::InvalidLinkage(format!(
                "unusable leverage ratio {} at wheel travel {}",
                bad.leverage_ratio, bad.wheel_travel
            )));
        }

        let shock: Vec<f64> = records.iter().map(|r| r.shock_travel).collect();
        let wheel: Vec<f64> = records.iter().map(|r| r.wheel_travel).collect();
        let shock_wheel_coeffs = polyfit(&shock, &wheel, FIT_DEGREE)?;

        let max_rear_travel = horner(&shock_wheel_coeffs, max_rear_stroke);
        let max_front_travel = head_angle.to_radians().sin() * max_front_stroke;
        Ok(Self {
            name: name.into(),
            head_angle,
            max_front_stroke,
            max_rear_stroke,
            leverage_ratio: records
                .iter()
                .map(|r| [r.wheel_travel, r.leverage_ratio])
                .collect(),
            shock_wheel_coeffs,
            max_front_travel,
            max_rear_travel,
        })
    }

    /// Parses and fits a raw leverage-ratio table in one step.
    pub fn from_table(
        name: impl Into<String>,
        head_angle: f64,
        max_front_stroke: f64,
        max_rear_stroke: f64,
        raw: &str,
    ) -> Result<Self> {
        let records = parse_leverage_ratio_table(raw)?;
        Self::new(name, head_angle, max_front_stroke, max_rear_stroke, &records)
    }

    /// Fork stroke projected onto the vertical wheel axis.
    pub fn front_wheel_travel(&self, stroke: f64) -> f64 {
        stroke * self.head_angle.to_radians().sin()
    }

    pub fn rear_wheel_travel(&self, stroke: f64) -> f64 {
        horner(&self.shock_wheel_coeffs, stroke)
    }
}
