//! Raw sensor reading to stroke (mm) conversion.
//!
//! The pipeline only depends on the [`Calibration`] trait. [`CalibrationSpec`]
//! is the serializable form used by setup files.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("raw value {0} is not finite")]
    NonFinite(f64),
    #[error("calibration table needs at least 2 points, has {0}")]
    TooFewPoints(usize),
    #[error("calibration produced non-finite output for raw value {0}")]
    Diverged(f64),
}

pub trait Calibration: Send + Sync {
    fn evaluate(&self, raw: f64) -> Result<f64, CalibrationError>;
}

/// `value = raw * scale + offset`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearCalibration {
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl Calibration for LinearCalibration {
    fn evaluate(&self, raw: f64) -> Result<f64, CalibrationError> {
        if !raw.is_finite() {
            return Err(CalibrationError::NonFinite(raw));
        }
        let out = raw.mul_add(self.scale, self.offset);
        if out.is_finite() {
            Ok(out)
        } else {
            Err(CalibrationError::Diverged(raw))
        }
    }
}

/// Piecewise-linear lookup over `(raw, value)` points, extrapolating the end
/// segments outside the table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[f64; 2]>", into = "Vec<[f64; 2]>")]
pub struct TableCalibration {
    points: Vec<[f64; 2]>,
}

impl TableCalibration {
    /// Sorts `points` by raw value; duplicate raw values keep the first.
    pub fn new(mut points: Vec<[f64; 2]>) -> Result<Self, CalibrationError> {
        if let Some(bad) = points.iter().flatten().find(|v| !v.is_finite()) {
            return Err(CalibrationError::NonFinite(*bad));
        }
        points.sort_by(|a, b| a[0].total_cmp(&b[0]));
        points.dedup_by(|b, a| a[0] == b[0]);
        if points.len() < 2 {
            return Err(CalibrationError::TooFewPoints(points.len()));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }
}

impl TryFrom<Vec<[f64; 2]>> for TableCalibration {
    type Error = CalibrationError;

    fn try_from(points: Vec<[f64; 2]>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<TableCalibration> for Vec<[f64; 2]> {
    fn from(table: TableCalibration) -> Self {
        table.points
    }
}

impl Calibration for TableCalibration {
    fn evaluate(&self, raw: f64) -> Result<f64, CalibrationError> {
        if !raw.is_finite() {
            return Err(CalibrationError::NonFinite(raw));
        }
        let last = self.points.len() - 1;
        let i = self
            .points
            .partition_point(|p| p[0] <= raw)
            .clamp(1, last);
        let [x0, y0] = self.points[i - 1];
        let [x1, y1] = self.points[i];
        Ok(y0 + (raw - x0) * (y1 - y0) / (x1 - x0))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationSpec {
    Linear(LinearCalibration),
    Table { points: TableCalibration },
}

impl Calibration for CalibrationSpec {
    fn evaluate(&self, raw: f64) -> Result<f64, CalibrationError> {
        match self {
            CalibrationSpec::Linear(c) => c.evaluate(raw),
            CalibrationSpec::Table { points } => points.evaluate(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_linear() {
        let c = LinearCalibration {
            scale: 0.5,
            offset: -2.0,
        };
        assert_eq!(c.evaluate(10.0).unwrap(), 3.0);
        assert!(matches!(
            c.evaluate(f64::NAN),
            Err(CalibrationError::NonFinite(_))
        ));
    }

    #[test]
    fn test_table_interpolates_and_extrapolates() {
        let t = TableCalibration::new(vec![[100.0, 10.0], [0.0, 0.0], [200.0, 40.0]]).unwrap();
        assert_eq!(t.points()[0], [0.0, 0.0]);
        assert_abs_diff_eq!(t.evaluate(50.0).unwrap(), 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.evaluate(100.0).unwrap(), 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.evaluate(150.0).unwrap(), 25.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.evaluate(-10.0).unwrap(), -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.evaluate(250.0).unwrap(), 55.0, epsilon = 1e-12);
    }

    #[test]
    fn test_table_rejects_degenerate() {
        assert_eq!(
            TableCalibration::new(vec![[1.0, 1.0]]),
            Err(CalibrationError::TooFewPoints(1))
        );
        assert_eq!(
            TableCalibration::new(vec![[1.0, 1.0], [1.0, 2.0]]),
            Err(CalibrationError::TooFewPoints(1))
        );
        assert!(TableCalibration::new(vec![[0.0, 0.0], [f64::INFINITY, 1.0]]).is_err());
    }

    #[test]
    fn test_calibration_from_json() {
        let lin: CalibrationSpec =
            serde_json::from_str(r#"{"kind": "linear", "scale": 0.1}"#).unwrap();
        assert_abs_diff_eq!(lin.evaluate(20.0).unwrap(), 2.0, epsilon = 1e-12);

        let table: CalibrationSpec =
            serde_json::from_str(r#"{"kind": "table", "points": [[0, 0], [4096, 80]]}"#).unwrap();
        assert_abs_diff_eq!(table.evaluate(2048.0).unwrap(), 40.0);

        let bad = serde_json::from_str::<CalibrationSpec>(r#"{"kind": "table", "points": [[0, 0]]}"#);
        assert!(bad.is_err());
    }
}
