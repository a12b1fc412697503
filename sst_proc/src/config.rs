use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::histogram::MAX_HIST_BINS;
use crate::smoothing::{ModifiedSinc, Smoother, WhittakerHenderson, WH_MAX_ORDER};
use crate::{Result, SstError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmootherConfig {
    /// Penalised least squares on the `order`-th difference.
    WhittakerHenderson { order: usize, lambda: f64 },
    /// Normalised sinc kernel with a Gaussian window.
    ModifiedSinc {
        degree: usize,
        half_width: usize,
        alpha: f64,
    },
}

impl Default for SmootherConfig {
    fn default() -> Self {
        // ~27.5 Hz -3 dB cutoff at the usual ~860 Hz sample rate.
        SmootherConfig::WhittakerHenderson {
            order: 2,
            lambda: 260.0,
        }
    }
}

impl SmootherConfig {
    pub fn id(&self) -> &'static str {
        match self {
            SmootherConfig::WhittakerHenderson { .. } => "whittaker_henderson",
            SmootherConfig::ModifiedSinc { .. } => "modified_sinc",
        }
    }

    /// Shortest series the smoother accepts.
    pub fn min_len(&self) -> usize {
        match self {
            SmootherConfig::WhittakerHenderson { order, .. } => order + 1,
            SmootherConfig::ModifiedSinc { .. } => 1,
        }
    }

    /// Builds a smoother for series of exactly `len` samples.
    pub fn build(&self, len: usize) -> Result<Box<dyn Smoother>> {
        match *self {
            SmootherConfig::WhittakerHenderson { order, lambda } => {
                Ok(Box::new(WhittakerHenderson::new(len, order, lambda)?))
            }
            SmootherConfig::ModifiedSinc {
                degree,
                half_width,
                alpha,
            } => Ok(Box::new(ModifiedSinc::new(degree, half_width, alpha)?)),
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            SmootherConfig::WhittakerHenderson { order, lambda } => {
                if !(1..=WH_MAX_ORDER).contains(&order) {
                    return Err(SstError::InvalidParameter(format!(
                        "smoother order {order} outside 1..={WH_MAX_ORDER}"
                    )));
                }
                if !lambda.is_finite() || lambda < 0.0 {
                    return Err(SstError::InvalidParameter(format!(
                        "smoother lambda must be finite and >= 0, got {lambda}"
                    )));
                }
            }
            SmootherConfig::ModifiedSinc {
                degree,
                half_width,
                alpha,
            } => {
                if half_width < degree / 2 + 2 {
                    return Err(SstError::InvalidParameter(format!(
                        "sinc half width {half_width} too small for degree {degree}"
                    )));
                }
                if !alpha.is_finite() || alpha <= 0.0 {
                    return Err(SstError::InvalidParameter(format!(
                        "sinc alpha must be finite and > 0, got {alpha}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// What to do when the calibration collaborator rejects a raw sample.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPolicy {
    /// Substitute the raw value and keep going.
    UseRaw,
    /// Fail the whole recording.
    Reject,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        CalibrationPolicy::UseRaw
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// mm/s; velocities at or below this count as zero.
    pub velocity_zero_threshold: f64,
    /// s; minimum duration of an idle stroke.
    pub idle_duration_threshold: f64,
    /// mm; minimum |length| of a compression or rebound.
    pub stroke_length_threshold: f64,
    /// mm; bottom-out is travel above `max_travel - bottomout_threshold`.
    pub bottomout_threshold: f64,
    /// s; minimum duration of an airtime candidate.
    pub airtime_duration_threshold: f64,
    /// mm/s; the stroke after a candidate must reach this velocity.
    pub airtime_velocity_threshold: f64,
    /// Fraction of the longer candidate both axes must share.
    pub airtime_overlap_threshold: f64,
    /// Candidate mean travel must stay below `max_travel * ratio`.
    pub airtime_travel_mean_ratio: f64,
    pub travel_hist_bins: usize,
    /// mm/s
    pub velocity_hist_step: f64,
    /// mm/s
    pub velocity_hist_step_fine: f64,
    /// mm/s; splits low- from high-speed damping in the velocity summary.
    pub high_speed_threshold: f64,
    pub smoother: SmootherConfig,
    pub calibration_policy: CalibrationPolicy,
    /// Process front and rear on separate rayon tasks.
    pub parallel_axes: bool,
}

/// mm/s; finer velocity histograms are rejected.
pub const MIN_VELOCITY_HIST_STEP: f64 = 0.01;

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            velocity_zero_threshold: 0.02,
            idle_duration_threshold: 0.10,
            stroke_length_threshold: 1.5,
            bottomout_threshold: 2.5,
            airtime_duration_threshold: 0.20,
            airtime_velocity_threshold: 500.0,
            airtime_overlap_threshold: 0.5,
            airtime_travel_mean_ratio: 0.04,
            travel_hist_bins: 40,
            velocity_hist_step: 100.0,
            velocity_hist_step_fine: 15.0,
            high_speed_threshold: 200.0,
            smoother: SmootherConfig::default(),
            calibration_policy: CalibrationPolicy::default(),
            parallel_axes: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("velocity_zero_threshold", self.velocity_zero_threshold),
            ("idle_duration_threshold", self.idle_duration_threshold),
            ("stroke_length_threshold", self.stroke_length_threshold),
            ("bottomout_threshold", self.bottomout_threshold),
            ("airtime_duration_threshold", self.airtime_duration_threshold),
            ("airtime_velocity_threshold", self.airtime_velocity_threshold),
            ("airtime_travel_mean_ratio", self.airtime_travel_mean_ratio),
            ("high_speed_threshold", self.high_speed_threshold),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(SstError::InvalidParameter(format!(
                    "{name} must be finite and >= 0, got {value}"
                )));
            }
        }
        for (name, value) in [
            ("velocity_hist_step", self.velocity_hist_step),
            ("velocity_hist_step_fine", self.velocity_hist_step_fine),
        ] {
            if !value.is_finite() || value < MIN_VELOCITY_HIST_STEP {
                return Err(SstError::InvalidParameter(format!(
                    "{name} must be finite and >= {MIN_VELOCITY_HIST_STEP}, got {value}"
                )));
            }
        }
        if !(self.airtime_overlap_threshold > 0.0 && self.airtime_overlap_threshold <= 1.0) {
            return Err(SstError::InvalidParameter(format!(
                "airtime_overlap_threshold must be in (0, 1], got {}",
                self.airtime_overlap_threshold
            )));
        }
        if self.travel_hist_bins == 0 || self.travel_hist_bins > MAX_HIST_BINS {
            return Err(SstError::InvalidParameter(format!(
                "travel_hist_bins must be in 1..={MAX_HIST_BINS}, got {}",
                self.travel_hist_bins
            )));
        }
        self.smoother.validate()
    }

    /// Fingerprint of the settings that affect results. Execution settings
    /// such as `parallel_axes` are left out.
    pub fn params_hash_sha256(&self) -> Result<String> {
        let mut value =
            serde_json::to_value(self).map_err(|e| SstError::InvalidParameter(e.to_string()))?;
        if let Some(map) = value.as_object_mut() {
            map.remove("parallel_axes");
        }
        let bytes =
            serde_json::to_vec(&value).map_err(|e| SstError::InvalidParameter(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
