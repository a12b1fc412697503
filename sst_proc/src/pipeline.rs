//! Recording-level orchestration: raw samples in, [`Processed`] out.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::airtime::{detect_airtimes, Airtime};
use crate::calibration::Calibration;
use crate::config::{CalibrationPolicy, PipelineConfig};
use crate::derivative::derivative;
use crate::histogram::{min_max, percentile, travel_bins, velocity_bins};
use crate::linkage::Linkage;
use crate::stroke::{classify, segment, Strokes};
use crate::summary::VelocitySummary;
use crate::{Result, SstError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Front,
    Rear,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::Front => "front",
            Axis::Rear => "rear",
        })
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Sample types a recording may arrive in.
pub trait RawSample: Copy + Send + Sync + sealed::Sealed {
    fn to_f64(self) -> f64;
}

macro_rules! impl_raw_sample {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}
            impl RawSample for $t {
                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_raw_sample!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub name: String,
    pub version: u8,
    /// Hz
    pub sample_rate: u16,
    /// Unix seconds.
    pub timestamp: i64,
}

impl Meta {
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.timestamp, 0)
    }
}

/// Bike setup a recording is processed against.
#[derive(Clone, Copy)]
pub struct SetupData<'a> {
    pub linkage: &'a Linkage,
    pub front_calibration: &'a dyn Calibration,
    pub rear_calibration: &'a dyn Calibration,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    /// At least one compression or rebound was found.
    pub present: bool,
    pub travel: Vec<f64>,
    pub velocity: Vec<f64>,
    pub strokes: Strokes,
    pub travel_bins: Vec<f64>,
    pub velocity_bins: Vec<f64>,
    pub fine_velocity_bins: Vec<f64>,
    pub global_max_travel: f64,
    pub global_p95_travel: f64,
    pub global_avg_travel: f64,
    pub velocity_summary: VelocitySummary,
    pub dropped_segments: usize,
    pub calibration_fallbacks: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Processed {
    pub meta: Meta,
    pub front: Suspension,
    pub rear: Suspension,
    pub linkage: Linkage,
    pub airtimes: Vec<Airtime>,
    /// SHA-256 of the serialized [`PipelineConfig`].
    pub config_hash: String,
}

/// Cooperative cancellation shared between a caller and running pipelines.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SstError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub fn process_recording<T: RawSample>(
    front: &[T],
    rear: &[T],
    meta: &Meta,
    setup: &SetupData<'_>,
    config: &PipelineConfig,
) -> Result<Processed> {
    process_recording_with_cancel(front, rear, meta, setup, config, &CancelToken::default())
}

pub fn process_recording_with_cancel<T: RawSample>(
    front: &[T],
    rear: &[T],
    meta: &Meta,
    setup: &SetupData<'_>,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<Processed> {
    if front.is_empty() && rear.is_empty() {
        return Err(SstError::NoRecords);
    }
    config.validate()?;
    cancel.check()?;
    debug!(
        name = %meta.name,
        recorded_at = ?meta.recorded_at(),
        front = front.len(),
        rear = rear.len(),
        smoother = config.smoother.id(),
        "processing recording"
    );

    let run_front = || {
        process_axis(
            Axis::Front,
            front,
            setup.front_calibration,
            setup.linkage,
            meta.sample_rate,
            config,
            cancel,
        )
    };
    let run_rear = || {
        process_axis(
            Axis::Rear,
            rear,
            setup.rear_calibration,
            setup.linkage,
            meta.sample_rate,
            config,
            cancel,
        )
    };
    let (front, rear) = if config.parallel_axes {
        rayon::join(run_front, run_rear)
    } else {
        (run_front(), run_rear())
    };
    let (front, rear) = (front?, rear?);

    cancel.check()?;
    let airtimes = if front.present && rear.present {
        detect_airtimes(
            &front.strokes.idlings,
            setup.linkage.max_front_travel,
            &rear.strokes.idlings,
            setup.linkage.max_rear_travel,
            meta.sample_rate,
            config,
        )
    } else {
        Vec::new()
    };

    Ok(Processed {
        meta: meta.clone(),
        front,
        rear,
        linkage: setup.linkage.clone(),
        airtimes,
        config_hash: config.params_hash_sha256()?,
    })
}

fn process_axis<T: RawSample>(
    axis: Axis,
    samples: &[T],
    calibration: &dyn Calibration,
    linkage: &Linkage,
    sample_rate: u16,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<Suspension> {
    if samples.is_empty() {
        return Ok(Suspension::default());
    }
    cancel.check()?;

    let max_travel = match axis {
        Axis::Front => linkage.max_front_travel,
        Axis::Rear => linkage.max_rear_travel,
    };
    let mut fallbacks = 0usize;
    let mut travel = Vec::with_capacity(samples.len());
    for (index, raw) in samples.iter().map(|s| s.to_f64()).enumerate() {
        let stroke = match calibration.evaluate(raw) {
            Ok(v) => v,
            Err(source) => match config.calibration_policy {
                CalibrationPolicy::Reject => {
                    return Err(SstError::Calibration {
                        axis,
                        index,
                        source,
                    })
                }
                CalibrationPolicy::UseRaw => {
                    fallbacks += 1;
                    raw
                }
            },
        };
        let wheel = match axis {
            Axis::Front => linkage.front_wheel_travel(stroke),
            Axis::Rear => linkage.rear_wheel_travel(stroke),
        };
        travel.push(wheel.max(0.0).min(max_travel));
    }
    if fallbacks > 0 {
        warn!(%axis, fallbacks, "calibration failed for some samples, used raw values");
    }

    cancel.check()?;
    let global_max_travel = min_max(&travel).map_or(0.0, |(_, hi)| hi);
    let global_p95_travel = percentile(&travel, 0.95);
    let global_avg_travel = travel.iter().sum::<f64>() / travel.len() as f64;
    let (travel_edges, travel_idx) = travel_bins(&travel, max_travel, config.travel_hist_bins);

    cancel.check()?;
    let velocity = velocity_of(axis, &travel, sample_rate, config);

    cancel.check()?;
    let (velocity_edges, velocity_idx) = velocity_bins(&velocity, config.velocity_hist_step);
    let (fine_edges, fine_idx) = velocity_bins(&velocity, config.velocity_hist_step_fine);

    cancel.check()?;
    let segments = segment(&velocity, &travel, max_travel, sample_rate, config)?;
    let classification = classify(segments, config);
    let present = classification.strokes.has_motion();
    let strokes = if present {
        classification
            .strokes
            .with_digitized(&travel_idx, &velocity_idx, &fine_idx)
    } else {
        classification.strokes
    };
    debug!(
        %axis,
        present,
        compressions = strokes.compressions.len(),
        rebounds = strokes.rebounds.len(),
        idlings = strokes.idlings.len(),
        dropped = classification.dropped,
        "strokes classified"
    );
    let velocity_summary =
        VelocitySummary::from_strokes(&strokes, &velocity, config.high_speed_threshold);

    Ok(Suspension {
        present,
        travel,
        velocity,
        strokes,
        travel_bins: travel_edges,
        velocity_bins: velocity_edges,
        fine_velocity_bins: fine_edges,
        global_max_travel,
        global_p95_travel,
        global_avg_travel,
        velocity_summary,
        dropped_segments: classification.dropped,
        calibration_fallbacks: fallbacks,
    })
}

/// Smoothed travel derivative, or all zeros when it cannot be computed.
fn velocity_of(axis: Axis, travel: &[f64], sample_rate: u16, config: &PipelineConfig) -> Vec<f64> {
    let n = travel.len();
    let min_len = config.smoother.min_len();
    if n < min_len {
        warn!(%axis, samples = n, min_len, "too few samples to smooth, using zero velocity");
        return vec![0.0; n];
    }
    if sample_rate == 0 {
        warn!(%axis, "sample rate is zero, using zero velocity");
        return vec![0.0; n];
    }
    let smoothed = config
        .smoother
        .build(n)
        .and_then(|smoother| smoother.smooth(travel))
        .and_then(|smoothed| derivative(&smoothed, sample_rate));
    match smoothed {
        Ok(v) => v,
        Err(err) => {
            warn!(%axis, error = %err, "smoothing failed, using zero velocity");
            vec![0.0; n]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationError, LinearCalibration};

    struct FailsAbove(f64);

    impl Calibration for FailsAbove {
        fn evaluate(&self, raw: f64) -> std::result::Result<f64, CalibrationError> {
            if raw > self.0 {
                Err(CalibrationError::Diverged(raw))
            } else {
                Ok(raw)
            }
        }
    }

    const IDENTITY: LinearCalibration = LinearCalibration {
        scale: 1.0,
        offset: 0.0,
    };

    fn linkage() -> Linkage {
        let table: String = (0..60).map(|i| format!("{i},2.0\n")).collect();
        Linkage::from_table("test", 90.0, 160.0, 50.0, &table).unwrap()
    }

    fn meta(sample_rate: u16) -> Meta {
        Meta {
            name: "unit".into(),
            version: 3,
            sample_rate,
            timestamp: 1_700_000_000,
        }
    }

    fn ramp(n: usize, amplitude: f64) -> Vec<f64> {
        // up then down, one stroke each way
        (0..n)
            .map(|i| {
                let x = i as f64 / (n - 1) as f64;
                amplitude * (1.0 - (2.0 * x - 1.0).abs())
            })
            .collect()
    }

    #[test]
    fn test_raw_sample_conversions() {
        assert_eq!(200u8.to_f64(), 200.0);
        assert_eq!((-3i16).to_f64(), -3.0);
        assert_eq!(1.5f32.to_f64(), 1.5);
        assert_eq!(u64::MAX.to_f64(), u64::MAX as f64);
    }

    #[test]
    fn test_meta_recorded_at() {
        let at = meta(100).recorded_at().unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_no_records() {
        let l = linkage();
        let setup = SetupData {
            linkage: &l,
            front_calibration: &IDENTITY,
            rear_calibration: &IDENTITY,
        };
        let empty: [f64; 0] = [];
        assert!(matches!(
            process_recording(&empty, &empty, &meta(100), &setup, &PipelineConfig::default()),
            Err(SstError::NoRecords)
        ));
    }

    #[test]
    fn test_single_axis_and_clamping() {
        let l = linkage();
        let setup = SetupData {
            linkage: &l,
            front_calibration: &IDENTITY,
            rear_calibration: &IDENTITY,
        };
        let mut front = ramp(400, 120.0);
        front[10] = -5.0;
        front[200] = 500.0;
        let p = process_recording(&front, &[], &meta(200), &setup, &PipelineConfig::default())
            .unwrap();
        assert!(p.front.present);
        assert!(!p.rear.present);
        assert!(p.rear.travel.is_empty());
        assert!(p.airtimes.is_empty());
        assert_eq!(p.front.travel[10], 0.0);
        assert_eq!(p.front.travel[200], l.max_front_travel);
        assert_eq!(p.front.travel.len(), p.front.velocity.len());
        assert_eq!(p.front.travel_bins.len(), 41);
        assert!(!p.front.strokes.compressions.is_empty());
        assert!(!p.front.strokes.rebounds.is_empty());
        let c = &p.front.strokes.compressions[0];
        assert_eq!(c.digitized_travel.len(), c.end - c.start + 1);
        assert_eq!(p.config_hash.len(), 64);
    }

    #[test]
    fn test_flat_axis_is_not_present() {
        let l = linkage();
        let setup = SetupData {
            linkage: &l,
            front_calibration: &IDENTITY,
            rear_calibration: &IDENTITY,
        };
        let front = vec![20u16; 300];
        let rear = vec![10u16; 300];
        let p = process_recording(&front, &rear, &meta(100), &setup, &PipelineConfig::default())
            .unwrap();
        assert!(!p.front.present);
        assert!(!p.rear.present);
        assert_eq!(p.front.travel.len(), 300);
        assert_eq!(p.front.strokes.idlings.len(), 1);
        assert!(p.front.velocity.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_zero_sample_rate_falls_back() {
        let l = linkage();
        let setup = SetupData {
            linkage: &l,
            front_calibration: &IDENTITY,
            rear_calibration: &IDENTITY,
        };
        let front = ramp(100, 100.0);
        let p = process_recording(&front, &[], &meta(0), &setup, &PipelineConfig::default())
            .unwrap();
        assert!(p.front.velocity.iter().all(|&v| v == 0.0));
        assert!(!p.front.present);
    }

    #[test]
    fn test_calibration_policy() {
        let l = linkage();
        let failing = FailsAbove(50.0);
        let setup = SetupData {
            linkage: &l,
            front_calibration: &failing,
            rear_calibration: &IDENTITY,
        };
        let front = ramp(200, 100.0);

        let p = process_recording(&front, &[], &meta(100), &setup, &PipelineConfig::default())
            .unwrap();
        assert!(p.front.calibration_fallbacks > 0);

        let config = PipelineConfig {
            calibration_policy: CalibrationPolicy::Reject,
            ..PipelineConfig::default()
        };
        let err = process_recording(&front, &[], &meta(100), &setup, &config).unwrap_err();
        assert!(matches!(
            err,
            SstError::Calibration {
                axis: Axis::Front,
                ..
            }
        ));
    }

    #[test]
    fn test_cancelled() {
        let l = linkage();
        let setup = SetupData {
            linkage: &l,
            front_calibration: &IDENTITY,
            rear_calibration: &IDENTITY,
        };
        let token = CancelToken::new();
        token.cancel();
        let front = ramp(100, 100.0);
        let res = process_recording_with_cancel(
            &front,
            &[],
            &meta(100),
            &setup,
            &PipelineConfig::default(),
            &token,
        );
        assert!(matches!(res, Err(SstError::Cancelled)));

        let expired = CancelToken::with_timeout(Duration::ZERO);
        assert!(expired.is_cancelled());
        assert!(!CancelToken::new().is_cancelled());
    }

    #[test]
    fn test_parallel_and_serial_agree() {
        let l = linkage();
        let setup = SetupData {
            linkage: &l,
            front_calibration: &IDENTITY,
            rear_calibration: &IDENTITY,
        };
        let front = ramp(300, 120.0);
        let rear = ramp(300, 40.0);
        let serial = PipelineConfig {
            parallel_axes: false,
            ..PipelineConfig::default()
        };
        let a = process_recording(&front, &rear, &meta(100), &setup, &serial).unwrap();
        let b = process_recording(&front, &rear, &meta(100), &setup, &PipelineConfig::default())
            .unwrap();
        assert_eq!(a.front, b.front);
        assert_eq!(a.rear, b.rear);
        assert_eq!(a.config_hash, b.config_hash);
    }

    #[test]
    fn test_tiny_histogram_step_is_rejected() {
        let l = linkage();
        let setup = SetupData {
            linkage: &l,
            front_calibration: &IDENTITY,
            rear_calibration: &IDENTITY,
        };
        let config = PipelineConfig {
            velocity_hist_step_fine: 1e-12,
            ..PipelineConfig::default()
        };
        let res = process_recording(&ramp(300, 120.0), &[], &meta(100), &setup, &config);
        assert!(matches!(res, Err(SstError::InvalidParameter(_))));
    }
}
