//! Suspension telemetry processing library implemented in Rust.
//!
//! Turns raw fork/shock position samples into calibrated travel, velocity,
//! classified strokes, histograms and airtime events. The entry point is
//! [`process_recording`]; every stage is also usable on its own.

use thiserror::Error;

pub mod airtime;
pub mod band;
pub mod calibration;
pub mod config;
pub mod derivative;
pub mod histogram;
pub mod linkage;
pub mod pipeline;
pub mod smoothing;
pub mod stroke;
pub mod summary;

pub use airtime::{detect_airtimes, Airtime};
pub use band::{BandMatrix, CholeskyFactor};
pub use calibration::{
    Calibration, CalibrationError, CalibrationSpec, LinearCalibration, TableCalibration,
};
pub use config::{CalibrationPolicy, PipelineConfig, SmootherConfig};
pub use derivative::derivative;
pub use histogram::{digitize, linspace, travel_bins, velocity_bins};
pub use linkage::{parse_leverage_ratio_table, Linkage, LinkageRecord};
pub use pipeline::{
    process_recording, process_recording_with_cancel, Axis, CancelToken, Meta, Processed,
    RawSample, SetupData, Suspension,
};
pub use smoothing::{ModifiedSinc, Smoother, WhittakerHenderson};
pub use stroke::{
    classify, raw_segments, segment, Classification, RawSegment, Stroke, StrokeStat, Strokes,
};
pub use summary::VelocitySummary;

#[derive(Error, Debug)]
pub enum SstError {
    #[error("front and rear sample arrays are both empty")]
    NoRecords,
    #[error("invalid linkage: {0}")]
    InvalidLinkage(String),
    #[error("insufficient data: need {required} samples, have {available}")]
    InsufficientData { required: usize, available: usize },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("matrix is not positive definite at row {row} (pivot {pivot:e})")]
    NotPositiveDefinite { row: usize, pivot: f64 },
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("entry ({row}, {col}) lies outside bandwidth {bandwidth}")]
    OutOfBand {
        row: usize,
        col: usize,
        bandwidth: usize,
    },
    #[error("sample rate must be non-zero")]
    ZeroSampleRate,
    #[error("{axis} calibration failed at sample {index}: {source}")]
    Calibration {
        axis: Axis,
        index: usize,
        #[source]
        source: CalibrationError,
    },
    #[error("processing cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SstError>;
