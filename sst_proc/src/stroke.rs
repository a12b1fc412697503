//! Stroke segmentation and classification.
//!
//! Velocity is cut into maximal runs of equal sign ([`raw_segments`]).
//! Neighbouring runs that never leave the near-zero travel band are coalesced
//! ([`segment`]) and the result is labelled compression, rebound or idle
//! ([`classify`]).

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::histogram::{min_max, percentile};
use crate::{Result, SstError};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StrokeStat {
    pub sum_travel: f64,
    pub max_travel: f64,
    pub p95_travel: f64,
    pub sum_velocity: f64,
    /// Peak velocity in the stroke direction (minimum for rebounds).
    pub max_velocity: f64,
    pub p95_velocity_compression: f64,
    /// Magnitude.
    pub p95_velocity_rebound: f64,
    pub bottomouts: usize,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub start: usize,
    /// Inclusive.
    pub end: usize,
    pub length: f64,
    /// Seconds.
    pub duration: f64,
    pub stat: StrokeStat,
    pub digitized_travel: Vec<usize>,
    pub digitized_velocity: Vec<usize>,
    pub fine_digitized_velocity: Vec<usize>,
    pub air_candidate: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Strokes {
    pub compressions: Vec<Stroke>,
    pub rebounds: Vec<Stroke>,
    pub idlings: Vec<Stroke>,
}

/// A maximal run of samples whose velocity has the same sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawSegment {
    pub start: usize,
    pub end: usize,
    pub sign: i8,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classification {
    pub strokes: Strokes,
    /// Segments too short to be a stroke and too brief to be idle.
    pub dropped: usize,
}

fn velocity_sign(v: f64, zero_threshold: f64) -> i8 {
    if v.abs() <= zero_threshold {
        0
    } else if v.is_sign_negative() {
        -1
    } else {
        1
    }
}

pub fn raw_segments(velocity: &[f64], zero_threshold: f64) -> Vec<RawSegment> {
    let mut out: Vec<RawSegment> = Vec::new();
    for (i, &v) in velocity.iter().enumerate() {
        let sign = velocity_sign(v, zero_threshold);
        match out.last_mut() {
            Some(seg) if seg.sign == sign => seg.end = i,
            _ => out.push(RawSegment {
                start: i,
                end: i,
                sign,
            }),
        }
    }
    out
}

#[derive(Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    max_travel: f64,
}

/// Splits an axis into strokes covering every sample exactly once.
///
/// A run whose travel stays below `stroke_length_threshold` is absorbed into
/// the previous span when that span also stays below it, so noise around
/// zero velocity near full extension ends up in one idle span. Raw runs
/// alternate velocity sign by construction, so the merge does not look at
/// direction.
pub fn segment(
    velocity: &[f64],
    travel: &[f64],
    max_travel: f64,
    sample_rate: u16,
    config: &PipelineConfig,
) -> Result<Vec<Stroke>> {
    if velocity.len() != travel.len() {
        return Err(SstError::LengthMismatch {
            expected: travel.len(),
            actual: velocity.len(),
        });
    }
    if velocity.is_empty() || sample_rate == 0 {
        return Ok(Vec::new());
    }

    let threshold = config.stroke_length_threshold;
    let spans = raw_segments(velocity, config.velocity_zero_threshold)
        .into_iter()
        .fold(Vec::<Span>::new(), |mut spans, seg| {
            let seg_max = max_of(&travel[seg.start..=seg.end]);
            match spans.last_mut() {
                Some(prev) if seg_max < threshold && prev.max_travel < threshold => {
                    prev.end = seg.end;
                    prev.max_travel = prev.max_travel.max(seg_max);
                }
                _ => spans.push(Span {
                    start: seg.start,
                    end: seg.end,
                    max_travel: seg_max,
                }),
            }
            spans
        });

    let rate = f64::from(sample_rate);
    Ok(spans
        .into_iter()
        .map(|span| {
            build_stroke(
                span.start,
                span.end,
                travel,
                velocity,
                max_travel,
                rate,
                config.bottomout_threshold,
            )
        })
        .collect())
}

fn max_of(values: &[f64]) -> f64 {
    min_max(values).map_or(0.0, |(_, hi)| hi)
}

fn build_stroke(
    start: usize,
    end: usize,
    travel: &[f64],
    velocity: &[f64],
    max_travel: f64,
    rate: f64,
    bottomout_threshold: f64,
) -> Stroke {
    let t = &travel[start..=end];
    let v = &velocity[start..=end];
    let length = travel[end] - travel[start];

    let (v_min, v_max) = min_max(v).unwrap_or((0.0, 0.0));
    let max_velocity = if length < 0.0 { v_min } else { v_max };

    let compression: Vec<f64> = v.iter().copied().filter(|&x| x > 0.0).collect();
    let rebound: Vec<f64> = v.iter().filter(|&&x| x < 0.0).map(|x| -x).collect();

    let limit = max_travel - bottomout_threshold;
    let bottomouts = t
        .iter()
        .zip(std::iter::once(&f64::NEG_INFINITY).chain(t.iter()))
        .filter(|&(&cur, &prev)| cur > limit && prev <= limit)
        .count();

    Stroke {
        start,
        end,
        length,
        duration: t.len() as f64 / rate,
        stat: StrokeStat {
            sum_travel: t.iter().sum(),
            max_travel: max_of(t),
            p95_travel: percentile(t, 0.95),
            sum_velocity: v.iter().sum(),
            max_velocity,
            p95_velocity_compression: percentile(&compression, 0.95),
            p95_velocity_rebound: percentile(&rebound, 0.95),
            bottomouts,
            count: t.len(),
        },
        ..Stroke::default()
    }
}

/// Labels segments in order and flags airtime candidates among idle spans.
pub fn classify(segments: Vec<Stroke>, config: &PipelineConfig) -> Classification {
    let threshold = config.stroke_length_threshold;
    let last = segments.len().saturating_sub(1);
    let next_velocity: Vec<Option<f64>> = (0..segments.len())
        .map(|i| segments.get(i + 1).map(|s| s.stat.max_velocity))
        .collect();

    let mut out = Classification::default();
    for (i, mut s) in segments.into_iter().enumerate() {
        if s.length.abs() < threshold && s.duration >= config.idle_duration_threshold {
            s.air_candidate = i > 0
                && i < last
                && s.stat.max_travel < threshold
                && s.duration >= config.airtime_duration_threshold
                && next_velocity[i].is_some_and(|v| v >= config.airtime_velocity_threshold);
            out.strokes.idlings.push(s);
        } else if s.length >= threshold {
            out.strokes.compressions.push(s);
        } else if s.length <= -threshold {
            out.strokes.rebounds.push(s);
        } else {
            out.dropped += 1;
        }
    }
    out
}

impl Strokes {
    /// Attaches per-sample bin indices to compressions and rebounds.
    pub fn with_digitized(
        mut self,
        travel: &[usize],
        velocity: &[usize],
        fine_velocity: &[usize],
    ) -> Self {
        for s in self
            .compressions
            .iter_mut()
            .chain(self.rebounds.iter_mut())
        {
            let range = s.start..s.end + 1;
            if let (Some(t), Some(v), Some(f)) = (
                travel.get(range.clone()),
                velocity.get(range.clone()),
                fine_velocity.get(range),
            ) {
                s.digitized_travel = t.to_vec();
                s.digitized_velocity = v.to_vec();
                s.fine_digitized_velocity = f.to_vec();
            }
        }
        self
    }

    /// True when there is at least one compression or rebound.
    pub fn has_motion(&self) -> bool {
        !self.compressions.is_empty() || !self.rebounds.is_empty()
    }
}
