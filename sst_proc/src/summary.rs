//! Per-axis damping statistics over classified strokes.

use serde::{Deserialize, Serialize};

use crate::histogram::percentile;
use crate::stroke::{Stroke, Strokes};

/// Velocity statistics in mm/s; band shares are percentages of all samples
/// inside compressions and rebounds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocitySummary {
    pub avg_compression: Option<f64>,
    pub max_compression: Option<f64>,
    pub p95_compression: Option<f64>,
    pub avg_rebound: Option<f64>,
    /// Most negative rebound velocity.
    pub max_rebound: Option<f64>,
    /// Negative, like the rebound velocities themselves.
    pub p95_rebound: Option<f64>,
    pub low_speed_compression: f64,
    pub high_speed_compression: f64,
    pub low_speed_rebound: f64,
    pub high_speed_rebound: f64,
}

struct DirectionStats {
    avg: Option<f64>,
    peak: Option<f64>,
    p95: Option<f64>,
}

fn direction_stats(
    strokes: &[Stroke],
    velocity: &[f64],
    keep: impl Fn(f64) -> bool,
    pick: impl Fn(f64, f64) -> f64,
) -> DirectionStats {
    let sum: f64 = strokes.iter().map(|s| s.stat.sum_velocity).sum();
    let count: usize = strokes.iter().map(|s| s.stat.count).sum();
    let peak = strokes
        .iter()
        .map(|s| s.stat.max_velocity)
        .reduce(|a, b| pick(a, b));
    let magnitudes: Vec<f64> = strokes
        .iter()
        .filter_map(|s| velocity.get(s.start..=s.end))
        .flatten()
        .copied()
        .filter(|&v| keep(v))
        .map(f64::abs)
        .collect();
    DirectionStats {
        avg: (count > 0).then(|| sum / count as f64),
        peak,
        p95: (!magnitudes.is_empty()).then(|| percentile(&magnitudes, 0.95)),
    }
}

impl VelocitySummary {
    pub fn from_strokes(strokes: &Strokes, velocity: &[f64], high_speed_threshold: f64) -> Self {
        let comp = direction_stats(&strokes.compressions, velocity, |v| v > 0.0, f64::max);
        let reb = direction_stats(&strokes.rebounds, velocity, |v| v < 0.0, f64::min);

        let samples_of = |list: &[Stroke]| -> Vec<f64> {
            list.iter()
                .filter_map(|s| velocity.get(s.start..=s.end))
                .flatten()
                .copied()
                .collect()
        };
        let comp_samples = samples_of(&strokes.compressions);
        let reb_samples = samples_of(&strokes.rebounds);
        let total = comp_samples.len() + reb_samples.len();
        let lsc = comp_samples
            .iter()
            .filter(|&&v| v < high_speed_threshold)
            .count();
        let hsc = comp_samples.len() - lsc;
        let lsr = reb_samples
            .iter()
            .filter(|&&v| v > -high_speed_threshold)
            .count();
        let hsr = reb_samples.len() - lsr;
        let share = |n: usize| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64 * 100.0
            }
        };

        Self {
            avg_compression: comp.avg,
            max_compression: comp.peak,
            p95_compression: comp.p95,
            avg_rebound: reb.avg,
            max_rebound: reb.peak,
            p95_rebound: reb.p95.map(|m| -m),
            low_speed_compression: share(lsc),
            high_speed_compression: share(hsc),
            low_speed_rebound: share(lsr),
            high_speed_rebound: share(hsr),
        }
    }
}
