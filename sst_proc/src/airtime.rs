use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::stroke::Stroke;

/// A span where both wheels left the ground, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Airtime {
    pub start: f64,
    pub end: f64,
}

/// True when the shared index range of `a` and `b` is at least `threshold`
/// times the longer of the two. Symmetric in its arguments.
pub fn overlaps(a: &Stroke, b: &Stroke, threshold: f64) -> bool {
    let longest = (a.end - a.start).max(b.end - b.start);
    if longest == 0 {
        return false;
    }
    let shared = a.end.min(b.end).saturating_sub(a.start.max(b.start));
    shared as f64 >= threshold * longest as f64
}

fn settled(s: &Stroke, max_travel: f64, ratio: f64) -> bool {
    s.stat.count > 0 && s.stat.sum_travel / (s.stat.count as f64) < max_travel * ratio
}

/// Pairs front and rear airtime candidates into airtime events.
///
/// Each candidate is used at most once. The event covers the intersection of
/// the pair; overlapping events are merged, so the result is sorted and
/// disjoint. Either side being empty yields no events.
pub fn detect_airtimes(
    front: &[Stroke],
    front_max_travel: f64,
    rear: &[Stroke],
    rear_max_travel: f64,
    sample_rate: u16,
    config: &PipelineConfig,
) -> Vec<Airtime> {
    if sample_rate == 0 {
        return Vec::new();
    }
    let ratio = config.airtime_travel_mean_ratio;
    let rear_candidates: Vec<&Stroke> = rear
        .iter()
        .filter(|s| s.air_candidate && settled(s, rear_max_travel, ratio))
        .collect();
    let mut used = vec![false; rear_candidates.len()];

    let rate = f64::from(sample_rate);
    let mut events: Vec<Airtime> = Vec::new();
    for f in front
        .iter()
        .filter(|s| s.air_candidate && settled(s, front_max_travel, ratio))
    {
        let partner = rear_candidates
            .iter()
            .enumerate()
            .find(|(j, r)| !used[*j] && overlaps(f, r, config.airtime_overlap_threshold));
        if let Some((j, r)) = partner {
            used[j] = true;
            events.push(Airtime {
                start: f.start.max(r.start) as f64 / rate,
                end: f.end.min(r.end) as f64 / rate,
            });
        }
    }

    events.sort_by(|a, b| a.start.total_cmp(&b.start));
    let merged = events.into_iter().fold(Vec::<Airtime>::new(), |mut acc, at| {
        match acc.last_mut() {
            Some(prev) if at.start <= prev.end => prev.end = prev.end.max(at.end),
            _ => acc.push(at),
        }
        acc
    });
    debug!(airtimes = merged.len(), "airtime detection done");
    merged
}
