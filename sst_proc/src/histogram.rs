//! Histogram edges and bin assignment for travel and velocity.

use ordered_float::OrderedFloat;

/// Upper bound on the number of bins of any histogram.
pub const MAX_HIST_BINS: usize = 10_000;

/// `num` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Assigns each value to a bin of `edges`.
///
/// Bin `i` is `edges[i] <= v < edges[i + 1]`. Values below the first edge go
/// to bin 0, values at or above the last edge go to the last bin. With fewer
/// than two edges, and for NaN, the result is 0.
pub fn digitize(values: &[f64], edges: &[f64]) -> Vec<usize> {
    if edges.len() < 2 {
        return vec![0; values.len()];
    }
    let last_bin = edges.len() - 2;
    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                return 0;
            }
            edges
                .partition_point(|&e| e <= v)
                .saturating_sub(1)
                .min(last_bin)
        })
        .collect()
}

/// Travel edges spanning `[0, max_travel]` and the bin of every sample.
///
/// A non-positive `max_travel` yields no edges and all samples in bin 0.
pub fn travel_bins(travel: &[f64], max_travel: f64, bins: usize) -> (Vec<f64>, Vec<usize>) {
    if max_travel > 0.0 {
        let edges = linspace(0.0, max_travel, bins + 1);
        let idx = digitize(travel, &edges);
        (edges, idx)
    } else {
        (Vec::new(), vec![0; travel.len()])
    }
}

/// Velocity edges `step` apart, centred so that zero velocity falls in the
/// middle of a bin, plus the bin of every sample.
///
/// At most [`MAX_HIST_BINS`] bins are produced; wider ranges get wider bins.
/// Non-finite velocities yield no edges and all samples in bin 0.
pub fn velocity_bins(velocity: &[f64], step: f64) -> (Vec<f64>, Vec<usize>) {
    let Some((min, max)) = min_max(velocity) else {
        return (Vec::new(), Vec::new());
    };
    let lo = ((min / step).floor() - 0.5) * step;
    let mut hi = ((max / step).floor() + 1.5) * step;
    if !(lo.is_finite() && hi.is_finite() && step > 0.0) {
        return (Vec::new(), vec![0; velocity.len()]);
    }
    if hi <= lo {
        hi = lo + step;
    }
    let span = (hi - lo) / step;
    // float to int casts saturate; infinity lands on the cap too
    let bins = if span.is_finite() {
        (span.floor() as usize).clamp(1, MAX_HIST_BINS)
    } else {
        MAX_HIST_BINS
    };
    let edges = linspace(lo, hi, bins + 1);
    let idx = digitize(velocity, &edges);
    (edges, idx)
}

/// Nearest-rank percentile (`p` in `[0, 1]`); 0 for an empty slice.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<OrderedFloat<f64>> = values.iter().copied().map(OrderedFloat).collect();
    sorted.sort_unstable();
    let n = sorted.len();
    let rank = (p * n as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(n - 1)].0
}

pub(crate) fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_linspace() {
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(3.0, 9.0, 1), vec![3.0]);
        assert_eq!(linspace(0.0, 30.0, 4), vec![0.0, 10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_digitize_boundaries() {
        let edges = [0.0, 10.0, 20.0, 30.0];
        assert_eq!(digitize(&[15.0, 0.0, 30.0], &edges), vec![1, 0, 2]);
        assert_eq!(digitize(&[10.0, 9.999, -5.0, 99.0], &edges), vec![1, 0, 0, 2]);
        assert_eq!(digitize(&[f64::NAN], &edges), vec![0]);
    }

    #[test]
    fn test_digitize_degenerate_edges() {
        assert_eq!(digitize(&[1.0, 2.0], &[5.0]), vec![0, 0]);
        assert_eq!(digitize(&[1.0], &[]), vec![0]);
    }

    #[test]
    fn test_travel_bins() {
        let (edges, idx) = travel_bins(&[0.0, 50.0, 100.0], 100.0, 40);
        assert_eq!(edges.len(), 41);
        assert_eq!(idx, vec![0, 20, 39]);

        let (edges, idx) = travel_bins(&[1.0, 2.0], 0.0, 40);
        assert!(edges.is_empty());
        assert_eq!(idx, vec![0, 0]);
    }

    #[test]
    fn test_velocity_bins_centre_zero() {
        let (edges, idx) = velocity_bins(&[-150.0, 0.0, 250.0], 100.0);
        assert_abs_diff_eq!(edges[0], -250.0);
        assert_abs_diff_eq!(*edges.last().unwrap(), 350.0);
        assert_eq!(edges.len(), 7);
        assert_eq!(idx, vec![1, 2, 5]);
    }

    #[test]
    fn test_velocity_bins_constant_and_empty() {
        let (edges, idx) = velocity_bins(&[0.0, 0.0], 15.0);
        assert_eq!(edges.len(), 3);
        assert_eq!(idx, vec![0, 0]);

        let (edges, idx) = velocity_bins(&[], 15.0);
        assert!(edges.is_empty() && idx.is_empty());
    }

    #[test]
    fn test_velocity_bins_are_bounded() {
        let (edges, idx) = velocity_bins(&[-1e300, 1e300], 1.0);
        assert_eq!(edges.len(), MAX_HIST_BINS + 1);
        assert_eq!(idx, vec![0, MAX_HIST_BINS - 1]);

        let (edges, idx) = velocity_bins(&[-500.0, 0.0, 500.0], 1e-12);
        assert_eq!(edges.len(), MAX_HIST_BINS + 1);
        assert_eq!(idx[0], 0);
        assert_eq!(idx[2], MAX_HIST_BINS - 1);

        let (edges, idx) = velocity_bins(&[f64::INFINITY, 1.0], 10.0);
        assert!(edges.is_empty());
        assert_eq!(idx, vec![0, 0]);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let v: Vec<f64> = (1..=20).rev().map(f64::from).collect();
        assert_eq!(percentile(&v, 0.95), 19.0);
        assert_eq!(percentile(&v, 0.5), 10.0);
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 1.0), 20.0);
        assert_eq!(percentile(&[], 0.95), 0.0);
    }
}
