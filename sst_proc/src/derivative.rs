use crate::{Result, SstError};

/// First derivative of a uniformly sampled series, in units per second.
///
/// Interior points use central differences; the first and last points fall
/// back to forward and backward differences respectively.
pub fn derivative(data: &[f64], sample_rate: u16) -> Result<Vec<f64>> {
    let n = data.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    if sample_rate == 0 {
        return Err(SstError::ZeroSampleRate);
    }
    if n == 1 {
        return Ok(vec![0.0]);
    }

    let rate = f64::from(sample_rate);
    let mut out = Vec::with_capacity(n);
    out.push((data[1] - data[0]) * rate);
    out.extend(data.windows(3).map(|w| (w[2] - w[0]) * rate / 2.0));
    out.push((data[n - 1] - data[n - 2]) * rate);
    Ok(out)
}
