//! Vector utility functions like linspace(), diff(), midpoints()

/// `n` evenly spaced values from `start` to `stop` (both inclusive).
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut out: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
            // Pin the end point so it is not affected by rounding
            out[n - 1] = stop;
            out
        }
    }
}

/// Differences between consecutive elements.
pub fn diff(v: &[f64]) -> Vec<f64> {
    v.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Midpoints between consecutive elements.
pub fn midpoints(v: &[f64]) -> Vec<f64> {
    v.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
}

/// Returns true if every element is larger than the previous one.
pub fn is_strictly_increasing(v: &[f64]) -> bool {
    v.windows(2).all(|w| w[0] < w[1])
}
