//! Frame-rate sample summaries

use crate::result::PerformanceStats;

/// Summarize samples. `None` when there are no finite samples.
///
/// The median is the upper middle element for even counts.
pub fn summarize(samples: &[f64]) -> Option<PerformanceStats> {
    let mut sorted: Vec<f64> = samples.iter().copied().filter(|s| s.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let sum: f64 = sorted.iter().sum();
    Some(PerformanceStats {
        samples: sorted.len(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: sum / sorted.len() as f64,
        median: sorted[sorted.len() / 2],
    })
}
