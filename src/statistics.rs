/// Summary of one window's per-year returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnSummary {
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation. Zero is kept as zero.
    pub std_dev: f64,
    pub positive_count: u32,
    pub total_count: u32,
    pub consistency: f64,
}

/// Reduces a return sample; `None` when the sample is empty.
pub fn summarize(returns: &[f64]) -> Option<ReturnSummary> {
    if returns.is_empty() {
        return None;
    }

    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };

    // A constant sample must report exactly zero; summing first can leave a
    // rounding residue in the mean.
    let std_dev = if sorted[0] == sorted[n - 1] {
        0.0
    } else {
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let variance = sorted.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
        variance.sqrt()
    };

    let positive_count = returns.iter().filter(|&&r| r > 0.0).count() as u32;
    let total_count = n as u32;

    Some(ReturnSummary {
        median,
        min: sorted[0],
        max: sorted[n - 1],
        std_dev,
        positive_count,
        total_count,
        consistency: f64::from(positive_count) / f64::from(total_count),
    })
}
