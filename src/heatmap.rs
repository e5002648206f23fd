use chrono::Datelike;
use std::collections::BTreeMap;

use crate::price_series::PriceSeries;

/// Mean daily close-to-close return for each month of one year.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyReturns {
    pub year: i32,
    /// Index 0 is January. `None` when the month has no daily return.
    pub months: [Option<f64>; 12],
}

/// Year x month matrix of mean daily returns, oldest year first. The first
/// bar has no previous close and contributes nothing.
pub fn monthly_mean_returns(series: &PriceSeries) -> Vec<MonthlyReturns> {
    let mut sums: BTreeMap<(i32, u32), (f64, u32)> = BTreeMap::new();
    for pair in series.bars().windows(2) {
        let (prev, bar) = (&pair[0], &pair[1]);
        let daily = (bar.close - prev.close) / prev.close;
        if !daily.is_finite() {
            continue;
        }
        let entry = sums.entry((bar.date.year(), bar.date.month0())).or_insert((0.0, 0));
        entry.0 += daily;
        entry.1 += 1;
    }

    let mut rows: Vec<MonthlyReturns> = Vec::new();
    for ((year, month0), (sum, count)) in sums {
        if rows.last().map(|r| r.year) != Some(year) {
            rows.push(MonthlyReturns {
                year,
                months: [None; 12],
            });
        }
        if let Some(row) = rows.last_mut() {
            row.months[month0 as usize] = Some(sum / f64::from(count));
        }
    }
    rows
}
