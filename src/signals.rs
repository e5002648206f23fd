use chrono::NaiveDate;
use std::fmt;
use ta::Next;
use ta::indicators::SimpleMovingAverage;

use crate::error::{Result, ScreenerError};
use crate::price_series::PriceSeries;

fn sma(period: usize) -> Result<SimpleMovingAverage> {
    SimpleMovingAverage::new(period)
        .map_err(|e| ScreenerError::Config(format!("moving average period {period}: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossKind {
    Golden,
    Death,
}

impl fmt::Display for CrossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrossKind::Golden => f.write_str("Golden Cross"),
            CrossKind::Death => f.write_str("Death Cross"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossEvent {
    pub date: NaiveDate,
    pub kind: CrossKind,
    pub fast: f64,
    pub slow: f64,
}

/// Bars where the fast close average crosses the slow one, newest first.
/// Comparisons start once both averages have a full window behind them.
pub fn find_ma_crosses(series: &PriceSeries, fast: usize, slow: usize) -> Result<Vec<CrossEvent>> {
    let mut fast_ma = sma(fast)?;
    let mut slow_ma = sma(slow)?;
    let warm_up = fast.max(slow) - 1;

    let mut events = Vec::new();
    let mut prev: Option<(f64, f64)> = None;
    for (i, bar) in series.bars().iter().enumerate() {
        let f = fast_ma.next(bar.close);
        let s = slow_ma.next(bar.close);
        if i < warm_up {
            continue;
        }
        if let Some((pf, ps)) = prev {
            let kind = if pf <= ps && f > s {
                Some(CrossKind::Golden)
            } else if pf >= ps && f < s {
                Some(CrossKind::Death)
            } else {
                None
            };
            if let Some(kind) = kind {
                events.push(CrossEvent {
                    date: bar.date,
                    kind,
                    fast: f,
                    slow: s,
                });
            }
        }
        prev = Some((f, s));
    }

    events.reverse();
    Ok(events)
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSpike {
    pub date: NaiveDate,
    pub volume: u64,
    pub average_volume: f64,
    /// Same-day (close - open) / open, in percent.
    pub price_change_pct: f64,
}

/// Bars whose volume exceeds `threshold` times the trailing `lookback`-bar
/// mean (current bar included), newest first.
pub fn find_volume_spikes(series: &PriceSeries, lookback: usize, threshold: f64) -> Result<Vec<VolumeSpike>> {
    let mut mean = sma(lookback)?;
    let mut spikes = Vec::new();
    for (i, bar) in series.bars().iter().enumerate() {
        let average = mean.next(bar.volume as f64);
        if i + 1 < lookback {
            continue;
        }
        if bar.volume as f64 > average * threshold {
            spikes.push(VolumeSpike {
                date: bar.date,
                volume: bar.volume,
                average_volume: average,
                price_change_pct: (bar.close - bar.open) / bar.open * 100.0,
            });
        }
    }
    spikes.reverse();
    Ok(spikes)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendReading {
    pub window: usize,
    /// `None` until the series has `window` bars.
    pub average: Option<f64>,
    pub close_above: Option<bool>,
}

/// Latest close against each trailing average.
pub fn trend_snapshot(series: &PriceSeries, windows: &[usize]) -> Result<Vec<TrendReading>> {
    let last_close = series.bars()[series.len() - 1].close;
    windows
        .iter()
        .map(|&window| {
            let mut ma = sma(window)?;
            let mut latest = 0.0;
            for bar in series.bars() {
                latest = ma.next(bar.close);
            }
            let average = (series.len() >= window).then_some(latest);
            Ok(TrendReading {
                window,
                average,
                close_above: average.map(|a| last_close > a),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_series::PriceBar;
    use crate::price_series::tests::bar;
    use chrono::Duration;

    fn series_from_closes(closes: &[f64]) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar {
                date: start + Duration::days(i as i64),
                ..bar("2022-01-01", c)
            })
            .collect();
        PriceSeries::new("SIG", bars).unwrap()
    }

    #[test]
    fn detects_crosses_newest_first() {
        // Falls, rallies above, then sells off again.
        let closes = [10.0, 9.0, 8.0, 7.0, 8.0, 10.0, 12.0, 11.0, 8.0, 6.0, 5.0];
        let series = series_from_closes(&closes);
        let events = find_ma_crosses(&series, 2, 4).unwrap();
        let kinds: Vec<CrossKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![CrossKind::Death, CrossKind::Golden]);
        assert!(events[0].date > events[1].date);
        assert!(events[1].fast > events[1].slow);
    }

    #[test]
    fn no_crosses_before_warm_up() {
        let series = series_from_closes(&[1.0, 5.0, 1.0]);
        assert!(find_ma_crosses(&series, 2, 4).unwrap().is_empty());
    }

    #[test]
    fn flags_volume_spikes_with_price_change() {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let bars: Vec<PriceBar> = [100u64, 100, 100, 500, 100, 100, 900]
            .iter()
            .enumerate()
            .map(|(i, &v)| PriceBar {
                date: start + Duration::days(i as i64),
                open: 10.0,
                high: 12.0,
                low: 9.0,
                close: 11.0,
                volume: v,
            })
            .collect();
        let series = PriceSeries::new("VOL", bars).unwrap();
        let spikes = find_volume_spikes(&series, 3, 2.0).unwrap();
        assert_eq!(spikes.len(), 2);
        assert_eq!(spikes[0].volume, 900);
        assert_eq!(spikes[1].volume, 500);
        assert!((spikes[1].average_volume - 700.0 / 3.0).abs() < 1e-9);
        assert!((spikes[0].price_change_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn trend_snapshot_needs_full_windows() {
        let series = series_from_closes(&[1.0, 2.0, 3.0, 4.0]);
        let readings = trend_snapshot(&series, &[2, 4, 20]).unwrap();
        assert_eq!(readings[0].average, Some(3.5));
        assert_eq!(readings[0].close_above, Some(true));
        assert_eq!(readings[1].average, Some(2.5));
        assert_eq!(readings[2].average, None);
        assert_eq!(readings[2].close_above, None);
    }

    #[test]
    fn zero_period_is_a_config_error() {
        let series = series_from_closes(&[1.0, 2.0]);
        assert!(matches!(find_volume_spikes(&series, 0, 2.0), Err(ScreenerError::Config(_))));
    }
}
