use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calendar::{DAYS_IN_YEAR, WindowDefinition, extract_window};
use crate::error::{Result, ScreenerError};
use crate::price_series::{PriceBar, PriceSeries};
use crate::statistics::summarize;
use crate::storage_utils::ScanConfig;

/// Aggregated multi-year behaviour of one calendar window. Field order is
/// the slot table's column order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeasonalSlot {
    pub start_day: u16,
    pub end_day: u16,
    pub median_return: f64,
    pub min_return: f64,
    pub max_return: f64,
    pub standard_deviation: f64,
    pub consistency: f64,
    pub positive_years: u32,
    pub total_years: u32,
    pub window_size: u16,
}

/// Every (start_day, length) pair up to `max_length`, start day varying fastest.
pub fn window_domain(max_length: u16) -> Vec<WindowDefinition> {
    let max_length = max_length.clamp(1, DAYS_IN_YEAR);
    (1..=max_length)
        .flat_map(|length_days| {
            (1..=DAYS_IN_YEAR).map(move |start_day| WindowDefinition {
                start_day,
                length_days,
            })
        })
        .collect()
}

/// Evaluates the window domain for one series on a private thread pool.
pub struct WindowScanner {
    pool: rayon::ThreadPool,
    max_window_days: u16,
}

impl WindowScanner {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("window-scan-{i}"));
        if let Some(threads) = config.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| ScreenerError::Config(format!("scan thread pool: {e}")))?;

        Ok(Self {
            pool,
            max_window_days: config.max_window_days,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Scans every window definition. Definitions without a single yearly
    /// observation are left out; the result is sorted by
    /// `(window_size, start_day)` so identical input gives identical tables.
    pub fn scan(&self, series: &PriceSeries) -> Vec<SeasonalSlot> {
        let years = series.years();
        let domain = window_domain(self.max_window_days);

        let mut slots: Vec<SeasonalSlot> = self.pool.install(|| {
            domain
                .par_iter()
                .filter_map(|&window| evaluate(series, &years, window))
                .collect()
        });
        slots.sort_by_key(|s| (s.window_size, s.start_day));

        log::debug!(
            "{}: {} of {} windows produced observations",
            series.instrument(),
            slots.len(),
            domain.len()
        );
        slots
    }
}

fn evaluate(series: &PriceSeries, years: &[i32], window: WindowDefinition) -> Option<SeasonalSlot> {
    let returns: Vec<f64> = years
        .iter()
        .filter_map(|&year| span_return(extract_window(series, window, year)))
        .collect();

    let summary = summarize(&returns)?;
    Some(SeasonalSlot {
        start_day: window.start_day,
        end_day: window.end_day(),
        median_return: summary.median,
        min_return: summary.min,
        max_return: summary.max,
        standard_deviation: summary.std_dev,
        consistency: summary.consistency,
        positive_years: summary.positive_count,
        total_years: summary.total_count,
        window_size: window.length_days,
    })
}

/// First-to-last close return of a span; malformed spans yield nothing.
fn span_return(span: &[PriceBar]) -> Option<f64> {
    let (first, last) = (span.first()?, span.last()?);
    if !(first.close.is_finite() && first.close > 0.0) {
        return None;
    }
    let r = (last.close - first.close) / first.close;
    r.is_finite().then_some(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_series::tests::bar;
    use chrono::{Datelike, Duration, NaiveDate};

    fn scanner(max_window_days: u16) -> WindowScanner {
        scanner_with_threads(max_window_days, 2)
    }

    fn scanner_with_threads(max_window_days: u16, threads: usize) -> WindowScanner {
        WindowScanner::new(&ScanConfig {
            max_window_days,
            threads: Some(threads),
        })
        .unwrap()
    }

    /// Daily bars whose close climbs 0.5 a day and restarts every January 1st,
    /// one point above the previous year's opening close.
    fn seasonal_series(first_year: i32, years: i32) -> PriceSeries {
        let mut bars = Vec::new();
        for year in first_year..first_year + years {
            let mut date = NaiveDate::from_ymd_opt(year, 1, 1).unwrap();
            let mut close = 100.0 + f64::from(year - first_year);
            while date.year() == year {
                bars.push(PriceBar { date, ..bar("2000-01-01", close) });
                close += 0.5;
                date += Duration::days(1);
            }
        }
        PriceSeries::new("SEAS", bars).unwrap()
    }

    #[test]
    fn domain_covers_every_definition() {
        let domain = window_domain(365);
        assert_eq!(domain.len(), 133_225);
        assert_eq!(domain[0], WindowDefinition::new(1, 1).unwrap());
        assert_eq!(domain[domain.len() - 1], WindowDefinition::new(365, 365).unwrap());
        assert_eq!(window_domain(3).len(), 3 * 365);
    }

    #[test]
    fn repeated_scans_are_identical() {
        let series = seasonal_series(2019, 3);
        let s = scanner(20);
        let first = s.scan(&series);
        let second = s.scan(&series);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn pool_size_does_not_change_the_table() {
        let series = seasonal_series(2019, 3);
        let single = scanner_with_threads(30, 1);
        let wide = scanner_with_threads(30, 4);
        assert_eq!(single.threads(), 1);
        assert_eq!(wide.threads(), 4);
        let expected = single.scan(&series);
        assert!(!expected.is_empty());
        assert_eq!(wide.scan(&series), expected);
    }

    #[test]
    fn slot_invariants_hold() {
        let series = seasonal_series(2019, 3);
        for slot in scanner(30).scan(&series) {
            assert!(slot.positive_years <= slot.total_years);
            assert_eq!(
                slot.consistency,
                f64::from(slot.positive_years) / f64::from(slot.total_years)
            );
            assert_eq!(slot.end_day, (slot.start_day + slot.window_size) % 365);
            assert!(slot.min_return <= slot.median_return && slot.median_return <= slot.max_return);
            assert!(slot.total_years <= 3);
        }
    }

    #[test]
    fn single_year_series_yields_single_observations() {
        let series = seasonal_series(2021, 1);
        let slots = scanner(365).scan(&series);
        assert!(!slots.is_empty());
        assert!(slots.iter().all(|s| s.total_years == 1));
        // Wrapping windows need the following year and are dropped entirely.
        assert!(
            slots
                .iter()
                .all(|s| !WindowDefinition::new(s.start_day, s.window_size).unwrap().wraps())
        );
    }

    #[test]
    fn wraparound_observation_spans_the_year_boundary() {
        let series = seasonal_series(2020, 2);
        let slots = scanner(10).scan(&series);
        let slot = slots
            .iter()
            .find(|s| s.start_day == 360 && s.window_size == 10)
            .unwrap();
        assert_eq!(slot.total_years, 1);

        // 2020 is a leap year: Dec 26 is day 360 in the 365-day calendar but
        // the 361st bar. The close resets to 101 on Jan 1 2021.
        let start_close = 100.0 + 0.5 * 360.0;
        let end_close = 101.0 + 0.5 * 4.0;
        let expected = (end_close - start_close) / start_close;
        assert!((slot.median_return - expected).abs() < 1e-12);
        assert_eq!(slot.end_day, 5);
    }

    #[test]
    fn malformed_boundary_bar_only_drops_that_year() {
        let mut bars: Vec<PriceBar> = seasonal_series(2019, 3).bars().to_vec();
        let broken = NaiveDate::from_ymd_opt(2020, 1, 10).unwrap();
        for b in bars.iter_mut().filter(|b| b.date == broken) {
            b.close = 0.0;
        }
        let series = PriceSeries::new("SEAS", bars).unwrap();
        let slots = scanner(5).scan(&series);
        let slot = slots
            .iter()
            .find(|s| s.start_day == 10 && s.window_size == 5)
            .unwrap();
        assert_eq!(slot.total_years, 2);
    }

    #[test]
    fn gaps_drop_definitions_without_observations() {
        // Only January bars: windows opening later in the year see nothing.
        let bars: Vec<PriceBar> = seasonal_series(2019, 2)
            .bars()
            .iter()
            .copied()
            .filter(|b| b.date.month() == 1 || b.date == NaiveDate::from_ymd_opt(2020, 12, 31).unwrap())
            .collect();
        let series = PriceSeries::new("JAN", bars).unwrap();
        let slots = scanner(3).scan(&series);
        assert!(!slots.is_empty());
        assert!(slots.iter().all(|s| s.total_years >= 1));
        assert!(slots.iter().all(|s| s.start_day <= 31 || s.start_day >= 362));
    }
}
