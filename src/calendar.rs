//! Fixed 365-day calendar arithmetic and window extraction.
//!
//! Day-of-year values ignore the leap day: Feb 29 shares day 59 with Feb 28,
//! so the same day number names the same month/day in every year.

use chrono::{Datelike, Duration, NaiveDate};

use crate::error::{Result, ScreenerError};
use crate::price_series::{PriceBar, PriceSeries};

pub const DAYS_IN_YEAR: u16 = 365;

/// Non-leap year used to render day numbers as month/day labels.
pub const REFERENCE_YEAR: i32 = 2023;

// Days elapsed before the first of each month in a non-leap year.
const MONTH_OFFSETS: [u16; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

pub fn day_of_year(date: NaiveDate) -> u16 {
    if date.month() == 2 && date.day() == 29 {
        return 59;
    }
    MONTH_OFFSETS[date.month0() as usize] + date.day() as u16
}

/// Date of a 1-based day-of-year in `year`, using non-leap month lengths.
pub fn date_for(year: i32, day: u16) -> Option<NaiveDate> {
    if !(1..=DAYS_IN_YEAR).contains(&day) {
        return None;
    }
    let month0 = MONTH_OFFSETS.iter().rposition(|&offset| offset < day)?;
    let day_of_month = day - MONTH_OFFSETS[month0];
    NaiveDate::from_ymd_opt(year, month0 as u32 + 1, day_of_month as u32)
}

/// Days from `date` until the next occurrence of `day`; 0 when it is today.
pub fn days_until(date: NaiveDate, day: u16) -> u16 {
    (day % DAYS_IN_YEAR + DAYS_IN_YEAR - day_of_year(date) % DAYS_IN_YEAR) % DAYS_IN_YEAR
}

/// `%b %d` label for a day number; 0 is the wrapped form of Dec 31.
pub fn day_label(day: u16) -> String {
    let reference = NaiveDate::from_ymd_opt(REFERENCE_YEAR, 1, 1).unwrap_or_default();
    let date = reference + Duration::days(i64::from(day) - 1);
    date.format("%b %d").to_string()
}

/// A recurring calendar window: `length_days` days starting at `start_day`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowDefinition {
    pub start_day: u16,
    pub length_days: u16,
}

impl WindowDefinition {
    pub fn new(start_day: u16, length_days: u16) -> Result<Self> {
        let domain = 1..=DAYS_IN_YEAR;
        if !domain.contains(&start_day) || !domain.contains(&length_days) {
            return Err(ScreenerError::InvalidWindow {
                start_day,
                length_days,
            });
        }
        Ok(Self {
            start_day,
            length_days,
        })
    }

    /// End day as stored in slot tables: `(start + length) mod 365`.
    pub fn end_day(&self) -> u16 {
        (self.start_day + self.length_days) % DAYS_IN_YEAR
    }

    pub fn wraps(&self) -> bool {
        self.start_day + self.length_days > DAYS_IN_YEAR
    }

    /// Real start and end dates of the window that opens in `year`.
    pub fn dates_in(&self, year: i32) -> Option<(NaiveDate, NaiveDate)> {
        let start = date_for(year, self.start_day)?;
        let end_position = self.start_day + self.length_days;
        let end = if self.wraps() {
            date_for(year + 1, end_position - DAYS_IN_YEAR)?
        } else {
            date_for(year, end_position)?
        };
        Some((start, end))
    }
}

/// Bars of `series` inside the window opening in `year`, both boundary
/// dates included. A wrapping window continues into the head of the next
/// year as one contiguous span.
///
/// Returns an empty slice when the series does not cover the whole window,
/// so truncated spans at either end of the history never count as a year.
pub fn extract_window(series: &PriceSeries, window: WindowDefinition, year: i32) -> &[PriceBar] {
    let Some((start, end)) = window.dates_in(year) else {
        return &[];
    };
    if series.first_date() > start || series.last_date() < end {
        return &[];
    }

    let bars = series.bars();
    let lo = bars.partition_point(|b| b.date < start);
    let hi = bars.partition_point(|b| b.date <= end);
    &bars[lo..hi]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_series::tests::bar;

    fn daily_series(from: &str, to: &str) -> PriceSeries {
        let mut date = NaiveDate::parse_from_str(from, "%Y-%m-%d").unwrap();
        let last = NaiveDate::parse_from_str(to, "%Y-%m-%d").unwrap();
        let mut bars = Vec::new();
        let mut close = 100.0;
        while date <= last {
            bars.push(PriceBar { date, ..bar("2000-01-01", close) });
            close += 1.0;
            date += Duration::days(1);
        }
        PriceSeries::new("TEST", bars).unwrap()
    }

    #[test]
    fn day_of_year_round_trips_through_date_for() {
        for day in 1..=DAYS_IN_YEAR {
            let date = date_for(2021, day).unwrap();
            assert_eq!(day_of_year(date), day);
        }
        assert_eq!(date_for(2021, 0), None);
        assert_eq!(date_for(2021, 366), None);
    }

    #[test]
    fn leap_day_folds_onto_feb_28() {
        let leap = NaiveDate::from_ymd_opt(2020, 2, 29).unwrap();
        assert_eq!(day_of_year(leap), 59);
        assert_eq!(day_of_year(NaiveDate::from_ymd_opt(2020, 3, 1).unwrap()), 60);
        assert_eq!(date_for(2020, 60), NaiveDate::from_ymd_opt(2020, 3, 1));
    }

    #[test]
    fn end_day_wraps_modulo_365() {
        for start in [1u16, 100, 300, 360, 365] {
            for length in [1u16, 5, 10, 200, 365] {
                let w = WindowDefinition::new(start, length).unwrap();
                assert_eq!(w.end_day(), (start + length) % 365);
            }
        }
        assert_eq!(WindowDefinition::new(360, 10).unwrap().end_day(), 5);
    }

    #[test]
    fn rejects_out_of_domain_windows() {
        assert!(WindowDefinition::new(0, 5).is_err());
        assert!(WindowDefinition::new(366, 5).is_err());
        assert!(WindowDefinition::new(10, 0).is_err());
        assert!(WindowDefinition::new(10, 366).is_err());
    }

    #[test]
    fn non_wrapping_extent_equals_length() {
        let series = daily_series("2021-01-01", "2021-12-31");
        for (start, length) in [(1u16, 1u16), (32, 10), (100, 200), (200, 165)] {
            let w = WindowDefinition::new(start, length).unwrap();
            assert!(!w.wraps());
            let span = extract_window(&series, w, 2021);
            let extent = (span[span.len() - 1].date - span[0].date).num_days();
            assert_eq!(extent, i64::from(length));
            assert_eq!(day_of_year(span[0].date), start);
        }
    }

    #[test]
    fn wrapping_window_joins_year_tail_and_next_head() {
        let series = daily_series("2021-01-01", "2022-12-31");
        let w = WindowDefinition::new(360, 10).unwrap();
        let span = extract_window(&series, w, 2021);
        assert_eq!(span[0].date, NaiveDate::from_ymd_opt(2021, 12, 26).unwrap());
        assert_eq!(span[span.len() - 1].date, NaiveDate::from_ymd_opt(2022, 1, 5).unwrap());
        assert_eq!(span.len(), 11);
        assert!(span.windows(2).all(|p| p[0].date < p[1].date));
    }

    #[test]
    fn truncated_windows_are_empty() {
        let series = daily_series("2021-03-01", "2022-06-30");
        let wrap = WindowDefinition::new(360, 10).unwrap();
        assert!(extract_window(&series, wrap, 2022).is_empty());
        let early = WindowDefinition::new(1, 10).unwrap();
        assert!(extract_window(&series, early, 2021).is_empty());
        assert!(!extract_window(&series, early, 2022).is_empty());
        assert!(extract_window(&series, early, 2019).is_empty());
    }

    #[test]
    fn counts_days_until_the_next_occurrence() {
        let dec_30 = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        assert_eq!(days_until(dec_30, 364), 0);
        assert_eq!(days_until(dec_30, 365), 1);
        assert_eq!(days_until(dec_30, 1), 2);
        assert_eq!(days_until(dec_30, 363), 364);
    }

    #[test]
    fn labels_use_the_reference_year() {
        assert_eq!(day_label(1), "Jan 01");
        assert_eq!(day_label(60), "Mar 01");
        assert_eq!(day_label(365), "Dec 31");
        assert_eq!(day_label(0), "Dec 31");
    }
}
