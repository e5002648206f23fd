use chrono::{Datelike, NaiveDate};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{Result, ScreenerError};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One daily OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl PriceBar {
    fn is_well_formed(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0)
    }
}

/// Daily bars for one instrument, strictly increasing by date.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    instrument: String,
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn new(instrument: impl Into<String>, bars: Vec<PriceBar>) -> Result<Self> {
        let instrument = instrument.into();
        if bars.is_empty() {
            return Err(ScreenerError::input(instrument, "price series is empty"));
        }
        if let Some(pair) = bars.windows(2).find(|w| w[0].date >= w[1].date) {
            return Err(ScreenerError::input(
                instrument,
                format!("dates not strictly increasing at {}", pair[1].date),
            ));
        }
        Ok(Self { instrument, bars })
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn first_date(&self) -> NaiveDate {
        self.bars[0].date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.bars[self.bars.len() - 1].date
    }

    /// Distinct calendar years present, ascending.
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.bars.iter().map(|b| b.date.year()).collect();
        years.dedup();
        years
    }

    /// Appends the bars dated after the last stored bar and returns how many
    /// were kept. Older or same-day rows are ignored rather than merged.
    pub fn append_newer(&mut self, candidates: Vec<PriceBar>) -> usize {
        let cutoff = self.last_date();
        let newer: Vec<PriceBar> = candidates
            .into_iter()
            .filter(|b| b.date > cutoff && b.is_well_formed())
            .collect();
        let newer = sort_dedup(newer);
        let appended = newer.len();
        self.bars.extend(newer);
        appended
    }

    /// Parses a `DATE,OPEN,HIGH,LOW,CLOSE,VOLUME` table. Rows that fail to
    /// parse or carry non-positive prices are skipped; duplicate dates keep
    /// the last row seen.
    pub fn from_csv(instrument: &str, data: &[u8]) -> Result<Self> {
        let bars = parse_bars(instrument, data)?;
        Self::new(instrument, bars)
    }

    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for bar in &self.bars {
            writer.serialize(BarRecord::from(bar))?;
        }
        writer
            .into_inner()
            .map_err(|e| ScreenerError::Io(e.into_error()))
    }
}

/// Parses bar rows without enforcing the series invariant, so callers can
/// feed partial update files into [`PriceSeries::append_newer`].
pub fn parse_bars(instrument: &str, data: &[u8]) -> Result<Vec<PriceBar>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);

    let mut bars = Vec::new();
    let mut skipped = 0usize;
    for record in reader.deserialize::<BarRecord>() {
        match record.map_err(ScreenerError::from).and_then(PriceBar::try_from) {
            Ok(bar) if bar.is_well_formed() => bars.push(bar),
            Ok(_) | Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("{}: skipped {} malformed rows", instrument, skipped);
    }

    Ok(sort_dedup(bars))
}

fn sort_dedup(mut bars: Vec<PriceBar>) -> Vec<PriceBar> {
    bars.sort_by_key(|b| b.date);
    let mut out: Vec<PriceBar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

// --- CSV Row Format ---

#[derive(Serialize, Deserialize, Debug)]
struct BarRecord {
    #[serde(rename = "DATE")]
    date: String,
    #[serde(rename = "OPEN")]
    open: f64,
    #[serde(rename = "HIGH")]
    high: f64,
    #[serde(rename = "LOW")]
    low: f64,
    #[serde(rename = "CLOSE")]
    close: f64,
    #[serde(rename = "VOLUME", deserialize_with = "deserialize_volume_lenient")]
    volume: u64,
}

impl TryFrom<BarRecord> for PriceBar {
    type Error = ScreenerError;

    fn try_from(record: BarRecord) -> Result<Self> {
        // Some providers append a time component; only the calendar date matters.
        let day = record.date.get(..10).unwrap_or(&record.date);
        let date = NaiveDate::parse_from_str(day, DATE_FORMAT)
            .map_err(|e| ScreenerError::input("", format!("bad date {:?}: {e}", record.date)))?;
        Ok(PriceBar {
            date,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
        })
    }
}

impl From<&PriceBar> for BarRecord {
    fn from(bar: &PriceBar) -> Self {
        BarRecord {
            date: bar.date.format(DATE_FORMAT).to_string(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

struct LenientVolumeVisitor;

impl<'de> Visitor<'de> for LenientVolumeVisitor {
    type Value = u64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a non-negative integer, an integral float, or a numeric string")
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        u64::try_from(v).map_err(E::custom)
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.is_finite() && v >= 0.0 && v.fract() == 0.0 {
            Ok(v as u64)
        } else {
            Err(E::custom(format!("volume {v} is not a whole number")))
        }
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        let v = v.trim();
        if v.is_empty() {
            return Ok(0);
        }
        match v.parse::<u64>() {
            Ok(n) => Ok(n),
            Err(_) => self.visit_f64(v.parse::<f64>().map_err(E::custom)?),
        }
    }
}

fn deserialize_volume_lenient<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientVolumeVisitor)
}
