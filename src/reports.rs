//! On-disk formats: per-instrument slot tables with their manifests, and the
//! corpus insight table.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::WindowDefinition;
use crate::error::{Result, ScreenerError};
use crate::insights::Insight;
use crate::price_series::PriceSeries;
use crate::scanner::SeasonalSlot;

/// Bumped whenever slot table columns or the manifest layout change. Older
/// tables are rejected, not migrated; rerun the scan instead.
pub const SLOT_SCHEMA_VERSION: u32 = 2;

pub const SLOT_COLUMNS: [&str; 10] = [
    "start_day",
    "end_day",
    "median_return",
    "min_return",
    "max_return",
    "standard_deviation",
    "consistency",
    "positive_years",
    "total_years",
    "window_size",
];

pub const INSIGHT_COLUMNS: [&str; 9] = [
    "instrument_id",
    "instrument_name",
    "buy_date",
    "sell_date",
    "median_return_pct",
    "consistency_pct",
    "min_return_pct",
    "window_size",
    "quality_score",
];

/// Written after each slot table. Renaming the manifest into place commits
/// a scan: it names the table generation that belongs to it, so a table is
/// never served next to another scan's manifest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanManifest {
    pub schema_version: u32,
    #[serde(default)]
    pub generation: u64,
    pub instrument_id: String,
    pub instrument_name: String,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub years: Vec<i32>,
    pub slot_count: usize,
    pub scanned_at: DateTime<Utc>,
}

impl ScanManifest {
    pub fn new(name: &str, series: &PriceSeries, slot_count: usize, generation: u64) -> Self {
        Self {
            schema_version: SLOT_SCHEMA_VERSION,
            generation,
            instrument_id: series.instrument().to_string(),
            instrument_name: name.to_string(),
            first_date: series.first_date(),
            last_date: series.last_date(),
            years: series.years(),
            slot_count,
            scanned_at: Utc::now(),
        }
    }

    /// File name of the slot table this manifest commits.
    pub fn table_file(&self) -> String {
        format!("{}.{}.csv", self.instrument_id, self.generation)
    }

    pub fn check_version(&self) -> Result<()> {
        if self.schema_version != SLOT_SCHEMA_VERSION {
            return Err(ScreenerError::input(
                &self.instrument_id,
                format!(
                    "slot table schema v{} does not match v{}; rescan the instrument",
                    self.schema_version, SLOT_SCHEMA_VERSION
                ),
            ));
        }
        Ok(())
    }
}

pub fn slots_to_csv(slots: &[SeasonalSlot]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(SLOT_COLUMNS)?;
    for slot in slots {
        writer.serialize(slot)?;
    }
    writer
        .into_inner()
        .map_err(|e| ScreenerError::Io(e.into_error()))
}

/// Reads a slot table, requiring the current column set exactly.
pub fn slots_from_csv(instrument: &str, data: &[u8]) -> Result<Vec<SeasonalSlot>> {
    let mut reader = csv::Reader::from_reader(data);
    let headers = reader.headers()?.clone();
    if !headers.iter().eq(SLOT_COLUMNS.iter().copied()) {
        return Err(ScreenerError::input(
            instrument,
            format!("unexpected slot table columns: {:?}", headers.iter().collect::<Vec<_>>()),
        ));
    }

    let mut slots = Vec::new();
    for record in reader.deserialize::<SeasonalSlot>() {
        let slot = record?;
        let window = WindowDefinition::new(slot.start_day, slot.window_size)?;
        if window.end_day() != slot.end_day || slot.positive_years > slot.total_years {
            return Err(ScreenerError::input(
                instrument,
                format!("inconsistent slot row start_day={} window_size={}", slot.start_day, slot.window_size),
            ));
        }
        slots.push(slot);
    }
    Ok(slots)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InsightRow {
    pub instrument_id: String,
    pub instrument_name: String,
    pub buy_date: String,
    pub sell_date: String,
    pub median_return_pct: f64,
    pub consistency_pct: f64,
    pub min_return_pct: f64,
    pub window_size: u16,
    pub quality_score: f64,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

impl From<&Insight> for InsightRow {
    fn from(insight: &Insight) -> Self {
        Self {
            instrument_id: insight.instrument_id.clone(),
            instrument_name: insight.instrument_name.clone(),
            buy_date: insight.buy_label(),
            sell_date: insight.sell_label(),
            median_return_pct: round2(insight.slot.median_return * 100.0),
            consistency_pct: round2(insight.slot.consistency * 100.0),
            min_return_pct: round2(insight.slot.min_return * 100.0),
            window_size: insight.slot.window_size,
            quality_score: round2(insight.quality_score),
        }
    }
}

/// Serializes an already ranked corpus.
pub fn insights_to_csv(insights: &[Insight]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(INSIGHT_COLUMNS)?;
    for insight in insights {
        writer.serialize(InsightRow::from(insight))?;
    }
    writer
        .into_inner()
        .map_err(|e| ScreenerError::Io(e.into_error()))
}

pub fn insights_from_csv(data: &[u8]) -> Result<Vec<InsightRow>> {
    let mut reader = csv::Reader::from_reader(data);
    let mut rows = Vec::new();
    for record in reader.deserialize::<InsightRow>() {
        rows.push(record?);
    }
    Ok(rows)
}
