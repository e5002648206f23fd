//! Hard filtering, quality scoring and best-window selection.

use std::cmp::Ordering;

use crate::calendar::day_label;
use crate::scanner::SeasonalSlot;
use crate::storage_utils::SelectionConfig;

/// Stand-in for a standard deviation that is exactly zero.
pub const STD_DEV_EPSILON: f64 = 0.0001;

const CONSISTENCY_WEIGHT: f64 = 0.5;
const MEDIAN_WEIGHT: f64 = 0.3;
const RISK_ADJUSTED_WEIGHT: f64 = 0.2;

/// True when the slot clears every hard filter.
pub fn passes_filters(slot: &SeasonalSlot, config: &SelectionConfig) -> bool {
    slot.consistency > config.consistency_min
        && slot.total_years >= config.total_years_min
        && slot.min_return >= config.min_return_threshold
        && (config.window_size_min..=config.window_size_max).contains(&slot.window_size)
}

pub fn risk_adjusted_return(slot: &SeasonalSlot) -> f64 {
    let std_dev = if slot.standard_deviation == 0.0 {
        STD_DEV_EPSILON
    } else {
        slot.standard_deviation
    };
    slot.median_return / std_dev
}

pub fn quality_score(slot: &SeasonalSlot) -> f64 {
    CONSISTENCY_WEIGHT * slot.consistency
        + MEDIAN_WEIGHT * slot.median_return
        + RISK_ADJUSTED_WEIGHT * risk_adjusted_return(slot)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredSlot {
    pub slot: SeasonalSlot,
    pub quality_score: f64,
}

// Greater means preferred: higher score, then more years of evidence, then
// the shorter window, then the earlier start.
fn preference(a: &ScoredSlot, b: &ScoredSlot) -> Ordering {
    a.quality_score
        .total_cmp(&b.quality_score)
        .then(a.slot.total_years.cmp(&b.slot.total_years))
        .then(b.slot.window_size.cmp(&a.slot.window_size))
        .then(b.slot.start_day.cmp(&a.slot.start_day))
}

/// Best surviving slot, or `None` when nothing passes the filters. The
/// choice does not depend on the order of `slots`.
pub fn select_best(slots: &[SeasonalSlot], config: &SelectionConfig) -> Option<ScoredSlot> {
    slots
        .iter()
        .filter(|s| passes_filters(s, config))
        .map(|s| ScoredSlot {
            slot: *s,
            quality_score: quality_score(s),
        })
        .max_by(preference)
}

/// The chosen window for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Insight {
    pub instrument_id: String,
    pub instrument_name: String,
    pub slot: SeasonalSlot,
    pub quality_score: f64,
}

impl Insight {
    pub fn select(
        instrument_id: &str,
        instrument_name: &str,
        slots: &[SeasonalSlot],
        config: &SelectionConfig,
    ) -> Option<Self> {
        let best = select_best(slots, config)?;
        Some(Self {
            instrument_id: instrument_id.to_string(),
            instrument_name: instrument_name.to_string(),
            slot: best.slot,
            quality_score: best.quality_score,
        })
    }

    pub fn buy_label(&self) -> String {
        day_label(self.slot.start_day)
    }

    pub fn sell_label(&self) -> String {
        day_label(self.slot.end_day)
    }
}

/// Sorts the corpus by descending quality score, ties by instrument id.
pub fn rank(insights: &mut [Insight]) {
    insights.sort_by(|a, b| {
        b.quality_score
            .total_cmp(&a.quality_score)
            .then_with(|| a.instrument_id.cmp(&b.instrument_id))
    });
}

/// Column a slot listing is sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SlotOrder {
    Median,
    Min,
    Max,
    Consistency,
    Window,
    Score,
}

impl SlotOrder {
    fn key(self, slot: &SeasonalSlot) -> f64 {
        match self {
            SlotOrder::Median => slot.median_return,
            SlotOrder::Min => slot.min_return,
            SlotOrder::Max => slot.max_return,
            SlotOrder::Consistency => slot.consistency,
            SlotOrder::Window => f64::from(slot.window_size),
            SlotOrder::Score => quality_score(slot),
        }
    }
}

/// Stable sort, largest first unless `ascending`; equal keys keep table order.
pub fn sort_slots(slots: &mut [SeasonalSlot], order: SlotOrder, ascending: bool) {
    if ascending {
        slots.sort_by(|a, b| order.key(a).total_cmp(&order.key(b)));
    } else {
        slots.sort_by(|a, b| order.key(b).total_cmp(&order.key(a)));
    }
}
