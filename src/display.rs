use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table,
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_BORDERS_ONLY,
};

use crate::calendar::day_label;
use crate::heatmap::MonthlyReturns;
use crate::reports::InsightRow;
use crate::scanner::SeasonalSlot;
use crate::signals::{CrossEvent, CrossKind, TrendReading, VolumeSpike};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

fn get_visibility_ratio(current: f64, top: f64) -> f64 {
    let ratio = 0.4 + 0.6 * (current / top);
    ratio.clamp(0.4, 1.0)
}

fn header(table: &mut Table, titles: &[(&str, bool)]) {
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(titles.iter().map(|(title, right)| {
            let cell = Cell::new(title).add_attribute(Attribute::Bold);
            if *right { cell.set_alignment(CellAlignment::Right) } else { cell }
        }));
}

fn right(text: String) -> Cell {
    Cell::new(text).set_alignment(CellAlignment::Right)
}

/// Ranked insights, brightest for the top quality score.
pub fn insight_table(rows: &[InsightRow], limit: usize) -> Table {
    let mut table = Table::new();
    header(
        &mut table,
        &[
            ("Rank", false),
            ("Instrument", false),
            ("Buy", false),
            ("Sell", false),
            ("Days", true),
            ("Median", true),
            ("Worst", true),
            ("Consistency", true),
            ("Score", true),
        ],
    );

    let top = rows.first().map(|r| r.quality_score).unwrap_or(1.0);
    let safe_top = if top <= 0.0 { 1.0 } else { top };

    for (i, row) in rows.iter().take(limit).enumerate() {
        let ratio = get_visibility_ratio(row.quality_score, safe_top);
        let cyan_val = (255.0 * ratio) as u8;
        let green_val = (255.0 * ratio) as u8;

        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(format!("{} ({})", row.instrument_id, row.instrument_name)).fg(Color::Rgb {
                r: 0,
                g: cyan_val,
                b: cyan_val,
            }),
            Cell::new(&row.buy_date),
            Cell::new(&row.sell_date),
            right(row.window_size.to_string()),
            right(format!("{:.2}%", row.median_return_pct)),
            right(format!("{:.2}%", row.min_return_pct)),
            right(format!("{:.2}%", row.consistency_pct)),
            right(format!("{:.2}", row.quality_score)).fg(Color::Rgb {
                r: 0,
                g: green_val,
                b: 0,
            }),
        ]);
    }
    table
}

/// One row per slot in the given order; returns are shown as percentages.
pub fn slot_table(slots: &[SeasonalSlot], limit: usize) -> Table {
    let mut table = Table::new();
    header(
        &mut table,
        &[
            ("Days", true),
            ("Start", false),
            ("End", false),
            ("Median", true),
            ("Min", true),
            ("Max", true),
            ("Consistency", true),
            ("Years", true),
            ("Std Dev", true),
        ],
    );
    for slot in slots.iter().take(limit) {
        let color = if slot.median_return >= 0.0 { Color::Green } else { Color::Red };
        table.add_row(vec![
            right(slot.window_size.to_string()),
            Cell::new(day_label(slot.start_day)),
            Cell::new(day_label(slot.end_day)),
            right(format!("{:+.2}%", slot.median_return * 100.0)).fg(color),
            right(format!("{:+.2}%", slot.min_return * 100.0)),
            right(format!("{:+.2}%", slot.max_return * 100.0)),
            right(format!("{:.0}%", slot.consistency * 100.0)),
            right(format!("{}/{}", slot.positive_years, slot.total_years)),
            right(format!("{:.2}%", slot.standard_deviation * 100.0)),
        ]);
    }
    table
}

pub fn cross_table(events: &[CrossEvent]) -> Table {
    let mut table = Table::new();
    header(&mut table, &[("Date", false), ("Signal", false), ("Fast MA", true), ("Slow MA", true)]);
    for event in events {
        let color = match event.kind {
            CrossKind::Golden => Color::Green,
            CrossKind::Death => Color::Red,
        };
        table.add_row(vec![
            Cell::new(event.date),
            Cell::new(event.kind).fg(color),
            right(format!("{:.2}", event.fast)),
            right(format!("{:.2}", event.slow)),
        ]);
    }
    table
}

pub fn volume_spike_table(spikes: &[VolumeSpike]) -> Table {
    let mut table = Table::new();
    header(&mut table, &[("Date", false), ("Volume", true), ("Avg Volume", true), ("Price Change", true)]);
    for spike in spikes {
        let color = if spike.price_change_pct >= 0.0 { Color::Green } else { Color::Red };
        table.add_row(vec![
            Cell::new(spike.date),
            right(spike.volume.to_string()),
            right(format!("{:.0}", spike.average_volume)),
            right(format!("{:+.2}%", spike.price_change_pct)).fg(color),
        ]);
    }
    table
}

pub fn trend_table(readings: &[TrendReading]) -> Table {
    let mut table = Table::new();
    header(&mut table, &[("SMA", false), ("Value", true), ("Close", false)]);
    for reading in readings {
        let (value, position) = match (reading.average, reading.close_above) {
            (Some(avg), Some(true)) => (format!("{:.2}", avg), Cell::new("above").fg(Color::Green)),
            (Some(avg), _) => (format!("{:.2}", avg), Cell::new("below").fg(Color::Red)),
            (None, _) => ("-".to_string(), Cell::new("not enough history").fg(Color::DarkGrey)),
        };
        table.add_row(vec![Cell::new(reading.window), right(value), position]);
    }
    table
}

pub fn heatmap_table(rows: &[MonthlyReturns]) -> Table {
    let mut table = Table::new();
    let titles: Vec<(&str, bool)> = std::iter::once(("Year", false))
        .chain(MONTHS.iter().map(|m| (*m, true)))
        .collect();
    header(&mut table, &titles);
    for row in rows {
        let mut cells = vec![Cell::new(row.year)];
        cells.extend(row.months.iter().map(|m| match m {
            Some(r) => {
                let color = if *r >= 0.0 { Color::Green } else { Color::Red };
                right(format!("{:+.2}%", r * 100.0)).fg(color)
            }
            None => right("-".to_string()).fg(Color::DarkGrey),
        }));
        table.add_row(cells);
    }
    table
}
