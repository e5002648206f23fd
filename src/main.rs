mod calendar;
mod display;
mod error;
mod heatmap;
mod insights;
mod instruments;
mod pipeline;
mod price_series;
mod reports;
mod scanner;
mod signals;
mod statistics;
mod storage_utils;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::insights::SlotOrder;
use crate::instruments::InstrumentFilter;
use crate::pipeline::{CancelFlag, Workspace};
use crate::storage_utils::AsyncStorageManager;

#[derive(Parser, Debug)]
#[command(name = "seasonal-screener", version, about = "Seasonal window scanner and insight ranking for daily price histories")]
struct Cli {
    /// Directory holding config.json (defaults to ./storage next to the binary).
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Overrides the configured directory of instrument CSV files.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Overrides the configured directory for slot tables and insights.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Worker threads for the window scan.
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Selection {
    /// Only these instrument ids (repeatable).
    #[arg(long = "symbol")]
    symbols: Vec<String>,

    /// Case-insensitive substring of the instrument id or name.
    #[arg(long)]
    search: Option<String>,
}

impl From<Selection> for InstrumentFilter {
    fn from(s: Selection) -> Self {
        InstrumentFilter {
            symbols: s.symbols,
            search: s.search,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan every window of every instrument and write slot tables.
    Scan(Selection),
    /// Pick the best window per scanned instrument and rank the corpus.
    Insights {
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Scan, then rank.
    Run {
        #[command(flatten)]
        selection: Selection,
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Print the last ranked insight table.
    Show {
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// List the stored slots of one scanned instrument.
    Slots {
        symbol: String,
        #[arg(long, value_enum, default_value_t = SlotOrder::Score)]
        sort: SlotOrder,
        /// Smallest values first.
        #[arg(long)]
        ascending: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only windows opening within this many days from today.
        #[arg(long)]
        upcoming: Option<u16>,
    },
    /// Moving-average crosses, volume spikes and trend for one instrument.
    Signals {
        symbol: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Mean daily return per year and month for one instrument.
    Heatmap { symbol: String },
    /// Append bars newer than the stored history from a CSV file.
    Ingest {
        symbol: String,
        file: PathBuf,
        /// Display name used when the instrument is new.
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Step 0: Load configuration
    let storage = match &cli.storage {
        Some(dir) => AsyncStorageManager::new(dir).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };
    let mut config = storage
        .load_or_init_config()
        .await
        .with_context(|| format!("loading {}", storage.path("config.json").display()))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if cli.threads.is_some() {
        config.scan.threads = cli.threads;
    }
    config.resolve_dirs(&storage.base_dir);
    config.validate()?;

    let workspace = Workspace::open(config).await?;

    let cancel = CancelFlag::default();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received, stopping after the current instrument");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Scan(selection) => {
            log::info!("--- Step 1: Scanning Seasonal Windows ---");
            pipeline::run_scan_batch(&workspace, &selection.into(), &cancel).await?;
        }
        Command::Insights { limit } => {
            log::info!("--- Step 2: Selecting Insights ---");
            pipeline::run_insights_batch(&workspace).await?;
            print_insights(&workspace, limit).await?;
        }
        Command::Run { selection, limit } => {
            log::info!("--- Step 1: Scanning Seasonal Windows ---");
            let report = pipeline::run_scan_batch(&workspace, &selection.into(), &cancel).await?;
            if report.cancelled {
                bail!("scan cancelled; insights not regenerated");
            }
            log::info!("--- Step 2: Selecting Insights ---");
            pipeline::run_insights_batch(&workspace).await?;
            print_insights(&workspace, limit).await?;
        }
        Command::Show { limit } => print_insights(&workspace, limit).await?,
        Command::Slots {
            symbol,
            sort,
            ascending,
            limit,
            upcoming,
        } => {
            let (manifest, mut slots) = pipeline::load_slots(&workspace, &symbol).await?;
            if let Some(days) = upcoming {
                let today = chrono::Local::now().date_naive();
                slots.retain(|s| calendar::days_until(today, s.start_day) <= days);
            }
            insights::sort_slots(&mut slots, sort, ascending);
            println!(
                "\n{} ({}) {} slots, {} to {}\n{}",
                manifest.instrument_id,
                manifest.instrument_name,
                slots.len(),
                manifest.first_date,
                manifest.last_date,
                display::slot_table(&slots, limit)
            );
        }
        Command::Signals { symbol, limit } => {
            let series = load_symbol(&workspace, &symbol).await?;
            let sig = &workspace.config.signals;

            let crosses = signals::find_ma_crosses(&series, sig.cross_fast, sig.cross_slow)?;
            println!(
                "\nMoving average crosses ({}/{})\n{}",
                sig.cross_fast,
                sig.cross_slow,
                display::cross_table(&crosses[..crosses.len().min(limit)])
            );

            let spikes = signals::find_volume_spikes(
                &series,
                sig.volume_spike_lookback,
                sig.volume_spike_threshold,
            )?;
            println!(
                "\nVolume spikes (> {:.1}x {}-day mean)\n{}",
                sig.volume_spike_threshold,
                sig.volume_spike_lookback,
                display::volume_spike_table(&spikes[..spikes.len().min(limit)])
            );

            let trend = signals::trend_snapshot(&series, &sig.trend_windows)?;
            println!(
                "\nTrend as of {}\n{}",
                series.last_date(),
                display::trend_table(&trend)
            );
        }
        Command::Heatmap { symbol } => {
            let series = load_symbol(&workspace, &symbol).await?;
            let rows = heatmap::monthly_mean_returns(&series);
            println!("\n{} mean daily return by month\n{}", symbol, display::heatmap_table(&rows));
        }
        Command::Ingest { symbol, file, name } => {
            let update = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let appended = pipeline::ingest(&workspace, &symbol, name.as_deref(), &update).await?;
            println!("{}: appended {} bars", symbol, appended);
        }
    }

    Ok(())
}

async fn load_symbol(workspace: &Workspace, symbol: &str) -> Result<price_series::PriceSeries> {
    let instrument = workspace
        .find_instrument(symbol)
        .await?
        .with_context(|| format!("no data file for {}", symbol))?;
    Ok(workspace.load_series(&instrument).await?)
}

async fn print_insights(workspace: &Workspace, limit: usize) -> Result<()> {
    let rows = pipeline::load_insights(workspace).await?;
    if rows.is_empty() {
        println!("No instrument has a window passing the current filters.");
        return Ok(());
    }
    let title = format!("(Top {} of {} insights)", limit.min(rows.len()), rows.len());
    println!("\n{}\n{}", title, display::insight_table(&rows, limit));
    Ok(())
}
