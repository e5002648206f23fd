//! Batch orchestration: scan every instrument, then rank the corpus.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::ScreenerError;
use crate::insights::{self, Insight};
use crate::instruments::{self, Instrument, InstrumentFilter};
use crate::price_series::{self, PriceSeries};
use crate::reports::{self, ScanManifest};
use crate::scanner::{SeasonalSlot, WindowScanner};
use crate::storage_utils::{AppConfig, AsyncStorageManager};

const INSIGHTS_FILE: &str = "insights.csv";
const CONCURRENT_READS: usize = 8;

/// Directories and settings for one run, built once at startup.
pub struct Workspace {
    pub config: AppConfig,
    pub data: AsyncStorageManager,
    pub slots: AsyncStorageManager,
    pub output: AsyncStorageManager,
}

impl Workspace {
    pub async fn open(config: AppConfig) -> Result<Self> {
        let data = AsyncStorageManager::new(&config.data_dir)
            .await
            .with_context(|| format!("opening data directory {}", config.data_dir.display()))?;
        let output = AsyncStorageManager::new(&config.output_dir)
            .await
            .with_context(|| format!("opening output directory {}", config.output_dir.display()))?;
        let slots = AsyncStorageManager::new(config.output_dir.join("slots")).await?;
        Ok(Self {
            config,
            data,
            slots,
            output,
        })
    }

    pub async fn load_series(&self, instrument: &Instrument) -> crate::error::Result<PriceSeries> {
        let bytes = self.data.read(&instrument.file_name).await.map_err(|e| {
            ScreenerError::input(&instrument.id, format!("cannot read {}: {e}", instrument.file_name))
        })?;
        PriceSeries::from_csv(&instrument.id, &bytes)
    }

    /// Finds the stored instrument with this exact id.
    pub async fn find_instrument(&self, id: &str) -> crate::error::Result<Option<Instrument>> {
        let filter = InstrumentFilter {
            symbols: vec![id.to_string()],
            search: None,
        };
        Ok(instruments::discover(&self.data, &filter).await?.into_iter().next())
    }
}

/// Set from the Ctrl-C handler; batches check it between instruments only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<String>,
    /// Completed with nothing to report (no slots or no qualifying slot).
    pub empty: Vec<String>,
    pub failures: Vec<(String, String)>,
    pub cancelled: bool,
}

impl BatchReport {
    fn fail(&mut self, id: &str, err: &ScreenerError) {
        log::error!("{}: {}", id, err);
        self.failures.push((id.to_string(), err.to_string()));
    }

    pub fn log_summary(&self, stage: &str) {
        log::info!(
            "{} finished: {} completed, {} empty, {} failed{}",
            stage,
            self.completed.len(),
            self.empty.len(),
            self.failures.len(),
            if self.cancelled { " (cancelled)" } else { "" }
        );
    }
}

/// Scans one instrument and replaces its slot table and manifest.
///
/// The table is written under a new generation name first; the manifest
/// rename that points at it is the commit. On any failure the previous
/// manifest and its table stay in place.
pub async fn scan_instrument(
    workspace: &Workspace,
    scanner: Arc<WindowScanner>,
    instrument: &Instrument,
) -> crate::error::Result<usize> {
    let series = workspace.load_series(instrument).await?;

    let id = instrument.id.clone();
    let (series, slots) = tokio::task::spawn_blocking(move || {
        let slots = scanner.scan(&series);
        (series, slots)
    })
    .await
    .map_err(|e| ScreenerError::input(&id, format!("scan task failed: {e}")))?;

    let previous: Option<ScanManifest> = workspace.slots.load(&instrument.id).await.ok();
    let generation = previous.as_ref().map_or(1, |m| m.generation + 1);
    let manifest = ScanManifest::new(&instrument.name, &series, slots.len(), generation);
    let table_file = manifest.table_file();

    // 1. Stage the table under its own generation name
    let table = reports::slots_to_csv(&slots)?;
    workspace.slots.write_atomic(&table_file, &table).await?;

    // 2. Commit by renaming the manifest into place
    if let Err(e) = workspace.slots.save(&instrument.id, &manifest).await {
        let _ = workspace.slots.remove(&table_file).await;
        return Err(e);
    }

    // 3. Drop the table the previous manifest pointed at
    if let Some(old) = previous.map(|m| m.table_file()).filter(|f| *f != table_file) {
        if let Err(e) = workspace.slots.remove(&old).await {
            log::warn!("{}: could not remove superseded table {}: {}", instrument.id, old, e);
        }
    }
    Ok(slots.len())
}

/// Step 1: scan every matching instrument in the data directory.
pub async fn run_scan_batch(
    workspace: &Workspace,
    filter: &InstrumentFilter,
    cancel: &CancelFlag,
) -> Result<BatchReport> {
    let scanner = Arc::new(WindowScanner::new(&workspace.config.scan)?);
    let instruments = instruments::discover(&workspace.data, filter).await?;
    log::info!(
        "scanning {} instruments on {} threads",
        instruments.len(),
        scanner.threads()
    );

    let mut report = BatchReport::default();
    let total = instruments.len();
    for (i, instrument) in instruments.iter().enumerate() {
        if cancel.is_cancelled() {
            log::warn!("scan cancelled before {}", instrument.id);
            report.cancelled = true;
            break;
        }

        log::info!("[{}/{}] scanning {}", i + 1, total, instrument.file_name);
        let started = Instant::now();
        match scan_instrument(workspace, Arc::clone(&scanner), instrument).await {
            Ok(0) => {
                log::warn!("{}: no window produced an observation", instrument.id);
                report.empty.push(instrument.id.clone());
            }
            Ok(count) => {
                log::info!(
                    "{}: {} slots in {:.1}s",
                    instrument.id,
                    count,
                    started.elapsed().as_secs_f64()
                );
                report.completed.push(instrument.id.clone());
            }
            Err(e) => report.fail(&instrument.id, &e),
        }
    }

    report.log_summary("scan");
    Ok(report)
}

/// Reads the slot table committed by an instrument's manifest.
pub async fn load_slots(
    workspace: &Workspace,
    id: &str,
) -> crate::error::Result<(ScanManifest, Vec<SeasonalSlot>)> {
    let manifest: ScanManifest = workspace
        .slots
        .load(id)
        .await
        .map_err(|e| ScreenerError::input(id, format!("no scan manifest: {e}")))?;
    manifest.check_version()?;

    let table_file = manifest.table_file();
    let bytes = workspace
        .slots
        .read(&table_file)
        .await
        .map_err(|e| ScreenerError::input(id, format!("slot table {table_file} missing: {e}")))?;
    let slots = reports::slots_from_csv(id, &bytes)?;
    if slots.len() != manifest.slot_count {
        return Err(ScreenerError::input(
            id,
            format!(
                "{} holds {} slots but the manifest records {}; rescan the instrument",
                table_file,
                slots.len(),
                manifest.slot_count
            ),
        ));
    }
    Ok((manifest, slots))
}

async fn select_from_stored(
    workspace: &Workspace,
    manifest_file: &str,
) -> crate::error::Result<(String, Option<Insight>)> {
    let (manifest, slots) = load_slots(workspace, manifest_file.trim_end_matches(".json")).await?;
    let insight = Insight::select(
        &manifest.instrument_id,
        &manifest.instrument_name,
        &slots,
        &workspace.config.selection,
    );
    Ok((manifest.instrument_id, insight))
}

/// Step 2: pick the best slot per scanned instrument and overwrite the
/// ranked insight table.
pub async fn run_insights_batch(workspace: &Workspace) -> Result<(Vec<Insight>, BatchReport)> {
    let manifests = workspace.slots.list("json").await?;
    log::info!("selecting insights from {} slot tables", manifests.len());

    let results: Vec<(String, crate::error::Result<(String, Option<Insight>)>)> =
        stream::iter(manifests)
            .map(|file| async move {
                let outcome = select_from_stored(workspace, &file).await;
                (file, outcome)
            })
            .buffer_unordered(CONCURRENT_READS)
            .collect()
            .await;

    let mut report = BatchReport::default();
    let mut corpus = Vec::new();
    for (file, outcome) in results {
        match outcome {
            Ok((_, Some(insight))) => {
                report.completed.push(insight.instrument_id.clone());
                corpus.push(insight);
            }
            Ok((id, None)) => {
                log::debug!("{}: no slot passes the filters", id);
                report.empty.push(id);
            }
            Err(e) => report.fail(file.trim_end_matches(".json"), &e),
        }
    }

    insights::rank(&mut corpus);
    let table = reports::insights_to_csv(&corpus)?;
    workspace.output.write_atomic(INSIGHTS_FILE, &table).await?;
    log::info!(
        "wrote {} insights to {}",
        corpus.len(),
        workspace.output.path(INSIGHTS_FILE).display()
    );

    report.completed.sort();
    report.empty.sort();
    report.log_summary("insights");
    Ok((corpus, report))
}

/// Reads the last written insight table.
pub async fn load_insights(workspace: &Workspace) -> Result<Vec<reports::InsightRow>> {
    let bytes = workspace
        .output
        .read(INSIGHTS_FILE)
        .await
        .context("no insight table yet; run `insights` first")?;
    Ok(reports::insights_from_csv(&bytes)?)
}

/// Appends bars newer than the stored history from `update` (same CSV
/// layout) and rewrites the instrument file. Creates the file when the
/// instrument is new. Returns the number of appended bars.
pub async fn ingest(workspace: &Workspace, id: &str, name: Option<&str>, update: &[u8]) -> Result<usize> {
    let candidates = price_series::parse_bars(id, update)?;

    let (file_name, series, appended) = match workspace.find_instrument(id).await? {
        Some(existing) => {
            let mut series = workspace.load_series(&existing).await?;
            let appended = series.append_newer(candidates);
            (existing.file_name, series, appended)
        }
        None => {
            let appended = candidates.len();
            let series = PriceSeries::new(id, candidates)?;
            (Instrument::file_name_for(id, name.unwrap_or(id))?, series, appended)
        }
    };

    if appended > 0 {
        workspace.data.write_atomic(&file_name, &series.to_csv()?).await?;
    }
    log::info!("{}: appended {} bars, history ends {}", id, appended, series.last_date());
    Ok(appended)
}
