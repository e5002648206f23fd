use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{Result, ScreenerError};

// CONFIGURATION STRUCTS
// Loaded from `config.json` in the storage directory. Every field has a
// default, so a partial file only overrides what it names.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub max_window_days: u16, // longest window evaluated, 1..=365
    pub threads: Option<usize>, // None = one worker per core
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_window_days: 365,
            threads: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SelectionConfig {
    pub consistency_min: f64,
    pub total_years_min: u32,
    pub min_return_threshold: f64, // 0.15 = +15% in the worst year
    pub window_size_min: u16,
    pub window_size_max: u16,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            consistency_min: 0.80,
            total_years_min: 2,
            min_return_threshold: 0.15,
            window_size_min: 3,
            window_size_max: 15,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SignalConfig {
    pub cross_fast: usize,
    pub cross_slow: usize,
    pub trend_windows: Vec<usize>,
    pub volume_spike_lookback: usize,
    pub volume_spike_threshold: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            cross_fast: 50,
            cross_slow: 200,
            trend_windows: vec![20, 50, 200],
            volume_spike_lookback: 50,
            volume_spike_threshold: 2.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    // Relative directories are resolved against the storage directory.
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_level: String,
    pub scan: ScanConfig,
    pub selection: SelectionConfig,
    pub signals: SignalConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("historical_data"),
            output_dir: PathBuf::from("reports"),
            log_level: "info".to_string(),
            scan: ScanConfig::default(),
            selection: SelectionConfig::default(),
            signals: SignalConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(ScreenerError::Config(msg.to_string()));

        if !(1..=365).contains(&self.scan.max_window_days) {
            return fail("scan.max_window_days must be within 1..=365");
        }
        if self.scan.threads == Some(0) {
            return fail("scan.threads must be at least 1");
        }
        let sel = &self.selection;
        if sel.window_size_min == 0 || sel.window_size_min > sel.window_size_max {
            return fail("selection.window_size_min must be >= 1 and <= window_size_max");
        }
        if !(0.0..=1.0).contains(&sel.consistency_min) {
            return fail("selection.consistency_min must be within 0..=1");
        }
        let sig = &self.signals;
        if sig.cross_fast == 0 || sig.cross_fast >= sig.cross_slow {
            return fail("signals.cross_fast must be >= 1 and below cross_slow");
        }
        if sig.trend_windows.contains(&0) {
            return fail("signals.trend_windows must not contain 0");
        }
        if sig.volume_spike_lookback == 0 || sig.volume_spike_threshold <= 0.0 {
            return fail("signals.volume_spike_lookback and threshold must be positive");
        }
        Ok(())
    }

    /// Anchors relative data/output directories at `base`.
    pub fn resolve_dirs(&mut self, base: &Path) {
        if self.data_dir.is_relative() {
            self.data_dir = base.join(&self.data_dir);
        }
        if self.output_dir.is_relative() {
            self.output_dir = base.join(&self.output_dir);
        }
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Creates a manager rooted at `base_dir`, creating the directory up front
    /// so later writes never have to check for it.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !fs::try_exists(&base_dir).await.unwrap_or(false) {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    /// **Constructor: new_relative**
    /// Storage directory next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> Result<Self> {
        // 1. Locate the running executable
        let exe_path = std::env::current_exe()?;
        // 2. Resolve the parent directory and append the relative path
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| ScreenerError::Config("could not find binary directory".into()))?
            .join(relative_path);
        Self::new(base_dir).await
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.base_dir.join(file_name)
    }

    /// **Atomic Write**
    /// Writes `bytes` to `<file_name>.tmp` and renames it over the target, so
    /// a failed write leaves the previous file untouched.
    pub async fn write_atomic(&self, file_name: &str, bytes: &[u8]) -> Result<()> {
        let final_path = self.path(file_name);
        let tmp_path = self.path(&format!("{}.tmp", file_name));

        let persist = |source| ScreenerError::Persistence {
            path: final_path.clone(),
            source,
        };

        // 1. Write data to the temporary file
        if let Err(e) = fs::write(&tmp_path, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(persist(e));
        }
        // 2. Atomically rename the temp file to the final name.
        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(persist(e));
        }
        Ok(())
    }

    /// **Generic Save Function**
    /// Takes any struct that implements `Serialize` and saves it to
    /// `<filename>.json` through [`Self::write_atomic`].
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        let json_bytes = serde_json::to_vec_pretty(data)?;
        self.write_atomic(&format!("{}.json", filename), &json_bytes).await
    }

    /// **Generic Load Function**
    /// Reads `<filename>.json` and deserializes it into `T`.
    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let content = fs::read(self.path(&format!("{}.json", filename))).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub async fn read(&self, file_name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path(file_name)).await?)
    }

    /// Removes a file; a file that is already gone is not an error.
    pub async fn remove(&self, file_name: &str) -> Result<()> {
        match fs::remove_file(self.path(file_name)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub async fn exists(&self, file_name: &str) -> bool {
        fs::try_exists(self.path(file_name)).await.unwrap_or(false)
    }

    /// File names in the storage directory ending in `.{extension}`, sorted.
    pub async fn list(&self, extension: &str) -> Result<Vec<String>> {
        let suffix = format!(".{}", extension);
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(&suffix) && entry.file_type().await?.is_file() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Loads `config.json`, writing the defaults first when it does not exist.
    pub async fn load_or_init_config(&self) -> Result<AppConfig> {
        if !self.exists("config.json").await {
            log::info!("writing default configuration to {}", self.path("config.json").display());
            self.save("config", &AppConfig::default()).await?;
        }
        let config: AppConfig = self.load("config").await?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = AppConfig::default();
        assert_eq!(config.selection.consistency_min, 0.80);
        assert_eq!(config.selection.total_years_min, 2);
        assert_eq!(config.selection.min_return_threshold, 0.15);
        assert_eq!((config.selection.window_size_min, config.selection.window_size_max), (3, 15));
        assert_eq!(config.signals.trend_windows, vec![20, 50, 200]);
        assert_eq!(config.signals.volume_spike_lookback, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"selection": {"consistency_min": 0.6}}"#).unwrap();
        assert_eq!(config.selection.consistency_min, 0.6);
        assert_eq!(config.selection.window_size_max, 15);
        assert_eq!(config.scan.max_window_days, 365);
    }

    #[test]
    fn rejects_inverted_window_bounds() {
        let mut config = AppConfig::default();
        config.selection.window_size_min = 20;
        assert!(matches!(config.validate(), Err(ScreenerError::Config(_))));
    }

    #[tokio::test]
    async fn atomic_write_replaces_whole_file() {
        let dir = tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path().join("out")).await.unwrap();
        storage.write_atomic("a.csv", b"first,version\n").await.unwrap();
        storage.write_atomic("a.csv", b"second\n").await.unwrap();
        assert_eq!(storage.read("a.csv").await.unwrap(), b"second\n");
        assert!(!storage.exists("a.csv.tmp").await);
        assert_eq!(storage.list("csv").await.unwrap(), vec!["a.csv".to_string()]);

        storage.remove("a.csv").await.unwrap();
        storage.remove("a.csv").await.unwrap();
        assert!(storage.list("csv").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_file() {
        let dir = tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        storage.write_atomic("keep.csv", b"old\n").await.unwrap();
        // A directory squatting on the temp path makes the write fail.
        std::fs::create_dir(dir.path().join("keep.csv.tmp")).unwrap();
        let err = storage.write_atomic("keep.csv", b"new\n").await.unwrap_err();
        assert!(matches!(err, ScreenerError::Persistence { .. }));
        assert_eq!(storage.read("keep.csv").await.unwrap(), b"old\n");
    }

    #[tokio::test]
    async fn config_is_initialised_on_first_load() {
        let dir = tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let config = storage.load_or_init_config().await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(storage.exists("config.json").await);
    }
}
