use regex::Regex;
use std::sync::LazyLock;

use crate::error::{Result, ScreenerError};
use crate::storage_utils::AsyncStorageManager;

// "RELIANCE - Reliance Industries Limited.csv" -> ("RELIANCE", "Reliance Industries Limited")
static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<id>[^ ]+?)(?: - (?P<name>.+))?\.csv$").expect("static pattern")
});

// Ids become file names: no spaces (the name separator) and no path separators.
static INSTRUMENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^ /\\]+$").expect("static pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    pub id: String,
    pub name: String,
    pub file_name: String,
}

impl Instrument {
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let caps = FILE_NAME.captures(file_name)?;
        let id = caps.name("id")?.as_str().to_string();
        let name = caps
            .name("name")
            .map(|m| m.as_str().trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.clone());
        Some(Self {
            id,
            name,
            file_name: file_name.to_string(),
        })
    }

    /// File name for a newly ingested instrument, keeping only characters
    /// of `name` that are safe in a file name. Fails for ids that could not
    /// be discovered again from the resulting file name.
    pub fn file_name_for(id: &str, name: &str) -> Result<String> {
        if !INSTRUMENT_ID.is_match(id) || id == "." || id == ".." {
            return Err(ScreenerError::input(
                id,
                "instrument ids must be non-empty without spaces or path separators",
            ));
        }
        let sanitized: String = name
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '.')
            .collect();
        let sanitized = sanitized.trim();
        let file_name = if sanitized.is_empty() || sanitized == id {
            format!("{}.csv", id)
        } else {
            format!("{} - {}.csv", id, sanitized)
        };

        match Self::from_file_name(&file_name) {
            Some(parsed) if parsed.id == id => Ok(file_name),
            _ => Err(ScreenerError::input(id, format!("{file_name:?} would not map back to this id"))),
        }
    }
}

/// Which instruments a batch should touch.
#[derive(Debug, Clone, Default)]
pub struct InstrumentFilter {
    /// Exact ids, compared case-insensitively. Empty means all.
    pub symbols: Vec<String>,
    /// Case-insensitive substring of id or name.
    pub search: Option<String>,
}

impl InstrumentFilter {
    pub fn matches(&self, instrument: &Instrument) -> bool {
        let symbol_ok = self.symbols.is_empty()
            || self.symbols.iter().any(|s| s.eq_ignore_ascii_case(&instrument.id));
        let search_ok = match &self.search {
            Some(term) => {
                let term = term.to_lowercase();
                instrument.id.to_lowercase().contains(&term)
                    || instrument.name.to_lowercase().contains(&term)
            }
            None => true,
        };
        symbol_ok && search_ok
    }
}

/// Instruments with a bar file in the data directory, sorted by file name.
pub async fn discover(data: &AsyncStorageManager, filter: &InstrumentFilter) -> Result<Vec<Instrument>> {
    let files = data.list("csv").await?;
    let instruments: Vec<Instrument> = files
        .iter()
        .filter_map(|f| {
            let parsed = Instrument::from_file_name(f);
            if parsed.is_none() {
                log::warn!("ignoring unrecognised data file {}", f);
            }
            parsed
        })
        .filter(|i| filter.matches(i))
        .collect();

    log::info!(
        "found {} instrument files in {}",
        instruments.len(),
        data.base_dir.display()
    );
    Ok(instruments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_symbol_and_display_name() {
        let i = Instrument::from_file_name("RELIANCE - Reliance Industries Limited.csv").unwrap();
        assert_eq!(i.id, "RELIANCE");
        assert_eq!(i.name, "Reliance Industries Limited");

        let bare = Instrument::from_file_name("TCS.csv").unwrap();
        assert_eq!(bare.id, "TCS");
        assert_eq!(bare.name, "TCS");

        assert!(Instrument::from_file_name("notes.txt").is_none());
    }

    #[test]
    fn builds_sanitized_file_names() {
        assert_eq!(
            Instrument::file_name_for("M&M", "Mahindra & Mahindra Ltd.").unwrap(),
            "M&M - Mahindra  Mahindra Ltd..csv"
        );
        assert_eq!(Instrument::file_name_for("TCS", "TCS").unwrap(), "TCS.csv");
        assert_eq!(Instrument::file_name_for("BRK.B", " ").unwrap(), "BRK.B.csv");
    }

    #[test]
    fn rejects_ids_that_are_not_plain_file_names() {
        for id in ["A B", "", "../etc", "a/b", r"a\b", ".", ".."] {
            let err = Instrument::file_name_for(id, "Name").unwrap_err();
            assert!(matches!(err, ScreenerError::Input { .. }), "{id:?}");
        }
    }

    #[test]
    fn filter_by_symbols_and_search() {
        let i = Instrument::from_file_name("INFY - Infosys Limited.csv").unwrap();
        assert!(InstrumentFilter::default().matches(&i));
        let by_symbol = InstrumentFilter {
            symbols: vec!["infy".into()],
            search: None,
        };
        assert!(by_symbol.matches(&i));
        let by_search = InstrumentFilter {
            symbols: vec![],
            search: Some("INFOSYS".into()),
        };
        assert!(by_search.matches(&i));
        let miss = InstrumentFilter {
            symbols: vec!["TCS".into()],
            search: Some("infosys".into()),
        };
        assert!(!miss.matches(&i));
    }

    #[tokio::test]
    async fn discovers_csv_files_in_order() {
        let dir = tempdir().unwrap();
        for f in ["B - Beta.csv", "A - Alpha.csv", "readme.md"] {
            std::fs::write(dir.path().join(f), "").unwrap();
        }
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let found = discover(&storage, &InstrumentFilter::default()).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }
}
