// src/history.rs

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::timing::YearMonth;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("Cannot parse history file {path}: {source}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("Invalid month format '{0}', expected YYYY-MM")]
    InvalidMonth(String),
}

fn io_context<E: Into<std::io::Error>, S: Into<String>>(source: E, context: S) -> HistoryError {
    HistoryError::Io {
        source: source.into(),
        context: context.into(),
    }
}

/// Read side of the report history, as needed by the date-range rules.
pub trait HistoryStore: Send + Sync {
    fn last_report_date(&self) -> Result<Option<NaiveDate>, HistoryError>;
}

/// No reports generated yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyHistory;

impl HistoryStore for EmptyHistory {
    fn last_report_date(&self) -> Result<Option<NaiveDate>, HistoryError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub last_cutoff_date: NaiveDate,
    pub generated_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regenerated_at: Option<NaiveDateTime>,
}

// --- History File Manager ---

/// Report history persisted as `history.json`, keyed by `YYYY-MM`.
#[derive(Debug)]
pub struct HistoryManager {
    path: PathBuf,
    entries: BTreeMap<String, HistoryEntry>,
    loaded: bool,
}

impl HistoryManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
            loaded: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(path: &Path) -> Result<BTreeMap<String, HistoryEntry>, HistoryError> {
        if !path.exists() {
            debug!("No history file at {}, starting empty", path.display());
            return Ok(BTreeMap::new());
        }
        let data = fs::read_to_string(path)
            .map_err(|e| io_context(e, format!("Failed to read history file {}", path.display())))?;
        serde_json::from_str(&data).map_err(|source| HistoryError::Corrupted {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(&mut self) -> Result<(), HistoryError> {
        self.entries = Self::read_file(&self.path)?;
        self.loaded = true;
        Ok(())
    }

    fn ensure_loaded(&mut self) -> Result<(), HistoryError> {
        if !self.loaded {
            self.load()?;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                io_context(e, format!("Failed to create directory {}", parent.display()))
            })?;
        }

        let json = serde_json::to_string_pretty(&self.entries)?;
        let mut file = File::create(&self.path).map_err(|e| {
            io_context(e, format!("Failed to create history file {}", self.path.display()))
        })?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|e| io_context(e, "Failed to write history file"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .map_err(|e| io_context(e, "Failed to restrict history file permissions"))?;
        }

        info!("Saved {} history entries to {}", self.entries.len(), self.path.display());
        Ok(())
    }

    /// Records the cutoff for `month`; an existing month keeps its
    /// `generated_at` and gets `regenerated_at` stamped.
    pub fn add_entry(&mut self, month: &str, cutoff: NaiveDate) -> Result<(), HistoryError> {
        self.ensure_loaded()?;
        let key = month
            .parse::<YearMonth>()
            .map_err(|_| HistoryError::InvalidMonth(month.to_string()))?
            .to_string();
        let now = Local::now().naive_local();

        let entry = match self.entries.get(&key) {
            Some(existing) => HistoryEntry {
                last_cutoff_date: cutoff,
                generated_at: existing.generated_at,
                regenerated_at: Some(now),
            },
            None => HistoryEntry {
                last_cutoff_date: cutoff,
                generated_at: now,
                regenerated_at: None,
            },
        };
        self.entries.insert(key, entry);
        Ok(())
    }

    pub fn get_entry(&mut self, month: &str) -> Result<Option<HistoryEntry>, HistoryError> {
        self.ensure_loaded()?;
        Ok(self.entries.get(month).cloned())
    }

    pub fn get_all_entries(&mut self) -> Result<BTreeMap<String, HistoryEntry>, HistoryError> {
        self.ensure_loaded()?;
        Ok(self.entries.clone())
    }
}

impl HistoryStore for HistoryManager {
    // Reads the file fresh so a shared manager never serves a stale cutoff
    fn last_report_date(&self) -> Result<Option<NaiveDate>, HistoryError> {
        let entries = Self::read_file(&self.path)?;
        Ok(entries
            .iter()
            .next_back()
            .map(|(_, entry)| entry.last_cutoff_date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn missing_file_means_no_history() {
        let dir = tempdir().unwrap();
        let manager = HistoryManager::new(dir.path().join("history.json"));
        assert_eq!(manager.last_report_date().unwrap(), None);
    }

    #[test]
    fn save_and_reload_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");
        let mut manager = HistoryManager::new(&path);
        manager.add_entry("2024-10", date(2024, 10, 25)).unwrap();
        manager.add_entry("2024-11", date(2024, 11, 26)).unwrap();
        manager.save().unwrap();

        let mut reloaded = HistoryManager::new(&path);
        let entries = reloaded.get_all_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["2024-10"].last_cutoff_date, date(2024, 10, 25));
        assert_eq!(reloaded.last_report_date().unwrap(), Some(date(2024, 11, 26)));
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut manager = HistoryManager::new(&path);
        manager.add_entry("2024-10", date(2024, 10, 25)).unwrap();
        manager.save().unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn overwrite_marks_regeneration() {
        let dir = tempdir().unwrap();
        let mut manager = HistoryManager::new(dir.path().join("history.json"));
        manager.add_entry("2024-10", date(2024, 10, 25)).unwrap();
        let first = manager.get_entry("2024-10").unwrap().unwrap();
        assert!(first.regenerated_at.is_none());

        manager.add_entry("2024-10", date(2024, 10, 28)).unwrap();
        let second = manager.get_entry("2024-10").unwrap().unwrap();
        assert_eq!(second.generated_at, first.generated_at);
        assert_eq!(second.last_cutoff_date, date(2024, 10, 28));
        assert!(second.regenerated_at.is_some());
    }

    #[test]
    fn month_keys_are_normalized_and_validated() {
        let dir = tempdir().unwrap();
        let mut manager = HistoryManager::new(dir.path().join("history.json"));
        manager.add_entry("2024-3", date(2024, 3, 25)).unwrap();
        assert!(manager.get_entry("2024-03").unwrap().is_some());
        assert!(matches!(
            manager.add_entry("March", date(2024, 3, 25)),
            Err(HistoryError::InvalidMonth(_))
        ));
    }

    #[test]
    fn corrupted_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{not json").unwrap();
        let mut manager = HistoryManager::new(&path);
        assert!(matches!(manager.load(), Err(HistoryError::Corrupted { .. })));
    }
}
