//! Transcription history
//!
//! Each successful polish appends a raw/polished pair to a JSON file in the
//! data directory so earlier dictations can be recovered or diffed.

use crate::config::Config;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub raw: String,
    pub polished: String,
    pub timestamp: String,
}

/// Default history file location
pub fn history_path() -> PathBuf {
    Config::data_dir().join("history.json")
}

/// Append one raw/polished pair to the history file
pub fn append(path: &Path, raw: &str, polished: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut records: Vec<HistoryEntry> = if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).unwrap_or_default()
    } else {
        Vec::new()
    };

    records.push(HistoryEntry {
        raw: raw.to_string(),
        polished: polished.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    });

    let json = serde_json::to_string_pretty(&records)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    std::fs::write(path, json + "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_creates_and_extends_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        append(&path, "um hello", "Hello.").unwrap();
        append(&path, "uh bye", "Bye.").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<HistoryEntry> = serde_json::from_str(&contents).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].raw, "um hello");
        assert_eq!(records[0].polished, "Hello.");
        assert_eq!(records[1].polished, "Bye.");
        assert!(!records[0].timestamp.is_empty());
    }

    #[test]
    fn test_corrupt_history_is_replaced_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "not json").unwrap();

        append(&path, "raw", "polished").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<HistoryEntry> = serde_json::from_str(&contents).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_append_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/history.json");
        append(&path, "a", "b").unwrap();
        assert!(path.exists());
    }
}
