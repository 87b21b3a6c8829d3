//! Append-only JSON-lines audit journal.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::{TransferEvent, TransferSink};
use crate::error::Result;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line<'a> {
    Transfer(&'a TransferEvent),
    Message {
        at: DateTime<Utc>,
        partner: &'a str,
        text: &'a str,
    },
}

/// Writes one JSON object per line; each write is flushed.
#[derive(Debug)]
pub struct JsonLinesJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesJournal {
    /// Open `path` for appending, creating it (and its directory) if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &Line<'_>) -> Result<()> {
        let mut encoded = serde_json::to_vec(line)?;
        encoded.push(b'\n');
        let mut file = self.file.lock();
        file.write_all(&encoded)?;
        file.flush()?;
        Ok(())
    }
}

impl TransferSink for JsonLinesJournal {
    fn record(&self, event: &TransferEvent) -> Result<()> {
        self.append(&Line::Transfer(event))
    }

    fn message(&self, partner: &str, text: &str) -> Result<()> {
        self.append(&Line::Message {
            at: Utc::now(),
            partner,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{sample_event, EventKind};

    #[test]
    fn test_lines_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit/transfers.jsonl");
        let journal = JsonLinesJournal::open(&path).unwrap();

        journal.record(&sample_event(EventKind::Started)).unwrap();
        journal.message("LOOP", "hello").unwrap();
        journal.record(&sample_event(EventKind::Completed)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "transfer");
        assert_eq!(lines[0]["kind"], "started");
        assert_eq!(lines[1]["type"], "message");
        assert_eq!(lines[1]["text"], "hello");
        assert_eq!(lines[2]["bytes"], 51);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        JsonLinesJournal::open(&path)
            .unwrap()
            .record(&sample_event(EventKind::Started))
            .unwrap();
        JsonLinesJournal::open(&path)
            .unwrap()
            .record(&sample_event(EventKind::Failed))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
