//! Check-in journal - appends saved check-ins to file
//!
//! Check-ins are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::types::{iso_millis, LocationId, VisitEntry};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One saved check-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    pub site: String,
    pub location_id: LocationId,
    pub name: String,
    pub wait_seconds: f64,
    pub timestamp: String,
    pub day_of_week: u8,
    pub hour_of_day: u8,
}

impl JournalEntry {
    pub fn new(site: &str, location_id: &LocationId, name: &str, visit: &VisitEntry) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            site: site.to_string(),
            location_id: location_id.clone(),
            name: name.to_string(),
            wait_seconds: visit.wait_seconds,
            timestamp: iso_millis(&visit.timestamp),
            day_of_week: visit.day_of_week,
            hour_of_day: visit.hour_of_day,
        }
    }
}

/// Journal writer for saved check-ins
pub struct Journal {
    file_path: String,
}

impl Journal {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "journal_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write an entry to the journal file
    /// Returns true if successful, false otherwise
    pub fn write_entry(&self, entry: &JournalEntry) -> bool {
        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                error!(location_id = %entry.location_id, error = %e, "journal_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                info!(
                    entry_id = %entry.id,
                    location_id = %entry.location_id,
                    wait_secs = %entry.wait_seconds,
                    "check_in_journaled"
                );
                true
            }
            Err(e) => {
                error!(location_id = %entry.location_id, error = %e, "journal_write_failed");
                false
            }
        }
    }

    /// Append a line to the journal file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "journal_written");

        Ok(())
    }

    /// Read every entry back; malformed lines are skipped
    pub fn read_entries(path: &Path) -> std::io::Result<Vec<JournalEntry>> {
        let file = std::fs::File::open(path)?;
        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = index + 1, error = %e, "journal_line_skipped"),
            }
        }
        Ok(entries)
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn visit() -> VisitEntry {
        VisitEntry {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 3, 15, 30, 0).unwrap(),
            wait_seconds: 90.0,
            day_of_week: 3,
            hour_of_day: 15,
        }
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("checkins.jsonl");
        let journal = Journal::new(path.to_str().unwrap());

        let entry = JournalEntry::new("clinic", &LocationId::new("loc1"), "Clinic", &visit());
        assert!(journal.write_entry(&entry));
        assert!(journal.write_entry(&entry));

        let entries = Journal::read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, "2024-01-03T15:30:00.000Z");
        assert_eq!(entries[0].wait_seconds, 90.0);
    }

    #[test]
    fn test_entry_json_uses_camel_case() {
        let entry = JournalEntry::new("s", &LocationId::new("loc1"), "Clinic", &visit());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["locationId"], "loc1");
        assert_eq!(json["dayOfWeek"], 3);
        assert_eq!(json["hourOfDay"], 15);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkins.jsonl");
        let good = serde_json::to_string(&JournalEntry::new("s", &LocationId::new("a"), "A", &visit())).unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n\n{good}\n")).unwrap();

        assert_eq!(Journal::read_entries(&path).unwrap().len(), 2);
    }
}
