// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! JSONL attempt log: one line per booking attempt plus one per run.
//!
//! - Append-only, so runs from a scheduler accumulate in one place
//! - Rotated when the file exceeds `MAX_LOG_SIZE` (10MB)
//! - Rotated files named `.1`, `.2`, etc. (max 5 rotations)

use anyhow::{Context, Result};
use chrono::Utc;
use seatclaim::{AttemptRecord, Booking, OutcomeKind};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Maximum log size before rotation (10 MB).
pub const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated log files to keep.
pub const MAX_ROTATIONS: u32 = 5;

/// One line of the attempt log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    Attempt {
        timestamp: String,
        run_id: String,
        candidate: usize,
        label: String,
        entity_id: Option<i64>,
        display_name: Option<String>,
        outcome: OutcomeKind,
        status: Option<u16>,
        elapsed_ms: u64,
        detail: Option<String>,
    },
    Run {
        timestamp: String,
        run_id: String,
        success: bool,
        label: Option<String>,
        entity_id: Option<i64>,
        date: Option<String>,
        submissions: usize,
        response_body: Option<String>,
        error: Option<String>,
    },
}

/// Append-only attempt logger with automatic rotation.
pub struct AttemptLogger {
    file: File,
    path: PathBuf,
    max_size: u64,
    current_size: u64,
}

impl AttemptLogger {
    /// Open or create the log file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(path)
            .with_context(|| format!("failed to open attempt log: {}", path.display()))?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            max_size: MAX_LOG_SIZE,
            current_size,
        })
    }

    /// Open the default log at ~/.seatclaim/attempts.jsonl.
    pub fn default_logger() -> Result<Self> {
        Self::open(&default_log_path())
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&mut self, entry: &AuditEntry) -> Result<()> {
        if self.current_size >= self.max_size {
            self.rotate()?;
        }

        let json = serde_json::to_string(entry)?;
        writeln!(self.file, "{json}")?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    pub fn log_attempt(&mut self, run_id: &str, record: &AttemptRecord) -> Result<()> {
        self.log(&AuditEntry::Attempt {
            timestamp: Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            candidate: record.candidate,
            label: record.label.clone(),
            entity_id: record.entity.as_ref().map(|e| e.id),
            display_name: record.entity.as_ref().map(|e| e.display_name.clone()),
            outcome: record.outcome,
            status: record.status,
            elapsed_ms: record.elapsed_ms,
            detail: record.detail.clone(),
        })
    }

    /// Log the terminal result of a run. `submissions` is used on failure.
    pub fn log_run(
        &mut self,
        run_id: &str,
        result: Result<&Booking, &str>,
        submissions: usize,
    ) -> Result<()> {
        let entry = match result {
            Ok(b) => AuditEntry::Run {
                timestamp: Utc::now().to_rfc3339(),
                run_id: run_id.to_string(),
                success: true,
                label: Some(b.label.clone()),
                entity_id: Some(b.entity.id),
                date: Some(b.window.date.to_string()),
                submissions: b.submissions,
                response_body: Some(b.response_body.clone()),
                error: None,
            },
            Err(error) => AuditEntry::Run {
                timestamp: Utc::now().to_rfc3339(),
                run_id: run_id.to_string(),
                success: false,
                label: None,
                entity_id: None,
                date: None,
                submissions,
                response_body: None,
                error: Some(error.to_string()),
            },
        };
        self.log(&entry)
    }

    /// Rotate: attempts.jsonl → attempts.jsonl.1, .1 → .2, etc.
    fn rotate(&mut self) -> Result<()> {
        self.file.flush()?;

        let oldest = rotation_path(&self.path, MAX_ROTATIONS);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                let _ = std::fs::rename(&from, rotation_path(&self.path, i + 1));
            }
        }
        let _ = std::fs::rename(&self.path, rotation_path(&self.path, 1));

        self.file =
            open_append(&self.path).context("failed to reopen attempt log after rotation")?;
        self.current_size = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

pub fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".seatclaim")
        .join("attempts.jsonl")
}

/// `attempts.jsonl.1`, `attempts.jsonl.2`, etc.
fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attempts.jsonl")
    );
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatclaim::{AcquisitionWindow, Entity, TimeOfDay};

    fn record(candidate: usize, outcome: OutcomeKind) -> AttemptRecord {
        AttemptRecord {
            candidate,
            label: "171".to_string(),
            entity: Some(Entity::new(1, "6-171")),
            outcome,
            status: Some(400),
            elapsed_ms: 12,
            detail: Some("Seat already booked".to_string()),
        }
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_attempt_and_run_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("attempts.jsonl");
        let mut logger = AttemptLogger::open(&path).unwrap();

        logger.log_attempt("run-1", &record(0, OutcomeKind::Contention)).unwrap();
        let booking = Booking {
            label: "200".to_string(),
            entity: Entity::new(2, "6-200"),
            window: AcquisitionWindow::new(
                chrono::NaiveDate::from_ymd_opt(2026, 3, 16).unwrap(),
                TimeOfDay::parse("09:45 AM").unwrap(),
                TimeOfDay::parse("11:59 PM").unwrap(),
            ),
            response_body: "{\"ok\":true}".to_string(),
            submissions: 2,
        };
        logger.log_run("run-1", Ok(&booking), 0).unwrap();
        logger.log_run("run-2", Err("Session error: login failed"), 0).unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["kind"], "attempt");
        assert_eq!(lines[0]["display_name"], "6-171");
        assert_eq!(lines[0]["outcome"], "contention");
        assert_eq!(lines[1]["kind"], "run");
        assert_eq!(lines[1]["success"], true);
        assert_eq!(lines[1]["date"], "2026-03-16");
        assert_eq!(lines[1]["submissions"], 2);
        assert_eq!(lines[2]["success"], false);
        assert_eq!(lines[2]["error"], "Session error: login failed");
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attempts.jsonl");
        AttemptLogger::open(&path)
            .unwrap()
            .log_attempt("a", &record(0, OutcomeKind::Success))
            .unwrap();
        AttemptLogger::open(&path)
            .unwrap()
            .log_attempt("b", &record(1, OutcomeKind::Other))
            .unwrap();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["run_id"], "b");
    }

    #[test]
    fn test_rotation_keeps_bounded_generations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attempts.jsonl");
        let mut logger = AttemptLogger::open(&path).unwrap().with_max_size(1);

        // Every write after the first rotates.
        for i in 0..(MAX_ROTATIONS + 3) {
            logger
                .log_attempt(&format!("run-{i}"), &record(0, OutcomeKind::Contention))
                .unwrap();
        }

        assert!(path.exists());
        for i in 1..=MAX_ROTATIONS {
            assert!(rotation_path(&path, i).exists(), "missing generation {i}");
        }
        assert!(!rotation_path(&path, MAX_ROTATIONS + 1).exists());

        let newest = read_lines(&path);
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0]["run_id"], format!("run-{}", MAX_ROTATIONS + 2));
        let previous = read_lines(&rotation_path(&path, 1));
        assert_eq!(previous[0]["run_id"], format!("run-{}", MAX_ROTATIONS + 1));
    }

    #[test]
    fn test_rotation_path() {
        let p = rotation_path(Path::new("/x/attempts.jsonl"), 3);
        assert_eq!(p, PathBuf::from("/x/attempts.jsonl.3"));
    }
}
