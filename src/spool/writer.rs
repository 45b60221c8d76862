//! Serialised append to the JSONL spool with size-based rotation.
//!
//! Appends are chained behind an async mutex: a new append never begins
//! until the previous one's write has completed, so each append observes
//! the true file size when deciding whether to rotate. Rotation renames the
//! active file to `<name>.<iso-timestamp-with-colons-replaced>.bak` and the
//! next append starts a fresh file. Rotated files are never rewritten or
//! replayed; they are kept for manual recovery.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::types::SpoolRecord;

/// Errors surfaced to the caller; they are reported but must never abort
/// the ingest request.
#[derive(Debug, Error)]
pub enum SpoolWriteError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Single-writer JSONL appender.
pub struct SpoolWriter {
    path: PathBuf,
    max_bytes: u64,
    /// Serialises appends across tasks; held for the whole
    /// size-check / rotate / write sequence.
    write_chain: Mutex<()>,
}

impl SpoolWriter {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        SpoolWriter {
            path: path.into(),
            max_bytes,
            write_chain: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single LF-terminated JSON line.
    pub async fn append(&self, record: &SpoolRecord) -> Result<(), SpoolWriteError> {
        let line = serde_json::to_string(record)?;

        let _chain = self.write_chain.lock().await;

        self.rotate_if_needed()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;

        debug!(
            path = %self.path.display(),
            bytes = line.len() + 1,
            stage = record.stage.as_str(),
            "Spooled record"
        );

        Ok(())
    }

    /// Current size and mtime of the active spool file, if it exists.
    pub fn stat(&self) -> Option<(u64, Option<DateTime<Utc>>)> {
        let meta = fs::metadata(&self.path).ok()?;
        let modified = meta.modified().ok().map(DateTime::<Utc>::from);
        Some((meta.len(), modified))
    }

    /// Renames the active file away when it has reached the size cap.
    fn rotate_if_needed(&self) -> io::Result<()> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        if size < self.max_bytes {
            return Ok(());
        }

        let rotated = rotation_path(&self.path, Utc::now());
        fs::rename(&self.path, &rotated)?;
        // The rename is only durable once the directory entry is synced;
        // without this a crash could resurrect the old, oversized file.
        if let Some(parent) = self.path.parent() {
            fs::File::open(parent)?.sync_all()?;
        }

        info!(
            from = %self.path.display(),
            to = %rotated.display(),
            bytes = size,
            "Rotated spool file"
        );

        Ok(())
    }
}

/// Builds `<path>.<iso-with-colons-replaced>.bak` for a rotation at `now`.
fn rotation_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let stamp = now
        .to_rfc3339_opts(SecondsFormat::Secs, true)
        .replace(':', "-");
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => format!("{}.{}.bak", name, stamp),
        None => format!("{}.bak", stamp),
    };
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpoolStage;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(n: u64) -> SpoolRecord {
        SpoolRecord {
            ts: "2024-05-01T00:00:00.000Z".to_string(),
            kind: "ingest".to_string(),
            stage: SpoolStage::Fallback,
            reason: Some("gas_timeout".to_string()),
            job_id: format!("job_x_{:06}", n),
            trace_id: format!("t-{}", n),
            source: "a".to_string(),
            event_type: "b".to_string(),
            payload: json!({"n": n}),
            received_at: "2024-05-01T00:00:00.000Z".to_string(),
            ingest_latency_ms: 1,
        }
    }

    #[tokio::test]
    async fn append_writes_one_line_per_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let writer = SpoolWriter::new(&path, u64::MAX);

        writer.append(&record(1)).await.unwrap();
        writer.append(&record(2)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(content.ends_with('\n'));

        let parsed: SpoolRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, record(1));
    }

    #[tokio::test]
    async fn append_creates_missing_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deep/spool.jsonl");
        let writer = SpoolWriter::new(&path, u64::MAX);

        writer.append(&record(1)).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn rotation_renames_and_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        // Cap of 1 byte: the second append must rotate first.
        let writer = SpoolWriter::new(&path, 1);

        writer.append(&record(1)).await.unwrap();
        writer.append(&record(2)).await.unwrap();

        let entries: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();

        let baks: Vec<&String> = entries.iter().filter(|n| n.ends_with(".bak")).collect();
        assert_eq!(baks.len(), 1);
        assert!(baks[0].starts_with("spool.jsonl."));
        assert!(!baks[0].contains(':'));

        // The active file holds only the record written after rotation.
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        let parsed: SpoolRecord = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.job_id, "job_x_000002");
    }

    #[tokio::test]
    async fn file_only_grows_between_rotations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let writer = SpoolWriter::new(&path, u64::MAX);

        let mut last = 0u64;
        for n in 0..10 {
            writer.append(&record(n)).await.unwrap();
            let size = std::fs::metadata(&path).unwrap().len();
            assert!(size > last);
            last = size;
        }
    }

    #[tokio::test]
    async fn concurrent_appends_produce_whole_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let writer = std::sync::Arc::new(SpoolWriter::new(&path, u64::MAX));

        let mut handles = Vec::new();
        for n in 0..20u64 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                writer.append(&record(n)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 20);
        for line in content.lines() {
            serde_json::from_str::<SpoolRecord>(line).unwrap();
        }
    }

    #[test]
    fn rotation_path_replaces_colons() {
        let now = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:30:45Z")
            .unwrap()
            .with_timezone(&Utc);
        let rotated = rotation_path(Path::new("/var/data/spool.jsonl"), now);
        assert_eq!(
            rotated,
            PathBuf::from("/var/data/spool.jsonl.2024-05-01T12-30-45Z.bak")
        );
    }

    #[test]
    fn stat_reports_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let writer = SpoolWriter::new(&path, u64::MAX);

        assert!(writer.stat().is_none());

        std::fs::write(&path, b"hello\n").unwrap();
        let (bytes, _) = writer.stat().unwrap();
        assert_eq!(bytes, 6);
    }
}
