//! Read-from-offset, line-aligned JSONL decoding.
//!
//! The reader never returns a partial line: it reads a bounded window from
//! the requested offset, cuts the buffer at the last newline, and reports
//! `new_offset` just past that newline so the remainder is re-read on the
//! next call. Malformed lines are skipped silently (the offset still moves
//! past them); they are counted against nobody.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use serde_json::Value;
use tracing::debug;

/// One complete, parsed line and the offset of the byte after its newline.
#[derive(Debug, Clone)]
pub struct SpoolLine {
    pub value: Value,
    pub end_offset: u64,
}

/// Result of one bounded read.
#[derive(Debug)]
pub struct SpoolChunk {
    /// Complete lines that parsed as JSON, in file order.
    pub lines: Vec<SpoolLine>,
    /// Offset just past the last complete line (parsed or skipped).
    pub new_offset: u64,
    /// Whether `new_offset` has reached the end of the file.
    pub eof: bool,
}

/// Reads `min(max_bytes, filesize - offset)` bytes from `offset` and decodes
/// the complete lines within.
///
/// When `offset >= filesize` the result is empty with `eof = true`. When the
/// window contains no newline at all, the result is empty with
/// `new_offset = offset`: the incomplete line is left for a later, larger
/// read (or for the writer to finish it).
pub fn read_from(path: &Path, offset: u64, max_bytes: u64) -> io::Result<SpoolChunk> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    if offset >= size {
        return Ok(SpoolChunk {
            lines: Vec::new(),
            new_offset: offset,
            eof: true,
        });
    }

    let window = max_bytes.min(size - offset);
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; window as usize];
    file.read_exact(&mut buf)?;

    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        return Ok(SpoolChunk {
            lines: Vec::new(),
            new_offset: offset,
            eof: false,
        });
    };

    let mut lines = Vec::new();
    let mut line_start = 0usize;
    for (pos, _) in buf[..=last_newline]
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'\n')
    {
        let raw = &buf[line_start..pos];
        let end_offset = offset + pos as u64 + 1;
        line_start = pos + 1;

        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }

        match serde_json::from_slice::<Value>(raw) {
            Ok(value) => lines.push(SpoolLine { value, end_offset }),
            Err(_) => {
                debug!(offset = end_offset, "Skipping malformed spool line");
            }
        }
    }

    let new_offset = offset + last_newline as u64 + 1;
    Ok(SpoolChunk {
        lines,
        new_offset,
        eof: new_offset >= size,
    })
}

/// Parses the last `n` valid lines, reading at most `max_bytes` from the
/// file tail.
pub fn tail_lines(path: &Path, n: usize, max_bytes: u64) -> io::Result<Vec<Value>> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let start = size.saturating_sub(max_bytes);

    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((size - start) as usize);
    file.read_to_end(&mut buf)?;

    let mut values: Vec<Value> = buf
        .split(|&b| b == b'\n')
        .filter(|line| !line.iter().all(|b| b.is_ascii_whitespace()))
        .filter_map(|line| serde_json::from_slice(line).ok())
        .collect();

    if values.len() > n {
        values.drain(..values.len() - n);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_spool(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        (dir, path)
    }

    #[test]
    fn reads_complete_lines_with_offsets() {
        let (_dir, path) = write_spool(&[r#"{"a":1}"#, r#"{"a":2}"#]);

        let chunk = read_from(&path, 0, 1024).unwrap();
        assert_eq!(chunk.lines.len(), 2);
        assert_eq!(chunk.lines[0].value, json!({"a":1}));
        assert_eq!(chunk.lines[0].end_offset, 8); // 7 bytes + newline
        assert_eq!(chunk.lines[1].end_offset, 16);
        assert_eq!(chunk.new_offset, 16);
        assert!(chunk.eof);
    }

    #[test]
    fn offset_at_or_past_eof_is_empty_eof() {
        let (_dir, path) = write_spool(&[r#"{"a":1}"#]);

        let chunk = read_from(&path, 8, 1024).unwrap();
        assert!(chunk.lines.is_empty());
        assert_eq!(chunk.new_offset, 8);
        assert!(chunk.eof);

        let chunk = read_from(&path, 9999, 1024).unwrap();
        assert!(chunk.lines.is_empty());
        assert!(chunk.eof);
    }

    #[test]
    fn partial_trailing_line_is_left_for_next_call() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"a":1}}"#).unwrap();
        // No trailing newline: crash mid-write.
        write!(file, r#"{{"a":2"#).unwrap();
        drop(file);

        let chunk = read_from(&path, 0, 1024).unwrap();
        assert_eq!(chunk.lines.len(), 1);
        assert_eq!(chunk.new_offset, 8);
        assert!(!chunk.eof);

        // Re-reading from new_offset sees nothing new until the line is
        // completed.
        let chunk = read_from(&path, chunk.new_offset, 1024).unwrap();
        assert!(chunk.lines.is_empty());
        assert_eq!(chunk.new_offset, 8);

        // Finish the line; the record becomes visible.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, r#"}}"#).unwrap();
        drop(file);

        let chunk = read_from(&path, 8, 1024).unwrap();
        assert_eq!(chunk.lines.len(), 1);
        assert_eq!(chunk.lines[0].value, json!({"a":2}));
    }

    #[test]
    fn window_without_newline_does_not_advance() {
        let (_dir, path) = write_spool(&[r#"{"a":1,"padding":"xxxxxxxxxxxx"}"#]);

        // Window smaller than the line: nothing decodable yet.
        let chunk = read_from(&path, 0, 5).unwrap();
        assert!(chunk.lines.is_empty());
        assert_eq!(chunk.new_offset, 0);
        assert!(!chunk.eof);
    }

    #[test]
    fn malformed_lines_are_skipped_but_consumed() {
        let (_dir, path) = write_spool(&[r#"{"a":1}"#, "not json at all", r#"{"a":3}"#]);

        let chunk = read_from(&path, 0, 1024).unwrap();
        assert_eq!(chunk.lines.len(), 2);
        assert_eq!(chunk.lines[0].value, json!({"a":1}));
        assert_eq!(chunk.lines[1].value, json!({"a":3}));
        // Offset still covers the malformed line.
        assert!(chunk.eof);
    }

    #[test]
    fn empty_lines_are_ignored() {
        let (_dir, path) = write_spool(&[r#"{"a":1}"#, "", r#"{"a":2}"#]);

        let chunk = read_from(&path, 0, 1024).unwrap();
        assert_eq!(chunk.lines.len(), 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = read_from(&dir.path().join("absent.jsonl"), 0, 1024);
        assert!(matches!(
            result,
            Err(e) if e.kind() == io::ErrorKind::NotFound
        ));
    }

    #[test]
    fn tail_returns_last_n_valid_lines() {
        let (_dir, path) = write_spool(&[
            r#"{"n":1}"#,
            r#"{"n":2}"#,
            "garbage",
            r#"{"n":3}"#,
            r#"{"n":4}"#,
        ]);

        let tail = tail_lines(&path, 2, 1 << 20).unwrap();
        assert_eq!(tail, vec![json!({"n":3}), json!({"n":4})]);

        let tail = tail_lines(&path, 50, 1 << 20).unwrap();
        assert_eq!(tail.len(), 4);
    }

    #[test]
    fn tail_respects_byte_budget() {
        let (_dir, path) = write_spool(&[r#"{"n":1}"#, r#"{"n":2}"#, r#"{"n":3}"#]);

        // Budget covers only the last line (8 bytes per line).
        let tail = tail_lines(&path, 50, 8).unwrap();
        assert_eq!(tail, vec![json!({"n":3})]);
    }

    proptest! {
        /// Reading the whole file in bounded windows recovers every record
        /// exactly once, in order, regardless of window size.
        #[test]
        fn windowed_scan_recovers_everything(
            count in 1usize..40,
            window in 16u64..256,
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("spool.jsonl");
            let mut file = File::create(&path).unwrap();
            for n in 0..count {
                writeln!(file, r#"{{"n":{}}}"#, n).unwrap();
            }
            drop(file);

            let mut offset = 0u64;
            let mut seen = Vec::new();
            loop {
                let chunk = read_from(&path, offset, window).unwrap();
                prop_assert!(chunk.new_offset >= offset, "offset went backwards");
                for line in &chunk.lines {
                    seen.push(line.value["n"].as_u64().unwrap());
                    prop_assert!(line.end_offset <= chunk.new_offset);
                }
                if chunk.eof {
                    break;
                }
                // The window is large enough for any single line here, so a
                // non-eof read always makes progress.
                prop_assert!(chunk.new_offset > offset);
                offset = chunk.new_offset;
            }

            prop_assert_eq!(seen.len(), count);
            for (i, n) in seen.iter().enumerate() {
                prop_assert_eq!(*n, i as u64);
            }
        }
    }
}
