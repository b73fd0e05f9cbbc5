//! JSON-lines journal file.
//!
//! One `JournalEntry` per line. Every append is flushed and `sync_data`'d
//! before it returns. A final line without its newline is a torn write from a
//! crash mid-append; `open` cuts it off, since the commit it belonged to never
//! became visible.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::r#trait::{check_next, Journal, JournalEntry, JournalError};

#[derive(Debug)]
struct Tail {
    file: File,
    last_sequence: u64,
}

#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    tail: Mutex<Tail>,
}

/// Result of reading the file front to back.
struct Scan {
    entries: Vec<JournalEntry>,
    /// Byte length of the complete, parseable prefix.
    valid_len: u64,
    torn: bool,
}

impl FileJournal {
    /// Open (or create) the journal at `path`, truncating a torn final line.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;

        let scan = scan(&path)?;
        if scan.torn {
            tracing::warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                "journal ends in a torn write; truncating"
            );
            file.set_len(scan.valid_len)?;
            file.sync_data()?;
        }
        let last_sequence = scan.entries.last().map(|e| e.sequence).unwrap_or(0);

        Ok(Self {
            path,
            tail: Mutex::new(Tail { file, last_sequence }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Journal for FileJournal {
    fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let mut tail = self.tail.lock().map_err(|_| JournalError::Poisoned)?;
        check_next(tail.last_sequence, entry.sequence)?;

        let mut line = serde_json::to_string(entry).map_err(|e| JournalError::Encode(e.to_string()))?;
        line.push('\n');
        tail.file.write_all(line.as_bytes())?;
        tail.file.flush()?;
        tail.file.sync_data()?;

        tail.last_sequence = entry.sequence;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<JournalEntry>, JournalError> {
        // Hold the tail lock so no append interleaves with the read.
        let _tail = self.tail.lock().map_err(|_| JournalError::Poisoned)?;
        Ok(scan(&self.path)?.entries)
    }
}

fn scan(path: &Path) -> Result<Scan, JournalError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries: Vec<JournalEntry> = Vec::new();
    let mut valid_len = 0u64;
    let mut buf = String::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        let read = reader.read_line(&mut buf)?;
        if read == 0 {
            break;
        }
        line_no += 1;

        if !buf.ends_with('\n') {
            return Ok(Scan {
                entries,
                valid_len,
                torn: true,
            });
        }
        let text = buf.trim();
        if !text.is_empty() {
            let entry: JournalEntry = serde_json::from_str(text).map_err(|e| JournalError::Corrupt {
                line: line_no,
                reason: e.to_string(),
            })?;
            let last = entries.last().map(|e| e.sequence).unwrap_or(0);
            check_next(last, entry.sequence)?;
            entries.push(entry);
        }
        valid_len += read as u64;
    }

    Ok(Scan {
        entries,
        valid_len,
        torn: false,
    })
}
