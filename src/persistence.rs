/// Durability layer behind the Transaction Coordinator's Soil/Core stores:
/// a synchronous, append-only, newline-delimited JSON log per store, with a
/// per-line CRC32 checksum and a sibling lock file recording clean/unclean
/// shutdown.
///
/// This crate's call graph is fully synchronous (the storage layer is a
/// `DashMap`, not an async-native engine), so this is a much smaller
/// cousin of a segmented, content-addressed write-ahead log: one file per
/// store, no rotation, no value deduplication. What it keeps from that
/// idiom is the checksummed line format and the acquire-on-open,
/// release-on-drop lock file.
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

fn checksum_of(text: &str) -> u32 {
    crc32fast::hash(text.as_bytes())
}

#[derive(Deserialize)]
struct RawLine {
    record: serde_json::Value,
    checksum: u32,
}

fn to_io_error(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Whether the previous process released this journal's lock cleanly.
/// `Unclean` means the journal may hold a half-written last line; replay
/// already drops any line that fails its checksum, so callers only need
/// `Unclean` to decide whether to log a recovery notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Clean,
    Unclean,
}

const LOCK_RUNNING: &str = "RUNNING";
const LOCK_CLEAN: &str = "CLEAN";

fn acquire_lock(lock_path: &Path) -> io::Result<LockState> {
    let previous = fs::read_to_string(lock_path).ok();
    fs::write(lock_path, LOCK_RUNNING)?;
    Ok(match previous.as_deref() {
        Some(LOCK_CLEAN) | None => LockState::Clean,
        _ => LockState::Unclean,
    })
}

/// Marks the lock file `CLEAN` on drop. Held for the lifetime of the
/// [`Journal`] it was opened alongside.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::write(&self.path, LOCK_CLEAN);
    }
}

/// Result of [`Journal::open`]: the opened (append-ready) journal, the
/// records replayed from its existing contents in append order, the lock
/// state observed on open, and the guard that releases the lock on drop.
pub struct OpenedJournal<T> {
    pub journal: Journal<T>,
    pub records: Vec<T>,
    pub lock_state: LockState,
    pub lock_guard: LockGuard,
}

/// An append-only, checksummed, newline-delimited JSON log of `T` records.
pub struct Journal<T> {
    file: File,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> Journal<T> {
    /// Open (creating if absent) the journal at `path`, replaying its
    /// existing lines and acquiring the sibling `<filename>.lock` file in
    /// the same directory. A line that fails to parse or whose checksum
    /// doesn't match is skipped rather than failing the whole replay,
    /// since a truncated trailing line is the only way a synchronous,
    /// unbuffered append can fail partway through after a crash.
    pub fn open(path: &Path) -> io::Result<OpenedJournal<T>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("journal")
            .to_string();
        let lock_path = path.with_file_name(format!("{file_name}.lock"));
        let lock_state = acquire_lock(&lock_path)?;

        let mut records = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(raw) = serde_json::from_str::<RawLine>(&line) else {
                    continue;
                };
                if checksum_of(&raw.record.to_string()) != raw.checksum {
                    continue;
                }
                let Ok(record) = serde_json::from_value::<T>(raw.record) else {
                    continue;
                };
                records.push(record);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(OpenedJournal {
            journal: Journal {
                file,
                _marker: std::marker::PhantomData,
            },
            records,
            lock_state,
            lock_guard: LockGuard { path: lock_path },
        })
    }

    /// Append one record as a checksummed line, flushed and synced before
    /// returning: a successful call is a durable write.
    pub fn append(&mut self, record: &T) -> io::Result<()> {
        let record_json = serde_json::to_value(record).map_err(to_io_error)?;
        let checksum = checksum_of(&record_json.to_string());
        let line = serde_json::json!({ "record": record_json, "checksum": checksum }).to_string();
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replay_recovers_appended_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soil.db");

        {
            let opened = Journal::<serde_json::Value>::open(&path).unwrap();
            assert!(opened.records.is_empty());
            assert_eq!(opened.lock_state, LockState::Clean);
            let mut journal = opened.journal;
            journal.append(&json!({"id": "soil_a"})).unwrap();
            journal.append(&json!({"id": "soil_b"})).unwrap();
        }

        let opened = Journal::<serde_json::Value>::open(&path).unwrap();
        assert_eq!(opened.records, vec![json!({"id": "soil_a"}), json!({"id": "soil_b"})]);
    }

    #[test]
    fn corrupted_trailing_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.db");
        {
            let opened = Journal::<serde_json::Value>::open(&path).unwrap();
            let mut journal = opened.journal;
            journal.append(&json!({"id": "core_a"})).unwrap();
        }
        // Append a line whose checksum doesn't match its payload.
        use std::io::Write as _;
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, r#"{{"record":{{"id":"core_bad"}},"checksum":1}}"#).unwrap();

        let opened = Journal::<serde_json::Value>::open(&path).unwrap();
        assert_eq!(opened.records, vec![json!({"id": "core_a"})]);
    }

    #[test]
    fn lock_state_reflects_prior_clean_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soil.db");

        {
            let opened = Journal::<serde_json::Value>::open(&path).unwrap();
            drop(opened.lock_guard);
        }
        let opened = Journal::<serde_json::Value>::open(&path).unwrap();
        assert_eq!(opened.lock_state, LockState::Clean);
        // Leaking the guard here simulates a process that never shut down.
        std::mem::forget(opened.lock_guard);

        let opened = Journal::<serde_json::Value>::open(&path).unwrap();
        assert_eq!(opened.lock_state, LockState::Unclean);
    }
}
