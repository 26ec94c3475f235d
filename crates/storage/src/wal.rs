//! JSONL write-ahead log for [`CatalogEvent`]s, with group commit.
//!
//! Each line is `{"seq":N,"event":{...}}\n`. Events are durable only after
//! [`Wal::flush`] returns; `append` alone just buffers.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::event::CatalogEvent;

const FLUSH_INTERVAL: Duration = Duration::from_millis(10);
const FLUSH_THRESHOLD: usize = 100;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct WalRecordRef<'a> {
    seq: u64,
    event: &'a CatalogEvent,
}

#[derive(Deserialize)]
struct WalRecord {
    seq: u64,
    event: CatalogEvent,
}

#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub event: CatalogEvent,
}

/// Durable JSONL WAL. `processed_seq` (from the last snapshot) determines
/// where replay should resume; entries with `seq <= processed_seq` are
/// already reflected in that snapshot and are skipped.
pub struct Wal {
    file: File,
    read_file: File,
    path: PathBuf,
    write_seq: u64,
    write_buffer: Vec<Vec<u8>>,
    last_flush: Instant,
    read_offset: u64,
}

impl Wal {
    pub fn open(path: &Path, processed_seq: u64) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (write_seq, read_offset) = Self::scan(&file, processed_seq)?;
        let read_file = file.try_clone()?;

        Ok(Wal {
            file,
            read_file,
            path: path.to_owned(),
            write_seq,
            write_buffer: Vec::new(),
            last_flush: Instant::now(),
            read_offset,
        })
    }

    fn scan(file: &File, processed_seq: u64) -> Result<(u64, u64), WalError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut max_seq = processed_seq;
        let mut read_offset: Option<u64> = None;
        let mut offset = 0u64;
        let mut line = String::new();

        loop {
            line.clear();
            let n = match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                offset += n as u64;
                continue;
            }
            let record: WalRecord = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    warn!(offset, error = %e, "corrupt WAL entry, stopping replay here");
                    break;
                }
            };
            max_seq = max_seq.max(record.seq);
            if record.seq > processed_seq && read_offset.is_none() {
                read_offset = Some(offset);
            }
            offset += n as u64;
        }

        Ok((max_seq, read_offset.unwrap_or(offset)))
    }

    /// Buffers `event`, returning the sequence number it was assigned.
    /// Not durable until [`Self::flush`].
    pub fn append(&mut self, event: &CatalogEvent) -> Result<u64, WalError> {
        self.write_seq += 1;
        let seq = self.write_seq;
        let mut bytes = serde_json::to_vec(&WalRecordRef { seq, event })?;
        bytes.push(b'\n');
        self.write_buffer.push(bytes);
        Ok(seq)
    }

    pub fn needs_flush(&self) -> bool {
        !self.write_buffer.is_empty()
            && (self.last_flush.elapsed() >= FLUSH_INTERVAL
                || self.write_buffer.len() >= FLUSH_THRESHOLD)
    }

    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }
        for bytes in self.write_buffer.drain(..) {
            self.file.write_all(&bytes)?;
        }
        self.file.sync_all()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// Replays every entry after `processed_seq` found on disk, in order.
    /// Used at startup to rebuild [`crate::MaterializedState`] from the last
    /// snapshot.
    pub fn entries_after(&mut self, processed_seq: u64) -> Result<Vec<WalEntry>, WalError> {
        self.flush()?;
        let mut reader = BufReader::new(self.read_file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: WalRecord = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "corrupt WAL entry during replay, stopping");
                    break;
                }
            };
            if record.seq > processed_seq {
                entries.push(WalEntry {
                    seq: record.seq,
                    event: record.event,
                });
            }
        }
        Ok(entries)
    }

    /// Drops entries with `seq <= seq` by rewriting the file, called after a
    /// successful checkpoint.
    pub fn truncate_before(&mut self, seq: u64) -> Result<(), WalError> {
        self.flush()?;
        let tmp_path = self.path.with_extension("tmp");

        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        let mut kept = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: WalRecord = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(_) => break,
            };
            if record.seq >= seq {
                kept.push(trimmed.to_string());
            }
        }

        {
            let mut tmp_file = File::create(&tmp_path)?;
            for line in &kept {
                tmp_file.write_all(line.as_bytes())?;
                tmp_file.write_all(b"\n")?;
            }
            tmp_file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        self.read_file = self.file.try_clone()?;
        self.read_offset = 0;
        for line in &kept {
            self.read_offset += line.len() as u64 + 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrs_core::id::StateId;
    use sqlrs_core::model::{PrepareKind, State};
    use tempfile::tempdir;

    fn sample_state(id: &str) -> CatalogEvent {
        CatalogEvent::StateCreated(State {
            state_id: StateId::new(id),
            state_fingerprint: "fp".into(),
            parent_state_id: None,
            image_id: "postgres:15".into(),
            prepare_kind: PrepareKind::Psql,
            prepare_args_normalized: "".into(),
            created_at: chrono::Utc::now(),
            size_bytes: None,
        })
    }

    #[test]
    fn append_assigns_increasing_seq() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(&dir.path().join("state.db"), 0).unwrap();
        let a = wal.append(&sample_state("s1")).unwrap();
        let b = wal.append(&sample_state("s2")).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn reopen_resumes_from_processed_seq() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let mut wal = Wal::open(&path, 0).unwrap();
            wal.append(&sample_state("s1")).unwrap();
            wal.append(&sample_state("s2")).unwrap();
            wal.flush().unwrap();
        }
        let mut wal = Wal::open(&path, 1).unwrap();
        let entries = wal.entries_after(1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].seq, 2);
    }

    #[test]
    fn truncate_before_drops_old_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&sample_state("s1")).unwrap();
        wal.append(&sample_state("s2")).unwrap();
        wal.append(&sample_state("s3")).unwrap();
        wal.flush().unwrap();
        wal.truncate_before(3).unwrap();
        let entries = wal.entries_after(0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].seq, 3);
    }
}
