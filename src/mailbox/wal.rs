//! Write-ahead-logged mailbox — append-only, CRC-checked, survives restarts.
//!
//! On-disk entry format:
//! ```text
//! [length: u32][crc32: u32][entry_type: u8][payload: &[u8]]
//! ```
//!
//! Every mailbox mutation is logged before it is applied in memory.
//! Opening replays the log into an `EventLog`, which re-applies the
//! capacity trim. `clear()` truncates the file; when the log grows well
//! past what it describes it is compacted into one `Append` per live event.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use crc32fast::Hasher;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::error::{MailboxError, MailboxResult};
use super::{EventLog, Mailbox};
use crate::event::Event;

/// Discriminant byte for log entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    /// Payload: one JSON event.
    Append = 1,
    /// Payload: JSON array of consumed ids.
    Consume = 2,
    /// No payload.
    Clear = 3,
}

impl EntryType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Append),
            2 => Some(Self::Consume),
            3 => Some(Self::Clear),
            _ => None,
        }
    }
}

/// A single log entry (in-memory representation).
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub entry_type: EntryType,
    pub payload: Vec<u8>,
}

impl WalEntry {
    pub fn new(entry_type: EntryType, payload: Vec<u8>) -> Self {
        Self {
            entry_type,
            payload,
        }
    }

    fn append(event: &Event) -> MailboxResult<Self> {
        Ok(Self::new(EntryType::Append, serde_json::to_vec(event)?))
    }

    fn consume(ids: &HashSet<String>) -> MailboxResult<Self> {
        let mut ids: Vec<&String> = ids.iter().collect();
        ids.sort();
        Ok(Self::new(EntryType::Consume, serde_json::to_vec(&ids)?))
    }

    /// Serialize to on-disk format: [length: u32][crc32: u32][entry_type: u8][payload]
    fn to_bytes(&self) -> Vec<u8> {
        let content_len = 1 + self.payload.len();
        let mut buf = Vec::with_capacity(4 + 4 + content_len);

        buf.extend_from_slice(&(content_len as u32).to_le_bytes());

        // CRC covers entry_type + payload
        let mut hasher = Hasher::new();
        hasher.update(&[self.entry_type as u8]);
        hasher.update(&self.payload);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());

        buf.push(self.entry_type as u8);
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Append-only log file with CRC integrity checks.
pub struct Wal {
    file: File,
    path: PathBuf,
}

impl Wal {
    /// Open or create a log file at the given path.
    pub fn open(path: &Path) -> MailboxResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                MailboxError::Log(format!("failed to open log at {}: {e}", path.display()))
            })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Append a single entry. Writes + fsync for durability.
    pub fn append(&mut self, entry: &WalEntry) -> MailboxResult<()> {
        self.file.write_all(&entry.to_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Read every entry from the start of the file.
    /// Corrupted entries are skipped with a warning; later entries are still read.
    pub fn replay(&self) -> MailboxResult<Vec<WalEntry>> {
        let mut file = File::open(&self.path)
            .map_err(|e| MailboxError::Log(format!("failed to open log for replay: {e}")))?;

        let mut entries = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let content_len = u32::from_le_bytes(len_buf) as usize;

            let mut crc_buf = [0u8; 4];
            match file.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    warn!("log truncated at offset {offset} (incomplete header)");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            let stored_crc = u32::from_le_bytes(crc_buf);

            if content_len == 0 {
                warn!("log entry at offset {offset} has zero length, skipping");
                offset += 8;
                continue;
            }
            let mut content = vec![0u8; content_len];
            match file.read_exact(&mut content) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    warn!("log truncated at offset {offset} (incomplete payload)");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let mut hasher = Hasher::new();
            hasher.update(&content);
            let computed_crc = hasher.finalize();

            if computed_crc != stored_crc {
                warn!(
                    "log entry corrupted at offset {offset}: CRC mismatch (stored={stored_crc:#x}, computed={computed_crc:#x}), skipping"
                );
                offset += 8 + content_len as u64;
                continue;
            }

            let type_byte = content[0];
            match EntryType::from_u8(type_byte) {
                Some(entry_type) => entries.push(WalEntry {
                    entry_type,
                    payload: content[1..].to_vec(),
                }),
                None => warn!("log entry at offset {offset}: unknown type {type_byte}, skipping"),
            }

            offset += 8 + content_len as u64;
        }

        Ok(entries)
    }

    /// Truncate the log to empty.
    pub fn truncate(&mut self) -> MailboxResult<()> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| MailboxError::Log(format!("failed to truncate log: {e}")))?;
        self.reopen()
    }

    /// Replace the whole log with `entries`, atomically via rename.
    pub fn rewrite(&mut self, entries: &[WalEntry]) -> MailboxResult<()> {
        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut out = File::create(&tmp)?;
            for entry in entries {
                out.write_all(&entry.to_bytes())?;
            }
            out.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        self.reopen()
    }

    /// Current file size in bytes.
    pub fn size(&self) -> MailboxResult<u64> {
        let mut file = self.file.try_clone()?;
        Ok(file.seek(SeekFrom::End(0))?)
    }

    fn reopen(&mut self) -> MailboxResult<()> {
        self.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MailboxError::Log(format!("failed to reopen log: {e}")))?;
        self.file.sync_data()?;
        Ok(())
    }
}

struct WalState {
    wal: Wal,
    log: EventLog,
    /// Entries written since the last truncate/compaction.
    records: usize,
}

impl WalState {
    fn compact_threshold(&self) -> usize {
        self.log.capacity() * 2 + 64
    }

    fn maybe_compact(&mut self) -> MailboxResult<()> {
        if self.records < self.compact_threshold() {
            return Ok(());
        }
        let entries = self
            .log
            .snapshot()
            .iter()
            .map(WalEntry::append)
            .collect::<MailboxResult<Vec<_>>>()?;
        self.wal.rewrite(&entries)?;
        debug!(records = self.records, live = entries.len(), "mailbox log compacted");
        self.records = entries.len();
        Ok(())
    }
}

/// Mailbox persisted to a write-ahead log.
pub struct WalMailbox {
    state: Mutex<WalState>,
}

impl WalMailbox {
    /// Open the log at `path` and rebuild the mailbox from it.
    pub fn open(path: &Path, capacity: usize) -> MailboxResult<Self> {
        let wal = Wal::open(path)?;
        let mut log = EventLog::new(capacity);
        let entries = wal.replay()?;
        let records = entries.len();
        for entry in entries {
            apply(&mut log, entry);
        }
        debug!(path = %path.display(), records, live = log.len(), "mailbox replayed");
        Ok(Self {
            state: Mutex::new(WalState { wal, log, records }),
        })
    }

    pub fn len(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().log.is_empty()
    }

    /// Size of the backing file in bytes.
    pub fn log_size(&self) -> MailboxResult<u64> {
        self.state.lock().wal.size()
    }
}

/// Apply one replayed entry. Undecodable payloads are skipped.
fn apply(log: &mut EventLog, entry: WalEntry) {
    match entry.entry_type {
        EntryType::Append => match serde_json::from_slice::<Event>(&entry.payload) {
            Ok(event) => {
                log.append(event);
            }
            Err(e) => warn!(error = %e, "skipping undecodable event record"),
        },
        EntryType::Consume => match serde_json::from_slice::<HashSet<String>>(&entry.payload) {
            Ok(ids) => {
                log.consume(&ids);
            }
            Err(e) => warn!(error = %e, "skipping undecodable consume record"),
        },
        EntryType::Clear => log.clear(),
    }
}

#[async_trait]
impl Mailbox for WalMailbox {
    async fn append(&self, event: Event) -> MailboxResult<()> {
        let entry = WalEntry::append(&event)?;
        let mut state = self.state.lock();
        state.wal.append(&entry)?;
        state.records += 1;
        state.log.append(event);
        state.maybe_compact()
    }

    async fn snapshot(&self) -> MailboxResult<Vec<Event>> {
        Ok(self.state.lock().log.snapshot())
    }

    async fn consume(&self, ids: &HashSet<String>) -> MailboxResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let entry = WalEntry::consume(ids)?;
        let mut state = self.state.lock();
        state.wal.append(&entry)?;
        state.records += 1;
        let removed = state.log.consume(ids);
        state.maybe_compact()?;
        Ok(removed)
    }

    async fn clear(&self) -> MailboxResult<()> {
        let mut state = self.state.lock();
        state.wal.truncate()?;
        state.records = 0;
        state.log.clear();
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.state.lock().log.capacity()
    }
}
