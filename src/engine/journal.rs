//! Episode journal
//!
//! Append-only, one record per line:
//!
//! ```text
//! <crc32 of payload, 8 hex digits> <episode JSON>\n
//! ```
//!
//! - Every state change of an episode appends a full new version
//! - Records are never rewritten or deleted
//! - A torn final line (crash mid-append) is ignored on load and cut off
//!   when the journal is next opened for writing
//! - Any other bad line is corruption and fails the load

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crc32fast::Hasher;
use thiserror::Error;
use uuid::Uuid;

use super::episode::FailoverEpisode;
use crate::observability::{Event, Logger};

/// Result type for journal operations
pub type JournalResult<T> = Result<T, JournalError>;

/// Journal errors
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("journal corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("journal encode error: {0}")]
    Encode(String),

    #[error("journal lock poisoned")]
    LockPoisoned,
}

/// Durable history of episodes.
pub trait EpisodeJournal: Send + Sync {
    /// Append one episode version. Durable when this returns.
    fn append(&self, episode: &FailoverEpisode) -> JournalResult<()>;

    /// Every version, in append order.
    fn load(&self) -> JournalResult<Vec<FailoverEpisode>>;
}

/// Latest version of each episode, ordered by first appearance.
pub fn latest_versions(records: Vec<FailoverEpisode>) -> Vec<FailoverEpisode> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut latest: HashMap<Uuid, FailoverEpisode> = HashMap::new();

    for record in records {
        if !latest.contains_key(&record.episode_id) {
            order.push(record.episode_id);
        }
        latest.insert(record.episode_id, record);
    }

    order
        .into_iter()
        .filter_map(|id| latest.remove(&id))
        .collect()
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Encode one journal line, including the trailing newline.
pub(crate) fn encode_line(episode: &FailoverEpisode) -> JournalResult<String> {
    let payload =
        serde_json::to_string(episode).map_err(|e| JournalError::Encode(e.to_string()))?;
    Ok(format!("{:08x} {}\n", checksum(payload.as_bytes()), payload))
}

fn decode_line(line: &str) -> Result<FailoverEpisode, String> {
    let (crc_hex, payload) = line
        .split_once(' ')
        .ok_or_else(|| "missing checksum separator".to_string())?;
    let expected =
        u32::from_str_radix(crc_hex, 16).map_err(|_| format!("bad checksum field '{}'", crc_hex))?;
    if checksum(payload.as_bytes()) != expected {
        return Err("checksum mismatch".into());
    }
    serde_json::from_str(payload).map_err(|e| e.to_string())
}

/// Decode a whole journal image.
pub(crate) fn decode_all(content: &str) -> JournalResult<Vec<FailoverEpisode>> {
    let complete = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();
    let mut records = Vec::with_capacity(lines.len());

    for (index, line) in lines.iter().enumerate() {
        if line.is_empty() {
            continue;
        }
        match decode_line(line) {
            Ok(record) => records.push(record),
            Err(_) if index + 1 == lines.len() && !complete => break,
            Err(reason) => {
                return Err(JournalError::Corrupt {
                    line: index + 1,
                    reason,
                })
            }
        }
    }
    Ok(records)
}

/// Length of the newline-terminated prefix of a journal image.
fn complete_len(content: &[u8]) -> usize {
    content
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0)
}

/// Journal backed by a local file, synced on every append.
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileJournal {
    /// Open or create the journal file.
    pub fn open(path: impl AsRef<Path>) -> JournalResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        let valid = complete_len(&content);
        if valid < content.len() {
            // Appends must start on a fresh line
            file.set_len(valid as u64)?;
            file.sync_all()?;
            Logger::event(
                Event::JournalTruncated,
                &[
                    ("dropped_bytes", &(content.len() - valid).to_string()),
                    ("path", &path.display().to_string()),
                ],
            );
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a journal without opening it for writing.
    pub fn read(path: impl AsRef<Path>) -> JournalResult<Vec<FailoverEpisode>> {
        match std::fs::read(path.as_ref()) {
            Ok(content) => decode_all(&String::from_utf8_lossy(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl EpisodeJournal for FileJournal {
    fn append(&self, episode: &FailoverEpisode) -> JournalResult<()> {
        let line = encode_line(episode)?;
        let mut file = self.file.lock().map_err(|_| JournalError::LockPoisoned)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn load(&self) -> JournalResult<Vec<FailoverEpisode>> {
        let _guard = self.file.lock().map_err(|_| JournalError::LockPoisoned)?;
        Self::read(&self.path)
    }
}

/// In-memory journal.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<FailoverEpisode>>,
    unreadable: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `load` fail as if the backing store were corrupt.
    pub fn set_unreadable(&self, unreadable: bool) {
        self.unreadable.store(unreadable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EpisodeJournal for MemoryJournal {
    fn append(&self, episode: &FailoverEpisode) -> JournalResult<()> {
        self.records
            .lock()
            .map_err(|_| JournalError::LockPoisoned)?
            .push(episode.clone());
        Ok(())
    }

    fn load(&self) -> JournalResult<Vec<FailoverEpisode>> {
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(JournalError::Corrupt {
                line: 1,
                reason: "checksum mismatch".into(),
            });
        }
        self.records
            .lock()
            .map(|r| r.clone())
            .map_err(|_| JournalError::LockPoisoned)
    }
}
