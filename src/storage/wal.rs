//! Consensus write-ahead log. The engine records its own proposals,
//! votes, and timeout broadcasts before they leave the process, so a
//! restarted node can inspect what it already signed at a height. Entries
//! below the last committed height are dropped on commit.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::crypto::hash::sha256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WalEntryKind {
    Proposal = 0x01,
    Vote = 0x02,
    Timeout = 0x03,
}

impl WalEntryKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(WalEntryKind::Proposal),
            0x02 => Some(WalEntryKind::Vote),
            0x03 => Some(WalEntryKind::Timeout),
            _ => None,
        }
    }
}

/// One WAL record. On disk, one hex-encoded line per entry:
/// height(8) | round(8) | kind(1) | len(4) | data | checksum(32).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalEntry {
    pub height: u64,
    pub round: u64,
    pub kind: WalEntryKind,
    pub data: Vec<u8>,
}

#[derive(thiserror::Error, Debug)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt WAL entry")]
    CorruptEntry,
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

impl WalEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(21 + self.data.len() + 32);
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(&self.round.to_be_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.data);
        let checksum = sha256(&buf);
        buf.extend_from_slice(&checksum.0);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WalError> {
        const HEADER: usize = 8 + 8 + 1 + 4;
        if bytes.len() < HEADER + 32 {
            return Err(WalError::CorruptEntry);
        }
        let height = u64::from_be_bytes(bytes[0..8].try_into().expect("8-byte slice"));
        let round = u64::from_be_bytes(bytes[8..16].try_into().expect("8-byte slice"));
        let kind = WalEntryKind::from_u8(bytes[16]).ok_or(WalError::CorruptEntry)?;
        let data_len =
            u32::from_be_bytes(bytes[17..21].try_into().expect("4-byte slice")) as usize;

        if bytes.len() != HEADER + data_len + 32 {
            return Err(WalError::CorruptEntry);
        }

        let data = bytes[HEADER..HEADER + data_len].to_vec();

        let expected = sha256(&bytes[..HEADER + data_len]);
        if bytes[HEADER + data_len..] != expected.0 {
            return Err(WalError::ChecksumMismatch);
        }

        Ok(WalEntry { height, round, kind, data })
    }
}

pub struct Wal {
    path: PathBuf,
    file: File,
}

impl Wal {
    pub fn open(path: &Path) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { path: path.to_path_buf(), file })
    }

    /// Append and flush. Durability before broadcast is the whole point.
    pub fn write_entry(&mut self, entry: &WalEntry) -> Result<(), WalError> {
        let line = hex::encode(entry.encode());
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    /// Replay every intact entry. A corrupt line (torn write at crash)
    /// ends the replay at the last good entry.
    pub fn read_all(path: &Path) -> Result<Vec<WalEntry>, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WalError::Io(e)),
        };

        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match hex::decode(trimmed) {
                Ok(bytes) => match WalEntry::decode(&bytes) {
                    Ok(entry) => entries.push(entry),
                    Err(_) => break,
                },
                Err(_) => break,
            }
        }

        Ok(entries)
    }

    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.path)?;
        Ok(())
    }

    /// Drop entries below `min_height`; everything newer is rewritten.
    pub fn truncate_below(&mut self, min_height: u64) -> Result<(), WalError> {
        let entries = Wal::read_all(&self.path)?;
        self.truncate()?;
        for entry in entries {
            if entry.height >= min_height {
                self.write_entry(&entry)?;
            }
        }
        Ok(())
    }
}
