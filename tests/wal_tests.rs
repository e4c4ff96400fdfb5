//! Consensus WAL tests: entry encoding, replay, torn-write tolerance,
//! and truncation below the committed height.

use std::io::Write;

use bedrock::storage::{Wal, WalEntry, WalEntryKind, WalError};

fn entry(height: u64, round: u64, kind: WalEntryKind, data: &[u8]) -> WalEntry {
    WalEntry { height, round, kind, data: data.to_vec() }
}

#[test]
fn entry_roundtrip() {
    let e = entry(7, 2, WalEntryKind::Vote, b"vote-bytes");
    let decoded = WalEntry::decode(&e.encode()).unwrap();
    assert_eq!(decoded, e);
}

#[test]
fn entry_detects_corruption() {
    let mut bytes = entry(7, 2, WalEntryKind::Proposal, b"proposal").encode();

    // Flip a data byte: checksum no longer matches.
    let mid = bytes.len() - 40;
    bytes[mid] ^= 0xFF;
    assert!(matches!(WalEntry::decode(&bytes), Err(WalError::ChecksumMismatch)));

    // Truncated record.
    let short = &entry(1, 0, WalEntryKind::Vote, b"x").encode()[..10];
    assert!(matches!(WalEntry::decode(short), Err(WalError::CorruptEntry)));

    // Unknown kind byte.
    let mut bad_kind = entry(1, 0, WalEntryKind::Vote, b"x").encode();
    bad_kind[16] = 0x7F;
    assert!(matches!(WalEntry::decode(&bad_kind), Err(WalError::CorruptEntry)));
}

#[test]
fn write_and_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut wal = Wal::open(&path).unwrap();
        wal.write_entry(&entry(1, 0, WalEntryKind::Proposal, b"p1")).unwrap();
        wal.write_entry(&entry(1, 0, WalEntryKind::Vote, b"v1")).unwrap();
        wal.write_entry(&entry(2, 1, WalEntryKind::Timeout, b"t2")).unwrap();
    }

    let entries = Wal::read_all(&path).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].kind, WalEntryKind::Proposal);
    assert_eq!(entries[2].height, 2);
    assert_eq!(entries[2].round, 1);
}

#[test]
fn replay_of_missing_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let entries = Wal::read_all(&dir.path().join("absent.log")).unwrap();
    assert!(entries.is_empty());
}

#[test]
fn torn_tail_stops_replay_at_last_good_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut wal = Wal::open(&path).unwrap();
        wal.write_entry(&entry(1, 0, WalEntryKind::Vote, b"good")).unwrap();
    }
    // Simulate a crash mid-append: a half-written hex line.
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "deadbeef").unwrap();
    }

    let entries = Wal::read_all(&path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].data, b"good");
}

#[test]
fn truncate_below_keeps_newer_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut wal = Wal::open(&path).unwrap();
    for h in 1..=5 {
        wal.write_entry(&entry(h, 0, WalEntryKind::Vote, &[h as u8])).unwrap();
    }

    wal.truncate_below(4).unwrap();

    let entries = Wal::read_all(&path).unwrap();
    let heights: Vec<u64> = entries.iter().map(|e| e.height).collect();
    assert_eq!(heights, vec![4, 5]);

    // Appending after truncation still works.
    wal.write_entry(&entry(6, 0, WalEntryKind::Proposal, b"p6")).unwrap();
    assert_eq!(Wal::read_all(&path).unwrap().len(), 3);
}
