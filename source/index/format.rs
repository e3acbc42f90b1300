//! The `.gidx` sidecar file format: a 32-byte header (magic, version, UID bookkeeping, a CRC-32
//! over itself) followed by the concatenated entry records and a trailing CRC-32 over those.
//!
//! Verification is strict: any checksum mismatch is treated as corruption and the caller is
//! expected to rebuild the index from the mailbox rather than trust a partially-written file.
//!
//! Every multi-byte integer, in the header and in each entry, is big-endian: that's the layout
//! existing `.gidx` files are written in, and preserving it is what keeps this reader
//! interoperable with them.

use crate::error::{Error, Result};
use crate::index::entry::IndexEntry;
use std::collections::HashSet;

const MAGIC: &[u8; 4] = b"GIDX";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 32;
const MAX_ENTRIES: u32 = 10_000_000;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexFile {
  pub uid_validity: u64,
  pub uid_next: u64,
  pub entries: Vec<IndexEntry>,
}

impl IndexFile {
  pub fn write(&self) -> Vec<u8> {
    let mut entry_bytes = Vec::new();
    for entry in &self.entries {
      entry.write(&mut entry_bytes);
    }
    let entry_crc = crc32fast::hash(&entry_bytes);

    let mut header = Vec::with_capacity(HEADER_LEN - 4);
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&VERSION.to_be_bytes());
    header.extend_from_slice(&0u16.to_be_bytes());
    header.extend_from_slice(&self.uid_validity.to_be_bytes());
    header.extend_from_slice(&self.uid_next.to_be_bytes());
    header.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
    let header_crc = crc32fast::hash(&header);

    let mut out = Vec::with_capacity(HEADER_LEN + entry_bytes.len() + 4);
    out.extend_from_slice(&header);
    out.extend_from_slice(&header_crc.to_be_bytes());
    out.extend_from_slice(&entry_bytes);
    out.extend_from_slice(&entry_crc.to_be_bytes());
    out
  }

  pub fn read(bytes: &[u8]) -> Result<IndexFile> {
    if bytes.len() < HEADER_LEN {
      return Err(Error::CorruptIndex { reason: "file shorter than header" });
    }
    if &bytes[0..4] != MAGIC {
      return Err(Error::CorruptIndex { reason: "bad magic" });
    }
    let version = u16::from_be_bytes(bytes[4..6].try_into().unwrap());
    if version != VERSION {
      return Err(Error::CorruptIndex { reason: "unsupported version" });
    }
    let uid_validity = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
    let uid_next = u64::from_be_bytes(bytes[16..24].try_into().unwrap());
    let entry_count = u32::from_be_bytes(bytes[24..28].try_into().unwrap());
    let stored_header_crc = u32::from_be_bytes(bytes[28..32].try_into().unwrap());

    if crc32fast::hash(&bytes[0..28]) != stored_header_crc {
      return Err(Error::CorruptIndex { reason: "header checksum mismatch" });
    }
    if entry_count > MAX_ENTRIES {
      return Err(Error::CorruptIndex { reason: "entry count exceeds limit" });
    }

    let entries_region = &bytes[HEADER_LEN..];
    if entries_region.len() < 4 {
      return Err(Error::CorruptIndex { reason: "file truncated before entry checksum" });
    }
    let entries_bytes = &entries_region[..entries_region.len() - 4];
    let stored_entries_crc = u32::from_be_bytes(entries_region[entries_region.len() - 4..].try_into().unwrap());
    if crc32fast::hash(entries_bytes) != stored_entries_crc {
      return Err(Error::CorruptIndex { reason: "entry checksum mismatch" });
    }

    let mut entries = Vec::with_capacity(entry_count as usize);
    let mut cursor = 0;
    let mut seen_uids = HashSet::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
      let (entry, consumed) = IndexEntry::read(&entries_bytes[cursor..])?;
      if entry.uid == 0 {
        return Err(Error::CorruptIndex { reason: "entry has zero UID" });
      }
      if entry.uid >= uid_next {
        return Err(Error::CorruptIndex { reason: "entry UID is not below uid_next" });
      }
      if !seen_uids.insert(entry.uid) {
        return Err(Error::CorruptIndex { reason: "duplicate UID" });
      }
      cursor += consumed;
      entries.push(entry);
    }
    if cursor != entries_bytes.len() {
      return Err(Error::CorruptIndex { reason: "trailing bytes after last entry" });
    }

    Ok(IndexFile { uid_validity, uid_next, entries })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::flags::Flags;
  use pretty_assertions::assert_eq;

  fn sample_entry(uid: u64) -> IndexEntry {
    IndexEntry {
      uid,
      sequence_number: uid as u32,
      size: 100,
      internal_date_millis: 0,
      sent_date_millis: 0,
      flags: Flags::empty(),
      location: uid.to_string(),
      from: "a@b".to_string(),
      to: String::new(),
      cc: String::new(),
      bcc: String::new(),
      subject: "hi".to_string(),
      message_id: String::new(),
      keywords: String::new(),
    }
  }

  #[test]
  fn round_trips_through_bytes() {
    let file = IndexFile { uid_validity: 42, uid_next: 3, entries: vec![sample_entry(1), sample_entry(2)] };
    let bytes = file.write();
    let decoded = IndexFile::read(&bytes).unwrap();
    assert_eq!(file, decoded);
  }

  #[test]
  fn rejects_corrupted_header() {
    let file = IndexFile { uid_validity: 1, uid_next: 2, entries: vec![sample_entry(1)] };
    let mut bytes = file.write();
    bytes[10] ^= 0xFF;
    assert!(IndexFile::read(&bytes).is_err());
  }

  #[test]
  fn rejects_corrupted_entry_region() {
    let file = IndexFile { uid_validity: 1, uid_next: 2, entries: vec![sample_entry(1)] };
    let mut bytes = file.write();
    let last = bytes.len() - 6;
    bytes[last] ^= 0xFF;
    assert!(IndexFile::read(&bytes).is_err());
  }

  #[test]
  fn rejects_duplicate_uids() {
    let mut file = IndexFile { uid_validity: 1, uid_next: 10, entries: vec![sample_entry(1), sample_entry(1)] };
    file.entries[1].sequence_number = 2;
    let bytes = file.write();
    assert!(IndexFile::read(&bytes).is_err());
  }

  #[test]
  fn rejects_uid_at_or_above_uid_next() {
    let file = IndexFile { uid_validity: 1, uid_next: 1, entries: vec![sample_entry(1)] };
    let bytes = file.write();
    assert!(IndexFile::read(&bytes).is_err());
  }
}
