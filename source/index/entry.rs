//! A single search index entry: the fixed-size numeric header plus the eight variable-length
//! string properties carried alongside it in the `.gidx` file.

use crate::error::{Error, Result};
use crate::flags::Flags;

pub const FIXED_HEADER_LEN: usize = 48;
pub const DESCRIPTOR_COUNT: usize = 8;
const DESCRIPTOR_LEN: usize = 8; // u32 offset + u32 length

/// Order is fixed by the on-disk format: location, from, to, cc, bcc, subject, message_id,
/// keywords.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexEntry {
  pub uid: u64,
  pub sequence_number: u32,
  pub size: u64,
  pub internal_date_millis: i64,
  pub sent_date_millis: i64,
  pub flags: Flags,
  pub location: String,
  pub from: String,
  pub to: String,
  pub cc: String,
  pub bcc: String,
  pub subject: String,
  pub message_id: String,
  pub keywords: String,
}

impl IndexEntry {
  fn properties(&self) -> [&str; DESCRIPTOR_COUNT] {
    [
      &self.location,
      &self.from,
      &self.to,
      &self.cc,
      &self.bcc,
      &self.subject,
      &self.message_id,
      &self.keywords,
    ]
  }

  pub fn encoded_len(&self) -> usize {
    FIXED_HEADER_LEN + DESCRIPTOR_COUNT * DESCRIPTOR_LEN + self.properties().iter().map(|p| p.len()).sum::<usize>()
  }

  pub fn write(&self, out: &mut Vec<u8>) {
    let properties = self.properties();
    let variable_data_size: u32 = properties.iter().map(|p| p.len() as u32).sum();

    out.extend_from_slice(&self.uid.to_be_bytes());
    out.extend_from_slice(&self.sequence_number.to_be_bytes());
    out.extend_from_slice(&self.size.to_be_bytes());
    out.extend_from_slice(&self.internal_date_millis.to_be_bytes());
    out.extend_from_slice(&self.sent_date_millis.to_be_bytes());
    out.push(self.flags.bits());
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&(DESCRIPTOR_COUNT as u32).to_be_bytes());
    out.extend_from_slice(&variable_data_size.to_be_bytes());

    let mut offset: u32 = 0;
    for property in &properties {
      out.extend_from_slice(&offset.to_be_bytes());
      out.extend_from_slice(&(property.len() as u32).to_be_bytes());
      offset += property.len() as u32;
    }
    for property in &properties {
      out.extend_from_slice(property.as_bytes());
    }
  }

  /// Parses one entry starting at `buf[0]`, returning the entry and the number of bytes consumed.
  pub fn read(buf: &[u8]) -> Result<(IndexEntry, usize)> {
    if buf.len() < FIXED_HEADER_LEN {
      return Err(Error::CorruptIndex { reason: "entry shorter than fixed header" });
    }
    let uid = u64::from_be_bytes(buf[0..8].try_into().unwrap());
    let sequence_number = u32::from_be_bytes(buf[8..12].try_into().unwrap());
    let size = u64::from_be_bytes(buf[12..20].try_into().unwrap());
    let internal_date_millis = i64::from_be_bytes(buf[20..28].try_into().unwrap());
    let sent_date_millis = i64::from_be_bytes(buf[28..36].try_into().unwrap());
    let flags = Flags::from_bits(buf[36]);
    let descriptor_count = u32::from_be_bytes(buf[40..44].try_into().unwrap());
    let variable_data_size = u32::from_be_bytes(buf[44..48].try_into().unwrap());

    if descriptor_count as usize != DESCRIPTOR_COUNT {
      return Err(Error::CorruptIndex { reason: "unexpected descriptor count" });
    }

    let descriptors_end = FIXED_HEADER_LEN + DESCRIPTOR_COUNT * DESCRIPTOR_LEN;
    let variable_end = descriptors_end + variable_data_size as usize;
    if buf.len() < variable_end {
      return Err(Error::CorruptIndex { reason: "entry truncated before end of variable data" });
    }
    let variable = &buf[descriptors_end..variable_end];

    let mut properties: [String; DESCRIPTOR_COUNT] = Default::default();
    for i in 0..DESCRIPTOR_COUNT {
      let d = FIXED_HEADER_LEN + i * DESCRIPTOR_LEN;
      let offset = u32::from_be_bytes(buf[d..d + 4].try_into().unwrap()) as usize;
      let length = u32::from_be_bytes(buf[d + 4..d + 8].try_into().unwrap()) as usize;
      let end = offset.checked_add(length).ok_or(Error::CorruptIndex { reason: "descriptor overflow" })?;
      if end > variable.len() {
        return Err(Error::CorruptIndex { reason: "descriptor out of bounds" });
      }
      properties[i] = std::str::from_utf8(&variable[offset..end])
        .map_err(|_| Error::CorruptIndex { reason: "variable data is not valid UTF-8" })?
        .to_string();
    }
    let [location, from, to, cc, bcc, subject, message_id, keywords] = properties;

    Ok((
      IndexEntry {
        uid,
        sequence_number,
        size,
        internal_date_millis,
        sent_date_millis,
        flags,
        location,
        from,
        to,
        cc,
        bcc,
        subject,
        message_id,
        keywords,
      },
      variable_end,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn sample() -> IndexEntry {
    IndexEntry {
      uid: 7,
      sequence_number: 3,
      size: 1024,
      internal_date_millis: 1_700_000_000_000,
      sent_date_millis: 1_699_999_000_000,
      flags: Flags::SEEN | Flags::FLAGGED,
      location: "0".to_string(),
      from: "alice@example.com".to_string(),
      to: "bob@example.com".to_string(),
      cc: String::new(),
      bcc: String::new(),
      subject: "hello".to_string(),
      message_id: "<abc@example.com>".to_string(),
      keywords: "work urgent".to_string(),
    }
  }

  #[test]
  fn round_trips_through_bytes() {
    let entry = sample();
    let mut buf = Vec::new();
    entry.write(&mut buf);
    assert_eq!(entry.encoded_len(), buf.len());
    let (decoded, consumed) = IndexEntry::read(&buf).unwrap();
    assert_eq!(buf.len(), consumed);
    assert_eq!(entry, decoded);
  }

  #[test]
  fn rejects_truncated_entry() {
    let entry = sample();
    let mut buf = Vec::new();
    entry.write(&mut buf);
    buf.truncate(buf.len() - 1);
    assert!(IndexEntry::read(&buf).is_err());
  }
}
