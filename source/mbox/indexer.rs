//! Scans an mbox file for `From ` envelope lines and produces the ordered list of message
//! descriptors the rest of the mailbox is built on.

use std::io::{self, BufRead, Read, Seek, SeekFrom};

/// One message's position within its mbox file. `start`/`end` are RFC 822 byte offsets: the
/// envelope line and its trailing blank-line trimming have already been applied, so
/// `[start, end)` is exactly the raw header+body bytes as they'd appear on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageDescriptor {
  pub sequence_number: u32,
  pub start: u64,
  pub end: u64,
}

impl MessageDescriptor {
  pub fn size(&self) -> u64 {
    self.end - self.start
  }
}

/// A single linear forward pass finds every `From `-prefixed line (a legal mbox file only has
/// such a line at message boundaries); a constant number of small backward seeks per boundary
/// then trims the envelope line and the trailing line ending to produce RFC 822 offsets.
pub fn index<R: BufRead + Seek>(reader: &mut R) -> io::Result<Vec<MessageDescriptor>> {
  reader.seek(SeekFrom::Start(0))?;
  let mut raw_starts = Vec::new();
  let mut pos: u64 = 0;
  let mut line = Vec::new();
  loop {
    line.clear();
    let n = reader.read_until(b'\n', &mut line)?;
    if n == 0 {
      break;
    }
    if line.starts_with(b"From ") {
      raw_starts.push(pos);
    }
    pos += n as u64;
  }
  let file_len = pos;

  let mut descriptors = Vec::with_capacity(raw_starts.len());
  for (i, &raw_start) in raw_starts.iter().enumerate() {
    let raw_end = raw_starts.get(i + 1).copied().unwrap_or(file_len);

    reader.seek(SeekFrom::Start(raw_start))?;
    let mut envelope = Vec::new();
    reader.read_until(b'\n', &mut envelope)?;
    let rfc822_start = raw_start + envelope.len() as u64;

    let rfc822_end = trim_trailing_line_ending(reader, raw_end)?;

    if rfc822_end > rfc822_start {
      descriptors.push(MessageDescriptor {
        sequence_number: (descriptors.len() + 1) as u32,
        start: rfc822_start,
        end: rfc822_end,
      });
    }
  }
  Ok(descriptors)
}

/// Strips a trailing LF (and a CR immediately before it) ending at `end`, returning the new end.
fn trim_trailing_line_ending<R: Read + Seek>(reader: &mut R, end: u64) -> io::Result<u64> {
  if end == 0 {
    return Ok(0);
  }
  let mut byte = [0u8; 1];
  reader.seek(SeekFrom::Start(end - 1))?;
  reader.read_exact(&mut byte)?;
  if byte[0] != b'\n' {
    return Ok(end);
  }
  let mut end = end - 1;
  if end > 0 {
    reader.seek(SeekFrom::Start(end - 1))?;
    reader.read_exact(&mut byte)?;
    if byte[0] == b'\r' {
      end -= 1;
    }
  }
  Ok(end)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  fn index_bytes(bytes: &[u8]) -> Vec<MessageDescriptor> {
    let mut cursor = Cursor::new(bytes.to_vec());
    index(&mut cursor).unwrap()
  }

  #[test]
  fn indexes_two_messages() {
    let mbox = b"From a@b Mon Jan 1 00:00:00 2024\r\nSubject: one\r\n\r\nbody one\r\n\
From c@d Tue Jan 2 00:00:00 2024\r\nSubject: two\r\n\r\nbody two\r\n";
    let descriptors = index_bytes(mbox);
    assert_eq!(2, descriptors.len());
    assert_eq!(1, descriptors[0].sequence_number);
    assert_eq!(2, descriptors[1].sequence_number);
    assert_eq!(
      &mbox[descriptors[0].start as usize..descriptors[0].end as usize],
      b"Subject: one\r\n\r\nbody one"
    );
    assert_eq!(
      &mbox[descriptors[1].start as usize..descriptors[1].end as usize],
      b"Subject: two\r\n\r\nbody two"
    );
  }

  #[test]
  fn does_not_match_embedded_from_in_headers() {
    let mbox = b"From a@b Mon Jan 1 00:00:00 2024\r\nFrom: sender@example.com\r\n\r\nbody\r\n";
    let descriptors = index_bytes(mbox);
    assert_eq!(1, descriptors.len());
  }

  #[test]
  fn empty_file_has_no_messages() {
    assert!(index_bytes(b"").is_empty());
  }

  #[test]
  fn skips_zero_length_message() {
    let mbox = b"From a@b Mon Jan 1 00:00:00 2024\r\nFrom c@d Tue Jan 2 00:00:00 2024\r\nSubject: two\r\n\r\nbody\r\n";
    let descriptors = index_bytes(mbox);
    assert_eq!(1, descriptors.len());
  }
}
