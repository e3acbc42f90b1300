//! An open mbox file plus its `.gidx` sidecar: the unit every higher-level mailbox operation
//! (POP3 `RETR`, IMAP `FETCH`, `SEARCH`, ...) is built from.

use crate::error::{Error, Result};
use crate::flags::Flags;
use crate::index::{Criterion, IndexEntry, SearchIndex};
use crate::mbox::escape;
use crate::mbox::indexer::{self, MessageDescriptor};
use crate::mbox::lock::FileLock;
use md5::Digest as _;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};

/// Token returned by [`Mailbox::append_begin`]. Carries no data of its own; it exists so the
/// append protocol reads the same as the one it's modeled on (`begin`/`append`/`end`) even though
/// this implementation only ever has one append in flight at a time.
pub struct AppendHandle {
  _private: (),
}

struct PendingAppend {
  flags: Flags,
  date_millis: i64,
  buffer: Vec<u8>,
}

pub struct Mailbox {
  path: PathBuf,
  file: fs::File,
  read_only: bool,
  // Held for as long as the Mailbox exists, not just around individual mutating calls; released
  // when the Mailbox itself is dropped.
  lock: FileLock,
  descriptors: Vec<MessageDescriptor>,
  deleted: std::collections::HashSet<u32>,
  index: SearchIndex,
  pending_append: Option<PendingAppend>,
}

fn index_path(mbox_path: &Path) -> PathBuf {
  let mut name = mbox_path.file_name().unwrap_or_default().to_os_string();
  name.push(".gidx");
  mbox_path.with_file_name(name)
}

fn is_md5_hex(s: &str) -> bool {
  s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

impl Mailbox {
  pub fn open(path: &Path, read_only: bool) -> Result<Mailbox> {
    let file = fs::OpenOptions::new().read(true).write(!read_only).open(path)?;
    let lock = FileLock::acquire(&file, !read_only)?;
    let mut reader = std::io::BufReader::new(file.try_clone()?);
    let descriptors = indexer::index(&mut reader)?;

    let seed_uid_validity = fs::metadata(path)?.len().max(1);
    let sidecar_path = index_path(path);
    let mut index = SearchIndex::open(&sidecar_path, seed_uid_validity)?;
    reconcile_index(&mut index, &descriptors, &sidecar_path)?;

    Ok(Mailbox {
      path: path.to_path_buf(),
      file,
      read_only,
      lock,
      descriptors,
      deleted: Default::default(),
      index,
      pending_append: None,
    })
  }

  pub fn message_count(&self) -> usize {
    self.descriptors.len()
  }

  pub fn size(&self) -> Result<u64> {
    Ok(fs::metadata(&self.path)?.len())
  }

  pub fn list(&self) -> &[IndexEntry] {
    self.index.entries()
  }

  fn descriptor(&self, message_number: u32) -> Result<&MessageDescriptor> {
    self
      .descriptors
      .get(message_number.checked_sub(1).ok_or_else(|| Error::InvalidArgument("message numbers start at 1".to_string()))? as usize)
      .ok_or_else(|| Error::InvalidArgument(format!("no such message: {message_number}")))
  }

  pub fn get(&self, message_number: u32) -> Result<&IndexEntry> {
    self.descriptor(message_number)?;
    self
      .index
      .get_by_sequence(message_number)
      .ok_or_else(|| Error::InvalidArgument(format!("no such message: {message_number}")))
  }

  fn read_raw(&mut self, descriptor: MessageDescriptor) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; descriptor.size() as usize];
    self.file.seek(SeekFrom::Start(descriptor.start))?;
    self.file.read_exact(&mut buf)?;
    Ok(buf)
  }

  /// Full RFC 822 bytes with `>From ` escaping undone in the body.
  pub fn get_content(&mut self, message_number: u32) -> Result<Vec<u8>> {
    let descriptor = *self.descriptor(message_number)?;
    let raw = self.read_raw(descriptor)?;
    let split = escape::body_start(&raw);
    let mut out = raw[..split].to_vec();
    out.extend(escape::unescape_body(&raw[split..]));
    Ok(out)
  }

  /// Full headers plus up to `body_lines` lines of the (unescaped) body.
  pub fn get_top(&mut self, message_number: u32, body_lines: usize) -> Result<Vec<u8>> {
    let content = self.get_content(message_number)?;
    let split = escape::body_start(&content);
    let mut out = content[..split].to_vec();
    let body = &content[split..];
    let mut remaining = body_lines;
    let mut pos = 0;
    while pos < body.len() && remaining > 0 {
      let line_end = memchr::memchr(b'\n', &body[pos..]).map(|i| pos + i + 1).unwrap_or(body.len());
      out.extend_from_slice(&body[pos..line_end]);
      pos = line_end;
      remaining -= 1;
    }
    Ok(out)
  }

  pub fn unique_id(&mut self, message_number: u32) -> Result<String> {
    let descriptor = *self.descriptor(message_number)?;
    let uid = self
      .index
      .get_by_sequence(message_number)
      .ok_or_else(|| Error::InvalidArgument(format!("no such message: {message_number}")))?
      .uid;
    if let Some(entry) = self.index.get_by_uid(uid) {
      if is_md5_hex(&entry.location) {
        return Ok(entry.location.clone());
      }
    }
    let raw = self.read_raw(descriptor)?;
    let mut hasher = md5::Md5::new();
    hasher.update(&raw);
    let digest = hex::encode(hasher.finalize());
    self.index.set_location(uid, digest.clone());
    Ok(digest)
  }

  pub fn delete(&mut self, message_number: u32) -> Result<()> {
    if self.read_only {
      return Err(Error::ReadOnly);
    }
    self.descriptor(message_number)?;
    self.deleted.insert(message_number);
    if let Some(uid) = self.index.get_by_sequence(message_number).map(|e| e.uid) {
      let flags = self.index.get_by_uid(uid).unwrap().flags | Flags::DELETED;
      self.index.update_flags(uid, flags);
    }
    Ok(())
  }

  pub fn is_deleted(&self, message_number: u32) -> bool {
    self.deleted.contains(&message_number)
  }

  pub fn undelete_all(&mut self) {
    for message_number in self.deleted.drain() {
      if let Some(uid) = self.index.get_by_sequence(message_number).map(|e| e.uid) {
        if let Some(entry) = self.index.get_by_uid(uid) {
          let mut flags = entry.flags;
          flags.set(Flags::DELETED, false);
          self.index.update_flags(uid, flags);
        }
      }
    }
  }

  /// Rewrites the mbox file without the messages marked deleted, reassigns sequence numbers and
  /// UIDs to match, and rebuilds the search index from scratch.
  pub fn expunge(&mut self) -> Result<()> {
    if self.read_only {
      return Err(Error::ReadOnly);
    }
    let mut kept = Vec::new();
    for (i, descriptor) in self.descriptors.iter().enumerate() {
      let message_number = (i + 1) as u32;
      if !self.deleted.contains(&message_number) {
        kept.push(*descriptor);
      }
    }

    let temp_path = self.path.with_extension("mbox.tmp");
    {
      let mut temp = fs::File::create(&temp_path)?;
      for descriptor in &kept {
        let mut buf = vec![0u8; descriptor.size() as usize];
        self.file.seek(SeekFrom::Start(descriptor.start))?;
        self.file.read_exact(&mut buf)?;
        writeln!(temp, "From MAILER-DAEMON@localhost {}", synthetic_envelope_date())?;
        temp.write_all(&buf)?;
        if !buf.ends_with(b"\n") {
          temp.write_all(b"\n")?;
        }
      }
      temp.sync_all()?;
    }
    fs::rename(&temp_path, &self.path)?;

    self.file = fs::OpenOptions::new().read(true).write(true).open(&self.path)?;
    // The old lock was held on a file descriptor for the now-renamed-away file; the reopened
    // handle needs its own.
    self.lock = FileLock::acquire(&self.file, true)?;
    let mut reader = std::io::BufReader::new(self.file.try_clone()?);
    self.descriptors = indexer::index(&mut reader)?;
    self.deleted.clear();

    let seed_uid_validity = self.index.uid_validity();
    let mut rebuilt = SearchIndex::empty(&index_path(&self.path), seed_uid_validity.wrapping_add(1));
    for descriptor in &self.descriptors {
      let entry = placeholder_entry(*descriptor);
      rebuilt.add_entry(entry);
    }
    // Sequence numbers are already contiguous from the rename/reopen above, but compacting here
    // keeps the index's own bookkeeping (rather than the caller) the source of truth for it.
    rebuilt.compact();
    self.index = rebuilt;
    self.index.save()
  }

  pub fn search(&mut self, criteria: &[Criterion]) -> Result<Vec<u64>> {
    let descriptors = self.descriptors.clone();
    let index = &self.index;
    let file = &mut self.file;
    index.search(criteria, |uid| {
      let entry = index.get_by_uid(uid).ok_or_else(|| Error::InvalidArgument("unknown uid".to_string()))?;
      let descriptor =
        descriptors.get(entry.sequence_number as usize - 1).ok_or_else(|| Error::InvalidArgument("stale index entry".to_string()))?;
      let mut buf = vec![0u8; descriptor.size() as usize];
      file.seek(SeekFrom::Start(descriptor.start))?;
      file.read_exact(&mut buf)?;
      let split = escape::body_start(&buf);
      let mut out = buf[..split].to_vec();
      out.extend(escape::unescape_body(&buf[split..]));
      Ok(out)
    })
  }

  pub fn append_begin(&mut self, flags: Flags, date_millis: i64) -> Result<AppendHandle> {
    if self.read_only {
      return Err(Error::ReadOnly);
    }
    if self.pending_append.is_some() {
      return Err(Error::IllegalState("an append is already in progress".to_string()));
    }
    self.pending_append = Some(PendingAppend { flags, date_millis, buffer: Vec::new() });
    Ok(AppendHandle { _private: () })
  }

  pub fn append_append(&mut self, _handle: &AppendHandle, bytes: &[u8]) -> Result<()> {
    match &mut self.pending_append {
      Some(pending) => {
        pending.buffer.extend_from_slice(bytes);
        Ok(())
      }
      None => Err(Error::IllegalState("no append in progress".to_string())),
    }
  }

  pub fn append_end(&mut self, _handle: AppendHandle) -> Result<u64> {
    let pending = self.pending_append.take().ok_or_else(|| Error::IllegalState("no append in progress".to_string()))?;
    let result = self.write_append(&pending);
    result
  }

  fn write_append(&mut self, pending: &PendingAppend) -> Result<u64> {
    let split = escape::body_start(&pending.buffer);
    let mut escaped = pending.buffer[..split].to_vec();
    escaped.extend(escape::escape_body(&pending.buffer[split..]));
    let date = millis_to_envelope_date(pending.date_millis);

    let current_len = self.file.metadata()?.len();
    if current_len > 0 {
      let mut last_byte = [0u8; 1];
      self.file.seek(SeekFrom::Start(current_len - 1))?;
      self.file.read_exact(&mut last_byte)?;
      if last_byte[0] != b'\n' {
        self.file.write_all(b"\n")?;
      }
    }
    self.file.seek(SeekFrom::End(0))?;
    writeln!(self.file, "From MAILER-DAEMON@localhost {date}")?;
    self.file.write_all(&escaped)?;
    if !escaped.ends_with(b"\n") {
      self.file.write_all(b"\n")?;
    }
    self.file.sync_all()?;

    let mut reader = std::io::BufReader::new(self.file.try_clone()?);
    self.descriptors = indexer::index(&mut reader)?;
    let new_descriptor = *self.descriptors.last().ok_or_else(|| Error::IllegalState("append produced no message".to_string()))?;

    let mut entry = placeholder_entry(new_descriptor);
    entry.flags = pending.flags;
    entry.sent_date_millis = pending.date_millis;
    entry.internal_date_millis = pending.date_millis;
    let uid = self.index.add_entry(entry);
    self.index.save()?;
    Ok(uid)
  }

  pub fn close(&mut self, do_expunge: bool) -> Result<()> {
    if do_expunge {
      self.expunge()?;
    } else if self.index.is_dirty() {
      self.index.save()?;
    }
    Ok(())
  }
}

fn placeholder_entry(descriptor: MessageDescriptor) -> IndexEntry {
  IndexEntry {
    uid: 0,
    sequence_number: descriptor.sequence_number,
    size: descriptor.size(),
    internal_date_millis: 0,
    sent_date_millis: 0,
    flags: Flags::empty(),
    location: descriptor.start.to_string(),
    from: String::new(),
    to: String::new(),
    cc: String::new(),
    bcc: String::new(),
    subject: String::new(),
    message_id: String::new(),
    keywords: String::new(),
  }
}

/// Adds any descriptors the index doesn't yet cover (e.g. messages delivered by another process
/// since the index was last saved). A mismatch in entry count beyond "index has fewer entries
/// than the file" means the two have diverged incompatibly, so the index is rebuilt from scratch.
fn reconcile_index(index: &mut SearchIndex, descriptors: &[MessageDescriptor], path: &Path) -> Result<()> {
  if index.len() > descriptors.len() {
    *index = SearchIndex::empty(path, index.uid_validity());
  }
  for descriptor in &descriptors[index.len()..] {
    index.add_entry(placeholder_entry(*descriptor));
  }
  Ok(())
}

fn millis_to_envelope_date(millis: i64) -> String {
  let datetime = chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap());
  datetime.format("%a %b %e %H:%M:%S %Y").to_string()
}

fn synthetic_envelope_date() -> String {
  millis_to_envelope_date(chrono::Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write as _;
  use test_log::test;

  fn sample_mbox(dir: &Path) -> PathBuf {
    let path = dir.join("test.mbox");
    let mut file = fs::File::create(&path).unwrap();
    write!(
      file,
      "From a@b Mon Jan 1 00:00:00 2024\r\nSubject: one\r\n\r\nFrom the body\r\n\
From c@d Tue Jan 2 00:00:00 2024\r\nSubject: two\r\n\r\nsecond\r\n"
    )
    .unwrap();
    path
  }

  #[test]
  fn opens_and_lists_messages() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample_mbox(dir.path());
    let mailbox = Mailbox::open(&path, true).unwrap();
    assert_eq!(2, mailbox.message_count());
  }

  #[test]
  fn get_content_unescapes_body() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample_mbox(dir.path());
    let mut mailbox = Mailbox::open(&path, true).unwrap();
    let content = mailbox.get_content(1).unwrap();
    assert!(content.ends_with(b"From the body\r\n") || content.ends_with(b"From the body"));
  }

  #[test]
  fn append_then_reopen_sees_new_message() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample_mbox(dir.path());
    {
      let mut mailbox = Mailbox::open(&path, false).unwrap();
      let handle = mailbox.append_begin(Flags::empty(), 0).unwrap();
      mailbox.append_append(&handle, b"Subject: three\r\n\r\nthird body\r\n").unwrap();
      let uid = mailbox.append_end(handle).unwrap();
      assert!(uid > 0);
      mailbox.close(false).unwrap();
    }
    let mailbox = Mailbox::open(&path, true).unwrap();
    assert_eq!(3, mailbox.message_count());
  }

  #[test]
  fn delete_then_expunge_removes_message() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample_mbox(dir.path());
    let mut mailbox = Mailbox::open(&path, false).unwrap();
    mailbox.delete(1).unwrap();
    mailbox.expunge().unwrap();
    assert_eq!(1, mailbox.message_count());
  }

  #[test]
  fn mutating_read_only_mailbox_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample_mbox(dir.path());
    let mut mailbox = Mailbox::open(&path, true).unwrap();
    assert!(matches!(mailbox.delete(1), Err(Error::ReadOnly)));
  }
}
