//! In-memory search index backed by a `.gidx` sidecar file: the fast path for every mailbox query
//! that can be answered from indexed fields (flags, dates, sizes, envelope strings), with a
//! fallback to a full MIME parse for queries that need body text.

pub mod entry;
mod format;
mod parsed;

pub use entry::IndexEntry;

use crate::error::{Error, Result};
use crate::flags::Flags;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// The single-bit flags a [`SearchIndex`] keeps a dedicated bitmap for, in on-disk bit order.
const FLAG_BITS: [Flags; 6] = [Flags::SEEN, Flags::ANSWERED, Flags::FLAGGED, Flags::DELETED, Flags::DRAFT, Flags::RECENT];

/// A single indexed-field test. Criteria combine with AND semantics in [`SearchIndex::search`].
#[derive(Clone, Debug)]
pub enum Criterion {
  HasFlag(Flags),
  LacksFlag(Flags),
  SentSince(i64),
  SentBefore(i64),
  LargerThan(u64),
  SmallerThan(u64),
  FromContains(String),
  ToContains(String),
  SubjectContains(String),
  HasKeyword(String),
  /// Substring match over decoded `text/*` body parts. Forces a full MIME parse.
  BodyContains(String),
  /// Substring match over the indexed envelope fields OR the body. Forces a full MIME parse for
  /// any candidate the indexed fields alone don't already satisfy.
  TextContains(String),
}

impl Criterion {
  fn needs_body(&self) -> bool {
    matches!(self, Criterion::BodyContains(_) | Criterion::TextContains(_))
  }

  fn matches_indexed(&self, entry: &IndexEntry) -> bool {
    match self {
      Criterion::HasFlag(flag) => entry.flags.contains(*flag),
      Criterion::LacksFlag(flag) => !entry.flags.contains(*flag),
      Criterion::SentSince(millis) => entry.sent_date_millis >= *millis,
      Criterion::SentBefore(millis) => entry.sent_date_millis < *millis,
      Criterion::LargerThan(size) => entry.size > *size,
      Criterion::SmallerThan(size) => entry.size < *size,
      Criterion::FromContains(needle) => contains_ci(&entry.from, needle),
      Criterion::ToContains(needle) => contains_ci(&entry.to, needle),
      Criterion::SubjectContains(needle) => contains_ci(&entry.subject, needle),
      Criterion::HasKeyword(keyword) => entry.keywords.split_whitespace().any(|k| k.eq_ignore_ascii_case(keyword)),
      Criterion::TextContains(needle) => {
        contains_ci(&entry.from, needle)
          || contains_ci(&entry.to, needle)
          || contains_ci(&entry.cc, needle)
          || contains_ci(&entry.subject, needle)
      }
      Criterion::BodyContains(_) => false,
    }
  }

  fn matches_body(&self, body_text: &str) -> bool {
    match self {
      Criterion::BodyContains(needle) | Criterion::TextContains(needle) => contains_ci(body_text, needle),
      _ => true,
    }
  }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
  haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Every structure below `entries` is a derived lookup accelerator, rebuilt from `entries`
/// whenever positions shift (load, `remove_entry`, `compact`) and updated incrementally otherwise
/// (`add_entry`, `update_flags`). `entries` itself, plus `uid_validity`/`uid_next`, remain the
/// source of truth serialized to the `.gidx` file.
pub struct SearchIndex {
  path: PathBuf,
  uid_validity: u64,
  uid_next: u64,
  entries: Vec<IndexEntry>,
  dirty: bool,
  by_uid: HashMap<u64, usize>,
  by_sequence: HashMap<u32, usize>,
  flag_bitmap: [BTreeSet<u64>; 6],
  by_sent_date: BTreeMap<i64, BTreeSet<u64>>,
  by_size: BTreeMap<u64, BTreeSet<u64>>,
}

impl SearchIndex {
  /// Loads `path` if it exists and passes validation; otherwise starts a fresh, empty index with
  /// a newly minted `uid_validity`. A structurally invalid file is treated the same as a missing
  /// one: the caller is expected to repopulate entries from the mailbox afterward.
  pub fn open(path: &Path, fresh_uid_validity: u64) -> Result<SearchIndex> {
    match fs::read(path) {
      Ok(bytes) => match format::IndexFile::read(&bytes) {
        Ok(file) => {
          let mut index = SearchIndex {
            path: path.to_path_buf(),
            uid_validity: file.uid_validity,
            uid_next: file.uid_next,
            entries: file.entries,
            dirty: false,
            by_uid: HashMap::new(),
            by_sequence: HashMap::new(),
            flag_bitmap: Default::default(),
            by_sent_date: BTreeMap::new(),
            by_size: BTreeMap::new(),
          };
          index.rebuild_accelerators();
          Ok(index)
        }
        Err(_) => Ok(SearchIndex::empty(path, fresh_uid_validity)),
      },
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SearchIndex::empty(path, fresh_uid_validity)),
      Err(e) => Err(Error::Io(e)),
    }
  }

  pub fn empty(path: &Path, uid_validity: u64) -> SearchIndex {
    SearchIndex {
      path: path.to_path_buf(),
      uid_validity,
      uid_next: 1,
      entries: Vec::new(),
      dirty: true,
      by_uid: HashMap::new(),
      by_sequence: HashMap::new(),
      flag_bitmap: Default::default(),
      by_sent_date: BTreeMap::new(),
      by_size: BTreeMap::new(),
    }
  }

  /// Recomputes every accelerator from `entries` in its current order. Called whenever entry
  /// positions or flags could have shifted in bulk, rather than threading incremental updates
  /// through every call site.
  fn rebuild_accelerators(&mut self) {
    self.by_uid.clear();
    self.by_sequence.clear();
    for bucket in &mut self.flag_bitmap {
      bucket.clear();
    }
    self.by_sent_date.clear();
    self.by_size.clear();
    for (i, entry) in self.entries.iter().enumerate() {
      self.by_uid.insert(entry.uid, i);
      self.by_sequence.insert(entry.sequence_number, i);
      for (bit, flag) in FLAG_BITS.iter().enumerate() {
        if entry.flags.contains(*flag) {
          self.flag_bitmap[bit].insert(entry.uid);
        }
      }
      self.by_sent_date.entry(entry.sent_date_millis).or_default().insert(entry.uid);
      self.by_size.entry(entry.size).or_default().insert(entry.uid);
    }
  }

  pub fn uid_validity(&self) -> u64 {
    self.uid_validity
  }

  pub fn uid_next(&self) -> u64 {
    self.uid_next
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn is_dirty(&self) -> bool {
    self.dirty
  }

  pub fn entries(&self) -> &[IndexEntry] {
    &self.entries
  }

  /// Appends `entry`, assigning it the next UID and renumbering nothing else.
  pub fn add_entry(&mut self, mut entry: IndexEntry) -> u64 {
    let uid = self.uid_next;
    entry.uid = uid;
    self.uid_next += 1;
    let position = self.entries.len();
    self.by_uid.insert(uid, position);
    self.by_sequence.insert(entry.sequence_number, position);
    for (bit, flag) in FLAG_BITS.iter().enumerate() {
      if entry.flags.contains(*flag) {
        self.flag_bitmap[bit].insert(uid);
      }
    }
    self.by_sent_date.entry(entry.sent_date_millis).or_default().insert(uid);
    self.by_size.entry(entry.size).or_default().insert(uid);
    self.entries.push(entry);
    self.dirty = true;
    uid
  }

  /// Tombstones the entry for `uid`: removed immediately, since the on-disk format has no spare
  /// bit to mark a live entry deleted-but-present. Every later entry's position shifts, so the
  /// accelerators are rebuilt wholesale rather than patched.
  pub fn remove_entry(&mut self, uid: u64) -> bool {
    let before = self.entries.len();
    self.entries.retain(|e| e.uid != uid);
    let removed = self.entries.len() != before;
    if removed {
      self.rebuild_accelerators();
      self.dirty = true;
    }
    removed
  }

  pub fn update_flags(&mut self, uid: u64, flags: Flags) -> bool {
    let Some(&position) = self.by_uid.get(&uid) else {
      return false;
    };
    let entry = &mut self.entries[position];
    let previous = entry.flags;
    entry.flags = flags;
    for (bit, flag) in FLAG_BITS.iter().enumerate() {
      match (previous.contains(*flag), flags.contains(*flag)) {
        (false, true) => {
          self.flag_bitmap[bit].insert(uid);
        }
        (true, false) => {
          self.flag_bitmap[bit].remove(&uid);
        }
        _ => {}
      }
    }
    self.dirty = true;
    true
  }

  /// Overwrites the cached `location` property of the entry for `uid` (used to cache a computed
  /// unique-id hash once it's known, instead of re-hashing the message on every lookup). Doesn't
  /// touch any accelerator: `location` isn't indexed by any of them.
  pub fn set_location(&mut self, uid: u64, location: String) -> bool {
    let Some(&position) = self.by_uid.get(&uid) else {
      return false;
    };
    self.entries[position].location = location;
    self.dirty = true;
    true
  }

  /// Renumbers sequence numbers 1..N in UID order. Call after a batch of removals.
  pub fn compact(&mut self) {
    self.entries.sort_by_key(|e| e.uid);
    for (i, entry) in self.entries.iter_mut().enumerate() {
      entry.sequence_number = (i + 1) as u32;
    }
    self.rebuild_accelerators();
    self.dirty = true;
  }

  pub fn get_by_uid(&self, uid: u64) -> Option<&IndexEntry> {
    self.by_uid.get(&uid).map(|&position| &self.entries[position])
  }

  pub fn get_by_sequence(&self, sequence_number: u32) -> Option<&IndexEntry> {
    self.by_sequence.get(&sequence_number).map(|&position| &self.entries[position])
  }

  /// Uids carrying every bit set in `flag`. `flag` being empty matches everything, mirroring
  /// [`Flags::contains`]'s own behavior for an empty argument.
  pub fn uids_with_flag(&self, flag: Flags) -> Vec<u64> {
    if flag.bits() == 0 {
      return self.entries.iter().map(|e| e.uid).collect();
    }
    self.uids_with_flag_set(flag).into_iter().collect()
  }

  fn uids_with_flag_set(&self, flag: Flags) -> BTreeSet<u64> {
    let mut narrowed: Option<BTreeSet<u64>> = None;
    for (bit, candidate) in FLAG_BITS.iter().enumerate() {
      if flag.contains(*candidate) {
        narrowed = Some(match narrowed {
          None => self.flag_bitmap[bit].clone(),
          Some(prev) => prev.intersection(&self.flag_bitmap[bit]).copied().collect(),
        });
      }
    }
    narrowed.unwrap_or_default()
  }

  pub fn uids_in_date_range(&self, from_millis: i64, to_millis: i64) -> Vec<u64> {
    self.by_sent_date.range(from_millis..to_millis).flat_map(|(_, uids)| uids.iter().copied()).collect()
  }

  pub fn uids_in_size_range(&self, min: u64, max: u64) -> Vec<u64> {
    self.by_size.range(min..=max).flat_map(|(_, uids)| uids.iter().copied()).collect()
  }

  /// Candidates passing every indexed range/flag criterion, intersected via the accelerators
  /// above; `None` means no such criterion narrowed the set, so every entry is still a candidate.
  fn narrow_by_accelerators(&self, criteria: &[Criterion]) -> Option<BTreeSet<u64>> {
    let mut narrowed: Option<BTreeSet<u64>> = None;
    for criterion in criteria {
      let set = match criterion {
        Criterion::HasFlag(flag) if flag.bits() != 0 => Some(self.uids_with_flag_set(*flag)),
        Criterion::SentSince(floor) => Some(self.by_sent_date.range(*floor..).flat_map(|(_, uids)| uids.iter().copied()).collect()),
        Criterion::SentBefore(ceiling) => {
          Some(self.by_sent_date.range(..*ceiling).flat_map(|(_, uids)| uids.iter().copied()).collect())
        }
        Criterion::LargerThan(floor) => Some(
          self
            .by_size
            .range((std::ops::Bound::Excluded(*floor), std::ops::Bound::Unbounded))
            .flat_map(|(_, uids)| uids.iter().copied())
            .collect(),
        ),
        Criterion::SmallerThan(ceiling) => Some(self.by_size.range(..*ceiling).flat_map(|(_, uids)| uids.iter().copied()).collect()),
        _ => None,
      };
      if let Some(set) = set {
        narrowed = Some(match narrowed {
          None => set,
          Some(prev) => prev.intersection(&set).copied().collect(),
        });
      }
    }
    narrowed
  }

  /// Evaluates `criteria` (AND semantics). Flag/date/size criteria first narrow the candidate set
  /// via the accelerators; `fetch_raw` is called at most once per surviving candidate, and only if
  /// a body/text criterion is present, to load the raw RFC 822 bytes it needs.
  pub fn search(&self, criteria: &[Criterion], mut fetch_raw: impl FnMut(u64) -> Result<Vec<u8>>) -> Result<Vec<u64>> {
    let candidates = self.narrow_by_accelerators(criteria);
    let candidate_uids: Vec<u64> = match candidates {
      Some(set) => set.into_iter().collect(),
      None => self.entries.iter().map(|e| e.uid).collect(),
    };

    let mut matches = Vec::new();
    'candidates: for uid in candidate_uids {
      let Some(entry) = self.get_by_uid(uid) else { continue };
      for criterion in criteria {
        if !criterion.needs_body() && !criterion.matches_indexed(entry) {
          continue 'candidates;
        }
      }
      if criteria.iter().any(Criterion::needs_body) {
        let raw = fetch_raw(uid)?;
        let body_text = parsed::extract_text(&raw);
        for criterion in criteria {
          if criterion.needs_body() && !criterion.matches_body(&body_text) {
            continue 'candidates;
          }
        }
      }
      matches.push(uid);
    }
    Ok(matches)
  }

  /// Writes to a sibling temp file, flushes it, then atomically renames it over the real path.
  /// `dirty` only clears once the rename has completed.
  pub fn save(&mut self) -> Result<()> {
    let file = format::IndexFile { uid_validity: self.uid_validity, uid_next: self.uid_next, entries: self.entries.clone() };
    let bytes = file.write();

    let temp_path = self.path.with_extension("gidx.tmp");
    {
      let mut temp = fs::File::create(&temp_path)?;
      use std::io::Write as _;
      temp.write_all(&bytes)?;
      temp.sync_all()?;
    }
    fs::rename(&temp_path, &self.path)?;
    self.dirty = false;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::flags::Flags;
  use test_log::test;

  fn entry(uid: u64, from: &str, subject: &str, size: u64, flags: Flags) -> IndexEntry {
    IndexEntry {
      uid,
      sequence_number: uid as u32,
      size,
      internal_date_millis: 0,
      sent_date_millis: 1000 * uid as i64,
      flags,
      location: String::new(),
      from: from.to_string(),
      to: String::new(),
      cc: String::new(),
      bcc: String::new(),
      subject: subject.to_string(),
      message_id: String::new(),
      keywords: String::new(),
    }
  }

  #[test]
  fn add_entry_assigns_sequential_uids() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = SearchIndex::empty(&dir.path().join("mailbox.gidx"), 1);
    let uid1 = index.add_entry(entry(0, "a@b", "hi", 10, Flags::empty()));
    let uid2 = index.add_entry(entry(0, "c@d", "there", 20, Flags::empty()));
    assert_eq!(1, uid1);
    assert_eq!(2, uid2);
    assert_eq!(3, index.uid_next());
  }

  #[test]
  fn save_and_reopen_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mailbox.gidx");
    let mut index = SearchIndex::empty(&path, 7);
    index.add_entry(entry(0, "a@b", "hi", 10, Flags::SEEN));
    index.save().unwrap();
    assert!(!index.is_dirty());

    let reopened = SearchIndex::open(&path, 99).unwrap();
    assert_eq!(7, reopened.uid_validity());
    assert_eq!(1, reopened.len());
  }

  #[test]
  fn search_by_indexed_flag() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = SearchIndex::empty(&dir.path().join("m.gidx"), 1);
    index.add_entry(entry(0, "a@b", "hi", 10, Flags::SEEN));
    index.add_entry(entry(0, "c@d", "there", 10, Flags::empty()));
    let uids = index.search(&[Criterion::HasFlag(Flags::SEEN)], |_| unreachable!()).unwrap();
    assert_eq!(vec![1], uids);
  }

  #[test]
  fn search_falls_back_to_body_only_for_surviving_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = SearchIndex::empty(&dir.path().join("m.gidx"), 1);
    index.add_entry(entry(0, "a@b", "hi", 10, Flags::SEEN));
    index.add_entry(entry(0, "c@d", "there", 10, Flags::empty()));
    let mut fetched = Vec::new();
    let uids = index
      .search(&[Criterion::HasFlag(Flags::SEEN), Criterion::BodyContains("needle".to_string())], |uid| {
        fetched.push(uid);
        Ok(b"Content-Type: text/plain\r\n\r\nfound the needle here".to_vec())
      })
      .unwrap();
    assert_eq!(vec![1], fetched);
    assert_eq!(vec![1], uids);
  }

  #[test]
  fn compact_renumbers_sequence_by_uid_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = SearchIndex::empty(&dir.path().join("m.gidx"), 1);
    index.add_entry(entry(0, "a@b", "hi", 10, Flags::empty()));
    index.add_entry(entry(0, "c@d", "there", 10, Flags::empty()));
    index.add_entry(entry(0, "e@f", "hey", 10, Flags::empty()));
    index.remove_entry(2);
    index.compact();
    assert_eq!(1, index.get_by_uid(1).unwrap().sequence_number);
    assert_eq!(2, index.get_by_uid(3).unwrap().sequence_number);
    assert_eq!(None, index.get_by_sequence(3));
  }

  #[test]
  fn remove_entry_tombstones_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = SearchIndex::empty(&dir.path().join("m.gidx"), 1);
    index.add_entry(entry(0, "a@b", "hi", 10, Flags::empty()));
    assert!(index.remove_entry(1));
    assert!(index.get_by_uid(1).is_none());
  }
}
