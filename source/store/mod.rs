//! Per-user folder tree: maps hierarchical mailbox names (`Work/2024`) onto mbox files on disk,
//! tracks subscriptions, and enforces the naming and traversal rules that keep a client from
//! escaping its own mailbox directory.

pub mod codec;
pub mod pattern;

use crate::error::{Error, Result};
use crate::mbox::Mailbox;
use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, Write as _};
use std::path::{Path, PathBuf};

const HIERARCHY_DELIMITER: char = '/';
const MAILBOX_EXTENSION: &str = "mbox";
const SUBSCRIPTIONS_FILE: &str = ".subscriptions";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
  pub has_children: bool,
  pub is_selectable: bool,
}

pub struct Store {
  root: PathBuf,
  subscriptions: HashSet<String>,
  quota_kib: i64,
}

fn canonicalize_component(component: &str) -> String {
  if component.eq_ignore_ascii_case("INBOX") {
    "INBOX".to_string()
  } else {
    component.to_string()
  }
}

/// Splits and validates a mailbox name into canonical (pre-codec) path components.
fn canonical_components(name: &str) -> Result<Vec<String>> {
  if name.is_empty() {
    return Err(Error::InvalidArgument("mailbox name is empty".to_string()));
  }
  let mut components = Vec::new();
  for raw in name.split(HIERARCHY_DELIMITER) {
    let component = canonicalize_component(raw);
    if !codec::is_legal_component(&component) {
      return Err(Error::InvalidArgument(format!("illegal mailbox name component: {raw:?}")));
    }
    components.push(component);
  }
  Ok(components)
}

impl Store {
  pub fn open(users_root: &Path, username: &str) -> Result<Store> {
    if !codec::is_legal_component(username) {
      return Err(Error::InvalidArgument(format!("illegal username: {username:?}")));
    }
    let root = users_root.join(codec::encode(username));
    fs::create_dir_all(&root)?;

    let mut store = Store { root, subscriptions: HashSet::new(), quota_kib: -1 };
    store.load_subscriptions()?;
    store.subscriptions.insert("INBOX".to_string());
    if store.resolve("INBOX").map(|p| !p.exists()).unwrap_or(false) {
      store.create("INBOX")?;
    }
    Ok(store)
  }

  pub fn close(&mut self) -> Result<()> {
    self.save_subscriptions()
  }

  pub fn hierarchy_delimiter(&self) -> char {
    HIERARCHY_DELIMITER
  }

  fn subscriptions_path(&self) -> PathBuf {
    self.root.join(SUBSCRIPTIONS_FILE)
  }

  fn load_subscriptions(&mut self) -> Result<()> {
    let path = self.subscriptions_path();
    match fs::File::open(&path) {
      Ok(file) => {
        for line in std::io::BufReader::new(file).lines() {
          let line = line?;
          if !line.is_empty() {
            self.subscriptions.insert(line);
          }
        }
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(Error::Io(e)),
    }
  }

  fn save_subscriptions(&self) -> Result<()> {
    let temp_path = self.subscriptions_path().with_extension("tmp");
    {
      let mut temp = fs::File::create(&temp_path)?;
      let mut names: Vec<&String> = self.subscriptions.iter().collect();
      names.sort();
      for name in names {
        writeln!(temp, "{name}")?;
      }
      temp.sync_all()?;
    }
    fs::rename(&temp_path, self.subscriptions_path())?;
    Ok(())
  }

  /// Resolves a canonical mailbox name to its on-disk mbox file path, guaranteeing the result
  /// stays a descendant of the user's root directory.
  fn resolve(&self, name: &str) -> Result<PathBuf> {
    let components = canonical_components(name)?;
    let (last, parents) = components.split_last().expect("canonical_components never returns an empty list");
    let mut path = self.root.clone();
    for component in parents {
      path.push(codec::encode(component));
    }
    path.push(format!("{}.{MAILBOX_EXTENSION}", codec::encode(last)));

    if !path.starts_with(&self.root) {
      return Err(Error::InvalidArgument("mailbox name escapes the user directory".to_string()));
    }
    Ok(path)
  }

  fn canonical_name(&self, name: &str) -> Result<String> {
    Ok(canonical_components(name)?.join("/"))
  }

  pub fn create(&mut self, name: &str) -> Result<()> {
    let canonical = self.canonical_name(name)?;
    if canonical.eq_ignore_ascii_case("INBOX") && self.resolve("INBOX")?.exists() {
      return Err(Error::AlreadyExists("INBOX always exists".to_string()));
    }
    let path = self.resolve(&canonical)?;
    if path.exists() {
      return Err(Error::AlreadyExists(canonical));
    }
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::File::create(&path)?;
    Ok(())
  }

  pub fn delete(&mut self, name: &str) -> Result<()> {
    let canonical = self.canonical_name(name)?;
    if canonical.eq_ignore_ascii_case("INBOX") {
      return Err(Error::InvalidArgument("INBOX cannot be deleted".to_string()));
    }
    let path = self.resolve(&canonical)?;
    let metadata = fs::metadata(&path).map_err(|_| Error::NotFound(canonical.clone()))?;
    if metadata.len() != 0 {
      return Err(Error::NotEmpty(canonical));
    }
    fs::remove_file(&path)?;
    self.subscriptions.remove(&canonical);
    Ok(())
  }

  pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
    let from_canonical = self.canonical_name(from)?;
    let to_canonical = self.canonical_name(to)?;
    let from_path = self.resolve(&from_canonical)?;
    let to_path = self.resolve(&to_canonical)?;
    if !from_path.exists() {
      return Err(Error::NotFound(from_canonical));
    }
    if to_path.exists() {
      return Err(Error::AlreadyExists(to_canonical));
    }
    if let Some(parent) = to_path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::rename(&from_path, &to_path)?;
    if from_canonical.eq_ignore_ascii_case("INBOX") {
      self.create("INBOX")?;
    }
    Ok(())
  }

  pub fn open_mailbox(&self, name: &str, read_only: bool) -> Result<Mailbox> {
    let canonical = self.canonical_name(name)?;
    let path = self.resolve(&canonical)?;
    if !path.exists() {
      return Err(Error::NotFound(canonical));
    }
    Mailbox::open(&path, read_only)
  }

  pub fn attributes(&self, name: &str) -> Result<Attributes> {
    let canonical = self.canonical_name(name)?;
    let path = self.resolve(&canonical)?;
    if !path.exists() {
      return Err(Error::NotFound(canonical));
    }
    let has_children = path.parent().map(|parent| parent.join(path.file_stem().unwrap_or_default()).is_dir()).unwrap_or(false);
    Ok(Attributes { has_children, is_selectable: true })
  }

  pub fn subscribe(&mut self, name: &str) -> Result<()> {
    let canonical = self.canonical_name(name)?;
    self.subscriptions.insert(canonical);
    self.save_subscriptions()
  }

  pub fn unsubscribe(&mut self, name: &str) -> Result<()> {
    let canonical = self.canonical_name(name)?;
    if canonical.eq_ignore_ascii_case("INBOX") {
      return Err(Error::InvalidArgument("INBOX cannot be unsubscribed".to_string()));
    }
    self.subscriptions.remove(&canonical);
    self.save_subscriptions()
  }

  pub fn list(&self, reference: &str, pattern: &str) -> Result<Vec<String>> {
    self.list_filtered(reference, pattern, None)
  }

  pub fn list_subscribed(&self, reference: &str, pattern: &str) -> Result<Vec<String>> {
    self.list_filtered(reference, pattern, Some(&self.subscriptions))
  }

  fn list_filtered(&self, reference: &str, pattern: &str, subscribed_only: Option<&HashSet<String>>) -> Result<Vec<String>> {
    let full_pattern = if reference.is_empty() { pattern.to_string() } else { format!("{reference}{HIERARCHY_DELIMITER}{pattern}") };
    let regex = pattern::compile(&full_pattern, HIERARCHY_DELIMITER).map_err(|e| Error::InvalidArgument(e.to_string()))?;

    let mut results = Vec::new();
    let mut stack = vec![(self.root.clone(), String::new())];
    while let Some((directory, prefix)) = stack.pop() {
      let read_dir = match fs::read_dir(&directory) {
        Ok(entries) => entries,
        Err(_) => continue,
      };
      for entry in read_dir {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with('.') {
          continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
          let decoded = codec::decode(&file_name).unwrap_or_else(|_| file_name.to_string());
          let name = if prefix.is_empty() { decoded } else { format!("{prefix}{HIERARCHY_DELIMITER}{decoded}") };
          stack.push((entry.path(), name));
        } else if let Some(stem) = Path::new(file_name.as_ref()).file_stem() {
          if Path::new(file_name.as_ref()).extension().and_then(|e| e.to_str()) != Some(MAILBOX_EXTENSION) {
            continue;
          }
          let decoded = codec::decode(&stem.to_string_lossy()).unwrap_or_else(|_| stem.to_string_lossy().into_owned());
          let name = if prefix.is_empty() { decoded } else { format!("{prefix}{HIERARCHY_DELIMITER}{decoded}") };
          if regex.is_match(&name) && subscribed_only.map(|s| s.contains(&name)).unwrap_or(true) {
            results.push(name);
          }
        }
      }
    }
    results.sort();
    Ok(results)
  }

  pub fn quota_root(&self, _name: &str) -> Result<String> {
    Ok(String::new())
  }

  /// Returns `(used_kib, limit_kib)`; a limit of `-1` means unlimited.
  pub fn quota(&self, _root: &str) -> Result<(u64, i64)> {
    let mut used_bytes = 0u64;
    let mut stack = vec![self.root.clone()];
    while let Some(directory) = stack.pop() {
      for entry in fs::read_dir(&directory)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
          stack.push(entry.path());
        } else {
          used_bytes += entry.metadata()?.len();
        }
      }
    }
    Ok((used_bytes / 1024, self.quota_kib))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
  }

  #[test]
  fn open_creates_inbox() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path(), "alice").unwrap();
    assert!(store.resolve("INBOX").unwrap().exists());
  }

  #[test]
  fn inbox_is_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path(), "alice").unwrap();
    assert_eq!(store.resolve("inbox").unwrap(), store.resolve("INBOX").unwrap());
  }

  #[test]
  fn create_and_list_subfolder() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path(), "alice").unwrap();
    store.create("Work/2024").unwrap();
    let names = store.list("", "*").unwrap();
    assert!(names.contains(&"Work/2024".to_string()));
  }

  #[test]
  fn delete_refuses_inbox() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path(), "alice").unwrap();
    assert!(store.delete("INBOX").is_err());
  }

  #[test]
  fn delete_refuses_non_empty_mailbox() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(dir.path(), "alice").unwrap();
    store.create("Archive").unwrap();
    fs::write(store.resolve("Archive").unwrap(), b"not empty").unwrap();
    assert!(store.delete("Archive").is_err());
  }

  #[test]
  fn subscriptions_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
      let mut store = Store::open(dir.path(), "alice").unwrap();
      store.create("Archive").unwrap();
      store.subscribe("Archive").unwrap();
      store.close().unwrap();
    }
    let store = Store::open(dir.path(), "alice").unwrap();
    assert!(store.list_subscribed("", "*").unwrap().contains(&"Archive".to_string()));
  }

  #[test]
  fn rejects_traversal_components() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path(), "alice").unwrap();
    assert!(store.resolve("../etc").is_err());
  }
}
