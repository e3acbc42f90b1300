//! Message flags shared by the mbox engine and the search index. Bit order is fixed by the
//! on-disk index format, so this is a plain bitset rather than an enum.

/// LSB-first: SEEN, ANSWERED, FLAGGED, DELETED, DRAFT, RECENT.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
  pub const SEEN: Flags = Flags(1 << 0);
  pub const ANSWERED: Flags = Flags(1 << 1);
  pub const FLAGGED: Flags = Flags(1 << 2);
  pub const DELETED: Flags = Flags(1 << 3);
  pub const DRAFT: Flags = Flags(1 << 4);
  pub const RECENT: Flags = Flags(1 << 5);

  pub fn empty() -> Flags {
    Flags(0)
  }

  pub fn from_bits(bits: u8) -> Flags {
    Flags(bits)
  }

  pub fn bits(self) -> u8 {
    self.0
  }

  pub fn contains(self, other: Flags) -> bool {
    self.0 & other.0 == other.0
  }

  pub fn set(&mut self, other: Flags, on: bool) {
    if on {
      self.0 |= other.0;
    } else {
      self.0 &= !other.0;
    }
  }

  pub fn union(self, other: Flags) -> Flags {
    Flags(self.0 | other.0)
  }
}

impl std::ops::BitOr for Flags {
  type Output = Flags;

  fn bitor(self, rhs: Flags) -> Flags {
    self.union(rhs)
  }
}

/// IMAP-style names in bit order, `\Seen \Flagged` fashion.
const NAMES: [(Flags, &str); 6] =
  [(Flags::SEEN, "\\Seen"), (Flags::ANSWERED, "\\Answered"), (Flags::FLAGGED, "\\Flagged"), (Flags::DELETED, "\\Deleted"), (Flags::DRAFT, "\\Draft"), (Flags::RECENT, "\\Recent")];

impl std::fmt::Display for Flags {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut first = true;
    for (flag, name) in NAMES {
      if self.contains(flag) {
        if !first {
          write!(f, " ")?;
        }
        write!(f, "{name}")?;
        first = false;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_and_contains() {
    let mut flags = Flags::empty();
    assert!(!flags.contains(Flags::SEEN));
    flags.set(Flags::SEEN, true);
    assert!(flags.contains(Flags::SEEN));
    flags.set(Flags::SEEN, false);
    assert!(!flags.contains(Flags::SEEN));
  }

  #[test]
  fn bit_positions_match_on_disk_layout() {
    assert_eq!(0b0000_0001, Flags::SEEN.bits());
    assert_eq!(0b0010_0000, Flags::RECENT.bits());
  }

  #[test]
  fn display_renders_imap_flag_names() {
    assert_eq!("", Flags::empty().to_string());
    assert_eq!("\\Seen", Flags::SEEN.to_string());
    assert_eq!("\\Seen \\Flagged", (Flags::SEEN | Flags::FLAGGED).to_string());
    assert_eq!("\\Answered \\Deleted \\Recent", (Flags::ANSWERED | Flags::DELETED | Flags::RECENT).to_string());
  }
}
