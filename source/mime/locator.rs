use std::fmt;

/// Parser-owned position tracker, updated byte-by-byte as the push parser consumes input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Locator {
  offset: u64,
  line: u64,
  column: u64,
}

impl Locator {
  pub fn new() -> Self {
    Self {
      offset: 0,
      line: 1,
      column: 0,
    }
  }

  pub fn offset(&self) -> u64 {
    self.offset
  }

  pub fn line(&self) -> u64 {
    self.line
  }

  pub fn column(&self) -> u64 {
    self.column
  }

  pub(crate) fn advance(&mut self, byte: u8) {
    self.offset += 1;
    if byte == b'\n' {
      self.line += 1;
      self.column = 0;
    } else {
      self.column += 1;
    }
  }

  pub(crate) fn advance_by(&mut self, bytes: &[u8]) {
    for byte in bytes {
      self.advance(*byte);
    }
  }
}

impl fmt::Display for Locator {
  fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      formatter,
      "line {}, column {} (byte {})",
      self.line, self.column, self.offset
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tracks_lines_and_columns() {
    let mut locator = Locator::new();
    locator.advance_by(b"ab\ncd");
    assert_eq!(2, locator.line());
    assert_eq!(2, locator.column());
    assert_eq!(5, locator.offset());
  }
}
