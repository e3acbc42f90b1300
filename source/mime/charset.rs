//! Charset-tolerant byte-to-`String` decoding for header values whose declared charset may be
//! missing, unrecognized, or simply wrong, which happens constantly in the wild. We never fail a
//! parse over a bad charset label: unknown labels fall back to Latin-1, and malformed sequences in
//! a recognized charset are replaced rather than rejected.

use encoding_rs::Encoding;

/// Decodes `bytes` using `label` (an IANA charset name, case-insensitive) if it names a charset
/// `encoding_rs` recognizes, otherwise falls back to Latin-1 (which never fails: it maps every
/// byte to the Unicode code point of the same value).
pub fn decode(bytes: &[u8], label: Option<&str>) -> String {
  let encoding = label
    .and_then(|label| Encoding::for_label(label.as_bytes()))
    .unwrap_or(encoding_rs::WINDOWS_1252);
  let (text, _, _) = encoding.decode(bytes);
  text.into_owned()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_utf8() {
    assert_eq!("caf\u{e9}", decode("café".as_bytes(), Some("utf-8")));
  }

  #[test]
  fn falls_back_on_unknown_label() {
    assert_eq!("caf\u{e9}", decode(b"caf\xe9", Some("bogus-charset-9000")));
  }

  #[test]
  fn treats_missing_label_as_latin1() {
    assert_eq!("caf\u{e9}", decode(b"caf\xe9", None));
  }
}
