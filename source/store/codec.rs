//! Reversible codec for turning a mailbox name into a filesystem-safe path component. Anything
//! outside `[A-Za-z0-9._-]`, plus the escape character itself, is percent-encoded.

const ESCAPE: char = '&';

pub fn encode(name: &str) -> String {
  let mut out = String::with_capacity(name.len());
  for ch in name.chars() {
    if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
      out.push(ch);
    } else {
      let mut buf = [0u8; 4];
      for byte in ch.encode_utf8(&mut buf).as_bytes() {
        out.push(ESCAPE);
        out.push_str(&format!("{byte:02X}"));
      }
    }
  }
  out
}

pub fn decode(encoded: &str) -> Result<String, String> {
  let bytes = encoded.as_bytes();
  let mut raw = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] as char == ESCAPE {
      if i + 2 >= bytes.len() {
        return Err("truncated escape sequence".to_string());
      }
      let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).map_err(|_| "invalid escape sequence".to_string())?;
      let byte = u8::from_str_radix(hex, 16).map_err(|_| "invalid escape sequence".to_string())?;
      raw.push(byte);
      i += 3;
    } else {
      raw.push(bytes[i]);
      i += 1;
    }
  }
  String::from_utf8(raw).map_err(|_| "decoded bytes are not valid UTF-8".to_string())
}

/// A name is rejected outright (never even reaches the codec) if, once normalized, it is empty,
/// `.`, `..`, or contains a path separator or NUL.
pub fn is_legal_component(name: &str) -> bool {
  !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0', ':'])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_plain_names() {
    assert_eq!("inbox", decode(&encode("inbox")).unwrap());
  }

  #[test]
  fn encodes_unsafe_characters() {
    let encoded = encode("a/b");
    assert!(!encoded.contains('/'));
    assert_eq!("a/b", decode(&encoded).unwrap());
  }

  #[test]
  fn round_trips_non_ascii() {
    let encoded = encode("inbox \u{1F4E8}");
    assert_eq!("inbox \u{1F4E8}", decode(&encoded).unwrap());
  }

  #[test]
  fn rejects_dot_and_dotdot() {
    assert!(!is_legal_component("."));
    assert!(!is_legal_component(".."));
    assert!(!is_legal_component(""));
    assert!(is_legal_component("Archive"));
  }
}
