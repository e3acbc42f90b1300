//! RFC 2047 encoded-word decoding (`=?charset?Q|B?text?=`), applied as a final pass over header
//! parameter values that carried no RFC 2231 charset information of their own.

use crate::mime::charset;

fn q_decode(text: &str) -> Vec<u8> {
  let bytes = text.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    match bytes[i] {
      b'_' => {
        out.push(b' ');
        i += 1;
      }
      b'=' if i + 2 < bytes.len() => {
        let hi = (bytes[i + 1] as char).to_digit(16);
        let lo = (bytes[i + 2] as char).to_digit(16);
        match (hi, lo) {
          (Some(hi), Some(lo)) => {
            out.push(((hi << 4) | lo) as u8);
            i += 3;
          }
          _ => {
            out.push(bytes[i]);
            i += 1;
          }
        }
      }
      b => {
        out.push(b);
        i += 1;
      }
    }
  }
  out
}

fn b_decode(text: &str) -> Vec<u8> {
  let mut decoder = crate::mime::decode::Base64Decoder::new();
  let mut out = vec![0u8; text.len()];
  let (_, written) = decoder.decode(text.as_bytes(), &mut out, true);
  out.truncate(written);
  out
}

/// Decodes a single `=?charset?Q|B?text?=` token, or returns `None` if it isn't well-formed.
fn decode_word(word: &str) -> Option<String> {
  let word = word.strip_prefix("=?")?.strip_suffix("?=")?;
  let mut parts = word.splitn(3, '?');
  let charset_and_lang = parts.next()?;
  let charset = charset_and_lang.split('*').next()?;
  let encoding = parts.next()?;
  let text = parts.next()?;
  let bytes = match encoding {
    "Q" | "q" => q_decode(text),
    "B" | "b" => b_decode(text),
    _ => return None,
  };
  Some(charset::decode(&bytes, Some(charset)))
}

/// Finds `=?...?=` encoded words in `input` and decodes them in place. Whitespace that separates
/// two consecutive encoded words is dropped (RFC 2047 §6.2); whitespace elsewhere is untouched.
/// Applied unconditionally to plain ASCII values discovered by the parameter grammar; values that
/// contain no `=?` are returned unchanged at negligible cost.
pub fn decode_if_ascii(input: &str) -> String {
  if !input.is_ascii() || !input.contains("=?") {
    return input.to_string();
  }

  let mut result = String::new();
  let mut rest = input;
  let mut last_was_word = false;
  while let Some(start) = rest.find("=?") {
    let (literal, after_start) = rest.split_at(start);
    let gap_is_only_whitespace = !literal.is_empty() && literal.trim().is_empty();
    if !(last_was_word && gap_is_only_whitespace) {
      result.push_str(literal);
    }

    match find_encoded_word_end(after_start) {
      Some(end) => {
        let word = &after_start[..end];
        match decode_word(word) {
          Some(decoded) => {
            result.push_str(&decoded);
            last_was_word = true;
          }
          None => {
            result.push_str(word);
            last_was_word = false;
          }
        }
        rest = &after_start[end..];
      }
      None => {
        result.push_str(after_start);
        rest = "";
        break;
      }
    }
  }
  result.push_str(rest);
  result
}

fn find_encoded_word_end(s: &str) -> Option<usize> {
  debug_assert!(s.starts_with("=?"));
  let mut question_marks = 0;
  let bytes = s.as_bytes();
  let mut i = 2;
  while i < bytes.len() {
    if bytes[i] == b'?' {
      question_marks += 1;
      if question_marks == 3 && bytes.get(i + 1) == Some(&b'=') {
        return Some(i + 2);
      }
    } else if bytes[i] == b' ' {
      return None;
    }
    i += 1;
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_q_encoding() {
    assert_eq!("r\u{e9}sum\u{e9}", decode_if_ascii("=?UTF-8?Q?r=C3=A9sum=C3=A9?="));
  }

  #[test]
  fn decodes_b_encoding() {
    assert_eq!("Hello", decode_if_ascii("=?UTF-8?B?SGVsbG8=?="));
  }

  #[test]
  fn leaves_plain_values_untouched() {
    assert_eq!("plain value", decode_if_ascii("plain value"));
  }

  #[test]
  fn joins_adjacent_encoded_words_across_whitespace() {
    assert_eq!(
      "Helloworld",
      decode_if_ascii("=?UTF-8?Q?Hello?= =?UTF-8?Q?world?=")
    );
  }

  #[test]
  fn keeps_whitespace_that_is_not_between_two_words() {
    assert_eq!(
      "prefix Hello",
      decode_if_ascii("prefix =?UTF-8?Q?Hello?=")
    );
  }
}
