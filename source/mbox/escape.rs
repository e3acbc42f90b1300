//! `From `-escaping (RFC 4155 / the traditional mbox convention): any line in a message *body*
//! that begins with literal `From ` is stored on disk prefixed with `>` so it's never mistaken for
//! the start of the next message. Escaping and unescaping only ever touch the body, never the
//! headers.

/// Index of the first byte of the body: the byte right after the blank line separating headers
/// from body, or `bytes.len()` if there is no blank line (a headers-only message).
pub fn body_start(bytes: &[u8]) -> usize {
  let mut pos = 0;
  while pos < bytes.len() {
    let line_end = memchr::memchr(b'\n', &bytes[pos..]).map(|i| pos + i + 1).unwrap_or(bytes.len());
    let line = &bytes[pos..line_end];
    let content = line.strip_suffix(b"\r\n").or_else(|| line.strip_suffix(b"\n")).unwrap_or(line);
    if content.is_empty() {
      return line_end;
    }
    pos = line_end;
  }
  bytes.len()
}

fn for_each_line(bytes: &[u8], mut f: impl FnMut(&[u8])) {
  let mut pos = 0;
  while pos < bytes.len() {
    let line_end = memchr::memchr(b'\n', &bytes[pos..]).map(|i| pos + i + 1).unwrap_or(bytes.len());
    f(&bytes[pos..line_end]);
    pos = line_end;
  }
}

/// Prefixes every body line that begins with `From ` with `>`. `headers` and `body` are
/// concatenated as-is; only `body` is scanned.
pub fn escape_body(body: &[u8]) -> Vec<u8> {
  let mut out = Vec::with_capacity(body.len());
  for_each_line(body, |line| {
    if line.starts_with(b"From ") {
      out.push(b'>');
    }
    out.extend_from_slice(line);
  });
  out
}

/// Strips exactly one leading `>` from every body line that, after stripping, begins with
/// `From `. A line of bare `>`s followed by `From ` loses only its first `>` (mirrors how the
/// escaping only ever adds one level).
pub fn unescape_body(body: &[u8]) -> Vec<u8> {
  let mut out = Vec::with_capacity(body.len());
  for_each_line(body, |line| {
    if line.starts_with(b">From ") {
      out.extend_from_slice(&line[1..]);
    } else {
      out.extend_from_slice(line);
    }
  });
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn finds_body_start_after_blank_line() {
    let message = b"Subject: x\r\n\r\nFrom the start\r\n";
    assert_eq!(b"Subject: x\r\n\r\n".len(), body_start(message));
  }

  #[test]
  fn headers_only_message_has_no_body() {
    let message = b"Subject: x\r\n";
    assert_eq!(message.len(), body_start(message));
  }

  #[test]
  fn escapes_from_lines_in_body_only() {
    let escaped = escape_body(b"From the start\nnormal line\nFrom again\n");
    assert_eq!(b">From the start\nnormal line\n>From again\n", escaped.as_slice());
  }

  #[test]
  fn unescape_is_inverse_of_escape() {
    let body = b"From the start\nnormal line\nFrom again\n";
    let escaped = escape_body(body);
    assert_eq!(body.as_slice(), unescape_body(&escaped).as_slice());
  }

  #[test]
  fn unescape_only_strips_one_level() {
    assert_eq!(b">From x\n".as_slice(), unescape_body(b">>From x\n").as_slice());
  }
}
