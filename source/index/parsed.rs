//! Builds a searchable text blob from a message's raw bytes by streaming them through the MIME
//! parser. Used only when a search criterion can't be answered from the indexed fields alone.

use crate::error::Result;
use crate::mime::headers::{ContentDisposition, ContentType};
use crate::mime::{EntityHandler, MimeParser, TransferEncoding};

#[derive(Default)]
struct Collector {
  is_text: Vec<bool>,
  charset: Vec<Option<String>>,
  buffers: Vec<Vec<u8>>,
  text: String,
}

impl EntityHandler for Collector {
  fn start_entity(&mut self, _boundary: Option<&str>) -> Result<()> {
    self.is_text.push(false);
    self.charset.push(None);
    self.buffers.push(Vec::new());
    Ok(())
  }

  fn content_type(&mut self, content_type: &ContentType) {
    if let Some(is_text) = self.is_text.last_mut() {
      *is_text = content_type.primary().eq_ignore_ascii_case("text");
    }
    if let Some(charset) = self.charset.last_mut() {
      *charset = content_type.charset().map(str::to_string);
    }
  }

  fn content_disposition(&mut self, _content_disposition: &ContentDisposition) {}

  fn content_transfer_encoding(&mut self, _encoding: TransferEncoding, _raw_token: &str) {}

  fn body_content(&mut self, content: &[u8]) -> Result<()> {
    if let Some(buf) = self.buffers.last_mut() {
      buf.extend_from_slice(content);
    }
    Ok(())
  }

  fn end_entity(&mut self, _boundary: Option<&str>) -> Result<()> {
    let is_text = self.is_text.pop().unwrap_or(false);
    let charset = self.charset.pop().flatten();
    let buf = self.buffers.pop().unwrap_or_default();
    if is_text && !buf.is_empty() {
      let decoded = crate::mime::charset::decode(&buf, charset.as_deref());
      if !self.text.is_empty() {
        self.text.push(' ');
      }
      self.text.push_str(&decoded);
    }
    Ok(())
  }
}

/// Parses `raw_message` (full RFC 822 bytes, headers+body) and returns the concatenation of every
/// `text/*` body part, decoded to UTF-8. Parser errors are swallowed: a message this full-parse
/// can't make sense of simply contributes no text rather than failing the whole search.
pub fn extract_text(raw_message: &[u8]) -> String {
  let mut parser = MimeParser::new(Collector::default());
  if parser.push(raw_message).is_err() {
    return parser.into_handler().text;
  }
  let _ = parser.close();
  parser.into_handler().text
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extracts_plain_text_body() {
    let message = b"Content-Type: text/plain; charset=us-ascii\r\n\r\nhello world";
    assert_eq!("hello world", extract_text(message));
  }

  #[test]
  fn ignores_non_text_parts() {
    let message = b"Content-Type: application/octet-stream\r\n\r\nbinarystuff";
    assert_eq!("", extract_text(message));
  }
}
