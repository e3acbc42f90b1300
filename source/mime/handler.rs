use crate::error::Result;
use crate::mime::headers::{ContentDisposition, ContentType, MessageId};
use crate::mime::Locator;

/// Transfer-encoding token recognized from `Content-Transfer-Encoding`, canonicalized. Anything
/// the parser doesn't recognize is treated as `Binary` (pass the bytes through undecoded), per
/// RFC 2045 §6.1's instruction to treat unknown mechanisms conservatively.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransferEncoding {
  #[default]
  SevenBit,
  EightBit,
  Binary,
  QuotedPrintable,
  Base64,
}

impl TransferEncoding {
  pub fn from_token(token: &str) -> Self {
    match token.trim().to_ascii_lowercase().as_str() {
      "7bit" => Self::SevenBit,
      "8bit" => Self::EightBit,
      "binary" => Self::Binary,
      "quoted-printable" => Self::QuotedPrintable,
      "base64" => Self::Base64,
      _ => Self::Binary,
    }
  }
}

/// Callbacks the push parser drives as it walks an entity (or a tree of entities, for
/// multipart/message bodies). Implementors receive exactly one matched `end_entity` for every
/// `start_entity`, correctly nested, with the same boundary tag on both ends.
pub trait EntityHandler {
  /// Called once per `push`/`close` cycle before any other callback, so the handler can attribute
  /// later callbacks to a position even if it never reads [`Locator`] itself. The default is a
  /// no-op.
  fn set_locator(&mut self, _locator: Locator) {}

  /// A new entity begins. `boundary` is the delimiter string whose match opened it, or `None` for
  /// the outermost entity (the one implicitly started by the first `push`). Returning `Err`
  /// aborts parsing; the error surfaces from the `push`/`close` call in progress.
  fn start_entity(&mut self, boundary: Option<&str>) -> Result<()>;

  fn content_type(&mut self, _content_type: &ContentType) {}
  fn content_disposition(&mut self, _content_disposition: &ContentDisposition) {}
  fn content_transfer_encoding(&mut self, _encoding: TransferEncoding, _raw_token: &str) {}
  fn content_id(&mut self, _id: &MessageId) {}
  fn content_description(&mut self, _description: &str) {}
  fn mime_version(&mut self, _major: u32, _minor: u32) {}

  /// A header outside the six built-ins that a caller-registered [`super::headers::HeaderRegistry`]
  /// entry matched.
  fn extension_header(&mut self, _name: &str, _value: &str) {}

  /// The entity's header section has ended (always called exactly once per `start_entity`, even
  /// for entities with zero headers). Returning `Err` aborts parsing.
  fn end_headers(&mut self) -> Result<()> {
    Ok(())
  }

  /// A chunk of the entity's decoded body. For a non-multipart entity this is the transfer-decoded
  /// payload; may be called any number of times, including zero for an empty body. Returning `Err`
  /// aborts parsing, e.g. once a handler has seen enough of the body to make its decision.
  fn body_content(&mut self, content: &[u8]) -> Result<()>;

  /// Bytes that belong to no entity's body: a multipart preamble or epilogue. These are forwarded
  /// raw, never transfer-decoded.
  fn unexpected_content(&mut self, _content: &[u8]) {}

  /// The entity ends. `boundary` matches the tag passed to the corresponding `start_entity`.
  /// Returning `Err` aborts parsing.
  fn end_entity(&mut self, boundary: Option<&str>) -> Result<()>;

  /// A structured header failed to parse; the event it would have produced is simply omitted and
  /// parsing continues. Default is a no-op; handlers that want visibility into recovered errors
  /// can override it.
  fn handler_error(&mut self, _header_name: &str, _message: &str) {}
}
