//! Structured header parsing. Six headers are meaningful to the push parser itself
//! (`Content-Type` and `Content-Transfer-Encoding` drive the state machine; the rest are just
//! forwarded); everything else is looked up in a caller-extensible registry and, if present,
//! forwarded as [`EntityHandler::extension_header`].

mod grammar;
mod params;

pub mod content_disposition;
pub mod content_type;

pub use content_disposition::ContentDisposition;
pub use content_type::ContentType;

use std::collections::HashMap;
use std::sync::Arc;

/// A parsed `Content-ID` or `Message-ID` value (RFC 2822 §3.6.4 `msg-id`), without the angle
/// brackets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageId {
  left: String,
  right: String,
}

impl MessageId {
  pub fn parse(raw: &str) -> Result<Self, String> {
    grammar::headers::msg_id(raw)
      .map(|(left, right)| Self { left: left.to_string(), right: right.to_string() })
      .map_err(|e| e.to_string())
  }

  pub fn local_part(&self) -> &str {
    &self.left
  }

  pub fn domain(&self) -> &str {
    &self.right
  }
}

impl std::fmt::Display for MessageId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<{}@{}>", self.left, self.right)
  }
}

pub fn parse_mime_version(raw: &str) -> Result<(u32, u32), String> {
  grammar::headers::mime_version(raw).map_err(|e| e.to_string())
}

/// A caller-registered handler for a header name outside the six built-ins. Receives the decoded
/// (charset-tolerant) header value.
pub type ExtensionHandler = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Header names beyond the six built-ins that an embedder wants surfaced, each mapped to a
/// function that reduces the raw value to whatever string the embedder wants passed through
/// `EntityHandler::extension_header`. Registered once on a parser and consulted for every entity.
#[derive(Clone, Default)]
pub struct HeaderRegistry {
  extensions: HashMap<String, ExtensionHandler>,
}

impl HeaderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// `name` is matched case-insensitively. Registering a name already covered by one of the six
  /// built-ins (content-type, content-disposition, content-transfer-encoding, content-id,
  /// content-description, mime-version) has no effect: those are handled internally because the
  /// parser's own state depends on two of them.
  pub fn register(&mut self, name: &str, handler: ExtensionHandler) {
    self.extensions.insert(name.to_ascii_lowercase(), handler);
  }

  pub fn get(&self, name: &str) -> Option<&ExtensionHandler> {
    self.extensions.get(&name.to_ascii_lowercase())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn message_id_round_trips_display() {
    let id = MessageId::parse("<a.b@example.com>").unwrap();
    assert_eq!("a.b", id.local_part());
    assert_eq!("example.com", id.domain());
    assert_eq!("<a.b@example.com>", id.to_string());
  }

  #[test]
  fn registry_is_case_insensitive() {
    let mut registry = HeaderRegistry::new();
    registry.register("X-Priority", Arc::new(|v: &str| v.to_string()));
    assert!(registry.get("x-priority").is_some());
  }
}
