//! `Content-Type` (RFC 2045 §5): primary/sub type plus RFC 2231-aware parameters.

use super::params;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
  primary: String,
  sub: String,
  params: Vec<(String, String)>,
}

impl ContentType {
  pub fn parse(raw: &str) -> Result<Self, String> {
    let (primary, sub, params) = params::parse_type_and_params(raw)?;
    Ok(Self { primary, sub, params })
  }

  pub fn primary(&self) -> &str {
    &self.primary
  }

  pub fn sub(&self) -> &str {
    &self.sub
  }

  /// `"primary/sub"`, both lowercased.
  pub fn full_type(&self) -> String {
    format!("{}/{}", self.primary, self.sub)
  }

  pub fn is_multipart(&self) -> bool {
    self.primary.eq_ignore_ascii_case("multipart")
  }

  pub fn is_message(&self) -> bool {
    self.primary.eq_ignore_ascii_case("message")
  }

  pub fn param(&self, name: &str) -> Option<&str> {
    self.params.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
  }

  pub fn params(&self) -> &[(String, String)] {
    &self.params
  }

  pub fn boundary(&self) -> Option<&str> {
    self.param("boundary")
  }

  pub fn charset(&self) -> Option<&str> {
    self.param("charset")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_multipart_boundary() {
    let ct = ContentType::parse(r#"multipart/mixed; boundary="outer""#).unwrap();
    assert!(ct.is_multipart());
    assert_eq!(Some("outer"), ct.boundary());
    assert_eq!("multipart/mixed", ct.full_type());
  }

  #[test]
  fn normalizes_type_case() {
    let ct = ContentType::parse("Text/PLAIN; charset=UTF-8").unwrap();
    assert_eq!("text", ct.primary());
    assert_eq!("plain", ct.sub());
    assert_eq!(Some("UTF-8"), ct.charset());
  }

  #[test]
  fn rejects_missing_subtype() {
    assert!(ContentType::parse("text").is_err());
  }
}
