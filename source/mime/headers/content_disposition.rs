//! `Content-Disposition` (RFC 2183): disposition type plus the same RFC 2231-aware parameters as
//! `Content-Type` (most commonly `filename`).

use super::params;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentDisposition {
  disposition: String,
  params: Vec<(String, String)>,
}

impl ContentDisposition {
  pub fn parse(raw: &str) -> Result<Self, String> {
    let (disposition, params) = params::parse_disposition_and_params(raw)?;
    Ok(Self { disposition, params })
  }

  pub fn disposition(&self) -> &str {
    &self.disposition
  }

  pub fn is_attachment(&self) -> bool {
    self.disposition.eq_ignore_ascii_case("attachment")
  }

  pub fn is_inline(&self) -> bool {
    self.disposition.eq_ignore_ascii_case("inline")
  }

  pub fn param(&self, name: &str) -> Option<&str> {
    self.params.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
  }

  pub fn filename(&self) -> Option<&str> {
    self.param("filename")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_attachment_filename() {
    let cd = ContentDisposition::parse(r#"attachment; filename="report.pdf""#).unwrap();
    assert!(cd.is_attachment());
    assert_eq!(Some("report.pdf"), cd.filename());
  }

  #[test]
  fn parses_rfc2231_filename() {
    let cd = ContentDisposition::parse("attachment; filename*=UTF-8''He%20ll%C3%B6.txt").unwrap();
    assert_eq!(Some("He ll\u{f6}.txt"), cd.filename());
  }
}
