//! `peg` transcriptions of the two structured headers simple enough that a declarative grammar is
//! clearer than hand-written scanning: RFC 2045 §4 `MIME-Version` and RFC 2822 §3.6.4 `msg-id`
//! (used for both `Content-ID` and `Message-ID`).

peg::parser! {
  pub grammar headers() for str {
    rule digits() -> &'input str = $(['0'..='9']+)

    // RFC 2045 §4: MIME-Version: 1*DIGIT "." 1*DIGIT *(CFWS). Only 1.0 is recognized; any other
    // version number is rejected rather than silently accepted as if it were equivalent.
    pub rule mime_version() -> (u32, u32)
      = [' ' | '\t']* major:digits() "." minor:digits() [' ' | '\t']*
      {?
        let major: u32 = major.parse().or(Err("bad major version"))?;
        let minor: u32 = minor.parse().or(Err("bad minor version"))?;
        if (major, minor) != (1, 0) {
          return Err("unsupported MIME version");
        }
        Ok((major, minor))
      }

    // RFC 2822 §3.6.4: msg-id = [CFWS] "<" id-left "@" id-right ">" [CFWS]
    rule id_atom_char() -> char = c:[^ '<' | '>' | '@' | ' ' | '\t' | '\r' | '\n'] { c }
    rule id_part() -> &'input str = $(id_atom_char()+ ("." id_atom_char()+)*)

    pub rule msg_id() -> (&'input str, &'input str)
      = [' ' | '\t']* "<" left:id_part() "@" right:id_part() ">" [' ' | '\t']*
      { (left, right) }
  }
}

#[cfg(test)]
mod tests {
  use super::headers;

  #[test]
  fn parses_mime_version() {
    assert_eq!((1, 0), headers::mime_version("1.0").unwrap());
    assert_eq!((1, 0), headers::mime_version(" 1.0 ").unwrap());
  }

  #[test]
  fn rejects_bad_mime_version() {
    assert!(headers::mime_version("one.zero").is_err());
  }

  #[test]
  fn rejects_mime_version_other_than_1_0() {
    assert!(headers::mime_version("2.0").is_err());
    assert!(headers::mime_version("1.1").is_err());
  }

  #[test]
  fn parses_msg_id() {
    let (left, right) = headers::msg_id("<abc.123@mail.example.com>").unwrap();
    assert_eq!("abc.123", left);
    assert_eq!("mail.example.com", right);
  }

  #[test]
  fn rejects_msg_id_without_angle_brackets() {
    assert!(headers::msg_id("abc@example.com").is_err());
  }
}
