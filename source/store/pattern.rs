//! Translates an IMAP `LIST`-style pattern (`*` matches any characters including the hierarchy
//! delimiter, `%` matches any characters except the delimiter) into an anchored, case-insensitive
//! [`regex::Regex`].

use regex::Regex;

pub fn compile(pattern: &str, delimiter: char) -> Result<Regex, regex::Error> {
  let mut expr = String::with_capacity(pattern.len() * 2 + 2);
  expr.push_str("(?i)^");
  for ch in pattern.chars() {
    match ch {
      '*' => expr.push_str(".*"),
      '%' => {
        expr.push_str("[^");
        push_escaped(&mut expr, delimiter);
        expr.push_str("]*");
      }
      other => push_escaped(&mut expr, other),
    }
  }
  expr.push('$');
  Regex::new(&expr)
}

const REGEX_METACHARACTERS: &str = r"\.+*?()|[]{}^$#&-~";

fn push_escaped(out: &mut String, ch: char) {
  if REGEX_METACHARACTERS.contains(ch) {
    out.push('\\');
  }
  out.push(ch);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn star_matches_across_delimiters() {
    let re = compile("A*", '/').unwrap();
    assert!(re.is_match("A/B/C"));
  }

  #[test]
  fn percent_does_not_cross_delimiter() {
    let re = compile("A%", '/').unwrap();
    assert!(re.is_match("ABC"));
    assert!(!re.is_match("A/B"));
  }

  #[test]
  fn matching_is_case_insensitive() {
    let re = compile("inbox", '/').unwrap();
    assert!(re.is_match("INBOX"));
  }

  #[test]
  fn literal_characters_are_escaped() {
    let re = compile("a.b", '/').unwrap();
    assert!(re.is_match("a.b"));
    assert!(!re.is_match("aXb"));
  }
}
