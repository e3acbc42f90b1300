//! Shared `type/subtype; name=value` parameter-list grammar for Content-Type and
//! Content-Disposition (RFC 2045 §5.1 grammar, RFC 2231 extensions). Hand-written rather than a
//! `peg` grammar: the RFC 2231 continuation bookkeeping (grouping `name*0*`, `name*1*`, ... by
//! index, carrying the first segment's charset into later segments) is naturally imperative and
//! doesn't gain anything from a declarative grammar the way the simpler `<local@domain>` and
//! `1.0` grammars in `grammar.rs` do.

use std::collections::BTreeMap;

fn is_tspecial(c: char) -> bool {
  matches!(
    c,
    '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '='
  )
}

fn is_token_char(c: char) -> bool {
  c.is_ascii() && !c.is_ascii_control() && !c.is_ascii_whitespace() && !is_tspecial(c)
}

/// Consumes a RFC 2045 `token` (a run of non-tspecial printable ASCII) from the front of `s`.
fn take_token(s: &str) -> Option<(&str, &str)> {
  let end = s.find(|c: char| !is_token_char(c)).unwrap_or(s.len());
  if end == 0 {
    None
  } else {
    Some((&s[..end], &s[end..]))
  }
}

/// Consumes a RFC 2045 `quoted-string`, unescaping `\x` -> `x`, returning the unescaped value.
fn take_quoted(s: &str) -> Option<(String, &str)> {
  let mut chars = s.char_indices();
  match chars.next() {
    Some((_, '"')) => {}
    _ => return None,
  }
  let mut value = String::new();
  let mut escaped = false;
  for (i, c) in chars {
    if escaped {
      value.push(c);
      escaped = false;
      continue;
    }
    match c {
      '\\' => escaped = true,
      '"' => return Some((value, &s[i + c.len_utf8()..])),
      _ => value.push(c),
    }
  }
  None
}

fn skip_ows(s: &str) -> &str {
  s.trim_start_matches([' ', '\t'])
}

#[derive(Debug, Clone)]
enum RawSegment {
  /// Plain `name=value` or `name="value"`: not subject to RFC 2231 percent-decoding.
  Plain(String),
  /// `name*=charset'lang'value` or `name*N*=value`: percent-encoded.
  Extended(String),
}

struct RawParam {
  base: String,
  index: Option<u32>,
  segment: RawSegment,
}

/// Splits a parameter key like `name`, `name*`, `name*0`, or `name*0*` into (base, index, extended).
fn split_key(key: &str) -> (String, Option<u32>, bool) {
  let lower = key.to_ascii_lowercase();
  if let Some(stripped) = lower.strip_suffix('*') {
    if let Some(star) = stripped.rfind('*') {
      let (base, idx) = stripped.split_at(star);
      let idx = &idx[1..];
      if let Ok(n) = idx.parse::<u32>() {
        return (base.to_string(), Some(n), true);
      }
    }
    // `name*=...` with no numeric continuation index: the single extended value form.
    return (stripped.to_string(), None, true);
  }
  if let Some(star) = lower.rfind('*') {
    let (base, idx) = lower.split_at(star);
    let idx = &idx[1..];
    if let Ok(n) = idx.parse::<u32>() {
      return (base.to_string(), Some(n), false);
    }
  }
  (lower, None, false)
}

fn parse_params(mut rest: &str) -> Result<Vec<RawParam>, String> {
  let mut params = Vec::new();
  loop {
    rest = skip_ows(rest);
    if rest.is_empty() {
      break;
    }
    rest = rest
      .strip_prefix(';')
      .ok_or_else(|| format!("expected ';' before parameter, found {rest:?}"))?;
    rest = skip_ows(rest);
    if rest.is_empty() {
      // Trailing ';' with nothing after it: tolerate, matches common malformed input.
      break;
    }
    let (key, tail) = take_token(rest).ok_or_else(|| format!("expected parameter name in {rest:?}"))?;
    let tail = skip_ows(tail);
    let tail = tail
      .strip_prefix('=')
      .ok_or_else(|| format!("expected '=' after parameter name {key:?}"))?;
    let tail = skip_ows(tail);
    let (base, index, extended) = split_key(key);
    let (value, remainder) = if extended {
      let end = tail.find(';').unwrap_or(tail.len());
      (tail[..end].trim_end().to_string(), &tail[end..])
    } else if tail.starts_with('"') {
      let (value, remainder) = take_quoted(tail).ok_or_else(|| format!("unterminated quoted-string in {tail:?}"))?;
      (value, remainder)
    } else {
      let (value, remainder) = take_token(tail).ok_or_else(|| format!("expected parameter value in {tail:?}"))?;
      (value.to_string(), remainder)
    };
    let segment = if extended {
      RawSegment::Extended(value)
    } else {
      RawSegment::Plain(value)
    };
    params.push(RawParam { base, index, segment });
    rest = remainder;
  }
  Ok(params)
}

fn percent_decode(input: &str) -> Vec<u8> {
  let bytes = input.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'%' && i + 2 < bytes.len() {
      let hi = (bytes[i + 1] as char).to_digit(16);
      let lo = (bytes[i + 2] as char).to_digit(16);
      if let (Some(hi), Some(lo)) = (hi, lo) {
        out.push(((hi << 4) | lo) as u8);
        i += 3;
        continue;
      }
    }
    out.push(bytes[i]);
    i += 1;
  }
  out
}

/// Groups raw segments by base parameter name, concatenates RFC 2231 continuations in numeric
/// order, percent-decodes extended values using the first segment's declared charset, and runs a
/// RFC 2047 encoded-word pass over plain ASCII values that used no RFC 2231 machinery at all.
fn assemble(raw: Vec<RawParam>) -> Vec<(String, String)> {
  let mut order = Vec::new();
  let mut groups: BTreeMap<String, Vec<RawParam>> = BTreeMap::new();
  for param in raw {
    if !groups.contains_key(&param.base) {
      order.push(param.base.clone());
    }
    groups.entry(param.base.clone()).or_default().push(param);
  }

  let mut result = Vec::new();
  for name in order {
    let mut segments = groups.remove(&name).unwrap_or_default();
    segments.sort_by_key(|p| p.index.unwrap_or(0));
    let any_extended = segments.iter().any(|p| matches!(p.segment, RawSegment::Extended(_)));
    if !any_extended {
      // Plain value (possibly split across `name*0`/`name*1` continuations with no encoding).
      let mut value = String::new();
      for segment in &segments {
        if let RawSegment::Plain(v) = &segment.segment {
          value.push_str(v);
        }
      }
      let value = super::super::rfc2047::decode_if_ascii(&value);
      result.push((name, value));
      continue;
    }
    let mut charset = None;
    let mut bytes = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
      let raw = match &segment.segment {
        RawSegment::Extended(v) => v.as_str(),
        RawSegment::Plain(v) => v.as_str(),
      };
      if i == 0 && charset.is_none() {
        if let Some((cs, after_cs)) = raw.split_once('\'') {
          if let Some((_lang, value)) = after_cs.split_once('\'') {
            charset = Some(cs.to_string());
            bytes.extend(percent_decode(value));
            continue;
          }
        }
      }
      bytes.extend(percent_decode(raw));
    }
    let decoded = crate::mime::charset::decode(&bytes, charset.as_deref());
    result.push((name, decoded));
  }
  result
}

/// Parses `type "/" subtype *(";" parameter)`, returning (primary, sub, assembled parameters).
pub fn parse_type_and_params(input: &str) -> Result<(String, String, Vec<(String, String)>), String> {
  let input = input.trim();
  let (primary, rest) = take_token(input).ok_or("missing primary type")?;
  let rest = rest.strip_prefix('/').ok_or("expected '/' between type and subtype")?;
  let (sub, rest) = take_token(rest).ok_or("missing subtype")?;
  let raw = parse_params(rest)?;
  Ok((primary.to_ascii_lowercase(), sub.to_ascii_lowercase(), assemble(raw)))
}

/// Parses `disposition-type *(";" parameter)`.
pub fn parse_disposition_and_params(input: &str) -> Result<(String, Vec<(String, String)>), String> {
  let input = input.trim();
  let (disposition, rest) = take_token(input).ok_or("missing disposition type")?;
  let raw = parse_params(rest)?;
  Ok((disposition.to_ascii_lowercase(), assemble(raw)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn simple_content_type() {
    let (primary, sub, params) = parse_type_and_params("text/plain; charset=utf-8").unwrap();
    assert_eq!("text", primary);
    assert_eq!("plain", sub);
    assert_eq!(vec![("charset".to_string(), "utf-8".to_string())], params);
  }

  #[test]
  fn quoted_boundary() {
    let (_, _, params) = parse_type_and_params(r#"multipart/mixed; boundary="a b\"c""#).unwrap();
    assert_eq!(Some(&"a b\"c".to_string()), params.iter().find(|(k, _)| k == "boundary").map(|(_, v)| v));
  }

  #[test]
  fn rfc2231_continuation() {
    let (_, _, params) = parse_type_and_params("text/plain; name*0*=UTF-8''He%20; name*1*=ll%C3%B6").unwrap();
    assert_eq!(vec![("name".to_string(), "He ll\u{f6}".to_string())], params);
  }

  #[test]
  fn rfc2047_fallback_on_plain_value() {
    let (_, params) = parse_disposition_and_params("attachment; filename==?UTF-8?Q?r=C3=A9sum=C3=A9.pdf?=").unwrap();
    assert_eq!(
      Some(&"r\u{e9}sum\u{e9}.pdf".to_string()),
      params.iter().find(|(k, _)| k == "filename").map(|(_, v)| v)
    );
  }
}
