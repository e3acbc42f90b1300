use crate::error::{Error, Result};
use crate::mime::decode::{Base64Decoder, QuotedPrintableDecoder};
use crate::mime::handler::{EntityHandler, TransferEncoding};
use crate::mime::header;
use crate::mime::headers::{self, ContentDisposition, ContentType, HeaderRegistry, MessageId};
use crate::mime::Locator;

const MAX_BOUNDARY_LEN: usize = 70;

#[derive(Debug)]
enum State {
  Init,
  Header,
  /// Covers the three boundary-scanning states from the component design (FIRST_BOUNDARY,
  /// BOUNDARY_ONLY, BOUNDARY_OR_CONTENT): they differ only in whether a leaf entity is currently
  /// open and so a non-matching line is body content (`leaf_open == true`) versus
  /// preamble/epilogue (`leaf_open == false`).
  AtBoundary { leaf_open: bool },
  /// The outermost entity is not a multipart: the rest of the stream, with no boundary checking
  /// at all, is its body.
  Body,
}

struct BoundaryFrame {
  boundary: String,
  /// The tag `start_entity` used to open the multipart entity that owns this boundary; its
  /// terminating `--boundary--` line closes that entity with the same tag.
  opener_tag: Option<String>,
}

enum Decoder {
  Passthrough,
  Base64(Base64Decoder),
  QuotedPrintable(QuotedPrintableDecoder),
}

impl Decoder {
  fn for_encoding(encoding: TransferEncoding) -> Self {
    match encoding {
      TransferEncoding::Base64 => Self::Base64(Base64Decoder::new()),
      TransferEncoding::QuotedPrintable => Self::QuotedPrintable(QuotedPrintableDecoder::new()),
      TransferEncoding::SevenBit | TransferEncoding::EightBit | TransferEncoding::Binary => Self::Passthrough,
    }
  }

  fn decode(&mut self, input: &[u8], output: &mut [u8], end_of_stream: bool) -> (usize, usize) {
    match self {
      Self::Passthrough => {
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        (n, n)
      }
      Self::Base64(d) => d.decode(input, output, end_of_stream),
      Self::QuotedPrintable(d) => d.decode(input, output, end_of_stream),
    }
  }
}

enum BoundaryMatch {
  None,
  NonTerminating,
  Terminating,
}

fn match_boundary(content: &[u8], boundary: &str) -> BoundaryMatch {
  let boundary = boundary.as_bytes();
  if content.len() < boundary.len() + 2 || &content[..2] != b"--" || &content[2..2 + boundary.len()] != boundary {
    return BoundaryMatch::None;
  }
  match &content[2 + boundary.len()..] {
    b"" => BoundaryMatch::NonTerminating,
    b"--" => BoundaryMatch::Terminating,
    _ => BoundaryMatch::None,
  }
}

fn valid_boundary(boundary: &str) -> bool {
  !boundary.is_empty() && boundary.len() <= MAX_BOUNDARY_LEN && boundary.is_ascii()
}

/// Finds the next line terminator in `buf`. Returns `(content_end, terminator_len)`: bytes before
/// `content_end` are the line itself, the following `terminator_len` bytes are the line ending.
/// With `allow_bare_cr`, a lone CR not immediately followed by LF also terminates a line, for
/// interoperating with old Mac-style line endings some malformed messages still carry.
fn find_line_end(buf: &[u8], allow_bare_cr: bool) -> Option<(usize, usize)> {
  let lf = memchr::memchr(b'\n', buf);
  if allow_bare_cr {
    if let Some(cr) = memchr::memchr(b'\r', buf) {
      let followed_by_lf = buf.get(cr + 1) == Some(&b'\n');
      if !followed_by_lf && lf.map_or(true, |l| cr < l) {
        return Some((cr, 1));
      }
    }
  }
  lf.map(|pos| {
    if pos > 0 && buf[pos - 1] == b'\r' {
      (pos - 1, 2)
    } else {
      (pos, 1)
    }
  })
}

/// Incremental, push-based MIME entity parser (RFC 2045-2049). Bytes are handed in via
/// [`MimeParser::push`] in arbitrarily-sized chunks; the parser never buffers an entire entity,
/// only the unterminated tail of the current line and, inside a multipart, the one line of lookback
/// needed to strip the CRLF that precedes a boundary delimiter.
pub struct MimeParser<H: EntityHandler> {
  handler: H,
  state: State,
  locator: Locator,
  started: bool,
  finished: bool,
  allow_cr_line_end: bool,
  carry: Vec<u8>,
  header_name: Option<String>,
  header_value: Vec<u8>,
  boundary_stack: Vec<BoundaryFrame>,
  current_open_tag: Option<String>,
  pending_line: Option<Vec<u8>>,
  transfer_encoding: TransferEncoding,
  decoder: Decoder,
  decode_carry: Vec<u8>,
  pending_content_type: Option<ContentType>,
  extensions: HeaderRegistry,
}

impl<H: EntityHandler> MimeParser<H> {
  pub fn new(handler: H) -> Self {
    Self::with_registry(handler, HeaderRegistry::new())
  }

  pub fn with_registry(handler: H, extensions: HeaderRegistry) -> Self {
    Self {
      handler,
      state: State::Init,
      locator: Locator::new(),
      started: false,
      finished: false,
      allow_cr_line_end: false,
      carry: Vec::new(),
      header_name: None,
      header_value: Vec::new(),
      boundary_stack: Vec::new(),
      current_open_tag: None,
      pending_line: None,
      transfer_encoding: TransferEncoding::default(),
      decoder: Decoder::Passthrough,
      decode_carry: Vec::new(),
      pending_content_type: None,
      extensions,
    }
  }

  /// Tolerate a lone CR as a line terminator, in addition to LF and CRLF.
  pub fn allow_cr_line_end(&mut self, allow: bool) {
    self.allow_cr_line_end = allow;
  }

  pub fn handler(&self) -> &H {
    &self.handler
  }

  pub fn handler_mut(&mut self) -> &mut H {
    &mut self.handler
  }

  pub fn into_handler(self) -> H {
    self.handler
  }

  /// Resets the parser to its initial state so the same instance (and its handler) can be reused
  /// for another entity stream.
  pub fn reset(&mut self) {
    self.state = State::Init;
    self.locator = Locator::new();
    self.started = false;
    self.finished = false;
    self.carry.clear();
    self.header_name = None;
    self.header_value.clear();
    self.boundary_stack.clear();
    self.current_open_tag = None;
    self.pending_line = None;
    self.transfer_encoding = TransferEncoding::default();
    self.decoder = Decoder::Passthrough;
    self.decode_carry.clear();
    self.pending_content_type = None;
  }

  pub fn push(&mut self, input: &[u8]) -> Result<()> {
    if self.finished {
      return Err(Error::IllegalState("push called after close".to_string()));
    }
    self.handler.set_locator(self.locator);
    if !self.started {
      self.started = true;
      self.handler.start_entity(None)?;
      self.state = State::Header;
    }
    self.carry.extend_from_slice(input);
    self.drain_lines()
  }

  pub fn close(&mut self) -> Result<()> {
    if self.finished {
      return Err(Error::IllegalState("close called twice".to_string()));
    }
    self.handler.set_locator(self.locator);
    self.drain_lines()?;

    // A partial line with no terminator is only legal at the very end of a BODY-state entity
    // (a message simply not ending in a newline); anywhere else it means the stream was cut off
    // mid-header or mid-boundary-line.
    if !self.carry.is_empty() && !matches!(self.state, State::Body) {
      self.finished = true;
      return Err(Error::Parse {
        message: "unterminated line at end of input".to_string(),
        locator: self.locator,
      });
    }

    match std::mem::replace(&mut self.state, State::Body) {
      State::Init => {}
      State::Header => {
        self.finalize_pending_header()?;
        self.handler.end_headers()?;
        self.close_leaf_or_container()?;
      }
      State::AtBoundary { leaf_open } => {
        if let Some(line) = self.pending_line.take() {
          self.emit_body_or_unexpected(leaf_open, &line, true)?;
        } else if leaf_open {
          self.flush_decoder(true)?;
        }
        if leaf_open {
          let tag = self.current_open_tag.take();
          self.handler.end_entity(tag.as_deref())?;
        }
      }
      State::Body => {
        if !self.carry.is_empty() {
          let remainder = std::mem::take(&mut self.carry);
          self.feed_leaf_body(&remainder, false)?;
        }
        self.flush_decoder(true)?;
        self.handler.end_entity(None)?;
      }
    };

    self.finished = true;

    if self.boundary_stack.is_empty() {
      Ok(())
    } else {
      let depth = self.boundary_stack.len();
      self.boundary_stack.clear();
      Err(Error::Parse {
        message: format!("unclosed multipart boundary ({depth} level(s) still open)"),
        locator: self.locator,
      })
    }
  }

  fn close_leaf_or_container(&mut self) -> Result<()> {
    // Headers just ended with nothing after them (EOF mid-entity): treat as a leaf with an empty
    // body rather than leaving it unterminated.
    let tag = self.current_open_tag.take();
    self.handler.end_entity(tag.as_deref())
  }

  fn drain_lines(&mut self) -> Result<()> {
    loop {
      let terminator_allowed = self.allow_cr_line_end;
      let Some((content_end, terminator_len)) = find_line_end(&self.carry, terminator_allowed) else {
        break;
      };
      let line: Vec<u8> = self.carry[..content_end].to_vec();
      let full: Vec<u8> = self.carry[..content_end + terminator_len].to_vec();
      self.locator.advance_by(&full);
      self.carry.drain(..content_end + terminator_len);
      self.handle_line(&line, &full[content_end..])?;
    }
    Ok(())
  }

  fn handle_line(&mut self, content: &[u8], terminator: &[u8]) -> Result<()> {
    match &self.state {
      State::Init => unreachable!("push() transitions out of Init before draining lines"),
      State::Header => self.handle_header_line(content),
      State::AtBoundary { leaf_open } => {
        let leaf_open = *leaf_open;
        self.handle_boundary_region_line(leaf_open, content, terminator)
      }
      State::Body => {
        let mut line = content.to_vec();
        line.extend_from_slice(terminator);
        self.feed_leaf_body(&line, false)
      }
    }
  }

  fn handle_header_line(&mut self, line: &[u8]) -> Result<()> {
    if line.is_empty() {
      self.finalize_pending_header()?;
      self.handler.end_headers()?;
      self.enter_post_header_state();
      return Ok(());
    }
    if header::is_continuation(line) {
      if self.header_name.is_none() {
        return Err(Error::Parse {
          message: "continuation line with no preceding header".to_string(),
          locator: self.locator,
        });
      }
      self.header_value.extend_from_slice(line);
      return Ok(());
    }
    self.finalize_pending_header()?;
    let (name, value) =
      header::split_header_line(line).map_err(|message| Error::Parse { message, locator: self.locator })?;
    self.header_name = Some(name);
    self.header_value = value;
    Ok(())
  }

  fn finalize_pending_header(&mut self) -> Result<()> {
    let Some(name) = self.header_name.take() else {
      return Ok(());
    };
    let raw = std::mem::take(&mut self.header_value);
    let value = crate::mime::charset::decode(&raw, None);
    self.dispatch_header(&name, &value);
    Ok(())
  }

  fn dispatch_header(&mut self, name: &str, value: &str) {
    match name.to_ascii_lowercase().as_str() {
      "content-type" => match ContentType::parse(value) {
        Ok(ct) => {
          self.handler.content_type(&ct);
          self.pending_content_type = Some(ct);
        }
        Err(message) => self.handler.handler_error(name, &message),
      },
      "content-disposition" => match ContentDisposition::parse(value) {
        Ok(cd) => self.handler.content_disposition(&cd),
        Err(message) => self.handler.handler_error(name, &message),
      },
      "content-transfer-encoding" => {
        let encoding = TransferEncoding::from_token(value);
        self.transfer_encoding = encoding;
        self.handler.content_transfer_encoding(encoding, value.trim());
      }
      "content-id" => match MessageId::parse(value.trim()) {
        Ok(id) => self.handler.content_id(&id),
        Err(message) => self.handler.handler_error(name, &message),
      },
      "content-description" => self.handler.content_description(value.trim()),
      "mime-version" => match headers::parse_mime_version(value) {
        Ok((major, minor)) => self.handler.mime_version(major, minor),
        Err(message) => self.handler.handler_error(name, &message),
      },
      other => {
        if let Some(handler) = self.extensions.get(other) {
          let reduced = handler(value);
          self.handler.extension_header(name, &reduced);
        }
      }
    }
  }

  fn enter_post_header_state(&mut self) {
    self.decode_carry.clear();
    let content_type = self.pending_content_type.take();
    let boundary = content_type
      .as_ref()
      .filter(|ct| ct.is_multipart())
      .and_then(|ct| ct.boundary())
      .filter(|b| valid_boundary(b));

    if let Some(boundary) = boundary {
      self.boundary_stack.push(BoundaryFrame {
        boundary: boundary.to_string(),
        opener_tag: self.current_open_tag.clone(),
      });
      self.state = State::AtBoundary { leaf_open: false };
    } else if !self.boundary_stack.is_empty() {
      self.decoder = Decoder::for_encoding(self.transfer_encoding);
      self.state = State::AtBoundary { leaf_open: true };
    } else {
      self.decoder = Decoder::for_encoding(self.transfer_encoding);
      self.state = State::Body;
    }
  }

  fn handle_boundary_region_line(&mut self, leaf_open: bool, content: &[u8], terminator: &[u8]) -> Result<()> {
    let innermost = self.boundary_stack.last().map(|f| f.boundary.clone());
    let boundary_match = innermost
      .as_deref()
      .map(|b| match_boundary(content, b))
      .unwrap_or(BoundaryMatch::None);

    match boundary_match {
      BoundaryMatch::None => {
        if let Some(previous) = self.pending_line.take() {
          self.emit_body_or_unexpected(leaf_open, &previous, false)?;
        }
        let mut line = content.to_vec();
        line.extend_from_slice(terminator);
        self.pending_line = Some(line);
        Ok(())
      }
      BoundaryMatch::NonTerminating => {
        if let Some(previous) = self.pending_line.take() {
          self.emit_body_or_unexpected(leaf_open, &previous, true)?;
        }
        let matched_boundary = innermost.expect("boundary matched with no frame");
        if leaf_open {
          self.flush_decoder(true)?;
          let old_tag = self.current_open_tag.take();
          self.handler.end_entity(old_tag.as_deref())?;
        }
        self.current_open_tag = Some(matched_boundary.clone());
        self.handler.start_entity(Some(&matched_boundary))?;
        self.state = State::Header;
        Ok(())
      }
      BoundaryMatch::Terminating => {
        if let Some(previous) = self.pending_line.take() {
          self.emit_body_or_unexpected(leaf_open, &previous, true)?;
        }
        if leaf_open {
          self.flush_decoder(true)?;
          let old_tag = self.current_open_tag.take();
          self.handler.end_entity(old_tag.as_deref())?;
        }
        let frame = self.boundary_stack.pop().expect("boundary matched with no frame");
        self.handler.end_entity(frame.opener_tag.as_deref())?;
        self.state = State::AtBoundary { leaf_open: false };
        Ok(())
      }
    }
  }

  /// Flushes a buffered line once we know whether it was immediately followed by a boundary
  /// delimiter (`is_before_boundary`), in which case its trailing terminator is not part of the
  /// body and is dropped.
  fn emit_body_or_unexpected(&mut self, leaf_open: bool, line: &[u8], is_before_boundary: bool) -> Result<()> {
    let content = if is_before_boundary {
      strip_known_terminator(line)
    } else {
      line
    };
    if content.is_empty() && is_before_boundary {
      return Ok(());
    }
    if leaf_open {
      self.feed_leaf_body(content, false)
    } else {
      self.handler.unexpected_content(content);
      Ok(())
    }
  }

  fn feed_leaf_body(&mut self, bytes: &[u8], end_of_stream: bool) -> Result<()> {
    self.decode_carry.extend_from_slice(bytes);
    let mut buf = [0u8; 4096];
    loop {
      if self.decode_carry.is_empty() {
        break;
      }
      let (consumed, written) = self.decoder.decode(&self.decode_carry, &mut buf, end_of_stream);
      if written > 0 {
        self.handler.body_content(&buf[..written])?;
      }
      if consumed == 0 {
        break;
      }
      self.decode_carry.drain(..consumed);
    }
    Ok(())
  }

  fn flush_decoder(&mut self, end_of_stream: bool) -> Result<()> {
    self.feed_leaf_body(&[], end_of_stream)?;
    self.decode_carry.clear();
    Ok(())
  }
}

fn strip_known_terminator(line: &[u8]) -> &[u8] {
  if let Some(stripped) = line.strip_suffix(b"\r\n") {
    stripped
  } else if let Some(stripped) = line.strip_suffix(b"\n") {
    stripped
  } else if let Some(stripped) = line.strip_suffix(b"\r") {
    stripped
  } else {
    line
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Arc, Mutex};
  use test_log::test;

  #[derive(Default, Clone)]
  struct Recorder(Arc<Mutex<Vec<String>>>);

  impl Recorder {
    fn events(&self) -> Vec<String> {
      self.0.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
      self.0.lock().unwrap().push(event);
    }
  }

  struct RecordingHandler(Recorder);

  impl EntityHandler for RecordingHandler {
    fn start_entity(&mut self, boundary: Option<&str>) -> Result<()> {
      self.0.push(format!("start({boundary:?})"));
      Ok(())
    }

    fn content_type(&mut self, content_type: &ContentType) {
      self.0.push(format!("content_type({})", content_type.full_type()));
    }

    fn end_headers(&mut self) -> Result<()> {
      self.0.push("end_headers".to_string());
      Ok(())
    }

    fn body_content(&mut self, content: &[u8]) -> Result<()> {
      self.0.push(format!("body({:?})", String::from_utf8_lossy(content)));
      Ok(())
    }

    fn unexpected_content(&mut self, content: &[u8]) {
      self.0.push(format!("unexpected({:?})", String::from_utf8_lossy(content)));
    }

    fn end_entity(&mut self, boundary: Option<&str>) -> Result<()> {
      self.0.push(format!("end({boundary:?})"));
      Ok(())
    }
  }

  struct CancelingHandler {
    cancel_after: usize,
    seen: usize,
  }

  impl EntityHandler for CancelingHandler {
    fn start_entity(&mut self, _boundary: Option<&str>) -> Result<()> {
      Ok(())
    }

    fn body_content(&mut self, _content: &[u8]) -> Result<()> {
      self.seen += 1;
      if self.seen > self.cancel_after {
        return Err(Error::Handler("handler gave up after enough body chunks".to_string()));
      }
      Ok(())
    }

    fn end_entity(&mut self, _boundary: Option<&str>) -> Result<()> {
      Ok(())
    }
  }

  fn run(message: &[u8]) -> Vec<String> {
    let recorder = Recorder::default();
    let mut parser = MimeParser::new(RecordingHandler(recorder.clone()));
    parser.push(message).unwrap();
    parser.close().unwrap();
    recorder.events()
  }

  #[test]
  fn simple_non_multipart_message() {
    let events = run(b"Content-Type: text/plain\r\n\r\nhello\r\nworld\r\n");
    assert_eq!(
      vec![
        "start(None)",
        "content_type(text/plain)",
        "end_headers",
        "body(\"hello\\r\\n\")",
        "body(\"world\\r\\n\")",
        "end(None)",
      ],
      events
    );
  }

  #[test]
  fn nested_multipart_pairs_every_start_with_an_end() {
    let message = concat!(
      "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
      "\r\n",
      "--outer\r\n",
      "Content-Type: multipart/alternative; boundary=\"inner\"\r\n",
      "\r\n",
      "--inner\r\n",
      "Content-Type: text/plain\r\n",
      "\r\n",
      "hello\r\n",
      "--inner--\r\n",
      "--outer--\r\n",
    );
    let events = run(message.as_bytes());
    assert_eq!(
      vec![
        "start(None)",
        "content_type(multipart/mixed)",
        "end_headers",
        "start(Some(\"outer\"))",
        "content_type(multipart/alternative)",
        "end_headers",
        "start(Some(\"inner\"))",
        "content_type(text/plain)",
        "end_headers",
        "body(\"hello\")",
        "end(Some(\"inner\"))",
        "end(Some(\"outer\"))",
        "end(None)",
      ],
      events
    );

    let starts = events.iter().filter(|e| e.starts_with("start")).count();
    let ends = events.iter().filter(|e| e.starts_with("end(")).count();
    assert_eq!(starts, ends);
  }

  #[test]
  fn preamble_and_epilogue_are_unexpected_content() {
    let message = concat!(
      "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
      "\r\n",
      "this is preamble\r\n",
      "--b\r\n",
      "\r\n",
      "body\r\n",
      "--b--\r\n",
      "this is epilogue\r\n",
    );
    let events = run(message.as_bytes());
    assert!(events.contains(&"unexpected(\"this is preamble\")".to_string()));
    assert!(events.contains(&"unexpected(\"this is epilogue\")".to_string()));
  }

  #[test]
  fn resumable_across_pushes_matches_one_shot() {
    let message = b"Content-Type: text/plain\r\n\r\nhello world\r\n";
    let one_shot = run(message);

    let recorder = Recorder::default();
    let mut parser = MimeParser::new(RecordingHandler(recorder.clone()));
    for byte in message {
      parser.push(&[*byte]).unwrap();
    }
    parser.close().unwrap();
    assert_eq!(one_shot.join(""), recorder.events().join(""));
  }

  #[test]
  fn handler_can_cancel_parsing_via_body_content() {
    let mut parser = MimeParser::new(CancelingHandler { cancel_after: 0, seen: 0 });
    let err = parser.push(b"Content-Type: text/plain\r\n\r\nhello\r\nworld\r\n").unwrap_err();
    assert!(matches!(err, Error::Handler(_)));
  }
}
