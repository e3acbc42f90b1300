use crate::mime::Locator;
use std::io;

/// The discriminated error contract consumed by session protocols (POP3/IMAP/SMTP), per the
/// core's external-interface boundary: everything here is a value, never an exception.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("already exists: {0}")]
  AlreadyExists(String),

  #[error("mailbox is not empty: {0}")]
  NotEmpty(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("mailbox is read-only")]
  ReadOnly,

  #[error("illegal state: {0}")]
  IllegalState(String),

  #[error("corrupt index ({reason})")]
  CorruptIndex { reason: &'static str },

  #[error("io error: {0}")]
  Io(#[from] io::Error),

  #[error("parse error at {locator}: {message}")]
  Parse { message: String, locator: Locator },

  #[error("handler error: {0}")]
  Handler(String),
}

pub type Result<T> = std::result::Result<T, Error>;
