//! Resumable transfer-encoding codecs (RFC 2045 §6). Both decoders are pure state machines: they
//! never allocate their own buffers and never block, they only shuffle between a caller-supplied
//! input slice and a caller-supplied output slice.

pub mod base64;
pub mod quoted_printable;

pub use base64::Base64Decoder;
pub use quoted_printable::QuotedPrintableDecoder;
