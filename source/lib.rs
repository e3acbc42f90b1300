// https://www.rfc-editor.org/rfc/rfc4155 - the mbox message format
// https://www.rfc-editor.org/rfc/rfc2045 - MIME Part One: Format of Internet Message Bodies
// https://www.rfc-editor.org/rfc/rfc2046 - MIME Part Two: Media Types
// https://www.rfc-editor.org/rfc/rfc2047 - MIME Part Three: Message Header Extensions for Non-ASCII Text
// https://www.rfc-editor.org/rfc/rfc2231 - MIME Parameter Value and Encoded Word Extensions
// https://www.rfc-editor.org/rfc/rfc3501 - IMAP4rev1, source of the folder-tree and search semantics

#![allow(clippy::upper_case_acronyms)]

pub mod error;
pub mod flags;
pub mod index;
pub mod mbox;
pub mod mime;
pub mod store;

pub use error::{Error, Result};
pub use flags::Flags;
pub use mbox::Mailbox;
pub use store::Store;
