//! mbox storage engine (RFC 4155): `From `-line framing, the linear-scan indexer that finds
//! message boundaries, and the [`Mailbox`] type that ties both to a `.gidx` search index.

pub mod escape;
pub mod indexer;
mod lock;
pub mod mailbox;

pub use indexer::MessageDescriptor;
pub use mailbox::{AppendHandle, Mailbox};
