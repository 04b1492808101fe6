//! PDF writing.
//!
//! Only incremental updates are produced: the original bytes are kept as
//! they are and new object revisions are appended after them.

pub mod incremental;
pub mod object_serializer;

pub use incremental::{embed_signature, write_update, IncrementalPdfWriter, PreparedUpdate};
pub use object_serializer::ObjectSerializer;
