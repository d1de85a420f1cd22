#![warn(missing_docs)]

//! AlbumFlow metadata subsystem: object metadata table and its change log

pub mod changelog;
pub mod kvstore;
pub mod table;
pub mod types;

pub use changelog::{ChangeKind, ChangeLog, ChangeRecord};
pub use kvstore::{KvStore, MemoryKvStore};
pub use table::{MetadataStore, RecordTable};
pub use types::{MetaError, MetadataRecord, RecordField};
