//! Persistence of logical upload records.

mod filter;
mod store;

pub use filter::FileFilter;
pub use store::{BlobSource, DeletedRecord, FileRecordStore, NewFileRecord};
