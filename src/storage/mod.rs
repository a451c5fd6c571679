//! Storage layer for Coffer
//!
//! Provides atomic file writes, the working data store primitives and the
//! single-instance operation lock.

pub mod file_io;
pub mod lock;
pub mod store;

pub use file_io::{read_json_required, write_bytes_atomic, write_json_atomic};
pub use lock::OperationLock;
pub use store::{DataStore, FileStore};
