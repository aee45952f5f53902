//! Job-scoped result store.
//!
//! Each job owns a directory under the results root holding `results.json`
//! (the canonical result location) and, on failure, `error.json`.
//! Every write replaces the whole file through a temp file and rename, so
//! readers never observe a partially written document.

pub mod error;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use store::{ResultHandle, ResultStore, ERROR_FILE, RESULTS_FILE};
