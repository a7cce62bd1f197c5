//! Append buffer for the Recall memory store.
//!
//! Producers append one JSON record per line; the flusher later snapshots a
//! prefix of the buffer, commits it to the store and drops it. The buffer is
//! never locked by writers. File I/O runs on tokio's blocking pool.

mod journal;

pub mod error;

pub use error::{Error, Result};
pub use journal::{Journal, Snapshot};

#[cfg(test)]
mod tests;
