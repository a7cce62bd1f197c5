//! SQLite backend for the Recall memory store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Records reach the store only through
//! the flusher; reads go through the compatibility views.

mod encode;
mod flush;
mod health;
mod lock;
mod schema;
mod search;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use flush::FlushReport;
pub use health::HealthDocument;
pub use lock::AdvisoryLock;
pub use store::SqliteStore;
