//! The `MemoryStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `recall-store-sqlite`).
//! The CLI and any embedding agent depend on this abstraction, not on a
//! concrete backend.

use std::future::Future;

use crate::{
  health::{SelfCheck, Stats},
  record::MemoryHit,
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Per-call overrides for [`MemoryStore::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
  /// Maximum rows; defaults to the configured FTS limit.
  pub limit:     Option<usize>,
  /// Recency window for the keyword path; defaults to the configured days.
  pub days:      Option<u32>,
  /// Consult and populate the query cache.
  pub use_cache: bool,
}

impl Default for SearchOptions {
  fn default() -> Self { Self { limit: None, days: None, use_cache: true } }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a memory store backend.
///
/// Records are append-only: they enter through the buffer, are moved into the
/// store by [`flush`](MemoryStore::flush) and are never mutated afterwards.
pub trait MemoryStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Move up to `max_lines` buffered lines into the store and return how many
  /// records were committed. An empty or absent buffer yields `0`.
  fn flush(&self, max_lines: usize) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Keyword or phrase search with an optional `role:` / `from:` filter.
  fn search<'a>(
    &'a self,
    query: &'a str,
    options: SearchOptions,
  ) -> impl Future<Output = Result<Vec<MemoryHit>, Self::Error>> + Send + 'a;

  /// Most recent records, newest first.
  fn recent(&self, limit: usize) -> impl Future<Output = Result<Vec<MemoryHit>, Self::Error>> + Send + '_;

  /// Most recent records of one role, newest first.
  fn by_role<'a>(
    &'a self,
    role: &'a str,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<MemoryHit>, Self::Error>> + Send + 'a;

  // ── Maintenance ───────────────────────────────────────────────────────

  fn stats(&self) -> impl Future<Output = Result<Stats, Self::Error>> + Send + '_;

  /// Probe the schema. Never fails; problems are reported in the result.
  fn selfcheck(&self) -> impl Future<Output = SelfCheck> + Send + '_;

  /// Drop every cached search result.
  fn clear_query_cache(&self);
}
