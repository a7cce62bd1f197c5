//! Statistics and self-check reports exposed to external monitors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Number of records held by one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCount {
  pub role:  String,
  pub count: i64,
}

/// Point-in-time statistics over the store and its buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
  pub total_records:  i64,
  pub fts_records:    i64,
  /// Records with `ts` inside the recency window.
  pub recent_records: i64,
  pub active_locks:   i64,
  /// Ordered by count, largest first.
  pub role_counts:    Vec<RoleCount>,
  pub last_flush_ts:  Option<i64>,
  pub last_flush_ok:  Option<bool>,
  pub last_append_ts: Option<i64>,
}

/// Presence of every schema object the store relies on.
///
/// Produced by a probe that never fails: a probe error is captured in
/// [`SelfCheck::error`] and every object is then reported absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfCheck {
  pub table:         bool,
  pub fts_table:     bool,
  pub locks_table:   bool,
  pub indexes:       BTreeMap<String, bool>,
  pub triggers:      BTreeMap<String, bool>,
  pub views:         BTreeMap<String, bool>,
  pub total_records: i64,
  pub fts_records:   i64,
  pub fts_coherent:  bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error:         Option<String>,
}

impl SelfCheck {
  /// A report for a probe that could not run at all.
  pub fn failed(error: impl Into<String>) -> Self {
    Self { error: Some(error.into()), ..Self::default() }
  }

  /// Names of every required object that is absent.
  pub fn missing(&self) -> Vec<String> {
    let mut missing = Vec::new();
    for (present, name) in [
      (self.table, "memory"),
      (self.fts_table, "memory_fts"),
      (self.locks_table, "locks"),
    ] {
      if !present {
        missing.push(name.to_owned());
      }
    }
    for group in [&self.indexes, &self.triggers, &self.views] {
      missing.extend(group.iter().filter(|(_, ok)| !**ok).map(|(n, _)| n.clone()));
    }
    missing
  }

  /// No missing objects, a coherent FTS index and no probe error.
  pub fn healthy(&self) -> bool {
    self.error.is_none() && self.fts_coherent && self.missing().is_empty()
  }
}
