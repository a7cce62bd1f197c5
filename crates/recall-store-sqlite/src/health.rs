//! Health document and schema probe.
//!
//! The health document is a small JSON file shared with external monitors.
//! The store owns only the flush fields; any other keys found in the file are
//! carried through unchanged. Every write goes to a temporary file that is
//! then renamed over the original.

use std::{
  collections::{BTreeMap, HashSet},
  fs,
  io::Write as _,
  path::{Path, PathBuf},
};

use recall_core::health::{RoleCount, SelfCheck};
use serde::{Deserialize, Serialize};

use crate::{
  Result,
  schema::{FTS_TABLE, INDEXES, LOCKS_TABLE, TABLE, TRIGGERS, VIEWS},
};

// ─── Document ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthDocument {
  #[serde(default)]
  pub last_flush_ts:      Option<i64>,
  #[serde(default)]
  pub last_flush_count:   Option<usize>,
  #[serde(default)]
  pub last_flush_ok:      Option<bool>,
  #[serde(default)]
  pub last_flush_skipped: Option<usize>,
  #[serde(flatten)]
  pub other:              serde_json::Map<String, serde_json::Value>,
}

/// Handle on the health document file.
#[derive(Debug, Clone)]
pub(crate) struct HealthLog {
  path: PathBuf,
}

impl HealthLog {
  pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

  /// Current document; absent or unreadable files yield the default.
  pub async fn read(&self) -> Result<HealthDocument> {
    let path = self.path.clone();
    tokio::task::spawn_blocking(move || read_document(&path)).await?
  }

  /// Record the outcome of one flush.
  pub async fn record_flush(&self, ts: i64, count: usize, skipped: usize, ok: bool) -> Result<()> {
    let path = self.path.clone();
    tokio::task::spawn_blocking(move || {
      let mut doc = read_document(&path)?;
      doc.last_flush_ts = Some(ts);
      doc.last_flush_count = Some(count);
      doc.last_flush_skipped = Some(skipped);
      doc.last_flush_ok = Some(ok);
      write_document(&path, &doc)
    })
    .await?
  }
}

fn read_document(path: &Path) -> Result<HealthDocument> {
  match fs::read(path) {
    Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_else(|e| {
      tracing::warn!(path = %path.display(), error = %e, "health document unreadable, starting fresh");
      HealthDocument::default()
    })),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HealthDocument::default()),
    Err(e) => Err(e.into()),
  }
}

fn write_document(path: &Path, doc: &HealthDocument) -> Result<()> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    fs::create_dir_all(parent)?;
  }
  let mut name = path.file_name().unwrap_or_default().to_os_string();
  name.push(".tmp");
  let tmp = path.with_file_name(name);
  {
    let mut file = fs::File::create(&tmp)?;
    serde_json::to_writer_pretty(&mut file, doc)?;
    file.write_all(b"\n")?;
    file.sync_all()?;
  }
  fs::rename(&tmp, path)?;
  Ok(())
}

// ─── Probe ───────────────────────────────────────────────────────────────────

/// Inspect `sqlite_master` and count rows on both sides of the FTS index.
pub(crate) fn probe(conn: &rusqlite::Connection) -> rusqlite::Result<SelfCheck> {
  let mut stmt = conn.prepare(
    "SELECT type, name FROM sqlite_master WHERE type IN ('table', 'index', 'trigger', 'view')",
  )?;
  let present: HashSet<(String, String)> = stmt
    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<_>>()?;
  let has = |kind: &str, name: &str| present.contains(&(kind.to_owned(), name.to_owned()));

  let group = |kind: &str, names: &[&str]| -> BTreeMap<String, bool> {
    names.iter().map(|n| ((*n).to_owned(), has(kind, *n))).collect()
  };

  let table = has("table", TABLE);
  let fts_table = has("table", FTS_TABLE);

  let total_records = if table { count(conn, "SELECT COUNT(*) FROM memory")? } else { 0 };
  let fts_records = if fts_table { count(conn, "SELECT COUNT(*) FROM memory_fts")? } else { 0 };

  Ok(SelfCheck {
    table,
    fts_table,
    locks_table: has("table", LOCKS_TABLE),
    indexes: group("index", &INDEXES),
    triggers: group("trigger", &TRIGGERS),
    views: group("view", &VIEWS),
    total_records,
    fts_records,
    fts_coherent: table && fts_table && total_records == fts_records,
    error: None,
  })
}

fn count(conn: &rusqlite::Connection, sql: &str) -> rusqlite::Result<i64> {
  conn.query_row(sql, [], |row| row.get(0))
}

/// Counters that feed [`recall_core::health::Stats`].
pub(crate) struct StoreCounts {
  pub total_records:  i64,
  pub fts_records:    i64,
  pub recent_records: i64,
  pub active_locks:   i64,
  pub role_counts:    Vec<RoleCount>,
}

pub(crate) fn store_counts(conn: &rusqlite::Connection, since: i64) -> rusqlite::Result<StoreCounts> {
  let recent_records = conn.query_row(
    "SELECT COUNT(*) FROM memory_compat WHERE ts >= ?1",
    rusqlite::params![since],
    |row| row.get(0),
  )?;

  let mut stmt = conn.prepare(
    "SELECT role, COUNT(*) AS n FROM memory_roles GROUP BY role ORDER BY n DESC, role ASC",
  )?;
  let role_counts = stmt
    .query_map([], |row| Ok(RoleCount { role: row.get(0)?, count: row.get(1)? }))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(StoreCounts {
    total_records: count(conn, "SELECT COUNT(*) FROM memory_compat")?,
    fts_records: count(conn, "SELECT COUNT(*) FROM memory_fts")?,
    recent_records,
    active_locks: count(conn, "SELECT COUNT(*) FROM locks")?,
    role_counts,
  })
}
