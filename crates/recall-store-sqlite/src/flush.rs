//! Flush protocol: buffer → store, under the `flush` advisory lock.
//!
//! 1. Snapshot at most `max_lines` non-empty lines from the buffer head.
//! 2. Parse and validate each line; unusable lines are skipped and counted.
//! 3. Insert the survivors in one transaction, retrying while SQLite is busy.
//! 4. Only after the commit, drop the consumed prefix from the buffer.
//! 5. Record the outcome in the health document.
//!
//! A crash between 3 and 4 leaves the committed lines in the buffer, so the
//! next flush inserts them again.
//!
//! The lease is checked inside the insert transaction. A flush that outlived
//! its TTL and lost the lease to another flusher commits nothing and fails
//! with [`Error::LockLost`](crate::Error::LockLost).

use std::time::Duration;

use chrono::Utc;
use recall_core::record::BufferLine;
use rusqlite::TransactionBehavior;
use serde::Serialize;

use crate::{Result, encode::InsertRow, lock::AdvisoryLock, store::SqliteStore};

const INSERT_RETRY_BASE: Duration = Duration::from_millis(200);
const INSERT_MAX_ATTEMPTS: u32 = 5;

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
  /// Records committed to the store.
  pub committed: usize,
  /// Lines dropped because they were malformed or failed validation.
  pub skipped:   usize,
}

impl SqliteStore {
  /// Flush up to `max_lines` buffered lines and report what happened.
  pub async fn flush_report(&self, max_lines: usize) -> Result<FlushReport> {
    let config = self.config();
    let lock = AdvisoryLock::new(
      self.connection().clone(),
      config.lock_name("flush"),
      config.lock_ttl(),
    );
    lock.scope(|| self.flush_locked(&lock, max_lines)).await
  }

  pub(crate) async fn flush_locked(&self, lock: &AdvisoryLock, max_lines: usize) -> Result<FlushReport> {
    let snapshot = self.journal().snapshot(max_lines).await?;
    if snapshot.is_empty() {
      return Ok(FlushReport::default());
    }

    let now = Utc::now().timestamp();
    let (rows, skipped) = prepare_rows(&snapshot.lines, now);

    let committed = match self.insert_with_retry(lock, rows).await {
      Ok(n) => n,
      Err(e) => {
        if let Err(log_err) = self.health_log().record_flush(now, 0, skipped, false).await {
          tracing::warn!(error = %log_err, "failed to record flush failure");
        }
        return Err(e);
      }
    };

    self.journal().drop_consumed(snapshot.consumed).await?;
    self.health_log().record_flush(now, committed, skipped, true).await?;

    tracing::info!(committed, skipped, "flushed buffer");
    Ok(FlushReport { committed, skipped })
  }

  async fn insert_with_retry(&self, lock: &AdvisoryLock, rows: Vec<InsertRow>) -> Result<usize> {
    if rows.is_empty() {
      return Ok(0);
    }
    let mut delay = INSERT_RETRY_BASE;
    let mut attempt = 1;
    loop {
      let batch = rows.clone();
      let lease = lock.clone();
      let result = self
        .connection()
        .call(move |conn| Ok(insert_rows(conn, &lease, &batch)?))
        .await
        .map_err(crate::Error::from)
        .and_then(|inserted| {
          inserted.ok_or_else(|| crate::Error::LockLost { name: lock.name().to_owned() })
        });

      match result {
        Err(e) if e.is_busy() && attempt < INSERT_MAX_ATTEMPTS => {
          tracing::warn!(attempt, error = %e, "store busy, retrying flush insert");
          tokio::time::sleep(delay).await;
          delay *= 2;
          attempt += 1;
        }
        other => return other,
      }
    }
  }
}

/// Parse, default, validate and encode buffer lines in file order.
/// Returns the rows to insert and the number of lines skipped.
fn prepare_rows(lines: &[String], now: i64) -> (Vec<InsertRow>, usize) {
  let mut rows = Vec::with_capacity(lines.len());
  let mut skipped = 0;

  for (index, line) in lines.iter().enumerate() {
    let encoded = BufferLine::parse(line)
      .map(|parsed| parsed.into_new_record(now))
      .and_then(|record| record.validate().map(|()| record))
      .map_err(crate::Error::from)
      .and_then(|record| InsertRow::encode(&record, now));

    match encoded {
      Ok(row) => rows.push(row),
      Err(e) => {
        tracing::warn!(line = index + 1, error = %e, "skipping unusable buffer line");
        skipped += 1;
      }
    }
  }
  (rows, skipped)
}

/// Insert `rows` in one transaction. Returns `None`, committing nothing, when
/// `lease` is no longer held.
fn insert_rows(
  conn: &mut rusqlite::Connection,
  lease: &AdvisoryLock,
  rows: &[InsertRow],
) -> rusqlite::Result<Option<usize>> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  if !lease.still_held(&tx)? {
    return Ok(None);
  }
  {
    let mut stmt = tx.prepare_cached(
      "INSERT INTO memory (ts, role, insight, raw, tags) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for row in rows {
      stmt.execute(rusqlite::params![row.ts, row.role, row.insight, row.raw, row.tags])?;
    }
  }
  tx.commit()?;
  Ok(Some(rows.len()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prepare_rows_skips_malformed_and_invalid_lines() {
    let lines = vec![
      r#"{"role":"user","insight":"ok","ts":5}"#.to_owned(),
      "{broken".to_owned(),
      r#"{"role":"user"}"#.to_owned(),
      r#"{"insight":"defaults","raw":"src","tags":["a"]}"#.to_owned(),
    ];
    let (rows, skipped) = prepare_rows(&lines, 100);
    assert_eq!(skipped, 2);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].ts, 5);
    assert_eq!(rows[1].role, "system");
    assert_eq!(rows[1].ts, 100);
    assert_eq!(rows[1].raw, r#""src""#);
    assert_eq!(rows[1].tags, r#"["a"]"#);
  }
}
