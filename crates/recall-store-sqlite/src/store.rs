//! [`SqliteStore`] — the [`MemoryStore`] implementation over SQLite.

use std::{fs, sync::Arc, time::Duration};

use chrono::Utc;
use recall_core::{
  config::MemoryConfig,
  health::{SelfCheck, Stats},
  record::{MemoryHit, NewRecord},
  store::{MemoryStore, SearchOptions},
};
use recall_journal::Journal;
use rusqlite::OptionalExtension;

use crate::{
  Error, Result,
  encode::{PUBLIC_COLUMNS, RawRecord},
  health::{HealthLog, probe, store_counts},
  schema::{BUSY_TIMEOUT_MS, MMAP_SIZE, PRAGMAS, REBUILD_FTS, SCHEMA},
  search::QueryRouter,
};

const SECS_PER_DAY: i64 = 86_400;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A memory store backed by one SQLite file plus its append buffer.
///
/// Cloning is cheap; clones share the connection, the query cache and the
/// buffer handle.
#[derive(Clone)]
pub struct SqliteStore {
  conn:    tokio_rusqlite::Connection,
  config:  Arc<MemoryConfig>,
  journal: Journal,
  health:  HealthLog,
  router:  Arc<QueryRouter>,
}

impl SqliteStore {
  /// Open (creating if necessary) the store described by `config` and heal
  /// whatever part of the schema is missing or out of step.
  pub async fn open(config: MemoryConfig) -> Result<Self> {
    let store = Self::connect(config).await?;
    store.heal().await?;
    Ok(store)
  }

  /// Open without touching the schema, so [`SqliteStore::selfcheck`] reports
  /// the file as it is. The database file is still created if absent.
  pub async fn open_unhealed(config: MemoryConfig) -> Result<Self> { Self::connect(config).await }

  async fn connect(config: MemoryConfig) -> Result<Self> {
    if let Some(parent) = config.db_path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent)?;
    }

    let conn = tokio_rusqlite::Connection::open(&config.db_path).await?;
    let store = Self {
      conn,
      journal: Journal::new(&config.buffer_path),
      health: HealthLog::new(&config.health_path),
      router: Arc::new(QueryRouter::new(config.query_cache_size, config.query_cache_ttl())),
      config: Arc::new(config),
    };
    store.configure().await?;
    Ok(store)
  }

  async fn configure(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        let mode: String =
          conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
          tracing::warn!(mode = %mode, "WAL journal mode unavailable");
        }
        conn.execute_batch(PRAGMAS)?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        let mmap: Option<i64> = conn
          .query_row(&format!("PRAGMA mmap_size = {MMAP_SIZE}"), [], |row| row.get(0))
          .optional()?;
        tracing::debug!(?mmap, "connection configured");
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Recreate missing schema objects and rebuild the FTS index when its row
  /// count disagrees with the table. Safe to call at any time.
  pub async fn heal(&self) -> Result<SelfCheck> {
    let (before, after, rebuilt) = self
      .conn
      .call(|conn| {
        let before = probe(conn)?;
        conn.execute_batch(SCHEMA)?;

        let mut after = probe(conn)?;
        let rebuilt = !after.fts_coherent;
        if rebuilt {
          let tx = conn.transaction()?;
          tx.execute_batch(REBUILD_FTS)?;
          tx.commit()?;
          after = probe(conn)?;
        }
        Ok((before, after, rebuilt))
      })
      .await?;

    let missing = before.missing();
    if !missing.is_empty() {
      tracing::info!(?missing, "recreated missing schema objects");
    }
    if rebuilt {
      tracing::info!(
        records = after.total_records,
        stale_fts_rows = before.fts_records,
        "rebuilt full-text index"
      );
    }
    Ok(after)
  }

  // ─── Accessors ─────────────────────────────────────────────────────────────

  pub fn config(&self) -> &MemoryConfig { &self.config }

  pub fn journal(&self) -> &Journal { &self.journal }

  pub(crate) fn connection(&self) -> &tokio_rusqlite::Connection { &self.conn }

  pub(crate) fn health_log(&self) -> &HealthLog { &self.health }

  pub(crate) fn router(&self) -> &QueryRouter { &self.router }

  /// Number of search results currently cached.
  pub fn cached_queries(&self) -> usize { self.router.cached_entries() }

  // ─── Writes ────────────────────────────────────────────────────────────────

  /// Append one record to the buffer. It becomes searchable after the next
  /// flush.
  pub async fn append(&self, record: NewRecord) -> Result<NewRecord> {
    Ok(self.journal.append(record).await?)
  }

  // ─── Reads ─────────────────────────────────────────────────────────────────

  pub async fn recent(&self, limit: usize) -> Result<Vec<MemoryHit>> {
    self.history_scan(None, limit).await
  }

  pub async fn by_role(&self, role: &str, limit: usize) -> Result<Vec<MemoryHit>> {
    self.history_scan(Some(role.to_owned()), limit).await
  }

  /// Fetch a single record by id.
  pub async fn get(&self, id: i64) -> Result<Option<MemoryHit>> {
    let raw: Option<RawRecord> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {PUBLIC_COLUMNS} FROM memory_public p WHERE p.id = ?1");
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query_map(rusqlite::params![id], |row| RawRecord::from_row(row, false))?;
        Ok(rows.next().transpose()?)
      })
      .await?;
    raw.map(RawRecord::into_hit).transpose()
  }

  // ─── Maintenance ───────────────────────────────────────────────────────────

  pub async fn stats(&self) -> Result<Stats> {
    let since = Utc::now().timestamp() - i64::from(self.config.recent_days) * SECS_PER_DAY;
    let counts = self.conn.call(move |conn| Ok(store_counts(conn, since)?)).await?;
    let doc = self.health.read().await?;
    let last_append_ts = self.journal.last_modified().await?;

    Ok(Stats {
      total_records: counts.total_records,
      fts_records: counts.fts_records,
      recent_records: counts.recent_records,
      active_locks: counts.active_locks,
      role_counts: counts.role_counts,
      last_flush_ts: doc.last_flush_ts,
      last_flush_ok: doc.last_flush_ok,
      last_append_ts,
    })
  }

  /// Probe the schema without changing it.
  pub async fn selfcheck(&self) -> SelfCheck {
    match self.conn.call(|conn| Ok(probe(conn)?)).await {
      Ok(report) => report,
      Err(e) => {
        tracing::warn!(error = %e, "selfcheck probe failed");
        SelfCheck::failed(e.to_string())
      }
    }
  }

  pub async fn health_document(&self) -> Result<crate::HealthDocument> { self.health.read().await }

  pub fn clear_query_cache(&self) { self.router.clear(); }
}

// ─── MemoryStore impl ────────────────────────────────────────────────────────

impl MemoryStore for SqliteStore {
  type Error = Error;

  async fn flush(&self, max_lines: usize) -> Result<usize> {
    Ok(self.flush_report(max_lines).await?.committed)
  }

  async fn search<'a>(&'a self, query: &'a str, options: SearchOptions) -> Result<Vec<MemoryHit>> {
    SqliteStore::search(self, query, options).await
  }

  async fn recent(&self, limit: usize) -> Result<Vec<MemoryHit>> { SqliteStore::recent(self, limit).await }

  async fn by_role<'a>(&'a self, role: &'a str, limit: usize) -> Result<Vec<MemoryHit>> {
    SqliteStore::by_role(self, role, limit).await
  }

  async fn stats(&self) -> Result<Stats> { SqliteStore::stats(self).await }

  async fn selfcheck(&self) -> SelfCheck { SqliteStore::selfcheck(self).await }

  fn clear_query_cache(&self) { SqliteStore::clear_query_cache(self); }
}
