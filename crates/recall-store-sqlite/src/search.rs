//! Query routing: keyword scan vs. full-text search, behind a result cache.
//!
//! Keyword-like queries scan the recent window with `LIKE` and are topped up
//! from FTS when the window has nothing. Phrase-like queries go to FTS5 and
//! are ordered by BM25. If the chosen path errors, the other one is tried
//! before giving up.
//!
//! The cache is cleared whenever the database has changed since the last
//! lookup. `PRAGMA data_version` reveals commits made by other connections;
//! `total_changes()` reveals those made through this one.

use std::{
  sync::{Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use chrono::Utc;
use recall_core::{
  cache::TtlCache,
  query::{ParsedQuery, QueryKind},
  record::MemoryHit,
  store::SearchOptions,
};

use crate::{
  Error, Result,
  encode::{PUBLIC_COLUMNS, RawRecord},
  store::SqliteStore,
};

const SECS_PER_DAY: i64 = 86_400;

/// `(data_version, total_changes)` as last observed by the router.
type DataVersion = (i64, i64);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SearchKey {
  text:  String,
  role:  Option<String>,
  limit: usize,
  days:  u32,
}

/// Everything needed to execute one search.
#[derive(Debug, Clone)]
struct SearchPlan {
  query: ParsedQuery,
  kind:  QueryKind,
  limit: usize,
  /// Lower `ts` bound of the keyword window.
  since: i64,
}

/// Router state owned by one store handle.
pub(crate) struct QueryRouter {
  cache:        TtlCache<SearchKey, Vec<MemoryHit>>,
  seen_version: Mutex<Option<DataVersion>>,
}

impl QueryRouter {
  pub fn new(capacity: usize, ttl: Duration) -> Self {
    Self { cache: TtlCache::new(capacity, ttl), seen_version: Mutex::new(None) }
  }

  pub fn clear(&self) { self.cache.clear(); }

  pub fn cached_entries(&self) -> usize { self.cache.len() }

  fn seen(&self) -> MutexGuard<'_, Option<DataVersion>> {
    self.seen_version.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Clear the cache if `current` differs from the last version seen.
  fn observe(&self, current: DataVersion) {
    let mut seen = self.seen();
    if *seen != Some(current) {
      if seen.is_some() {
        tracing::debug!(?current, "store changed, clearing query cache");
      }
      self.cache.clear();
      *seen = Some(current);
    }
  }

  /// Cache `hits` read at `version`, unless the store has moved on since.
  fn store(&self, key: SearchKey, hits: Vec<MemoryHit>, version: DataVersion) {
    let seen = self.seen();
    if *seen == Some(version) {
      self.cache.set(key, hits);
    }
  }
}

impl SqliteStore {
  /// Search by keyword or phrase. See the module docs for routing.
  pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<MemoryHit>> {
    let config = self.config();
    let parsed = ParsedQuery::parse(query);
    let days = options.days.unwrap_or(config.recent_days);
    let limit = options.limit.unwrap_or(config.fts_limit);

    let key = SearchKey {
      text: parsed.text.clone(),
      role: parsed.role.clone(),
      limit,
      days,
    };
    let plan = SearchPlan {
      kind: parsed.classify(config.keyword_maxlen),
      query: parsed,
      limit,
      since: Utc::now().timestamp() - i64::from(days) * SECS_PER_DAY,
    };

    let version = if options.use_cache { self.refresh_cache().await } else { None };
    if version.is_some()
      && let Some(hits) = self.router().cache.get(&key)
    {
      return Ok(hits);
    }

    let hits = self.route(&plan).await.map_err(|source| Error::SearchFailed {
      query:  query.to_owned(),
      source: Box::new(source),
    })?;

    if let Some(version) = version {
      self.router().store(key, hits.clone(), version);
    }
    Ok(hits)
  }

  /// Read the data version and invalidate stale entries. Returns the version
  /// observed, or `None` (bypass the cache) when it cannot be read.
  async fn refresh_cache(&self) -> Option<DataVersion> {
    let version = self
      .connection()
      .call(|conn| {
        let data_version: i64 = conn.query_row("PRAGMA data_version", [], |row| row.get(0))?;
        let changes: i64 = conn.query_row("SELECT total_changes()", [], |row| row.get(0))?;
        Ok::<DataVersion, tokio_rusqlite::Error>((data_version, changes))
      })
      .await;

    match version {
      Ok(version) => {
        self.router().observe(version);
        Some(version)
      }
      Err(e) => {
        tracing::warn!(error = %e, "cannot read data version, bypassing query cache");
        None
      }
    }
  }

  async fn route(&self, plan: &SearchPlan) -> Result<Vec<MemoryHit>> {
    match plan.kind {
      QueryKind::Keyword => match self.keyword_scan(plan).await {
        Ok(hits) if !hits.is_empty() => Ok(hits),
        Ok(_) => match self.full_text(plan).await {
          Ok(hits) => Ok(hits),
          Err(e) => {
            tracing::warn!(error = %e, "full-text top-up failed");
            Ok(Vec::new())
          }
        },
        Err(e) => {
          tracing::warn!(error = %e, "keyword scan failed, falling back to full-text");
          self.full_text(plan).await
        }
      },
      QueryKind::Phrase => match self.full_text(plan).await {
        Ok(hits) => Ok(hits),
        Err(e) => {
          tracing::warn!(error = %e, "full-text search failed, falling back to keyword scan");
          self.keyword_scan(plan).await
        }
      },
    }
  }

  /// Recent-window substring scan, newest first.
  async fn keyword_scan(&self, plan: &SearchPlan) -> Result<Vec<MemoryHit>> {
    let pattern = plan.query.like_pattern();
    let role = plan.query.role.clone();
    let since = plan.since;
    let limit = plan.limit as i64;

    let raws: Vec<RawRecord> = self
      .connection()
      .call(move |conn| {
        let sql = format!(
          "SELECT {PUBLIC_COLUMNS} FROM memory_public p
           WHERE p.ts >= ?1
             AND (p.insight LIKE ?2 ESCAPE '\\'
                  OR CASE WHEN json_valid(p.raw) THEN json_extract(p.raw, '$') ELSE p.raw END
                     LIKE ?2 ESCAPE '\\')
             AND (?3 IS NULL OR p.role = ?3)
           ORDER BY p.ts DESC, p.id DESC
           LIMIT ?4"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![since, pattern, role, limit], |row| {
            RawRecord::from_row(row, false)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_hit).collect()
  }

  /// FTS5 match ordered by BM25. With no text to match, lists the whole
  /// history instead.
  async fn full_text(&self, plan: &SearchPlan) -> Result<Vec<MemoryHit>> {
    let Some(expression) = plan.query.fts_expression() else {
      return self.history_scan(plan.query.role.clone(), plan.limit).await;
    };
    let role = plan.query.role.clone();
    let limit = plan.limit as i64;

    let raws: Vec<RawRecord> = self
      .connection()
      .call(move |conn| {
        let sql = format!(
          "SELECT {PUBLIC_COLUMNS}, bm25(memory_fts) AS score
           FROM memory_fts
           JOIN memory_public p ON p.id = memory_fts.rowid
           WHERE memory_fts MATCH ?1
             AND (?2 IS NULL OR p.role = ?2)
           ORDER BY score ASC, p.id DESC
           LIMIT ?3"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![expression, role, limit], |row| {
            RawRecord::from_row(row, true)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_hit).collect()
  }

  /// All records (optionally of one role), newest first.
  pub(crate) async fn history_scan(&self, role: Option<String>, limit: usize) -> Result<Vec<MemoryHit>> {
    let limit = limit as i64;
    let raws: Vec<RawRecord> = self
      .connection()
      .call(move |conn| {
        let sql = format!(
          "SELECT {PUBLIC_COLUMNS} FROM memory_public p
           WHERE (?1 IS NULL OR p.role = ?1)
           ORDER BY p.ts DESC, p.id DESC
           LIMIT ?2"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![role, limit], |row| RawRecord::from_row(row, false))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_hit).collect()
  }
}

#[cfg(test)]
mod tests {
  use recall_core::record::Record;

  use super::*;

  fn key(text: &str) -> SearchKey {
    SearchKey { text: text.to_owned(), role: None, limit: 10, days: 30 }
  }

  fn hit(id: i64) -> MemoryHit {
    MemoryHit::from(Record {
      id,
      ts: 1,
      role: "user".into(),
      insight: "x".into(),
      raw: String::new(),
      tags: Vec::new(),
    })
  }

  #[test]
  fn results_read_before_a_change_are_not_cached_after_it() {
    let router = QueryRouter::new(8, Duration::from_secs(60));
    router.observe((1, 0));
    // Another search sees the commit before the first one stores its rows.
    router.observe((2, 0));
    router.store(key("q"), vec![hit(1)], (1, 0));
    assert_eq!(router.cached_entries(), 0);

    router.store(key("q"), vec![hit(2)], (2, 0));
    assert_eq!(router.cache.get(&key("q")), Some(vec![hit(2)]));
  }

  #[test]
  fn version_change_clears_cache() {
    let router = QueryRouter::new(8, Duration::from_secs(60));
    router.observe((1, 0));
    router.store(key("q"), vec![hit(1)], (1, 0));
    router.observe((1, 0));
    assert_eq!(router.cached_entries(), 1);
    router.observe((1, 5));
    assert_eq!(router.cached_entries(), 0);
  }
}
