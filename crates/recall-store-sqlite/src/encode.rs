//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! `raw` is stored as a JSON string and `tags` as a JSON array.

use recall_core::record::{MemoryHit, NewRecord, Record};

use crate::Result;

// ─── Raw ─────────────────────────────────────────────────────────────────────

pub fn encode_raw(raw: Option<&str>) -> Result<String> {
  Ok(serde_json::to_string(raw.unwrap_or_default())?)
}

/// Rows written by other tools may hold plain text; keep it as-is.
pub fn decode_raw(s: &str) -> String {
  serde_json::from_str::<String>(s).unwrap_or_else(|_| s.to_owned())
}

// ─── Tags ────────────────────────────────────────────────────────────────────

pub fn encode_tags(tags: &[String]) -> Result<String> {
  Ok(serde_json::to_string(tags)?)
}

pub fn decode_tags(s: &str) -> Result<Vec<String>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column values ready for `INSERT INTO memory`.
#[derive(Debug, Clone)]
pub struct InsertRow {
  pub ts:      i64,
  pub role:    String,
  pub insight: String,
  pub raw:     String,
  pub tags:    String,
}

impl InsertRow {
  /// Encode a validated, stamped record. `ts` must already be set.
  pub fn encode(record: &NewRecord, now: i64) -> Result<Self> {
    Ok(Self {
      ts:      record.ts.unwrap_or(now),
      role:    record.role.clone(),
      insight: record.insight.clone(),
      raw:     encode_raw(record.raw.as_deref())?,
      tags:    encode_tags(&record.tags)?,
    })
  }
}

/// Column list every record query selects from `memory_public`, in the order
/// [`RawRecord::from_row`] reads them.
pub const PUBLIC_COLUMNS: &str = "p.id, p.ts, p.role, p.insight, p.raw, p.tags";

/// Raw values read directly from a `memory_public` row.
pub struct RawRecord {
  pub id:      i64,
  pub ts:      i64,
  pub role:    String,
  pub insight: String,
  pub raw:     String,
  pub tags:    String,
  /// BM25 score; only the full-text path selects it.
  pub score:   Option<f64>,
}

impl RawRecord {
  /// Read [`PUBLIC_COLUMNS`], plus a score at index 6 when `scored`.
  pub fn from_row(row: &rusqlite::Row<'_>, scored: bool) -> rusqlite::Result<Self> {
    Ok(Self {
      id:      row.get(0)?,
      ts:      row.get(1)?,
      role:    row.get(2)?,
      insight: row.get(3)?,
      raw:     row.get(4)?,
      tags:    row.get(5)?,
      score:   if scored { row.get(6)? } else { None },
    })
  }

  pub fn into_hit(self) -> Result<MemoryHit> {
    Ok(MemoryHit {
      record: Record {
        id:      self.id,
        ts:      self.ts,
        role:    self.role,
        insight: self.insight,
        raw:     decode_raw(&self.raw),
        tags:    decode_tags(&self.tags)?,
      },
      score:  self.score,
    })
  }
}
