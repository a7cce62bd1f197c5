//! Records — the unit of storage in the memory store.
//!
//! A record is a short "insight" produced by an agent persona, optionally
//! accompanied by the raw text it was distilled from and a handful of tags.
//! Records enter the system as [`NewRecord`]s through the append buffer and
//! come back out as [`Record`]s once the flusher has committed them.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Upper bound, in bytes, for `insight` and `raw`.
pub const MAX_TEXT_BYTES: usize = 64 * 1024;

/// Upper bound on the number of tags attached to one record.
pub const MAX_TAGS: usize = 50;

/// Largest accepted `ts` (epoch seconds); the store keeps 32-bit timestamps.
pub const MAX_TS: i64 = i32::MAX as i64;

/// Role assigned when the producer names none.
pub const DEFAULT_ROLE: &str = "system";

static ROLE_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,31}$").expect("valid role regex"));

static TAG_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid tag regex"));

/// Whether `role` is a syntactically valid persona identifier.
pub fn is_valid_role(role: &str) -> bool { ROLE_RE.is_match(role) }

// ─── Input ───────────────────────────────────────────────────────────────────

/// A record as written by a producer, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
  /// Epoch seconds of the described event; stamped with "now" on append when
  /// absent.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ts:      Option<i64>,
  #[serde(default = "default_role", alias = "from")]
  pub role:    String,
  pub insight: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub raw:     Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags:    Vec<String>,
}

fn default_role() -> String { DEFAULT_ROLE.to_owned() }

impl NewRecord {
  /// A record with the default role and no optional fields.
  pub fn new(insight: impl Into<String>) -> Self {
    Self {
      ts:      None,
      role:    default_role(),
      insight: insight.into(),
      raw:     None,
      tags:    Vec::new(),
    }
  }

  pub fn with_role(mut self, role: impl Into<String>) -> Self {
    self.role = role.into();
    self
  }

  pub fn with_ts(mut self, ts: i64) -> Self {
    self.ts = Some(ts);
    self
  }

  pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
    self.raw = Some(raw.into());
    self
  }

  pub fn with_tags<I, T>(mut self, tags: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<String>,
  {
    self.tags = tags.into_iter().map(Into::into).collect();
    self
  }

  /// Fill a missing `ts` with `now` and drop repeated tags, keeping the first
  /// occurrence of each.
  pub fn stamped(mut self, now: i64) -> Self {
    self.ts.get_or_insert(now);
    let mut seen = std::collections::HashSet::new();
    self.tags.retain(|t| seen.insert(t.clone()));
    self
  }

  /// Check every field against the record bounds.
  pub fn validate(&self) -> Result<()> {
    if let Some(ts) = self.ts
      && !(0..=MAX_TS).contains(&ts)
    {
      return Err(invalid(format!("ts {ts} outside 0..={MAX_TS}")));
    }
    if !is_valid_role(&self.role) {
      return Err(invalid(format!("role {:?} is not an identifier", self.role)));
    }
    if self.insight.trim().is_empty() {
      return Err(invalid("insight is empty"));
    }
    if self.insight.len() > MAX_TEXT_BYTES {
      return Err(invalid(format!("insight exceeds {MAX_TEXT_BYTES} bytes")));
    }
    if let Some(raw) = &self.raw
      && raw.len() > MAX_TEXT_BYTES
    {
      return Err(invalid(format!("raw exceeds {MAX_TEXT_BYTES} bytes")));
    }
    if self.tags.len() > MAX_TAGS {
      return Err(invalid(format!("{} tags, at most {MAX_TAGS} allowed", self.tags.len())));
    }
    if let Some(bad) = self.tags.iter().find(|t| !TAG_RE.is_match(t)) {
      return Err(invalid(format!("tag {bad:?} is not a label")));
    }
    Ok(())
  }
}

fn invalid(msg: impl Into<String>) -> Error { Error::InvalidRecord(msg.into()) }

// ─── Buffer lines ────────────────────────────────────────────────────────────

/// A buffer line as read back by the flusher.
///
/// Parsing is lenient: every field is optional and `ts`/`raw` accept any JSON
/// value. Defaults are applied by [`BufferLine::into_new_record`]; bounds are
/// checked afterwards by [`NewRecord::validate`].
#[derive(Debug, Default, Deserialize)]
pub struct BufferLine {
  #[serde(default)]
  pub ts:      Option<serde_json::Value>,
  #[serde(default)]
  pub role:    Option<String>,
  #[serde(default)]
  pub from:    Option<String>,
  #[serde(default)]
  pub insight: Option<String>,
  #[serde(default)]
  pub raw:     Option<serde_json::Value>,
  #[serde(default)]
  pub tags:    Option<Vec<String>>,
}

impl BufferLine {
  pub fn parse(line: &str) -> Result<Self> { Ok(serde_json::from_str(line)?) }

  /// Apply flush defaults: `ts` falls back to `now` when missing or not a
  /// number, `role` to `from` and then to [`DEFAULT_ROLE`], `insight` to the
  /// empty string. Non-string `raw` values keep their JSON text.
  pub fn into_new_record(self, now: i64) -> NewRecord {
    let ts = self.ts.as_ref().and_then(numeric_ts).unwrap_or(now);
    let raw = match self.raw {
      None | Some(serde_json::Value::Null) => None,
      Some(serde_json::Value::String(s)) => Some(s),
      Some(other) => Some(other.to_string()),
    };

    NewRecord {
      ts: Some(ts),
      role: self.role.or(self.from).unwrap_or_else(default_role),
      insight: self.insight.unwrap_or_default(),
      raw,
      tags: self.tags.unwrap_or_default(),
    }
    .stamped(now)
  }
}

fn numeric_ts(value: &serde_json::Value) -> Option<i64> {
  match value {
    serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
    serde_json::Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

// ─── Stored records ──────────────────────────────────────────────────────────

/// A committed record in its public shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub id:      i64,
  pub ts:      i64,
  #[serde(alias = "from")]
  pub role:    String,
  pub insight: String,
  /// Empty when the producer supplied none.
  #[serde(default)]
  pub raw:     String,
  #[serde(default)]
  pub tags:    Vec<String>,
}

/// A record returned from a search, with its BM25 score when it came from
/// the full-text path (lower is a better match).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
  #[serde(flatten)]
  pub record: Record,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub score:  Option<f64>,
}

impl From<Record> for MemoryHit {
  fn from(record: Record) -> Self { Self { record, score: None } }
}
