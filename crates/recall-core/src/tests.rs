//! Tests for record validation, buffer-line defaults and config resolution.

use std::path::PathBuf;

use crate::{
  Error,
  config::{ConfigKey, ConfigResolver, MemoryConfig},
  record::{BufferLine, DEFAULT_ROLE, MAX_TEXT_BYTES, MemoryHit, NewRecord, Record},
};

// ─── Records ─────────────────────────────────────────────────────────────────

#[test]
fn new_record_defaults_to_system_role() {
  let r = NewRecord::new("hello world");
  assert_eq!(r.role, DEFAULT_ROLE);
  assert!(r.validate().is_ok());
}

#[test]
fn validate_rejects_bad_fields() {
  let base = NewRecord::new("ok").with_role("user");

  assert!(matches!(
    NewRecord::new("   ").validate(),
    Err(Error::InvalidRecord(_))
  ));
  assert!(base.clone().with_role("9lives").validate().is_err());
  assert!(base.clone().with_role("a".repeat(33)).validate().is_err());
  assert!(base.clone().with_ts(-1).validate().is_err());
  assert!(base.clone().with_ts(i64::from(i32::MAX) + 1).validate().is_err());
  assert!(base.clone().with_tags(["has space"]).validate().is_err());
  assert!(base.clone().with_tags((0..51).map(|i| format!("t{i}"))).validate().is_err());
  assert!(
    NewRecord::new("x".repeat(MAX_TEXT_BYTES + 1))
      .validate()
      .is_err()
  );
  assert!(base.clone().with_raw("y".repeat(MAX_TEXT_BYTES + 1)).validate().is_err());
}

#[test]
fn validate_accepts_boundaries() {
  let r = NewRecord::new("x".repeat(MAX_TEXT_BYTES))
    .with_role("_".to_owned() + &"a".repeat(31))
    .with_ts(i64::from(i32::MAX))
    .with_tags((0..50).map(|i| format!("tag-{i}")));
  assert!(r.validate().is_ok());
  assert!(NewRecord::new("x").with_ts(0).validate().is_ok());
}

#[test]
fn stamped_fills_ts_and_dedups_tags() {
  let r = NewRecord::new("x").with_tags(["b", "a", "b"]).stamped(42);
  assert_eq!(r.ts, Some(42));
  assert_eq!(r.tags, ["b", "a"]);

  let kept = NewRecord::new("x").with_ts(7).stamped(42);
  assert_eq!(kept.ts, Some(7));
}

#[test]
fn new_record_accepts_from_alias() {
  let r: NewRecord = serde_json::from_str(r#"{"from":"user","insight":"hi"}"#).unwrap();
  assert_eq!(r.role, "user");
}

// ─── Buffer lines ────────────────────────────────────────────────────────────

#[test]
fn buffer_line_applies_flush_defaults() {
  let line = BufferLine::parse(r#"{"insight":"VELOS memory adapter test"}"#).unwrap();
  let r = line.into_new_record(1_700_000_000);
  assert_eq!(r.ts, Some(1_700_000_000));
  assert_eq!(r.role, "system");
  assert_eq!(r.raw, None);
  assert!(r.tags.is_empty());
}

#[test]
fn buffer_line_non_numeric_ts_falls_back_to_now() {
  let r = BufferLine::parse(r#"{"ts":"yesterday","insight":"x"}"#)
    .unwrap()
    .into_new_record(99);
  assert_eq!(r.ts, Some(99));

  let r = BufferLine::parse(r#"{"ts":12.9,"insight":"x"}"#)
    .unwrap()
    .into_new_record(99);
  assert_eq!(r.ts, Some(12));
}

#[test]
fn buffer_line_prefers_role_over_from() {
  let r = BufferLine::parse(r#"{"role":"assistant","from":"user","insight":"x"}"#)
    .unwrap()
    .into_new_record(0);
  assert_eq!(r.role, "assistant");

  let r = BufferLine::parse(r#"{"from":"user","insight":"x"}"#)
    .unwrap()
    .into_new_record(0);
  assert_eq!(r.role, "user");
}

#[test]
fn buffer_line_keeps_structured_raw_as_json_text() {
  let r = BufferLine::parse(r#"{"insight":"x","raw":{"k":1}}"#)
    .unwrap()
    .into_new_record(0);
  assert_eq!(r.raw.as_deref(), Some(r#"{"k":1}"#));
}

#[test]
fn buffer_line_rejects_non_json() {
  assert!(BufferLine::parse("{not json").is_err());
  assert!(BufferLine::parse(r#"{"insight":"x","tags":"notalist"}"#).is_err());
}

#[test]
fn missing_insight_defaults_empty_and_fails_validation() {
  let r = BufferLine::parse(r#"{"role":"user"}"#)
    .unwrap()
    .into_new_record(0);
  assert_eq!(r.insight, "");
  assert!(r.validate().is_err());
}

#[test]
fn memory_hit_serialises_flat_and_skips_missing_score() {
  let hit = MemoryHit::from(Record {
    id:      1,
    ts:      2,
    role:    "user".into(),
    insight: "hi".into(),
    raw:     String::new(),
    tags:    vec![],
  });
  let json = serde_json::to_value(&hit).unwrap();
  assert_eq!(json["role"], "user");
  assert!(json.get("score").is_none());
}

// ─── Config ──────────────────────────────────────────────────────────────────

fn no_file() -> PathBuf { PathBuf::from("/nonexistent/recall/memory.yaml") }

#[test]
fn defaults_apply_when_nothing_is_set() {
  let resolver = ConfigResolver::builder()
    .env([("MEMORY_ROOT", "/srv/agent")])
    .file(no_file())
    .build()
    .unwrap();
  let cfg = resolver.resolve().unwrap();
  assert_eq!(cfg, MemoryConfig::with_root("/srv/agent"));
}

#[test]
fn env_overrides_file_overrides_defaults() {
  let dir = tempfile::tempdir().unwrap();
  let file = dir.path().join("memory.yaml");
  std::fs::write(&file, "fts_limit: 7\nrecent_days: 3\nlock_namespace: agent\n").unwrap();

  let resolver = ConfigResolver::builder()
    .env([("FTS_LIMIT", "11"), ("MEMORY_ROOT", "/r")])
    .file(&file)
    .build()
    .unwrap();

  assert_eq!(resolver.get(ConfigKey::FtsLimit).unwrap(), "11");
  assert_eq!(resolver.get(ConfigKey::RecentDays).unwrap(), "3");
  assert_eq!(resolver.get(ConfigKey::KeywordMaxlen).unwrap(), "24");

  let cfg = resolver.resolve().unwrap();
  assert_eq!(cfg.fts_limit, 11);
  assert_eq!(cfg.recent_days, 3);
  assert_eq!(cfg.lock_name("flush"), "agent/flush");
}

#[test]
fn config_path_comes_from_env() {
  let dir = tempfile::tempdir().unwrap();
  let file = dir.path().join("custom.yaml");
  std::fs::write(&file, "keyword_maxlen: 5\n").unwrap();

  let resolver = ConfigResolver::builder()
    .env([("MEMORY_CONFIG", file.to_string_lossy().into_owned())])
    .build()
    .unwrap();
  assert_eq!(resolver.resolve().unwrap().keyword_maxlen, 5);
}

#[test]
fn relative_paths_resolve_under_root() {
  let resolver = ConfigResolver::builder()
    .env([("MEMORY_ROOT", "/srv/agent"), ("MEMORY_DB_PATH", "store/x.db")])
    .file(no_file())
    .build()
    .unwrap();
  let cfg = resolver.resolve().unwrap();
  assert_eq!(cfg.db_path, PathBuf::from("/srv/agent/store/x.db"));

  let resolver = ConfigResolver::builder()
    .env([("MEMORY_DB_PATH", "/abs/x.db")])
    .file(no_file())
    .build()
    .unwrap();
  assert_eq!(resolver.resolve().unwrap().db_path, PathBuf::from("/abs/x.db"));
}

#[test]
fn missing_key_without_defaults_is_missing_config() {
  let resolver = ConfigResolver::builder()
    .env(Vec::<(String, String)>::new())
    .file(no_file())
    .without_defaults()
    .build()
    .unwrap();

  match resolver.get(ConfigKey::FtsLimit) {
    Err(Error::MissingConfig(key)) => assert_eq!(key, "FTS_LIMIT"),
    other => panic!("expected MissingConfig, got {other:?}"),
  }
  assert!(matches!(resolver.resolve(), Err(Error::MissingConfig(_))));
}

#[test]
fn unparseable_value_is_invalid_config() {
  let resolver = ConfigResolver::builder()
    .env([("LOCK_TTL", "soon")])
    .file(no_file())
    .build()
    .unwrap();
  match resolver.resolve() {
    Err(Error::InvalidConfig { key, value }) => {
      assert_eq!(key, "LOCK_TTL");
      assert_eq!(value, "soon");
    }
    other => panic!("expected InvalidConfig, got {other:?}"),
  }
}
