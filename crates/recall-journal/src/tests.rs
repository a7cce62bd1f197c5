//! Tests for `Journal` against buffers in a temporary directory.

use std::sync::Arc;

use recall_core::record::NewRecord;
use tempfile::TempDir;

use crate::{Error, Journal};

fn journal() -> (Journal, TempDir) {
  let dir = tempfile::tempdir().expect("tempdir");
  let journal = Journal::new(dir.path().join("data/memory/buffer.jsonl"));
  (journal, dir)
}

fn read(journal: &Journal) -> String {
  std::fs::read_to_string(journal.path()).unwrap_or_default()
}

// ─── Append ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn append_creates_directory_and_writes_one_line() {
  let (j, _dir) = journal();
  let written = j
    .append(NewRecord::new("hello world").with_role("user").with_ts(1_700_000_000))
    .await
    .unwrap();
  assert_eq!(written.ts, Some(1_700_000_000));

  let contents = read(&j);
  assert_eq!(contents.lines().count(), 1);
  let value: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
  assert_eq!(value["role"], "user");
  assert_eq!(value["insight"], "hello world");
  assert_eq!(value["ts"], 1_700_000_000);
}

#[tokio::test]
async fn append_stamps_missing_ts() {
  let (j, _dir) = journal();
  let before = chrono::Utc::now().timestamp();
  let written = j.append(NewRecord::new("no ts")).await.unwrap();
  let ts = written.ts.unwrap();
  assert!(ts >= before && ts <= before + 5);
}

#[tokio::test]
async fn append_preserves_utf8() {
  let (j, _dir) = journal();
  j.append(NewRecord::new("café ☕ 記憶")).await.unwrap();
  assert!(read(&j).contains("café ☕ 記憶"));
}

#[tokio::test]
async fn append_rejects_invalid_record_without_writing() {
  let (j, _dir) = journal();
  let err = j.append(NewRecord::new("")).await.unwrap_err();
  assert!(matches!(err, Error::Core(recall_core::Error::InvalidRecord(_))));
  assert!(!j.path().exists());
}

#[tokio::test]
async fn append_verifies_lines_longer_than_the_tail_window() {
  let (j, _dir) = journal();
  j.append(NewRecord::new("short")).await.unwrap();
  j.append(NewRecord::new("x".repeat(20_000))).await.unwrap();
  assert_eq!(read(&j).lines().count(), 2);
}

#[tokio::test]
async fn append_fails_verification_when_tail_is_corrupt() {
  let (j, _dir) = journal();
  std::fs::create_dir_all(j.path().parent().unwrap()).unwrap();
  // A writer that left an unterminated fragment corrupts the next line.
  std::fs::write(j.path(), b"{\"ts\":1,").unwrap();
  let err = j.append(NewRecord::new("after")).await.unwrap_err();
  assert!(matches!(err, Error::WriteVerificationFailed(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_never_interleave() {
  let (j, _dir) = journal();
  let j = Arc::new(j);
  let mut tasks = Vec::new();
  for t in 0..8 {
    let j = Arc::clone(&j);
    tasks.push(tokio::spawn(async move {
      for i in 0..25 {
        j.append(NewRecord::new(format!("writer {t} line {i}")).with_role("user"))
          .await
          .unwrap();
      }
    }));
  }
  for t in tasks {
    t.await.unwrap();
  }

  let contents = read(&j);
  assert_eq!(contents.lines().count(), 200);
  for line in contents.lines() {
    serde_json::from_str::<serde_json::Value>(line).expect("every line is whole JSON");
  }
}

// ─── Snapshot & truncation ───────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_of_missing_buffer_is_empty() {
  let (j, _dir) = journal();
  let snap = j.snapshot(10).await.unwrap();
  assert!(snap.is_empty());
  assert!(snap.lines.is_empty());
}

#[tokio::test]
async fn snapshot_skips_blank_lines_and_stops_at_max() {
  let (j, _dir) = journal();
  std::fs::create_dir_all(j.path().parent().unwrap()).unwrap();
  std::fs::write(j.path(), "a\n\n  \nb\nc\nd\n").unwrap();

  let snap = j.snapshot(2).await.unwrap();
  assert_eq!(snap.lines, ["a", "b"]);
  assert_eq!(snap.consumed, "a\n\n  \nb\n".len() as u64);
}

#[tokio::test]
async fn snapshot_leaves_unterminated_tail() {
  let (j, _dir) = journal();
  std::fs::create_dir_all(j.path().parent().unwrap()).unwrap();
  std::fs::write(j.path(), "a\nhalf").unwrap();

  let snap = j.snapshot(10).await.unwrap();
  assert_eq!(snap.lines, ["a"]);
  assert_eq!(snap.consumed, 2);
}

#[tokio::test]
async fn drop_consumed_keeps_lines_appended_after_snapshot() {
  let (j, _dir) = journal();
  for i in 0..3 {
    j.append(NewRecord::new(format!("before {i}"))).await.unwrap();
  }
  let snap = j.snapshot(2).await.unwrap();
  j.append(NewRecord::new("after snapshot")).await.unwrap();

  j.drop_consumed(snap.consumed).await.unwrap();

  let remaining: Vec<String> = read(&j)
    .lines()
    .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["insight"].to_string())
    .collect();
  assert_eq!(remaining, ["\"before 2\"", "\"after snapshot\""]);
  assert_eq!(j.pending().await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn appends_racing_tail_rewrites_are_never_lost() {
  let (j, _dir) = journal();
  let j = Arc::new(j);
  let mut writers = Vec::new();
  for t in 0..6 {
    let j = Arc::clone(&j);
    writers.push(tokio::spawn(async move {
      for i in 0..100 {
        j.append(NewRecord::new(format!("w{t} n{i}"))).await.unwrap();
      }
    }));
  }

  let mut drained = Vec::new();
  while !writers.iter().all(|w| w.is_finished()) {
    let snap = j.snapshot(50).await.unwrap();
    j.drop_consumed(snap.consumed).await.unwrap();
    drained.extend(snap.lines);
    tokio::task::yield_now().await;
  }
  for w in writers {
    w.await.unwrap();
  }
  let snap = j.snapshot(usize::MAX).await.unwrap();
  j.drop_consumed(snap.consumed).await.unwrap();
  drained.extend(snap.lines);

  let mut insights: Vec<String> = drained
    .iter()
    .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["insight"].as_str().unwrap().to_owned())
    .collect();
  insights.sort();
  insights.dedup();
  assert_eq!(drained.len(), 600);
  assert_eq!(insights.len(), 600);
  assert_eq!(j.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn last_modified_tracks_buffer_presence() {
  let (j, _dir) = journal();
  assert_eq!(j.last_modified().await.unwrap(), None);
  j.append(NewRecord::new("x")).await.unwrap();
  assert!(j.last_modified().await.unwrap().is_some());
}
