//! [`Journal`] — the line-delimited JSON append buffer.

use std::{
  fs::{self, File, OpenOptions},
  io::{BufRead, BufReader, Read, Seek, SeekFrom, Write},
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use recall_core::record::NewRecord;
use serde::Deserialize;

use crate::{Error, Result};

/// Initial tail window read back after each append.
const TAIL_WINDOW: u64 = 4 * 1024;

/// Fields that must parse back from the final buffer line.
#[derive(Deserialize)]
struct TailLine {
  #[serde(rename = "ts")]
  _ts:      i64,
  #[serde(rename = "role")]
  _role:    String,
  #[serde(rename = "insight")]
  _insight: String,
}

/// A prefix of the buffer taken by the flusher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
  /// Non-empty lines in file order, without terminators.
  pub lines:    Vec<String>,
  /// Byte offset just past the last consumed line.
  pub consumed: u64,
}

impl Snapshot {
  /// True when nothing at all was consumed (absent or empty buffer).
  pub fn is_empty(&self) -> bool { self.consumed == 0 }
}

// ─── Journal ─────────────────────────────────────────────────────────────────

/// Handle on a buffer file. Cheap to clone; holds no open descriptor.
#[derive(Debug, Clone)]
pub struct Journal {
  path: PathBuf,
}

impl Journal {
  pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

  pub fn path(&self) -> &Path { &self.path }

  /// Append `record` as one fsynced line and verify the buffer tail.
  ///
  /// A missing `ts` is stamped with the current time. Returns the record as
  /// written. On `Ok`, the line is on stable storage.
  pub async fn append(&self, record: NewRecord) -> Result<NewRecord> {
    let record = record.stamped(Utc::now().timestamp());
    record.validate()?;

    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');

    let path = self.path.clone();
    tokio::task::spawn_blocking(move || {
      // Held until the line is verified, so a tail rewrite cannot drop it
      // from under us.
      let _guard = BufferLock::shared(&path)?;
      append_line(&path, &line)?;
      verify_tail(&path)
    })
    .await??;

    tracing::debug!(path = %self.path.display(), role = %record.role, "appended record");
    Ok(record)
  }

  /// Up to `max_lines` non-empty lines from the head of the buffer.
  pub async fn snapshot(&self, max_lines: usize) -> Result<Snapshot> {
    let path = self.path.clone();
    tokio::task::spawn_blocking(move || read_snapshot(&path, max_lines)).await?
  }

  /// Drop the first `consumed` bytes, keeping whatever follows them now,
  /// including lines appended after the snapshot was taken.
  pub async fn drop_consumed(&self, consumed: u64) -> Result<()> {
    if consumed == 0 {
      return Ok(());
    }
    let path = self.path.clone();
    tokio::task::spawn_blocking(move || rewrite_tail(&path, consumed)).await?
  }

  /// Modification time of the buffer in epoch seconds, `None` if absent.
  pub async fn last_modified(&self) -> Result<Option<i64>> {
    let path = self.path.clone();
    tokio::task::spawn_blocking(move || -> Result<Option<i64>> {
      match fs::metadata(&path) {
        Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?).timestamp())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
      }
    })
    .await?
  }

  /// Count of non-empty lines currently buffered.
  pub async fn pending(&self) -> Result<usize> {
    Ok(self.snapshot(usize::MAX).await?.lines.len())
  }
}

// ─── Blocking helpers ────────────────────────────────────────────────────────

fn append_line(path: &Path, line: &[u8]) -> Result<()> {
  let mut file = OpenOptions::new().create(true).append(true).open(path)?;
  file.write_all(line)?;
  file.flush()?;
  file.sync_all()?;
  Ok(())
}

/// Parse the final non-empty line. The window starts at [`TAIL_WINDOW`] and
/// doubles only while the final line does not fit in it.
fn verify_tail(path: &Path) -> Result<()> {
  let mut file = File::open(path)?;
  let len = file.metadata()?.len();
  let mut window = TAIL_WINDOW.min(len);

  loop {
    file.seek(SeekFrom::Start(len - window))?;
    let mut buf = Vec::with_capacity(window as usize);
    (&mut file).take(window).read_to_end(&mut buf)?;

    let end = buf
      .iter()
      .rposition(|b| !b.is_ascii_whitespace())
      .map_or(0, |i| i + 1);
    let body = &buf[..end];

    match body.iter().rposition(|b| *b == b'\n') {
      Some(nl) => return check_tail(&body[nl + 1..]),
      None if window == len => return check_tail(body),
      None => window = (window * 2).min(len),
    }
  }
}

fn check_tail(line: &[u8]) -> Result<()> {
  if line.is_empty() {
    return Err(Error::WriteVerificationFailed("buffer has no lines".into()));
  }
  serde_json::from_slice::<TailLine>(line)
    .map(|_| ())
    .map_err(|e| Error::WriteVerificationFailed(e.to_string()))
}

fn read_snapshot(path: &Path, max_lines: usize) -> Result<Snapshot> {
  let file = match File::open(path) {
    Ok(f) => f,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
    Err(e) => return Err(e.into()),
  };

  let mut reader = BufReader::new(file);
  let mut snapshot = Snapshot::default();
  let mut buf = Vec::new();

  while snapshot.lines.len() < max_lines {
    buf.clear();
    let n = reader.read_until(b'\n', &mut buf)?;
    // EOF, or a final line still missing its terminator.
    if n == 0 || buf.last() != Some(&b'\n') {
      break;
    }
    snapshot.consumed += n as u64;
    let line = String::from_utf8_lossy(&buf);
    let line = line.trim();
    if !line.is_empty() {
      snapshot.lines.push(line.to_owned());
    }
  }
  Ok(snapshot)
}

fn rewrite_tail(path: &Path, consumed: u64) -> Result<()> {
  // Appenders hold the shared side, so nothing lands in the old file between
  // the read below and the rename.
  let _guard = BufferLock::exclusive(path)?;
  let mut file = File::open(path)?;
  let len = file.metadata()?.len();
  file.seek(SeekFrom::Start(consumed.min(len)))?;
  let mut rest = Vec::new();
  file.read_to_end(&mut rest)?;

  let tmp = sidecar(path, ".tmp");
  {
    let mut out = File::create(&tmp)?;
    out.write_all(&rest)?;
    out.sync_all()?;
  }
  fs::rename(&tmp, path)?;
  Ok(())
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
  let mut name = path.file_name().unwrap_or_default().to_os_string();
  name.push(suffix);
  path.with_file_name(name)
}

// ─── Rewrite lock ────────────────────────────────────────────────────────────

/// `flock` on `<buffer>.lock`: shared for appenders, exclusive for the tail
/// rewrite. It lives beside the buffer because the buffer itself is replaced
/// by rename. Released on drop.
struct BufferLock {
  file: File,
}

impl BufferLock {
  fn shared(buffer: &Path) -> Result<Self> {
    let file = open_lock_file(buffer)?;
    FileExt::lock_shared(&file)?;
    Ok(Self { file })
  }

  fn exclusive(buffer: &Path) -> Result<Self> {
    let file = open_lock_file(buffer)?;
    FileExt::lock_exclusive(&file)?;
    Ok(Self { file })
  }
}

impl Drop for BufferLock {
  fn drop(&mut self) { let _ = FileExt::unlock(&self.file); }
}

fn open_lock_file(buffer: &Path) -> Result<File> {
  if let Some(parent) = buffer.parent()
    && !parent.as_os_str().is_empty()
  {
    fs::create_dir_all(parent)?;
  }
  let file = OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(sidecar(buffer, ".lock"))?;
  Ok(file)
}
