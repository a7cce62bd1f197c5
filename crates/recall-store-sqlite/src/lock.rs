//! [`AdvisoryLock`] — a named lease stored as a row in the `locks` table.
//!
//! The row lives in the store itself, so it shares the database's crash
//! semantics and is visible to every process that opens the same file. A
//! lease older than its TTL may be reclaimed by the next contender.

use std::{
  future::Future,
  time::{Duration, Instant},
};

use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::{
  Error, Result,
  error::{is_busy, is_constraint},
};

/// First backoff delay; doubles after every failed attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Outcome of one insert attempt.
enum Attempt {
  Acquired { reclaimed: usize },
  Held,
}

#[derive(Clone)]
pub struct AdvisoryLock {
  conn:  tokio_rusqlite::Connection,
  name:  String,
  owner: String,
  ttl:   Duration,
}

impl AdvisoryLock {
  /// A lock handle with a fresh owner id (`<pid>:<uuid>`).
  pub fn new(conn: tokio_rusqlite::Connection, name: impl Into<String>, ttl: Duration) -> Self {
    Self {
      conn,
      name: name.into(),
      owner: format!("{}:{}", std::process::id(), Uuid::new_v4()),
      ttl,
    }
  }

  pub fn name(&self) -> &str { &self.name }

  pub fn owner(&self) -> &str { &self.owner }

  /// Run `body` while holding the lock. The lease is released when `body`
  /// finishes, whether it returned `Ok` or `Err`.
  ///
  /// The lease is not renewed while `body` runs. Writes that must not land
  /// after a reclaim should check [`AdvisoryLock::still_held`] inside their
  /// own transaction. Dropping the returned future skips the release; the
  /// row then lingers until its TTL runs out.
  pub async fn scope<T, F, Fut>(&self, body: F) -> Result<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    self.acquire().await?;
    let out = body().await;
    match self.release().await {
      Ok(()) => out,
      Err(release_err) => match out {
        Ok(_) => Err(release_err),
        Err(body_err) => {
          tracing::warn!(lock = %self.name, error = %release_err, "failed to release lock");
          Err(body_err)
        }
      },
    }
  }

  /// Retry with exponential backoff until acquired or the TTL has been spent
  /// waiting.
  pub async fn acquire(&self) -> Result<()> {
    let started = Instant::now();
    let mut delay = BACKOFF_BASE;

    loop {
      match self.try_acquire().await? {
        Attempt::Acquired { reclaimed } => {
          if reclaimed > 0 {
            tracing::warn!(lock = %self.name, reclaimed, "reclaimed expired lease");
          }
          tracing::debug!(lock = %self.name, owner = %self.owner, "lock acquired");
          return Ok(());
        }
        Attempt::Held => {}
      }

      let waited = started.elapsed();
      if waited >= self.ttl {
        return Err(Error::LockTimeout { name: self.name.clone(), waited });
      }
      tokio::time::sleep(delay.min(self.ttl - waited)).await;
      delay = delay.saturating_mul(2);
    }
  }

  async fn try_acquire(&self) -> Result<Attempt> {
    let name = self.name.clone();
    let owner = self.owner.clone();
    let ttl_secs = self.ttl.as_secs() as i64;

    let attempt = self
      .conn
      .call(move |conn| {
        let now = Utc::now().timestamp();
        let mut reclaimed = 0;
        loop {
          let inserted = conn.execute(
            "INSERT INTO locks (name, owner, acquired_ts) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, owner, now],
          );
          match inserted {
            Ok(_) => return Ok(Attempt::Acquired { reclaimed }),
            Err(e) if is_busy(&e) => return Ok(Attempt::Held),
            Err(e) if is_constraint(&e) => {
              let expired = conn.execute(
                "DELETE FROM locks WHERE name = ?1 AND acquired_ts < ?2",
                rusqlite::params![name, now - ttl_secs],
              );
              match expired {
                Ok(0) => return Ok(Attempt::Held),
                Ok(n) => reclaimed += n,
                Err(e) if is_busy(&e) => return Ok(Attempt::Held),
                Err(e) => return Err(e.into()),
              }
            }
            Err(e) => return Err(e.into()),
          }
        }
      })
      .await?;
    Ok(attempt)
  }

  /// Whether our lease row is still present. Run inside a write transaction
  /// to make the check atomic with the write.
  pub fn still_held(&self, conn: &rusqlite::Connection) -> rusqlite::Result<bool> {
    conn
      .query_row(
        "SELECT 1 FROM locks WHERE name = ?1 AND owner = ?2",
        rusqlite::params![self.name, self.owner],
        |_| Ok(()),
      )
      .optional()
      .map(|row| row.is_some())
  }

  /// Delete our own lease. A lease reclaimed by someone else is left alone.
  pub async fn release(&self) -> Result<()> {
    let name = self.name.clone();
    let owner = self.owner.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM locks WHERE name = ?1 AND owner = ?2",
          rusqlite::params![name, owner],
        )?;
        Ok(())
      })
      .await?;
    tracing::debug!(lock = %self.name, "lock released");
    Ok(())
  }
}
