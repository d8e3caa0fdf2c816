//! Best-effort advisory locks for background jobs.
//!
//! A lock is a row in `job_lock`. It is never waited on: a caller that
//! cannot take it skips its work for this run. A lock older than its TTL is
//! treated as abandoned by a crashed job and may be taken over.

use chrono::{Duration, Utc};
use rusqlite::TransactionBehavior;

use crate::{Result, SqliteStore, encode::encode_dt};

/// Proof of holding a lock, needed to release it.
///
/// Identifies one acquisition by its timestamp. A takeover only happens
/// once the old row is older than `now - ttl`, so the new holder's
/// timestamp always differs from the one it replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
  name:        String,
  acquired_at: String,
}

impl LockToken {
  pub fn name(&self) -> &str { &self.name }
}

impl SqliteStore {
  /// Take the lock `name` unless someone else holds it. Never blocks.
  pub async fn try_acquire_lock(
    &self,
    name: &str,
    ttl: Duration,
  ) -> Result<Option<LockToken>> {
    let now = Utc::now();
    let token = LockToken { name: name.to_owned(), acquired_at: encode_dt(now) };
    let stale_before = encode_dt(now - ttl);

    let row = token.clone();
    let acquired = self
      .primary
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
          "DELETE FROM job_lock WHERE lock_name = ?1 AND acquired_at < ?2",
          rusqlite::params![row.name, stale_before],
        )?;
        let inserted = tx.execute(
          "INSERT OR IGNORE INTO job_lock (lock_name, acquired_at) VALUES (?1, ?2)",
          rusqlite::params![row.name, row.acquired_at],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
      })
      .await?;

    Ok(acquired.then_some(token))
  }

  /// Release a lock taken with [`try_acquire_lock`](Self::try_acquire_lock).
  ///
  /// Returns `false` when the lock had already been taken over, in which
  /// case the new holder's row is left alone.
  pub async fn release_lock(&self, token: &LockToken) -> Result<bool> {
    let token = token.clone();
    let released = self
      .primary
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM job_lock WHERE lock_name = ?1 AND acquired_at = ?2",
          rusqlite::params![token.name, token.acquired_at],
        )?)
      })
      .await?;
    Ok(released == 1)
  }
}
