//! Bounded-batch expiry of the event logs and the metadata they leave behind.
//!
//! Every entry point removes at most one batch per table and returns. A
//! scheduler calls again until a run reports no work, which keeps each
//! write transaction short on busy tables.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use checkuser_core::{
  client_hints::{ClientHintsMetadata, ClientHintsPurgeCounts, ClientHintsReferenceIds},
  config::RetentionConfig,
  source::EventSource,
};
use rusqlite::TransactionBehavior;

use crate::{
  CentralIndex, Error, Result, SqliteStore,
  encode::{encode_dt, limit_value},
};

// ─── Single-log purge ────────────────────────────────────────────────────────

/// The outcome of one bounded purge of one event log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPurge {
  pub deleted:    usize,
  /// Client-Hints references held by the deleted events.
  pub references: ClientHintsReferenceIds,
}

impl SqliteStore {
  /// Delete up to `max_rows` events of `source` older than `cutoff`.
  ///
  /// Victims are picked in no particular order; calling again picks up the
  /// rest. The references the victims held into the Client-Hints mapping are
  /// returned so the metadata can be cleaned up afterwards.
  pub async fn purge_from_log(
    &self,
    source: EventSource,
    cutoff: DateTime<Utc>,
    max_rows: usize,
  ) -> Result<LogPurge> {
    let spec = source.spec();
    let select = format!(
      "SELECT {id}, {reference} FROM {table} WHERE {ts} < ?1 LIMIT ?2",
      id = spec.id,
      reference = spec.client_hints_reference,
      table = spec.table,
      ts = spec.timestamp,
    );
    let delete = format!("DELETE FROM {} WHERE {} = ?1", spec.table, spec.id);
    let cutoff = encode_dt(cutoff);
    let limit = limit_value(max_rows);

    let (deleted, references): (usize, Vec<i64>) = self
      .primary
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let victims: Vec<(i64, Option<i64>)> = {
          let mut stmt = tx.prepare(&select)?;
          stmt
            .query_map(rusqlite::params![cutoff, limit], |row| {
              Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?
        };

        let mut deleted = 0;
        {
          let mut stmt = tx.prepare(&delete)?;
          for (id, _) in &victims {
            deleted += stmt.execute(rusqlite::params![id])?;
          }
        }
        tx.commit()?;

        let references = victims.into_iter().filter_map(|(_, r)| r).collect();
        Ok((deleted, references))
      })
      .await?;

    let mut refs = ClientHintsReferenceIds::new();
    refs.extend(source, references);
    tracing::debug!(?source, deleted, "purged event log batch");
    Ok(LogPurge { deleted, references: refs })
  }
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// What one [`RetentionPurger::run`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
  /// The domain's purge lock was held elsewhere; only orphan cleanup ran.
  pub skipped:               bool,
  pub events_deleted:        BTreeMap<EventSource, usize>,
  pub client_hints:          ClientHintsPurgeCounts,
  pub central_index_deleted: usize,
}

impl PurgeReport {
  /// Total rows removed across every table.
  pub fn rows_removed(&self) -> usize {
    self.events_deleted.values().sum::<usize>()
      + self.client_hints.total()
      + self.central_index_deleted
  }
}

// ─── RetentionPurger ─────────────────────────────────────────────────────────

/// Keeps one domain's event logs, their Client-Hints metadata and the
/// domain's central index rows inside the retention window.
pub struct RetentionPurger<M> {
  store:         SqliteStore,
  metadata:      M,
  retention:     RetentionConfig,
  central_index: Option<CentralIndex>,
}

impl<M: ClientHintsMetadata> RetentionPurger<M> {
  pub fn new(store: SqliteStore, metadata: M, retention: RetentionConfig) -> Self {
    Self { store, metadata, retention, central_index: None }
  }

  /// Also purge the domain's central index rows on every run.
  pub fn with_central_index(mut self, central_index: CentralIndex) -> Self {
    self.central_index = Some(central_index);
    self
  }

  fn lock_name(domain: &str) -> String { format!("checkuser-purge:{domain}") }

  /// Purge one batch for `domain` with `now` as the reference time.
  ///
  /// Concurrent runs for the same domain are serialised by an advisory
  /// lock. A run that cannot take it does not wait: it only sweeps orphaned
  /// metadata and reports `skipped`.
  pub async fn run(&self, domain: &str, now: DateTime<Utc>) -> Result<PurgeReport> {
    let lock = Self::lock_name(domain);

    let Some(token) = self.store.try_acquire_lock(&lock, self.retention.lock_ttl()).await?
    else {
      tracing::warn!(domain, "purge lock held elsewhere; skipping until next run");
      let mut report = PurgeReport { skipped: true, ..PurgeReport::default() };
      self.sweep_orphans(&mut report.client_hints).await?;
      return Ok(report);
    };

    let result = self.run_locked(domain, now).await;
    let released = self.store.release_lock(&token).await;
    let report = match (result, released) {
      (Ok(report), Ok(true)) => report,
      (Ok(report), Ok(false)) => {
        tracing::warn!(domain, "purge lock was taken over before release");
        report
      }
      (Ok(_), Err(e)) => return Err(e),
      (Err(e), released) => {
        if let Err(release_err) = released {
          tracing::warn!(domain, error = %release_err, "failed to release purge lock");
        }
        return Err(e);
      }
    };

    tracing::info!(
      domain,
      events = report.events_deleted.values().sum::<usize>(),
      client_hints_mappings = report.client_hints.mappings_deleted,
      client_hints_orphaned_mappings = report.client_hints.orphaned_mappings_deleted,
      client_hints_values = report.client_hints.orphaned_values_deleted,
      central_index = report.central_index_deleted,
      "purge batch complete"
    );
    Ok(report)
  }

  async fn run_locked(&self, domain: &str, now: DateTime<Utc>) -> Result<PurgeReport> {
    let cutoff = self.retention.cutoff(domain, now);
    let batch = self.retention.batch_size;
    let mut report = PurgeReport::default();
    let mut freed = ClientHintsReferenceIds::new();

    for source in EventSource::ALL {
      let purge = self.store.purge_from_log(source, cutoff, batch).await?;
      report.events_deleted.insert(source, purge.deleted);
      freed.merge(purge.references);
    }

    if !freed.is_empty() {
      report.client_hints.mappings_deleted = self
        .metadata
        .delete_mappings(&freed)
        .await
        .map_err(|e| Error::Metadata(Box::new(e)))?;
    }
    self.sweep_orphans(&mut report.client_hints).await?;

    if let Some(index) = &self.central_index {
      report.central_index_deleted = index
        .purge_expired(cutoff, domain, index.config().purge_batch_size)
        .await?;
    }

    Ok(report)
  }

  /// Lock-free cleanup: mappings whose event is gone, then values no
  /// mapping references. Mappings go first so the values they held are
  /// swept in the same run.
  async fn sweep_orphans(&self, counts: &mut ClientHintsPurgeCounts) -> Result<()> {
    let batch = self.retention.batch_size;
    counts.orphaned_mappings_deleted = self
      .metadata
      .delete_orphaned_mappings(batch)
      .await
      .map_err(|e| Error::Metadata(Box::new(e)))?;
    counts.orphaned_values_deleted = self
      .metadata
      .delete_orphaned_values(batch)
      .await
      .map_err(|e| Error::Metadata(Box::new(e)))?;
    Ok(())
  }
}
