//! [`ClientHintsMetadata`] backed by the store's Client-Hints tables.

use checkuser_core::{
  client_hints::{ClientHintsMetadata, ClientHintsReferenceIds},
  source::EventSource,
};
use rusqlite::TransactionBehavior;

use crate::{Error, Result, SqliteStore, encode::limit_value};

impl SqliteStore {
  /// Store the hints sent with one event. Each name/value pair is stored
  /// once and shared by every event that sent it.
  pub async fn record_client_hints(
    &self,
    source: EventSource,
    reference_id: i64,
    hints: Vec<(String, String)>,
  ) -> Result<()> {
    let reference_type = source.tag();

    self
      .primary
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
          let mut insert_value = tx.prepare(
            "INSERT OR IGNORE INTO cu_useragent_clienthints (uach_name, uach_value)
             VALUES (?1, ?2)",
          )?;
          let mut find_value = tx.prepare(
            "SELECT uach_id FROM cu_useragent_clienthints
             WHERE uach_name = ?1 AND uach_value = ?2",
          )?;
          let mut insert_map = tx.prepare(
            "INSERT OR IGNORE INTO cu_useragent_clienthints_map
               (uachm_uach_id, uachm_reference_id, uachm_reference_type)
             VALUES (?1, ?2, ?3)",
          )?;

          for (name, value) in &hints {
            insert_value.execute(rusqlite::params![name, value])?;
            let uach_id: i64 =
              find_value.query_row(rusqlite::params![name, value], |row| row.get(0))?;
            insert_map.execute(rusqlite::params![uach_id, reference_id, reference_type])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── ClientHintsMetadata impl ────────────────────────────────────────────────

impl ClientHintsMetadata for SqliteStore {
  type Error = Error;

  async fn delete_mappings<'a>(
    &'a self,
    refs: &'a ClientHintsReferenceIds,
  ) -> Result<usize> {
    let pairs: Vec<(i64, i64)> = refs
      .iter()
      .flat_map(|(source, ids)| ids.iter().map(move |id| (source.tag(), *id)))
      .collect();
    if pairs.is_empty() {
      return Ok(0);
    }

    let deleted = self
      .primary
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut deleted = 0;
        {
          let mut stmt = tx.prepare(
            "DELETE FROM cu_useragent_clienthints_map
             WHERE uachm_reference_type = ?1 AND uachm_reference_id = ?2",
          )?;
          for (reference_type, reference_id) in &pairs {
            deleted += stmt.execute(rusqlite::params![reference_type, reference_id])?;
          }
        }
        tx.commit()?;
        Ok(deleted)
      })
      .await?;

    tracing::debug!(references = refs.len(), deleted, "deleted client hints mappings");
    Ok(deleted)
  }

  async fn delete_orphaned_mappings(&self, max_rows: usize) -> Result<usize> {
    let sweeps: Vec<(i64, String)> = EventSource::ALL
      .into_iter()
      .map(|source| {
        let spec = source.spec();
        let sql = format!(
          "DELETE FROM cu_useragent_clienthints_map WHERE rowid IN (
             SELECT map.rowid FROM cu_useragent_clienthints_map AS map
             WHERE map.uachm_reference_type = ?1
               AND NOT EXISTS (
                 SELECT 1 FROM {table} WHERE {reference} = map.uachm_reference_id
               )
             LIMIT ?2
           )",
          table = spec.table,
          reference = spec.client_hints_reference,
        );
        (source.tag(), sql)
      })
      .collect();

    let deleted = self
      .primary
      .call(move |conn| {
        let mut deleted = 0;
        for (reference_type, sql) in &sweeps {
          let remaining = max_rows.saturating_sub(deleted);
          if remaining == 0 {
            break;
          }
          deleted += conn.execute(
            sql,
            rusqlite::params![reference_type, limit_value(remaining)],
          )?;
        }
        Ok(deleted)
      })
      .await?;

    if deleted > 0 {
      tracing::warn!(deleted, "deleted client hints mappings left behind by purged events");
    }
    Ok(deleted)
  }

  async fn delete_orphaned_values(&self, max_rows: usize) -> Result<usize> {
    let limit = limit_value(max_rows);

    let deleted = self
      .primary
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM cu_useragent_clienthints WHERE uach_id IN (
             SELECT uach_id FROM cu_useragent_clienthints
             LEFT JOIN cu_useragent_clienthints_map ON uachm_uach_id = uach_id
             WHERE uachm_uach_id IS NULL
             LIMIT ?1
           )",
          rusqlite::params![limit],
        )?)
      })
      .await?;

    if deleted > 0 {
      tracing::debug!(deleted, "deleted orphaned client hints values");
    }
    Ok(deleted)
  }
}
