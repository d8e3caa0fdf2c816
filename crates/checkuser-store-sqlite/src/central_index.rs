//! The cross-domain activity index.
//!
//! Answers "which actors were active since T" without touching any domain's
//! event logs. Rows are `(wiki id, subject, timestamp)`: `cuci_user` keys
//! subjects by actor id, `cuci_temp_edit` by IP range key. Only per-domain
//! insertion order is meaningful; there is no global ordering guarantee.

use std::{collections::VecDeque, net::IpAddr};

use chrono::{DateTime, Utc};
use checkuser_core::{
  config::CentralIndexConfig,
  event::{ActorId, WikiId},
  range_key::{KeyRange, RangeKey},
};
use rusqlite::{OptionalExtension as _, TransactionBehavior};

use crate::{
  Result, SqliteStore,
  encode::{decode_dt, encode_dt, limit_value},
};

// ─── CentralIndex ────────────────────────────────────────────────────────────

/// Lookup and maintenance operations on the central index.
#[derive(Clone)]
pub struct CentralIndex {
  primary:  tokio_rusqlite::Connection,
  replica:  tokio_rusqlite::Connection,
  config:   CentralIndexConfig,
  excluded: Vec<KeyRange>,
}

impl SqliteStore {
  /// Fails with `InvalidAddress` if an excluded range does not parse.
  pub fn central_index(&self, config: CentralIndexConfig) -> Result<CentralIndex> {
    let excluded = config
      .excluded_ranges
      .iter()
      .map(|cidr| KeyRange::encode_str(cidr))
      .collect::<checkuser_core::Result<Vec<_>>>()?;

    Ok(CentralIndex {
      primary: self.primary.clone(),
      replica: self.replica.clone(),
      config,
      excluded,
    })
  }
}

/// One of the two tables purged per domain.
struct PurgeTable {
  table:     &'static str,
  key:       &'static str,
  wiki:      &'static str,
  timestamp: &'static str,
}

const PURGE_TABLES: [PurgeTable; 2] = [
  PurgeTable {
    table:     "cuci_temp_edit",
    key:       "cite_ip_hex",
    wiki:      "cite_ciwm_id",
    timestamp: "cite_timestamp",
  },
  PurgeTable {
    table:     "cuci_user",
    key:       "ciu_central_id",
    wiki:      "ciu_ciwm_id",
    timestamp: "ciu_timestamp",
  },
];

impl CentralIndex {
  pub fn config(&self) -> &CentralIndexConfig { &self.config }

  // ── Lookup ────────────────────────────────────────────────────────────────

  /// Actors whose latest activity on any domain is after `since`, in
  /// ascending id order, fetched `batch_size` at a time.
  pub fn active_actors_since(
    &self,
    since: DateTime<Utc>,
    batch_size: usize,
  ) -> ActiveActors {
    ActiveActors {
      conn:       self.replica.clone(),
      since:      encode_dt(since),
      batch_size: batch_size.max(1),
      position:   None,
      scanned:    None,
      buffer:     VecDeque::new(),
      exhausted:  false,
    }
  }

  /// The most recent activity recorded for `actor` on any domain.
  pub async fn last_active(&self, actor: ActorId) -> Result<Option<DateTime<Utc>>> {
    let ts: Option<String> = self
      .replica
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT MAX(ciu_timestamp) FROM cuci_user WHERE ciu_central_id = ?1",
          rusqlite::params![actor.0],
          |row| row.get(0),
        )?)
      })
      .await?;

    ts.as_deref().map(decode_dt).transpose()
  }

  // ── Wiki map ──────────────────────────────────────────────────────────────

  /// The wiki id of `domain` as seen by the replica, without creating one.
  pub async fn find_wiki_id(&self, domain: &str) -> Result<Option<WikiId>> {
    let domain = domain.to_owned();
    let id: Option<i64> = self
      .replica
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT ciwm_id FROM cuci_wiki_map WHERE ciwm_wiki = ?1",
              rusqlite::params![domain],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(id.map(WikiId))
  }

  /// The wiki id of `domain`, assigning one on first use.
  ///
  /// Reads the replica first. On a miss, inserts on the primary with
  /// `INSERT OR IGNORE` in autocommit mode and re-reads the primary, so a
  /// concurrent first writer's committed row wins and every caller converges
  /// on a single id.
  pub async fn wiki_id_for(&self, domain: &str) -> Result<WikiId> {
    if let Some(id) = self.find_wiki_id(domain).await? {
      return Ok(id);
    }

    let owned = domain.to_owned();
    let (id, inserted): (i64, bool) = self
      .primary
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT OR IGNORE INTO cuci_wiki_map (ciwm_wiki) VALUES (?1)",
          rusqlite::params![owned],
        )? == 1;
        let id = conn.query_row(
          "SELECT ciwm_id FROM cuci_wiki_map WHERE ciwm_wiki = ?1",
          rusqlite::params![owned],
          |row| row.get(0),
        )?;
        Ok((id, inserted))
      })
      .await?;

    if inserted {
      tracing::info!(domain, wiki_id = id, "assigned central index wiki id");
    }
    Ok(WikiId(id))
  }

  // ── Insert / merge ────────────────────────────────────────────────────────

  /// Record that `actor` was active on `domain` at `at`. Keeps the later of
  /// the stored and the new timestamp, so replays are harmless.
  pub async fn record_actor_activity(
    &self,
    domain: &str,
    actor: ActorId,
    at: DateTime<Utc>,
  ) -> Result<()> {
    let wiki = self.wiki_id_for(domain).await?;
    let ts = encode_dt(at);

    self
      .primary
      .call(move |conn| {
        conn.execute(
          "INSERT INTO cuci_user (ciu_central_id, ciu_ciwm_id, ciu_timestamp)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (ciu_ciwm_id, ciu_central_id) DO UPDATE
             SET ciu_timestamp = excluded.ciu_timestamp
             WHERE excluded.ciu_timestamp > cuci_user.ciu_timestamp",
          rusqlite::params![actor.0, wiki.0, ts],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Record a temporary-account edit from `ip` on `domain` at `at`.
  ///
  /// Returns `false` without writing when `ip` falls in an excluded range.
  pub async fn record_temp_edit(
    &self,
    domain: &str,
    ip: IpAddr,
    at: DateTime<Utc>,
  ) -> Result<bool> {
    let key = RangeKey::encode(ip);
    if self.excluded.iter().any(|range| range.contains(&key)) {
      tracing::debug!(domain, %ip, "ip in excluded range; not indexed");
      return Ok(false);
    }

    let wiki = self.wiki_id_for(domain).await?;
    let ts = encode_dt(at);
    let key = key.as_str().to_owned();

    self
      .primary
      .call(move |conn| {
        conn.execute(
          "INSERT INTO cuci_temp_edit (cite_ip_hex, cite_ciwm_id, cite_timestamp)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (cite_ip_hex, cite_ciwm_id) DO UPDATE
             SET cite_timestamp = excluded.cite_timestamp
             WHERE excluded.cite_timestamp > cuci_temp_edit.cite_timestamp",
          rusqlite::params![key, wiki.0, ts],
        )?;
        Ok(())
      })
      .await?;
    Ok(true)
  }

  // ── Purge ─────────────────────────────────────────────────────────────────

  /// Remove up to `max_rows` rows older than `cutoff` from each of the two
  /// index tables for `domain` only. Returns the rows removed from both.
  ///
  /// Each pass selects its victims and deletes them inside one immediate
  /// (write-locked) transaction on the primary.
  pub async fn purge_expired(
    &self,
    cutoff: DateTime<Utc>,
    domain: &str,
    max_rows: usize,
  ) -> Result<usize> {
    let Some(wiki) = self.find_wiki_id(domain).await? else {
      return Ok(0);
    };
    let cutoff = encode_dt(cutoff);

    let removed = self
      .primary
      .call(move |conn| {
        let mut removed = 0;
        for table in &PURGE_TABLES {
          removed += purge_pass(conn, table, wiki, &cutoff, max_rows)?;
        }
        Ok(removed)
      })
      .await?;

    tracing::debug!(domain, removed, "purged central index rows");
    Ok(removed)
  }
}

fn purge_pass(
  conn: &mut rusqlite::Connection,
  table: &PurgeTable,
  wiki: WikiId,
  cutoff: &str,
  max_rows: usize,
) -> rusqlite::Result<usize> {
  let PurgeTable { table, key, wiki: wiki_col, timestamp } = table;
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

  let victims: Vec<rusqlite::types::Value> = {
    let mut stmt = tx.prepare(&format!(
      "SELECT {key} FROM {table} WHERE {wiki_col} = ?1 AND {timestamp} < ?2 LIMIT ?3"
    ))?;
    stmt
      .query_map(
        rusqlite::params![wiki.0, cutoff, limit_value(max_rows)],
        |row| row.get(0),
      )?
      .collect::<rusqlite::Result<_>>()?
  };

  let mut removed = 0;
  {
    let mut stmt = tx.prepare(&format!(
      "DELETE FROM {table} WHERE {wiki_col} = ?1 AND {key} = ?2 AND {timestamp} < ?3"
    ))?;
    for victim in &victims {
      removed += stmt.execute(rusqlite::params![wiki.0, victim, cutoff])?;
    }
  }

  tx.commit()?;
  Ok(removed)
}

// ─── ActiveActors ────────────────────────────────────────────────────────────

/// A single-pass, keyset-paginated walk over active actors.
///
/// Each page reads the next `batch_size` distinct actor ids from the index
/// and keeps the active ones, so a page costs the same wherever the walk is.
/// A page may therefore yield fewer than `batch_size` actors.
///
/// Holds only the last actor id handed out, so it can be dropped and resumed
/// with [`ActiveActors::resume_after`]. Iterating again from the start means
/// building a new one.
pub struct ActiveActors {
  conn:       tokio_rusqlite::Connection,
  since:      String,
  batch_size: usize,
  position:   Option<ActorId>,
  /// Last actor id read from the index, active or not.
  scanned:    Option<ActorId>,
  buffer:     VecDeque<ActorId>,
  exhausted:  bool,
}

impl ActiveActors {
  /// Skip every actor up to and including `actor`.
  pub fn resume_after(mut self, actor: ActorId) -> Self {
    self.position = Some(actor);
    self.scanned = Some(actor);
    self.buffer.clear();
    self.exhausted = false;
    self
  }

  /// The last actor id handed out.
  pub fn position(&self) -> Option<ActorId> { self.position }

  pub async fn next(&mut self) -> Result<Option<ActorId>> {
    self.fill().await?;
    let next = self.buffer.pop_front();
    if next.is_some() {
      self.position = next;
    }
    Ok(next)
  }

  /// The rest of the current page, or the next page. `None` once done.
  pub async fn next_batch(&mut self) -> Result<Option<Vec<ActorId>>> {
    self.fill().await?;
    if self.buffer.is_empty() {
      return Ok(None);
    }
    let batch: Vec<ActorId> = self.buffer.drain(..).collect();
    self.position = batch.last().copied();
    Ok(Some(batch))
  }

  /// Collect every remaining actor id.
  pub async fn collect_all(mut self) -> Result<Vec<ActorId>> {
    let mut all = Vec::new();
    while let Some(batch) = self.next_batch().await? {
      all.extend(batch);
    }
    Ok(all)
  }

  async fn fill(&mut self) -> Result<()> {
    while self.buffer.is_empty() && !self.exhausted {
      let after = self.scanned.map_or(i64::MIN, |actor| actor.0);
      let since = self.since.clone();
      let limit = limit_value(self.batch_size);

      let page: Vec<(i64, bool)> = self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(
            "SELECT ciu_central_id, MAX(ciu_timestamp) > ?2 FROM cuci_user
             WHERE ciu_central_id IN (
               SELECT DISTINCT ciu_central_id FROM cuci_user
               WHERE ciu_central_id > ?1
               ORDER BY ciu_central_id
               LIMIT ?3)
             GROUP BY ciu_central_id
             ORDER BY ciu_central_id",
          )?;
          let ids = stmt
            .query_map(rusqlite::params![after, since, limit], |row| {
              Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(ids)
        })
        .await?;

      let Some(&(last, _)) = page.last() else {
        self.exhausted = true;
        break;
      };
      self.scanned = Some(ActorId(last));
      self
        .buffer
        .extend(page.into_iter().filter(|(_, active)| *active).map(|(id, _)| ActorId(id)));
    }
    Ok(())
  }
}
