//! Store handle, connections and the actor-name lookup.

use std::path::Path;

use checkuser_core::{event::ActorId, target::IdentityLookup};
use rusqlite::OptionalExtension as _;

use crate::{Result, schema::SCHEMA};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A CheckUser store backed by a single SQLite file.
///
/// Reads go through `replica`, writes through `primary`. For a file-backed
/// store these are two connections to the same database, so a read on the
/// replica only ever observes committed state; an in-memory store shares a
/// single connection for both.
///
/// Clones share the same connections.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) primary: tokio_rusqlite::Connection,
  pub(crate) replica: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let primary = tokio_rusqlite::Connection::open(path).await?;
    init_schema(&primary).await?;
    let replica = tokio_rusqlite::Connection::open(path).await?;
    tracing::debug!(path = %path.display(), "opened checkuser store");
    Ok(Self { primary, replica })
  }

  /// An in-memory store with both handles on one connection.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    init_schema(&conn).await?;
    Ok(Self { primary: conn.clone(), replica: conn })
  }
}

async fn init_schema(conn: &tokio_rusqlite::Connection) -> Result<()> {
  conn
    .call(|conn| {
      conn.execute_batch(SCHEMA)?;
      Ok(())
    })
    .await?;
  Ok(())
}

// ─── IdentityLookup impl ─────────────────────────────────────────────────────

impl IdentityLookup for SqliteStore {
  type Error = crate::Error;

  async fn actor_id<'a>(&'a self, name: &'a str) -> Result<Option<ActorId>> {
    let name = name.to_owned();

    let id: Option<i64> = self
      .replica
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT actor_id FROM actor WHERE actor_name = ?1",
              rusqlite::params![name],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    Ok(id.map(ActorId))
  }
}
