//! [`UnionQuery`]: one time-ordered, paginated stream over all event logs.
//!
//! Each source gets its own branch, limited to the same page size as the
//! outer query: no single source can contribute more than `limit` rows to a
//! page ordered by the same key, so the merged set never exceeds
//! `sources × limit` rows however large the logs grow. The branches are
//! combined with `UNION ALL`, re-ordered and re-limited.
//!
//! A query value holds configuration only. Every terminal fetch renders a
//! fresh statement, so a query can be cloned, reconfigured and fetched again.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use checkuser_core::{
  column::Column,
  event::{EventCursor, EventRow, FieldValue},
  source::EventSource,
  target::Target,
};
use rusqlite::types::Value;

use crate::{
  Result, SqliteStore,
  encode::{RawEventRow, limit_value},
  projection::{Dialect, FETCHED_FIELD, Joins, SqlParams, SubQuery},
};

/// Page size used when the caller sets none.
pub const DEFAULT_LIMIT: usize = 500;

// ─── Query options ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
  #[default]
  NewestFirst,
  OldestFirst,
}

impl SortOrder {
  pub(crate) fn keyword(self) -> &'static str {
    match self {
      Self::NewestFirst => "DESC",
      Self::OldestFirst => "ASC",
    }
  }

  /// Comparison selecting rows that come after a position in this order.
  pub(crate) fn after_op(self) -> &'static str {
    match self {
      Self::NewestFirst => "<",
      Self::OldestFirst => ">",
    }
  }
}

/// Inclusive bounds on the event timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
  pub since: Option<DateTime<Utc>>,
  pub until: Option<DateTime<Utc>>,
}

/// Which columns each branch projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fields {
  /// The full common column set, plus any joined columns.
  All,
  Only(Vec<Column>),
}

pub(crate) struct BuiltQuery {
  pub sql:     String,
  pub params:  Vec<Value>,
  /// Result columns in select order; a scalar fetch's column comes last.
  pub columns: Vec<Column>,
}

// ─── UnionQuery ──────────────────────────────────────────────────────────────

/// A query for the events matching one target across all sources.
///
/// Not meant for concurrent use; build one per logical query.
#[derive(Clone)]
pub struct UnionQuery {
  conn:           tokio_rusqlite::Connection,
  target:         Target,
  forwarded_for:  bool,
  window:         TimeWindow,
  fields:         Fields,
  overrides:      BTreeMap<EventSource, Vec<Column>>,
  sources:        Vec<EventSource>,
  limit:          Option<usize>,
  order:          SortOrder,
  actor_join:     bool,
  comment_join:   bool,
  continue_after: Option<EventCursor>,
}

impl SqliteStore {
  /// Start a query for events matching `target` in every source.
  pub fn union_query(&self, target: Target) -> UnionQuery {
    UnionQuery {
      conn: self.replica.clone(),
      target,
      forwarded_for: false,
      window: TimeWindow::default(),
      fields: Fields::All,
      overrides: BTreeMap::new(),
      sources: EventSource::ALL.to_vec(),
      limit: Some(DEFAULT_LIMIT),
      order: SortOrder::default(),
      actor_join: false,
      comment_join: false,
      continue_after: None,
    }
  }
}

impl UnionQuery {
  // ── Configuration ─────────────────────────────────────────────────────────

  /// Match address targets against the forwarded-for key instead of the
  /// connecting IP.
  pub fn forwarded_for(mut self, forwarded_for: bool) -> Self {
    self.forwarded_for = forwarded_for;
    self
  }

  pub fn window(mut self, window: TimeWindow) -> Self {
    self.window = window;
    self
  }

  pub fn since(mut self, since: DateTime<Utc>) -> Self {
    self.window.since = Some(since);
    self
  }

  pub fn until(mut self, until: DateTime<Utc>) -> Self {
    self.window.until = Some(until);
    self
  }

  /// Project only `columns` (plus id, source and timestamp, which are always
  /// selected). Naming a joined column turns its join on.
  pub fn fields(mut self, columns: impl IntoIterator<Item = Column>) -> Self {
    self.fields = Fields::Only(columns.into_iter().collect());
    self
  }

  pub fn all_fields(mut self) -> Self {
    self.fields = Fields::All;
    self
  }

  /// Override the projection for one source. Branches are combined
  /// positionally, so every source must still project the same number of
  /// columns.
  pub fn source_fields(
    mut self,
    source: EventSource,
    columns: impl IntoIterator<Item = Column>,
  ) -> Self {
    self.overrides.insert(source, columns.into_iter().collect());
    self
  }

  /// Restrict the query to `sources`.
  pub fn sources(mut self, sources: impl IntoIterator<Item = EventSource>) -> Self {
    let wanted: Vec<EventSource> = sources.into_iter().collect();
    self.sources = EventSource::ALL
      .into_iter()
      .filter(|s| wanted.contains(s))
      .collect();
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn unlimited(mut self) -> Self {
    self.limit = None;
    self
  }

  pub fn order(mut self, order: SortOrder) -> Self {
    self.order = order;
    self
  }

  pub fn with_actor_join(mut self) -> Self {
    self.actor_join = true;
    self
  }

  pub fn with_comment_join(mut self) -> Self {
    self.comment_join = true;
    self
  }

  /// Resume after the last row of a previous page.
  pub fn continue_after(mut self, cursor: EventCursor) -> Self {
    self.continue_after = Some(cursor);
    self
  }

  pub fn needs_actor_join(&self) -> bool {
    self.joins(None).actor
  }

  pub fn needs_comment_join(&self) -> bool {
    self.joins(None).comment
  }

  // ── Rendering ─────────────────────────────────────────────────────────────

  /// The statement a fetch would run, rendered for `dialect`. `None` when no
  /// source is selected.
  pub fn to_sql(&self, dialect: Dialect) -> Result<Option<String>> {
    Ok(self.build(dialect, None)?.map(|built| built.sql))
  }

  fn mentions(&self, column: Column, extra: Option<Column>) -> bool {
    let in_fields = matches!(&self.fields, Fields::Only(cols) if cols.contains(&column));
    in_fields
      || self.overrides.values().any(|cols| cols.contains(&column))
      || extra == Some(column)
  }

  fn joins(&self, extra: Option<Column>) -> Joins {
    Joins {
      actor:   self.actor_join || self.mentions(Column::ActorName, extra),
      comment: self.comment_join || self.mentions(Column::CommentText, extra),
    }
  }

  fn columns_for(&self, source: EventSource, joins: Joins) -> Vec<Column> {
    let requested = match (self.overrides.get(&source), &self.fields) {
      (Some(cols), _) => cols.clone(),
      (None, Fields::Only(cols)) => cols.clone(),
      (None, Fields::All) => {
        let mut cols = Column::PROJECTED.to_vec();
        if joins.actor {
          cols.push(Column::ActorName);
        }
        if joins.comment {
          cols.push(Column::CommentText);
        }
        cols
      }
    };

    let mut columns = Column::REQUIRED.to_vec();
    for column in requested {
      if !columns.contains(&column) {
        columns.push(column);
      }
    }
    columns
  }

  pub(crate) fn build(
    &self,
    dialect: Dialect,
    extra: Option<Column>,
  ) -> Result<Option<BuiltQuery>> {
    let joins = self.joins(extra);
    let key = self.target.key_column(self.forwarded_for);
    let mut params = SqlParams::new(dialect);
    let mut outer: Option<Vec<Column>> = None;
    let mut branches = Vec::with_capacity(self.sources.len());

    for &source in &self.sources {
      let columns = self.columns_for(source, joins);
      match &outer {
        Some(first) if first.len() != columns.len() => {
          return Err(
            checkuser_core::Error::MalformedProjection {
              event_source: source,
              expected:     first.len(),
              found:        columns.len(),
            }
            .into(),
          );
        }
        Some(_) => {}
        None => outer = Some(columns.clone()),
      }

      let branch = SubQuery {
        source,
        columns: columns
          .iter()
          .map(|c| source.column_spec(*c, |j| joins.has(j)))
          .collect(),
        extra: extra.map(|c| source.column_spec(c, |j| joins.has(j))),
        joins,
        target: &self.target,
        key,
        window: self.window,
        continue_after: self.continue_after,
        order: self.order,
        limit: self.limit,
      };
      branches.push(format!(
        "SELECT * FROM ({}) AS {}_page",
        branch.render(&mut params),
        source.spec().table
      ));
    }

    let Some(mut columns) = outer else {
      return Ok(None);
    };

    let mut select = columns
      .iter()
      .map(|c| c.alias())
      .collect::<Vec<_>>()
      .join(", ");
    if let Some(column) = extra {
      select.push_str(&format!(", {FETCHED_FIELD}"));
      columns.push(column);
    }
    let dir = self.order.keyword();
    let mut sql = format!(
      "SELECT {select} FROM ({}) AS checkuser_union \
       ORDER BY timestamp {dir}, id {dir}, source {dir}",
      branches.join(" UNION ALL ")
    );
    if let Some(limit) = self.limit {
      sql.push_str(&format!(" LIMIT {}", params.bind(limit_value(limit))));
    }

    Ok(Some(BuiltQuery { sql, params: params.into_values(), columns }))
  }

  // ── Terminal operations ───────────────────────────────────────────────────

  async fn fetch_raw(&self, extra: Option<Column>) -> Result<Vec<RawEventRow>> {
    let Some(BuiltQuery { sql, params, columns }) =
      self.build(Dialect::Sqlite, extra)?
    else {
      return Ok(Vec::new());
    };

    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| {
            RawEventRow::read(row, &columns)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    tracing::debug!(rows = rows.len(), limit = ?self.limit, "union query fetched");
    Ok(rows)
  }

  /// The same query, limited to its first row.
  fn first_only(&self) -> Self {
    let mut query = self.clone();
    query.limit = Some(self.limit.map_or(1, |limit| limit.min(1)));
    query
  }

  /// All rows, ordered and limited.
  pub async fn fetch_all(&self) -> Result<Vec<EventRow>> {
    self
      .fetch_raw(None)
      .await?
      .into_iter()
      .map(RawEventRow::into_event_row)
      .collect()
  }

  /// The first row in query order, if any.
  pub async fn fetch_row(&self) -> Result<Option<EventRow>> {
    self
      .first_only()
      .fetch_raw(None)
      .await?
      .into_iter()
      .next()
      .map(RawEventRow::into_event_row)
      .transpose()
  }

  /// One column of the first row. `None` when there is no row; a row whose
  /// value is NULL yields `Some(FieldValue::Null)`.
  pub async fn fetch_field(&self, column: Column) -> Result<Option<FieldValue>> {
    self
      .first_only()
      .fetch_raw(Some(column))
      .await?
      .into_iter()
      .next()
      .map(|raw| raw.into_fetched(column))
      .transpose()
  }

  /// One column of every row, in query order.
  pub async fn fetch_field_values(&self, column: Column) -> Result<Vec<FieldValue>> {
    self
      .fetch_raw(Some(column))
      .await?
      .into_iter()
      .map(|raw| raw.into_fetched(column))
      .collect()
  }

  /// The number of rows `fetch_all` would return: `min(limit, matches)`.
  pub async fn fetch_row_count(&self) -> Result<usize> {
    let Some(BuiltQuery { sql, params, .. }) = self.build(Dialect::Sqlite, None)?
    else {
      return Ok(0);
    };
    let sql = format!("SELECT COUNT(*) FROM ({sql}) AS counted");

    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(&sql, rusqlite::params_from_iter(params), |row| {
          row.get(0)
        })?)
      })
      .await?;

    Ok(usize::try_from(count).unwrap_or_default())
  }
}
