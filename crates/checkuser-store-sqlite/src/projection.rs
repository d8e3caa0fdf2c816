//! SQL rendering for the per-source branches of a union query.
//!
//! Each branch projects its source into the common column set, substituting
//! a typed NULL for columns the source lacks, and is independently ordered
//! and limited. Backend differences (NULL literals, index hints,
//! placeholders) are decided by [`Dialect`] rather than spelled inline.

use checkuser_core::{
  column::{ColumnExpr, ColumnSpec, ColumnType, Join},
  event::EventCursor,
  source::{EventSource, KeyColumn},
  target::Target,
};
use rusqlite::types::Value;

use crate::{
  encode::{encode_dt, limit_value},
  union::{SortOrder, TimeWindow},
};

// ─── Dialect ─────────────────────────────────────────────────────────────────

/// The SQL flavour a query is rendered for. Only SQLite is executed by this
/// crate; the others exist so the rendered statement can be inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
  #[default]
  Sqlite,
  Postgres,
  MySql,
}

impl Dialect {
  /// A NULL that UNIONs cleanly with a real column of type `ty`. PostgreSQL
  /// refuses to unify an untyped NULL with a later typed branch.
  pub fn typed_null(self, ty: ColumnType) -> String {
    match self {
      Self::Sqlite | Self::MySql => "NULL".to_owned(),
      Self::Postgres => format!("CAST(NULL AS {})", ty.sql_name()),
    }
  }

  pub fn index_hint(self, index: &str) -> Option<String> {
    match self {
      Self::Sqlite => Some(format!("INDEXED BY {index}")),
      Self::MySql => Some(format!("FORCE INDEX ({index})")),
      Self::Postgres => None,
    }
  }

  fn placeholder(self, position: usize) -> String {
    match self {
      Self::Postgres => format!("${position}"),
      Self::Sqlite | Self::MySql => "?".to_owned(),
    }
  }
}

// ─── Parameters ──────────────────────────────────────────────────────────────

/// Bound values collected in the order their placeholders are rendered.
pub(crate) struct SqlParams {
  dialect: Dialect,
  values:  Vec<Value>,
}

impl SqlParams {
  pub fn new(dialect: Dialect) -> Self { Self { dialect, values: Vec::new() } }

  pub fn dialect(&self) -> Dialect { self.dialect }

  /// Record `value` and return the placeholder to splice into the SQL.
  pub fn bind(&mut self, value: impl Into<Value>) -> String {
    self.values.push(value.into());
    self.dialect.placeholder(self.values.len())
  }

  pub fn into_values(self) -> Vec<Value> { self.values }
}

// ─── Joins ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Joins {
  pub actor:   bool,
  pub comment: bool,
}

impl Joins {
  pub fn has(&self, join: Join) -> bool {
    match join {
      Join::Actor => self.actor,
      Join::Comment => self.comment,
    }
  }
}

// ─── SubQuery ────────────────────────────────────────────────────────────────

/// Alias of the extra column a scalar fetch appends after the projection.
pub(crate) const FETCHED_FIELD: &str = "fetched_field";

/// One source's branch of a union query.
pub(crate) struct SubQuery<'q> {
  pub source:         EventSource,
  pub columns:        Vec<ColumnSpec>,
  /// Appended as [`FETCHED_FIELD`], never merged into `columns`.
  pub extra:          Option<ColumnSpec>,
  pub joins:          Joins,
  pub target:         &'q Target,
  pub key:            KeyColumn,
  pub window:         TimeWindow,
  pub continue_after: Option<EventCursor>,
  pub order:          SortOrder,
  pub limit:          Option<usize>,
}

impl SubQuery<'_> {
  pub fn render(&self, params: &mut SqlParams) -> String {
    let spec = self.source.spec();
    let dialect = params.dialect();

    let select = self
      .columns
      .iter()
      .map(|c| format!("{} AS {}", render_expr(c, dialect), c.name()))
      .chain(
        self
          .extra
          .iter()
          .map(|c| format!("{} AS {FETCHED_FIELD}", render_expr(c, dialect))),
      )
      .collect::<Vec<_>>()
      .join(", ");

    let mut sql = format!("SELECT {select} FROM {}", spec.table);
    if let Some(hint) = dialect.index_hint(spec.index_for(self.key)) {
      sql.push(' ');
      sql.push_str(&hint);
    }
    if self.joins.actor {
      sql.push_str(&format!(
        " LEFT JOIN actor ON actor.actor_id = {}",
        spec.actor
      ));
    }
    if self.joins.comment {
      sql.push_str(&format!(
        " LEFT JOIN comment ON comment.comment_id = {}",
        spec.comment_id
      ));
    }

    let mut conds = vec![self.target_condition(params)];

    if let Some(since) = self.window.since {
      conds.push(format!("{} >= {}", spec.timestamp, params.bind(encode_dt(since))));
    }
    if let Some(until) = self.window.until {
      conds.push(format!("{} <= {}", spec.timestamp, params.bind(encode_dt(until))));
    }
    if let Some(cursor) = self.continue_after {
      conds.push(self.continuation(cursor, params));
    }

    sql.push_str(" WHERE ");
    sql.push_str(&conds.join(" AND "));

    let dir = self.order.keyword();
    sql.push_str(&format!(
      " ORDER BY {} {dir}, {} {dir}",
      spec.timestamp, spec.id
    ));
    if let Some(limit) = self.limit {
      sql.push_str(&format!(" LIMIT {}", params.bind(limit_value(limit))));
    }
    sql
  }

  fn target_condition(&self, params: &mut SqlParams) -> String {
    let column = self.source.spec().key_column(self.key);
    match self.target {
      Target::Actor(actor) => format!("{column} = {}", params.bind(actor.0)),
      Target::SingleIp(key) => {
        format!("{column} = {}", params.bind(key.as_str().to_owned()))
      }
      Target::Range(range) => {
        let start = params.bind(range.start.as_str().to_owned());
        let end = params.bind(range.end.as_str().to_owned());
        format!("{column} >= {start} AND {column} <= {end}")
      }
    }
  }

  /// Rows strictly after `cursor` in the `(timestamp, id, source)` order.
  ///
  /// The source tag is constant within a branch, so the tie on `id` is
  /// inclusive exactly when this source sorts after the cursor's source.
  fn continuation(&self, cursor: EventCursor, params: &mut SqlParams) -> String {
    let spec = self.source.spec();
    let op = self.order.after_op();
    let inclusive = match self.order {
      SortOrder::NewestFirst => self.source.tag() < cursor.source.tag(),
      SortOrder::OldestFirst => self.source.tag() > cursor.source.tag(),
    };
    let id_op = if inclusive { format!("{op}=") } else { op.to_owned() };

    let ts = encode_dt(cursor.timestamp);
    let ts_after = params.bind(ts.clone());
    let ts_equal = params.bind(ts);
    let id = params.bind(cursor.id);
    format!(
      "({ts_col} {op} {ts_after} OR ({ts_col} = {ts_equal} AND {id_col} {id_op} {id}))",
      ts_col = spec.timestamp,
      id_col = spec.id,
    )
  }
}

fn render_expr(column: &ColumnSpec, dialect: Dialect) -> String {
  match column.expr {
    ColumnExpr::Field(field) => field.to_owned(),
    ColumnExpr::Literal(value) => value.to_string(),
    ColumnExpr::Null => dialect.typed_null(column.ty),
  }
}
