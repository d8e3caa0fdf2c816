//! The common column set every event source is projected into.
//!
//! Each [`Column`] has a fixed alias and SQL type. A source that lacks a
//! column projects a typed NULL under the same alias, so the three
//! per-source projections line up positionally and type-wise.

use std::{fmt, str::FromStr};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
  Integer,
  Text,
}

impl ColumnType {
  pub fn sql_name(self) -> &'static str {
    match self {
      Self::Integer => "INTEGER",
      Self::Text => "TEXT",
    }
  }
}

/// One column of the unified event projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
  Id,
  /// The numeric tag of the [`EventSource`](crate::source::EventSource).
  Source,
  Timestamp,
  Actor,
  Ip,
  IpHex,
  Xff,
  XffHex,
  Agent,
  CommentId,
  Namespace,
  Title,
  PageId,
  ThisOldid,
  LastOldid,
  Minor,
  ChangeType,
  LogId,
  LogType,
  LogAction,
  LogParams,
  /// Only available through the actor join.
  ActorName,
  /// Only available through the comment join.
  CommentText,
}

impl Column {
  /// Every column a source table can supply, in projection order.
  pub const PROJECTED: [Column; 21] = [
    Self::Id,
    Self::Source,
    Self::Timestamp,
    Self::Actor,
    Self::Ip,
    Self::IpHex,
    Self::Xff,
    Self::XffHex,
    Self::Agent,
    Self::CommentId,
    Self::Namespace,
    Self::Title,
    Self::PageId,
    Self::ThisOldid,
    Self::LastOldid,
    Self::Minor,
    Self::ChangeType,
    Self::LogId,
    Self::LogType,
    Self::LogAction,
    Self::LogParams,
  ];

  /// Columns every query selects regardless of the requested field list;
  /// ordering, continuation and row decoding depend on them.
  pub const REQUIRED: [Column; 3] = [Self::Id, Self::Source, Self::Timestamp];

  pub fn alias(self) -> &'static str {
    match self {
      Self::Id => "id",
      Self::Source => "source",
      Self::Timestamp => "timestamp",
      Self::Actor => "actor",
      Self::Ip => "ip",
      Self::IpHex => "ip_hex",
      Self::Xff => "xff",
      Self::XffHex => "xff_hex",
      Self::Agent => "agent",
      Self::CommentId => "comment_id",
      Self::Namespace => "namespace",
      Self::Title => "title",
      Self::PageId => "page_id",
      Self::ThisOldid => "this_oldid",
      Self::LastOldid => "last_oldid",
      Self::Minor => "minor",
      Self::ChangeType => "change_type",
      Self::LogId => "log_id",
      Self::LogType => "log_type",
      Self::LogAction => "log_action",
      Self::LogParams => "log_params",
      Self::ActorName => "actor_name",
      Self::CommentText => "comment_text",
    }
  }

  pub fn column_type(self) -> ColumnType {
    match self {
      Self::Id
      | Self::Source
      | Self::Actor
      | Self::CommentId
      | Self::Namespace
      | Self::PageId
      | Self::ThisOldid
      | Self::LastOldid
      | Self::Minor
      | Self::ChangeType
      | Self::LogId => ColumnType::Integer,
      Self::Timestamp
      | Self::Ip
      | Self::IpHex
      | Self::Xff
      | Self::XffHex
      | Self::Agent
      | Self::Title
      | Self::LogType
      | Self::LogAction
      | Self::LogParams
      | Self::ActorName
      | Self::CommentText => ColumnType::Text,
    }
  }

  /// The optional join that supplies this column, if any.
  pub fn join(self) -> Option<Join> {
    match self {
      Self::ActorName => Some(Join::Actor),
      Self::CommentText => Some(Join::Comment),
      _ => None,
    }
  }
}

impl FromStr for Column {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Error> {
    Self::PROJECTED
      .into_iter()
      .chain([Self::ActorName, Self::CommentText])
      .find(|c| c.alias() == s)
      .ok_or_else(|| Error::UnknownField(s.to_owned()))
  }
}

impl fmt::Display for Column {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.alias())
  }
}

/// Joins a query may opt into. Both are LEFT joins and never filter rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
  /// `actor` table, supplying [`Column::ActorName`].
  Actor,
  /// `comment` table, supplying [`Column::CommentText`].
  Comment,
}

/// How one source supplies one column of the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnExpr {
  /// A real column on the source table or a joined table.
  Field(&'static str),
  /// A constant, used for the source tag.
  Literal(i64),
  /// The source has no such column; project a NULL of the column's type.
  Null,
}

/// A column as projected by one particular source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
  pub column: Column,
  pub ty:     ColumnType,
  pub expr:   ColumnExpr,
}

impl ColumnSpec {
  pub fn name(&self) -> &'static str { self.column.alias() }

  pub fn source_present(&self) -> bool { !matches!(self.expr, ColumnExpr::Null) }
}
