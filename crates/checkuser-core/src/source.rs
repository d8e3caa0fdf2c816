//! The three event logs and their static table descriptions.
//!
//! Every per-source difference (table name, column names, covering indexes,
//! the column Client-Hints rows reference) is looked up here rather than
//! assembled from a prefix at runtime.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  column::{Column, ColumnExpr, ColumnSpec, Join},
};

/// One of the three append-only event logs.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
  /// Content edits and classic recent-changes rows.
  Change,
  /// Actions tied to a structured log entry elsewhere.
  LogEvent,
  /// Actions with no public log entry, such as failed logins.
  PrivateEvent,
}

/// Which key column a predicate searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyColumn {
  Actor,
  IpHex,
  XffHex,
}

/// The covering index for each searchable key column. Each one leads with
/// the key and continues with the timestamp.
#[derive(Debug, Clone, Copy)]
pub struct SourceIndexes {
  pub actor:     &'static str,
  pub ip_hex:    &'static str,
  pub xff_hex:   &'static str,
  pub timestamp: &'static str,
}

/// Static description of one event log table.
#[derive(Debug, Clone, Copy)]
pub struct SourceSpec {
  pub table:      &'static str,
  pub id:         &'static str,
  pub timestamp:  &'static str,
  pub actor:      &'static str,
  pub ip:         &'static str,
  pub ip_hex:     &'static str,
  pub xff:        &'static str,
  pub xff_hex:    &'static str,
  pub agent:      &'static str,
  pub comment_id: &'static str,
  /// Columns only some sources carry.
  pub optional:   &'static [(Column, &'static str)],
  pub indexes:    SourceIndexes,
  /// The id Client-Hints mapping rows use to reference an event here.
  pub client_hints_reference: &'static str,
}

const CHANGE: SourceSpec = SourceSpec {
  table:      "cu_changes",
  id:         "cuc_id",
  timestamp:  "cuc_timestamp",
  actor:      "cuc_actor",
  ip:         "cuc_ip",
  ip_hex:     "cuc_ip_hex",
  xff:        "cuc_xff",
  xff_hex:    "cuc_xff_hex",
  agent:      "cuc_agent",
  comment_id: "cuc_comment_id",
  optional:   &[
    (Column::Namespace, "cuc_namespace"),
    (Column::Title, "cuc_title"),
    (Column::PageId, "cuc_page_id"),
    (Column::ThisOldid, "cuc_this_oldid"),
    (Column::LastOldid, "cuc_last_oldid"),
    (Column::Minor, "cuc_minor"),
    (Column::ChangeType, "cuc_type"),
  ],
  indexes:    SourceIndexes {
    actor:     "cuc_actor_time",
    ip_hex:    "cuc_ip_hex_time",
    xff_hex:   "cuc_xff_hex_time",
    timestamp: "cuc_timestamp",
  },
  client_hints_reference: "cuc_this_oldid",
};

const LOG_EVENT: SourceSpec = SourceSpec {
  table:      "cu_log_event",
  id:         "cule_id",
  timestamp:  "cule_timestamp",
  actor:      "cule_actor",
  ip:         "cule_ip",
  ip_hex:     "cule_ip_hex",
  xff:        "cule_xff",
  xff_hex:    "cule_xff_hex",
  agent:      "cule_agent",
  comment_id: "cule_comment_id",
  optional:   &[(Column::LogId, "cule_log_id")],
  indexes:    SourceIndexes {
    actor:     "cule_actor_time",
    ip_hex:    "cule_ip_hex_time",
    xff_hex:   "cule_xff_hex_time",
    timestamp: "cule_timestamp",
  },
  client_hints_reference: "cule_log_id",
};

const PRIVATE_EVENT: SourceSpec = SourceSpec {
  table:      "cu_private_event",
  id:         "cupe_id",
  timestamp:  "cupe_timestamp",
  actor:      "cupe_actor",
  ip:         "cupe_ip",
  ip_hex:     "cupe_ip_hex",
  xff:        "cupe_xff",
  xff_hex:    "cupe_xff_hex",
  agent:      "cupe_agent",
  comment_id: "cupe_comment_id",
  optional:   &[
    (Column::Namespace, "cupe_namespace"),
    (Column::Title, "cupe_title"),
    (Column::PageId, "cupe_page"),
    (Column::LogType, "cupe_log_type"),
    (Column::LogAction, "cupe_log_action"),
    (Column::LogParams, "cupe_params"),
  ],
  indexes:    SourceIndexes {
    actor:     "cupe_actor_time",
    ip_hex:    "cupe_ip_hex_time",
    xff_hex:   "cupe_xff_hex_time",
    timestamp: "cupe_timestamp",
  },
  client_hints_reference: "cupe_id",
};

impl EventSource {
  pub const ALL: [EventSource; 3] =
    [Self::Change, Self::LogEvent, Self::PrivateEvent];

  pub fn spec(self) -> &'static SourceSpec {
    match self {
      Self::Change => &CHANGE,
      Self::LogEvent => &LOG_EVENT,
      Self::PrivateEvent => &PRIVATE_EVENT,
    }
  }

  /// Stable numeric tag, projected as [`Column::Source`] and stored as the
  /// Client-Hints reference type.
  pub fn tag(self) -> i64 {
    match self {
      Self::Change => 0,
      Self::LogEvent => 1,
      Self::PrivateEvent => 2,
    }
  }

  pub fn from_tag(tag: i64) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|s| s.tag() == tag)
      .ok_or(Error::UnknownSource(tag))
  }

  /// How this source supplies `column`.
  ///
  /// Joined columns resolve to the joined table's field only when `joined`
  /// says the join is present; otherwise they are NULL like any other
  /// missing column.
  pub fn column_spec(
    self,
    column: Column,
    joined: impl Fn(Join) -> bool,
  ) -> ColumnSpec {
    let spec = self.spec();
    let expr = match column {
      Column::Source => ColumnExpr::Literal(self.tag()),
      Column::ActorName if joined(Join::Actor) => {
        ColumnExpr::Field("actor.actor_name")
      }
      Column::CommentText if joined(Join::Comment) => {
        ColumnExpr::Field("comment.comment_text")
      }
      other => spec.field(other).map_or(ColumnExpr::Null, ColumnExpr::Field),
    };
    ColumnSpec { column, ty: column.column_type(), expr }
  }
}

impl SourceSpec {
  /// The physical column backing `column`, if this table has one.
  pub fn field(&self, column: Column) -> Option<&'static str> {
    let common = match column {
      Column::Id => Some(self.id),
      Column::Timestamp => Some(self.timestamp),
      Column::Actor => Some(self.actor),
      Column::Ip => Some(self.ip),
      Column::IpHex => Some(self.ip_hex),
      Column::Xff => Some(self.xff),
      Column::XffHex => Some(self.xff_hex),
      Column::Agent => Some(self.agent),
      Column::CommentId => Some(self.comment_id),
      _ => None,
    };
    common.or_else(|| {
      self
        .optional
        .iter()
        .find(|(c, _)| *c == column)
        .map(|(_, name)| *name)
    })
  }

  pub fn key_column(&self, key: KeyColumn) -> &'static str {
    match key {
      KeyColumn::Actor => self.actor,
      KeyColumn::IpHex => self.ip_hex,
      KeyColumn::XffHex => self.xff_hex,
    }
  }

  pub fn index_for(&self, key: KeyColumn) -> &'static str {
    match key {
      KeyColumn::Actor => self.indexes.actor,
      KeyColumn::IpHex => self.indexes.ip_hex,
      KeyColumn::XffHex => self.indexes.xff_hex,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tags_round_trip() {
    for source in EventSource::ALL {
      assert_eq!(EventSource::from_tag(source.tag()).unwrap(), source);
    }
    assert!(matches!(
      EventSource::from_tag(9),
      Err(Error::UnknownSource(9))
    ));
  }

  #[test]
  fn missing_columns_project_typed_null() {
    let title = EventSource::LogEvent.column_spec(Column::Title, |_| false);
    assert_eq!(title.expr, ColumnExpr::Null);
    assert!(!title.source_present());
    assert_eq!(title.ty, crate::column::ColumnType::Text);

    let title = EventSource::Change.column_spec(Column::Title, |_| false);
    assert_eq!(title.expr, ColumnExpr::Field("cuc_title"));
  }

  #[test]
  fn joined_columns_depend_on_join() {
    let without = EventSource::Change.column_spec(Column::ActorName, |_| false);
    assert_eq!(without.expr, ColumnExpr::Null);
    let with = EventSource::Change.column_spec(Column::ActorName, |j| j == Join::Actor);
    assert_eq!(with.expr, ColumnExpr::Field("actor.actor_name"));
  }

  #[test]
  fn every_source_has_every_required_column() {
    for source in EventSource::ALL {
      for column in Column::REQUIRED {
        assert!(
          source.column_spec(column, |_| false).source_present(),
          "{source:?} lacks {column}"
        );
      }
    }
  }
}
