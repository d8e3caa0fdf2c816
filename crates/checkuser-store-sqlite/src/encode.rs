//! Encoding and decoding helpers between domain types and the plain values
//! stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 UTC strings with a fixed microsecond
//! precision, so string comparison in SQL is chronological comparison.

use chrono::{DateTime, SecondsFormat, Utc};
use checkuser_core::{
  column::Column,
  event::{ActorId, EventRow, FieldValue},
  range_key::RangeKey,
  source::EventSource,
};
use rusqlite::types::Value;

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Values ──────────────────────────────────────────────────────────────────

pub fn field_value(value: Value) -> FieldValue {
  match value {
    Value::Null => FieldValue::Null,
    Value::Integer(i) => FieldValue::Integer(i),
    Value::Real(r) => FieldValue::Real(r),
    Value::Text(s) => FieldValue::Text(s),
    Value::Blob(b) => FieldValue::Blob(b),
  }
}

pub fn limit_value(n: usize) -> Value {
  Value::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

fn unexpected(column: Column, value: &FieldValue) -> Error {
  Error::UnexpectedType { column, value: format!("{value:?}") }
}

fn int(column: Column, value: FieldValue) -> Result<Option<i64>> {
  match value {
    FieldValue::Null => Ok(None),
    FieldValue::Integer(i) => Ok(Some(i)),
    other => Err(unexpected(column, &other)),
  }
}

fn text(column: Column, value: FieldValue) -> Result<Option<String>> {
  match value {
    FieldValue::Null => Ok(None),
    FieldValue::Text(s) => Ok(Some(s)),
    other => Err(unexpected(column, &other)),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Values read from one row of a union query, paired with their columns.
pub struct RawEventRow {
  pub fields: Vec<(Column, FieldValue)>,
}

impl RawEventRow {
  pub fn read(row: &rusqlite::Row<'_>, columns: &[Column]) -> rusqlite::Result<Self> {
    let fields = columns
      .iter()
      .enumerate()
      .map(|(i, column)| Ok((*column, field_value(row.get::<_, Value>(i)?))))
      .collect::<rusqlite::Result<_>>()?;
    Ok(Self { fields })
  }

  fn take(&mut self, column: Column) -> Result<FieldValue> {
    let pos = self
      .fields
      .iter()
      .position(|(c, _)| *c == column)
      .ok_or(Error::MissingColumn(column))?;
    Ok(self.fields.swap_remove(pos).1)
  }

  /// Consume the row, keeping only the column a scalar fetch appended.
  pub fn into_fetched(mut self, column: Column) -> Result<FieldValue> {
    match self.fields.pop() {
      Some((fetched, value)) if fetched == column => Ok(value),
      _ => Err(Error::MissingColumn(column)),
    }
  }

  pub fn into_event_row(mut self) -> Result<EventRow> {
    let source = int(Column::Source, self.take(Column::Source)?)?
      .ok_or(Error::MissingColumn(Column::Source))?;
    let id = int(Column::Id, self.take(Column::Id)?)?
      .ok_or(Error::MissingColumn(Column::Id))?;
    let timestamp = text(Column::Timestamp, self.take(Column::Timestamp)?)?
      .ok_or(Error::MissingColumn(Column::Timestamp))?;

    let mut row =
      EventRow::new(EventSource::from_tag(source)?, id, decode_dt(&timestamp)?);

    for (column, value) in self.fields {
      match column {
        Column::Id | Column::Source | Column::Timestamp => {}
        Column::Actor => row.actor = int(column, value)?.map(ActorId),
        Column::Ip => row.ip = text(column, value)?,
        Column::IpHex => row.ip_hex = text(column, value)?.map(RangeKey::from_stored),
        Column::Xff => row.xff = text(column, value)?,
        Column::XffHex => {
          row.xff_hex = text(column, value)?.map(RangeKey::from_stored)
        }
        Column::Agent => row.agent = text(column, value)?,
        Column::CommentId => row.comment_id = int(column, value)?,
        Column::Namespace => row.namespace = int(column, value)?,
        Column::Title => row.title = text(column, value)?,
        Column::PageId => row.page_id = int(column, value)?,
        Column::ThisOldid => row.this_oldid = int(column, value)?,
        Column::LastOldid => row.last_oldid = int(column, value)?,
        Column::Minor => row.minor = int(column, value)?.map(|m| m != 0),
        Column::ChangeType => row.change_type = int(column, value)?,
        Column::LogId => row.log_id = int(column, value)?,
        Column::LogType => row.log_type = text(column, value)?,
        Column::LogAction => row.log_action = text(column, value)?,
        Column::LogParams => {
          row.log_params = text(column, value)?
            .map(|json| serde_json::from_str(&json))
            .transpose()?
        }
        Column::ActorName => row.actor_name = text(column, value)?,
        Column::CommentText => row.comment_text = text(column, value)?,
      }
    }

    Ok(row)
  }
}
