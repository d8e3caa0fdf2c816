//! Identifiers and result rows produced by the event query engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{range_key::RangeKey, source::EventSource};

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// A stable identity id. Anonymous (IP-only) actors have one too.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActorId(pub i64);

impl fmt::Display for ActorId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

/// The small integer a domain is known by inside the central index.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WikiId(pub i64);

impl fmt::Display for WikiId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

// ─── Field values ────────────────────────────────────────────────────────────

/// A single untyped value, as returned by the scalar fetch operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
  Blob(Vec<u8>),
}

impl FieldValue {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Self::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// One event from any source, in the common column set.
///
/// `source`, `id` and `timestamp` are always populated. Every other field is
/// `None` either because the source has no such column or because the query
/// did not select it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRow {
  pub source:       EventSource,
  pub id:           i64,
  pub timestamp:    DateTime<Utc>,
  pub actor:        Option<ActorId>,
  pub ip:           Option<String>,
  pub ip_hex:       Option<RangeKey>,
  pub xff:          Option<String>,
  pub xff_hex:      Option<RangeKey>,
  pub agent:        Option<String>,
  pub comment_id:   Option<i64>,
  pub namespace:    Option<i64>,
  pub title:        Option<String>,
  pub page_id:      Option<i64>,
  pub this_oldid:   Option<i64>,
  pub last_oldid:   Option<i64>,
  pub minor:        Option<bool>,
  pub change_type:  Option<i64>,
  pub log_id:       Option<i64>,
  pub log_type:     Option<String>,
  pub log_action:   Option<String>,
  pub log_params:   Option<serde_json::Value>,
  pub actor_name:   Option<String>,
  pub comment_text: Option<String>,
}

impl EventRow {
  /// A row with only the always-selected columns populated.
  pub fn new(source: EventSource, id: i64, timestamp: DateTime<Utc>) -> Self {
    Self {
      source,
      id,
      timestamp,
      actor: None,
      ip: None,
      ip_hex: None,
      xff: None,
      xff_hex: None,
      agent: None,
      comment_id: None,
      namespace: None,
      title: None,
      page_id: None,
      this_oldid: None,
      last_oldid: None,
      minor: None,
      change_type: None,
      log_id: None,
      log_type: None,
      log_action: None,
      log_params: None,
      actor_name: None,
      comment_text: None,
    }
  }

  /// The keyset position of this row, for fetching the next page.
  pub fn cursor(&self) -> EventCursor {
    EventCursor {
      timestamp: self.timestamp,
      id:        self.id,
      source:    self.source,
    }
  }
}

/// A position in the `(timestamp, id, source)` total order of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCursor {
  pub timestamp: DateTime<Utc>,
  pub id:        i64,
  pub source:    EventSource,
}
