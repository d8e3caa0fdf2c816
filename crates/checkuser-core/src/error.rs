//! Error types for `checkuser-core`.

use thiserror::Error;

use crate::source::EventSource;

#[derive(Debug, Error)]
pub enum Error {
  /// The input is not an IP address, CIDR range or range key.
  #[error("invalid address: {0:?}")]
  InvalidAddress(String),

  /// The input parsed, but cannot be used as a query target (too-broad
  /// range, unknown actor name, empty input).
  #[error("invalid target: {0}")]
  InvalidTarget(String),

  /// Per-source projections disagree in width; a caller bug.
  #[error(
    "malformed projection: {event_source:?} projects {found} columns, \
     expected {expected}"
  )]
  MalformedProjection {
    event_source: EventSource,
    expected:     usize,
    found:        usize,
  },

  #[error("unknown field: {0:?}")]
  UnknownField(String),

  #[error("unknown event source tag: {0}")]
  UnknownSource(i64),

  /// The identity-lookup collaborator failed.
  #[error("identity lookup failed: {0}")]
  Identity(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// True for errors that mean "no predicate can be built for this target".
  ///
  /// Batch callers skip such targets rather than aborting the batch.
  pub fn is_invalid_target(&self) -> bool {
    matches!(self, Self::InvalidAddress(_) | Self::InvalidTarget(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
