//! Error type for `checkuser-store-sqlite`.

use checkuser_core::column::Column;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] checkuser_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A projected column held a value of the wrong storage class.
  #[error("column {column} holds unexpected value {value}")]
  UnexpectedType { column: Column, value: String },

  #[error("row is missing required column {0}")]
  MissingColumn(Column),

  /// The Client-Hints metadata manager failed during a purge.
  #[error("metadata cleanup failed: {0}")]
  Metadata(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
