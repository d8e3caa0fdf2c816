//! SQLite backend for the CheckUser event-query and retention engine.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. The store owns the three event
//! logs of one domain plus the cross-domain central index tables.

mod client_hints;
mod encode;
mod lock;
mod projection;
mod schema;
mod store;

pub mod central_index;
pub mod error;
pub mod purge;
pub mod union;

pub use central_index::{ActiveActors, CentralIndex};
pub use error::{Error, Result};
pub use lock::LockToken;
pub use projection::Dialect;
pub use purge::{LogPurge, PurgeReport, RetentionPurger};
pub use store::SqliteStore;
pub use union::{Fields, SortOrder, TimeWindow, UnionQuery};

#[cfg(test)]
mod tests;
