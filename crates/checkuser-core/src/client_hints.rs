//! Client-Hints metadata freed by purges.
//!
//! Browser hint name/value pairs are deduplicated across events, so a value
//! row can only go once nothing references it. Purging therefore runs in two
//! phases: the event purger collects the references it freed into a
//! [`ClientHintsReferenceIds`], and a [`ClientHintsMetadata`] implementation
//! first deletes the mapping rows for those references, then sweeps values
//! left without any mapping.
//!
//! A purge that fails between deleting events and deleting their mappings
//! loses the in-memory references. The lock-free mapping sweep finds those
//! rows again by checking each mapping against its event log.

use std::{
  collections::{BTreeMap, BTreeSet},
  future::Future,
};

use serde::Serialize;

use crate::source::EventSource;

/// Reference ids freed by a purge, grouped by the source they came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHintsReferenceIds {
  by_source: BTreeMap<EventSource, BTreeSet<i64>>,
}

impl ClientHintsReferenceIds {
  pub fn new() -> Self { Self::default() }

  pub fn add(&mut self, source: EventSource, id: i64) {
    self.by_source.entry(source).or_default().insert(id);
  }

  pub fn extend(
    &mut self,
    source: EventSource,
    ids: impl IntoIterator<Item = i64>,
  ) {
    self.by_source.entry(source).or_default().extend(ids);
  }

  pub fn merge(&mut self, other: ClientHintsReferenceIds) {
    for (source, ids) in other.by_source {
      self.extend(source, ids);
    }
  }

  pub fn ids(&self, source: EventSource) -> impl Iterator<Item = i64> + '_ {
    self.by_source.get(&source).into_iter().flatten().copied()
  }

  pub fn iter(&self) -> impl Iterator<Item = (EventSource, &BTreeSet<i64>)> {
    self.by_source.iter().map(|(s, ids)| (*s, ids))
  }

  pub fn len(&self) -> usize { self.by_source.values().map(BTreeSet::len).sum() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Rows removed by one metadata cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientHintsPurgeCounts {
  pub mappings_deleted:          usize,
  /// Mappings whose event was already gone, found by the sweep.
  pub orphaned_mappings_deleted: usize,
  pub orphaned_values_deleted:   usize,
}

impl ClientHintsPurgeCounts {
  pub fn total(&self) -> usize {
    self.mappings_deleted + self.orphaned_mappings_deleted + self.orphaned_values_deleted
  }
}

/// The metadata manager the retention purger hands freed references to.
pub trait ClientHintsMetadata: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Delete the mapping rows for `refs`. References with no rows are
  /// treated as already cleaned up.
  fn delete_mappings<'a>(
    &'a self,
    refs: &'a ClientHintsReferenceIds,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Delete up to `max_rows` mapping rows whose event no longer exists.
  ///
  /// Mappings must be written after their event commits; one recorded ahead
  /// of its event is indistinguishable from a leaked one.
  fn delete_orphaned_mappings(
    &self,
    max_rows: usize,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Delete up to `max_rows` values that no mapping row references.
  ///
  /// Safe to run concurrently with purges: it only removes rows already
  /// unreferenced.
  fn delete_orphaned_values(
    &self,
    max_rows: usize,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}
