//! Classification of free-text investigation targets.
//!
//! A target is an IP address, a CIDR block, or an actor name. Addresses and
//! blocks become range keys; names go through an [`IdentityLookup`]. Whether
//! the primary or forwarded-for address is searched is the query's choice,
//! not the resolver's.

use std::{future::Future, net::IpAddr, str::FromStr};

use crate::{
  Error, Result,
  config::CidrLimits,
  event::ActorId,
  range_key::{KeyRange, RangeKey, parse_network},
  source::KeyColumn,
};

// ─── Identity lookup ─────────────────────────────────────────────────────────

/// Resolves actor names to stable ids. Implemented by storage backends.
pub trait IdentityLookup: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Returns `None` when no identity has this name.
  fn actor_id<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<ActorId>, Self::Error>> + Send + 'a;
}

// ─── Target ──────────────────────────────────────────────────────────────────

/// A resolved target, ready to become a per-source predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  SingleIp(RangeKey),
  Range(KeyRange),
  Actor(ActorId),
}

impl Target {
  /// The key column searched for this target. Address targets search the
  /// forwarded-for key when `forwarded_for` is set.
  pub fn key_column(&self, forwarded_for: bool) -> KeyColumn {
    match self {
      Self::Actor(_) => KeyColumn::Actor,
      Self::SingleIp(_) | Self::Range(_) if forwarded_for => KeyColumn::XffHex,
      Self::SingleIp(_) | Self::Range(_) => KeyColumn::IpHex,
    }
  }
}

// ─── Resolver ────────────────────────────────────────────────────────────────

pub struct TargetResolver<L> {
  identities: L,
  limits:     CidrLimits,
}

impl<L: IdentityLookup> TargetResolver<L> {
  pub fn new(identities: L, limits: CidrLimits) -> Self {
    Self { identities, limits }
  }

  /// Classify `target` without consulting the identity lookup.
  ///
  /// Returns `Ok(None)` when the input is not address-shaped and should be
  /// treated as an actor name.
  pub fn classify_address(&self, target: &str) -> Result<Option<Target>> {
    let target = target.trim();
    if target.contains('/') {
      let net = parse_network(target)?;
      if !self.limits.allows(&net) {
        return Err(Error::InvalidTarget(format!(
          "{target} is broader than the /{} limit",
          self.limits.min_prefix(&net)
        )));
      }
      return Ok(Some(Target::Range(KeyRange::encode(net))));
    }
    match IpAddr::from_str(target) {
      Ok(addr) => Ok(Some(Target::SingleIp(RangeKey::encode(addr)))),
      Err(_) => Ok(None),
    }
  }

  pub async fn resolve(&self, target: &str) -> Result<Target> {
    let trimmed = target.trim();
    if trimmed.is_empty() {
      return Err(Error::InvalidTarget("empty target".into()));
    }
    if let Some(resolved) = self.classify_address(trimmed)? {
      return Ok(resolved);
    }

    let actor = self
      .identities
      .actor_id(trimmed)
      .await
      .map_err(|e| Error::Identity(Box::new(e)))?;
    actor
      .map(Target::Actor)
      .ok_or_else(|| Error::InvalidTarget(format!("no actor named {trimmed:?}")))
  }

  /// Resolve a batch of targets, dropping the invalid ones.
  ///
  /// Lookup failures still abort the batch; only "no predicate" outcomes are
  /// skipped.
  pub async fn resolve_all<'t>(
    &self,
    targets: impl IntoIterator<Item = &'t str>,
  ) -> Result<Vec<(String, Target)>> {
    let mut resolved = Vec::new();
    for target in targets {
      match self.resolve(target).await {
        Ok(t) => resolved.push((target.trim().to_owned(), t)),
        Err(e) if e.is_invalid_target() => {
          tracing::debug!(input = target, error = %e, "skipping target");
        }
        Err(e) => return Err(e),
      }
    }
    Ok(resolved)
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::HashMap, convert::Infallible};

  use super::*;

  struct Names(HashMap<&'static str, i64>);

  impl IdentityLookup for Names {
    type Error = Infallible;

    async fn actor_id<'a>(
      &'a self,
      name: &'a str,
    ) -> Result<Option<ActorId>, Infallible> {
      Ok(self.0.get(name).copied().map(ActorId))
    }
  }

  fn resolver() -> TargetResolver<Names> {
    TargetResolver::new(
      Names(HashMap::from([("Alice", 7)])),
      CidrLimits { ipv4: 16, ipv6: 19 },
    )
  }

  #[tokio::test]
  async fn slash_24_within_limit_is_range() {
    let target = resolver().resolve("10.0.0.0/24").await.unwrap();
    let Target::Range(range) = target else {
      panic!("expected a range, got {target:?}");
    };
    assert_eq!(range.start, RangeKey::encode_str("10.0.0.0").unwrap());
    assert_eq!(range.end, RangeKey::encode_str("10.0.0.255").unwrap());
  }

  #[tokio::test]
  async fn slash_8_beyond_limit_is_invalid() {
    let err = resolver().resolve("10.0.0.0/8").await.unwrap_err();
    assert!(matches!(err, Error::InvalidTarget(_)));
    assert!(err.is_invalid_target());
  }

  #[tokio::test]
  async fn ipv6_limit_is_separate() {
    let r = resolver();
    assert!(matches!(
      r.resolve("2001:db8::/32").await.unwrap(),
      Target::Range(_)
    ));
    assert!(r.resolve("2001:db8::/18").await.unwrap_err().is_invalid_target());
  }

  #[tokio::test]
  async fn bare_address_is_single_ip() {
    let target = resolver().resolve(" 192.0.2.1 ").await.unwrap();
    assert_eq!(
      target,
      Target::SingleIp(RangeKey::encode_str("192.0.2.1").unwrap())
    );
  }

  #[tokio::test]
  async fn full_prefix_is_single_key_range() {
    let Target::Range(range) = resolver().resolve("192.0.2.1/32").await.unwrap()
    else {
      panic!("expected a range");
    };
    assert!(range.is_single());
  }

  #[tokio::test]
  async fn names_go_through_identity_lookup() {
    let r = resolver();
    assert_eq!(r.resolve("Alice").await.unwrap(), Target::Actor(ActorId(7)));
    assert!(matches!(
      r.resolve("Mallory").await.unwrap_err(),
      Error::InvalidTarget(_)
    ));
  }

  #[tokio::test]
  async fn malformed_cidr_is_invalid_address() {
    let err = resolver().resolve("10.0.0.0/40").await.unwrap_err();
    assert!(matches!(err, Error::InvalidAddress(_)));
  }

  #[tokio::test]
  async fn batch_skips_invalid_targets() {
    let resolved = resolver()
      .resolve_all(["Alice", "10.0.0.0/8", "", "Nobody", "10.1.0.0/16"])
      .await
      .unwrap();
    let names: Vec<&str> = resolved.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["Alice", "10.1.0.0/16"]);
  }

  #[test]
  fn forwarded_for_switches_key_column() {
    let ip = Target::SingleIp(RangeKey::encode_str("10.0.0.1").unwrap());
    assert_eq!(ip.key_column(false), KeyColumn::IpHex);
    assert_eq!(ip.key_column(true), KeyColumn::XffHex);
    assert_eq!(Target::Actor(ActorId(1)).key_column(true), KeyColumn::Actor);
  }
}
