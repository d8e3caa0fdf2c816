//! Runtime configuration, deserialised by the job runner from `config.toml`
//! and `CHECKUSER__*` environment variables.

use std::{collections::HashMap, path::PathBuf};

use chrono::{DateTime, Duration, Utc};
use ipnet::IpNet;
use serde::Deserialize;

// ─── Settings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  pub store_path:    PathBuf,
  /// The domain whose event logs live in this store.
  pub domain:        String,
  #[serde(default)]
  pub cidr_limits:   CidrLimits,
  #[serde(default)]
  pub retention:     RetentionConfig,
  #[serde(default)]
  pub central_index: CentralIndexConfig,
}

// ─── CIDR limits ─────────────────────────────────────────────────────────────

/// The broadest range (shortest prefix) accepted as a query target, per
/// address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CidrLimits {
  pub ipv4: u8,
  pub ipv6: u8,
}

impl Default for CidrLimits {
  fn default() -> Self { Self { ipv4: 16, ipv6: 19 } }
}

impl CidrLimits {
  pub fn min_prefix(&self, net: &IpNet) -> u8 {
    match net {
      IpNet::V4(_) => self.ipv4,
      IpNet::V6(_) => self.ipv6,
    }
  }

  pub fn allows(&self, net: &IpNet) -> bool {
    net.prefix_len() >= self.min_prefix(net)
  }
}

// ─── Retention ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
  /// How long events are kept when a domain has no override.
  pub max_age_days:  u32,
  pub per_domain:    HashMap<String, u32>,
  /// Upper bound on rows removed per event log per purge call.
  pub batch_size:    usize,
  /// A purge lock older than this is considered abandoned.
  pub lock_ttl_secs: u64,
}

impl Default for RetentionConfig {
  fn default() -> Self {
    Self {
      max_age_days:  90,
      per_domain:    HashMap::new(),
      batch_size:    500,
      lock_ttl_secs: 300,
    }
  }
}

impl RetentionConfig {
  pub fn max_age(&self, domain: &str) -> Duration {
    let days = self
      .per_domain
      .get(domain)
      .copied()
      .unwrap_or(self.max_age_days);
    Duration::days(i64::from(days))
  }

  /// Events strictly older than this instant are expired for `domain`.
  pub fn cutoff(&self, domain: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    now - self.max_age(domain)
  }

  pub fn lock_ttl(&self) -> Duration {
    Duration::seconds(i64::try_from(self.lock_ttl_secs).unwrap_or(i64::MAX))
  }
}

// ─── Central index ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CentralIndexConfig {
  pub lookup_batch_size: usize,
  pub purge_batch_size:  usize,
  /// CIDR blocks whose temporary-account activity is never indexed.
  pub excluded_ranges:   Vec<String>,
}

impl Default for CentralIndexConfig {
  fn default() -> Self {
    Self {
      lookup_batch_size: 1000,
      purge_batch_size:  500,
      excluded_ranges:   Vec::new(),
    }
  }
}
