//! Fixed-width, lexicographically sortable keys for IP addresses.
//!
//! IPv4 addresses encode to 8 uppercase hex digits. IPv6 addresses encode to
//! `v6-` followed by 32 uppercase hex digits. Every key of a family has the
//! same width, so string order is numeric address order, and the `v6-` prefix
//! sorts after every hex digit so the two families never interleave. Range
//! predicates can therefore be written as `key >= start AND key <= end`.

use std::{
  fmt,
  net::{IpAddr, Ipv4Addr, Ipv6Addr},
  str::FromStr,
};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const V6_PREFIX: &str = "v6-";

// ─── RangeKey ────────────────────────────────────────────────────────────────

/// The sortable hex encoding of a single IP address.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RangeKey(String);

impl RangeKey {
  pub fn encode(addr: IpAddr) -> Self {
    match addr {
      IpAddr::V4(v4) => Self(hex::encode_upper(v4.octets())),
      IpAddr::V6(v6) => {
        Self(format!("{V6_PREFIX}{}", hex::encode_upper(v6.octets())))
      }
    }
  }

  /// Parse a textual IP address and encode it.
  pub fn encode_str(addr: &str) -> Result<Self> {
    let parsed = IpAddr::from_str(addr.trim())
      .map_err(|_| Error::InvalidAddress(addr.to_owned()))?;
    Ok(Self::encode(parsed))
  }

  pub fn decode(&self) -> Result<IpAddr> {
    match self.0.strip_prefix(V6_PREFIX) {
      Some(rest) => {
        let octets = decode_octets::<16>(rest, &self.0)?;
        Ok(IpAddr::V6(Ipv6Addr::from(octets)))
      }
      None => {
        let octets = decode_octets::<4>(&self.0, &self.0)?;
        Ok(IpAddr::V4(Ipv4Addr::from(octets)))
      }
    }
  }

  /// Wrap a key read back from storage. No validation is performed.
  pub fn from_stored(key: impl Into<String>) -> Self { Self(key.into()) }

  pub fn as_str(&self) -> &str { &self.0 }

  pub fn is_ipv6(&self) -> bool { self.0.starts_with(V6_PREFIX) }
}

impl FromStr for RangeKey {
  type Err = Error;

  /// Parse an already-encoded key, validating its width and digits.
  fn from_str(s: &str) -> Result<Self> {
    let key = Self(s.to_owned());
    key.decode()?;
    Ok(key)
  }
}

impl fmt::Display for RangeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

fn decode_octets<const N: usize>(digits: &str, whole: &str) -> Result<[u8; N]> {
  // `decode_to_slice` rejects any length other than exactly 2 * N.
  let mut out = [0u8; N];
  hex::decode_to_slice(digits, &mut out)
    .map_err(|_| Error::InvalidAddress(whole.to_owned()))?;
  Ok(out)
}

// ─── KeyRange ────────────────────────────────────────────────────────────────

/// An inclusive `[start, end]` span of range keys covering one CIDR block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
  pub start: RangeKey,
  pub end:   RangeKey,
}

impl KeyRange {
  pub fn encode(net: IpNet) -> Self {
    Self {
      start: RangeKey::encode(net.network()),
      end:   RangeKey::encode(net.broadcast()),
    }
  }

  /// Parse a CIDR block (or a bare address) and encode its bounds.
  ///
  /// The host bits of the address are ignored: `10.0.0.7/24` covers
  /// `10.0.0.0` through `10.0.0.255`.
  pub fn encode_str(cidr: &str) -> Result<Self> {
    Ok(Self::encode(parse_network(cidr)?))
  }

  pub fn contains(&self, key: &RangeKey) -> bool {
    &self.start <= key && key <= &self.end
  }

  /// A `/32` or `/128` block degenerates to a single key.
  pub fn is_single(&self) -> bool { self.start == self.end }
}

/// Parse `addr/prefix` or a bare address (treated as a full-length prefix).
pub fn parse_network(input: &str) -> Result<IpNet> {
  let input = input.trim();
  let invalid = || Error::InvalidAddress(input.to_owned());
  if input.contains('/') {
    IpNet::from_str(input).map_err(|_| invalid())
  } else {
    IpAddr::from_str(input).map(IpNet::from).map_err(|_| invalid())
  }
}
