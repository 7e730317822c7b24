//! IP geolocation results, the lookup seam, and the cache-first resolver.

use std::{future::Future, net::IpAddr, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result, store::WardenStore};

/// A cached geo result is served for this long after it was stored.
pub const GEO_CACHE_TTL: Duration = Duration::days(30);

/// City/country label used for addresses that never leave the LAN.
pub const LOCAL_NETWORK: &str = "Local Network";

/// Geographic attributes of an IP address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoResult {
  pub ip:        String,
  pub latitude:  f64,
  pub longitude: f64,
  pub city:      String,
  pub country:   String,
}

impl GeoResult {
  /// The synthetic result for private, loopback and link-local addresses.
  pub fn local_network(ip: impl Into<String>) -> Self {
    Self {
      ip:        ip.into(),
      latitude:  0.0,
      longitude: 0.0,
      city:      LOCAL_NETWORK.to_owned(),
      country:   LOCAL_NETWORK.to_owned(),
    }
  }
}

/// Whether an entry stored at `cached_at` may still be served at `as_of`.
pub fn is_fresh(cached_at: DateTime<Utc>, as_of: DateTime<Utc>) -> bool {
  as_of - cached_at <= GEO_CACHE_TTL
}

/// True for addresses that an external geo service cannot place.
pub fn is_local_address(ip: IpAddr) -> bool {
  match ip {
    IpAddr::V4(v4) => {
      v4.is_private()
        || v4.is_loopback()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
    }
    IpAddr::V6(v6) => {
      let first = v6.segments()[0];
      v6.is_loopback()
        || v6.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local
        || (first & 0xffc0) == 0xfe80 // link local
    }
  }
}

// ─── Lookup seam ─────────────────────────────────────────────────────────────

/// An external geolocation service, consulted on cache misses.
pub trait GeoLocator: Send + Sync {
  fn lookup(&self, ip: IpAddr) -> impl Future<Output = Result<GeoResult>> + Send + '_;
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Cache-first geo resolution: fresh cache entry, else local-network
/// shortcut, else external lookup written back to the cache.
pub struct GeoResolver<S, L> {
  store:   Arc<S>,
  locator: Arc<L>,
}

impl<S, L> Clone for GeoResolver<S, L> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), locator: Arc::clone(&self.locator) }
  }
}

impl<S, L> GeoResolver<S, L>
where
  S: WardenStore,
  L: GeoLocator,
{
  pub fn new(store: Arc<S>, locator: Arc<L>) -> Self { Self { store, locator } }

  pub async fn resolve(&self, ip: &str) -> Result<GeoResult> {
    let addr: IpAddr = ip.trim().parse().map_err(|_| Error::InvalidIp(ip.to_owned()))?;

    if let Some(hit) = self.store.resolve_geo(ip, None).await.map_err(Error::store)? {
      debug!(ip, "geo cache hit");
      return Ok(hit);
    }

    let geo = if is_local_address(addr) {
      GeoResult::local_network(ip)
    } else {
      let mut found = self.locator.lookup(addr).await?;
      found.ip = ip.to_owned();
      found
    };

    self.store.store_geo(geo.clone()).await.map_err(Error::store)?;
    Ok(geo)
  }
}
