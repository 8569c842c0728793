//! Hop geolocation
//!
//! `GeoResolver` turns an ordered hop list into an ordered coordinate list,
//! asking the backend only about addresses it has not seen before.

pub mod cache;
pub mod lookup;

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use cache::CoordinateCache;
use lookup::{GeoLookup, LookupError};

/// A hop address as printed by the probe. Equality is exact text match.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Longitude / latitude in degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GeoCoordinate {
    pub lon: f64,
    pub lat: f64,
}

impl GeoCoordinate {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon: lon.clamp(-180.0, 180.0),
            lat: lat.clamp(-90.0, 90.0),
        }
    }
}

impl fmt::Display for GeoCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.lon, self.lat)
    }
}

/// The batch lookup failed. The cache was left untouched; `cached` holds
/// whatever the cache could already place, in hop order.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ResolveFailure {
    #[source]
    pub error: LookupError,
    pub cached: Vec<GeoCoordinate>,
}

pub struct GeoResolver {
    lookup: Box<dyn GeoLookup>,
    cache: Arc<dyn CoordinateCache>,
}

impl GeoResolver {
    pub fn new(lookup: Box<dyn GeoLookup>, cache: Arc<dyn CoordinateCache>) -> Self {
        Self { lookup, cache }
    }

    pub fn cache(&self) -> &Arc<dyn CoordinateCache> {
        &self.cache
    }

    /// Coordinates for `addresses`, in the same order. Unresolvable
    /// addresses are dropped, not padded.
    pub fn resolve(&self, addresses: &[Address]) -> Result<Vec<GeoCoordinate>, ResolveFailure> {
        let mut known: HashMap<Address, Option<GeoCoordinate>> = HashMap::new();
        let mut queued: HashSet<&Address> = HashSet::new();
        let mut needs_lookup = Vec::new();

        for addr in addresses {
            if known.contains_key(addr) || queued.contains(addr) {
                continue;
            }
            match self.cache.get(addr) {
                Some(value) => {
                    known.insert(addr.clone(), value);
                }
                None => {
                    queued.insert(addr);
                    needs_lookup.push(addr.clone());
                }
            }
        }

        if !needs_lookup.is_empty() {
            info!(
                total = addresses.len(),
                uncached = needs_lookup.len(),
                "resolving hop locations"
            );
            match self.lookup.lookup_batch(&needs_lookup) {
                Ok(results) if results.len() == needs_lookup.len() => {
                    for (addr, value) in needs_lookup.into_iter().zip(results) {
                        self.cache.put(addr.clone(), value);
                        known.insert(addr, value);
                    }
                }
                Ok(results) => {
                    let error = LookupError::Malformed(format!(
                        "expected {} results, got {}",
                        needs_lookup.len(),
                        results.len()
                    ));
                    return Err(failure(error, addresses, &known));
                }
                Err(error) => return Err(failure(error, addresses, &known)),
            }
        }

        Ok(assemble(addresses, &known))
    }
}

fn failure(
    error: LookupError,
    addresses: &[Address],
    known: &HashMap<Address, Option<GeoCoordinate>>,
) -> ResolveFailure {
    warn!(%error, "hop geolocation failed");
    ResolveFailure {
        error,
        cached: assemble(addresses, known),
    }
}

fn assemble(
    addresses: &[Address],
    known: &HashMap<Address, Option<GeoCoordinate>>,
) -> Vec<GeoCoordinate> {
    addresses
        .iter()
        .filter_map(|a| known.get(a).copied().flatten())
        .collect()
}
