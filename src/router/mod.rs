//! Content-key routing: map a key to an ordered set of candidate stores,
//! try them in order, and optionally replicate successful fetches into a
//! set of cache pools. Ported from `storage/router/*.go`.
pub mod config;
pub mod pool;
pub mod range;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub use config::Config;
pub use pool::{Destination, Pool, Rule};
pub use range::Range;

use crate::storage;

/// Upper bound on concurrent cache-replication writes, across all pools.
const CACHE_WORKERS: usize = 100;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not routable")]
    NotRoutable,
    #[error("pool '{0}' is not configured")]
    PoolNotFound(String),
    #[error("invalid router configuration: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(#[from] storage::Error),
}

/// An ordered set of pools plus a cache set, as described in §4.B: `get`
/// walks `lookup` in order, and successful fetches from a non-cache pool
/// are asynchronously replicated into every pool named in `cache`.
pub struct Router {
    pools: Arc<HashMap<String, Pool>>,
    lookup: Vec<String>,
    cache: Arc<HashSet<String>>,
    /// Bounds the number of in-flight replication tasks to roughly
    /// `CACHE_WORKERS`, the way the original hands jobs to a fixed-size
    /// worker group rather than spawning unbounded goroutines.
    cache_slots: Arc<Semaphore>,
}

impl Router {
    pub fn new(
        pools: HashMap<String, Pool>,
        lookup: Vec<String>,
        cache: Vec<String>,
    ) -> Result<Self, Error> {
        for name in lookup.iter().chain(cache.iter()) {
            if !pools.contains_key(name) {
                return Err(Error::PoolNotFound(name.clone()));
            }
        }
        Ok(Self {
            pools: Arc::new(pools),
            lookup,
            cache: Arc::new(cache.into_iter().collect()),
            cache_slots: Arc::new(Semaphore::new(CACHE_WORKERS)),
        })
    }

    /// Combine several routers into one: pools are renamed `"{i}.{name}"`
    /// by the router's position in `routers`, and lookup/cache lists are
    /// concatenated in argument order with the same renaming. A caller
    /// places a local-cache router ahead of a remote one so it is searched
    /// (and written to, for the cache set) first.
    pub fn merge(routers: Vec<Router>) -> Result<Router, Error> {
        let mut pools = HashMap::new();
        let mut lookup = Vec::new();
        let mut cache = Vec::new();
        for (i, router) in routers.into_iter().enumerate() {
            let router_pools = Arc::try_unwrap(router.pools).unwrap_or_else(|shared| {
                // A replication task is mid-flight and still holds a clone;
                // fall back to cloning the pool names it's keyed on is not
                // possible (Pool holds live connections), so this indicates
                // a merge attempted while the sub-router is still active.
                drop(shared);
                HashMap::new()
            });
            for (name, pool) in router_pools {
                pools.insert(format!("{i}.{name}"), pool);
            }
            lookup.extend(router.lookup.into_iter().map(|n| format!("{i}.{n}")));
            cache.extend(router.cache.iter().map(|n| format!("{i}.{n}")));
        }
        Router::new(pools, lookup, cache)
    }

    /// Fetch `key` by walking the lookup list in order. `NotRoutable` (no
    /// rule matched in a pool) or a per-blob `NotFound` falls through to
    /// the next pool; any other error stops the search.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        for name in &self.lookup {
            let pool = self
                .pools
                .get(name)
                .ok_or_else(|| Error::PoolNotFound(name.clone()))?;
            match pool.get(key).await {
                Ok(data) => {
                    self.maybe_replicate(name, key, &data);
                    return Ok(data);
                }
                Err(Error::NotRoutable) | Err(Error::Storage(storage::Error::NotFound)) => {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotRoutable)
    }

    fn maybe_replicate(&self, served_from: &str, key: &str, data: &[u8]) {
        if self.cache.is_empty() || self.cache.contains(served_from) {
            return;
        }
        let Ok(permit) = self.cache_slots.clone().try_acquire_owned() else {
            warn!(key, "cache replication worker group saturated, dropping job");
            return;
        };
        let pools = self.pools.clone();
        let cache = self.cache.clone();
        let key = key.to_string();
        let data = data.to_vec();
        tokio::spawn(async move {
            let _permit = permit;
            for name in cache.iter() {
                let Some(pool) = pools.get(name) else { continue };
                match pool.set(&key, &data).await {
                    Ok(()) => debug!(pool = name, key, "replicated to cache pool"),
                    Err(e) => warn!(pool = name, key, error = %e, "cache replication failed"),
                }
            }
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_rejects_lookup_naming_unknown_pool() {
        let err = Router::new(HashMap::new(), vec!["missing".into()], vec![]).unwrap_err();
        assert!(matches!(err, Error::PoolNotFound(_)));
    }
}
