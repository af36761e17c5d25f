//! Pools, rules, and destinations, ported from `storage/router/pool.go` and
//! `storage/router/rule.go`. A [`Pool`] is an ordered set of [`Rule`]s; a
//! rule pairs a [`super::range::Range`] with a [`Destination`] URL.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use super::range::Range;
use super::Error;
use crate::storage;

const DEFAULT_RETRIES: usize = 3;
const SUPPORTED_SCHEMES: &[&str] = &["ardb", "zdb", "redis"];

/// A parsed route destination: `<scheme>://[password@]host:port`.
#[derive(Debug, Clone)]
pub struct Destination {
    url: url::Url,
}

impl Destination {
    pub fn parse(s: &str) -> Result<Self, Error> {
        let url = url::Url::parse(s)
            .map_err(|e| Error::Config(format!("invalid destination {s:?}: {e}")))?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(Error::Config(format!(
                "unsupported destination scheme {:?}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::Config(format!("destination {s:?} has no host")));
        }
        Ok(Self { url })
    }

    fn endpoint(&self) -> storage::Endpoint {
        let password = if !self.url.username().is_empty() {
            Some(self.url.username().to_string())
        } else {
            self.url.password().map(str::to_string)
        };
        storage::Endpoint {
            host: self.url.host_str().unwrap_or_default().to_string(),
            port: self.url.port().unwrap_or(16379),
            password,
        }
    }

    fn key(&self) -> String {
        self.url.to_string()
    }
}

impl PartialEq for Destination {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}
impl Eq for Destination {}

#[derive(Debug, Clone)]
pub struct Rule {
    pub range: Range,
    pub destination: Destination,
}

/// A set of routing rules, tried in definition order. Connections to each
/// distinct destination are created lazily and cached, the way
/// `ScanPool.getPool` caches one `*redis.Pool` per [`Destination`].
pub struct Pool {
    rules: Vec<Rule>,
    clients: AsyncMutex<HashMap<String, Arc<storage::Client>>>,
}

impl Pool {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            clients: AsyncMutex::new(HashMap::new()),
        }
    }

    fn matching(&self, key: &str) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.range.contains(key)).collect()
    }

    async fn client_for(&self, dest: &Destination) -> Result<Arc<storage::Client>, Error> {
        let cache_key = dest.key();
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&cache_key) {
            return Ok(client.clone());
        }
        let client = Arc::new(storage::Client::new(dest.endpoint()).map_err(Error::Storage)?);
        clients.insert(cache_key, client.clone());
        Ok(client)
    }

    /// Try every rule whose range matches `key`, in definition order. A
    /// `NotFound` from a destination short-circuits (the blob simply isn't
    /// in this pool); transport errors fall through to the next matching
    /// destination in the pool, retrying transient errors up to
    /// [`DEFAULT_RETRIES`] times on the same destination first.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        let matching = self.matching(key);
        if matching.is_empty() {
            return Err(Error::NotRoutable);
        }
        let mut last_transport = None;
        for rule in matching {
            let client = match self.client_for(&rule.destination).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(destination = %rule.destination.key(), error = %e, "failed to build client");
                    last_transport = Some(e);
                    continue;
                }
            };
            match Self::get_with_retry(&client, key).await {
                Ok(data) => return Ok(data),
                Err(Error::Storage(storage::Error::NotFound)) => {
                    return Err(Error::Storage(storage::Error::NotFound));
                }
                Err(e) => {
                    warn!(destination = %rule.destination.key(), error = %e, "destination failed, trying next in pool");
                    last_transport = Some(e);
                }
            }
        }
        Err(last_transport.unwrap_or(Error::NotRoutable))
    }

    async fn get_with_retry(client: &storage::Client, key: &str) -> Result<Vec<u8>, Error> {
        let mut last = None;
        for attempt in 0..DEFAULT_RETRIES {
            match client.get(key.as_bytes()).await {
                Ok(data) => return Ok(data),
                Err(storage::Error::NotFound) => {
                    return Err(Error::Storage(storage::Error::NotFound))
                }
                Err(e) => {
                    warn!(attempt, error = %e, "transient error fetching block");
                    last = Some(e);
                }
            }
        }
        Err(Error::Storage(last.unwrap()))
    }

    /// Write `(key, data)` into the first destination matching `key`. Used
    /// for cache replication; errors are the caller's to log and swallow.
    pub async fn set(&self, key: &str, data: &[u8]) -> Result<(), Error> {
        let rule = self
            .matching(key)
            .into_iter()
            .next()
            .ok_or(Error::NotRoutable)?;
        let client = self.client_for(&rule.destination).await?;
        client.set(key.as_bytes(), data).await.map_err(Error::Storage)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn destination_rejects_unsupported_scheme() {
        assert!(Destination::parse("http://host:1234").is_err());
        assert!(Destination::parse("ardb://host:1234").is_ok());
    }

    #[test]
    fn destination_extracts_password_from_user_component() {
        let d = Destination::parse("ardb://secret@host:1234").unwrap();
        assert_eq!(d.endpoint().password.as_deref(), Some("secret"));
    }
}
