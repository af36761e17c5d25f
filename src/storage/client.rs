//! A pooled connection to a single block store endpoint.
//!
//! Dialing goes through [`super::dns`] rather than the `redis` crate's own
//! resolver, so the cache/TTL/random-pick behavior in `dial.go` is
//! preserved. Pooling follows `deadpool::managed::Manager`: a manager that
//! knows how to create and recycle one connection type.
use std::time::Duration;

use deadpool::managed::{Metrics, Pool, PoolError, RecycleError, RecycleResult};
use redis::aio::Connection;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::debug;

use super::{dns, Error};

const IDLE_PING_THRESHOLD: Duration = Duration::from_secs(10);
const POOL_MAX_ACTIVE: usize = 10;

/// A store endpoint: host, port, and an optional password. Parsing the URL
/// form (`scheme://password@host:port`) is the router's job (see
/// `router::Destination`); this type just holds the resolved pieces.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

pub(crate) struct ConnectionManager {
    endpoint: Endpoint,
}

#[async_trait::async_trait]
impl deadpool::managed::Manager for ConnectionManager {
    type Type = Connection;
    type Error = Error;

    async fn create(&self) -> Result<Connection, Error> {
        let ip = dns::resolve(&self.endpoint.host)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        debug!(host = %self.endpoint.host, %ip, "dialing block store");
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(ip.to_string(), self.endpoint.port),
            redis: RedisConnectionInfo {
                db: 0,
                username: None,
                password: self.endpoint.password.clone(),
            },
        };
        let client = redis::Client::open(info).map_err(|e| Error::Transport(e.to_string()))?;
        client
            .get_async_connection()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn recycle(&self, conn: &mut Connection, metrics: &Metrics) -> RecycleResult<Error> {
        let idle = metrics.recycled.map(|at| at.elapsed()).unwrap_or_default();
        if idle < IDLE_PING_THRESHOLD {
            return Ok(());
        }
        redis::cmd("PING")
            .query_async::<_, ()>(conn)
            .await
            .map_err(|e| RecycleError::Message(e.to_string()))?;
        Ok(())
    }
}

/// A block store client for one endpoint: a pool of connections plus
/// `get`/`set`/`ping` verbs.
pub struct Client {
    pool: Pool<ConnectionManager>,
}

impl Client {
    pub fn new(endpoint: Endpoint) -> Result<Self, Error> {
        let pool = Pool::builder(ConnectionManager { endpoint })
            .max_size(POOL_MAX_ACTIVE)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        value.ok_or(Error::NotFound)
    }

    pub async fn set(&self, key: &[u8], data: &[u8]) -> Result<(), Error> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        conn.set(key, data)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    pub async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        redis::cmd("PING")
            .query_async::<_, ()>(&mut *conn)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

fn pool_err(e: PoolError<Error>) -> Error {
    match e {
        PoolError::Backend(e) => e,
        other => Error::Transport(other.to_string()),
    }
}
