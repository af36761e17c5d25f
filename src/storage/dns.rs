//! DNS resolution with a short-lived cache, mirroring the package-level
//! `dnsCache` in the original's `dial.go`: addresses are cached for a fixed
//! TTL and one is picked uniformly at random on each dial, rather than
//! re-resolving on every connection or always favoring the same address.
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use rand::Rng;

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct Entry {
    addrs: Vec<IpAddr>,
    at: Instant,
}

static CACHE: Lazy<Mutex<HashMap<String, Entry>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Resolve `host` to one address, picked uniformly at random among the
/// cached (or freshly looked up) set of A/AAAA records.
pub async fn resolve(host: &str) -> std::io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    if let Some(addrs) = cached(host) {
        return Ok(pick(&addrs));
    }

    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
        .await?
        .map(|addr| addr.ip())
        .collect();
    if addrs.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses found for host {host}"),
        ));
    }
    let picked = pick(&addrs);
    CACHE.lock().unwrap().insert(
        host.to_string(),
        Entry {
            addrs,
            at: Instant::now(),
        },
    );
    Ok(picked)
}

fn cached(host: &str) -> Option<Vec<IpAddr>> {
    let cache = CACHE.lock().unwrap();
    let entry = cache.get(host)?;
    if entry.at.elapsed() < CACHE_TTL {
        Some(entry.addrs.clone())
    } else {
        None
    }
}

fn pick(addrs: &[IpAddr]) -> IpAddr {
    let idx = rand::thread_rng().gen_range(0..addrs.len());
    addrs[idx]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pick_always_returns_a_cached_address() {
        let addrs = vec!["127.0.0.1".parse().unwrap(), "127.0.0.2".parse().unwrap()];
        for _ in 0..50 {
            assert!(addrs.contains(&pick(&addrs)));
        }
    }
}
