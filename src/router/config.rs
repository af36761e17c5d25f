//! Router configuration file format, ported from `storage/router/config.go`:
//! a YAML document naming pools, a lookup order, and a cache set.
use std::collections::HashMap;

use serde::Deserialize;

use super::pool::{Destination, Pool, Rule};
use super::range::Range;
use super::{Error, Router};

/// One pool's rules, as written in YAML: `<range>: <destination>` entries.
/// Kept as a [`serde_yaml::Mapping`] rather than a `HashMap` so rule
/// definition order survives deserialization — rules within a pool must be
/// tried in the order they were written.
pub type PoolConfig = serde_yaml::Mapping;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub pools: HashMap<String, PoolConfig>,
    #[serde(default)]
    pub lookup: Vec<String>,
    #[serde(default)]
    pub cache: Vec<String>,
}

impl Config {
    pub fn from_yaml(s: &str) -> Result<Self, Error> {
        let config: Config =
            serde_yaml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structure, accumulating every problem found rather than
    /// bailing on the first (`Errors` in the original).
    pub fn validate(&self) -> Result<(), Error> {
        let mut problems = Vec::new();

        if self.lookup.is_empty() {
            problems.push("no lookup table defined".to_string());
        }
        for name in self.lookup.iter().chain(self.cache.iter()) {
            if !self.pools.contains_key(name) {
                problems.push(format!("no pool with name '{name}'"));
            }
        }
        for pool in self.pools.values() {
            for (range, dest) in pool {
                let range = range.as_str().unwrap_or_default();
                let dest = dest.as_str().unwrap_or_default();
                if let Err(e) = Range::parse(range) {
                    problems.push(format!("{range}: {e}"));
                }
                if let Err(e) = Destination::parse(dest) {
                    problems.push(format!("{dest}: {e}"));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "found {} errors\n{}",
                problems.len(),
                problems
                    .iter()
                    .map(|p| format!("  - {p}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )))
        }
    }

    /// Build a [`Router`] from this configuration. Call [`Config::validate`]
    /// (or [`Config::from_yaml`], which does so already) first.
    pub fn router(&self) -> Result<Router, Error> {
        let mut pools = HashMap::new();
        for (name, cfg) in &self.pools {
            let mut rules = Vec::new();
            for (range, dest) in cfg {
                let range = Range::parse(range.as_str().unwrap_or_default())?;
                let destination = Destination::parse(dest.as_str().unwrap_or_default())?;
                rules.push(Rule { range, destination });
            }
            pools.insert(name.clone(), Pool::new(rules));
        }
        Router::new(pools, self.lookup.clone(), self.cache.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_lookup_referencing_undefined_pool() {
        let yaml = "pools: {}\nlookup: [missing]\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        let yaml = "
pools:
  local:
    \"00:FF\": ardb://dest.local:1234
lookup: [local]
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
    }
}
