//! Pool configurations, registered once at startup, immutable afterwards.
//!
//! A [`PoolRegistry`] maps each [`PoolKey`] to one [`PoolConfig`]. It is
//! filled before any execution context starts (programmatically or from a
//! TOML file) and then shared read-only through an `Arc` by every context,
//! each of which lazily creates its own pool instance per key.
//!
//! # File format
//!
//! ```toml
//! [[pool]]
//! key = "main"
//! min_size = 2
//! max_size = 8
//! uri = "postgresql://app@db.internal/app"
//!
//! [[pool]]
//! key = "reports"
//! expand_dbname = true
//! [pool.params]
//! host = "replica.internal"
//! dbname = "reports"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{PoolError, PoolResult};

/// Floor used when a pool is registered with `min_size == 0`.
pub const DEFAULT_MIN_SIZE: usize = 1;
/// Ceiling used when a pool is registered with `max_size == 0`.
pub const DEFAULT_MAX_SIZE: usize = 10;
/// Warm connections opened per spawn when the floor is already met.
pub const DEFAULT_SPAWN_BATCH: usize = 1;

/// Opaque token identifying a logical pool.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(Arc<str>);

impl PoolKey {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PoolKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Where and how to connect: discrete keyword/value pairs or one
/// connection string / URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnTarget {
    Params {
        params: Vec<(String, String)>,
        /// Allow a `dbname` value to be expanded as a full connection string.
        expand_dbname: bool,
    },
    Uri(String),
}

impl ConnTarget {
    /// Build a parameter target from parallel key and value arrays.
    pub fn params(keys: &[&str], values: &[&str], expand_dbname: bool) -> PoolResult<Self> {
        if keys.len() != values.len() {
            return Err(PoolError::InvalidConfig(format!(
                "{} parameter keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        Ok(Self::Params {
            params: keys
                .iter()
                .zip(values)
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            expand_dbname,
        })
    }

    pub fn uri(uri: &str) -> Self {
        Self::Uri(uri.to_string())
    }

    /// Short label for logs; never includes credentials.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnTarget::Params { .. } => "params",
            ConnTarget::Uri(_) => "uri",
        }
    }
}

/// Configuration of one logical pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub key: PoolKey,
    pub target: ConnTarget,
    /// The pool never shrinks below this many connections.
    pub min_size: usize,
    /// The pool never grows beyond this many connections.
    pub max_size: usize,
    /// Connections opened per spawn once `min_size` is reached.
    pub spawn_batch: usize,
}

impl PoolConfig {
    /// Create a configuration, substituting defaults for zero sizes.
    pub fn new(key: PoolKey, target: ConnTarget, min_size: usize, max_size: usize) -> PoolResult<Self> {
        let min_size = if min_size == 0 { DEFAULT_MIN_SIZE } else { min_size };
        let max_size = if max_size == 0 { DEFAULT_MAX_SIZE } else { max_size };
        if min_size > max_size {
            return Err(PoolError::InvalidConfig(format!(
                "pool `{key}`: min_size {min_size} exceeds max_size {max_size}"
            )));
        }
        Ok(Self {
            key,
            target,
            min_size,
            max_size,
            spawn_batch: DEFAULT_SPAWN_BATCH,
        })
    }

    /// Builder method: set the spawn batch (0 keeps the default).
    pub fn with_spawn_batch(self, spawn_batch: usize) -> Self {
        Self {
            spawn_batch: if spawn_batch == 0 {
                DEFAULT_SPAWN_BATCH
            } else {
                spawn_batch
            },
            ..self
        }
    }

    /// How many connections a spawn should open for a pool currently
    /// holding `size` connections: enough to reach the floor, at least one
    /// batch, never past the ceiling.
    pub fn spawn_count(&self, size: usize) -> usize {
        let wanted = self.spawn_batch.max(self.min_size.saturating_sub(size));
        wanted.min(self.max_size.saturating_sub(size))
    }
}

/// Static map from pool key to pool configuration.
#[derive(Debug, Default, Clone)]
pub struct PoolRegistry {
    configs: HashMap<PoolKey, PoolConfig>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fully built configuration. One configuration per key.
    pub fn register(&mut self, config: PoolConfig) -> PoolResult<()> {
        if self.configs.contains_key(&config.key) {
            return Err(PoolError::DuplicatePool(config.key));
        }
        tracing::debug!(
            pool = %config.key,
            target_kind = config.target.kind(),
            min_size = config.min_size,
            max_size = config.max_size,
            "registered pool configuration"
        );
        self.configs.insert(config.key.clone(), config);
        Ok(())
    }

    /// Register a pool connecting with discrete keyword/value parameters.
    pub fn register_params(
        &mut self,
        key: PoolKey,
        min_size: usize,
        max_size: usize,
        keys: &[&str],
        values: &[&str],
        expand_dbname: bool,
    ) -> PoolResult<()> {
        let target = ConnTarget::params(keys, values, expand_dbname)?;
        self.register(PoolConfig::new(key, target, min_size, max_size)?)
    }

    /// Register a pool connecting with a connection string or URI.
    pub fn register_uri(
        &mut self,
        key: PoolKey,
        min_size: usize,
        max_size: usize,
        uri: &str,
    ) -> PoolResult<()> {
        self.register(PoolConfig::new(key, ConnTarget::uri(uri), min_size, max_size)?)
    }

    pub fn get(&self, key: &PoolKey) -> Option<&PoolConfig> {
        self.configs.get(key)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<PoolKey> {
        let mut keys: Vec<PoolKey> = self.configs.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Parse pool definitions from TOML (see the module docs for the format).
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: PoolFile = toml::from_str(content)?;
        let mut registry = Self::new();
        for entry in file.pools {
            registry.register(entry.into_config()?)?;
        }
        Ok(registry)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

#[derive(Debug, Deserialize)]
struct PoolFile {
    #[serde(default, rename = "pool")]
    pools: Vec<PoolEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolEntry {
    key: String,
    #[serde(default)]
    min_size: usize,
    #[serde(default)]
    max_size: usize,
    #[serde(default)]
    spawn_batch: usize,
    uri: Option<String>,
    params: Option<BTreeMap<String, String>>,
    #[serde(default)]
    expand_dbname: bool,
}

impl PoolEntry {
    fn into_config(self) -> PoolResult<PoolConfig> {
        let target = match (self.uri, self.params) {
            (Some(uri), None) => ConnTarget::Uri(uri),
            (None, Some(params)) => ConnTarget::Params {
                params: params.into_iter().collect(),
                expand_dbname: self.expand_dbname,
            },
            _ => {
                return Err(PoolError::InvalidConfig(format!(
                    "pool `{}` must set exactly one of `uri` or `params`",
                    self.key
                )));
            }
        };
        Ok(PoolConfig::new(PoolKey::new(&self.key), target, self.min_size, self.max_size)?
            .with_spawn_batch(self.spawn_batch))
    }
}
