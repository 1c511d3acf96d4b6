//! Configuration for replikv
//!
//! Centralized configuration with sensible defaults. Every component takes
//! its settings from a `Config` value handed to its constructor.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ReplikvError, Result};

/// Bounded pool capacity used when the configured capacity is zero
pub const DEFAULT_POOL_CAPACITY: usize = 100;

/// Largest buffer capacity a pool will take back (64 KiB)
pub const DEFAULT_POOL_MAX_ITEM_CAPACITY: usize = 64 * 1024;

/// Elastic pool free-list ceiling
pub const DEFAULT_POOL_MAX_RETAINED: usize = 1024;

/// Outbound connections the engine's transport wrapper may keep per peer
pub const DEFAULT_MAX_POOL: usize = 3;

/// Per-call I/O deadline applied by the engine's transport wrapper
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of committed entries the engine caches in memory
pub const DEFAULT_LOG_CACHE_SIZE: usize = 512;

/// Number of snapshots the engine keeps on disk
pub const DEFAULT_SNAPSHOT_RETAIN: usize = 5;

/// Fixed zstd level for stored values and snapshot streams
pub const COMPRESSION_LEVEL: i32 = 19;

/// Main configuration for a replikv node
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Store Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the store file and snapshots
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── {db_name}.db     (store file)
    ///     └── snapshots/       (node binary snapshots)
    pub data_dir: PathBuf,

    /// Store file stem
    pub db_name: String,

    /// Name of the single bucket holding key/value entries
    pub bucket_name: String,

    /// Compress stored values and snapshots with zstd
    pub use_compression: bool,

    /// How long opening the store waits for a locked file
    pub store_timeout: Duration,

    // -------------------------------------------------------------------------
    // Pool Configuration
    // -------------------------------------------------------------------------
    /// Bounded byte pool capacity (0 means `DEFAULT_POOL_CAPACITY`)
    pub pool_capacity: usize,

    /// Buffers with a larger capacity are dropped instead of pooled
    pub pool_max_item_capacity: usize,

    /// Free-list ceiling for elastic pools
    pub pool_max_retained: usize,

    // -------------------------------------------------------------------------
    // Consensus / Transport Configuration
    // -------------------------------------------------------------------------
    /// Identity of this node in the cluster
    pub node_id: String,

    /// Listen address (host:port)
    pub bind_addr: String,

    /// Address peers should use to reach this node, if not the bind address
    pub advertise_addr: Option<String>,

    /// Which stream layer backs the engine's RPCs
    pub transport: TransportKind,

    /// Outbound connection pool size (0 means `DEFAULT_MAX_POOL`)
    pub max_pool: usize,

    /// Uniform per-call I/O deadline
    pub io_timeout: Duration,

    /// In-memory log cache size (0 means `DEFAULT_LOG_CACHE_SIZE`)
    pub log_cache_size: usize,

    /// Retained snapshot count (0 means `DEFAULT_SNAPSHOT_RETAIN`)
    pub snapshot_retain: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./replikv_data"),
            db_name: "replikv".to_string(),
            bucket_name: "kv".to_string(),
            use_compression: false,
            store_timeout: Duration::from_secs(1),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            pool_max_item_capacity: DEFAULT_POOL_MAX_ITEM_CAPACITY,
            pool_max_retained: DEFAULT_POOL_MAX_RETAINED,
            node_id: "node-1".to_string(),
            bind_addr: "127.0.0.1:7000".to_string(),
            advertise_addr: None,
            transport: TransportKind::Tcp,
            max_pool: DEFAULT_MAX_POOL,
            io_timeout: DEFAULT_IO_TIMEOUT,
            log_cache_size: DEFAULT_LOG_CACHE_SIZE,
            snapshot_retain: DEFAULT_SNAPSHOT_RETAIN,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Full path of the store file
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.db_name))
    }

    /// Directory used for snapshot files
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Bounded pool capacity with the zero fallback applied
    pub fn effective_pool_capacity(&self) -> usize {
        non_zero_or(self.pool_capacity, DEFAULT_POOL_CAPACITY)
    }

    pub fn effective_max_pool(&self) -> usize {
        non_zero_or(self.max_pool, DEFAULT_MAX_POOL)
    }

    pub fn effective_log_cache_size(&self) -> usize {
        non_zero_or(self.log_cache_size, DEFAULT_LOG_CACHE_SIZE)
    }

    pub fn effective_snapshot_retain(&self) -> usize {
        non_zero_or(self.snapshot_retain, DEFAULT_SNAPSHOT_RETAIN)
    }

    /// Reject settings a node cannot start with
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("db_name", &self.db_name),
            ("bucket_name", &self.bucket_name),
            ("node_id", &self.node_id),
            ("bind_addr", &self.bind_addr),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ReplikvError::Config(format!("{} must not be empty", field)));
            }
        }
        if self.pool_max_item_capacity == 0 {
            return Err(ReplikvError::Config(
                "pool_max_item_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_zero_or(value: usize, fallback: usize) -> usize {
    if value == 0 {
        fallback
    } else {
        value
    }
}

// =============================================================================
// Transport Kind
// =============================================================================

/// Stream layer selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
}

impl TransportKind {
    const NAMES: [(TransportKind, &'static str); 2] =
        [(TransportKind::Tcp, "tcp"), (TransportKind::Udp, "udp")];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
        }
    }
}

impl FromStr for TransportKind {
    type Err = ReplikvError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(kind, _)| *kind)
            .ok_or_else(|| ReplikvError::invalid_value("transport kind", s))
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn db_name(mut self, name: impl Into<String>) -> Self {
        self.config.db_name = name.into();
        self
    }

    pub fn bucket_name(mut self, name: impl Into<String>) -> Self {
        self.config.bucket_name = name.into();
        self
    }

    /// Enable or disable zstd compression of values and snapshots
    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.config.use_compression = enabled;
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.config.pool_capacity = capacity;
        self
    }

    pub fn pool_max_item_capacity(mut self, capacity: usize) -> Self {
        self.config.pool_max_item_capacity = capacity;
        self
    }

    pub fn pool_max_retained(mut self, count: usize) -> Self {
        self.config.pool_max_retained = count;
        self
    }

    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.config.node_id = id.into();
        self
    }

    /// Set the listen address
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    pub fn advertise_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.advertise_addr = Some(addr.into());
        self
    }

    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.config.transport = kind;
        self
    }

    pub fn max_pool(mut self, size: usize) -> Self {
        self.config.max_pool = size;
        self
    }

    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    pub fn log_cache_size(mut self, size: usize) -> Self {
        self.config.log_cache_size = size;
        self
    }

    pub fn snapshot_retain(mut self, count: usize) -> Self {
        self.config.snapshot_retain = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
