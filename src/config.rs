//! # Bus configuration.
//!
//! [`BusConfig`] sizes the dispatcher inbox and the three payload pools.
//! [`TOPIC_COUNT`](crate::TOPIC_COUNT) stays a compile-time constant because
//! it fixes the width of every subscription mask.
//!
//! # Example
//! ```
//! use topicbus::{BusConfig, PoolConfig};
//!
//! let mut cfg = BusConfig::default();
//! cfg.inbox_depth = 32;
//! cfg.small = PoolConfig { block_size: 32, block_count: 64 };
//!
//! assert_eq!(cfg.inbox_depth, 32);
//! ```

/// Size class geometry: uniform block size and how many blocks to carve.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// Bytes per block. Must be at least the platform pointer width
    /// (free blocks store their list link in the first word).
    pub block_size: usize,
    /// Number of blocks in the pool.
    pub block_count: usize,
}

/// Configuration for one bus instance.
#[derive(Clone, Copy, Debug)]
pub struct BusConfig {
    /// Capacity of the dispatcher command inbox. Blocking publishers wait
    /// when it is full; the fire-and-forget path fails instead.
    pub inbox_depth: usize,
    /// Geometry of the small payload pool.
    pub small: PoolConfig,
    /// Geometry of the medium payload pool.
    pub medium: PoolConfig,
    /// Geometry of the large payload pool.
    pub large: PoolConfig,
}

impl Default for BusConfig {
    /// Provides a default configuration:
    /// - `inbox_depth = 16`
    /// - `small = 64 B × 32`
    /// - `medium = 256 B × 16`
    /// - `large = 1024 B × 8`
    fn default() -> Self {
        Self {
            inbox_depth: 16,
            small: PoolConfig {
                block_size: 64,
                block_count: 32,
            },
            medium: PoolConfig {
                block_size: 256,
                block_count: 16,
            },
            large: PoolConfig {
                block_size: 1024,
                block_count: 8,
            },
        }
    }
}
