//! Chunker configuration values and their validation.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{ChunkerError, ChunkerResult, Strategy, DEFAULT_POOL_CAPACITY};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The chunk size that chunkers produce, or aim to produce.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 256; // 256 KiB

/// No chunker parameter may exceed this size.
pub const CHUNK_SIZE_LIMIT: u64 = 1024 * 1024; // 1 MiB

/// The smallest minimum chunk size a content-defined chunker accepts.
pub const RABIN_MIN_SIZE: u64 = 16;

/// The default number of data shards of an erasure coded split.
pub const DEFAULT_DATA_SHARDS: usize = 10;

/// The default number of parity shards of an erasure coded split.
pub const DEFAULT_PARITY_SHARDS: usize = 20;

/// The default chunk size used inside every shard of an erasure coded split.
pub const DEFAULT_SHARD_CHUNK_SIZE: u64 = 1024 * 256; // 256 KiB

/// The largest number of shards (data + parity) the erasure coding alphabet supports.
pub const MAX_TOTAL_SHARDS: usize = 256;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The size bounds of a content-defined chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdcBounds {
    /// No chunk but the last is smaller than this.
    pub min: u64,

    /// The size chunks aim for.
    pub avg: u64,

    /// No chunk is larger than this.
    pub max: u64,
}

/// The parameters of an erasure coded split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct ErasureConfig {
    /// The number of data shards.
    #[serde(default = "default_data_shards")]
    #[builder(default = DEFAULT_DATA_SHARDS)]
    pub data_shards: usize,

    /// The number of parity shards.
    #[serde(default = "default_parity_shards")]
    #[builder(default = DEFAULT_PARITY_SHARDS)]
    pub parity_shards: usize,

    /// The chunk size used inside every shard.
    #[serde(default = "default_shard_chunk_size")]
    #[builder(default = DEFAULT_SHARD_CHUNK_SIZE)]
    pub shard_chunk_size: u64,
}

/// How an erasure coded split runs its split and encode phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// Read the whole input, then split and encode it before any shard is handed out.
    #[default]
    Buffered,

    /// Split and encode in background tasks while shards are being read.
    ///
    /// Needs the input length up front; without it the split falls back to [`Pipeline::Buffered`].
    Streaming,
}

/// The configuration of a chunker, as loaded from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct ChunkerConfig {
    /// The splitting strategy, in its string form.
    #[serde(default)]
    #[builder(default)]
    pub strategy: Strategy,

    /// The pipeline used by erasure coded strategies.
    #[serde(default)]
    #[builder(default)]
    pub pipeline: Pipeline,

    /// The number of idle chunk buffers kept for reuse.
    #[serde(default = "default_pool_capacity")]
    #[builder(default = DEFAULT_POOL_CAPACITY)]
    pub pool_capacity: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CdcBounds {
    /// Creates bounds from explicit sizes.
    pub fn new(min: u64, avg: u64, max: u64) -> Self {
        Self { min, avg, max }
    }

    /// Derives bounds around an average size: `min = avg / 3`, `max = avg + avg / 2`.
    ///
    /// `max` saturates, so an oversized average fails validation instead of wrapping.
    pub fn from_avg(avg: u64) -> Self {
        Self {
            min: avg / 3,
            avg,
            max: avg.saturating_add(avg / 2),
        }
    }

    /// Validates the bounds.
    ///
    /// Requires `RABIN_MIN_SIZE <= min < avg < max <= CHUNK_SIZE_LIMIT`.
    pub fn validate(&self) -> ChunkerResult<()> {
        if self.max > CHUNK_SIZE_LIMIT {
            return Err(ChunkerError::ChunkSizeTooLarge(self.max, CHUNK_SIZE_LIMIT));
        }

        if self.min < RABIN_MIN_SIZE {
            return Err(ChunkerError::RabinMinTooSmall(self.min, RABIN_MIN_SIZE));
        }

        if self.min >= self.avg {
            return Err(ChunkerError::RabinMinNotBelowAvg);
        }

        if self.avg >= self.max {
            return Err(ChunkerError::RabinAvgNotBelowMax);
        }

        Ok(())
    }
}

impl ErasureConfig {
    /// Creates a configuration from explicit values.
    pub fn new(data_shards: usize, parity_shards: usize, shard_chunk_size: u64) -> Self {
        Self {
            data_shards,
            parity_shards,
            shard_chunk_size,
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ChunkerResult<()> {
        if self.data_shards == 0 {
            return Err(ChunkerError::ZeroDataShards(self.data_shards));
        }

        if self.parity_shards == 0 {
            return Err(ChunkerError::ZeroParityShards(self.parity_shards));
        }

        let total = self.total_shards();
        if total > MAX_TOTAL_SHARDS {
            return Err(ChunkerError::TooManyShards(total, MAX_TOTAL_SHARDS));
        }

        check_chunk_size(self.shard_chunk_size)
    }

    /// Returns the number of data and parity shards.
    pub fn total_shards(&self) -> usize {
        self.data_shards.saturating_add(self.parity_shards)
    }

    /// Returns the length every shard has for an input of `total_len` bytes.
    pub fn shard_len(&self, total_len: u64) -> u64 {
        total_len.div_ceil(self.data_shards.max(1) as u64)
    }
}

impl ChunkerConfig {
    /// Parses and validates a configuration from a toml document.
    pub fn from_toml_str(s: &str) -> ChunkerResult<Self> {
        let config: ChunkerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ChunkerResult<()> {
        self.strategy.validate()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks that a chunk size is in `1..=CHUNK_SIZE_LIMIT`.
pub fn check_chunk_size(size: u64) -> ChunkerResult<()> {
    if size == 0 {
        return Err(ChunkerError::ZeroChunkSize);
    }

    if size > CHUNK_SIZE_LIMIT {
        return Err(ChunkerError::ChunkSizeTooLarge(size, CHUNK_SIZE_LIMIT));
    }

    Ok(())
}

const fn default_data_shards() -> usize {
    DEFAULT_DATA_SHARDS
}

const fn default_parity_shards() -> usize {
    DEFAULT_PARITY_SHARDS
}

const fn default_shard_chunk_size() -> u64 {
    DEFAULT_SHARD_CHUNK_SIZE
}

const fn default_pool_capacity() -> usize {
    DEFAULT_POOL_CAPACITY
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for CdcBounds {
    fn default() -> Self {
        Self::from_avg(DEFAULT_BLOCK_SIZE)
    }
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_DATA_SHARDS,
            DEFAULT_PARITY_SHARDS,
            DEFAULT_SHARD_CHUNK_SIZE,
        )
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            pipeline: Pipeline::default(),
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
