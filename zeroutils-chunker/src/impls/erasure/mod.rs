//! Erasure coded splitting.
//!
//! An [`ErasureCodedSplitter`] cuts its input into `N` equal-length data shards, computes `M`
//! parity shards over them and exposes every shard as its own chunk producer. Any `N` of the
//! `N + M` shards are enough to recover the input.
//!
//! Two pipelines produce the shards:
//!
//! - [`Pipeline::Buffered`] reads the whole input, then splits and encodes it before the splitter
//!   is handed out. Construction fails if any step fails.
//! - [`Pipeline::Streaming`] needs the input length up front. A split worker forwards the input to
//!   the data shards while an encode worker folds it into the parity shards. Worker failures are
//!   recorded once and surface on every shard that has not finished yet.

mod buffered;
mod codec;
mod reader;
mod streaming;


use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, io::AsyncRead};
use tracing::{Instrument, Span};
use typed_builder::TypedBuilder;

use crate::{
    producer::Terminal, BufferPool, ChunkProducer, ChunkerError, ChunkerResult, ErasureConfig,
    FixedSizeChunker, MultiChunkProducer, Pipeline, DEFAULT_POOL_CAPACITY,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use codec::*;
pub use reader::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Whether a shard carries input bytes or parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardRole {
    /// A slice of the (zero padded) input.
    Data,

    /// Parity computed over the data shards.
    Parity,
}

/// One shard of an erasure coded split, exposed as a fixed-size chunk producer.
///
/// Shards share no cursor state with each other and can be read from different tasks.
pub struct Shard {
    index: usize,
    role: ShardRole,
    len: u64,
    chunker: FixedSizeChunker<ShardReader>,
    slot: Arc<ErrorSlot>,
    terminal: Terminal,
}

/// What an erasure coded split looks like, for whoever stores the shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureMetadata {
    /// The number of data shards.
    pub num_data: usize,

    /// The number of parity shards.
    pub num_parity: usize,

    /// The length of the input before padding.
    #[serde(rename = "totalLength")]
    pub total_len: u64,

    /// Whether the input is a serialized directory.
    #[serde(rename = "isDirectory")]
    pub is_dir: bool,
}

/// The input of an erasure coded split and how to process it.
#[derive(TypedBuilder)]
pub struct ErasureInput<R> {
    /// The stream to split.
    pub reader: R,

    /// The number of bytes the stream holds, if known.
    #[builder(default, setter(strip_option))]
    pub length: Option<u64>,

    /// Whether the stream is a serialized directory.
    #[builder(default)]
    pub is_dir: bool,

    /// How the split and encode phases run.
    #[builder(default)]
    pub pipeline: Pipeline,

    /// The codec to use instead of a Reed-Solomon codec built from the configuration.
    #[builder(default, setter(strip_option))]
    pub codec: Option<Arc<dyn ErasureCodec>>,

    /// The number of idle chunk buffers the shards keep for reuse.
    #[builder(default = DEFAULT_POOL_CAPACITY)]
    pub pool_capacity: usize,

    /// The span construction and workers log under.
    #[builder(default = Span::current())]
    pub span: Span,
}

/// A splitter that erasure codes its input into data and parity shards.
///
/// Each shard is a [`FixedSizeChunker`] with the configured per-shard chunk size, reachable
/// through [`MultiChunkProducer`]. The [`ChunkProducer`] implementation reads the shards one after
/// the other in index order.
pub struct ErasureCodedSplitter {
    config: ErasureConfig,
    metadata: ErasureMetadata,
    shards: Vec<Shard>,
    current: usize,
    terminal: Terminal,
}

/// The first error of a split, shared by its shards and workers.
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot {
    error: OnceLock<ChunkerError>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Shard {
    /// Returns the index of the shard. Data shards come first.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns whether the shard holds data or parity.
    pub fn role(&self) -> ShardRole {
        self.role
    }

    /// Returns the number of bytes the shard holds.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the shard holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl ErasureCodedSplitter {
    /// Splits a stream of unknown length.
    ///
    /// The whole stream is read into memory to learn its length.
    pub async fn new<R>(reader: R, config: ErasureConfig) -> ChunkerResult<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::from_input(ErasureInput::builder().reader(reader).build(), config).await
    }

    /// Splits a file, taking its length from the file metadata and streaming the shards.
    pub async fn from_file(file: File, config: ErasureConfig) -> ChunkerResult<Self> {
        let length = file
            .metadata()
            .await
            .map_err(|e| ChunkerError::LengthDiscovery(e.into()))?
            .len();

        let input = ErasureInput::builder()
            .reader(file)
            .length(length)
            .pipeline(Pipeline::Streaming)
            .build();

        Self::from_input(input, config).await
    }

    /// Splits the given input.
    ///
    /// Either every shard is set up or an error is returned; there are no partially built
    /// splitters.
    pub async fn from_input<R>(
        input: ErasureInput<R>,
        config: ErasureConfig,
    ) -> ChunkerResult<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let span = input.span.clone();
        Self::build(input, config).instrument(span).await
    }

    async fn build<R>(input: ErasureInput<R>, config: ErasureConfig) -> ChunkerResult<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        config.validate()?;

        let codec: Arc<dyn ErasureCodec> = match input.codec {
            Some(codec) => codec,
            None => Arc::new(ReedSolomonCodec::new(
                config.data_shards,
                config.parity_shards,
            )?),
        };

        let layout = (codec.data_shards(), codec.parity_shards());
        if layout != (config.data_shards, config.parity_shards) {
            return Err(ChunkerError::CodecShardMismatch {
                codec: layout,
                config: (config.data_shards, config.parity_shards),
            });
        }

        let slot = Arc::new(ErrorSlot::default());
        let (readers, total_len) = match (input.pipeline, input.length) {
            // An empty declared input has no segments to stream, only a surplus to rule out.
            (Pipeline::Streaming, Some(length)) if length > 0 => {
                let readers = streaming::spawn(
                    input.reader,
                    length,
                    config,
                    codec,
                    slot.clone(),
                    input.span,
                );
                (readers, length)
            }
            (pipeline, length) => {
                if pipeline == Pipeline::Streaming && length.is_none() {
                    tracing::debug!("no declared length, falling back to the buffered pipeline");
                }

                let (shards, total_len) =
                    buffered::split_and_encode(input.reader, length, codec).await?;
                let readers = shards.into_iter().map(ShardReader::buffered).collect();
                (readers, total_len)
            }
        };

        let shard_len = config.shard_len(total_len);
        let pool = Arc::new(BufferPool::new(input.pool_capacity));
        let shards = readers
            .into_iter()
            .enumerate()
            .map(|(index, reader)| {
                let role = if index < config.data_shards {
                    ShardRole::Data
                } else {
                    ShardRole::Parity
                };

                Ok::<_, ChunkerError>(Shard {
                    index,
                    role,
                    len: shard_len,
                    chunker: FixedSizeChunker::with_pool(
                        reader,
                        config.shard_chunk_size,
                        pool.clone(),
                    )?,
                    slot: slot.clone(),
                    terminal: Terminal::default(),
                })
            })
            .collect::<ChunkerResult<Vec<_>>>()?;

        let metadata = ErasureMetadata {
            num_data: config.data_shards,
            num_parity: config.parity_shards,
            total_len,
            is_dir: input.is_dir,
        };

        tracing::debug!(
            ?metadata,
            shard_len,
            pipeline = ?input.pipeline,
            "erasure coded split ready"
        );

        Ok(Self {
            config,
            metadata,
            shards,
            current: 0,
            terminal: Terminal::default(),
        })
    }

    /// Returns the metadata of the split.
    pub fn metadata(&self) -> ErasureMetadata {
        self.metadata
    }

    /// Returns the configuration the split was made with.
    pub fn config(&self) -> &ErasureConfig {
        &self.config
    }

    /// Returns the length of every shard.
    pub fn shard_len(&self) -> u64 {
        self.config.shard_len(self.metadata.total_len)
    }
}

impl ErrorSlot {
    /// Records `error` unless an error was recorded before, and returns the recorded error.
    pub(crate) fn record(&self, error: ChunkerError) -> ChunkerError {
        self.error.get_or_init(|| error).clone()
    }

    /// Returns the recorded error, if any.
    pub(crate) fn get(&self) -> Option<ChunkerError> {
        self.error.get().cloned()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ChunkProducer for Shard {
    type Reader = ShardReader;

    async fn next_chunk(&mut self) -> ChunkerResult<Option<Bytes>> {
        if let Some(result) = self.terminal.replay() {
            return result;
        }

        if let Some(error) = self.slot.get() {
            return self.terminal.fail(error);
        }

        let next = self.chunker.next_chunk().await;
        match next {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => match self.slot.get() {
                Some(error) => self.terminal.fail(error),
                None => self.terminal.end(),
            },
            Err(error) => {
                let error = self.slot.record(error);
                self.terminal.fail(error)
            }
        }
    }

    fn into_reader(self) -> ShardReader {
        self.chunker.into_reader()
    }

    fn chunk_size(&self) -> u64 {
        self.chunker.chunk_size()
    }
}

impl ChunkProducer for ErasureCodedSplitter {
    type Reader = ShardChain;

    async fn next_chunk(&mut self) -> ChunkerResult<Option<Bytes>> {
        if let Some(result) = self.terminal.replay() {
            return result;
        }

        while let Some(shard) = self.shards.get_mut(self.current) {
            let next = shard.next_chunk().await;
            match next {
                Ok(Some(chunk)) => return Ok(Some(chunk)),
                Ok(None) => self.current += 1,
                Err(error) => return self.terminal.fail(error),
            }
        }

        self.terminal.end()
    }

    fn into_reader(self) -> ShardChain {
        let current = self.current;
        ShardChain::new(
            self.shards
                .into_iter()
                .skip(current)
                .map(ChunkProducer::into_reader),
        )
    }

    fn chunk_size(&self) -> u64 {
        self.config.shard_chunk_size
    }
}

impl MultiChunkProducer for ErasureCodedSplitter {
    type Shard = Shard;

    fn shards(&mut self) -> &mut [Shard] {
        &mut self.shards
    }

    fn into_shards(self) -> Vec<Shard> {
        self.shards
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("index", &self.index)
            .field("role", &self.role)
            .field("len", &self.len)
            .field("chunk_size", &self.chunker.chunk_size())
            .field("terminal", &self.terminal)
            .finish()
    }
}

impl fmt::Debug for ErasureCodedSplitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasureCodedSplitter")
            .field("config", &self.config)
            .field("metadata", &self.metadata)
            .field("current", &self.current)
            .field("shards", &self.shards)
            .finish()
    }
}
