use std::future::Future;

use async_stream::try_stream;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

use crate::{ChunkerError, ChunkerResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A pull-based producer of chunks over a byte stream.
///
/// Every splitting strategy implements this contract. Calls to [`next_chunk`][Self::next_chunk]
/// yield `Ok(Some(chunk))` until the stream is exhausted, after which they yield `Ok(None)`. If
/// the producer fails, it yields `Err(_)`. Both end of stream and errors are terminal: every later
/// call returns the same value again.
///
/// A producer is driven by one caller at a time. Producers that expose independent parts of a
/// stream do so through [`MultiChunkProducer`].
pub trait ChunkProducer: Send {
    /// The raw stream the chunks are cut from.
    type Reader: AsyncRead + Send + Unpin;

    /// Produces the next chunk.
    ///
    /// Chunks are never empty. For fixed size strategies every chunk except the last one has
    /// exactly [`chunk_size`][Self::chunk_size] bytes.
    fn next_chunk(&mut self) -> impl Future<Output = ChunkerResult<Option<Bytes>>> + Send;

    /// Gives back the raw stream, positioned right after the bytes already produced.
    ///
    /// Bytes the producer has buffered but not produced yet are put back in front of the stream.
    fn into_reader(self) -> Self::Reader;

    /// Returns the configured (or target) chunk size.
    fn chunk_size(&self) -> u64;
}

/// A producer made of several independent producers, one per shard.
///
/// The [`ChunkProducer`] implementation of a `MultiChunkProducer` is the serialized view: it
/// reads every shard to exhaustion in shard index order before moving to the next one.
///
/// The shards themselves share no cursor state and can be driven concurrently, either through the
/// disjoint borrows returned by [`shards`][Self::shards] or by taking ownership of them with
/// [`into_shards`][Self::into_shards] and moving each one to its own task.
pub trait MultiChunkProducer: ChunkProducer {
    /// The producer type of a single shard.
    type Shard: ChunkProducer;

    /// Returns the shards in index order.
    fn shards(&mut self) -> &mut [Self::Shard];

    /// Consumes the producer and returns the shards in index order.
    fn into_shards(self) -> Vec<Self::Shard>;
}

/// Helper extension to the `ChunkProducer` trait.
pub trait ChunkProducerExt: ChunkProducer {
    /// Turns the producer into a stream of chunks.
    ///
    /// The stream ends after the last chunk or right after yielding the first error.
    fn into_stream<'a>(mut self) -> BoxStream<'a, ChunkerResult<Bytes>>
    where
        Self: Sized + 'a,
    {
        let s = try_stream! {
            while let Some(chunk) = self.next_chunk().await? {
                yield chunk;
            }
        };

        Box::pin(s)
    }

    /// Reads every remaining chunk into a vector.
    fn collect_chunks(&mut self) -> impl Future<Output = ChunkerResult<Vec<Bytes>>> + Send
    where
        Self: Sized,
    {
        async move {
            let mut chunks = Vec::new();
            while let Some(chunk) = self.next_chunk().await? {
                chunks.push(chunk);
            }

            Ok(chunks)
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The sticky terminal state of a producer.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) enum Terminal {
    /// The producer can still produce chunks.
    #[default]
    Open,

    /// The stream has been exhausted.
    Ended,

    /// The producer failed.
    Failed(ChunkerError),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Terminal {
    /// Returns the terminal value to hand out again, if the producer is done.
    pub(crate) fn replay(&self) -> Option<ChunkerResult<Option<Bytes>>> {
        match self {
            Terminal::Open => None,
            Terminal::Ended => Some(Ok(None)),
            Terminal::Failed(error) => Some(Err(error.clone())),
        }
    }

    /// Records end of stream and returns it.
    pub(crate) fn end(&mut self) -> ChunkerResult<Option<Bytes>> {
        *self = Terminal::Ended;
        Ok(None)
    }

    /// Records `error` and returns it.
    pub(crate) fn fail(&mut self, error: ChunkerError) -> ChunkerResult<Option<Bytes>> {
        *self = Terminal::Failed(error.clone());
        Err(error)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<T> ChunkProducerExt for T where T: ChunkProducer {}
