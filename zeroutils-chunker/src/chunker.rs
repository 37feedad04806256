use bytes::Bytes;
use futures::{stream::BoxStream, Future};
use tokio::io::AsyncRead;

use crate::{ChunkProducerExt, ChunkerResult, Strategy};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A chunker that splits incoming bytes into chunks and returns those chunks as a stream.
///
/// Unlike a [`ChunkProducer`][crate::ChunkProducer], a `Chunker` is not tied to one stream: it
/// can be kept around and used to split any number of them.
pub trait Chunker {
    /// Chunks the given reader and returns a stream of bytes.
    fn chunk(
        &self,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> impl Future<Output = ChunkerResult<BoxStream<'static, ChunkerResult<Bytes>>>> + Send;

    /// Returns the allowed maximum chunk size. If there is no limit, `None` is returned.
    fn chunk_max_size(&self) -> Option<u64>;
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Chunker for Strategy {
    async fn chunk(
        &self,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> ChunkerResult<BoxStream<'static, ChunkerResult<Bytes>>> {
        Ok(self.splitter(reader).await?.into_stream())
    }

    fn chunk_max_size(&self) -> Option<u64> {
        match self {
            Strategy::Fixed { size } => Some(*size),
            Strategy::ContentDefined(bounds) => Some(bounds.max),
            Strategy::ErasureCoded(config) => Some(config.shard_chunk_size),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use crate::{CdcBounds, ErasureConfig};

    use super::*;

    #[tokio::test]
    async fn test_strategy_chunker() -> anyhow::Result<()> {
        let chunker: Strategy = "size-10".parse()?;
        assert_eq!(chunker.chunk_max_size(), Some(10));

        let data = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit.";
        let chunks: Vec<_> = chunker.chunk(&data[..]).await?.collect().await;
        let chunks = chunks.into_iter().collect::<ChunkerResult<Vec<_>>>()?;

        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks[5], Bytes::from_static(b" elit."));

        // The same chunker splits another stream.
        let mut stream = chunker.chunk(&b"again"[..]).await?;
        assert_eq!(stream.next().await, Some(Ok(Bytes::from_static(b"again"))));
        assert_eq!(stream.next().await, None);

        Ok(())
    }

    #[test]
    fn test_strategy_chunk_max_size() {
        assert_eq!(
            Strategy::ContentDefined(CdcBounds::new(16, 32, 64)).chunk_max_size(),
            Some(64)
        );
        assert_eq!(
            Strategy::ErasureCoded(ErasureConfig::default()).chunk_max_size(),
            Some(262_144)
        );
    }
}
