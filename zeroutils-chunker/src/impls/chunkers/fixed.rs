use std::{io::ErrorKind, sync::Arc};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    config::check_chunk_size, producer::Terminal, BufferPool, ChunkProducer, ChunkerResult,
    DEFAULT_BLOCK_SIZE, DEFAULT_POOL_CAPACITY,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// `FixedSizeChunker` splits data into fixed-size chunks, regardless of the content, in a simple
/// and deterministic way.
///
/// Every chunk has exactly `chunk_size` bytes except the last one, which holds whatever is left
/// (but never zero bytes). Reads go into buffers taken from a [`BufferPool`]; a full buffer is
/// handed to the caller as the chunk, while the buffer of a short final read is copied into a
/// right-sized chunk and released back to the pool.
#[derive(Debug)]
pub struct FixedSizeChunker<R> {
    /// The reader chunks are cut from.
    reader: R,

    /// The size of each chunk.
    chunk_size: u64,

    /// Where read buffers come from. `None` allocates a fresh buffer for every chunk.
    pool: Option<Arc<BufferPool>>,

    terminal: Terminal,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<R> FixedSizeChunker<R>
where
    R: AsyncRead + Send + Unpin,
{
    /// Creates a new `FixedSizeChunker` with the given `chunk_size` and a pool of its own.
    pub fn new(reader: R, chunk_size: u64) -> ChunkerResult<Self> {
        Self::with_pool(
            reader,
            chunk_size,
            Arc::new(BufferPool::new(DEFAULT_POOL_CAPACITY)),
        )
    }

    /// Creates a new `FixedSizeChunker` that takes its read buffers from a shared `pool`.
    pub fn with_pool(reader: R, chunk_size: u64, pool: Arc<BufferPool>) -> ChunkerResult<Self> {
        check_chunk_size(chunk_size)?;
        Ok(Self {
            reader,
            chunk_size,
            pool: Some(pool),
            terminal: Terminal::default(),
        })
    }

    /// Creates a new `FixedSizeChunker` that allocates a fresh buffer for every chunk.
    ///
    /// Suited to short-lived streams such as metadata blocks, where keeping buffers around buys
    /// nothing.
    pub fn unpooled(reader: R, chunk_size: u64) -> ChunkerResult<Self> {
        check_chunk_size(chunk_size)?;
        Ok(Self {
            reader,
            chunk_size,
            pool: None,
            terminal: Terminal::default(),
        })
    }

    /// Creates a new `FixedSizeChunker` with the default block size.
    pub fn with_default_size(reader: R) -> Self {
        Self {
            reader,
            chunk_size: DEFAULT_BLOCK_SIZE,
            pool: Some(Arc::new(BufferPool::new(DEFAULT_POOL_CAPACITY))),
            terminal: Terminal::default(),
        }
    }

    /// Returns a reference to the underlying reader.
    pub fn reader(&self) -> &R {
        &self.reader
    }

    fn take_buffer(&self, size: usize) -> BytesMut {
        match &self.pool {
            Some(pool) => pool.get(size),
            None => BytesMut::with_capacity(size),
        }
    }

    fn release_buffer(&self, buffer: BytesMut) {
        if let Some(pool) = &self.pool {
            pool.put(buffer);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<R> ChunkProducer for FixedSizeChunker<R>
where
    R: AsyncRead + Send + Unpin,
{
    type Reader = R;

    async fn next_chunk(&mut self) -> ChunkerResult<Option<Bytes>> {
        if let Some(result) = self.terminal.replay() {
            return result;
        }

        let size = self.chunk_size as usize;
        let mut buffer = self.take_buffer(size);

        // Fill the buffer completely unless the stream ends first.
        while buffer.len() < size {
            let remaining = size - buffer.len();
            let read = self
                .reader
                .read_buf(&mut (&mut buffer).limit(remaining))
                .await;

            match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => {
                    self.release_buffer(buffer);
                    return self.terminal.fail(error.into());
                }
            }
        }

        let filled = buffer.len();
        if filled == size {
            return Ok(Some(buffer.freeze()));
        }

        if filled == 0 {
            self.release_buffer(buffer);
            return self.terminal.end();
        }

        // Short final read.
        self.terminal = Terminal::Ended;
        match self.pool {
            Some(_) => {
                let chunk = Bytes::copy_from_slice(&buffer);
                self.release_buffer(buffer);
                Ok(Some(chunk))
            }
            None => Ok(Some(buffer.freeze())),
        }
    }

    fn into_reader(self) -> R {
        self.reader
    }

    fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{
        io,
        pin::Pin,
        task::{Context, Poll},
    };

    use futures::StreamExt;
    use rand::{rngs::StdRng, RngCore, SeedableRng};
    use tokio::io::ReadBuf;

    use crate::{ChunkProducerExt, ChunkerError, CHUNK_SIZE_LIMIT};

    use super::*;

    /// Yields `data` in small pieces, then fails.
    struct FailingReader {
        data: &'static [u8],
        error_kind: io::ErrorKind,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.data.is_empty() {
                return Poll::Ready(Err(io::Error::new(self.error_kind, "reader broke")));
            }

            let n = self.data.len().min(buf.remaining()).min(3);
            buf.put_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Poll::Ready(Result::Ok(()))
        }
    }

    #[tokio::test]
    async fn test_fixed_size_chunker() -> anyhow::Result<()> {
        let data = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit.";
        let mut chunker = FixedSizeChunker::new(&data[..], 10)?;
        let chunks = chunker.collect_chunks().await?;

        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks[0].to_vec(), b"Lorem ipsu");
        assert_eq!(chunks[1].to_vec(), b"m dolor si");
        assert_eq!(chunks[2].to_vec(), b"t amet, co");
        assert_eq!(chunks[3].to_vec(), b"nsectetur ");
        assert_eq!(chunks[4].to_vec(), b"adipiscing");
        assert_eq!(chunks[5].to_vec(), b" elit.");

        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_size_chunker_round_trip() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        for (len, size) in [(0, 1), (1, 1), (4096, 512), (5000, 512), (100_003, 4096)] {
            let mut data = vec![0u8; len];
            rng.fill_bytes(&mut data);

            let mut chunker = FixedSizeChunker::new(&data[..], size)?;
            let chunks = chunker.collect_chunks().await?;

            let (last, rest) = match chunks.split_last() {
                Some(split) => split,
                None => {
                    assert!(data.is_empty());
                    continue;
                }
            };

            assert!(rest.iter().all(|chunk| chunk.len() as u64 == size));
            assert!(!last.is_empty() && last.len() as u64 <= size);
            assert_eq!(chunks.concat(), data);
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_size_chunker_terminal_state_is_sticky() -> anyhow::Result<()> {
        let mut chunker = FixedSizeChunker::new(&b"abcde"[..], 2)?;
        chunker.collect_chunks().await?;

        for _ in 0..100 {
            assert_eq!(chunker.next_chunk().await, Ok(None));
        }

        let reader = FailingReader {
            data: b"abcdefg",
            error_kind: io::ErrorKind::ConnectionReset,
        };
        let mut chunker = FixedSizeChunker::new(reader, 4)?;

        assert_eq!(chunker.next_chunk().await?, Some(Bytes::from_static(b"abcd")));
        let error = chunker.next_chunk().await.unwrap_err();
        match &error {
            ChunkerError::Io(inner) => assert_eq!(inner.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected error: {other:?}"),
        }

        for _ in 0..100 {
            assert_eq!(chunker.next_chunk().await, Err(error.clone()));
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_size_chunker_releases_short_read_buffer() -> anyhow::Result<()> {
        let pool = Arc::new(BufferPool::new(4));
        let mut chunker = FixedSizeChunker::with_pool(&b"0123456789abc"[..], 5, pool.clone())?;

        assert_eq!(chunker.next_chunk().await?.as_deref(), Some(&b"01234"[..]));
        assert_eq!(chunker.next_chunk().await?.as_deref(), Some(&b"56789"[..]));
        assert!(pool.is_empty());

        let last = chunker.next_chunk().await?.unwrap();
        assert_eq!(last, Bytes::from_static(b"abc"));
        assert_eq!(pool.len(), 1);

        assert_eq!(chunker.next_chunk().await?, None);
        assert_eq!(pool.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_size_chunker_unpooled() -> anyhow::Result<()> {
        let mut chunker = FixedSizeChunker::unpooled(&b"metadata block"[..], 8)?;
        let chunks = chunker.collect_chunks().await?;

        assert_eq!(
            chunks,
            vec![Bytes::from_static(b"metadata"), Bytes::from_static(b" block")]
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_size_chunker_rejects_bad_sizes() {
        assert_eq!(
            FixedSizeChunker::new(&b""[..], 0).err(),
            Some(ChunkerError::ZeroChunkSize)
        );
        assert_eq!(
            FixedSizeChunker::unpooled(&b""[..], CHUNK_SIZE_LIMIT + 1).err(),
            Some(ChunkerError::ChunkSizeTooLarge(
                CHUNK_SIZE_LIMIT + 1,
                CHUNK_SIZE_LIMIT
            ))
        );
    }

    #[tokio::test]
    async fn test_fixed_size_chunker_into_reader_and_stream() -> anyhow::Result<()> {
        let mut chunker = FixedSizeChunker::new(&b"0123456789"[..], 4)?;
        assert_eq!(chunker.next_chunk().await?.as_deref(), Some(&b"0123"[..]));

        let mut rest = Vec::new();
        chunker.into_reader().read_to_end(&mut rest).await?;
        assert_eq!(rest, b"456789");

        let chunker = FixedSizeChunker::with_default_size(&b"tiny"[..]);
        assert_eq!(chunker.chunk_size(), DEFAULT_BLOCK_SIZE);

        let chunks: Vec<_> = chunker.into_stream().collect().await;
        assert_eq!(chunks, vec![Ok(Bytes::from_static(b"tiny"))]);

        Ok(())
    }
}
