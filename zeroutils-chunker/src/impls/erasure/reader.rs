use std::{
    collections::VecDeque,
    io::{self, Cursor},
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use async_stream::stream;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::{
    io::{AsyncRead, ReadBuf},
    sync::mpsc::Receiver,
};
use tokio_util::io::StreamReader;

use crate::ChunkerError;

use super::ErrorSlot;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The raw bytes of one shard.
///
/// A streamed shard reader ends after exactly the shard length, however the bytes were delivered.
/// If the delivering worker stops early, the read fails with the error the split recorded.
pub struct ShardReader {
    source: Source,
}

enum Source {
    Buffered(Cursor<Bytes>),
    Streamed(StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>),
}

/// The raw bytes of several shards, one after the other.
pub struct ShardChain {
    readers: VecDeque<ShardReader>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ShardReader {
    /// Reads a shard that is already in memory.
    pub(crate) fn buffered(shard: Bytes) -> Self {
        Self {
            source: Source::Buffered(Cursor::new(shard)),
        }
    }

    /// Reads a shard delivered in segments over `segments`.
    pub(crate) fn streamed(
        index: usize,
        len: u64,
        mut segments: Receiver<Bytes>,
        slot: Arc<ErrorSlot>,
    ) -> Self {
        let s: BoxStream<'static, io::Result<Bytes>> = Box::pin(stream! {
            let mut remaining = len;
            while remaining > 0 {
                match segments.recv().await {
                    Some(mut segment) => {
                        if segment.len() as u64 > remaining {
                            segment.truncate(remaining as usize);
                        }

                        if segment.is_empty() {
                            continue;
                        }

                        remaining -= segment.len() as u64;
                        yield Ok(segment);
                    }
                    None => {
                        let error = slot
                            .get()
                            .unwrap_or(ChunkerError::ShardTruncated { index });
                        yield Err(error.into_io());
                        break;
                    }
                }
            }
        });

        Self {
            source: Source::Streamed(StreamReader::new(s)),
        }
    }
}

impl ShardChain {
    /// Chains the given readers in order.
    pub fn new(readers: impl IntoIterator<Item = ShardReader>) -> Self {
        Self {
            readers: readers.into_iter().collect(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl AsyncRead for ShardReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().source {
            Source::Buffered(cursor) => Pin::new(cursor).poll_read(cx, buf),
            Source::Streamed(reader) => Pin::new(reader).poll_read(cx, buf),
        }
    }
}

impl AsyncRead for ShardChain {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        while let Some(reader) = this.readers.front_mut() {
            let before = buf.filled().len();
            ready!(Pin::new(reader).poll_read(cx, buf))?;
            if buf.filled().len() > before {
                return Poll::Ready(Ok(()));
            }

            this.readers.pop_front();
        }

        Poll::Ready(Ok(()))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::{io::AsyncReadExt, sync::mpsc};

    use super::*;

    #[tokio::test]
    async fn test_streamed_shard_reader_stops_at_shard_len() -> anyhow::Result<()> {
        let (tx, rx) = mpsc::channel(4);
        let mut reader = ShardReader::streamed(0, 5, rx, Arc::default());

        tx.send(Bytes::from_static(b"abc")).await?;
        tx.send(Bytes::new()).await?;
        tx.send(Bytes::from_static(b"defgh")).await?;

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;
        assert_eq!(out, b"abcde");

        Ok(())
    }

    #[tokio::test]
    async fn test_streamed_shard_reader_reports_early_close() -> anyhow::Result<()> {
        let (tx, rx) = mpsc::channel(4);
        let mut reader = ShardReader::streamed(3, 8, rx, Arc::default());
        tx.send(Bytes::from_static(b"abc")).await?;
        drop(tx);

        let mut out = Vec::new();
        let error = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(
            ChunkerError::from(error),
            ChunkerError::ShardTruncated { index: 3 }
        );

        let slot = Arc::new(ErrorSlot::default());
        slot.record(ChunkerError::DeclaredLengthExceeded(8));
        slot.record(ChunkerError::ShardTruncated { index: 0 });

        let (tx, rx) = mpsc::channel(1);
        let mut reader = ShardReader::streamed(1, 8, rx, slot);
        drop(tx);

        let error = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(
            ChunkerError::from(error),
            ChunkerError::DeclaredLengthExceeded(8)
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_shard_chain_reads_in_order() -> anyhow::Result<()> {
        let mut chain = ShardChain::new([
            ShardReader::buffered(Bytes::from_static(b"one ")),
            ShardReader::buffered(Bytes::new()),
            ShardReader::buffered(Bytes::from_static(b"two")),
        ]);

        let mut out = String::new();
        chain.read_to_string(&mut out).await?;
        assert_eq!(out, "one two");

        Ok(())
    }
}
