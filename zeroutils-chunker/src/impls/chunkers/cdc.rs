use std::io::{Cursor, ErrorKind};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, Chain};

use crate::{producer::Terminal, CdcBounds, ChunkProducer, ChunkerResult, GearEngine};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Decides where content-defined chunks end.
///
/// An engine only sees a window of bytes and answers with the length of the next chunk. How it
/// finds the cut point (Rabin fingerprints, gear hashes, FastCDC) is up to the engine.
pub trait BoundaryEngine: Send {
    /// The smallest chunk the engine cuts, except at the end of the stream.
    fn min_size(&self) -> usize;

    /// The chunk size the engine aims for.
    fn avg_size(&self) -> usize;

    /// The largest chunk the engine cuts.
    fn max_size(&self) -> usize;

    /// Returns the length of the chunk at the start of `window`.
    ///
    /// `window` holds `max_size()` bytes unless the stream ended sooner. The result must be in
    /// `1..=window.len()`; anything outside is clamped into that range.
    fn cut(&mut self, window: &[u8]) -> usize;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A chunker that splits data into variable-size chunks at content-defined boundaries.
///
/// Content-defined boundaries survive insertions and deletions elsewhere in the stream, so
/// similar inputs share most of their chunks and deduplicate well. The chunker keeps a window of
/// up to `max_size` bytes, lets its [`BoundaryEngine`] pick the cut and splits the chunk off the
/// window without copying.
pub struct ContentDefinedChunker<R, E = GearEngine> {
    reader: R,
    engine: E,
    window: BytesMut,
    eof: bool,
    terminal: Terminal,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<R> ContentDefinedChunker<R, GearEngine>
where
    R: AsyncRead + Send + Unpin,
{
    /// Creates a chunker cutting at gear hash boundaries within `bounds`.
    pub fn with_bounds(reader: R, bounds: CdcBounds) -> ChunkerResult<Self> {
        Ok(Self::new(reader, GearEngine::new(bounds)?))
    }
}

impl<R, E> ContentDefinedChunker<R, E>
where
    R: AsyncRead + Send + Unpin,
    E: BoundaryEngine,
{
    /// Creates a chunker that asks `engine` where to cut.
    pub fn new(reader: R, engine: E) -> Self {
        let window = BytesMut::with_capacity(engine.max_size());
        Self {
            reader,
            engine,
            window,
            eof: false,
            terminal: Terminal::default(),
        }
    }

    /// Returns a reference to the boundary engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<R, E> ChunkProducer for ContentDefinedChunker<R, E>
where
    R: AsyncRead + Send + Unpin,
    E: BoundaryEngine,
{
    type Reader = Chain<Cursor<Bytes>, R>;

    async fn next_chunk(&mut self) -> ChunkerResult<Option<Bytes>> {
        if let Some(result) = self.terminal.replay() {
            return result;
        }

        let max = self.engine.max_size().max(1);
        while !self.eof && self.window.len() < max {
            let remaining = max - self.window.len();
            let read = self
                .reader
                .read_buf(&mut (&mut self.window).limit(remaining))
                .await;

            match read {
                Ok(0) => self.eof = true,
                Ok(_) => {}
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return self.terminal.fail(error.into()),
            }
        }

        if self.window.is_empty() {
            return self.terminal.end();
        }

        let cut = self.engine.cut(&self.window).clamp(1, self.window.len());
        Ok(Some(self.window.split_to(cut).freeze()))
    }

    fn into_reader(self) -> Self::Reader {
        Cursor::new(self.window.freeze()).chain(self.reader)
    }

    fn chunk_size(&self) -> u64 {
        self.engine.avg_size() as u64
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
