use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default number of idle buffers a pool keeps around.
pub const DEFAULT_POOL_CAPACITY: usize = 16;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A bounded pool of chunk buffers.
///
/// Chunkers take a buffer from the pool for every read. Buffers that end up in the hands of the
/// caller are never seen again by the pool; buffers that only served as scratch space (a short
/// final read that was copied into a right-sized chunk, or a failed read) are put back so the next
/// read can reuse their allocation.
///
/// The pool is lock-free and can be shared between the shards of one split through an `Arc`.
#[derive(Debug)]
pub struct BufferPool {
    buffers: ArrayQueue<BytesMut>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BufferPool {
    /// Creates a pool that keeps at most `capacity` idle buffers.
    ///
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Takes an empty buffer able to hold at least `size` bytes.
    pub fn get(&self, size: usize) -> BytesMut {
        match self.buffers.pop() {
            Some(mut buffer) => {
                buffer.reserve(size);
                buffer
            }
            None => BytesMut::with_capacity(size),
        }
    }

    /// Gives a buffer back to the pool.
    ///
    /// The buffer is cleared first so the pool never holds stale bytes. If the pool is full the
    /// buffer is dropped.
    pub fn put(&self, mut buffer: BytesMut) {
        buffer.clear();
        if self.buffers.push(buffer).is_err() {
            tracing::trace!("buffer pool full, dropping buffer");
        }
    }

    /// Returns the number of idle buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Returns `true` if the pool holds no idle buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Returns the maximum number of idle buffers.
    pub fn capacity(&self) -> usize {
        self.buffers.capacity()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
