use bytes::{Bytes, BytesMut};
use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::{ChunkerError, ChunkerResult, MAX_TOTAL_SHARDS};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The arithmetic behind an erasure coded split.
///
/// A codec splits an input into `data_shards()` equal-length data shards and computes
/// `parity_shards()` parity shards over them. The splitter only relies on this contract, so any
/// systematic erasure code over bytes can be plugged in.
pub trait ErasureCodec: Send + Sync + 'static {
    /// Returns the number of data shards the codec produces.
    fn data_shards(&self) -> usize;

    /// Returns the number of parity shards the codec produces.
    fn parity_shards(&self) -> usize;

    /// Splits `input` into `data_shards()` shards of `ceil(len / data_shards())` bytes.
    ///
    /// Shards lying fully inside the input are zero-copy slices of it. The shard holding the end
    /// of the input and every shard after it are zero padded.
    fn split(&self, input: Bytes) -> ChunkerResult<Vec<Bytes>> {
        let count = self.data_shards();
        if count == 0 {
            return Err(ChunkerError::CodecSplit(
                "codec has no data shards".to_string(),
            ));
        }

        let shard_len = input.len().div_ceil(count);
        let shards = (0..count)
            .map(|i| {
                let start = (i * shard_len).min(input.len());
                let end = (start + shard_len).min(input.len());
                if end - start == shard_len {
                    return input.slice(start..end);
                }

                let mut shard = BytesMut::zeroed(shard_len);
                shard[..end - start].copy_from_slice(&input[start..end]);
                shard.freeze()
            })
            .collect();

        Ok(shards)
    }

    /// Computes the parity shards of `data`.
    ///
    /// All data shards have the same length, and so do the returned parity shards.
    fn encode(&self, data: &[Bytes]) -> ChunkerResult<Vec<Bytes>>;

    /// Folds one segment of the data shard `index` into the parity segments at the same offset.
    ///
    /// Segments must be fed in data shard order for every offset: the segment of shard 0
    /// overwrites `parity`, the segments of later shards accumulate into it.
    fn encode_segment(
        &self,
        index: usize,
        segment: &[u8],
        parity: &mut [&mut [u8]],
    ) -> ChunkerResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A Reed-Solomon codec over GF(2^8).
///
/// Any `data_shards` of the `data_shards + parity_shards` shards are enough to recover the input.
pub struct ReedSolomonCodec {
    inner: ReedSolomon,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ReedSolomonCodec {
    /// Creates a codec for the given number of data and parity shards.
    pub fn new(data_shards: usize, parity_shards: usize) -> ChunkerResult<Self> {
        let inner = ReedSolomon::new(data_shards, parity_shards).map_err(|e| match e {
            reed_solomon_erasure::Error::TooFewDataShards => {
                ChunkerError::ZeroDataShards(data_shards)
            }
            reed_solomon_erasure::Error::TooFewParityShards => {
                ChunkerError::ZeroParityShards(parity_shards)
            }
            reed_solomon_erasure::Error::TooManyShards => {
                ChunkerError::TooManyShards(data_shards + parity_shards, MAX_TOTAL_SHARDS)
            }
            e => ChunkerError::CodecEncode(format!(
                "cannot build reed-solomon codec for {data_shards}+{parity_shards} shards: {e}"
            )),
        })?;

        Ok(Self { inner })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ErasureCodec for ReedSolomonCodec {
    fn data_shards(&self) -> usize {
        self.inner.data_shard_count()
    }

    fn parity_shards(&self) -> usize {
        self.inner.parity_shard_count()
    }

    fn encode(&self, data: &[Bytes]) -> ChunkerResult<Vec<Bytes>> {
        let shard_len = data.first().map_or(0, Bytes::len);

        // Zero-length shards have zero-length parity.
        if shard_len == 0 {
            return Ok(vec![Bytes::new(); self.parity_shards()]);
        }

        let mut parity = vec![BytesMut::zeroed(shard_len); self.parity_shards()];
        self.inner
            .encode_sep(data, &mut parity)
            .map_err(|e| ChunkerError::CodecEncode(e.to_string()))?;

        Ok(parity.into_iter().map(BytesMut::freeze).collect())
    }

    fn encode_segment(
        &self,
        index: usize,
        segment: &[u8],
        parity: &mut [&mut [u8]],
    ) -> ChunkerResult<()> {
        self.inner
            .encode_single_sep(index, segment, parity)
            .map_err(|e| ChunkerError::CodecEncode(e.to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
