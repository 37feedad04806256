use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{ChunkerError, ChunkerResult, ErasureCodec};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads the whole input, then splits and encodes it.
///
/// Returns the data shards followed by the parity shards, and the length of the input.
pub(super) async fn split_and_encode<R>(
    mut reader: R,
    declared: Option<u64>,
    codec: Arc<dyn ErasureCodec>,
) -> ChunkerResult<(Vec<Bytes>, u64)>
where
    R: AsyncRead + Send + Unpin,
{
    let mut input = Vec::new();
    match declared {
        None => {
            reader
                .read_to_end(&mut input)
                .await
                .map_err(|e| ChunkerError::LengthDiscovery(e.into()))?;
        }
        Some(declared) => {
            // One byte past the declared length is enough to tell the input is too long.
            (&mut reader)
                .take(declared.saturating_add(1))
                .read_to_end(&mut input)
                .await?;

            let actual = input.len() as u64;
            if actual > declared {
                return Err(ChunkerError::DeclaredLengthExceeded(declared));
            }

            if actual < declared {
                return Err(ChunkerError::InputTruncated { declared, actual });
            }
        }
    }

    let total_len = input.len() as u64;
    let data_shards = codec.data_shards();
    let parity_shards = codec.parity_shards();

    if input.is_empty() {
        return Ok((vec![Bytes::new(); data_shards + parity_shards], 0));
    }

    let shards = tokio::task::spawn_blocking(move || encode(codec.as_ref(), Bytes::from(input)))
        .await
        .map_err(ChunkerError::custom)??;

    tracing::debug!(total_len, data_shards, parity_shards, "encoded erasure shards");

    Ok((shards, total_len))
}

fn encode(codec: &dyn ErasureCodec, input: Bytes) -> ChunkerResult<Vec<Bytes>> {
    let shard_len = input.len().div_ceil(codec.data_shards());

    let mut shards = codec.split(input)?;
    if shards.len() != codec.data_shards() || shards.iter().any(|s| s.len() != shard_len) {
        return Err(ChunkerError::CodecSplit(format!(
            "expected {} data shards of {shard_len} bytes",
            codec.data_shards()
        )));
    }

    let parity = codec.encode(&shards)?;
    if parity.len() != codec.parity_shards() || parity.iter().any(|p| p.len() != shard_len) {
        return Err(ChunkerError::CodecEncode(format!(
            "expected {} parity shards of {shard_len} bytes",
            codec.parity_shards()
        )));
    }

    shards.extend(parity);
    Ok(shards)
}
