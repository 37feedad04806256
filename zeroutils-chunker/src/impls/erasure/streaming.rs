use std::{io::ErrorKind, sync::Arc};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc::{self, Receiver, Sender},
};
use tracing::{Instrument, Span};

use crate::{ChunkerError, ChunkerResult, ErasureCodec, ErasureConfig};

use super::{ErrorSlot, ShardReader};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The size of the segments the split worker forwards.
const SEGMENT_SIZE: usize = 64 * 1024;

/// The number of segments that may wait in a data shard channel.
const CHANNEL_CAPACITY: usize = 4;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Starts the split and encode workers and returns one reader per shard.
///
/// The split worker reads exactly `total_len` bytes and forwards them, zero padded, to the data
/// shards and to the encode worker. The encode worker folds the segments into the parity shards
/// and hands every parity shard over once the last segment is in. Data shard channels are bounded,
/// so a data shard that nobody reads holds the split back.
pub(super) fn spawn<R>(
    reader: R,
    total_len: u64,
    config: ErasureConfig,
    codec: Arc<dyn ErasureCodec>,
    slot: Arc<ErrorSlot>,
    span: Span,
) -> Vec<ShardReader>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let shard_len = config.shard_len(total_len);
    let mut readers = Vec::with_capacity(config.total_shards());

    let mut data = Vec::with_capacity(config.data_shards);
    for index in 0..config.data_shards {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        data.push(Some(tx));
        readers.push(ShardReader::streamed(index, shard_len, rx, slot.clone()));
    }

    let mut parity = Vec::with_capacity(config.parity_shards);
    for index in config.data_shards..config.total_shards() {
        let (tx, rx) = mpsc::channel(1);
        parity.push(tx);
        readers.push(ShardReader::streamed(index, shard_len, rx, slot.clone()));
    }

    let (encoder_tx, encoder_rx) = mpsc::channel(CHANNEL_CAPACITY * config.data_shards);

    let split_slot = slot.clone();
    tokio::spawn(
        async move {
            let result = split(reader, total_len, shard_len, &mut data, &encoder_tx).await;
            if let Err(error) = result {
                tracing::warn!(%error, "erasure split worker failed");
                split_slot.record(error);
            }

            // Closing the channels only after the error is recorded lets readers pick it up.
            drop(data);
            drop(encoder_tx);
            tracing::debug!("erasure split worker done");
        }
        .instrument(span.clone()),
    );

    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let mut encoder_rx = encoder_rx;
        let result = encode(&mut encoder_rx, codec.as_ref(), shard_len, config.data_shards);
        match result {
            Ok(shards) => {
                for (tx, shard) in parity.iter().zip(shards) {
                    // The shard may have been dropped.
                    let _ = tx.blocking_send(shard);
                }
            }
            Err(error) => {
                tracing::warn!(%error, "erasure encode worker failed");
                slot.record(error);
            }
        }

        drop(encoder_rx);
        drop(parity);
        tracing::debug!("erasure encode worker done");
    });

    readers
}

async fn split<R>(
    mut reader: R,
    total_len: u64,
    shard_len: u64,
    data: &mut [Option<Sender<Bytes>>],
    encoder: &Sender<(usize, Bytes)>,
) -> ChunkerResult<()>
where
    R: AsyncRead + Send + Unpin,
{
    if total_len == 0 {
        return ensure_exhausted(&mut reader, total_len).await;
    }

    let mut consumed = 0u64;
    for (index, shard) in data.iter_mut().enumerate() {
        let mut written = 0u64;
        while written < shard_len {
            let size = (shard_len - written).min(SEGMENT_SIZE as u64) as usize;
            let from_input = (total_len - consumed).min(size as u64) as usize;

            let mut segment = BytesMut::with_capacity(size);
            while segment.len() < from_input {
                let remaining = from_input - segment.len();
                let read = reader
                    .read_buf(&mut (&mut segment).limit(remaining))
                    .await;

                match read {
                    Ok(0) => {
                        return Err(ChunkerError::InputTruncated {
                            declared: total_len,
                            actual: consumed + segment.len() as u64,
                        })
                    }
                    Ok(_) => {}
                    Err(error) if error.kind() == ErrorKind::Interrupted => {}
                    Err(error) => return Err(error.into()),
                }
            }

            consumed += from_input as u64;
            if from_input > 0 && consumed == total_len {
                ensure_exhausted(&mut reader, total_len).await?;
            }

            // Zero padding past the end of the input.
            segment.resize(size, 0);
            let segment = segment.freeze();

            if encoder.send((index, segment.clone())).await.is_err() {
                return Err(ChunkerError::custom(anyhow::anyhow!(
                    "erasure encode worker stopped"
                )));
            }

            if let Some(tx) = shard {
                // The shard may have been dropped.
                let _ = tx.send(segment).await;
            }

            written += size as u64;
        }

        // Exactly `shard_len` bytes went out.
        shard.take();
    }

    Ok(())
}

/// Fails if the reader holds more than the declared `total_len` bytes.
async fn ensure_exhausted<R>(reader: &mut R, total_len: u64) -> ChunkerResult<()>
where
    R: AsyncRead + Send + Unpin,
{
    let mut probe = [0u8; 1];
    loop {
        match reader.read(&mut probe).await {
            Ok(0) => return Ok(()),
            Ok(_) => return Err(ChunkerError::DeclaredLengthExceeded(total_len)),
            Err(error) if error.kind() == ErrorKind::Interrupted => {}
            Err(error) => return Err(error.into()),
        }
    }
}

fn encode(
    input: &mut Receiver<(usize, Bytes)>,
    codec: &dyn ErasureCodec,
    shard_len: u64,
    data_shards: usize,
) -> ChunkerResult<Vec<Bytes>> {
    let shard_len = shard_len as usize;
    let mut parity = vec![BytesMut::zeroed(shard_len); codec.parity_shards()];
    let mut offsets = vec![0usize; data_shards];

    while let Some((index, segment)) = input.blocking_recv() {
        let offset = offsets[index];
        let end = offset + segment.len();

        let mut segments: Vec<&mut [u8]> = parity
            .iter_mut()
            .map(|shard| &mut shard[offset..end])
            .collect();

        codec.encode_segment(index, &segment, &mut segments)?;
        offsets[index] = end;
    }

    if offsets.iter().any(|offset| *offset != shard_len) {
        return Err(ChunkerError::custom(anyhow::anyhow!(
            "erasure encode worker received an incomplete split"
        )));
    }

    Ok(parity.into_iter().map(BytesMut::freeze).collect())
}
