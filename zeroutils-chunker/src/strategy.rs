use std::{fmt::Display, pin::Pin, str::FromStr, sync::Arc};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::{
    config::check_chunk_size, BufferPool, CdcBounds, ChunkProducer, ChunkerConfig, ChunkerError,
    ChunkerResult, ContentDefinedChunker, ErasureCodedSplitter, ErasureConfig, ErasureInput,
    ErasureMetadata, FixedSizeChunker, GearEngine, Pipeline, DEFAULT_BLOCK_SIZE,
    DEFAULT_POOL_CAPACITY,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A splitting strategy.
///
/// Strategies have a string form:
///
/// - `""` or `"default"`: fixed-size chunks of [`DEFAULT_BLOCK_SIZE`] bytes.
/// - `"size-<size>"`: fixed-size chunks of `size` bytes.
/// - `"rabin"`, `"rabin-<avg>"` or `"rabin-[min:]<min>-[avg:]<avg>-[max:]<max>"`: content-defined
///   chunks. Without explicit bounds, `min = avg / 3` and `max = avg + avg / 2`.
/// - `"reed-solomon"` or `"reed-solomon-<data>-<parity>-<size>"`: an erasure coded split into
///   `data + parity` shards, each cut into chunks of `size` bytes.
///
/// Parsing validates the strategy, and serde goes through the string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Strategy {
    /// Fixed-size chunks.
    Fixed {
        /// The size of every chunk but the last.
        size: u64,
    },

    /// Chunks cut at content-defined boundaries.
    ContentDefined(CdcBounds),

    /// An erasure coded split.
    ErasureCoded(ErasureConfig),
}

/// A chunk producer built from a [`Strategy`].
pub enum Splitter<R> {
    /// See [`FixedSizeChunker`].
    Fixed(FixedSizeChunker<R>),

    /// See [`ContentDefinedChunker`].
    ContentDefined(ContentDefinedChunker<R, GearEngine>),

    /// See [`ErasureCodedSplitter`].
    ErasureCoded(ErasureCodedSplitter),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Strategy {
    /// Validates the strategy parameters.
    pub fn validate(&self) -> ChunkerResult<()> {
        match self {
            Strategy::Fixed { size } => check_chunk_size(*size),
            Strategy::ContentDefined(bounds) => bounds.validate(),
            Strategy::ErasureCoded(config) => config.validate(),
        }
    }

    /// Builds a splitter over `reader`.
    ///
    /// Erasure coded strategies use the buffered pipeline.
    pub async fn splitter<R>(&self, reader: R) -> ChunkerResult<Splitter<R>>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.build(reader, Pipeline::Buffered, DEFAULT_POOL_CAPACITY, None)
            .await
    }

    async fn build<R>(
        &self,
        reader: R,
        pipeline: Pipeline,
        pool_capacity: usize,
        length: Option<u64>,
    ) -> ChunkerResult<Splitter<R>>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.validate()?;

        let splitter = match *self {
            Strategy::Fixed { size } => {
                let pool = Arc::new(BufferPool::new(pool_capacity));
                Splitter::Fixed(FixedSizeChunker::with_pool(reader, size, pool)?)
            }
            Strategy::ContentDefined(bounds) => {
                Splitter::ContentDefined(ContentDefinedChunker::with_bounds(reader, bounds)?)
            }
            Strategy::ErasureCoded(config) => {
                let mut input = ErasureInput::builder()
                    .reader(reader)
                    .pipeline(pipeline)
                    .pool_capacity(pool_capacity)
                    .build();
                input.length = length;

                Splitter::ErasureCoded(ErasureCodedSplitter::from_input(input, config).await?)
            }
        };

        Ok(splitter)
    }
}

impl ChunkerConfig {
    /// Builds a splitter over `reader` as configured.
    ///
    /// `length` is the number of bytes `reader` holds, if known. The streaming pipeline needs it.
    pub async fn splitter<R>(&self, reader: R, length: Option<u64>) -> ChunkerResult<Splitter<R>>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.strategy
            .build(reader, self.pipeline, self.pool_capacity, length)
            .await
    }
}

impl<R> Splitter<R> {
    /// Returns the metadata of an erasure coded split.
    pub fn metadata(&self) -> Option<ErasureMetadata> {
        match self {
            Splitter::ErasureCoded(splitter) => Some(splitter.metadata()),
            _ => None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses `strategy` and builds a splitter over `reader` with it.
pub async fn from_string<R>(reader: R, strategy: &str) -> ChunkerResult<Splitter<R>>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    strategy.parse::<Strategy>()?.splitter(reader).await
}

fn parse(s: &str) -> ChunkerResult<Strategy> {
    if s.is_empty() || s == "default" {
        return Ok(Strategy::default());
    }

    let parts: Vec<&str> = s.split('-').collect();
    let strategy = match parts.as_slice() {
        ["size", size] => Strategy::Fixed {
            size: parse_number(size)?,
        },
        ["size", ..] => {
            return Err(ChunkerError::InvalidFormat {
                token: s.to_string(),
                expected: "'size-[size]'",
            })
        }
        ["rabin"] => Strategy::ContentDefined(CdcBounds::default()),
        ["rabin", avg] => Strategy::ContentDefined(CdcBounds::from_avg(parse_number(avg)?)),
        ["rabin", min, avg, max] => Strategy::ContentDefined(CdcBounds::new(
            parse_labelled(min, "min")?,
            parse_labelled(avg, "avg")?,
            parse_labelled(max, "max")?,
        )),
        ["rabin", ..] => {
            return Err(ChunkerError::InvalidFormat {
                token: s.to_string(),
                expected: "'rabin', 'rabin-[avg]' or 'rabin-[min]-[avg]-[max]'",
            })
        }
        ["reed", "solomon"] => Strategy::ErasureCoded(ErasureConfig::default()),
        ["reed", "solomon", data, parity, size] => Strategy::ErasureCoded(ErasureConfig::new(
            parse_number(data)?,
            parse_number(parity)?,
            parse_number(size)?,
        )),
        ["reed", "solomon", ..] => {
            return Err(ChunkerError::InvalidFormat {
                token: s.to_string(),
                expected: "'reed-solomon' or 'reed-solomon-[#data]-[#parity]-[size]'",
            })
        }
        _ => return Err(ChunkerError::UnrecognizedStrategy(s.to_string())),
    };

    Ok(strategy)
}

fn parse_number<T: FromStr>(token: &str) -> ChunkerResult<T> {
    token.parse().map_err(|_| ChunkerError::InvalidNumber {
        token: token.to_string(),
    })
}

/// Parses a number that may carry a `label:` prefix.
fn parse_labelled(token: &str, label: &'static str) -> ChunkerResult<u64> {
    match token.split_once(':') {
        Some((found, _)) if found != label => Err(ChunkerError::UnexpectedLabel {
            expected: label,
            found: found.to_string(),
        }),
        Some((_, value)) => parse_number(value),
        None => parse_number(token),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Fixed {
            size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl FromStr for Strategy {
    type Err = ChunkerError;

    fn from_str(s: &str) -> ChunkerResult<Self> {
        let strategy = parse(s)?;
        strategy.validate()?;

        tracing::trace!(%strategy, "parsed chunker strategy");
        Ok(strategy)
    }
}

impl TryFrom<String> for Strategy {
    type Error = ChunkerError;

    fn try_from(value: String) -> ChunkerResult<Self> {
        value.parse()
    }
}

impl From<Strategy> for String {
    fn from(strategy: Strategy) -> Self {
        strategy.to_string()
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Fixed { size } => write!(f, "size-{size}"),
            Strategy::ContentDefined(bounds) => write!(
                f,
                "rabin-min:{}-avg:{}-max:{}",
                bounds.min, bounds.avg, bounds.max
            ),
            Strategy::ErasureCoded(config) => write!(
                f,
                "reed-solomon-{}-{}-{}",
                config.data_shards, config.parity_shards, config.shard_chunk_size
            ),
        }
    }
}

impl<R> ChunkProducer for Splitter<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    type Reader = Pin<Box<dyn AsyncRead + Send>>;

    async fn next_chunk(&mut self) -> ChunkerResult<Option<Bytes>> {
        match self {
            Splitter::Fixed(chunker) => chunker.next_chunk().await,
            Splitter::ContentDefined(chunker) => chunker.next_chunk().await,
            Splitter::ErasureCoded(splitter) => splitter.next_chunk().await,
        }
    }

    fn into_reader(self) -> Self::Reader {
        match self {
            Splitter::Fixed(chunker) => Box::pin(chunker.into_reader()),
            Splitter::ContentDefined(chunker) => Box::pin(chunker.into_reader()),
            Splitter::ErasureCoded(splitter) => Box::pin(splitter.into_reader()),
        }
    }

    fn chunk_size(&self) -> u64 {
        match self {
            Splitter::Fixed(chunker) => chunker.chunk_size(),
            Splitter::ContentDefined(chunker) => chunker.chunk_size(),
            Splitter::ErasureCoded(splitter) => splitter.chunk_size(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rand::{rngs::StdRng, RngCore, SeedableRng};
    use tokio::io::AsyncReadExt;

    use crate::{ChunkProducerExt, CHUNK_SIZE_LIMIT, RABIN_MIN_SIZE};

    use super::*;

    fn parse_err(s: &str) -> ChunkerError {
        match s.parse::<Strategy>() {
            Ok(strategy) => panic!("{s:?} parsed as {strategy:?}"),
            Err(error) => error,
        }
    }

    #[test]
    fn test_parse_default_and_size() -> anyhow::Result<()> {
        assert_eq!("".parse::<Strategy>()?, Strategy::default());
        assert_eq!("default".parse::<Strategy>()?, Strategy::default());
        assert_eq!("size-32".parse::<Strategy>()?, Strategy::Fixed { size: 32 });
        assert_eq!(
            format!("size-{CHUNK_SIZE_LIMIT}").parse::<Strategy>()?,
            Strategy::Fixed {
                size: CHUNK_SIZE_LIMIT
            }
        );

        assert_eq!(parse_err("size-0"), ChunkerError::ZeroChunkSize);
        assert_eq!(
            parse_err(&format!("size-{}", CHUNK_SIZE_LIMIT + 1)),
            ChunkerError::ChunkSizeTooLarge(CHUNK_SIZE_LIMIT + 1, CHUNK_SIZE_LIMIT)
        );
        assert_eq!(
            parse_err("size-many"),
            ChunkerError::InvalidNumber {
                token: "many".into()
            }
        );
        assert_eq!(
            parse_err("size-1-2"),
            ChunkerError::InvalidFormat {
                token: "size-1-2".into(),
                expected: "'size-[size]'"
            }
        );
        assert_eq!(
            parse_err("sized-32"),
            ChunkerError::UnrecognizedStrategy("sized-32".into())
        );

        Ok(())
    }

    #[test]
    fn test_parse_rabin() -> anyhow::Result<()> {
        assert_eq!(
            "rabin".parse::<Strategy>()?,
            Strategy::ContentDefined(CdcBounds::default())
        );
        assert_eq!(
            "rabin-18-25-32".parse::<Strategy>()?,
            Strategy::ContentDefined(CdcBounds::new(18, 25, 32))
        );
        assert_eq!(
            "rabin-min:18-avg:25-max:32".parse::<Strategy>()?,
            Strategy::ContentDefined(CdcBounds::new(18, 25, 32))
        );
        assert_eq!(
            "rabin-3000".parse::<Strategy>()?,
            Strategy::ContentDefined(CdcBounds::new(1000, 3000, 4500))
        );

        assert_eq!(
            parse_err("rabin-15-23-31"),
            ChunkerError::RabinMinTooSmall(15, RABIN_MIN_SIZE)
        );
        assert_eq!(parse_err("rabin-20-20-21"), ChunkerError::RabinMinNotBelowAvg);
        assert_eq!(
            parse_err("rabin-20-20-21").to_string(),
            "Incorrect format: rabin-min must be smaller than rabin-avg"
        );
        assert_eq!(parse_err("rabin-19-21-21"), ChunkerError::RabinAvgNotBelowMax);

        format!("rabin-19-21-{CHUNK_SIZE_LIMIT}").parse::<Strategy>()?;
        assert_eq!(
            parse_err(&format!("rabin-19-21-{}", CHUNK_SIZE_LIMIT + 1)),
            ChunkerError::ChunkSizeTooLarge(CHUNK_SIZE_LIMIT + 1, CHUNK_SIZE_LIMIT)
        );

        // Two thirds of the limit is the largest average whose derived max still fits.
        let two_thirds = (CHUNK_SIZE_LIMIT * 2).div_ceil(3);
        format!("rabin-{two_thirds}").parse::<Strategy>()?;
        assert!(matches!(
            parse_err(&format!("rabin-{}", two_thirds + 1)),
            ChunkerError::ChunkSizeTooLarge(_, CHUNK_SIZE_LIMIT)
        ));

        assert_eq!(
            parse_err("rabin-max:18-avg:25-min:32"),
            ChunkerError::UnexpectedLabel {
                expected: "min",
                found: "max".into()
            }
        );
        assert_eq!(
            parse_err("rabin-"),
            ChunkerError::InvalidNumber { token: "".into() }
        );
        assert!(parse_err("rabin-1-2").to_string().contains("\"rabin-1-2\""));

        // Derived bounds never overflow.
        assert_eq!(
            parse_err("rabin-18446744073709551615"),
            ChunkerError::ChunkSizeTooLarge(u64::MAX, CHUNK_SIZE_LIMIT)
        );

        Ok(())
    }

    #[test]
    fn test_parse_reed_solomon() -> anyhow::Result<()> {
        let cases = [
            ("reed-solomon", true),
            ("reed-solomon-", false),
            ("reed-s0lomon", false),
            ("reed-solomon-10", false),
            ("reed-solomon-10-20", false),
            ("reed-solomon-10-20-0", false),
            ("reed-solomon-10-20-100", true),
            ("reed-solomon-0-20-100", false),
            ("reed-solomon-10-0-100", false),
            ("reed-solomon-150-150-100", false),
        ];

        for (s, success) in cases {
            assert_eq!(s.parse::<Strategy>().is_ok(), success, "{s}");
        }

        assert_eq!(
            "reed-solomon".parse::<Strategy>()?,
            Strategy::ErasureCoded(ErasureConfig::default())
        );
        assert_eq!(
            parse_err("reed-solomon-10-0-100"),
            ChunkerError::ZeroParityShards(0)
        );
        assert_eq!(
            parse_err("reed-solomon-150-150-100"),
            ChunkerError::TooManyShards(300, 256)
        );
        assert_eq!(
            parse_err("reed-s0lomon"),
            ChunkerError::UnrecognizedStrategy("reed-s0lomon".into())
        );
        assert!(parse_err("reed-solomon-10-0-100").is_config());
        assert!(parse_err("reed-solomon-10")
            .to_string()
            .contains("\"reed-solomon-10\""));

        Ok(())
    }

    #[test]
    fn test_strategy_string_round_trip() -> anyhow::Result<()> {
        for s in [
            "size-32",
            "rabin-min:18-avg:25-max:32",
            "reed-solomon-10-20-262144",
        ] {
            assert_eq!(s.parse::<Strategy>()?.to_string(), s);
        }

        assert_eq!(Strategy::default().to_string(), "size-262144");

        let json = serde_json::to_string(&Strategy::Fixed { size: 32 })?;
        assert_eq!(json, r#""size-32""#);
        assert_eq!(
            serde_json::from_str::<Strategy>(r#""rabin""#)?,
            Strategy::ContentDefined(CdcBounds::default())
        );
        assert!(serde_json::from_str::<Strategy>(r#""size-0""#).is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_from_string_builds_every_splitter() -> anyhow::Result<()> {
        let mut data = vec![0u8; 10_000];
        StdRng::seed_from_u64(1).fill_bytes(&mut data);

        let mut splitter = from_string(Cursor::new(data.clone()), "size-4096").await?;
        assert!(matches!(splitter, Splitter::Fixed(_)));
        assert_eq!(splitter.chunk_size(), 4096);
        let chunks = splitter.collect_chunks().await?;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), data);

        let mut splitter = from_string(Cursor::new(data.clone()), "rabin-16-32-64").await?;
        assert!(splitter.metadata().is_none());
        let chunks = splitter.collect_chunks().await?;
        assert!(chunks.iter().all(|c| c.len() <= 64));
        assert_eq!(chunks.concat(), data);

        let mut splitter = from_string(Cursor::new(data.clone()), "reed-solomon-4-2-1024").await?;
        let metadata = splitter.metadata().unwrap();
        assert_eq!((metadata.num_data, metadata.num_parity), (4, 2));
        assert_eq!(metadata.total_len, 10_000);
        let chunks = splitter.collect_chunks().await?;
        assert_eq!(chunks.concat()[..10_000], data[..]);
        assert_eq!(chunks.concat().len(), 6 * 2500);

        let result = from_string(Cursor::new(data), "fastcdc").await;
        assert_eq!(
            result.err().map(|e| e.to_string()),
            Some("Unrecognized chunker option: fastcdc".to_string())
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_splitter_into_reader() -> anyhow::Result<()> {
        let mut splitter = from_string(Cursor::new(b"0123456789".to_vec()), "size-3").await?;
        splitter.next_chunk().await?;

        let mut rest = String::new();
        splitter.into_reader().read_to_string(&mut rest).await?;
        assert_eq!(rest, "3456789");

        Ok(())
    }

    #[tokio::test]
    async fn test_config_splitter_uses_streaming_pipeline() -> anyhow::Result<()> {
        let config = ChunkerConfig::from_toml_str(
            r#"
            strategy = "reed-solomon-3-2-100"
            pipeline = "streaming"
            pool_capacity = 2
            "#,
        )?;

        let data = b"streamed through the configured pipeline".to_vec();
        let length = data.len() as u64;
        let mut splitter = config.splitter(Cursor::new(data.clone()), Some(length)).await?;

        let chunks = splitter.collect_chunks().await?;
        assert_eq!(chunks.concat()[..data.len()], data[..]);
        assert_eq!(splitter.metadata().map(|m| m.total_len), Some(length));

        Ok(())
    }
}
