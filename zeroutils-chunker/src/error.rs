use std::{error::Error, fmt::Display, io, sync::Arc};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a chunking operation.
pub type ChunkerResult<T> = Result<T, ChunkerError>;

/// An error that occurred while configuring or running a chunker.
///
/// Errors are cloneable so a producer can hand out the same terminal error on every call after it
/// failed, and so one failure can be shared by every shard of an erasure-coded split.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChunkerError {
    /// Chunk sizes must be greater than zero.
    #[error("Chunker size must be greater than 0")]
    ZeroChunkSize,

    /// A chunker parameter exceeds the maximum chunk size.
    #[error("Chunker parameters may not exceed the maximum chunk size of {1}: got {0}")]
    ChunkSizeTooLarge(u64, u64),

    /// The rabin minimum is below the allowed floor.
    #[error("Rabin min must be at least {1}: got {0}")]
    RabinMinTooSmall(u64, u64),

    /// The rabin minimum is not smaller than the average.
    #[error("Incorrect format: rabin-min must be smaller than rabin-avg")]
    RabinMinNotBelowAvg,

    /// The rabin average is not smaller than the maximum.
    #[error("Incorrect format: rabin-avg must be smaller than rabin-max")]
    RabinAvgNotBelowMax,

    /// An erasure coded split needs at least one data shard.
    #[error("Invalid number of data shards: {0}")]
    ZeroDataShards(usize),

    /// An erasure coded split needs at least one parity shard.
    #[error("Invalid number of parity shards: {0}")]
    ZeroParityShards(usize),

    /// The data and parity shards together exceed the erasure coding alphabet.
    #[error("Cannot encode more than {1} shards (data+parity): got {0}")]
    TooManyShards(usize, usize),

    /// The codec was built for a different shard layout than the one requested.
    #[error("Codec shard layout {codec:?} does not match the configured layout {config:?}")]
    CodecShardMismatch {
        /// The (data, parity) layout of the codec.
        codec: (usize, usize),

        /// The (data, parity) layout of the configuration.
        config: (usize, usize),
    },

    /// The strategy string names no known chunker.
    #[error("Unrecognized chunker option: {0}")]
    UnrecognizedStrategy(String),

    /// The strategy string has the wrong shape.
    #[error("Incorrect format: {token:?}, expected {expected}")]
    InvalidFormat {
        /// The rejected strategy string.
        token: String,

        /// The shapes the strategy accepts.
        expected: &'static str,
    },

    /// A numeric field of the strategy string could not be parsed.
    #[error("Invalid number in chunker option: {token:?}")]
    InvalidNumber {
        /// The offending token.
        token: String,
    },

    /// A labelled field of the strategy string carries the wrong label.
    #[error("Unexpected label in chunker option: expected {expected:?}, got {found:?}")]
    UnexpectedLabel {
        /// The label expected at this position.
        expected: &'static str,

        /// The label found.
        found: String,
    },

    /// Toml deserialization error.
    #[error("Toml deserialization error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The underlying stream failed.
    #[error("Io error: {0}")]
    Io(IoError),

    /// The total length of the input could not be discovered.
    #[error("Unable to discover input length: {0}")]
    LengthDiscovery(IoError),

    /// The codec failed to split the input into data shards.
    #[error("Erasure codec split failed: {0}")]
    CodecSplit(String),

    /// The codec failed to compute parity shards.
    #[error("Erasure codec encode failed: {0}")]
    CodecEncode(String),

    /// The input holds more bytes than the declared length.
    #[error("More data than the declared length of {0} bytes")]
    DeclaredLengthExceeded(u64),

    /// The input ended before the declared length was reached.
    #[error("Input ended after {actual} bytes, expected {declared}")]
    InputTruncated {
        /// The declared input length.
        declared: u64,

        /// The number of bytes actually read.
        actual: u64,
    },

    /// A shard stream closed before delivering all of its bytes.
    #[error("Shard {index} closed before it was complete")]
    ShardTruncated {
        /// The index of the shard.
        index: usize,
    },

    /// Custom error.
    #[error("Custom error: {0}")]
    Custom(#[from] AnyError),
}

/// An io error that can be cloned and compared.
#[derive(Debug, Clone)]
pub struct IoError {
    error: Arc<io::Error>,
}

/// An error that can represent any error.
#[derive(Debug, Clone)]
pub struct AnyError {
    error: Arc<anyhow::Error>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ChunkerError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> ChunkerError {
        ChunkerError::Custom(AnyError {
            error: Arc::new(error.into()),
        })
    }

    /// Returns `true` if the error was caused by a bad chunker configuration rather than by the
    /// stream or the codec.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ChunkerError::ZeroChunkSize
                | ChunkerError::ChunkSizeTooLarge(..)
                | ChunkerError::RabinMinTooSmall(..)
                | ChunkerError::RabinMinNotBelowAvg
                | ChunkerError::RabinAvgNotBelowMax
                | ChunkerError::ZeroDataShards(_)
                | ChunkerError::ZeroParityShards(_)
                | ChunkerError::TooManyShards(..)
                | ChunkerError::CodecShardMismatch { .. }
                | ChunkerError::UnrecognizedStrategy(_)
                | ChunkerError::InvalidFormat { .. }
                | ChunkerError::InvalidNumber { .. }
                | ChunkerError::UnexpectedLabel { .. }
                | ChunkerError::Toml(_)
        )
    }

    /// Wraps the error in an [`io::Error`] so it can travel through an `AsyncRead`.
    ///
    /// Converting the io error back with `ChunkerError::from` yields this error again.
    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }
}

impl IoError {
    /// Returns the kind of the wrapped io error.
    pub fn kind(&self) -> io::ErrorKind {
        self.error.kind()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `ChunkerResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> ChunkerResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<io::Error> for ChunkerError {
    fn from(error: io::Error) -> Self {
        match error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ChunkerError>())
        {
            Some(inner) => inner.clone(),
            None => ChunkerError::Io(error.into()),
        }
    }
}

impl From<io::Error> for IoError {
    fn from(error: io::Error) -> Self {
        IoError {
            error: Arc::new(error),
        }
    }
}

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.error.kind() == other.error.kind()
            && self.error.to_string() == other.error.to_string()
    }
}

impl Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for IoError {}

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_error_survives_io_round_trip() {
        let error = ChunkerError::DeclaredLengthExceeded(42);
        assert_eq!(ChunkerError::from(error.clone().into_io()), error);

        let plain = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        match ChunkerError::from(plain) {
            ChunkerError::Io(inner) => assert_eq!(inner.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_chunker_error_classification() {
        assert!(ChunkerError::ZeroChunkSize.is_config());
        assert!(ChunkerError::TooManyShards(300, 256).is_config());
        assert!(!ChunkerError::CodecEncode("boom".into()).is_config());
        assert!(!ChunkerError::custom(anyhow::anyhow!("boom")).is_config());
    }
}
