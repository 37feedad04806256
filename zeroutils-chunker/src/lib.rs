//! Streaming chunk splitting for content-addressed storage.
//!
//! This crate cuts byte streams into bounded-size chunks, the leaves of a content-addressed DAG.
//! Every splitting strategy implements [`ChunkProducer`]:
//!
//! - [`FixedSizeChunker`] cuts chunks of one size.
//! - [`ContentDefinedChunker`] cuts chunks at boundaries a [`BoundaryEngine`] finds in the content.
//! - [`ErasureCodedSplitter`] erasure codes the stream into data and parity shards and exposes
//!   every shard as its own producer through [`MultiChunkProducer`].
//!
//! A [`Strategy`] names one of them and builds it, either from its string form or from a
//! [`ChunkerConfig`].

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod chunker;
mod config;
mod error;
mod impls;
mod pool;
mod producer;
mod strategy;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use chunker::*;
pub use config::*;
pub use error::*;
pub use impls::*;
pub use pool::*;
pub use producer::*;
pub use strategy::*;
