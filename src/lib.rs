//! Pull-based reader over every partition of a sharded stream.
//!
//! The host drives a [`reader::StreamReader`] through the
//! [`reader::UnboundedReader`] contract: `start`, then repeated `advance`,
//! reading `current`, `watermark` and `checkpoint` in between.

pub mod checkpoint;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod reader;
pub mod watermark;

pub use checkpoint::{
    Checkpoint, CheckpointGenerator, DynamicCheckpointGenerator, PartitionCheckpoint,
    StaticCheckpointGenerator,
};
pub use client::{ClientError, Position, Record, StartingPoint, StreamClient};
pub use reader::{ReaderError, StreamReader, UnboundedReader};
pub use watermark::{WatermarkConfig, WatermarkEstimator};
