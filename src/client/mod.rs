pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

pub use file::FileStream;
pub use memory::InMemoryStream;

/// Failure reported by a stream backend.
///
/// `Transient` failures leave every cursor exactly where it was and may be
/// retried on the next poll. `Permanent` failures are fatal to the reader.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("transient stream error: {0}")]
    Transient(String),

    #[error("permanent stream error: {0}")]
    Permanent(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidData => {
                ClientError::Permanent(e.to_string())
            }
            _ => ClientError::Transient(e.to_string()),
        }
    }
}

/// Per-partition read position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Position {
    /// Oldest record still retained by the partition.
    TrimHorizon,
    /// Only records appended after the position is first used.
    Latest,
    /// First record whose event time is at or after `timestamp`.
    AtTimestamp { timestamp: DateTime<Utc> },
    /// Record immediately following `sequence`.
    AfterSequence { sequence: u64 },
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::TrimHorizon => write!(f, "trim_horizon"),
            Position::Latest => write!(f, "latest"),
            Position::AtTimestamp { timestamp } => write!(f, "at_timestamp({})", timestamp.to_rfc3339()),
            Position::AfterSequence { sequence } => write!(f, "after_sequence({})", sequence),
        }
    }
}

/// Where a reader without a stored checkpoint begins in every partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartingPoint {
    TrimHorizon,
    Latest,
    AtTimestamp(DateTime<Utc>),
}

impl From<StartingPoint> for Position {
    fn from(start: StartingPoint) -> Self {
        match start {
            StartingPoint::TrimHorizon => Position::TrimHorizon,
            StartingPoint::Latest => Position::Latest,
            StartingPoint::AtTimestamp(timestamp) => Position::AtTimestamp { timestamp },
        }
    }
}

impl fmt::Display for StartingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Position::from(*self).fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: Vec<u8>,
    pub partition_id: String,
    pub sequence: u64,
    /// Approximate time the record entered the stream. Not authoritative.
    pub event_time: DateTime<Utc>,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(
        partition_id: impl Into<String>,
        sequence: u64,
        event_time: DateTime<Utc>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        let partition_id = partition_id.into();
        Self {
            id: record_id(&partition_id, sequence),
            partition_id,
            sequence,
            event_time,
            data: data.into(),
        }
    }

    /// The position a cursor holds after handing out this record.
    pub fn position_after(&self) -> Position {
        Position::AfterSequence {
            sequence: self.sequence,
        }
    }
}

/// Stable id derived from the record's coordinates, so a replayed record
/// carries the same id as its first delivery.
fn record_id(partition_id: &str, sequence: u64) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(partition_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(sequence.to_be_bytes());
    hasher.finalize().to_vec()
}

/// Records returned by one fetch call, oldest first. An empty batch means
/// nothing is available at the requested position right now.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<Record>,
}

impl RecordBatch {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Network-facing half of the reader. Calls are synchronous; any blocking
/// happens inside the implementation.
pub trait StreamClient {
    fn list_partitions(&self) -> Result<Vec<String>, ClientError>;

    /// Turn a starting point into a position for `partition_id`. Backends
    /// that can pin `Latest` to a concrete sequence should override this.
    fn resolve_position(
        &self,
        partition_id: &str,
        start: &StartingPoint,
    ) -> Result<Position, ClientError> {
        let _ = partition_id;
        Ok(Position::from(*start))
    }

    /// Fetch up to `limit` records at `position`, oldest first.
    fn fetch_records(
        &self,
        partition_id: &str,
        position: &Position,
        limit: usize,
    ) -> Result<RecordBatch, ClientError>;
}
