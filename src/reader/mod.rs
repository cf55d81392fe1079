//! Pull-based reader over every partition of a stream.
//!
//! A single caller drives the reader: `start()` once, then `advance()`
//! repeatedly, interleaved with the query methods. Nothing runs in the
//! background, so each call does a bounded amount of work and returns.

pub mod cursor;
pub mod round_robin;

use crate::checkpoint::{Checkpoint, CheckpointGenerator, PartitionCheckpoint};
use crate::client::{ClientError, Record, StreamClient};
use crate::clock::{Clock, SystemClock};
use crate::watermark::{WatermarkConfig, WatermarkError, WatermarkEstimator};
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use cursor::PartitionCursor;
pub use round_robin::RoundRobin;

pub const DEFAULT_FETCH_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("failed to generate initial checkpoint: {0}")]
    Startup(#[source] ClientError),

    #[error("partition '{partition_id}' failed permanently: {source}")]
    Permanent {
        partition_id: String,
        #[source]
        source: ClientError,
    },

    #[error("no current record")]
    NoCurrentRecord,

    #[error("cannot {operation} a reader that is {state}")]
    InvalidState {
        operation: &'static str,
        state: ReaderStateKind,
    },

    #[error("invalid watermark configuration: {0}")]
    Watermark(#[from] WatermarkError),
}

impl ReaderError {
    /// Startup failures and permanent partition failures are I/O-kind:
    /// the host should rebuild the reader and try again.
    pub fn is_io(&self) -> bool {
        matches!(self, ReaderError::Startup(_) | ReaderError::Permanent { .. })
    }
}

/// Host-facing pull contract.
pub trait UnboundedReader {
    type Item;
    type Mark;

    /// Initialize and try to read the first record.
    fn start(&mut self) -> Result<bool, ReaderError>;

    /// Try to move to the next record. `Ok(false)` means nothing is
    /// available right now; call again later.
    fn advance(&mut self) -> Result<bool, ReaderError>;

    fn current(&self) -> Result<&Self::Item, ReaderError>;

    fn current_id(&self) -> Result<&[u8], ReaderError>;

    fn current_timestamp(&self) -> Result<DateTime<Utc>, ReaderError>;

    /// Lower bound on event times not yet read. Never decreases.
    fn watermark(&mut self) -> DateTime<Utc>;

    fn checkpoint(&self) -> Result<Self::Mark, ReaderError>;

    fn close(&mut self) -> Result<(), ReaderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStateKind {
    Unstarted,
    Started,
    Closed,
}

impl fmt::Display for ReaderStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderStateKind::Unstarted => write!(f, "unstarted"),
            ReaderStateKind::Started => write!(f, "started"),
            ReaderStateKind::Closed => write!(f, "closed"),
        }
    }
}

enum ReaderState {
    Unstarted,
    Started(RoundRobin<PartitionCursor>),
    Closed,
}

impl ReaderState {
    fn kind(&self) -> ReaderStateKind {
        match self {
            ReaderState::Unstarted => ReaderStateKind::Unstarted,
            ReaderState::Started(_) => ReaderStateKind::Started,
            ReaderState::Closed => ReaderStateKind::Closed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum CurrentRecord {
    #[default]
    Empty,
    Holding(Record),
}

impl CurrentRecord {
    pub fn get(&self) -> Result<&Record, ReaderError> {
        match self {
            CurrentRecord::Holding(record) => Ok(record),
            CurrentRecord::Empty => Err(ReaderError::NoCurrentRecord),
        }
    }
}

/// Reads every partition of a stream through one round-robin cursor set.
pub struct StreamReader {
    client: Arc<dyn StreamClient>,
    generator: Box<dyn CheckpointGenerator>,
    clock: Box<dyn Clock>,
    fetch_limit: usize,
    state: ReaderState,
    current: CurrentRecord,
    estimator: WatermarkEstimator,
    last_watermark: DateTime<Utc>,
}

impl StreamReader {
    pub fn new(
        client: Arc<dyn StreamClient>,
        generator: Box<dyn CheckpointGenerator>,
        watermark: &WatermarkConfig,
    ) -> Result<Self, ReaderError> {
        Ok(Self {
            client,
            generator,
            clock: Box::new(SystemClock),
            fetch_limit: DEFAULT_FETCH_LIMIT,
            state: ReaderState::Unstarted,
            current: CurrentRecord::Empty,
            estimator: WatermarkEstimator::new(watermark)?,
            last_watermark: DateTime::<Utc>::MIN_UTC,
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_fetch_limit(mut self, fetch_limit: usize) -> Self {
        self.fetch_limit = fetch_limit.max(1);
        self
    }

    pub fn state(&self) -> ReaderStateKind {
        self.state.kind()
    }

    pub fn partition_count(&self) -> usize {
        match &self.state {
            ReaderState::Started(cursors) => cursors.len(),
            _ => 0,
        }
    }

    /// Partition the next `advance()` probes first.
    pub fn current_partition(&self) -> Option<&str> {
        match &self.state {
            ReaderState::Started(cursors) => cursors.current().map(|c| c.partition_id()),
            _ => None,
        }
    }

    fn cursors_mut(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut RoundRobin<PartitionCursor>, ReaderError> {
        match &mut self.state {
            ReaderState::Started(cursors) => Ok(cursors),
            other => Err(ReaderError::InvalidState {
                operation,
                state: other.kind(),
            }),
        }
    }

    fn current_record(&self, operation: &'static str) -> Result<&Record, ReaderError> {
        match &self.state {
            ReaderState::Started(_) => self.current.get(),
            other => Err(ReaderError::InvalidState {
                operation,
                state: other.kind(),
            }),
        }
    }

    fn observe(&mut self, record: &Record) {
        let now = self.clock.now();
        self.estimator
            .add(now.timestamp_millis(), record.event_time.timestamp_millis());
    }
}

impl UnboundedReader for StreamReader {
    type Item = Record;
    type Mark = Checkpoint;

    fn start(&mut self) -> Result<bool, ReaderError> {
        if !matches!(self.state, ReaderState::Unstarted) {
            return Err(ReaderError::InvalidState {
                operation: "start",
                state: self.state.kind(),
            });
        }

        info!("Starting reader using {}", self.generator);
        let initial = self
            .generator
            .generate(self.client.as_ref())
            .map_err(ReaderError::Startup)?;

        let cursors: Vec<PartitionCursor> = initial
            .into_iter()
            .map(|p| {
                PartitionCursor::new(self.client.clone(), p.partition_id, p.position, self.fetch_limit)
            })
            .collect();
        if cursors.is_empty() {
            warn!("Stream has no partitions, reader will never yield records");
        } else {
            info!(partitions = cursors.len(), "Reader started");
        }

        self.state = ReaderState::Started(RoundRobin::new(cursors));
        self.advance()
    }

    fn advance(&mut self) -> Result<bool, ReaderError> {
        self.current = CurrentRecord::Empty;
        let cursors = self.cursors_mut("advance")?;

        let mut found = None;
        for _ in 0..cursors.len() {
            let Some(cursor) = cursors.current_mut() else {
                break;
            };

            match cursor.next() {
                Ok(Some(record)) => {
                    found = Some(record);
                    break;
                }
                Ok(None) => cursors.rotate(),
                Err(e) if e.is_transient() => {
                    warn!(
                        partition_id = %cursor.partition_id(),
                        error = %e,
                        "Transient failure reading partition, skipping it this round"
                    );
                    cursors.rotate();
                }
                Err(e) => {
                    return Err(ReaderError::Permanent {
                        partition_id: cursor.partition_id().to_string(),
                        source: e,
                    });
                }
            }
        }

        match found {
            Some(record) => {
                self.observe(&record);
                self.current = CurrentRecord::Holding(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn current(&self) -> Result<&Record, ReaderError> {
        self.current_record("read the current record of")
    }

    fn current_id(&self) -> Result<&[u8], ReaderError> {
        self.current_record("read the current id of")
            .map(|r| r.id.as_slice())
    }

    fn current_timestamp(&self) -> Result<DateTime<Utc>, ReaderError> {
        self.current_record("read the current timestamp of")
            .map(|r| r.event_time)
    }

    fn watermark(&mut self) -> DateTime<Utc> {
        let now = self.clock.now();
        match self.estimator.get(now.timestamp_millis()) {
            // Nothing read within the window: the reader is caught up.
            None => {
                if now > self.last_watermark {
                    self.last_watermark = now;
                }
            }
            Some(min_ms) if self.estimator.is_significant() => {
                let min_read = Utc
                    .timestamp_millis_opt(min_ms)
                    .single()
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                if min_read > self.last_watermark {
                    debug!(watermark = %min_read, "Watermark advanced");
                    self.last_watermark = min_read;
                }
            }
            Some(_) => {}
        }
        self.last_watermark
    }

    fn checkpoint(&self) -> Result<Checkpoint, ReaderError> {
        match &self.state {
            ReaderState::Started(cursors) => Ok(cursors
                .iter()
                .map(|c| PartitionCheckpoint::new(c.partition_id(), c.current_position().clone()))
                .collect()),
            other => Err(ReaderError::InvalidState {
                operation: "checkpoint",
                state: other.kind(),
            }),
        }
    }

    fn close(&mut self) -> Result<(), ReaderError> {
        if let ReaderState::Started(cursors) = &mut self.state {
            for cursor in cursors.iter_mut() {
                cursor.close();
            }
            info!(partitions = cursors.len(), "Reader closed");
        }
        self.state = ReaderState::Closed;
        self.current = CurrentRecord::Empty;
        Ok(())
    }
}
