//! In-memory stream backend.
//!
//! Partitions are plain vectors that can be appended to while a reader is
//! polling them. Failures can be injected per partition to exercise the
//! reader's transient/permanent handling.

use super::{ClientError, Position, Record, RecordBatch, StartingPoint, StreamClient};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct StreamState {
    /// Partition ids in creation order.
    order: Vec<String>,
    partitions: HashMap<String, Vec<Record>>,
    failures: HashMap<String, InjectedFailure>,
    fail_listing: Option<ClientError>,
    fetch_count: HashMap<String, usize>,
}

#[derive(Debug)]
struct InjectedFailure {
    remaining: usize,
    error: ClientError,
}

#[derive(Debug, Default)]
pub struct InMemoryStream {
    state: Mutex<StreamState>,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stream with the given (empty) partitions.
    pub fn with_partitions<I, S>(partition_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stream = Self::new();
        for id in partition_ids {
            stream.add_partition(id);
        }
        stream
    }

    pub fn add_partition(&self, partition_id: impl Into<String>) {
        let partition_id = partition_id.into();
        let mut state = self.lock_unpoisoned();
        if !state.partitions.contains_key(&partition_id) {
            state.order.push(partition_id.clone());
            state.partitions.insert(partition_id, Vec::new());
        }
    }

    /// Append a record to a partition, creating the partition if needed.
    /// Sequences are assigned densely starting at 1.
    pub fn append(
        &self,
        partition_id: &str,
        event_time: DateTime<Utc>,
        data: impl Into<Vec<u8>>,
    ) -> Record {
        self.add_partition(partition_id);
        let mut state = self.lock_unpoisoned();
        let records = state.partitions.entry(partition_id.to_string()).or_default();
        let sequence = records.len() as u64 + 1;
        let record = Record::new(partition_id, sequence, event_time, data);
        records.push(record.clone());
        record
    }

    /// Fail the next `count` fetches against `partition_id` with `error`.
    pub fn fail_fetches(&self, partition_id: &str, count: usize, error: ClientError) {
        let mut state = self.lock_unpoisoned();
        state.failures.insert(
            partition_id.to_string(),
            InjectedFailure {
                remaining: count,
                error,
            },
        );
    }

    /// Fail every `list_partitions` call with `error` until cleared with `None`.
    pub fn fail_listing(&self, error: Option<ClientError>) {
        self.lock_unpoisoned().fail_listing = error;
    }

    /// Number of fetch calls made against `partition_id`, failed ones included.
    pub fn fetch_count(&self, partition_id: &str) -> usize {
        self.lock_unpoisoned()
            .fetch_count
            .get(partition_id)
            .copied()
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StreamState>, ClientError> {
        self.state
            .lock()
            .map_err(|_| ClientError::Permanent("in-memory stream state poisoned".to_string()))
    }

    // Mutation helpers used from tests recover from poisoning rather than
    // hiding the panic that caused it.
    fn lock_unpoisoned(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StreamClient for InMemoryStream {
    fn list_partitions(&self) -> Result<Vec<String>, ClientError> {
        let state = self.lock()?;
        if let Some(error) = &state.fail_listing {
            return Err(error.clone());
        }
        Ok(state.order.clone())
    }

    fn resolve_position(
        &self,
        partition_id: &str,
        start: &StartingPoint,
    ) -> Result<Position, ClientError> {
        let state = self.lock()?;
        let records = state.partitions.get(partition_id).ok_or_else(|| {
            ClientError::Permanent(format!("unknown partition '{}'", partition_id))
        })?;

        Ok(match start {
            StartingPoint::Latest => match records.last() {
                Some(last) => last.position_after(),
                None => Position::TrimHorizon,
            },
            other => Position::from(*other),
        })
    }

    fn fetch_records(
        &self,
        partition_id: &str,
        position: &Position,
        limit: usize,
    ) -> Result<RecordBatch, ClientError> {
        let mut state = self.lock()?;
        *state.fetch_count.entry(partition_id.to_string()).or_insert(0) += 1;

        if let Some(failure) = state.failures.get_mut(partition_id) {
            if failure.remaining > 0 {
                failure.remaining -= 1;
                return Err(failure.error.clone());
            }
        }

        let records = state.partitions.get(partition_id).ok_or_else(|| {
            ClientError::Permanent(format!("unknown partition '{}'", partition_id))
        })?;

        let start = match position {
            Position::TrimHorizon => 0,
            // Unpinned latest: nothing that exists now is visible.
            Position::Latest => records.len(),
            Position::AtTimestamp { timestamp } => records
                .iter()
                .position(|r| r.event_time >= *timestamp)
                .unwrap_or(records.len()),
            Position::AfterSequence { sequence } => records
                .iter()
                .position(|r| r.sequence > *sequence)
                .unwrap_or(records.len()),
        };

        let batch = records.iter().skip(start).take(limit).cloned().collect();
        Ok(RecordBatch::new(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_append_assigns_sequences() {
        let stream = InMemoryStream::new();
        let r1 = stream.append("s1", ts(100), b"a".to_vec());
        let r2 = stream.append("s1", ts(200), b"b".to_vec());
        assert_eq!(r1.sequence, 1);
        assert_eq!(r2.sequence, 2);
        assert_eq!(stream.list_partitions().unwrap(), vec!["s1".to_string()]);
    }

    #[test]
    fn test_fetch_after_sequence() {
        let stream = InMemoryStream::new();
        for i in 0..5 {
            stream.append("s1", ts(i * 10), Vec::new());
        }

        let batch = stream
            .fetch_records("s1", &Position::AfterSequence { sequence: 2 }, 2)
            .unwrap();
        let sequences: Vec<u64> = batch.records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);
    }

    #[test]
    fn test_fetch_at_timestamp() {
        let stream = InMemoryStream::new();
        stream.append("s1", ts(100), Vec::new());
        stream.append("s1", ts(200), Vec::new());
        stream.append("s1", ts(300), Vec::new());

        let batch = stream
            .fetch_records("s1", &Position::AtTimestamp { timestamp: ts(150) }, 10)
            .unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].sequence, 2);
    }

    #[test]
    fn test_resolve_latest_pins_sequence() {
        let stream = InMemoryStream::with_partitions(["empty"]);
        stream.append("s1", ts(100), Vec::new());
        stream.append("s1", ts(200), Vec::new());

        assert_eq!(
            stream.resolve_position("s1", &StartingPoint::Latest).unwrap(),
            Position::AfterSequence { sequence: 2 }
        );
        assert_eq!(
            stream.resolve_position("empty", &StartingPoint::Latest).unwrap(),
            Position::TrimHorizon
        );
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let stream = InMemoryStream::new();
        stream.append("s1", ts(100), Vec::new());
        stream.fail_fetches("s1", 2, ClientError::Transient("throttled".to_string()));

        assert!(stream.fetch_records("s1", &Position::TrimHorizon, 10).is_err());
        assert!(stream.fetch_records("s1", &Position::TrimHorizon, 10).is_err());
        assert_eq!(
            stream
                .fetch_records("s1", &Position::TrimHorizon, 10)
                .unwrap()
                .records
                .len(),
            1
        );
        assert_eq!(stream.fetch_count("s1"), 3);
    }

    #[test]
    fn test_unknown_partition_is_permanent() {
        let stream = InMemoryStream::new();
        let err = stream
            .fetch_records("missing", &Position::TrimHorizon, 10)
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
