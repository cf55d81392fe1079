use crate::client::{ClientError, Position, Record, StartingPoint, StreamClient};
use std::collections::VecDeque;
use std::sync::Arc;

/// Lazy puller over a single partition.
///
/// Records are fetched in batches of up to `fetch_limit` and handed out one
/// at a time. `position` only moves when a record is handed out, so a
/// checkpoint taken between calls never skips a buffered record.
pub struct PartitionCursor {
    client: Arc<dyn StreamClient>,
    partition_id: String,
    fetch_limit: usize,
    position: Position,
    /// Concrete position used for fetching while `position` is still
    /// `Latest`; the checkpointed position stays `Latest` until a record is
    /// handed out.
    pinned_latest: Option<Position>,
    buffer: VecDeque<Record>,
}

impl PartitionCursor {
    pub fn new(
        client: Arc<dyn StreamClient>,
        partition_id: impl Into<String>,
        position: Position,
        fetch_limit: usize,
    ) -> Self {
        Self {
            client,
            partition_id: partition_id.into(),
            fetch_limit: fetch_limit.max(1),
            position,
            pinned_latest: None,
            buffer: VecDeque::new(),
        }
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// Position after the last record handed out.
    pub fn current_position(&self) -> &Position {
        &self.position
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next record, or `None` when the partition has nothing available right
    /// now. On error the position is unchanged.
    pub fn next(&mut self) -> Result<Option<Record>, ClientError> {
        if self.buffer.is_empty() {
            self.fill()?;
        }

        Ok(self.buffer.pop_front().map(|record| {
            self.position = record.position_after();
            self.pinned_latest = None;
            record
        }))
    }

    /// Drop buffered records. The cursor stays usable and refetches from its
    /// position on the next call.
    pub fn close(&mut self) {
        self.buffer.clear();
        self.pinned_latest = None;
    }

    fn fill(&mut self) -> Result<(), ClientError> {
        let fetch_from = self.fetch_position()?;
        let batch = self
            .client
            .fetch_records(&self.partition_id, &fetch_from, self.fetch_limit)?;

        // Backends may redeliver records at or before the position we hold.
        let already_read = match &fetch_from {
            Position::AfterSequence { sequence } => Some(*sequence),
            _ => None,
        };
        let fresh = batch
            .records
            .into_iter()
            .filter(|r| already_read.map_or(true, |seq| r.sequence > seq));
        self.buffer.extend(fresh);

        tracing::trace!(
            partition_id = %self.partition_id,
            position = %fetch_from,
            buffered = self.buffer.len(),
            "Fetched records"
        );
        Ok(())
    }

    fn fetch_position(&mut self) -> Result<Position, ClientError> {
        if self.position != Position::Latest {
            return Ok(self.position.clone());
        }
        if let Some(pinned) = &self.pinned_latest {
            return Ok(pinned.clone());
        }

        let pinned = self
            .client
            .resolve_position(&self.partition_id, &StartingPoint::Latest)?;
        self.pinned_latest = Some(pinned.clone());
        Ok(pinned)
    }
}

impl std::fmt::Debug for PartitionCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionCursor")
            .field("partition_id", &self.partition_id)
            .field("position", &self.position)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InMemoryStream, RecordBatch};
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn stream_with(records: &[(&str, i64)]) -> Arc<InMemoryStream> {
        let stream = Arc::new(InMemoryStream::new());
        for (partition, t) in records {
            stream.append(partition, ts(*t), Vec::new());
        }
        stream
    }

    #[test]
    fn test_next_advances_position() {
        let stream = stream_with(&[("s1", 100), ("s1", 200)]);
        let mut cursor = PartitionCursor::new(stream, "s1", Position::TrimHorizon, 10);

        let r1 = cursor.next().unwrap().unwrap();
        assert_eq!(r1.sequence, 1);
        assert_eq!(cursor.current_position(), &Position::AfterSequence { sequence: 1 });

        let r2 = cursor.next().unwrap().unwrap();
        assert_eq!(r2.sequence, 2);
        assert!(cursor.next().unwrap().is_none());
        assert_eq!(cursor.current_position(), &Position::AfterSequence { sequence: 2 });
    }

    #[test]
    fn test_position_unchanged_by_fetch() {
        let stream = stream_with(&[("s1", 100), ("s1", 200), ("s1", 300)]);
        let mut cursor = PartitionCursor::new(stream, "s1", Position::TrimHorizon, 10);

        cursor.next().unwrap().unwrap();
        // Two records sit in the buffer but were not handed out.
        assert_eq!(cursor.buffered(), 2);
        assert_eq!(cursor.current_position(), &Position::AfterSequence { sequence: 1 });
    }

    #[test]
    fn test_transient_error_keeps_position() {
        let stream = stream_with(&[("s1", 100), ("s1", 200)]);
        let mut cursor = PartitionCursor::new(stream.clone(), "s1", Position::TrimHorizon, 1);

        cursor.next().unwrap().unwrap();
        let before = cursor.current_position().clone();

        stream.fail_fetches("s1", 1, ClientError::Transient("throttled".to_string()));
        let err = cursor.next().unwrap_err();
        assert!(err.is_transient());
        assert_eq!(cursor.current_position(), &before);

        let r2 = cursor.next().unwrap().unwrap();
        assert_eq!(r2.sequence, 2);
    }

    #[test]
    fn test_picks_up_appended_records() {
        let stream = stream_with(&[("s1", 100)]);
        let mut cursor = PartitionCursor::new(stream.clone(), "s1", Position::TrimHorizon, 10);

        assert!(cursor.next().unwrap().is_some());
        assert!(cursor.next().unwrap().is_none());

        stream.append("s1", ts(200), Vec::new());
        assert_eq!(cursor.next().unwrap().unwrap().sequence, 2);
    }

    #[test]
    fn test_latest_stays_in_checkpoint_until_read() {
        let stream = stream_with(&[("s1", 100), ("s1", 200)]);
        let mut cursor = PartitionCursor::new(stream.clone(), "s1", Position::Latest, 10);

        assert!(cursor.next().unwrap().is_none());
        assert_eq!(cursor.current_position(), &Position::Latest);

        stream.append("s1", ts(300), Vec::new());
        let record = cursor.next().unwrap().unwrap();
        assert_eq!(record.sequence, 3);
        assert_eq!(cursor.current_position(), &Position::AfterSequence { sequence: 3 });
    }

    struct RedeliveringStream;

    impl StreamClient for RedeliveringStream {
        fn list_partitions(&self) -> Result<Vec<String>, ClientError> {
            Ok(vec!["s1".to_string()])
        }

        fn fetch_records(
            &self,
            partition_id: &str,
            _position: &Position,
            _limit: usize,
        ) -> Result<RecordBatch, ClientError> {
            Ok(RecordBatch::new(
                (1..=3)
                    .map(|seq| Record::new(partition_id, seq, ts(seq as i64), Vec::new()))
                    .collect(),
            ))
        }
    }

    #[test]
    fn test_redelivered_records_filtered() {
        let mut cursor = PartitionCursor::new(
            Arc::new(RedeliveringStream),
            "s1",
            Position::AfterSequence { sequence: 2 },
            10,
        );

        assert_eq!(cursor.next().unwrap().unwrap().sequence, 3);
        assert!(cursor.next().unwrap().is_none());
    }

    #[test]
    fn test_close_clears_buffer() {
        let stream = stream_with(&[("s1", 100), ("s1", 200)]);
        let mut cursor = PartitionCursor::new(stream, "s1", Position::TrimHorizon, 10);
        cursor.next().unwrap();
        cursor.close();
        assert_eq!(cursor.buffered(), 0);
        assert_eq!(cursor.next().unwrap().unwrap().sequence, 2);
    }
}
