//! Directory-backed stream.
//!
//! Each `<partition>.jsonl` file in the stream directory is one partition.
//! Every complete line is a record of the form
//! `{"event_time": "<rfc3339>", "data": <any json>}` and its sequence is the
//! byte offset at which the line starts. A trailing line without a newline
//! is still being written and is not visible yet.

use super::{ClientError, Position, Record, RecordBatch, StartingPoint, StreamClient};
use crate::config::types::ParseErrorStrategy;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;

const PARTITION_EXTENSION: &str = "jsonl";

#[derive(Debug, Deserialize)]
struct RecordLine {
    event_time: DateTime<Utc>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct FileStream {
    dir: PathBuf,
    on_parse_error: ParseErrorStrategy,
}

impl FileStream {
    pub fn new(dir: impl Into<PathBuf>, on_parse_error: ParseErrorStrategy) -> Self {
        Self {
            dir: dir.into(),
            on_parse_error,
        }
    }

    fn partition_path(&self, partition_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", partition_id, PARTITION_EXTENSION))
    }

    fn open(&self, partition_id: &str) -> Result<BufReader<File>, ClientError> {
        let path = self.partition_path(partition_id);
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ClientError::Permanent(format!(
                "partition '{}' not found at {}",
                partition_id,
                path.display()
            )),
            _ => ClientError::from(e),
        })?;
        Ok(BufReader::new(file))
    }

    /// Read the next complete line as raw bytes. Returns `None` at EOF or
    /// when the last line has no terminating newline yet. Bytes are not
    /// decoded here, so a writer caught mid-character is never an error.
    fn read_complete_line(
        reader: &mut BufReader<File>,
        offset: &mut u64,
    ) -> Result<Option<(u64, Vec<u8>)>, ClientError> {
        let mut line = Vec::new();
        let bytes_read = reader.read_until(b'\n', &mut line)?;
        if bytes_read == 0 || line.last() != Some(&b'\n') {
            return Ok(None);
        }

        let line_start = *offset;
        *offset += bytes_read as u64;
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Ok(Some((line_start, line)))
    }

    fn parse_line(
        &self,
        partition_id: &str,
        offset: u64,
        line: &[u8],
    ) -> Result<Option<Record>, ClientError> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let parsed = std::str::from_utf8(line)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<RecordLine>(text).map_err(|e| e.to_string()));

        match parsed {
            Ok(parsed) => {
                let data = serde_json::to_vec(&parsed.data)
                    .map_err(|e| ClientError::Permanent(e.to_string()))?;
                Ok(Some(Record::new(partition_id, offset, parsed.event_time, data)))
            }
            Err(e) => match self.on_parse_error {
                ParseErrorStrategy::Drop => {
                    tracing::warn!(
                        partition_id = %partition_id,
                        offset,
                        error = %e,
                        "Dropping unparseable record"
                    );
                    Ok(None)
                }
                ParseErrorStrategy::Fail => Err(ClientError::Permanent(format!(
                    "unparseable record in partition '{}' at offset {}: {}",
                    partition_id, offset, e
                ))),
            },
        }
    }

    /// Offset at which the line following `sequence` starts.
    fn offset_after(reader: &mut BufReader<File>, sequence: u64) -> Result<Option<u64>, ClientError> {
        reader.seek(SeekFrom::Start(sequence))?;
        let mut offset = sequence;
        match Self::read_complete_line(reader, &mut offset)? {
            Some(_) => Ok(Some(offset)),
            None => Ok(None),
        }
    }
}

impl StreamClient for FileStream {
    fn list_partitions(&self) -> Result<Vec<String>, ClientError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ClientError::Permanent(format!(
                "stream directory {} not found",
                self.dir.display()
            )),
            _ => ClientError::from(e),
        })?;

        let mut partitions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PARTITION_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                partitions.push(stem.to_string());
            }
        }
        partitions.sort();
        Ok(partitions)
    }

    fn resolve_position(
        &self,
        partition_id: &str,
        start: &StartingPoint,
    ) -> Result<Position, ClientError> {
        let mut reader = self.open(partition_id)?;
        match start {
            StartingPoint::Latest => {
                let mut offset = 0;
                let mut last_line_start = None;
                while let Some((line_start, _)) = Self::read_complete_line(&mut reader, &mut offset)? {
                    last_line_start = Some(line_start);
                }
                Ok(match last_line_start {
                    Some(sequence) => Position::AfterSequence { sequence },
                    None => Position::TrimHorizon,
                })
            }
            other => Ok(Position::from(*other)),
        }
    }

    fn fetch_records(
        &self,
        partition_id: &str,
        position: &Position,
        limit: usize,
    ) -> Result<RecordBatch, ClientError> {
        let mut reader = self.open(partition_id)?;

        let (mut offset, mut not_before) = match position {
            Position::TrimHorizon => (0, None),
            Position::AtTimestamp { timestamp } => (0, Some(*timestamp)),
            Position::Latest => return Ok(RecordBatch::empty()),
            Position::AfterSequence { sequence } => match Self::offset_after(&mut reader, *sequence)? {
                Some(offset) => (offset, None),
                None => return Ok(RecordBatch::empty()),
            },
        };
        reader.seek(SeekFrom::Start(offset))?;

        let mut records = Vec::new();
        while records.len() < limit {
            let Some((line_start, line)) = Self::read_complete_line(&mut reader, &mut offset)? else {
                break;
            };
            let Some(record) = self.parse_line(partition_id, line_start, &line)? else {
                continue;
            };
            // Event times are not ordered within a partition: only records
            // before the first match are skipped.
            if not_before.is_some_and(|ts| record.event_time < ts) {
                continue;
            }
            not_before = None;
            records.push(record);
        }

        Ok(RecordBatch::new(records))
    }
}
