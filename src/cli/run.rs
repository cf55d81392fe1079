use crate::checkpoint::{
    CheckpointError, CheckpointGenerator, CheckpointStore, DynamicCheckpointGenerator,
    StaticCheckpointGenerator, StoredCheckpoint,
};
use crate::client::{FileStream, Record, StreamClient};
use crate::config::parse::load_config;
use crate::config::types::{Config, StreamType};
use crate::reader::{ReaderError, StreamReader, UnboundedReader};
use crate::watermark::WatermarkConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal;
use tracing::{debug, info};

/// Records written per poll iteration before the loop checks for shutdown
/// and checkpoint deadlines again.
const EMIT_BATCH: usize = 1000;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("failed to write record: {0}")]
    Output(#[from] io::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One line of output per record. `data` is embedded as JSON when the
/// payload is JSON and as a string otherwise.
#[derive(Debug, Serialize)]
struct RecordLine<'a> {
    id: String,
    partition_id: &'a str,
    sequence: u64,
    event_time: DateTime<Utc>,
    data: serde_json::Value,
}

impl<'a> From<&'a Record> for RecordLine<'a> {
    fn from(record: &'a Record) -> Self {
        Self {
            id: record.id.iter().map(|b| format!("{:02x}", b)).collect(),
            partition_id: &record.partition_id,
            sequence: record.sequence,
            event_time: record.event_time,
            data: serde_json::from_slice(&record.data).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&record.data).into_owned())
            }),
        }
    }
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/shardpull/config.yml");
            eprintln!("  /etc/shardpull/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'shardpull config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_reader(&config_path).await.map_err(|e| e.into())
}

async fn run_reader(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let client: Arc<dyn StreamClient> = match config.stream.stream_type {
        StreamType::File => {
            info!(path = %config.stream.path.display(), "Opening file stream");
            Arc::new(FileStream::new(&config.stream.path, config.stream.on_parse_error))
        }
    };

    let mut store = config
        .checkpoint
        .enabled
        .then(|| CheckpointStore::new(&config.checkpoint.path, config.checkpoint.interval));
    let generator = select_generator(store.as_ref(), &config)?;

    let mut reader = StreamReader::new(client, generator, &WatermarkConfig::from(&config.watermark))?
        .with_fetch_limit(config.reader.fetch_limit);

    let mut pending = reader.start()?;
    info!("Reader running, press Ctrl+C to shutdown");

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let emitted = emit_records(&mut reader, pending)?;

        if let Some(store) = store.as_mut() {
            if store.should_save() {
                save_checkpoint(store, &mut reader)?;
            }
        }

        // A full batch means more may be waiting; only sleep when idle.
        let pause = if emitted == EMIT_BATCH {
            Duration::ZERO
        } else {
            config.reader.poll_interval
        };

        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(pause) => {
                pending = reader.advance()?;
            }
        }
    }

    if let Some(store) = store.as_mut() {
        save_checkpoint(store, &mut reader)?;
    }
    reader.close()?;

    info!("Reader shutdown complete");
    Ok(())
}

fn select_generator(
    store: Option<&CheckpointStore>,
    config: &Config,
) -> Result<Box<dyn CheckpointGenerator>, RunError> {
    if let Some(stored) = store.map(CheckpointStore::load).transpose()?.flatten() {
        info!(
            saved_at = %stored.saved_at,
            partitions = stored.partitions.len(),
            "Resuming from stored checkpoint"
        );
        return Ok(Box::new(StaticCheckpointGenerator::new(stored.partitions)));
    }

    Ok(Box::new(DynamicCheckpointGenerator::new(config.reader.start)))
}

/// Write the current record (if `pending`) and as many following records as
/// are available, up to `EMIT_BATCH`. Every record handed out by the reader
/// has been written by the time this returns, so a checkpoint taken next
/// never covers an unwritten record.
fn emit_records(reader: &mut StreamReader, mut pending: bool) -> Result<usize, RunError> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let mut emitted = 0;
    while pending {
        serde_json::to_writer(&mut out, &RecordLine::from(reader.current()?))?;
        out.write_all(b"\n")?;
        emitted += 1;
        pending = emitted < EMIT_BATCH && reader.advance()?;
    }
    out.flush()?;

    Ok(emitted)
}

fn save_checkpoint(store: &mut CheckpointStore, reader: &mut StreamReader) -> Result<(), RunError> {
    let watermark = reader.watermark();
    let watermark = (watermark != DateTime::<Utc>::MIN_UTC).then_some(watermark);
    let checkpoint = StoredCheckpoint::new(reader.checkpoint()?, watermark);
    store.save(&checkpoint)?;
    debug!(watermark = ?checkpoint.watermark, "Checkpoint saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_line_format() {
        let record = Record::new(
            "orders-0",
            42,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            b"hello".to_vec(),
        );
        let line = serde_json::to_value(RecordLine::from(&record)).unwrap();

        assert_eq!(line["partition_id"], "orders-0");
        assert_eq!(line["sequence"], 42);
        assert_eq!(line["data"], "hello");
        assert_eq!(line["id"].as_str().unwrap().len(), 64);
        assert_eq!(line["event_time"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_record_line_embeds_json_data() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let object = Record::new("orders-0", 0, at, br#"{"k":1}"#.to_vec());
        let line = serde_json::to_value(RecordLine::from(&object)).unwrap();
        assert_eq!(line["data"]["k"], 1);

        // A JSON string payload is not quoted a second time
        let text = Record::new("orders-0", 1, at, br#""first""#.to_vec());
        let line = serde_json::to_string(&RecordLine::from(&text)).unwrap();
        assert!(line.contains(r#""data":"first""#));
    }
}
