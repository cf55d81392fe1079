pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# SHARDPULL CONFIGURATION
# =============================================================================
# Reads every partition of a stream in round-robin order, prints each record
# as a JSON line, tracks a watermark, and checkpoints read positions.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/shardpull/config.yml
#   3. /etc/shardpull/config.yml
#
# Any value may reference environment variables as $env{NAME}.

# =============================================================================
# STREAM
# =============================================================================
# A file stream is a directory of <partition>.jsonl files. Each line is one
# record: {"event_time": "2025-12-04T10:00:00Z", "data": "..."}
# Appending lines to a partition file makes them visible to the reader.

stream:
  type: file
  path: /var/lib/shardpull/stream
  # What to do with lines that are not valid records: 'drop' or 'fail'
  on_parse_error: drop

# =============================================================================
# READER
# =============================================================================

reader:
  # Where to start when no checkpoint exists:
  #   trim_horizon                       oldest retained record
  #   latest                             only records appended from now on
  #   at_timestamp: 2025-12-04T10:00:00Z first record at or after the time
  start: trim_horizon
  # Records fetched per partition per request
  fetch_limit: 100
  # Sleep between polls when no partition has data
  poll_interval: 500ms

# =============================================================================
# WATERMARK
# =============================================================================
# The watermark is the minimum event time read within a trailing window of
# processing time. It only moves once enough samples are spread over enough
# buckets; with nothing read inside the window it follows the wall clock.

watermark:
  # Must be a multiple of bucket_width
  window: 1m
  bucket_width: 5s
  min_samples: 10
  min_spread_buckets: 2

# =============================================================================
# CHECKPOINT
# =============================================================================
# Read positions are saved periodically and on shutdown. On startup an
# existing checkpoint takes precedence over reader.start.

checkpoint:
  enabled: true
  path: ~/.local/state/shardpull/checkpoint.json
  interval: 30s
"#
    .to_string()
}
