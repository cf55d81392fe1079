use crate::client::StartingPoint;
use crate::watermark::{
    WatermarkConfig, DEFAULT_BUCKET_WIDTH, DEFAULT_MIN_SAMPLES, DEFAULT_MIN_SPREAD_BUCKETS,
    DEFAULT_WINDOW,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    #[serde(default)]
    pub reader: ReaderSettings,
    #[serde(default)]
    pub watermark: WatermarkSettings,
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    pub path: PathBuf,
    #[serde(default)]
    pub on_parse_error: ParseErrorStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    File,
}

/// What a backend does with a record it cannot decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseErrorStrategy {
    #[default]
    Drop,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderSettings {
    #[serde(default = "default_start")]
    pub start: StartingPoint,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default = "default_poll_interval", with = "duration_format")]
    pub poll_interval: Duration,
}

fn default_start() -> StartingPoint {
    StartingPoint::TrimHorizon
}

fn default_fetch_limit() -> usize {
    crate::reader::DEFAULT_FETCH_LIMIT
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            start: default_start(),
            fetch_limit: default_fetch_limit(),
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkSettings {
    #[serde(default = "default_window", with = "duration_format")]
    pub window: Duration,
    #[serde(default = "default_bucket_width", with = "duration_format")]
    pub bucket_width: Duration,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_min_spread_buckets")]
    pub min_spread_buckets: usize,
}

fn default_window() -> Duration {
    DEFAULT_WINDOW
}

fn default_bucket_width() -> Duration {
    DEFAULT_BUCKET_WIDTH
}

fn default_min_samples() -> usize {
    DEFAULT_MIN_SAMPLES
}

fn default_min_spread_buckets() -> usize {
    DEFAULT_MIN_SPREAD_BUCKETS
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self {
            window: default_window(),
            bucket_width: default_bucket_width(),
            min_samples: default_min_samples(),
            min_spread_buckets: default_min_spread_buckets(),
        }
    }
}

impl From<&WatermarkSettings> for WatermarkConfig {
    fn from(settings: &WatermarkSettings) -> Self {
        Self {
            window: settings.window,
            bucket_width: settings.bucket_width,
            min_samples: settings.min_samples,
            min_spread_buckets: settings.min_spread_buckets,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSettings {
    #[serde(default = "default_checkpoint_enabled")]
    pub enabled: bool,
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
    #[serde(default = "default_checkpoint_interval", with = "duration_format")]
    pub interval: Duration,
}

fn default_checkpoint_enabled() -> bool {
    true
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("~/.local/state/shardpull/checkpoint.json")
}

fn default_checkpoint_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            enabled: default_checkpoint_enabled(),
            path: default_checkpoint_path(),
            interval: default_checkpoint_interval(),
        }
    }
}

// Custom serde module for duration parsing
pub(crate) mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (value_str, unit) = if let Some(v) = s.strip_suffix("ms") {
            (v, "ms")
        } else if let Some(v) = s.strip_suffix('s') {
            (v, "s")
        } else if let Some(v) = s.strip_suffix('m') {
            (v, "m")
        } else if let Some(v) = s.strip_suffix('h') {
            (v, "h")
        } else {
            return Err(format!("invalid duration format: {}", s));
        };

        let value: u64 = value_str
            .trim()
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        let secs_per_unit = match unit {
            "ms" => return Ok(Duration::from_millis(value)),
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            _ => return Err(format!("unknown unit: {}", unit)),
        };
        let secs = value
            .checked_mul(secs_per_unit)
            .ok_or_else(|| format!("duration too large: {}", s))?;
        Ok(Duration::from_secs(secs))
    }

    pub fn format_duration(d: Duration) -> String {
        let ms = d.as_millis();
        if ms == 0 {
            "0s".to_string()
        } else if ms % 3_600_000 == 0 {
            format!("{}h", ms / 3_600_000)
        } else if ms % 60_000 == 0 {
            format!("{}m", ms / 60_000)
        } else if ms % 1000 == 0 {
            format!("{}s", ms / 1000)
        } else {
            format!("{}ms", ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::duration_format::{format_duration, parse_duration};
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn test_parse_duration_overflow_is_error() {
        let err = parse_duration("18446744073709551615h").unwrap_err();
        assert!(err.contains("duration too large"));
        assert!(parse_duration("18446744073709551615m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_format_duration_picks_largest_unit() {
        assert_eq!(format_duration(Duration::from_secs(60)), "1m");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
    }

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
stream:
  type: file
  path: /tmp/stream
"#,
        )
        .unwrap();

        assert_eq!(config.stream.on_parse_error, ParseErrorStrategy::Drop);
        assert_eq!(config.reader.start, StartingPoint::TrimHorizon);
        assert_eq!(config.reader.fetch_limit, 100);
        assert_eq!(config.watermark.window, Duration::from_secs(60));
        assert!(config.checkpoint.enabled);
    }

    #[test]
    fn test_watermark_settings_into_config() {
        let settings = WatermarkSettings {
            window: Duration::from_secs(30),
            bucket_width: Duration::from_secs(3),
            min_samples: 4,
            min_spread_buckets: 1,
        };
        let config = WatermarkConfig::from(&settings);
        assert_eq!(config.bucket_count().unwrap(), 10);
        assert_eq!(config.min_samples, 4);
    }
}
