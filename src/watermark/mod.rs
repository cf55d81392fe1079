//! Watermark estimation over a trailing window of processing time.
//!
//! Samples are `(processing time, event time)` pairs. They are grouped into
//! fixed-width buckets by processing time; each bucket keeps the minimum
//! event time it has seen and how many samples landed in it. Buckets that
//! fall out of the window are evicted when the estimate is read, never by a
//! timer.

use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_BUCKET_WIDTH: Duration = Duration::from_secs(5);
pub const DEFAULT_MIN_SAMPLES: usize = 10;
pub const DEFAULT_MIN_SPREAD_BUCKETS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WatermarkError {
    #[error("bucket width must be positive")]
    ZeroBucketWidth,

    #[error("window ({window_ms}ms) must be a positive multiple of bucket width ({bucket_ms}ms)")]
    WindowNotMultiple { window_ms: u128, bucket_ms: u128 },

    #[error("min_spread_buckets ({min_spread}) exceeds the {buckets} buckets in the window")]
    SpreadTooLarge { min_spread: usize, buckets: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkConfig {
    pub window: Duration,
    pub bucket_width: Duration,
    pub min_samples: usize,
    pub min_spread_buckets: usize,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            bucket_width: DEFAULT_BUCKET_WIDTH,
            min_samples: DEFAULT_MIN_SAMPLES,
            min_spread_buckets: DEFAULT_MIN_SPREAD_BUCKETS,
        }
    }
}

impl WatermarkConfig {
    /// Number of buckets covering the window.
    pub fn bucket_count(&self) -> Result<usize, WatermarkError> {
        let bucket_ms = self.bucket_width.as_millis();
        let window_ms = self.window.as_millis();
        if bucket_ms == 0 {
            return Err(WatermarkError::ZeroBucketWidth);
        }
        if window_ms == 0 || window_ms % bucket_ms != 0 {
            return Err(WatermarkError::WindowNotMultiple {
                window_ms,
                bucket_ms,
            });
        }
        let buckets = (window_ms / bucket_ms) as usize;
        if self.min_spread_buckets > buckets {
            return Err(WatermarkError::SpreadTooLarge {
                min_spread: self.min_spread_buckets,
                buckets,
            });
        }
        Ok(buckets)
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start_ms: i64,
    min_event_ms: i64,
    samples: usize,
}

/// Sliding-window minimum over event times.
#[derive(Debug, Clone)]
pub struct WatermarkEstimator {
    window_ms: i64,
    bucket_ms: i64,
    min_samples: usize,
    min_spread_buckets: usize,
    slots: Vec<Option<Bucket>>,
    newest_start_ms: Option<i64>,
}

impl WatermarkEstimator {
    pub fn new(config: &WatermarkConfig) -> Result<Self, WatermarkError> {
        let buckets = config.bucket_count()?;
        Ok(Self {
            window_ms: config.window.as_millis() as i64,
            bucket_ms: config.bucket_width.as_millis() as i64,
            min_samples: config.min_samples,
            min_spread_buckets: config.min_spread_buckets,
            slots: vec![None; buckets],
            newest_start_ms: None,
        })
    }

    /// Record a sample observed at `processing_ms` carrying `event_ms`.
    pub fn add(&mut self, processing_ms: i64, event_ms: i64) {
        let mut start_ms = self.bucket_start(processing_ms);

        // A sample whose processing time went backwards past the window would
        // land in an evicted bucket. Keep it in the newest bucket instead so
        // the minimum still accounts for it.
        match self.newest_start_ms {
            Some(newest) if start_ms <= newest - self.window_ms => start_ms = newest,
            Some(newest) if newest >= start_ms => {}
            _ => self.newest_start_ms = Some(start_ms),
        }

        let idx = self.slot_index(start_ms);
        match &mut self.slots[idx] {
            Some(bucket) if bucket.start_ms >= start_ms => {
                bucket.min_event_ms = bucket.min_event_ms.min(event_ms);
                bucket.samples += 1;
            }
            slot => {
                *slot = Some(Bucket {
                    start_ms,
                    min_event_ms: event_ms,
                    samples: 1,
                });
            }
        }
    }

    /// Minimum event time across buckets still inside the window ending at
    /// `now_ms`, or `None` if none survive.
    pub fn get(&mut self, now_ms: i64) -> Option<i64> {
        self.evict(now_ms);
        self.slots
            .iter()
            .flatten()
            .map(|bucket| bucket.min_event_ms)
            .min()
    }

    /// Whether the surviving samples are spread across enough buckets and
    /// numerous enough to trust. Reflects the state as of the last `get`.
    pub fn is_significant(&self) -> bool {
        self.active_buckets() >= self.min_spread_buckets && self.sample_count() >= self.min_samples
    }

    pub fn sample_count(&self) -> usize {
        self.slots.iter().flatten().map(|bucket| bucket.samples).sum()
    }

    pub fn active_buckets(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|bucket| bucket.samples > 0)
            .count()
    }

    fn evict(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        for slot in self.slots.iter_mut() {
            if slot.is_some_and(|bucket| bucket.start_ms <= cutoff) {
                *slot = None;
            }
        }
    }

    fn bucket_start(&self, t_ms: i64) -> i64 {
        t_ms - t_ms.rem_euclid(self.bucket_ms)
    }

    fn slot_index(&self, start_ms: i64) -> usize {
        start_ms
            .div_euclid(self.bucket_ms)
            .rem_euclid(self.slots.len() as i64) as usize
    }
}
