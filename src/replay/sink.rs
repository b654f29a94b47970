//! Replay sinks: the queue-manager surface the driver feeds, and the
//! WAL simulator that forwards replayed samples into the ingest path.

use crate::ingest::Dispatcher;
use crate::model::{InsertRequest, Label, Sample, SeriesDescriptor};
use crate::Result;

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Weight of each new observation in the exponentially weighted rate.
pub const EWMA_WEIGHT: f64 = 0.2;
/// How often the rate folds accumulated counts in.
pub const RATE_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Label carrying the metric name on replayed series.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Exponentially weighted event rate, updated on a fixed tick.
pub struct EwmaRate {
    new_events: AtomicI64,
    rate_bits: AtomicU64,
    initialized: AtomicBool,
    weight: f64,
    interval: Duration,
}

impl EwmaRate {
    pub fn new(weight: f64, interval: Duration) -> Self {
        Self {
            new_events: AtomicI64::new(0),
            rate_bits: AtomicU64::new(0f64.to_bits()),
            initialized: AtomicBool::new(false),
            weight,
            interval,
        }
    }

    pub fn incr(&self, count: i64) {
        self.new_events.fetch_add(count, Ordering::Relaxed);
    }

    /// Fold the events accumulated since the last tick into the rate.
    pub fn tick(&self) {
        let count = self.new_events.swap(0, Ordering::Relaxed);
        let instant_rate = count as f64 / self.interval.as_secs_f64();
        if self.initialized.load(Ordering::Relaxed) {
            let prev = f64::from_bits(self.rate_bits.load(Ordering::Relaxed));
            let next = prev + self.weight * (instant_rate - prev);
            self.rate_bits.store(next.to_bits(), Ordering::Relaxed);
        } else if count > 0 {
            self.rate_bits.store(instant_rate.to_bits(), Ordering::Relaxed);
            self.initialized.store(true, Ordering::Relaxed);
        }
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }
}

impl Default for EwmaRate {
    fn default() -> Self {
        Self::new(EWMA_WEIGHT, RATE_UPDATE_INTERVAL)
    }
}

/// Driver-side observability: samples-in rate and the highest data
/// timestamp emitted so far (seconds).
pub struct ReplayStats {
    pub samples_in: EwmaRate,
    highest_ts_bits: AtomicU64,
}

impl ReplayStats {
    pub fn new() -> Self {
        Self {
            samples_in: EwmaRate::default(),
            highest_ts_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn set_highest_ts(&self, seconds: f64) {
        self.highest_ts_bits
            .store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn highest_ts(&self) -> f64 {
        f64::from_bits(self.highest_ts_bits.load(Ordering::Relaxed))
    }
}

impl Default for ReplayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// The surface the replay driver writes to, mirroring a remote-write
/// queue manager: series registration, sample appends, and reclamation
/// of series freed by finished blocks.
#[async_trait]
pub trait SampleSink: Send + Sync {
    /// Register labels for the given series refs under `index`.
    fn store_series(&self, series: &[(u64, Vec<Label>)], index: usize);

    /// Drop series registered under an index lower than
    /// `lowest_allowed_index`; subsequent samples for them are
    /// discarded.
    fn series_reset(&self, lowest_allowed_index: usize);

    /// Append replayed samples.
    async fn append(&self, samples: &[Sample]) -> Result<()>;
}

struct SimSeries {
    metric: String,
    labels: Vec<Label>,
    index: usize,
}

/// Simulates a write-ahead-log producer: regroups replayed samples per
/// metric and forwards them to the dispatcher as insert requests,
/// draining completions in the background.
pub struct WalSimulator {
    dispatcher: Arc<Dispatcher>,
    series: DashMap<u64, SimSeries>,
    waiters: TaskTracker,
}

impl WalSimulator {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            series: DashMap::new(),
            waiters: TaskTracker::new(),
        }
    }

    /// Wait for every outstanding completion to be reported.
    pub async fn stop(&self) {
        self.waiters.close();
        self.waiters.wait().await;
    }
}

#[async_trait]
impl SampleSink for WalSimulator {
    fn store_series(&self, series: &[(u64, Vec<Label>)], index: usize) {
        for (series_ref, labels) in series {
            let metric = labels
                .iter()
                .find(|l| l.name == METRIC_NAME_LABEL)
                .map(|l| l.value.clone())
                .unwrap_or_else(|| "unknown".to_string());
            self.series.insert(
                *series_ref,
                SimSeries {
                    metric,
                    labels: labels.clone(),
                    index,
                },
            );
        }
    }

    fn series_reset(&self, lowest_allowed_index: usize) {
        self.series.retain(|_, s| s.index >= lowest_allowed_index);
    }

    async fn append(&self, samples: &[Sample]) -> Result<()> {
        type Group = (Vec<Sample>, HashMap<u64, SeriesDescriptor>);
        let mut grouped: HashMap<String, Group> = HashMap::new();
        for sample in samples {
            // Samples for freed or never-registered series are dropped.
            let Some(entry) = self.series.get(&sample.series_ref) else {
                continue;
            };
            let (group_samples, descriptors) = grouped.entry(entry.metric.clone()).or_default();
            group_samples.push(*sample);
            descriptors
                .entry(sample.series_ref)
                .or_insert_with(|| SeriesDescriptor::new(sample.series_ref, entry.labels.clone()));
        }

        for (metric, (group_samples, descriptors)) in grouped {
            let (req, rx) =
                InsertRequest::new(&metric, group_samples, descriptors.into_values().collect());
            self.dispatcher.dispatch(req).await?;
            let metric_name = metric;
            self.waiters.spawn(async move {
                match rx.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(metric = %metric_name, error = %err, "replayed insert failed")
                    }
                    Err(_) => warn!(metric = %metric_name, "completion handle dropped"),
                }
            });
        }
        Ok(())
    }
}
