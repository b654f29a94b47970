//! Benchmark/replay driver
//!
//! Reads time-ordered samples from a block store through a heap-ordered
//! multi-series cursor and feeds them to a sink at a configurable rate
//! multiplier, simulating a write-ahead-log producer.

mod heap;
pub mod sink;
pub mod source;

pub use heap::SeriesTimeHeap;
pub use sink::{
    EwmaRate, ReplayStats, SampleSink, WalSimulator, EWMA_WEIGHT, METRIC_NAME_LABEL,
    RATE_UPDATE_INTERVAL,
};
pub use source::{Block, BlockSource, MemBlock, MemBlockSource, MemSeries, SeriesCursor};

use crate::model::Label;
use crate::{Error, Result};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Label added to multiplied series so each synthetic copy is a
/// distinct series in the catalog.
pub const REPLICA_LABEL: &str = "replica";

/// Replay configuration. Validated once at startup.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Lower time bound (ms) of samples replayed from each block.
    pub mint: i64,
    /// Upper time bound (ms) of samples replayed from each block.
    pub maxt: i64,
    /// Scales the gap between successive samples (>1 = faster).
    pub rate_multiplier: f64,
    /// Stamp sample data-time at wall clock rather than block time.
    pub use_wall_clock_for_data_time: bool,
    /// Sleep to pace emission against the wall clock.
    pub rate_control: bool,
    /// Amplify one input series into this many synthetic series.
    pub series_multiplier: usize,
    /// Number of full-corpus replays; the series-id base advances each
    /// run so runs never collide.
    pub repeated_runs: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            mint: i64::MIN,
            maxt: i64::MAX,
            rate_multiplier: 1.0,
            use_wall_clock_for_data_time: false,
            rate_control: true,
            series_multiplier: 1,
            repeated_runs: 1,
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.rate_multiplier.is_finite() || self.rate_multiplier <= 0.0 {
            return Err(Error::Config(format!(
                "rate multiplier must be a positive finite number, got {}",
                self.rate_multiplier
            )));
        }
        if self.series_multiplier == 0 {
            return Err(Error::Config(
                "series multiplier must be at least 1".to_string(),
            ));
        }
        if self.repeated_runs == 0 {
            return Err(Error::Config("repeated runs must be at least 1".to_string()));
        }
        if self.mint > self.maxt {
            return Err(Error::Config(format!(
                "mint {} exceeds maxt {}",
                self.mint, self.maxt
            )));
        }
        Ok(())
    }
}

/// Totals reported after a replay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplaySummary {
    pub total_samples: u64,
    pub elapsed: Duration,
    pub send_rate: f64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Replay every block of the corpus `repeated_runs` times into `sink`.
pub async fn run(
    config: &ReplayConfig,
    source: &dyn BlockSource,
    sink: &dyn SampleSink,
    stats: Arc<ReplayStats>,
) -> Result<ReplaySummary> {
    config.validate()?;

    let blocks = source.blocks()?;
    info!(blocks = blocks.len(), "starting replay");

    let ticker = {
        let stats = stats.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sink::RATE_UPDATE_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                stats.samples_in.tick();
            }
        })
    };

    let multiplier = config.series_multiplier as u64;
    let mut series_base: u64 = 0;
    let mut block_index: usize = 0;
    let started = Instant::now();
    let mut total_samples: u64 = 0;

    for run in 0..config.repeated_runs {
        let run_started = Instant::now();
        let mut run_samples: u64 = 0;
        let mut run_max_ref: Option<u64> = None;

        for block in &blocks {
            let block_started = Instant::now();
            let cursors = block.series(config.mint, config.maxt)?;

            let mut registered = Vec::with_capacity(cursors.len() * config.series_multiplier);
            for cursor in &cursors {
                for k in 0..multiplier {
                    let mut labels = cursor.labels().to_vec();
                    if k > 0 {
                        labels.push(Label::new(REPLICA_LABEL, k.to_string()));
                    }
                    registered.push((series_base + cursor.series_ref() * multiplier + k, labels));
                }
            }
            sink.store_series(&registered, block_index);

            let mut heap = SeriesTimeHeap::new(cursors);
            let Some(first_ts) = heap.first_timestamp() else {
                block_index += 1;
                continue;
            };

            let wall_start = now_ms();
            let data_start = if config.use_wall_clock_for_data_time {
                wall_start
            } else {
                first_ts
            };

            let mut block_samples: u64 = 0;
            while let Some((raw_ts, value, raw_ref)) = heap.next_sample() {
                let delta = ((raw_ts - first_ts) as f64 / config.rate_multiplier) as i64;
                let data_ts = data_start + delta;
                let wall_ts = wall_start + delta;

                if config.rate_control {
                    let wait = wall_ts - now_ms();
                    if wait > 0 {
                        tokio::time::sleep(Duration::from_millis(wait as u64)).await;
                    }
                }

                let mut emitted = Vec::with_capacity(config.series_multiplier);
                for k in 0..multiplier {
                    let series_ref = series_base + raw_ref * multiplier + k;
                    run_max_ref = Some(run_max_ref.map_or(series_ref, |m| m.max(series_ref)));
                    emitted.push(crate::model::Sample {
                        series_ref,
                        timestamp: data_ts,
                        value,
                    });
                }
                sink.append(&emitted).await?;

                block_samples += multiplier;
                stats.samples_in.incr(multiplier as i64);
                stats.set_highest_ts(data_ts as f64 / 1000.0);
            }

            // Series from earlier blocks are freed; their samples may be
            // discarded from here on.
            sink.series_reset(block_index);
            block_index += 1;

            run_samples += block_samples;
            let block_elapsed = block_started.elapsed();
            info!(
                run,
                samples = block_samples,
                elapsed_ms = block_elapsed.as_millis() as u64,
                ewma_rate = stats.samples_in.rate(),
                "block replayed"
            );
        }

        total_samples += run_samples;
        info!(
            run,
            samples = run_samples,
            elapsed_ms = run_started.elapsed().as_millis() as u64,
            "run complete"
        );

        // Advance the base past everything this run emitted so repeated
        // runs never collide on series ids.
        if let Some(max_ref) = run_max_ref {
            series_base = max_ref + 1;
        }
    }

    ticker.abort();
    stats.samples_in.tick();

    let elapsed = started.elapsed();
    let summary = ReplaySummary {
        total_samples,
        elapsed,
        send_rate: stats.samples_in.rate(),
    };
    info!(
        samples = summary.total_samples,
        elapsed_ms = elapsed.as_millis() as u64,
        ewma_rate = summary.send_rate,
        "replay complete"
    );
    Ok(summary)
}
