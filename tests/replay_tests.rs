//! Tests for the replay driver: pacing, series multiplication, repeated
//! runs, and the WAL simulator feeding the ingest path.

use fluxgate::ingest::{IngestConfig, Ingestor};
use fluxgate::model::{Label, Sample};
use fluxgate::replay::{
    self, EwmaRate, MemBlock, MemBlockSource, MemSeries, ReplayConfig, ReplayStats, SampleSink,
    WalSimulator, METRIC_NAME_LABEL,
};
use fluxgate::store::MemStore;
use fluxgate::Result;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

const WAIT: Duration = Duration::from_secs(5);

/// Sink that records appends with their arrival time.
#[derive(Default)]
struct RecordingSink {
    appends: Mutex<Vec<(Instant, Vec<Sample>)>>,
    registered: Mutex<Vec<(u64, Vec<Label>)>>,
}

impl RecordingSink {
    fn appended_samples(&self) -> Vec<Sample> {
        self.appends
            .lock()
            .iter()
            .flat_map(|(_, s)| s.clone())
            .collect()
    }
}

#[async_trait]
impl SampleSink for RecordingSink {
    fn store_series(&self, series: &[(u64, Vec<Label>)], _index: usize) {
        self.registered.lock().extend_from_slice(series);
    }

    fn series_reset(&self, _lowest_allowed_index: usize) {}

    async fn append(&self, samples: &[Sample]) -> Result<()> {
        self.appends.lock().push((Instant::now(), samples.to_vec()));
        Ok(())
    }
}

fn one_series_block(series_ref: u64, metric: &str, samples: Vec<(i64, f64)>) -> MemBlock {
    MemBlock::new(vec![MemSeries {
        series_ref,
        labels: vec![
            Label::new(METRIC_NAME_LABEL, metric.to_string()),
            Label::new("host", "a"),
        ],
        samples,
    }])
}

// =========================================================================
// Pacing
// =========================================================================

#[tokio::test]
async fn test_rate_multiplier_halves_the_emission_gap() {
    let mut source = MemBlockSource::new();
    source.push_block(one_series_block(1, "cpu", vec![(1000, 1.0), (2000, 2.0)]));

    let config = ReplayConfig {
        rate_multiplier: 2.0,
        rate_control: true,
        ..Default::default()
    };
    let sink = RecordingSink::default();
    let stats = Arc::new(ReplayStats::new());
    replay::run(&config, &source, &sink, stats).await.unwrap();

    let appends = sink.appends.lock();
    assert_eq!(appends.len(), 2);
    let gap = appends[1].0.duration_since(appends[0].0);
    // 1000 ms of block time at 2x should take ~500 ms of wall time.
    assert!(
        gap >= Duration::from_millis(300) && gap <= Duration::from_millis(900),
        "expected ~500ms gap, got {gap:?}"
    );
}

#[tokio::test]
async fn test_block_time_is_preserved_without_wall_clock_stamping() {
    let mut source = MemBlockSource::new();
    source.push_block(one_series_block(1, "cpu", vec![(1000, 1.0), (3000, 3.0)]));

    let config = ReplayConfig {
        rate_control: false,
        ..Default::default()
    };
    let sink = RecordingSink::default();
    replay::run(&config, &source, &sink, Arc::new(ReplayStats::new()))
        .await
        .unwrap();

    let samples = sink.appended_samples();
    assert_eq!(
        samples.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
        vec![1000, 3000]
    );
}

#[tokio::test]
async fn test_wall_clock_stamping_rebases_data_time() {
    let mut source = MemBlockSource::new();
    source.push_block(one_series_block(1, "cpu", vec![(1000, 1.0)]));

    let config = ReplayConfig {
        rate_control: false,
        use_wall_clock_for_data_time: true,
        ..Default::default()
    };
    let sink = RecordingSink::default();
    let before = chrono::Utc::now().timestamp_millis();
    replay::run(&config, &source, &sink, Arc::new(ReplayStats::new()))
        .await
        .unwrap();
    let after = chrono::Utc::now().timestamp_millis();

    let samples = sink.appended_samples();
    assert_eq!(samples.len(), 1);
    assert!(
        samples[0].timestamp >= before && samples[0].timestamp <= after,
        "data time must be stamped at wall clock"
    );
}

// =========================================================================
// Series multiplication and repeated runs
// =========================================================================

#[tokio::test]
async fn test_series_multiplier_amplifies_each_sample() {
    let mut source = MemBlockSource::new();
    source.push_block(one_series_block(5, "cpu", vec![(1000, 1.0), (2000, 2.0)]));

    let config = ReplayConfig {
        rate_control: false,
        series_multiplier: 3,
        ..Default::default()
    };
    let sink = RecordingSink::default();
    let summary = replay::run(&config, &source, &sink, Arc::new(ReplayStats::new()))
        .await
        .unwrap();

    assert_eq!(summary.total_samples, 6);
    let samples = sink.appended_samples();
    let mut refs: Vec<u64> = samples.iter().map(|s| s.series_ref).collect();
    refs.sort_unstable();
    refs.dedup();
    assert_eq!(refs, vec![15, 16, 17]);

    // Every synthetic ref is registered, replicas carrying a
    // distinguishing label.
    let registered = sink.registered.lock();
    assert_eq!(registered.len(), 3);
    let replicas = registered
        .iter()
        .filter(|(_, labels)| labels.iter().any(|l| l.name == "replica"))
        .count();
    assert_eq!(replicas, 2);
}

#[tokio::test]
async fn test_repeated_runs_never_collide_on_series_ids() {
    let mut source = MemBlockSource::new();
    source.push_block(one_series_block(5, "cpu", vec![(1000, 1.0), (2000, 2.0)]));

    let config = ReplayConfig {
        rate_control: false,
        repeated_runs: 2,
        ..Default::default()
    };
    let sink = RecordingSink::default();
    let summary = replay::run(&config, &source, &sink, Arc::new(ReplayStats::new()))
        .await
        .unwrap();

    assert_eq!(summary.total_samples, 4);
    let appends = sink.appends.lock();
    let first_run_ref = appends[0].1[0].series_ref;
    let second_run_ref = appends[2].1[0].series_ref;
    assert!(
        second_run_ref > first_run_ref,
        "second run must advance the series base ({first_run_ref} vs {second_run_ref})"
    );
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_reading_blocks() {
    let source = MemBlockSource::new();
    let sink = RecordingSink::default();
    let config = ReplayConfig {
        series_multiplier: 0,
        ..Default::default()
    };
    assert!(
        replay::run(&config, &source, &sink, Arc::new(ReplayStats::new()))
            .await
            .is_err()
    );
}

// =========================================================================
// WAL simulator into the ingest path
// =========================================================================

#[tokio::test]
async fn test_wal_simulator_discards_samples_for_freed_series() {
    let store = Arc::new(MemStore::new());
    let ingestor = Ingestor::new(store.clone(), IngestConfig::default());
    let simulator = WalSimulator::new(ingestor.dispatcher());

    simulator.store_series(
        &[(
            1,
            vec![Label::new(METRIC_NAME_LABEL, "cpu"), Label::new("host", "a")],
        )],
        0,
    );
    simulator
        .append(&[Sample {
            series_ref: 1,
            timestamp: 1000,
            value: 1.0,
        }])
        .await
        .unwrap();

    // Free everything registered below index 1; later samples for the
    // freed series are dropped silently.
    simulator.series_reset(1);
    simulator
        .append(&[Sample {
            series_ref: 1,
            timestamp: 2000,
            value: 2.0,
        }])
        .await
        .unwrap();

    timeout(WAIT, simulator.stop()).await.unwrap();
    timeout(WAIT, ingestor.shutdown()).await.unwrap();

    assert_eq!(store.copied_rows("cpu").len(), 1);
}

#[tokio::test]
async fn test_replay_feeds_the_ingest_path_end_to_end() {
    let store = Arc::new(MemStore::new());
    let ingestor = Ingestor::new(store.clone(), IngestConfig::default());
    let simulator = WalSimulator::new(ingestor.dispatcher());

    let mut source = MemBlockSource::new();
    source.push_block(MemBlock::new(vec![
        MemSeries {
            series_ref: 1,
            labels: vec![
                Label::new(METRIC_NAME_LABEL, "cpu"),
                Label::new("host", "a"),
            ],
            samples: vec![(1000, 0.1), (2000, 0.2), (3000, 0.3)],
        },
        MemSeries {
            series_ref: 2,
            labels: vec![
                Label::new(METRIC_NAME_LABEL, "mem"),
                Label::new("host", "a"),
            ],
            samples: vec![(1500, 10.0), (2500, 20.0), (3500, 30.0)],
        },
    ]));

    let config = ReplayConfig {
        rate_control: false,
        ..Default::default()
    };
    let stats = Arc::new(ReplayStats::new());
    let summary = timeout(
        WAIT,
        replay::run(&config, &source, &simulator, stats.clone()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(summary.total_samples, 6);

    timeout(WAIT, simulator.stop()).await.unwrap();
    timeout(WAIT, ingestor.shutdown()).await.unwrap();

    let cpu = store.copied_rows("cpu");
    let mem = store.copied_rows("mem");
    assert_eq!(cpu.len(), 3);
    assert_eq!(mem.len(), 3);
    let mut cpu_ts: Vec<i64> = cpu.iter().map(|r| r.timestamp).collect();
    cpu_ts.sort_unstable();
    assert_eq!(cpu_ts, vec![1000, 2000, 3000]);
    assert!(stats.highest_ts() >= 3.5);
}

// =========================================================================
// Rate accounting
// =========================================================================

#[test]
fn test_ewma_rate_converges_toward_instant_rate() {
    let rate = EwmaRate::new(0.2, Duration::from_secs(10));
    rate.incr(100);
    rate.tick();
    assert!((rate.rate() - 10.0).abs() < 1e-9, "first tick seeds the rate");

    rate.incr(200);
    rate.tick();
    // 10 + 0.2 * (20 - 10)
    assert!((rate.rate() - 12.0).abs() < 1e-9);
}
