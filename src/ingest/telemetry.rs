//! Ingest telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use std::sync::OnceLock;

struct IngestInstruments {
    samples_received: Counter<u64>,
    flush_series: Histogram<u64>,
    copied_samples: Counter<u64>,
    copy_failures: Counter<u64>,
}

fn instruments() -> &'static IngestInstruments {
    static INSTRUMENTS: OnceLock<IngestInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("fluxgate.ingest");
        IngestInstruments {
            samples_received: meter
                .u64_counter("fluxgate.ingest.samples.received")
                .with_description("Samples accepted by the dispatcher")
                .init(),
            flush_series: meter
                .u64_histogram("fluxgate.ingest.flush.series")
                .with_description("Distinct series per metric-batcher flush")
                .init(),
            copied_samples: meter
                .u64_counter("fluxgate.ingest.copied.samples")
                .with_description("Samples written to the backing store")
                .init(),
            copy_failures: meter
                .u64_counter("fluxgate.ingest.copy.failures")
                .with_description("Copy attempts that failed and were reported upstream")
                .init(),
        }
    })
}

pub(crate) fn record_samples_received(count: u64) {
    instruments().samples_received.add(count, &[]);
}

pub(crate) fn record_flush_series(count: u64) {
    instruments().flush_series.record(count, &[]);
}

pub(crate) fn record_copied_samples(count: u64) {
    instruments().copied_samples.add(count, &[]);
}

pub(crate) fn record_copy_failure() {
    instruments().copy_failures.add(1, &[]);
}
