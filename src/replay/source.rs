//! Block source contract for the replay driver.
//!
//! The on-disk block format is an external collaborator; the driver
//! only needs time-bounded per-series sample cursors. The in-memory
//! source backs tests and synthetic corpora.

use crate::model::Label;
use crate::Result;

use std::collections::VecDeque;
use std::sync::Arc;

/// Iterates one series' samples in timestamp order.
pub trait SeriesCursor: Send {
    /// Stable series id within the source.
    fn series_ref(&self) -> u64;

    fn labels(&self) -> &[Label];

    /// Next `(timestamp ms, value)` pair, or `None` at the end.
    fn next_sample(&mut self) -> Option<(i64, f64)>;
}

/// One time-bounded block of pre-labeled series.
pub trait Block: Send + Sync {
    fn min_time(&self) -> i64;

    fn max_time(&self) -> i64;

    /// Materialize cursors over samples within `[mint, maxt]`.
    fn series(&self, mint: i64, maxt: i64) -> Result<Vec<Box<dyn SeriesCursor>>>;
}

/// An ordered sequence of blocks.
pub trait BlockSource: Send + Sync {
    fn blocks(&self) -> Result<Vec<Arc<dyn Block>>>;
}

/// A fully materialized series for the in-memory source.
#[derive(Debug, Clone)]
pub struct MemSeries {
    pub series_ref: u64,
    pub labels: Vec<Label>,
    /// `(timestamp ms, value)` pairs in ascending timestamp order.
    pub samples: Vec<(i64, f64)>,
}

struct MemSeriesCursor {
    series_ref: u64,
    labels: Vec<Label>,
    samples: VecDeque<(i64, f64)>,
}

impl SeriesCursor for MemSeriesCursor {
    fn series_ref(&self) -> u64 {
        self.series_ref
    }

    fn labels(&self) -> &[Label] {
        &self.labels
    }

    fn next_sample(&mut self) -> Option<(i64, f64)> {
        self.samples.pop_front()
    }
}

/// In-memory [`Block`].
pub struct MemBlock {
    series: Vec<MemSeries>,
    min_time: i64,
    max_time: i64,
}

impl MemBlock {
    pub fn new(series: Vec<MemSeries>) -> Self {
        let mut min_time = i64::MAX;
        let mut max_time = i64::MIN;
        for s in &series {
            for (ts, _) in &s.samples {
                min_time = min_time.min(*ts);
                max_time = max_time.max(*ts);
            }
        }
        Self {
            series,
            min_time,
            max_time,
        }
    }
}

impl Block for MemBlock {
    fn min_time(&self) -> i64 {
        self.min_time
    }

    fn max_time(&self) -> i64 {
        self.max_time
    }

    fn series(&self, mint: i64, maxt: i64) -> Result<Vec<Box<dyn SeriesCursor>>> {
        let mut cursors: Vec<Box<dyn SeriesCursor>> = Vec::with_capacity(self.series.len());
        for s in &self.series {
            let samples: VecDeque<(i64, f64)> = s
                .samples
                .iter()
                .filter(|(ts, _)| *ts >= mint && *ts <= maxt)
                .copied()
                .collect();
            if samples.is_empty() {
                continue;
            }
            cursors.push(Box::new(MemSeriesCursor {
                series_ref: s.series_ref,
                labels: s.labels.clone(),
                samples,
            }));
        }
        Ok(cursors)
    }
}

/// In-memory [`BlockSource`].
#[derive(Default)]
pub struct MemBlockSource {
    blocks: Vec<Arc<dyn Block>>,
}

impl MemBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_block(&mut self, block: MemBlock) {
        self.blocks.push(Arc::new(block));
    }
}

impl BlockSource for MemBlockSource {
    fn blocks(&self) -> Result<Vec<Arc<dyn Block>>> {
        Ok(self.blocks.clone())
    }
}
