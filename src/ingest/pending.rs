//! Per-metric pending buffer.

use crate::model::InsertRequest;
use std::collections::HashSet;

/// Most samples a pending buffer holds before it reports full.
pub const MAX_BATCH_SAMPLES: usize = 2000;
/// Most distinct requests a pending buffer holds before it reports full.
pub const MAX_BATCH_REQUESTS: usize = 100;

/// Accumulates insert requests for a single metric until a flush
/// trigger fires. The buffer retains every completion handle; on flush
/// it is moved whole to a copier, which must report each handle exactly
/// once.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    requests: Vec<InsertRequest>,
    num_samples: usize,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request, retaining its completion handle.
    pub fn add_req(&mut self, req: InsertRequest) {
        self.num_samples += req.samples.len();
        self.requests.push(req);
    }

    /// Number of distinct series references held, for observability.
    pub fn count_series(&self) -> usize {
        let mut refs = HashSet::new();
        for req in &self.requests {
            for series in &req.series {
                refs.insert(series.ref_id);
            }
        }
        refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.num_samples >= MAX_BATCH_SAMPLES || self.requests.len() >= MAX_BATCH_REQUESTS
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn num_requests(&self) -> usize {
        self.requests.len()
    }

    /// Hand the retained requests (and their handles) to the copier.
    pub fn into_requests(self) -> Vec<InsertRequest> {
        self.requests
    }
}
