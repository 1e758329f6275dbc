//! Write-only sinks for optimizer progress.

use serde::{Deserialize, Serialize};

/// One accepted optimizer iterate, in configured design units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub design: Vec<f64>,
    pub objective: f64,
    pub constraints: Vec<f64>,
    pub barrier_weight: f64,
    /// Length of the accepted step in normalized design space.
    pub step: f64,
}

impl IterationRecord {
    pub fn max_constraint(&self) -> f64 {
        self.constraints.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

pub trait IterationObserver {
    fn record(&mut self, record: &IterationRecord);
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub records: Vec<IterationRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn objectives(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.objective).collect()
    }
}

impl IterationObserver for History {
    fn record(&mut self, record: &IterationRecord) {
        self.records.push(record.clone());
    }
}

/// Writes each record at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl IterationObserver for LogObserver {
    fn record(&mut self, record: &IterationRecord) {
        log::info!(
            "iter {:3}: objective = {:.6e}, max constraint = {:.4e}, mu = {:.1e}, step = {:.3e}",
            record.iteration,
            record.objective,
            record.max_constraint(),
            record.barrier_weight,
            record.step
        );
    }
}

/// Does nothing; the default when the caller doesn't watch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObserver;

impl IterationObserver for NoObserver {
    fn record(&mut self, _record: &IterationRecord) {}
}
