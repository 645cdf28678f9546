//! Fixed-capacity metric sample buffers, one ring per metric kind.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

use crate::METRIC_HISTORY_CAPACITY;

/// Metric kinds tracked per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    Memory,
    Load,
    DiskUsage,
    DiskRead,
    DiskWrite,
    NetworkRx,
    NetworkTx,
}

impl MetricKind {
    pub const ALL: [MetricKind; 8] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Load,
        MetricKind::DiskUsage,
        MetricKind::DiskRead,
        MetricKind::DiskWrite,
        MetricKind::NetworkRx,
        MetricKind::NetworkTx,
    ];
}

/// A single `(unix-seconds, value)` observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSample {
    pub timestamp: i64,
    pub value: f64,
}

/// Circular buffer of samples; eviction is oldest-first.
#[derive(Debug)]
struct Ring {
    samples: VecDeque<MetricSample>,
    capacity: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, sample: MetricSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }
}

/// Per-session metric history across all kinds.
pub struct MetricHistory {
    rings: Mutex<HashMap<MetricKind, Ring>>,
    capacity: usize,
}

impl Default for MetricHistory {
    fn default() -> Self {
        Self::new(METRIC_HISTORY_CAPACITY)
    }
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            rings: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn record(&self, kind: MetricKind, timestamp: i64, value: f64) {
        let mut rings = match self.rings.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        rings
            .entry(kind)
            .or_insert_with(|| Ring::new(self.capacity))
            .push(MetricSample { timestamp, value });
    }

    pub fn samples(&self, kind: MetricKind) -> Vec<MetricSample> {
        let rings = match self.rings.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        rings
            .get(&kind)
            .map(|r| r.samples.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, kind: MetricKind) -> Option<MetricSample> {
        let rings = match self.rings.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        rings.get(&kind).and_then(|r| r.samples.back().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_first() {
        let history = MetricHistory::new(3);
        for i in 0..5 {
            history.record(MetricKind::Cpu, i, i as f64);
        }
        let samples = history.samples(MetricKind::Cpu);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].timestamp, 2);
        assert_eq!(samples[2].timestamp, 4);
    }

    #[test]
    fn kinds_are_independent() {
        let history = MetricHistory::new(3);
        history.record(MetricKind::Cpu, 1, 10.0);
        history.record(MetricKind::NetworkRx, 1, 0.5);
        assert_eq!(history.samples(MetricKind::Cpu).len(), 1);
        assert_eq!(history.latest(MetricKind::NetworkRx).unwrap().value, 0.5);
        assert!(history.samples(MetricKind::DiskUsage).is_empty());
    }
}
