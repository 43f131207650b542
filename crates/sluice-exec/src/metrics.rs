//! Per-edge buffering gauges.
//!
//! Every channel between two stages carries a gauge. The producer samples the
//! channel occupancy after each send, so `high_water` is the most elements
//! (barriers included) ever buffered on that edge.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use sluice_core::manifest::EdgeStats;

#[derive(Debug)]
pub struct EdgeGauge {
    from: String,
    to: String,
    capacity: usize,
    high_water: AtomicUsize,
    elements: AtomicU64,
}

impl EdgeGauge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            from: from.into(),
            to: to.into(),
            capacity,
            high_water: AtomicUsize::new(0),
            elements: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn observe(&self, buffered: usize) {
        self.high_water.fetch_max(buffered, Ordering::Relaxed);
    }

    pub(crate) fn count_element(&self) {
        self.elements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EdgeStats {
        EdgeStats {
            from: self.from.clone(),
            to: self.to.clone(),
            capacity: self.capacity,
            high_water: self.high_water(),
            elements: self.elements.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_maximum() {
        let gauge = EdgeGauge::new("rows", "discard", 4);
        gauge.observe(2);
        gauge.observe(4);
        gauge.observe(1);
        gauge.count_element();
        let stats = gauge.stats();
        assert_eq!(stats.high_water, 4);
        assert_eq!(stats.elements, 1);
        assert_eq!(stats.from, "rows");
    }
}
