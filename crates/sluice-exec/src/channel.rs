//! Bounded channels between adjacent stages.
//!
//! Producers reserve a slot before they compute the element that will fill
//! it, so a stage never runs ahead of what its consumer can buffer. Barriers
//! travel in-band and count against the same capacity as data.

use std::sync::Arc;

use tokio::sync::mpsc;

use sluice_core::element::Element;
use sluice_core::id::CheckpointSeq;

use crate::metrics::EdgeGauge;

#[derive(Debug)]
pub enum Message {
    Data(Element),
    /// Checkpoint barrier: everything before it belongs to checkpoint `seq`.
    Barrier(CheckpointSeq),
}

/// Create the channel for one edge, sized by the gauge's capacity.
pub fn edge(gauge: Arc<EdgeGauge>) -> (EdgeSender, EdgeReceiver) {
    let (tx, rx) = mpsc::channel(gauge.capacity().max(1));
    (EdgeSender { tx, gauge }, EdgeReceiver { rx })
}

#[derive(Debug)]
pub struct EdgeSender {
    tx: mpsc::Sender<Message>,
    gauge: Arc<EdgeGauge>,
}

impl EdgeSender {
    /// Wait for a free slot. `None` once the consumer is gone.
    pub async fn reserve(&self) -> Option<EdgePermit> {
        let permit = self.tx.clone().reserve_owned().await.ok()?;
        Some(EdgePermit {
            permit,
            gauge: Arc::clone(&self.gauge),
        })
    }
}

/// A reserved slot on an edge.
#[derive(Debug)]
pub struct EdgePermit {
    permit: mpsc::OwnedPermit<Message>,
    gauge: Arc<EdgeGauge>,
}

impl EdgePermit {
    pub fn send(self, message: Message) {
        if matches!(message, Message::Data(_)) {
            self.gauge.count_element();
        }
        let tx = self.permit.send(message);
        self.gauge.observe(tx.max_capacity() - tx.capacity());
    }
}

#[derive(Debug)]
pub struct EdgeReceiver {
    rx: mpsc::Receiver<Message>,
}

impl EdgeReceiver {
    /// Next message; `None` once the producer finished and the buffer drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}
