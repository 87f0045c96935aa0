//! Interrupt vector management for the packet engine: spreading queues
//! across the vectors MSI-X negotiation yields ([`partition`]), and the
//! per-vector adaptive interrupt throttle ([`itr`]).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod itr;
pub mod partition;

pub use itr::{ItrSample, LatencyRange, ThrottleCaps, VectorThrottle};
pub use partition::{
    negotiate_vectors, partition, InterruptMode, QueueSet, VectorKind, VectorQueues, MAX_QUEUES,
    MIN_VECTORS,
};

use nic_hal::VectorId;

/// Everything the engine tracks about one interrupt vector: which queues it
/// serves, its throttle state, and the byte/packet samples accumulated since
/// its last interrupt.
pub struct QueueVector {
    pub id: VectorId,
    pub queues: VectorQueues,
    pub throttle: VectorThrottle,
    rx_sample: ItrSample,
    tx_sample: ItrSample,
}

impl QueueVector {
    pub fn new(id: VectorId, queues: VectorQueues, throttle: VectorThrottle) -> QueueVector {
        QueueVector {
            id,
            queues,
            throttle,
            rx_sample: ItrSample::default(),
            tx_sample: ItrSample::default(),
        }
    }

    pub fn kind(&self) -> VectorKind {
        self.queues.kind()
    }

    pub fn record_rx(&mut self, bytes: u64, packets: u64) {
        self.rx_sample.record(bytes, packets);
    }

    pub fn record_tx(&mut self, bytes: u64, packets: u64) {
        self.tx_sample.record(bytes, packets);
    }

    /// Called from interrupt context: a fresh interval starts now.
    pub fn clear_samples(&mut self) {
        self.rx_sample.clear();
        self.tx_sample.clear();
    }

    /// Feeds the interval's samples to the throttle and resets them.
    /// Returns the register write to issue, if the rate moved.
    pub fn update_throttle(&mut self) -> Option<nic_hal::ThrottleWrite> {
        let write = self.throttle.update(self.rx_sample, self.tx_sample);
        self.clear_samples();
        write
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nic_hal::QueueId;

    #[test]
    fn samples_accumulate_until_taken() {
        let mut queues = VectorQueues::default();
        queues.rx.insert(QueueId(0));
        let throttle = VectorThrottle::new(
            itr::ITR_DEFAULT_RX_RATE,
            true,
            ThrottleCaps::default(),
        );
        let mut vector = QueueVector::new(VectorId(0), queues, throttle);
        assert_eq!(vector.kind(), VectorKind::RxOnly);

        vector.record_rx(65_536, 4);
        vector.record_rx(65_536, 4);
        // Heavy interval, rate should start sinking toward bulk.
        let write = vector.update_throttle().expect("rate should move");
        assert!(write.rate < itr::ITR_DEFAULT_RX_RATE);

        // Samples were consumed; an idle interval keeps the remembered
        // classification, so the rate keeps gliding toward its target.
        let next = vector.update_throttle().expect("rate still settling");
        assert!(next.rate < write.rate);
    }
}
