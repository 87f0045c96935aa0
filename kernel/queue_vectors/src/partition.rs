//! Distributing queues across the interrupt vectors the platform granted.
//!
//! The distribution is computed once at bring-up (or re-bring-up) and is
//! immutable afterwards; interrupt handlers and poll tasks only ever read it.

use alloc::vec::Vec;
use log::{info, warn};
use nic_hal::{NicHardware, QueueId};

/// The most queues of one direction the engine supports, bounded by the
/// [`QueueSet`] bitset width.
pub const MAX_QUEUES: u16 = 64;

/// The smallest MSI-X grant worth accepting: one vector for queue
/// completions plus one for everything else (link, mailbox).
pub const MIN_VECTORS: usize = 2;

/// A set of queue indices, stored as a bitset.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSet(u64);

impl QueueSet {
    pub const EMPTY: QueueSet = QueueSet(0);

    pub fn insert(&mut self, queue: QueueId) {
        debug_assert!(queue.0 < MAX_QUEUES);
        self.0 |= 1 << queue.0;
    }

    pub fn contains(&self, queue: QueueId) -> bool {
        queue.0 < MAX_QUEUES && (self.0 >> queue.0) & 1 == 1
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates the member queue indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = QueueId> + '_ {
        let bits = self.0;
        (0..MAX_QUEUES).filter(move |i| (bits >> i) & 1 == 1).map(QueueId)
    }
}

impl core::fmt::Debug for QueueSet {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_list().entries(self.iter().map(|q| q.0)).finish()
    }
}

/// Which completion routine a vector's poll pass runs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VectorKind {
    /// No queues assigned (the "other causes" vector).
    Other,
    RxOnly,
    TxOnly,
    Mixed,
}

/// The queues one interrupt vector is responsible for.
#[derive(Clone, Copy, Default, Debug)]
pub struct VectorQueues {
    pub rx: QueueSet,
    pub tx: QueueSet,
}

impl VectorQueues {
    pub fn kind(&self) -> VectorKind {
        match (self.rx.is_empty(), self.tx.is_empty()) {
            (true, true) => VectorKind::Other,
            (false, true) => VectorKind::RxOnly,
            (true, false) => VectorKind::TxOnly,
            (false, false) => VectorKind::Mixed,
        }
    }
}

/// Distributes `num_rx` receive and `num_tx` transmit queues over
/// `num_vectors` vectors.
///
/// When a vector is available per queue, each queue gets its own. Otherwise
/// queues of each direction are spread independently, each vector taking
/// `ceil(remaining / vectors_left)` of what is still unassigned, so the
/// per-vector counts differ by at most one.
pub fn partition(num_rx: u16, num_tx: u16, num_vectors: u16) -> Vec<VectorQueues> {
    assert!(num_vectors > 0, "cannot partition over zero vectors");
    assert!(num_rx <= MAX_QUEUES && num_tx <= MAX_QUEUES);

    let mut vectors = alloc::vec![VectorQueues::default(); num_vectors as usize];

    if num_vectors == num_rx + num_tx {
        for (v, rxq) in (0..num_rx).enumerate() {
            vectors[v].rx.insert(QueueId(rxq));
        }
        for txq in 0..num_tx {
            vectors[(num_rx + txq) as usize].tx.insert(QueueId(txq));
        }
        return vectors;
    }

    let mut rx_remaining = num_rx;
    let mut next_rx = 0u16;
    for (i, vector) in vectors.iter_mut().enumerate() {
        let vectors_left = num_vectors as usize - i;
        let take = (rx_remaining as usize).div_ceil(vectors_left) as u16;
        for _ in 0..take {
            vector.rx.insert(QueueId(next_rx));
            next_rx += 1;
        }
        rx_remaining -= take;
    }

    let mut tx_remaining = num_tx;
    let mut next_tx = 0u16;
    for (i, vector) in vectors.iter_mut().enumerate() {
        let vectors_left = num_vectors as usize - i;
        let take = (tx_remaining as usize).div_ceil(vectors_left) as u16;
        for _ in 0..take {
            vector.tx.insert(QueueId(next_tx));
            next_tx += 1;
        }
        tx_remaining -= take;
    }

    vectors
}

/// The interrupt arrangement negotiation settled on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptMode {
    /// MSI-X with `queue_vectors` vectors carrying queue completions and one
    /// further vector (index `queue_vectors`) for other causes.
    Msix { queue_vectors: usize },
    /// A single shared line; one combined vector owns every queue.
    SingleLine,
}

impl InterruptMode {
    pub fn queue_vectors(&self) -> usize {
        match self {
            InterruptMode::Msix { queue_vectors } => *queue_vectors,
            InterruptMode::SingleLine => 1,
        }
    }
}

/// Negotiates interrupt vectors with the platform.
///
/// Requests one vector per queue (bounded by the CPU count, since extra
/// vectors past that cannot be serviced concurrently) plus one for other
/// causes. A partial grant is retried at the granted size; below
/// [`MIN_VECTORS`] the device falls back to a single shared line.
pub fn negotiate_vectors<N: NicHardware>(
    hw: &mut N,
    num_queues: usize,
) -> Result<InterruptMode, &'static str> {
    let mut want = core::cmp::min(num_queues, hw.usable_cpus())
        .saturating_add(1)
        .min(hw.max_interrupt_vectors());

    while want >= MIN_VECTORS {
        match hw.enable_msix(want) {
            Ok(()) => {
                info!("msix enabled with {} vectors ({} for queues)", want, want - 1);
                return Ok(InterruptMode::Msix { queue_vectors: want - 1 });
            }
            Err(available) => {
                if available >= want {
                    // The platform refused outright rather than counter-offering.
                    break;
                }
                want = available;
            }
        }
    }

    warn!("msix unavailable, falling back to a single shared interrupt line");
    hw.enable_single_interrupt()?;
    Ok(InterruptMode::SingleLine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nic_mock::MockNic;

    #[test]
    fn one_to_one_when_vectors_match() {
        let vectors = partition(4, 4, 8);
        for (v, vq) in vectors.iter().enumerate().take(4) {
            assert_eq!(vq.rx.count(), 1);
            assert!(vq.rx.contains(QueueId(v as u16)));
            assert!(vq.tx.is_empty());
        }
        for (v, vq) in vectors.iter().enumerate().skip(4) {
            assert_eq!(vq.tx.count(), 1);
            assert!(vq.tx.contains(QueueId((v - 4) as u16)));
            assert!(vq.rx.is_empty());
        }
    }

    #[test]
    fn balance_holds_for_all_small_shapes() {
        for num_rx in 0..=8u16 {
            for num_tx in 0..=8u16 {
                for num_vectors in 1..=8u16 {
                    let vectors = partition(num_rx, num_tx, num_vectors);
                    assert_eq!(vectors.len(), num_vectors as usize);

                    let rx_total: usize = vectors.iter().map(|v| v.rx.count()).sum();
                    let tx_total: usize = vectors.iter().map(|v| v.tx.count()).sum();
                    assert_eq!(rx_total, num_rx as usize);
                    assert_eq!(tx_total, num_tx as usize);

                    // No queue may appear on two vectors.
                    let mut rx_seen = QueueSet::default();
                    let mut tx_seen = QueueSet::default();
                    for v in &vectors {
                        for q in v.rx.iter() {
                            assert!(!rx_seen.contains(q));
                            rx_seen.insert(q);
                        }
                        for q in v.tx.iter() {
                            assert!(!tx_seen.contains(q));
                            tx_seen.insert(q);
                        }
                    }

                    // Even spread per direction, unless 1:1 applies.
                    if num_vectors != num_rx + num_tx {
                        for counts in [
                            vectors.iter().map(|v| v.rx.count()).collect::<Vec<_>>(),
                            vectors.iter().map(|v| v.tx.count()).collect::<Vec<_>>(),
                        ] {
                            let max = counts.iter().copied().max().unwrap();
                            let min = counts.iter().copied().min().unwrap();
                            assert!(max - min <= 1, "uneven spread: {:?}", counts);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn kind_reflects_membership() {
        let vectors = partition(2, 2, 3);
        assert!(vectors.iter().any(|v| v.kind() == VectorKind::Mixed
            || v.kind() == VectorKind::RxOnly
            || v.kind() == VectorKind::TxOnly));
        let mut empty = VectorQueues::default();
        assert_eq!(empty.kind(), VectorKind::Other);
        empty.rx.insert(QueueId(0));
        assert_eq!(empty.kind(), VectorKind::RxOnly);
        empty.tx.insert(QueueId(0));
        assert_eq!(empty.kind(), VectorKind::Mixed);
    }

    #[test]
    fn negotiation_full_grant() {
        let mut hw = MockNic::new();
        let mode = negotiate_vectors(&mut hw, 8).unwrap();
        // 8 queues, 4 usable cpus: 4 + 1 other.
        assert_eq!(mode, InterruptMode::Msix { queue_vectors: 4 });
        assert_eq!(hw.msix_enabled(), Some(5));
    }

    #[test]
    fn negotiation_retries_at_granted_count() {
        let mut hw = MockNic::new();
        hw.set_msix_available(3);
        let mode = negotiate_vectors(&mut hw, 8).unwrap();
        assert_eq!(mode, InterruptMode::Msix { queue_vectors: 2 });
    }

    #[test]
    fn negotiation_falls_back_to_single_line() {
        let mut hw = MockNic::new();
        hw.set_msix_available(1);
        let mode = negotiate_vectors(&mut hw, 8).unwrap();
        assert_eq!(mode, InterruptMode::SingleLine);
        assert!(hw.single_line_enabled());
        assert_eq!(mode.queue_vectors(), 1);
    }

    #[test]
    fn request_capped_by_device_table() {
        let mut hw = MockNic::new();
        hw.set_usable_cpus(64);
        hw.set_max_vectors(3);
        let mode = negotiate_vectors(&mut hw, 8).unwrap();
        assert_eq!(mode, InterruptMode::Msix { queue_vectors: 2 });
    }
}
