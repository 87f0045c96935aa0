//! The device aggregate of the packet engine.
//!
//! An [`Adapter`] owns everything one NIC needs to move packets: its
//! transmit and receive queues, the interrupt vectors they are spread
//! across, the shared receive buffer pool, and the hang/recovery machinery.
//! The embedding supplies the hardware (a [`NicHardware`] implementation)
//! and the upward delivery edge, wires `interrupt` and `poll_vector` into
//! its interrupt handlers and poll tasks, calls `watchdog_tick` on a
//! multi-second cadence, and runs `process_recovery` from a dedicated task.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod recovery;
pub mod watchdog;

pub use recovery::{ResetReason, ResetRequester};
pub use watchdog::HangState;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{error, info};
use nic_buffers::{FrameDelivery, RxBufferPool, TransmitPacket};
use nic_hal::{NicHardware, QueueId, VectorId};
use nic_hal::regs::InterruptRegisters;
use nic_queues::rx::{RxBufferMode, RxChecksumCaps, RxQueue, RxQueueStats};
use nic_queues::tx::{TransmitResult, TxQueue, TxQueueStats};
use queue_vectors::itr::{ITR_DEFAULT_RX_RATE, ITR_DEFAULT_TX_RATE};
use queue_vectors::partition::{negotiate_vectors, partition, InterruptMode, VectorKind};
use queue_vectors::{QueueVector, VectorThrottle};

use recovery::RecoveryChannel;
use watchdog::Watchdog;

/// Everything configurable about one adapter, validated at construction
/// and at every `reconfigure`.
#[derive(Clone, Copy, Debug)]
pub struct AdapterConfig {
    pub num_rx_queues: u16,
    pub num_tx_queues: u16,
    /// Descriptors per ring; must be a power of two.
    pub ring_size: u16,
    pub rx_mode: RxBufferMode,
    /// Length of the linear receive buffers the pool hands out.
    pub rx_buffer_len: usize,
    /// Descriptors one completion pass may reclaim before yielding.
    pub work_limit: u16,
    pub hang_timeout_seconds: u64,
    pub adaptive_itr: bool,
    pub throttle_caps: queue_vectors::ThrottleCaps,
    pub csum_caps: RxChecksumCaps,
    /// Extra pool entries beyond one per ring slot, so delivered frames
    /// holding buffers don't immediately starve refill.
    pub pool_headroom: usize,
}

impl Default for AdapterConfig {
    fn default() -> AdapterConfig {
        AdapterConfig {
            num_rx_queues: 1,
            num_tx_queues: 1,
            ring_size: 512,
            rx_mode: RxBufferMode::Single,
            rx_buffer_len: 2048,
            work_limit: 64,
            hang_timeout_seconds: 1,
            adaptive_itr: true,
            throttle_caps: queue_vectors::ThrottleCaps::default(),
            csum_caps: RxChecksumCaps::default(),
            pool_headroom: 64,
        }
    }
}

impl AdapterConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.num_rx_queues == 0 || self.num_tx_queues == 0 {
            return Err("AdapterConfig: need at least one queue per direction");
        }
        if self.num_rx_queues > queue_vectors::MAX_QUEUES
            || self.num_tx_queues > queue_vectors::MAX_QUEUES
        {
            return Err("AdapterConfig: too many queues");
        }
        if !self.ring_size.is_power_of_two() || self.ring_size < 2 {
            return Err("AdapterConfig: ring_size must be a power of two");
        }
        if self.work_limit == 0 {
            return Err("AdapterConfig: work_limit must be nonzero");
        }
        if self.hang_timeout_seconds == 0 {
            return Err("AdapterConfig: hang_timeout_seconds must be nonzero");
        }
        if self.rx_buffer_len == 0 {
            return Err("AdapterConfig: rx_buffer_len must be nonzero");
        }
        Ok(())
    }
}

/// Device-wide counters. Per-queue counters live on the queues themselves.
#[derive(Clone, Copy, Default, Debug)]
pub struct AdapterStats {
    /// Full resets performed (hang recovery or link-loss flush).
    pub tx_timeout_count: u64,
    /// Carrier transitions observed by the watchdog.
    pub link_changes: u64,
}

/// What one poll pass concluded.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PollOutcome {
    /// All work done; the vector was re-armed.
    Idle,
    /// A work limit ran out. The vector was software-fired so another pass
    /// is guaranteed; the poll task should yield and run again.
    MoreWork,
}

/// One NIC: hardware handles, queues, vectors, and lifecycle state.
pub struct Adapter<N: NicHardware, F: FrameDelivery + Clone> {
    pub(crate) hw: N,
    pub(crate) config: AdapterConfig,
    pub(crate) interrupts: N::Interrupts,
    pub(crate) clock: N::Clock,
    pub(crate) delivery: F,
    pub(crate) tx_queues: Vec<TxQueue<N::TxRegs, N::Dma, N::Clock>>,
    pub(crate) rx_queues: Vec<RxQueue<N::RxRegs, N::Dma, F>>,
    pub(crate) vectors: Vec<QueueVector>,
    pub(crate) mode: Option<InterruptMode>,
    pub(crate) down: AtomicBool,
    pub(crate) watchdog: Watchdog,
    pub(crate) recovery: RecoveryChannel,
    pub stats: AdapterStats,
}

impl<N: NicHardware, F: FrameDelivery + Clone> Adapter<N, F> {
    /// Builds an adapter in the down state; call [`up`](Adapter::up) to
    /// start moving packets.
    pub fn new(mut hw: N, config: AdapterConfig, delivery: F) -> Result<Adapter<N, F>, &'static str> {
        config.validate()?;
        let interrupts = hw.interrupt_registers()?;
        let clock = hw.clock();
        Ok(Adapter {
            hw,
            config,
            interrupts,
            clock,
            delivery,
            tx_queues: Vec::new(),
            rx_queues: Vec::new(),
            vectors: Vec::new(),
            mode: None,
            down: AtomicBool::new(true),
            watchdog: Watchdog::new(),
            recovery: RecoveryChannel::new(),
            stats: AdapterStats::default(),
        })
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    pub fn interrupt_mode(&self) -> Option<InterruptMode> {
        self.mode
    }

    /// A handle for scheduling full resets from outside the adapter.
    pub fn reset_requester(&self) -> ResetRequester {
        self.recovery.requester()
    }

    pub fn tx_queue_stats(&self, queue: QueueId) -> Option<TxQueueStats> {
        self.tx_queues.get(usize::from(queue.0)).map(|q| q.stats)
    }

    pub fn rx_queue_stats(&self, queue: QueueId) -> Option<RxQueueStats> {
        self.rx_queues.get(usize::from(queue.0)).map(|q| q.stats)
    }

    /// Brings the device up: builds and enables every queue, negotiates
    /// interrupt vectors, programs the cause routing and initial throttle,
    /// and arms the watchdog. A no-op if the adapter is already up.
    pub fn up(&mut self) -> Result<(), &'static str> {
        if !self.is_down() {
            return Ok(());
        }
        let cfg = self.config;
        cfg.validate()?;

        let slots = usize::from(cfg.num_rx_queues) * usize::from(cfg.ring_size);
        let num_pages = match cfg.rx_mode {
            RxBufferMode::HeaderSplit => slots + cfg.pool_headroom,
            RxBufferMode::Single => 0,
        };
        let pool = RxBufferPool::new(slots + cfg.pool_headroom, cfg.rx_buffer_len, num_pages);

        debug_assert!(self.tx_queues.is_empty() && self.rx_queues.is_empty());
        for q in 0..cfg.num_tx_queues {
            let regs = self.hw.tx_queue_registers(QueueId(q))?;
            let mut queue = TxQueue::new(
                QueueId(q),
                regs,
                self.hw.dma(),
                self.hw.clock(),
                cfg.ring_size,
                cfg.work_limit,
            )?;
            queue.enable()?;
            self.tx_queues.push(queue);
        }
        for q in 0..cfg.num_rx_queues {
            let regs = self.hw.rx_queue_registers(QueueId(q))?;
            let mut queue = RxQueue::new(
                QueueId(q),
                regs,
                self.hw.dma(),
                self.delivery.clone(),
                pool.clone(),
                cfg.rx_mode,
                cfg.csum_caps,
                cfg.ring_size,
            )?;
            queue.refill();
            queue.enable()?;
            self.rx_queues.push(queue);
        }

        let total_queues = usize::from(cfg.num_rx_queues) + usize::from(cfg.num_tx_queues);
        let mode = negotiate_vectors(&mut self.hw, total_queues)?;
        let layout = partition(
            cfg.num_rx_queues,
            cfg.num_tx_queues,
            mode.queue_vectors() as u16,
        );
        self.vectors = layout
            .into_iter()
            .enumerate()
            .map(|(i, queues)| {
                let initial_rate = match queues.kind() {
                    VectorKind::TxOnly => ITR_DEFAULT_TX_RATE,
                    _ => ITR_DEFAULT_RX_RATE,
                };
                QueueVector::new(
                    VectorId(i as u16),
                    queues,
                    VectorThrottle::new(initial_rate, cfg.adaptive_itr, cfg.throttle_caps),
                )
            })
            .collect();

        for vector in &self.vectors {
            for q in vector.queues.rx.iter() {
                self.interrupts.map_rx_queue(q, vector.id);
            }
            for q in vector.queues.tx.iter() {
                self.interrupts.map_tx_queue(q, vector.id);
            }
            self.interrupts.set_throttle(vector.id, vector.throttle.initial_write());
            self.interrupts.enable_vector(vector.id);
        }
        self.interrupts.flush();

        self.mode = Some(mode);
        self.watchdog.arm(cfg.num_tx_queues);
        self.down.store(false, Ordering::SeqCst);
        info!(
            "adapter up: {} rx / {} tx queues over {} vector(s), ring size {}",
            cfg.num_rx_queues,
            cfg.num_tx_queues,
            mode.queue_vectors(),
            cfg.ring_size,
        );
        Ok(())
    }

    /// Takes the device down: masks interrupts, disables every queue, and
    /// drains every ring unconditionally. Idempotent; outstanding frames
    /// and packet handles are released without delivery or completion.
    pub fn down(&mut self) {
        if self.down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.interrupts.disable_all();
        self.interrupts.flush();
        for queue in &mut self.tx_queues {
            queue.disable();
            queue.drain();
        }
        for queue in &mut self.rx_queues {
            queue.disable();
            queue.drain();
        }
        // Dropping the queues releases their descriptor-ring mappings; the
        // next up() rebuilds from scratch.
        self.tx_queues.clear();
        self.rx_queues.clear();
        self.vectors.clear();
        self.mode = None;
        info!("adapter down");
    }

    /// Applies a new queue geometry: full down, then up with the new shape.
    pub fn reconfigure(
        &mut self,
        num_rx_queues: u16,
        num_tx_queues: u16,
        rx_mode: RxBufferMode,
    ) -> Result<(), &'static str> {
        let mut cfg = self.config;
        cfg.num_rx_queues = num_rx_queues;
        cfg.num_tx_queues = num_tx_queues;
        cfg.rx_mode = rx_mode;
        cfg.validate()?;
        self.down();
        self.config = cfg;
        self.up()
    }

    /// Submits one packet on the given transmit queue.
    pub fn transmit(&mut self, queue: QueueId, packet: TransmitPacket) -> TransmitResult {
        if self.is_down() {
            return TransmitResult::Busy(packet);
        }
        match self.tx_queues.get_mut(usize::from(queue.0)) {
            Some(q) => q.transmit(packet),
            None => {
                error!("Adapter::transmit(): no such queue {}", queue);
                TransmitResult::Busy(packet)
            }
        }
    }

    /// The interrupt-context half of completion handling: a fresh throttle
    /// interval starts now, and the returned kind tells the embedding which
    /// poll task to schedule. Never walks a ring.
    pub fn interrupt(&mut self, vector: VectorId) -> Option<VectorKind> {
        if self.is_down() {
            return None;
        }
        let v = self.vectors.get_mut(usize::from(vector.0))?;
        v.clear_samples();
        match v.kind() {
            VectorKind::Other => None,
            kind => Some(kind),
        }
    }

    /// One poll pass over everything the vector serves: transmit cleanup
    /// first, then receive harvesting with the budget split evenly across
    /// the vector's receive queues.
    ///
    /// On `Idle` the adaptive throttle is fed the interval's samples and
    /// the vector is re-armed (skipped while going down). On `MoreWork` the
    /// vector is software-fired instead, so the caller can yield without
    /// losing the pending completions.
    pub fn poll_vector(&mut self, vector: VectorId, budget: u16) -> PollOutcome {
        let idx = usize::from(vector.0);
        if idx >= self.vectors.len() {
            return PollOutcome::Idle;
        }
        let queues = self.vectors[idx].queues;
        let mut more_work = false;
        let (mut tx_bytes, mut tx_packets) = (0u64, 0u64);
        let (mut rx_bytes, mut rx_packets) = (0u64, 0u64);

        for q in queues.tx.iter() {
            if let Some(txq) = self.tx_queues.get_mut(usize::from(q.0)) {
                let summary = txq.clean();
                tx_bytes += summary.bytes;
                tx_packets += summary.packets;
                more_work |= summary.more_work;
            }
        }

        let rx_count = queues.rx.count() as u16;
        if rx_count > 0 {
            let per_queue_budget = core::cmp::max(budget / rx_count, 1);
            for q in queues.rx.iter() {
                if let Some(rxq) = self.rx_queues.get_mut(usize::from(q.0)) {
                    let summary = rxq.harvest(per_queue_budget);
                    rx_bytes += summary.bytes;
                    rx_packets += summary.packets;
                    more_work |= summary.more_work;
                }
            }
        }

        let v = &mut self.vectors[idx];
        v.record_tx(tx_bytes, tx_packets);
        v.record_rx(rx_bytes, rx_packets);

        if more_work {
            self.interrupts.trigger_vector(vector);
            return PollOutcome::MoreWork;
        }
        if !self.down.load(Ordering::SeqCst) {
            if let Some(write) = v.update_throttle() {
                self.interrupts.set_throttle(vector, write);
            }
            self.interrupts.enable_vector(vector);
        }
        PollOutcome::Idle
    }

    /// Performs any scheduled full reset: down, up, count it. Run from a
    /// dedicated recovery task, never inline in a poll pass.
    /// Returns whether a reset was performed.
    pub fn process_recovery(&mut self) -> Result<bool, &'static str> {
        let mut requested = false;
        while let Some(request) = self.recovery.take_request() {
            log::warn!("performing full reset ({:?})", request.reason);
            requested = true;
        }
        if !requested {
            return Ok(false);
        }
        self.down();
        self.stats.tx_timeout_count += 1;
        self.up()?;
        // Only re-open the latch once the device is back; a hang observed
        // mid-reset must not queue a second reset.
        self.recovery.clear();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nic_buffers::{ChecksumContext, L4Protocol, TsoContext, TxOffload};
    use nic_descriptors::{RxStatus, RxWriteBack};
    use nic_hal::LinkStatus;
    use nic_mock::{MockDelivery, MockNic};
    use watchdog::HangState;

    fn small_config() -> AdapterConfig {
        AdapterConfig {
            ring_size: 64,
            pool_headroom: 16,
            ..AdapterConfig::default()
        }
    }

    fn adapter_up(config: AdapterConfig) -> (Adapter<MockNic, MockDelivery>, MockDelivery) {
        let delivery = MockDelivery::new();
        let mut adapter = Adapter::new(MockNic::new(), config, delivery.clone()).unwrap();
        adapter.up().unwrap();
        (adapter, delivery)
    }

    fn packet(len: usize) -> TransmitPacket {
        TransmitPacket::new(alloc::vec![0u8; len].into_boxed_slice())
    }

    #[test]
    fn single_packet_round_trip() {
        let (mut a, delivery) = adapter_up(small_config());
        // 1 RX + 1 TX queue over 4 usable CPUs: each queue gets its own
        // vector, RX first.
        assert_eq!(a.interrupt_mode(), Some(InterruptMode::Msix { queue_vectors: 2 }));
        assert_eq!(a.interrupt(VectorId(0)), Some(VectorKind::RxOnly));
        assert_eq!(a.interrupt(VectorId(1)), Some(VectorKind::TxOnly));

        assert!(matches!(
            a.transmit(QueueId(0), packet(1500)),
            TransmitResult::Sent
        ));
        a.tx_queues[0].descriptors_mut()[0].mark_done();
        assert_eq!(a.poll_vector(VectorId(1), 64), PollOutcome::Idle);
        let tx_stats = a.tx_queue_stats(QueueId(0)).unwrap();
        assert_eq!(tx_stats.packets, 1);
        assert_eq!(tx_stats.bytes, 1500);

        a.rx_queues[0].descriptors_mut()[0].write_back(&RxWriteBack {
            packet_len: 1500,
            status: RxStatus::DD | RxStatus::EOP | RxStatus::IP_CHECKED | RxStatus::L4_CHECKED,
            ..Default::default()
        });
        assert_eq!(a.poll_vector(VectorId(0), 64), PollOutcome::Idle);
        assert_eq!(delivery.delivered(), 1);
        let (frame, queue) = delivery.take().pop().unwrap();
        assert_eq!(frame.total_len, 1500);
        assert_eq!(queue, QueueId(0));

        // Idle polls re-armed both vectors beyond the bring-up enables.
        let events = a.hw.interrupt_events();
        let enabled = events.lock().enabled.clone();
        assert!(enabled.iter().filter(|v| **v == VectorId(0)).count() >= 2);
        assert!(enabled.iter().filter(|v| **v == VectorId(1)).count() >= 2);
    }

    #[test]
    fn tso_completion_counts_wire_segments() {
        let (mut a, _delivery) = adapter_up(small_config());
        let mut pkt = packet(9000);
        pkt.offload = TxOffload::Tso(TsoContext {
            checksum: ChecksumContext {
                ipv4: true,
                protocol: L4Protocol::Tcp,
                mac_header_len: 14,
                ip_header_len: 20,
            },
            l4_header_len: 20,
            mss: 1500,
        });
        assert!(matches!(a.transmit(QueueId(0), pkt), TransmitResult::Sent));

        // Context descriptor at 0, single data descriptor at 1.
        a.tx_queues[0].descriptors_mut()[1].mark_done();
        assert_eq!(a.poll_vector(VectorId(1), 64), PollOutcome::Idle);
        let stats = a.tx_queue_stats(QueueId(0)).unwrap();
        // ceil((9000 - 54) / 1500) = 6 wire frames, each after the first
        // carrying a replicated 54-byte header.
        assert_eq!(stats.packets, 6);
        assert_eq!(stats.bytes, 9000 + 5 * 54);
    }

    #[test]
    fn paused_queue_is_not_a_hang() {
        let (mut a, _delivery) = adapter_up(small_config());
        assert!(matches!(
            a.transmit(QueueId(0), packet(1500)),
            TransmitResult::Sent
        ));
        a.watchdog_tick();
        assert_eq!(a.hang_state(QueueId(0)), Some(HangState::Suspect));

        // Two simulated seconds pass with the queue paused by flow control.
        a.clock.advance(2000);
        a.hw.set_transmit_paused(QueueId(0), true);
        a.watchdog_tick();
        assert_eq!(a.hang_state(QueueId(0)), Some(HangState::Suspect));
        assert!(!a.recovery.pending());

        // Unpaused with the same stale work, it is a real hang.
        a.hw.set_transmit_paused(QueueId(0), false);
        a.watchdog_tick();
        assert_eq!(a.hang_state(QueueId(0)), Some(HangState::Recovering));
        assert!(a.recovery.pending());

        // Further ticks must not pile up more requests.
        a.watchdog_tick();
        assert!(a.recovery.take_request().is_some());
        assert!(a.recovery.take_request().is_none());
    }

    #[test]
    fn recovery_resets_and_counts() {
        let (mut a, _delivery) = adapter_up(small_config());
        assert!(matches!(
            a.transmit(QueueId(0), packet(1500)),
            TransmitResult::Sent
        ));
        a.watchdog_tick();
        a.clock.advance(2000);
        a.watchdog_tick();
        assert!(a.recovery.pending());

        assert_eq!(a.process_recovery(), Ok(true));
        assert_eq!(a.stats.tx_timeout_count, 1);
        assert!(!a.is_down());
        assert!(!a.recovery.pending());
        assert_eq!(a.tx_queues[0].used_count(), 0);
        assert_eq!(a.hang_state(QueueId(0)), Some(HangState::Healthy));

        // Nothing scheduled, nothing done.
        assert_eq!(a.process_recovery(), Ok(false));
        assert_eq!(a.stats.tx_timeout_count, 1);
    }

    #[test]
    fn link_loss_with_pending_tx_schedules_reset() {
        let (mut a, _delivery) = adapter_up(small_config());
        a.watchdog_tick();
        assert_eq!(a.stats.link_changes, 1);

        assert!(matches!(
            a.transmit(QueueId(0), packet(500)),
            TransmitResult::Sent
        ));
        a.hw.set_link(LinkStatus::DOWN);
        a.watchdog_tick();
        assert_eq!(a.stats.link_changes, 2);
        assert!(a.recovery.pending());
        assert_eq!(
            a.recovery.take_request().map(|r| r.reason),
            Some(ResetReason::LinkDown)
        );
    }

    #[test]
    fn single_line_fallback_serves_all_queues() {
        let nic = MockNic::new();
        nic.set_msix_available(0);
        let config = AdapterConfig {
            num_rx_queues: 2,
            num_tx_queues: 2,
            ..small_config()
        };
        let delivery = MockDelivery::new();
        let mut a = Adapter::new(nic, config, delivery.clone()).unwrap();
        a.up().unwrap();
        assert_eq!(a.interrupt_mode(), Some(InterruptMode::SingleLine));
        assert_eq!(a.interrupt(VectorId(0)), Some(VectorKind::Mixed));

        assert!(matches!(
            a.transmit(QueueId(1), packet(900)),
            TransmitResult::Sent
        ));
        a.tx_queues[1].descriptors_mut()[0].mark_done();
        a.rx_queues[0].descriptors_mut()[0].write_back(&RxWriteBack {
            packet_len: 300,
            status: RxStatus::DD | RxStatus::EOP,
            ..Default::default()
        });
        assert_eq!(a.poll_vector(VectorId(0), 64), PollOutcome::Idle);
        assert_eq!(a.tx_queue_stats(QueueId(1)).unwrap().packets, 1);
        assert_eq!(delivery.delivered(), 1);
    }

    #[test]
    fn exhausted_rx_budget_refires_the_vector() {
        let (mut a, delivery) = adapter_up(small_config());
        for i in 0..3 {
            a.rx_queues[0].descriptors_mut()[i].write_back(&RxWriteBack {
                packet_len: 100,
                status: RxStatus::DD | RxStatus::EOP,
                ..Default::default()
            });
        }
        assert_eq!(a.poll_vector(VectorId(0), 2), PollOutcome::MoreWork);
        let events = a.hw.interrupt_events();
        assert!(events.lock().triggered.contains(&VectorId(0)));

        assert_eq!(a.poll_vector(VectorId(0), 64), PollOutcome::Idle);
        assert_eq!(delivery.delivered(), 3);
    }

    #[test]
    fn reconfigure_rebuilds_queues_and_vectors() {
        let (mut a, _delivery) = adapter_up(small_config());
        a.reconfigure(2, 2, RxBufferMode::HeaderSplit).unwrap();
        assert!(!a.is_down());
        assert_eq!(a.tx_queues.len(), 2);
        assert_eq!(a.rx_queues.len(), 2);
        // 4 queues, 4 CPUs: 5 granted, 4 queue vectors, 1:1 layout.
        assert_eq!(a.interrupt_mode(), Some(InterruptMode::Msix { queue_vectors: 4 }));
        assert_eq!(a.vectors.len(), 4);

        // The cause table was reprogrammed for the new shape.
        let events = a.hw.interrupt_events();
        let guard = events.lock();
        assert!(guard.rx_map.contains(&(QueueId(1), VectorId(1))));
        assert!(guard.tx_map.contains(&(QueueId(1), VectorId(3))));
    }

    #[test]
    fn down_releases_every_mapping_and_is_idempotent() {
        let (mut a, _delivery) = adapter_up(small_config());
        let dma = a.hw.dma();
        assert!(dma.active_mappings() > 0);
        assert_eq!(dma.ring_mappings(), 2);

        a.down();
        a.down();
        assert_eq!(dma.active_mappings(), 0);
        assert_eq!(dma.ring_mappings(), 0);
        assert!(a.is_down());

        // Submissions while down bounce without touching anything.
        assert!(matches!(
            a.transmit(QueueId(0), packet(100)),
            TransmitResult::Busy(_)
        ));
        assert!(a.interrupt(VectorId(0)).is_none());

        // And the device comes back.
        a.up().unwrap();
        a.up().unwrap();
        assert!(!a.is_down());
        assert!(matches!(
            a.transmit(QueueId(0), packet(100)),
            TransmitResult::Sent
        ));
    }
}
