//! The receive engine for one queue: buffer refill and completion harvest,
//! including reassembly of packets the hardware spread across multiple
//! descriptors.
//!
//! A partially-built packet never leaves the ring: a non-final descriptor
//! names the index of its continuation, and the packet-under-construction is
//! parked on that slot until the final descriptor arrives. A ring reset
//! abandons any such packet, releasing its buffers without delivery.

use alloc::boxed::Box;
use core::sync::atomic::{fence, Ordering};
use log::{debug, error};
use nic_buffers::{
    ChecksumVerdict, FrameDelivery, PageRef, ReceiveBuffer, ReceivedFrame, RxBufferPool,
    RxFragment, HALF_PAGE,
};
use nic_descriptors::{AdvancedRxDescriptor, RxError, RxStatus};
use nic_hal::{DeviceAddress, DmaDirection, DmaMapper, QueueId, RxQueueRegisters};

use crate::ring::Ring;

/// Slots are replenished and the tail published in batches of this many, to
/// amortize the register write. The original driver's write-back threshold
/// is abstracted into this one batch parameter.
pub const RX_REFILL_BATCH: u16 = 16;

/// Size of the linear header buffer in split mode, and the clamp applied to
/// any hardware-reported header length.
pub const RX_HDR_SIZE: u16 = 512;

/// How a ring presents buffers to the hardware, chosen at (re)configuration.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RxBufferMode {
    /// One linear buffer per descriptor, sized by the buffer pool.
    Single,
    /// A small header buffer plus a half-page payload buffer per descriptor.
    HeaderSplit,
}

/// What the hardware's checksum engine was configured to do for this ring.
/// Negotiated once per configuration, never per packet.
#[derive(Clone, Copy, Debug)]
pub struct RxChecksumCaps {
    pub enabled: bool,
    /// The affected silicon revision reports a checksum error for UDP
    /// packets whose checksum field is zero; treat those as unverified
    /// instead of bad.
    pub zero_udp_quirk: bool,
}

impl Default for RxChecksumCaps {
    fn default() -> RxChecksumCaps {
        RxChecksumCaps {
            enabled: true,
            zero_udp_quirk: false,
        }
    }
}

/// Counters for one receive queue.
#[derive(Clone, Copy, Default, Debug)]
pub struct RxQueueStats {
    pub packets: u64,
    pub bytes: u64,
    /// Completions that continued into another descriptor.
    pub non_eop_descs: u64,
    /// Refill passes cut short because no payload page was available.
    pub alloc_rx_page_failed: u64,
    /// Refill passes cut short because no header buffer was available.
    pub alloc_rx_buff_failed: u64,
    /// Hardware-reported checksum errors (excluding the quirk case).
    pub hw_csum_rx_error: u64,
}

/// A packet under construction across a chain of descriptors.
struct PendingFrame {
    frame: ReceivedFrame,
    /// The chain's first header buffer, kept mapped until the end of the
    /// packet; its unmap is deferred the way the original coalescing path
    /// defers the first buffer's.
    held_header: Option<ReceiveBuffer>,
}

impl PendingFrame {
    fn new() -> PendingFrame {
        PendingFrame {
            frame: ReceivedFrame::empty(),
            held_header: None,
        }
    }

    fn is_start(&self) -> bool {
        self.frame.frags.is_empty() && self.held_header.is_none()
    }
}

/// Shadow state for one receive ring slot.
#[derive(Default)]
struct RxSlot {
    header: Option<ReceiveBuffer>,
    page: Option<PageRef>,
    page_offset: usize,
    /// Device address of the posted page half; present exactly while the
    /// hardware lease is outstanding.
    page_addr: Option<DeviceAddress>,
    /// A packet continued onto this slot by an earlier descriptor.
    pending: Option<PendingFrame>,
}

impl RxSlot {
    fn default_array(capacity: u16) -> Box<[RxSlot]> {
        (0..capacity).map(|_| RxSlot::default()).collect()
    }
}

/// What one harvest pass accomplished.
#[derive(Clone, Copy, Default, Debug)]
pub struct HarvestSummary {
    /// Packets delivered upward.
    pub packets: u64,
    pub bytes: u64,
    /// The budget ran out with completed descriptors still pending.
    pub more_work: bool,
}

/// One receive queue: descriptor ring, shadow slots, buffer pool handle,
/// and the upward delivery edge.
pub struct RxQueue<S: RxQueueRegisters, D: DmaMapper, F: FrameDelivery> {
    id: QueueId,
    regs: S,
    ring: Ring,
    descs: Box<[AdvancedRxDescriptor]>,
    slots: Box<[RxSlot]>,
    dma: D,
    delivery: F,
    pool: RxBufferPool,
    mode: RxBufferMode,
    csum_caps: RxChecksumCaps,
    ring_addr: DeviceAddress,
    ring_bytes: usize,
    pub stats: RxQueueStats,
}

impl<S: RxQueueRegisters, D: DmaMapper, F: FrameDelivery> RxQueue<S, D, F> {
    pub fn new(
        id: QueueId,
        mut regs: S,
        dma: D,
        delivery: F,
        pool: RxBufferPool,
        mode: RxBufferMode,
        csum_caps: RxChecksumCaps,
        capacity: u16,
    ) -> Result<RxQueue<S, D, F>, &'static str> {
        let ring = Ring::new(capacity)?;
        let descs: Box<[AdvancedRxDescriptor]> = (0..capacity)
            .map(|_| AdvancedRxDescriptor::default())
            .collect();
        let slots = RxSlot::default_array(capacity);

        let ring_bytes = descs.len() * core::mem::size_of::<AdvancedRxDescriptor>();
        let ring_addr = dma
            .map_descriptor_ring(descs.as_ptr() as usize, ring_bytes)
            .map_err(|_| "RxQueue::new(): couldn't map descriptor ring")?;
        regs.set_descriptor_base(ring_addr);
        regs.set_descriptor_count(capacity);
        regs.set_tail(0);

        Ok(RxQueue {
            id,
            regs,
            ring,
            descs,
            slots,
            dma,
            delivery,
            pool,
            mode,
            csum_caps,
            ring_addr,
            ring_bytes,
            stats: RxQueueStats::default(),
        })
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn mode(&self) -> RxBufferMode {
        self.mode
    }

    pub fn free_count(&self) -> u16 {
        self.ring.free_count()
    }

    pub fn used_count(&self) -> u16 {
        self.ring.used_count()
    }

    pub fn next_to_use(&self) -> u16 {
        self.ring.next_to_use()
    }

    pub fn next_to_clean(&self) -> u16 {
        self.ring.next_to_clean()
    }

    /// Enables the queue in hardware, waiting (bounded) for the enable bit
    /// to latch. Configuration-time only.
    pub fn enable(&mut self) -> Result<(), &'static str> {
        self.regs.set_enabled(true);
        for _ in 0..1000 {
            if self.regs.is_enabled() {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err("RxQueue::enable(): enable bit never latched")
    }

    pub fn disable(&mut self) {
        self.regs.set_enabled(false);
    }

    /// The device side of the shared ring, for platform glue and device
    /// models.
    pub fn descriptors_mut(&mut self) -> &mut [AdvancedRxDescriptor] {
        &mut self.descs
    }

    /// Attaches fresh buffers to every free slot (or as many as the pool
    /// allows), rewrites their descriptor addresses, and publishes the new
    /// tail. Pool exhaustion is not an error: the pass simply stops where
    /// it is and the next invocation resumes from the same slot.
    pub fn refill(&mut self) {
        let mut to_fill = self.ring.free_count();
        let mut filled_any = false;

        while to_fill > 0 {
            let i = self.ring.next_to_use();
            if !self.fill_slot(i) {
                break;
            }
            let next = self.ring.advance(i);
            self.ring.set_next_to_use(next);
            filled_any = true;
            to_fill -= 1;
        }

        if filled_any {
            // Descriptor contents must be visible before the tail moves.
            fence(Ordering::Release);
            let ntu = self.ring.next_to_use();
            let tail = if ntu == 0 {
                self.ring.capacity() - 1
            } else {
                ntu - 1
            };
            self.regs.set_tail(u32::from(tail));
        }
    }

    /// Prepares one slot for hardware ownership. Returns false if a buffer
    /// or mapping could not be obtained; the slot is left consistent for a
    /// later retry.
    fn fill_slot(&mut self, i: u16) -> bool {
        let idx = usize::from(i);
        match self.mode {
            RxBufferMode::HeaderSplit => {
                // Payload page: flip to the other half of the existing page
                // when nothing upward still references it, else take a
                // fresh one.
                let recycle = self.slots[idx]
                    .page
                    .as_ref()
                    .map(|p| p.is_exclusive())
                    .unwrap_or(false);
                if recycle {
                    self.slots[idx].page_offset ^= HALF_PAGE;
                } else {
                    match self.pool.take_page() {
                        Some(page) => {
                            self.slots[idx].page = Some(page);
                            self.slots[idx].page_offset = 0;
                        }
                        None => {
                            self.stats.alloc_rx_page_failed += 1;
                            return false;
                        }
                    }
                }
                if self.slots[idx].header.is_none() {
                    match self.pool.take_buffer() {
                        Some(buf) => self.slots[idx].header = Some(buf),
                        None => {
                            self.stats.alloc_rx_buff_failed += 1;
                            return false;
                        }
                    }
                }

                // Map and rewrite both addresses every time: hardware
                // clobbered the descriptor on its last write-back.
                let offset = self.slots[idx].page_offset;
                let page_addr = {
                    let page = self.slots[idx].page.as_ref().unwrap();
                    match self.dma.map_page(
                        page.as_slice(),
                        offset,
                        HALF_PAGE,
                        DmaDirection::FromDevice,
                    ) {
                        Ok(addr) => addr,
                        Err(_) => {
                            self.stats.alloc_rx_page_failed += 1;
                            return false;
                        }
                    }
                };
                let header = self.slots[idx].header.as_mut().unwrap();
                let capacity = header.capacity() as u16;
                let _ = header.set_length(capacity);
                let header_addr = match self.dma.map_single(header, DmaDirection::FromDevice) {
                    Ok(addr) => addr,
                    Err(_) => {
                        self.dma.unmap(page_addr, HALF_PAGE, DmaDirection::FromDevice);
                        self.stats.alloc_rx_buff_failed += 1;
                        return false;
                    }
                };
                header.device_addr = Some(header_addr);
                self.slots[idx].page_addr = Some(page_addr);
                self.descs[idx].set_buffer_addresses(page_addr, header_addr);
                true
            }
            RxBufferMode::Single => {
                if self.slots[idx].header.is_none() {
                    match self.pool.take_buffer() {
                        Some(buf) => self.slots[idx].header = Some(buf),
                        None => {
                            self.stats.alloc_rx_buff_failed += 1;
                            return false;
                        }
                    }
                }
                let buf = self.slots[idx].header.as_mut().unwrap();
                let capacity = buf.capacity() as u16;
                let _ = buf.set_length(capacity);
                let addr = match self.dma.map_single(buf, DmaDirection::FromDevice) {
                    Ok(addr) => addr,
                    Err(_) => {
                        self.stats.alloc_rx_buff_failed += 1;
                        return false;
                    }
                };
                buf.device_addr = Some(addr);
                self.descs[idx].set_buffer_addresses(addr, DeviceAddress(0));
                true
            }
        }
    }

    /// Harvests completed descriptors, reassembling multi-descriptor
    /// packets and delivering each finished packet exactly once. Bounded by
    /// `budget` delivered packets so rings sharing a poll cycle each get a
    /// fair slice; continuation descriptors don't count against the budget.
    pub fn harvest(&mut self, budget: u16) -> HarvestSummary {
        let mut summary = HarvestSummary::default();
        let mut cleaned_since_refill: u16 = 0;

        loop {
            if summary.packets >= u64::from(budget) {
                let ntc = usize::from(self.ring.next_to_clean());
                summary.more_work =
                    self.ring.used_count() > 0 && self.descs[ntc].descriptor_done();
                break;
            }
            if self.ring.used_count() == 0 {
                break;
            }
            let i = self.ring.next_to_clean();
            let idx = usize::from(i);
            if !self.descs[idx].descriptor_done() {
                break;
            }
            // The status read gates every access to buffer contents below.
            fence(Ordering::Acquire);

            let status = self.descs[idx].status();
            let errors = self.descs[idx].error();
            let eop = status.contains(RxStatus::EOP);
            let pkt_len = usize::from(self.descs[idx].packet_len());
            let vlan = status
                .contains(RxStatus::VLAN_PRESENT)
                .then(|| self.descs[idx].vlan_tag());
            let next_index = self.descs[idx].next_index();

            let mut pending = self.slots[idx].pending.take().unwrap_or_else(PendingFrame::new);

            // Header buffer (the whole packet in single-buffer mode).
            if let Some(mut hdr) = self.slots[idx].header.take() {
                let hdr_len = match self.mode {
                    RxBufferMode::Single => pkt_len.min(hdr.capacity()),
                    // Defensive clamp: the reported header length is not
                    // trusted past the buffer we actually posted.
                    RxBufferMode::HeaderSplit => usize::from(self.descs[idx].header_len())
                        .min(usize::from(RX_HDR_SIZE))
                        .min(hdr.capacity()),
                };
                let _ = hdr.set_length(hdr_len as u16);
                if self.mode == RxBufferMode::HeaderSplit
                    && pending.is_start()
                    && !eop
                    && hdr_len > 0
                {
                    // First buffer of a chain: defer its unmap to the end
                    // of the packet.
                    pending.held_header = Some(hdr);
                } else {
                    let capacity = hdr.capacity();
                    if let Some(addr) = hdr.take_device_addr() {
                        self.dma.unmap(addr, capacity, DmaDirection::FromDevice);
                    }
                    if hdr_len > 0 {
                        pending.frame.push_fragment(RxFragment::Linear(hdr));
                    }
                    // A zero-length header buffer just drops back to the pool.
                }
            }

            // Payload page half (split mode). The slot keeps its own
            // reference so the page can be flip-recycled once the delivered
            // frame lets go of it.
            if let Some(addr) = self.slots[idx].page_addr.take() {
                self.dma.unmap(addr, HALF_PAGE, DmaDirection::FromDevice);
            }
            if self.mode == RxBufferMode::HeaderSplit && pkt_len > 0 {
                if let Some(page) = self.slots[idx].page.clone() {
                    let offset = self.slots[idx].page_offset;
                    pending.frame.push_fragment(RxFragment::Paged {
                        page,
                        offset,
                        len: pkt_len,
                    });
                }
            }

            let advanced = self.ring.advance(i);
            self.ring.set_next_to_clean(advanced);
            cleaned_since_refill += 1;

            if !eop {
                // Park the packet on the descriptor that continues it.
                let next = if next_index < self.ring.capacity() {
                    next_index
                } else {
                    error!(
                        "RxQueue::harvest(): queue {} continuation index {} out of range",
                        self.id, next_index
                    );
                    advanced
                };
                self.slots[usize::from(next)].pending = Some(pending);
                self.stats.non_eop_descs += 1;
            } else {
                let mut frame = pending.frame;
                if let Some(mut hdr) = pending.held_header {
                    let capacity = hdr.capacity();
                    if let Some(addr) = hdr.take_device_addr() {
                        self.dma.unmap(addr, capacity, DmaDirection::FromDevice);
                    }
                    // The chain's first fragment goes back to the front.
                    frame.total_len += usize::from(hdr.length());
                    frame.frags.insert(0, RxFragment::Linear(hdr));
                }
                frame.checksum = self.checksum_verdict(status, errors);
                frame.vlan_tag = vlan;
                let len = frame.total_len as u64;
                self.delivery.deliver(frame, self.id);
                // Counted only now that delivery succeeded.
                summary.packets += 1;
                summary.bytes += len;
                self.stats.packets += 1;
                self.stats.bytes += len;
            }

            if cleaned_since_refill >= RX_REFILL_BATCH {
                self.refill();
                cleaned_since_refill = 0;
            }
        }

        // Recompute directly rather than trusting a running count.
        if self.ring.free_count() > 0 {
            self.refill();
        }
        summary
    }

    /// Applies the ring's negotiated checksum capability to one write-back.
    fn checksum_verdict(&mut self, status: RxStatus, errors: RxError) -> ChecksumVerdict {
        if !self.csum_caps.enabled {
            return ChecksumVerdict::Unverified;
        }
        if status.contains(RxStatus::IP_CHECKED) && errors.contains(RxError::IP_ERROR) {
            self.stats.hw_csum_rx_error += 1;
            return ChecksumVerdict::Unverified;
        }
        if !status.contains(RxStatus::L4_CHECKED) {
            return ChecksumVerdict::Unverified;
        }
        if errors.contains(RxError::L4_ERROR) {
            if self.csum_caps.zero_udp_quirk && status.contains(RxStatus::UDP_CHECKSUM) {
                // The affected silicon flags zero UDP checksums as errors;
                // hand the packet up unverified instead.
                return ChecksumVerdict::Unverified;
            }
            self.stats.hw_csum_rx_error += 1;
            return ChecksumVerdict::Bad;
        }
        ChecksumVerdict::Good
    }

    /// Unconditionally releases every buffer, abandons any packet still
    /// under construction, and returns the ring to its pristine state.
    /// Used on every down transition; idempotent.
    pub fn drain(&mut self) {
        for idx in 0..self.slots.len() {
            let slot = &mut self.slots[idx];
            if let Some(mut hdr) = slot.header.take() {
                let capacity = hdr.capacity();
                if let Some(addr) = hdr.take_device_addr() {
                    self.dma.unmap(addr, capacity, DmaDirection::FromDevice);
                }
            }
            if let Some(addr) = slot.page_addr.take() {
                self.dma.unmap(addr, HALF_PAGE, DmaDirection::FromDevice);
            }
            slot.page = None;
            slot.page_offset = 0;
            if let Some(pending) = slot.pending.take() {
                debug!(
                    "RxQueue::drain(): queue {} abandoning packet of {} bytes under construction",
                    self.id, pending.frame.total_len
                );
                if let Some(mut hdr) = pending.held_header {
                    let capacity = hdr.capacity();
                    if let Some(addr) = hdr.take_device_addr() {
                        self.dma.unmap(addr, capacity, DmaDirection::FromDevice);
                    }
                }
                // The frame itself drops here, returning its buffers.
            }
            self.descs[idx].clear();
        }
        self.ring.reset();
        self.regs.set_tail(0);
    }
}

impl<S: RxQueueRegisters, D: DmaMapper, F: FrameDelivery> Drop for RxQueue<S, D, F> {
    fn drop(&mut self) {
        self.drain();
        self.dma.unmap_descriptor_ring(self.ring_addr, self.ring_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nic_descriptors::RxWriteBack;
    use nic_hal::NicHardware;
    use nic_mock::{MockDelivery, MockNic};

    fn split_queue(
        capacity: u16,
        pool: RxBufferPool,
        caps: RxChecksumCaps,
    ) -> (
        RxQueue<nic_mock::MockRxQueueRegisters, nic_mock::MockDma, MockDelivery>,
        MockDelivery,
        nic_mock::MockDma,
    ) {
        let mut nic = MockNic::new();
        let regs = nic.rx_queue_registers(QueueId(0)).unwrap();
        let delivery = MockDelivery::new();
        let dma = nic.dma();
        let q = RxQueue::new(
            QueueId(0),
            regs,
            dma.clone(),
            delivery.clone(),
            pool,
            RxBufferMode::HeaderSplit,
            caps,
            capacity,
        )
        .unwrap();
        (q, delivery, dma)
    }

    fn single_queue(
        capacity: u16,
        pool: RxBufferPool,
    ) -> (
        RxQueue<nic_mock::MockRxQueueRegisters, nic_mock::MockDma, MockDelivery>,
        MockDelivery,
        nic_mock::MockDma,
    ) {
        let mut nic = MockNic::new();
        let regs = nic.rx_queue_registers(QueueId(0)).unwrap();
        let delivery = MockDelivery::new();
        let dma = nic.dma();
        let q = RxQueue::new(
            QueueId(0),
            regs,
            dma.clone(),
            delivery.clone(),
            pool,
            RxBufferMode::Single,
            RxChecksumCaps::default(),
            capacity,
        )
        .unwrap();
        (q, delivery, dma)
    }

    #[test]
    fn refill_fills_all_free_slots() {
        let pool = RxBufferPool::new(64, 2048, 0);
        let (mut q, _delivery, _dma) = single_queue(32, pool);
        q.refill();
        assert_eq!(q.free_count(), 0);
        assert_eq!(q.used_count(), 31);
        assert_eq!(q.next_to_use(), 31);
    }

    #[test]
    fn refill_resumes_after_pool_exhaustion() {
        // 15 free slots but only 3 buffers available.
        let pool = RxBufferPool::new(3, 2048, 0);
        let (mut q, delivery, _dma) = single_queue(16, pool);

        q.refill();
        assert_eq!(q.next_to_use(), 3);
        assert_eq!(q.stats.alloc_rx_buff_failed, 1);

        // Complete the packet in slot 0 and hand its frame up; dropping the
        // frame returns the buffer to the pool, simulating memory pressure
        // subsiding.
        q.descriptors_mut()[0].write_back(&RxWriteBack {
            packet_len: 100,
            status: RxStatus::DD | RxStatus::EOP,
            ..Default::default()
        });
        let summary = q.harvest(8);
        assert_eq!(summary.packets, 1);
        drop(delivery.take());

        // The next pass continues from slot 3; slots 1 and 2 keep the
        // buffers they already had.
        q.refill();
        assert_eq!(q.next_to_use(), 4);
    }

    #[test]
    fn single_mode_receive_delivers_frame() {
        let pool = RxBufferPool::new(8, 2048, 0);
        let (mut q, delivery, dma) = single_queue(8, pool);
        q.refill();
        let mapped_when_full = dma.active_mappings();

        q.descriptors_mut()[0].write_back(&RxWriteBack {
            packet_len: 1500,
            status: RxStatus::DD | RxStatus::EOP | RxStatus::IP_CHECKED | RxStatus::L4_CHECKED,
            ..Default::default()
        });
        let summary = q.harvest(16);
        assert_eq!(summary.packets, 1);
        assert_eq!(summary.bytes, 1500);
        assert!(!summary.more_work);

        let frames = delivery.take();
        assert_eq!(frames.len(), 1);
        let (frame, queue) = &frames[0];
        assert_eq!(*queue, QueueId(0));
        assert_eq!(frame.total_len, 1500);
        assert_eq!(frame.checksum, ChecksumVerdict::Good);
        // Slot 0 was re-posted by the refill at the end of harvest, so the
        // mapping count is back where it was.
        assert_eq!(dma.active_mappings(), mapped_when_full);
    }

    #[test]
    fn coalesced_chain_delivers_once_with_total_length() {
        let pool = RxBufferPool::new(32, usize::from(RX_HDR_SIZE), 32);
        let (mut q, delivery, dma) = split_queue(16, pool, RxChecksumCaps::default());
        q.refill();
        let mapped_when_full = dma.active_mappings();

        // A three-descriptor coalesced receive: 1400 + 1400 + 200 payload
        // bytes, no header split on any of them.
        q.descriptors_mut()[0].write_back(&RxWriteBack {
            packet_len: 1400,
            next_index: 1,
            status: RxStatus::DD,
            ..Default::default()
        });
        q.descriptors_mut()[1].write_back(&RxWriteBack {
            packet_len: 1400,
            next_index: 2,
            status: RxStatus::DD,
            ..Default::default()
        });
        q.descriptors_mut()[2].write_back(&RxWriteBack {
            packet_len: 200,
            status: RxStatus::DD | RxStatus::EOP | RxStatus::IP_CHECKED | RxStatus::L4_CHECKED,
            ..Default::default()
        });

        let summary = q.harvest(16);
        assert_eq!(summary.packets, 1);
        assert_eq!(summary.bytes, 3000);
        assert_eq!(q.stats.non_eop_descs, 2);

        let frames = delivery.take();
        assert_eq!(frames.len(), 1);
        let (frame, _) = &frames[0];
        assert_eq!(frame.total_len, 3000);
        assert_eq!(frame.frags.len(), 3);
        for frag in &frame.frags {
            assert!(matches!(frag, RxFragment::Paged { .. }));
        }
        // All header buffers were unmapped without being delivered, and the
        // harvested slots were re-posted by the closing refill.
        assert_eq!(dma.active_mappings(), mapped_when_full);
        assert_eq!(dma.double_unmaps(), 0);
    }

    #[test]
    fn split_header_and_payload_both_attach() {
        let pool = RxBufferPool::new(16, usize::from(RX_HDR_SIZE), 16);
        let (mut q, delivery, _dma) = split_queue(16, pool, RxChecksumCaps::default());
        q.refill();

        q.descriptors_mut()[0].write_back(&RxWriteBack {
            packet_len: 1400,
            header_len: 54,
            split_header: true,
            status: RxStatus::DD | RxStatus::EOP | RxStatus::IP_CHECKED | RxStatus::L4_CHECKED,
            ..Default::default()
        });
        let summary = q.harvest(16);
        assert_eq!(summary.packets, 1);
        assert_eq!(summary.bytes, 1454);

        let frames = delivery.take();
        let (frame, _) = &frames[0];
        assert_eq!(frame.frags.len(), 2);
        assert!(matches!(&frame.frags[0], RxFragment::Linear(b) if b.length() == 54));
        assert!(matches!(
            &frame.frags[1],
            RxFragment::Paged { len: 1400, .. }
        ));
    }

    #[test]
    fn malformed_header_length_is_clamped() {
        let pool = RxBufferPool::new(16, usize::from(RX_HDR_SIZE), 16);
        let (mut q, delivery, _dma) = split_queue(16, pool, RxChecksumCaps::default());
        q.refill();

        q.descriptors_mut()[0].write_back(&RxWriteBack {
            packet_len: 0,
            header_len: 1023,
            split_header: true,
            status: RxStatus::DD | RxStatus::EOP,
            ..Default::default()
        });
        let summary = q.harvest(16);
        assert_eq!(summary.packets, 1);
        assert_eq!(summary.bytes, u64::from(RX_HDR_SIZE));
        let frames = delivery.take();
        assert_eq!(frames[0].0.total_len, usize::from(RX_HDR_SIZE));
    }

    #[test]
    fn checksum_verdicts() {
        let pool = RxBufferPool::new(32, usize::from(RX_HDR_SIZE), 32);
        let (mut q, delivery, _dma) = split_queue(
            32,
            pool,
            RxChecksumCaps {
                enabled: true,
                zero_udp_quirk: true,
            },
        );
        q.refill();

        // Good TCP checksum.
        q.descriptors_mut()[0].write_back(&RxWriteBack {
            packet_len: 100,
            status: RxStatus::DD | RxStatus::EOP | RxStatus::IP_CHECKED | RxStatus::L4_CHECKED,
            ..Default::default()
        });
        // Genuine L4 error.
        q.descriptors_mut()[1].write_back(&RxWriteBack {
            packet_len: 100,
            status: RxStatus::DD | RxStatus::EOP | RxStatus::L4_CHECKED,
            error: RxError::L4_ERROR,
            ..Default::default()
        });
        // The zero-UDP false positive: suppressed by the quirk.
        q.descriptors_mut()[2].write_back(&RxWriteBack {
            packet_len: 100,
            status: RxStatus::DD
                | RxStatus::EOP
                | RxStatus::L4_CHECKED
                | RxStatus::UDP_CHECKSUM,
            error: RxError::L4_ERROR,
            ..Default::default()
        });
        // Checksum not covered at all.
        q.descriptors_mut()[3].write_back(&RxWriteBack {
            packet_len: 100,
            status: RxStatus::DD | RxStatus::EOP,
            ..Default::default()
        });

        q.harvest(16);
        let frames = delivery.take();
        assert_eq!(frames[0].0.checksum, ChecksumVerdict::Good);
        assert_eq!(frames[1].0.checksum, ChecksumVerdict::Bad);
        assert_eq!(frames[2].0.checksum, ChecksumVerdict::Unverified);
        assert_eq!(frames[3].0.checksum, ChecksumVerdict::Unverified);
        assert_eq!(q.stats.hw_csum_rx_error, 1);
    }

    #[test]
    fn budget_bounds_one_pass_fairly() {
        let pool = RxBufferPool::new(64, 2048, 0);
        let (mut q, delivery, _dma) = single_queue(64, pool);
        q.refill();
        for i in 0..10 {
            q.descriptors_mut()[i].write_back(&RxWriteBack {
                packet_len: 64,
                status: RxStatus::DD | RxStatus::EOP,
                ..Default::default()
            });
        }
        let summary = q.harvest(4);
        assert_eq!(summary.packets, 4);
        assert!(summary.more_work);
        let summary = q.harvest(4);
        assert_eq!(summary.packets, 4);
        assert!(summary.more_work);
        let summary = q.harvest(4);
        assert_eq!(summary.packets, 2);
        assert!(!summary.more_work);
        assert_eq!(delivery.take().len(), 10);
    }

    #[test]
    fn drain_abandons_in_progress_chain() {
        let pool = RxBufferPool::new(16, usize::from(RX_HDR_SIZE), 16);
        let (mut q, delivery, dma) = split_queue(16, pool, RxChecksumCaps::default());
        q.refill();

        // Start a chain but never finish it.
        q.descriptors_mut()[0].write_back(&RxWriteBack {
            packet_len: 1400,
            next_index: 1,
            status: RxStatus::DD,
            ..Default::default()
        });
        let summary = q.harvest(16);
        assert_eq!(summary.packets, 0);
        assert_eq!(q.stats.non_eop_descs, 1);

        q.drain();
        // Nothing was delivered and no mapping is left outstanding.
        assert_eq!(delivery.take().len(), 0);
        assert_eq!(dma.active_mappings(), 0);
        assert_eq!(q.used_count(), 0);
        assert_eq!(q.next_to_use(), 0);
        q.drain();
        assert_eq!(q.used_count(), 0);
    }
}
