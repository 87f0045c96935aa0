//! A software NIC for exercising the packet engine without hardware.
//!
//! The engine only ever talks to traits from `nic_hal`; this crate provides
//! a second implementation of all of them next to the real platform's: a
//! word-array register file with typed facades over it, a DMA mapper that
//! records every mapping and can inject failures, a manually-advanced
//! clock, and a delivery sink that collects frames for inspection. Tests
//! drive the hardware side by writing descriptor write-backs directly into
//! a queue's descriptor array.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use nic_buffers::{FrameDelivery, ReceivedFrame};
use nic_hal::{
    Clock, DeviceAddress, DmaDirection, DmaError, DmaMapper, InterruptRegisters, LinkStatus,
    NicHardware, QueueId, RegisterAccess, RxQueueRegisters, ThrottleWrite, Ticks, TxQueueRegisters,
    VectorId,
};
use spin::Mutex;

// Register layout of the mock device. Byte offsets.
const RX_QUEUE_BASE: usize = 0x1000;
const TX_QUEUE_BASE: usize = 0x6000;
const QUEUE_STRIDE: usize = 0x40;
const REG_BASE_LO: usize = 0x00;
const REG_BASE_HI: usize = 0x04;
const REG_LEN: usize = 0x08;
const REG_HEAD: usize = 0x0C;
const REG_TAIL: usize = 0x10;
const REG_CTRL: usize = 0x14;
const CTRL_ENABLE: u32 = 1 << 0;
const THROTTLE_BASE: usize = 0x8000;
const REGISTER_FILE_BYTES: usize = 0x9000;
const MAX_MOCK_QUEUES: u16 = 64;

/// The mock's register block: a flat word array behind [`RegisterAccess`].
#[derive(Clone)]
pub struct MockRegisterFile {
    words: Arc<Mutex<Vec<u32>>>,
}

impl MockRegisterFile {
    fn new() -> MockRegisterFile {
        MockRegisterFile {
            words: Arc::new(Mutex::new(vec![0u32; REGISTER_FILE_BYTES / 4])),
        }
    }
}

impl RegisterAccess for MockRegisterFile {
    fn read32(&self, offset: usize) -> u32 {
        self.words.lock()[offset / 4]
    }

    fn write32(&mut self, offset: usize, value: u32) {
        self.words.lock()[offset / 4] = value;
    }

    fn flush(&self) {}
}

/// Typed facade over one receive queue's register bank.
pub struct MockRxQueueRegisters {
    file: MockRegisterFile,
    base: usize,
}

impl RxQueueRegisters for MockRxQueueRegisters {
    fn set_descriptor_base(&mut self, base: DeviceAddress) {
        self.file.write32(self.base + REG_BASE_LO, base.0 as u32);
        self.file
            .write32(self.base + REG_BASE_HI, (base.0 >> 32) as u32);
    }

    fn set_descriptor_count(&mut self, count: u16) {
        self.file.write32(self.base + REG_LEN, u32::from(count));
    }

    fn head(&self) -> u32 {
        self.file.read32(self.base + REG_HEAD)
    }

    fn tail(&self) -> u32 {
        self.file.read32(self.base + REG_TAIL)
    }

    fn set_tail(&mut self, val: u32) {
        self.file.write32(self.base + REG_TAIL, val);
    }

    fn set_enabled(&mut self, enabled: bool) {
        // The mock latches immediately; real silicon takes a moment.
        let val = if enabled { CTRL_ENABLE } else { 0 };
        self.file.write32(self.base + REG_CTRL, val);
    }

    fn is_enabled(&self) -> bool {
        self.file.read32(self.base + REG_CTRL) & CTRL_ENABLE != 0
    }
}

/// Typed facade over one transmit queue's register bank.
pub struct MockTxQueueRegisters {
    file: MockRegisterFile,
    base: usize,
}

impl TxQueueRegisters for MockTxQueueRegisters {
    fn set_descriptor_base(&mut self, base: DeviceAddress) {
        self.file.write32(self.base + REG_BASE_LO, base.0 as u32);
        self.file
            .write32(self.base + REG_BASE_HI, (base.0 >> 32) as u32);
    }

    fn set_descriptor_count(&mut self, count: u16) {
        self.file.write32(self.base + REG_LEN, u32::from(count));
    }

    fn head(&self) -> u32 {
        self.file.read32(self.base + REG_HEAD)
    }

    fn tail(&self) -> u32 {
        self.file.read32(self.base + REG_TAIL)
    }

    fn set_tail(&mut self, val: u32) {
        self.file.write32(self.base + REG_TAIL, val);
    }

    fn set_enabled(&mut self, enabled: bool) {
        let val = if enabled { CTRL_ENABLE } else { 0 };
        self.file.write32(self.base + REG_CTRL, val);
    }

    fn is_enabled(&self) -> bool {
        self.file.read32(self.base + REG_CTRL) & CTRL_ENABLE != 0
    }
}

/// Everything the interrupt register mock has been asked to do, in order.
#[derive(Default)]
pub struct InterruptEvents {
    pub throttle_writes: Vec<(VectorId, ThrottleWrite)>,
    pub enabled: Vec<VectorId>,
    pub triggered: Vec<VectorId>,
    pub disable_all_count: u32,
    pub rx_map: Vec<(QueueId, VectorId)>,
    pub tx_map: Vec<(QueueId, VectorId)>,
}

/// Interrupt register mock: throttle values land in the register file,
/// everything is also recorded as an event for assertions.
pub struct MockInterruptRegisters {
    file: MockRegisterFile,
    events: Arc<Mutex<InterruptEvents>>,
}

impl InterruptRegisters for MockInterruptRegisters {
    fn set_throttle(&mut self, vector: VectorId, write: ThrottleWrite) {
        self.file
            .write32(THROTTLE_BASE + usize::from(vector.0) * 4, write.rate);
        self.events.lock().throttle_writes.push((vector, write));
    }

    fn enable_vector(&mut self, vector: VectorId) {
        self.events.lock().enabled.push(vector);
    }

    fn trigger_vector(&mut self, vector: VectorId) {
        self.events.lock().triggered.push(vector);
    }

    fn disable_all(&mut self) {
        self.events.lock().disable_all_count += 1;
    }

    fn map_rx_queue(&mut self, queue: QueueId, vector: VectorId) {
        self.events.lock().rx_map.push((queue, vector));
    }

    fn map_tx_queue(&mut self, queue: QueueId, vector: VectorId) {
        self.events.lock().tx_map.push((queue, vector));
    }

    fn flush(&self) {}
}

#[derive(Default)]
struct DmaState {
    next_addr: u64,
    /// Outstanding buffer mappings, by device address.
    active: BTreeMap<u64, usize>,
    /// Outstanding descriptor-ring mappings.
    rings: BTreeMap<u64, usize>,
    total_maps: u64,
    double_unmaps: u64,
    /// Successful mappings to allow before failures start.
    fail_skip: usize,
    /// Mapping attempts to fail once `fail_skip` runs out.
    fail_count: usize,
}

/// A DMA mapper that hands out unique device addresses and records every
/// outstanding mapping, so tests can assert that maps and unmaps balance.
/// Failure injection covers buffer mappings only, not ring mappings.
#[derive(Clone)]
pub struct MockDma {
    state: Arc<Mutex<DmaState>>,
}

impl MockDma {
    fn new() -> MockDma {
        MockDma {
            state: Arc::new(Mutex::new(DmaState {
                next_addr: 0x1_0000,
                ..Default::default()
            })),
        }
    }

    /// After `skip` more successful buffer mappings, fail the next `count`
    /// attempts, then recover.
    pub fn fail_after(&self, skip: usize, count: usize) {
        let mut state = self.state.lock();
        state.fail_skip = skip;
        state.fail_count = count;
    }

    /// How many buffer mappings are currently outstanding.
    pub fn active_mappings(&self) -> usize {
        self.state.lock().active.len()
    }

    /// How many descriptor-ring mappings are currently outstanding.
    pub fn ring_mappings(&self) -> usize {
        self.state.lock().rings.len()
    }

    pub fn total_maps(&self) -> u64 {
        self.state.lock().total_maps
    }

    /// Unmaps of addresses that were not mapped (or already unmapped).
    pub fn double_unmaps(&self) -> u64 {
        self.state.lock().double_unmaps
    }

    fn map_buffer(&self, len: usize) -> Result<DeviceAddress, DmaError> {
        let mut state = self.state.lock();
        if state.fail_skip > 0 {
            state.fail_skip -= 1;
        } else if state.fail_count > 0 {
            state.fail_count -= 1;
            return Err(DmaError::MappingFailed);
        }
        let addr = state.next_addr;
        state.next_addr += 0x1_0000;
        state.active.insert(addr, len);
        state.total_maps += 1;
        Ok(DeviceAddress(addr))
    }
}

impl DmaMapper for MockDma {
    fn map_single(&self, buf: &[u8], _dir: DmaDirection) -> Result<DeviceAddress, DmaError> {
        self.map_buffer(buf.len())
    }

    fn map_page(
        &self,
        _page: &[u8],
        _offset: usize,
        len: usize,
        _dir: DmaDirection,
    ) -> Result<DeviceAddress, DmaError> {
        self.map_buffer(len)
    }

    fn unmap(&self, addr: DeviceAddress, _len: usize, _dir: DmaDirection) {
        let mut state = self.state.lock();
        if state.active.remove(&addr.0).is_none() {
            state.double_unmaps += 1;
        }
    }

    fn map_descriptor_ring(&self, _base: usize, len: usize) -> Result<DeviceAddress, DmaError> {
        let mut state = self.state.lock();
        let addr = state.next_addr;
        state.next_addr += 0x10_0000;
        state.rings.insert(addr, len);
        Ok(DeviceAddress(addr))
    }

    fn unmap_descriptor_ring(&self, addr: DeviceAddress, _len: usize) {
        let mut state = self.state.lock();
        if state.rings.remove(&addr.0).is_none() {
            state.double_unmaps += 1;
        }
    }
}

/// A manually-advanced clock.
#[derive(Clone)]
pub struct MockClock {
    ticks: Arc<AtomicU64>,
    per_second: u64,
}

impl MockClock {
    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> Ticks {
        Ticks(self.ticks.load(Ordering::SeqCst))
    }

    fn ticks_per_second(&self) -> u64 {
        self.per_second
    }
}

/// A delivery sink that collects every frame handed upward.
#[derive(Clone)]
pub struct MockDelivery {
    frames: Arc<Mutex<Vec<(ReceivedFrame, QueueId)>>>,
}

impl MockDelivery {
    pub fn new() -> MockDelivery {
        MockDelivery {
            frames: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn delivered(&self) -> usize {
        self.frames.lock().len()
    }

    /// Takes every collected frame, releasing their buffers when dropped.
    pub fn take(&self) -> Vec<(ReceivedFrame, QueueId)> {
        core::mem::take(&mut *self.frames.lock())
    }
}

impl Default for MockDelivery {
    fn default() -> MockDelivery {
        MockDelivery::new()
    }
}

impl FrameDelivery for MockDelivery {
    fn deliver(&mut self, frame: ReceivedFrame, queue: QueueId) {
        self.frames.lock().push((frame, queue));
    }
}

struct MockState {
    msix_available: usize,
    msix_enabled: Option<usize>,
    single_line: bool,
    max_vectors: usize,
    usable_cpus: usize,
    link: LinkStatus,
    paused_tx_queues: BTreeSet<u16>,
}

/// The mock device: hands out register facades, shares one DMA mapper and
/// clock, and scripts the platform capabilities (MSI-X grant, link state,
/// flow-control pause) that the engine negotiates against.
pub struct MockNic {
    file: MockRegisterFile,
    events: Arc<Mutex<InterruptEvents>>,
    dma: MockDma,
    clock: MockClock,
    state: Arc<Mutex<MockState>>,
}

impl MockNic {
    pub fn new() -> MockNic {
        MockNic {
            file: MockRegisterFile::new(),
            events: Arc::new(Mutex::new(InterruptEvents::default())),
            dma: MockDma::new(),
            clock: MockClock {
                ticks: Arc::new(AtomicU64::new(0)),
                per_second: 1000,
            },
            state: Arc::new(Mutex::new(MockState {
                msix_available: 64,
                msix_enabled: None,
                single_line: false,
                max_vectors: 64,
                usable_cpus: 4,
                link: LinkStatus {
                    up: true,
                    speed_mbps: 10_000,
                    flow_control_rx: false,
                    flow_control_tx: false,
                },
                paused_tx_queues: BTreeSet::new(),
            })),
        }
    }

    /// Scripts how many MSI-X vectors the platform will grant.
    pub fn set_msix_available(&self, count: usize) {
        self.state.lock().msix_available = count;
    }

    pub fn set_max_vectors(&self, count: usize) {
        self.state.lock().max_vectors = count;
    }

    pub fn set_usable_cpus(&self, count: usize) {
        self.state.lock().usable_cpus = count;
    }

    pub fn set_link(&self, link: LinkStatus) {
        self.state.lock().link = link;
    }

    pub fn set_transmit_paused(&self, queue: QueueId, paused: bool) {
        let mut state = self.state.lock();
        if paused {
            state.paused_tx_queues.insert(queue.0);
        } else {
            state.paused_tx_queues.remove(&queue.0);
        }
    }

    /// How many vectors were actually enabled, if MSI-X negotiation ran.
    pub fn msix_enabled(&self) -> Option<usize> {
        self.state.lock().msix_enabled
    }

    pub fn single_line_enabled(&self) -> bool {
        self.state.lock().single_line
    }

    /// The interrupt event log, shared with every
    /// [`MockInterruptRegisters`] this device handed out.
    pub fn interrupt_events(&self) -> Arc<Mutex<InterruptEvents>> {
        self.events.clone()
    }

    pub fn register_file(&self) -> MockRegisterFile {
        self.file.clone()
    }
}

impl Default for MockNic {
    fn default() -> MockNic {
        MockNic::new()
    }
}

impl NicHardware for MockNic {
    type RxRegs = MockRxQueueRegisters;
    type TxRegs = MockTxQueueRegisters;
    type Interrupts = MockInterruptRegisters;
    type Dma = MockDma;
    type Clock = MockClock;

    fn rx_queue_registers(&mut self, queue: QueueId) -> Result<MockRxQueueRegisters, &'static str> {
        if queue.0 >= MAX_MOCK_QUEUES {
            return Err("MockNic: rx queue index out of range");
        }
        Ok(MockRxQueueRegisters {
            file: self.file.clone(),
            base: RX_QUEUE_BASE + usize::from(queue.0) * QUEUE_STRIDE,
        })
    }

    fn tx_queue_registers(&mut self, queue: QueueId) -> Result<MockTxQueueRegisters, &'static str> {
        if queue.0 >= MAX_MOCK_QUEUES {
            return Err("MockNic: tx queue index out of range");
        }
        Ok(MockTxQueueRegisters {
            file: self.file.clone(),
            base: TX_QUEUE_BASE + usize::from(queue.0) * QUEUE_STRIDE,
        })
    }

    fn interrupt_registers(&mut self) -> Result<MockInterruptRegisters, &'static str> {
        Ok(MockInterruptRegisters {
            file: self.file.clone(),
            events: self.events.clone(),
        })
    }

    fn dma(&self) -> MockDma {
        self.dma.clone()
    }

    fn clock(&self) -> MockClock {
        self.clock.clone()
    }

    fn enable_msix(&mut self, count: usize) -> Result<(), usize> {
        let mut state = self.state.lock();
        if count <= state.msix_available {
            state.msix_enabled = Some(count);
            Ok(())
        } else {
            Err(state.msix_available)
        }
    }

    fn enable_single_interrupt(&mut self) -> Result<(), &'static str> {
        self.state.lock().single_line = true;
        Ok(())
    }

    fn max_interrupt_vectors(&self) -> usize {
        self.state.lock().max_vectors
    }

    fn usable_cpus(&self) -> usize {
        self.state.lock().usable_cpus
    }

    fn check_link(&self) -> LinkStatus {
        self.state.lock().link
    }

    fn is_transmit_paused(&self, queue: QueueId) -> bool {
        self.state.lock().paused_tx_queues.contains(&queue.0)
    }
}
