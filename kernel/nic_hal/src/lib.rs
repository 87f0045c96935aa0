//! The boundary between the portable packet engine and the platform it runs on.
//!
//! Everything the engine needs from the outside world is expressed as a trait
//! in this crate: typed views of the device's queue and interrupt registers,
//! the DMA mapping service, a coarse monotonic clock, and link/flow-control
//! queries. A platform (or a software mock) implements [`NicHardware`] to
//! supply concrete versions of all of them; the engine crates are generic
//! over that implementation and never touch memory-mapped hardware directly.

#![no_std]

pub mod dma;
pub mod regs;

pub use dma::{DmaDirection, DmaError, DmaMapper};
pub use regs::{
    InterruptRegisters, RegisterAccess, RxQueueRegisters, ThrottleWrite, TxQueueRegisters,
};

use core::fmt;

/// An address in the device's view of memory, i.e. what gets written into a
/// descriptor or a descriptor-base register. Produced only by a [`DmaMapper`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceAddress(pub u64);

impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DeviceAddress({:#X})", self.0)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#X}", self.0)
    }
}

/// The logical index of one hardware queue (TX and RX queues are numbered
/// independently, each starting from 0).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct QueueId(pub u16);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The index of one interrupt vector granted to the device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VectorId(pub u16);

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A count of coarse clock ticks from a [`Clock`]. Only differences are
/// meaningful; all arithmetic saturates so a stale or zero timestamp can
/// never wrap into a plausible one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Ticks(pub u64);

impl Ticks {
    pub fn saturating_add(self, other: Ticks) -> Ticks {
        Ticks(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Ticks) -> Ticks {
        Ticks(self.0.saturating_sub(other.0))
    }
}

/// A coarse monotonic time source, used only for transmit-hang timestamps.
/// The data path never reads it more than once per reclaimed packet.
pub trait Clock: Clone {
    fn now(&self) -> Ticks;

    /// How many [`Ticks`] make up one second, so timeouts can be configured
    /// in seconds regardless of the platform's tick length.
    fn ticks_per_second(&self) -> u64;
}

/// A snapshot of the device's link state, reported by the platform's PHY/MAC
/// management code (out of scope here) and consumed by the watchdog.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LinkStatus {
    pub up: bool,
    pub speed_mbps: u32,
    pub flow_control_rx: bool,
    pub flow_control_tx: bool,
}

impl LinkStatus {
    pub const DOWN: LinkStatus = LinkStatus {
        up: false,
        speed_mbps: 0,
        flow_control_rx: false,
        flow_control_tx: false,
    };
}

/// The factory trait a platform implements to hand the engine its hardware.
///
/// Register objects are constructed once per queue at bring-up and owned by
/// that queue from then on; the DMA and clock handles are cheap clones shared
/// across queues. Interrupt-vector negotiation also lives here because it is
/// a platform capability (MSI-X table size, OS vector availability), not an
/// engine policy.
pub trait NicHardware {
    type RxRegs: RxQueueRegisters;
    type TxRegs: TxQueueRegisters;
    type Interrupts: InterruptRegisters;
    type Dma: DmaMapper;
    type Clock: Clock;

    /// Returns the register bank for the given receive queue.
    /// Fails if the queue index exceeds what the device exposes.
    fn rx_queue_registers(&mut self, queue: QueueId) -> Result<Self::RxRegs, &'static str>;

    /// Returns the register bank for the given transmit queue.
    fn tx_queue_registers(&mut self, queue: QueueId) -> Result<Self::TxRegs, &'static str>;

    /// Returns the device-wide interrupt register bank.
    fn interrupt_registers(&mut self) -> Result<Self::Interrupts, &'static str>;

    fn dma(&self) -> Self::Dma;

    fn clock(&self) -> Self::Clock;

    /// Requests `count` message-signaled interrupt vectors.
    /// `Err(n)` reports that only `n` vectors are available (possibly 0);
    /// the caller is expected to retry with the smaller count.
    fn enable_msix(&mut self, count: usize) -> Result<(), usize>;

    /// Falls back to a single shared interrupt line (MSI or legacy).
    fn enable_single_interrupt(&mut self) -> Result<(), &'static str>;

    /// The most vectors this device can ever use, regardless of what the
    /// platform would grant.
    fn max_interrupt_vectors(&self) -> usize;

    /// How many CPU contexts can usefully service distinct vectors; there is
    /// no point requesting more vectors than this.
    fn usable_cpus(&self) -> usize;

    fn check_link(&self) -> LinkStatus;

    /// Whether transmission on the given queue's traffic class is currently
    /// paused by received flow control. Consulted only by the hang detector:
    /// a paused queue is allowed to sit on unfinished work indefinitely.
    fn is_transmit_paused(&self, queue: QueueId) -> bool;
}
