//! Typed views of the device registers the engine manipulates.
//!
//! The engine never computes register offsets; it calls these semantic
//! methods and the platform's implementation translates them into 32-bit
//! reads and writes of the right offsets (usually via [`RegisterAccess`]).
//! One `RxQueueRegisters`/`TxQueueRegisters` object exists per queue and is
//! owned by that queue, so queue register writes need no extra locking.

use crate::{DeviceAddress, QueueId, VectorId};

/// Raw 32-bit access to a memory-mapped register block.
///
/// This is the lowest layer: platform implementations of the typed traits
/// below are expected to be thin facades over one of these. `flush` is a read
/// whose only purpose is to force completion of prior posted writes.
pub trait RegisterAccess {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&mut self, offset: usize, value: u32);
    fn flush(&self);
}

/// The per-queue registers of one receive queue.
pub trait RxQueueRegisters {
    /// Programs the device-visible base address of the descriptor ring.
    fn set_descriptor_base(&mut self, base: DeviceAddress);

    /// Programs the ring length as a descriptor count; the implementation
    /// converts to whatever unit the silicon wants (usually bytes).
    fn set_descriptor_count(&mut self, count: u16);

    /// Reads the hardware's current head (fetch) position.
    fn head(&self) -> u32;

    fn tail(&self) -> u32;

    /// Publishes new descriptors to the hardware. The caller must issue a
    /// release fence first so descriptor contents are visible before the
    /// tail moves.
    fn set_tail(&mut self, val: u32);

    fn set_enabled(&mut self, enabled: bool);

    /// Whether the enable bit has actually latched; the silicon takes a
    /// moment after `set_enabled`.
    fn is_enabled(&self) -> bool;
}

/// The per-queue registers of one transmit queue. Identical in shape to
/// [`RxQueueRegisters`]; kept separate because implementations map them to
/// entirely different register banks and the type distinction keeps a TX
/// queue from ever being handed RX registers.
pub trait TxQueueRegisters {
    fn set_descriptor_base(&mut self, base: DeviceAddress);
    fn set_descriptor_count(&mut self, count: u16);
    fn head(&self) -> u32;
    fn tail(&self) -> u32;
    fn set_tail(&mut self, val: u32);
    fn set_enabled(&mut self, enabled: bool);
    fn is_enabled(&self) -> bool;
}

/// One interrupt-throttle programming, produced by the adaptive throttle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ThrottleWrite {
    /// Maximum interrupts per second for the vector; 0 means unmoderated
    /// (the throttle only emits 0 when the configuration allows it).
    pub rate: u32,
    /// One silicon generation latches a new rate reliably only when the
    /// value is written into both 16-bit halves of its wider register; the
    /// implementation must honor this flag by mirroring the value.
    pub mirror_halves: bool,
}

/// The device-wide interrupt control registers.
pub trait InterruptRegisters {
    fn set_throttle(&mut self, vector: VectorId, write: ThrottleWrite);

    /// Re-arms (unmasks) one vector after its poll pass went idle.
    fn enable_vector(&mut self, vector: VectorId);

    /// Fires one vector from software, used to guarantee another completion
    /// pass when a work limit was exhausted or the watchdog suspects a stuck
    /// queue.
    fn trigger_vector(&mut self, vector: VectorId);

    /// Masks every interrupt source; part of taking the device down.
    fn disable_all(&mut self);

    /// Routes completions of one receive queue to the given vector.
    fn map_rx_queue(&mut self, queue: QueueId, vector: VectorId);

    /// Routes completions of one transmit queue to the given vector.
    fn map_tx_queue(&mut self, queue: QueueId, vector: VectorId);

    /// Forces completion of prior posted register writes.
    fn flush(&self);
}
