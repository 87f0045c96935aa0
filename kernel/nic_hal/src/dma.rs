//! The DMA mapping service the engine uses to make buffers device-visible.
//!
//! Modeled on the streaming map/unmap discipline: a buffer is mapped for the
//! duration of one hardware lease and unmapped when software reclaims it.
//! Mapping can fail under memory pressure; the engines absorb that into
//! statistics and retry rather than treating it as fatal.

use crate::DeviceAddress;

/// Which way the hardware moves data for a given mapping.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DmaDirection {
    /// Transmit: the device reads from the buffer.
    ToDevice,
    /// Receive: the device writes into the buffer.
    FromDevice,
}

/// Why a mapping request failed. The distinction only matters for statistics;
/// both are transient and retried on the next cycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DmaError {
    /// The platform could not create a device mapping for this buffer.
    MappingFailed,
    /// The platform's mapping resources (IOVA space, bounce buffers) ran out.
    Exhausted,
}

/// Maps host buffers in and out of the device's address space.
///
/// Handles are cheap clones of one underlying service; every queue keeps its
/// own. `unmap` takes the values `map_*` returned — implementations may use
/// the (address, length, direction) triple to find their bookkeeping, so the
/// caller must pass back exactly what it was given.
pub trait DmaMapper: Clone {
    /// Maps one contiguous linear buffer.
    fn map_single(&self, buf: &[u8], dir: DmaDirection) -> Result<DeviceAddress, DmaError>;

    /// Maps a `len`-byte window at `offset` inside a shared payload page.
    fn map_page(
        &self,
        page: &[u8],
        offset: usize,
        len: usize,
        dir: DmaDirection,
    ) -> Result<DeviceAddress, DmaError>;

    /// Releases a mapping created by [`map_single`](Self::map_single) or
    /// [`map_page`](Self::map_page).
    fn unmap(&self, addr: DeviceAddress, len: usize, dir: DmaDirection);

    /// Maps a descriptor ring's backing memory for the lifetime of the ring.
    /// `base` is the ring's starting virtual address as an integer; the ring
    /// allocation guarantees it stays put until `unmap_descriptor_ring`.
    fn map_descriptor_ring(&self, base: usize, len: usize) -> Result<DeviceAddress, DmaError>;

    fn unmap_descriptor_ring(&self, addr: DeviceAddress, len: usize);
}
