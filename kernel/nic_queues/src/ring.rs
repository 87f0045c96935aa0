//! Index bookkeeping for one descriptor ring.
//!
//! A ring is a power-of-two circular array of descriptor slots with two
//! cursors: `next_to_clean` points at the oldest slot the hardware still
//! owns, `next_to_use` at the next slot software will hand over. The slots
//! in `[next_to_clean, next_to_use)` (modulo capacity) are in flight; one
//! slot is always kept empty so a full ring and an empty ring are
//! distinguishable from the cursors alone.

/// Cursor arithmetic for one ring. The descriptor and shadow arrays live in
/// the owning queue; this type only tracks the two indices.
#[derive(Debug)]
pub struct Ring {
    capacity: u16,
    next_to_clean: u16,
    next_to_use: u16,
}

impl Ring {
    /// Creates a ring of `capacity` slots, which must be a power of two.
    pub fn new(capacity: u16) -> Result<Ring, &'static str> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err("Ring::new(): capacity must be a power of two >= 2");
        }
        Ok(Ring {
            capacity,
            next_to_clean: 0,
            next_to_use: 0,
        })
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Increments an index modulo the ring capacity.
    pub fn advance(&self, index: u16) -> u16 {
        (index + 1) & (self.capacity - 1)
    }

    /// How many slots are currently in flight (owned by hardware).
    pub fn used_count(&self) -> u16 {
        self.next_to_use.wrapping_sub(self.next_to_clean) & (self.capacity - 1)
    }

    /// How many slots software may still fill. One slot is always reserved,
    /// so this never exceeds `capacity - 1`.
    pub fn free_count(&self) -> u16 {
        self.capacity - 1 - self.used_count()
    }

    pub fn next_to_clean(&self) -> u16 {
        self.next_to_clean
    }

    pub fn next_to_use(&self) -> u16 {
        self.next_to_use
    }

    pub fn set_next_to_clean(&mut self, index: u16) {
        debug_assert!(index < self.capacity);
        self.next_to_clean = index;
    }

    pub fn set_next_to_use(&mut self, index: u16) {
        debug_assert!(index < self.capacity);
        self.next_to_use = index;
    }

    /// Returns both cursors to 0. The owning queue is responsible for
    /// releasing any in-flight buffers first; on a ring with nothing in
    /// flight this is a no-op apart from renormalizing the cursors.
    pub fn reset(&mut self) {
        self.next_to_clean = 0;
        self.next_to_use = 0;
    }
}
