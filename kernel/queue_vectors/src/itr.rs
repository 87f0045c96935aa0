//! Per-vector adaptive interrupt throttling.
//!
//! Each vector remembers a latency range per traffic direction and reclassifies
//! it after every idle poll pass from the bytes moved since the last interrupt.
//! The combined range picks a target interrupt rate, which is smoothed before
//! it is programmed, so one outlier interval cannot slam the rate around.

use nic_hal::ThrottleWrite;

/// Interrupt rate (ints/sec) for traffic that wants minimum latency.
pub const ITR_RATE_LOWEST: u32 = 100_000;
/// Interrupt rate for moderate traffic.
pub const ITR_RATE_LOW: u32 = 20_000;
/// Interrupt rate for bulk throughput traffic.
pub const ITR_RATE_BULK: u32 = 8_000;

/// Below this many bytes per microsecond the interval counts as lowest-latency
/// traffic.
pub const ITR_BYTES_PER_USEC_LOW: u64 = 10;
/// Above this many bytes per microsecond the interval counts as bulk traffic.
pub const ITR_BYTES_PER_USEC_HIGH: u64 = 20;

/// Default starting rate for vectors that service receive queues.
pub const ITR_DEFAULT_RX_RATE: u32 = 20_000;
/// Default starting rate for transmit-only vectors.
pub const ITR_DEFAULT_TX_RATE: u32 = 10_000;

/// Substitute rate when a zero (unmoderated) rate cannot be programmed:
/// receive-side coalescing needs a nonzero interval to merge across, and one
/// silicon generation misbehaves at zero outright.
pub const MIN_MODERATED_RATE: u32 = 956;

/// The classification of one direction's recent traffic. Ordered by
/// throughput, so the combined state of a vector is the `max` of its two
/// directions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum LatencyRange {
    /// Little data per interval; interrupt often to keep latency down.
    Lowest,
    Low,
    /// Heavy data per interval; interrupt rarely to keep CPU cost down.
    Bulk,
}

impl LatencyRange {
    pub fn rate(self) -> u32 {
        match self {
            LatencyRange::Lowest => ITR_RATE_LOWEST,
            LatencyRange::Low => ITR_RATE_LOW,
            LatencyRange::Bulk => ITR_RATE_BULK,
        }
    }

    fn step_down(self) -> LatencyRange {
        match self {
            LatencyRange::Bulk => LatencyRange::Low,
            _ => LatencyRange::Lowest,
        }
    }
}

/// The traffic one direction of a vector moved since its last interrupt.
#[derive(Clone, Copy, Default, Debug)]
pub struct ItrSample {
    pub bytes: u64,
    pub packets: u64,
}

impl ItrSample {
    pub fn record(&mut self, bytes: u64, packets: u64) {
        self.bytes += bytes;
        self.packets += packets;
    }

    pub fn clear(&mut self) {
        *self = ItrSample::default();
    }
}

/// Hardware quirks the throttle has to carry into its register writes.
#[derive(Clone, Copy, Debug)]
pub struct ThrottleCaps {
    /// Whether new rates must be written into both halves of the register.
    pub mirror_halves: bool,
    /// Whether a zero (unmoderated) rate is programmable at all.
    pub zero_rate_allowed: bool,
    /// Whether receive-side coalescing is on; it needs a nonzero interval.
    pub rsc_enabled: bool,
}

impl Default for ThrottleCaps {
    fn default() -> ThrottleCaps {
        ThrottleCaps {
            mirror_halves: false,
            zero_rate_allowed: true,
            rsc_enabled: false,
        }
    }
}

/// The adaptive throttle state of one interrupt vector.
pub struct VectorThrottle {
    adaptive: bool,
    caps: ThrottleCaps,
    current_rate: u32,
    rx_range: LatencyRange,
    tx_range: LatencyRange,
}

impl VectorThrottle {
    pub fn new(initial_rate: u32, adaptive: bool, caps: ThrottleCaps) -> VectorThrottle {
        VectorThrottle {
            adaptive,
            caps,
            current_rate: initial_rate,
            rx_range: LatencyRange::Low,
            tx_range: LatencyRange::Low,
        }
    }

    pub fn current_rate(&self) -> u32 {
        self.current_rate
    }

    /// The write that programs this vector's current rate, for bring-up.
    pub fn initial_write(&self) -> ThrottleWrite {
        self.quirked_write(self.current_rate)
    }

    /// Reclassifies from one interval's samples and returns the register
    /// write to issue, or `None` when the programmed rate should stay put.
    pub fn update(&mut self, rx: ItrSample, tx: ItrSample) -> Option<ThrottleWrite> {
        if !self.adaptive || self.current_rate == 0 {
            return None;
        }

        let interval_us = u64::from(1_000_000 / self.current_rate);
        self.rx_range = reclassify(self.rx_range, rx, interval_us);
        self.tx_range = reclassify(self.tx_range, tx, interval_us);

        let target = core::cmp::max(self.rx_range, self.tx_range).rate();
        let smoothed = (self.current_rate * 9 + target) / 10;
        if smoothed == self.current_rate {
            return None;
        }
        self.current_rate = smoothed;
        Some(self.quirked_write(smoothed))
    }

    fn quirked_write(&self, rate: u32) -> ThrottleWrite {
        let rate = if rate == 0 && (self.caps.rsc_enabled || !self.caps.zero_rate_allowed) {
            MIN_MODERATED_RATE
        } else {
            rate
        };
        ThrottleWrite {
            rate,
            mirror_halves: self.caps.mirror_halves,
        }
    }
}

/// Classifies one direction's interval. An idle interval keeps the previous
/// classification; a busy one may move up freely but only moves down one
/// step, so a single quiet interval in a bulk flow does not crank the
/// interrupt rate back up.
fn reclassify(old: LatencyRange, sample: ItrSample, interval_us: u64) -> LatencyRange {
    if sample.packets == 0 || interval_us == 0 {
        return old;
    }
    let bytes_per_usec = sample.bytes / interval_us;
    let measured = if bytes_per_usec <= ITR_BYTES_PER_USEC_LOW {
        LatencyRange::Lowest
    } else if bytes_per_usec <= ITR_BYTES_PER_USEC_HIGH {
        LatencyRange::Low
    } else {
        LatencyRange::Bulk
    };
    if measured < old {
        old.step_down()
    } else {
        measured
    }
}
