//! Transmit hang detection and link supervision.
//!
//! `watchdog_tick` runs on a multi-second cadence from the embedding. It
//! never touches descriptors; it reads queue cursors, the oldest outstanding
//! submission timestamp, and the link state, and when a queue is genuinely
//! stuck it logs a diagnostic snapshot and schedules one full reset.

use log::{error, info, warn};
use nic_buffers::FrameDelivery;
use nic_hal::{Clock, LinkStatus, NicHardware, QueueId, Ticks};
use nic_hal::regs::InterruptRegisters;

use crate::recovery::ResetReason;
use crate::Adapter;

/// The hang detector's per-queue state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HangState {
    /// No work outstanding.
    Healthy,
    /// Work outstanding but not yet stale, or the queue is pause-flow
    /// controlled and allowed to sit on it.
    Suspect,
    /// Stale work on an unpaused queue; a diagnostic was logged.
    Hung,
    /// A reset has been scheduled for this queue's hang; stays until the
    /// next bring-up re-arms the detector.
    Recovering,
}

pub(crate) struct Watchdog {
    hang: alloc::vec::Vec<HangState>,
    link: LinkStatus,
}

impl Watchdog {
    pub(crate) fn new() -> Watchdog {
        Watchdog {
            hang: alloc::vec::Vec::new(),
            link: LinkStatus::DOWN,
        }
    }

    /// Re-arms the detector for `num_tx_queues` queues; every queue starts
    /// healthy and the next tick re-reports carrier.
    pub(crate) fn arm(&mut self, num_tx_queues: u16) {
        self.hang.clear();
        self.hang
            .resize(usize::from(num_tx_queues), HangState::Healthy);
        self.link = LinkStatus::DOWN;
    }
}

impl<N: NicHardware, F: FrameDelivery + Clone> Adapter<N, F> {
    pub fn hang_state(&self, queue: QueueId) -> Option<HangState> {
        self.watchdog.hang.get(usize::from(queue.0)).copied()
    }

    /// One watchdog pass: link supervision, per-queue hang detection, and
    /// a software re-fire of every vector still holding outstanding work.
    pub fn watchdog_tick(&mut self) {
        if self.is_down() {
            return;
        }

        let link = self.hw.check_link();
        if link.up != self.watchdog.link.up {
            self.stats.link_changes += 1;
            if link.up {
                info!(
                    "link up: {} Mb/s, flow control rx {} tx {}",
                    link.speed_mbps, link.flow_control_rx, link.flow_control_tx,
                );
                // A fresh carrier restarts hang detection from scratch.
                for state in self.watchdog.hang.iter_mut() {
                    if *state != HangState::Recovering {
                        *state = HangState::Healthy;
                    }
                }
            } else {
                warn!("link down");
                if self.tx_queues.iter().any(|q| q.used_count() > 0) {
                    warn!("link lost with transmit work outstanding, scheduling reset to flush");
                    self.recovery
                        .requester()
                        .schedule_full_reset(ResetReason::LinkDown);
                }
            }
        }
        self.watchdog.link = link;
        if !link.up {
            return;
        }

        let timeout = Ticks(
            self.config
                .hang_timeout_seconds
                .saturating_mul(self.clock.ticks_per_second()),
        );
        let now = self.clock.now();

        for (i, queue) in self.tx_queues.iter().enumerate() {
            let state = &mut self.watchdog.hang[i];
            if *state == HangState::Recovering {
                continue;
            }
            if queue.used_count() == 0 {
                *state = HangState::Healthy;
                continue;
            }
            let Some(oldest) = queue.oldest_outstanding_timestamp() else {
                *state = HangState::Suspect;
                continue;
            };
            if now.saturating_sub(oldest) < timeout {
                *state = HangState::Suspect;
                continue;
            }
            if self.hw.is_transmit_paused(queue.id()) {
                // Flow control is holding the queue; stale work is expected.
                *state = HangState::Suspect;
                continue;
            }

            *state = HangState::Hung;
            let (head, tail) = queue.register_snapshot();
            error!(
                "transmit hang on queue {}: head {} tail {}, next_to_use {} next_to_clean {}, \
                 oldest submission at tick {} (now {})",
                queue.id(),
                head,
                tail,
                queue.next_to_use(),
                queue.next_to_clean(),
                oldest.0,
                now.0,
            );
            self.recovery
                .requester()
                .schedule_full_reset(ResetReason::TransmitHang);
            *state = HangState::Recovering;
        }

        // Completions can wedge without the queue being hung (a lost or
        // coalesced-away interrupt); fire every queue vector from software
        // so its poll task gets another pass regardless.
        for vector in &self.vectors {
            if vector.kind() != queue_vectors::VectorKind::Other {
                self.interrupts.trigger_vector(vector.id);
            }
        }
    }
}
