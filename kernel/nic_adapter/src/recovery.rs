//! Scheduling and performing full device resets.
//!
//! Anything that decides the device needs a reset (the watchdog, link
//! supervision) only *requests* one through a [`ResetRequester`]; the
//! embedding runs [`Adapter::process_recovery`] from a dedicated task, so
//! the heavyweight down/up sequence never runs in interrupt or poll context.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// Why a reset was requested, carried along for the recovery log.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResetReason {
    TransmitHang,
    LinkDown,
}

/// One queued reset request.
#[derive(Clone, Copy, Debug)]
pub struct ResetRequest {
    pub reason: ResetReason,
}

/// A clone-able handle for scheduling a full device reset.
///
/// Scheduling is idempotent: while one reset is pending, further requests
/// are dropped, so a watchdog firing on several queues at once produces a
/// single recovery pass.
pub struct ResetRequester {
    latch: Arc<AtomicBool>,
    requests: Arc<mpmc::Queue<ResetRequest>>,
}

impl Clone for ResetRequester {
    fn clone(&self) -> ResetRequester {
        ResetRequester {
            latch: self.latch.clone(),
            requests: self.requests.clone(),
        }
    }
}

impl ResetRequester {
    /// Queues a full reset unless one is already pending.
    /// Returns whether this call was the one that scheduled it.
    pub fn schedule_full_reset(&self, reason: ResetReason) -> bool {
        if self.latch.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.requests.push(ResetRequest { reason });
        true
    }
}

/// The adapter's end of the reset channel.
pub(crate) struct RecoveryChannel {
    latch: Arc<AtomicBool>,
    requests: Arc<mpmc::Queue<ResetRequest>>,
}

impl RecoveryChannel {
    pub(crate) fn new() -> RecoveryChannel {
        RecoveryChannel {
            latch: Arc::new(AtomicBool::new(false)),
            requests: Arc::new(mpmc::Queue::with_capacity(4)),
        }
    }

    pub(crate) fn requester(&self) -> ResetRequester {
        ResetRequester {
            latch: self.latch.clone(),
            requests: self.requests.clone(),
        }
    }

    /// Whether a reset has been scheduled and not yet performed.
    pub(crate) fn pending(&self) -> bool {
        self.latch.load(Ordering::SeqCst)
    }

    pub(crate) fn take_request(&self) -> Option<ResetRequest> {
        self.requests.pop()
    }

    /// Re-opens the latch once recovery completed, so the next hang can
    /// schedule again.
    pub(crate) fn clear(&self) {
        self.latch.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduling_is_idempotent_until_cleared() {
        let channel = RecoveryChannel::new();
        let requester = channel.requester();

        assert!(requester.schedule_full_reset(ResetReason::TransmitHang));
        assert!(!requester.schedule_full_reset(ResetReason::TransmitHang));
        assert!(!requester.clone().schedule_full_reset(ResetReason::LinkDown));
        assert!(channel.pending());

        assert_eq!(
            channel.take_request().map(|r| r.reason),
            Some(ResetReason::TransmitHang)
        );
        assert!(channel.take_request().is_none());

        channel.clear();
        assert!(!channel.pending());
        assert!(requester.schedule_full_reset(ResetReason::LinkDown));
    }
}
