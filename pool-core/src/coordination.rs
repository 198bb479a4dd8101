//! Bus ownership hand-off between the polling loop and explicit requests.
//!
//! The registry and bus sit behind one mutex, which serializes individual
//! calls. A peripheral exchange spans several calls though (send, wait out
//! the processing window, receive), so an explicit command raises the
//! [`ReentrancyGuard`] for its whole exchange and the poll cycle stays off
//! the bus until the claim is dropped.

use core::time::Duration;

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// Shared flag set while an explicit command owns the bus.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    explicit: AtomicBool,
    restart: AtomicBool,
    cadence_ms: AtomicU32,
}

impl ReentrancyGuard {
    pub const fn new() -> Self {
        Self {
            explicit: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            cadence_ms: AtomicU32::new(0),
        }
    }

    /// Returns `true` while no explicit command holds the bus.
    pub fn polling_allowed(&self) -> bool {
        !self.explicit.load(Ordering::Acquire)
    }

    /// Claims the bus for an explicit command.
    ///
    /// Returns `None` when another explicit command already holds it.
    pub fn try_acquire(&self) -> Option<ExplicitClaim<'_>> {
        self.explicit
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ExplicitClaim { guard: self })
    }

    /// Consumes the restart request left behind by a finished explicit command.
    pub fn take_restart(&self) -> bool {
        self.restart.swap(false, Ordering::AcqRel)
    }

    /// Asks the polling context to switch to a new cadence.
    pub fn request_cadence(&self, interval: Duration) {
        let millis = u32::try_from(interval.as_millis())
            .unwrap_or(u32::MAX)
            .max(1);
        self.cadence_ms.store(millis, Ordering::Release);
    }

    /// Consumes a pending cadence change.
    pub fn take_cadence(&self) -> Option<Duration> {
        match self.cadence_ms.swap(0, Ordering::AcqRel) {
            0 => None,
            millis => Some(Duration::from_millis(u64::from(millis))),
        }
    }
}

/// RAII claim on the bus held by an explicit command.
///
/// Dropping the claim lowers the guard and asks the poll cycle to restart
/// once the exchanges it left in flight have been classified.
#[derive(Debug)]
pub struct ExplicitClaim<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for ExplicitClaim<'_> {
    fn drop(&mut self) {
        self.guard.restart.store(true, Ordering::Release);
        self.guard.explicit.store(false, Ordering::Release);
    }
}
