//! Blocking handoff primitive.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::platform::{Scheduler, Tid};

/// A sticky completion signal.
///
/// `complete` deposits a permit; `wait` consumes one, blocking until a
/// permit exists. A permit deposited before anyone waits is not lost, so a
/// waiter that arrives late still observes the event.
///
/// At most one thread waits on a signal at a time.
#[derive(Debug, Default)]
pub struct Completion {
    permits: AtomicUsize,
    waiter: Mutex<Option<Tid>>,
}

impl Completion {
    /// Create a signal with no pending permits.
    pub const fn new() -> Self {
        Self {
            permits: AtomicUsize::new(0),
            waiter: Mutex::new(None),
        }
    }

    /// Deposit one permit and wake the waiting thread, if any.
    pub fn complete(&self, scheduler: &dyn Scheduler) {
        self.permits.fetch_add(1, Ordering::Release);
        if let Some(tid) = self.waiter.lock().take() {
            scheduler.unblock(tid);
        }
    }

    /// Consume a permit if one is pending.
    pub fn try_wait(&self) -> bool {
        self.permits
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Block until a permit is available and consume it.
    pub fn wait(&self, scheduler: &dyn Scheduler) {
        while !self.try_wait() {
            *self.waiter.lock() = Some(scheduler.current());
            // A permit deposited after the first check finds us registered;
            // one deposited before it is caught here.
            if self.try_wait() {
                self.waiter.lock().take();
                return;
            }
            scheduler.block();
        }
    }

    /// Number of permits not yet consumed.
    pub fn pending(&self) -> usize {
        self.permits.load(Ordering::Acquire)
    }
}
