//! Parent/child lifecycle tracking: `wait` and process termination.
//!
//! Every launched child shares one [`Relation`] with its parent. Each side
//! holds a claim on it; the claim count moves `2 -> 1 -> 0` through atomic
//! decrements, and the relation's memory goes away with the last claim.

use alloc::format;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use log::debug;

use super::Process;
use crate::kernel::Kernel;
use crate::platform::{Scheduler, Tid};
use crate::sync::Completion;

/// Status reported for a child that never stored one.
const UNSET_STATUS: i32 = -1;

/// State shared by one parent and one child.
#[derive(Debug)]
struct Relation {
    child: Tid,
    status: AtomicI32,
    alive: AtomicU32,
    exited: Completion,
}

/// Outcome of dropping one claim on a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The other side still holds its claim.
    Shared,
    /// This was the last claim; the relation is gone.
    Last,
}

impl Relation {
    fn release(&self) -> Release {
        let previous = self.alive.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous == 1 || previous == 2);
        if previous == 1 {
            debug!("lifecycle: relation for child {} released", self.child);
            Release::Last
        } else {
            Release::Shared
        }
    }
}

/// Create the relation for a new child; returns (parent side, child side).
pub fn relation(child: Tid) -> (ParentClaim, ChildClaim) {
    let shared = Arc::new(Relation {
        child,
        status: AtomicI32::new(UNSET_STATUS),
        alive: AtomicU32::new(2),
        exited: Completion::new(),
    });
    (ParentClaim(shared.clone()), ChildClaim(shared))
}

/// The parent's claim, kept in the parent's child list.
#[derive(Debug)]
pub struct ParentClaim(Arc<Relation>);

impl ParentClaim {
    /// The child this claim refers to.
    pub fn child(&self) -> Tid {
        self.0.child
    }

    /// Claims still outstanding on the relation.
    pub fn alive(&self) -> u32 {
        self.0.alive.load(Ordering::Acquire)
    }

    /// Block until the child exits, then return its status and drop the claim.
    pub fn wait(self, scheduler: &dyn Scheduler) -> i32 {
        self.0.exited.wait(scheduler);
        let status = self.0.status.load(Ordering::Acquire);
        self.release();
        status
    }

    /// Drop the parent's claim without waiting.
    pub fn release(self) -> Release {
        self.0.release()
    }
}

/// The child's claim, kept in the child's process record.
#[derive(Debug)]
pub struct ChildClaim(Arc<Relation>);

impl ChildClaim {
    pub fn child(&self) -> Tid {
        self.0.child
    }

    /// Publish `status`, drop the claim and wake the parent.
    pub fn exit(self, status: i32, scheduler: &dyn Scheduler) -> Release {
        self.0.status.store(status, Ordering::Release);
        let released = self.0.release();
        self.0.exited.complete(scheduler);
        released
    }
}

impl Kernel {
    /// Wait for the calling process's child `child` and return its status.
    ///
    /// Returns -1 immediately if `child` is not a child of the caller or has
    /// already been waited for.
    pub fn wait(&self, child: Tid) -> i32 {
        let Some(process) = self.current_process() else {
            return -1;
        };

        let claim = {
            let mut inner = process.lock();
            let position = inner.children.iter().position(|c| c.child() == child);
            position.map(|i| inner.children.swap_remove(i))
        };

        match claim {
            Some(claim) => {
                debug!("lifecycle: {} waiting for {}", process.tid(), child);
                claim.wait(self.scheduler())
            }
            None => -1,
        }
    }

    /// Terminate the calling process with `status`. Never returns.
    pub fn exit(&self, status: i32) -> ! {
        if let Some(process) = self.current_process() {
            self.terminate(&process, status);
            self.unregister(process.tid());
        }
        self.scheduler().exit_thread()
    }

    /// Release everything `process` holds and report `status` to its parent.
    ///
    /// Safe to call more than once; later calls find nothing to release.
    pub fn terminate(&self, process: &Process, status: i32) {
        process.deactivate();
        let (parent, children, pagedir) = {
            let mut inner = process.lock();
            (
                inner.parent.take(),
                core::mem::take(&mut inner.children),
                inner.pagedir.take(),
            )
        };

        if let Some(claim) = parent {
            let record = format!("{}: exit({})\n", process.name(), status);
            self.console().put(record.as_bytes());
            debug!("process {} ({}) exited with {}", process.tid(), process.name(), status);
            claim.exit(status, self.scheduler());
        }

        process.lock().files.close_all();

        for claim in children {
            claim.release();
        }

        // Nothing advertises the directory any more; switch away before the
        // pages are freed.
        if let Some(pagedir) = pagedir {
            self.machine().activate(None);
            drop(pagedir);
        }
    }

    /// Tear down the root process registered with [`Kernel::init_root`].
    pub fn finish_root(&self, root: &Arc<Process>) {
        self.terminate(root, 0);
        self.unregister(root.tid());
    }
}
