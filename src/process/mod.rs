//! User Processes
//!
//! A process is a kernel thread that owns a user address space, an
//! open-file table and its place in the parent/child tree.
//!
//! # Ownership
//! - A process record is created on its own thread by the launcher and
//!   registered in the kernel's process table
//! - The parent holds a [`ParentClaim`] per child; each child holds one
//!   [`ChildClaim`] back to its parent (the root process holds none)
//! - Everything in [`ProcessInner`] is released by `Kernel::terminate`

pub mod args;
pub mod files;
pub mod launch;
pub mod lifecycle;

use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, MutexGuard};

pub use args::{build_stack, process_name, tokenize, CommandLine, StackError};
pub use files::{Fd, FdError, FileTable};
pub use launch::LaunchError;
pub use lifecycle::{relation, ChildClaim, ParentClaim, Release};

use crate::mm::{PageDirectory, PageRoot};
use crate::platform::Tid;

/// Mutable per-process state.
pub struct ProcessInner {
    /// User address space; `None` before load and after teardown.
    pub pagedir: Option<PageDirectory>,
    /// Claim on the relation with our parent.
    pub parent: Option<ChildClaim>,
    /// Claims on the relations with our children.
    pub children: Vec<ParentClaim>,
    /// Open files.
    pub files: FileTable,
}

/// A user process.
pub struct Process {
    tid: Tid,
    name: String,
    /// Root of the installed directory, readable without the lock.
    active: AtomicUsize,
    inner: Mutex<ProcessInner>,
}

impl Process {
    pub fn new(tid: Tid, name: String, parent: Option<ChildClaim>, max_open_files: usize) -> Self {
        Self {
            tid,
            name,
            active: AtomicUsize::new(0),
            inner: Mutex::new(ProcessInner {
                pagedir: None,
                parent,
                children: Vec::new(),
                files: FileTable::new(max_open_files),
            }),
        }
    }

    #[inline]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Name used in the termination record.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock the mutable state.
    ///
    /// Do not hold the guard while waiting on another thread.
    pub fn lock(&self) -> MutexGuard<'_, ProcessInner> {
        self.inner.lock()
    }

    /// Install the loaded address space.
    pub fn install(&self, pagedir: PageDirectory) {
        let root = pagedir.root();
        self.lock().pagedir = Some(pagedir);
        self.active.store(root.as_usize(), Ordering::Release);
    }

    /// Directory to load when switching to this process. Never blocks.
    pub fn active_root(&self) -> Option<PageRoot> {
        PageRoot::from_raw(self.active.load(Ordering::Acquire))
    }

    /// Stop advertising the directory before it is torn down.
    pub(crate) fn deactivate(&self) {
        self.active.store(0, Ordering::Release);
    }

    /// Children not yet waited for.
    pub fn children(&self) -> Vec<Tid> {
        self.lock().children.iter().map(ParentClaim::child).collect()
    }

}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
