//! Collaborator Interfaces
//!
//! The user program subsystem sits on top of the scheduler, the MMU, the
//! console and the filesystem. Each is consumed through a narrow trait so the
//! same code runs on the bare-metal kernel and under the hosted test harness.
//!
//! # Contracts
//! - `Scheduler::spawn` either starts a thread that will run `entry`, or
//!   drops `entry` and returns `None`
//! - `Scheduler::exit_thread` and `Machine::enter_user` never return
//! - `Machine::activate(None)` switches to the kernel-only mapping
//! - `Scheduler::block`/`unblock` suspend and resume a thread; a resumed
//!   thread re-checks whatever it waited for
//! - Closing a file is dropping its handle

use alloc::boxed::Box;
use core::fmt;

use crate::mm::{PageRoot, VirtAddr};

/// Thread (and process) identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Tid(i32);

impl Tid {
    /// Sentinel returned to user code when a launch fails.
    pub const ERROR: Self = Self(-1);

    /// Wrap a raw identifier.
    #[inline]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Get the raw identifier.
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tid({})", self.0)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of a newly created kernel thread.
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// Thread management.
pub trait Scheduler: Send + Sync {
    /// Create a thread named `name` running `entry`.
    fn spawn(&self, name: &str, entry: ThreadEntry) -> Option<Tid>;

    /// Identifier of the running thread.
    fn current(&self) -> Tid;

    /// Block the running thread until [`Scheduler::unblock`] names it.
    ///
    /// An unblock that arrives before the block is remembered, so the block
    /// returns at once. Callers re-check their condition after waking.
    fn block(&self);

    /// Make the blocked thread `tid` ready again.
    fn unblock(&self, tid: Tid);

    /// Block the running thread for `millis` milliseconds.
    fn sleep(&self, millis: u32);

    /// Terminate the running thread.
    fn exit_thread(&self) -> !;

    /// Power the machine off.
    fn power_off(&self) -> !;
}

/// Initial user register state built by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserEntry {
    /// Instruction pointer (executable entry point).
    pub eip: VirtAddr,
    /// Stack pointer (points at the placeholder return address).
    pub esp: VirtAddr,
}

/// CPU and MMU control.
pub trait Machine: Send + Sync {
    /// Load the directory `root` into the MMU, or the kernel-only mapping
    /// for `None`. Runs on the context-switch path.
    fn activate(&self, root: Option<PageRoot>);

    /// Drop to user mode at `entry` on the current thread.
    fn enter_user(&self, entry: UserEntry) -> !;
}

/// Character console.
pub trait Console: Send + Sync {
    /// Write bytes to the display.
    fn put(&self, bytes: &[u8]);

    /// Block for one byte of keyboard input.
    fn getc(&self) -> u8;
}

/// An open file.
pub trait File: Send {
    /// Read at the current position; returns bytes read.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Write at the current position; returns bytes written.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Move the position to `pos`.
    fn seek(&mut self, pos: u32);

    /// Current position.
    fn tell(&self) -> u32;

    /// File size in bytes.
    fn length(&self) -> u32;
}

/// Path-based filesystem operations.
pub trait FileSystem: Send + Sync {
    /// Open `name`.
    fn open(&self, name: &str) -> Option<Box<dyn File>>;

    /// Create `name` with `initial_size` zero bytes.
    fn create(&self, name: &str, initial_size: u32) -> bool;

    /// Remove `name`.
    fn remove(&self, name: &str) -> bool;
}
