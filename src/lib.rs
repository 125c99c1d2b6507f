//! PantherOS user programs
//!
//! Runs user programs on top of the kernel's scheduler, MMU and filesystem:
//!
//! - [`elf`]: loads 32-bit ELF executables into a fresh address space
//! - [`process`]: launches processes, builds their argument stacks and
//!   tracks parent/child lifecycles (`exec`, `wait`, `exit`)
//! - [`syscall`]: validates user pointers and dispatches system calls
//! - [`trap`]: routes system call and fault traps from user mode
//!
//! The kernel side is reached only through the traits in [`platform`], so the
//! same code runs on bare metal and under the hosted test harness.
//!
//! # Security Features
//! - Every user pointer is checked against the caller's page directory
//! - Untrusted executables are range-checked before any page is mapped
//! - Misbehaving processes are terminated, never the kernel
//! - Page tables and pages are owned values; teardown cannot double-free

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod config;
pub mod elf;
pub mod kernel;
pub mod logger;
pub mod mm;
pub mod platform;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod trap;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use kernel::{Kernel, Services};
pub use platform::Tid;
