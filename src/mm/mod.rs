//! Memory management for user programs
//!
//! Provides:
//! - 32-bit user virtual address type and layout constants
//! - Bounded page pools (kernel pool and process-reserved user pool)
//! - Per-process page directories with kernel-side copy helpers
//! - The bare-metal kernel heap
//!
//! # Security Principles
//! - Every user address is checked against the user/kernel boundary
//! - Unmapped user memory is reported as an error, never dereferenced

pub mod address;
pub mod frame;
pub mod paging;

#[cfg(target_os = "none")]
mod heap;

#[cfg(target_os = "none")]
pub use heap::{heap_free, heap_size, init_heap};

pub use address::{VirtAddr, PAGE_SIZE, PHYS_BASE};
pub use frame::{AllocFlags, Frame, PagePool};
pub use paging::{MappingError, PageDirectory, PageFlags, PageRoot};
