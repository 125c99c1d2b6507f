//! Page Frame Pools
//!
//! Hands out whole pages from a bounded pool. The kernel keeps two pools:
//! one for its own page-sized buffers (command lines) and one reserved for
//! user processes (segments and stacks).
//!
//! # Design
//! - A pool has a fixed page budget; allocation beyond it fails
//! - Released pages are recycled, so a non-zeroed allocation may return
//!   stale contents exactly like a real page allocator
//! - A [`Frame`] returns its page to the pool on drop
//!
//! # Security Properties
//! - `AllocFlags::ZERO` guarantees a fully zeroed page
//! - Double-free is impossible: frames are owned values

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::Mutex;

use super::address::PAGE_SIZE;

bitflags! {
    /// Options for [`PagePool::alloc`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AllocFlags: u8 {
        /// Zero the page before returning it.
        const ZERO = 1 << 0;
    }
}

/// One page of memory, page aligned.
#[repr(C, align(4096))]
pub struct Page([u8; PAGE_SIZE]);

impl Page {
    fn boxed() -> Box<Self> {
        Box::new(Self([0; PAGE_SIZE]))
    }
}

struct PoolState {
    /// Pages currently owned by a [`Frame`].
    in_use: usize,
    /// Released pages waiting for reuse.
    recycled: Vec<Box<Page>>,
}

struct PoolInner {
    name: &'static str,
    capacity: usize,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn release(&self, page: Box<Page>) {
        let mut state = self.state.lock();
        state.in_use -= 1;
        state.recycled.push(page);
    }
}

/// A bounded page allocator.
#[derive(Clone)]
pub struct PagePool {
    inner: Arc<PoolInner>,
}

impl PagePool {
    /// Create a pool that can hand out at most `capacity` pages at once.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name,
                capacity,
                state: Mutex::new(PoolState {
                    in_use: 0,
                    recycled: Vec::new(),
                }),
            }),
        }
    }

    /// Allocate a single page.
    ///
    /// Returns `None` when the pool's budget is exhausted.
    pub fn alloc(&self, flags: AllocFlags) -> Option<Frame> {
        let page = {
            let mut state = self.inner.state.lock();
            if state.in_use == self.inner.capacity {
                return None;
            }
            state.in_use += 1;
            state.recycled.pop()
        };

        let mut page = page.unwrap_or_else(Page::boxed);
        if flags.contains(AllocFlags::ZERO) {
            page.0.fill(0);
        }

        Some(Frame {
            page: Some(page),
            pool: self.inner.clone(),
        })
    }

    /// Total page budget.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of pages currently handed out.
    pub fn in_use(&self) -> usize {
        self.inner.state.lock().in_use
    }
}

impl core::fmt::Debug for PagePool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "PagePool({}, {}/{})",
            self.inner.name,
            self.in_use(),
            self.inner.capacity
        )
    }
}

/// An owned page that goes back to its pool on drop.
pub struct Frame {
    page: Option<Box<Page>>,
    pool: Arc<PoolInner>,
}

impl Frame {
    /// View the page contents.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        match &self.page {
            Some(page) => &page.0,
            None => unreachable!("frame used after release"),
        }
    }

    /// Mutable view of the page contents.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        match &mut self.page {
            Some(page) => &mut page.0,
            None => unreachable!("frame used after release"),
        }
    }
}

impl core::fmt::Debug for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Frame({})", self.pool.name)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            self.pool.release(page);
        }
    }
}
