//! System Call Input Validation
//!
//! Every user pointer is checked against the caller's page directory before
//! the kernel touches it.
//!
//! # Security Principles
//! - Validate ALL inputs before use
//! - Fail-secure: an address is valid only if it is below `PHYS_BASE` and
//!   its page is mapped
//! - Ranges are checked page by page from the first byte to the last
//! - Strings are scanned one confirmed page at a time, never reading past
//!   a page that has not been checked
//! - Data is copied between user and kernel buffers, never aliased

use alloc::vec;
use alloc::vec::Vec;

use super::SyscallError;
use crate::mm::address::PAGE_SIZE;
use crate::mm::{PageDirectory, VirtAddr};

/// Whether `ptr` is a user address on a mapped page.
#[inline]
pub fn valid_pointer(dir: &PageDirectory, ptr: VirtAddr) -> bool {
    ptr.is_user() && dir.is_mapped(ptr)
}

/// Whether every byte of `[ptr, ptr + len)` is valid.
///
/// A zero-length range still requires `ptr` itself to be valid.
pub fn valid_buffer(dir: &PageDirectory, ptr: VirtAddr, len: u32) -> bool {
    if !valid_pointer(dir, ptr) {
        return false;
    }
    if len == 0 {
        return true;
    }
    let Some(last) = ptr.checked_add(len - 1) else {
        return false;
    };
    if !last.is_user() {
        return false;
    }

    let last_page = last.align_down();
    let mut page = ptr.align_down();
    while page < last_page {
        page = match page.checked_add(PAGE_SIZE as u32) {
            Some(next) => next,
            None => return false,
        };
        if !dir.is_mapped(page) {
            return false;
        }
    }
    true
}

/// Length of the NUL-terminated string at `ptr`, if all of it is valid.
pub fn validate_string(dir: &PageDirectory, ptr: VirtAddr) -> Option<usize> {
    let mut addr = ptr;
    let mut len = 0;
    loop {
        let chunk = dir.page_bytes(addr)?;
        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            return Some(len + nul);
        }
        len += chunk.len();
        addr = addr.checked_add(chunk.len() as u32)?;
    }
}

/// Whether `ptr` points at a complete NUL-terminated user string.
#[inline]
pub fn valid_string(dir: &PageDirectory, ptr: VirtAddr) -> bool {
    validate_string(dir, ptr).is_some()
}

/// Copy the user string at `ptr` (without its NUL) into the kernel.
pub fn copy_string(dir: &PageDirectory, ptr: VirtAddr) -> Result<Vec<u8>, SyscallError> {
    let len = validate_string(dir, ptr).ok_or(SyscallError::BadAddress(ptr))?;
    let mut bytes = vec![0u8; len];
    dir.read(ptr, &mut bytes)?;
    Ok(bytes)
}

/// A validated user-space buffer
///
/// Only constructed after [`valid_buffer`] accepted the range, so copies
/// through it stay inside mapped user memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserBuffer {
    addr: VirtAddr,
    len: u32,
}

impl UserBuffer {
    /// Validate `[ptr, ptr + len)` against `dir`.
    pub fn validate(dir: &PageDirectory, ptr: VirtAddr, len: u32) -> Result<Self, SyscallError> {
        if valid_buffer(dir, ptr, len) {
            Ok(Self { addr: ptr, len })
        } else {
            Err(SyscallError::BadAddress(ptr))
        }
    }

    /// Copy the buffer's contents into kernel memory.
    pub fn copy_in(&self, dir: &PageDirectory) -> Result<Vec<u8>, SyscallError> {
        let mut bytes = vec![0u8; self.len as usize];
        dir.read(self.addr, &mut bytes)?;
        Ok(bytes)
    }

    /// Read the buffer as one little-endian word.
    pub fn read_u32(&self, dir: &PageDirectory) -> Result<u32, SyscallError> {
        if self.len < 4 {
            return Err(SyscallError::BadAddress(self.addr));
        }
        Ok(dir.read_u32(self.addr)?)
    }

    /// Copy `data` into the start of the buffer.
    pub fn copy_out(&self, dir: &mut PageDirectory, data: &[u8]) -> Result<(), SyscallError> {
        if data.len() > self.len as usize {
            return Err(SyscallError::BadAddress(self.addr));
        }
        Ok(dir.write(self.addr, data)?)
    }
}
