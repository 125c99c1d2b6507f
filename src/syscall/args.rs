//! Typed decoding of system call arguments.
//!
//! Arguments are 32-bit words directly above the syscall number on the user
//! stack. The whole argument block is validated as one range, then each slot
//! is decoded according to the syscall's schema. String slots are validated
//! and copied here; buffer slots are validated by the handler, which knows
//! their length.

use alloc::vec::Vec;

use super::number::ArgKind;
use super::validate::{copy_string, UserBuffer};
use super::SyscallError;
use crate::mm::address::WORD_SIZE;
use crate::mm::{PageDirectory, VirtAddr};

/// One decoded argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Int(i32),
    Uint(u32),
    /// Kernel copy of a user string, without the NUL.
    Str(Vec<u8>),
    /// Unvalidated user buffer address.
    Ptr(VirtAddr),
}

/// Decode the arguments for `schema` from the frame whose number is at `esp`.
pub fn decode(dir: &PageDirectory, esp: VirtAddr, schema: &[ArgKind]) -> Result<Vec<Arg>, SyscallError> {
    if schema.is_empty() {
        return Ok(Vec::new());
    }

    let base = esp.checked_add(WORD_SIZE).ok_or(SyscallError::BadAddress(esp))?;
    let block = UserBuffer::validate(dir, base, WORD_SIZE * schema.len() as u32)?;
    let words = block.copy_in(dir)?;

    schema
        .iter()
        .zip(words.chunks_exact(WORD_SIZE as usize))
        .map(|(kind, raw)| {
            let word = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            Ok(match kind {
                ArgKind::Int => Arg::Int(word as i32),
                ArgKind::Uint => Arg::Uint(word),
                ArgKind::Ptr => Arg::Ptr(VirtAddr::new(word)),
                ArgKind::Str => Arg::Str(copy_string(dir, VirtAddr::new(word))?),
            })
        })
        .collect()
}
