//! System Call Interface
//!
//! User code pushes a syscall number and its arguments as 32-bit words on
//! its stack and traps. The dispatcher reads them through the caller's page
//! directory, runs the handler and stores the result in `eax`.
//!
//! # Security Model
//! - Whitelist approach: only the numbers in [`Sysno`] are accepted
//! - The number word and the whole argument block are validated before
//!   they are read; string arguments are validated before they are copied
//! - Any [`SyscallError`] other than an explicit exit terminates the caller
//!   with status -1; nothing a user program passes can fault the kernel
//!
//! # Syscalls
//! - 0: halt()
//! - 1: exit(status)
//! - 2: exec(cmd_line) -> pid
//! - 3: wait(pid) -> status
//! - 4: create(name, initial_size) -> bool
//! - 5: remove(name) -> bool
//! - 6: open(name) -> fd
//! - 7: filesize(fd) -> size
//! - 8: read(fd, buf, len) -> count
//! - 9: write(fd, buf, len) -> count
//! - 10: seek(fd, pos)
//! - 11: tell(fd) -> pos
//! - 12: close(fd)
//! - 13: sleep(millis)

mod args;
mod handler;
mod number;
mod validate;

use alloc::sync::Arc;

use log::warn;

pub use args::{decode, Arg};
pub use handler::SyscallResult;
pub use number::{ArgKind, Sysno};
pub use validate::{copy_string, valid_buffer, valid_pointer, valid_string, validate_string, UserBuffer};

use crate::kernel::Kernel;
use crate::mm::address::WORD_SIZE;
use crate::mm::{MappingError, VirtAddr};
use crate::trap::TrapFrame;

/// Reasons a system call terminates its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// A user pointer was null, in kernel space or unmapped.
    BadAddress(VirtAddr),
    /// A descriptor outside the file table's range.
    BadDescriptor(i32),
    /// The number is not a known system call.
    UnknownSyscall(u32),
    /// Decoded arguments did not fit the handler.
    BadArguments(Sysno),
    /// The calling thread has no process or no address space.
    NoProcess,
    /// The caller asked to exit with this status.
    Exit(i32),
}

impl From<MappingError> for SyscallError {
    fn from(_: MappingError) -> Self {
        Self::BadAddress(VirtAddr::NULL)
    }
}

impl core::fmt::Display for SyscallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadAddress(addr) => write!(f, "bad user address {}", addr),
            Self::BadDescriptor(fd) => write!(f, "bad descriptor {}", fd),
            Self::UnknownSyscall(n) => write!(f, "unknown syscall {}", n),
            Self::BadArguments(sysno) => write!(f, "bad arguments for {:?}", sysno),
            Self::NoProcess => write!(f, "no user process"),
            Self::Exit(status) => write!(f, "exit({})", status),
        }
    }
}

impl Kernel {
    /// Handle a system call trap for the current process.
    pub fn syscall(self: &Arc<Self>, frame: &mut TrapFrame) {
        match self.dispatch(frame) {
            Ok(Some(value)) => frame.eax = value,
            Ok(None) => {}
            Err(SyscallError::Exit(status)) => self.exit(status),
            Err(e) => {
                warn!("syscall: {} from {}, terminating", e, self.scheduler().current());
                self.exit(-1)
            }
        }
    }

    fn dispatch(self: &Arc<Self>, frame: &TrapFrame) -> SyscallResult {
        let process = self.current_process().ok_or(SyscallError::NoProcess)?;
        let esp = VirtAddr::new(frame.esp);

        let (sysno, args) = {
            let inner = process.lock();
            let dir = inner.pagedir.as_ref().ok_or(SyscallError::NoProcess)?;
            let number = UserBuffer::validate(dir, esp, WORD_SIZE)?.read_u32(dir)?;
            let sysno = Sysno::try_from(number)?;
            (sysno, decode(dir, esp, sysno.schema())?)
        };

        handler::handle(self, &process, sysno, &args)
    }
}
