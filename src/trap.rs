//! Trap Handling
//!
//! Entry point for traps raised while a user process runs.
//!
//! # Trap Types
//! - Vector 0x30: system call (`int $0x30`)
//! - Vector 14: page fault
//! - Anything else is unexpected
//!
//! # Security Considerations
//! - A fault caused by user code terminates the process with status -1
//! - A fault in kernel mode is a kernel bug and powers the machine off

use alloc::sync::Arc;

use log::{error, warn};

use crate::kernel::Kernel;

/// Vector used by user code for system calls.
pub const SYSCALL_VECTOR: u8 = 0x30;
/// Page fault exception vector.
pub const PAGE_FAULT_VECTOR: u8 = 14;

/// Page fault error code bit: the access came from user mode.
const PF_USER: u32 = 1 << 2;
/// Page fault error code bit: the access was a write.
const PF_WRITE: u32 = 1 << 1;

/// Register state saved on trap entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// Vector number.
    pub vec_no: u8,
    /// Error code pushed by the CPU (zero if none).
    pub error_code: u32,
    /// Faulting linear address (`cr2`) for page faults.
    pub fault_addr: u32,
    /// Interrupted instruction pointer.
    pub eip: u32,
    /// Interrupted user stack pointer.
    pub esp: u32,
    /// Return value register.
    pub eax: u32,
}

impl TrapFrame {
    /// A system call trap with the user stack at `esp`.
    pub fn syscall(esp: u32) -> Self {
        Self {
            vec_no: SYSCALL_VECTOR,
            esp,
            ..Self::default()
        }
    }

    /// A page fault at `fault_addr`.
    pub fn page_fault(fault_addr: u32, error_code: u32, eip: u32) -> Self {
        Self {
            vec_no: PAGE_FAULT_VECTOR,
            error_code,
            fault_addr,
            eip,
            ..Self::default()
        }
    }
}

/// Decoded cause of a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    Syscall,
    PageFault { user: bool, write: bool },
    Other(u8),
}

impl From<&TrapFrame> for TrapCause {
    fn from(frame: &TrapFrame) -> Self {
        match frame.vec_no {
            SYSCALL_VECTOR => Self::Syscall,
            PAGE_FAULT_VECTOR => Self::PageFault {
                user: frame.error_code & PF_USER != 0,
                write: frame.error_code & PF_WRITE != 0,
            },
            other => Self::Other(other),
        }
    }
}

impl Kernel {
    /// Handle a trap taken on the current thread.
    pub fn handle_trap(self: &Arc<Self>, frame: &mut TrapFrame) {
        match TrapCause::from(&*frame) {
            TrapCause::Syscall => self.syscall(frame),
            TrapCause::PageFault { user: true, write } => {
                warn!(
                    "trap: user page fault at {:#010x} ({}) eip={:#010x}, terminating",
                    frame.fault_addr,
                    if write { "write" } else { "read" },
                    frame.eip
                );
                self.exit(-1)
            }
            TrapCause::PageFault { user: false, .. } => {
                error!(
                    "trap: kernel page fault at {:#010x} eip={:#010x}",
                    frame.fault_addr, frame.eip
                );
                self.scheduler().power_off()
            }
            TrapCause::Other(vec_no) => {
                warn!("trap: unexpected vector {:#04x} from user mode, terminating", vec_no);
                self.exit(-1)
            }
        }
    }
}
