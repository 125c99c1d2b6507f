//! System Call Handlers
//!
//! One function per system call. Each receives decoded arguments and
//! returns the value for the caller's `eax`, `None` to leave it untouched,
//! or an error that terminates the caller.
//!
//! # Descriptor Rules
//! - 0 is keyboard input, 1 is the console; neither is in the file table
//! - Descriptors outside the file table's range terminate the caller,
//!   except where 0 and 1 have their own meaning (READ, WRITE)
//! - In-range descriptors that are not open give -1, or do nothing for
//!   SEEK and CLOSE

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::str;

use log::{debug, trace};

use super::args::Arg;
use super::number::Sysno;
use super::validate::UserBuffer;
use super::SyscallError;
use crate::kernel::Kernel;
use crate::mm::{PageDirectory, VirtAddr};
use crate::platform::{File, Tid};
use crate::process::{Fd, FdError, Process, ProcessInner};

/// Result of one system call.
pub type SyscallResult = Result<Option<u32>, SyscallError>;

#[inline]
fn ret(value: i32) -> SyscallResult {
    Ok(Some(value as u32))
}

#[inline]
fn ret_bool(value: bool) -> SyscallResult {
    Ok(Some(u32::from(value)))
}

/// Run the handler for `sysno`.
pub fn handle(kernel: &Arc<Kernel>, process: &Process, sysno: Sysno, args: &[Arg]) -> SyscallResult {
    trace!("syscall: {} {:?}", process.tid(), sysno);
    let bad_args = || SyscallError::BadArguments(sysno);

    match (sysno, args) {
        (Sysno::Halt, []) => sys_halt(kernel),
        (Sysno::Exit, [Arg::Int(status)]) => sys_exit(*status),
        (Sysno::Exec, [Arg::Str(cmd_line)]) => sys_exec(kernel, cmd_line),
        (Sysno::Wait, [Arg::Int(pid)]) => sys_wait(kernel, *pid),
        (Sysno::Create, [Arg::Str(name), Arg::Uint(size)]) => sys_create(kernel, name, *size),
        (Sysno::Remove, [Arg::Str(name)]) => sys_remove(kernel, name),
        (Sysno::Open, [Arg::Str(name)]) => sys_open(kernel, process, name),
        (Sysno::Filesize, [Arg::Int(fd)]) => sys_filesize(process, *fd),
        (Sysno::Read, [Arg::Int(fd), Arg::Ptr(buf), Arg::Uint(len)]) => {
            sys_read(kernel, process, *fd, *buf, *len)
        }
        (Sysno::Write, [Arg::Int(fd), Arg::Ptr(buf), Arg::Uint(len)]) => {
            sys_write(kernel, process, *fd, *buf, *len)
        }
        (Sysno::Seek, [Arg::Int(fd), Arg::Uint(pos)]) => sys_seek(process, *fd, *pos),
        (Sysno::Tell, [Arg::Int(fd)]) => sys_tell(process, *fd),
        (Sysno::Close, [Arg::Int(fd)]) => sys_close(process, *fd),
        (Sysno::Sleep, [Arg::Int(millis)]) => sys_sleep(kernel, *millis),
        _ => Err(bad_args()),
    }
}

/// The caller's page directory, or a fault if it has none.
fn pagedir(inner: &ProcessInner) -> Result<&PageDirectory, SyscallError> {
    inner.pagedir.as_ref().ok_or(SyscallError::NoProcess)
}

/// Run `f` on the open file `fd`.
///
/// Returns `Ok(None)` for an in-range descriptor that is not open.
fn with_file<R>(
    process: &Process,
    fd: i32,
    f: impl FnOnce(&mut dyn File) -> R,
) -> Result<Option<R>, SyscallError> {
    let mut inner = process.lock();
    match inner.files.get_mut(Fd::new(fd)) {
        Ok(file) => Ok(Some(f(file))),
        Err(FdError::Closed) => Ok(None),
        Err(FdError::OutOfRange) => Err(SyscallError::BadDescriptor(fd)),
    }
}

fn sys_halt(kernel: &Kernel) -> SyscallResult {
    kernel.scheduler().power_off()
}

/// `Kernel::syscall` performs the exit after the call state is dropped.
fn sys_exit(status: i32) -> SyscallResult {
    Err(SyscallError::Exit(status))
}

fn sys_exec(kernel: &Arc<Kernel>, cmd_line: &[u8]) -> SyscallResult {
    let tid = kernel.execute(cmd_line).unwrap_or_else(|e| {
        debug!("exec: {}", e);
        Tid::ERROR
    });
    ret(tid.as_i32())
}

fn sys_wait(kernel: &Kernel, pid: i32) -> SyscallResult {
    ret(kernel.wait(Tid::new(pid)))
}

fn sys_create(kernel: &Kernel, name: &[u8], initial_size: u32) -> SyscallResult {
    let created = str::from_utf8(name)
        .map(|name| kernel.filesystem().create(name, initial_size))
        .unwrap_or(false);
    ret_bool(created)
}

fn sys_remove(kernel: &Kernel, name: &[u8]) -> SyscallResult {
    let removed = str::from_utf8(name)
        .map(|name| kernel.filesystem().remove(name))
        .unwrap_or(false);
    ret_bool(removed)
}

fn sys_open(kernel: &Kernel, process: &Process, name: &[u8]) -> SyscallResult {
    let Some(file) = str::from_utf8(name).ok().and_then(|name| kernel.filesystem().open(name)) else {
        return ret(-1);
    };
    match process.lock().files.insert(file) {
        Some(fd) => ret(fd.as_i32()),
        None => {
            debug!("open: file table of {} is full", process.tid());
            ret(-1)
        }
    }
}

fn sys_filesize(process: &Process, fd: i32) -> SyscallResult {
    let length = with_file(process, fd, |file| file.length())?;
    ret(length.map_or(-1, |len| len as i32))
}

fn sys_read(kernel: &Kernel, process: &Process, fd: i32, buf: VirtAddr, len: u32) -> SyscallResult {
    let buffer = UserBuffer::validate(pagedir(&process.lock())?, buf, len)?;

    match Fd::new(fd) {
        Fd::STDIN => {
            let mut input = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let byte = match kernel.console().getc() {
                    b'\r' => b'\n',
                    byte => byte,
                };
                kernel.console().put(&[byte]);
                input.push(byte);
            }
            let mut inner = process.lock();
            let dir = inner.pagedir.as_mut().ok_or(SyscallError::NoProcess)?;
            buffer.copy_out(dir, &input)?;
            ret(len as i32)
        }
        Fd::STDOUT => ret(-1),
        _ => {
            let mut inner = process.lock();
            let ProcessInner { pagedir, files, .. } = &mut *inner;
            let file = match files.get_mut(Fd::new(fd)) {
                Ok(file) => file,
                Err(FdError::Closed) => return ret(-1),
                Err(FdError::OutOfRange) => return Err(SyscallError::BadDescriptor(fd)),
            };
            let mut data = vec![0u8; len as usize];
            let n = file.read(&mut data);
            let dir = pagedir.as_mut().ok_or(SyscallError::NoProcess)?;
            buffer.copy_out(dir, &data[..n])?;
            ret(n as i32)
        }
    }
}

fn sys_write(kernel: &Kernel, process: &Process, fd: i32, buf: VirtAddr, len: u32) -> SyscallResult {
    let data = {
        let inner = process.lock();
        let dir = pagedir(&inner)?;
        UserBuffer::validate(dir, buf, len)?.copy_in(dir)?
    };

    match Fd::new(fd) {
        Fd::STDOUT => {
            kernel.console().put(&data);
            ret(len as i32)
        }
        Fd::STDIN => ret(-1),
        _ => {
            let written = with_file(process, fd, |file| file.write(&data))?;
            ret(written.map_or(-1, |n| n as i32))
        }
    }
}

fn sys_seek(process: &Process, fd: i32, pos: u32) -> SyscallResult {
    with_file(process, fd, |file| {
        // Positions past the end are ignored.
        if pos <= file.length() {
            file.seek(pos);
        }
    })?;
    Ok(None)
}

fn sys_tell(process: &Process, fd: i32) -> SyscallResult {
    let pos = with_file(process, fd, |file| file.tell())?;
    ret(pos.map_or(-1, |pos| pos as i32))
}

fn sys_close(process: &Process, fd: i32) -> SyscallResult {
    let removed = process.lock().files.remove(Fd::new(fd));
    match removed {
        Ok(file) => drop(file),
        Err(FdError::Closed) => {}
        Err(FdError::OutOfRange) => return Err(SyscallError::BadDescriptor(fd)),
    }
    Ok(None)
}

fn sys_sleep(kernel: &Kernel, millis: i32) -> SyscallResult {
    if let Ok(millis @ 1..) = u32::try_from(millis) {
        kernel.scheduler().sleep(millis);
    }
    Ok(None)
}
