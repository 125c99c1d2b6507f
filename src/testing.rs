//! Hosted test doubles.
//!
//! - [`TestScheduler`]: one `std::thread` per kernel thread; `exit_thread`
//!   unwinds to the thread's entry with a private payload
//! - [`TestMachine`]: "enters user mode" by running a Rust closure
//!   registered for the entry address
//! - [`TestConsole`], [`MemFs`], [`MemFile`]: capturing console and an
//!   in-memory filesystem
//! - [`ElfBuilder`]: assembles ELF32 executables
//! - [`Harness`]: wires them into a [`Kernel`] with the test thread as root

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::string::String;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::Thread;
use std::time::{Duration, Instant};
use std::vec::Vec;

use crate::config::Config;
use crate::elf::{SegmentKind, EHDR_SIZE, PF_R, PF_W, PF_X, PHDR_SIZE};
use crate::kernel::{Kernel, Services};
use crate::mm::address::{PAGE_SIZE, PHYS_BASE};
use crate::mm::{PageRoot, VirtAddr};
use crate::platform::{Console, File, FileSystem, Machine, Scheduler, ThreadEntry, Tid, UserEntry};
use crate::process::Process;
use crate::syscall::Sysno;
use crate::trap::TrapFrame;

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

thread_local! {
    static CURRENT: Cell<Option<Tid>> = const { Cell::new(None) };
}

/// Unwind payload used to end a kernel thread.
struct ThreadExit;

type Threads = Arc<Mutex<BTreeMap<Tid, Thread>>>;

pub struct TestScheduler {
    next_tid: AtomicI32,
    fail_spawn: AtomicBool,
    powered_off: AtomicBool,
    sleeps: Mutex<Vec<u32>>,
    threads: Threads,
    blocks: AtomicUsize,
}

impl TestScheduler {
    pub fn new() -> Self {
        Self {
            next_tid: AtomicI32::new(1),
            fail_spawn: AtomicBool::new(false),
            powered_off: AtomicBool::new(false),
            sleeps: Mutex::new(Vec::new()),
            threads: Arc::new(Mutex::new(BTreeMap::new())),
            blocks: AtomicUsize::new(0),
        }
    }

    /// Number of `block` calls so far.
    pub fn blocks(&self) -> usize {
        self.blocks.load(Ordering::SeqCst)
    }

    /// Make the next `spawn` fail.
    pub fn fail_next_spawn(&self) {
        self.fail_spawn.store(true, Ordering::SeqCst);
    }

    pub fn powered_off(&self) -> bool {
        self.powered_off.load(Ordering::SeqCst)
    }

    pub fn sleeps(&self) -> Vec<u32> {
        self.sleeps.lock().unwrap().clone()
    }

    fn allocate_tid(&self) -> Tid {
        Tid::new(self.next_tid.fetch_add(1, Ordering::SeqCst))
    }
}

impl Scheduler for TestScheduler {
    fn spawn(&self, name: &str, entry: ThreadEntry) -> Option<Tid> {
        if self.fail_spawn.swap(false, Ordering::SeqCst) {
            return None;
        }
        let tid = self.allocate_tid();
        let threads = self.threads.clone();
        std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                CURRENT.with(|current| current.set(Some(tid)));
                threads.lock().unwrap().insert(tid, std::thread::current());
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
                    if !payload.is::<ThreadExit>() {
                        panic::resume_unwind(payload);
                    }
                }
            })
            .ok()?;
        Some(tid)
    }

    fn current(&self) -> Tid {
        CURRENT.with(|current| match current.get() {
            Some(tid) => tid,
            None => {
                let tid = self.allocate_tid();
                current.set(Some(tid));
                self.threads.lock().unwrap().insert(tid, std::thread::current());
                tid
            }
        })
    }

    fn block(&self) {
        self.blocks.fetch_add(1, Ordering::SeqCst);
        std::thread::park();
    }

    fn unblock(&self, tid: Tid) {
        if let Some(thread) = self.threads.lock().unwrap().get(&tid) {
            thread.unpark();
        }
    }

    fn sleep(&self, millis: u32) {
        self.sleeps.lock().unwrap().push(millis);
        std::thread::sleep(Duration::from_millis(millis.into()));
    }

    fn exit_thread(&self) -> ! {
        panic::resume_unwind(Box::new(ThreadExit))
    }

    fn power_off(&self) -> ! {
        self.powered_off.store(true, Ordering::SeqCst);
        panic::resume_unwind(Box::new(ThreadExit))
    }
}

// ---------------------------------------------------------------------------
// Console and filesystem
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TestConsole {
    output: Mutex<Vec<u8>>,
    input: Mutex<VecDeque<u8>>,
}

impl TestConsole {
    /// Queue keyboard input.
    pub fn feed(&self, bytes: &[u8]) {
        self.input.lock().unwrap().extend(bytes);
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output.lock().unwrap()).into_owned()
    }
}

impl Console for TestConsole {
    fn put(&self, bytes: &[u8]) {
        self.output.lock().unwrap().extend_from_slice(bytes);
    }

    fn getc(&self) -> u8 {
        loop {
            if let Some(byte) = self.input.lock().unwrap().pop_front() {
                return byte;
            }
            std::thread::yield_now();
        }
    }
}

type Contents = Arc<Mutex<Vec<u8>>>;

/// An open in-memory file. Writes never grow the file.
pub struct MemFile {
    data: Contents,
    pos: u32,
}

impl MemFile {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self::shared(Arc::new(Mutex::new(bytes)))
    }

    fn shared(data: Contents) -> Self {
        Self { data, pos: 0 }
    }
}

impl File for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let data = self.data.lock().unwrap();
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u32;
        n
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let mut data = self.data.lock().unwrap();
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        data[start..start + n].copy_from_slice(&buf[..n]);
        self.pos += n as u32;
        n
    }

    fn seek(&mut self, pos: u32) {
        self.pos = pos;
    }

    fn tell(&self) -> u32 {
        self.pos
    }

    fn length(&self) -> u32 {
        self.data.lock().unwrap().len() as u32
    }
}

#[derive(Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<String, Contents>>,
}

impl MemFs {
    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(name.into(), Arc::new(Mutex::new(bytes)));
    }

    /// Open handles on `name`.
    pub fn open_handles(&self, name: &str) -> usize {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .map_or(0, |data| Arc::strong_count(data) - 1)
    }
}

impl FileSystem for MemFs {
    fn open(&self, name: &str) -> Option<Box<dyn File>> {
        let data = self.files.lock().unwrap().get(name)?.clone();
        Some(Box::new(MemFile::shared(data)))
    }

    fn create(&self, name: &str, initial_size: u32) -> bool {
        let mut files = self.files.lock().unwrap();
        if name.is_empty() || files.contains_key(name) {
            return false;
        }
        files.insert(name.into(), Arc::new(Mutex::new(vec![0; initial_size as usize])));
        true
    }

    fn remove(&self, name: &str) -> bool {
        self.files.lock().unwrap().remove(name).is_some()
    }
}

// ---------------------------------------------------------------------------
// Machine and simulated user mode
// ---------------------------------------------------------------------------

/// Body of a simulated user program; returns its exit status.
pub type Program = Arc<dyn Fn(&mut UserContext) -> i32 + Send + Sync>;

#[derive(Default)]
pub struct TestMachine {
    kernel: OnceLock<Weak<Kernel>>,
    programs: Mutex<BTreeMap<u32, Program>>,
    activations: Mutex<Vec<Option<PageRoot>>>,
    entries: Mutex<Vec<UserEntry>>,
}

impl TestMachine {
    pub fn attach(&self, kernel: &Arc<Kernel>) {
        let _ = self.kernel.set(Arc::downgrade(kernel));
    }

    pub fn install(&self, entry: u32, program: Program) {
        self.programs.lock().unwrap().insert(entry, program);
    }

    /// Every `activate` call, `None` for kernel-only.
    pub fn activations(&self) -> Vec<Option<PageRoot>> {
        self.activations.lock().unwrap().clone()
    }

    pub fn entries(&self) -> Vec<UserEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl Machine for TestMachine {
    fn activate(&self, root: Option<PageRoot>) {
        self.activations.lock().unwrap().push(root);
    }

    fn enter_user(&self, entry: UserEntry) -> ! {
        self.entries.lock().unwrap().push(entry);
        let kernel = self
            .kernel
            .get()
            .and_then(Weak::upgrade)
            .expect("machine not attached to a kernel");
        let program = self.programs.lock().unwrap().get(&entry.eip.as_u32()).cloned();

        match program {
            Some(program) => {
                let mut ctx = UserContext::new(kernel, entry.esp);
                let status = program(&mut ctx);
                ctx.exit(status)
            }
            None => {
                // Nothing mapped behind the entry point: fetching the first
                // instruction faults.
                let mut frame = TrapFrame::page_fault(entry.eip.as_u32(), 0b100, entry.eip.as_u32());
                kernel.handle_trap(&mut frame);
                unreachable!("user fault returned")
            }
        }
    }
}

/// What a user program can do: touch its own memory and trap into the kernel.
pub struct UserContext {
    kernel: Arc<Kernel>,
    esp: u32,
    scratch: u32,
}

impl UserContext {
    /// Words of the syscall frame sit just below the initial stack pointer;
    /// scratch data grows down below them.
    const FRAME_BYTES: u32 = 16;

    fn new(kernel: Arc<Kernel>, esp: VirtAddr) -> Self {
        let esp = esp.as_u32();
        Self {
            kernel,
            esp,
            scratch: esp - 2 * Self::FRAME_BYTES,
        }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    fn process(&self) -> Arc<Process> {
        self.kernel.current_process().expect("not running as a process")
    }

    pub fn poke(&self, addr: u32, bytes: &[u8]) {
        let process = self.process();
        let mut inner = process.lock();
        inner
            .pagedir
            .as_mut()
            .unwrap()
            .write(VirtAddr::new(addr), bytes)
            .unwrap();
    }

    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut out = vec![0; len];
        let process = self.process();
        let inner = process.lock();
        inner
            .pagedir
            .as_ref()
            .unwrap()
            .read(VirtAddr::new(addr), &mut out)
            .unwrap();
        out
    }

    fn peek_u32(&self, addr: u32) -> u32 {
        let bytes = self.peek(addr, 4);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Reserve `len` bytes of stack scratch space.
    fn alloc(&mut self, len: usize) -> u32 {
        self.scratch = (self.scratch - len as u32) & !3;
        assert!(self.scratch >= PHYS_BASE - PAGE_SIZE as u32, "scratch overflow");
        self.scratch
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> u32 {
        let at = self.alloc(bytes.len());
        self.poke(at, bytes);
        at
    }

    fn put_str(&mut self, s: &str) -> u32 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.put_bytes(&bytes)
    }

    /// Run `f` and release whatever scratch space it used.
    fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let mark = self.scratch;
        let result = f(self);
        self.scratch = mark;
        result
    }

    /// Command-line arguments as laid out on the initial stack.
    pub fn argv(&self) -> Vec<Vec<u8>> {
        let argc = self.peek_u32(self.esp + 4);
        let argv = self.peek_u32(self.esp + 8);
        (0..argc)
            .map(|i| {
                let mut at = self.peek_u32(argv + 4 * i);
                let mut arg = Vec::new();
                loop {
                    let byte = self.peek(at, 1)[0];
                    if byte == 0 {
                        break arg;
                    }
                    arg.push(byte);
                    at += 1;
                }
            })
            .collect()
    }

    /// Trap with the stack pointer at `esp`; returns `eax`.
    pub fn trap(&mut self, esp: u32) -> u32 {
        let mut frame = TrapFrame::syscall(esp);
        self.kernel.handle_trap(&mut frame);
        frame.eax
    }

    /// Push `number` and `args` and trap.
    pub fn syscall(&mut self, number: u32, args: &[u32]) -> u32 {
        let sp = self.esp - Self::FRAME_BYTES;
        let mut words = vec![number];
        words.extend_from_slice(args);
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.poke(sp, &bytes);
        self.trap(sp)
    }

    fn call(&mut self, sysno: Sysno, args: &[u32]) -> i32 {
        self.syscall(sysno as u32, args) as i32
    }

    pub fn halt(&mut self) -> ! {
        self.call(Sysno::Halt, &[]);
        unreachable!("halt returned")
    }

    pub fn exit(&mut self, status: i32) -> ! {
        self.call(Sysno::Exit, &[status as u32]);
        unreachable!("exit returned")
    }

    pub fn exec(&mut self, cmd_line: &str) -> i32 {
        self.scoped(|ctx| {
            let s = ctx.put_str(cmd_line);
            ctx.call(Sysno::Exec, &[s])
        })
    }

    pub fn wait(&mut self, pid: i32) -> i32 {
        self.call(Sysno::Wait, &[pid as u32])
    }

    pub fn create(&mut self, name: &str, size: u32) -> bool {
        self.scoped(|ctx| {
            let s = ctx.put_str(name);
            ctx.call(Sysno::Create, &[s, size]) != 0
        })
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.scoped(|ctx| {
            let s = ctx.put_str(name);
            ctx.call(Sysno::Remove, &[s]) != 0
        })
    }

    pub fn open(&mut self, name: &str) -> i32 {
        self.scoped(|ctx| {
            let s = ctx.put_str(name);
            ctx.call(Sysno::Open, &[s])
        })
    }

    pub fn filesize(&mut self, fd: i32) -> i32 {
        self.call(Sysno::Filesize, &[fd as u32])
    }

    /// Read up to `len` bytes; returns the result and the bytes read.
    pub fn read(&mut self, fd: i32, len: usize) -> (i32, Vec<u8>) {
        self.scoped(|ctx| {
            let buf = ctx.alloc(len.max(1));
            let n = ctx.call(Sysno::Read, &[fd as u32, buf, len as u32]);
            let got = if n > 0 { ctx.peek(buf, n as usize) } else { Vec::new() };
            (n, got)
        })
    }

    pub fn write(&mut self, fd: i32, bytes: &[u8]) -> i32 {
        self.scoped(|ctx| {
            let buf = ctx.put_bytes(bytes);
            ctx.call(Sysno::Write, &[fd as u32, buf, bytes.len() as u32])
        })
    }

    pub fn seek(&mut self, fd: i32, pos: u32) {
        self.call(Sysno::Seek, &[fd as u32, pos]);
    }

    pub fn tell(&mut self, fd: i32) -> i32 {
        self.call(Sysno::Tell, &[fd as u32])
    }

    pub fn close(&mut self, fd: i32) {
        self.call(Sysno::Close, &[fd as u32]);
    }

    pub fn sleep(&mut self, millis: i32) {
        self.call(Sysno::Sleep, &[millis as u32]);
    }
}

// ---------------------------------------------------------------------------
// ELF images
// ---------------------------------------------------------------------------

struct SegmentSpec {
    kind: u32,
    /// Explicit file offset, or `None` to place `data` automatically.
    offset: Option<u32>,
    vaddr: u32,
    filesz: u32,
    memsz: u32,
    flags: u32,
    data: Vec<u8>,
}

/// Builds little-endian i386 executables with program headers right after
/// the executable header and segment data on later pages.
pub struct ElfBuilder {
    entry: u32,
    segments: Vec<SegmentSpec>,
}

const fn page_round_up(n: usize) -> usize {
    (n + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    /// A loadable segment holding `data`, zero-filled up to `memsz`.
    pub fn segment(mut self, vaddr: u32, data: &[u8], memsz: u32, writable: bool) -> Self {
        let flags = if writable { PF_R | PF_W } else { PF_R | PF_X };
        self.segments.push(SegmentSpec {
            kind: SegmentKind::Load.into(),
            offset: None,
            vaddr,
            filesz: data.len() as u32,
            memsz,
            flags,
            data: data.to_vec(),
        });
        self
    }

    /// A program header with arbitrary fields and no data.
    pub fn raw_segment(mut self, kind: SegmentKind, offset: u32, vaddr: u32, filesz: u32, memsz: u32) -> Self {
        self.segments.push(SegmentSpec {
            kind: kind.into(),
            offset: Some(offset),
            vaddr,
            filesz,
            memsz,
            flags: PF_R,
            data: Vec::new(),
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut image = vec![0u8; EHDR_SIZE + PHDR_SIZE * phnum];

        image[..7].copy_from_slice(b"\x7fELF\x01\x01\x01");
        put16(&mut image, 16, 2); // ET_EXEC
        put16(&mut image, 18, 3); // EM_386
        put32(&mut image, 20, 1);
        put32(&mut image, 24, self.entry);
        put32(&mut image, 28, EHDR_SIZE as u32);
        put16(&mut image, 40, EHDR_SIZE as u16);
        put16(&mut image, 42, PHDR_SIZE as u16);
        put16(&mut image, 44, phnum as u16);
        put16(&mut image, 46, 40);

        let mut cursor = page_round_up(image.len());
        for (i, seg) in self.segments.iter().enumerate() {
            let offset = match seg.offset {
                Some(offset) => offset,
                None => {
                    let offset = cursor + (seg.vaddr as usize & (PAGE_SIZE - 1));
                    let end = offset + seg.data.len();
                    if image.len() < end {
                        image.resize(end, 0);
                    }
                    image[offset..end].copy_from_slice(&seg.data);
                    cursor = page_round_up(end);
                    offset as u32
                }
            };

            let at = EHDR_SIZE + PHDR_SIZE * i;
            for (j, word) in [
                seg.kind,
                offset,
                seg.vaddr,
                seg.vaddr,
                seg.filesz,
                seg.memsz,
                seg.flags,
                PAGE_SIZE as u32,
            ]
            .into_iter()
            .enumerate()
            {
                put32(&mut image, at + 4 * j, word);
            }
        }
        image
    }
}

fn put16(image: &mut [u8], at: usize, value: u16) {
    image[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put32(image: &mut [u8], at: usize, value: u32) {
    image[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Where harness programs put their one text page.
const TEXT_BASE: u32 = 0x0804_8000;

pub struct Harness {
    pub kernel: Arc<Kernel>,
    pub scheduler: Arc<TestScheduler>,
    pub machine: Arc<TestMachine>,
    pub console: Arc<TestConsole>,
    pub fs: Arc<MemFs>,
    pub root: Arc<Process>,
    next_entry: AtomicU32,
    entries: Mutex<BTreeMap<String, u32>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let scheduler = Arc::new(TestScheduler::new());
        let machine = Arc::new(TestMachine::default());
        let console = Arc::new(TestConsole::default());
        let fs = Arc::new(MemFs::default());

        let kernel = Kernel::new(
            config,
            Services {
                scheduler: scheduler.clone(),
                machine: machine.clone(),
                console: console.clone(),
                filesystem: fs.clone(),
            },
        );
        machine.attach(&kernel);
        let root = kernel.init_root("main");

        Self {
            kernel,
            scheduler,
            machine,
            console,
            fs,
            root,
            next_entry: AtomicU32::new(TEXT_BASE),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Install an executable named `name` without any program behind it.
    pub fn image_only(&self, name: &str) -> u32 {
        let entry = self.next_entry.fetch_add(4, Ordering::SeqCst);
        let image = ElfBuilder::new(entry)
            .segment(TEXT_BASE, &[0xf4; 16], 0x100, false)
            .build();
        self.fs.insert(name, image);
        self.entries.lock().unwrap().insert(name.into(), entry);
        entry
    }

    /// Install an executable named `name` that runs `body` in user mode.
    pub fn program(&self, name: &str, body: impl Fn(&mut UserContext) -> i32 + Send + Sync + 'static) {
        let entry = self.image_only(name);
        self.machine.install(entry, Arc::new(body));
    }

    pub fn entry_of(&self, name: &str) -> VirtAddr {
        VirtAddr::new(self.entries.lock().unwrap()[name])
    }

    pub fn output(&self) -> String {
        self.console.output()
    }

    /// Spin until `cond` holds; panics after a few seconds.
    pub fn wait_until(&self, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::yield_now();
        }
    }
}
