//! # Kernel Entry Point
//!
//! A Multiboot (v1) image for `qemu-system-i386 -kernel`:
//!
//! 1. `_start` runs at the physical load address with paging off. It loads a
//!    boot directory that maps the first 8 MiB both identically and at
//!    `KERNEL_BASE` using 4 MiB pages, enables paging and jumps into the
//!    higher half.
//! 2. [`kernel_entry`] runs on the boot stack, reads the memory size from the
//!    Multiboot info block, brings up the global heap and the logger, and
//!    boots the [`KernelState`].
//! 3. Two demo threads run under the scheduler; once both have terminated
//!    the boot flow resumes in the idle context and halts.

#![no_std]
#![no_main]
#![allow(unsafe_code)]

use buddy_system_allocator::LockedHeap;
use core::cell::UnsafeCell;
use kernel::platform::x86::X86Platform;
use kernel::{KernelState, ProcessId};
use kernel_info::config::KernelConfig;
use kernel_info::memory::KERNEL_BASE;
use kernel_memory_addresses::pages_for;
use kernel_qemu::{QemuLogger, qemu_trace};
use kernel_registers::instr;
use log::{LevelFilter, error, info, warn};

const MULTIBOOT_MAGIC: u32 = 0x1BAD_B002;
/// Page-align modules, provide memory information.
const MULTIBOOT_FLAGS: u32 = 0b11;
const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;
const MULTIBOOT_INFO_MEMORY: u32 = 1 << 0;

#[used]
#[unsafe(link_section = ".multiboot")]
static MULTIBOOT_HEADER: [u32; 3] = [
    MULTIBOOT_MAGIC,
    MULTIBOOT_FLAGS,
    0u32.wrapping_sub(MULTIBOOT_MAGIC.wrapping_add(MULTIBOOT_FLAGS)),
];

/// Frames mapped at `KERNEL_BASE` by the boot directory.
const WINDOW_FRAMES: u32 = (8 * 1024 * 1024) / 4096;

/// Present, writable, 4 MiB page.
const PDE_LARGE: u32 = 0x83;

#[repr(C, align(4096))]
struct BootDirectory([u32; 1024]);

const fn boot_directory() -> BootDirectory {
    let mut entries = [0u32; 1024];
    let kernel = (KERNEL_BASE >> 22) as usize;
    entries[0] = PDE_LARGE;
    entries[1] = 0x0040_0000 | PDE_LARGE;
    entries[kernel] = PDE_LARGE;
    entries[kernel + 1] = 0x0040_0000 | PDE_LARGE;
    BootDirectory(entries)
}

/// Lives at its physical address so `_start` can load it before paging.
#[unsafe(link_section = ".boot.data")]
static BOOT_DIRECTORY: BootDirectory = boot_directory();

const BOOT_STACK_SIZE: usize = 64 * 1024;

#[repr(C, align(16))]
struct Aligned<const N: usize>([u8; N]);

#[unsafe(no_mangle)]
static mut BOOT_STACK: Aligned<BOOT_STACK_SIZE> = Aligned([0; BOOT_STACK_SIZE]);

/// Backing store of the global allocator used by `alloc` collections.
const HEAP_SIZE: usize = 1024 * 1024;
static mut HEAP_SPACE: Aligned<HEAP_SIZE> = Aligned([0; HEAP_SIZE]);

#[global_allocator]
static HEAP: LockedHeap = LockedHeap::empty();

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);

unsafe extern "C" {
    /// End of the loaded image (virtual), from the linker script.
    static __kernel_end: u8;
}

/// The kernel state, reachable from thread entry points.
struct KernelCell(UnsafeCell<Option<KernelState<X86Platform>>>);

// SAFETY: one CPU; every access happens with the state's own IRQ guards.
unsafe impl Sync for KernelCell {}

static KERNEL: KernelCell = KernelCell(UnsafeCell::new(None));

/// # Safety
/// No other reference to the state may be used concurrently. Threads only
/// touch it between context switches.
unsafe fn kernel() -> Option<&'static mut KernelState<X86Platform>> {
    unsafe { (*KERNEL.0.get()).as_mut() }
}

/// Multiboot entry: 32-bit protected mode, paging off, interrupts off.
/// `eax` holds the bootloader magic, `ebx` the physical info address.
#[unsafe(no_mangle)]
#[unsafe(naked)]
#[unsafe(link_section = ".boot.text")]
pub extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "cli",
        // Mask both PICs; nothing handles IRQs yet.
        "mov cl, 0xFF",
        "xchg eax, ecx",
        "out 0x21, al",
        "out 0xA1, al",
        "xchg eax, ecx",

        "mov ecx, offset {directory}",
        "mov cr3, ecx",
        // CR4.PSE
        "mov ecx, cr4",
        "or ecx, 0x10",
        "mov cr4, ecx",
        // CR0.PG | CR0.WP
        "mov ecx, cr0",
        "or ecx, 0x80010000",
        "mov cr0, ecx",

        "mov esp, offset {stack}",
        "add esp, {stack_size}",
        "xor ebp, ebp",
        "push ebx",
        "push eax",
        "mov ecx, offset {entry}",
        "call ecx",
        "2:",
        "hlt",
        "jmp 2b",
        directory = sym BOOT_DIRECTORY,
        stack = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        entry = sym kernel_entry,
    );
}

#[repr(C)]
struct MultibootInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
}

/// Physical frames reported by the bootloader, if it reported any.
fn detect_frames(magic: u32, info_pa: u32) -> Option<u32> {
    if magic != MULTIBOOT_BOOTLOADER_MAGIC {
        warn!("boot: bad multiboot magic {magic:#010x}");
        return None;
    }
    if info_pa >= WINDOW_FRAMES * 4096 {
        warn!("boot: multiboot info at {info_pa:#010x} outside the boot window");
        return None;
    }
    let info = (KERNEL_BASE + info_pa) as *const MultibootInfo;
    // SAFETY: inside the boot window; the bootloader keeps the block intact.
    let info = unsafe { info.read_volatile() };
    if info.flags & MULTIBOOT_INFO_MEMORY == 0 {
        return None;
    }
    // `mem_upper` counts KiB above 1 MiB.
    Some((1024 + info.mem_upper) / 4)
}

#[unsafe(no_mangle)]
extern "C" fn kernel_entry(magic: u32, info_pa: u32) -> ! {
    qemu_trace!("Kernel reporting to QEMU!\n");

    // SAFETY: runs once, before anything allocates.
    unsafe {
        let start = (&raw mut HEAP_SPACE).cast::<u8>() as usize;
        HEAP.lock().init(start, HEAP_SIZE);
    }
    if LOGGER.init().is_err() {
        qemu_trace!("logger already installed\n");
    }

    let defaults = KernelConfig::default();
    let image_end = (&raw const __kernel_end) as usize;
    #[allow(clippy::cast_possible_truncation)]
    let image_bytes = (image_end as u32).wrapping_sub(KERNEL_BASE);
    let config = KernelConfig {
        frame_count: detect_frames(magic, info_pa).unwrap_or(defaults.frame_count),
        reserved_frames: pages_for(image_bytes),
        kernel_image_frames: WINDOW_FRAMES,
        ..defaults
    };
    info!("boot: {config:?}");

    // SAFETY: ring 0 with the boot window mapped.
    let platform = unsafe { X86Platform::new(WINDOW_FRAMES) };
    match KernelState::boot(config, platform) {
        Ok(state) => {
            // SAFETY: no thread exists yet.
            unsafe { *KERNEL.0.get() = Some(state) };
        }
        Err(e) => {
            error!("boot: {e}");
            halt_forever();
        }
    }

    // SAFETY: only this flow runs until the first switch.
    let Some(k) = (unsafe { kernel() }) else {
        halt_forever();
    };
    if let Err(e) = spawn_demo(k) {
        error!("boot: cannot start demo threads: {e}");
        halt_forever();
    }

    // Returns once every thread has terminated.
    k.schedule();
    info!("boot: all threads finished");
    halt_forever();
}

type ThreadEntry = extern "C" fn() -> !;

#[allow(clippy::cast_possible_truncation)]
fn entry_address(entry: ThreadEntry) -> u32 {
    entry as usize as u32
}

fn spawn_demo(k: &mut KernelState<X86Platform>) -> Result<ProcessId, kernel::KernelError> {
    let process = k.create_process("demo", 1)?;
    k.create_thread(process, entry_address(worker_high), 2)?;
    k.create_thread(process, entry_address(worker_low), 0)?;
    Ok(process)
}

extern "C" fn worker_high() -> ! {
    info!("worker: high priority thread running");
    exit_current()
}

extern "C" fn worker_low() -> ! {
    info!("worker: low priority thread running");
    exit_current()
}

fn exit_current() -> ! {
    // SAFETY: the boot flow is parked inside `schedule`.
    if let Some(k) = unsafe { kernel() }
        && let Some(me) = k.current_thread()
        && let Err(e) = k.terminate_thread(me)
    {
        error!("worker: cannot terminate {me:?}: {e}");
    }
    halt_forever()
}

fn halt_forever() -> ! {
    loop {
        // SAFETY: ring 0.
        unsafe {
            instr::cli();
            instr::hlt();
        }
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    qemu_trace!("kernel panic: {info}\n");
    halt_forever()
}
