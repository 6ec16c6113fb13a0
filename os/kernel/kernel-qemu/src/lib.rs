//! # QEMU Debug Console Output
//!
//! Host-visible output for a kernel running under QEMU, through the
//! `isa-debugcon` device on I/O port `0x402`.
//!
//! ```text
//! log::info!(..) ─► QemuLogger ─► qemu_trace! ─► QemuSink ─► out 0x402 ─► -debugcon
//! ```
//!
//! ## Components
//! * [`QemuLogger`]: a `log::Log` backend printing `[LEVEL] target: message`
//!   lines, filtered by a maximum level.
//! * [`qemu_trace!`]: raw `format_args!`-style output without the logging
//!   framework, usable before the logger is installed.
//!
//! ## Features
//! * `enabled` (default): port writes are compiled in on x86 targets. Without
//!   it, or on any other architecture, output is discarded.
//!
//! ## Host side
//! ```bash
//! qemu-system-i386 -kernel kernel.elf -debugcon stdio
//! ```
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.init().ok();
//! info!("kernel state ready");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[cfg(all(feature = "enabled", any(target_arch = "x86", target_arch = "x86_64")))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The port number for QEMU's debug port.
    const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single byte to QEMU's debug port.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        unsafe { outb(QEMU_DEBUG_PORT, c) }
    }

    #[allow(clippy::inline_always)]
    #[inline(always)]
    unsafe fn outb(port: u16, val: u8) {
        unsafe {
            core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") val,
            options(nomem, nostack, preserves_flags)
            );
        }
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best effort; the port cannot fail.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(all(feature = "enabled", any(target_arch = "x86", target_arch = "x86_64"))))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// Write `format_args!`-style output straight to the debug console.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
