//! # QEMU Debug Console Output
//!
//! Logging and raw tracing for the kernel when it runs under QEMU. Every
//! byte is written to QEMU's debug console port `0x402`; start QEMU with
//! `-debugcon stdio` (or `-debugcon file:debug.log`) to see it.
//!
//! * [`QemuLogger`] is a `log::Log` sink producing `[LEVEL] target: message`
//!   lines, so the memory core can use the plain `log` macros.
//! * [`qemu_trace!`] writes preformatted text with no level or target,
//!   for early boot before the logger is installed.
//!
//! With the `enabled` feature off, or on any target but 32-bit x86, all
//! output becomes a no-op while the formatting code stays testable.
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.init().expect("logger already installed");
//! info!("memory core up");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{QemuLogger, write_record};

#[cfg(all(feature = "enabled", target_arch = "x86"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The port number for QEMU's debug console.
    const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single byte to QEMU's debug port.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        // SAFETY: port 0x402 has no side effects beyond the debug console.
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(dbg_putc);
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best-effort debug output.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(all(feature = "enabled", target_arch = "x86")))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline]
    pub const fn qemu_write(_: fmt::Arguments) {}
}

/// Write `format!`-style text straight to the debug console.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
