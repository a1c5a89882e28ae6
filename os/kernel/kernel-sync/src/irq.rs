//! Interrupt masking for critical sections.
//!
//! On a 32-bit x86 kernel build (`asm` feature) the guard snapshots
//! `EFLAGS.IF` with `pushfd`/`pop`, executes `cli`, and re-enables with `sti`
//! on drop only if interrupts were enabled before. On every other build the
//! guard is inert, which is what host tests rely on.

/// Bit 9 of EFLAGS.
const EFLAGS_IF: u32 = 1 << 9;

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// # Examples
///
/// ```
/// use kernel_sync::InterruptGuard;
///
/// {
///     let _g = InterruptGuard::new();
///     // critical section
/// }
/// ```
pub struct InterruptGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptGuard {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = eflags() & EFLAGS_IF != 0;
        if enabled {
            disable();
        }
        Self {
            were_enabled: enabled,
        }
    }

    /// Whether interrupts were enabled when the guard was taken.
    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            enable();
        }
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
#[inline]
fn eflags() -> u32 {
    let r: u32;
    unsafe { core::arch::asm!("pushfd; pop {}", out(reg) r, options(preserves_flags)) }
    r
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
#[inline]
fn disable() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
#[inline]
fn enable() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
}

#[cfg(not(all(feature = "asm", target_arch = "x86")))]
#[inline]
const fn eflags() -> u32 {
    0
}

#[cfg(not(all(feature = "asm", target_arch = "x86")))]
#[inline]
const fn disable() {}

#[cfg(not(all(feature = "asm", target_arch = "x86")))]
#[inline]
const fn enable() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosted_guard_is_inert() {
        let g = InterruptGuard::new();
        assert!(!g.were_enabled());
    }
}
