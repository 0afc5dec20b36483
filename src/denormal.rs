//! Scoped flush-to-zero floating-point mode
//!
//! Long release tails decay into subnormal floats, which are very slow on
//! some FPUs. [`DenormalGuard`] switches the current thread's FPU to flush
//! subnormals to zero and restores the previous mode when dropped.

use std::marker::PhantomData;

/// Flush-to-zero for the current thread while alive
///
/// The FPU control register is per-thread, so the guard is not `Send`.
pub struct DenormalGuard {
    saved: usize,
    _not_send: PhantomData<*const ()>,
}

impl DenormalGuard {
    pub fn new() -> Self {
        let saved = imp::read();
        imp::write(saved | imp::FLUSH_BITS);
        Self {
            saved,
            _not_send: PhantomData,
        }
    }
}

impl Default for DenormalGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DenormalGuard {
    fn drop(&mut self) {
        imp::write(self.saved);
    }
}

#[cfg(target_arch = "x86_64")]
mod imp {
    use std::arch::asm;

    /// MXCSR flush-to-zero (bit 15) and denormals-are-zero (bit 6)
    pub const FLUSH_BITS: usize = 0x8040;

    pub fn read() -> usize {
        let mut csr: u32 = 0;
        // SAFETY: stores the 32-bit MXCSR into a local.
        unsafe {
            asm!("stmxcsr [{}]", in(reg) &mut csr as *mut u32, options(nostack, preserves_flags));
        }
        csr as usize
    }

    pub fn write(value: usize) {
        let csr = value as u32;
        // SAFETY: only the rounding/exception-mask/flush bits are ever changed.
        unsafe {
            asm!(
                "ldmxcsr [{}]",
                in(reg) &csr as *const u32,
                options(nostack, readonly, preserves_flags)
            );
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod imp {
    use std::arch::asm;

    /// FPCR flush-to-zero (bit 24)
    pub const FLUSH_BITS: usize = 1 << 24;

    pub fn read() -> usize {
        let fpcr: u64;
        // SAFETY: reading FPCR has no side effects.
        unsafe {
            asm!("mrs {}, fpcr", out(reg) fpcr, options(nomem, nostack, preserves_flags));
        }
        fpcr as usize
    }

    pub fn write(value: usize) {
        // SAFETY: only the flush bit differs from the value read earlier.
        unsafe {
            asm!("msr fpcr, {}", in(reg) value as u64, options(nomem, nostack, preserves_flags));
        }
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod imp {
    pub const FLUSH_BITS: usize = 0;

    pub fn read() -> usize {
        0
    }

    pub fn write(_value: usize) {}
}
