//! Interrupt-safe spinlock.
//!
//! `Pool::free` may run from interrupt/completion context (e.g. as the tail
//! end of eviction I/O), so the lock protecting pool state must disable
//! local interrupt delivery on acquire and restore the prior state on
//! release — a plain spinlock is not enough on its own. This wraps
//! `spinning_top::Spinlock` (the lock `kasumi`'s kernel crate already uses
//! for `CHUNK_ALLOC`/`HEAP_ALLOC`) with that interrupt masking.
//!
//! The actual interrupt control is behind a tiny platform seam so the crate
//! builds and tests on a hosted target: on a freestanding `x86_64` kernel
//! target it really does `cli`/`pushf`+`popf`-equivalent masking via the
//! `x86_64` crate (`cli`/`sti` are privileged instructions and would fault
//! under a hosted OS); everywhere else (host tests, `loom` model checking)
//! it's a no-op, mirroring how `kernel_algo` itself splits its atomics on
//! `#[cfg(loom)]`.

use core::ops::{Deref, DerefMut};

#[cfg(not(loom))]
use spinning_top::guard::SpinlockGuard as InnerGuard;
#[cfg(not(loom))]
use spinning_top::Spinlock as Inner;

#[cfg(loom)]
use loom::sync::Mutex as Inner;
#[cfg(loom)]
use loom::sync::MutexGuard as InnerGuard;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod platform {
    pub fn are_interrupts_enabled() -> bool {
        x86_64::instructions::interrupts::are_enabled()
    }

    pub fn disable_interrupts() {
        x86_64::instructions::interrupts::disable();
    }

    pub fn enable_interrupts() {
        x86_64::instructions::interrupts::enable();
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod platform {
    pub fn are_interrupts_enabled() -> bool {
        false
    }

    pub fn disable_interrupts() {}

    pub fn enable_interrupts() {}
}

/// A spinlock that disables interrupt delivery on the current core for the
/// duration of the critical section.
///
/// Under `#[cfg(loom)]` the backing primitive switches from
/// `spinning_top::Spinlock` to `loom::sync::Mutex`, the same way
/// `kernel_algo`'s tree allocator switches its atomic words: loom has no
/// concept of a spin loop, so model-checking the lock itself means handing
/// the critical section to loom's own tracked `Mutex` instead.
pub struct IrqLock<T> {
    inner: Inner<T>,
}

impl<T> IrqLock<T> {
    #[cfg(not(loom))]
    pub const fn new(val: T) -> Self {
        Self { inner: Inner::new(val) }
    }

    #[cfg(loom)]
    pub fn new(val: T) -> Self {
        Self { inner: Inner::new(val) }
    }

    pub fn lock(&self) -> IrqGuard<'_, T> {
        let was_enabled = platform::are_interrupts_enabled();
        platform::disable_interrupts();

        #[cfg(not(loom))]
        let guard = self.inner.lock();
        #[cfg(loom)]
        let guard = self.inner.lock().expect("lock poisoned");

        IrqGuard { guard, restore_interrupts: was_enabled }
    }
}

/// RAII guard returned by [`IrqLock::lock`]. Restores the interrupt-enable
/// state observed at acquisition time when dropped.
pub struct IrqGuard<'a, T> {
    guard: InnerGuard<'a, T>,
    restore_interrupts: bool,
}

impl<T> Deref for IrqGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqGuard<'_, T> {
    fn drop(&mut self) {
        if self.restore_interrupts {
            platform::enable_interrupts();
        }
    }
}
