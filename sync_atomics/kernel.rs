// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The 32-bit compare-and-exchange every emulated primitive is built on.

use core::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

/// System call number of `atomic_cmpxchg_32` on m68k Linux.
#[cfg(all(target_arch = "m68k", target_os = "linux"))]
const NR_ATOMIC_CMPXCHG_32: u32 = 335;

/// A 32-bit compare-and-exchange primitive.
///
/// This is the only synchronisation the emulated operations rely on: every
/// read-modify-write of a byte, halfword or word is expressed as a snapshot
/// [`load`] followed by [`cmpxchg`] attempts on the containing word.
///
/// [`load`]: Cmpxchg32::load
/// [`cmpxchg`]: Cmpxchg32::cmpxchg
pub trait Cmpxchg32 {
    /// Read the current value of `word`. The result is only used as the
    /// first guess of a compare-and-exchange loop, so it need not be ordered.
    ///
    /// # Safety
    ///
    /// `word` must be aligned to `u32` and valid for reads. That is 2 bytes
    /// on m68k, where the kernel helper accepts any even address.
    unsafe fn load(&self, word: NonNull<u32>) -> u32;

    /// Atomically store `replacement` into `word` if it currently holds
    /// `expected`. Always returns the value `word` held before the call, so
    /// the exchange succeeded iff the result equals `expected`.
    ///
    /// # Safety
    ///
    /// `word` must be aligned to `u32` and valid for reads and writes.
    unsafe fn cmpxchg(&self, word: NonNull<u32>, expected: u32, replacement: u32) -> u32;
}

/// The platform's compare-and-exchange.
///
/// - On m68k Linux this is the kernel's `atomic_cmpxchg_32` helper, entered
///   with `trap #0`. ColdFire cores dropped the `CAS` instruction, so the
///   kernel performs the exchange with preemption disabled.
/// - On bare-metal m68k it is a plain read, compare and conditional write,
///   which is only atomic on a uniprocessor without interrupts touching the
///   word.
/// - Everywhere else it is the hardware compare-and-exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Kernel;

impl Cmpxchg32 for Kernel {
    #[inline(always)]
    unsafe fn load(&self, word: NonNull<u32>) -> u32 {
        #[cfg(target_arch = "m68k")]
        {
            // SAFETY: caller guarantees word is aligned and readable.
            unsafe { word.as_ptr().read_volatile() }
        }

        #[cfg(not(target_arch = "m68k"))]
        {
            // SAFETY: caller guarantees word is aligned and readable; all
            // other accesses to it go through this root.
            unsafe { core::sync::atomic::AtomicU32::from_ptr(word.as_ptr()) }
                .load(Ordering::Relaxed)
        }
    }

    #[inline(always)]
    unsafe fn cmpxchg(&self, word: NonNull<u32>, expected: u32, replacement: u32) -> u32 {
        #[cfg(all(target_arch = "m68k", target_os = "linux"))]
        {
            let previous: u32;
            // SAFETY: the kernel validates the address and reports faults
            // through the usual signal path; the register assignment follows
            // the syscall ABI.
            unsafe {
                core::arch::asm!(
                    "trap #0",
                    inlateout("d0") NR_ATOMIC_CMPXCHG_32 => previous,
                    inlateout("d1") replacement => _,
                    in("d2") expected,
                    inlateout("a0") word.as_ptr() => _,
                    lateout("a1") _,
                    options(nostack)
                );
            }
            previous
        }

        #[cfg(all(target_arch = "m68k", not(target_os = "linux")))]
        {
            let ptr = word.as_ptr();
            // SAFETY: caller guarantees word is aligned, readable and
            // writable.
            unsafe {
                let current = ptr.read_volatile();
                if current == expected {
                    ptr.write_volatile(replacement);
                }
                current
            }
        }

        #[cfg(not(target_arch = "m68k"))]
        {
            // SAFETY: caller guarantees word is aligned, readable and
            // writable.
            let atomic = unsafe { core::sync::atomic::AtomicU32::from_ptr(word.as_ptr()) };
            match atomic.compare_exchange(expected, replacement, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(previous) | Err(previous) => previous,
            }
        }
    }
}

/// Wraps a compare-and-exchange root and counts how it is used.
///
/// Every call to [`Cmpxchg32::cmpxchg`] is an attempt; an attempt whose
/// result differs from the expected value is a failure, meaning another
/// writer changed the word between the snapshot and the exchange.
#[derive(Debug, Default)]
pub struct Counting<C> {
    inner: C,
    attempts: AtomicUsize,
    failures: AtomicUsize,
}

impl<C: Cmpxchg32> Counting<C> {
    pub const fn new(inner: C) -> Self {
        Self {
            inner,
            attempts: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Number of exchanges attempted so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Number of exchanges that lost a race and had to be retried.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: Cmpxchg32> Cmpxchg32 for Counting<C> {
    #[inline]
    unsafe fn load(&self, word: NonNull<u32>) -> u32 {
        // SAFETY: forwarded precondition.
        unsafe { self.inner.load(word) }
    }

    #[inline]
    unsafe fn cmpxchg(&self, word: NonNull<u32>, expected: u32, replacement: u32) -> u32 {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        // SAFETY: forwarded precondition.
        let previous = unsafe { self.inner.cmpxchg(word, expected, replacement) };
        if previous != expected {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        previous
    }
}

impl<C: Cmpxchg32 + ?Sized> Cmpxchg32 for &C {
    #[inline(always)]
    unsafe fn load(&self, word: NonNull<u32>) -> u32 {
        // SAFETY: forwarded precondition.
        unsafe { (**self).load(word) }
    }

    #[inline(always)]
    unsafe fn cmpxchg(&self, word: NonNull<u32>, expected: u32, replacement: u32) -> u32 {
        // SAFETY: forwarded precondition.
        unsafe { (**self).cmpxchg(word, expected, replacement) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmpxchg_returns_previous_value() {
        let mut cell = 7u32;
        let word = NonNull::from(&mut cell);

        // SAFETY: word points to a live, aligned u32.
        unsafe {
            assert_eq!(Kernel.load(word), 7);
            assert_eq!(Kernel.cmpxchg(word, 7, 9), 7, "matching exchange");
            assert_eq!(Kernel.cmpxchg(word, 7, 11), 9, "stale exchange");
            assert_eq!(Kernel.load(word), 9);
        }
        assert_eq!(cell, 9);
    }

    #[test]
    fn counting_tracks_failures() {
        let mut cell = 0u32;
        let word = NonNull::from(&mut cell);
        let root = Counting::new(Kernel);

        // SAFETY: word points to a live, aligned u32.
        unsafe {
            assert_eq!(root.cmpxchg(word, 0, 1), 0);
            assert_eq!(root.cmpxchg(word, 0, 2), 1);
            assert_eq!(root.cmpxchg(word, 1, 2), 1);
        }
        assert_eq!(root.attempts(), 3);
        assert_eq!(root.failures(), 1);
        assert_eq!(cell, 2);
    }
}
