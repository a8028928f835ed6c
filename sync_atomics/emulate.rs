// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Compare-and-exchange loops implementing the `__sync` primitives.
//!
//! Every function here shares one shape: take a snapshot of the containing
//! word, compute the replacement word from the snapshot, and try to exchange
//! it in. A failed exchange hands back the word's current value, which
//! becomes the next snapshot. Bits outside the target lane are always copied
//! from the snapshot, so neighbouring bytes or halfwords are never clobbered
//! even when other threads update them concurrently.
//!
//! # Safety
//!
//! All functions take a raw pointer to the target value and share the
//! precondition of [`Lane::of`]: `ptr` is aligned to `T`, and the word it
//! is exchanged through is valid for reads and writes. All concurrent
//! accesses to that word must go through the same [`Cmpxchg32`] root.

use core::ptr::NonNull;

use crate::{Cmpxchg32, Lane, Op, SyncStorage};

/// Run the retry loop, replacing the lane with `update(snapshot_word)`.
/// Returns the word before and after the successful exchange.
#[inline(always)]
unsafe fn update_lane(
    root: &impl Cmpxchg32,
    lane: Lane,
    update: impl Fn(u32) -> u32,
) -> (u32, u32) {
    let word = lane.word();
    // SAFETY: caller guarantees the word is valid.
    let mut current = unsafe { root.load(word) };
    loop {
        let old = current;
        let new = lane.merge(old, update(old));
        // SAFETY: caller guarantees the word is valid.
        current = unsafe { root.cmpxchg(word, old, new) };
        if current == old {
            return (old, new);
        }
    }
}

/// Atomically apply `op` with `val` to the value at `ptr`, returning the
/// value it held before.
///
/// # Safety
///
/// `ptr` must satisfy the requirements of [`Lane::of`], and every concurrent
/// access to its word must go through `root`.
#[inline]
pub unsafe fn fetch_and_op<T: SyncStorage>(
    root: &impl Cmpxchg32,
    ptr: NonNull<T>,
    op: Op,
    val: T,
) -> T {
    // SAFETY: caller guarantees ptr is aligned and its word valid.
    let lane = unsafe { Lane::of(ptr) };
    let operand = lane.insert(val.into_u32());
    // SAFETY: as above.
    let (old, _) = unsafe { update_lane(root, lane, |old| op.apply(old, operand)) };
    T::from_u32(lane.extract(old))
}

/// Atomically apply `op` with `val` to the value at `ptr`, returning the
/// value it holds afterwards.
///
/// # Safety
///
/// `ptr` must satisfy the requirements of [`Lane::of`], and every concurrent
/// access to its word must go through `root`.
#[inline]
pub unsafe fn op_and_fetch<T: SyncStorage>(
    root: &impl Cmpxchg32,
    ptr: NonNull<T>,
    op: Op,
    val: T,
) -> T {
    // SAFETY: caller guarantees ptr is aligned and its word valid.
    let lane = unsafe { Lane::of(ptr) };
    let operand = lane.insert(val.into_u32());
    // SAFETY: as above.
    let (_, new) = unsafe { update_lane(root, lane, |old| op.apply(old, operand)) };
    T::from_u32(lane.extract(new))
}

/// Atomically store `replacement` at `ptr` if it currently holds `expected`.
/// Returns the value observed at `ptr`; the swap happened iff that equals
/// `expected`.
///
/// # Safety
///
/// `ptr` must satisfy the requirements of [`Lane::of`], and every concurrent
/// access to its word must go through `root`.
#[inline]
pub unsafe fn val_compare_and_swap<T: SyncStorage>(
    root: &impl Cmpxchg32,
    ptr: NonNull<T>,
    expected: T,
    replacement: T,
) -> T {
    // SAFETY: caller guarantees ptr is aligned and its word valid.
    let lane = unsafe { Lane::of(ptr) };
    let word = lane.word();

    if T::BYTES == 4 {
        // SAFETY: as above.
        let previous = unsafe { root.cmpxchg(word, expected.into_u32(), replacement.into_u32()) };
        return T::from_u32(previous);
    }

    // A sub-word exchange can fail because a neighbouring lane changed, in
    // which case it must be retried; it only gives up once the lane itself
    // differs from `expected`.
    let expected = lane.insert(expected.into_u32());
    let replacement = lane.insert(replacement.into_u32());
    // SAFETY: as above.
    let mut current = unsafe { root.load(word) };
    let observed = loop {
        let old = current;
        if old & lane.mask() != expected {
            break old;
        }
        let new = (old & !lane.mask()) | replacement;
        // SAFETY: as above.
        current = unsafe { root.cmpxchg(word, old, new) };
        if current == old {
            break old;
        }
    };
    T::from_u32(lane.extract(observed))
}

/// Like [`val_compare_and_swap`] but reports only whether the swap happened.
///
/// # Safety
///
/// `ptr` must satisfy the requirements of [`Lane::of`], and every concurrent
/// access to its word must go through `root`.
#[inline]
pub unsafe fn bool_compare_and_swap<T: SyncStorage>(
    root: &impl Cmpxchg32,
    ptr: NonNull<T>,
    expected: T,
    replacement: T,
) -> bool {
    // SAFETY: forwarded precondition.
    unsafe { val_compare_and_swap(root, ptr, expected, replacement) == expected }
}

/// Atomically store `val` at `ptr`, returning the previous value.
///
/// This is the acquire half of a `__sync` spin lock; the matching release is
/// [`lock_release`].
///
/// # Safety
///
/// `ptr` must satisfy the requirements of [`Lane::of`], and every concurrent
/// access to its word must go through `root`.
#[inline]
pub unsafe fn lock_test_and_set<T: SyncStorage>(
    root: &impl Cmpxchg32,
    ptr: NonNull<T>,
    val: T,
) -> T {
    // SAFETY: caller guarantees ptr is aligned and its word valid.
    let lane = unsafe { Lane::of(ptr) };
    let replacement = lane.insert(val.into_u32());
    // SAFETY: as above.
    let (old, _) = unsafe { update_lane(root, lane, |_| replacement) };
    T::from_u32(lane.extract(old))
}

/// Atomically store zero at `ptr`.
///
/// Sub-word stores go through the exchange loop as well: a plain narrow store
/// is not ordered against a concurrent exchange of the containing word.
///
/// # Safety
///
/// `ptr` must satisfy the requirements of [`Lane::of`], and every concurrent
/// access to its word must go through `root`.
#[inline]
pub unsafe fn lock_release<T: SyncStorage>(root: &impl Cmpxchg32, ptr: NonNull<T>) {
    // SAFETY: caller guarantees ptr is aligned and its word valid.
    let lane = unsafe { Lane::of(ptr) };
    // SAFETY: as above.
    unsafe { update_lane(root, lane, |_| 0) };
}
