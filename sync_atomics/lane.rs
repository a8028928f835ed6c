// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::ptr::NonNull;

use crate::SyncStorage;

/// Location of a byte, halfword or word inside the 32-bit word it is
/// exchanged through.
///
/// The emulation only ever exchanges whole words. A narrower value is
/// updated by computing its new bits, shifting them into the lane and
/// keeping every bit outside the lane from the snapshot. A 4-byte value is
/// its own word, wherever it sits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lane {
    word: NonNull<u32>,
    shift: u32,
    mask: u32,
}

impl Lane {
    /// Compute the lane of the `T` at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be aligned to `T`. For bytes and halfwords the whole
    /// 4-byte aligned word containing `ptr` must be valid for reads and
    /// writes for as long as the lane is used.
    #[inline(always)]
    pub unsafe fn of<T: SyncStorage>(ptr: NonNull<T>) -> Self {
        let addr = ptr.as_ptr().addr();
        debug_assert!(
            addr % align_of::<T>() == 0,
            "misaligned {}-byte atomic at {addr:#x}",
            T::BYTES
        );
        let offset = word_offset(addr, T::BYTES);
        // SAFETY: the containing word is part of the same allocation by the
        // caller's guarantee.
        let word = unsafe { ptr.cast::<u8>().byte_sub(offset) }.cast::<u32>();
        let shift = lane_shift(offset, T::BYTES);
        Self {
            word,
            shift,
            mask: T::MASK << shift,
        }
    }

    /// The aligned word that contains the lane.
    #[inline(always)]
    pub const fn word(&self) -> NonNull<u32> {
        self.word
    }

    /// Bit position of the lane's least significant bit.
    #[inline(always)]
    pub const fn shift(&self) -> u32 {
        self.shift
    }

    /// The lane's bits within the word.
    #[inline(always)]
    pub const fn mask(&self) -> u32 {
        self.mask
    }

    /// Move `value` into the lane. Bits of `value` wider than the lane are
    /// dropped.
    #[inline(always)]
    pub const fn insert(&self, value: u32) -> u32 {
        (value << self.shift) & self.mask
    }

    /// Read the lane out of `word`.
    #[inline(always)]
    pub const fn extract(&self, word: u32) -> u32 {
        (word & self.mask) >> self.shift
    }

    /// Combine the lane bits of `new` with the bits of `old` outside the lane.
    #[inline(always)]
    pub const fn merge(&self, old: u32, new: u32) -> u32 {
        (new & self.mask) | (old & !self.mask)
    }
}

/// Distance from a `bytes` wide value at `addr` back to the word it is
/// exchanged through. A word needs only 2-byte alignment on m68k, so it is
/// never rounded down.
#[inline(always)]
const fn word_offset(addr: usize, bytes: usize) -> usize {
    if bytes == 4 { 0 } else { addr & 3 }
}

/// Shift of a `bytes` wide value at byte `offset` of its word.
///
/// On big-endian targets the lowest address holds the most significant byte,
/// so the little-endian shift is mirrored with `24` for bytes and `16` for
/// halfwords.
#[inline(always)]
const fn lane_shift(offset: usize, bytes: usize) -> u32 {
    let shift = (offset as u32) << 3;
    if cfg!(target_endian = "big") {
        shift ^ (32 - ((bytes as u32) << 3))
    } else {
        shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_lanes_cover_the_word() {
        let mut cell = 0u32;
        let base = NonNull::from(&mut cell).cast::<u8>();
        let mut seen = 0u32;
        for i in 0..4 {
            // SAFETY: i is within the word.
            let lane = unsafe { Lane::of(base.add(i)) };
            assert_eq!(lane.word(), base.cast::<u32>());
            assert_eq!(lane.mask().count_ones(), 8);
            assert_eq!(seen & lane.mask(), 0, "lanes overlap");
            seen |= lane.mask();
        }
        assert_eq!(seen, u32::MAX);
    }

    #[test]
    fn lane_matches_memory_layout() {
        let mut cell = 0u32;
        let base = NonNull::from(&mut cell).cast::<u8>();
        // SAFETY: offset 2 is halfword aligned and within the word.
        let lane = unsafe { Lane::of(base.add(2).cast::<u16>()) };
        cell = lane.insert(0xBEEF);
        let bytes = cell.to_ne_bytes();
        assert_eq!(u16::from_ne_bytes([bytes[2], bytes[3]]), 0xBEEF);
        assert_eq!(u16::from_ne_bytes([bytes[0], bytes[1]]), 0);
        assert_eq!(lane.extract(cell), 0xBEEF);
    }

    #[test]
    fn words_are_never_rounded_down() {
        assert_eq!(word_offset(0x1002, 4), 0);
        assert_eq!(word_offset(0x1000, 4), 0);
        assert_eq!(word_offset(0x1002, 2), 2);
        assert_eq!(word_offset(0x1003, 1), 3);
    }

    /// A `u32` that follows a `u16` in a struct lands at byte 2 of a word
    /// on m68k, where words are only 2-byte aligned.
    #[cfg(target_arch = "m68k")]
    #[test]
    fn word_at_halfword_offset() {
        use crate::{Kernel, Op, fetch_and_op};

        let mut halves = [0x1111u16, 0, 0xFFFF, 0x2222];
        let base = NonNull::from(&mut halves).cast::<u16>();
        // SAFETY: offset 1 is 2-byte aligned, which is enough for a u32 on
        // m68k, and the u32 spans halves 1 and 2.
        let word = unsafe { base.add(1) }.cast::<u32>();
        // SAFETY: as above.
        let lane = unsafe { Lane::of(word) };
        assert_eq!(lane.word(), word);
        assert_eq!(lane.shift(), 0);
        assert_eq!(lane.mask(), u32::MAX);

        // SAFETY: as above.
        let old = unsafe { fetch_and_op(&Kernel, word, Op::Add, 1u32) };
        assert_eq!(old, 0xFFFF);
        assert_eq!(halves, [0x1111, 1, 0, 0x2222]);
    }

    #[test]
    fn big_endian_shifts() {
        if cfg!(target_endian = "big") {
            assert_eq!(lane_shift(0, 1), 24);
            assert_eq!(lane_shift(3, 1), 0);
            assert_eq!(lane_shift(0, 2), 16);
            assert_eq!(lane_shift(2, 2), 0);
        } else {
            assert_eq!(lane_shift(0, 1), 0);
            assert_eq!(lane_shift(3, 1), 24);
            assert_eq!(lane_shift(2, 2), 16);
        }
        assert_eq!(lane_shift(0, 4), 0);
    }

    #[test]
    fn merge_keeps_neighbours() {
        let mut cell = 0u32;
        let base = NonNull::from(&mut cell).cast::<u8>();
        // SAFETY: offset 1 is within the word.
        let lane = unsafe { Lane::of(base.add(1)) };
        let old = 0x1122_3344;
        let merged = lane.merge(old, u32::MAX);
        assert_eq!(merged & !lane.mask(), old & !lane.mask());
        assert_eq!(lane.extract(merged), 0xFF);
    }

    #[test]
    fn word_lane_is_the_whole_word() {
        let mut cell = 0u32;
        // SAFETY: cell is a live, aligned u32.
        let lane = unsafe { Lane::of(NonNull::from(&mut cell)) };
        assert_eq!(lane.shift(), 0);
        assert_eq!(lane.mask(), u32::MAX);
        assert_eq!(lane.merge(1, 2), 2);
    }
}
