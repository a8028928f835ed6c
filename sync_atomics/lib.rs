// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "m68k", feature(asm_experimental_arch))]

//! # Emulated `__sync` atomics
//!
//! ColdFire dropped the `CAS` instruction from the base m68k ISA. When a
//! compiler targets such a core it cannot inline the `__sync` built-ins
//! (`__sync_fetch_and_add`, `__sync_val_compare_and_swap`,
//! `__sync_lock_test_and_set`, ...) and instead emits calls to out-of-line
//! functions named after the built-in and the operand width in bytes, eg.
//! `__sync_fetch_and_add_4`. This library provides those functions.
//!
//! Everything is built on a single primitive: a 32-bit compare-and-exchange,
//! provided by the kernel on m68k Linux (see [`Kernel`]). Each operation is
//! an optimistic retry loop: read the word, compute the new word, try to
//! exchange it in, and start over from the value the exchange reports if
//! another writer got there first.
//!
//! Bytes and halfwords are handled by operating on the naturally aligned
//! word that contains them. The value is shifted into its [`Lane`] of that
//! word and the bits outside the lane are carried over unchanged from the
//! snapshot, so concurrent updates to neighbouring values are never lost.
//!
//! Only 8, 16 and 32-bit operands are supported and the operation set is
//! fixed (see [`Op`]); there are no 64-bit built-ins.
//!
//! ## Entry points
//!
//! The generic functions ([`fetch_and_op`], [`val_compare_and_swap`], ...)
//! take the compare-and-exchange root as a parameter. The C-ABI functions in
//! [`abi`] fix it to [`Kernel`] and are exported under their C names with the
//! `export-symbols` feature.
//!
//! ## Memory ordering
//!
//! `__sync` built-ins are full barriers. The kernel helper and the hardware
//! fallback both perform sequentially consistent exchanges; a successful
//! operation is exactly one such exchange. `__sync_synchronize` is not
//! provided as compilers emit it inline.

pub mod abi;
mod emulate;
mod kernel;
mod lane;
mod ops;

pub use emulate::{
    bool_compare_and_swap, fetch_and_op, lock_release, lock_test_and_set, op_and_fetch,
    val_compare_and_swap,
};
pub use kernel::{Cmpxchg32, Counting, Kernel};
pub use lane::Lane;
pub use ops::Op;

use crate::private::Sealed;

/// The operand types of the emulated built-ins: the unsigned integers of 1, 2
/// and 4 bytes.
pub trait SyncStorage: Sealed {}

impl SyncStorage for u8 {}
impl SyncStorage for u16 {}
impl SyncStorage for u32 {}

mod private {
    pub trait Sealed: 'static + Copy + Eq + Send + Sync + core::fmt::Debug {
        /// Size in bytes; the suffix of the built-in's symbol.
        const BYTES: usize;
        /// All bits of a value of this width, in the low bits of a word.
        const MASK: u32;

        fn into_u32(self) -> u32;
        /// Truncates to the width.
        fn from_u32(value: u32) -> Self;
    }

    impl Sealed for u8 {
        const BYTES: usize = 1;
        const MASK: u32 = 0xFF;

        #[inline(always)]
        fn into_u32(self) -> u32 {
            self as u32
        }

        #[inline(always)]
        fn from_u32(value: u32) -> Self {
            value as u8
        }
    }

    impl Sealed for u16 {
        const BYTES: usize = 2;
        const MASK: u32 = 0xFFFF;

        #[inline(always)]
        fn into_u32(self) -> u32 {
            self as u32
        }

        #[inline(always)]
        fn from_u32(value: u32) -> Self {
            value as u16
        }
    }

    impl Sealed for u32 {
        const BYTES: usize = 4;
        const MASK: u32 = 0xFFFF_FFFF;

        #[inline(always)]
        fn into_u32(self) -> u32 {
            self
        }

        #[inline(always)]
        fn from_u32(value: u32) -> Self {
            value
        }
    }
}
