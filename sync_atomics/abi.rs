// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The out-of-line `__sync` built-ins, as a compiler calls them.
//!
//! The functions are generated from one template per built-in shape,
//! instantiated for every width and operation. They all use [`Kernel`] as
//! the compare-and-exchange root. With the `export-symbols` feature they are
//! exported unmangled, so that compiler-generated calls resolve to them.
//!
//! # Safety
//!
//! `ptr` must be non-null and aligned to the operand type, and the word it
//! is exchanged through (see [`Lane::of`](crate::Lane::of)) must be valid
//! for reads and writes. Any
//! concurrent access to that word must also use these functions (or the
//! kernel helper directly).

use core::ptr::NonNull;

use crate::{
    Kernel, Op, bool_compare_and_swap, fetch_and_op, lock_release, lock_test_and_set,
    op_and_fetch, val_compare_and_swap,
};

macro_rules! builtins {
    (
        fetch_and_op { $($fetch: ident($fetch_ty: ty, $fetch_op: ident);)* }
        op_and_fetch { $($op_fetch: ident($op_fetch_ty: ty, $op_fetch_op: ident);)* }
        val_compare_and_swap { $($val_cas: ident($val_cas_ty: ty);)* }
        bool_compare_and_swap { $($bool_cas: ident($bool_cas_ty: ty);)* }
        lock_test_and_set { $($tas: ident($tas_ty: ty);)* }
        lock_release { $($release: ident($release_ty: ty);)* }
    ) => {
        $(
            /// Applies the operation and returns the previous value.
            ///
            /// # Safety
            ///
            /// See the [module documentation](self).
            #[cfg_attr(feature = "export-symbols", unsafe(no_mangle))]
            pub unsafe extern "C" fn $fetch(ptr: *mut $fetch_ty, val: $fetch_ty) -> $fetch_ty {
                // SAFETY: caller guarantees ptr is non-null and its word valid.
                unsafe { fetch_and_op(&Kernel, NonNull::new_unchecked(ptr), Op::$fetch_op, val) }
            }
        )*

        $(
            /// Applies the operation and returns the new value.
            ///
            /// # Safety
            ///
            /// See the [module documentation](self).
            #[cfg_attr(feature = "export-symbols", unsafe(no_mangle))]
            pub unsafe extern "C" fn $op_fetch(
                ptr: *mut $op_fetch_ty,
                val: $op_fetch_ty,
            ) -> $op_fetch_ty {
                // SAFETY: caller guarantees ptr is non-null and its word valid.
                unsafe {
                    op_and_fetch(&Kernel, NonNull::new_unchecked(ptr), Op::$op_fetch_op, val)
                }
            }
        )*

        $(
            /// Swaps in `new_val` if the value is `old_val`; returns the value
            /// observed.
            ///
            /// # Safety
            ///
            /// See the [module documentation](self).
            #[cfg_attr(feature = "export-symbols", unsafe(no_mangle))]
            pub unsafe extern "C" fn $val_cas(
                ptr: *mut $val_cas_ty,
                old_val: $val_cas_ty,
                new_val: $val_cas_ty,
            ) -> $val_cas_ty {
                // SAFETY: caller guarantees ptr is non-null and its word valid.
                unsafe {
                    val_compare_and_swap(&Kernel, NonNull::new_unchecked(ptr), old_val, new_val)
                }
            }
        )*

        $(
            /// Swaps in `new_val` if the value is `old_val`; returns whether
            /// it did.
            ///
            /// # Safety
            ///
            /// See the [module documentation](self).
            #[cfg_attr(feature = "export-symbols", unsafe(no_mangle))]
            pub unsafe extern "C" fn $bool_cas(
                ptr: *mut $bool_cas_ty,
                old_val: $bool_cas_ty,
                new_val: $bool_cas_ty,
            ) -> bool {
                // SAFETY: caller guarantees ptr is non-null and its word valid.
                unsafe {
                    bool_compare_and_swap(&Kernel, NonNull::new_unchecked(ptr), old_val, new_val)
                }
            }
        )*

        $(
            /// Stores `val` and returns the previous value.
            ///
            /// # Safety
            ///
            /// See the [module documentation](self).
            #[cfg_attr(feature = "export-symbols", unsafe(no_mangle))]
            pub unsafe extern "C" fn $tas(ptr: *mut $tas_ty, val: $tas_ty) -> $tas_ty {
                // SAFETY: caller guarantees ptr is non-null and its word valid.
                unsafe { lock_test_and_set(&Kernel, NonNull::new_unchecked(ptr), val) }
            }
        )*

        $(
            /// Stores zero.
            ///
            /// # Safety
            ///
            /// See the [module documentation](self).
            #[cfg_attr(feature = "export-symbols", unsafe(no_mangle))]
            pub unsafe extern "C" fn $release(ptr: *mut $release_ty) {
                // SAFETY: caller guarantees ptr is non-null and its word valid.
                unsafe { lock_release(&Kernel, NonNull::new_unchecked(ptr)) }
            }
        )*

        /// Names of every generated built-in.
        pub const SYMBOLS: &[&str] = &[
            $(stringify!($fetch),)*
            $(stringify!($op_fetch),)*
            $(stringify!($val_cas),)*
            $(stringify!($bool_cas),)*
            $(stringify!($tas),)*
            $(stringify!($release),)*
        ];
    };
}

builtins! {
    fetch_and_op {
        __sync_fetch_and_add_4(u32, Add);
        __sync_fetch_and_sub_4(u32, Sub);
        __sync_fetch_and_or_4(u32, Or);
        __sync_fetch_and_and_4(u32, And);
        __sync_fetch_and_xor_4(u32, Xor);
        __sync_fetch_and_nand_4(u32, Nand);

        __sync_fetch_and_add_2(u16, Add);
        __sync_fetch_and_sub_2(u16, Sub);
        __sync_fetch_and_or_2(u16, Or);
        __sync_fetch_and_and_2(u16, And);
        __sync_fetch_and_xor_2(u16, Xor);
        __sync_fetch_and_nand_2(u16, Nand);

        __sync_fetch_and_add_1(u8, Add);
        __sync_fetch_and_sub_1(u8, Sub);
        __sync_fetch_and_or_1(u8, Or);
        __sync_fetch_and_and_1(u8, And);
        __sync_fetch_and_xor_1(u8, Xor);
        __sync_fetch_and_nand_1(u8, Nand);
    }
    op_and_fetch {
        __sync_add_and_fetch_4(u32, Add);
        __sync_sub_and_fetch_4(u32, Sub);
        __sync_or_and_fetch_4(u32, Or);
        __sync_and_and_fetch_4(u32, And);
        __sync_xor_and_fetch_4(u32, Xor);
        __sync_nand_and_fetch_4(u32, Nand);

        __sync_add_and_fetch_2(u16, Add);
        __sync_sub_and_fetch_2(u16, Sub);
        __sync_or_and_fetch_2(u16, Or);
        __sync_and_and_fetch_2(u16, And);
        __sync_xor_and_fetch_2(u16, Xor);
        __sync_nand_and_fetch_2(u16, Nand);

        __sync_add_and_fetch_1(u8, Add);
        __sync_sub_and_fetch_1(u8, Sub);
        __sync_or_and_fetch_1(u8, Or);
        __sync_and_and_fetch_1(u8, And);
        __sync_xor_and_fetch_1(u8, Xor);
        __sync_nand_and_fetch_1(u8, Nand);
    }
    val_compare_and_swap {
        __sync_val_compare_and_swap_4(u32);
        __sync_val_compare_and_swap_2(u16);
        __sync_val_compare_and_swap_1(u8);
    }
    bool_compare_and_swap {
        __sync_bool_compare_and_swap_4(u32);
        __sync_bool_compare_and_swap_2(u16);
        __sync_bool_compare_and_swap_1(u8);
    }
    lock_test_and_set {
        __sync_lock_test_and_set_4(u32);
        __sync_lock_test_and_set_2(u16);
        __sync_lock_test_and_set_1(u8);
    }
    lock_release {
        __sync_lock_release_4(u32);
        __sync_lock_release_2(u16);
        __sync_lock_release_1(u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_table() {
        assert_eq!(SYMBOLS.len(), 18 + 18 + 3 + 3 + 3 + 3);
        assert!(SYMBOLS.contains(&"__sync_fetch_and_nand_1"));
        assert!(SYMBOLS.contains(&"__sync_xor_and_fetch_2"));
        assert!(SYMBOLS.contains(&"__sync_lock_release_4"));
        let mut sorted = SYMBOLS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), SYMBOLS.len(), "duplicate symbol");
    }

    #[test]
    fn halfword_builtins() {
        let mut storage = 0u32;
        let lo = (&raw mut storage).cast::<u16>();
        // SAFETY: both halfwords live in the same aligned word.
        let hi = unsafe { lo.add(1) };
        unsafe {
            assert_eq!(__sync_fetch_and_add_2(hi, 0x1234), 0);
            assert_eq!(__sync_or_and_fetch_2(lo, 0x00F0), 0x00F0);
            assert_eq!(__sync_nand_and_fetch_2(lo, 0x00FF), 0xFF0F);
            assert_eq!(__sync_val_compare_and_swap_2(hi, 0x1234, 0x4321), 0x1234);
            assert!(!__sync_bool_compare_and_swap_2(hi, 0x1234, 0));
            assert_eq!((lo.read(), hi.read()), (0xFF0F, 0x4321));
        }
    }

    #[test]
    fn byte_spin_lock() {
        let mut storage = [0u32; 1];
        let bytes = storage.as_mut_ptr().cast::<u8>();
        unsafe {
            let lock = bytes.add(3);
            assert_eq!(__sync_lock_test_and_set_1(lock, 1), 0);
            assert_eq!(__sync_lock_test_and_set_1(lock, 1), 1);
            assert_eq!(__sync_sub_and_fetch_1(bytes, 1), 0xFF);
            __sync_lock_release_1(lock);
        }
        assert_eq!(storage[0].to_ne_bytes(), [0xFF, 0, 0, 0]);
    }

    #[test]
    fn word_builtins() {
        let mut cell = 10u32;
        let ptr = &raw mut cell;
        unsafe {
            assert_eq!(__sync_fetch_and_sub_4(ptr, 11), 10);
            assert_eq!(__sync_and_and_fetch_4(ptr, 0xF0F0), 0xF0F0);
            assert_eq!(__sync_xor_and_fetch_4(ptr, 0xFFFF), 0x0F0F);
            assert!(__sync_bool_compare_and_swap_4(ptr, 0x0F0F, 1));
            assert_eq!(__sync_lock_test_and_set_4(ptr, 2), 1);
            __sync_lock_release_4(ptr);
        }
        assert_eq!(cell, 0);
    }
}
