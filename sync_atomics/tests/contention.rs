// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{ptr::NonNull, sync::atomic::AtomicU32, thread};

use sync_atomics::*;

const ITERATIONS: usize = 20_000;

#[test]
fn neighbouring_bytes_do_not_lose_updates() {
    let word = AtomicU32::new(0);
    let root = Counting::new(Kernel);

    thread::scope(|s| {
        for index in 0..4 {
            let word = &word;
            let root = &root;
            s.spawn(move || {
                // SAFETY: index is within the word.
                let ptr = unsafe { NonNull::from(word).cast::<u8>().add(index) };
                for _ in 0..ITERATIONS {
                    // SAFETY: the word outlives the scope.
                    unsafe { fetch_and_op(root, ptr, Op::Add, 1u8) };
                }
            });
        }
    });

    let expected = (ITERATIONS % 256) as u8;
    assert_eq!(word.into_inner().to_ne_bytes(), [expected; 4]);
    assert_eq!(root.attempts() - root.failures(), 4 * ITERATIONS);
}

#[test]
fn halfword_counters_under_contention() {
    let word = AtomicU32::new(0);

    thread::scope(|s| {
        for index in 0..2 {
            for _ in 0..2 {
                let word = &word;
                s.spawn(move || {
                    // SAFETY: index is within the word.
                    let ptr = unsafe { NonNull::from(word).cast::<u16>().add(index) };
                    for _ in 0..ITERATIONS {
                        // SAFETY: the word outlives the scope.
                        unsafe { abi::__sync_add_and_fetch_2(ptr.as_ptr(), 1) };
                    }
                });
            }
        }
    });

    let total = (2 * ITERATIONS) as u16;
    let bytes = total.to_ne_bytes();
    assert_eq!(
        word.into_inner().to_ne_bytes(),
        [bytes[0], bytes[1], bytes[0], bytes[1]]
    );
}

#[test]
fn byte_spin_lock_protects_neighbouring_counter() {
    // Byte 0 is a lock, bytes 2..4 a halfword protected by it and updated
    // with plain reads and writes through the lock.
    let word = AtomicU32::new(0);
    let threads = 4;

    thread::scope(|s| {
        for _ in 0..threads {
            let word = &word;
            s.spawn(move || {
                let base = NonNull::from(word).cast::<u8>();
                // SAFETY: offsets are within the word.
                let lock = unsafe { base.add(0) };
                let counter = unsafe { base.add(2).cast::<u16>() };
                for _ in 0..ITERATIONS / 10 {
                    // SAFETY: the word outlives the scope.
                    unsafe {
                        while lock_test_and_set(&Kernel, lock, 1u8) != 0 {
                            core::hint::spin_loop();
                        }
                        let value = op_and_fetch(&Kernel, counter, Op::Or, 0);
                        lock_test_and_set(&Kernel, counter, value.wrapping_add(1));
                        lock_release(&Kernel, lock);
                    }
                }
            });
        }
    });

    let base = NonNull::from(&word).cast::<u8>();
    // SAFETY: offset 2 is within the word.
    let counter = unsafe { base.add(2).cast::<u16>().read() };
    assert_eq!(counter as usize, threads * (ITERATIONS / 10));
    // SAFETY: offset 0 is within the word.
    assert_eq!(unsafe { base.read() }, 0, "lock released");
}

#[test]
fn compare_and_swap_increments() {
    let word = AtomicU32::new(0);

    thread::scope(|s| {
        for index in 0..4 {
            let word = &word;
            s.spawn(move || {
                // SAFETY: index is within the word.
                let ptr = unsafe { NonNull::from(word).cast::<u8>().add(index / 2) };
                for _ in 0..ITERATIONS / 100 {
                    loop {
                        // SAFETY: the word outlives the scope.
                        unsafe {
                            let current = op_and_fetch(&Kernel, ptr, Op::Or, 0);
                            if bool_compare_and_swap(&Kernel, ptr, current, current.wrapping_add(1))
                            {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    let expected = (2 * (ITERATIONS / 100) % 256) as u8;
    let bytes = word.into_inner().to_ne_bytes();
    assert_eq!(&bytes[..2], &[expected, expected]);
    assert_eq!(&bytes[2..], &[0, 0]);
}
