// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::{ptr::NonNull, sync::atomic::AtomicU32};

use serde::Serialize;
use sync_atomics::{
    Kernel, Lane, Op, bool_compare_and_swap, fetch_and_op, lock_release, lock_test_and_set,
    op_and_fetch, val_compare_and_swap,
};

use crate::{Lanes, Width, width_bits};

/// Word contents the checks start from; every byte differs so a clobbered
/// neighbour is always visible.
const BACKGROUND: u32 = 0xC3A5_5A3C;
const OPERANDS: [u32; 4] = [0, 1, 0x8181_8181, u32::MAX];

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub width: Width,
    pub cases: usize,
    pub failures: Vec<String>,
}

impl CheckReport {
    pub fn width_bits(&self) -> u32 {
        width_bits(self.width)
    }

    fn expect(&mut self, ok: bool, case: impl FnOnce() -> String) {
        self.cases += 1;
        if !ok {
            self.failures.push(case());
        }
    }
}

/// Run every primitive on every lane of a word holding [`BACKGROUND`] and
/// compare the results with plain arithmetic on the lane.
pub fn run<T: Lanes>() -> CheckReport {
    let mut report = CheckReport {
        width: T::WIDTH,
        cases: 0,
        failures: Vec::new(),
    };

    for index in 0..T::lanes() {
        for op in Op::ALL {
            for operand in OPERANDS {
                check_op::<T>(&mut report, index, op, T::truncate(operand));
            }
        }
        check_compare_and_swap::<T>(&mut report, index);
        check_test_and_set::<T>(&mut report, index);
    }

    report
}

fn element<T: Lanes>(word: &AtomicU32, index: usize) -> (NonNull<T>, Lane) {
    // SAFETY: index is below T::lanes(), so the element is inside the word
    // and aligned to T.
    unsafe {
        let ptr = NonNull::from(word).cast::<T>().add(index);
        (ptr, Lane::of(ptr))
    }
}

fn check_op<T: Lanes>(report: &mut CheckReport, index: usize, op: Op, operand: T) {
    let before = {
        let word = AtomicU32::new(BACKGROUND);
        let (_, lane) = element::<T>(&word, index);
        lane.extract(BACKGROUND)
    };
    let expected = T::truncate(op.apply(before, operand.into()));

    for fetch_new in [false, true] {
        let word = AtomicU32::new(BACKGROUND);
        let (ptr, lane) = element::<T>(&word, index);
        // SAFETY: the element lies within a live, aligned word.
        let returned = unsafe {
            if fetch_new {
                op_and_fetch(&Kernel, ptr, op, operand)
            } else {
                fetch_and_op(&Kernel, ptr, op, operand)
            }
        };
        let after = word.into_inner();
        let name = if fetch_new { "op_and_fetch" } else { "fetch_and_op" };

        let wanted = if fetch_new {
            expected
        } else {
            T::truncate(before)
        };
        report.expect(returned == wanted, || {
            let case = format!("{name} {op} {operand:?} lane {index}");
            format!("{case}: returned {returned:?}, wanted {wanted:?}")
        });
        report.expect(T::truncate(lane.extract(after)) == expected, || {
            format!("{name} {op} {operand:?} lane {index}: stored {after:#010x}")
        });
        report.expect(after & !lane.mask() == BACKGROUND & !lane.mask(), || {
            format!("{name} {op} {operand:?} lane {index}: clobbered neighbours {after:#010x}")
        });
    }
}

fn check_compare_and_swap<T: Lanes>(report: &mut CheckReport, index: usize) {
    let word = AtomicU32::new(BACKGROUND);
    let (ptr, lane) = element::<T>(&word, index);
    let current = T::truncate(lane.extract(BACKGROUND));
    let other = T::truncate(!Into::<u32>::into(current));

    // SAFETY: the element lies within a live, aligned word.
    let (missed, swapped) = unsafe {
        (
            val_compare_and_swap(&Kernel, ptr, other, other),
            bool_compare_and_swap(&Kernel, ptr, current, other),
        )
    };
    let after = word.into_inner();

    report.expect(missed == current, || {
        format!("val_compare_and_swap lane {index}: returned {missed:?}, wanted {current:?}")
    });
    report.expect(swapped, || {
        format!("bool_compare_and_swap lane {index}: refused a matching swap")
    });
    report.expect(after == BACKGROUND ^ lane.mask(), || {
        format!("compare_and_swap lane {index}: stored {after:#010x}")
    });
}

fn check_test_and_set<T: Lanes>(report: &mut CheckReport, index: usize) {
    let word = AtomicU32::new(BACKGROUND);
    let (ptr, lane) = element::<T>(&word, index);
    let current = T::truncate(lane.extract(BACKGROUND));

    // SAFETY: the element lies within a live, aligned word.
    let previous = unsafe { lock_test_and_set(&Kernel, ptr, T::truncate(1)) };
    // SAFETY: as above.
    unsafe { lock_release(&Kernel, ptr) };
    let after = word.into_inner();

    report.expect(previous == current, || {
        format!("lock_test_and_set lane {index}: returned {previous:?}, wanted {current:?}")
    });
    report.expect(after == BACKGROUND & !lane.mask(), || {
        format!("lock_release lane {index}: stored {after:#010x}")
    });
}
