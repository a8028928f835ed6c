// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Contention test: every thread owns one lane of a shared word and applies
//! the same operation to it over and over, while the other threads do the
//! same to the neighbouring lanes.
//!
//! Only operations whose result depends on how many times they ran can
//! reveal a lost update. Add and sub use the same operand throughout. Xor
//! uses a different odd operand for every operation, and since xor commutes,
//! replaying each thread's sequence in any order gives the same result. Or,
//! and and nand settle after a few applications whatever the operands, so
//! they are rejected.
//!
//! Whatever the interleaving, a lane must end up equal to the replay of the
//! operations its threads completed. Any other value means an update was
//! lost or a neighbour was clobbered.

use std::{
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
    time::{Duration, Instant},
};

use serde::Serialize;
use sync_atomics::{Counting, Kernel, Op, fetch_and_op};

use crate::{Lanes, Width};

static STOP: AtomicBool = AtomicBool::new(false);

pub struct Config {
    pub threads: usize,
    pub iterations: usize,
    pub op: Op,
    pub operand: u32,
}

#[derive(Debug, Serialize)]
pub struct LaneReport {
    pub index: usize,
    pub operations: usize,
    pub expected: u32,
    pub actual: u32,
}

#[derive(Debug, Serialize)]
pub struct StressReport {
    pub width: Width,
    pub op: String,
    pub operand: u32,
    pub threads: usize,
    pub operations: usize,
    pub attempts: usize,
    pub failures: usize,
    pub elapsed: Duration,
    pub interrupted: bool,
    pub lanes: Vec<LaneReport>,
}

#[derive(Debug)]
pub struct Unverifiable(pub Op);

impl std::fmt::Display for Unverifiable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lost updates cannot be detected with {}; use add, sub or xor",
            self.0
        )
    }
}

impl std::error::Error for Unverifiable {}

/// Whether lost updates change the final value of `op`.
pub fn verifiable(op: Op) -> bool {
    matches!(op, Op::Add | Op::Sub | Op::Xor)
}

impl StressReport {
    pub fn lost_updates(&self) -> bool {
        self.lanes.iter().any(|lane| lane.expected != lane.actual)
    }
}

/// Make ctrl+c stop the worker threads at their next operation instead of
/// killing the process, so the completed work is still verified.
pub fn install_interrupt_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| STOP.store(true, Ordering::Relaxed))
}

pub fn run<T: Lanes>(
    config: &Config,
    quiet: bool,
) -> Result<StressReport, Box<dyn std::error::Error>> {
    if !verifiable(config.op) {
        return Err(Unverifiable(config.op).into());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()?;
    let word = AtomicU32::new(0);
    let root = Counting::new(Kernel);
    let lanes = T::lanes();

    let mut spinner = (!quiet).then(cliclack::spinner);
    if let Some(spinner) = &mut spinner {
        spinner.start("Hammering");
    }

    let start = Instant::now();
    let completed = pool.broadcast(|context| {
        let thread = context.index();
        let index = thread % lanes;
        // SAFETY: index is below the lane count, so the element is inside
        // the word and aligned to T.
        let ptr = unsafe { NonNull::from(&word).cast::<T>().add(index) };
        let mut done = 0;
        while done < config.iterations && !STOP.load(Ordering::Relaxed) {
            let operand = operand_at::<T>(config, thread, done);
            // SAFETY: the word outlives the broadcast.
            unsafe { fetch_and_op(&root, ptr, config.op, operand) };
            done += 1;
        }
        done
    });
    let elapsed = start.elapsed();

    if let Some(spinner) = &mut spinner {
        spinner.stop("Done");
    }

    let mut reports = Vec::with_capacity(lanes);
    for index in 0..lanes {
        let threads = completed
            .iter()
            .enumerate()
            .skip(index)
            .step_by(lanes)
            .map(|(thread, &done)| (thread, done));
        let operations: usize = threads.clone().map(|(_, done)| done).sum();
        let expected = replay::<T>(config, threads);
        // SAFETY: the broadcast has finished, nothing else touches the word.
        let actual = unsafe { NonNull::from(&word).cast::<T>().add(index).read() };
        reports.push(LaneReport {
            index,
            operations,
            expected: expected.into(),
            actual: actual.into(),
        });
    }

    Ok(StressReport {
        width: T::WIDTH,
        op: config.op.to_string(),
        operand: T::truncate(config.operand).into(),
        threads: config.threads,
        operations: completed.iter().sum(),
        attempts: root.attempts(),
        failures: root.failures(),
        elapsed,
        interrupted: STOP.load(Ordering::Relaxed),
        lanes: reports,
    })
}

/// Operand of the `iteration`th operation of `thread`.
fn operand_at<T: Lanes>(config: &Config, thread: usize, iteration: usize) -> T {
    match config.op {
        Op::Xor => {
            let sequence = thread.wrapping_mul(config.iterations).wrapping_add(iteration);
            T::truncate((config.operand | 1).wrapping_add((sequence as u32).wrapping_mul(2)))
        }
        _ => T::truncate(config.operand),
    }
}

/// Apply, one at a time starting from zero, the operations each
/// `(thread, completed)` pair performed.
fn replay<T: Lanes>(config: &Config, threads: impl Iterator<Item = (usize, usize)>) -> T {
    let mut value = 0u32;
    for (thread, done) in threads {
        for iteration in 0..done {
            let operand: u32 = operand_at::<T>(config, thread, iteration).into();
            value = T::truncate(config.op.apply(value, operand)).into();
        }
    }
    T::truncate(value)
}
