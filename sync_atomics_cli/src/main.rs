// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
mod check;
mod stress;
mod theme;

use clap::{Parser as ClapParser, Subcommand, ValueEnum};
use cliclack::{intro, log, outro, outro_cancel, set_theme};
use serde::Serialize;
use sync_atomics::{Op, SyncStorage, abi::SYMBOLS};
use theme::DefaultTheme;

/// Exercises the emulated __sync atomics on this machine
#[derive(Debug, ClapParser)] // requires `derive` feature
#[command(name = "sync_atomics")]
#[command(about = "Exercises the emulated __sync atomics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Checks every primitive at every width and lane against a reference
    /// model
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Hammers the lanes of one word from several threads and verifies that
    /// no update was lost
    Stress {
        /// Number of threads
        #[arg(short = 'j', long, default_value_t = 4)]
        threads: usize,

        /// Operations performed by each thread
        #[arg(short = 'n', long, default_value_t = 100_000)]
        iterations: usize,

        /// Operand width in bits
        #[arg(short, long, value_enum, default_value_t = Width::W8)]
        width: Width,

        /// Operation to apply. Only add, sub and xor can reveal lost updates,
        /// the others are rejected
        #[arg(short, long, value_enum, default_value_t = CliOp::Add)]
        op: CliOp,

        /// Operand, truncated to the lane width. Xor starts from it and moves
        /// to a new odd operand for every operation
        #[arg(long, default_value_t = 1)]
        operand: u32,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Lists the generated built-in symbols
    Symbols {},
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
enum Width {
    #[value(name = "8")]
    #[serde(rename = "8")]
    W8,
    #[value(name = "16")]
    #[serde(rename = "16")]
    W16,
    #[value(name = "32")]
    #[serde(rename = "32")]
    W32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CliOp {
    Add,
    Sub,
    Or,
    And,
    Xor,
    Nand,
}

impl From<CliOp> for Op {
    fn from(op: CliOp) -> Self {
        match op {
            CliOp::Add => Op::Add,
            CliOp::Sub => Op::Sub,
            CliOp::Or => Op::Or,
            CliOp::And => Op::And,
            CliOp::Xor => Op::Xor,
            CliOp::Nand => Op::Nand,
        }
    }
}

/// Operand types the tool can drive, with the conversions the library keeps
/// private.
trait Lanes: SyncStorage + Into<u32> {
    const WIDTH: Width;

    fn truncate(value: u32) -> Self;

    fn lanes() -> usize {
        4 / size_of::<Self>()
    }
}

impl Lanes for u8 {
    const WIDTH: Width = Width::W8;

    fn truncate(value: u32) -> Self {
        value as u8
    }
}

impl Lanes for u16 {
    const WIDTH: Width = Width::W16;

    fn truncate(value: u32) -> Self {
        value as u16
    }
}

impl Lanes for u32 {
    const WIDTH: Width = Width::W32;

    fn truncate(value: u32) -> Self {
        value
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    match args.command {
        Command::Check { json } => {
            let reports = vec![
                check::run::<u8>(),
                check::run::<u16>(),
                check::run::<u32>(),
            ];
            let failed = reports.iter().any(|report| !report.failures.is_empty());

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                set_theme(DefaultTheme);
                intro("sync_atomics check")?;
                for report in &reports {
                    if report.failures.is_empty() {
                        log::success(format!(
                            "{}-bit: {} cases passed",
                            report.width_bits(),
                            report.cases
                        ))?;
                    } else {
                        log::error(format!(
                            "{}-bit: {} of {} cases failed\n{}",
                            report.width_bits(),
                            report.failures.len(),
                            report.cases,
                            report.failures.join("\n")
                        ))?;
                    }
                }
                if failed {
                    outro_cancel("Emulated atomics are broken on this machine")?;
                } else {
                    outro("All primitives behave")?;
                }
            }

            if failed {
                std::process::exit(1);
            }
        }
        Command::Stress {
            threads,
            iterations,
            width,
            op,
            operand,
            json,
        } => {
            let config = stress::Config {
                threads,
                iterations,
                op: op.into(),
                operand,
            };
            if !stress::verifiable(config.op) {
                return Err(stress::Unverifiable(config.op).into());
            }
            if !json {
                let bits = width_bits(width);
                let operand = u64::from(operand) & ((1 << bits) - 1);
                set_theme(DefaultTheme);
                intro("sync_atomics stress")?;
                log::info(format!(
                    "{threads} threads x {iterations} x {} {operand:#x} on {bits}-bit lanes",
                    config.op
                ))?;
                log::info("Press ctrl+c to stop early")?;
            }
            stress::install_interrupt_handler()?;

            let report = match width {
                Width::W8 => stress::run::<u8>(&config, json)?,
                Width::W16 => stress::run::<u16>(&config, json)?,
                Width::W32 => stress::run::<u32>(&config, json)?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                log::info(format!(
                    "{} operations in {:.2?}, {} exchange attempts, {} retried",
                    report.operations, report.elapsed, report.attempts, report.failures
                ))?;
                if report.interrupted {
                    log::warning("Interrupted; verified the operations that completed")?;
                }
                for lane in &report.lanes {
                    if lane.expected == lane.actual {
                        log::success(format!(
                            "lane {}: {:#x} after {} operations",
                            lane.index, lane.actual, lane.operations
                        ))?;
                    } else {
                        log::error(format!(
                            "lane {}: expected {:#x}, found {:#x}",
                            lane.index, lane.expected, lane.actual
                        ))?;
                    }
                }
                if report.lost_updates() {
                    outro_cancel("Updates were lost")?;
                } else {
                    outro("No updates lost")?;
                }
            }

            if report.lost_updates() {
                std::process::exit(1);
            }
        }
        Command::Symbols {} => {
            for symbol in SYMBOLS {
                println!("{symbol}");
            }
        }
    }
    Ok(())
}

fn width_bits(width: Width) -> u32 {
    match width {
        Width::W8 => 8,
        Width::W16 => 16,
        Width::W32 => 32,
    }
}
