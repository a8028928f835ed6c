// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/// The read-modify-write operations of the `__sync` built-ins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Or,
    And,
    Xor,
    /// `!(old & val)`, the meaning GCC has given `nand` since 4.4.
    Nand,
}

impl Op {
    pub const ALL: [Op; 6] = [Op::Add, Op::Sub, Op::Or, Op::And, Op::Xor, Op::Nand];

    /// Combine the current value with the operand.
    ///
    /// Operating on whole words with the operand shifted into a lane is
    /// equivalent to operating on the lane alone: the operand is zero below
    /// the lane, so carries and borrows only travel upwards and whatever
    /// leaves the lane is masked off afterwards.
    #[inline(always)]
    pub const fn apply(self, old: u32, val: u32) -> u32 {
        match self {
            Op::Add => old.wrapping_add(val),
            Op::Sub => old.wrapping_sub(val),
            Op::Or => old | val,
            Op::And => old & val,
            Op::Xor => old ^ val,
            Op::Nand => !(old & val),
        }
    }

    /// Name used in the built-in's symbol, eg. `add` in
    /// `__sync_fetch_and_add_4`.
    pub const fn name(self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Or => "or",
            Op::And => "and",
            Op::Xor => "xor",
            Op::Nand => "nand",
        }
    }
}

impl core::fmt::Display for Op {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
