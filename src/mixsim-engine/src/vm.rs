// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use crate::builtins::{Control, SimContext};
use crate::composer::ComposedFunction;

impl ComposedFunction {
    /// Runs the instructions against `field`, which must have been filled
    /// by `fill_index_field`.  No bounds or arity checks happen here; the
    /// composer already rejected anything that could go out of range.
    pub fn evaluate(&self, field: &[usize], working: &mut [f64], ctx: &mut dyn SimContext) {
        let instructions = &self.instructions;
        let len = instructions.len();

        let mut pc = 0;
        let mut base = self.header_size();
        while pc < len {
            let instr = &instructions[pc];
            let size = instr.function.index_field_size();
            let segment = &field[base..base + size];

            match instr.function.evaluate(segment, working, ctx, instr) {
                Control::Continue | Control::Jump(0) => {
                    base += size;
                    pc += 1;
                }
                Control::Return => break,
                Control::Jump(displacement) => {
                    // segments vary in length, so walk over the skipped
                    // (or re-entered) ones to find the target's base
                    let target = (pc as i64 + displacement as i64) as usize;
                    if target > pc {
                        for skipped in &instructions[pc..target] {
                            base += skipped.function.index_field_size();
                        }
                    } else {
                        for reentered in &instructions[target..pc] {
                            base -= reentered.function.index_field_size();
                        }
                    }
                    pc = target;
                }
            }
        }
    }
}
