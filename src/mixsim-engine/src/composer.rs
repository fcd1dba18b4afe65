// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Sequencing builtin and composed functions into a new function with a
//! statically computed activation-record layout.
//!
//! A composed function's index field is its header (`[result, private
//! base, params...]`) followed by one segment per instruction, each
//! exactly as long as that instruction's `index_field_size`.  Its
//! private storage is its locals followed by each instruction's private
//! storage, in instruction order.

use log::debug;

use crate::common::Result;
use crate::func_err;
use crate::function::{Function, Instruction, ParameterIdentifier};

#[derive(Clone, Debug)]
pub struct ComposedFunction {
    name: String,
    param_count: usize,
    local_count: usize,
    pub(crate) instructions: Vec<Instruction>,
    index_field_size: usize,
    working_storage_size: usize,
}

impl ComposedFunction {
    /// Validates every instruction and computes the arity of the new
    /// function.  Nothing is checked again when it runs.
    pub fn compose(
        name: &str,
        local_count: usize,
        param_count: usize,
        instructions: Vec<Instruction>,
    ) -> Result<ComposedFunction> {
        let len = instructions.len();
        let mut index_field_size = 2 + param_count;
        let mut working_storage_size = local_count;

        for (pc, instr) in instructions.iter().enumerate() {
            let function = &instr.function;
            let expected = 1 + function.param_count();
            if instr.params.len() != expected {
                return func_err!(
                    ArityMismatch,
                    format!(
                        "{name}: instruction {pc} ({}) has {} operands, expected {expected}",
                        function.name(),
                        instr.params.len()
                    )
                );
            }

            for id in instr.params.iter() {
                match *id {
                    ParameterIdentifier::Caller(slot) => {
                        if slot != 0 && !(2..2 + param_count).contains(&slot) {
                            return func_err!(
                                BadSlot,
                                format!("{name}: instruction {pc} uses caller slot {slot}")
                            );
                        }
                    }
                    ParameterIdentifier::Local(i) => {
                        if i >= local_count {
                            return func_err!(
                                BadSlot,
                                format!(
                                    "{name}: instruction {pc} uses local {i} of {local_count}"
                                )
                            );
                        }
                    }
                    ParameterIdentifier::Previous(slot) => {
                        if pc == 0 {
                            return func_err!(
                                NoPreviousInstruction,
                                format!("{name}: the first instruction has no previous result")
                            );
                        }
                        let previous = instructions[pc - 1].function.index_field_size();
                        if slot >= previous {
                            return func_err!(
                                BadSlot,
                                format!(
                                    "{name}: instruction {pc} uses slot {slot} of a {previous}-slot segment"
                                )
                            );
                        }
                    }
                }
            }

            match (function.jumps(), instr.jump) {
                (true, Some(displacement)) => {
                    let target = pc as i64 + displacement as i64;
                    if displacement == 0 || target < 0 || target > len as i64 {
                        return func_err!(
                            BadJump,
                            format!(
                                "{name}: instruction {pc} jumps by {displacement} in a {len}-instruction function"
                            )
                        );
                    }
                }
                (true, None) => {
                    return func_err!(
                        BadJump,
                        format!("{name}: instruction {pc} is missing its jump target")
                    );
                }
                (false, Some(_)) => {
                    return func_err!(
                        BadJump,
                        format!(
                            "{name}: instruction {pc} ({}) cannot jump",
                            function.name()
                        )
                    );
                }
                (false, None) => {}
            }

            if !function.accepts_constants(instr.constants.len()) {
                return func_err!(
                    BadConstants,
                    format!(
                        "{name}: instruction {pc} ({}) has {} constants",
                        function.name(),
                        instr.constants.len()
                    )
                );
            }

            index_field_size += function.index_field_size();
            working_storage_size += function.working_storage_size();
        }

        debug!(
            "composed {name}: {len} instructions, index field {index_field_size}, working storage {working_storage_size}"
        );

        Ok(ComposedFunction {
            name: name.to_owned(),
            param_count,
            local_count,
            instructions,
            index_field_size,
            working_storage_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    pub fn local_count(&self) -> usize {
        self.local_count
    }

    pub fn index_field_size(&self) -> usize {
        self.index_field_size
    }

    pub fn working_storage_size(&self) -> usize {
        self.working_storage_size
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub(crate) fn header_size(&self) -> usize {
        2 + self.param_count
    }

    /// Resolves every nested segment of `field` from its already-filled
    /// header.  Touches no working array.
    pub fn fill_index_field(&self, field: &mut [usize]) {
        let mut base = self.header_size();
        let mut private = field[1] + self.local_count;
        let mut previous_base = base;

        for instr in self.instructions.iter() {
            let size = instr.function.index_field_size();
            for (i, id) in instr.params.iter().enumerate() {
                // params[0] is the result, the rest follow the private base
                let slot = if i == 0 { 0 } else { i + 1 };
                field[base + slot] = match *id {
                    ParameterIdentifier::Caller(s) => field[s],
                    ParameterIdentifier::Local(v) => field[1] + v,
                    ParameterIdentifier::Previous(s) => field[previous_base + s],
                };
            }
            field[base + 1] = private;
            private += instr.function.working_storage_size();

            instr.function.fill_index_field(&mut field[base..base + size]);

            previous_base = base;
            base += size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::{Builtin, NullContext};
    use crate::common::ErrorCode;
    use crate::function::Activation;
    use crate::function::ParameterIdentifier::*;

    fn add_then_neg() -> ComposedFunction {
        // V0 = P0 + P1; RET = -V0
        let instructions = vec![
            Instruction::with_params(Builtin::Add, [Local(0), Caller(2), Caller(3)]),
            Instruction::with_params(Builtin::Neg, [Caller(0), Local(0)]),
        ];
        ComposedFunction::compose("addneg", 1, 2, instructions).unwrap()
    }

    #[test]
    fn test_arity_is_additive() {
        let f = add_then_neg();
        assert_eq!(2 + 2 + 4 + 3, f.index_field_size());
        assert_eq!(1, f.working_storage_size());
        assert_eq!(2, f.param_count());
        assert_eq!(1, f.local_count());
    }

    #[test]
    fn test_fill_index_field() {
        let activation = Activation::new(Function::from(add_then_neg()));
        // working: [result, p0, p1, v0]
        assert_eq!(
            &[0, 3, 1, 2, /* add */ 3, 4, 1, 2, /* neg */ 0, 4, 3],
            &activation.index_field()[..]
        );

        let mut working = activation.working_array();
        activation.set_param(&mut working, 0, 3.0);
        activation.set_param(&mut working, 1, 4.0);
        assert_eq!(-7.0, activation.evaluate(&mut working, &mut NullContext));
        assert_eq!(7.0, working[3]);
    }

    #[test]
    fn test_previous_chains_results() {
        // RET = (P0 * P0) + P0, naming no intermediate
        let instructions = vec![
            Instruction::with_params(Builtin::Mul, [Caller(0), Caller(2), Caller(2)]),
            Instruction::with_params(Builtin::Add, [Caller(0), Previous(0), Caller(2)]),
        ];
        let f = ComposedFunction::compose("sqplus", 0, 1, instructions).unwrap();
        let activation = Activation::new(Function::from(f));
        let mut working = activation.working_array();
        activation.set_param(&mut working, 0, 3.0);
        assert_eq!(12.0, activation.evaluate(&mut working, &mut NullContext));
    }

    #[test]
    fn test_nested_composition() {
        let inner = Function::from(add_then_neg());
        // RET = addneg(P0, 1.5) with the constant loaded into a local
        let instructions = vec![
            Instruction::with_params(Builtin::Ldc, [Local(0)]).constants(vec![1.5]),
            Instruction::with_params(inner.clone(), [Caller(0), Caller(2), Local(0)]),
        ];
        let outer = ComposedFunction::compose("outer", 1, 1, instructions).unwrap();
        assert_eq!(2 + 1 + 2 + inner.index_field_size(), outer.index_field_size());
        assert_eq!(1 + inner.working_storage_size(), outer.working_storage_size());

        let activation = Activation::new(Function::from(outer));
        let mut working = activation.working_array();
        activation.set_param(&mut working, 0, 2.0);
        assert_eq!(-3.5, activation.evaluate(&mut working, &mut NullContext));
    }

    #[test]
    fn test_compose_errors() {
        let check = |local_count, param_count, instructions: Vec<Instruction>| {
            ComposedFunction::compose("bad", local_count, param_count, instructions)
                .unwrap_err()
                .code
        };

        assert_eq!(
            ErrorCode::ArityMismatch,
            check(0, 1, vec![Instruction::with_params(Builtin::Add, [Caller(0), Caller(2)])])
        );
        assert_eq!(
            ErrorCode::BadSlot,
            check(0, 1, vec![Instruction::with_params(Builtin::Neg, [Caller(0), Caller(3)])])
        );
        assert_eq!(
            ErrorCode::BadSlot,
            check(0, 1, vec![Instruction::with_params(Builtin::Neg, [Caller(1), Caller(2)])])
        );
        assert_eq!(
            ErrorCode::BadSlot,
            check(1, 1, vec![Instruction::with_params(Builtin::Neg, [Caller(0), Local(1)])])
        );
        assert_eq!(
            ErrorCode::NoPreviousInstruction,
            check(0, 1, vec![Instruction::with_params(Builtin::Neg, [Caller(0), Previous(0)])])
        );
        assert_eq!(
            ErrorCode::BadSlot,
            check(
                0,
                1,
                vec![
                    Instruction::with_params(Builtin::Neg, [Caller(0), Caller(2)]),
                    Instruction::with_params(Builtin::Neg, [Caller(0), Previous(3)]),
                ]
            )
        );
        assert_eq!(
            ErrorCode::BadJump,
            check(0, 0, vec![Instruction::with_params(Builtin::Jmp, [Caller(0)])])
        );
        assert_eq!(
            ErrorCode::BadJump,
            check(0, 0, vec![Instruction::with_params(Builtin::Jmp, [Caller(0)]).jump(0)])
        );
        assert_eq!(
            ErrorCode::BadJump,
            check(0, 0, vec![Instruction::with_params(Builtin::Jmp, [Caller(0)]).jump(2)])
        );
        assert_eq!(
            ErrorCode::BadJump,
            check(0, 1, vec![Instruction::with_params(Builtin::Neg, [Caller(0), Caller(2)]).jump(1)])
        );
        assert_eq!(
            ErrorCode::BadConstants,
            check(0, 1, vec![Instruction::with_params(Builtin::Pwl, [Caller(0), Caller(2)]).constants(vec![1.0, 2.0, 3.0])])
        );
        assert_eq!(
            ErrorCode::BadConstants,
            check(0, 0, vec![Instruction::with_params(Builtin::Ldc, [Caller(0)])])
        );
    }

    #[test]
    fn test_jump_to_end_is_allowed() {
        let instructions = vec![Instruction::with_params(Builtin::Jmp, [Caller(0)]).jump(1)];
        let f = ComposedFunction::compose("skip", 0, 0, instructions).unwrap();
        assert_eq!(2 + 2, f.index_field_size());
        assert_eq!(1, f.instructions().len());
    }
}
