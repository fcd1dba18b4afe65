// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The ordered message stream compiled expressions and composed
//! functions are handed downstream on.  Messages are only ever appended;
//! a consumer sees an expression's atoms, or a function's instructions,
//! in index order between the matching begin and end messages.

use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use crate::atom::{Atom, AtomArray, AtomId};
use crate::common::Result;
use crate::composer::ComposedFunction;
use crate::eval_err;
use crate::function::{Function, Instruction, ParameterIdentifier};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunctionRef {
    Builtin { id: u16, mnemonic: String },
    Composed { name: String },
}

impl From<&Function> for FunctionRef {
    fn from(function: &Function) -> Self {
        match function {
            Function::Builtin(builtin) => FunctionRef::Builtin {
                id: builtin.id(),
                mnemonic: builtin.mnemonic().to_owned(),
            },
            Function::Composed(composed) => FunctionRef::Composed {
                name: composed.name().to_owned(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    BeginExpression {
        name: String,
        atom_count: usize,
        root: AtomId,
    },
    Atom {
        index: AtomId,
        atom: Atom,
    },
    EndExpression {
        name: String,
    },
    BeginFunction {
        name: String,
        param_count: usize,
        local_count: usize,
        index_field_size: usize,
        working_storage_size: usize,
    },
    Instruction {
        index: usize,
        function: FunctionRef,
        params: Vec<ParameterIdentifier>,
        constants: Vec<f64>,
        jump: Option<i32>,
    },
    EndFunction {
        name: String,
    },
}

impl Message {
    fn instruction(index: usize, instr: &Instruction) -> Self {
        Message::Instruction {
            index,
            function: FunctionRef::from(&instr.function),
            params: instr.params.to_vec(),
            constants: instr.constants.clone(),
            jump: instr.jump,
        }
    }
}

/// Wherever emitted messages go.
pub trait InstructionSink {
    fn send(&mut self, message: Message) -> Result<()>;
}

impl InstructionSink for Vec<Message> {
    fn send(&mut self, message: Message) -> Result<()> {
        self.push(message);
        Ok(())
    }
}

impl InstructionSink for mpsc::Sender<Message> {
    fn send(&mut self, message: Message) -> Result<()> {
        match mpsc::Sender::send(self, message) {
            Ok(()) => Ok(()),
            Err(_) => eval_err!(SinkClosed, "the receiver has hung up".to_owned()),
        }
    }
}

impl AtomArray {
    pub fn emit(&self, name: &str, sink: &mut dyn InstructionSink) -> Result<()> {
        sink.send(Message::BeginExpression {
            name: name.to_owned(),
            atom_count: self.atoms.len(),
            root: self.root,
        })?;
        for (index, atom) in self.atoms.iter().enumerate() {
            sink.send(Message::Atom {
                index: index as AtomId,
                atom: atom.clone(),
            })?;
        }
        sink.send(Message::EndExpression {
            name: name.to_owned(),
        })
    }
}

impl ComposedFunction {
    pub fn emit(&self, sink: &mut dyn InstructionSink) -> Result<()> {
        sink.send(Message::BeginFunction {
            name: self.name().to_owned(),
            param_count: self.param_count(),
            local_count: self.local_count(),
            index_field_size: self.index_field_size(),
            working_storage_size: self.working_storage_size(),
        })?;
        for (index, instr) in self.instructions.iter().enumerate() {
            sink.send(Message::instruction(index, instr))?;
        }
        sink.send(Message::EndFunction {
            name: self.name().to_owned(),
        })
    }
}
