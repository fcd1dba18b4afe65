// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Behavioral-expression compiler and function VM for a mixed-signal
//! circuit simulator.
//!
//! Expressions such as `V(in) > VPOS/2 && I(r1) < 1m` compile to a flat,
//! deduplicated [`AtomArray`].  Custom functions are sequences of
//! builtin or previously composed functions run by a small VM over a
//! caller-supplied working array, and can be differentiated black-box.

#![forbid(unsafe_code)]

pub mod common;
pub mod settings;

mod atom;
mod batch;
mod builtins;
mod compiler;
#[cfg(test)]
mod compiler_proptest;
mod composer;
mod differentiate;
mod function;
mod function_def;
mod interpreter;
mod stream;
pub mod token;
mod vm;

pub use self::atom::{Atom, AtomArray, AtomId, Op};
pub use self::batch::evaluate_batch;
pub use self::builtins::{Builtin, Catalog, ConstantSpec, Control, NullContext, Rail, SimContext};
pub use self::common::{Error, ErrorCode, ErrorKind, Result};
pub use self::compiler::{Compiler, compile};
pub use self::composer::ComposedFunction;
pub use self::differentiate::{
    DEFAULT_RELATIVE_STEP, derivative, derivative_with_step, gradient, gradient_with_step,
};
pub use self::function::{Activation, Function, IndexField, Instruction, ParameterIdentifier, Params};
pub use self::function_def::Library;
pub use self::interpreter::{Bindings, NameKind, classify};
pub use self::settings::Settings;
pub use self::stream::{FunctionRef, InstructionSink, Message};
