// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::builtins::{Builtin, Control, SimContext};
use crate::common::Result;
use crate::composer::ComposedFunction;
use crate::differentiate::{self, DEFAULT_RELATIVE_STEP};
use crate::func_err;
use crate::settings::Settings;

/// Where an instruction operand lives, relative to the enclosing
/// composed function.  Resolved to absolute offsets once, when the
/// index field is filled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterIdentifier {
    /// a slot of the enclosing function's own index field header: 0 is
    /// its result, `2..2+param_count` its parameters
    Caller(usize),
    /// one of the enclosing function's local variables
    Local(usize),
    /// a slot of the previous instruction's segment
    Previous(usize),
}

#[derive(Clone, Debug)]
pub enum Function {
    Builtin(Builtin),
    Composed(Arc<ComposedFunction>),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Builtin(builtin) => builtin.mnemonic(),
            Function::Composed(composed) => composed.name(),
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            Function::Builtin(builtin) => builtin.param_count(),
            Function::Composed(composed) => composed.param_count(),
        }
    }

    pub fn index_field_size(&self) -> usize {
        match self {
            Function::Builtin(builtin) => builtin.index_field_size(),
            Function::Composed(composed) => composed.index_field_size(),
        }
    }

    pub fn working_storage_size(&self) -> usize {
        match self {
            Function::Builtin(builtin) => builtin.working_storage_size(),
            Function::Composed(composed) => composed.working_storage_size(),
        }
    }

    pub fn jumps(&self) -> bool {
        match self {
            Function::Builtin(builtin) => builtin.jumps(),
            Function::Composed(_) => false,
        }
    }

    /// Whether an instruction calling this function may carry `n` extra
    /// constants.  Composed functions never take any.
    pub fn accepts_constants(&self, n: usize) -> bool {
        match self {
            Function::Builtin(builtin) => builtin.constants().accepts(n),
            Function::Composed(_) => n == 0,
        }
    }

    /// Fills everything below the header of `field`.  Slots 0, 1 and the
    /// parameter offsets must already be set by the caller.
    pub fn fill_index_field(&self, field: &mut [usize]) {
        match self {
            Function::Builtin(_) => {}
            Function::Composed(composed) => composed.fill_index_field(field),
        }
    }

    #[inline]
    pub fn evaluate(
        &self,
        field: &[usize],
        working: &mut [f64],
        ctx: &mut dyn SimContext,
        instr: &Instruction,
    ) -> Control {
        match self {
            Function::Builtin(builtin) => builtin.evaluate(field, working, ctx, instr),
            Function::Composed(composed) => {
                composed.evaluate(field, working, ctx);
                Control::Continue
            }
        }
    }
}

impl From<Builtin> for Function {
    fn from(builtin: Builtin) -> Self {
        Function::Builtin(builtin)
    }
}

impl From<ComposedFunction> for Function {
    fn from(composed: ComposedFunction) -> Self {
        Function::Composed(Arc::new(composed))
    }
}

impl From<Arc<ComposedFunction>> for Function {
    fn from(composed: Arc<ComposedFunction>) -> Self {
        Function::Composed(composed)
    }
}

pub type Params = SmallVec<[ParameterIdentifier; 4]>;

#[derive(Clone, Debug)]
pub struct Instruction {
    pub function: Function,
    /// `params[0]` is the instruction's own result
    pub params: Params,
    pub constants: Vec<f64>,
    pub jump: Option<i32>,
}

impl Instruction {
    /// An instruction that passes its caller's result and parameters
    /// straight through.
    pub fn new(function: Function) -> Self {
        let params = std::iter::once(ParameterIdentifier::Caller(0))
            .chain((0..function.param_count()).map(|i| ParameterIdentifier::Caller(2 + i)))
            .collect();
        Instruction {
            function,
            params,
            constants: vec![],
            jump: None,
        }
    }

    pub fn with_params<F, I>(function: F, params: I) -> Self
    where
        F: Into<Function>,
        I: IntoIterator<Item = ParameterIdentifier>,
    {
        Instruction {
            function: function.into(),
            params: params.into_iter().collect(),
            constants: vec![],
            jump: None,
        }
    }

    pub fn constants(mut self, constants: Vec<f64>) -> Self {
        self.constants = constants;
        self
    }

    pub fn jump(mut self, displacement: i32) -> Self {
        self.jump = Some(displacement);
        self
    }
}

/// Per-activation array of offsets into a working array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexField(Box<[usize]>);

impl IndexField {
    pub fn new(size: usize) -> Self {
        IndexField(vec![0; size].into_boxed_slice())
    }
}

impl Deref for IndexField {
    type Target = [usize];

    fn deref(&self) -> &[usize] {
        &self.0
    }
}

impl DerefMut for IndexField {
    fn deref_mut(&mut self) -> &mut [usize] {
        &mut self.0
    }
}

/// The outermost activation of a function.  Working arrays created for
/// it are laid out as `[result, params..., private storage...]`.
#[derive(Clone, Debug)]
pub struct Activation {
    instruction: Instruction,
    field: IndexField,
    working_len: usize,
    relative_step: f64,
}

impl Activation {
    pub fn new(function: Function) -> Self {
        Self::build(function, vec![])
    }

    /// Like `new`, with the differencing step taken from `settings`.
    pub fn with_settings(function: Function, settings: &Settings) -> Self {
        Self::new(function).relative_step(settings.relative_step)
    }

    /// An activation whose instruction carries extra constants, such as
    /// the breakpoint table of `_PWL`.  Fails with `BadConstants` when the
    /// function takes no constants or a different number of them.
    pub fn with_constants(function: Function, constants: Vec<f64>) -> Result<Self> {
        if !function.accepts_constants(constants.len()) {
            return func_err!(
                BadConstants,
                format!("{} cannot take {} constants", function.name(), constants.len())
            );
        }
        Ok(Self::build(function, constants))
    }

    fn build(function: Function, constants: Vec<f64>) -> Self {
        let param_count = function.param_count();
        let private_base = 1 + param_count;

        let mut field = IndexField::new(function.index_field_size());
        field[0] = 0;
        field[1] = private_base;
        for i in 0..param_count {
            field[2 + i] = 1 + i;
        }
        function.fill_index_field(&mut field);

        let working_len = private_base + function.working_storage_size();
        let instruction = Instruction::new(function).constants(constants);

        Activation {
            instruction,
            field,
            working_len,
            relative_step: DEFAULT_RELATIVE_STEP,
        }
    }

    /// Sets the relative perturbation used by `derivative` and `gradient`.
    pub fn relative_step(mut self, step: f64) -> Self {
        self.relative_step = step;
        self
    }

    pub fn step(&self) -> f64 {
        self.relative_step
    }

    pub fn function(&self) -> &Function {
        &self.instruction.function
    }

    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    pub fn index_field(&self) -> &IndexField {
        &self.field
    }

    /// A fresh, zeroed working array.  Every concurrent caller needs its
    /// own.
    pub fn working_array(&self) -> Vec<f64> {
        vec![0.0; self.working_len]
    }

    pub fn set_param(&self, working: &mut [f64], i: usize, value: f64) {
        working[self.field[2 + i]] = value;
    }

    pub fn param(&self, working: &[f64], i: usize) -> f64 {
        working[self.field[2 + i]]
    }

    pub fn result(&self, working: &[f64]) -> f64 {
        working[self.field[0]]
    }

    pub fn evaluate(&self, working: &mut [f64], ctx: &mut dyn SimContext) -> f64 {
        self.instruction
            .function
            .evaluate(&self.field, working, ctx, &self.instruction);
        self.result(working)
    }

    /// Partial derivative of the result with respect to parameter `i`,
    /// taken at the values currently in `working`.
    pub fn derivative(&self, working: &mut [f64], ctx: &mut dyn SimContext, i: usize) -> f64 {
        differentiate::derivative_with_step(
            &self.instruction.function,
            &self.field,
            working,
            ctx,
            &self.instruction,
            2 + i,
            self.relative_step,
        )
    }

    pub fn gradient(&self, working: &mut [f64], ctx: &mut dyn SimContext) -> Vec<f64> {
        differentiate::gradient_with_step(
            &self.instruction.function,
            &self.field,
            working,
            ctx,
            &self.instruction,
            self.relative_step,
        )
    }
}

#[test]
fn test_builtin_activation_layout() {
    let activation = Activation::new(Function::Builtin(Builtin::Tlt));
    assert_eq!(&[0, 5, 1, 2, 3, 4], &activation.index_field()[..]);
    assert_eq!(5, activation.working_array().len());

    let activation = Activation::new(Function::Builtin(Builtin::Last));
    assert_eq!(&[0, 2, 1], &activation.index_field()[..]);
    assert_eq!(3, activation.working_array().len());
}

#[test]
fn test_instruction_new_binds_identity() {
    use ParameterIdentifier::Caller;
    let instr = Instruction::new(Function::Builtin(Builtin::Add));
    assert_eq!(&[Caller(0), Caller(2), Caller(3)], &instr.params[..]);
    assert!(instr.constants.is_empty());
    assert_eq!(None, instr.jump);
}

#[test]
fn test_activation_rejects_unexpected_constants() {
    use crate::common::ErrorCode;

    let err = Activation::with_constants(Function::Builtin(Builtin::Add), vec![1.0]).unwrap_err();
    assert_eq!(ErrorCode::BadConstants, err.code);
    let err = Activation::with_constants(Function::Builtin(Builtin::Pwl), vec![1.0]).unwrap_err();
    assert_eq!(ErrorCode::BadConstants, err.code);

    let composed = ComposedFunction::compose(
        "pass",
        0,
        1,
        vec![Instruction::with_params(
            Builtin::Mov,
            [ParameterIdentifier::Caller(0), ParameterIdentifier::Caller(2)],
        )],
    )
    .unwrap();
    let function = Function::from(composed);
    let err = Activation::with_constants(function.clone(), vec![2.0]).unwrap_err();
    assert_eq!(ErrorCode::BadConstants, err.code);
    let activation = Activation::with_constants(function, vec![]).unwrap();
    assert!(activation.instruction().constants.is_empty());
}

#[test]
fn test_settings_choose_the_differencing_step() {
    use crate::builtins::NullContext;

    // at the origin the step is absolute, so d(x^2)/dx comes out as h
    let settings = Settings {
        relative_step: 1e-3,
        ..Settings::default()
    };
    let coarse = Activation::with_settings(Function::Builtin(Builtin::Sqr), &settings);
    assert_eq!(1e-3, coarse.step());
    let mut working = coarse.working_array();
    coarse.evaluate(&mut working, &mut NullContext);
    let d = coarse.derivative(&mut working, &mut NullContext, 0);
    assert!(float_cmp::approx_eq!(f64, 1e-3, d, epsilon = 1e-12), "{d}");
    let g = coarse.gradient(&mut working, &mut NullContext);
    assert!(float_cmp::approx_eq!(f64, 1e-3, g[0], epsilon = 1e-12), "{g:?}");

    let fine = Activation::new(Function::Builtin(Builtin::Sqr));
    assert_eq!(DEFAULT_RELATIVE_STEP, fine.step());
    let mut working = fine.working_array();
    fine.evaluate(&mut working, &mut NullContext);
    let d = fine.derivative(&mut working, &mut NullContext, 0);
    assert!(d.abs() < 1e-8, "{d}");
}
