// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Black-box partial derivatives by forward differencing.  Works the
//! same for every function, builtin or composed, at the cost of one
//! extra evaluation per derivative.
//!
//! Perturbing and restoring happens in place, so two derivatives must
//! never be taken concurrently against the same working array.

use crate::builtins::SimContext;
use crate::function::{Function, Instruction};

pub const DEFAULT_RELATIVE_STEP: f64 = 1e-9;

/// d(result)/d(operand at `wrt_slot`), with `field[wrt_slot]` naming the
/// operand.  The result in `working` must be current.
pub fn derivative(
    function: &Function,
    field: &[usize],
    working: &mut [f64],
    ctx: &mut dyn SimContext,
    instr: &Instruction,
    wrt_slot: usize,
) -> f64 {
    derivative_with_step(
        function,
        field,
        working,
        ctx,
        instr,
        wrt_slot,
        DEFAULT_RELATIVE_STEP,
    )
}

pub fn derivative_with_step(
    function: &Function,
    field: &[usize],
    working: &mut [f64],
    ctx: &mut dyn SimContext,
    instr: &Instruction,
    wrt_slot: usize,
    relative_step: f64,
) -> f64 {
    let result_at = field[0];
    let operand_at = field[wrt_slot];

    let result = working[result_at];
    let operand = working[operand_at];

    let mut h = (result.abs() + operand.abs()) * relative_step;
    if h == 0.0 {
        h = relative_step;
    }

    working[operand_at] = operand + h;
    function.evaluate(field, working, ctx, instr);
    let perturbed = working[result_at];

    working[operand_at] = operand;
    working[result_at] = result;

    (perturbed - result) / h
}

/// Derivatives with respect to every parameter, in parameter order.
pub fn gradient(
    function: &Function,
    field: &[usize],
    working: &mut [f64],
    ctx: &mut dyn SimContext,
    instr: &Instruction,
) -> Vec<f64> {
    gradient_with_step(function, field, working, ctx, instr, DEFAULT_RELATIVE_STEP)
}

pub fn gradient_with_step(
    function: &Function,
    field: &[usize],
    working: &mut [f64],
    ctx: &mut dyn SimContext,
    instr: &Instruction,
    relative_step: f64,
) -> Vec<f64> {
    (0..function.param_count())
        .map(|i| derivative_with_step(function, field, working, ctx, instr, 2 + i, relative_step))
        .collect()
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;

    use super::*;
    use crate::builtins::{Builtin, NullContext};
    use crate::composer::ComposedFunction;
    use crate::function::Activation;
    use crate::function::ParameterIdentifier::*;

    #[test]
    fn test_multiply() {
        let activation = Activation::new(Function::Builtin(Builtin::Mul));
        let mut working = activation.working_array();
        activation.set_param(&mut working, 0, 3.0);
        activation.set_param(&mut working, 1, 4.0);
        assert_eq!(12.0, activation.evaluate(&mut working, &mut NullContext));

        let before = working.clone();
        let d = activation.derivative(&mut working, &mut NullContext, 0);
        assert!(approx_eq!(f64, 4.0, d, epsilon = 1e-5), "{d}");
        assert_eq!(before, working);
        assert_eq!(12.0, activation.result(&working));
    }

    #[test]
    fn test_zero_point_uses_fallback_step() {
        let activation = Activation::new(Function::Builtin(Builtin::Sqr));
        let mut working = activation.working_array();
        activation.evaluate(&mut working, &mut NullContext);
        let d = activation.derivative(&mut working, &mut NullContext, 0);
        assert!(approx_eq!(f64, 0.0, d, epsilon = 1e-6), "{d}");
        assert!(d.is_finite());
    }

    #[test]
    fn test_explicit_step() {
        let activation = Activation::new(Function::Builtin(Builtin::Exp));
        let mut working = activation.working_array();
        activation.set_param(&mut working, 0, 1.0);
        activation.evaluate(&mut working, &mut NullContext);
        let d = derivative_with_step(
            activation.function(),
            activation.index_field(),
            &mut working,
            &mut NullContext,
            activation.instruction(),
            2,
            1e-7,
        );
        assert!(approx_eq!(f64, std::f64::consts::E, d, epsilon = 1e-5), "{d}");
    }

    #[test]
    fn test_gradient_through_composed_function() {
        // RET = P0 * P1 + P1
        let f = ComposedFunction::compose(
            "f",
            0,
            2,
            vec![
                Instruction::with_params(Builtin::Mul, [Caller(0), Caller(2), Caller(3)]),
                Instruction::with_params(Builtin::Add, [Caller(0), Previous(0), Caller(3)]),
            ],
        )
        .unwrap();
        let activation = Activation::new(Function::from(f));
        let mut working = activation.working_array();
        activation.set_param(&mut working, 0, 2.0);
        activation.set_param(&mut working, 1, 5.0);
        assert_eq!(15.0, activation.evaluate(&mut working, &mut NullContext));

        let gradient = activation.gradient(&mut working, &mut NullContext);
        assert_eq!(2, gradient.len());
        assert!(approx_eq!(f64, 5.0, gradient[0], epsilon = 1e-5));
        assert!(approx_eq!(f64, 3.0, gradient[1], epsilon = 1e-5));
        assert_eq!(15.0, activation.result(&working));
        assert_eq!(2.0, activation.param(&working, 0));
    }
}
