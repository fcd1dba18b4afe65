// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use crate::builtins::SimContext;
use crate::function::{Activation, Function, Instruction};

/// Evaluates one function and index field against many working arrays,
/// one context per array, and returns each array's result.  The function
/// and field are shared read-only; each array is touched by exactly one
/// worker.
pub fn evaluate_batch<C, M>(
    function: &Function,
    field: &[usize],
    instr: &Instruction,
    working_arrays: &mut [Vec<f64>],
    make_ctx: M,
) -> Vec<f64>
where
    C: SimContext,
    M: Fn(usize) -> C + Sync + Send,
{
    let run = |(i, working): (usize, &mut Vec<f64>)| {
        let mut ctx = make_ctx(i);
        function.evaluate(field, working, &mut ctx, instr);
        working[field[0]]
    };

    #[cfg(not(target_arch = "wasm32"))]
    let results: Vec<f64> = {
        use rayon::prelude::*;
        working_arrays.par_iter_mut().enumerate().map(run).collect()
    };

    #[cfg(target_arch = "wasm32")]
    let results: Vec<f64> = working_arrays.iter_mut().enumerate().map(run).collect();

    results
}

impl Activation {
    pub fn evaluate_batch<C, M>(&self, working_arrays: &mut [Vec<f64>], make_ctx: M) -> Vec<f64>
    where
        C: SimContext,
        M: Fn(usize) -> C + Sync + Send,
    {
        evaluate_batch(
            self.function(),
            self.index_field(),
            self.instruction(),
            working_arrays,
            make_ctx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::{Builtin, NullContext, Rail};
    use crate::composer::ComposedFunction;
    use crate::function::ParameterIdentifier::*;

    struct Supply {
        vpos: f64,
    }

    impl SimContext for Supply {
        fn time(&self) -> f64 {
            0.0
        }
        fn timestep(&self) -> f64 {
            0.0
        }
        fn frequency(&self) -> f64 {
            0.0
        }
        fn rail(&self, rail: Rail) -> f64 {
            match rail {
                Rail::Positive => self.vpos,
                Rail::Negative => -self.vpos,
            }
        }
        fn node_state(&self, _node: usize) -> f64 {
            0.0
        }
        fn set_node_state(&mut self, _node: usize, _value: f64) {}
    }

    // RET = min(P0 * P1, VPOS)
    fn clipped_product() -> Function {
        let f = ComposedFunction::compose(
            "clipmul",
            1,
            2,
            vec![
                Instruction::with_params(Builtin::Mul, [Caller(0), Caller(2), Caller(3)]),
                Instruction::with_params(Builtin::Vpos, [Local(0)]),
                Instruction::with_params(Builtin::Min, [Caller(0), Caller(0), Local(0)]),
            ],
        )
        .unwrap();
        Function::from(f)
    }

    fn inputs(activation: &Activation, n: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| {
                let mut working = activation.working_array();
                activation.set_param(&mut working, 0, i as f64);
                activation.set_param(&mut working, 1, 0.5);
                working
            })
            .collect()
    }

    #[test]
    fn test_batch_matches_sequential() {
        let activation = Activation::new(clipped_product());
        let vpos = |i: usize| Supply {
            vpos: 10.0 + (i % 3) as f64,
        };

        let mut batch = inputs(&activation, 64);
        let results = activation.evaluate_batch(&mut batch, vpos);

        let mut sequential = inputs(&activation, 64);
        for (i, (working, result)) in sequential.iter_mut().zip(results.iter()).enumerate() {
            let expected = activation.evaluate(working, &mut vpos(i));
            assert_eq!(expected, *result, "array {i}");
        }
        assert_eq!(sequential, batch);
        assert_eq!(10.0, results[63]);
        assert_eq!(2.5, results[5]);
    }

    #[test]
    fn test_empty_batch() {
        let activation = Activation::new(Function::Builtin(Builtin::Add));
        let results = evaluate_batch(
            activation.function(),
            activation.index_field(),
            activation.instruction(),
            &mut [],
            |_| NullContext,
        );
        assert!(results.is_empty());
    }
}
