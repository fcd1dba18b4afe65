// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Property-based tests for the expression compiler:
//! 1. compiling the same text twice gives identical atom arrays
//! 2. a compiled expression evaluates to what its tree evaluates to
//! 3. runs of unary signs collapse by parity
//! 4. repeated subexpressions are stored once

use std::collections::HashMap;

use float_cmp::approx_eq;
use proptest::prelude::*;

use crate::compiler::compile;

const NAMES: [&str; 3] = ["alpha", "beta", "gamma"];

#[derive(Clone, Debug)]
enum Expr {
    Num(u8),
    Var(usize),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn render(&self) -> String {
        match self {
            Expr::Num(n) => n.to_string(),
            Expr::Var(i) => NAMES[*i].to_owned(),
            Expr::Neg(a) => format!("-({})", a.render()),
            Expr::Add(a, b) => format!("({} + {})", a.render(), b.render()),
            Expr::Sub(a, b) => format!("({} - {})", a.render(), b.render()),
            Expr::Mul(a, b) => format!("({} * {})", a.render(), b.render()),
        }
    }

    fn eval(&self, vars: &[f64; 3]) -> f64 {
        match self {
            Expr::Num(n) => *n as f64,
            Expr::Var(i) => vars[*i],
            Expr::Neg(a) => -a.eval(vars),
            Expr::Add(a, b) => a.eval(vars) + b.eval(vars),
            Expr::Sub(a, b) => a.eval(vars) - b.eval(vars),
            Expr::Mul(a, b) => a.eval(vars) * b.eval(vars),
        }
    }
}

fn expr_strategy() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        (0u8..10).prop_map(Expr::Num),
        (0usize..NAMES.len()).prop_map(Expr::Var),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(|a| Expr::Neg(Box::new(a))),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Expr::Add(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Expr::Sub(Box::new(a), Box::new(b))),
            (inner.clone(), inner).prop_map(|(a, b)| Expr::Mul(Box::new(a), Box::new(b))),
        ]
    })
}

fn vars_strategy() -> impl Strategy<Value = [f64; 3]> {
    let quarter = |x: i32| x as f64 / 4.0;
    [
        (-100i32..100).prop_map(quarter),
        (-100i32..100).prop_map(quarter),
        (-100i32..100).prop_map(quarter),
    ]
}

fn signs_strategy() -> impl Strategy<Value = String> {
    "[+-]{0,8}".prop_map(|s| s.to_string())
}

proptest! {
    #[test]
    fn compile_is_deterministic(expr in expr_strategy()) {
        let text = expr.render();
        prop_assert_eq!(compile(&text).unwrap(), compile(&text).unwrap());
    }

    #[test]
    fn compiled_matches_tree(expr in expr_strategy(), vars in vars_strategy()) {
        let atoms = compile(&expr.render()).unwrap();
        let bindings: HashMap<String, f64> = NAMES
            .iter()
            .zip(vars.iter())
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        let expected = expr.eval(&vars);
        let actual = atoms.evaluate(&bindings).unwrap();
        prop_assert!(
            approx_eq!(f64, expected, actual, ulps = 4),
            "{} gave {actual}, expected {expected}",
            expr.render()
        );
    }

    #[test]
    fn unary_signs_collapse(signs in signs_strategy()) {
        let negative = signs.chars().filter(|&c| c == '-').count() % 2 == 1;

        let collapsed = if negative { "-alpha" } else { "alpha" };
        prop_assert_eq!(
            compile(collapsed).unwrap(),
            compile(&format!("{signs}alpha")).unwrap()
        );

        let collapsed = if negative { "-3" } else { "3" };
        prop_assert_eq!(
            compile(collapsed).unwrap(),
            compile(&format!("{signs}3")).unwrap()
        );
    }

    #[test]
    fn common_subexpressions_are_shared(expr in expr_strategy()) {
        let text = expr.render();
        let once = compile(&text).unwrap();
        let twice = compile(&format!("{text} + {text}")).unwrap();
        prop_assert!(twice.len() <= once.len() + 1);
    }
}
