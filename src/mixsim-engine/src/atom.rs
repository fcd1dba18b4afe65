// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The compiled form of an expression: a topologically ordered array
//! of atoms where every operand index points strictly backwards.

use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::builtins::{bool_value, inverse, is_truthy, lookup, qcnl, ramp, unit_step};
use crate::common::Result;
use crate::syntax_err;

pub type AtomId = u32;

/// Operators an expression atom can apply.  List operators (`Ratio`,
/// `Pwl`) take their arguments through a chain of list elements and are
/// never folded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    // unary
    Neg,
    Not,
    Square,
    // binary
    Pow,
    Mul,
    Div,
    Add,
    Sub,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    And,
    Or,
    // single-argument functions
    Inv,
    Sqrt,
    Exp,
    Ln,
    Log,
    Abs,
    Qcnl,
    Unit,
    Uramp,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    // list functions
    Ratio,
    Pwl,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Op {
    pub fn name(self) -> &'static str {
        use Op::*;
        match self {
            Neg => "neg",
            Not => "not",
            Square => "square",
            Pow => "pow",
            Mul => "mul",
            Div => "div",
            Add => "add",
            Sub => "sub",
            Lt => "lt",
            Lte => "lte",
            Gt => "gt",
            Gte => "gte",
            Eq => "eq",
            Neq => "neq",
            And => "and",
            Or => "or",
            Inv => "inv",
            Sqrt => "sqrt",
            Exp => "exp",
            Ln => "ln",
            Log => "log",
            Abs => "abs",
            Qcnl => "qcnl",
            Unit => "unit",
            Uramp => "uramp",
            Sin => "sin",
            Cos => "cos",
            Tan => "tan",
            Asin => "asin",
            Acos => "acos",
            Atan => "atan",
            Sinh => "sinh",
            Cosh => "cosh",
            Tanh => "tanh",
            Asinh => "asinh",
            Acosh => "acosh",
            Atanh => "atanh",
            Ratio => "ratio",
            Pwl => "pwl",
        }
    }

    /// Looks up a single-argument function by (case-insensitive) name.
    pub fn from_function_name(name: &str) -> Option<Op> {
        use Op::*;
        let op = match name.to_ascii_uppercase().as_str() {
            "INV" | ".INV" => Inv,
            "SQRT" => Sqrt,
            "EXP" => Exp,
            "LN" => Ln,
            "LOG" => Log,
            "ABS" => Abs,
            "QCNL" => Qcnl,
            "U" | "UNIT" => Unit,
            "URAMP" => Uramp,
            "SIN" => Sin,
            "COS" => Cos,
            "TAN" => Tan,
            "ASIN" => Asin,
            "ACOS" => Acos,
            "ATAN" => Atan,
            "SINH" => Sinh,
            "COSH" => Cosh,
            "TANH" => Tanh,
            "ASINH" => Asinh,
            "ACOSH" => Acosh,
            "ATANH" => Atanh,
            _ => return None,
        };
        Some(op)
    }

    pub fn from_list_name(name: &str) -> Option<Op> {
        match name.to_ascii_uppercase().as_str() {
            "RATIO" => Some(Op::Ratio),
            "PWL" => Some(Op::Pwl),
            _ => None,
        }
    }

    pub fn is_list(self) -> bool {
        matches!(self, Op::Ratio | Op::Pwl)
    }

    /// Applies a unary operator or single-argument function.
    pub fn apply1(self, a: f64) -> f64 {
        use Op::*;
        match self {
            Neg => -a,
            Not => bool_value(!is_truthy(a)),
            Square => a * a,
            Inv => inverse(a),
            Sqrt => a.sqrt(),
            Exp => a.exp(),
            Ln => a.ln(),
            Log => a.log10(),
            Abs => a.abs(),
            Qcnl => qcnl(a),
            Unit => unit_step(a),
            Uramp => ramp(a),
            Sin => a.sin(),
            Cos => a.cos(),
            Tan => a.tan(),
            Asin => a.asin(),
            Acos => a.acos(),
            Atan => a.atan(),
            Sinh => a.sinh(),
            Cosh => a.cosh(),
            Tanh => a.tanh(),
            Asinh => a.asinh(),
            Acosh => a.acosh(),
            Atanh => a.atanh(),
            _ => f64::NAN,
        }
    }

    pub fn apply2(self, a: f64, b: f64) -> f64 {
        use Op::*;
        match self {
            Pow => a.powf(b),
            Mul => a * b,
            Div => a / b,
            Add => a + b,
            Sub => a - b,
            Lt => bool_value(a < b),
            Lte => bool_value(a <= b),
            Gt => bool_value(a > b),
            Gte => bool_value(a >= b),
            Eq => bool_value(float_cmp::approx_eq!(f64, a, b)),
            Neq => bool_value(!float_cmp::approx_eq!(f64, a, b)),
            And => bool_value(is_truthy(a) && is_truthy(b)),
            Or => bool_value(is_truthy(a) || is_truthy(b)),
            _ => f64::NAN,
        }
    }

    /// Applies a list function to its flattened argument list.
    pub fn apply_list(self, args: &[f64]) -> f64 {
        match self {
            Op::Ratio => {
                let (a, b, c) = (args[0], args[1], args[2]);
                if b != 0.0 { a / b } else { c }
            }
            Op::Pwl => lookup(&args[1..], args[0]),
            _ => f64::NAN,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Atom {
    /// occupies index 0 and is never referenced
    Sentinel,
    Const {
        value: f64,
        is_boolean: bool,
    },
    Function {
        op: Op,
        a: AtomId,
        b: Option<AtomId>,
        folded: Option<f64>,
        is_boolean: bool,
    },
    ListElement {
        a: AtomId,
        b: AtomId,
    },
    NameRef(String),
}

impl Atom {
    pub fn is_boolean(&self) -> bool {
        match self {
            Atom::Const { is_boolean, .. } | Atom::Function { is_boolean, .. } => *is_boolean,
            _ => false,
        }
    }

    /// The value of a constant or a constant-folded function.
    pub fn constant(&self) -> Option<f64> {
        match self {
            Atom::Const { value, .. } => Some(*value),
            Atom::Function { folded, .. } => *folded,
            _ => None,
        }
    }

    pub fn operands(&self) -> impl Iterator<Item = AtomId> {
        let (a, b) = match *self {
            Atom::Function { a, b, .. } => (Some(a), b),
            Atom::ListElement { a, b } => (Some(a), Some(b)),
            _ => (None, None),
        };
        a.into_iter().chain(b)
    }

    pub(crate) fn operands_mut(&mut self) -> impl Iterator<Item = &mut AtomId> {
        let (a, b) = match self {
            Atom::Function { a, b, .. } => (Some(a), b.as_mut()),
            Atom::ListElement { a, b } => (Some(a), Some(b)),
            _ => (None, None),
        };
        a.into_iter().chain(b)
    }

    /// Whether two atoms carry the same content for CSE purposes.
    fn same_content(&self, other: &Atom) -> bool {
        match (self, other) {
            (
                Atom::Const {
                    value: l,
                    is_boolean: lb,
                },
                Atom::Const {
                    value: r,
                    is_boolean: rb,
                },
            ) => lb == rb && OrderedFloat(*l) == OrderedFloat(*r),
            (
                Atom::Function {
                    op: lop, a: la, b: lb, ..
                },
                Atom::Function {
                    op: rop, a: ra, b: rb, ..
                },
            ) => lop == rop && la == ra && lb == rb,
            (Atom::ListElement { a: la, b: lb }, Atom::ListElement { a: ra, b: rb }) => {
                la == ra && lb == rb
            }
            (Atom::NameRef(l), Atom::NameRef(r)) => l == r,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AtomArray {
    pub(crate) atoms: Vec<Atom>,
    pub(crate) root: AtomId,
}

impl Default for AtomArray {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomArray {
    pub fn new() -> Self {
        AtomArray {
            atoms: vec![Atom::Sentinel],
            root: 0,
        }
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.len() <= 1
    }

    pub fn get(&self, id: AtomId) -> &Atom {
        &self.atoms[id as usize]
    }

    /// The atom holding the expression's value.
    pub fn root(&self) -> AtomId {
        self.root
    }

    pub fn root_atom(&self) -> &Atom {
        self.get(self.root)
    }

    /// Returns the index of an existing atom with the same content, or
    /// appends `atom`.  Linear in the number of atoms.
    pub fn intern(&mut self, atom: Atom) -> Result<AtomId> {
        if let Some(existing) = self.atoms.iter().position(|a| a.same_content(&atom)) {
            return Ok(existing as AtomId);
        }
        if self.atoms.len() >= AtomId::MAX as usize {
            return syntax_err!(
                ExpressionTooLarge,
                format!("more than {} atoms", AtomId::MAX)
            );
        }
        self.atoms.push(atom);
        Ok((self.atoms.len() - 1) as AtomId)
    }

    /// Flattens the right-folded list chain hanging off a list function.
    pub fn list_arguments(&self, first: AtomId, rest: Option<AtomId>) -> Vec<AtomId> {
        let mut args = vec![first];
        let mut next = rest;
        while let Some(id) = next {
            match *self.get(id) {
                Atom::ListElement { a, b } => {
                    args.push(a);
                    next = Some(b);
                }
                _ => {
                    args.push(id);
                    next = None;
                }
            }
        }
        args
    }

    pub fn name_refs(&self) -> impl Iterator<Item = &str> {
        self.atoms.iter().filter_map(|atom| match atom {
            Atom::NameRef(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

#[test]
fn test_intern_dedups() {
    let mut atoms = AtomArray::new();
    let a1 = atoms
        .intern(Atom::Const {
            value: 1.0,
            is_boolean: false,
        })
        .unwrap();
    let b1 = atoms.intern(Atom::NameRef("@1".to_owned())).unwrap();
    let a2 = atoms
        .intern(Atom::Const {
            value: 1.0,
            is_boolean: false,
        })
        .unwrap();
    let t = atoms
        .intern(Atom::Const {
            value: 1.0,
            is_boolean: true,
        })
        .unwrap();
    let b2 = atoms.intern(Atom::NameRef("@1".to_owned())).unwrap();

    assert_eq!(a1, a2);
    assert_eq!(b1, b2);
    assert_ne!(a1, t);
    assert_eq!(1, a1);
    assert_eq!(4, atoms.len());
}

#[test]
fn test_list_arguments() {
    let mut atoms = AtomArray::new();
    let x = atoms.intern(Atom::NameRef("x".to_owned())).unwrap();
    let one = atoms
        .intern(Atom::Const {
            value: 1.0,
            is_boolean: false,
        })
        .unwrap();
    let two = atoms
        .intern(Atom::Const {
            value: 2.0,
            is_boolean: false,
        })
        .unwrap();
    let tail = atoms.intern(Atom::ListElement { a: one, b: two }).unwrap();
    assert_eq!(vec![x, one, two], atoms.list_arguments(x, Some(tail)));
    assert_eq!(vec![x], atoms.list_arguments(x, None));
}

#[test]
fn test_op_apply() {
    assert_eq!(9.0, Op::Square.apply1(3.0));
    assert_eq!(-4.0, Op::Qcnl.apply1(-2.0));
    assert_eq!(0.0, Op::Unit.apply1(0.0));
    assert_eq!(2.0, Op::Log.apply1(100.0));
    assert_eq!(1e20, Op::Inv.apply1(0.0));
    assert_eq!(1.0, Op::Eq.apply2(0.1 + 0.2, 0.3));
    assert_eq!(7.0, Op::Ratio.apply_list(&[1.0, 0.0, 7.0]));
    assert_eq!(0.5, Op::Ratio.apply_list(&[1.0, 2.0, 7.0]));
    assert_eq!(5.0, Op::Pwl.apply_list(&[0.5, 0.0, 0.0, 1.0, 10.0]));
}

#[test]
fn test_op_display_matches_function_names() {
    assert_eq!("square", Op::Square.to_string());
    assert_eq!("pwl", format!("{}", Op::Pwl));
    for op in [Op::Sqrt, Op::Exp, Op::Ln, Op::Log, Op::Abs, Op::Uramp, Op::Atanh] {
        assert_eq!(Some(op), Op::from_function_name(&op.to_string()), "{op}");
    }
}
