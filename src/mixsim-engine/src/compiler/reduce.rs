// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use crate::atom::{Atom, AtomArray, AtomId, Op};
use crate::common::Result;
use crate::token::Operator::{self, *};
use crate::token::{Spanned, Token};
use crate::{arith_err, syntax_err, type_err};

/// Binary operator levels, tightest first.  Unary operators bind
/// tighter than all of them and commas looser.
const LEVELS: &[&[Operator]] = &[
    &[Pow],
    &[Mul, Div],
    &[Plus, Minus],
    &[Lt, Lte, Gt, Gte],
    &[Eq, Neq],
    &[And],
    &[Or],
];

fn atom_at(toks: &[Spanned<Token>], i: Option<usize>) -> Option<AtomId> {
    match i.and_then(|i| toks.get(i)) {
        Some((_, Token::Atom(id), _)) => Some(*id),
        _ => None,
    }
}

pub(crate) struct Reducer {
    atoms: AtomArray,
    fold: bool,
}

impl Reducer {
    pub(crate) fn new(fold: bool) -> Self {
        Reducer {
            atoms: AtomArray::new(),
            fold,
        }
    }

    pub(crate) fn finish(mut self, root: AtomId) -> AtomArray {
        self.atoms.root = root;
        self.atoms
    }

    fn is_boolean(&self, id: AtomId) -> bool {
        self.atoms.get(id).is_boolean()
    }

    fn constant(&self, id: AtomId) -> Option<f64> {
        self.atoms.get(id).constant()
    }

    /// Interns every literal and every name that isn't a function name.
    pub(crate) fn atomize(&mut self, toks: &mut [Spanned<Token>]) -> Result<()> {
        for i in 0..toks.len() {
            let called = toks.get(i + 1).is_some_and(|t| t.1.is_op(LParen));
            let atom = match &toks[i].1 {
                Token::Num(value) => Atom::Const {
                    value: *value,
                    is_boolean: false,
                },
                Token::Name(name) if !called => Atom::NameRef(name.clone()),
                _ => continue,
            };
            toks[i].1 = Token::Atom(self.atoms.intern(atom)?);
        }
        Ok(())
    }

    fn function(&mut self, op: Op, a: AtomId, b: Option<AtomId>, is_boolean: bool) -> Result<AtomId> {
        let folded = if self.fold {
            match (self.constant(a), b.map(|b| self.constant(b))) {
                (Some(x), None) => Some(op.apply1(x)),
                (Some(x), Some(Some(y))) => Some(op.apply2(x, y)),
                _ => None,
            }
        } else {
            None
        };
        self.atoms.intern(Atom::Function {
            op,
            a,
            b,
            folded,
            is_boolean,
        })
    }

    fn unary(&mut self, op: Operator, a: AtomId, at: usize) -> Result<AtomId> {
        let op = match op {
            Not => {
                if !self.is_boolean(a) {
                    return type_err!(ExpectedBoolean, format!("'!' needs a boolean at {at}"));
                }
                Op::Not
            }
            _ => {
                if self.is_boolean(a) {
                    return type_err!(
                        ExpectedArithmetic,
                        format!("unary '-' needs a number at {at}")
                    );
                }
                Op::Neg
            }
        };

        // !!x and -(-x) are just x
        if let Atom::Function {
            op: inner_op,
            a: inner,
            b: None,
            ..
        } = *self.atoms.get(a)
        {
            if inner_op == op {
                return Ok(inner);
            }
        }

        self.function(op, a, None, op == Op::Not)
    }

    fn binary(&mut self, op: Operator, a: AtomId, b: AtomId, at: usize) -> Result<AtomId> {
        let (a_bool, b_bool) = (self.is_boolean(a), self.is_boolean(b));
        let (op, is_boolean) = match op {
            Pow | Mul | Div | Plus | Minus | Lt | Lte | Gt | Gte => {
                if a_bool || b_bool {
                    return type_err!(
                        ExpectedArithmetic,
                        format!("arithmetic operator applied to a boolean at {at}")
                    );
                }
                match op {
                    Pow => (Op::Pow, false),
                    Mul => (Op::Mul, false),
                    Div => (Op::Div, false),
                    Plus => (Op::Add, false),
                    Minus => (Op::Sub, false),
                    Lt => (Op::Lt, true),
                    Lte => (Op::Lte, true),
                    Gt => (Op::Gt, true),
                    _ => (Op::Gte, true),
                }
            }
            Eq | Neq => {
                if a_bool != b_bool {
                    return type_err!(
                        MismatchedEquality,
                        format!("comparing a boolean with a number at {at}")
                    );
                }
                (if op == Eq { Op::Eq } else { Op::Neq }, true)
            }
            _ => {
                if !(a_bool && b_bool) {
                    return type_err!(
                        ExpectedBoolean,
                        format!("logical operator applied to a number at {at}")
                    );
                }
                (if op == And { Op::And } else { Op::Or }, true)
            }
        };

        if op == Op::Pow && self.constant(b) == Some(2.0) {
            return self.function(Op::Square, a, None, false);
        }
        if op == Op::Div && self.constant(b) == Some(0.0) {
            return arith_err!(DivideByZero, format!("division by zero at {at}"));
        }

        self.function(op, a, Some(b), is_boolean)
    }

    /// Reduces one comma-free run of tokens to a single atom.
    fn reduce_segment(&mut self, mut seg: Vec<Spanned<Token>>, at: usize) -> Result<AtomId> {
        if seg.is_empty() {
            return syntax_err!(MissingOperand, format!("empty argument at {at}"));
        }

        // unary operators, right to left so that nested ones see atoms
        let mut i = seg.len();
        while i > 0 {
            i -= 1;
            let op = match seg[i].1 {
                Token::Op(op @ (Not | MinusSign)) => op,
                _ => continue,
            };
            let start = seg[i].0;
            let a = match atom_at(&seg, Some(i + 1)) {
                Some(a) => a,
                None => {
                    return syntax_err!(MissingOperand, format!("unary operator at {start}"));
                }
            };
            let id = self.unary(op, a, start)?;
            let end = seg[i + 1].2;
            seg.splice(i..i + 2, [(start, Token::Atom(id), end)]);
        }

        for level in LEVELS {
            let mut i = 0;
            while i < seg.len() {
                let op = match seg[i].1 {
                    Token::Op(op) if level.contains(&op) => op,
                    _ => {
                        i += 1;
                        continue;
                    }
                };
                let at = seg[i].0;
                let lhs = atom_at(&seg, i.checked_sub(1));
                let rhs = atom_at(&seg, Some(i + 1));
                let (a, b) = match (lhs, rhs) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return syntax_err!(MissingOperand, format!("operator at {at}"));
                    }
                };
                let id = self.binary(op, a, b, at)?;
                let (start, end) = (seg[i - 1].0, seg[i + 1].2);
                seg.splice(i - 1..i + 2, [(start, Token::Atom(id), end)]);
                // the next operator, if any, has slid down to i
            }
        }

        match seg.as_slice() {
            [(_, Token::Atom(id), _)] => Ok(*id),
            [_, (start, _, _), ..] => {
                syntax_err!(MissingOperator, format!("missing operator before {start}"))
            }
            _ => syntax_err!(MissingOperand, format!("at {at}")),
        }
    }

    fn reduce_arguments(
        &mut self,
        inner: Vec<Spanned<Token>>,
        at: usize,
        bracketed: bool,
    ) -> Result<Vec<AtomId>> {
        if inner.is_empty() {
            return if bracketed {
                syntax_err!(EmptyBrackets, format!("at {at}"))
            } else {
                syntax_err!(EmptyExpression)
            };
        }

        let mut args = vec![];
        let mut seg = vec![];
        let mut seg_start = at;
        for tok in inner {
            if tok.1.is_op(Comma) {
                let next_start = tok.2;
                args.push(self.reduce_segment(std::mem::take(&mut seg), seg_start)?);
                seg_start = next_start;
            } else {
                seg.push(tok);
            }
        }
        args.push(self.reduce_segment(seg, seg_start)?);

        Ok(args)
    }

    /// Builds the atom a bracketed argument list turns into.
    fn call(&mut self, callee: Option<&str>, args: &[AtomId], at: usize) -> Result<AtomId> {
        match (callee, args.len()) {
            (None, 1) => Ok(args[0]),
            (None, _) => syntax_err!(BareList, format!("comma list without a function at {at}")),
            (Some(name), 1) => {
                let op = match Op::from_function_name(name) {
                    Some(op) => op,
                    None => {
                        return syntax_err!(UnknownFunction, format!("'{name}' at {at}"));
                    }
                };
                if self.is_boolean(args[0]) {
                    return type_err!(
                        ExpectedArithmetic,
                        format!("'{name}' needs a number at {at}")
                    );
                }
                self.function(op, args[0], None, false)
            }
            (Some(name), 2) => syntax_err!(
                NoTwoParameterFunction,
                format!("'{name}' at {at} has two arguments")
            ),
            (Some(name), n) => {
                let op = match Op::from_list_name(name) {
                    Some(op) => op,
                    None => {
                        return syntax_err!(UnknownFunction, format!("'{name}' at {at}"));
                    }
                };
                let count_ok = match op {
                    Op::Ratio => n == 3,
                    _ => n % 2 == 1,
                };
                if !count_ok {
                    return syntax_err!(
                        BadArgumentCount,
                        format!("'{name}' at {at} can't take {n} arguments")
                    );
                }
                if args.iter().any(|&arg| self.is_boolean(arg)) {
                    return type_err!(
                        ExpectedArithmetic,
                        format!("'{name}' needs numbers at {at}")
                    );
                }
                self.list(op, args)
            }
        }
    }

    /// `op(a1, L(a2, L(..., L(an-1, an))))`; never folded.
    fn list(&mut self, op: Op, args: &[AtomId]) -> Result<AtomId> {
        let n = args.len();
        let mut tail = args[n - 1];
        for &arg in args[1..n - 1].iter().rev() {
            tail = self.atoms.intern(Atom::ListElement { a: arg, b: tail })?;
        }
        self.atoms.intern(Atom::Function {
            op,
            a: args[0],
            b: Some(tail),
            folded: None,
            is_boolean: false,
        })
    }

    /// Reduces the innermost bracketed span until a single atom is left.
    pub(crate) fn reduce(&mut self, mut toks: Vec<Spanned<Token>>) -> Result<AtomId> {
        loop {
            let close = toks.iter().position(|t| t.1.is_op(RParen));
            let (open, stop) = match close {
                Some(stop) => (
                    toks[..stop].iter().rposition(|t| t.1.is_op(LParen)),
                    stop,
                ),
                None => (None, toks.len()),
            };

            let open = match open {
                Some(open) => open,
                None if close.is_some() => {
                    return syntax_err!(
                        ExcessClosingBracket,
                        format!("at {}", toks[stop].0)
                    );
                }
                None => {
                    let args = self.reduce_arguments(toks, 0, false)?;
                    return match args.as_slice() {
                        [root] => Ok(*root),
                        _ => syntax_err!(BareList, "comma list without a function".to_owned()),
                    };
                }
            };

            let at = toks[open].0;
            let inner: Vec<_> = toks.drain(open + 1..stop).collect();
            let callee = match open.checked_sub(1).map(|i| &toks[i].1) {
                Some(Token::Name(name)) => Some(name.clone()),
                _ => None,
            };

            let args = self.reduce_arguments(inner, at, true)?;
            let id = self.call(callee.as_deref(), &args, at)?;

            // `(` and `)` are now adjacent at open and open + 1
            let first = if callee.is_some() { open - 1 } else { open };
            let (start, end) = (toks[first].0, toks[open + 1].2);
            toks.splice(first..open + 2, [(start, Token::Atom(id), end)]);
        }
    }
}
