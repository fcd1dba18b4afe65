// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Expression text to atom array.
//!
//! The token list is rewritten in place: signs are normalized, `INV`
//! of a literal is expanded, operands are interned as atoms, and then
//! the innermost bracketed span is repeatedly reduced to a single atom
//! until only one token is left.

use log::debug;

use crate::atom::AtomArray;
use crate::builtins::inverse;
use crate::common::Result;
use crate::settings::Settings;
use crate::syntax_err;
use crate::token::Operator::*;
use crate::token::{Spanned, Token, tokenize};

mod optimize;
mod reduce;

use self::reduce::Reducer;

/// Compiles `text` with the default settings.
pub fn compile(text: &str) -> Result<AtomArray> {
    Compiler::new(&Settings::default()).compile(text)
}

pub struct Compiler<'a> {
    settings: &'a Settings,
}

impl<'a> Compiler<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Compiler { settings }
    }

    /// Either the whole expression compiles or an error is returned and
    /// nothing is kept.
    pub fn compile(&self, text: &str) -> Result<AtomArray> {
        let mut toks = tokenize(text, self.settings)?;
        if toks.is_empty() {
            return syntax_err!(EmptyExpression, format!("'{text}'"));
        }

        normalize_signs(&mut toks);
        expand_inverse(&mut toks);
        check_brackets(&toks)?;

        let mut reducer = Reducer::new(self.settings.fold_constants);
        reducer.atomize(&mut toks)?;
        let root = reducer.reduce(toks)?;

        let mut atoms = reducer.finish(root);
        if self.settings.fold_constants {
            optimize::rewrite_folded(&mut atoms);
        }
        if self.settings.prune_constants {
            optimize::prune_constants(&mut atoms);
        }

        debug!("compiled '{text}' to {} atoms", atoms.len());

        Ok(atoms)
    }
}

fn is_unary_position(toks: &[Spanned<Token>], i: usize) -> bool {
    if i == 0 {
        return true;
    }
    matches!(toks[i - 1].1, Token::Op(op) if op != RParen)
}

/// Deletes unary plus, folds unary minus into a following literal or
/// sign, and retags any other unary minus as `MinusSign`.
pub(crate) fn normalize_signs(toks: &mut Vec<Spanned<Token>>) {
    let mut i = 0;
    while i < toks.len() {
        let op = match toks[i].1 {
            Token::Op(op) if op.is_sign() => op,
            _ => {
                i += 1;
                continue;
            }
        };
        if !is_unary_position(toks, i) {
            i += 1;
            continue;
        }

        if op == Plus {
            // re-examine whatever slides into this position
            toks.remove(i);
            continue;
        }

        let start = toks[i].0;
        match toks.get(i + 1).map(|t| &t.1) {
            Some(Token::Num(n)) => {
                let value = -*n;
                let end = toks[i + 1].2;
                toks.splice(i..i + 2, [(start, Token::Num(value), end)]);
                i += 1;
            }
            Some(Token::Op(Plus)) => {
                // -+ => -
                toks.remove(i + 1);
            }
            Some(Token::Op(Minus)) => {
                // -- => +, which the next pass deletes
                let end = toks[i + 1].2;
                toks.splice(i..i + 2, [(start, Token::Op(Plus), end)]);
            }
            _ => {
                toks[i].1 = Token::Op(MinusSign);
                i += 1;
            }
        }
    }
}

/// Rewrites `INV(<number>)` and `.INV(<number>)` to the reciprocal.
pub(crate) fn expand_inverse(toks: &mut Vec<Spanned<Token>>) {
    let mut i = 0;
    while i + 3 < toks.len() {
        let value = match &toks[i..i + 4] {
            [
                (_, Token::Name(name), _),
                (_, Token::Op(LParen), _),
                (_, Token::Num(n), _),
                (_, Token::Op(RParen), _),
            ] if name.eq_ignore_ascii_case("INV") || name.eq_ignore_ascii_case(".INV") => {
                inverse(*n)
            }
            _ => {
                i += 1;
                continue;
            }
        };
        let (start, end) = (toks[i].0, toks[i + 3].2);
        toks.splice(i..i + 4, [(start, Token::Num(value), end)]);
        i += 1;
    }
}

pub(crate) fn check_brackets(toks: &[Spanned<Token>]) -> Result<()> {
    let mut depth = 0i32;
    let mut last_open = 0;
    for (start, tok, _) in toks.iter() {
        match tok {
            Token::Op(LParen) => {
                depth += 1;
                last_open = *start;
            }
            Token::Op(RParen) => {
                depth -= 1;
                if depth < 0 {
                    return syntax_err!(
                        ExcessClosingBracket,
                        format!("more closing than opening brackets at {start}")
                    );
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return syntax_err!(
            UnterminatedBracket,
            format!("bracket opened at {last_open} is never closed")
        );
    }
    Ok(())
}
