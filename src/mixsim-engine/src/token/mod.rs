// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

// derived from both the LALRPOP whitespace tokenizer, and LALRPOP's
// internal tokenizer

use std::mem;
use std::str::CharIndices;

use lazy_static::lazy_static;
use regex::Regex;
use unicode_xid::UnicodeXID;

use self::Operator::*;
use self::Token::*;
use crate::atom::AtomId;
use crate::common::Result;
use crate::lex_err;
use crate::settings::Settings;


pub const BOLTZMANN: f64 = 1.380649e-23;
pub const ELECTRON_CHARGE: f64 = 1.602176634e-19;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Plus,
    Minus,
    /// unary minus, only produced by sign normalization in the compiler
    MinusSign,
    Mul,
    Div,
    Pow,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
}

impl Operator {
    pub fn is_sign(self) -> bool {
        matches!(self, Plus | Minus)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Num(f64),
    Name(String),
    Op(Operator),
    /// a reference to an already-interned atom, produced by atomization
    Atom(AtomId),
}

impl Token {
    pub fn op(&self) -> Option<Operator> {
        match self {
            Op(op) => Some(*op),
            _ => None,
        }
    }

    pub fn is_op(&self, op: Operator) -> bool {
        self.op() == Some(op)
    }
}

pub type Spanned<T> = (usize, T, usize);

/// Name under which a node voltage `V(node)` is referenced.
pub fn voltage_name(node: &str) -> String {
    format!("@{node}")
}

/// Name under which a branch current `I(component)` is referenced.
pub fn current_name(component: &str) -> String {
    format!("#{component}")
}

#[derive(Clone, Debug)]
struct Differential {
    first: Spanned<String>,
    comma: usize,
    second: Spanned<String>,
    close: usize,
}

/// Progress through a `V(n1,n2)` expansion; the opening bracket has
/// already been emitted when one of these states is entered.
#[derive(Clone, Debug)]
enum Shorthand {
    Idle,
    FirstName(Differential),
    Minus(Differential),
    SecondName(Differential),
    Close(Differential),
}

pub struct Tokenizer<'input> {
    text: &'input str,
    chars: CharIndices<'input>,
    lookahead: Option<(usize, char)>,
    shorthand: Shorthand,
    ambient_temperature: f64,
}

impl<'input> Tokenizer<'input> {
    pub fn new(input: &'input str, settings: &Settings) -> Self {
        let mut t = Tokenizer {
            text: input,
            chars: input.char_indices(),
            lookahead: None,
            shorthand: Shorthand::Idle,
            ambient_temperature: settings.ambient_temperature,
        };
        t.bump();
        t
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.bump_n(1)
    }

    fn bump_n(&mut self, n: usize) -> Option<(usize, char)> {
        assert!(n > 0);
        self.lookahead = self.chars.nth(n - 1);
        self.lookahead
    }

    fn offset(&self) -> usize {
        match self.lookahead {
            Some((i, _)) => i,
            None => self.text.len(),
        }
    }

    fn word(&mut self, idx0: usize) -> Spanned<&'input str> {
        match self.take_while(is_identifier_continue) {
            Some(end) => (idx0, &self.text[idx0..end], end),
            None => (idx0, &self.text[idx0..], self.text.len()),
        }
    }

    fn take_while<F>(&mut self, mut keep_going: F) -> Option<usize>
    where
        F: FnMut(char) -> bool,
    {
        self.take_until(|c| !keep_going(c))
    }

    fn take_until<F>(&mut self, mut terminate: F) -> Option<usize>
    where
        F: FnMut(char) -> bool,
    {
        loop {
            match self.lookahead {
                None => {
                    return None;
                }
                Some((idx1, c)) => {
                    if terminate(c) {
                        return Some(idx1);
                    } else {
                        self.bump();
                    }
                }
            }
        }
    }

    fn skip_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }

    fn identifierish(&mut self, idx0: usize) -> Result<Spanned<Token>> {
        let (start, word, end) = self.word(idx0);
        let upper = word.to_ascii_uppercase();

        if matches!(upper.as_str(), "V" | "I") && matches!(self.lookahead, Some((_, '('))) {
            return self.shorthand(start, upper == "V");
        }

        let tok = match upper.as_str() {
            "_PI" => Num(std::f64::consts::PI),
            "_E" => Num(std::f64::consts::E),
            "_K" => Num(BOLTZMANN),
            "_Q" => Num(ELECTRON_CHARGE),
            "_TA" => Num(self.ambient_temperature),
            _ => Name(word.to_owned()),
        };

        Ok((start, tok, end))
    }

    /// reads a node or component name inside `V(...)`/`I(...)`
    fn shorthand_name(&mut self, idx0: usize) -> Result<Spanned<String>> {
        self.skip_whitespace();
        let start = self.offset();
        let end = self
            .take_while(is_identifier_continue)
            .unwrap_or(self.text.len());
        if start == end {
            return lex_err!(
                UnterminatedShorthand,
                format!("expected a name in shorthand starting at {idx0}")
            );
        }
        let name = self.text[start..end].to_owned();
        self.skip_whitespace();
        Ok((start, name, end))
    }

    fn shorthand(&mut self, idx0: usize, is_voltage: bool) -> Result<Spanned<Token>> {
        // eat the '('
        self.bump();
        let open_end = self.offset();

        let first = self.shorthand_name(idx0)?;
        match self.lookahead {
            Some((close, ')')) => {
                self.bump();
                let (_, name, _) = first;
                let name = if is_voltage {
                    voltage_name(&name)
                } else {
                    current_name(&name)
                };
                Ok((idx0, Name(name), close + 1))
            }
            Some((comma, ',')) if is_voltage => {
                self.bump();
                let second = self.shorthand_name(idx0)?;
                match self.lookahead {
                    Some((close, ')')) => {
                        self.bump();
                        self.shorthand = Shorthand::FirstName(Differential {
                            first,
                            comma,
                            second,
                            close,
                        });
                        Ok((idx0, Op(LParen), open_end))
                    }
                    _ => lex_err!(
                        UnterminatedShorthand,
                        format!("V(n1,n2) starting at {idx0} is not closed")
                    ),
                }
            }
            _ => lex_err!(
                UnterminatedShorthand,
                format!("shorthand starting at {idx0} is not closed")
            ),
        }
    }

    fn differential(&mut self) -> Option<Spanned<Token>> {
        let (next, tok) = match mem::replace(&mut self.shorthand, Shorthand::Idle) {
            Shorthand::Idle => return None,
            Shorthand::FirstName(d) => {
                let (start, ref name, end) = d.first;
                let tok = (start, Name(voltage_name(name)), end);
                (Shorthand::Minus(d), tok)
            }
            Shorthand::Minus(d) => {
                let tok = (d.comma, Op(Minus), d.comma + 1);
                (Shorthand::SecondName(d), tok)
            }
            Shorthand::SecondName(d) => {
                let (start, ref name, end) = d.second;
                let tok = (start, Name(voltage_name(name)), end);
                (Shorthand::Close(d), tok)
            }
            Shorthand::Close(d) => (Shorthand::Idle, (d.close, Op(RParen), d.close + 1)),
        };
        self.shorthand = next;
        Some(tok)
    }

    fn number(&mut self, idx0: usize) -> Result<Spanned<Token>> {
        lazy_static! {
            static ref NUMBER_RE: Regex =
                Regex::new(r"^([0-9]+\.?[0-9]*|\.[0-9]+)([eE][-+]?[0-9]*)?").unwrap();
        }

        let rest = &self.text[idx0..];
        let caps = match NUMBER_RE.captures(rest) {
            Some(caps) => caps,
            None => return lex_err!(MalformedNumber, format!("bad number at {idx0}")),
        };
        if let Some(exp) = caps.get(2) {
            if !exp.as_str().ends_with(|c: char| c.is_ascii_digit()) {
                return lex_err!(MalformedNumber, format!("exponent without digits at {idx0}"));
            }
        }
        let numeric_len = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let value: f64 = match rest[..numeric_len].parse() {
            Ok(value) => value,
            Err(_) => return lex_err!(MalformedNumber, format!("bad number at {idx0}")),
        };

        // the suffix (and any unit letters after it) is ASCII, so byte
        // and char counts agree here
        let letters_len = rest[numeric_len..]
            .bytes()
            .take_while(|b| b.is_ascii_alphabetic())
            .count();
        let suffix = rest[numeric_len..numeric_len + letters_len].to_ascii_uppercase();
        let len = numeric_len + letters_len;

        self.bump_n(len);

        if let Some((i, c)) = self.lookahead {
            if c.is_ascii_digit() || c == '.' {
                return lex_err!(
                    MalformedNumber,
                    format!("unexpected '{c}' at {i} after number at {idx0}")
                );
            }
        }

        Ok((idx0, Num(value * suffix_scale(&suffix)), idx0 + len))
    }

    fn consume(&mut self, i: usize, tok: Token, len: usize) -> Option<Result<Spanned<Token>>> {
        self.bump();
        Some(Ok((i, tok, i + len)))
    }
}

/// Engineering-suffix multiplier; MEG and MIL have to be checked before
/// the single-letter M.
fn suffix_scale(suffix: &str) -> f64 {
    if suffix.starts_with("MEG") {
        return 1e6;
    }
    if suffix.starts_with("MIL") {
        return 25.4e-6;
    }
    match suffix.chars().next() {
        Some('T') => 1e12,
        Some('G') => 1e9,
        Some('M') => 1e-3,
        Some('K') => 1e3,
        Some('U') => 1e-6,
        Some('N') => 1e-9,
        Some('P') => 1e-12,
        Some('F') => 1e-15,
        _ => 1.0,
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<Spanned<Token>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(tok) = self.differential() {
            return Some(Ok(tok));
        }

        loop {
            return match self.lookahead {
                Some((i, '/')) => self.consume(i, Op(Div), 1),
                Some((i, '^')) => self.consume(i, Op(Pow), 1),
                Some((i, '=')) => {
                    match self.bump() {
                        Some((_, '=')) => self.consume(i, Op(Eq), 2),
                        // we've already bumped, don't consume
                        _ => Some(lex_err!(BareAssign, format!("bare '=' at {i}"))),
                    }
                }
                Some((i, '!')) => {
                    match self.bump() {
                        Some((_, '=')) => self.consume(i, Op(Neq), 2),
                        // we've already bumped, don't consume
                        _ => Some(Ok((i, Op(Not), i + 1))),
                    }
                }
                Some((i, '<')) => {
                    match self.bump() {
                        Some((_, '>')) => self.consume(i, Op(Neq), 2),
                        Some((_, '=')) => self.consume(i, Op(Lte), 2),
                        // we've already bumped, don't consume
                        _ => Some(Ok((i, Op(Lt), i + 1))),
                    }
                }
                Some((i, '>')) => {
                    match self.bump() {
                        Some((_, '=')) => self.consume(i, Op(Gte), 2),
                        // we've already bumped, don't consume
                        _ => Some(Ok((i, Op(Gt), i + 1))),
                    }
                }
                Some((i, '&')) => {
                    match self.bump() {
                        Some((_, '&')) => self.consume(i, Op(And), 2),
                        // we've already bumped, don't consume
                        _ => Some(lex_err!(UnrecognizedToken, format!("single '&' at {i}"))),
                    }
                }
                Some((i, '|')) => {
                    match self.bump() {
                        Some((_, '|')) => self.consume(i, Op(Or), 2),
                        // we've already bumped, don't consume
                        _ => Some(lex_err!(UnrecognizedToken, format!("single '|' at {i}"))),
                    }
                }
                Some((i, '*')) => {
                    match self.bump() {
                        Some((_, '*')) => self.consume(i, Op(Pow), 2),
                        // we've already bumped, don't consume
                        _ => Some(Ok((i, Op(Mul), i + 1))),
                    }
                }
                Some((i, '-')) => self.consume(i, Op(Minus), 1),
                Some((i, '+')) => self.consume(i, Op(Plus), 1),
                Some((i, '(')) => self.consume(i, Op(LParen), 1),
                Some((i, ')')) => self.consume(i, Op(RParen), 1),
                Some((i, ',')) => self.consume(i, Op(Comma), 1),
                Some((i, c)) if is_number_start(c, self.peek_second()) => Some(self.number(i)),
                Some((i, c)) if is_identifier_start(c) => Some(self.identifierish(i)),
                Some((_, c)) if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                Some((i, c)) => {
                    self.bump(); // eat whatever is killing us
                    Some(lex_err!(
                        UnrecognizedToken,
                        format!("unexpected '{c}' at {i}")
                    ))
                }
                None => None,
            };
        }
    }
}

impl Tokenizer<'_> {
    fn peek_second(&self) -> Option<char> {
        self.chars.clone().next().map(|(_, c)| c)
    }
}

/// Tokenize a whole expression, stopping at the first error.
pub fn tokenize(input: &str, settings: &Settings) -> Result<Vec<Spanned<Token>>> {
    Tokenizer::new(input, settings).collect()
}

fn is_number_start(c: char, next: Option<char>) -> bool {
    c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit()))
}

fn is_identifier_start(c: char) -> bool {
    UnicodeXID::is_xid_start(c) || matches!(c, '_' | '.' | '@' | '#')
}

fn is_identifier_continue(c: char) -> bool {
    UnicodeXID::is_xid_continue(c) || matches!(c, '.' | '@' | '#')
}
