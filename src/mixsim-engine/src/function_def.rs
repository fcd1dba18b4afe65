// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Textual custom-function definitions:
//!
//! ```text
//! .FUNC clamp PARAMS=3
//! * RET = P0 limited to [P1, P2]
//!         _MOV RET P0
//!         _JGE P0 P1 high      ; not below the floor
//!         _MOV RET P1
//! high:   _JLE RET P2 done
//!         _MOV RET P2
//! done:
//! .ENDF
//! ```
//!
//! `P<i>` is parameter i, `V<i>` local i, `F<i>` slot i of the previous
//! instruction (`FRET` is `F0`) and `RET` the function's result.  Labels
//! are case-insensitive.
//!
//! For `_LDC`, `_PWL`, `_LDNODE` and `_STNODE` trailing numeric literals
//! are the instruction's extra constants.  Anywhere else a literal
//! operand is read from a hidden local after the declared ones, loaded
//! by an `_LDC` placed ahead of the body, so `_ADD RET P0 2` works as
//! written.  Jumping builtins take a label as their last operand and
//! builtins that write no result take no destination.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::builtins::{Builtin, Catalog, ConstantSpec};
use crate::common::Result;
use crate::composer::ComposedFunction;
use crate::func_err;
use crate::function::{Function, Instruction, ParameterIdentifier, Params};
use crate::settings::Settings;
use crate::token::{Token, tokenize};

struct Header {
    name: String,
    params: usize,
    locals: usize,
}

/// Distinct literal operands, each held in its own hidden local.
struct Literals {
    first_local: usize,
    values: Vec<f64>,
}

impl Literals {
    fn local(&mut self, value: f64) -> ParameterIdentifier {
        let k = match self.values.iter().position(|v| v.to_bits() == value.to_bits()) {
            Some(k) => k,
            None => {
                self.values.push(value);
                self.values.len() - 1
            }
        };
        ParameterIdentifier::Local(self.first_local + k)
    }

    fn loads(&self) -> impl Iterator<Item = Instruction> + '_ {
        self.values.iter().enumerate().map(|(k, &value)| {
            let local = ParameterIdentifier::Local(self.first_local + k);
            Instruction::with_params(Builtin::Ldc, [local]).constants(vec![value])
        })
    }
}

struct Pending {
    line: usize,
    instruction: Instruction,
    label: Option<String>,
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(i) => &line[..i],
        None => line,
    }
}

fn words(line: &str) -> Vec<&str> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .collect()
}

fn parse_count(line: usize, key: &str, value: &str) -> Result<usize> {
    match value.parse() {
        Ok(n) => Ok(n),
        Err(_) => func_err!(BadOperand, format!("line {line}: bad {key} count '{value}'")),
    }
}

fn parse_header(line: usize, text: &str) -> Result<Header> {
    let words = words(text);
    let name = match words.as_slice() {
        [directive, name, ..] if directive.eq_ignore_ascii_case(".FUNC") => name.to_string(),
        _ => {
            return func_err!(
                MissingHeader,
                format!("line {line}: expected '.FUNC <name>'")
            );
        }
    };

    let mut header = Header {
        name,
        params: 0,
        locals: 0,
    };
    for word in &words[2..] {
        match word.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("PARAMS") => {
                header.params = parse_count(line, key, value)?;
            }
            Some((key, value)) if key.eq_ignore_ascii_case("LOCALS") => {
                header.locals = parse_count(line, key, value)?;
            }
            _ => {
                return func_err!(BadOperand, format!("line {line}: unexpected '{word}'"));
            }
        }
    }
    Ok(header)
}

fn parse_identifier(word: &str) -> Option<ParameterIdentifier> {
    lazy_static! {
        static ref SLOT_RE: Regex = Regex::new(r"^(?i)([PVF])([0-9]+)$").unwrap();
    }

    if word.eq_ignore_ascii_case("RET") {
        return Some(ParameterIdentifier::Caller(0));
    }
    if word.eq_ignore_ascii_case("FRET") {
        return Some(ParameterIdentifier::Previous(0));
    }

    let caps = SLOT_RE.captures(word)?;
    let n: usize = caps[2].parse().ok()?;
    let id = match &caps[1] {
        "P" | "p" => ParameterIdentifier::Caller(2 + n),
        "V" | "v" => ParameterIdentifier::Local(n),
        _ => ParameterIdentifier::Previous(n),
    };
    Some(id)
}

/// A signed number in expression syntax, suffixes included.
fn parse_literal(word: &str) -> Option<f64> {
    let (sign, rest) = match word.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, word.strip_prefix('+').unwrap_or(word)),
    };
    let toks = tokenize(rest, &Settings::default()).ok()?;
    match toks.as_slice() {
        [(_, Token::Num(n), _)] => Some(sign * n),
        _ => None,
    }
}

/// Custom functions defined so far, looked up by (case-insensitive)
/// name when later definitions call them.
pub struct Library<'a> {
    catalog: &'a Catalog,
    functions: HashMap<String, Arc<ComposedFunction>>,
}

impl<'a> Library<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Library {
            catalog,
            functions: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ComposedFunction>> {
        self.functions.get(&name.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Parses and composes a definition and makes it callable from later
    /// definitions.
    pub fn define(&mut self, text: &str) -> Result<Arc<ComposedFunction>> {
        let function = Arc::new(self.parse(text)?);
        let key = function.name().to_ascii_uppercase();
        if self.functions.contains_key(&key) {
            return func_err!(
                DuplicateFunction,
                format!("'{}' is already defined", function.name())
            );
        }
        self.functions.insert(key, function.clone());
        Ok(function)
    }

    fn resolve(&self, line: usize, mnemonic: &str) -> Result<Function> {
        let function = if mnemonic.starts_with('_') {
            self.catalog.lookup(mnemonic).map(Function::Builtin)
        } else {
            self.get(mnemonic).cloned().map(Function::Composed)
        };
        match function {
            Some(function) => Ok(function),
            None => func_err!(UnknownMnemonic, format!("line {line}: '{mnemonic}'")),
        }
    }

    fn parse_instruction(
        &self,
        line: usize,
        words: &[&str],
        literals: &mut Literals,
    ) -> Result<(Instruction, Option<String>)> {
        let function = self.resolve(line, words[0])?;
        let (writes_result, jumps, takes_constants) = match &function {
            Function::Builtin(builtin) => (
                builtin.writes_result(),
                builtin.jumps(),
                builtin.constants() != ConstantSpec::None,
            ),
            Function::Composed(_) => (true, false, false),
        };

        let mut operands = &words[1..];
        let mut label = None;
        if jumps {
            match operands.split_last() {
                Some((target, rest)) => {
                    label = Some(target.to_string());
                    operands = rest;
                }
                None => {
                    return func_err!(BadOperand, format!("line {line}: missing jump label"));
                }
            }
        }

        let mut params = Params::new();
        if !writes_result {
            params.push(ParameterIdentifier::Caller(0));
        }
        let mut constants = vec![];
        for operand in operands {
            if let Some(id) = parse_identifier(operand) {
                if !constants.is_empty() {
                    return func_err!(
                        BadOperand,
                        format!("line {line}: '{operand}' follows a constant")
                    );
                }
                params.push(id);
            } else if let Some(value) = parse_literal(operand) {
                if takes_constants {
                    constants.push(value);
                } else if params.is_empty() {
                    return func_err!(
                        BadOperand,
                        format!("line {line}: cannot store a result in '{operand}'")
                    );
                } else {
                    params.push(literals.local(value));
                }
            } else {
                return func_err!(BadOperand, format!("line {line}: '{operand}'"));
            }
        }

        let instruction = Instruction {
            function,
            params,
            constants,
            jump: None,
        };
        Ok((instruction, label))
    }

    /// Parses and composes a definition without registering it.
    pub fn parse(&self, text: &str) -> Result<ComposedFunction> {
        let mut lines = text.lines().enumerate().filter_map(|(i, line)| {
            let line = strip_comment(line).trim();
            if line.is_empty() || line.starts_with('*') {
                None
            } else {
                Some((i + 1, line))
            }
        });

        let header = match lines.next() {
            Some((n, line)) => parse_header(n, line)?,
            None => return func_err!(MissingHeader, "empty definition".to_owned()),
        };

        let mut labels: HashMap<String, usize> = HashMap::new();
        let mut pending: Vec<Pending> = vec![];
        let mut literals = Literals {
            first_local: header.locals,
            values: vec![],
        };
        let mut ended = false;

        for (n, line) in lines.by_ref() {
            if line.eq_ignore_ascii_case(".ENDF") {
                ended = true;
                break;
            }

            let mut words = words(line);
            while let Some(label) = words
                .first()
                .and_then(|w| w.strip_suffix(':'))
                .map(str::to_owned)
            {
                if labels.insert(label.to_ascii_uppercase(), pending.len()).is_some() {
                    return func_err!(DuplicateLabel, format!("line {n}: '{label}'"));
                }
                words.remove(0);
            }
            if words.is_empty() {
                continue;
            }

            let (instruction, label) = self.parse_instruction(n, &words, &mut literals)?;
            pending.push(Pending {
                line: n,
                instruction,
                label,
            });
        }

        if !ended {
            return func_err!(MissingEnd, format!("'{}' has no .ENDF", header.name));
        }
        if let Some((n, line)) = lines.next() {
            return func_err!(Generic, format!("line {n}: '{line}' after .ENDF"));
        }

        // the literal loads only shift the body, so displacements stand,
        // but they would hand a leading F<i> operand a previous result
        let leads_with_previous = pending.first().is_some_and(|p| {
            p.instruction
                .params
                .iter()
                .any(|id| matches!(id, ParameterIdentifier::Previous(_)))
        });
        if leads_with_previous && !literals.values.is_empty() {
            return func_err!(
                NoPreviousInstruction,
                format!("'{}': the first instruction has no previous result", header.name)
            );
        }

        let mut instructions: Vec<Instruction> = literals.loads().collect();
        instructions.reserve(pending.len());
        for (pc, p) in pending.into_iter().enumerate() {
            let mut instruction = p.instruction;
            if let Some(label) = p.label {
                let target = match labels.get(&label.to_ascii_uppercase()) {
                    Some(&target) => target,
                    None => {
                        return func_err!(UnknownLabel, format!("line {}: '{label}'", p.line));
                    }
                };
                instruction.jump = Some(target as i32 - pc as i32);
            }
            instructions.push(instruction);
        }

        let local_count = header.locals + literals.values.len();
        ComposedFunction::compose(&header.name, local_count, header.params, instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::{Builtin, NullContext};
    use crate::common::{ErrorCode, ErrorKind};
    use crate::function::Activation;
    use crate::function::ParameterIdentifier::*;

    fn eval(f: Arc<ComposedFunction>, params: &[f64]) -> f64 {
        let activation = Activation::new(Function::Composed(f));
        let mut working = activation.working_array();
        for (i, &v) in params.iter().enumerate() {
            activation.set_param(&mut working, i, v);
        }
        activation.evaluate(&mut working, &mut NullContext)
    }

    const ABS_IF: &str = "
        .FUNC absif PARAMS=2
        * RET = P0 unless P1 > 0
            _MOV RET P0
            _JGTZ P1 skip   ; skip the negation
            _NEG RET RET
        skip:
        .ENDF
    ";

    #[test]
    fn test_parse_jump() {
        let catalog = Catalog::new();
        let mut library = Library::new(&catalog);
        let f = library.define(ABS_IF).unwrap();

        assert_eq!("absif", f.name());
        assert_eq!(2, f.param_count());
        let instructions = f.instructions();
        assert_eq!(3, instructions.len());
        assert_eq!(&[Caller(0), Caller(3)], &instructions[1].params[..]);
        assert_eq!(Some(2), instructions[1].jump);
        assert_eq!(&[Caller(0), Caller(0)], &instructions[2].params[..]);

        assert_eq!(-4.0, eval(f.clone(), &[4.0, 0.0]));
        assert_eq!(4.0, eval(f, &[4.0, 1.0]));
    }

    #[test]
    fn test_module_doc_example() {
        let text = "
            .FUNC clamp PARAMS=3
            * RET = P0 limited to [P1, P2]
                    _MOV RET P0
                    _JGE P0 P1 high      ; not below the floor
                    _MOV RET P1
            high:   _JLE RET P2 done
                    _MOV RET P2
            done:
            .ENDF
        ";
        let catalog = Catalog::new();
        let f = Arc::new(Library::new(&catalog).parse(text).unwrap());
        assert_eq!(1.0, eval(f.clone(), &[-3.0, 1.0, 2.0]));
        assert_eq!(1.5, eval(f.clone(), &[1.5, 1.0, 2.0]));
        assert_eq!(2.0, eval(f, &[7.0, 1.0, 2.0]));
    }

    #[test]
    fn test_backward_label() {
        let text = "
            .FUNC times PARAMS=2 LOCALS=3
                    _LDC V0 0
                    _LDC V2 1
                    _MOV V1 P1
            loop:   _ADD V0 V0 P0
                    _SUB V1 V1 V2
                    _JGTZ V1 loop
                    _MOV RET V0
            .ENDF
        ";
        let catalog = Catalog::new();
        let f = Arc::new(Library::new(&catalog).parse(text).unwrap());
        assert_eq!(Some(-2), f.instructions()[5].jump);
        assert_eq!(7.5, eval(f, &[2.5, 3.0]));
    }

    #[test]
    fn test_calls_custom_functions() {
        let catalog = Catalog::new();
        let mut library = Library::new(&catalog);
        library
            .define(
                ".FUNC addneg PARAMS=2 LOCALS=1
                     _ADD V0 P0 P1
                     _NEG RET V0
                 .ENDF",
            )
            .unwrap();
        let f = library
            .define(
                ".FUNC twice PARAMS=1
                     AddNeg RET P0, P0
                     _MUL RET FRET 2
                 .ENDF",
            )
            .unwrap();
        assert_eq!(-12.0, eval(f, &[3.0]));

        let f = library
            .define(
                ".FUNC shifted PARAMS=1
                     addneg RET P0 1
                 .ENDF",
            )
            .unwrap();
        assert_eq!(-4.0, eval(f, &[3.0]));
        assert_eq!(3, library.len());
    }

    #[test]
    fn test_literals_become_constants() {
        let catalog = Catalog::new();
        let library = Library::new(&catalog);
        let err = library
            .parse(
                ".FUNC curve PARAMS=1
                     _PWL RET P0 0 0 1m 10 -1
                 .ENDF",
            )
            .unwrap_err();
        // a breakpoint table must have an even length
        assert_eq!(ErrorCode::BadConstants, err.code);

        let f = library
            .parse(
                ".FUNC curve PARAMS=1
                     _PWL RET P0 0 0 1m 10
                 .ENDF",
            )
            .unwrap();
        assert_eq!(&[0.0, 0.0, 1e-3, 10.0], &f.instructions()[0].constants[..]);
        assert!(matches!(
            f.instructions()[0].function,
            Function::Builtin(Builtin::Pwl)
        ));

        let f = library
            .parse(
                ".FUNC k
                     _LDC RET -2.5k
                 .ENDF",
            )
            .unwrap();
        assert_eq!(&[-2500.0], &f.instructions()[0].constants[..]);
    }

    #[test]
    fn test_literal_operands_use_hidden_locals() {
        let catalog = Catalog::new();
        let library = Library::new(&catalog);
        let f = Arc::new(
            library
                .parse(".FUNC f PARAMS=1\n _ADD RET P0 2\n.ENDF")
                .unwrap(),
        );
        assert_eq!(1, f.local_count());
        let instructions = f.instructions();
        assert_eq!(2, instructions.len());
        assert!(matches!(instructions[0].function, Function::Builtin(Builtin::Ldc)));
        assert_eq!(&[Local(0)], &instructions[0].params[..]);
        assert_eq!(&[2.0], &instructions[0].constants[..]);
        assert_eq!(&[Caller(0), Caller(2), Local(0)], &instructions[1].params[..]);
        assert!(instructions[1].constants.is_empty());
        assert_eq!(5.0, eval(f.clone(), &[3.0]));
        assert_eq!(1.5, eval(f, &[-0.5]));

        // repeated literals share a local, placed after the declared ones
        let f = Arc::new(
            library
                .parse(
                    ".FUNC g PARAMS=1 LOCALS=1
                         _MUL V0 P0 2
                         _ADD V0 V0 1k
                         _ADD RET V0 2
                     .ENDF",
                )
                .unwrap(),
        );
        assert_eq!(3, f.local_count());
        assert_eq!(5, f.instructions().len());
        assert_eq!(&[Caller(0), Local(0), Local(1)], &f.instructions()[4].params[..]);
        assert_eq!(1008.0, eval(f, &[3.0]));
    }

    #[test]
    fn test_literal_in_jump_comparison() {
        let text = "
            .FUNC cap PARAMS=1
                    _MOV RET P0
                    _JLE P0 5 done
                    _MOV RET 5
            done:
            .ENDF
        ";
        let catalog = Catalog::new();
        let f = Arc::new(Library::new(&catalog).parse(text).unwrap());
        assert_eq!(4, f.instructions().len());
        assert_eq!(&[Caller(0), Caller(2), Local(0)], &f.instructions()[2].params[..]);
        assert_eq!(Some(2), f.instructions()[2].jump);
        assert_eq!(3.0, eval(f.clone(), &[3.0]));
        assert_eq!(5.0, eval(f, &[7.0]));
    }

    #[test]
    fn test_labels_ignore_case() {
        let text = "
            .FUNC pos PARAMS=1
                    _MOV RET P0
                    _JGTZ RET Done
                    _LDC RET 0
            done:
            .ENDF
        ";
        let catalog = Catalog::new();
        let library = Library::new(&catalog);
        let f = Arc::new(library.parse(text).unwrap());
        assert_eq!(Some(2), f.instructions()[1].jump);
        assert_eq!(0.0, eval(f.clone(), &[-1.0]));
        assert_eq!(2.0, eval(f, &[2.0]));

        let err = library.parse(".FUNC f\nend: _RET\nEND: _RET\n.ENDF").unwrap_err();
        assert_eq!(ErrorCode::DuplicateLabel, err.code);
    }

    #[test]
    fn test_node_state() {
        let f = Library::new(&Catalog::new())
            .parse(
                ".FUNC latch PARAMS=1
                     _STNODE P0 4
                     _LDNODE RET 4
                 .ENDF",
            )
            .unwrap();
        assert_eq!(&[Caller(0), Caller(2)], &f.instructions()[0].params[..]);
        assert_eq!(&[4.0], &f.instructions()[1].constants[..]);
    }

    #[test]
    fn test_errors() {
        let catalog = Catalog::new();
        let library = Library::new(&catalog);
        let check = |text: &str| {
            let err = library.parse(text).unwrap_err();
            assert_eq!(ErrorKind::Function, err.kind, "{text}");
            err.code
        };

        assert_eq!(ErrorCode::MissingHeader, check(""));
        assert_eq!(ErrorCode::MissingHeader, check("_MOV RET P0\n.ENDF"));
        assert_eq!(ErrorCode::MissingEnd, check(".FUNC f PARAMS=1\n_MOV RET P0"));
        assert_eq!(ErrorCode::UnknownMnemonic, check(".FUNC f\n_FROB RET\n.ENDF"));
        assert_eq!(ErrorCode::UnknownMnemonic, check(".FUNC f\nnope RET\n.ENDF"));
        assert_eq!(ErrorCode::UnknownLabel, check(".FUNC f\n_JMP nowhere\n.ENDF"));
        assert_eq!(
            ErrorCode::DuplicateLabel,
            check(".FUNC f\na: _RET\na: _RET\n.ENDF")
        );
        assert_eq!(
            ErrorCode::BadOperand,
            check(".FUNC f PARAMS=1\n_MOV RET Q0\n.ENDF")
        );
        assert_eq!(ErrorCode::BadOperand, check(".FUNC f WIDTH=1\n.ENDF"));
        assert_eq!(ErrorCode::BadOperand, check(".FUNC f\n_JMP\n.ENDF"));
        assert_eq!(
            ErrorCode::ArityMismatch,
            check(".FUNC f PARAMS=1\n_ADD RET P0\n.ENDF")
        );
        assert_eq!(
            ErrorCode::BadSlot,
            check(".FUNC f PARAMS=1\n_MOV RET P1\n.ENDF")
        );
        assert_eq!(
            ErrorCode::Generic,
            check(".FUNC f PARAMS=1\n_MOV RET P0\n.ENDF\n_MOV RET P0")
        );
        assert_eq!(
            ErrorCode::BadOperand,
            check(".FUNC f PARAMS=1\n_ADD 2 P0 P0\n.ENDF")
        );
        assert_eq!(
            ErrorCode::NoPreviousInstruction,
            check(".FUNC f PARAMS=1\n_ADD RET FRET 1\n.ENDF")
        );
        assert_eq!(
            ErrorCode::BadOperand,
            check(".FUNC f PARAMS=1\n_LDC RET 1 V0\n.ENDF")
        );
    }

    #[test]
    fn test_duplicate_function() {
        let catalog = Catalog::new();
        let mut library = Library::new(&catalog);
        library.define(ABS_IF).unwrap();
        let err = library.define(&ABS_IF.replace("absif", "ABSIF")).unwrap_err();
        assert_eq!(ErrorCode::DuplicateFunction, err.code);
        assert!(library.get("AbsIf").is_some());
    }
}
