// Copyright 2021 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;
use std::{error, result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError, // will never be produced
    Generic,
    // lexical
    MalformedNumber,
    UnterminatedShorthand,
    BareAssign,
    UnrecognizedToken,
    // syntax
    EmptyExpression,
    EmptyBrackets,
    UnterminatedBracket,
    ExcessClosingBracket,
    MissingOperand,
    MissingOperator,
    UnknownFunction,
    NoTwoParameterFunction,
    BadArgumentCount,
    BareList,
    ExpressionTooLarge,
    // type
    ExpectedArithmetic,
    ExpectedBoolean,
    MismatchedEquality,
    // arithmetic
    DivideByZero,
    // function definition and composition
    MissingHeader,
    MissingEnd,
    UnknownMnemonic,
    UnknownLabel,
    DuplicateLabel,
    BadOperand,
    ArityMismatch,
    BadConstants,
    BadSlot,
    NoPreviousInstruction,
    BadJump,
    DuplicateFunction,
    // evaluation
    UnknownName,
    SinkClosed,
    BadSettings,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            Generic => "generic",
            MalformedNumber => "malformed_number",
            UnterminatedShorthand => "unterminated_shorthand",
            BareAssign => "bare_assign",
            UnrecognizedToken => "unrecognized_token",
            EmptyExpression => "empty_expression",
            EmptyBrackets => "empty_brackets",
            UnterminatedBracket => "unterminated_bracket",
            ExcessClosingBracket => "excess_closing_bracket",
            MissingOperand => "missing_operand",
            MissingOperator => "missing_operator",
            UnknownFunction => "unknown_function",
            NoTwoParameterFunction => "no_two_parameter_function",
            BadArgumentCount => "bad_argument_count",
            BareList => "bare_list",
            ExpressionTooLarge => "expression_too_large",
            ExpectedArithmetic => "expected_arithmetic",
            ExpectedBoolean => "expected_boolean",
            MismatchedEquality => "mismatched_equality",
            DivideByZero => "divide_by_zero",
            MissingHeader => "missing_header",
            MissingEnd => "missing_end",
            UnknownMnemonic => "unknown_mnemonic",
            UnknownLabel => "unknown_label",
            DuplicateLabel => "duplicate_label",
            BadOperand => "bad_operand",
            ArityMismatch => "arity_mismatch",
            BadConstants => "bad_constants",
            BadSlot => "bad_slot",
            NoPreviousInstruction => "no_previous_instruction",
            BadJump => "bad_jump",
            DuplicateFunction => "duplicate_function",
            UnknownName => "unknown_name",
            SinkClosed => "sink_closed",
            BadSettings => "bad_settings",
        };

        write!(f, "{name}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Syntax,
    Type,
    Arithmetic,
    Function,
    Evaluation,
    Configuration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
        }
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Lexical => "LexicalError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Arithmetic => "ArithmeticError",
            ErrorKind::Function => "FunctionError",
            ErrorKind::Evaluation => "EvaluationError",
            ErrorKind::Configuration => "ConfigurationError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

#[macro_export]
macro_rules! lex_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Lexical, ErrorCode::$code, Some($str)))
    }};
}

#[macro_export]
macro_rules! syntax_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Syntax, ErrorCode::$code, Some($str)))
    }};
    ($code:tt) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Syntax, ErrorCode::$code, None))
    }};
}

#[macro_export]
macro_rules! type_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Type, ErrorCode::$code, Some($str)))
    }};
}

#[macro_export]
macro_rules! arith_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Arithmetic, ErrorCode::$code, Some($str)))
    }};
}

#[macro_export]
macro_rules! func_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Function, ErrorCode::$code, Some($str)))
    }};
}

#[macro_export]
macro_rules! eval_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Evaluation, ErrorCode::$code, Some($str)))
    }};
}

#[macro_export]
macro_rules! config_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Configuration, ErrorCode::$code, Some($str)))
    }};
}

#[test]
fn test_error_display() {
    let err = Error::new(
        ErrorKind::Syntax,
        ErrorCode::UnterminatedBracket,
        Some("at 4".to_string()),
    );
    assert_eq!("SyntaxError{unterminated_bracket: at 4}", format!("{err}"));

    let err = Error::new(ErrorKind::Arithmetic, ErrorCode::DivideByZero, None);
    assert_eq!("ArithmeticError{divide_by_zero}", format!("{err}"));
}

#[test]
fn test_err_macros() {
    fn check() -> Result<()> {
        func_err!(UnknownLabel, "loop".to_string())
    }
    let err = check().unwrap_err();
    assert_eq!(ErrorKind::Function, err.kind);
    assert_eq!(ErrorCode::UnknownLabel, err.code);
    assert_eq!(Some("loop".to_string()), err.get_details());
}
