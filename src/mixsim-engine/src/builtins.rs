// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;
use std::fmt;

use float_cmp::approx_eq;
use serde::{Deserialize, Serialize};

use crate::function::Instruction;

/// Value returned by `INV(0)` and `_INV` with a zero operand.
pub const INVERSE_OF_ZERO: f64 = 1e20;

pub(crate) fn is_truthy(n: f64) -> bool {
    let is_false = approx_eq!(f64, n, 0.0);
    !is_false
}

#[inline(always)]
pub(crate) fn bool_value(b: bool) -> f64 {
    b as i8 as f64
}

pub(crate) fn inverse(x: f64) -> f64 {
    if x == 0.0 { INVERSE_OF_ZERO } else { 1.0 / x }
}

/// Signed-square conduction law.
pub(crate) fn qcnl(x: f64) -> f64 {
    x * x.abs()
}

pub(crate) fn unit_step(x: f64) -> f64 {
    bool_value(x > 0.0)
}

pub(crate) fn ramp(x: f64) -> f64 {
    if x > 0.0 { x } else { 0.0 }
}

/// Piecewise-linear interpolation over a flat `[x0, y0, x1, y1, ...]`
/// breakpoint table, clamped to the first and last y outside the table.
pub(crate) fn lookup(points: &[f64], index: f64) -> f64 {
    let size = points.len() / 2;
    if size == 0 {
        return f64::NAN;
    }

    if index.is_nan() {
        // things get wonky below if we try to binary search for NaN
        return f64::NAN;
    }

    let x = |i: usize| points[2 * i];
    let y = |i: usize| points[2 * i + 1];

    // check if index is below the start of the table
    if index < x(0) {
        return y(0);
    }
    if index > x(size - 1) {
        return y(size - 1);
    }

    let mut low = 0;
    let mut high = size;
    while low < high {
        let mid = low + (high - low) / 2;
        if x(mid) < index {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    let i = low;
    if approx_eq!(f64, x(i), index) {
        y(i)
    } else {
        // slope = deltaY/deltaX
        let slope = (y(i) - y(i - 1)) / (x(i) - x(i - 1));
        // y = m*x + b
        (index - x(i - 1)) * slope + y(i - 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rail {
    Positive,
    Negative,
}

/// The simulation component a function is evaluated on behalf of.  The
/// core never interprets it beyond these accessors.
pub trait SimContext {
    fn time(&self) -> f64;
    fn timestep(&self) -> f64;
    fn frequency(&self) -> f64;
    fn rail(&self, rail: Rail) -> f64;
    fn node_state(&self, node: usize) -> f64;
    fn set_node_state(&mut self, node: usize, value: f64);
}

/// A context for functions that never touch the simulation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullContext;

impl SimContext for NullContext {
    fn time(&self) -> f64 {
        0.0
    }
    fn timestep(&self) -> f64 {
        0.0
    }
    fn frequency(&self) -> f64 {
        0.0
    }
    fn rail(&self, _rail: Rail) -> f64 {
        0.0
    }
    fn node_state(&self, _node: usize) -> f64 {
        0.0
    }
    fn set_node_state(&mut self, _node: usize, _value: f64) {}
}

/// What the VM does after an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// leave the enclosing composed function
    Return,
    /// relative displacement in instructions
    Jump(i32),
}

/// How many extra constants an instruction for a builtin carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstantSpec {
    None,
    Exactly(usize),
    /// a non-empty, even-length breakpoint table
    Pairs,
}

impl ConstantSpec {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            ConstantSpec::None => n == 0,
            ConstantSpec::Exactly(expected) => n == expected,
            ConstantSpec::Pairs => n >= 2 && n % 2 == 0,
        }
    }
}

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    // arithmetic
    Mov = 1,
    Neg,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Sqr,
    Sqrt,
    Exp,
    Ln,
    Log,
    Abs,
    Inv,
    Min,
    Max,
    Limit,
    Floor,
    Ceil,
    Sign,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Qcnl,
    Unit,
    Uramp,
    Ldc,
    // comparisons
    Lt = 100,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    // conditional store
    Slt = 110,
    Sle,
    Sgt,
    Sge,
    Seq,
    Sne,
    // ternary select
    Tlt = 120,
    Tle,
    Tgt,
    Tge,
    Teq,
    Tne,
    // boolean algebra
    And = 150,
    Or,
    Xor,
    Not,
    // control flow
    Jmp = 200,
    Jlt,
    Jle,
    Jgt,
    Jge,
    Jeq,
    Jne,
    Jltz,
    Jlez,
    Jgtz,
    Jgez,
    Jeqz,
    Jnez,
    Ret,
    // tables, accessors, state
    Pwl = 300,
    Time,
    Dt,
    Freq,
    Vpos,
    Vneg,
    LdNode,
    StNode,
    Last,
}

impl Builtin {
    pub const ALL: &'static [Builtin] = {
        use Builtin::*;
        &[
            Mov, Neg, Add, Sub, Mul, Div, Pow, Sqr, Sqrt, Exp, Ln, Log, Abs, Inv, Min, Max, Limit,
            Floor, Ceil, Sign, Sin, Cos, Tan, Asin, Acos, Atan, Atan2, Sinh, Cosh, Tanh, Qcnl,
            Unit, Uramp, Ldc, Lt, Le, Gt, Ge, Eq, Ne, Slt, Sle, Sgt, Sge, Seq, Sne, Tlt, Tle, Tgt,
            Tge, Teq, Tne, And, Or, Xor, Not, Jmp, Jlt, Jle, Jgt, Jge, Jeq, Jne, Jltz, Jlez, Jgtz,
            Jgez, Jeqz, Jnez, Ret, Pwl, Time, Dt, Freq, Vpos, Vneg, LdNode, StNode, Last,
        ]
    };

    /// Stable numeric id, used on the instruction stream.
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn mnemonic(self) -> &'static str {
        use Builtin::*;
        match self {
            Mov => "_MOV",
            Neg => "_NEG",
            Add => "_ADD",
            Sub => "_SUB",
            Mul => "_MUL",
            Div => "_DIV",
            Pow => "_POW",
            Sqr => "_SQR",
            Sqrt => "_SQRT",
            Exp => "_EXP",
            Ln => "_LN",
            Log => "_LOG",
            Abs => "_ABS",
            Inv => "_INV",
            Min => "_MIN",
            Max => "_MAX",
            Limit => "_LIMIT",
            Floor => "_FLOOR",
            Ceil => "_CEIL",
            Sign => "_SIGN",
            Sin => "_SIN",
            Cos => "_COS",
            Tan => "_TAN",
            Asin => "_ASIN",
            Acos => "_ACOS",
            Atan => "_ATAN",
            Atan2 => "_ATAN2",
            Sinh => "_SINH",
            Cosh => "_COSH",
            Tanh => "_TANH",
            Qcnl => "_QCNL",
            Unit => "_UNIT",
            Uramp => "_URAMP",
            Ldc => "_LDC",
            Lt => "_LT",
            Le => "_LE",
            Gt => "_GT",
            Ge => "_GE",
            Eq => "_EQ",
            Ne => "_NE",
            Slt => "_SLT",
            Sle => "_SLE",
            Sgt => "_SGT",
            Sge => "_SGE",
            Seq => "_SEQ",
            Sne => "_SNE",
            Tlt => "_TLT",
            Tle => "_TLE",
            Tgt => "_TGT",
            Tge => "_TGE",
            Teq => "_TEQ",
            Tne => "_TNE",
            And => "_AND",
            Or => "_OR",
            Xor => "_XOR",
            Not => "_NOT",
            Jmp => "_JMP",
            Jlt => "_JLT",
            Jle => "_JLE",
            Jgt => "_JGT",
            Jge => "_JGE",
            Jeq => "_JEQ",
            Jne => "_JNE",
            Jltz => "_JLTZ",
            Jlez => "_JLEZ",
            Jgtz => "_JGTZ",
            Jgez => "_JGEZ",
            Jeqz => "_JEQZ",
            Jnez => "_JNEZ",
            Ret => "_RET",
            Pwl => "_PWL",
            Time => "_TIME",
            Dt => "_DT",
            Freq => "_FREQ",
            Vpos => "_VPOS",
            Vneg => "_VNEG",
            LdNode => "_LDNODE",
            StNode => "_STNODE",
            Last => "_LAST",
        }
    }

    /// Number of operands, not counting the result.
    pub fn param_count(self) -> usize {
        use Builtin::*;
        match self {
            Ldc | Time | Dt | Freq | Vpos | Vneg | LdNode | Jmp | Ret => 0,
            Mov | Neg | Sqr | Sqrt | Exp | Ln | Log | Abs | Inv | Floor | Ceil | Sign | Sin
            | Cos | Tan | Asin | Acos | Atan | Sinh | Cosh | Tanh | Qcnl | Unit | Uramp | Not
            | Jltz | Jlez | Jgtz | Jgez | Jeqz | Jnez | Pwl | StNode | Last => 1,
            Add | Sub | Mul | Div | Pow | Min | Max | Atan2 | Lt | Le | Gt | Ge | Eq | Ne
            | And | Or | Xor | Jlt | Jle | Jgt | Jge | Jeq | Jne => 2,
            Limit | Slt | Sle | Sgt | Sge | Seq | Sne => 3,
            Tlt | Tle | Tgt | Tge | Teq | Tne => 4,
        }
    }

    pub fn index_field_size(self) -> usize {
        2 + self.param_count()
    }

    pub fn working_storage_size(self) -> usize {
        match self {
            Builtin::Last => 1,
            _ => 0,
        }
    }

    pub fn jumps(self) -> bool {
        use Builtin::*;
        matches!(
            self,
            Jmp | Jlt | Jle | Jgt | Jge | Jeq | Jne | Jltz | Jlez | Jgtz | Jgez | Jeqz | Jnez
        )
    }

    pub fn writes_result(self) -> bool {
        !(self.jumps() || matches!(self, Builtin::Ret | Builtin::StNode))
    }

    pub fn constants(self) -> ConstantSpec {
        match self {
            Builtin::Ldc | Builtin::LdNode | Builtin::StNode => ConstantSpec::Exactly(1),
            Builtin::Pwl => ConstantSpec::Pairs,
            _ => ConstantSpec::None,
        }
    }

    /// Runs the builtin.  Operands live at `working[field[2 + i]]`, the
    /// result at `working[field[0]]` and private storage starts at
    /// `working[field[1]]`.
    pub fn evaluate(
        self,
        field: &[usize],
        working: &mut [f64],
        ctx: &mut dyn SimContext,
        instr: &Instruction,
    ) -> Control {
        use Builtin::*;

        let mut args = [0.0; 4];
        for (i, arg) in args.iter_mut().enumerate().take(self.param_count()) {
            *arg = working[field[2 + i]];
        }
        let [a, b, c, d] = args;

        let result = match self {
            Mov => a,
            Neg => -a,
            Add => a + b,
            Sub => a - b,
            Mul => a * b,
            Div => a / b,
            Pow => a.powf(b),
            Sqr => a * a,
            Sqrt => a.sqrt(),
            Exp => a.exp(),
            Ln => a.ln(),
            Log => a.log10(),
            Abs => a.abs(),
            Inv => inverse(a),
            Min => {
                if a < b {
                    a
                } else {
                    b
                }
            }
            Max => {
                if a > b {
                    a
                } else {
                    b
                }
            }
            Limit => {
                if a < b {
                    b
                } else if a > c {
                    c
                } else {
                    a
                }
            }
            Floor => a.floor(),
            Ceil => a.ceil(),
            Sign => {
                if a > 0.0 {
                    1.0
                } else if a < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Sin => a.sin(),
            Cos => a.cos(),
            Tan => a.tan(),
            Asin => a.asin(),
            Acos => a.acos(),
            Atan => a.atan(),
            Atan2 => a.atan2(b),
            Sinh => a.sinh(),
            Cosh => a.cosh(),
            Tanh => a.tanh(),
            Qcnl => qcnl(a),
            Unit => unit_step(a),
            Uramp => ramp(a),
            Ldc => constant(instr, 0),
            Lt => bool_value(a < b),
            Le => bool_value(a <= b),
            Gt => bool_value(a > b),
            Ge => bool_value(a >= b),
            Eq => bool_value(approx_eq!(f64, a, b)),
            Ne => bool_value(!approx_eq!(f64, a, b)),
            Slt => return store(field, working, a < b, c),
            Sle => return store(field, working, a <= b, c),
            Sgt => return store(field, working, a > b, c),
            Sge => return store(field, working, a >= b, c),
            Seq => return store(field, working, approx_eq!(f64, a, b), c),
            Sne => return store(field, working, !approx_eq!(f64, a, b), c),
            Tlt => select(a < b, c, d),
            Tle => select(a <= b, c, d),
            Tgt => select(a > b, c, d),
            Tge => select(a >= b, c, d),
            Teq => select(approx_eq!(f64, a, b), c, d),
            Tne => select(!approx_eq!(f64, a, b), c, d),
            And => bool_value(is_truthy(a) && is_truthy(b)),
            Or => bool_value(is_truthy(a) || is_truthy(b)),
            Xor => bool_value(is_truthy(a) != is_truthy(b)),
            Not => bool_value(!is_truthy(a)),
            Jmp => return branch(instr, true),
            Jlt => return branch(instr, a < b),
            Jle => return branch(instr, a <= b),
            Jgt => return branch(instr, a > b),
            Jge => return branch(instr, a >= b),
            Jeq => return branch(instr, approx_eq!(f64, a, b)),
            Jne => return branch(instr, !approx_eq!(f64, a, b)),
            Jltz => return branch(instr, a < 0.0),
            Jlez => return branch(instr, a <= 0.0),
            Jgtz => return branch(instr, a > 0.0),
            Jgez => return branch(instr, a >= 0.0),
            Jeqz => return branch(instr, approx_eq!(f64, a, 0.0)),
            Jnez => return branch(instr, !approx_eq!(f64, a, 0.0)),
            Ret => return Control::Return,
            Pwl => lookup(&instr.constants, a),
            Time => ctx.time(),
            Dt => ctx.timestep(),
            Freq => ctx.frequency(),
            Vpos => ctx.rail(Rail::Positive),
            Vneg => ctx.rail(Rail::Negative),
            LdNode => ctx.node_state(node_ordinal(instr)),
            StNode => {
                ctx.set_node_state(node_ordinal(instr), a);
                return Control::Continue;
            }
            Last => {
                // unit delay: hand back the input seen on the previous call
                let previous = working[field[1]];
                working[field[1]] = a;
                previous
            }
        };

        working[field[0]] = result;
        Control::Continue
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

#[inline(always)]
fn constant(instr: &Instruction, i: usize) -> f64 {
    instr.constants.get(i).copied().unwrap_or(0.0)
}

#[inline(always)]
fn node_ordinal(instr: &Instruction) -> usize {
    constant(instr, 0) as usize
}

#[inline(always)]
fn store(field: &[usize], working: &mut [f64], cond: bool, value: f64) -> Control {
    if cond {
        working[field[0]] = value;
    }
    Control::Continue
}

#[inline(always)]
fn select(cond: bool, t: f64, f: f64) -> f64 {
    if cond { t } else { f }
}

#[inline(always)]
fn branch(instr: &Instruction, taken: bool) -> Control {
    match instr.jump {
        Some(displacement) if taken => Control::Jump(displacement),
        _ => Control::Continue,
    }
}

/// The registry of builtins, built once and passed by reference.
#[derive(Clone, Debug)]
pub struct Catalog {
    by_mnemonic: HashMap<&'static str, Builtin>,
    by_id: HashMap<u16, Builtin>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        let mut by_mnemonic = HashMap::with_capacity(Builtin::ALL.len());
        let mut by_id = HashMap::with_capacity(Builtin::ALL.len());
        for &builtin in Builtin::ALL {
            by_mnemonic.insert(builtin.mnemonic(), builtin);
            by_id.insert(builtin.id(), builtin);
        }
        Catalog { by_mnemonic, by_id }
    }

    /// Case-insensitive mnemonic lookup, e.g. `_add` or `_ADD`.
    pub fn lookup(&self, mnemonic: &str) -> Option<Builtin> {
        self.by_mnemonic
            .get(mnemonic.to_ascii_uppercase().as_str())
            .copied()
    }

    pub fn from_id(&self, id: u16) -> Option<Builtin> {
        self.by_id.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Builtin> + '_ {
        Builtin::ALL.iter().copied()
    }
}
