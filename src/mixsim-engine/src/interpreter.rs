// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;

use crate::atom::{Atom, AtomArray};
use crate::common::Result;
use crate::eval_err;

/// Supplies values for the names an expression references.
pub trait Bindings {
    fn value(&self, name: &str) -> Option<f64>;
}

impl Bindings for HashMap<String, f64> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// What a name refers to in the circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameKind<'a> {
    Voltage(&'a str),
    Current(&'a str),
    Parameter(&'a str),
}

pub fn classify(name: &str) -> NameKind<'_> {
    if let Some(node) = name.strip_prefix('@') {
        NameKind::Voltage(node)
    } else if let Some(component) = name.strip_prefix('#') {
        NameKind::Current(component)
    } else {
        NameKind::Parameter(name)
    }
}

impl AtomArray {
    /// Evaluates every atom in order and returns the root's value.
    /// Booleans evaluate to 1 or 0.
    pub fn evaluate(&self, bindings: &dyn Bindings) -> Result<f64> {
        let mut values = Vec::with_capacity(self.atoms.len());
        for atom in self.atoms.iter() {
            let value = match atom {
                Atom::Sentinel | Atom::ListElement { .. } => 0.0,
                Atom::Const { value, .. } => *value,
                Atom::NameRef(name) => match bindings.value(name) {
                    Some(value) => value,
                    None => return eval_err!(UnknownName, format!("'{name}' is not bound")),
                },
                Atom::Function { op, a, b, .. } if op.is_list() => {
                    let args: Vec<f64> = self
                        .list_arguments(*a, *b)
                        .into_iter()
                        .map(|id| values[id as usize])
                        .collect();
                    op.apply_list(&args)
                }
                Atom::Function { op, a, b: None, .. } => op.apply1(values[*a as usize]),
                Atom::Function {
                    op, a, b: Some(b), ..
                } => op.apply2(values[*a as usize], values[*b as usize]),
            };
            values.push(value);
        }
        Ok(values[self.root as usize])
    }
}
