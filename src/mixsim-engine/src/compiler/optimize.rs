// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use log::trace;

use crate::atom::{Atom, AtomArray, AtomId};

/// Turns every constant-folded function atom into a plain constant.
pub(crate) fn rewrite_folded(atoms: &mut AtomArray) {
    for atom in atoms.atoms.iter_mut() {
        if let Atom::Function {
            op,
            folded: Some(value),
            is_boolean,
            ..
        } = *atom
        {
            trace!("folding {op} to {value}");
            *atom = Atom::Const { value, is_boolean };
        }
    }
}

/// Deletes constants nothing refers to, renumbering every later
/// reference.  The root is always kept.
pub(crate) fn prune_constants(atoms: &mut AtomArray) {
    let len = atoms.atoms.len();
    let mut referenced = vec![false; len];
    referenced[atoms.root as usize] = true;
    for atom in atoms.atoms.iter() {
        for operand in atom.operands() {
            referenced[operand as usize] = true;
        }
    }

    let mut renumber: Vec<AtomId> = vec![0; len];
    let mut kept = Vec::with_capacity(len);
    for (i, atom) in atoms.atoms.drain(..).enumerate() {
        if !referenced[i] && matches!(atom, Atom::Const { .. }) {
            trace!("pruning unreferenced constant {i}");
            continue;
        }
        renumber[i] = kept.len() as AtomId;
        kept.push(atom);
    }

    for atom in kept.iter_mut() {
        for operand in atom.operands_mut() {
            *operand = renumber[*operand as usize];
        }
    }

    atoms.atoms = kept;
    atoms.root = renumber[atoms.root as usize];
}
