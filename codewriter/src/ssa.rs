/**
 * Copyright 2022 - Jahred Love
 *
 * Redistribution and use in source and binary forms, with or without modification,
 * are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 * list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice, this
 * list of conditions and the following disclaimer in the documentation and/or other
 * materials provided with the distribution.
 *
 * 3. Neither the name of the copyright holder nor the names of its contributors may
 * be used to endorse or promote products derived from this software without specific
 * prior written permission.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS “AS IS” AND
 * ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED
 * WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED.
 * IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT,
 * INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT
 * NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
 * PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
 * WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE)
 * ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE
 * POSSIBILITY OF SUCH DAMAGE.
 */

// Flattened programs: a linear list of instructions over typed virtual
// registers, with explicit labels.

use crate::descr::Descr;
use crate::ir::{Constant, Kind};
use crate::program::ProcId;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register {
    pub kind: Kind,
    pub index: u32,
}

impl Register {
    pub fn new(kind: Kind, index: u32) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}{}", self.kind.code(), self.index)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Label(name.into())
    }
}

/// A run of same-kind values passed as one operand (call arguments).
#[derive(Clone, Debug, PartialEq)]
pub struct ListOfKind {
    pub kind: Kind,
    pub items: Vec<Operand>,
}

impl ListOfKind {
    pub fn new(kind: Kind, items: Vec<Operand>) -> Self {
        Self { kind, items }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Reg(Register),
    Const(Constant),
    /// Reference to a label, resolved to an absolute byte offset.
    Label(Label),
    List(ListOfKind),
    Descr(Descr),
    /// Possible targets of a regular indirect call. Encodes to nothing.
    IndirectTargets(Vec<ProcId>),
}

impl From<Register> for Operand {
    fn from(r: Register) -> Self {
        Operand::Reg(r)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Label(Label),
    /// Liveness marker: after analysis, every register live here, plus the
    /// labels whose live sets were merged in.
    Live(Vec<Operand>),
    /// Control never falls through this point.
    Unreachable,
    Op {
        name: String,
        args: Vec<Operand>,
        result: Option<Register>,
    },
}

impl Insn {
    pub fn op(name: impl Into<String>, args: Vec<Operand>, result: Option<Register>) -> Self {
        Insn::Op {
            name: name.into(),
            args,
            result,
        }
    }

    pub fn op_name(&self) -> Option<&str> {
        match self {
            Insn::Op { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SsaRepr {
    pub name: String,
    pub insns: Vec<Insn>,
    /// Byte position of each instruction, filled in by the encoder.
    pub insns_pos: Option<Vec<usize>>,
}

impl SsaRepr {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            insns: Vec::new(),
            insns_pos: None,
        }
    }

    pub fn emit(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    pub fn ops_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Insn> + 'a {
        self.insns
            .iter()
            .filter(move |i| i.op_name() == Some(name))
    }
}
