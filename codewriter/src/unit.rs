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

// Compiled units: the encoder's output, read by the interpreter and the
// trace recorder.

use crate::descr::Descr;
use crate::error::{BuildError, ErrorKind, Result};
use crate::ir::{ConstValue, Kind, KindMap};
use crate::program::ProcId;
use crate::ssa::Register;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

/// Registers live at one offset, as sorted register indices per kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LiveVars {
    pub live_i: Vec<u8>,
    pub live_r: Vec<u8>,
    pub live_f: Vec<u8>,
}

impl LiveVars {
    pub fn live(&self, kind: Kind) -> &[u8] {
        match kind {
            Kind::Int => &self.live_i,
            Kind::Ref => &self.live_r,
            Kind::Float => &self.live_f,
        }
    }

    pub fn registers(&self) -> impl Iterator<Item = Register> + '_ {
        Kind::ALL.into_iter().flat_map(move |k| {
            self.live(k)
                .iter()
                .map(move |&i| Register::new(k, i as u32))
        })
    }

    pub fn len(&self) -> usize {
        self.live_i.len() + self.live_r.len() + self.live_f.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shares identical liveness records across all units of a session.
#[derive(Debug, Default)]
pub struct LivenessInterner {
    table: HashMap<LiveVars, Rc<LiveVars>>,
    hits: usize,
}

impl LivenessInterner {
    pub fn intern(&mut self, live: LiveVars) -> Rc<LiveVars> {
        if let Some(shared) = self.table.get(&live) {
            self.hits += 1;
            return shared.clone();
        }
        let shared = Rc::new(live.clone());
        self.table.insert(live, shared.clone());
        shared
    }

    /// Number of distinct records.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// How many requests were served by an existing record.
    pub fn hits(&self) -> usize {
        self.hits
    }
}

/// Everything the encoder produced for one unit, before finalization.
#[derive(Debug, Default)]
pub(crate) struct UnitParts {
    pub name: String,
    pub proc: Option<ProcId>,
    pub calldescr: Option<Descr>,
    pub code: Vec<u8>,
    pub constants: KindMap<Vec<ConstValue>>,
    pub num_regs: KindMap<u32>,
    pub descrs: Vec<Descr>,
    pub liveness: BTreeMap<usize, Rc<LiveVars>>,
    pub startpoints: BTreeSet<usize>,
    pub alllabels: BTreeSet<usize>,
    pub resulttypes: BTreeMap<usize, Kind>,
    pub dump: Option<String>,
}

/// One procedure in bytecode form. Immutable once built.
#[derive(Debug)]
pub struct CompiledUnit {
    name: String,
    proc: Option<ProcId>,
    calldescr: Option<Descr>,
    code: Vec<u8>,
    constants: KindMap<Vec<ConstValue>>,
    num_regs: KindMap<u32>,
    descrs: Vec<Descr>,
    liveness: BTreeMap<usize, Rc<LiveVars>>,
    startpoints: BTreeSet<usize>,
    alllabels: BTreeSet<usize>,
    resulttypes: BTreeMap<usize, Kind>,
    dump: Option<String>,
}

impl CompiledUnit {
    pub(crate) fn finalize(parts: UnitParts) -> Self {
        Self {
            name: parts.name,
            proc: parts.proc,
            calldescr: parts.calldescr,
            code: parts.code,
            constants: parts.constants,
            num_regs: parts.num_regs,
            descrs: parts.descrs,
            liveness: parts.liveness,
            startpoints: parts.startpoints,
            alllabels: parts.alllabels,
            resulttypes: parts.resulttypes,
            dump: parts.dump,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The procedure this unit was built from, if any.
    pub fn proc(&self) -> Option<ProcId> {
        self.proc
    }

    /// Call descriptor to use when the unit is called residually.
    pub fn calldescr(&self) -> Option<&Descr> {
        self.calldescr.as_ref()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Constant pool of `kind`. Entry `n` is addressed by byte `255 - n`.
    pub fn constants(&self, kind: Kind) -> &[ConstValue] {
        &self.constants[kind]
    }

    /// Descriptor table of this unit. Code refers to entry `n` by the
    /// little-endian pair `n as u16`.
    pub fn descrs(&self) -> &[Descr] {
        &self.descrs
    }

    pub fn descr(&self, num: u16) -> Option<&Descr> {
        self.descrs.get(num as usize)
    }

    pub fn num_regs(&self, kind: Kind) -> u32 {
        self.num_regs[kind]
    }

    /// Operand slots of `kind` in use: registers plus pool entries.
    pub fn num_regs_and_consts(&self, kind: Kind) -> u32 {
        self.num_regs[kind] + self.constants[kind].len() as u32
    }

    /// Resolves an operand byte to a pool constant, or `None` for a register.
    pub fn pool_constant(&self, kind: Kind, byte: u8) -> Option<&ConstValue> {
        let pool = &self.constants[kind];
        let slot = 255usize.checked_sub(byte as usize)?;
        if byte as u32 >= self.num_regs[kind] {
            pool.get(slot)
        } else {
            None
        }
    }

    pub fn get_live_vars(&self, pc: usize) -> Result<&Rc<LiveVars>> {
        self.liveness.get(&pc).ok_or_else(|| {
            BuildError::new(
                ErrorKind::MissingLiveness,
                format!("missing liveness[{}] in {}\n{}", pc, self.name, self.dump()),
            )
        })
    }

    pub fn liveness(&self) -> impl Iterator<Item = (usize, &Rc<LiveVars>)> {
        self.liveness.iter().map(|(pc, l)| (*pc, l))
    }

    /// Target of the label operand that ends at `position`.
    pub fn follow_jump(&self, position: usize) -> Result<usize> {
        let at = position
            .checked_sub(2)
            .filter(|at| self.alllabels.contains(at))
            .ok_or_else(|| {
                BuildError::new(
                    ErrorKind::Encoding,
                    format!("no label operand ends at {} in {}", position, self.name),
                )
            })?;
        Ok(u16::from_le_bytes([self.code[at], self.code[at + 1]]) as usize)
    }

    pub fn is_startpoint(&self, pc: usize) -> bool {
        self.startpoints.contains(&pc)
    }

    pub fn startpoints(&self) -> &BTreeSet<usize> {
        &self.startpoints
    }

    /// Kind of the result written by the instruction ending at `pc`.
    pub fn result_kind_at(&self, pc: usize) -> Option<Kind> {
        self.resulttypes.get(&pc).copied()
    }

    pub fn dump(&self) -> String {
        match &self.dump {
            Some(text) => text.clone(),
            None => format!("<no dump available for {}>", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interner_shares_equal_records() {
        let mut interner = LivenessInterner::default();
        let a = interner.intern(LiveVars {
            live_i: vec![0, 2],
            ..LiveVars::default()
        });
        let b = interner.intern(LiveVars {
            live_i: vec![0, 2],
            ..LiveVars::default()
        });
        let c = interner.intern(LiveVars::default());
        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(interner.len(), 2);
        assert_eq!(interner.hits(), 1);
    }

    #[test]
    fn live_vars_list_registers_by_kind() {
        let lv = LiveVars {
            live_i: vec![1],
            live_r: vec![0, 3],
            live_f: vec![],
        };
        let regs: Vec<Register> = lv.registers().collect();
        assert_eq!(
            regs,
            vec![
                Register::new(Kind::Int, 1),
                Register::new(Kind::Ref, 0),
                Register::new(Kind::Ref, 3),
            ]
        );
        assert_eq!(lv.len(), 3);
    }

    #[test]
    fn queries_on_a_hand_built_unit() {
        let mut parts = UnitParts {
            name: "f".into(),
            code: vec![0, 4, 0, 1, 7],
            ..UnitParts::default()
        };
        parts.alllabels.insert(1);
        parts.num_regs[Kind::Int] = 2;
        parts.constants[Kind::Int] = vec![ConstValue::Int(1000)];
        let unit = CompiledUnit::finalize(parts);

        assert_eq!(unit.follow_jump(3).unwrap(), 4);
        assert_eq!(unit.follow_jump(4).unwrap_err().kind, ErrorKind::Encoding);
        assert_eq!(unit.num_regs_and_consts(Kind::Int), 3);
        assert_eq!(unit.pool_constant(Kind::Int, 255), Some(&ConstValue::Int(1000)));
        assert_eq!(unit.pool_constant(Kind::Int, 1), None);

        let err = unit.get_live_vars(0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingLiveness);
        assert!(err.message.contains("<no dump available for f>"));
    }
}
