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

// Encoder: flattened program in, compiled unit out.
//
// Each operation becomes one opcode byte followed by its operands:
//
// - register: one byte, its index;
// - constant: one byte, either the value itself (`c`, small ints on
//   allow-listed opcodes) or `256 - n` for the n-th pool entry of its kind;
// - label: two bytes, little-endian absolute offset;
// - list: a count byte then one byte per item;
// - descriptor: two bytes, little-endian index in the unit's own table;
// - result: one register byte, marked `>` in the opcode key.
//
// Registers and pool entries share the 256 byte values of their kind, so
// `registers + constants <= 256` must hold per kind.

mod tables;

pub use tables::{DescrSet, DescrTable, OpcodeTable, MAX_DESCRS, MAX_OPCODES, USE_C_FORM};

use crate::config::Config;
use crate::descr::Descr;
use crate::error::{BuildError, ErrorKind, Result};
use crate::format::format_assembler;
use crate::ir::{ConstValue, Constant, Kind, KindMap};
use crate::program::ProcId;
use crate::ssa::{Insn, Label, Operand, Register, SsaRepr};
use crate::unit::{CompiledUnit, LiveVars, LivenessInterner, UnitParts};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Where a unit came from, recorded in the unit.
#[derive(Clone, Debug)]
pub struct UnitOrigin {
    pub proc: ProcId,
    pub calldescr: Descr,
}

/// State shared by every unit of one build: opcode table, the set of
/// descriptors seen and liveness intern table.
#[derive(Debug)]
pub struct Session {
    opcodes: OpcodeTable,
    descrs: DescrSet,
    liveness: LivenessInterner,
    indirect_call_targets: BTreeSet<ProcId>,
    inline_ops: HashSet<String>,
    count_units: usize,
}

impl Default for Session {
    fn default() -> Self {
        Self::with_inline_ops(USE_C_FORM.iter().copied())
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inline_ops<S: Into<String>>(ops: impl IntoIterator<Item = S>) -> Self {
        Self {
            opcodes: OpcodeTable::default(),
            descrs: DescrSet::default(),
            liveness: LivenessInterner::default(),
            indirect_call_targets: BTreeSet::new(),
            inline_ops: ops.into_iter().map(Into::into).collect(),
            count_units: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        match &config.inline_const_ops {
            Some(ops) => Self::with_inline_ops(ops.iter().cloned()),
            None => Self::default(),
        }
    }

    /// Encodes `ssarepr`, recording the byte position of each instruction in
    /// it. Nothing is added to the session if encoding fails, apart from
    /// opcode entries already interned and descriptors already seen.
    pub fn assemble(&mut self, ssarepr: &mut SsaRepr, origin: Option<UnitOrigin>) -> Result<CompiledUnit> {
        Assembler::new(self, &ssarepr.name).assemble(ssarepr, origin)
    }

    pub fn opcodes(&self) -> &OpcodeTable {
        &self.opcodes
    }

    pub fn descrs(&self) -> &DescrSet {
        &self.descrs
    }

    pub fn liveness(&self) -> &LivenessInterner {
        &self.liveness
    }

    /// Units reachable through regular indirect calls.
    pub fn indirect_call_targets(&self) -> &BTreeSet<ProcId> {
        &self.indirect_call_targets
    }

    pub fn units_assembled(&self) -> usize {
        self.count_units
    }
}

/// Per-unit encoder state.
struct Assembler<'s> {
    session: &'s mut Session,
    name: String,
    code: Vec<u8>,
    constants: KindMap<Vec<ConstValue>>,
    constants_dict: HashMap<(Kind, ConstValue), u8>,
    label_positions: HashMap<Label, usize>,
    tlabel_positions: Vec<(Label, usize)>,
    descrs: DescrTable,
    switch_descrs: Vec<Descr>,
    count_regs: KindMap<u32>,
    liveness: BTreeMap<usize, KindMap<BTreeSet<u32>>>,
    startpoints: BTreeSet<usize>,
    alllabels: BTreeSet<usize>,
    resulttypes: BTreeMap<usize, Kind>,
}

impl<'s> Assembler<'s> {
    fn new(session: &'s mut Session, name: &str) -> Self {
        Self {
            session,
            name: name.to_string(),
            code: Vec::new(),
            constants: KindMap::default(),
            constants_dict: HashMap::new(),
            label_positions: HashMap::new(),
            tlabel_positions: Vec::new(),
            descrs: DescrTable::default(),
            switch_descrs: Vec::new(),
            count_regs: KindMap::default(),
            liveness: BTreeMap::new(),
            startpoints: BTreeSet::new(),
            alllabels: BTreeSet::new(),
            resulttypes: BTreeMap::new(),
        }
    }

    fn assemble(mut self, ssarepr: &mut SsaRepr, origin: Option<UnitOrigin>) -> Result<CompiledUnit> {
        let mut positions = Vec::with_capacity(ssarepr.insns.len());
        for insn in &ssarepr.insns {
            positions.push(self.code.len());
            self.write_insn(insn)?;
        }
        ssarepr.insns_pos = Some(positions);
        self.fix_labels()?;
        self.check_result()?;
        let dump = format_assembler(ssarepr);
        Ok(self.make_unit(origin, dump))
    }

    fn encoding_error(&self, msg: String) -> BuildError {
        BuildError::new(ErrorKind::Encoding, format!("{} (in {})", msg, self.name))
    }

    fn emit_reg(&mut self, r: Register) {
        let count = &mut self.count_regs[r.kind];
        *count = (*count).max(r.index + 1);
        // Indices past 255 only occur in units check_result rejects.
        self.code.push(r.index as u8);
    }

    /// Emits a constant operand. Returns true if it was encoded inline.
    fn emit_const(&mut self, c: &Constant, allow_short: bool) -> Result<bool> {
        let kind = c
            .kind()
            .ok_or_else(|| self.encoding_error(format!("void constant used as an operand: {:?}", c)))?;
        if allow_short && kind == Kind::Int {
            if let ConstValue::Int(v) = c.value {
                if let Ok(byte) = i8::try_from(v) {
                    self.code.push(byte as u8);
                    return Ok(true);
                }
            }
        }
        let key = (kind, c.value.clone());
        let byte = match self.constants_dict.get(&key) {
            Some(&b) => b,
            None => {
                let pool = &mut self.constants[kind];
                pool.push(c.value.clone());
                let slot = 256 - pool.len() as i64;
                if slot < 0 {
                    return Err(self.encoding_error(format!("too many {} constants", kind)));
                }
                self.constants_dict.insert(key, slot as u8);
                slot as u8
            }
        };
        self.code.push(byte);
        Ok(false)
    }

    fn write_insn(&mut self, insn: &Insn) -> Result<()> {
        match insn {
            Insn::Unreachable => {}
            Insn::Label(l) => {
                if self.label_positions.insert(l.clone(), self.code.len()).is_some() {
                    return Err(self.encoding_error(format!("label {} declared twice", l.0)));
                }
            }
            Insn::Live(args) => {
                let entry = self.liveness.entry(self.code.len()).or_default();
                for a in args {
                    if let Operand::Reg(r) = a {
                        entry[r.kind].insert(r.index);
                    }
                }
            }
            Insn::Op { name, args, result } => {
                let startposition = self.code.len();
                self.code.push(0);
                let mut argcodes = String::new();
                let allow_short = self.session.inline_ops.contains(name.as_str());
                for a in args {
                    self.write_operand(a, allow_short, &mut argcodes)?;
                }
                if let Some(r) = result {
                    argcodes.push('>');
                    argcodes.push(r.kind.code());
                    self.emit_reg(*r);
                }
                let key = format!("{}/{}", name, argcodes);
                let num = self.session.opcodes.intern(&key)?;
                self.code[startposition] = num;
                self.startpoints.insert(startposition);
                if let Some(r) = result {
                    self.resulttypes.insert(self.code.len(), r.kind);
                }
            }
        }
        Ok(())
    }

    fn write_operand(&mut self, a: &Operand, allow_short: bool, argcodes: &mut String) -> Result<()> {
        match a {
            Operand::Reg(r) => {
                self.emit_reg(*r);
                argcodes.push(r.kind.code());
            }
            Operand::Const(c) => {
                let short = self.emit_const(c, allow_short)?;
                argcodes.push(if short {
                    'c'
                } else {
                    c.kind().map(Kind::code).unwrap_or('c')
                });
            }
            Operand::Label(l) => {
                let at = self.code.len();
                self.alllabels.insert(at);
                self.tlabel_positions.push((l.clone(), at));
                self.code.extend_from_slice(&[0, 0]);
                argcodes.push('L');
            }
            Operand::List(lst) => {
                let count = u8::try_from(lst.items.len()).map_err(|_| {
                    self.encoding_error(format!("list of {} {} values is too long", lst.items.len(), lst.kind))
                })?;
                self.code.push(count);
                for item in &lst.items {
                    match item {
                        Operand::Reg(r) if r.kind == lst.kind => self.emit_reg(*r),
                        Operand::Const(c) if c.kind() == Some(lst.kind) => {
                            self.emit_const(c, false)?;
                        }
                        other => {
                            return Err(self.encoding_error(format!(
                                "{:?} does not belong in a {} list",
                                other, lst.kind
                            )))
                        }
                    }
                }
                argcodes.push(lst.kind.list_code());
            }
            Operand::Descr(d) => {
                let num = self.descrs.intern(d).map_err(|e| self.encoding_error(e.message))?;
                self.session.descrs.insert(d);
                if d.as_switch().is_some() {
                    self.switch_descrs.push(d.clone());
                }
                self.code.extend_from_slice(&num.to_le_bytes());
                argcodes.push('d');
            }
            Operand::IndirectTargets(procs) => {
                self.session.indirect_call_targets.extend(procs.iter().copied());
            }
        }
        Ok(())
    }

    fn fix_labels(&mut self) -> Result<()> {
        for (label, at) in std::mem::take(&mut self.tlabel_positions) {
            let target = *self
                .label_positions
                .get(&label)
                .ok_or_else(|| self.encoding_error(format!("unresolved label {}", label.0)))?;
            let target = u16::try_from(target)
                .map_err(|_| self.encoding_error(format!("label {} at offset {} is out of range", label.0, target)))?;
            self.code[at..at + 2].copy_from_slice(&target.to_le_bytes());
        }
        for d in std::mem::take(&mut self.switch_descrs) {
            let Some(sd) = d.as_switch() else { continue };
            let mut offsets = BTreeMap::new();
            for (value, label) in &sd.labels {
                let target = self.label_positions.get(label).ok_or_else(|| {
                    self.encoding_error(format!("unresolved switch label {}", label.0))
                })?;
                offsets.insert(*value, *target);
            }
            if sd.offsets() != Some(&offsets) && !sd.attach(offsets) {
                return Err(self.encoding_error("switch table already resolved elsewhere".to_string()));
            }
        }
        Ok(())
    }

    fn check_result(&self) -> Result<()> {
        for kind in Kind::ALL {
            let regs = self.count_regs[kind] as usize;
            let consts = self.constants[kind].len();
            if regs + consts > 256 {
                return Err(self.encoding_error(format!(
                    "too many {} registers and constants: {} registers + {} constants > 256",
                    kind, regs, consts
                )));
            }
        }
        Ok(())
    }

    fn make_unit(self, origin: Option<UnitOrigin>, dump: String) -> CompiledUnit {
        let session = self.session;
        let liveness = self
            .liveness
            .into_iter()
            .map(|(pc, sets)| {
                let bytes = |k: Kind| sets[k].iter().map(|&i| i as u8).collect::<Vec<u8>>();
                let live = LiveVars {
                    live_i: bytes(Kind::Int),
                    live_r: bytes(Kind::Ref),
                    live_f: bytes(Kind::Float),
                };
                (pc, session.liveness.intern(live))
            })
            .collect();

        session.count_units += 1;
        if session.count_units <= 20 {
            debug!(unit = %self.name, bytes = self.code.len(), "assembled");
        }

        let (proc, calldescr) = match origin {
            Some(o) => (Some(o.proc), Some(o.calldescr)),
            None => (None, None),
        };
        CompiledUnit::finalize(UnitParts {
            name: self.name,
            proc,
            calldescr,
            code: self.code,
            constants: self.constants,
            num_regs: self.count_regs,
            descrs: self.descrs.into_vec(),
            liveness,
            startpoints: self.startpoints,
            alllabels: self.alllabels,
            resulttypes: self.resulttypes,
            dump: Some(dump),
        })
    }
}
