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

use super::Flattener;
use crate::call::CallKind;
use crate::error::{BuildError, ErrorKind, Result};
use crate::ir::{BlockId, Callee, Constant, Kind, KindMap, OpArg, SpaceOp};
use crate::ssa::{Insn, ListOfKind, Operand};

impl Flattener<'_, '_> {
    /// Splits call arguments by kind, dropping Void values.
    fn make_three_lists(&mut self, b: BlockId, args: &[OpArg]) -> Result<KindMap<Vec<Operand>>> {
        let mut lists: KindMap<Vec<Operand>> = KindMap::default();
        for a in args {
            if let Some(o) = self.op_operand(b, a)? {
                match super::operand_kind(&o) {
                    Some(kind) => lists[kind].push(o),
                    None => return Err(self.error(b, format!("call argument {:?} has no kind", o))),
                }
            }
        }
        Ok(lists)
    }

    /// Rewrites `direct_call`/`indirect_call` into the call instruction for
    /// its kind, followed by a liveness marker:
    ///
    /// ```text
    /// inline_call_ir_i <UnitDescr g>, I[%i0], R[%r1] -> %i2
    /// residual_call_r_v $<* h>, R[%r1], <CallDescr r:v CanRaise>
    /// ```
    pub(super) fn serialize_call(&mut self, b: BlockId, op: &SpaceOp) -> Result<()> {
        let (classified, callee_name) = match self.callcontrol.as_deref_mut() {
            Some(cc) => {
                let classified = cc.classify(op, self.proc, self.graph)?;
                let name = match op.callee() {
                    Some(Callee::Direct(p)) => Some(cc.source().proc_name(*p)),
                    _ => None,
                };
                (classified, name)
            }
            None => {
                return Err(BuildError::new(
                    ErrorKind::Graph,
                    format!("in {}, {}: no call classifier to handle '{}'", self.graph.name, b, op.opname),
                ))
            }
        };

        let lists = self.make_three_lists(b, op.call_args())?;
        let result = op.result.and_then(|r| self.reg(r));
        let reskind = result.map(|r| r.kind);
        let kinds = if !lists[Kind::Float].is_empty() || reskind == Some(Kind::Float) {
            "irf"
        } else if !lists[Kind::Int].is_empty() {
            "ir"
        } else {
            "r"
        };
        let res = reskind.map(Kind::code).unwrap_or('v');
        let sublists: Vec<Operand> = kinds
            .chars()
            .filter_map(Kind::from_code)
            .map(|k| Operand::List(ListOfKind::new(k, lists[k].clone())))
            .collect();

        let function = match op.callee() {
            Some(Callee::Direct(_)) => {
                Operand::Const(Constant::address(callee_name.unwrap_or_default()))
            }
            _ => match op.args.first() {
                Some(fnptr) => self
                    .op_operand(b, fnptr)?
                    .ok_or_else(|| self.error(b, "indirect call through a void value"))?,
                None => return Err(self.error(b, "indirect call without a function pointer")),
            },
        };

        match (classified.kind, op.callee()) {
            (CallKind::Regular, Some(Callee::Direct(_))) => {
                let mut args = vec![Operand::Descr(classified.descr)];
                args.extend(sublists);
                self.emit_op(format!("inline_call_{}_{}", kinds, res), args, result);
            }
            (CallKind::Regular, _) => {
                self.emit(Insn::Live(Vec::new()));
                self.emit_op("int_guard_value", vec![function.clone()], None);
                let mut args = vec![function];
                args.extend(sublists);
                args.push(Operand::Descr(classified.descr));
                args.push(Operand::IndirectTargets(classified.indirect_units));
                self.emit_op(format!("residual_call_{}_{}", kinds, res), args, result);
            }
            _ => {
                let mut args = vec![function];
                args.extend(sublists);
                args.push(Operand::Descr(classified.descr));
                self.emit_op(format!("residual_call_{}_{}", kinds, res), args, result);
            }
        }
        self.emit(Insn::Live(Vec::new()));
        Ok(())
    }
}
