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

// Graph flattening.
//
// Turns a graph into a linear [`SsaRepr`], coloring values as they are
// first emitted. It is a depth-first walk from
// the start block where every block is emitted once, at its first visit, and
// later visits become a `goto`. Each exit shape has a fixed linear form:
//
// ```text
// # boolean branch              # raising operation
// goto_if_not_int_lt a, b, L1   catch_exception L1
// -live- L1                     <normal continuation>
// <true arm>                    L1:
// L1:                           goto_if_exception_mismatch $<* E>, L2
// <false arm>                   <handler>
//                               L2:
//                               reraise
// ```
//
// Values travelling along a link are moved into the target block's
// registers with `{kind}_copy`, using `{kind}_push`/`{kind}_pop` to break
// cycles.

mod calls;
mod rename;

pub use rename::{reorder_renaming_list, RenameStep};

use crate::call::CallControl;
use crate::descr::Descr;
use crate::error::{BuildError, ErrorKind, Result};
use crate::ir::{
    kind_of, Arg, Block, BlockId, Constant, ExitCase, ExitSwitch, Graph, Kind, KindMap, Link, LinkArg, OpArg,
    SpaceOp, VarId, CATCH_ALL,
};
use crate::program::ProcId;
use crate::regalloc::RegAllocator;
use crate::ssa::{Insn, Label, Operand, Register, SsaRepr};
use std::collections::HashSet;

/// Comparisons that fuse with the branch reading their result.
const FUSED_COMPARISONS: &[&str] = &[
    "int_lt",
    "int_le",
    "int_eq",
    "int_ne",
    "int_gt",
    "int_ge",
    "int_is_zero",
    "int_is_true",
    "ptr_eq",
    "ptr_ne",
    "ptr_iszero",
    "ptr_nonzero",
    "float_lt",
    "float_le",
    "float_eq",
    "float_ne",
    "float_gt",
    "float_ge",
];

pub const OVERFLOW_ERROR: &str = "OverflowError";

fn is_ovf(op: &SpaceOp) -> bool {
    op.opname.ends_with("_ovf")
}

fn block_label(b: BlockId) -> Label {
    Label(format!("blk{}", b.0))
}

fn link_label(b: BlockId, exit: usize) -> Label {
    Label(format!("blk{}_x{}", b.0, exit))
}

fn operand_kind(o: &Operand) -> Option<Kind> {
    match o {
        Operand::Reg(r) => Some(r.kind),
        Operand::Const(c) => c.kind(),
        _ => None,
    }
}

/// Flattens `graph`, the body of `proc`. Calls are classified through
/// `callcontrol`, which may queue the callees' units; a graph containing
/// calls cannot be flattened without one.
pub fn flatten_graph(
    graph: &Graph,
    proc: ProcId,
    regallocs: &mut KindMap<RegAllocator>,
    callcontrol: Option<&mut CallControl<'_>>,
) -> Result<SsaRepr> {
    let mut flattener = Flattener {
        graph,
        proc,
        regallocs,
        callcontrol,
        ssarepr: SsaRepr::new(graph.name.clone()),
        seen: HashSet::new(),
    };
    flattener.make_bytecode_block(graph.start)?;
    Ok(flattener.ssarepr)
}

struct Flattener<'f, 'a> {
    graph: &'f Graph,
    proc: ProcId,
    regallocs: &'f mut KindMap<RegAllocator>,
    callcontrol: Option<&'f mut CallControl<'a>>,
    ssarepr: SsaRepr,
    seen: HashSet<BlockId>,
}

impl<'f, 'a> Flattener<'f, 'a> {
    fn error(&self, b: BlockId, msg: impl std::fmt::Display) -> BuildError {
        BuildError::new(ErrorKind::Graph, format!("in {}, {}: {}", self.graph.name, b, msg))
    }

    fn emit(&mut self, insn: Insn) {
        self.ssarepr.emit(insn);
    }

    fn emit_op(&mut self, name: impl Into<String>, args: Vec<Operand>, result: Option<Register>) {
        self.ssarepr.emit(Insn::op(name, args, result));
    }

    /// Register of `v`, or `None` for a Void variable.
    fn reg(&mut self, v: VarId) -> Option<Register> {
        let kind = kind_of(self.graph.var_type(v))?;
        Some(Register::new(kind, self.regallocs[kind].color_of(v)))
    }

    fn arg_operand(&mut self, a: &Arg) -> Option<Operand> {
        match a {
            Arg::Var(v) => self.reg(*v).map(Operand::Reg),
            Arg::Const(c) => c.kind().map(|_| Operand::Const(c.clone())),
        }
    }

    fn op_operand(&mut self, b: BlockId, a: &OpArg) -> Result<Option<Operand>> {
        Ok(match a {
            OpArg::Var(v) => self.reg(*v).map(Operand::Reg),
            OpArg::Const(c) => c.kind().map(|_| Operand::Const(c.clone())),
            OpArg::Descr(d) => Some(Operand::Descr(d.clone())),
            OpArg::Callee(_) => return Err(self.error(b, "callee operand outside of a call")),
        })
    }

    fn op_operands(&mut self, b: BlockId, args: &[OpArg]) -> Result<Vec<Operand>> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            if let Some(o) = self.op_operand(b, a)? {
                out.push(o);
            }
        }
        Ok(out)
    }

    fn make_bytecode_block(&mut self, b: BlockId) -> Result<()> {
        let graph = self.graph;
        let block = graph.block(b);
        if block.is_final() {
            let values: Vec<Option<Operand>> = block.inputargs.iter().map(|v| self.reg(*v).map(Operand::Reg)).collect();
            return self.make_return(b, values);
        }
        if !self.seen.insert(b) {
            self.emit_op("goto", vec![Operand::Label(block_label(b))], None);
            self.emit(Insn::Unreachable);
            return Ok(());
        }
        self.emit(Insn::Label(block_label(b)));

        let fused = self.fused_compare(block);
        let n = block.operations.len();
        for (i, op) in block.operations.iter().enumerate() {
            if is_ovf(op) {
                self.check_ovf(b, block, i)?;
                continue;
            }
            if fused.is_some() && i + 1 == n {
                continue;
            }
            self.serialize_op(b, op)?;
        }
        self.insert_exits(b, fused)
    }

    fn check_ovf(&self, b: BlockId, block: &Block, index: usize) -> Result<()> {
        let op = &block.operations[index];
        if block.exitswitch != ExitSwitch::LastException || index + 1 != block.operations.len() {
            return Err(self.error(
                b,
                format!("'{}' must be the last operation of a block catching {}", op.opname, OVERFLOW_ERROR),
            ));
        }
        let handled = block.exits.len() == 2
            && block.exits[1].exitcase == ExitCase::Exception(OVERFLOW_ERROR.to_string());
        if !handled {
            return Err(self.error(
                b,
                format!("'{}' needs exactly one handler, for {}", op.opname, OVERFLOW_ERROR),
            ));
        }
        Ok(())
    }

    fn serialize_op(&mut self, b: BlockId, op: &SpaceOp) -> Result<()> {
        if op.opname == "-live-" {
            let regs = self.op_operands(b, &op.args)?;
            self.emit(Insn::Live(regs));
            return Ok(());
        }
        if op.is_call() {
            return self.serialize_call(b, op);
        }
        let args = self.op_operands(b, &op.args)?;
        let result = op.result.and_then(|r| self.reg(r));
        self.emit_op(op.opname.clone(), args, result);
        Ok(())
    }

    /// The comparison computing the branch condition, when it can be folded
    /// into the branch itself.
    fn fused_compare(&self, block: &'f Block) -> Option<&'f SpaceOp> {
        let ExitSwitch::Var(cond) = block.exitswitch else {
            return None;
        };
        if block.exits.len() != 2 {
            return None;
        }
        let op = block.operations.last()?;
        if op.result != Some(cond) || !FUSED_COMPARISONS.contains(&op.opname.as_str()) {
            return None;
        }
        let passed_on = block.exits.iter().any(|l| {
            l.args
                .iter()
                .any(|a| matches!(a, LinkArg::Value(Arg::Var(v)) if *v == cond))
        });
        if passed_on {
            None
        } else {
            Some(op)
        }
    }

    fn insert_exits(&mut self, b: BlockId, fused: Option<&'f SpaceOp>) -> Result<()> {
        let graph = self.graph;
        let block = graph.block(b);
        if block.exits.len() == 1 {
            if !matches!(block.exits[0].exitcase, ExitCase::None | ExitCase::Bool(_)) {
                return Err(self.error(b, "single exit with a switch case"));
            }
            return self.make_link(b, 0);
        }
        match block.exitswitch {
            ExitSwitch::LastException => self.raising_exits(b, block),
            ExitSwitch::Var(cond) => {
                let is_bool = block.exits.iter().all(|l| matches!(l.exitcase, ExitCase::Bool(_)));
                if is_bool {
                    self.bool_exits(b, block, cond, fused)
                } else {
                    self.switch_exits(b, block, cond)
                }
            }
            ExitSwitch::None => Err(self.error(
                b,
                format!("{} exits but nothing to choose between them", block.exits.len()),
            )),
        }
    }

    fn bool_exits(&mut self, b: BlockId, block: &Block, cond: VarId, fused: Option<&SpaceOp>) -> Result<()> {
        let find = |value: bool| block.exits.iter().position(|l| l.exitcase == ExitCase::Bool(value));
        let (Some(on_false), Some(on_true)) = (find(false), find(true)) else {
            return Err(self.error(b, "boolean branch needs both a true and a false exit"));
        };
        if block.exits.len() != 2 {
            return Err(self.error(b, "boolean branch with more than two exits"));
        }
        let lfalse = link_label(b, on_false);
        let mut args = match fused {
            Some(op) => self.op_operands(b, &op.args)?,
            None => vec![Operand::Reg(
                self.reg(cond).ok_or_else(|| self.error(b, "branch on a void value"))?,
            )],
        };
        args.push(Operand::Label(lfalse.clone()));
        let name = match fused {
            Some(op) => format!("goto_if_not_{}", op.opname),
            None => "goto_if_not".to_string(),
        };
        self.emit_op(name, args, None);
        self.emit(Insn::Live(vec![Operand::Label(lfalse.clone())]));
        self.make_link(b, on_true)?;
        self.emit(Insn::Label(lfalse));
        self.make_link(b, on_false)
    }

    fn switch_exits(&mut self, b: BlockId, block: &Block, on: VarId) -> Result<()> {
        let reg = match self.reg(on) {
            Some(r) if r.kind == Kind::Int => r,
            _ => return Err(self.error(b, "switch on a non-integer value")),
        };
        let mut cases: Vec<(i64, usize)> = Vec::new();
        let mut default = None;
        for (i, link) in block.exits.iter().enumerate() {
            match link.exitcase {
                ExitCase::Int(v) => cases.push((v, i)),
                ExitCase::Default if default.is_none() => default = Some(i),
                _ => return Err(self.error(b, format!("unexpected switch case {:?}", link.exitcase))),
            }
        }
        cases.sort_by_key(|&(v, _)| v);
        if cases.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(self.error(b, "switch has the same case twice"));
        }

        let table = Descr::switch(cases.iter().map(|&(v, i)| (v, link_label(b, i))).collect());
        self.emit(Insn::Live(Vec::new()));
        self.emit_op("switch", vec![Operand::Reg(reg), Operand::Descr(table)], None);
        match default {
            Some(i) => self.make_link(b, i)?,
            None => {
                self.emit_op("unreachable", Vec::new(), None);
                self.emit(Insn::Unreachable);
            }
        }
        for (_, i) in cases {
            self.emit(Insn::Label(link_label(b, i)));
            self.emit(Insn::Live(Vec::new()));
            self.make_link(b, i)?;
        }
        Ok(())
    }

    fn raising_exits(&mut self, b: BlockId, block: &Block) -> Result<()> {
        let last = block
            .operations
            .last()
            .ok_or_else(|| self.error(b, "exception dispatch without a raising operation"))?;
        if !matches!(block.exits[0].exitcase, ExitCase::None) {
            return Err(self.error(b, "first exit of a raising block must be the normal one"));
        }

        if is_ovf(last) {
            let base = last.opname.trim_end_matches("_ovf");
            let mut args = vec![Operand::Label(link_label(b, 1))];
            args.extend(self.op_operands(b, &last.args)?);
            let result = last.result.and_then(|r| self.reg(r));
            self.emit(Insn::Live(Vec::new()));
            self.emit_op(format!("{}_jump_if_ovf", base), args, result);
            self.make_link(b, 0)?;
            self.emit(Insn::Label(link_label(b, 1)));
            return self.make_exception_link(b, 1, true);
        }

        self.emit_op("catch_exception", vec![Operand::Label(link_label(b, 0))], None);
        self.make_link(b, 0)?;
        self.emit(Insn::Label(link_label(b, 0)));
        for i in 1..block.exits.len() {
            let ExitCase::Exception(class) = &block.exits[i].exitcase else {
                return Err(self.error(b, format!("exit {} of a raising block is not a handler", i)));
            };
            if class == CATCH_ALL {
                return self.make_exception_link(b, i, false);
            }
            self.emit_op(
                "goto_if_exception_mismatch",
                vec![
                    Operand::Const(Constant::address(class.clone())),
                    Operand::Label(link_label(b, i)),
                ],
                None,
            );
            self.make_exception_link(b, i, false)?;
            self.emit(Insn::Label(link_label(b, i)));
        }
        self.emit_op("reraise", Vec::new(), None);
        self.emit(Insn::Unreachable);
        Ok(())
    }

    /// Follows handler `exit` of `b`. A handler that only passes the caught
    /// exception on to the raising block becomes a plain re-raise.
    fn make_exception_link(&mut self, b: BlockId, exit: usize, handling_ovf: bool) -> Result<()> {
        let graph = self.graph;
        let link = &graph.block(b).exits[exit];
        let target = graph.block(link.target);
        let reraises = target.is_final()
            && target.inputargs.len() == 2
            && link.args == [LinkArg::LastException, LinkArg::LastExcValue];
        if reraises {
            if handling_ovf {
                let exc = Constant::gc_object(OVERFLOW_ERROR);
                self.emit_op("raise", vec![Operand::Const(exc)], None);
            } else {
                self.emit_op("reraise", Vec::new(), None);
            }
            self.emit(Insn::Unreachable);
            return Ok(());
        }
        if handling_ovf && link.carries_exception() {
            return Err(self.error(b, "an overflow handler cannot read the exception"));
        }
        self.make_link(b, exit)
    }

    fn make_link(&mut self, b: BlockId, exit: usize) -> Result<()> {
        let graph = self.graph;
        let link = &graph.block(b).exits[exit];
        let target = graph.block(link.target);
        if link.args.len() != target.inputargs.len() {
            return Err(self.error(
                b,
                format!(
                    "link to {} passes {} values for {} inputs",
                    link.target,
                    link.args.len(),
                    target.inputargs.len()
                ),
            ));
        }
        if target.is_final() && !link.carries_exception() {
            let mut values = Vec::with_capacity(link.args.len());
            for a in &link.args {
                let LinkArg::Value(a) = a else { unreachable!() };
                values.push(self.arg_operand(a));
            }
            return self.make_return(b, values);
        }
        self.insert_renamings(link)?;
        self.make_bytecode_block(link.target)
    }

    /// Returns `values[0]`, or raises `values[1]` when leaving through the
    /// raising block. `None` stands for a Void value.
    fn make_return(&mut self, b: BlockId, values: Vec<Option<Operand>>) -> Result<()> {
        match values.as_slice() {
            [None] => self.emit_op("void_return", Vec::new(), None),
            [Some(v)] => {
                let kind = operand_kind(v).ok_or_else(|| self.error(b, "cannot return this value"))?;
                self.emit_op(format!("{}_return", kind.name()), vec![v.clone()], None);
            }
            [_, Some(value)] => {
                if matches!(value, Operand::Reg(_)) {
                    self.emit(Insn::Live(Vec::new()));
                }
                self.emit_op("raise", vec![value.clone()], None);
            }
            _ => return Err(self.error(b, "final block must take one or two values")),
        }
        self.emit(Insn::Unreachable);
        Ok(())
    }

    fn insert_renamings(&mut self, link: &Link) -> Result<()> {
        let graph = self.graph;
        let target = graph.block(link.target);
        let mut moves: Vec<(Operand, Register)> = Vec::new();
        for (a, &w) in link.args.iter().zip(&target.inputargs) {
            let LinkArg::Value(a) = a else { continue };
            let (Some(src), Some(dst)) = (self.arg_operand(a), self.reg(w)) else {
                continue;
            };
            if src != Operand::Reg(dst) {
                moves.push((src, dst));
            }
        }
        moves.sort_by_key(|(_, w)| w.index);

        let mut by_kind: KindMap<(Vec<Operand>, Vec<Operand>)> = KindMap::default();
        for (v, w) in moves {
            let (frm, to) = &mut by_kind[w.kind];
            frm.push(v);
            to.push(Operand::Reg(w));
        }
        for kind in Kind::ALL {
            let (frm, to) = &by_kind[kind];
            if frm.is_empty() {
                continue;
            }
            for step in reorder_renaming_list(frm, to) {
                match step {
                    RenameStep::Copy { src, dst } => {
                        self.emit_op(format!("{}_copy", kind.name()), vec![src], Some(destination(dst)))
                    }
                    RenameStep::Save(src) => self.emit_op(format!("{}_push", kind.name()), vec![src], None),
                    RenameStep::Restore(dst) => {
                        self.emit_op(format!("{}_pop", kind.name()), Vec::new(), Some(destination(dst)))
                    }
                }
            }
        }
        self.generate_last_exc(link, target);
        Ok(())
    }

    /// Loads the caught exception straight into the target registers.
    fn generate_last_exc(&mut self, link: &Link, target: &Block) {
        if !link.carries_exception() {
            return;
        }
        for (which, opname) in [
            (LinkArg::LastException, "last_exception"),
            (LinkArg::LastExcValue, "last_exc_value"),
        ] {
            for (a, &w) in link.args.iter().zip(&target.inputargs) {
                if *a == which {
                    let dst = self.reg(w);
                    self.emit_op(opname, Vec::new(), dst);
                }
            }
        }
    }
}

fn destination(o: Operand) -> Register {
    match o {
        Operand::Reg(r) => r,
        other => unreachable!("rename destination {:?} is not a register", other),
    }
}
