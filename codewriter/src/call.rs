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

// Call classification.
//
// Decides, for every call in the program, whether the callee gets its own
// unit (a regular call, inlined by the trace recorder), stays an opaque
// residual call, or is a builtin with known semantics. Also builds the call
// descriptors and keeps the worklist of units still to produce.

use crate::descr::{Descr, DescrFactory, DescrKind};
use crate::effect::{effectinfo_from_access, CallSite, EffectAnalyzer, EffectInfo, ExtraEffect, RaiseEffect};
use crate::error::{BuildError, ErrorKind, Result};
use crate::ir::{Callee, Graph, OpArg, SpaceOp, Type};
use crate::program::{FuncSig, GraphSource, Policy, ProcId};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Regular,
    Residual,
    Builtin,
}

/// Result of classifying one call site.
#[derive(Clone, Debug)]
pub struct Classified {
    pub kind: CallKind,
    /// Unit descriptor for direct regular calls, call descriptor otherwise.
    pub descr: Descr,
    /// Candidate units of a regular indirect call.
    pub indirect_units: Vec<ProcId>,
}

pub struct CallControl<'a> {
    source: &'a dyn GraphSource,
    policy: &'a dyn Policy,
    analyzer: &'a dyn EffectAnalyzer,
    descrs: Box<dyn DescrFactory + 'a>,
    entries: Vec<ProcId>,
    candidates: Option<HashSet<ProcId>>,
    units: HashMap<ProcId, Descr>,
    unfinished: Vec<ProcId>,
    pub all_indirect_call_targets: BTreeSet<ProcId>,
}

impl<'a> CallControl<'a> {
    pub fn new(
        source: &'a dyn GraphSource,
        policy: &'a dyn Policy,
        analyzer: &'a dyn EffectAnalyzer,
        descrs: Box<dyn DescrFactory + 'a>,
        entries: Vec<ProcId>,
    ) -> Self {
        Self {
            source,
            policy,
            analyzer,
            descrs,
            entries,
            candidates: None,
            units: HashMap::new(),
            unfinished: Vec::new(),
            all_indirect_call_targets: BTreeSet::new(),
        }
    }

    /// Replaces the entry points; candidates are recomputed on next use.
    pub fn set_entries(&mut self, entries: Vec<ProcId>) {
        self.entries = entries;
        self.candidates = None;
    }

    pub fn source(&self) -> &'a dyn GraphSource {
        self.source
    }

    fn look_inside(&self, id: ProcId) -> bool {
        match self.source.procedure(id) {
            Some(p) => p.graph.is_some() && self.policy.look_inside(id, p),
            None => false,
        }
    }

    pub fn is_candidate(&self, id: ProcId) -> bool {
        match &self.candidates {
            Some(set) => set.contains(&id),
            None => self.look_inside(id),
        }
    }

    /// Every procedure reachable from the entry points through calls that
    /// would be regular.
    pub fn find_all_graphs(&mut self) -> &HashSet<ProcId> {
        let mut found: HashSet<ProcId> = HashSet::new();
        let mut todo: Vec<ProcId> = Vec::new();
        for &e in &self.entries {
            if self.look_inside(e) && found.insert(e) {
                todo.push(e);
            }
        }
        while let Some(id) = todo.pop() {
            let Some(graph) = self.source.graph(id) else { continue };
            for block in &graph.blocks {
                for op in &block.operations {
                    if !op.is_call() || self.kind_with(op, |p| self.look_inside(p)) != CallKind::Regular {
                        continue;
                    }
                    for target in self.targets_with(op, |p| self.look_inside(p)) {
                        if found.insert(target) {
                            todo.push(target);
                        }
                    }
                }
            }
        }
        trace!(count = found.len(), "candidate graphs");
        self.candidates.insert(found)
    }

    /// Candidate targets of a call: the callee of a direct call, or the
    /// subset of an indirect call's targets that get units.
    pub fn graphs_from(&self, op: &SpaceOp) -> Vec<ProcId> {
        self.targets_with(op, |p| self.is_candidate(p))
    }

    fn targets_with(&self, op: &SpaceOp, is_candidate: impl Fn(ProcId) -> bool) -> Vec<ProcId> {
        match op.callee() {
            Some(Callee::Direct(p)) if is_candidate(*p) => vec![*p],
            Some(Callee::Indirect {
                targets: Some(ts), ..
            }) => ts.iter().copied().filter(|p| is_candidate(*p)).collect(),
            _ => Vec::new(),
        }
    }

    fn kind_with(&self, op: &SpaceOp, is_candidate: impl Fn(ProcId) -> bool) -> CallKind {
        if let Some(Callee::Direct(p)) = op.callee() {
            match self.source.procedure(*p) {
                None => return CallKind::Residual,
                Some(proc) if proc.graph.is_none() || proc.flags.close_stack => {
                    return CallKind::Residual
                }
                Some(proc) if proc.flags.oopspec.is_some() => return CallKind::Builtin,
                _ => {}
            }
        }
        if self.targets_with(op, is_candidate).is_empty() {
            CallKind::Residual
        } else {
            CallKind::Regular
        }
    }

    pub fn guess_call_kind(&self, op: &SpaceOp) -> Result<CallKind> {
        if op.callee().is_none() {
            return Err(BuildError::new(
                ErrorKind::Graph,
                format!("'{}' is not a well-formed call", op.opname),
            ));
        }
        Ok(self.kind_with(op, |p| self.is_candidate(p)))
    }

    /// Unit descriptor for `proc`, queueing the procedure for compilation the
    /// first time it is requested.
    pub fn get_unit(&mut self, proc: ProcId, called_from: Option<ProcId>) -> Result<Descr> {
        if let Some(d) = self.units.get(&proc) {
            return Ok(d.clone());
        }
        let source = self.source;
        let p = source.procedure(proc).ok_or_else(|| {
            BuildError::new(ErrorKind::Graph, format!("unknown procedure {}", proc))
        })?;
        if p.flags.close_stack {
            return Err(BuildError::new(
                ErrorKind::Graph,
                format!("{} must run on the machine stack and cannot get a unit", p.name),
            ));
        }
        let calldescr = self.descrs.calldescr(&p.sig.value_args(), p.sig.result, EffectInfo::most_general());
        let d = Descr::new(DescrKind::Unit {
            proc,
            name: p.name.clone(),
            calldescr,
        });
        match called_from {
            Some(caller) => trace!(callee = %p.name, caller = %source.proc_name(caller), "discovered unit"),
            None => trace!(callee = %p.name, "entry unit"),
        }
        self.units.insert(proc, d.clone());
        self.unfinished.push(proc);
        Ok(d)
    }

    /// Queues the entry points and computes the candidate set.
    pub fn grab_initial_units(&mut self) -> Result<()> {
        if self.candidates.is_none() {
            self.find_all_graphs();
        }
        for e in self.entries.clone() {
            if !self.is_candidate(e) {
                return Err(BuildError::new(
                    ErrorKind::Graph,
                    format!("entry point {} has no graph to compile", self.source.proc_name(e)),
                ));
            }
            self.get_unit(e, None)?;
        }
        Ok(())
    }

    /// Next procedure waiting for its unit.
    pub fn enum_pending(&mut self) -> Option<(ProcId, Descr)> {
        let proc = self.unfinished.pop()?;
        let d = self.units.get(&proc)?.clone();
        Some((proc, d))
    }

    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    /// Classifies the call `op` appearing in `caller` (whose graph is
    /// `graph`), queueing any unit it needs.
    pub fn classify(&mut self, op: &SpaceOp, caller: ProcId, graph: &Graph) -> Result<Classified> {
        if let Some(Callee::Indirect {
            targets: Some(ts), ..
        }) = op.callee()
        {
            self.all_indirect_call_targets.extend(ts.iter().copied());
        }
        let kind = self.guess_call_kind(op)?;
        match (kind, op.callee()) {
            (CallKind::Regular, Some(Callee::Direct(p))) => {
                let p = *p;
                // The unit carries its own descriptor; this only checks the call.
                self.getcalldescr(op, caller, graph, None)?;
                let descr = self.get_unit(p, Some(caller))?;
                Ok(Classified {
                    kind,
                    descr,
                    indirect_units: Vec::new(),
                })
            }
            (CallKind::Regular, _) => {
                let targets = self.graphs_from(op);
                for &t in &targets {
                    self.get_unit(t, Some(caller))?;
                }
                let descr = self.getcalldescr(op, caller, graph, None)?;
                Ok(Classified {
                    kind,
                    descr,
                    indirect_units: targets,
                })
            }
            (CallKind::Builtin, Some(Callee::Direct(p))) => {
                let oopspec = self
                    .source
                    .procedure(*p)
                    .and_then(|proc| proc.flags.oopspec.clone());
                let descr = self.getcalldescr(op, caller, graph, oopspec)?;
                Ok(Classified {
                    kind,
                    descr,
                    indirect_units: Vec::new(),
                })
            }
            _ => {
                let descr = self.getcalldescr(op, caller, graph, None)?;
                Ok(Classified {
                    kind,
                    descr,
                    indirect_units: Vec::new(),
                })
            }
        }
    }

    fn callee_sig(&self, callee: &Callee) -> Result<(FuncSig, bool, bool)> {
        match callee {
            Callee::Direct(p) => {
                let proc = self.source.procedure(*p).ok_or_else(|| {
                    BuildError::new(ErrorKind::Graph, format!("call to unknown procedure {}", p))
                })?;
                Ok((proc.sig.clone(), proc.flags.elidable, proc.flags.loop_invariant))
            }
            Callee::Indirect { sig, .. } => Ok((sig.clone(), false, false)),
        }
    }

    /// Call descriptor for `op`: checks the call against the callee
    /// signature, derives the effect level and verifies it agrees with the
    /// callee's declared purity.
    pub fn getcalldescr(
        &mut self,
        op: &SpaceOp,
        caller: ProcId,
        graph: &Graph,
        oopspec: Option<String>,
    ) -> Result<Descr> {
        let callee = op.callee().ok_or_else(|| {
            BuildError::new(ErrorKind::Graph, format!("'{}' is not a well-formed call", op.opname))
        })?;
        let caller_name = self.source.proc_name(caller);
        let (sig, elidable, loopinvariant) = self.callee_sig(callee)?;

        let mut arg_types = Vec::new();
        for a in op.call_args() {
            let ty = match a {
                OpArg::Var(v) => graph.var_type(*v),
                OpArg::Const(c) => c.ty,
                other => {
                    return Err(BuildError::new(
                        ErrorKind::Graph,
                        format!("in {}: unexpected call argument {:?}", caller_name, other),
                    ))
                }
            };
            if ty != Type::Void {
                arg_types.push(ty);
            }
        }
        let result = op.result.map(|r| graph.var_type(r)).unwrap_or(Type::Void);
        if arg_types != sig.value_args() || result != sig.result {
            let shown: Vec<String> = arg_types.iter().map(|t| format!("{:?}", t)).collect();
            return Err(BuildError::new(
                ErrorKind::Signature,
                format!(
                    "in operation {} of {}: calling a function with signature {}, \
                     but passing actual arguments (ignoring voids) of types ({}) and expecting {:?}",
                    op.opname,
                    caller_name,
                    sig,
                    shown.join(", "),
                    result
                ),
            ));
        }
        if loopinvariant && !arg_types.is_empty() {
            return Err(BuildError::new(
                ErrorKind::Effect,
                format!(
                    "in operation {} of {}: arguments are not supported for loop-invariant function {}",
                    op.opname,
                    caller_name,
                    self.callee_name(callee)
                ),
            ));
        }

        let site = CallSite {
            caller,
            op,
            callee,
        };
        let random = self.analyzer.random_effects(&site);
        let can_invalidate = random || self.analyzer.can_invalidate(&site);
        let extra = if random {
            ExtraEffect::RandomEffects
        } else if self.analyzer.forces_virtualizable(&site) {
            ExtraEffect::ForcesVirtualOrVirtualizable
        } else if loopinvariant {
            ExtraEffect::LoopInvariant
        } else if elidable {
            match self.analyzer.can_raise(&site) {
                RaiseEffect::No => ExtraEffect::ElidableCannotRaise,
                RaiseEffect::MemoryErrorOnly => ExtraEffect::ElidableOrMemoryError,
                RaiseEffect::Yes => ExtraEffect::ElidableCanRaise,
            }
        } else if self.analyzer.can_raise(&site) != RaiseEffect::No {
            ExtraEffect::CanRaise
        } else {
            ExtraEffect::CannotRaise
        };

        let contradiction = |what: &str| {
            BuildError::new(
                ErrorKind::Effect,
                format!(
                    "in operation {} of {}: {} is declared {} but its effects are {:?}",
                    op.opname,
                    caller_name,
                    self.callee_name(callee),
                    what,
                    extra
                ),
            )
        };
        if loopinvariant && extra != ExtraEffect::LoopInvariant {
            return Err(contradiction("loop-invariant"));
        }
        if elidable {
            if !matches!(
                extra,
                ExtraEffect::ElidableCannotRaise
                    | ExtraEffect::ElidableOrMemoryError
                    | ExtraEffect::ElidableCanRaise
            ) {
                return Err(contradiction("elidable"));
            }
            if result == Type::Void {
                return Err(BuildError::new(
                    ErrorKind::Effect,
                    format!(
                        "in operation {} of {}: elidable function {} returns nothing",
                        op.opname,
                        caller_name,
                        self.callee_name(callee)
                    ),
                ));
            }
        }

        let access = self.analyzer.access(&site);
        let effect = effectinfo_from_access(&access, self.descrs.as_mut(), extra, oopspec, can_invalidate);
        if (elidable || loopinvariant) && effect.extra_effect >= ExtraEffect::ForcesVirtualOrVirtualizable {
            return Err(BuildError::new(
                ErrorKind::Effect,
                format!(
                    "in operation {} of {}: {} is declared pure but may write anything",
                    op.opname,
                    caller_name,
                    self.callee_name(callee)
                ),
            ));
        }
        Ok(self.descrs.calldescr(&arg_types, result, effect))
    }

    fn callee_name(&self, callee: &Callee) -> String {
        match callee {
            Callee::Direct(p) => self.source.proc_name(*p),
            Callee::Indirect { .. } => "<indirect call>".to_string(),
        }
    }
}
