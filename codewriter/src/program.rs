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

// Procedures and the whole-program view handed to the backend.

use crate::ir::{Graph, Type};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcId(pub u32);

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FuncSig {
    pub args: Vec<Type>,
    pub result: Type,
}

impl FuncSig {
    pub fn new(args: Vec<Type>, result: Type) -> Self {
        Self { args, result }
    }

    /// Argument types with `Void` removed.
    pub fn value_args(&self) -> Vec<Type> {
        self.args.iter().copied().filter(|t| *t != Type::Void).collect()
    }
}

impl fmt::Display for FuncSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|t| format!("{:?}", t)).collect();
        write!(f, "({}) -> {:?}", args.join(", "), self.result)
    }
}

/// Hints attached to a procedure by its author.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcFlags {
    /// Pure: same arguments give the same result.
    pub elidable: bool,
    /// Result does not change while inside one loop iteration.
    pub loop_invariant: bool,
    /// Name of the builtin this procedure implements, if any.
    pub oopspec: Option<String>,
    /// Must run on the real machine stack; never compiled to a unit.
    pub close_stack: bool,
}

#[derive(Clone, Debug)]
pub struct Procedure {
    pub name: String,
    pub sig: FuncSig,
    pub flags: ProcFlags,
    /// `None` for external functions.
    pub graph: Option<Graph>,
}

impl Procedure {
    pub fn new(name: impl Into<String>, sig: FuncSig, graph: Option<Graph>) -> Self {
        Self {
            name: name.into(),
            sig,
            flags: ProcFlags::default(),
            graph,
        }
    }

    pub fn with_flags(mut self, flags: ProcFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Supplies procedures and their graphs, as left by the upstream rewriter.
pub trait GraphSource {
    fn procedure(&self, id: ProcId) -> Option<&Procedure>;

    fn graph(&self, id: ProcId) -> Option<&Graph> {
        self.procedure(id).and_then(|p| p.graph.as_ref())
    }

    fn proc_name(&self, id: ProcId) -> String {
        match self.procedure(id) {
            Some(p) => p.name.clone(),
            None => id.to_string(),
        }
    }
}

/// Decides which procedures get their own compiled unit.
pub trait Policy {
    fn look_inside(&self, id: ProcId, proc: &Procedure) -> bool;
}

/// Looks inside every procedure that has a graph.
#[derive(Clone, Copy, Debug, Default)]
pub struct LookInsideAll;

impl Policy for LookInsideAll {
    fn look_inside(&self, _id: ProcId, proc: &Procedure) -> bool {
        proc.graph.is_some()
    }
}

/// Looks inside procedures with a graph, except the ones listed.
#[derive(Clone, Debug, Default)]
pub struct ExcludePolicy {
    pub excluded: Vec<ProcId>,
}

impl Policy for ExcludePolicy {
    fn look_inside(&self, id: ProcId, proc: &Procedure) -> bool {
        proc.graph.is_some() && !self.excluded.contains(&id)
    }
}

/// In-memory program: a dense table of procedures.
#[derive(Clone, Debug, Default)]
pub struct Program {
    procs: Vec<Procedure>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, proc: Procedure) -> ProcId {
        let id = ProcId(self.procs.len() as u32);
        self.procs.push(proc);
        id
    }

    /// Reserves an id before the graph that refers to it exists.
    pub fn declare(&mut self, name: impl Into<String>, sig: FuncSig) -> ProcId {
        self.add(Procedure::new(name, sig, None))
    }

    pub fn set_graph(&mut self, id: ProcId, graph: Graph) {
        self.procs[id.0 as usize].graph = Some(graph);
    }

    pub fn set_flags(&mut self, id: ProcId, flags: ProcFlags) {
        self.procs[id.0 as usize].flags = flags;
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }
}

impl GraphSource for Program {
    fn procedure(&self, id: ProcId) -> Option<&Procedure> {
        self.procs.get(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::GraphBuilder;

    #[test]
    fn declared_procedures_get_graphs_later() {
        let mut p = Program::new();
        let f = p.declare("f", FuncSig::new(vec![], Type::Void));
        assert!(p.graph(f).is_none());
        assert!(!LookInsideAll.look_inside(f, p.procedure(f).unwrap()));

        p.set_graph(f, GraphBuilder::new("f").finish());
        assert!(p.graph(f).is_some());
        assert!(LookInsideAll.look_inside(f, p.procedure(f).unwrap()));

        let policy = ExcludePolicy { excluded: vec![f] };
        assert!(!policy.look_inside(f, p.procedure(f).unwrap()));
        assert_eq!(p.proc_name(ProcId(9)), "proc9");
    }

    #[test]
    fn signature_rendering_and_void_filtering() {
        let sig = FuncSig::new(vec![Type::Signed, Type::Void, Type::GcRef], Type::Float);
        assert_eq!(sig.value_args(), vec![Type::Signed, Type::GcRef]);
        assert_eq!(sig.to_string(), "(Signed, Void, GcRef) -> Float");
    }
}
