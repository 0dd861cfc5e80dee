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

// Input graph model.
//
// A `Graph` is one procedure after the upstream rewriter is done with it:
// typed variables, blocks with input arguments, a flat list of operations per
// block and explicit links between blocks. Blocks without exits are terminal:
// one input argument means "return it", two mean "raise (type, value)".

use crate::descr::Descr;
use crate::program::{FuncSig, ProcId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Index, IndexMut};

/// Register category. Every non-void value lives in exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Int,
    Ref,
    Float,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Int, Kind::Ref, Kind::Float];

    pub fn index(self) -> usize {
        match self {
            Kind::Int => 0,
            Kind::Ref => 1,
            Kind::Float => 2,
        }
    }

    pub fn code(self) -> char {
        match self {
            Kind::Int => 'i',
            Kind::Ref => 'r',
            Kind::Float => 'f',
        }
    }

    pub fn list_code(self) -> char {
        self.code().to_ascii_uppercase()
    }

    pub fn from_code(c: char) -> Option<Kind> {
        match c {
            'i' | 'I' => Some(Kind::Int),
            'r' | 'R' => Some(Kind::Ref),
            'f' | 'F' => Some(Kind::Float),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Int => "int",
            Kind::Ref => "ref",
            Kind::Float => "float",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per category.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KindMap<T>(pub [T; 3]);

impl<T> KindMap<T> {
    pub fn from_fn(mut f: impl FnMut(Kind) -> T) -> Self {
        KindMap([f(Kind::Int), f(Kind::Ref), f(Kind::Float)])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Kind, &T)> {
        Kind::ALL.into_iter().zip(self.0.iter())
    }
}

impl<T> Index<Kind> for KindMap<T> {
    type Output = T;
    fn index(&self, k: Kind) -> &T {
        &self.0[k.index()]
    }
}

impl<T> IndexMut<Kind> for KindMap<T> {
    fn index_mut(&mut self, k: Kind) -> &mut T {
        &mut self.0[k.index()]
    }
}

/// Static low-level types, as far as the backend cares about them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    Char,
    UniChar,
    Signed,
    Unsigned,
    SingleFloat,
    Float,
    /// Raw machine address (function pointers, vtables).
    Address,
    RawPtr,
    /// Pointer to a garbage-collected object.
    GcRef,
}

pub fn kind_of(ty: Type) -> Option<Kind> {
    match ty {
        Type::Void => None,
        Type::Bool
        | Type::Char
        | Type::UniChar
        | Type::Signed
        | Type::Unsigned
        | Type::SingleFloat
        | Type::Address
        | Type::RawPtr => Some(Kind::Int),
        Type::GcRef => Some(Kind::Ref),
        Type::Float => Some(Kind::Float),
    }
}

impl Type {
    /// One-letter code used in descriptor names: the kind letter, or `v`.
    pub fn code(self) -> char {
        kind_of(self).map(Kind::code).unwrap_or('v')
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// Literal payload. Floats compare and hash by bit pattern so that a pool
/// keyed on values never confuses `0.0` and `-0.0`, and `NaN` dedups.
#[derive(Clone, Debug)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    /// The null GC reference.
    Null,
    /// A named host object or address, resolved by the consumer.
    Symbol(String),
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConstValue::Int(a), ConstValue::Int(b)) => a == b,
            (ConstValue::Float(a), ConstValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ConstValue::Null, ConstValue::Null) => true,
            (ConstValue::Symbol(a), ConstValue::Symbol(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstValue {}

impl Hash for ConstValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ConstValue::Int(v) => v.hash(state),
            ConstValue::Float(v) => v.to_bits().hash(state),
            ConstValue::Null => {}
            ConstValue::Symbol(s) => s.hash(state),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Constant {
    pub ty: Type,
    pub value: ConstValue,
}

impl Constant {
    pub fn int(v: i64) -> Self {
        Self {
            ty: Type::Signed,
            value: ConstValue::Int(v),
        }
    }

    pub fn bool(v: bool) -> Self {
        Self {
            ty: Type::Bool,
            value: ConstValue::Int(v as i64),
        }
    }

    pub fn float(v: f64) -> Self {
        Self {
            ty: Type::Float,
            value: ConstValue::Float(v),
        }
    }

    pub fn null() -> Self {
        Self {
            ty: Type::GcRef,
            value: ConstValue::Null,
        }
    }

    pub fn void() -> Self {
        Self {
            ty: Type::Void,
            value: ConstValue::Null,
        }
    }

    /// Address of a named host entity (function, vtable): an int-kind value.
    pub fn address(name: impl Into<String>) -> Self {
        Self {
            ty: Type::Address,
            value: ConstValue::Symbol(name.into()),
        }
    }

    /// A prebuilt GC object known by name.
    pub fn gc_object(name: impl Into<String>) -> Self {
        Self {
            ty: Type::GcRef,
            value: ConstValue::Symbol(name.into()),
        }
    }

    pub fn kind(&self) -> Option<Kind> {
        kind_of(self.ty)
    }
}

/// A value read by an operation or passed along a link.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Var(VarId),
    Const(Constant),
}

impl From<VarId> for Arg {
    fn from(v: VarId) -> Self {
        Arg::Var(v)
    }
}

impl From<Constant> for Arg {
    fn from(c: Constant) -> Self {
        Arg::Const(c)
    }
}

/// Target of a call operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Callee {
    Direct(ProcId),
    /// Call through a function pointer. `targets` lists every procedure the
    /// pointer may designate, or `None` when that set is unknown.
    Indirect {
        sig: FuncSig,
        targets: Option<Vec<ProcId>>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum OpArg {
    Var(VarId),
    Const(Constant),
    Descr(Descr),
    Callee(Callee),
}

impl From<VarId> for OpArg {
    fn from(v: VarId) -> Self {
        OpArg::Var(v)
    }
}

impl From<Constant> for OpArg {
    fn from(c: Constant) -> Self {
        OpArg::Const(c)
    }
}

impl From<Descr> for OpArg {
    fn from(d: Descr) -> Self {
        OpArg::Descr(d)
    }
}

impl From<Arg> for OpArg {
    fn from(a: Arg) -> Self {
        match a {
            Arg::Var(v) => OpArg::Var(v),
            Arg::Const(c) => OpArg::Const(c),
        }
    }
}

/// One operation of the restricted vocabulary.
///
/// Calls use two shapes: `direct_call(Callee::Direct, args...)` and
/// `indirect_call(fnptr, args..., Callee::Indirect)`.
#[derive(Clone, Debug, PartialEq)]
pub struct SpaceOp {
    pub opname: String,
    pub args: Vec<OpArg>,
    pub result: Option<VarId>,
}

impl SpaceOp {
    pub fn new(opname: impl Into<String>, args: Vec<OpArg>, result: Option<VarId>) -> Self {
        Self {
            opname: opname.into(),
            args,
            result,
        }
    }

    pub fn is_call(&self) -> bool {
        self.opname == "direct_call" || self.opname == "indirect_call"
    }

    pub fn callee(&self) -> Option<&Callee> {
        match self.opname.as_str() {
            "direct_call" => match self.args.first() {
                Some(OpArg::Callee(c)) => Some(c),
                _ => None,
            },
            "indirect_call" => match self.args.last() {
                Some(OpArg::Callee(c)) => Some(c),
                _ => None,
            },
            _ => None,
        }
    }

    /// The value arguments of a call, without callee and function pointer.
    pub fn call_args(&self) -> &[OpArg] {
        match self.opname.as_str() {
            "direct_call" if !self.args.is_empty() => &self.args[1..],
            "indirect_call" if self.args.len() >= 2 => &self.args[1..self.args.len() - 1],
            _ => &[],
        }
    }

    pub fn reads(&self, v: VarId) -> bool {
        self.args.iter().any(|a| matches!(a, OpArg::Var(x) if *x == v))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExitSwitch {
    /// Single exit, or no exit at all.
    None,
    /// Boolean two-way branch or integer switch on a variable.
    Var(VarId),
    /// The last operation may raise; exit 0 is the normal continuation, the
    /// others are exception handlers.
    LastException,
}

/// Name of the exception case that catches everything.
pub const CATCH_ALL: &str = "Exception";

#[derive(Clone, Debug, PartialEq)]
pub enum ExitCase {
    None,
    Bool(bool),
    Int(i64),
    Default,
    /// Handler for the named exception class (and its subclasses).
    Exception(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum LinkArg {
    Value(Arg),
    /// The class of the exception caught on this link.
    LastException,
    /// The instance of the exception caught on this link.
    LastExcValue,
}

impl From<VarId> for LinkArg {
    fn from(v: VarId) -> Self {
        LinkArg::Value(Arg::Var(v))
    }
}

impl From<Constant> for LinkArg {
    fn from(c: Constant) -> Self {
        LinkArg::Value(Arg::Const(c))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub args: Vec<LinkArg>,
    pub target: BlockId,
    pub exitcase: ExitCase,
}

impl Link {
    pub fn new(target: BlockId, args: Vec<LinkArg>) -> Self {
        Self {
            args,
            target,
            exitcase: ExitCase::None,
        }
    }

    pub fn with_case(mut self, exitcase: ExitCase) -> Self {
        self.exitcase = exitcase;
        self
    }

    pub fn carries_exception(&self) -> bool {
        self.args
            .iter()
            .any(|a| matches!(a, LinkArg::LastException | LinkArg::LastExcValue))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub inputargs: Vec<VarId>,
    pub operations: Vec<SpaceOp>,
    pub exitswitch: ExitSwitch,
    pub exits: Vec<Link>,
}

impl Block {
    pub fn is_final(&self) -> bool {
        self.exits.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Var {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Graph {
    pub name: String,
    pub vars: Vec<Var>,
    pub blocks: Vec<Block>,
    pub start: BlockId,
}

impl Graph {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn var_type(&self, v: VarId) -> Type {
        self.vars[v.0 as usize].ty
    }

    pub fn var_name(&self, v: VarId) -> &str {
        &self.vars[v.0 as usize].name
    }

    pub fn arg_type(&self, a: &Arg) -> Type {
        match a {
            Arg::Var(v) => self.var_type(*v),
            Arg::Const(c) => c.ty,
        }
    }

    /// Input arguments of the start block: the procedure parameters.
    pub fn params(&self) -> &[VarId] {
        &self.block(self.start).inputargs
    }

    /// Blocks reachable from the start block, in depth-first order.
    pub fn reachable_blocks(&self) -> Vec<BlockId> {
        let mut seen = vec![false; self.blocks.len()];
        let mut order = Vec::new();
        let mut stack = vec![self.start];
        while let Some(b) = stack.pop() {
            if std::mem::replace(&mut seen[b.0 as usize], true) {
                continue;
            }
            order.push(b);
            for link in self.block(b).exits.iter().rev() {
                if !seen[link.target.0 as usize] {
                    stack.push(link.target);
                }
            }
        }
        order
    }
}

/// Incremental construction of graphs, mostly for tests and tools.
#[derive(Debug)]
pub struct GraphBuilder {
    pub graph: Graph,
}

impl GraphBuilder {
    /// Starts a graph whose start block takes `params`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph {
                name: name.into(),
                vars: Vec::new(),
                blocks: vec![Block {
                    inputargs: Vec::new(),
                    operations: Vec::new(),
                    exitswitch: ExitSwitch::None,
                    exits: Vec::new(),
                }],
                start: BlockId(0),
            },
        }
    }

    pub fn start(&self) -> BlockId {
        self.graph.start
    }

    pub fn var(&mut self, name: impl Into<String>, ty: Type) -> VarId {
        let id = VarId(self.graph.vars.len() as u32);
        self.graph.vars.push(Var {
            name: name.into(),
            ty,
        });
        id
    }

    pub fn param(&mut self, name: impl Into<String>, ty: Type) -> VarId {
        let v = self.var(name, ty);
        let start = self.graph.start;
        self.graph.block_mut(start).inputargs.push(v);
        v
    }

    pub fn block(&mut self, inputargs: Vec<VarId>) -> BlockId {
        let id = BlockId(self.graph.blocks.len() as u32);
        self.graph.blocks.push(Block {
            inputargs,
            operations: Vec::new(),
            exitswitch: ExitSwitch::None,
            exits: Vec::new(),
        });
        id
    }

    /// A terminal block returning a value of type `ty`.
    pub fn returnblock(&mut self, ty: Type) -> BlockId {
        let v = self.var("result", ty);
        self.block(vec![v])
    }

    /// A terminal block re-raising `(type, value)`.
    pub fn exceptblock(&mut self) -> BlockId {
        let etype = self.var("etype", Type::Address);
        let evalue = self.var("evalue", Type::GcRef);
        self.block(vec![etype, evalue])
    }

    pub fn op(&mut self, b: BlockId, opname: &str, args: Vec<OpArg>, result: Option<VarId>) {
        self.graph
            .block_mut(b)
            .operations
            .push(SpaceOp::new(opname, args, result));
    }

    /// Appends `result = opname(args)` with a fresh result variable.
    pub fn op_value(&mut self, b: BlockId, opname: &str, args: Vec<OpArg>, ty: Type) -> VarId {
        let r = self.var(format!("v{}", self.graph.vars.len()), ty);
        self.op(b, opname, args, Some(r));
        r
    }

    pub fn goto(&mut self, from: BlockId, to: BlockId, args: Vec<LinkArg>) {
        let block = self.graph.block_mut(from);
        block.exitswitch = ExitSwitch::None;
        block.exits = vec![Link::new(to, args)];
    }

    pub fn branch(
        &mut self,
        from: BlockId,
        cond: VarId,
        if_true: (BlockId, Vec<LinkArg>),
        if_false: (BlockId, Vec<LinkArg>),
    ) {
        let block = self.graph.block_mut(from);
        block.exitswitch = ExitSwitch::Var(cond);
        block.exits = vec![
            Link::new(if_false.0, if_false.1).with_case(ExitCase::Bool(false)),
            Link::new(if_true.0, if_true.1).with_case(ExitCase::Bool(true)),
        ];
    }

    pub fn switch(
        &mut self,
        from: BlockId,
        on: VarId,
        cases: Vec<(i64, BlockId, Vec<LinkArg>)>,
        default: Option<(BlockId, Vec<LinkArg>)>,
    ) {
        let mut exits: Vec<Link> = cases
            .into_iter()
            .map(|(value, target, args)| Link::new(target, args).with_case(ExitCase::Int(value)))
            .collect();
        if let Some((target, args)) = default {
            exits.push(Link::new(target, args).with_case(ExitCase::Default));
        }
        let block = self.graph.block_mut(from);
        block.exitswitch = ExitSwitch::Var(on);
        block.exits = exits;
    }

    /// Marks the last operation of `from` as raising: `normal` is taken when
    /// it completes, `handlers` are tried in order when it raises.
    pub fn raising(
        &mut self,
        from: BlockId,
        normal: (BlockId, Vec<LinkArg>),
        handlers: Vec<(&str, BlockId, Vec<LinkArg>)>,
    ) {
        let mut exits = vec![Link::new(normal.0, normal.1)];
        for (exc, target, args) in handlers {
            exits.push(Link::new(target, args).with_case(ExitCase::Exception(exc.to_string())));
        }
        let block = self.graph.block_mut(from);
        block.exitswitch = ExitSwitch::LastException;
        block.exits = exits;
    }

    pub fn finish(self) -> Graph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_static_types() {
        assert_eq!(kind_of(Type::Bool), Some(Kind::Int));
        assert_eq!(kind_of(Type::Address), Some(Kind::Int));
        assert_eq!(kind_of(Type::SingleFloat), Some(Kind::Int));
        assert_eq!(kind_of(Type::GcRef), Some(Kind::Ref));
        assert_eq!(kind_of(Type::Float), Some(Kind::Float));
        assert_eq!(kind_of(Type::Void), None);
        assert_eq!(Type::Void.code(), 'v');
        assert_eq!(Kind::Ref.list_code(), 'R');
    }

    #[test]
    fn float_constants_compare_by_bits() {
        assert_ne!(Constant::float(0.0), Constant::float(-0.0));
        assert_eq!(Constant::float(f64::NAN), Constant::float(f64::NAN));
        assert_eq!(Constant::int(3), Constant::int(3));
        assert_ne!(Constant::int(1), Constant::bool(true));
    }

    #[test]
    fn call_shapes_expose_callee_and_args() {
        let mut b = GraphBuilder::new("f");
        let fnptr = b.param("fp", Type::Address);
        let x = b.param("x", Type::Signed);
        let op = SpaceOp::new(
            "indirect_call",
            vec![
                fnptr.into(),
                x.into(),
                OpArg::Callee(Callee::Indirect {
                    sig: FuncSig::new(vec![Type::Signed], Type::Void),
                    targets: None,
                }),
            ],
            None,
        );
        assert!(op.is_call());
        assert_eq!(op.call_args(), &[OpArg::Var(x)]);
        assert!(matches!(op.callee(), Some(Callee::Indirect { targets: None, .. })));
        assert!(op.reads(fnptr));
    }

    #[test]
    fn reachable_blocks_skip_orphans() {
        let mut b = GraphBuilder::new("f");
        let x = b.param("x", Type::Signed);
        let ret = b.returnblock(Type::Signed);
        let _orphan = b.block(vec![]);
        let start = b.start();
        b.goto(start, ret, vec![x.into()]);
        let g = b.finish();
        assert_eq!(g.reachable_blocks(), vec![BlockId(0), BlockId(1)]);
        assert_eq!(g.params(), &[x]);
    }
}
