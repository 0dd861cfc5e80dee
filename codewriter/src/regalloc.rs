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

// Register coloring.
//
// Each (procedure, kind) pair gets its own dense numbering. Parameters take
// the leading colors; the rest are handed out in the order the flattener
// first emits them, so the same graph always produces the same unit.

use crate::ir::{kind_of, Graph, Kind, KindMap, VarId};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct RegAllocator {
    kind: Kind,
    colors: HashMap<VarId, u32>,
    next: u32,
}

impl RegAllocator {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            colors: HashMap::new(),
            next: 0,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Color of `v`, allocating the next free one on first request.
    pub fn color_of(&mut self, v: VarId) -> u32 {
        let next = &mut self.next;
        *self.colors.entry(v).or_insert_with(|| {
            let c = *next;
            *next += 1;
            c
        })
    }

    pub fn get(&self, v: VarId) -> Option<u32> {
        self.colors.get(&v).copied()
    }

    /// Exchanges two colors for every variable holding either.
    pub fn swap_colors(&mut self, a: u32, b: u32) {
        if a == b {
            return;
        }
        for c in self.colors.values_mut() {
            if *c == a {
                *c = b;
            } else if *c == b {
                *c = a;
            }
        }
        self.next = self.next.max(a + 1).max(b + 1);
    }

    pub fn num_colors(&self) -> u32 {
        self.next
    }
}

/// Renumbers so that the n-th parameter of each kind has color n.
pub fn enforce_input_args(graph: &Graph, regallocs: &mut KindMap<RegAllocator>) {
    let mut position = KindMap::<u32>::default();
    for &v in graph.params() {
        let Some(kind) = kind_of(graph.var_type(v)) else {
            continue;
        };
        let want = position[kind];
        position[kind] += 1;
        let ra = &mut regallocs[kind];
        let have = ra.color_of(v);
        ra.swap_colors(have, want);
    }
}

/// Allocators for the three kinds with only the parameters colored. Every
/// other value gets its color from the flattener the first time it is
/// emitted, so a unit never counts a register it does not use.
pub fn allocate_all(graph: &Graph) -> KindMap<RegAllocator> {
    let mut regallocs = KindMap::from_fn(RegAllocator::new);
    enforce_input_args(graph, &mut regallocs);
    regallocs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, GraphBuilder, Type};

    #[test]
    fn colors_are_dense_and_stable() {
        let mut ra = RegAllocator::new(Kind::Int);
        assert_eq!(ra.color_of(VarId(7)), 0);
        assert_eq!(ra.color_of(VarId(3)), 1);
        assert_eq!(ra.color_of(VarId(7)), 0);
        assert_eq!(ra.color_of(VarId(9)), 2);
        assert_eq!(ra.num_colors(), 3);
        assert_eq!(ra.get(VarId(4)), None);
    }

    #[test]
    fn swap_exchanges_both_holders() {
        let mut ra = RegAllocator::new(Kind::Ref);
        let a = ra.color_of(VarId(0));
        let b = ra.color_of(VarId(1));
        ra.swap_colors(a, b);
        assert_eq!(ra.get(VarId(0)), Some(1));
        assert_eq!(ra.get(VarId(1)), Some(0));
    }

    #[test]
    fn only_parameters_are_colored_up_front() {
        let mut b = GraphBuilder::new("f");
        let x = b.param("x", Type::Signed);
        let p = b.param("p", Type::GcRef);
        let y = b.param("y", Type::Float);
        let z = b.param("z", Type::Signed);
        let start = b.start();
        let s = b.op_value(start, "int_add", vec![x.into(), z.into()], Type::Signed);
        let ret = b.returnblock(Type::Signed);
        b.goto(start, ret, vec![s.into()]);
        let g = b.finish();

        let mut ra = allocate_all(&g);
        assert_eq!(ra[Kind::Int].get(x), Some(0));
        assert_eq!(ra[Kind::Int].get(z), Some(1));
        assert_eq!(ra[Kind::Ref].get(p), Some(0));
        assert_eq!(ra[Kind::Float].get(y), Some(0));
        assert_eq!(ra[Kind::Int].get(s), None);
        assert_eq!(ra[Kind::Ref].get(x), None);
        assert_eq!(ra[Kind::Int].num_colors(), 2);
        assert_eq!(ra[Kind::Int].color_of(s), 2);
    }

    #[test]
    fn parameters_are_moved_to_leading_colors() {
        let mut b = GraphBuilder::new("f");
        let x = b.param("x", Type::Signed);
        let y = b.param("y", Type::Signed);
        let start = b.start();
        let ret = b.returnblock(Type::Signed);
        b.goto(start, ret, vec![Constant::int(0).into()]);
        let g = b.finish();

        let mut ra = KindMap::from_fn(RegAllocator::new);
        let tmp = VarId(99);
        ra[Kind::Int].color_of(tmp);
        ra[Kind::Int].color_of(y);
        ra[Kind::Int].color_of(x);
        enforce_input_args(&g, &mut ra);
        assert_eq!(ra[Kind::Int].get(x), Some(0));
        assert_eq!(ra[Kind::Int].get(y), Some(1));
        assert_eq!(ra[Kind::Int].get(tmp), Some(2));
    }
}
