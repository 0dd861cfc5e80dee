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

// Merging of integer-equality branch chains.
//
// A chain is a block ending in `c = int_eq(x, K1)` branching on `c`, whose
// false exit leads to a block that only computes `int_eq(x, K2)` and branches
// on it, and so on. The head block is rewritten into one switch on `x`; the
// other chain blocks are left as they are for any other predecessors.

use crate::ir::{kind_of, Arg, Block, BlockId, ConstValue, ExitCase, ExitSwitch, Graph, Kind, Link, LinkArg, OpArg, VarId};
use std::collections::{HashMap, HashSet};

const EQUALITY_OPS: &[&str] = &["int_eq", "uint_eq", "char_eq", "unichar_eq"];

fn bool_exits(block: &Block) -> Option<(&Link, &Link)> {
    if block.exits.len() != 2 {
        return None;
    }
    let on_false = block.exits.iter().find(|l| l.exitcase == ExitCase::Bool(false))?;
    let on_true = block.exits.iter().find(|l| l.exitcase == ExitCase::Bool(true))?;
    Some((on_false, on_true))
}

/// The `(variable, constant)` a chain block compares, if it is one.
fn chain_test(block: &Block, head: bool) -> Option<(VarId, i64)> {
    let ExitSwitch::Var(cond) = block.exitswitch else {
        return None;
    };
    if !head && block.operations.len() != 1 {
        return None;
    }
    let op = block.operations.last()?;
    if !EQUALITY_OPS.contains(&op.opname.as_str()) || op.result != Some(cond) {
        return None;
    }
    let leaks = block.exits.iter().any(|l| {
        l.args
            .iter()
            .any(|a| matches!(a, LinkArg::Value(Arg::Var(v)) if *v == cond))
    });
    if leaks {
        return None;
    }
    bool_exits(block)?;
    match op.args.as_slice() {
        [OpArg::Var(v), OpArg::Const(c)] | [OpArg::Const(c), OpArg::Var(v)] => match c.value {
            ConstValue::Int(k) => Some((*v, k)),
            _ => None,
        },
        _ => None,
    }
}

fn remap(link: &Link, varmap: &HashMap<VarId, LinkArg>) -> Option<Link> {
    let mut args = Vec::with_capacity(link.args.len());
    for a in &link.args {
        args.push(match a {
            LinkArg::Value(Arg::Var(v)) => varmap.get(v)?.clone(),
            LinkArg::Value(Arg::Const(_)) => a.clone(),
            _ => return None,
        });
    }
    Some(Link::new(link.target, args))
}

fn try_merge(graph: &mut Graph, head: BlockId) -> bool {
    let Some((checkvar, first_value)) = chain_test(graph.block(head), true) else {
        return false;
    };
    if kind_of(graph.var_type(checkvar)) != Some(Kind::Int) {
        return false;
    }
    let Some((on_false, on_true)) = bool_exits(graph.block(head)) else {
        return false;
    };

    let mut cases: Vec<(i64, Link)> = vec![(first_value, Link::new(on_true.target, on_true.args.clone()))];
    let mut seen = HashSet::from([first_value]);
    let mut default = Link::new(on_false.target, on_false.args.clone());
    let mut visited = HashSet::from([head]);
    let mut length = 1;

    while visited.insert(default.target) {
        let block = graph.block(default.target);
        let Some((var, value)) = chain_test(block, false) else {
            break;
        };
        if block.inputargs.len() != default.args.len() {
            break;
        }
        // Values of this block's inputs, expressed in the head block.
        let varmap: HashMap<VarId, LinkArg> = block
            .inputargs
            .iter()
            .copied()
            .zip(default.args.iter().cloned())
            .collect();
        if varmap.get(&var) != Some(&LinkArg::Value(Arg::Var(checkvar))) {
            break;
        }
        let Some((f, t)) = bool_exits(block) else {
            break;
        };
        let (Some(f), Some(t)) = (remap(f, &varmap), remap(t, &varmap)) else {
            break;
        };
        // A repeated constant can never match past its first test.
        if seen.insert(value) {
            cases.push((value, t));
        }
        default = f;
        length += 1;
    }
    if length < 2 {
        return false;
    }

    let mut exits: Vec<Link> = cases
        .into_iter()
        .map(|(value, link)| link.with_case(ExitCase::Int(value)))
        .collect();
    exits.push(default.with_case(ExitCase::Default));
    let block = graph.block_mut(head);
    block.operations.pop();
    block.exitswitch = ExitSwitch::Var(checkvar);
    block.exits = exits;
    true
}

/// Rewrites every chain of two or more equality tests on one integer
/// variable into a single switch. Returns true if a chain was merged.
pub fn merge_if_chains(graph: &mut Graph) -> bool {
    let mut changed = false;
    'restart: loop {
        for b in graph.reachable_blocks() {
            if try_merge(graph, b) {
                changed = true;
                continue 'restart;
            }
        }
        return changed;
    }
}
