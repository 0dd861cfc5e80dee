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

// Backward liveness over a flattened program.
//
// Only `-live-` markers carry results: after `compute_liveness`, each marker
// lists every register whose current value may still be read afterwards.
// Label live sets are computed to a fixpoint, they only ever grow.

use crate::ssa::{Insn, Label, Operand, Register, SsaRepr};
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

pub fn compute_liveness(ssarepr: &mut SsaRepr) {
    remove_repeated_live(ssarepr);
    let mut label2alive: HashMap<Label, BTreeSet<Register>> = HashMap::new();
    let mut round = 0usize;
    loop {
        round += 1;
        let grew = scan_backwards(ssarepr, &mut label2alive);
        trace!(unit = %ssarepr.name, round, grew, "liveness scan");
        if !grew {
            break;
        }
    }
}

fn follow_label(
    label2alive: &HashMap<Label, BTreeSet<Register>>,
    label: &Label,
    alive: &mut BTreeSet<Register>,
) {
    if let Some(set) = label2alive.get(label) {
        alive.extend(set.iter().copied());
    }
}

/// One backward pass. Returns true if some label's live set grew.
fn scan_backwards(
    ssarepr: &mut SsaRepr,
    label2alive: &mut HashMap<Label, BTreeSet<Register>>,
) -> bool {
    let mut alive: BTreeSet<Register> = BTreeSet::new();
    let mut grew = false;

    for insn in ssarepr.insns.iter_mut().rev() {
        match insn {
            Insn::Label(l) => {
                let set = label2alive.entry(l.clone()).or_default();
                let before = set.len();
                set.extend(alive.iter().copied());
                grew |= set.len() != before;
            }
            Insn::Live(args) => {
                let mut labels = Vec::new();
                for a in args.iter() {
                    match a {
                        Operand::Reg(r) => {
                            alive.insert(*r);
                        }
                        Operand::Label(l) => {
                            follow_label(label2alive, l, &mut alive);
                            labels.push(a.clone());
                        }
                        _ => {}
                    }
                }
                let mut rewritten: Vec<Operand> = alive.iter().copied().map(Operand::Reg).collect();
                rewritten.extend(labels);
                *args = rewritten;
            }
            Insn::Unreachable => alive.clear(),
            Insn::Op { args, result, .. } => {
                if let Some(r) = result {
                    alive.remove(r);
                }
                for a in args.iter() {
                    match a {
                        Operand::Reg(r) => {
                            alive.insert(*r);
                        }
                        Operand::List(lst) => {
                            for item in &lst.items {
                                if let Operand::Reg(r) = item {
                                    alive.insert(*r);
                                }
                            }
                        }
                        Operand::Label(l) => follow_label(label2alive, l, &mut alive),
                        Operand::Descr(d) => {
                            if let Some(sd) = d.as_switch() {
                                for (_, l) in &sd.labels {
                                    follow_label(label2alive, l, &mut alive);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
    grew
}

/// Merges runs of `-live-` markers that are only separated by labels into
/// a single marker placed before those labels. The labels keep their byte
/// position since markers encode to nothing.
pub fn remove_repeated_live(ssarepr: &mut SsaRepr) {
    let insns = std::mem::take(&mut ssarepr.insns);
    let mut out = Vec::with_capacity(insns.len());
    let mut it = insns.into_iter().peekable();

    while let Some(insn) = it.next() {
        let Insn::Live(first) = insn else {
            out.push(insn);
            continue;
        };
        let mut lives = vec![first];
        let mut labels = Vec::new();
        while let Some(next) = it.next_if(|i| matches!(i, Insn::Live(_) | Insn::Label(_))) {
            match next {
                Insn::Live(args) => lives.push(args),
                other => labels.push(other),
            }
        }
        if lives.len() == 1 {
            out.push(Insn::Live(lives.pop().unwrap_or_default()));
        } else {
            out.push(Insn::Live(merge_live_args(lives)));
        }
        out.extend(labels);
    }
    ssarepr.insns = out;
}

fn merge_live_args(lives: Vec<Vec<Operand>>) -> Vec<Operand> {
    let mut regs = BTreeSet::new();
    let mut labels = BTreeSet::new();
    for a in lives.into_iter().flatten() {
        match a {
            Operand::Reg(r) => {
                regs.insert(r);
            }
            Operand::Label(l) => {
                labels.insert(l);
            }
            _ => {}
        }
    }
    regs.into_iter()
        .map(Operand::Reg)
        .chain(labels.into_iter().map(Operand::Label))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descr::Descr;
    use crate::ir::{Constant, Kind};

    fn i(n: u32) -> Register {
        Register::new(Kind::Int, n)
    }

    fn r(n: u32) -> Register {
        Register::new(Kind::Ref, n)
    }

    fn lbl(s: &str) -> Label {
        Label::new(s)
    }

    fn live_regs(insn: &Insn) -> Vec<Register> {
        match insn {
            Insn::Live(args) => args
                .iter()
                .filter_map(|a| match a {
                    Operand::Reg(r) => Some(*r),
                    _ => None,
                })
                .collect(),
            _ => panic!("not a marker: {:?}", insn),
        }
    }

    #[test]
    fn marker_sees_value_read_later() {
        let mut ssa = SsaRepr::new("f");
        ssa.insns = vec![
            Insn::op("int_add", vec![i(0).into(), i(1).into()], Some(i(2))),
            Insn::Live(vec![]),
            Insn::op("int_return", vec![i(2).into()], None),
            Insn::Unreachable,
        ];
        compute_liveness(&mut ssa);
        assert_eq!(live_regs(&ssa.insns[1]), vec![i(2)]);
    }

    #[test]
    fn loop_carried_values_reach_the_loop_head() {
        let mut ssa = SsaRepr::new("f");
        ssa.insns = vec![
            Insn::Label(lbl("head")),
            Insn::Live(vec![]),
            Insn::op(
                "int_sub",
                vec![i(0).into(), Operand::Const(Constant::int(1))],
                Some(i(0)),
            ),
            Insn::op(
                "goto_if_not",
                vec![i(0).into(), Operand::Label(lbl("exit"))],
                None,
            ),
            Insn::op("goto", vec![Operand::Label(lbl("head"))], None),
            Insn::Unreachable,
            Insn::Label(lbl("exit")),
            Insn::op("ref_return", vec![r(0).into()], None),
            Insn::Unreachable,
        ];
        compute_liveness(&mut ssa);
        assert_eq!(live_regs(&ssa.insns[1]), vec![i(0), r(0)]);

        let once = ssa.clone();
        compute_liveness(&mut ssa);
        assert_eq!(ssa, once);
    }

    #[test]
    fn marker_labels_merge_their_sets() {
        let mut ssa = SsaRepr::new("f");
        ssa.insns = vec![
            Insn::op("goto_if_not", vec![i(0).into(), Operand::Label(lbl("no"))], None),
            Insn::Live(vec![Operand::Label(lbl("no"))]),
            Insn::op("int_return", vec![i(1).into()], None),
            Insn::Unreachable,
            Insn::Label(lbl("no")),
            Insn::op("int_return", vec![i(2).into()], None),
            Insn::Unreachable,
        ];
        compute_liveness(&mut ssa);
        assert_eq!(
            ssa.insns[1],
            Insn::Live(vec![i(1).into(), i(2).into(), Operand::Label(lbl("no"))])
        );
    }

    #[test]
    fn switch_tables_and_lists_are_reads() {
        let table = Descr::switch(vec![(1, lbl("one")), (2, lbl("two"))]);
        let mut ssa = SsaRepr::new("f");
        ssa.insns = vec![
            Insn::Live(vec![]),
            Insn::op("switch", vec![i(0).into(), Operand::Descr(table)], None),
            Insn::op("void_return", vec![], None),
            Insn::Unreachable,
            Insn::Label(lbl("one")),
            Insn::op(
                "residual_call_r_v",
                vec![Operand::List(crate::ssa::ListOfKind::new(Kind::Ref, vec![r(3).into()]))],
                None,
            ),
            Insn::Unreachable,
            Insn::Label(lbl("two")),
            Insn::op("int_return", vec![i(4).into()], None),
            Insn::Unreachable,
        ];
        compute_liveness(&mut ssa);
        assert_eq!(live_regs(&ssa.insns[0]), vec![i(0), i(4), r(3)]);
    }

    #[test]
    fn repeated_markers_collapse_before_labels() {
        let mut ssa = SsaRepr::new("f");
        ssa.insns = vec![
            Insn::Live(vec![i(0).into()]),
            Insn::Label(lbl("a")),
            Insn::Live(vec![i(1).into(), i(0).into()]),
            Insn::op("int_return", vec![i(1).into()], None),
        ];
        remove_repeated_live(&mut ssa);
        assert_eq!(
            ssa.insns,
            vec![
                Insn::Live(vec![i(0).into(), i(1).into()]),
                Insn::Label(lbl("a")),
                Insn::op("int_return", vec![i(1).into()], None),
            ]
        );
    }
}
