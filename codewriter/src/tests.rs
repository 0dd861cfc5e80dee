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

#[cfg(test)]
mod integration {
    use std::collections::BTreeSet;

    use crate::descr::DescrCache;
    use crate::effect::{ProcEffects, TableAnalyzer};
    use crate::error::ErrorKind;
    use crate::flatten::{flatten_graph, OVERFLOW_ERROR};
    use crate::ir::{Callee, Constant, Graph, GraphBuilder, Kind, LinkArg, OpArg, Type};
    use crate::liveness::compute_liveness;
    use crate::program::{FuncSig, GraphSource, LookInsideAll, ProcFlags, ProcId, Program};
    use crate::regalloc::allocate_all;
    use crate::ssa::{Insn, Operand, Register, SsaRepr};
    use crate::{format_assembler, unformat_assembler, CodeWriter, Config, Session};

    fn int_sig() -> FuncSig {
        FuncSig::new(vec![Type::Signed], Type::Signed)
    }

    /// `if x == 0 {0} else if x == 1 {10} ... else {x}`.
    fn dispatch(n: i64) -> Graph {
        let mut b = GraphBuilder::new("dispatch");
        let x = b.param("x", Type::Signed);
        let ret = b.returnblock(Type::Signed);
        let mut cur = b.start();
        let mut cur_x = x;
        for i in 0..n {
            let c = b.op_value(cur, "int_eq", vec![cur_x.into(), Constant::int(i).into()], Type::Bool);
            let nx = b.var("x", Type::Signed);
            let next = b.block(vec![nx]);
            b.branch(
                cur,
                c,
                (ret, vec![Constant::int(i * 10).into()]),
                (next, vec![cur_x.into()]),
            );
            cur = next;
            cur_x = nx;
        }
        b.goto(cur, ret, vec![cur_x.into()]);
        b.finish()
    }

    /// `main(x) = callee(x)` where the call is the only operation of the
    /// start block.
    fn calling(program: &mut Program, main: ProcId, callee: ProcId, arg_ty: Type) {
        let mut b = GraphBuilder::new("main");
        let x = b.param("x", arg_ty);
        let start = b.start();
        let r = b.op_value(
            start,
            "direct_call",
            vec![OpArg::Callee(Callee::Direct(callee)), x.into()],
            Type::Signed,
        );
        let ret = b.returnblock(Type::Signed);
        b.goto(start, ret, vec![r.into()]);
        program.set_graph(main, b.finish());
    }

    #[test]
    fn text_program_assembles_to_expected_bytes() {
        let mut ssarepr = unformat_assembler("int_add %i0, %i1 -> %i2\nint_return %i2\n", "add").unwrap();
        compute_liveness(&mut ssarepr);
        let mut session = Session::new();
        let unit = session.assemble(&mut ssarepr, None).unwrap();
        assert_eq!(unit.code(), &[0, 0, 1, 2, 1, 2]);
        assert_eq!(unit.num_regs(Kind::Int), 3);
        assert_eq!(unit.num_regs(Kind::Ref), 0);
        assert_eq!(session.opcodes().keys(), &["int_add/ii>i".to_string(), "int_return/i".to_string()]);
        assert_eq!(ssarepr.insns_pos, Some(vec![0, 4]));
    }

    #[test]
    fn equality_chain_becomes_one_switch() {
        let mut program = Program::new();
        let main = program.declare("dispatch", int_sig());
        program.set_graph(main, dispatch(6));
        let analyzer = TableAnalyzer::new();
        let mut cw = CodeWriter::new(&program, &LookInsideAll, &analyzer, Box::new(DescrCache::new()), Config::default());
        let units = cw.make_units(&[main]).unwrap();
        let rendered = units[0].dump();
        assert!(rendered.contains("switch %i0, <SwitchDictDescr 0:L1, 1:L2"), "rendered:\n{rendered}");
        assert_eq!(rendered.matches(":L").count(), 6, "rendered:\n{rendered}");
        assert!(!rendered.contains("int_eq"), "rendered:\n{rendered}");
        assert!(cw.session().opcodes().get("switch/id").is_some());
        assert_eq!(cw.finished().descrs, 1);
    }

    #[test]
    fn equality_chain_is_kept_when_merging_is_off() {
        let mut program = Program::new();
        let main = program.declare("dispatch", int_sig());
        program.set_graph(main, dispatch(3));
        let analyzer = TableAnalyzer::new();
        let config = Config {
            merge_if_chains: false,
            ..Config::default()
        };
        let mut cw = CodeWriter::new(&program, &LookInsideAll, &analyzer, Box::new(DescrCache::new()), config);
        let units = cw.make_units(&[main]).unwrap();
        let rendered = units[0].dump();
        assert_eq!(rendered.matches("goto_if_not_int_eq").count(), 3, "rendered:\n{rendered}");
        assert!(!rendered.contains("switch"), "rendered:\n{rendered}");
    }

    /// `acc = 0; while i > 0 { acc += i; i -= 1 }; acc`.
    fn sum_loop() -> Graph {
        let mut b = GraphBuilder::new("sum");
        let n = b.param("n", Type::Signed);
        let start = b.start();
        let ret = b.returnblock(Type::Signed);
        let (i, acc) = (b.var("i", Type::Signed), b.var("acc", Type::Signed));
        let header = b.block(vec![i, acc]);
        let (i2, acc2) = (b.var("i", Type::Signed), b.var("acc", Type::Signed));
        let body = b.block(vec![i2, acc2]);
        b.goto(start, header, vec![n.into(), Constant::int(0).into()]);
        let c = b.op_value(header, "int_gt", vec![i.into(), Constant::int(0).into()], Type::Bool);
        b.branch(header, c, (body, vec![i.into(), acc.into()]), (ret, vec![acc.into()]));
        let acc3 = b.op_value(body, "int_add", vec![acc2.into(), i2.into()], Type::Signed);
        let i3 = b.op_value(body, "int_sub", vec![i2.into(), Constant::int(1).into()], Type::Signed);
        b.goto(body, header, vec![i3.into(), acc3.into()]);
        b.finish()
    }

    /// Every register mentioned by an instruction, list items included.
    fn registers_used(ssarepr: &SsaRepr) -> BTreeSet<Register> {
        fn visit(op: &Operand, out: &mut BTreeSet<Register>) {
            match op {
                Operand::Reg(r) => {
                    out.insert(*r);
                }
                Operand::List(list) => list.items.iter().for_each(|item| visit(item, out)),
                _ => {}
            }
        }
        let mut out = BTreeSet::new();
        for insn in &ssarepr.insns {
            match insn {
                Insn::Op { args, result, .. } => {
                    args.iter().for_each(|a| visit(a, &mut out));
                    out.extend(*result);
                }
                Insn::Live(ops) => ops.iter().for_each(|a| visit(a, &mut out)),
                _ => {}
            }
        }
        out
    }

    #[test]
    fn loop_markers_hold_the_loop_carried_registers() {
        let graph = sum_loop();
        let mut regallocs = allocate_all(&graph);
        let mut ssarepr = flatten_graph(&graph, ProcId(0), &mut regallocs, None).unwrap();
        compute_liveness(&mut ssarepr);
        let mut session = Session::new();
        let unit = session.assemble(&mut ssarepr, None).unwrap();

        let records: Vec<_> = unit.liveness().collect();
        assert_eq!(records.len(), 1);
        let (pc, live) = records[0];
        assert_eq!(live.live_i, vec![1, 2]);
        assert!(live.live_r.is_empty() && live.live_f.is_empty());
        assert!(unit.get_live_vars(pc).is_ok());
    }

    #[test]
    fn register_counts_match_the_registers_emitted() {
        let graph = sum_loop();
        let mut regallocs = allocate_all(&graph);
        let mut ssarepr = flatten_graph(&graph, ProcId(0), &mut regallocs, None).unwrap();
        compute_liveness(&mut ssarepr);
        let used = registers_used(&ssarepr);
        let unit = Session::new().assemble(&mut ssarepr, None).unwrap();

        for kind in Kind::ALL {
            let indices: Vec<u32> = used.iter().filter(|r| r.kind == kind).map(|r| r.index).collect();
            assert_eq!(unit.num_regs(kind) as usize, indices.len(), "{kind:?}: {indices:?}");
            assert_eq!(indices, (0..indices.len() as u32).collect::<Vec<_>>(), "{kind:?}");
        }
        assert_eq!(unit.num_regs(Kind::Int), 7);
    }

    #[test]
    fn calls_are_split_between_units_and_residual_calls() {
        let mut program = Program::new();
        let main = program.declare("main", int_sig());
        let leaf = program.declare("leaf", int_sig());
        let external = program.declare("external", int_sig());
        let mut b = GraphBuilder::new("leaf");
        let y = b.param("y", Type::Signed);
        let ret = b.returnblock(Type::Signed);
        let start = b.start();
        b.goto(start, ret, vec![y.into()]);
        program.set_graph(leaf, b.finish());

        let mut b = GraphBuilder::new("main");
        let x = b.param("x", Type::Signed);
        let start = b.start();
        let r1 = b.op_value(start, "direct_call", vec![OpArg::Callee(Callee::Direct(leaf)), x.into()], Type::Signed);
        let r2 = b.op_value(start, "direct_call", vec![OpArg::Callee(Callee::Direct(external)), r1.into()], Type::Signed);
        let ret = b.returnblock(Type::Signed);
        b.goto(start, ret, vec![r2.into()]);
        program.set_graph(main, b.finish());

        let analyzer = TableAnalyzer::new();
        let mut cw = CodeWriter::new(&program, &LookInsideAll, &analyzer, Box::new(DescrCache::new()), Config::default());
        let units = cw.make_units(&[main]).unwrap();
        assert_eq!(units.len(), 2);
        let rendered = units[0].dump();
        assert!(rendered.contains("inline_call_ir_i <UnitDescr leaf>, I[%i0], R[] -> %i1"), "rendered:\n{rendered}");
        assert!(
            rendered.contains("residual_call_ir_i $<* external>, I[%i1], R[], <CallDescr i:i CanRaise> -> %i2"),
            "rendered:\n{rendered}"
        );
        assert_eq!(rendered.matches("-live-").count(), 2, "rendered:\n{rendered}");
        assert_eq!(units[0].liveness().count(), 2);
        assert!(cw.session().opcodes().get("inline_call_ir_i/dIR>i").is_some());
        assert!(cw.session().opcodes().get("residual_call_ir_i/iIRd>i").is_some());
    }

    #[test]
    fn caught_exceptions_dispatch_on_their_class() {
        let mut program = Program::new();
        let main = program.declare("main", int_sig());
        let external = program.declare("external", int_sig());
        let mut b = GraphBuilder::new("main");
        let x = b.param("x", Type::Signed);
        let start = b.start();
        let r = b.op_value(start, "direct_call", vec![OpArg::Callee(Callee::Direct(external)), x.into()], Type::Signed);
        let ret = b.returnblock(Type::Signed);
        b.raising(start, (ret, vec![r.into()]), vec![("ValueError", ret, vec![Constant::int(0).into()])]);
        program.set_graph(main, b.finish());

        let analyzer = TableAnalyzer::new();
        let mut cw = CodeWriter::new(&program, &LookInsideAll, &analyzer, Box::new(DescrCache::new()), Config::default());
        let units = cw.make_units(&[main]).unwrap();
        let rendered = units[0].dump();
        assert!(rendered.contains("catch_exception L1\nint_return %i1\n---\nL1:\n"), "rendered:\n{rendered}");
        assert!(rendered.contains("goto_if_exception_mismatch $<* ValueError>, L2\nint_return $0\n"), "rendered:\n{rendered}");
        assert!(rendered.contains("L2:\nreraise"), "rendered:\n{rendered}");
    }

    #[test]
    fn overflow_checks_jump_to_a_raise() {
        let mut program = Program::new();
        let main = program.declare("checked", FuncSig::new(vec![Type::Signed, Type::Signed], Type::Signed));
        let mut b = GraphBuilder::new("checked");
        let x = b.param("x", Type::Signed);
        let y = b.param("y", Type::Signed);
        let start = b.start();
        let r = b.op_value(start, "int_mul_ovf", vec![x.into(), y.into()], Type::Signed);
        let ret = b.returnblock(Type::Signed);
        let exc = b.exceptblock();
        b.raising(
            start,
            (ret, vec![r.into()]),
            vec![(OVERFLOW_ERROR, exc, vec![LinkArg::LastException, LinkArg::LastExcValue])],
        );
        program.set_graph(main, b.finish());

        let analyzer = TableAnalyzer::new();
        let mut cw = CodeWriter::new(&program, &LookInsideAll, &analyzer, Box::new(DescrCache::new()), Config::default());
        let units = cw.make_units(&[main]).unwrap();
        let unit = &units[0];
        let jump = cw.session().opcodes().get("int_mul_jump_if_ovf/Lii>i").unwrap();
        assert_eq!(unit.code()[0], jump);
        // jump: opcode, 2-byte label, two registers, result.
        // int_return %i2 follows, so the raise sits at 8.
        assert_eq!(unit.follow_jump(3).unwrap(), 8);
        assert!(cw.session().opcodes().get("raise/r").is_some());
        assert_eq!(unit.constants(Kind::Ref).len(), 1);
    }

    #[test]
    fn mismatched_call_signature_is_reported() {
        let mut program = Program::new();
        let main = program.declare("main", FuncSig::new(vec![Type::Float], Type::Signed));
        let leaf = program.declare("leaf", int_sig());
        let mut b = GraphBuilder::new("leaf");
        let y = b.param("y", Type::Signed);
        let ret = b.returnblock(Type::Signed);
        let start = b.start();
        b.goto(start, ret, vec![y.into()]);
        program.set_graph(leaf, b.finish());
        calling(&mut program, main, leaf, Type::Float);

        let analyzer = TableAnalyzer::new();
        let mut cw = CodeWriter::new(&program, &LookInsideAll, &analyzer, Box::new(DescrCache::new()), Config::default());
        let err = cw.make_units(&[main]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Signature);
        let rendered = err.render(None);
        assert!(rendered.contains("direct_call"), "rendered:\n{rendered}");
        assert!(rendered.contains("main"), "rendered:\n{rendered}");
        assert!(rendered.contains("Float"), "rendered:\n{rendered}");
    }

    #[test]
    fn elidable_callee_with_random_effects_is_rejected() {
        let mut program = Program::new();
        let main = program.declare("main", int_sig());
        let hash = program.declare("hash", int_sig());
        program.set_flags(
            hash,
            ProcFlags {
                elidable: true,
                ..ProcFlags::default()
            },
        );
        calling(&mut program, main, hash, Type::Signed);

        let mut analyzer = TableAnalyzer::new();
        analyzer.set(
            hash,
            ProcEffects {
                random: true,
                ..ProcEffects::pure()
            },
        );
        let mut cw = CodeWriter::new(&program, &LookInsideAll, &analyzer, Box::new(DescrCache::new()), Config::default());
        let err = cw.make_units(&[main]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Effect);
        assert!(err.message.contains("hash"), "message: {}", err.message);
        assert!(err.message.contains("elidable"), "message: {}", err.message);
        assert_eq!(program.proc_name(hash), "hash");
    }

    #[test]
    fn flattened_text_survives_a_reparse() {
        let mut graph = dispatch(3);
        crate::opt::merge_if_chains(&mut graph);
        let mut regallocs = allocate_all(&graph);
        let mut ssarepr = flatten_graph(&graph, ProcId(0), &mut regallocs, None).unwrap();
        compute_liveness(&mut ssarepr);
        let text = format_assembler(&ssarepr);

        let mut reparsed = unformat_assembler(&text, "dispatch").unwrap();
        assert_eq!(format_assembler(&reparsed), text);

        let first = Session::new().assemble(&mut ssarepr, None).unwrap();
        let second = Session::new().assemble(&mut reparsed, None).unwrap();
        assert_eq!(first.code(), second.code());
    }
}
