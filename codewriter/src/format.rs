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

// Text form of flattened programs.
//
// One instruction per line:
//
// ```text
// int_add %i0, $1 -> %i1
// goto_if_not_int_lt %i1, %i2, L1
// -live- %i1, L1
// L1:
// residual_call_ir_i $<* fn g>, I[%i0], R[%r0], <CallDescr ir:i CanRaise> -> %i3
// ---
// ```
//
// Label names are renumbered `L1, L2, ...` in order of first appearance,
// and declarations of labels nothing refers to are omitted, so the output
// only depends on the shape of the program.

use crate::descr::{Descr, DescrKind};
use crate::error::{BuildError, ErrorKind, Result};
use crate::ir::{ConstValue, Constant, Kind};
use crate::program::ProcId;
use crate::ssa::{Insn, Label, ListOfKind, Operand, Register, SsaRepr};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

#[derive(Default)]
struct LabelNamer {
    names: HashMap<Label, String>,
}

impl LabelNamer {
    fn name(&mut self, l: &Label) -> String {
        let next = self.names.len() + 1;
        self.names
            .entry(l.clone())
            .or_insert_with(|| format!("L{}", next))
            .clone()
    }
}

fn referenced_labels(ssarepr: &SsaRepr) -> HashSet<&Label> {
    fn visit<'a>(a: &'a Operand, out: &mut HashSet<&'a Label>) {
        match a {
            Operand::Label(l) => {
                out.insert(l);
            }
            Operand::Descr(d) => {
                if let Some(sd) = d.as_switch() {
                    out.extend(sd.labels.iter().map(|(_, l)| l));
                }
            }
            _ => {}
        }
    }
    let mut out = HashSet::new();
    for insn in &ssarepr.insns {
        match insn {
            Insn::Live(args) | Insn::Op { args, .. } => {
                for a in args {
                    visit(a, &mut out);
                }
            }
            _ => {}
        }
    }
    out
}

pub fn const_repr(c: &Constant) -> String {
    match &c.value {
        ConstValue::Int(v) => format!("${}", v),
        ConstValue::Float(v) => format!("${:?}", v),
        ConstValue::Null => "$NULL".to_string(),
        ConstValue::Symbol(s) if c.kind() == Some(Kind::Ref) => format!("$<gc {}>", s),
        ConstValue::Symbol(s) => format!("$<* {}>", s),
    }
}

fn operand_repr(a: &Operand, namer: &mut LabelNamer) -> String {
    match a {
        Operand::Reg(r) => r.to_string(),
        Operand::Const(c) => const_repr(c),
        Operand::Label(l) => namer.name(l),
        Operand::List(lst) => {
            let items: Vec<String> = lst.items.iter().map(|x| operand_repr(x, namer)).collect();
            format!("{}[{}]", lst.kind.list_code(), items.join(", "))
        }
        Operand::Descr(d) => match d.as_switch() {
            Some(sd) => {
                let parts: Vec<String> = sd
                    .labels
                    .iter()
                    .map(|(v, l)| format!("{}:{}", v, namer.name(l)))
                    .collect();
                format!("<SwitchDictDescr {}>", parts.join(", "))
            }
            None => d.to_string(),
        },
        Operand::IndirectTargets(procs) => {
            let parts: Vec<String> = procs.iter().map(|p| p.0.to_string()).collect();
            format!("<IndirectCallTargets {}>", parts.join(", "))
        }
    }
}

/// Renders `ssarepr`, prefixing each line with its byte position once the
/// program has been encoded.
pub fn format_assembler(ssarepr: &SsaRepr) -> String {
    let referenced = referenced_labels(ssarepr);
    let mut namer = LabelNamer::default();
    let mut insns = &ssarepr.insns[..];
    if let Some(Insn::Unreachable) = insns.last() {
        insns = &insns[..insns.len() - 1];
    }

    let mut out = String::new();
    for (idx, insn) in insns.iter().enumerate() {
        if let Insn::Label(l) = insn {
            if !referenced.contains(l) {
                continue;
            }
        }
        if let Some(pos) = ssarepr.insns_pos.as_ref().and_then(|p| p.get(idx)) {
            let _ = write!(out, "{:4}  ", pos);
        }
        match insn {
            Insn::Label(l) => {
                let _ = write!(out, "{}:", namer.name(l));
            }
            Insn::Unreachable => out.push_str("---"),
            Insn::Live(args) => {
                out.push_str("-live-");
                let mut regs: Vec<Register> = Vec::new();
                let mut rest: Vec<String> = Vec::new();
                for a in args {
                    match a {
                        Operand::Reg(r) => regs.push(*r),
                        other => rest.push(operand_repr(other, &mut namer)),
                    }
                }
                regs.sort();
                rest.sort();
                let parts: Vec<String> = regs.iter().map(Register::to_string).chain(rest).collect();
                if !parts.is_empty() {
                    let _ = write!(out, " {}", parts.join(", "));
                }
            }
            Insn::Op { name, args, result } => {
                out.push_str(name);
                let parts: Vec<String> = args.iter().map(|a| operand_repr(a, &mut namer)).collect();
                if !parts.is_empty() {
                    let _ = write!(out, " {}", parts.join(", "));
                }
                if let Some(r) = result {
                    let _ = write!(out, " -> {}", r);
                }
            }
        }
        out.push('\n');
    }
    out
}

/// Splits an operand list at top-level commas and spaces. Brackets and
/// angle brackets group; `->` is its own word.
fn split_words(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut words = Vec::new();
    let mut cur = String::new();
    let mut depth = 0i32;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if depth == 0 && cur.is_empty() && c == '-' && chars.get(i + 1) == Some(&'>') {
            words.push("->".to_string());
            i += 2;
            continue;
        }
        match c {
            '[' | '<' => {
                depth += 1;
                cur.push(c);
            }
            ']' | '>' => {
                depth -= 1;
                cur.push(c);
            }
            ',' | ' ' | '\t' if depth == 0 => {
                if !cur.is_empty() {
                    words.push(std::mem::take(&mut cur));
                }
            }
            _ => cur.push(c),
        }
        i += 1;
    }
    if !cur.is_empty() {
        words.push(cur);
    }
    words
}

struct Parser {
    line: usize,
    descrs: HashMap<String, Descr>,
}

impl Parser {
    fn err(&self, msg: impl Into<String>) -> BuildError {
        BuildError::at_line(ErrorKind::Parse, self.line, msg)
    }

    fn register(&self, w: &str) -> Result<Register> {
        let body = w
            .strip_prefix('%')
            .ok_or_else(|| self.err(format!("expected a register, got '{}'", w)))?;
        let mut chars = body.chars();
        let kind = chars
            .next()
            .and_then(Kind::from_code)
            .filter(|_| body.starts_with(|c: char| c.is_ascii_lowercase()))
            .ok_or_else(|| self.err(format!("bad register kind in '{}'", w)))?;
        let index = chars
            .as_str()
            .parse::<u32>()
            .map_err(|_| self.err(format!("bad register index in '{}'", w)))?;
        Ok(Register::new(kind, index))
    }

    fn constant(&self, w: &str) -> Result<Constant> {
        let body = &w[1..];
        if body == "NULL" {
            return Ok(Constant::null());
        }
        if let Some(name) = body.strip_prefix("<gc ").and_then(|s| s.strip_suffix('>')) {
            return Ok(Constant::gc_object(name));
        }
        if let Some(name) = body.strip_prefix("<* ").and_then(|s| s.strip_suffix('>')) {
            return Ok(Constant::address(name));
        }
        if let Ok(v) = body.parse::<i64>() {
            return Ok(Constant::int(v));
        }
        body.parse::<f64>()
            .map(Constant::float)
            .map_err(|_| self.err(format!("bad constant '{}'", w)))
    }

    fn list(&mut self, kind: Kind, w: &str) -> Result<Operand> {
        let inner = &w[2..w.len() - 1];
        let mut items = Vec::new();
        for item in split_words(inner) {
            let op = self.operand(&item)?;
            match &op {
                Operand::Reg(r) if r.kind == kind => {}
                Operand::Const(c) if c.kind() == Some(kind) => {}
                _ => return Err(self.err(format!("'{}' does not belong in a {} list", item, kind))),
            }
            items.push(op);
        }
        Ok(Operand::List(ListOfKind::new(kind, items)))
    }

    fn descr(&mut self, w: &str) -> Result<Operand> {
        let inner = &w[1..w.len() - 1];
        if let Some(cases) = inner.strip_prefix("SwitchDictDescr") {
            let mut labels = Vec::new();
            for case in split_words(cases) {
                let (value, label) = case
                    .split_once(':')
                    .ok_or_else(|| self.err(format!("bad switch case '{}'", case)))?;
                let value = value
                    .parse::<i64>()
                    .map_err(|_| self.err(format!("bad switch value '{}'", value)))?;
                labels.push((value, Label::new(label)));
            }
            return Ok(Operand::Descr(Descr::switch(labels)));
        }
        if let Some(targets) = inner.strip_prefix("IndirectCallTargets") {
            let mut procs = Vec::new();
            for t in split_words(targets) {
                let n = t
                    .parse::<u32>()
                    .map_err(|_| self.err(format!("bad call target '{}'", t)))?;
                procs.push(ProcId(n));
            }
            return Ok(Operand::IndirectTargets(procs));
        }
        let d = self
            .descrs
            .entry(inner.to_string())
            .or_insert_with(|| Descr::new(DescrKind::Other(inner.to_string())));
        Ok(Operand::Descr(d.clone()))
    }

    fn operand(&mut self, w: &str) -> Result<Operand> {
        if w.starts_with('%') {
            return Ok(Operand::Reg(self.register(w)?));
        }
        if w.starts_with('$') {
            return Ok(Operand::Const(self.constant(w)?));
        }
        if w.starts_with('<') && w.ends_with('>') {
            return self.descr(w);
        }
        let mut chars = w.chars();
        if let (Some(c), Some('[')) = (chars.next(), chars.next()) {
            if w.ends_with(']') {
                if let Some(kind) = Kind::from_code(c).filter(|_| c.is_ascii_uppercase()) {
                    return self.list(kind, w);
                }
            }
        }
        if w.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            return Ok(Operand::Label(Label::new(w)));
        }
        Err(self.err(format!("unknown operand '{}'", w)))
    }

    fn insn(&mut self, line: &str) -> Result<Insn> {
        if line == "---" {
            return Ok(Insn::Unreachable);
        }
        if let Some(name) = line.strip_suffix(':') {
            if !name.contains(' ') {
                return Ok(Insn::Label(Label::new(name)));
            }
        }
        let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
        let words = split_words(rest);
        let (arg_words, result) = match words.iter().position(|w| w == "->") {
            Some(pos) if pos + 2 == words.len() => {
                (&words[..pos], Some(self.register(&words[pos + 1])?))
            }
            Some(_) => return Err(self.err("'->' must be followed by exactly one register")),
            None => (&words[..], None),
        };
        let args = arg_words
            .iter()
            .map(|w| self.operand(w))
            .collect::<Result<Vec<_>>>()?;
        if name == "-live-" {
            if result.is_some() {
                return Err(self.err("a liveness marker has no result"));
            }
            return Ok(Insn::Live(args));
        }
        Ok(Insn::op(name, args, result))
    }
}

/// Parses the text form back into a program. Leading byte positions, as
/// printed for encoded programs, are skipped; `#` starts a comment line.
pub fn unformat_assembler(text: &str, name: &str) -> Result<SsaRepr> {
    let mut parser = Parser {
        line: 0,
        descrs: HashMap::new(),
    };
    let mut ssarepr = SsaRepr::new(name);
    for (n, raw) in text.lines().enumerate() {
        parser.line = n + 1;
        let mut line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with(|c: char| c.is_ascii_digit()) {
            line = line
                .split_once(char::is_whitespace)
                .map(|(_, rest)| rest.trim_start())
                .unwrap_or("");
            if line.is_empty() {
                continue;
            }
        }
        let insn = parser.insn(line)?;
        ssarepr.emit(insn);
    }
    Ok(ssarepr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Constant;

    fn i(n: u32) -> Register {
        Register::new(Kind::Int, n)
    }

    #[test]
    fn renders_ops_labels_and_results() {
        let mut ssa = SsaRepr::new("f");
        ssa.insns = vec![
            Insn::Label(Label::new("unused")),
            Insn::op(
                "goto_if_not_int_lt",
                vec![i(0).into(), Operand::Const(Constant::int(10)), Operand::Label(Label::new("blk3"))],
                None,
            ),
            Insn::Live(vec![Operand::Label(Label::new("blk3")), i(1).into(), i(0).into()]),
            Insn::op("int_add", vec![i(0).into(), i(1).into()], Some(i(2))),
            Insn::op("last_exception", vec![], Some(i(3))),
            Insn::op("int_return", vec![i(2).into()], None),
            Insn::Unreachable,
            Insn::Label(Label::new("blk3")),
            Insn::op("void_return", vec![], None),
            Insn::Unreachable,
        ];
        let expected = "\
goto_if_not_int_lt %i0, $10, L1
-live- %i0, %i1, L1
int_add %i0, %i1 -> %i2
last_exception -> %i3
int_return %i2
---
L1:
void_return
";
        assert_eq!(format_assembler(&ssa), expected);
    }

    #[test]
    fn live_registers_sort_by_kind_then_index() {
        let mut ssa = SsaRepr::new("f");
        ssa.insns = vec![
            Insn::Live(vec![
                Operand::Label(Label::new("exit")),
                i(10).into(),
                Register::new(Kind::Float, 0).into(),
                i(2).into(),
                Register::new(Kind::Ref, 11).into(),
                Register::new(Kind::Ref, 3).into(),
            ]),
            Insn::op("void_return", vec![], None),
            Insn::Label(Label::new("exit")),
            Insn::op("void_return", vec![], None),
        ];
        let rendered = format_assembler(&ssa);
        assert!(rendered.starts_with("-live- %i2, %i10, %r3, %r11, %f0, L1\n"), "rendered:\n{rendered}");
    }

    #[test]
    fn constants_of_every_kind() {
        assert_eq!(const_repr(&Constant::int(-4)), "$-4");
        assert_eq!(const_repr(&Constant::float(2.0)), "$2.0");
        assert_eq!(const_repr(&Constant::null()), "$NULL");
        assert_eq!(const_repr(&Constant::address("fn g")), "$<* fn g>");
        assert_eq!(const_repr(&Constant::gc_object("empty")), "$<gc empty>");
    }

    #[test]
    fn text_round_trips() {
        let text = "\
-live-
switch %i0, <SwitchDictDescr -1:L1, 7:L2>
residual_call_irf_f $<* fn h>, I[%i0, $300], R[$NULL, $<gc s>], F[$1.5, %f0], <CallDescr iirrff:f CanRaise> -> %f1
float_return %f1
---
L1:
-live-
inline_call_r_v <UnitDescr g>, R[%r0]
residual_call_r_v %i1, <IndirectCallTargets 0, 3>, R[], <CallDescr :v CanRaise>
L2:
int_copy $5 -> %i4
ref_push %r0
ref_pop -> %r1
";
        let ssa = unformat_assembler(text, "f").unwrap();
        assert_eq!(ssa.insns.len(), 13);
        assert_eq!(format_assembler(&ssa), text);
        let again = unformat_assembler(&format_assembler(&ssa), "f").unwrap();
        assert_eq!(format_assembler(&again), text);
    }

    #[test]
    fn same_descriptor_text_parses_to_one_token() {
        let ssa = unformat_assembler(
            "getfield_gc_i %r0, <FieldDescr P.x> -> %i0\ngetfield_gc_i %r1, <FieldDescr P.x> -> %i1\n",
            "f",
        )
        .unwrap();
        let descr_of = |insn: &Insn| match insn {
            Insn::Op { args, .. } => match &args[1] {
                Operand::Descr(d) => d.clone(),
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        };
        assert_eq!(descr_of(&ssa.insns[0]), descr_of(&ssa.insns[1]));
    }

    #[test]
    fn position_column_is_ignored() {
        let ssa = unformat_assembler("   0  int_return $1\n   2  ---\n", "f").unwrap();
        assert_eq!(
            ssa.insns,
            vec![
                Insn::op("int_return", vec![Operand::Const(Constant::int(1))], None),
                Insn::Unreachable,
            ]
        );
    }

    #[test]
    fn malformed_lines_report_their_number() {
        let err = unformat_assembler("int_return %i0\nint_add %x1 -> %i0\n", "f").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.line, Some(2));

        let err = unformat_assembler("int_copy %i0 -> %i1, %i2\n", "f").unwrap_err();
        assert_eq!(err.line, Some(1));

        let err = unformat_assembler("residual_call_r_v R[%i0]\n", "f").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }
}
