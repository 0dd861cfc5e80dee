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

// Effect descriptors for calls, and the analysis interface they are built
// from.

use crate::descr::{Descr, DescrFactory};
use crate::ir::{Callee, SpaceOp, Type};
use crate::program::ProcId;
use std::collections::HashMap;

/// Strength of a call's side effects, weakest first. The order matters:
/// predicates below compare levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtraEffect {
    ElidableCannotRaise,
    LoopInvariant,
    CannotRaise,
    ElidableOrMemoryError,
    ElidableCanRaise,
    CanRaise,
    ForcesVirtualOrVirtualizable,
    RandomEffects,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EffectInfo {
    pub extra_effect: ExtraEffect,
    /// Fields read but not written; `None` when unbounded.
    pub readonly_fields: Option<Vec<Descr>>,
    pub write_fields: Option<Vec<Descr>>,
    pub write_arrays: Option<Vec<Descr>>,
    pub can_invalidate: bool,
    /// Builtin implemented by the callee, for builtin calls.
    pub oopspec: Option<String>,
}

impl EffectInfo {
    /// Effect with empty read/write sets.
    pub fn new(extra_effect: ExtraEffect) -> Self {
        Self {
            extra_effect,
            readonly_fields: Some(Vec::new()),
            write_fields: Some(Vec::new()),
            write_arrays: Some(Vec::new()),
            can_invalidate: false,
            oopspec: None,
        }
    }

    /// What must be assumed about a call nothing is known of.
    pub fn most_general() -> Self {
        Self {
            extra_effect: ExtraEffect::RandomEffects,
            readonly_fields: None,
            write_fields: None,
            write_arrays: None,
            can_invalidate: true,
            oopspec: None,
        }
    }

    pub fn can_raise(&self, ignore_memory_error: bool) -> bool {
        if ignore_memory_error {
            self.extra_effect > ExtraEffect::ElidableOrMemoryError
        } else {
            self.extra_effect > ExtraEffect::CannotRaise
        }
    }

    pub fn is_elidable(&self) -> bool {
        matches!(
            self.extra_effect,
            ExtraEffect::ElidableCannotRaise
                | ExtraEffect::ElidableOrMemoryError
                | ExtraEffect::ElidableCanRaise
        )
    }

    pub fn is_loop_invariant(&self) -> bool {
        self.extra_effect == ExtraEffect::LoopInvariant
    }

    pub fn forces_virtual(&self) -> bool {
        self.extra_effect >= ExtraEffect::ForcesVirtualOrVirtualizable
    }

    pub fn has_random_effects(&self) -> bool {
        self.extra_effect == ExtraEffect::RandomEffects
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RaiseEffect {
    No,
    Yes,
    /// Can only fail by running out of memory.
    MemoryErrorOnly,
}

impl RaiseEffect {
    fn join(self, other: RaiseEffect) -> RaiseEffect {
        match (self, other) {
            (RaiseEffect::Yes, _) | (_, RaiseEffect::Yes) => RaiseEffect::Yes,
            (RaiseEffect::MemoryErrorOnly, _) | (_, RaiseEffect::MemoryErrorOnly) => {
                RaiseEffect::MemoryErrorOnly
            }
            _ => RaiseEffect::No,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub ty: Type,
}

impl FieldRef {
    pub fn new(owner: &str, name: &str, ty: Type) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            ty,
        }
    }
}

/// Memory a call may touch.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum AccessSummary {
    /// Anything at all.
    #[default]
    Unbounded,
    Bounded {
        reads: Vec<FieldRef>,
        writes: Vec<FieldRef>,
        array_writes: Vec<Type>,
    },
}

impl AccessSummary {
    pub fn none() -> Self {
        AccessSummary::Bounded {
            reads: Vec::new(),
            writes: Vec::new(),
            array_writes: Vec::new(),
        }
    }

    fn union(self, other: AccessSummary) -> AccessSummary {
        match (self, other) {
            (
                AccessSummary::Bounded {
                    mut reads,
                    mut writes,
                    mut array_writes,
                },
                AccessSummary::Bounded {
                    reads: r2,
                    writes: w2,
                    array_writes: a2,
                },
            ) => {
                extend_unique(&mut reads, r2);
                extend_unique(&mut writes, w2);
                extend_unique(&mut array_writes, a2);
                AccessSummary::Bounded {
                    reads,
                    writes,
                    array_writes,
                }
            }
            _ => AccessSummary::Unbounded,
        }
    }
}

fn extend_unique<T: PartialEq>(dst: &mut Vec<T>, src: Vec<T>) {
    for item in src {
        if !dst.contains(&item) {
            dst.push(item);
        }
    }
}

/// A call being classified.
#[derive(Clone, Copy, Debug)]
pub struct CallSite<'a> {
    pub caller: ProcId,
    pub op: &'a SpaceOp,
    pub callee: &'a Callee,
}

/// Whole-program analyses answering questions about one call site.
pub trait EffectAnalyzer {
    fn can_raise(&self, site: &CallSite<'_>) -> RaiseEffect;
    fn access(&self, site: &CallSite<'_>) -> AccessSummary;
    fn forces_virtualizable(&self, site: &CallSite<'_>) -> bool;
    fn can_invalidate(&self, site: &CallSite<'_>) -> bool;
    fn random_effects(&self, site: &CallSite<'_>) -> bool;
}

/// Per-procedure facts, as computed by an analysis run upstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcEffects {
    pub raises: RaiseEffect,
    pub access: AccessSummary,
    pub forces: bool,
    pub invalidates: bool,
    pub random: bool,
}

impl Default for ProcEffects {
    fn default() -> Self {
        Self {
            raises: RaiseEffect::Yes,
            access: AccessSummary::none(),
            forces: false,
            invalidates: false,
            random: false,
        }
    }
}

impl ProcEffects {
    pub fn pure() -> Self {
        Self {
            raises: RaiseEffect::No,
            ..Self::default()
        }
    }

    fn join(&self, other: &ProcEffects) -> ProcEffects {
        ProcEffects {
            raises: self.raises.join(other.raises),
            access: self.access.clone().union(other.access.clone()),
            forces: self.forces || other.forces,
            invalidates: self.invalidates || other.invalidates,
            random: self.random || other.random,
        }
    }

    fn unknown() -> Self {
        Self {
            raises: RaiseEffect::Yes,
            access: AccessSummary::Unbounded,
            forces: true,
            invalidates: true,
            random: true,
        }
    }
}

/// Effect oracle backed by a table of per-procedure facts. Procedures
/// missing from the table get `default`. An indirect call joins the facts
/// of all its targets; with unknown targets it has random effects.
#[derive(Clone, Debug, Default)]
pub struct TableAnalyzer {
    pub by_proc: HashMap<ProcId, ProcEffects>,
    pub default: ProcEffects,
}

impl TableAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, proc: ProcId, effects: ProcEffects) {
        self.by_proc.insert(proc, effects);
    }

    fn facts(&self, site: &CallSite<'_>) -> ProcEffects {
        let lookup = |p: &ProcId| self.by_proc.get(p).unwrap_or(&self.default).clone();
        match site.callee {
            Callee::Direct(p) => lookup(p),
            Callee::Indirect { targets: None, .. } => ProcEffects::unknown(),
            Callee::Indirect {
                targets: Some(ts), ..
            } => {
                let mut it = ts.iter();
                match it.next() {
                    None => ProcEffects::unknown(),
                    Some(first) => it.fold(lookup(first), |acc, p| acc.join(&lookup(p))),
                }
            }
        }
    }
}

impl EffectAnalyzer for TableAnalyzer {
    fn can_raise(&self, site: &CallSite<'_>) -> RaiseEffect {
        self.facts(site).raises
    }

    fn access(&self, site: &CallSite<'_>) -> AccessSummary {
        self.facts(site).access
    }

    fn forces_virtualizable(&self, site: &CallSite<'_>) -> bool {
        self.facts(site).forces
    }

    fn can_invalidate(&self, site: &CallSite<'_>) -> bool {
        self.facts(site).invalidates
    }

    fn random_effects(&self, site: &CallSite<'_>) -> bool {
        self.facts(site).random
    }
}

/// Turns an access summary into an `EffectInfo`, asking `factory` for the
/// field and array descriptors. An unbounded summary, or `RandomEffects`,
/// gives the most general effect.
pub fn effectinfo_from_access(
    access: &AccessSummary,
    factory: &mut dyn DescrFactory,
    extra_effect: ExtraEffect,
    oopspec: Option<String>,
    can_invalidate: bool,
) -> EffectInfo {
    let (reads, writes, array_writes) = match access {
        AccessSummary::Bounded {
            reads,
            writes,
            array_writes,
        } if extra_effect != ExtraEffect::RandomEffects => (reads, writes, array_writes),
        _ => {
            return EffectInfo {
                oopspec,
                ..EffectInfo::most_general()
            }
        }
    };

    let mut write_fields = Vec::new();
    for f in writes.iter().filter(|f| f.ty != Type::Void) {
        let d = factory.fielddescr(&f.owner, &f.name, f.ty);
        if !write_fields.contains(&d) {
            write_fields.push(d);
        }
    }
    let mut readonly_fields = Vec::new();
    for f in reads.iter().filter(|f| f.ty != Type::Void && !writes.contains(f)) {
        let d = factory.fielddescr(&f.owner, &f.name, f.ty);
        if !readonly_fields.contains(&d) {
            readonly_fields.push(d);
        }
    }
    let mut write_arrays = Vec::new();
    for ty in array_writes.iter().filter(|t| **t != Type::Void) {
        let d = factory.arraydescr(*ty);
        if !write_arrays.contains(&d) {
            write_arrays.push(d);
        }
    }

    EffectInfo {
        extra_effect,
        readonly_fields: Some(readonly_fields),
        write_fields: Some(write_fields),
        write_arrays: Some(write_arrays),
        can_invalidate,
        oopspec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descr::DescrCache;
    use crate::ir::OpArg;
    use crate::program::FuncSig;

    #[test]
    fn levels_drive_predicates() {
        assert!(!EffectInfo::new(ExtraEffect::CannotRaise).can_raise(false));
        assert!(EffectInfo::new(ExtraEffect::ElidableOrMemoryError).can_raise(false));
        assert!(!EffectInfo::new(ExtraEffect::ElidableOrMemoryError).can_raise(true));
        assert!(EffectInfo::new(ExtraEffect::ElidableCanRaise).is_elidable());
        assert!(!EffectInfo::new(ExtraEffect::LoopInvariant).is_elidable());
        assert!(EffectInfo::new(ExtraEffect::LoopInvariant).is_loop_invariant());
        assert!(EffectInfo::most_general().forces_virtual());
        assert!(EffectInfo::most_general().has_random_effects());
        assert!(!EffectInfo::new(ExtraEffect::CanRaise).forces_virtual());
    }

    #[test]
    fn unbounded_access_collapses_to_random_effects() {
        let mut f = DescrCache::new();
        let e = effectinfo_from_access(
            &AccessSummary::Unbounded,
            &mut f,
            ExtraEffect::CannotRaise,
            None,
            false,
        );
        assert_eq!(e.extra_effect, ExtraEffect::RandomEffects);
        assert!(e.can_invalidate);
        assert!(e.write_fields.is_none());
    }

    #[test]
    fn bounded_access_becomes_descriptor_sets() {
        let mut f = DescrCache::new();
        let x = FieldRef::new("Point", "x", Type::Signed);
        let y = FieldRef::new("Point", "y", Type::Signed);
        let access = AccessSummary::Bounded {
            reads: vec![x.clone(), y.clone(), FieldRef::new("Point", "tag", Type::Void)],
            writes: vec![x],
            array_writes: vec![Type::GcRef],
        };
        let e = effectinfo_from_access(&access, &mut f, ExtraEffect::CanRaise, None, false);
        let px = f.fielddescr("Point", "x", Type::Signed);
        let py = f.fielddescr("Point", "y", Type::Signed);
        assert_eq!(e.write_fields, Some(vec![px]));
        assert_eq!(e.readonly_fields, Some(vec![py]));
        assert_eq!(e.write_arrays, Some(vec![f.arraydescr(Type::GcRef)]));
    }

    #[test]
    fn indirect_calls_join_their_targets() {
        let mut a = TableAnalyzer::new();
        a.set(ProcId(0), ProcEffects::pure());
        a.set(
            ProcId(1),
            ProcEffects {
                raises: RaiseEffect::MemoryErrorOnly,
                ..ProcEffects::pure()
            },
        );
        let callee = Callee::Indirect {
            sig: FuncSig::new(vec![], Type::Void),
            targets: Some(vec![ProcId(0), ProcId(1)]),
        };
        let op = SpaceOp::new("indirect_call", vec![OpArg::Callee(callee.clone())], None);
        let site = CallSite {
            caller: ProcId(7),
            op: &op,
            callee: &callee,
        };
        assert_eq!(a.can_raise(&site), RaiseEffect::MemoryErrorOnly);
        assert!(!a.random_effects(&site));

        let unknown = Callee::Indirect {
            sig: FuncSig::new(vec![], Type::Void),
            targets: None,
        };
        let site = CallSite {
            caller: ProcId(7),
            op: &op,
            callee: &unknown,
        };
        assert!(a.random_effects(&site));
        assert_eq!(a.access(&site), AccessSummary::Unbounded);
    }
}
