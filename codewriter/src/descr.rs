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

// Descriptors: opaque tokens the encoder only compares by identity.
//
// Two descriptors are the same entry in the descriptor table iff they are
// the same allocation. Switch tables are the one kind the backend looks
// into: it builds their label list and, once labels are resolved, attaches
// the value-to-offset map.

use crate::effect::EffectInfo;
use crate::ir::Type;
use crate::program::ProcId;
use crate::ssa::Label;
use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

#[derive(Debug)]
pub enum DescrKind {
    Call {
        args: Vec<Type>,
        result: Type,
        effect: EffectInfo,
    },
    Field {
        owner: String,
        name: String,
        ty: Type,
    },
    Size {
        name: String,
    },
    Array {
        item: Type,
    },
    Switch(SwitchDict),
    /// Reference to the compiled unit of `proc`, used by regular calls.
    Unit {
        proc: ProcId,
        name: String,
        calldescr: Descr,
    },
    /// Descriptor known only by its printed form (read back from text).
    Other(String),
}

#[derive(Clone)]
pub struct Descr(Rc<DescrKind>);

impl Descr {
    pub fn new(kind: DescrKind) -> Self {
        Descr(Rc::new(kind))
    }

    pub fn switch(labels: Vec<(i64, Label)>) -> Self {
        Descr::new(DescrKind::Switch(SwitchDict::new(labels)))
    }

    pub fn kind(&self) -> &DescrKind {
        &self.0
    }

    pub fn as_switch(&self) -> Option<&SwitchDict> {
        match &*self.0 {
            DescrKind::Switch(sd) => Some(sd),
            _ => None,
        }
    }

    pub fn effect(&self) -> Option<&EffectInfo> {
        match &*self.0 {
            DescrKind::Call { effect, .. } => Some(effect),
            _ => None,
        }
    }

    pub fn unit_proc(&self) -> Option<ProcId> {
        match &*self.0 {
            DescrKind::Unit { proc, .. } => Some(*proc),
            _ => None,
        }
    }
}

impl PartialEq for Descr {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Descr {}

impl Hash for Descr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for Descr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Descr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            DescrKind::Call {
                args,
                result,
                effect,
            } => {
                let codes: String = args.iter().map(|t| t.code()).collect();
                write!(
                    f,
                    "<CallDescr {}:{} {:?}>",
                    codes,
                    result.code(),
                    effect.extra_effect
                )
            }
            DescrKind::Field { owner, name, .. } => write!(f, "<FieldDescr {}.{}>", owner, name),
            DescrKind::Size { name } => write!(f, "<SizeDescr {}>", name),
            DescrKind::Array { item } => write!(f, "<ArrayDescr {:?}>", item),
            DescrKind::Switch(sd) => {
                let parts: Vec<String> = sd
                    .labels
                    .iter()
                    .map(|(v, l)| format!("{}:{}", v, l.0))
                    .collect();
                write!(f, "<SwitchDictDescr {}>", parts.join(", "))
            }
            DescrKind::Unit { name, .. } => write!(f, "<UnitDescr {}>", name),
            DescrKind::Other(text) => write!(f, "<{}>", text),
        }
    }
}

/// Dispatch table of an integer switch.
#[derive(Debug)]
pub struct SwitchDict {
    /// Cases in emission order.
    pub labels: Vec<(i64, Label)>,
    offsets: OnceCell<BTreeMap<i64, usize>>,
}

impl SwitchDict {
    pub fn new(labels: Vec<(i64, Label)>) -> Self {
        Self {
            labels,
            offsets: OnceCell::new(),
        }
    }

    /// Attaches the resolved `value -> byte offset` map. Returns false if a
    /// map was already attached.
    pub fn attach(&self, offsets: BTreeMap<i64, usize>) -> bool {
        self.offsets.set(offsets).is_ok()
    }

    pub fn offsets(&self) -> Option<&BTreeMap<i64, usize>> {
        self.offsets.get()
    }

    pub fn target(&self, value: i64) -> Option<usize> {
        self.offsets.get().and_then(|m| m.get(&value).copied())
    }
}

/// Builds descriptors for the backend. The default implementation caches so
/// that equal requests yield the identical token.
pub trait DescrFactory {
    fn calldescr(&mut self, args: &[Type], result: Type, effect: EffectInfo) -> Descr;
    fn fielddescr(&mut self, owner: &str, name: &str, ty: Type) -> Descr;
    fn sizedescr(&mut self, name: &str) -> Descr;
    fn arraydescr(&mut self, item: Type) -> Descr;
}

#[derive(Default)]
pub struct DescrCache {
    calls: HashMap<(Vec<Type>, Type, EffectInfo), Descr>,
    fields: HashMap<(String, String), Descr>,
    sizes: HashMap<String, Descr>,
    arrays: HashMap<Type, Descr>,
}

impl DescrCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.calls.len() + self.fields.len() + self.sizes.len() + self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DescrFactory for DescrCache {
    fn calldescr(&mut self, args: &[Type], result: Type, effect: EffectInfo) -> Descr {
        let key = (args.to_vec(), result, effect);
        if let Some(d) = self.calls.get(&key) {
            return d.clone();
        }
        let d = Descr::new(DescrKind::Call {
            args: key.0.clone(),
            result,
            effect: key.2.clone(),
        });
        self.calls.insert(key, d.clone());
        d
    }

    fn fielddescr(&mut self, owner: &str, name: &str, ty: Type) -> Descr {
        self.fields
            .entry((owner.to_string(), name.to_string()))
            .or_insert_with(|| {
                Descr::new(DescrKind::Field {
                    owner: owner.to_string(),
                    name: name.to_string(),
                    ty,
                })
            })
            .clone()
    }

    fn sizedescr(&mut self, name: &str) -> Descr {
        self.sizes
            .entry(name.to_string())
            .or_insert_with(|| Descr::new(DescrKind::Size { name: name.to_string() }))
            .clone()
    }

    fn arraydescr(&mut self, item: Type) -> Descr {
        self.arrays
            .entry(item)
            .or_insert_with(|| Descr::new(DescrKind::Array { item }))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{EffectInfo, ExtraEffect};

    #[test]
    fn identity_not_structure_decides_equality() {
        let a = Descr::new(DescrKind::Size { name: "S".into() });
        let b = Descr::new(DescrKind::Size { name: "S".into() });
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn cache_returns_the_same_token_for_equal_requests() {
        let mut c = DescrCache::new();
        let f1 = c.fielddescr("Point", "x", Type::Signed);
        let f2 = c.fielddescr("Point", "x", Type::Signed);
        let f3 = c.fielddescr("Point", "y", Type::Signed);
        assert_eq!(f1, f2);
        assert_ne!(f1, f3);
        assert_eq!(c.sizedescr("Point"), c.sizedescr("Point"));
        assert_eq!(c.arraydescr(Type::Float), c.arraydescr(Type::Float));

        let e = EffectInfo::new(ExtraEffect::CannotRaise);
        let d1 = c.calldescr(&[Type::Signed], Type::Signed, e.clone());
        let d2 = c.calldescr(&[Type::Signed], Type::Signed, e);
        let d3 = c.calldescr(&[Type::Signed], Type::Signed, EffectInfo::most_general());
        assert_eq!(d1, d2);
        assert_ne!(d1, d3);
        assert_eq!(c.len(), 6);
        assert_eq!(d1.to_string(), "<CallDescr i:i CannotRaise>");
    }

    #[test]
    fn switch_map_attaches_once() {
        let d = Descr::switch(vec![(1, Label::new("a")), (5, Label::new("b"))]);
        let sd = d.as_switch().unwrap();
        assert!(sd.offsets().is_none());
        assert!(sd.attach(BTreeMap::from([(1, 10), (5, 20)])));
        assert!(!sd.attach(BTreeMap::new()));
        assert_eq!(sd.target(5), Some(20));
        assert_eq!(sd.target(7), None);
    }
}
