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

use crate::descr::Descr;
use crate::error::{BuildError, ErrorKind, Result};
use std::collections::{HashMap, HashSet};

/// Opcodes whose small integer constants are encoded inline (argcode `c`)
/// rather than through the constant pool.
pub const USE_C_FORM: &[&str] = &[
    "copystrcontent",
    "getarrayitem_gc_pure_i",
    "getarrayitem_gc_pure_r",
    "getarrayitem_gc_i",
    "getarrayitem_gc_r",
    "goto_if_not_int_eq",
    "goto_if_not_int_ge",
    "goto_if_not_int_gt",
    "goto_if_not_int_le",
    "goto_if_not_int_lt",
    "goto_if_not_int_ne",
    "int_add",
    "int_and",
    "int_copy",
    "int_eq",
    "int_ge",
    "int_gt",
    "int_le",
    "int_lt",
    "int_ne",
    "int_return",
    "int_sub",
    "jit_merge_point",
    "new_array",
    "new_array_clear",
    "newstr",
    "setarrayitem_gc_i",
    "setarrayitem_gc_r",
    "setfield_gc_i",
    "strgetitem",
    "strsetitem",
];

pub const MAX_OPCODES: usize = 256;
pub const MAX_DESCRS: usize = 0x10000;

/// Interns `name/argcodes` keys into the one-byte opcode space.
#[derive(Debug, Default)]
pub struct OpcodeTable {
    index: HashMap<String, u8>,
    keys: Vec<String>,
}

impl OpcodeTable {
    pub fn intern(&mut self, key: &str) -> Result<u8> {
        if let Some(&num) = self.index.get(key) {
            return Ok(num);
        }
        if self.keys.len() >= MAX_OPCODES {
            return Err(BuildError::new(
                ErrorKind::Encoding,
                format!(
                    "too many distinct opcode signatures (max {}) while adding '{}'",
                    MAX_OPCODES, key
                ),
            ));
        }
        let num = self.keys.len() as u8;
        self.keys.push(key.to_string());
        self.index.insert(key.to_string(), num);
        Ok(num)
    }

    pub fn get(&self, key: &str) -> Option<u8> {
        self.index.get(key).copied()
    }

    pub fn key(&self, num: u8) -> Option<&str> {
        self.keys.get(num as usize).map(String::as_str)
    }

    /// Keys in opcode order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Descriptor list of one unit; descriptors are referenced from code by
/// their 16-bit position here.
#[derive(Debug, Default)]
pub struct DescrTable {
    index: HashMap<Descr, u16>,
    list: Vec<Descr>,
}

impl DescrTable {
    pub fn intern(&mut self, d: &Descr) -> Result<u16> {
        if let Some(&num) = self.index.get(d) {
            return Ok(num);
        }
        if self.list.len() >= MAX_DESCRS {
            return Err(BuildError::new(
                ErrorKind::Encoding,
                format!("too many descriptors (max {}) while adding {}", MAX_DESCRS, d),
            ));
        }
        let num = self.list.len() as u16;
        self.list.push(d.clone());
        self.index.insert(d.clone(), num);
        Ok(num)
    }

    pub fn get(&self, num: u16) -> Option<&Descr> {
        self.list.get(num as usize)
    }

    pub fn as_slice(&self) -> &[Descr] {
        &self.list
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn into_vec(self) -> Vec<Descr> {
        self.list
    }
}

/// Every distinct descriptor met during a build, in first-use order.
#[derive(Debug, Default)]
pub struct DescrSet {
    seen: HashSet<Descr>,
    list: Vec<Descr>,
}

impl DescrSet {
    /// Returns true if `d` was not seen before.
    pub fn insert(&mut self, d: &Descr) -> bool {
        if !self.seen.insert(d.clone()) {
            return false;
        }
        self.list.push(d.clone());
        true
    }

    pub fn contains(&self, d: &Descr) -> bool {
        self.seen.contains(d)
    }

    pub fn as_slice(&self) -> &[Descr] {
        &self.list
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descr::DescrKind;

    #[test]
    fn opcode_space_holds_256_keys() {
        let mut t = OpcodeTable::default();
        for n in 0..MAX_OPCODES {
            assert_eq!(t.intern(&format!("op{}/i", n)).unwrap() as usize, n);
        }
        assert_eq!(t.intern("op7/i").unwrap(), 7);
        let err = t.intern("one_too_many/").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Encoding);
        assert!(err.message.contains("one_too_many/"));
        assert_eq!(t.key(255), Some("op255/i"));
    }

    #[test]
    fn descriptors_dedup_by_identity() {
        let mut t = DescrTable::default();
        let a = Descr::new(DescrKind::Other("a".into()));
        let b = Descr::new(DescrKind::Other("a".into()));
        assert_eq!(t.intern(&a).unwrap(), 0);
        assert_eq!(t.intern(&b).unwrap(), 1);
        assert_eq!(t.intern(&a).unwrap(), 0);
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(1), Some(&b));
    }

    #[test]
    fn descriptor_space_holds_65536_entries() {
        let mut t = DescrTable::default();
        for n in 0..MAX_DESCRS {
            let d = Descr::new(DescrKind::Size { name: format!("S{}", n) });
            assert_eq!(t.intern(&d).unwrap() as usize, n);
        }
        let first = t.get(0).cloned().unwrap();
        assert_eq!(t.intern(&first).unwrap(), 0);
        assert_eq!(t.len(), MAX_DESCRS);

        let extra = Descr::new(DescrKind::Size { name: "extra".into() });
        let err = t.intern(&extra).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Encoding);
        assert!(err.message.contains("<SizeDescr extra>"), "message: {}", err.message);
        assert_eq!(t.len(), MAX_DESCRS);
    }

    #[test]
    fn descriptor_set_keeps_first_use_order() {
        let mut set = DescrSet::default();
        let a = Descr::new(DescrKind::Other("a".into()));
        let b = Descr::new(DescrKind::Other("b".into()));
        assert!(set.insert(&b));
        assert!(set.insert(&a));
        assert!(!set.insert(&b));
        assert_eq!(set.as_slice(), &[b.clone(), a.clone()]);
        assert!(set.contains(&a));
    }
}
