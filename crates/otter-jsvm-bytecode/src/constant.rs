//! Interned literals referenced by instructions

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A literal loaded by `LoadConst` or used as a property name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constant {
    /// Number, kept bit-exact so `-0` survives a code cache
    Number(f64),
    /// String, also used for identifier and property names
    String(Box<str>),
}

impl Constant {
    /// The number, if this is one
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(_) => None,
        }
    }

    /// The string, if this is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    fn key(&self) -> InternKey {
        match self {
            Self::Number(n) => InternKey::Number(n.to_bits()),
            Self::String(s) => InternKey::String(s.clone()),
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InternKey {
    Number(u64),
    String(Box<str>),
}

/// Literals of one program, each stored once
///
/// Only the index list is serialized; the intern map is rebuilt lazily on
/// the first insertion after a decode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    #[serde(skip)]
    interned: HashMap<InternKey, u32>,
}

impl ConstantPool {
    /// Empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `constant`, inserting it when new
    pub fn intern(&mut self, constant: Constant) -> u32 {
        if self.interned.len() != self.constants.len() {
            self.interned = self
                .constants
                .iter()
                .enumerate()
                .map(|(index, c)| (c.key(), index as u32))
                .collect();
        }
        let next = self.constants.len() as u32;
        let index = *self.interned.entry(constant.key()).or_insert(next);
        if index == next {
            self.constants.push(constant);
        }
        index
    }

    /// Intern a number
    pub fn add_number(&mut self, n: f64) -> u32 {
        self.intern(Constant::Number(n))
    }

    /// Intern a string
    pub fn add_string(&mut self, s: &str) -> u32 {
        self.intern(Constant::String(s.into()))
    }

    /// Constant at `index`
    #[inline]
    pub fn get(&self, index: u32) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Number of distinct constants
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// Whether nothing was interned
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}
