//! Script values and the handles that name them

use std::sync::Arc;

use num_bigint::BigInt;
use otter_jsvm_gc::HeapId;

/// A script value as stored inside an Env
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum JsValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    BigInt(Arc<BigInt>),
    Symbol(HeapId),
    Object(HeapId),
}

impl JsValue {
    pub(crate) fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// Heap cell this value keeps alive, if any
    #[inline]
    pub(crate) fn heap_id(&self) -> Option<HeapId> {
        match self {
            Self::Symbol(id) | Self::Object(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn as_object(&self) -> Option<HeapId> {
        match self {
            Self::Object(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    #[inline]
    pub(crate) fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for JsValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for JsValue {
    fn from(n: i32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u32> for JsValue {
    fn from(n: u32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<BigInt> for JsValue {
    fn from(n: BigInt) -> Self {
        Self::BigInt(Arc::new(n))
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

/// Handle to a value, valid while the handle scope that created it is open
///
/// Handles are plain indices. Using one after its scope closed, or with a
/// different Env, is rejected with `InvalidArg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    pub(crate) arena: u32,
    pub(crate) index: u32,
    pub(crate) serial: u32,
}

/// Result of `typeof` as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean,
    /// Number
    Number,
    /// String
    String,
    /// Symbol
    Symbol,
    /// Object
    Object,
    /// Function
    Function,
    /// External native data
    External,
    /// BigInt
    Bigint,
}
