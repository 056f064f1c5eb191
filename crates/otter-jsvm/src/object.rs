//! Heap cells: objects and symbols

use std::sync::Arc;

use indexmap::IndexMap;
use otter_jsvm_gc::{GcTraceable, HeapId};

use crate::buffer::{ArrayBufferData, DataViewData, TypedArrayData};
use crate::callback::{Callback, CallbackData, Finalizer, NativeData};
use crate::promise::PromiseData;
use crate::property::PropertyAttributes;
use crate::value::JsValue;
use crate::wrap::TypeTag;

/// Property key (string or symbol)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PropertyKey {
    String(Arc<str>),
    Symbol(HeapId),
}

impl PropertyKey {
    pub(crate) fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// Array index named by this key, if it is a canonical one
    pub(crate) fn as_index(&self) -> Option<u32> {
        match self {
            Self::String(s) => array_index(s),
            Self::Symbol(_) => None,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<u32> for PropertyKey {
    fn from(index: u32) -> Self {
        Self::String(Arc::from(index.to_string()))
    }
}

impl From<f64> for PropertyKey {
    /// Key of an integer index, which may lie past the array index range
    fn from(index: f64) -> Self {
        Self::String(Arc::from(crate::ops::number_to_string(index)))
    }
}

/// Parse a canonical array index (`"0"`, `"17"`, never `"01"`)
pub(crate) fn array_index(s: &str) -> Option<u32> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>().ok().filter(|&i| i != u32::MAX)
}

/// An own property
#[derive(Debug, Clone)]
pub(crate) enum PropertySlot {
    Data {
        value: JsValue,
        attributes: PropertyAttributes,
    },
    Accessor {
        getter: Option<HeapId>,
        setter: Option<HeapId>,
        attributes: PropertyAttributes,
    },
}

impl PropertySlot {
    pub(crate) fn data(value: JsValue) -> Self {
        Self::Data {
            value,
            attributes: PropertyAttributes::DEFAULT_JSPROPERTY,
        }
    }

    pub(crate) fn attributes(&self) -> PropertyAttributes {
        match self {
            Self::Data { attributes, .. } | Self::Accessor { attributes, .. } => *attributes,
        }
    }

    pub(crate) fn set_attributes(&mut self, attrs: PropertyAttributes) {
        match self {
            Self::Data { attributes, .. } | Self::Accessor { attributes, .. } => *attributes = attrs,
        }
    }

    fn trace(&self, tracer: &mut dyn FnMut(HeapId)) {
        match self {
            Self::Data { value, .. } => {
                if let Some(id) = value.heap_id() {
                    tracer(id);
                }
            }
            Self::Accessor { getter, setter, .. } => {
                getter.iter().chain(setter.iter()).for_each(|id| tracer(*id));
            }
        }
    }
}

/// Native function payload
#[derive(Clone)]
pub(crate) struct FunctionData {
    pub callback: Callback,
    pub data: Option<CallbackData>,
    pub name: Arc<str>,
}

/// Object kinds with engine-visible behavior
pub(crate) enum ObjectKind {
    Ordinary,
    Array { length: u32 },
    Function(FunctionData),
    Error,
    External,
    Promise(PromiseData),
    /// Object wrapper produced by `coerce_to_object` for a primitive
    Primitive(JsValue),
    ArrayBuffer(ArrayBufferData),
    TypedArray(TypedArrayData),
    DataView(DataViewData),
    /// Time value in milliseconds since the epoch, NaN when invalid
    Date(f64),
}

/// Side table of native state attached to an object
#[derive(Default)]
pub(crate) struct NativeSlots {
    pub wrap: Option<(NativeData, Option<Finalizer>)>,
    pub external: Option<(NativeData, Option<Finalizer>)>,
    pub type_tag: Option<TypeTag>,
    pub finalizers: Vec<(NativeData, Finalizer)>,
}

impl NativeSlots {
    fn is_empty(&self) -> bool {
        self.wrap.is_none()
            && self.external.is_none()
            && self.type_tag.is_none()
            && self.finalizers.is_empty()
    }
}

/// A script object
pub(crate) struct JsObject {
    pub kind: ObjectKind,
    pub prototype: Option<HeapId>,
    pub properties: IndexMap<PropertyKey, PropertySlot>,
    pub extensible: bool,
    pub native: Option<Box<NativeSlots>>,
}

impl JsObject {
    pub(crate) fn new(kind: ObjectKind, prototype: Option<HeapId>) -> Self {
        Self {
            kind,
            prototype,
            properties: IndexMap::new(),
            extensible: true,
            native: None,
        }
    }

    pub(crate) fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_))
    }

    pub(crate) fn function(&self) -> Option<&FunctionData> {
        match &self.kind {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn native_mut(&mut self) -> &mut NativeSlots {
        self.native.get_or_insert_with(Default::default)
    }

    /// Drop the side table once nothing is left in it
    pub(crate) fn trim_native(&mut self) {
        if self.native.as_ref().is_some_and(|n| n.is_empty()) {
            self.native = None;
        }
    }

    /// Own keys in property order: array indices ascending, then the rest
    /// in insertion order
    pub(crate) fn own_keys(&self) -> Vec<PropertyKey> {
        let mut indices: Vec<(u32, &PropertyKey)> = self
            .properties
            .keys()
            .filter_map(|k| k.as_index().map(|i| (i, k)))
            .collect();
        indices.sort_by_key(|(i, _)| *i);

        let mut keys: Vec<PropertyKey> = indices.into_iter().map(|(_, k)| k.clone()).collect();
        keys.extend(
            self.properties
                .keys()
                .filter(|k| k.as_index().is_none() && matches!(k, PropertyKey::String(_)))
                .cloned(),
        );
        keys.extend(
            self.properties
                .keys()
                .filter(|k| matches!(k, PropertyKey::Symbol(_)))
                .cloned(),
        );
        keys
    }
}

/// A symbol
pub(crate) struct SymbolData {
    pub description: Option<Arc<str>>,
}

/// Everything the Env heap stores
pub(crate) enum HeapCell {
    Object(JsObject),
    Symbol(SymbolData),
}

impl HeapCell {
    pub(crate) fn as_object(&self) -> Option<&JsObject> {
        match self {
            Self::Object(obj) => Some(obj),
            Self::Symbol(_) => None,
        }
    }

    pub(crate) fn as_object_mut(&mut self) -> Option<&mut JsObject> {
        match self {
            Self::Object(obj) => Some(obj),
            Self::Symbol(_) => None,
        }
    }
}

impl GcTraceable for HeapCell {
    const NEEDS_TRACE: bool = true;

    fn trace(&self, tracer: &mut dyn FnMut(HeapId)) {
        let Self::Object(obj) = self else {
            return;
        };
        if let Some(proto) = obj.prototype {
            tracer(proto);
        }
        for (key, slot) in &obj.properties {
            if let PropertyKey::Symbol(id) = key {
                tracer(*id);
            }
            slot.trace(tracer);
        }
        match &obj.kind {
            ObjectKind::Promise(promise) => promise.trace(tracer),
            ObjectKind::Primitive(value) => {
                if let Some(id) = value.heap_id() {
                    tracer(id);
                }
            }
            ObjectKind::TypedArray(view) => tracer(view.buffer),
            ObjectKind::DataView(view) => tracer(view.buffer),
            _ => {}
        }
    }

    fn heap_size(&self) -> usize {
        match self {
            Self::Object(obj) => {
                let strings: usize = obj
                    .properties
                    .iter()
                    .map(|(key, slot)| {
                        let key_len = match key {
                            PropertyKey::String(s) => s.len(),
                            PropertyKey::Symbol(_) => 0,
                        };
                        let value_len = match slot {
                            PropertySlot::Data {
                                value: JsValue::String(s),
                                ..
                            } => s.len(),
                            _ => 0,
                        };
                        key_len + value_len
                    })
                    .sum();
                let bytes = match &obj.kind {
                    ObjectKind::ArrayBuffer(buffer) => buffer.byte_length(),
                    _ => 0,
                };
                std::mem::size_of::<JsObject>() + obj.properties.len() * 64 + strings + bytes
            }
            Self::Symbol(sym) => {
                std::mem::size_of::<SymbolData>()
                    + sym.description.as_ref().map_or(0, |d| d.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_index() {
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("42"), Some(42));
        assert_eq!(array_index("01"), None);
        assert_eq!(array_index("-1"), None);
        assert_eq!(array_index("1.5"), None);
        assert_eq!(array_index(""), None);
        assert_eq!(array_index("4294967295"), None);
    }

    #[test]
    fn test_own_keys_order() {
        let mut obj = JsObject::new(ObjectKind::Ordinary, None);
        for key in ["b", "2", "a", "0"] {
            obj.properties
                .insert(PropertyKey::from(key), PropertySlot::data(JsValue::Null));
        }
        let keys: Vec<String> = obj
            .own_keys()
            .into_iter()
            .map(|k| match k {
                PropertyKey::String(s) => s.to_string(),
                PropertyKey::Symbol(_) => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec!["0", "2", "b", "a"]);
    }
}
