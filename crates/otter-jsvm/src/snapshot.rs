//! Startup snapshots
//!
//! A snapshot records, for each captured Env, the global properties that
//! were not installed by the engine, as a graph of plain objects, arrays,
//! errors and native functions. Engine-provided objects are recorded by name
//! and looked up again in the restoring Env; native functions are recorded
//! as an index into the VM's external-reference table.
//!
//! Blob layout: magic, format version and payload length, followed by the
//! JSON payload.

use std::sync::Arc;

use otter_jsvm_gc::HeapId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::callback::Callback;
use crate::env::Env;
use crate::exception::{Abrupt, Completion};
use crate::object::{FunctionData, ObjectKind, PropertyKey, PropertySlot};
use crate::property::PropertyAttributes;
use crate::status::{JsvmResult, Status};
use crate::value::JsValue;

/// Magic bytes that open every snapshot blob
pub const SNAPSHOT_MAGIC: [u8; 8] = *b"OTJSVMS\0";

/// Current snapshot format version
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 16;

/// Decoded snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SnapshotBlob {
    pub contexts: Vec<ContextSnapshot>,
}

/// Global state of one Env
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ContextSnapshot {
    pub globals: Vec<SnapProperty>,
    pub nodes: Vec<SnapNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SnapValue {
    Undefined,
    Null,
    Bool(bool),
    /// Bit pattern, so NaN and -0 survive the JSON payload
    Number(u64),
    String(String),
    Node(usize),
    Builtin(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum NodeKind {
    Ordinary,
    Array { length: u32 },
    Error,
    Function { reference: usize, name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SnapNode {
    pub kind: NodeKind,
    pub prototype: Option<SnapValue>,
    pub extensible: bool,
    pub properties: Vec<SnapProperty>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SnapProperty {
    pub key: String,
    pub slot: SnapSlot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SnapSlot {
    Data {
        value: SnapValue,
        attributes: u32,
    },
    Accessor {
        getter: Option<SnapValue>,
        setter: Option<SnapValue>,
        attributes: u32,
    },
}

impl SnapshotBlob {
    pub(crate) fn to_bytes(&self) -> JsvmResult<Vec<u8>> {
        let data = serde_json::to_vec(self).map_err(|error| {
            tracing::warn!(%error, "snapshot serialization failed");
            Status::GenericFailure
        })?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + data.len());
        bytes.extend_from_slice(&SNAPSHOT_MAGIC);
        bytes.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);
        Ok(bytes)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> JsvmResult<Self> {
        if bytes.len() < HEADER_LEN || bytes[0..8] != SNAPSHOT_MAGIC {
            return Err(Status::GenericFailure);
        }
        let version = read_u32(&bytes[8..12]);
        if version != SNAPSHOT_FORMAT_VERSION {
            tracing::warn!(version, "unsupported snapshot version");
            return Err(Status::GenericFailure);
        }
        let end = HEADER_LEN
            .checked_add(read_u32(&bytes[12..16]) as usize)
            .filter(|end| *end <= bytes.len())
            .ok_or(Status::GenericFailure)?;
        serde_json::from_slice(&bytes[HEADER_LEN..end]).map_err(|error| {
            tracing::warn!(%error, "malformed snapshot payload");
            Status::GenericFailure
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

/// Identity of a native callback, ignoring its vtable
fn callback_addr(callback: &Callback) -> usize {
    Arc::as_ptr(callback) as *const () as usize
}

struct Capture<'a> {
    builtins: FxHashMap<HeapId, String>,
    references: FxHashMap<usize, usize>,
    visited: FxHashMap<HeapId, usize>,
    nodes: Vec<Option<SnapNode>>,
    pending: Vec<HeapId>,
    env: &'a Env,
}

impl Capture<'_> {
    fn value(&mut self, value: &JsValue) -> JsvmResult<SnapValue> {
        Ok(match value {
            JsValue::Undefined => SnapValue::Undefined,
            JsValue::Null => SnapValue::Null,
            JsValue::Bool(b) => SnapValue::Bool(*b),
            JsValue::Number(n) => SnapValue::Number(n.to_bits()),
            JsValue::String(s) => SnapValue::String(s.to_string()),
            JsValue::Symbol(_) | JsValue::BigInt(_) => {
                tracing::debug!(env = self.env.key, "symbols and BigInts cannot be captured");
                return Err(Status::GenericFailure);
            }
            JsValue::Object(id) => self.object(*id),
        })
    }

    fn object(&mut self, id: HeapId) -> SnapValue {
        if let Some(name) = self.builtins.get(&id) {
            return SnapValue::Builtin(name.clone());
        }
        if let Some(index) = self.visited.get(&id) {
            return SnapValue::Node(*index);
        }
        let index = self.nodes.len();
        self.nodes.push(None);
        self.visited.insert(id, index);
        self.pending.push(id);
        SnapValue::Node(index)
    }

    fn node(&mut self, id: HeapId) -> JsvmResult<SnapNode> {
        let env = self.env;
        let object = env.object(id).ok_or(Status::GenericFailure)?;
        if object.native.is_some() {
            tracing::debug!(env = env.key, "objects with native data cannot be captured");
            return Err(Status::GenericFailure);
        }
        let kind = match &object.kind {
            ObjectKind::Ordinary => NodeKind::Ordinary,
            ObjectKind::Array { length } => NodeKind::Array { length: *length },
            ObjectKind::Error => NodeKind::Error,
            ObjectKind::Function(function) => {
                let reference = self
                    .references
                    .get(&callback_addr(&function.callback))
                    .copied()
                    .filter(|_| function.data.is_none());
                let Some(reference) = reference else {
                    tracing::debug!(
                        env = env.key,
                        function = %function.name,
                        "function is not an external reference"
                    );
                    return Err(Status::GenericFailure);
                };
                NodeKind::Function {
                    reference,
                    name: function.name.to_string(),
                }
            }
            ObjectKind::External
            | ObjectKind::Promise(_)
            | ObjectKind::Primitive(_)
            | ObjectKind::ArrayBuffer(_)
            | ObjectKind::TypedArray(_)
            | ObjectKind::DataView(_)
            | ObjectKind::Date(_) => {
                tracing::debug!(env = env.key, "object kind cannot be captured");
                return Err(Status::GenericFailure);
            }
        };

        let prototype = match object.prototype {
            Some(proto) => Some(self.object(proto)),
            None => None,
        };
        let mut properties = Vec::with_capacity(object.properties.len());
        for key in object.own_keys() {
            let Some(slot) = object.properties.get(&key) else {
                continue;
            };
            properties.push(self.property(&key, slot)?);
        }
        Ok(SnapNode {
            kind,
            prototype,
            extensible: object.extensible,
            properties,
        })
    }

    fn property(&mut self, key: &PropertyKey, slot: &PropertySlot) -> JsvmResult<SnapProperty> {
        let PropertyKey::String(name) = key else {
            tracing::debug!(env = self.env.key, "symbol-keyed properties cannot be captured");
            return Err(Status::GenericFailure);
        };
        let slot = match slot {
            PropertySlot::Data { value, attributes } => SnapSlot::Data {
                value: self.value(value)?,
                attributes: attributes.bits(),
            },
            PropertySlot::Accessor {
                getter,
                setter,
                attributes,
            } => SnapSlot::Accessor {
                getter: getter.map(|id| self.object(id)),
                setter: setter.map(|id| self.object(id)),
                attributes: attributes.bits(),
            },
        };
        Ok(SnapProperty {
            key: name.to_string(),
            slot,
        })
    }

    fn drain(&mut self) -> JsvmResult<()> {
        while let Some(id) = self.pending.pop() {
            let index = self.visited.get(&id).copied().ok_or(Status::GenericFailure)?;
            let node = self.node(id)?;
            self.nodes[index] = Some(node);
        }
        Ok(())
    }
}

impl Env {
    /// Engine-provided objects by stable name
    ///
    /// Covers the intrinsics, the global object, every builtin global and
    /// the data properties of those objects, so that `JSON.stringify` or
    /// `Object.prototype.toString` can be referred to from captured state.
    fn builtin_names(&self) -> Vec<(String, HeapId)> {
        let mut named = self.intrinsics.named();
        named.push(("globalThis".to_string(), self.global));
        if let Some(global) = self.object(self.global) {
            for key in &self.builtin_globals {
                if let (PropertyKey::String(name), Some(PropertySlot::Data { value: JsValue::Object(id), .. })) =
                    (key, global.properties.get(key))
                {
                    named.push((name.to_string(), *id));
                }
            }
        }

        let roots = named.clone();
        for (name, id) in roots {
            let Some(object) = self.object(id) else {
                continue;
            };
            for (key, slot) in &object.properties {
                if let (PropertyKey::String(key), PropertySlot::Data { value: JsValue::Object(member), .. }) =
                    (key, slot)
                {
                    named.push((format!("{name}.{key}"), *member));
                }
            }
        }
        named
    }

    /// Capture the non-builtin global state of this Env
    pub(crate) fn capture_context(&self) -> JsvmResult<ContextSnapshot> {
        if self.exception.is_pending() {
            return Err(Status::PendingException);
        }
        let mut builtins = FxHashMap::default();
        for (name, id) in self.builtin_names() {
            builtins.entry(id).or_insert(name);
        }
        let references = self
            .shared
            .external_references
            .iter()
            .enumerate()
            .map(|(index, callback)| (callback_addr(callback), index))
            .collect();

        let mut capture = Capture {
            builtins,
            references,
            visited: FxHashMap::default(),
            nodes: Vec::new(),
            pending: Vec::new(),
            env: self,
        };

        let global = self.object(self.global).ok_or(Status::GenericFailure)?;
        let mut globals = Vec::new();
        for key in global.own_keys() {
            if self.builtin_globals.contains(&key) {
                continue;
            }
            let Some(slot) = global.properties.get(&key) else {
                continue;
            };
            globals.push(capture.property(&key, slot)?);
        }
        capture.drain()?;

        let nodes = capture
            .nodes
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(Status::GenericFailure)?;
        tracing::debug!(env = self.key, globals = globals.len(), nodes = nodes.len(), "context captured");
        Ok(ContextSnapshot { globals, nodes })
    }

    /// Recreate captured global state in this freshly created Env
    pub(crate) fn restore_context(&mut self, context: &ContextSnapshot) -> Completion<()> {
        let builtins: FxHashMap<String, HeapId> = self.builtin_names().into_iter().collect();
        let references = self.shared.external_references.clone();

        let mut ids = Vec::with_capacity(context.nodes.len());
        for node in &context.nodes {
            let kind = match &node.kind {
                NodeKind::Ordinary => ObjectKind::Ordinary,
                NodeKind::Array { length } => ObjectKind::Array { length: *length },
                NodeKind::Error => ObjectKind::Error,
                NodeKind::Function { reference, name } => {
                    let callback = references
                        .get(*reference)
                        .cloned()
                        .ok_or(Abrupt::Status(Status::GenericFailure))?;
                    ObjectKind::Function(FunctionData {
                        callback,
                        data: None,
                        name: Arc::from(name.as_str()),
                    })
                }
            };
            ids.push(self.alloc_object(kind, None)?);
        }

        let resolve = |value: &SnapValue| -> Completion<JsValue> {
            Ok(match value {
                SnapValue::Undefined => JsValue::Undefined,
                SnapValue::Null => JsValue::Null,
                SnapValue::Bool(b) => JsValue::Bool(*b),
                SnapValue::Number(bits) => JsValue::Number(f64::from_bits(*bits)),
                SnapValue::String(s) => JsValue::String(Arc::from(s.as_str())),
                SnapValue::Node(index) => JsValue::Object(
                    *ids.get(*index)
                        .ok_or(Abrupt::Status(Status::GenericFailure))?,
                ),
                SnapValue::Builtin(name) => JsValue::Object(
                    *builtins
                        .get(name)
                        .ok_or(Abrupt::Status(Status::GenericFailure))?,
                ),
            })
        };
        let resolve_id = |value: &SnapValue| -> Completion<HeapId> {
            resolve(value)?
                .as_object()
                .ok_or(Abrupt::Status(Status::GenericFailure))
        };
        let resolve_slot = |slot: &SnapSlot| -> Completion<PropertySlot> {
            Ok(match slot {
                SnapSlot::Data { value, attributes } => PropertySlot::Data {
                    value: resolve(value)?,
                    attributes: PropertyAttributes::from_bits(*attributes),
                },
                SnapSlot::Accessor {
                    getter,
                    setter,
                    attributes,
                } => PropertySlot::Accessor {
                    getter: getter.as_ref().map(resolve_id).transpose()?,
                    setter: setter.as_ref().map(resolve_id).transpose()?,
                    attributes: PropertyAttributes::from_bits(*attributes),
                },
            })
        };

        let mut filled = Vec::with_capacity(context.nodes.len());
        for node in &context.nodes {
            let prototype = node.prototype.as_ref().map(resolve_id).transpose()?;
            let mut properties = Vec::with_capacity(node.properties.len());
            for property in &node.properties {
                properties.push((PropertyKey::from(property.key.as_str()), resolve_slot(&property.slot)?));
            }
            filled.push((prototype, node.extensible, properties));
        }
        let mut globals = Vec::with_capacity(context.globals.len());
        for property in &context.globals {
            globals.push((PropertyKey::from(property.key.as_str()), resolve_slot(&property.slot)?));
        }

        for (id, (prototype, extensible, properties)) in ids.iter().zip(filled) {
            if let Some(object) = self.object_mut(*id) {
                object.prototype = prototype;
                object.extensible = extensible;
                object.properties.extend(properties);
            }
        }
        if let Some(global) = self.object_mut(self.global) {
            global.properties.extend(globals);
        }
        tracing::debug!(env = self.key, nodes = ids.len(), "context restored");
        Ok(())
    }
}
