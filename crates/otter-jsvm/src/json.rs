//! JSON conversion through `serde_json`

use std::sync::Arc;

use otter_jsvm_gc::HeapId;
use serde_json::{Map, Number};

use crate::env::Env;
use crate::exception::Completion;
use crate::date::iso_string;
use crate::object::{ObjectKind, PropertyKey, PropertySlot};
use crate::ops::MAX_SAFE_INTEGER;
use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value};

/// Accounted size of one node of the intermediate tree
const NODE_BYTES: usize = std::mem::size_of::<serde_json::Value>();

fn number(n: f64) -> serde_json::Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        // -0 serializes as 0
        serde_json::Value::from(n as i64)
    } else {
        Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

/// Serialization state: the objects being visited and the bytes built so far
#[derive(Default)]
struct JsonState {
    stack: Vec<HeapId>,
    bytes: usize,
}

impl Env {
    /// `JSON.stringify(value)`; `None` when the value has no JSON form
    ///
    /// The intermediate tree and the text are both held to the heap limit;
    /// passing it throws a `RangeError`.
    pub(crate) fn stringify(&mut self, value: &JsValue) -> Completion<Option<String>> {
        let mut state = JsonState::default();
        let Some(json) = self.to_json(value, &mut state)? else {
            return Ok(None);
        };
        serde_json::to_string(&json)
            .map(Some)
            .map_err(|e| self.type_error(e.to_string()))
    }

    fn charge(&mut self, state: &mut JsonState, bytes: usize) -> Completion<()> {
        state.bytes = state.bytes.saturating_add(bytes);
        self.check_string_length(state.bytes)
    }

    fn to_json(
        &mut self,
        value: &JsValue,
        state: &mut JsonState,
    ) -> Completion<Option<serde_json::Value>> {
        let id = match value {
            JsValue::Undefined | JsValue::Symbol(_) => return Ok(None),
            JsValue::BigInt(_) => return Err(self.type_error("Do not know how to serialize a BigInt")),
            JsValue::Object(id) => *id,
            JsValue::String(s) => {
                self.charge(state, NODE_BYTES + s.len() + 2)?;
                return Ok(Some(serde_json::Value::String(s.to_string())));
            }
            primitive => {
                self.charge(state, NODE_BYTES)?;
                return Ok(Some(match primitive {
                    JsValue::Bool(b) => serde_json::Value::Bool(*b),
                    JsValue::Number(n) => number(*n),
                    _ => serde_json::Value::Null,
                }));
            }
        };
        if self.is_callable(value) {
            return Ok(None);
        }
        match self.object(id).map(|o| &o.kind) {
            Some(ObjectKind::Primitive(inner)) => {
                let inner = inner.clone();
                return self.to_json(&inner, state);
            }
            Some(ObjectKind::Date(time)) => {
                let iso = iso_string(*time).map_or(JsValue::Null, |text| JsValue::string(&text));
                return self.to_json(&iso, state);
            }
            _ => {}
        }
        if state.stack.contains(&id) {
            return Err(self.type_error("Converting circular structure to JSON"));
        }

        self.charge(state, NODE_BYTES)?;
        state.stack.push(id);
        let result = if self.is_array_id(id) {
            self.array_to_json(id, state)
        } else {
            self.object_to_json(id, state)
        };
        state.stack.pop();
        result.map(Some)
    }

    fn array_to_json(&mut self, id: HeapId, state: &mut JsonState) -> Completion<serde_json::Value> {
        let receiver = JsValue::Object(id);
        let length = match self.object(id).map(|o| &o.kind) {
            Some(ObjectKind::Array { length }) => *length,
            _ => 0,
        };
        // Every element, holes included, becomes at least one node
        self.check_string_length(state.bytes.saturating_add((length as usize).saturating_mul(NODE_BYTES)))?;
        let mut items = Vec::new();
        for index in 0..length {
            let element = self.get_prop(&receiver, &PropertyKey::from(index))?;
            let item = match self.to_json(&element, state)? {
                Some(item) => item,
                None => {
                    self.charge(state, NODE_BYTES)?;
                    serde_json::Value::Null
                }
            };
            items.push(item);
        }
        Ok(serde_json::Value::Array(items))
    }

    fn object_to_json(&mut self, id: HeapId, state: &mut JsonState) -> Completion<serde_json::Value> {
        let receiver = JsValue::Object(id);
        let keys: Vec<Arc<str>> = self
            .own_entries(id)
            .into_iter()
            .filter_map(|(key, attributes)| match key {
                PropertyKey::String(name) if attributes.enumerable() => Some(name),
                _ => None,
            })
            .collect();

        let mut map = Map::new();
        for key in keys {
            let value = self.get_prop(&receiver, &PropertyKey::String(key.clone()))?;
            if let Some(json) = self.to_json(&value, state)? {
                self.charge(state, key.len() + 3)?;
                map.insert(key.to_string(), json);
            }
        }
        Ok(serde_json::Value::Object(map))
    }

    /// `JSON.parse(text)`
    pub(crate) fn parse_json(&mut self, text: &str) -> Completion<JsValue> {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| self.syntax_error(format!("Unexpected token in JSON: {e}")))?;
        self.from_json(json)
    }

    fn from_json(&mut self, json: serde_json::Value) -> Completion<JsValue> {
        Ok(match json {
            serde_json::Value::Null => JsValue::Null,
            serde_json::Value::Bool(b) => JsValue::Bool(b),
            serde_json::Value::Number(n) => JsValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => JsValue::String(Arc::from(s)),
            serde_json::Value::Array(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    elements.push(self.from_json(item)?);
                }
                JsValue::Object(self.alloc_array(elements)?)
            }
            serde_json::Value::Object(map) => {
                let prototype = Some(self.intrinsics.object_prototype);
                let id = self.alloc_object(ObjectKind::Ordinary, prototype)?;
                for (key, item) in map {
                    let value = self.from_json(item)?;
                    self.put(id, PropertyKey::from(key.as_str()), PropertySlot::data(value));
                }
                JsValue::Object(id)
            }
        })
    }

    /// Serialize `value` to a JSON string; `undefined` when it has no JSON form
    pub fn json_stringify(&mut self, value: Value) -> JsvmResult<Value> {
        let value = self.get(value)?;
        self.script_op(|env| {
            let text = env.stringify(&value)?;
            let result = text.map_or(JsValue::Undefined, |s| JsValue::String(Arc::from(s)));
            Ok(env.push(result))
        })
    }

    /// Parse a JSON string into script values
    pub fn json_parse(&mut self, text: Value) -> JsvmResult<Value> {
        let JsValue::String(text) = self.get(text)? else {
            return Err(Status::StringExpected);
        };
        self.op(|env| {
            let value = env.parse_json(&text)?;
            Ok(env.push(value))
        })
    }
}
