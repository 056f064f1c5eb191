//! Binary data: array buffers and the views over them
//!
//! A buffer owns its bytes until it is detached. Typed arrays and data
//! views name their buffer by heap id and read through it, so detaching a
//! buffer empties every view over it at once.

use num_bigint::BigInt;
use otter_jsvm_gc::HeapId;

use crate::bigint::wrapping_u64;
use crate::builtins::NativeCall;
use crate::callback::Finalizer;
use crate::env::Env;
use crate::exception::{Abrupt, Completion};
use crate::object::ObjectKind;
use crate::ops::{MAX_SAFE_INTEGER, to_int32, to_uint32};
use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value};

/// Element type of a typed array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedArrayType {
    /// `Int8Array`
    Int8,
    /// `Uint8Array`
    Uint8,
    /// `Uint8ClampedArray`
    Uint8Clamped,
    /// `Int16Array`
    Int16,
    /// `Uint16Array`
    Uint16,
    /// `Int32Array`
    Int32,
    /// `Uint32Array`
    Uint32,
    /// `Float32Array`
    Float32,
    /// `Float64Array`
    Float64,
    /// `BigInt64Array`
    BigInt64,
    /// `BigUint64Array`
    BigUint64,
}

impl TypedArrayType {
    /// Every element type
    pub const ALL: [Self; 11] = [
        Self::Int8,
        Self::Uint8,
        Self::Uint8Clamped,
        Self::Int16,
        Self::Uint16,
        Self::Int32,
        Self::Uint32,
        Self::Float32,
        Self::Float64,
        Self::BigInt64,
        Self::BigUint64,
    ];

    /// Bytes per element
    pub const fn element_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 | Self::BigInt64 | Self::BigUint64 => 8,
        }
    }

    /// Constructor name, e.g. `Int32Array`
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
            Self::BigInt64 => "BigInt64Array",
            Self::BigUint64 => "BigUint64Array",
        }
    }

    /// Elements are BigInts rather than numbers
    pub const fn is_bigint(self) -> bool {
        matches!(self, Self::BigInt64 | Self::BigUint64)
    }

    /// Suffix of the matching `DataView` accessors (`getInt8`, ...)
    fn accessor_suffix(self) -> &'static str {
        let name = self.name();
        &name[..name.len() - "Array".len()]
    }

    /// Decode one element from the front of `bytes`
    pub(crate) fn read(self, bytes: &[u8], little_endian: bool) -> JsValue {
        let number = |n: f64| JsValue::Number(n);
        match self {
            Self::Int8 => number(f64::from(i8::from_le_bytes(take(bytes, little_endian)))),
            Self::Uint8 | Self::Uint8Clamped => number(f64::from(bytes[0])),
            Self::Int16 => number(f64::from(i16::from_le_bytes(take(bytes, little_endian)))),
            Self::Uint16 => number(f64::from(u16::from_le_bytes(take(bytes, little_endian)))),
            Self::Int32 => number(f64::from(i32::from_le_bytes(take(bytes, little_endian)))),
            Self::Uint32 => number(f64::from(u32::from_le_bytes(take(bytes, little_endian)))),
            Self::Float32 => number(f64::from(f32::from_le_bytes(take(bytes, little_endian)))),
            Self::Float64 => number(f64::from_le_bytes(take(bytes, little_endian))),
            Self::BigInt64 => JsValue::from(BigInt::from(i64::from_le_bytes(take(bytes, little_endian)))),
            Self::BigUint64 => JsValue::from(BigInt::from(u64::from_le_bytes(take(bytes, little_endian)))),
        }
    }

    /// Encode `value` into the front of `bytes`
    ///
    /// `value` must already be a number, or a BigInt for the BigInt types.
    pub(crate) fn write(self, bytes: &mut [u8], value: &JsValue, little_endian: bool) {
        let n = match value {
            JsValue::Number(n) => *n,
            _ => 0.0,
        };
        match self {
            Self::Int8 => put(bytes, (to_int32(n) as i8).to_le_bytes(), little_endian),
            Self::Uint8 => put(bytes, (to_uint32(n) as u8).to_le_bytes(), little_endian),
            Self::Uint8Clamped => put(bytes, [clamp_u8(n)], little_endian),
            Self::Int16 => put(bytes, (to_int32(n) as i16).to_le_bytes(), little_endian),
            Self::Uint16 => put(bytes, (to_uint32(n) as u16).to_le_bytes(), little_endian),
            Self::Int32 => put(bytes, to_int32(n).to_le_bytes(), little_endian),
            Self::Uint32 => put(bytes, to_uint32(n).to_le_bytes(), little_endian),
            Self::Float32 => put(bytes, (n as f32).to_le_bytes(), little_endian),
            Self::Float64 => put(bytes, n.to_le_bytes(), little_endian),
            Self::BigInt64 | Self::BigUint64 => {
                let bits = match value {
                    JsValue::BigInt(b) => wrapping_u64(b),
                    _ => 0,
                };
                put(bytes, bits.to_le_bytes(), little_endian);
            }
        }
    }
}

/// First `N` bytes of `bytes` in little-endian order
fn take<const N: usize>(bytes: &[u8], little_endian: bool) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[..N]);
    if !little_endian {
        buf.reverse();
    }
    buf
}

fn put<const N: usize>(bytes: &mut [u8], mut buf: [u8; N], little_endian: bool) {
    if !little_endian {
        buf.reverse();
    }
    bytes[..N].copy_from_slice(&buf);
}

fn clamp_u8(n: f64) -> u8 {
    if n.is_nan() {
        return 0;
    }
    n.clamp(0.0, 255.0).round_ties_even() as u8
}

/// Backing store of an `ArrayBuffer`
pub(crate) struct ArrayBufferData {
    /// `None` once detached
    pub bytes: Option<Vec<u8>>,
    pub detachable: bool,
    /// Gets the bytes of an external buffer back
    pub finalizer: Option<Finalizer>,
}

impl ArrayBufferData {
    pub(crate) fn new(bytes: Vec<u8>, finalizer: Option<Finalizer>) -> Self {
        Self {
            bytes: Some(bytes),
            detachable: true,
            finalizer,
        }
    }

    pub(crate) fn byte_length(&self) -> usize {
        self.bytes.as_ref().map_or(0, Vec::len)
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.bytes.is_none()
    }
}

/// A typed array: `length` elements of `kind` starting at `byte_offset`
#[derive(Debug, Clone, Copy)]
pub(crate) struct TypedArrayData {
    pub kind: TypedArrayType,
    pub buffer: HeapId,
    pub byte_offset: usize,
    pub length: usize,
}

/// A data view over `byte_length` bytes starting at `byte_offset`
#[derive(Debug, Clone, Copy)]
pub(crate) struct DataViewData {
    pub buffer: HeapId,
    pub byte_offset: usize,
    pub byte_length: usize,
}

/// What `get_typedarray_info` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedArrayInfo {
    /// Element type
    pub kind: TypedArrayType,
    /// Element count; 0 once the buffer is detached
    pub length: usize,
    /// The underlying `ArrayBuffer`
    pub buffer: Value,
    /// Offset of the first element in the buffer
    pub byte_offset: usize,
}

/// What `get_dataview_info` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataViewInfo {
    /// Bytes covered by the view
    pub byte_length: usize,
    /// The underlying `ArrayBuffer`
    pub buffer: Value,
    /// Offset of the view in the buffer
    pub byte_offset: usize,
}

impl Env {
    // ==================== Internal helpers ====================

    pub(crate) fn array_buffer(&self, id: HeapId) -> Option<&ArrayBufferData> {
        match &self.object(id)?.kind {
            ObjectKind::ArrayBuffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    fn array_buffer_mut(&mut self, id: HeapId) -> Option<&mut ArrayBufferData> {
        match &mut self.object_mut(id)?.kind {
            ObjectKind::ArrayBuffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub(crate) fn typed_array(&self, id: HeapId) -> Option<TypedArrayData> {
        match &self.object(id)?.kind {
            ObjectKind::TypedArray(view) => Some(*view),
            _ => None,
        }
    }

    pub(crate) fn data_view(&self, id: HeapId) -> Option<DataViewData> {
        match &self.object(id)?.kind {
            ObjectKind::DataView(view) => Some(*view),
            _ => None,
        }
    }

    fn is_detached(&self, buffer: HeapId) -> bool {
        self.array_buffer(buffer).is_none_or(ArrayBufferData::is_detached)
    }

    /// Element count, 0 once the buffer is detached
    pub(crate) fn typed_length(&self, view: &TypedArrayData) -> usize {
        if self.is_detached(view.buffer) {
            0
        } else {
            view.length
        }
    }

    /// Element `index`, or `None` when out of range
    pub(crate) fn typed_get(&self, view: &TypedArrayData, index: usize) -> Option<JsValue> {
        if index >= self.typed_length(view) {
            return None;
        }
        let size = view.kind.element_size();
        let start = view.byte_offset + index * size;
        let bytes = self.array_buffer(view.buffer)?.bytes.as_ref()?;
        bytes.get(start..start + size).map(|b| view.kind.read(b, true))
    }

    /// Store an already converted element; out-of-range writes are dropped
    pub(crate) fn typed_set(&mut self, view: &TypedArrayData, index: usize, value: &JsValue) {
        if index >= self.typed_length(view) {
            return;
        }
        let size = view.kind.element_size();
        let start = view.byte_offset + index * size;
        let Some(bytes) = self
            .array_buffer_mut(view.buffer)
            .and_then(|b| b.bytes.as_mut())
        else {
            return;
        };
        if let Some(slot) = bytes.get_mut(start..start + size) {
            view.kind.write(slot, value, true);
        }
    }

    /// `ToNumber` or `ToBigInt`, whichever `kind` stores
    pub(crate) fn to_element(&mut self, kind: TypedArrayType, value: &JsValue) -> Completion<JsValue> {
        if kind.is_bigint() {
            Ok(JsValue::BigInt(self.to_bigint(value)?))
        } else {
            Ok(JsValue::Number(self.to_number(value)?))
        }
    }

    /// `ToIndex`
    fn to_index(&mut self, value: &JsValue, message: &str) -> Completion<usize> {
        let n = self.to_number(value)?;
        let n = if n.is_nan() { 0.0 } else { n.trunc() };
        if !(0.0..=MAX_SAFE_INTEGER).contains(&n) {
            return Err(self.range_error(message));
        }
        Ok(n as usize)
    }

    /// Fail with a `RangeError` when `byte_length` more bytes would pass the heap limit
    fn reserve_buffer(&mut self, byte_length: usize) -> Completion<()> {
        let used = self.heap.total_bytes().saturating_add(self.external_memory.max(0) as usize);
        if byte_length > self.shared.limits.hard_limit.saturating_sub(used) {
            return Err(self.range_error("Array buffer allocation failed"));
        }
        Ok(())
    }

    pub(crate) fn alloc_array_buffer(
        &mut self,
        bytes: Vec<u8>,
        finalizer: Option<Finalizer>,
    ) -> Completion<HeapId> {
        let prototype = Some(self.intrinsics.array_buffer_prototype);
        self.alloc_object(ObjectKind::ArrayBuffer(ArrayBufferData::new(bytes, finalizer)), prototype)
    }

    /// The buffer behind a handle, or `ArraybufferExpected`
    fn array_buffer_arg(&self, value: Value) -> JsvmResult<HeapId> {
        match self.get(value)? {
            JsValue::Object(id) if self.array_buffer(id).is_some() => Ok(id),
            _ => Err(Status::ArraybufferExpected),
        }
    }

    // ==================== ArrayBuffer ====================

    /// A zero-filled `ArrayBuffer`
    ///
    /// Throws a `RangeError` when the bytes would not fit under the heap limit.
    pub fn create_arraybuffer(&mut self, byte_length: usize) -> JsvmResult<Value> {
        self.op(|env| {
            env.reserve_buffer(byte_length)?;
            let id = env.alloc_array_buffer(vec![0; byte_length], None)?;
            Ok(env.push(JsValue::Object(id)))
        })
    }

    /// An `ArrayBuffer` over host bytes
    ///
    /// `finalizer` gets the bytes back, boxed as a `Vec<u8>`, when the
    /// buffer is detached or collected.
    pub fn create_external_arraybuffer(
        &mut self,
        data: Vec<u8>,
        finalizer: Option<Finalizer>,
    ) -> JsvmResult<Value> {
        self.op(|env| {
            let id = env.alloc_array_buffer(data, finalizer)?;
            Ok(env.push(JsValue::Object(id)))
        })
    }

    /// Contents of an `ArrayBuffer`; empty once detached
    pub fn get_arraybuffer_info(&self, value: Value) -> JsvmResult<&[u8]> {
        let id = self.array_buffer_arg(value)?;
        Ok(self
            .array_buffer(id)
            .and_then(|b| b.bytes.as_deref())
            .unwrap_or(&[]))
    }

    /// Mutable contents of an `ArrayBuffer`; empty once detached
    pub fn get_arraybuffer_info_mut(&mut self, value: Value) -> JsvmResult<&mut [u8]> {
        let id = self.array_buffer_arg(value)?;
        Ok(self
            .array_buffer_mut(id)
            .and_then(|b| b.bytes.as_deref_mut())
            .unwrap_or(&mut []))
    }

    /// Whether the value is an `ArrayBuffer`
    pub fn is_arraybuffer(&self, value: Value) -> JsvmResult<bool> {
        Ok(self.array_buffer_arg(value).is_ok())
    }

    /// Release the bytes of an `ArrayBuffer`; every view over it becomes empty
    ///
    /// A pinned buffer fails with `DetachableArraybufferExpected`. Detaching
    /// twice is a no-op.
    pub fn detach_arraybuffer(&mut self, value: Value) -> JsvmResult<()> {
        let id = self.array_buffer_arg(value)?;
        self.op(|env| {
            let Some(buffer) = env.array_buffer_mut(id) else {
                return Err(Abrupt::Status(Status::ArraybufferExpected));
            };
            if !buffer.detachable {
                return Err(Abrupt::Status(Status::DetachableArraybufferExpected));
            }
            let bytes = buffer.bytes.take();
            let finalizer = buffer.finalizer.take();
            if let (Some(bytes), Some(finalizer)) = (bytes, finalizer) {
                env.finalization_queue.push_back((Box::new(bytes), finalizer));
            }
            tracing::trace!(env = env.key, "array buffer detached");
            Ok(())
        })
    }

    /// Whether the value is a detached `ArrayBuffer`
    pub fn is_detached_arraybuffer(&self, value: Value) -> JsvmResult<bool> {
        Ok(match self.get(value)? {
            JsValue::Object(id) => self.array_buffer(id).is_some_and(ArrayBufferData::is_detached),
            _ => false,
        })
    }

    /// Forbid detaching an `ArrayBuffer` from now on
    pub fn pin_arraybuffer(&mut self, value: Value) -> JsvmResult<()> {
        let id = self.array_buffer_arg(value)?;
        if let Some(buffer) = self.array_buffer_mut(id) {
            buffer.detachable = false;
        }
        Ok(())
    }

    // ==================== TypedArray ====================

    /// A typed array over `length` elements of `arraybuffer` from `byte_offset`
    ///
    /// A misaligned offset or a range past the end of the buffer throws a
    /// `RangeError`.
    pub fn create_typedarray(
        &mut self,
        kind: TypedArrayType,
        length: usize,
        arraybuffer: Value,
        byte_offset: usize,
    ) -> JsvmResult<Value> {
        let buffer = self.array_buffer_arg(arraybuffer)?;
        self.op(|env| {
            let size = kind.element_size();
            if byte_offset % size != 0 {
                return Err(env.range_error(format!(
                    "start offset of {} should be a multiple of {size}",
                    kind.name()
                )));
            }
            if env.is_detached(buffer) {
                return Err(env.type_error("Cannot perform Construct on a detached ArrayBuffer"));
            }
            let available = env.array_buffer(buffer).map_or(0, ArrayBufferData::byte_length);
            let end = length
                .checked_mul(size)
                .and_then(|bytes| bytes.checked_add(byte_offset));
            if end.is_none_or(|end| end > available) {
                return Err(env.range_error(format!("Invalid typed array length: {length}")));
            }
            let view = TypedArrayData {
                kind,
                buffer,
                byte_offset,
                length,
            };
            let prototype = Some(env.intrinsics.typed_array_prototype);
            let id = env.alloc_object(ObjectKind::TypedArray(view), prototype)?;
            Ok(env.push(JsValue::Object(id)))
        })
    }

    /// Whether the value is a typed array
    pub fn is_typedarray(&self, value: Value) -> JsvmResult<bool> {
        Ok(self
            .get(value)?
            .as_object()
            .is_some_and(|id| self.typed_array(id).is_some()))
    }

    /// Type, length, buffer and offset of a typed array
    pub fn get_typedarray_info(&mut self, value: Value) -> JsvmResult<TypedArrayInfo> {
        let view = self
            .get(value)?
            .as_object()
            .and_then(|id| self.typed_array(id))
            .ok_or(Status::InvalidArg)?;
        Ok(TypedArrayInfo {
            kind: view.kind,
            length: self.typed_length(&view),
            buffer: self.push(JsValue::Object(view.buffer)),
            byte_offset: view.byte_offset,
        })
    }

    // ==================== DataView ====================

    /// A data view over `byte_length` bytes of `arraybuffer` from `byte_offset`
    pub fn create_dataview(
        &mut self,
        byte_length: usize,
        arraybuffer: Value,
        byte_offset: usize,
    ) -> JsvmResult<Value> {
        let buffer = self.array_buffer_arg(arraybuffer)?;
        self.op(|env| {
            if env.is_detached(buffer) {
                return Err(env.type_error("Cannot perform Construct on a detached ArrayBuffer"));
            }
            let available = env.array_buffer(buffer).map_or(0, ArrayBufferData::byte_length);
            if byte_offset > available {
                return Err(env.range_error(format!(
                    "Start offset {byte_offset} is outside the bounds of the buffer"
                )));
            }
            if byte_length > available - byte_offset {
                return Err(env.range_error(format!("Invalid DataView length {byte_length}")));
            }
            let view = DataViewData {
                buffer,
                byte_offset,
                byte_length,
            };
            let prototype = Some(env.intrinsics.data_view_prototype);
            let id = env.alloc_object(ObjectKind::DataView(view), prototype)?;
            Ok(env.push(JsValue::Object(id)))
        })
    }

    /// Whether the value is a data view
    pub fn is_dataview(&self, value: Value) -> JsvmResult<bool> {
        Ok(self
            .get(value)?
            .as_object()
            .is_some_and(|id| self.data_view(id).is_some()))
    }

    /// Length, buffer and offset of a data view
    pub fn get_dataview_info(&mut self, value: Value) -> JsvmResult<DataViewInfo> {
        let view = self
            .get(value)?
            .as_object()
            .and_then(|id| self.data_view(id))
            .ok_or(Status::InvalidArg)?;
        Ok(DataViewInfo {
            byte_length: view.byte_length,
            buffer: self.push(JsValue::Object(view.buffer)),
            byte_offset: view.byte_offset,
        })
    }
}

// ==================== Built-ins ====================

fn incompatible(env: &mut Env, method: &str) -> Abrupt {
    env.type_error(format!("Method {method} called on incompatible receiver"))
}

pub(crate) fn array_buffer_byte_length(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    match call.this.as_object().and_then(|id| env.array_buffer(id)) {
        Some(buffer) => Ok(JsValue::from(buffer.byte_length() as f64)),
        None => Err(incompatible(env, "ArrayBuffer.prototype.byteLength")),
    }
}

fn this_typed_array(env: &mut Env, this: &JsValue, getter: &str) -> Completion<TypedArrayData> {
    match this.as_object().and_then(|id| env.typed_array(id)) {
        Some(view) => Ok(view),
        None => Err(incompatible(env, &format!("get TypedArray.prototype.{getter}"))),
    }
}

pub(crate) fn typed_array_length(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let view = this_typed_array(env, &call.this, "length")?;
    Ok(JsValue::from(env.typed_length(&view) as f64))
}

pub(crate) fn typed_array_byte_length(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let view = this_typed_array(env, &call.this, "byteLength")?;
    Ok(JsValue::from((env.typed_length(&view) * view.kind.element_size()) as f64))
}

pub(crate) fn typed_array_byte_offset(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let view = this_typed_array(env, &call.this, "byteOffset")?;
    let offset = if env.is_detached(view.buffer) { 0 } else { view.byte_offset };
    Ok(JsValue::from(offset as f64))
}

pub(crate) fn typed_array_buffer(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let view = this_typed_array(env, &call.this, "buffer")?;
    Ok(JsValue::Object(view.buffer))
}

fn this_data_view(env: &mut Env, this: &JsValue, method: &str) -> Completion<DataViewData> {
    match this.as_object().and_then(|id| env.data_view(id)) {
        Some(view) => Ok(view),
        None => Err(incompatible(env, &format!("DataView.prototype.{method}"))),
    }
}

pub(crate) fn data_view_byte_length(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let view = this_data_view(env, &call.this, "byteLength")?;
    if env.is_detached(view.buffer) {
        return Err(env.type_error(
            "Cannot perform DataView.prototype.byteLength on a detached ArrayBuffer",
        ));
    }
    Ok(JsValue::from(view.byte_length as f64))
}

pub(crate) fn data_view_byte_offset(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let view = this_data_view(env, &call.this, "byteOffset")?;
    if env.is_detached(view.buffer) {
        return Err(env.type_error(
            "Cannot perform DataView.prototype.byteOffset on a detached ArrayBuffer",
        ));
    }
    Ok(JsValue::from(view.byte_offset as f64))
}

pub(crate) fn data_view_buffer(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let view = this_data_view(env, &call.this, "buffer")?;
    Ok(JsValue::Object(view.buffer))
}

/// Element type a `DataView` accessor was registered with
fn accessor_kind(call: &NativeCall) -> TypedArrayType {
    call.data
        .as_ref()
        .and_then(|d| d.downcast_ref::<TypedArrayType>())
        .copied()
        .unwrap_or(TypedArrayType::Uint8)
}

/// Byte range `offset..offset + size` of `view` inside its buffer
fn view_window(
    env: &mut Env,
    view: &DataViewData,
    offset: usize,
    size: usize,
    method: &str,
) -> Completion<std::ops::Range<usize>> {
    if env.is_detached(view.buffer) {
        return Err(env.type_error(format!(
            "Cannot perform DataView.prototype.{method} on a detached ArrayBuffer"
        )));
    }
    if offset.checked_add(size).is_none_or(|end| end > view.byte_length) {
        return Err(env.range_error("Offset is outside the bounds of the DataView"));
    }
    let start = view.byte_offset + offset;
    Ok(start..start + size)
}

pub(crate) fn data_view_get(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let kind = accessor_kind(call);
    let method = format!("get{}", kind.accessor_suffix());
    let view = this_data_view(env, &call.this, &method)?;
    let offset = env.to_index(&call.arg(0), "Offset is outside the bounds of the DataView")?;
    let little_endian = env.to_boolean(&call.arg(1));
    let range = view_window(env, &view, offset, kind.element_size(), &method)?;
    let bytes = env
        .array_buffer(view.buffer)
        .and_then(|b| b.bytes.as_ref())
        .and_then(|bytes| bytes.get(range));
    Ok(bytes.map_or(JsValue::Undefined, |b| kind.read(b, little_endian)))
}

pub(crate) fn data_view_set(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let kind = accessor_kind(call);
    let method = format!("set{}", kind.accessor_suffix());
    let view = this_data_view(env, &call.this, &method)?;
    let offset = env.to_index(&call.arg(0), "Offset is outside the bounds of the DataView")?;
    let value = env.to_element(kind, &call.arg(1))?;
    let little_endian = env.to_boolean(&call.arg(2));
    let range = view_window(env, &view, offset, kind.element_size(), &method)?;
    if let Some(bytes) = env
        .array_buffer_mut(view.buffer)
        .and_then(|b| b.bytes.as_mut())
        .and_then(|bytes| bytes.get_mut(range))
    {
        kind.write(bytes, &value, little_endian);
    }
    Ok(JsValue::Undefined)
}

/// `DataView.prototype` accessor names with their element types
pub(crate) fn data_view_accessors() -> impl Iterator<Item = (String, String, TypedArrayType)> {
    TypedArrayType::ALL
        .into_iter()
        .filter(|kind| *kind != TypedArrayType::Uint8Clamped)
        .map(|kind| {
            let suffix = kind.accessor_suffix();
            (format!("get{suffix}"), format!("set{suffix}"), kind)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_codec() {
        let mut bytes = [0u8; 8];
        TypedArrayType::Int16.write(&mut bytes, &JsValue::Number(-2.0), true);
        assert_eq!(&bytes[..2], &[0xfe, 0xff]);
        assert_eq!(TypedArrayType::Int16.read(&bytes, true), JsValue::Number(-2.0));
        assert_eq!(TypedArrayType::Uint16.read(&bytes, false), JsValue::Number(65279.0));

        TypedArrayType::Uint32.write(&mut bytes, &JsValue::Number(1.0), false);
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);

        TypedArrayType::Uint8.write(&mut bytes, &JsValue::Number(257.0), true);
        assert_eq!(bytes[0], 1);
    }

    #[test]
    fn test_clamped_rounding() {
        assert_eq!(clamp_u8(f64::NAN), 0);
        assert_eq!(clamp_u8(-5.0), 0);
        assert_eq!(clamp_u8(300.0), 255);
        assert_eq!(clamp_u8(1.5), 2);
        assert_eq!(clamp_u8(2.5), 2);
    }

    #[test]
    fn test_bigint_elements_wrap() {
        let mut bytes = [0u8; 8];
        let minus_one = JsValue::from(BigInt::from(-1));
        TypedArrayType::BigUint64.write(&mut bytes, &minus_one, true);
        assert_eq!(bytes, [0xff; 8]);
        assert_eq!(
            TypedArrayType::BigUint64.read(&bytes, true),
            JsValue::from(BigInt::from(u64::MAX))
        );
        assert_eq!(TypedArrayType::BigInt64.read(&bytes, true), minus_one);
    }

    #[test]
    fn test_accessor_names() {
        let names: Vec<String> = data_view_accessors().map(|(get, _, _)| get).collect();
        assert_eq!(names.len(), 10);
        assert!(names.contains(&"getBigUint64".to_string()));
        assert!(!names.iter().any(|n| n.contains("Clamped")));
    }
}
