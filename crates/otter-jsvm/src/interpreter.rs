//! Bytecode interpreter
//!
//! Top-level programs run against the Env's global object. The operand
//! stack is local to one `execute` call; every value on it is also reachable
//! from the Env roots only while the call runs, which is why collection
//! waits for the next safepoint.

use std::sync::Arc;

use otter_jsvm_bytecode::{Constant, ConstantIndex, Instruction, JumpOffset, Program};

use crate::env::Env;
use crate::exception::{Abrupt, Completion};
use crate::object::{ObjectKind, PropertyKey, PropertySlot};
use crate::property::PropertyAttributes;
use crate::status::Status;
use crate::value::JsValue;

/// Why execution stopped early
enum Fault {
    Abrupt(Abrupt),
    Corrupt(&'static str),
}

impl From<Abrupt> for Fault {
    fn from(abrupt: Abrupt) -> Self {
        Self::Abrupt(abrupt)
    }
}

type Step<T> = Result<T, Fault>;

struct Frame<'p> {
    program: &'p Program,
    /// `None` marks an array hole
    stack: Vec<Option<JsValue>>,
    completion: JsValue,
    pc: usize,
}

impl<'p> Frame<'p> {
    fn pop(&mut self) -> Step<JsValue> {
        match self.stack.pop() {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(Fault::Corrupt("hole outside an array literal")),
            None => Err(Fault::Corrupt("operand stack underflow")),
        }
    }

    fn push(&mut self, value: JsValue) {
        self.stack.push(Some(value));
    }

    fn peek(&self) -> Step<&JsValue> {
        match self.stack.last() {
            Some(Some(value)) => Ok(value),
            _ => Err(Fault::Corrupt("operand stack underflow")),
        }
    }

    fn string(&self, idx: ConstantIndex) -> Step<&'p str> {
        self.program
            .string(idx)
            .ok_or(Fault::Corrupt("expected a string constant"))
    }

    fn key(&self, idx: ConstantIndex) -> Step<PropertyKey> {
        self.string(idx).map(PropertyKey::from)
    }

    fn jump(&mut self, offset: JumpOffset) -> Step<()> {
        let target = offset
            .target(self.pc)
            .filter(|t| *t <= self.program.code.len())
            .ok_or(Fault::Corrupt("jump target out of range"))?;
        self.pc = target;
        Ok(())
    }

    fn split_args(&mut self, argc: u16) -> Step<Vec<JsValue>> {
        let argc = argc as usize;
        if self.stack.len() < argc {
            return Err(Fault::Corrupt("operand stack underflow"));
        }
        self.stack
            .split_off(self.stack.len() - argc)
            .into_iter()
            .map(|v| v.ok_or(Fault::Corrupt("hole outside an array literal")))
            .collect()
    }
}

/// Run `program` to completion, returning its completion value
pub(crate) fn execute(env: &mut Env, program: &Program) -> Completion<JsValue> {
    let mut frame = Frame {
        program,
        stack: Vec::with_capacity(16),
        completion: JsValue::Undefined,
        pc: 0,
    };
    match run(env, &mut frame) {
        Ok(()) => Ok(frame.completion),
        Err(Fault::Abrupt(abrupt)) => Err(abrupt),
        Err(Fault::Corrupt(message)) => {
            env.shared.fatal_error("interpreter", message);
            Err(Abrupt::Status(Status::GenericFailure))
        }
    }
}

fn run(env: &mut Env, frame: &mut Frame<'_>) -> Step<()> {
    let global = JsValue::Object(env.global);
    let strict = frame.program.strict;

    while let Some(&instruction) = frame.program.code.get(frame.pc) {
        if env.shared.is_terminated() {
            return Err(Abrupt::Status(Status::CannotRunJs).into());
        }
        frame.pc += 1;

        match instruction {
            Instruction::LoadUndefined => frame.push(JsValue::Undefined),
            Instruction::LoadNull => frame.push(JsValue::Null),
            Instruction::LoadTrue => frame.push(JsValue::Bool(true)),
            Instruction::LoadFalse => frame.push(JsValue::Bool(false)),
            Instruction::LoadInt32 { value } => frame.push(JsValue::from(value)),
            Instruction::LoadConst { idx } => {
                let value = match frame.program.constants.get(idx.index()) {
                    Some(Constant::Number(n)) => JsValue::Number(*n),
                    Some(Constant::String(s)) => JsValue::String(Arc::from(&**s)),
                    None => return Err(Fault::Corrupt("constant index out of range")),
                };
                frame.push(value);
            }
            Instruction::LoadThis => frame.push(global.clone()),

            Instruction::GetGlobal { name } => {
                let key = frame.key(name)?;
                if !env.has_prop(env.global, &key) {
                    let message = format!("{} is not defined", frame.string(name)?);
                    return Err(env.reference_error(message).into());
                }
                let value = env.get_prop(&global, &key)?;
                frame.push(value);
            }
            Instruction::SetGlobal { name } => {
                let key = frame.key(name)?;
                if strict && !env.has_prop(env.global, &key) {
                    let message = format!("{} is not defined", frame.string(name)?);
                    return Err(env.reference_error(message).into());
                }
                let value = frame.peek()?.clone();
                env.set_prop(&global, key, value, strict)?;
            }
            Instruction::DeclareGlobal { name } => {
                let key = frame.key(name)?;
                if !env.has_own(env.global, &key) {
                    env.define_own(
                        env.global,
                        key,
                        PropertySlot::Data {
                            value: JsValue::Undefined,
                            attributes: PropertyAttributes::WRITABLE
                                | PropertyAttributes::ENUMERABLE,
                        },
                    )?;
                }
            }
            Instruction::TypeOfGlobal { name } => {
                let key = frame.key(name)?;
                let value = if env.has_prop(env.global, &key) {
                    env.get_prop(&global, &key)?
                } else {
                    JsValue::Undefined
                };
                frame.push(JsValue::string(env.typeof_name(&value)));
            }

            Instruction::GetProp { name } => {
                let object = frame.pop()?;
                let value = env.get_prop(&object, &frame.key(name)?)?;
                frame.push(value);
            }
            Instruction::SetProp { name } => {
                let value = frame.pop()?;
                let object = frame.pop()?;
                env.set_prop(&object, frame.key(name)?, value.clone(), strict)?;
                frame.push(value);
            }
            Instruction::GetElem => {
                let key = frame.pop()?;
                let object = frame.pop()?;
                let key = env.to_property_key(&key)?;
                let value = env.get_prop(&object, &key)?;
                frame.push(value);
            }
            Instruction::SetElem => {
                let value = frame.pop()?;
                let key = frame.pop()?;
                let object = frame.pop()?;
                let key = env.to_property_key(&key)?;
                env.set_prop(&object, key, value.clone(), strict)?;
                frame.push(value);
            }
            Instruction::DeleteProp { name } => {
                let object = frame.pop()?;
                let deleted = env.delete_prop(&object, &frame.key(name)?, strict)?;
                frame.push(JsValue::Bool(deleted));
            }
            Instruction::DeleteElem => {
                let key = frame.pop()?;
                let object = frame.pop()?;
                let key = env.to_property_key(&key)?;
                let deleted = env.delete_prop(&object, &key, strict)?;
                frame.push(JsValue::Bool(deleted));
            }
            Instruction::DefineField { name } => {
                let value = frame.pop()?;
                let object = frame
                    .peek()?
                    .as_object()
                    .ok_or(Fault::Corrupt("field definition on a non-object"))?;
                env.put(object, frame.key(name)?, PropertySlot::data(value));
            }

            Instruction::NewObject => {
                let prototype = Some(env.intrinsics.object_prototype);
                let id = env.alloc_object(ObjectKind::Ordinary, prototype)?;
                frame.push(JsValue::Object(id));
            }
            Instruction::NewArray { len } => {
                let len = len as usize;
                if frame.stack.len() < len {
                    return Err(Fault::Corrupt("operand stack underflow"));
                }
                let elements = frame.stack.split_off(frame.stack.len() - len);
                let prototype = Some(env.intrinsics.array_prototype);
                let id = env.alloc_object(ObjectKind::Array { length: len as u32 }, prototype)?;
                for (index, element) in elements.into_iter().enumerate() {
                    if let Some(value) = element {
                        env.put(id, PropertyKey::from(index as u32), PropertySlot::data(value));
                    }
                }
                frame.push(JsValue::Object(id));
            }
            Instruction::LoadHole => frame.stack.push(None),

            Instruction::Unary { op } => {
                let value = frame.pop()?;
                let result = env.unary(op, &value)?;
                frame.push(result);
            }
            Instruction::Binary { op } => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let result = env.binary(op, &left, &right)?;
                frame.push(result);
            }

            Instruction::Dup => {
                let value = frame.peek()?.clone();
                frame.push(value);
            }
            Instruction::Dup2 => {
                let len = frame.stack.len();
                if len < 2 {
                    return Err(Fault::Corrupt("operand stack underflow"));
                }
                let pair = frame.stack[len - 2..].to_vec();
                frame.stack.extend(pair);
            }
            Instruction::Pop => {
                frame.pop()?;
            }
            Instruction::SetCompletion => {
                frame.completion = frame.pop()?;
            }

            Instruction::Jump { offset } => frame.jump(offset)?,
            Instruction::JumpIfFalse { offset } => {
                let value = frame.pop()?;
                if !env.to_boolean(&value) {
                    frame.jump(offset)?;
                }
            }
            Instruction::JumpIfTrue { offset } => {
                let value = frame.pop()?;
                if env.to_boolean(&value) {
                    frame.jump(offset)?;
                }
            }
            Instruction::JumpIfNotNullish { offset } => {
                let value = frame.pop()?;
                if !value.is_nullish() {
                    frame.jump(offset)?;
                }
            }
            Instruction::Throw => {
                let value = frame.pop()?;
                return Err(Abrupt::Throw(value).into());
            }

            Instruction::Call { argc, callee } => {
                let args = frame.split_args(argc)?;
                let function = frame.pop()?;
                let this = frame.pop()?;
                if !env.is_callable(&function) {
                    let name = callee_name(frame, callee);
                    return Err(env.type_error(format!("{name} is not a function")).into());
                }
                let this = if this.is_undefined() && !strict {
                    global.clone()
                } else {
                    this
                };
                let result = env.call(&function, this, &args)?;
                frame.push(result);
            }
            Instruction::Construct { argc, callee } => {
                let args = frame.split_args(argc)?;
                let function = frame.pop()?;
                if !env.is_callable(&function) {
                    let name = callee_name(frame, callee);
                    return Err(env.type_error(format!("{name} is not a constructor")).into());
                }
                let result = env.construct(&function, &args)?;
                frame.push(result);
            }
        }
    }
    Ok(())
}

fn callee_name(frame: &Frame<'_>, callee: Option<ConstantIndex>) -> String {
    callee
        .and_then(|idx| frame.program.string(idx))
        .unwrap_or("expression")
        .to_string()
}
