//! BigInt values: conversions, operators and the host surface

use std::cmp::Ordering;
use std::sync::Arc;

use num_bigint::{BigInt, Sign};
use num_traits::{FromPrimitive, One, Signed, ToPrimitive, Zero};
use otter_jsvm_bytecode::{BinaryOp, UnaryOp};

use crate::builtins::NativeCall;
use crate::env::Env;
use crate::exception::Completion;
use crate::object::ObjectKind;
use crate::ops::{Hint, number_to_string};
use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value};

/// Largest BigInt, in 64-bit words
pub(crate) const MAX_BIGINT_WORDS: usize = 1 << 24;

const MAX_BIGINT_BITS: u64 = MAX_BIGINT_WORDS as u64 * 64;

/// A value after `ToNumeric`
pub(crate) enum Numeric {
    Number(f64),
    BigInt(Arc<BigInt>),
}

/// Low 64 bits in two's complement
pub(crate) fn wrapping_u64(n: &BigInt) -> u64 {
    let (sign, digits) = n.to_u64_digits();
    let low = digits.first().copied().unwrap_or(0);
    if sign == Sign::Minus {
        low.wrapping_neg()
    } else {
        low
    }
}

/// Parse the string forms `BigInt("...")` accepts
pub(crate) fn parse_bigint(s: &str) -> Option<BigInt> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Some(BigInt::zero());
    }
    let prefixed = [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)]
        .into_iter()
        .find_map(|(prefix, radix)| trimmed.strip_prefix(prefix).map(|d| (d, radix)));
    let (digits, radix) = match prefixed {
        Some((digits, radix)) => {
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return None;
            }
            (digits, radix)
        }
        None => {
            let unsigned = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
            if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (trimmed, 10)
        }
    };
    BigInt::parse_bytes(digits.as_bytes(), radix)
}

/// Exact comparison of a BigInt with a number
pub(crate) fn compare_with_number(n: &BigInt, x: f64) -> Option<Ordering> {
    if x.is_nan() {
        return None;
    }
    if x.is_infinite() {
        return Some(if x > 0.0 { Ordering::Less } else { Ordering::Greater });
    }
    let floor = x.floor();
    let whole = BigInt::from_f64(floor)?;
    Some(match n.cmp(&whole) {
        Ordering::Equal if x > floor => Ordering::Less,
        ordering => ordering,
    })
}

impl Env {
    pub(crate) fn to_bigint(&mut self, value: &JsValue) -> Completion<Arc<BigInt>> {
        let primitive = self.to_primitive(value, Hint::Number)?;
        match primitive {
            JsValue::BigInt(n) => Ok(n),
            JsValue::Bool(b) => Ok(Arc::new(BigInt::from(u8::from(b)))),
            JsValue::String(s) => match parse_bigint(&s) {
                Some(n) => Ok(Arc::new(n)),
                None => Err(self.syntax_error(format!("Cannot convert {s} to a BigInt"))),
            },
            JsValue::Number(n) => Err(self.type_error(format!(
                "Cannot convert {} to a BigInt",
                number_to_string(n)
            ))),
            JsValue::Undefined => Err(self.type_error("Cannot convert undefined to a BigInt")),
            JsValue::Null => Err(self.type_error("Cannot convert null to a BigInt")),
            JsValue::Symbol(_) | JsValue::Object(_) => {
                Err(self.type_error("Cannot convert Symbol to a BigInt"))
            }
        }
    }

    /// `ToNumeric`
    pub(crate) fn to_numeric(&mut self, value: &JsValue) -> Completion<Numeric> {
        match self.to_primitive(value, Hint::Number)? {
            JsValue::BigInt(n) => Ok(Numeric::BigInt(n)),
            primitive => Ok(Numeric::Number(self.to_number(&primitive)?)),
        }
    }

    fn check_bigint_bits(&mut self, bits: u64) -> Completion<()> {
        if bits > MAX_BIGINT_BITS {
            return Err(self.range_error("Maximum BigInt size exceeded"));
        }
        Ok(())
    }

    pub(crate) fn bigint_unary(&mut self, op: UnaryOp, n: &BigInt) -> Completion<JsValue> {
        match op {
            UnaryOp::Neg => Ok(JsValue::from(-n)),
            UnaryOp::BitNot => Ok(JsValue::from(-n - BigInt::one())),
            _ => Err(self.type_error("Cannot convert a BigInt value to a number")),
        }
    }

    pub(crate) fn bigint_binary(&mut self, op: BinaryOp, x: &BigInt, y: &BigInt) -> Completion<JsValue> {
        let result = match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => {
                self.check_bigint_bits(x.bits() + y.bits())?;
                x * y
            }
            BinaryOp::Div | BinaryOp::Mod if y.is_zero() => {
                return Err(self.range_error("Division by zero"));
            }
            BinaryOp::Div => x / y,
            BinaryOp::Mod => x % y,
            BinaryOp::Pow => self.bigint_pow(x, y)?,
            BinaryOp::BitAnd => x & y,
            BinaryOp::BitOr => x | y,
            BinaryOp::BitXor => x ^ y,
            BinaryOp::Shl => self.bigint_shift(x, y.clone())?,
            BinaryOp::Shr => self.bigint_shift(x, -y)?,
            BinaryOp::Ushr => {
                return Err(self.type_error("BigInts have no unsigned right shift, use >> instead"));
            }
            _ => {
                return Err(self.type_error(
                    "Cannot mix BigInt and other types, use explicit conversions",
                ));
            }
        };
        Ok(JsValue::from(result))
    }

    fn bigint_pow(&mut self, base: &BigInt, exponent: &BigInt) -> Completion<BigInt> {
        if exponent.is_negative() {
            return Err(self.range_error("Exponent must be non-negative"));
        }
        if exponent.is_zero() {
            return Ok(BigInt::one());
        }
        if base.is_zero() || base.abs().is_one() {
            let odd = exponent.bit(0);
            return Ok(if base.is_negative() && !odd { BigInt::one() } else { base.clone() });
        }
        let exponent = exponent.to_u64().unwrap_or(u64::MAX);
        self.check_bigint_bits(base.bits().saturating_mul(exponent))?;
        Ok(base.pow(exponent as u32))
    }

    /// `n << amount`, shifting right for negative amounts
    fn bigint_shift(&mut self, n: &BigInt, amount: BigInt) -> Completion<BigInt> {
        if n.is_zero() {
            return Ok(BigInt::zero());
        }
        let floor = || if n.is_negative() { -BigInt::one() } else { BigInt::zero() };
        match amount.to_i64() {
            Some(left) if left >= 0 => {
                self.check_bigint_bits(n.bits().saturating_add(left as u64))?;
                Ok(n << left as usize)
            }
            Some(right) => {
                let right = right.unsigned_abs();
                if right >= n.bits() {
                    Ok(floor())
                } else {
                    Ok(n >> right as usize)
                }
            }
            None if amount.is_negative() => Ok(floor()),
            None => Err(self.range_error("Maximum BigInt size exceeded")),
        }
    }

    fn bigint_arg(&self, value: Value) -> JsvmResult<Arc<BigInt>> {
        match self.get(value)? {
            JsValue::BigInt(n) => Ok(n),
            _ => Err(Status::BigintExpected),
        }
    }

    // ==================== Host surface ====================

    /// A BigInt from an `i64`
    pub fn create_bigint_int64(&mut self, value: i64) -> JsvmResult<Value> {
        Ok(self.push(JsValue::from(BigInt::from(value))))
    }

    /// A BigInt from a `u64`
    pub fn create_bigint_uint64(&mut self, value: u64) -> JsvmResult<Value> {
        Ok(self.push(JsValue::from(BigInt::from(value))))
    }

    /// A BigInt from little-endian 64-bit words and a sign
    ///
    /// More than 2^24 words throws a `RangeError`. A negative zero is zero.
    pub fn create_bigint_words(&mut self, sign_bit: bool, words: &[u64]) -> JsvmResult<Value> {
        self.op(|env| {
            if words.len() > MAX_BIGINT_WORDS {
                return Err(env.range_error("Maximum BigInt size exceeded"));
            }
            let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            let magnitude = BigInt::from_bytes_le(Sign::Plus, &bytes);
            let value = if sign_bit { -magnitude } else { magnitude };
            Ok(env.push(JsValue::from(value)))
        })
    }

    /// The low 64 bits as an `i64`, and whether that is the exact value
    pub fn get_value_bigint_int64(&self, value: Value) -> JsvmResult<(i64, bool)> {
        let n = self.bigint_arg(value)?;
        let result = wrapping_u64(&n) as i64;
        Ok((result, BigInt::from(result) == *n))
    }

    /// The low 64 bits as a `u64`, and whether that is the exact value
    pub fn get_value_bigint_uint64(&self, value: Value) -> JsvmResult<(u64, bool)> {
        let n = self.bigint_arg(value)?;
        let result = wrapping_u64(&n);
        Ok((result, BigInt::from(result) == *n))
    }

    /// Sign and little-endian 64-bit magnitude words; zero has no words
    pub fn get_value_bigint_words(&self, value: Value) -> JsvmResult<(bool, Vec<u64>)> {
        let n = self.bigint_arg(value)?;
        let (sign, words) = n.to_u64_digits();
        Ok((sign == Sign::Minus, words))
    }
}

// ==================== Built-ins ====================

fn this_bigint(env: &mut Env, this: &JsValue, method: &str) -> Completion<Arc<BigInt>> {
    let value = match this {
        JsValue::Object(id) => match env.object(*id).map(|o| &o.kind) {
            Some(ObjectKind::Primitive(value)) => value.clone(),
            _ => this.clone(),
        },
        _ => this.clone(),
    };
    match value {
        JsValue::BigInt(n) => Ok(n),
        _ => Err(env.type_error(format!(
            "BigInt.prototype.{method} requires that 'this' be a BigInt"
        ))),
    }
}

/// `BigInt(value)`
pub(crate) fn bigint_convert(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    match env.to_primitive(&call.arg(0), Hint::Number)? {
        JsValue::Number(n) => match BigInt::from_f64(n).filter(|_| n.fract() == 0.0) {
            Some(n) => Ok(JsValue::from(n)),
            None => Err(env.range_error(format!(
                "The number {} cannot be converted to a BigInt because it is not an integer",
                number_to_string(n)
            ))),
        },
        primitive => Ok(JsValue::BigInt(env.to_bigint(&primitive)?)),
    }
}

pub(crate) fn bigint_to_string(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let n = this_bigint(env, &call.this, "toString")?;
    let radix = match call.arg(0) {
        JsValue::Undefined => 10.0,
        value => env.to_number(&value)?.trunc(),
    };
    if !(2.0..=36.0).contains(&radix) {
        return Err(env.range_error("toString() radix must be between 2 and 36"));
    }
    Ok(JsValue::string(&n.to_str_radix(radix as u32)))
}

pub(crate) fn bigint_value_of(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    Ok(JsValue::BigInt(this_bigint(env, &call.this, "valueOf")?))
}
