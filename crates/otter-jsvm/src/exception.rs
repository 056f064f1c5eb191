//! Pending exception register and last-error record

use crate::env::Env;
use crate::object::{PropertyKey, PropertySlot};
use crate::property::PropertyAttributes;
use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value};

/// How an internal operation ended abruptly
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Abrupt {
    /// A script-level throw
    Throw(JsValue),
    /// A host-level failure that never reaches script
    Status(Status),
}

impl From<Status> for Abrupt {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}

/// Result of an internal operation that may throw
pub(crate) type Completion<T> = Result<T, Abrupt>;

/// Details of the most recent failing call on an Env
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Human readable description
    pub message: String,
    /// Engine specific code; always 0
    pub engine_error_code: u32,
    /// Status the call returned
    pub status: Status,
}

impl Default for ErrorInfo {
    fn default() -> Self {
        Self {
            message: String::new(),
            engine_error_code: 0,
            status: Status::Ok,
        }
    }
}

/// Built-in error constructors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    SyntaxError,
    ReferenceError,
}

impl ErrorKind {
    pub(crate) const ALL: [ErrorKind; 5] = [
        ErrorKind::Error,
        ErrorKind::TypeError,
        ErrorKind::RangeError,
        ErrorKind::SyntaxError,
        ErrorKind::ReferenceError,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::TypeError => "TypeError",
            Self::RangeError => "RangeError",
            Self::SyntaxError => "SyntaxError",
            Self::ReferenceError => "ReferenceError",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Per-Env exception state
#[derive(Debug, Default)]
pub(crate) struct ExceptionState {
    pending: Option<JsValue>,
    last_error: ErrorInfo,
}

impl ExceptionState {
    #[inline]
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Set the pending exception; the last throw wins
    pub(crate) fn throw(&mut self, value: JsValue) {
        self.pending = Some(value);
    }

    pub(crate) fn take(&mut self) -> Option<JsValue> {
        self.pending.take()
    }

    pub(crate) fn pending(&self) -> Option<&JsValue> {
        self.pending.as_ref()
    }

    pub(crate) fn record(&mut self, status: Status) {
        self.last_error = ErrorInfo {
            message: status.to_string(),
            engine_error_code: 0,
            status,
        };
    }

    pub(crate) fn last_error(&self) -> &ErrorInfo {
        &self.last_error
    }
}

// ==================== Host surface ====================

impl Env {
    /// Make `value` the pending exception; the last throw wins
    pub fn throw(&mut self, value: Value) -> JsvmResult<()> {
        let value = self.get(value)?;
        self.exception.throw(value);
        Ok(())
    }

    /// Throw a new `Error`
    pub fn throw_error(&mut self, code: Option<&str>, message: &str) -> JsvmResult<()> {
        self.throw_kind(ErrorKind::Error, code, message)
    }

    /// Throw a new `TypeError`
    pub fn throw_type_error(&mut self, code: Option<&str>, message: &str) -> JsvmResult<()> {
        self.throw_kind(ErrorKind::TypeError, code, message)
    }

    /// Throw a new `RangeError`
    pub fn throw_range_error(&mut self, code: Option<&str>, message: &str) -> JsvmResult<()> {
        self.throw_kind(ErrorKind::RangeError, code, message)
    }

    /// Throw a new `SyntaxError`
    pub fn throw_syntax_error(&mut self, code: Option<&str>, message: &str) -> JsvmResult<()> {
        self.throw_kind(ErrorKind::SyntaxError, code, message)
    }

    fn throw_kind(&mut self, kind: ErrorKind, code: Option<&str>, message: &str) -> JsvmResult<()> {
        let error = match self.make_error(kind, message) {
            Ok(id) => id,
            Err(Abrupt::Throw(value)) => {
                self.exception.throw(value);
                return Ok(());
            }
            Err(Abrupt::Status(status)) => return Err(status),
        };
        if let Some(code) = code {
            self.put(
                error,
                PropertyKey::from("code"),
                PropertySlot::Data {
                    value: JsValue::string(code),
                    attributes: PropertyAttributes::DEFAULT_JSPROPERTY,
                },
            );
        }
        self.exception.throw(JsValue::Object(error));
        Ok(())
    }

    /// Whether an exception is pending; never fails, never clears
    pub fn is_exception_pending(&self) -> bool {
        self.exception.is_pending()
    }

    /// Take the pending exception, leaving the Env clear
    pub fn get_and_clear_last_exception(&mut self) -> JsvmResult<Option<Value>> {
        Ok(self.exception.take().map(|value| self.push(value)))
    }

    /// Details of the most recent failing call on this Env
    pub fn get_last_error_info(&self) -> &ErrorInfo {
        self.exception.last_error()
    }
}
