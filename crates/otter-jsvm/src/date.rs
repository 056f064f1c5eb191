//! Date objects
//!
//! A date holds a time value in milliseconds since the epoch, clipped to
//! ±8.64e15; anything else is an invalid date (NaN). Dates are always
//! rendered in UTC.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::builtins::NativeCall;
use crate::env::Env;
use crate::exception::Completion;
use crate::object::ObjectKind;
use crate::status::{JsvmResult, Status};
use crate::value::{JsValue, Value};

const MAX_TIME: f64 = 8.64e15;

/// `TimeClip`
pub(crate) fn time_clip(time: f64) -> f64 {
    if !time.is_finite() || time.abs() > MAX_TIME {
        return f64::NAN;
    }
    // +0 rather than -0
    time.trunc() + 0.0
}

fn utc(time: f64) -> Option<DateTime<Utc>> {
    if time.is_nan() {
        return None;
    }
    DateTime::from_timestamp_millis(time as i64)
}

/// `YYYY-MM-DDTHH:mm:ss.sssZ`, with a signed six-digit year outside 0..=9999
pub(crate) fn iso_string(time: f64) -> Option<String> {
    let date = utc(time)?;
    let year = date.year();
    let year = if (0..=9999).contains(&year) {
        format!("{year:04}")
    } else {
        let sign = if year < 0 { '-' } else { '+' };
        format!("{sign}{:06}", year.unsigned_abs())
    };
    Some(format!(
        "{year}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        date.month(),
        date.day(),
        date.hour(),
        date.minute(),
        date.second(),
        date.timestamp_subsec_millis()
    ))
}

fn display_string(time: f64) -> String {
    match utc(time) {
        Some(date) => date
            .format("%a %b %d %Y %H:%M:%S GMT+0000 (Coordinated Universal Time)")
            .to_string(),
        None => "Invalid Date".to_string(),
    }
}

impl Env {
    pub(crate) fn date_value(&self, value: &JsValue) -> Option<f64> {
        match self.object(value.as_object()?)?.kind {
            ObjectKind::Date(time) => Some(time),
            _ => None,
        }
    }

    /// A date for `time` milliseconds since the epoch
    ///
    /// Non-finite times and times past ±8.64e15 give an invalid date.
    pub fn create_date(&mut self, time: f64) -> JsvmResult<Value> {
        self.op(|env| {
            let prototype = Some(env.intrinsics.date_prototype);
            let id = env.alloc_object(ObjectKind::Date(time_clip(time)), prototype)?;
            Ok(env.push(JsValue::Object(id)))
        })
    }

    /// Whether the value is a date
    pub fn is_date(&self, value: Value) -> JsvmResult<bool> {
        let value = self.get(value)?;
        Ok(self.date_value(&value).is_some())
    }

    /// Time value of a date; NaN when the date is invalid
    pub fn get_date_value(&self, value: Value) -> JsvmResult<f64> {
        let value = self.get(value)?;
        self.date_value(&value).ok_or(Status::DateExpected)
    }
}

// ==================== Built-ins ====================

fn this_time(env: &mut Env, this: &JsValue) -> Completion<f64> {
    match env.date_value(this) {
        Some(time) => Ok(time),
        None => Err(env.type_error("this is not a Date object.")),
    }
}

pub(crate) fn date_get_time(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    Ok(JsValue::Number(this_time(env, &call.this)?))
}

pub(crate) fn date_to_iso_string(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let time = this_time(env, &call.this)?;
    match iso_string(time) {
        Some(text) => Ok(JsValue::string(&text)),
        None => Err(env.range_error("Invalid time value")),
    }
}

pub(crate) fn date_to_json(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let time = this_time(env, &call.this)?;
    Ok(iso_string(time).map_or(JsValue::Null, |text| JsValue::string(&text)))
}

pub(crate) fn date_to_string(env: &mut Env, call: &NativeCall) -> Completion<JsValue> {
    let time = this_time(env, &call.this)?;
    Ok(JsValue::string(&display_string(time)))
}
