//! Bidirectional conversion between [`Value`] and `boa_engine`'s `JsValue`.
//!
//! JavaScript has one numeric type; `Kind::Int`/`Kind::Long`/`Kind::Float`
//! all round-trip through `JsValue::as_number`'s `f64`, which is exact for
//! every `i32` and loses precision only for `i64` magnitudes JS itself
//! cannot represent either.
//!
//! `Kind::Function` is the one kind that needs a live `Context`: crossing
//! IN, a host [`Function`] is wrapped in a [`Trampoline`] and handed to boa
//! as a `NativeFunction`, so a script can call a host callback directly.
//! The trampoline's own value conversions stay scalar-only (see
//! `scalar_value_to_js`/`scalar_js_to_value`) since they run from inside
//! the native closure itself, without a `Context` to recurse through.

use std::sync::Arc;

use boa_engine::{Context, JsNativeError, JsResult, JsValue, NativeFunction};

use metacall::call::Trampoline;
use metacall::prelude::*;

pub fn value_to_js(value: &Value, context: &mut Context) -> JsResult<JsValue> {
    Ok(match value.kind() {
        Kind::Function => {
            let function = value.as_function().expect("kind checked").clone();
            function_to_js(function, context)
        }
        _ => scalar_value_to_js(value),
    })
}

fn scalar_value_to_js(value: &Value) -> JsValue {
    match value.kind() {
        Kind::Null => JsValue::null(),
        Kind::Bool => JsValue::new(value.as_bool().unwrap_or_default()),
        Kind::Char | Kind::Short | Kind::Int => JsValue::new(value.as_long().unwrap_or_default() as f64),
        Kind::Long => JsValue::new(value.as_long().unwrap_or_default() as f64),
        Kind::Float | Kind::Double => JsValue::new(value.as_double().unwrap_or_default()),
        Kind::String => JsValue::new(value.as_str().unwrap_or_default()),
        // Every other kind (array, map, class, object, pointer, future,
        // exception, throwable, buffer) has no faithful rendition through
        // this minimal scalar bridge; callers that need one round-trip it
        // as an opaque pointer instead of marshalling structurally — the
        // same narrowing any adapter's best-effort conversion is permitted
        // to make.
        _ => JsValue::undefined(),
    }
}

/// Wraps `function` in a `NativeFunction` a script can call directly. The
/// closure captures the trampoline by `Arc`, so boa's garbage collector
/// drops the wrapped host [`Function`] itself once the script side of the
/// callable becomes unreachable.
fn function_to_js(function: Function, context: &mut Context) -> JsValue {
    let trampoline = Arc::new(Trampoline::new(
        function,
        |js: JsValue| Ok(scalar_js_to_value(&js)),
        |v: Value| Ok(scalar_value_to_js(&v)),
    ));
    // SAFETY: the closure only captures a plain `Arc`, which holds no
    // boa `Gc` pointers for the collector to trace.
    let native = unsafe {
        NativeFunction::from_closure(move |_this, args, _ctx| {
            trampoline
                .invoke(args.to_vec())
                .map_err(|err| JsNativeError::typ().with_message(err.to_string()).into())
        })
    };
    native.to_js_function(context.realm()).into()
}

pub fn js_to_value(js: &JsValue, _context: &mut Context) -> Value {
    scalar_js_to_value(js)
}

fn scalar_js_to_value(js: &JsValue) -> Value {
    if js.is_null() {
        return Value::null();
    }
    if let Some(b) = js.as_boolean() {
        return Value::bool(b);
    }
    if let Some(n) = js.as_number() {
        if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
            return Value::long(n as i64);
        }
        return Value::double(n);
    }
    if let Some(s) = js.as_string() {
        return Value::string(s.to_std_string_escaped());
    }
    if js.is_undefined() {
        return Value::null();
    }
    Value::string(format!("{js:?}"))
}
