//! Bidirectional conversion between [`Value`] and `magnus`'s `Value`.
//!
//! Ruby, like Python, keeps integers and floats distinct, so the scalar
//! mapping is direct in both directions; everything past scalars falls
//! back to `nil` coming in and `to_s` going out, the same best-effort
//! narrowing the `js` and `py` adapters take.
//!
//! `Kind::Function` is the exception magnus forces on this adapter: unlike
//! boa's `NativeFunction::from_closure` or pyo3's `PyCFunction::new_closure`,
//! magnus's `function!` macro only wraps a static, non-capturing Rust `fn`.
//! A host [`Function`] can't be captured directly, so it is registered in
//! [`HOST_FUNCTIONS`] under a fresh id and handed to the script as a small
//! generated lambda that calls back into the one fixed dispatcher,
//! [`invoke_host`], with that id as its leading argument.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use magnus::value::ReprValue;
use magnus::{IntoValue, Ruby, TryConvert};
use tracing::warn;

use metacall::prelude::*;

thread_local! {
    static HOST_FUNCTIONS: RefCell<HashMap<u64, Function>> = RefCell::new(HashMap::new());
}

static NEXT_HOST_ID: AtomicU64 = AtomicU64::new(1);

fn next_host_id() -> u64 {
    NEXT_HOST_ID.fetch_add(1, Ordering::Relaxed)
}

pub fn value_to_rb(value: &Value) -> magnus::Value {
    let ruby = Ruby::get().expect("called from the ruby worker thread");
    match value.kind() {
        Kind::Function => function_to_rb(value.as_function().expect("kind checked").clone()),
        Kind::Null => ruby.qnil().as_value(),
        Kind::Bool => value.as_bool().unwrap_or_default().into_value(),
        Kind::Char | Kind::Short | Kind::Int | Kind::Long => value.as_long().unwrap_or_default().into_value(),
        Kind::Float | Kind::Double => value.as_double().unwrap_or_default().into_value(),
        Kind::String => value.as_str().unwrap_or_default().into_value(),
        _ => ruby.qnil().as_value(),
    }
}

/// Registers `function` and returns a lambda that, when called from Ruby,
/// dispatches to it through [`invoke_host`]. The registry entry lives for
/// the rest of the process — there is no per-value finalizer hook on this
/// crossing-IN direction to tie its removal to, the same tradeoff this
/// adapter already accepts for the leaked VM cleanup guard in `lib.rs`.
fn function_to_rb(function: Function) -> magnus::Value {
    let ruby = Ruby::get().expect("called from the ruby worker thread");
    let id = next_host_id();
    HOST_FUNCTIONS.with(|cell| cell.borrow_mut().insert(id, function));
    ruby.eval(&format!("->(*args) {{ __metacall_invoke_host({id}, *args) }}"))
        .expect("a lambda literal closing over a fixed numeric id is always valid ruby source")
}

/// The fixed dispatcher registered once as `__metacall_invoke_host`, taking
/// the host function's registry id as its first argument and the actual
/// call arguments as the rest.
pub fn invoke_host(args: &[magnus::Value]) -> magnus::Value {
    let ruby = Ruby::get().expect("called from the ruby worker thread");
    let Some((id, rest)) = args.split_first() else {
        return ruby.qnil().as_value();
    };
    let Ok(id) = u64::try_convert(*id) else {
        return ruby.qnil().as_value();
    };
    let function = HOST_FUNCTIONS.with(|cell| cell.borrow().get(&id).cloned());
    let Some(function) = function else {
        return ruby.qnil().as_value();
    };
    let values: Vec<Value> = rest.iter().map(|a| rb_to_value(*a)).collect();
    match function.call(&values) {
        Ok(result) => value_to_rb(&result),
        Err(err) => {
            warn!(%err, "host callback invoked from ruby failed");
            ruby.qnil().as_value()
        }
    }
}

pub fn rb_to_value(value: magnus::Value) -> Value {
    if value.is_nil() {
        return Value::null();
    }
    if let Ok(b) = bool::try_convert(value) {
        return Value::bool(b);
    }
    if let Ok(n) = i64::try_convert(value) {
        return Value::long(n);
    }
    if let Ok(f) = f64::try_convert(value) {
        return Value::double(f);
    }
    if let Ok(s) = String::try_convert(value) {
        return Value::string(s);
    }
    let rendered: String = value.funcall("to_s", ()).unwrap_or_else(|_| "<ruby value>".to_string());
    Value::string(rendered)
}
