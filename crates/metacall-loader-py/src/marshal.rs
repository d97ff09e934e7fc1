//! Bidirectional conversion between [`Value`] and pyo3's `PyObject`.
//!
//! Python's numeric tower keeps `int` and `float` distinct (unlike
//! JavaScript), so this mapping is closer to exact than the `js` adapter's:
//! `Kind::Long` round-trips through Python `int` (arbitrary precision on
//! the Python side, truncated to `i64` coming back), `Kind::Double` through
//! `float`, `Kind::String` through `str`.
//!
//! `Kind::Function` crossing IN is wrapped in a [`Trampoline`] and exposed
//! as a closure-backed `PyCFunction`, so a script can call a host callback
//! directly. `Python::with_gil` is documented reentrant, so the trampoline's
//! own conversions can re-acquire it even though they always run while the
//! GIL is already held by the call that reached the closure.

use std::sync::Arc;

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::{PyCFunction, PyDict, PyTuple};

use metacall::call::Trampoline;
use metacall::prelude::*;

pub fn value_to_py(value: &Value, py: Python<'_>) -> PyObject {
    match value.kind() {
        Kind::Function => {
            let function = value.as_function().expect("kind checked").clone();
            function_to_py(function, py)
        }
        _ => scalar_value_to_py(value, py),
    }
}

fn scalar_value_to_py(value: &Value, py: Python<'_>) -> PyObject {
    match value.kind() {
        Kind::Null => py.None(),
        Kind::Bool => value.as_bool().unwrap_or_default().into_py(py),
        Kind::Char | Kind::Short | Kind::Int | Kind::Long => value.as_long().unwrap_or_default().into_py(py),
        Kind::Float | Kind::Double => value.as_double().unwrap_or_default().into_py(py),
        Kind::String => value.as_str().unwrap_or_default().into_py(py),
        // Every other kind has no faithful scalar rendition here; callers
        // that need one round-trip structured data through a pointer value
        // instead, the same best-effort narrowing the `js` adapter takes.
        _ => py.None(),
    }
}

/// Wraps `function` in a Python-callable closure. The closure captures the
/// trampoline by `Arc`; CPython's refcounting drops the wrapped host
/// `Function` once the last reference to the returned callable goes away.
fn function_to_py(function: Function, py: Python<'_>) -> PyObject {
    let trampoline = Arc::new(Trampoline::new(
        function,
        |obj: PyObject| Ok(Python::with_gil(|py| py_to_value(obj.as_ref(py)))),
        |v: Value| Ok(Python::with_gil(|py| scalar_value_to_py(&v, py))),
    ));
    let closure = move |args: &PyTuple, _kwargs: Option<&PyDict>| -> PyResult<PyObject> {
        let native_args: Vec<PyObject> = args.iter().map(|a| a.into_py(args.py())).collect();
        trampoline.invoke(native_args).map_err(|err| PyRuntimeError::new_err(err.to_string()))
    };
    PyCFunction::new_closure(py, None, None, closure)
        .expect("closure signature matches PyCFunction::new_closure's contract")
        .into_py(py)
}

pub fn py_to_value(obj: &PyAny) -> Value {
    if obj.is_none() {
        return Value::null();
    }
    if let Ok(b) = obj.extract::<bool>() {
        return Value::bool(b);
    }
    if let Ok(n) = obj.extract::<i64>() {
        return Value::long(n);
    }
    if let Ok(f) = obj.extract::<f64>() {
        return Value::double(f);
    }
    if let Ok(s) = obj.extract::<String>() {
        return Value::string(s);
    }
    Value::string(obj.str().map(|s| s.to_string()).unwrap_or_default())
}
