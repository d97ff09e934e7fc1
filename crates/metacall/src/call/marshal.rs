//! Cross-runtime value marshalling contract.

use crate::error::Result;
use crate::value::Value;

/// Converts between [`Value`] and one adapter's native representation.
/// Each adapter implements this once for its own `Native` type (a
/// `boa_engine::JsValue`, a `pyo3::PyObject`, ...); the core only fixes the
/// shape of the conversion, not the type it converts to.
pub trait Marshal {
    type Native;

    /// May allocate runtime-side objects; implementations must register
    /// them so they are released by the adapter's `clear`/`destroy`.
    fn to_native(&self, value: &Value) -> Result<Self::Native>;

    /// Kind inference prefers the richest representation: promise-like
    /// objects become futures, dict-like objects become string-keyed maps,
    /// callables become functions whose arity is inferred from runtime
    /// introspection where possible (declared variadic otherwise), and
    /// anything unrecognized becomes an opaque pointer value carrying a
    /// deferred destructor.
    fn from_native(&self, native: Self::Native) -> Result<Value>;
}
