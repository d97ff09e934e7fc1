//! Structured errors that can cross a language boundary.

use super::Value;

/// A structured error: message, label/code, numeric code, and stacktrace.
///
/// Every adapter normalizes its guest language's thrown error into this
/// shape at the boundary; the original guest exception object, if one can be
/// kept alive, is preserved separately inside a [`Throwable`].
#[derive(Clone, Debug, Default)]
pub struct Exception {
    pub message: String,
    pub label: String,
    pub code: i64,
    pub stacktrace: String,
}

impl Exception {
    pub fn new(message: impl Into<String>) -> Self {
        Exception {
            message: message.into(),
            label: String::new(),
            code: 0,
            stacktrace: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_stacktrace(mut self, stacktrace: impl Into<String>) -> Self {
        self.stacktrace = stacktrace.into();
        self
    }
}

/// Wraps any [`Value`] that was thrown by a guest runtime, so that dynamic
/// languages throwing non-exception objects (a plain string, a dict, ...)
/// survive the crossing without being forced into [`Exception`] shape.
///
/// A [`crate::facade::metacall`] invocation that fails always returns a
/// value of kind [`crate::value::Kind::Throwable`]; most of the time its
/// inner value is itself of kind `Exception`, but is not guaranteed to be.
#[derive(Debug)]
pub struct Throwable {
    pub value: Box<Value>,
}

impl Throwable {
    pub fn new(value: Value) -> Self {
        Throwable {
            value: Box::new(value),
        }
    }

    pub fn wrapping_exception(exc: Exception) -> Self {
        Throwable::new(Value::exception(exc))
    }
}

impl Clone for Throwable {
    fn clone(&self) -> Self {
        Throwable {
            value: Box::new(self.value.copy()),
        }
    }
}
