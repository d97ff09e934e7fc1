//! The `function` kind.

use std::fmt;
use std::sync::Arc;

use crate::error::{MetacallError, Result};
use crate::reflect::Signature;

use super::Value;

/// Resolve/reject callbacks for an asynchronous invocation, used both by
/// [`FunctionImpl::invoke_async`] and by [`super::future::FutureImpl::await_future`].
pub type Resolve = Box<dyn FnOnce(Value) + Send>;
pub type Reject = Box<dyn FnOnce(Value) + Send>;

/// The adapter-supplied half of the function vtable: `create` is the
/// adapter's own constructor (there is no generic Rust trait method for it —
/// each adapter builds its `Arc<dyn FunctionImpl>` however it likes), and
/// `destroy` is simply `Drop`. What remains, `invoke` and `await`, is this
/// trait.
pub trait FunctionImpl: Send + Sync {
    /// Calls the underlying callable synchronously.
    fn invoke(&self, args: &[Value]) -> Result<Value>;

    /// Calls the underlying callable and resolves or rejects asynchronously.
    /// The default implementation rejects with [`MetacallError::NotAsync`],
    /// which is the correct behavior for any callable whose adapter has no
    /// coroutine/event-loop bridge — rejecting rather
    /// than returning a bare `Err` keeps the "exactly one callback fires"
    /// rule true even for this fallback path.
    fn invoke_async(&self, _args: &[Value], _resolve: Resolve, reject: Reject) -> Result<()> {
        reject(Value::throwable_from_error(&MetacallError::NotAsync(
            self.debug_name().to_string(),
        )));
        Ok(())
    }

    /// Used only to build error messages; adapters may return an empty
    /// string if the name is tracked elsewhere.
    fn debug_name(&self) -> &str {
        ""
    }
}

/// A callable crossing the polyglot boundary: a name, a signature, and the
/// adapter-specific implementation behind it.
#[derive(Clone)]
pub struct Function {
    name: String,
    signature: Signature,
    inner: Arc<dyn FunctionImpl>,
}

impl Function {
    pub fn new(name: impl Into<String>, signature: Signature, inner: Arc<dyn FunctionImpl>) -> Self {
        Function {
            name: name.into(),
            signature,
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn is_async(&self) -> bool {
        self.signature.is_async
    }

    /// Invokes the function, checking arity first.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        self.check_arity(args.len())?;
        self.inner.invoke(args)
    }

    /// Dispatches to `await` if async, otherwise synthesizes an immediate
    /// resolution by calling synchronously and forwarding the result or
    /// error to `resolve`/`reject`. Once `resolve`
    /// and `reject` are handed in, exactly one of them fires exactly once
    /// — an arity mismatch rejects rather than returning an
    /// `Err` that would otherwise strand the callbacks unfired.
    pub fn call_async(&self, args: &[Value], resolve: Resolve, reject: Reject) -> Result<()> {
        if let Err(err) = self.check_arity(args.len()) {
            reject(Value::throwable_from_error(&err));
            return Ok(());
        }
        if self.signature.is_async {
            self.inner.invoke_async(args, resolve, reject)
        } else {
            match self.inner.invoke(args) {
                Ok(v) => {
                    resolve(v);
                    Ok(())
                }
                Err(err) => {
                    reject(Value::throwable_from_error(&err));
                    Ok(())
                }
            }
        }
    }

    fn check_arity(&self, actual: usize) -> Result<()> {
        if self.signature.admits(actual) {
            Ok(())
        } else {
            Err(MetacallError::ArityMismatch {
                name: self.name.clone(),
                expected: self.signature.arity_description(),
                actual,
            })
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}
