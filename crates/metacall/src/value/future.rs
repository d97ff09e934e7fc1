//! The `future` kind.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{MetacallError, Result};

use super::function::{Reject, Resolve};
use super::Value;

/// The adapter-supplied half of the future vtable: register resolve/reject
/// callbacks with whatever event loop or coroutine system backs this
/// future. Each adapter supplies its own async-bridge under this one
/// contract.
pub trait FutureImpl: Send + Sync {
    fn await_future(&self, resolve: Resolve, reject: Reject) -> Result<()>;
}

/// A deferred value tied to one runtime's event loop or coroutine system.
///
/// Enforces the at-most-once rule itself (rather than trusting every adapter to do
/// so): a [`Future`] may be awaited at most once, and a second attempt
/// fails with [`MetacallError::AlreadyAwaited`] before the adapter is ever
/// consulted.
#[derive(Clone)]
pub struct Future {
    inner: Arc<dyn FutureImpl>,
    awaited: Arc<AtomicBool>,
}

impl Future {
    pub fn new(inner: Arc<dyn FutureImpl>) -> Self {
        Future {
            inner,
            awaited: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers `resolve`/`reject`. Exactly one of them fires exactly once,
    /// on whichever thread the adapter's protocol requires.
    pub fn await_future(&self, resolve: Resolve, reject: Reject) -> Result<()> {
        if self
            .awaited
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MetacallError::AlreadyAwaited);
        }
        self.inner.await_future(resolve, reject)
    }
}

impl fmt::Debug for Future {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("awaited", &self.awaited.load(Ordering::Relaxed))
            .finish()
    }
}

/// Adapts a plain callback pair into the shape `Function::call_async` wants,
/// used when bridging a synchronous function's immediate result through the
/// same `resolve`/`reject` path as a real future.
pub fn immediate(value: Result<Value>, resolve: Resolve, reject: Reject) {
    match value {
        Ok(v) => resolve(v),
        Err(e) => reject(Value::throwable_from_error(&e)),
    }
}
