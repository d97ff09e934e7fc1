//! Callback trampolines for functions crossing the boundary IN.
//!
//! A host function handed to a guest script is wrapped in a `Trampoline`
//! rather than exposed directly: the guest only ever calls the trampoline's
//! native entry point, which converts guest-side arguments back to values,
//! dispatches to the host [`Function`], and converts the result forward
//! again. The trampoline's lifetime is tied to the wrapping value's
//! finalizer.

use crate::error::Result;
use crate::value::{Function, Value};

/// Wraps a host [`Function`] for invocation from native arguments of type
/// `Native`, using adapter-supplied converters in both directions.
pub struct Trampoline<Native> {
    function: Function,
    to_value: Box<dyn Fn(Native) -> Result<Value> + Send + Sync>,
    from_value: Box<dyn Fn(Value) -> Result<Native> + Send + Sync>,
}

impl<Native> Trampoline<Native> {
    pub fn new(
        function: Function,
        to_value: impl Fn(Native) -> Result<Value> + Send + Sync + 'static,
        from_value: impl Fn(Value) -> Result<Native> + Send + Sync + 'static,
    ) -> Self {
        Trampoline {
            function,
            to_value: Box::new(to_value),
            from_value: Box::new(from_value),
        }
    }

    /// Called by the guest with its own native argument representation;
    /// converts in, dispatches to the host function, converts the result
    /// back out.
    pub fn invoke(&self, args: Vec<Native>) -> Result<Native> {
        let values = args
            .into_iter()
            .map(|a| (self.to_value)(a))
            .collect::<Result<Vec<Value>>>()?;
        let result = self.function.call(&values)?;
        (self.from_value)(result)
    }

    pub fn function(&self) -> &Function {
        &self.function
    }
}
