//! Convenience re-exports for adapter crates.

pub use crate::error::{MetacallError, Result, Status};
pub use crate::facade;
pub use crate::loader::{Adapter, Handle};
pub use crate::reflect::{Parameter, Signature, Type};
pub use crate::scope::{Context, Scope};
pub use crate::value::{
    AccessorStyle, Class, ClassImpl, Exception, Finalizer, Function, FunctionImpl, Future, FutureImpl, Kind, Object,
    ObjectImpl, PointerId, Reject, Resolve, Throwable, Value,
};
