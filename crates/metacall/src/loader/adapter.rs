//! The language adapter contract.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::scope::Context;

use super::handle::Handle;

/// The fixed interface every language adapter implements. Adapters
/// register themselves with the loader manager under one or more tags;
/// everything downstream of the façade reaches a guest runtime only
/// through this trait.
///
/// One trait per cross-cutting concern rather than a single god-object:
/// an adapter is "whatever implements `Adapter`", not a concrete struct
/// the core knows about.
pub trait Adapter: Send + Sync {
    /// The tag(s) this adapter answers to, e.g. `["py"]` or `["js", "node"]`.
    fn tags(&self) -> &[&str];

    /// Prepends a path to this adapter's execution-path search list.
    fn execution_path(&self, path: &Path) -> Result<()>;

    /// Attempts each absolute path directly; for relative paths, iterates
    /// the execution-path list until one resolves or all fail.
    fn load_from_file(&self, paths: &[PathBuf]) -> Result<Handle>;

    /// Loads `buffer` (a text blob) as a synthetic module named `name`.
    fn load_from_memory(&self, name: &str, buffer: &str) -> Result<Handle>;

    /// Loads an adapter-defined binary/package form.
    fn load_from_package(&self, path: &Path) -> Result<Handle>;

    /// Walks `handle` and defines every top-level callable/class found into
    /// `ctx`'s scope.
    fn discover(&self, handle: Handle, ctx: &mut Context) -> Result<()>;

    /// Destroys `handle`'s scope and releases adapter state for it.
    /// Best-effort: errors are logged by the caller, not propagated as a
    /// hard failure of the overall `clear` operation.
    fn clear(&self, handle: Handle) -> Result<()>;

    /// Shuts this adapter down: drains its event loop/GIL queue, releases
    /// remaining handles, flags itself destroyed so trailing finalizers
    /// short-circuit.
    fn destroy(&self) -> Result<()>;
}
