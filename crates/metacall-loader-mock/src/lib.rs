//! The `mock`/`file` loader adapter: Profile C, no embedded runtime.
//!
//! A deterministic, dependency-free adapter the rest of the system can be
//! tested against. Rather than a fixed set of hardcoded functions, it
//! generalizes into a small textual DSL (see [`script`]) so
//! `load_from_file`/`load_from_memory` actually do something with their
//! input instead of ignoring it.

mod script;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{instrument, warn};

use metacall::prelude::*;
use script::FunctionDef;

struct MockFunction {
    def: FunctionDef,
}

impl FunctionImpl for MockFunction {
    fn invoke(&self, args: &[Value]) -> Result<Value> {
        script::eval(&self.def.body, &self.def.params, args)
    }

    fn debug_name(&self) -> &str {
        &self.def.name
    }
}

/// Per-handle state: the function definitions discovered from that
/// handle's source text, kept around so `clear` can drop them.
#[derive(Default)]
struct HandleState {
    defs: Vec<FunctionDef>,
}

#[derive(Default)]
struct Inner {
    exec_paths: Vec<PathBuf>,
    handles: HashMap<Handle, HandleState>,
}

/// The mock/file adapter. Profile C: no dedicated thread, just a
/// `Mutex` around its handle table, since there is no embedded runtime to
/// gate access to.
pub struct MockAdapter {
    inner: Mutex<Inner>,
    destroyed: AtomicBool,
}

impl Default for MockAdapter {
    fn default() -> Self {
        MockAdapter {
            inner: Mutex::new(Inner::default()),
            destroyed: AtomicBool::new(false),
        }
    }
}

impl MockAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a fresh [`MockAdapter`] with the façade under both the
    /// `mock` and `file` tags.
    pub fn install() -> Result<Arc<Self>> {
        let adapter = Self::new();
        metacall::facade::register_adapter(adapter.clone())?;
        Ok(adapter)
    }

    fn resolve_source(&self, path: &Path) -> Result<String> {
        let inner = self.inner.lock();
        if path.is_absolute() {
            return std::fs::read_to_string(path).map_err(MetacallError::Io);
        }
        for base in &inner.exec_paths {
            let candidate = base.join(path);
            if candidate.exists() {
                return std::fs::read_to_string(&candidate).map_err(MetacallError::Io);
            }
        }
        // Fall back to resolving relative to the current directory, the way
        // an empty execution-path list still lets a script load from cwd.
        std::fs::read_to_string(path).map_err(MetacallError::Io)
    }

    fn load_text(&self, name: &str, text: &str) -> Result<Handle> {
        let defs = script::parse(text).map_err(|e| MetacallError::Load {
            tag: "mock".to_string(),
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let handle = Handle::fresh();
        self.inner.lock().handles.insert(handle, HandleState { defs });
        Ok(handle)
    }
}

impl Adapter for MockAdapter {
    fn tags(&self) -> &[&str] {
        &["mock", "file"]
    }

    #[instrument(skip(self))]
    fn execution_path(&self, path: &Path) -> Result<()> {
        self.inner.lock().exec_paths.insert(0, path.to_path_buf());
        Ok(())
    }

    #[instrument(skip(self, paths))]
    fn load_from_file(&self, paths: &[PathBuf]) -> Result<Handle> {
        let mut combined = String::new();
        for path in paths {
            combined.push_str(&self.resolve_source(path)?);
            combined.push('\n');
        }
        let name = paths
            .first()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<empty>".to_string());
        self.load_text(&name, &combined)
    }

    #[instrument(skip(self, buffer))]
    fn load_from_memory(&self, name: &str, buffer: &str) -> Result<Handle> {
        self.load_text(name, buffer)
    }

    /// The mock adapter has no binary package form; `load_from_package` is
    /// rejected rather than silently treated as `load_from_file` (a real
    /// adapter without one should say so, not guess).
    fn load_from_package(&self, path: &Path) -> Result<Handle> {
        Err(MetacallError::Load {
            tag: "mock".to_string(),
            name: path.display().to_string(),
            reason: "the mock/file adapter has no package form".to_string(),
        })
    }

    #[instrument(skip(self, ctx))]
    fn discover(&self, handle: Handle, ctx: &mut Context) -> Result<()> {
        let inner = self.inner.lock();
        let state = inner.handles.get(&handle).ok_or(MetacallError::Tombstoned)?;
        for def in &state.defs {
            let parameters = def.params.iter().map(|p| Parameter::untyped(p.clone())).collect();
            let function = Function::new(
                def.name.clone(),
                Signature::new(parameters),
                Arc::new(MockFunction { def: def.clone() }),
            );
            ctx.define(def.name.clone(), Value::function(function))?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn clear(&self, handle: Handle) -> Result<()> {
        self.inner.lock().handles.remove(&handle);
        Ok(())
    }

    #[instrument(skip(self))]
    fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            warn!("mock adapter destroyed twice");
        }
        self.inner.lock().handles.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_and_invokes_concat() {
        let adapter = MockAdapter::default();
        let handle = adapter.load_from_memory("t", "concat(a, b) = a + b").unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        let value = ctx.scope().get("concat").unwrap();
        let result = value.as_function().unwrap().call(&[Value::string("hello "), Value::string("world")]).unwrap();
        assert_eq!(result.as_str(), Some("hello world"));
    }

    #[test]
    fn thrown_value_is_throwable_kind() {
        let adapter = MockAdapter::default();
        let handle = adapter.load_from_memory("t", r#"boom() = throw("boom")"#).unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        let value = ctx.scope().get("boom").unwrap();
        let result = value.as_function().unwrap().call(&[]).unwrap();
        assert!(result.as_throwable().is_some());
    }

    #[test]
    fn call_async_on_a_sync_mock_function_synthesizes_immediate_resolution() {
        let adapter = MockAdapter::default();
        let handle = adapter.load_from_memory("t", "identity(x) = x").unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        let value = ctx.scope().get("identity").unwrap();
        let function = value.as_function().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let tx_reject = tx.clone();
        function
            .call_async(
                &[Value::int(1)],
                Box::new(move |v| tx.send(v.as_long()).unwrap()),
                Box::new(move |_| tx_reject.send(None).unwrap()),
            )
            .unwrap();
        // identity(x) is synchronous, so `call_async` synthesizes an
        // immediate resolution rather than going through `invoke_async`.
        assert_eq!(rx.recv(), Ok(Some(1)));
    }

    #[test]
    fn clear_drops_handle_state() {
        let adapter = MockAdapter::default();
        let handle = adapter.load_from_memory("t", "f(x) = x").unwrap();
        adapter.clear(handle).unwrap();
        let mut ctx = Context::new();
        assert!(adapter.discover(handle, &mut ctx).is_err());
    }
}
