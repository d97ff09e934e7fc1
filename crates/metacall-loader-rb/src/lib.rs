//! The `rb` loader adapter: an embedded MRI
//! interpreter owned by one dedicated worker thread.
//!
//! Ruby's VM is pinned to whichever OS thread called `magnus::embed::init`
//! and cannot be reinitialized once torn down, so unlike the `js` adapter's
//! event-loop thread (which also drains a job queue between calls) this
//! thread does nothing extra between jobs — there is no event loop to
//! service, just [`metacall::call::LoopThread`]'s plain submit-and-block
//! primitive reused with a no-op `drive`. A script registers what it wants
//! discoverable by calling a host-provided function,
//! `__metacall_export("name", ->(*args) { ... })`, during evaluation,
//! mirroring the `js` adapter's `__metacall_export` convention (there is no
//! reflection API this adapter relies on instead).

mod marshal;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use magnus::value::Opaque;
use magnus::{function, Proc, Ruby, TryConvert};
use parking_lot::Mutex;
use tracing::{instrument, warn};

use metacall::call::LoopThread;
use metacall::prelude::*;

thread_local! {
    static FUNCTIONS: RefCell<HashMap<u64, Opaque<Proc>>> = RefCell::new(HashMap::new());
    static STAGED_EXPORTS: RefCell<Vec<(String, Opaque<Proc>)>> = RefCell::new(Vec::new());
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// The `__metacall_export(name, proc)` host function a loaded script calls
/// once per callable it wants discoverable.
fn export_native(name: magnus::Value, proc: magnus::Value) -> magnus::Value {
    let ruby = Ruby::get().expect("called from the ruby worker thread");
    let name: String = TryConvert::try_convert(name).unwrap_or_default();
    match TryConvert::try_convert(proc) {
        Ok(proc) => {
            STAGED_EXPORTS.with(|cell| cell.borrow_mut().push((name, Opaque::from(proc))));
        }
        Err(_) => warn!("__metacall_export called with a non-callable second argument"),
    }
    ruby.qnil().as_value()
}

struct RbFunction {
    id: u64,
    name: String,
    loop_thread: Arc<LoopThread>,
}

impl FunctionImpl for RbFunction {
    fn invoke(&self, args: &[Value]) -> Result<Value> {
        let id = self.id;
        let args: Vec<Value> = args.iter().map(Value::copy).collect();
        self.loop_thread.run(move || {
            let ruby = Ruby::get().expect("initialized by the loop thread");
            let proc = FUNCTIONS.with(|cell| cell.borrow().get(&id).copied());
            let Some(proc) = proc else {
                return Err(MetacallError::Tombstoned);
            };
            let proc: Proc = ruby.get_inner(proc);
            let native_args: Vec<magnus::Value> = args.iter().map(marshal::value_to_rb).collect();
            proc.funcall::<_, _, magnus::Value>("call", native_args.as_slice())
                .map(marshal::rb_to_value)
                .map_err(|e| MetacallError::adapter("rb", RbAdapterError(e.to_string())))
        })
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct RbAdapterError(String);

struct HandleState {
    exports: Vec<(u64, String)>,
}

#[derive(Default)]
struct Inner {
    exec_paths: Vec<PathBuf>,
    handles: HashMap<Handle, HandleState>,
}

/// The `rb` adapter: one MRI interpreter per process, owned entirely by its
/// worker thread.
pub struct RbAdapter {
    loop_thread: Arc<LoopThread>,
    inner: Mutex<Inner>,
    destroyed: AtomicBool,
}

impl RbAdapter {
    pub fn new() -> std::io::Result<Arc<Self>> {
        let loop_thread = Arc::new(LoopThread::spawn("metacall-rb-loop", |job| job())?);
        loop_thread.run(|| {
            // SAFETY: called exactly once, from the thread that will own
            // the VM for the rest of the process's life; the cleanup guard
            // is intentionally leaked here rather than dropped at the end
            // of this closure, since the VM must stay alive for every
            // subsequent job this thread runs.
            let cleanup = unsafe { magnus::embed::init() };
            std::mem::forget(cleanup);
            let ruby = Ruby::get().expect("just initialized");
            ruby.define_global_function("__metacall_export", function!(export_native, 2));
            ruby.define_global_function("__metacall_invoke_host", function!(marshal::invoke_host, -1));
        });
        Ok(Arc::new(RbAdapter {
            loop_thread,
            inner: Mutex::new(Inner::default()),
            destroyed: AtomicBool::new(false),
        }))
    }

    pub fn install() -> Result<Arc<Self>> {
        let adapter = Self::new().map_err(|e| MetacallError::Initialization {
            tag: "rb".to_string(),
            reason: e.to_string(),
        })?;
        metacall::facade::register_adapter(adapter.clone())?;
        Ok(adapter)
    }

    fn evaluate(&self, name: &str, source: String) -> Result<Handle> {
        let outcome: std::result::Result<Vec<(u64, String)>, String> = self.loop_thread.run(move || {
            let ruby = Ruby::get().expect("initialized by the loop thread");
            STAGED_EXPORTS.with(|cell| cell.borrow_mut().clear());
            ruby.eval::<magnus::Value>(&source).map_err(|e| e.to_string())?;
            let staged = STAGED_EXPORTS.with(|cell| std::mem::take(&mut *cell.borrow_mut()));
            let mut entries = Vec::with_capacity(staged.len());
            for (export_name, proc) in staged {
                let id = next_id();
                FUNCTIONS.with(|cell| cell.borrow_mut().insert(id, proc));
                entries.push((id, export_name));
            }
            Ok(entries)
        });
        let exports = outcome.map_err(|reason| MetacallError::Load {
            tag: "rb".to_string(),
            name: name.to_string(),
            reason,
        })?;
        let handle = Handle::fresh();
        self.inner.lock().handles.insert(handle, HandleState { exports });
        Ok(handle)
    }

    fn resolve_path(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() || path.exists() {
            return Ok(path.to_path_buf());
        }
        let inner = self.inner.lock();
        for base in &inner.exec_paths {
            let candidate = base.join(path);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(MetacallError::Load {
            tag: "rb".to_string(),
            name: path.display().to_string(),
            reason: "not found on any execution path".to_string(),
        })
    }
}

impl Adapter for RbAdapter {
    fn tags(&self) -> &[&str] {
        &["rb"]
    }

    #[instrument(skip(self))]
    fn execution_path(&self, path: &Path) -> Result<()> {
        self.inner.lock().exec_paths.insert(0, path.to_path_buf());
        Ok(())
    }

    #[instrument(skip(self, paths))]
    fn load_from_file(&self, paths: &[PathBuf]) -> Result<Handle> {
        let mut combined = String::new();
        let mut name = "<empty>".to_string();
        for (i, path) in paths.iter().enumerate() {
            let resolved = self.resolve_path(path)?;
            combined.push_str(&std::fs::read_to_string(&resolved)?);
            combined.push('\n');
            if i == 0 {
                name = resolved.display().to_string();
            }
        }
        self.evaluate(&name, combined)
    }

    #[instrument(skip(self, buffer))]
    fn load_from_memory(&self, name: &str, buffer: &str) -> Result<Handle> {
        self.evaluate(name, buffer.to_string())
    }

    /// MRI has no embedder-facing bytecode/package format; the package form
    /// here is simply a second source file, same as `load_from_file`.
    fn load_from_package(&self, path: &Path) -> Result<Handle> {
        self.load_from_file(&[path.to_path_buf()])
    }

    #[instrument(skip(self, ctx))]
    fn discover(&self, handle: Handle, ctx: &mut Context) -> Result<()> {
        let inner = self.inner.lock();
        let state = inner.handles.get(&handle).ok_or(MetacallError::Tombstoned)?;
        for (id, export_name) in &state.exports {
            let function = Function::new(
                export_name.clone(),
                Signature::new(Vec::new()).variadic(),
                Arc::new(RbFunction {
                    id: *id,
                    name: export_name.clone(),
                    loop_thread: self.loop_thread.clone(),
                }),
            );
            ctx.define(export_name.clone(), Value::function(function))?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn clear(&self, handle: Handle) -> Result<()> {
        if let Some(state) = self.inner.lock().handles.remove(&handle) {
            let ids: Vec<u64> = state.exports.into_iter().map(|(id, _)| id).collect();
            self.loop_thread.run(move || {
                FUNCTIONS.with(|cell| {
                    let mut map = cell.borrow_mut();
                    for id in ids {
                        map.remove(&id);
                    }
                });
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            warn!("rb adapter destroyed twice");
        }
        self.inner.lock().handles.clear();
        self.loop_thread.stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_and_invokes_an_exported_lambda() {
        let adapter = RbAdapter::new().unwrap();
        let handle = adapter.load_from_memory("t", "__metacall_export(\"add\", ->(a, b) { a + b })").unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        let value = ctx.scope().get("add").unwrap();
        let result = value.as_function().unwrap().call(&[Value::long(2), Value::long(3)]).unwrap();
        assert_eq!(result.as_long(), Some(5));
    }

    #[test]
    fn clear_drops_discovered_functions() {
        let adapter = RbAdapter::new().unwrap();
        let handle = adapter.load_from_memory("t", "__metacall_export(\"f\", ->(x) { x })").unwrap();
        adapter.clear(handle).unwrap();
        let mut ctx = Context::new();
        assert!(adapter.discover(handle, &mut ctx).is_err());
    }

    struct Doubler;

    impl FunctionImpl for Doubler {
        fn invoke(&self, args: &[Value]) -> Result<Value> {
            Ok(Value::long(args[0].as_long().unwrap_or_default() * 2))
        }
    }

    #[test]
    fn a_host_function_passed_as_an_argument_is_callable_from_script() {
        let adapter = RbAdapter::new().unwrap();
        let handle = adapter.load_from_memory("t", "__metacall_export(\"apply\", ->(cb, x) { cb.call(x) })").unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        let apply = ctx.scope().get("apply").unwrap();
        let double = Value::function(Function::new(
            "double",
            Signature::new(vec![Parameter::untyped("x")]),
            Arc::new(Doubler),
        ));
        let result = apply.as_function().unwrap().call(&[double, Value::long(21)]).unwrap();
        assert_eq!(result.as_long(), Some(42));
    }

    #[test]
    fn async_invocation_is_rejected_as_not_asynchronous() {
        let adapter = RbAdapter::new().unwrap();
        let handle = adapter.load_from_memory("t", "__metacall_export(\"f\", ->(x) { x })").unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        let value = ctx.scope().get("f").unwrap();
        let function = value.as_function().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let tx_resolve = tx.clone();
        function
            .call_async(&[Value::long(1)], Box::new(move |v| tx_resolve.send(Some(v)).unwrap()), Box::new(move |_| tx.send(None).unwrap()))
            .unwrap();
        assert!(rx.recv().unwrap().is_none());
    }
}
