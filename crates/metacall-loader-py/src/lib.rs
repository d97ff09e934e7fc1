//! The `py` loader adapter: an embedded CPython
//! interpreter gated by the GIL.
//!
//! Every entry point acquires the GIL through [`with_gil`], which wraps
//! `pyo3::Python::with_gil` with two things Profile B additionally asks
//! for: a [`ReentrancyGuard`] so nested entry (a Python callback calling
//! back into a discovered function) is visible as such rather than an
//! unexplained second lock acquisition, and draining this adapter's
//! [`DelayedDestroyQueue`] of any `Py<PyAny>` a foreign thread dropped
//! without holding the GIL. Asynchronous invocations are handed to one
//! dedicated background thread rather than run inline, since a synchronous
//! `invoke_async` caller must not block on Python code it did not ask to
//! wait for.

mod marshal;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use parking_lot::Mutex;
use pyo3::prelude::*;
use pyo3::types::PyTuple;
use tracing::{instrument, warn};

use metacall::call::{DelayedDestroyQueue, ReentrancyGuard};
use metacall::prelude::*;

type Job = Box<dyn FnOnce() + Send>;

/// Runs `f` with the GIL held, entering a [`ReentrancyGuard`] and draining
/// `destroy_queue` first. Safe to call while already holding the GIL:
/// `Python::with_gil` is documented as reentrant.
fn with_gil<R>(destroy_queue: &DelayedDestroyQueue, f: impl FnOnce(Python<'_>) -> R) -> R {
    let _guard = ReentrancyGuard::enter();
    Python::with_gil(|py| {
        destroy_queue.drain();
        f(py)
    })
}

/// The background thread Profile B's table entry asks for: async calls run
/// here so a foreign caller's `invoke_async` never blocks on Python code.
struct Background {
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Background {
    fn spawn() -> std::io::Result<Self> {
        let (sender, receiver) = std::sync::mpsc::channel::<Job>();
        let handle = std::thread::Builder::new().name("metacall-py-async".to_string()).spawn(move || {
            for job in receiver {
                job();
            }
        })?;
        Ok(Background {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn submit(&self, job: Job) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(job);
        }
    }

    /// Drops the job sender so the thread's receive loop ends, then joins
    /// it. Idempotent.
    fn stop(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct PyAdapterError(String);

/// Declaration-time async check: `true` only for a genuine `async def`, not
/// merely a function that happens to return an awaitable.
fn is_coroutine_function(py: Python<'_>, value: &PyAny) -> bool {
    py.import("inspect")
        .and_then(|m| m.call_method1("iscoroutinefunction", (value,)))
        .and_then(|r| r.extract::<bool>())
        .unwrap_or(false)
}

struct PyFunction {
    func: Option<Py<PyAny>>,
    name: String,
    destroy_queue: Arc<DelayedDestroyQueue>,
    background: Arc<Background>,
}

impl FunctionImpl for PyFunction {
    fn invoke(&self, args: &[Value]) -> Result<Value> {
        with_gil(&self.destroy_queue, |py| {
            let func = self.func.as_ref().ok_or(MetacallError::Tombstoned)?.as_ref(py);
            let native_args: Vec<PyObject> = args.iter().map(|a| marshal::value_to_py(a, py)).collect();
            let tuple = PyTuple::new(py, native_args);
            func.call1(tuple)
                .map(|r| marshal::py_to_value(r))
                .map_err(|e| MetacallError::adapter("py", PyAdapterError(e.to_string())))
        })
    }

    fn invoke_async(&self, args: &[Value], resolve: Resolve, reject: Reject) -> Result<()> {
        let args: Vec<Value> = args.iter().map(Value::copy).collect();
        let destroy_queue = self.destroy_queue.clone();
        let name = self.name.clone();
        let func = with_gil(&destroy_queue, |py| self.func.as_ref().map(|f| f.clone_ref(py)));
        let Some(func) = func else {
            reject(Value::throwable_from_error(&MetacallError::Tombstoned));
            return Ok(());
        };
        let destroy_queue_for_job = destroy_queue.clone();
        self.background.submit(Box::new(move || {
            let outcome = with_gil(&destroy_queue_for_job, |py| {
                let native_args: Vec<PyObject> = args.iter().map(|a| marshal::value_to_py(a, py)).collect();
                let tuple = PyTuple::new(py, native_args);
                func.as_ref(py)
                    .call1(tuple)
                    .map(|r| marshal::py_to_value(r))
                    .map_err(|e| e.to_string())
            });
            match outcome {
                Ok(v) => resolve(v),
                Err(reason) => reject(Value::throwable(Throwable::wrapping_exception(Exception::new(format!(
                    "{name}: {reason}"
                ))))),
            }
        }));
        Ok(())
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}

impl Drop for PyFunction {
    /// Defers the actual decref to the delayed-destroy queue rather than
    /// dropping `Py<PyAny>` directly here: `PyFunction` can be dropped from
    /// any thread that last held a `Function` clone, not just one with the
    /// GIL already acquired.
    fn drop(&mut self) {
        if let Some(func) = self.func.take() {
            self.destroy_queue.push(Box::new(move || {
                Python::with_gil(|_| drop(func));
            }));
        }
    }
}

struct HandleState {
    module: Py<PyModule>,
}

#[derive(Default)]
struct Inner {
    exec_paths: Vec<PathBuf>,
    handles: HashMap<Handle, HandleState>,
}

/// The `py` adapter: one CPython interpreter per process (via pyo3's
/// `auto-initialize`), gated by the GIL.
pub struct PyAdapter {
    inner: Mutex<Inner>,
    destroyed: AtomicBool,
    destroy_queue: Arc<DelayedDestroyQueue>,
    background: Arc<Background>,
}

impl PyAdapter {
    pub fn new() -> std::io::Result<Arc<Self>> {
        Ok(Arc::new(PyAdapter {
            inner: Mutex::new(Inner::default()),
            destroyed: AtomicBool::new(false),
            destroy_queue: Arc::new(DelayedDestroyQueue::default()),
            background: Arc::new(Background::spawn()?),
        }))
    }

    pub fn install() -> Result<Arc<Self>> {
        let adapter = Self::new().map_err(|e| MetacallError::Initialization {
            tag: "py".to_string(),
            reason: e.to_string(),
        })?;
        metacall::facade::register_adapter(adapter.clone())?;
        Ok(adapter)
    }

    fn build_handle(&self, name: &str, source: &str) -> Result<Handle> {
        let module: Py<PyModule> = with_gil(&self.destroy_queue, |py| {
            PyModule::from_code(py, source, name, name)
                .map(Into::into)
                .map_err(|e| MetacallError::Load {
                    tag: "py".to_string(),
                    name: name.to_string(),
                    reason: e.to_string(),
                })
        })?;
        let handle = Handle::fresh();
        self.inner.lock().handles.insert(handle, HandleState { module });
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
            tag: "py".to_string(),
            name: path.display().to_string(),
            reason: "not found on any execution path".to_string(),
        })
    }
}

impl Adapter for PyAdapter {
    fn tags(&self) -> &[&str] {
        &["py"]
    }

    #[instrument(skip(self))]
    fn execution_path(&self, path: &Path) -> Result<()> {
        let path_str = path.display().to_string();
        with_gil(&self.destroy_queue, |py| -> Result<()> {
            let sys = py.import("sys").map_err(|e| MetacallError::adapter("py", PyAdapterError(e.to_string())))?;
            let syspath = sys.getattr("path").map_err(|e| MetacallError::adapter("py", PyAdapterError(e.to_string())))?;
            syspath
                .call_method1("insert", (0, path_str))
                .map_err(|e| MetacallError::adapter("py", PyAdapterError(e.to_string())))?;
            Ok(())
        })?;
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
                name = resolved.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or(name);
            }
        }
        self.build_handle(&name, &combined)
    }

    #[instrument(skip(self, buffer))]
    fn load_from_memory(&self, name: &str, buffer: &str) -> Result<Handle> {
        self.build_handle(name, buffer)
    }

    /// pyo3's embedding surface has no frozen/bytecode module loader; the
    /// package form here is simply source, same as `load_from_file`.
    fn load_from_package(&self, path: &Path) -> Result<Handle> {
        self.load_from_file(&[path.to_path_buf()])
    }

    #[instrument(skip(self, ctx))]
    fn discover(&self, handle: Handle, ctx: &mut Context) -> Result<()> {
        let inner = self.inner.lock();
        let state = inner.handles.get(&handle).ok_or(MetacallError::Tombstoned)?;
        let entries: Vec<(String, Py<PyAny>, bool)> = with_gil(&self.destroy_queue, |py| {
            let module = state.module.as_ref(py);
            let dict = module.dict();
            let mut entries = Vec::new();
            for (key, value) in dict.iter() {
                let Ok(key) = key.extract::<String>() else {
                    continue;
                };
                if key.starts_with('_') || !value.is_callable() {
                    continue;
                }
                let is_async = is_coroutine_function(py, value);
                entries.push((key, value.into_py(py), is_async));
            }
            entries
        });
        for (export_name, func, is_async) in entries {
            let mut signature = Signature::new(Vec::new()).variadic();
            if is_async {
                signature = signature.asynchronous();
            }
            let function = Function::new(
                export_name.clone(),
                signature,
                Arc::new(PyFunction {
                    func: Some(func),
                    name: export_name.clone(),
                    destroy_queue: self.destroy_queue.clone(),
                    background: self.background.clone(),
                }),
            );
            ctx.define(export_name, Value::function(function))?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn clear(&self, handle: Handle) -> Result<()> {
        if let Some(state) = self.inner.lock().handles.remove(&handle) {
            self.destroy_queue.push(Box::new(move || {
                Python::with_gil(|_| drop(state.module));
            }));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            warn!("py adapter destroyed twice");
        }
        let handles = std::mem::take(&mut self.inner.lock().handles);
        with_gil(&self.destroy_queue, |_| drop(handles));
        self.background.stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_and_invokes_a_module_level_function() {
        let adapter = PyAdapter::new().unwrap();
        let handle = adapter.load_from_memory("t", "def add(a, b):\n    return a + b\n").unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        let value = ctx.scope().get("add").unwrap();
        let result = value.as_function().unwrap().call(&[Value::long(2), Value::long(3)]).unwrap();
        assert_eq!(result.as_long(), Some(5));
    }

    #[test]
    fn private_names_are_not_discovered() {
        let adapter = PyAdapter::new().unwrap();
        let handle = adapter
            .load_from_memory("t", "def _hidden():\n    return 1\ndef visible():\n    return 2\n")
            .unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        assert!(!ctx.scope().contains("_hidden"));
        assert!(ctx.scope().contains("visible"));
    }

    #[test]
    fn call_async_resolves_a_synchronous_export_inline() {
        let adapter = PyAdapter::new().unwrap();
        let handle = adapter.load_from_memory("t", "def inc(x):\n    return x + 1\n").unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        let value = ctx.scope().get("inc").unwrap();
        let function = value.as_function().unwrap();
        assert!(!function.is_async());
        let (tx, rx) = std::sync::mpsc::channel();
        let tx_reject = tx.clone();
        function
            .call_async(&[Value::long(41)], Box::new(move |v| tx.send(v.as_long()).unwrap()), Box::new(move |_| tx_reject.send(None).unwrap()))
            .unwrap();
        assert_eq!(rx.recv(), Ok(Some(42)));
    }

    #[test]
    fn discover_distinguishes_async_def_from_def() {
        let adapter = PyAdapter::new().unwrap();
        let handle = adapter
            .load_from_memory("t", "def inc(x):\n    return x + 1\nasync def ainc(x):\n    return x + 1\n")
            .unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        assert!(!ctx.scope().get("inc").unwrap().as_function().unwrap().is_async());
        assert!(ctx.scope().get("ainc").unwrap().as_function().unwrap().is_async());
    }

    struct Doubler;

    impl FunctionImpl for Doubler {
        fn invoke(&self, args: &[Value]) -> Result<Value> {
            Ok(Value::long(args[0].as_long().unwrap_or_default() * 2))
        }
    }

    #[test]
    fn a_host_function_passed_as_an_argument_is_callable_from_script() {
        let adapter = PyAdapter::new().unwrap();
        let handle = adapter.load_from_memory("t", "def apply(cb, x):\n    return cb(x)\n").unwrap();
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
    fn clear_drops_handle_state() {
        let adapter = PyAdapter::new().unwrap();
        let handle = adapter.load_from_memory("t", "def f(x):\n    return x\n").unwrap();
        adapter.clear(handle).unwrap();
        let mut ctx = Context::new();
        assert!(adapter.discover(handle, &mut ctx).is_err());
    }
}
