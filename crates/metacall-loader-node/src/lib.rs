//! The `js`/`node` loader adapter: a `boa_engine`
//! interpreter owned by one dedicated OS thread, honoring the
//! single-threaded cooperative event loop gating rule.
//!
//! `boa_engine::Context` is not `Send`, so it never crosses threads: it
//! lives in a thread-local on the loop thread started by
//! [`metacall::call::LoopThread`], and every access goes through
//! [`with_context`]. Discovered functions and the promise
//! bridge described below are likewise kept as thread-local `JsValue`
//! tables, referenced from the `Send + Sync` side only by integer id.
//!
//! Promises are awaited through a small JavaScript-side shim
//! (`__metacall_bridge`) rather than Rust-side property access: boa's
//! embedding surface gives us `eval`, `register_global_function`, and
//! calling an `as_callable()` value, which is enough to let JS itself do
//! `promise.then(...)` and report back through two more registered native
//! functions. This avoids needing a stable reflection API for "is this
//! thenable" and "get me its `.then`" that the embedding does not expose.

mod marshal;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use boa_engine::{Context as JsContext, JsValue};
use parking_lot::Mutex;
use tracing::{instrument, warn};

use metacall::call::LoopThread;
use metacall::prelude::*;

const BRIDGE_SOURCE: &str = r#"
function __metacall_bridge(ticket, value) {
    if (value && typeof value.then === "function") {
        value.then(
            function (v) { __metacall_resolve(ticket, v); },
            function (e) { __metacall_reject(ticket, e); }
        );
    } else {
        __metacall_resolve(ticket, value);
    }
}
function __metacall_is_async(fn) {
    return typeof fn === "function" && fn.constructor && fn.constructor.name === "AsyncFunction";
}
"#;

thread_local! {
    static CONTEXT: RefCell<Option<JsContext>> = const { RefCell::new(None) };
    static BRIDGE: RefCell<Option<JsValue>> = const { RefCell::new(None) };
    static ASYNC_CHECK: RefCell<Option<JsValue>> = const { RefCell::new(None) };
    static FUNCTIONS: RefCell<HashMap<u64, JsValue>> = RefCell::new(HashMap::new());
    static PENDING_ASYNC: RefCell<HashMap<u64, (Resolve, Reject)>> = RefCell::new(HashMap::new());
    static STAGED_EXPORTS: RefCell<Vec<(String, JsValue)>> = RefCell::new(Vec::new());
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Runs `f` against the thread-local interpreter, lazily constructing it
/// (and evaluating the promise bridge) on first use. Must only be called
/// from the loop thread.
fn with_context<R>(f: impl FnOnce(&mut JsContext) -> R) -> R {
    CONTEXT.with(|cell| {
        let mut guard = cell.borrow_mut();
        if guard.is_none() {
            *guard = Some(JsContext::default());
        }
        let ctx = guard.as_mut().expect("just initialized");

        BRIDGE.with(|bridge_cell| {
            let mut bridge_guard = bridge_cell.borrow_mut();
            if bridge_guard.is_none() {
                ctx.eval(BRIDGE_SOURCE).expect("promise bridge source is a fixed, known-good script");
                ctx.register_global_function("__metacall_export", 2, export_native);
                ctx.register_global_function("__metacall_resolve", 2, resolve_native);
                ctx.register_global_function("__metacall_reject", 2, reject_native);
                let bridge = ctx
                    .eval("__metacall_bridge")
                    .expect("__metacall_bridge is defined by the fixed bootstrap source above");
                *bridge_guard = Some(bridge);
            }
        });

        ASYNC_CHECK.with(|cell| {
            let mut guard = cell.borrow_mut();
            if guard.is_none() {
                let checker = ctx
                    .eval("__metacall_is_async")
                    .expect("__metacall_is_async is defined by the fixed bootstrap source above");
                *guard = Some(checker);
            }
        });

        f(ctx)
    })
}

/// Declaration-time async check: `true` only for a genuine `async function`,
/// not merely a function that happens to return a promise.
fn is_async_function(js: &JsValue, ctx: &mut JsContext) -> bool {
    let checker = ASYNC_CHECK.with(|cell| cell.borrow().clone());
    let Some(checker) = checker else {
        return false;
    };
    let Some(callable) = checker.as_callable() else {
        return false;
    };
    callable
        .call(&JsValue::undefined(), &[js.clone()], ctx)
        .ok()
        .and_then(|v| v.as_boolean())
        .unwrap_or(false)
}

fn export_native(_this: &JsValue, args: &[JsValue], _ctx: &mut JsContext) -> boa_engine::JsResult<JsValue> {
    let name = args.first().and_then(JsValue::as_string).map(|s| s.to_std_string_escaped()).unwrap_or_default();
    let func = args.get(1).cloned().unwrap_or_else(JsValue::undefined);
    STAGED_EXPORTS.with(|cell| cell.borrow_mut().push((name, func)));
    Ok(JsValue::undefined())
}

fn resolve_native(_this: &JsValue, args: &[JsValue], ctx: &mut JsContext) -> boa_engine::JsResult<JsValue> {
    settle(args, ctx, true);
    Ok(JsValue::undefined())
}

fn reject_native(_this: &JsValue, args: &[JsValue], ctx: &mut JsContext) -> boa_engine::JsResult<JsValue> {
    settle(args, ctx, false);
    Ok(JsValue::undefined())
}

fn settle(args: &[JsValue], ctx: &mut JsContext, fulfilled: bool) {
    let Some(ticket) = args.first().and_then(JsValue::as_number) else {
        return;
    };
    let ticket = ticket as u64;
    let value = args.get(1).cloned().unwrap_or_else(JsValue::undefined);
    let waiter = PENDING_ASYNC.with(|cell| cell.borrow_mut().remove(&ticket));
    let Some((resolve, reject)) = waiter else {
        return;
    };
    let converted = marshal::js_to_value(&value, ctx);
    if fulfilled {
        resolve(converted);
    } else {
        reject(Value::throwable(Throwable::wrapping_exception(Exception::new(converted.as_str().map(str::to_string).unwrap_or_else(|| format!("{converted:?}"))))));
    }
}

struct NodeFunction {
    id: u64,
    name: String,
    loop_thread: Arc<LoopThread>,
}

impl FunctionImpl for NodeFunction {
    fn invoke(&self, args: &[Value]) -> Result<Value> {
        let id = self.id;
        let args: Vec<Value> = args.iter().map(Value::copy).collect();
        self.loop_thread.run(move || {
            with_context(|ctx| {
                let native_args: Vec<JsValue> = args
                    .iter()
                    .map(|a| marshal::value_to_js(a, ctx).unwrap_or_else(|_| JsValue::undefined()))
                    .collect();
                let function = FUNCTIONS.with(|cell| cell.borrow().get(&id).cloned());
                let Some(function) = function else {
                    return Err(MetacallError::Tombstoned);
                };
                let callable = function.as_callable().ok_or_else(|| {
                    MetacallError::adapter("node", NodeError("export is not callable".to_string()))
                })?;
                callable
                    .call(&JsValue::undefined(), &native_args, ctx)
                    .map(|result| marshal::js_to_value(&result, ctx))
                    .map_err(|err| MetacallError::adapter("node", NodeError(format!("{err:?}"))))
            })
        })
    }

    fn invoke_async(&self, args: &[Value], resolve: Resolve, reject: Reject) -> Result<()> {
        let id = self.id;
        let args: Vec<Value> = args.iter().map(Value::copy).collect();
        self.loop_thread.run(move || {
            with_context(|ctx| {
                let native_args: Vec<JsValue> = args
                    .iter()
                    .map(|a| marshal::value_to_js(a, ctx).unwrap_or_else(|_| JsValue::undefined()))
                    .collect();
                let function = FUNCTIONS.with(|cell| cell.borrow().get(&id).cloned());
                let Some(function) = function else {
                    reject(Value::throwable_from_error(&MetacallError::Tombstoned));
                    return Ok(());
                };
                let callable = match function.as_callable() {
                    Some(c) => c,
                    None => {
                        reject(Value::throwable_from_error(&MetacallError::adapter(
                            "node",
                            NodeError("export is not callable".to_string()),
                        )));
                        return Ok(());
                    }
                };
                let result = match callable.call(&JsValue::undefined(), &native_args, ctx) {
                    Ok(v) => v,
                    Err(err) => {
                        reject(Value::throwable_from_error(&MetacallError::adapter("node", NodeError(format!("{err:?}")))));
                        return Ok(());
                    }
                };
                let ticket = next_id();
                PENDING_ASYNC.with(|cell| cell.borrow_mut().insert(ticket, (resolve, reject)));
                let bridge = BRIDGE.with(|cell| cell.borrow().clone().expect("bootstrapped by with_context"));
                let bridge_callable = bridge.as_callable().expect("__metacall_bridge is always callable");
                let bridge_args = [JsValue::new(ticket as f64), result];
                let _ = bridge_callable.call(&JsValue::undefined(), &bridge_args, ctx);
                let _ = ctx.run_jobs();
                Ok(())
            })
        })
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct NodeError(String);

struct HandleState {
    exports: Vec<(u64, String, bool)>,
}

#[derive(Default)]
struct Inner {
    exec_paths: Vec<PathBuf>,
    handles: HashMap<Handle, HandleState>,
}

/// The `js`/`node` adapter: one `boa_engine` interpreter per process,
/// driven entirely from its own loop thread.
pub struct NodeAdapter {
    loop_thread: Arc<LoopThread>,
    inner: Mutex<Inner>,
    destroyed: AtomicBool,
}

impl NodeAdapter {
    pub fn new() -> std::io::Result<Arc<Self>> {
        let loop_thread = Arc::new(LoopThread::spawn("metacall-node-loop", |job| {
            job();
            with_context(|ctx| {
                let _ = ctx.run_jobs();
            });
        })?);
        Ok(Arc::new(NodeAdapter {
            loop_thread,
            inner: Mutex::new(Inner::default()),
            destroyed: AtomicBool::new(false),
        }))
    }

    pub fn install() -> Result<Arc<Self>> {
        let adapter = Self::new().map_err(|e| MetacallError::Initialization {
            tag: "node".to_string(),
            reason: e.to_string(),
        })?;
        metacall::facade::register_adapter(adapter.clone())?;
        Ok(adapter)
    }

    /// Evaluates `source` and collects every `__metacall_export`-staged
    /// function on the loop thread, surfacing only `Send` data (ids and
    /// names) back to the caller — the `JsValue`s themselves never leave
    /// the thread-local [`FUNCTIONS`] table.
    fn evaluate(&self, name: &str, source: String) -> Result<Handle> {
        let outcome: std::result::Result<Vec<(u64, String, bool)>, String> = self.loop_thread.run(move || {
            with_context(|ctx| {
                STAGED_EXPORTS.with(|cell| cell.borrow_mut().clear());
                ctx.eval(source.as_bytes()).map_err(|e| format!("{e:?}"))?;
                let staged = STAGED_EXPORTS.with(|cell| std::mem::take(&mut *cell.borrow_mut()));
                let mut entries = Vec::with_capacity(staged.len());
                for (export_name, js_function) in staged {
                    let id = next_id();
                    let is_async = is_async_function(&js_function, ctx);
                    FUNCTIONS.with(|cell| cell.borrow_mut().insert(id, js_function));
                    entries.push((id, export_name, is_async));
                }
                Ok(entries)
            })
        });
        let exports = outcome.map_err(|reason| MetacallError::Load {
            tag: "node".to_string(),
            name: name.to_string(),
            reason,
        })?;

        let handle = Handle::fresh();
        self.inner.lock().handles.insert(handle, HandleState { exports });
        Ok(handle)
    }
}

impl Adapter for NodeAdapter {
    fn tags(&self) -> &[&str] {
        &["js", "node"]
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

    /// boa has no bytecode/snapshot package format exposed to embedders;
    /// the package form here is simply a second source file, same as
    /// `load_from_file`.
    fn load_from_package(&self, path: &Path) -> Result<Handle> {
        self.load_from_file(&[path.to_path_buf()])
    }

    #[instrument(skip(self, ctx))]
    fn discover(&self, handle: Handle, ctx: &mut Context) -> Result<()> {
        let inner = self.inner.lock();
        let state = inner.handles.get(&handle).ok_or(MetacallError::Tombstoned)?;
        for (id, export_name, is_async) in &state.exports {
            let mut signature = Signature::new(Vec::new()).variadic();
            if *is_async {
                signature = signature.asynchronous();
            }
            let function = Function::new(
                export_name.clone(),
                signature,
                Arc::new(NodeFunction {
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
            let ids: Vec<u64> = state.exports.into_iter().map(|(id, _, _)| id).collect();
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
            warn!("node adapter destroyed twice");
        }
        self.inner.lock().handles.clear();
        self.loop_thread.stop();
        Ok(())
    }
}

impl NodeAdapter {
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
            tag: "node".to_string(),
            name: path.display().to_string(),
            reason: "not found on any execution path".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_and_invokes_a_synchronous_export() {
        let adapter = NodeAdapter::new().unwrap();
        let handle = adapter
            .load_from_memory("t", "__metacall_export('add', function(a, b) { return a + b; });")
            .unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        let value = ctx.scope().get("add").unwrap();
        let result = value.as_function().unwrap().call(&[Value::long(2), Value::long(3)]).unwrap();
        assert_eq!(result.as_long(), Some(5));
    }

    #[test]
    fn discovers_a_synchronous_export_as_not_async() {
        let adapter = NodeAdapter::new().unwrap();
        let handle = adapter
            .load_from_memory("t", "__metacall_export('add', function(a, b) { return a + b; });")
            .unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        let value = ctx.scope().get("add").unwrap();
        assert!(!value.as_function().unwrap().is_async());
    }

    struct Doubler;

    impl FunctionImpl for Doubler {
        fn invoke(&self, args: &[Value]) -> Result<Value> {
            Ok(Value::long(args[0].as_long().unwrap_or_default() * 2))
        }
    }

    #[test]
    fn a_host_function_passed_as_an_argument_is_callable_from_script() {
        let adapter = NodeAdapter::new().unwrap();
        let handle = adapter
            .load_from_memory("t", "__metacall_export('apply', function(cb, x) { return cb(x); });")
            .unwrap();
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
    fn awaits_a_resolved_promise() {
        let adapter = NodeAdapter::new().unwrap();
        let handle = adapter
            .load_from_memory(
                "t",
                "__metacall_export('delayed', async function(x) { return x + 1; });",
            )
            .unwrap();
        let mut ctx = Context::new();
        adapter.discover(handle, &mut ctx).unwrap();
        let value = ctx.scope().get("delayed").unwrap();
        let function = value.as_function().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let tx_reject = tx.clone();
        function
            .call_async(
                &[Value::long(41)],
                Box::new(move |v| tx.send(v.as_long()).unwrap()),
                Box::new(move |_| tx_reject.send(None).unwrap()),
            )
            .unwrap();
        assert_eq!(rx.recv(), Ok(Some(42)));
    }

    #[test]
    fn clear_drops_discovered_functions() {
        let adapter = NodeAdapter::new().unwrap();
        let handle = adapter.load_from_memory("t", "__metacall_export('f', function(x) { return x; });").unwrap();
        adapter.clear(handle).unwrap();
        let mut ctx = Context::new();
        assert!(adapter.discover(handle, &mut ctx).is_err());
    }
}
