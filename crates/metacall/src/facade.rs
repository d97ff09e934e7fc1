//! The public façade: thin, synchronous entry points plus `await`.
//!
//! A small, stable surface that hides the loader manager and adapter
//! machinery behind a handful of functions. The façade never panics and
//! never returns a bare `Err` to a caller outside this crate: failures
//! become throwable-kind values or `Status`/non-zero returns.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::warn;

use crate::error::{MetacallError, Result};
use crate::loader::{load_from_configuration as load_configuration, Adapter, ConfigurationOutcome, Handle, Registry};
use crate::value::function::{Reject, Resolve};
use crate::value::Value;

static REGISTRY: OnceCell<Registry> = OnceCell::new();
static INIT_COUNT: AtomicUsize = AtomicUsize::new(0);

fn registry() -> Result<&'static Registry> {
    REGISTRY.get().ok_or_else(|| MetacallError::Initialization {
        tag: "facade".to_string(),
        reason: "metacall::initialize() has not been called".to_string(),
    })
}

/// Brings the runtime up. Reentrant: nested `initialize`/`destroy` pairs
/// are counted, so an embedder and its adapters
/// can each call `initialize` without coordinating.
pub fn initialize() -> Result<()> {
    REGISTRY.get_or_init(Registry::new);
    INIT_COUNT.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

pub fn is_initialized() -> bool {
    INIT_COUNT.load(Ordering::SeqCst) > 0
}

/// Decrements the init counter; once it reaches zero, every adapter is
/// destroyed in reverse dependency order.
pub fn destroy() -> Result<()> {
    let prev = INIT_COUNT.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    let prev = prev.unwrap_or(0);
    if prev <= 1 {
        if let Some(registry) = REGISTRY.get() {
            return registry.destroy_all();
        }
    }
    Ok(())
}

/// Registers an adapter crate with the loader manager. Each adapter calls
/// this once, from its own constructor, under the tag(s) it answers to.
pub fn register_adapter(adapter: Arc<dyn Adapter>) -> Result<()> {
    registry()?.register(adapter);
    Ok(())
}

pub fn execution_path(tag: &str, path: impl AsRef<Path>) -> Result<()> {
    registry()?.execution_path(tag, path.as_ref())
}

pub fn load_from_file(tag: &str, paths: &[impl AsRef<Path>]) -> Result<Handle> {
    let paths: Vec<_> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
    let handle = registry()?.load_from_file(tag, &paths)?;
    registry()?.discover(handle)?;
    Ok(handle)
}

pub fn load_from_memory(tag: &str, name: &str, buffer: &str) -> Result<Handle> {
    let handle = registry()?.load_from_memory(tag, name, buffer)?;
    registry()?.discover(handle)?;
    Ok(handle)
}

pub fn load_from_package(tag: &str, path: impl AsRef<Path>) -> Result<Handle> {
    let handle = registry()?.load_from_package(tag, path.as_ref())?;
    registry()?.discover(handle)?;
    Ok(handle)
}

/// Loads every record of a configuration document in order, then
/// discovers each resulting handle. Partial failures are reported through
/// the returned [`ConfigurationOutcome`] rather than aborting the load.
pub fn load_from_configuration(path: impl AsRef<Path>) -> Result<ConfigurationOutcome> {
    let registry = registry()?;
    let outcome = load_configuration(registry, path.as_ref())?;
    for &handle in &outcome.handles {
        if let Err(e) = registry.discover(handle) {
            warn!(error = %e, "discover failed after load_from_configuration");
        }
    }
    Ok(outcome)
}

pub fn clear(handle: Handle) -> Result<()> {
    registry()?.clear(handle)
}

/// Resolves `name` in the flattened scope across all loaders and invokes
/// it. Never returns `Err`: failures become a throwable-kind [`Value`].
pub fn metacall(name: &str, args: &[Value]) -> Value {
    match dispatch(name, args) {
        Ok(v) => v,
        Err(e) => Value::throwable_from_error(&e),
    }
}

fn dispatch(name: &str, args: &[Value]) -> Result<Value> {
    let value = registry()?.resolve(name).ok_or_else(|| MetacallError::NotFound(name.to_string()))?;
    let function = value.as_function().ok_or_else(|| MetacallError::NotFound(name.to_string()))?;
    function.call(args)
}

/// Dispatches to `await` if `name` resolves to an async function, otherwise
/// synthesizes an immediate resolution. Exactly one of `resolve`/
/// `reject` fires exactly once, even when `name` cannot be
/// resolved at all.
pub fn metacall_await(name: &str, args: &[Value], resolve: Resolve, reject: Reject) {
    let registry = match registry() {
        Ok(r) => r,
        Err(e) => {
            reject(Value::throwable_from_error(&e));
            return;
        }
    };
    let value = match registry.resolve(name) {
        Some(v) => v,
        None => {
            reject(Value::throwable_from_error(&MetacallError::NotFound(name.to_string())));
            return;
        }
    };
    let function = match value.as_function() {
        Some(f) => f,
        None => {
            reject(Value::throwable_from_error(&MetacallError::NotFound(name.to_string())));
            return;
        }
    };
    if let Err(e) = function.call_async(args, resolve, reject) {
        warn!(error = %e, function = name, "call_async returned without firing resolve or reject");
    }
}

/// Returns a snapshot of `handle`'s exported scope as a map value.
pub fn metacall_handle_export(handle: Handle) -> Result<Value> {
    let entries = registry()?.handle_export(handle)?;
    let entries: Vec<(Value, Value)> = entries.into_iter().map(|(name, value)| (Value::string(name), value)).collect();
    Value::map(entries)
}

/// Returns the serialized introspection document.
pub fn metacall_inspect() -> Result<String> {
    registry()?.inspect().to_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Handle as LoaderHandle;
    use crate::reflect::Signature;
    use crate::scope::Context;
    use crate::value::{Function, FunctionImpl};
    use std::path::{Path as StdPath, PathBuf};
    use std::sync::Mutex as StdMutex;

    struct EchoFunction;
    impl FunctionImpl for EchoFunction {
        fn invoke(&self, args: &[Value]) -> Result<Value> {
            Ok(args.first().map(Value::copy).unwrap_or_else(Value::null))
        }
    }

    struct TestAdapter {
        tag: &'static str,
        handle: LoaderHandle,
        defined: StdMutex<bool>,
    }

    impl Adapter for TestAdapter {
        fn tags(&self) -> &[&str] {
            std::slice::from_ref(&self.tag)
        }
        fn execution_path(&self, _path: &StdPath) -> Result<()> {
            Ok(())
        }
        fn load_from_file(&self, _paths: &[PathBuf]) -> Result<LoaderHandle> {
            Ok(self.handle)
        }
        fn load_from_memory(&self, _name: &str, _buffer: &str) -> Result<LoaderHandle> {
            Ok(self.handle)
        }
        fn load_from_package(&self, _path: &StdPath) -> Result<LoaderHandle> {
            Ok(self.handle)
        }
        fn discover(&self, _handle: LoaderHandle, ctx: &mut Context) -> Result<()> {
            let mut defined = self.defined.lock().unwrap();
            if !*defined {
                let function = Function::new("echo", Signature::new(vec![]).variadic(), Arc::new(EchoFunction));
                ctx.define("echo", Value::function(function))?;
                *defined = true;
            }
            Ok(())
        }
        fn clear(&self, _handle: LoaderHandle) -> Result<()> {
            Ok(())
        }
        fn destroy(&self) -> Result<()> {
            Ok(())
        }
    }

    // NOTE: facade state is process-global, so these tests share one
    // registry; each uses a uniquely-tagged adapter to avoid collisions.
    fn setup(tag: &'static str) {
        initialize().unwrap();
        register_adapter(Arc::new(TestAdapter {
            tag,
            handle: LoaderHandle::fresh(),
            defined: StdMutex::new(false),
        }))
        .unwrap();
    }

    #[test]
    fn metacall_dispatches_after_load() {
        setup("facade-test-echo");
        let handle = load_from_memory("facade-test-echo", "mod", "echo()").unwrap();
        let _ = handle;
        let result = metacall("echo", &[Value::string("hi")]);
        assert_eq!(result.as_str(), Some("hi"));
    }

    #[test]
    fn metacall_on_unknown_name_returns_throwable() {
        setup("facade-test-unknown");
        let result = metacall("does_not_exist", &[]);
        assert!(result.as_throwable().is_some());
    }
}
