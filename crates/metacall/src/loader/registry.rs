//! The loader manager: `tag → loader-impl` registry, dependency tracking,
//! and reverse-dependency-order shutdown.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::error::{MetacallError, Result};
use crate::scope::Context;

use super::adapter::Adapter;
use super::handle::Handle;

struct Registration {
    adapter: Arc<dyn Adapter>,
    contexts: HashMap<Handle, Context>,
}

/// Owns every registered [`Adapter`], the handles it has produced, and the
/// parent→child dependency graph used to order shutdown.
///
/// A single coarse `Mutex` guards the whole table, mirroring the pointer
/// registry's trade-off: lifecycle operations (load/clear/destroy) are
/// rare relative to `invoke`, which never touches this lock once a handle
/// has been resolved.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    adapters: HashMap<String, Registration>,
    handle_tags: HashMap<Handle, String>,
    /// `dependencies[parent]` is the set of tags `parent` must see destroyed
    /// before itself.
    dependencies: HashMap<String, HashSet<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers `adapter` under every tag it answers to. Re-registering a
    /// tag replaces the previous adapter for it (used by tests that swap in
    /// a mock).
    pub fn register(&self, adapter: Arc<dyn Adapter>) {
        let mut inner = self.inner.lock();
        for &tag in adapter.tags() {
            inner.adapters.insert(
                tag.to_string(),
                Registration {
                    adapter: adapter.clone(),
                    contexts: HashMap::new(),
                },
            );
        }
    }

    fn with_adapter<R>(&self, tag: &str, f: impl FnOnce(&Arc<dyn Adapter>) -> Result<R>) -> Result<R> {
        let adapter = {
            let inner = self.inner.lock();
            inner
                .adapters
                .get(tag)
                .map(|r| r.adapter.clone())
                .ok_or_else(|| MetacallError::UnknownTag(tag.to_string()))?
        };
        f(&adapter)
    }

    #[instrument(skip(self))]
    pub fn execution_path(&self, tag: &str, path: &Path) -> Result<()> {
        self.with_adapter(tag, |a| a.execution_path(path))
    }

    #[instrument(skip(self, paths))]
    pub fn load_from_file(&self, tag: &str, paths: &[PathBuf]) -> Result<Handle> {
        let handle = self.with_adapter(tag, |a| a.load_from_file(paths))?;
        self.record_handle(tag, handle);
        Ok(handle)
    }

    #[instrument(skip(self, buffer))]
    pub fn load_from_memory(&self, tag: &str, name: &str, buffer: &str) -> Result<Handle> {
        let handle = self.with_adapter(tag, |a| a.load_from_memory(name, buffer))?;
        self.record_handle(tag, handle);
        Ok(handle)
    }

    #[instrument(skip(self))]
    pub fn load_from_package(&self, tag: &str, path: &Path) -> Result<Handle> {
        let handle = self.with_adapter(tag, |a| a.load_from_package(path))?;
        self.record_handle(tag, handle);
        Ok(handle)
    }

    fn record_handle(&self, tag: &str, handle: Handle) {
        let mut inner = self.inner.lock();
        inner.handle_tags.insert(handle, tag.to_string());
        if let Some(reg) = inner.adapters.get_mut(tag) {
            reg.contexts.insert(handle, Context::new());
        }
    }

    /// Runs `discover` for `handle` and keeps the resulting context around
    /// so `metacall_handle_export` and name resolution can reach it.
    #[instrument(skip(self))]
    pub fn discover(&self, handle: Handle) -> Result<()> {
        let tag = self.tag_of(handle)?;
        let adapter = self.with_adapter(&tag, |a| Ok(a.clone()))?;
        let mut inner = self.inner.lock();
        let reg = inner
            .adapters
            .get_mut(&tag)
            .ok_or_else(|| MetacallError::UnknownTag(tag.clone()))?;
        let ctx = reg
            .contexts
            .entry(handle)
            .or_insert_with(Context::new);
        adapter.discover(handle, ctx)
    }

    fn tag_of(&self, handle: Handle) -> Result<String> {
        self.inner
            .lock()
            .handle_tags
            .get(&handle)
            .cloned()
            .ok_or(MetacallError::Tombstoned)
    }

    /// Resolves `name` against every loaded handle's scope, most recently
    /// loaded first. Returns the first match.
    pub fn resolve(&self, name: &str) -> Option<crate::value::Value> {
        let inner = self.inner.lock();
        for reg in inner.adapters.values() {
            for ctx in reg.contexts.values() {
                if let Some(v) = ctx.scope().get(name) {
                    return Some(v.copy());
                }
            }
        }
        None
    }

    /// Snapshots `handle`'s scope into a `(name, value)` list.
    pub fn handle_export(&self, handle: Handle) -> Result<Vec<(String, crate::value::Value)>> {
        let tag = self.tag_of(handle)?;
        let inner = self.inner.lock();
        let reg = inner.adapters.get(&tag).ok_or_else(|| MetacallError::UnknownTag(tag.clone()))?;
        let ctx = reg.contexts.get(&handle).ok_or(MetacallError::Tombstoned)?;
        Ok(ctx.scope().iter().map(|(n, v)| (n.to_string(), v.copy())).collect())
    }

    /// Best-effort; logs and continues rather than aborting other clears.
    #[instrument(skip(self))]
    pub fn clear(&self, handle: Handle) -> Result<()> {
        let tag = self.tag_of(handle)?;
        let result = self.with_adapter(&tag, |a| a.clear(handle));
        if let Err(ref e) = result {
            warn!(tag = %tag, error = %e, "clear failed");
        }
        let mut inner = self.inner.lock();
        inner.handle_tags.remove(&handle);
        if let Some(reg) = inner.adapters.get_mut(&tag) {
            reg.contexts.remove(&handle);
        }
        result
    }

    /// Builds the serialized introspection map: every
    /// registered tag, every handle loaded under it, and every function or
    /// class currently in that handle's scope.
    pub fn inspect(&self) -> crate::inspect::InspectReport {
        use crate::inspect::{ClassReport, FunctionReport, LoaderReport, ModuleReport, SignatureReport};
        use crate::value::Kind;

        let inner = self.inner.lock();
        let mut loaders = Vec::new();
        for (tag, reg) in inner.adapters.iter() {
            let mut modules = Vec::new();
            for ctx in reg.contexts.values() {
                let mut module = ModuleReport::default();
                for (name, value) in ctx.scope().iter() {
                    match value.kind() {
                        Kind::Function => {
                            if let Some(f) = value.as_function() {
                                module.functions.push(FunctionReport {
                                    name: name.to_string(),
                                    signature: SignatureReport::from(f.signature()),
                                });
                            }
                        }
                        Kind::Class => {
                            if let Some(c) = value.as_class() {
                                module.classes.push(ClassReport {
                                    name: name.to_string(),
                                    methods: c.methods().to_vec(),
                                    static_methods: c.static_methods().to_vec(),
                                    attributes: c.attributes().to_vec(),
                                    static_attributes: c.static_attributes().to_vec(),
                                });
                            }
                        }
                        _ => {}
                    }
                }
                modules.push(module);
            }
            loaders.push(LoaderReport {
                tag: tag.clone(),
                modules,
            });
        }
        crate::inspect::InspectReport { loaders }
    }

    /// Records that `parent`'s adapter created a value originating in
    /// `child`'s adapter. `child` is destroyed strictly before
    /// `parent` during shutdown.
    pub fn register_dependency(&self, parent: &str, child: &str) {
        if parent == child {
            return;
        }
        self.inner
            .lock()
            .dependencies
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }

    /// Destroys every registered adapter, children before parents,
    /// logging rather than aborting on a tag's failure.
    #[instrument(skip(self))]
    pub fn destroy_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut remaining: HashMap<String, HashSet<String>> = inner
            .adapters
            .keys()
            .map(|tag| {
                let deps = inner.dependencies.get(tag).cloned().unwrap_or_default();
                (tag.clone(), deps)
            })
            .collect();

        let mut order = Vec::new();
        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(tag, _)| tag.clone())
                .collect();
            if ready.is_empty() {
                // A dependency cycle; destroy whatever is left in arbitrary
                // order rather than deadlocking shutdown.
                order.extend(remaining.keys().cloned());
                break;
            }
            for tag in &ready {
                remaining.remove(tag);
            }
            for deps in remaining.values_mut() {
                for tag in &ready {
                    deps.remove(tag);
                }
            }
            order.extend(ready);
        }

        let mut first_err = None;
        for tag in order {
            if let Some(reg) = inner.adapters.remove(&tag) {
                info!(tag = %tag, "destroying adapter");
                if let Err(e) = reg.adapter.destroy() {
                    warn!(tag = %tag, error = %e, "adapter destroy failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        inner.dependencies.clear();
        inner.handle_tags.clear();

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingAdapter {
        tag: &'static str,
        destroyed: Arc<AtomicBool>,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Adapter for RecordingAdapter {
        fn tags(&self) -> &[&str] {
            std::slice::from_ref(&self.tag)
        }
        fn execution_path(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        fn load_from_file(&self, _paths: &[PathBuf]) -> Result<Handle> {
            Ok(Handle::fresh())
        }
        fn load_from_memory(&self, _name: &str, _buffer: &str) -> Result<Handle> {
            Ok(Handle::fresh())
        }
        fn load_from_package(&self, _path: &Path) -> Result<Handle> {
            Ok(Handle::fresh())
        }
        fn discover(&self, _handle: Handle, _ctx: &mut Context) -> Result<()> {
            Ok(())
        }
        fn clear(&self, _handle: Handle) -> Result<()> {
            Ok(())
        }
        fn destroy(&self) -> Result<()> {
            self.destroyed.store(true, Ordering::SeqCst);
            self.order.lock().push(self.tag);
            Ok(())
        }
    }

    #[test]
    fn unknown_tag_is_reported() {
        let registry = Registry::new();
        let err = registry.load_from_file("nope", &[]).unwrap_err();
        assert!(matches!(err, MetacallError::UnknownTag(_)));
    }

    #[test]
    fn children_destroyed_before_parents() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let registry = Registry::new();
        registry.register(Arc::new(RecordingAdapter {
            tag: "a",
            destroyed: Arc::new(AtomicBool::new(false)),
            order: order.clone(),
        }));
        registry.register(Arc::new(RecordingAdapter {
            tag: "b",
            destroyed: Arc::new(AtomicBool::new(false)),
            order: order.clone(),
        }));
        registry.register_dependency("b", "a");
        registry.destroy_all().unwrap();
        let order = order.lock();
        let pos_a = order.iter().position(|t| *t == "a").unwrap();
        let pos_b = order.iter().position(|t| *t == "b").unwrap();
        assert!(pos_a < pos_b);
    }
}
