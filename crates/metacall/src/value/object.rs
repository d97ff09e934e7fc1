//! The `object` kind.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

use super::{class::AccessorStyle, Class, Value};

/// The adapter-supplied half of the object vtable.
pub trait ObjectImpl: Send + Sync {
    fn get(&self, name: &str) -> Result<Value>;
    fn set(&self, name: &str, value: Value) -> Result<()>;
    fn method_invoke(&self, name: &str, args: &[Value]) -> Result<Value>;
}

/// An instance of a [`Class`]. The `class` field keeps the describing class
/// alive for as long as any instance of it exists — this "class-ref" is how
/// the core avoids modeling inheritance itself: an object only needs to
/// reach its own (already-flattened) class description.
#[derive(Clone)]
pub struct Object {
    name: String,
    accessor_style: AccessorStyle,
    class: Option<Class>,
    inner: Arc<dyn ObjectImpl>,
}

impl Object {
    pub fn new(name: impl Into<String>, accessor_style: AccessorStyle, inner: Arc<dyn ObjectImpl>) -> Self {
        Object {
            name: name.into(),
            accessor_style,
            class: None,
            inner,
        }
    }

    pub(crate) fn with_class(mut self, class: Class) -> Self {
        self.class = Some(class);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accessor_style(&self) -> AccessorStyle {
        self.accessor_style
    }

    pub fn class(&self) -> Option<&Class> {
        self.class.as_ref()
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        self.inner.get(name)
    }

    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        self.inner.set(name, value)
    }

    pub fn method_invoke(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.inner.method_invoke(name, args)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("name", &self.name)
            .field("accessor_style", &self.accessor_style)
            .field("class", &self.class.as_ref().map(Class::name))
            .finish()
    }
}
