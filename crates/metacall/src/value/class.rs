//! The `class` kind.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

use super::{Object, Value};

/// Whether a class/object's attribute set is known up front or must be
/// probed at access time. Static-style guests (most compiled or
/// strongly-typed languages) report `Static`; dynamic-style guests (Python,
/// Ruby, JavaScript) typically report `Dynamic`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessorStyle {
    Static,
    Dynamic,
}

/// The adapter-supplied half of the class vtable. Deep inheritance is
/// deliberately not modeled here; an adapter flattens it into this single
/// level of methods/attributes.
pub trait ClassImpl: Send + Sync {
    fn construct(&self, args: &[Value]) -> Result<Object>;
    fn call_static_method(&self, name: &str, args: &[Value]) -> Result<Value>;
    fn get_static_attribute(&self, name: &str) -> Result<Value>;
    fn set_static_attribute(&self, name: &str, value: Value) -> Result<()>;

    fn methods(&self) -> &[String];
    fn static_methods(&self) -> &[String];
    fn attributes(&self) -> &[String];
    fn static_attributes(&self) -> &[String];
}

/// A class value: name, accessor style, and the adapter's implementation.
/// Kept alive by every [`Object`] instance that references it.
#[derive(Clone)]
pub struct Class {
    name: String,
    accessor_style: AccessorStyle,
    inner: Arc<dyn ClassImpl>,
}

impl Class {
    pub fn new(name: impl Into<String>, accessor_style: AccessorStyle, inner: Arc<dyn ClassImpl>) -> Self {
        Class {
            name: name.into(),
            accessor_style,
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accessor_style(&self) -> AccessorStyle {
        self.accessor_style
    }

    pub fn construct(&self, args: &[Value]) -> Result<Object> {
        let obj = self.inner.construct(args)?;
        Ok(obj.with_class(self.clone()))
    }

    pub fn call_static_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.inner.call_static_method(name, args)
    }

    pub fn get_static_attribute(&self, name: &str) -> Result<Value> {
        self.inner.get_static_attribute(name)
    }

    pub fn set_static_attribute(&self, name: &str, value: Value) -> Result<()> {
        self.inner.set_static_attribute(name, value)
    }

    pub fn methods(&self) -> &[String] {
        self.inner.methods()
    }

    pub fn static_methods(&self) -> &[String] {
        self.inner.static_methods()
    }

    pub fn attributes(&self) -> &[String] {
        self.inner.attributes()
    }

    pub fn static_attributes(&self) -> &[String] {
        self.inner.static_attributes()
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("accessor_style", &self.accessor_style)
            .finish()
    }
}
