//! Scopes and contexts.

use crate::error::{MetacallError, Result};
use crate::value::Value;

/// An ordered name→value mapping. Order is preserved because
/// `metacall_handle_export` snapshots a scope into a map value whose
/// iteration order callers may reasonably rely on matching discovery order.
#[derive(Default)]
pub struct Scope {
    names: Vec<String>,
    values: Vec<Value>,
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names.iter().position(|n| n == name).map(|i| &self.values[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Removes a previously defined name, used when a handle is cleared.
    fn remove(&mut self, name: &str) {
        if let Some(i) = self.names.iter().position(|n| n == name) {
            self.names.remove(i);
            self.values.remove(i);
        }
    }
}

/// What a loader writes into during `discover`: a scope plus
/// duplicate-definition bookkeeping. Each loaded handle owns
/// exactly one context and therefore exactly one root scope.
#[derive(Default)]
pub struct Context {
    scope: Scope,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Defines `name` in this context's scope. Rejects a redefinition
    /// rather than silently shadowing — an adapter that wants
    /// to replace a definition must `undefine` first.
    pub fn define(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        let name = name.into();
        if self.scope.contains(&name) {
            return Err(MetacallError::Discovery {
                handle: String::new(),
                reason: format!("duplicate definition of `{name}`"),
            });
        }
        self.scope.names.push(name);
        self.scope.values.push(value);
        Ok(())
    }

    /// Removes a name, used while clearing a handle.
    pub fn undefine(&mut self, name: &str) {
        self.scope.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_then_get_round_trips() {
        let mut ctx = Context::new();
        ctx.define("concat", Value::string("placeholder")).unwrap();
        assert!(ctx.scope().contains("concat"));
        assert_eq!(ctx.scope().get("concat").unwrap().as_str(), Some("placeholder"));
    }

    #[test]
    fn duplicate_definition_is_rejected() {
        let mut ctx = Context::new();
        ctx.define("f", Value::int(1)).unwrap();
        let err = ctx.define("f", Value::int(2)).unwrap_err();
        assert!(matches!(err, MetacallError::Discovery { .. }));
    }

    #[test]
    fn undefine_removes_name() {
        let mut ctx = Context::new();
        ctx.define("f", Value::int(1)).unwrap();
        ctx.undefine("f");
        assert!(!ctx.scope().contains("f"));
    }
}
