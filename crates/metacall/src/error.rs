//! The error type shared by the core and every adapter crate.
//!
//! An adapter, the loader manager, and the façade all return this one enum
//! rather than each growing its own ad-hoc error type.

use std::fmt;

use crate::value::Kind;

/// Result alias used throughout the core and adapter crates.
pub type Result<T> = std::result::Result<T, MetacallError>;

/// Every way a polyglot call can fail, abstracted from any particular
/// source language's own exception hierarchy.
#[derive(thiserror::Error, Debug)]
pub enum MetacallError {
    /// An adapter could not start (missing runtime, bad config). Fatal for
    /// that adapter; the façade removes it from the registry.
    #[error("adapter `{tag}` failed to initialize: {reason}")]
    Initialization { tag: String, reason: String },

    /// A tag has no registered adapter.
    #[error("no loader registered for tag `{0}`")]
    UnknownTag(String),

    /// `load_from_file`/`load_from_memory`/`load_from_package` failed: file
    /// not found, syntax error, or a runtime exception raised while the
    /// module body executed.
    #[error("failed to load `{name}` with tag `{tag}`: {reason}")]
    Load {
        tag: String,
        name: String,
        reason: String,
    },

    /// `discover` found a duplicate name or a construct it cannot represent.
    /// The handle remains loadable; its scope is merely incomplete.
    #[error("discovery of handle `{handle}` incomplete: {reason}")]
    Discovery { handle: String, reason: String },

    /// The callable was not found in any loader's flattened scope.
    #[error("no callable named `{0}` is in scope")]
    NotFound(String),

    /// A signature's declared arity does not admit the supplied argument
    /// count.
    #[error("`{name}` expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        name: String,
        expected: String,
        actual: usize,
    },

    /// An argument's kind could not be coerced to a typed parameter.
    #[error("argument {index} to `{name}` has kind `{actual}`, expected `{expected}`")]
    TypeMismatch {
        name: String,
        index: usize,
        expected: Kind,
        actual: Kind,
    },

    /// A map value was built with a non-string key.
    #[error("map keys must be string-kind values, got `{0}`")]
    NonStringMapKey(Kind),

    /// The callable is synchronous; there is no future to await. Adapters
    /// are permitted to report this instead of synthesizing a stub future.
    #[error("`{0}` has no asynchronous form")]
    NotAsync(String),

    /// A future was awaited more than once along the same resolve path.
    #[error("future already awaited")]
    AlreadyAwaited,

    /// The runtime could not drain cleanly during shutdown. Destruction
    /// still proceeds best-effort; this is logged, not fatal.
    #[error("adapter `{0}` could not shut down cleanly: {1}")]
    Shutdown(String, String),

    /// An operation was attempted on a value whose originating adapter has
    /// already been destroyed.
    #[error("value is tombstoned: its originating adapter has been destroyed")]
    Tombstoned,

    /// A pointer value referenced an identity the pointer registry does not
    /// recognize.
    #[error("pointer is not registered")]
    UnregisteredPointer,

    /// Wraps an adapter-specific error (e.g. a `pyo3::PyErr`, a `boa_engine`
    /// `JsError`) so each adapter crate does not need to re-derive this enum.
    #[error("{tag} adapter error: {source}")]
    Adapter {
        tag: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O failure underlying a load, e.g. reading a script file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetacallError {
    pub fn adapter<E>(tag: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        MetacallError::Adapter {
            tag: tag.into(),
            source: Box::new(source),
        }
    }
}

/// A lightweight status code for the parts of the public façade that mirror
/// the C-ABI-shaped surface (`0` success, non-zero failure), as opposed to
/// the richer `Result<T, MetacallError>` used internally.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Error = 1,
}

impl From<&Result<()>> for Status {
    fn from(r: &Result<()>) -> Self {
        match r {
            Ok(()) => Status::Ok,
            Err(_) => Status::Error,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Error => write!(f, "error"),
        }
    }
}
