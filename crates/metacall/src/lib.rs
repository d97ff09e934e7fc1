//! `metacall` — the polyglot value model, loader registry, and façade
//! shared by every language adapter in this workspace.
//!
//! This crate is the polyglot core: the value model (`value`), the
//! loader manager (`loader`), cross-runtime call machinery (`call`), and
//! the public façade (`facade`). Each language adapter (`metacall-loader-mock`,
//! `metacall-loader-c`, `metacall-loader-node`, `metacall-loader-py`,
//! `metacall-loader-rb`) depends on this crate and implements
//! [`loader::Adapter`] for its own embedded runtime.

pub mod allocator;
#[cfg(feature = "capi")]
pub mod capi;
pub mod call;
pub mod error;
pub mod facade;
pub mod inspect;
pub mod loader;
pub mod reflect;
pub mod scope;
pub mod value;

pub mod prelude;
