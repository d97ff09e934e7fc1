//! Opaque loader handles.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identifies one loaded unit (script, module, or aggregate of files),
/// owned by the loader manager and released by the owning adapter's
/// `clear`. Opaque outside this crate: callers pass it back only as a
/// token, never inspect its contents.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Mints a fresh, process-wide-unique handle. Adapters call this from
    /// their own `load_from_file`/`load_from_memory`/`load_from_package`
    /// implementations — the loader manager never constructs a `Handle`
    /// itself, since an adapter's internal handle table is what `clear`/
    /// `discover` ultimately index into.
    pub fn fresh() -> Self {
        Handle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}
