//! The process-wide pointer registry.
//!
//! Opaque host pointers never cross runtimes as raw addresses. Instead a
//! pointer value carries an identity minted here; `value_reference` looks up
//! the identity and hands back the raw pointer only to callers that already
//! hold a `Value` of kind [`Kind::Pointer`](super::Kind), and
//! `value_dereference` releases the registry's claim on it. This is the one
//! deliberately coarse-grained lock in the crate: the registry is
//! consulted rarely enough (pointer creation/destruction, not every call)
//! that a single `Mutex` is the right trade-off rather than inventing a
//! lock-free structure for an uncommon path.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Identifies one opaque pointer registration. Cloning a `PointerId` does not
/// clone the underlying pointer; it is a lookup key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PointerId(u64);

struct Entry {
    data: Box<dyn Any + Send + Sync>,
    refs: u64,
}

static REGISTRY: Lazy<Mutex<HashMap<PointerId, Entry>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Registers a new opaque pointer, returning the identity that crosses
/// runtimes in its place. The registry takes ownership of `data` until the
/// last [`dereference`] call drops it.
pub fn register<T: Send + Sync + 'static>(data: T) -> PointerId {
    let id = PointerId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
    REGISTRY.lock().insert(
        id,
        Entry {
            data: Box::new(data),
            refs: 1,
        },
    );
    id
}

/// Increments the reference count of a registered pointer.
pub fn reference(id: PointerId) -> bool {
    let mut reg = REGISTRY.lock();
    match reg.get_mut(&id) {
        Some(entry) => {
            entry.refs += 1;
            true
        }
        None => false,
    }
}

/// Decrements the reference count, removing and dropping the entry once it
/// reaches zero. Returns `true` if the id was known.
pub fn dereference(id: PointerId) -> bool {
    let mut reg = REGISTRY.lock();
    match reg.get_mut(&id) {
        Some(entry) => {
            entry.refs -= 1;
            if entry.refs == 0 {
                reg.remove(&id);
            }
            true
        }
        None => false,
    }
}

/// Runs `f` with a reference to the registered data, downcast to `T`.
/// Returns `None` if the id is unknown or holds a different type.
pub fn with<T: 'static, R>(id: PointerId, f: impl FnOnce(&T) -> R) -> Option<R> {
    let reg = REGISTRY.lock();
    reg.get(&id).and_then(|e| e.data.downcast_ref::<T>()).map(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_reference_dereference_round_trip() {
        let id = register(42i32);
        assert_eq!(with::<i32, _>(id, |v| *v), Some(42));
        assert!(reference(id));
        assert!(dereference(id));
        // One reference remains (the initial registration + the extra we took).
        assert!(with::<i32, _>(id, |v| *v).is_some());
        assert!(dereference(id));
        assert!(with::<i32, _>(id, |v| *v).is_none());
    }

    #[test]
    fn dereference_unknown_id_reports_false() {
        let bogus = register(1u8);
        dereference(bogus);
        assert!(!dereference(bogus));
    }
}
