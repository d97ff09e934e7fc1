//! The polyglot value model.
//!
//! A [`Value`] is the one universal currency every adapter marshals guest
//! data into and out of. It is a closed, heap-owned tagged union — closed so
//! that the loader manager and façade never need to know about a
//! particular guest language's type system, heap-owned because ownership
//! has to be trackable independent of whichever garbage
//! collector produced the data.

mod class;
mod exception;
mod finalizer;
mod function;
mod future;
mod kind;
mod object;
pub mod pointer;

pub use class::{AccessorStyle, Class, ClassImpl};
pub use exception::{Exception, Throwable};
pub use finalizer::Finalizer;
pub use function::{Function, FunctionImpl, Reject, Resolve};
pub use future::{Future, FutureImpl};
pub use kind::Kind;
pub use object::{Object, ObjectImpl};
pub use pointer::PointerId;

use crate::error::MetacallError;

/// The payload half of a [`Value`]; kept private so that every access goes
/// through `Value`'s kind-checked accessors rather than matching on this
/// enum directly from outside the crate.
enum Payload {
    Null,
    Bool(bool),
    Char(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Buffer(Vec<u8>),
    Array(Vec<Value>),
    /// Invariant: every `(key, _)` pair here has `key.kind() == Kind::String`.
    /// Enforced at construction by [`Value::map`].
    Map(Vec<(Value, Value)>),
    Pointer(PointerId),
    Future(Future),
    Function(Function),
    Class(Class),
    Object(Object),
    Exception(Exception),
    Throwable(Throwable),
}

/// A heap-owned, tagged polyglot datum.
///
/// `Value` is boxed so its size on the stack stays small and stable
/// regardless of which kind it holds, and so that a finalizer installed on
/// one `Value` survives moves of the handle around Rust call frames — the
/// finalizer belongs to the heap allocation, not to whichever stack slot
/// currently names it.
pub struct Value {
    payload: Box<Payload>,
    finalizer: Option<Finalizer>,
}

impl Value {
    fn from_payload(payload: Payload) -> Self {
        Value {
            payload: Box::new(payload),
            finalizer: None,
        }
    }

    pub fn null() -> Self {
        Value::from_payload(Payload::Null)
    }

    pub fn bool(v: bool) -> Self {
        Value::from_payload(Payload::Bool(v))
    }

    pub fn char(v: i8) -> Self {
        Value::from_payload(Payload::Char(v))
    }

    pub fn short(v: i16) -> Self {
        Value::from_payload(Payload::Short(v))
    }

    pub fn int(v: i32) -> Self {
        Value::from_payload(Payload::Int(v))
    }

    pub fn long(v: i64) -> Self {
        Value::from_payload(Payload::Long(v))
    }

    pub fn float(v: f32) -> Self {
        Value::from_payload(Payload::Float(v))
    }

    pub fn double(v: f64) -> Self {
        Value::from_payload(Payload::Double(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Value::from_payload(Payload::String(v.into()))
    }

    pub fn buffer(v: impl Into<Vec<u8>>) -> Self {
        Value::from_payload(Payload::Buffer(v.into()))
    }

    pub fn array(v: impl Into<Vec<Value>>) -> Self {
        Value::from_payload(Payload::Array(v.into()))
    }

    /// Builds a map value. Entries whose key is not of [`Kind::String`] are
    /// rejected outright rather than silently coerced — coercion is left to
    /// adapters that choose `to_string` on the way in.
    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Result<Self, MetacallError> {
        let entries: Vec<_> = entries.into_iter().collect();
        for (key, _) in &entries {
            if key.kind() != Kind::String {
                return Err(MetacallError::NonStringMapKey(key.kind()));
            }
        }
        Ok(Value::from_payload(Payload::Map(entries)))
    }

    pub fn ptr(id: PointerId) -> Self {
        Value::from_payload(Payload::Pointer(id))
    }

    pub fn future(f: Future) -> Self {
        Value::from_payload(Payload::Future(f))
    }

    pub fn function(f: Function) -> Self {
        Value::from_payload(Payload::Function(f))
    }

    pub fn class(c: Class) -> Self {
        Value::from_payload(Payload::Class(c))
    }

    pub fn object(o: Object) -> Self {
        Value::from_payload(Payload::Object(o))
    }

    pub fn exception(e: Exception) -> Self {
        Value::from_payload(Payload::Exception(e))
    }

    pub fn throwable(t: Throwable) -> Self {
        Value::from_payload(Payload::Throwable(t))
    }

    /// Builds a throwable-kind value out of a core [`MetacallError`], used
    /// whenever an internal failure (arity mismatch, not-async, ...) must be
    /// returned through the façade's "never throws, only returns" contract.
    pub fn throwable_from_error(err: &MetacallError) -> Self {
        Value::throwable(Throwable::wrapping_exception(Exception::new(err.to_string())))
    }

    pub fn kind(&self) -> Kind {
        match &*self.payload {
            Payload::Null => Kind::Null,
            Payload::Bool(_) => Kind::Bool,
            Payload::Char(_) => Kind::Char,
            Payload::Short(_) => Kind::Short,
            Payload::Int(_) => Kind::Int,
            Payload::Long(_) => Kind::Long,
            Payload::Float(_) => Kind::Float,
            Payload::Double(_) => Kind::Double,
            Payload::String(_) => Kind::String,
            Payload::Buffer(_) => Kind::Buffer,
            Payload::Array(_) => Kind::Array,
            Payload::Map(_) => Kind::Map,
            Payload::Pointer(_) => Kind::Pointer,
            Payload::Future(_) => Kind::Future,
            Payload::Function(_) => Kind::Function,
            Payload::Class(_) => Kind::Class,
            Payload::Object(_) => Kind::Object,
            Payload::Exception(_) => Kind::Exception,
            Payload::Throwable(_) => Kind::Throwable,
        }
    }

    /// Byte size where relevant: strings include their terminator,
    /// buffers their length, scalars their native width. Containers and
    /// reference-semantic kinds report `0`; use [`Value::count`] for those.
    pub fn size(&self) -> usize {
        match &*self.payload {
            Payload::Null => 0,
            Payload::Bool(_) => std::mem::size_of::<bool>(),
            Payload::Char(_) => std::mem::size_of::<i8>(),
            Payload::Short(_) => std::mem::size_of::<i16>(),
            Payload::Int(_) => std::mem::size_of::<i32>(),
            Payload::Long(_) => std::mem::size_of::<i64>(),
            Payload::Float(_) => std::mem::size_of::<f32>(),
            Payload::Double(_) => std::mem::size_of::<f64>(),
            Payload::String(s) => s.len() + 1,
            Payload::Buffer(b) => b.len(),
            _ => 0,
        }
    }

    /// Element count for containers; `None` for non-containers.
    pub fn count(&self) -> Option<usize> {
        match &*self.payload {
            Payload::Array(a) => Some(a.len()),
            Payload::Map(m) => Some(m.len()),
            Payload::Buffer(b) => Some(b.len()),
            _ => None,
        }
    }

    /// Installs a finalizer, replacing any prior one.
    pub fn set_finalizer(&mut self, finalizer: Finalizer) {
        self.finalizer = Some(finalizer);
    }

    /// Transfers `self`'s payload and finalizer into `dst`, leaving `self`
    /// as a finalizer-less null. Used when a value's payload
    /// is handed to a new owner in place — e.g. an adapter promoting a
    /// freshly-marshalled value into a slot a caller already holds, without
    /// changing that slot's identity the way a plain Rust move would.
    pub fn transfer(&mut self, dst: &mut Value) {
        std::mem::swap(&mut self.payload, &mut dst.payload);
        dst.finalizer = self.finalizer.take();
        self.payload = Box::new(Payload::Null);
    }

    /// Produces an independent value. Scalars, strings,
    /// buffers, arrays, and maps are deep-cloned. Function/class/object/
    /// future/pointer values are reference-semantic: copying them asks the
    /// adapter (or the pointer registry) to bump a reference count, and
    /// installs a matching decrement as the copy's finalizer.
    pub fn copy(&self) -> Value {
        match &*self.payload {
            Payload::Null => Value::null(),
            Payload::Bool(v) => Value::bool(*v),
            Payload::Char(v) => Value::char(*v),
            Payload::Short(v) => Value::short(*v),
            Payload::Int(v) => Value::int(*v),
            Payload::Long(v) => Value::long(*v),
            Payload::Float(v) => Value::float(*v),
            Payload::Double(v) => Value::double(*v),
            Payload::String(s) => Value::string(s.clone()),
            Payload::Buffer(b) => Value::buffer(b.clone()),
            Payload::Array(a) => Value::array(a.iter().map(Value::copy).collect::<Vec<_>>()),
            Payload::Map(m) => {
                let entries: Vec<_> = m.iter().map(|(k, v)| (k.copy(), v.copy())).collect();
                Value::map(entries).expect("keys were already validated as strings")
            }
            Payload::Pointer(id) => {
                let id = *id;
                pointer::reference(id);
                let mut v = Value::ptr(id);
                v.set_finalizer(Finalizer::new(move |_| {
                    pointer::dereference(id);
                }));
                v
            }
            Payload::Future(f) => Value::future(f.clone()),
            Payload::Function(f) => Value::function(f.clone()),
            Payload::Class(c) => Value::class(c.clone()),
            Payload::Object(o) => Value::object(o.clone()),
            Payload::Exception(e) => Value::exception(e.clone()),
            Payload::Throwable(t) => Value::throwable(t.clone()),
        }
    }

    // --- kind-checked extraction -------------------------------------------------

    pub fn as_bool(&self) -> Option<bool> {
        match &*self.payload {
            Payload::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match &*self.payload {
            Payload::Char(v) => Some(*v as i64),
            Payload::Short(v) => Some(*v as i64),
            Payload::Int(v) => Some(*v as i64),
            Payload::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match &*self.payload {
            Payload::Float(v) => Some(*v as f64),
            Payload::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &*self.payload {
            Payload::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&[u8]> {
        match &*self.payload {
            Payload::Buffer(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match &*self.payload {
            Payload::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match &*self.payload {
            Payload::Map(m) => Some(m.as_slice()),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<PointerId> {
        match &*self.payload {
            Payload::Pointer(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match &*self.payload {
            Payload::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Class> {
        match &*self.payload {
            Payload::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match &*self.payload {
            Payload::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_future(&self) -> Option<&Future> {
        match &*self.payload {
            Payload::Future(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_exception(&self) -> Option<&Exception> {
        match &*self.payload {
            Payload::Exception(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_throwable(&self) -> Option<&Throwable> {
        match &*self.payload {
            Payload::Throwable(t) => Some(t),
            _ => None,
        }
    }
}

impl Drop for Value {
    /// `destroy`: runs the finalizer, if any, then the payload's own
    /// `Drop` recursively releases contained values. Infallible.
    fn drop(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            finalizer.run(self);
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.payload {
            Payload::Null => write!(f, "null"),
            Payload::Bool(v) => write!(f, "{v}"),
            Payload::Char(v) => write!(f, "'{v}'"),
            Payload::Short(v) => write!(f, "{v}"),
            Payload::Int(v) => write!(f, "{v}"),
            Payload::Long(v) => write!(f, "{v}"),
            Payload::Float(v) => write!(f, "{v}"),
            Payload::Double(v) => write!(f, "{v}"),
            Payload::String(v) => write!(f, "{v:?}"),
            Payload::Buffer(v) => write!(f, "buffer[{}]", v.len()),
            Payload::Array(v) => f.debug_list().entries(v.iter()).finish(),
            Payload::Map(v) => f.debug_map().entries(v.iter().map(|(k, v)| (k, v))).finish(),
            Payload::Pointer(_) => write!(f, "<ptr>"),
            Payload::Future(_) => write!(f, "<future>"),
            Payload::Function(func) => write!(f, "<function {}>", func.name()),
            Payload::Class(c) => write!(f, "<class {}>", c.name()),
            Payload::Object(o) => write!(f, "<object {}>", o.name()),
            Payload::Exception(e) => write!(f, "<exception {}>", e.message),
            Payload::Throwable(t) => write!(f, "<throwable {:?}>", t.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        assert_eq!(Value::bool(true).as_bool(), Some(true));
        assert_eq!(Value::long(7).as_long(), Some(7));
        assert_eq!(Value::double(1.5).as_double(), Some(1.5));
        assert_eq!(Value::string("hi").as_str(), Some("hi"));
    }

    #[test]
    fn copy_of_scalar_is_independent() {
        let v = Value::string("hello");
        let c = v.copy();
        assert_eq!(v.as_str(), c.as_str());
    }

    #[test]
    fn map_rejects_non_string_keys() {
        let err = Value::map([(Value::int(1), Value::int(2))]).unwrap_err();
        assert!(matches!(err, MetacallError::NonStringMapKey(Kind::Int)));
    }

    #[test]
    fn map_accepts_string_keys() {
        let m = Value::map([(Value::string("a"), Value::int(1))]).unwrap();
        assert_eq!(m.count(), Some(1));
    }

    #[test]
    fn size_includes_string_terminator() {
        assert_eq!(Value::string("abc").size(), 4);
    }

    #[test]
    fn finalizer_runs_once_on_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let mut v = Value::int(1);
        let calls_clone = calls.clone();
        v.set_finalizer(Finalizer::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        drop(v);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pointer_copy_increments_and_finalizer_decrements() {
        let id = pointer::register(10u32);
        let v = Value::ptr(id);
        {
            let copied = v.copy();
            assert!(pointer::with::<u32, _>(id, |x| *x).is_some());
            drop(copied);
        }
        // After the copy's finalizer ran, the original registration remains.
        assert!(pointer::with::<u32, _>(id, |x| *x).is_some());
        drop(v);
    }

    #[test]
    fn transfer_moves_payload_and_neutralizes_source() {
        let mut src = Value::int(42);
        let mut dst = Value::null();
        src.transfer(&mut dst);
        assert_eq!(dst.as_long(), Some(42));
        assert_eq!(src.kind(), Kind::Null);
    }
}
