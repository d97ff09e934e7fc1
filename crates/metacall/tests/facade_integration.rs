//! End-to-end façade tests against the `mock` adapter.
//!
//! Everything here runs in one `#[test]` function: the façade's registry is
//! process-global, and the `mock`/`file` tags are shared across the whole
//! binary, so interleaving these scenarios across threads would mean one
//! test's `load_from_memory` racing another's `clear`.

use metacall::facade;
use metacall::prelude::*;
use metacall_loader_mock::MockAdapter;

struct DoublingFunction;
impl FunctionImpl for DoublingFunction {
    fn invoke(&self, args: &[Value]) -> Result<Value> {
        let x = args.first().and_then(Value::as_long).unwrap_or(0);
        Ok(Value::long(x * 2))
    }
}

#[test]
fn facade_end_to_end_scenarios() {
    facade::initialize().unwrap();
    MockAdapter::install().unwrap();

    // Scenario: concat(a, b) = a + b
    let handle = facade::load_from_memory("mock", "concat", "concat(a, b) = a + b").unwrap();
    let result = facade::metacall("concat", &[Value::string("hello "), Value::string("world")]);
    assert_eq!(result.as_str(), Some("hello world"));

    // Scenario: a thrown error surfaces as a throwable whose exception
    // carries the thrown message.
    facade::load_from_memory("mock", "boom_mod", r#"boom() = throw("boom")"#).unwrap();
    let thrown = facade::metacall("boom", &[]);
    let throwable = thrown.as_throwable().expect("boom() must return a throwable");
    let exception = throwable.value.as_exception().expect("thrown value must be an exception");
    assert_eq!(exception.message, "boom");

    // Scenario: a host function passed as an argument into a mock script is
    // invoked from inside the script and its result flows back out.
    let signature = Signature::new(vec![Parameter::untyped("x")]);
    let doubling = Function::new("double", signature, std::sync::Arc::new(DoublingFunction));
    facade::load_from_memory("mock", "apply_mod", "apply(cb, x) = cb(x)").unwrap();
    let applied = facade::metacall("apply", &[Value::function(doubling), Value::int(21)]);
    assert_eq!(applied.as_long(), Some(42));

    // Scenario: after `clear`, the name is no longer resolvable, but a
    // value already returned to the caller (e.g. `applied` above) stays
    // safe to use and to destroy.
    facade::clear(handle).unwrap();
    assert_eq!(applied.as_long(), Some(42));
    drop(applied);

    // `concat` was defined by the cleared handle, so it is gone...
    let after_clear = facade::metacall("concat", &[Value::string("a"), Value::string("b")]);
    assert!(after_clear.as_throwable().is_some());
    // ...but `boom`, defined by a different handle, is unaffected.
    let still_there = facade::metacall("boom", &[]);
    assert!(still_there.as_throwable().is_some());

    // Scenario: `load_from_memory` with invalid syntax errors out and
    // leaves `inspect` exactly as it was before the attempt.
    let before = facade::metacall_inspect().unwrap();
    let invalid = facade::load_from_memory("mock", "broken_mod", "not a valid declaration");
    assert!(invalid.is_err());
    let after = facade::metacall_inspect().unwrap();
    assert_eq!(before, after);

    // Inspect stability law: two successive calls with no intervening
    // load/clear return byte-identical output.
    let first = facade::metacall_inspect().unwrap();
    let second = facade::metacall_inspect().unwrap();
    assert_eq!(first, second);
}
