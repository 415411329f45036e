//! Integration tests for the qjs-bridge boundary layer.
//!
//! These tests drive a real QuickJS runtime through handles and the arena,
//! the same way a sandboxed host would.

use std::cell::RefCell;
use std::rc::Rc;

use qjs_bridge::arena::NULL;
use qjs_bridge::{
    Bridge, BridgeConfig, BridgeError, ContextId, ErrorKind, EvalFlags, Handle, HostFunctions,
    PropertyFilter, RuntimeId, Scope,
};

fn new_bridge_with(config: BridgeConfig) -> (Bridge, RuntimeId, ContextId) {
    let mut bridge = Bridge::new(config).expect("bridge init");
    let rt = bridge.new_runtime().expect("runtime");
    let ctx = bridge.new_context(rt).expect("context");
    (bridge, rt, ctx)
}

fn new_bridge() -> (Bridge, RuntimeId, ContextId) {
    new_bridge_with(BridgeConfig::default())
}

fn eval(scope: &Scope<'_>, source: &str) -> Handle {
    scope.eval_source(source, "<test>", EvalFlags::empty())
}

fn int32(scope: &Scope<'_>, handle: Handle) -> i32 {
    let out = scope.store().alloc(4).expect("out slot");
    assert_eq!(scope.to_int32(handle, out), 0);
    scope.store().arena().read_i32(out).expect("read i32")
}

fn text(scope: &Scope<'_>, handle: Handle) -> String {
    scope.to_rust_string(handle).expect("string form")
}

fn set_global(scope: &Scope<'_>, name: &str, value: Handle) {
    let global = scope.global_object();
    assert_eq!(scope.set_named(global, name, value), 1);
    scope.release(global);
}

// ---------------------------------------------------------------------------
// Evaluation and exceptions
// ---------------------------------------------------------------------------

#[test]
fn test_eval_returns_completion_value() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let result = eval(scope, "6 * 7");
            assert!(!result.is_none());
            assert!(scope.is_number(result));
            assert_eq!(int32(scope, result), 42);
        })
        .expect("enter context");
}

#[test]
fn test_eval_reads_source_from_arena() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let (code, len) = scope.store().arena().write_str("'a' + 'b'").unwrap();
            let (name, _) = scope.store().arena().write_str("inline.js").unwrap();
            let result = scope.eval(code, len, name, 0);
            assert!(scope.is_string(result));
            assert_eq!(text(scope, result), "ab");

            // unreadable source is a guard failure, not an exception
            assert!(scope.eval(NULL, 4, NULL, 0).is_none());
            assert!(!scope.has_exception());
        })
        .unwrap();
}

#[test]
fn test_syntax_error_yields_exception_handle() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let result = eval(scope, "let = ;");
            assert!(!result.is_none());
            assert_ne!(result.raw(), 0);
            assert!(scope.is_exception(result));
            assert!(scope.has_exception());

            let error = scope.get_exception();
            assert!(scope.is_error(error));
            assert!(!scope.has_exception());
            let stack = scope.error_stack(error);
            assert!(scope.is_string(stack));
        })
        .unwrap();
}

#[test]
fn test_eval_filename_reaches_stack_traces() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let stack = scope.eval_source("new Error('x').stack", "stack_file.js", EvalFlags::empty());
            assert!(text(scope, stack).contains("stack_file.js"));

            let (code, len) = scope.store().arena().write_str("null.x").unwrap();
            let (name, _) = scope.store().arena().write_str("from_arena.js").unwrap();
            let thrown = scope.eval(code, len, name, 0);
            assert!(scope.is_exception(thrown));
            let error = scope.get_exception();
            let trace = scope.error_stack(error);
            assert!(text(scope, trace).contains("from_arena.js"));
        })
        .unwrap();
}

#[test]
fn test_get_exception_without_pending_is_null() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let nothing = scope.get_exception();
            assert!(scope.is_null(nothing));
        })
        .unwrap();
}

#[test]
fn test_throw_and_error_message_truncation() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let thrown = scope.throw_message(ErrorKind::Range, "abcdef");
            assert!(scope.is_exception(thrown));
            let error = scope.get_exception();
            assert_eq!(scope.error_string(error).as_deref(), Some("abcdef"));

            let buf = scope.store().alloc(4).unwrap();
            assert_eq!(scope.error_message(error, buf, 4), 3);
            assert_eq!(scope.store().arena().read_cstr(buf).unwrap(), "abc");

            let value = scope.new_int32(7);
            let rethrown = scope.throw(value);
            assert!(scope.is_exception(rethrown));
            let caught = scope.get_exception();
            assert!(scope.strict_eq(caught, value));
            // throw keeps the caller's handle alive
            assert!(scope.is_number(value));
        })
        .unwrap();
}

#[test]
fn test_strict_flag_rejects_implicit_globals() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let sloppy = eval(scope, "implicitOne = 1");
            assert!(!scope.is_exception(sloppy));
            let strict = scope.eval_source("implicitTwo = 2", "<strict>", EvalFlags::STRICT);
            assert!(scope.is_exception(strict));
            let error = scope.get_exception();
            assert!(scope.is_error(error));
        })
        .unwrap();
}

#[test]
fn test_module_eval_returns_promise() {
    let (bridge, rt, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let result = scope.eval_source("export const x = 1;", "mod.js", EvalFlags::MODULE);
            assert!(!scope.is_exception(result));
            assert!(scope.is_promise(result));
        })
        .unwrap();
    assert!(bridge.execute_pending_jobs(rt).unwrap() >= 0);
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

#[test]
fn test_sentinel_handle_resolves_to_nothing() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            assert!(scope.value(Handle::NONE).is_none());
            assert!(!scope.is_undefined(Handle::NONE));
            assert!(!scope.is_exception(Handle::NONE));
            scope.release(Handle::NONE);
            assert!(scope.duplicate(Handle::NONE).is_none());
        })
        .unwrap();
}

#[test]
fn test_duplicate_then_release_keeps_original() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let object = scope.new_object();
            let live = scope.store().live_handles();

            let copy = scope.duplicate(object);
            assert_ne!(copy, object);
            assert!(scope.strict_eq(copy, object));
            assert_eq!(scope.store().live_handles(), live + 1);

            scope.release(copy);
            assert_eq!(scope.store().live_handles(), live);
            assert!(scope.is_object(object));
            assert!(!scope.is_object(copy));

            // second release of the same handle is ignored
            scope.release(copy);
            assert_eq!(scope.store().live_handles(), live);
        })
        .unwrap();
}

#[test]
fn test_stale_handle_does_not_alias_new_value() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let old = scope.new_str("old");
            scope.release(old);
            let new = scope.new_int32(1);
            assert_eq!(new.index(), old.index());
            assert!(scope.value(old).is_none());
            assert!(!scope.is_string(old));
            assert!(scope.is_number(new));
        })
        .unwrap();
}

#[test]
fn test_handle_exhaustion_returns_sentinel() {
    let config = BridgeConfig {
        handle_capacity: 8,
        ..BridgeConfig::default()
    };
    let (bridge, _, ctx) = new_bridge_with(config);
    bridge
        .with_context(ctx, |scope| {
            let handles: Vec<Handle> = (0..7).map(|i| scope.new_int32(i)).collect();
            assert!(handles.iter().all(|h| !h.is_none()));
            assert!(scope.new_int32(99).is_none());
            assert_eq!(scope.store().free_handles(), 0);

            scope.release(handles[3]);
            let again = scope.new_int32(100);
            assert_eq!(again.index(), handles[3].index());
        })
        .unwrap();
}

#[test]
fn test_free_runtime_releases_its_handles() {
    let (mut bridge, rt, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            scope.new_object();
            scope.new_str("kept");
        })
        .unwrap();
    assert_eq!(bridge.store().live_handles(), 2);

    bridge.free_runtime(rt).unwrap();
    assert_eq!(bridge.store().live_handles(), 0);
    assert!(bridge.context_runtime(ctx).is_none());
    assert!(matches!(
        bridge.with_context(ctx, |_| ()),
        Err(BridgeError::UnknownContext(_))
    ));
}

#[test]
fn test_context_reports_owning_runtime() {
    let (mut bridge, rt, ctx) = new_bridge();
    assert_eq!(bridge.context_runtime(ctx), Some(rt));
    bridge.free_context(ctx).unwrap();
    assert!(bridge.context_runtime(ctx).is_none());
    assert!(bridge.free_context(ctx).is_err());
}

#[test]
fn test_nested_with_context_is_rejected() {
    let (bridge, _, ctx) = new_bridge();
    let inner = bridge
        .with_context(ctx, |_| bridge.with_context(ctx, |_| ()))
        .unwrap();
    assert!(matches!(inner, Err(BridgeError::Reentrant)));
}

// ---------------------------------------------------------------------------
// Host-to-engine calls
// ---------------------------------------------------------------------------

#[test]
fn test_call_preserves_argument_order() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let join = eval(scope, "(function (a, b, c) { return [a, b, c].join(','); })");
            let args = [scope.new_int32(1), scope.new_str("two"), scope.new_int32(3)];
            let result = scope.call_with(join, Handle::NONE, &args);
            assert_eq!(text(scope, result), "1,two,3");

            let raw: Vec<u32> = args.iter().rev().map(|h| h.raw()).collect();
            let argv = scope.store().arena().write_u32s(&raw).unwrap();
            let reversed = scope.call(join, Handle::NONE, 3, argv);
            assert_eq!(text(scope, reversed), "3,two,1");
        })
        .unwrap();
}

#[test]
fn test_call_binds_this() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let getter = eval(scope, "(function () { return this.n; })");
            let receiver = eval(scope, "({ n: 11 })");
            let result = scope.call_with(getter, receiver, &[]);
            assert_eq!(int32(scope, result), 11);
        })
        .unwrap();
}

#[test]
fn test_call_guards_return_sentinel() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let func = eval(scope, "(function () { return 1; })");
            assert!(scope.call(func, Handle::NONE, 2, NULL).is_none());
            assert!(scope.call(Handle::NONE, Handle::NONE, 0, NULL).is_none());
            assert!(!scope.has_exception());

            let number = scope.new_int32(5);
            let not_callable = scope.call(number, Handle::NONE, 0, NULL);
            assert!(scope.is_exception(not_callable));
            let error = scope.get_exception();
            assert!(scope.is_error(error));
        })
        .unwrap();
}

#[test]
fn test_construct_and_invoke() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let point = eval(scope, "(class Point { constructor(x) { this.x = x; } sum(y) { return this.x + y; } })");
            let five = scope.new_int32(5);
            let instance = scope.construct_with(point, &[five]);
            assert!(scope.is_object(instance));
            assert_eq!(scope.instanceof(instance, point), 1);
            let x = scope.get_named(instance, "x");
            assert_eq!(int32(scope, x), 5);

            let (method, _) = scope.store().arena().write_str("sum").unwrap();
            let two = scope.new_int32(2);
            let argv = scope.store().arena().write_u32s(&[two.raw()]).unwrap();
            let sum = scope.invoke(instance, method, 1, argv);
            assert_eq!(int32(scope, sum), 7);

            let (missing, _) = scope.store().arena().write_str("nope").unwrap();
            let failed = scope.invoke(instance, missing, 0, NULL);
            assert!(scope.is_exception(failed));
        })
        .unwrap();
}

#[test]
fn test_construction_ignores_rebound_globals() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let point = eval(scope, "(class Point { constructor(x) { this.x = x; } })");
            let real_map = eval(scope, "new Map()");
            let real_date = eval(scope, "new Date(0)");
            let real_set = eval(scope, "new Set([1])");
            let weak_set = eval(scope, "new WeakSet()");
            let rebound = eval(
                scope,
                "delete globalThis.Reflect; \
                 globalThis.Date = function Fake() { return { fake: true }; }; \
                 globalThis.Map = function () {}; globalThis.Set = null; 'done'",
            );
            assert_eq!(text(scope, rebound), "done");

            let seven = scope.new_int32(7);
            let instance = scope.construct_with(point, &[seven]);
            assert!(!scope.is_exception(instance));
            let x = scope.get_named(instance, "x");
            assert_eq!(int32(scope, x), 7);
            assert_eq!(scope.instanceof(instance, point), 1);

            let date = scope.new_date(0.0);
            assert!(scope.is_date(date));
            assert!(scope.is_date(real_date));
            assert!(scope.is_map(real_map));
            assert!(scope.is_set(real_set));
            assert!(!scope.is_set(real_map));
            assert!(!scope.is_set(weak_set));
            assert!(!scope.is_map(date));

            let plain = scope.new_object();
            let not_ctor = scope.construct_with(plain, &[]);
            assert!(scope.is_exception(not_ctor));
            assert_eq!(scope.instanceof(instance, plain), -1);
            assert!(scope.has_exception());
        })
        .unwrap();
}

// ---------------------------------------------------------------------------
// Engine-to-host calls
// ---------------------------------------------------------------------------

#[test]
fn test_unmarshalable_host_arguments_throw_and_release() {
    let config = BridgeConfig {
        arena_size: 64,
        ..BridgeConfig::default()
    };
    let (bridge, _, ctx) = new_bridge_with(config);
    let called = Rc::new(RefCell::new(false));
    let host = HostFunctions::new();
    let flag = Rc::clone(&called);
    let id = host.register(move |scope, _| {
        *flag.borrow_mut() = true;
        scope.new_undefined()
    });
    bridge.set_host(Rc::new(host));

    bridge
        .with_context(ctx, |scope| {
            let func = scope.new_function(id, "wide", 0);
            set_global(scope, "wide", func);
            scope.release(func);

            let before = scope.store().live_handles();
            let caught = eval(
                scope,
                "try { wide(...Array(40).fill(1)); 'no' } catch (e) { e.name + ':' + e.message }",
            );
            assert_eq!(text(scope, caught), "InternalError:cannot marshal host call arguments");
            assert_eq!(scope.store().live_handles(), before + 1);

            let narrow = eval(scope, "wide(1, 2)");
            assert!(scope.is_undefined(narrow));
        })
        .unwrap();
    assert!(*called.borrow());
}

#[test]
fn test_host_callback_round_trip() {
    let (bridge, _, ctx) = new_bridge();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let host = HostFunctions::new();
    let record = Rc::clone(&seen);
    host.register_as(17, move |scope, args| {
        for arg in args {
            let kind = if scope.is_number(*arg) { "number" } else { "other" };
            let value = scope.to_rust_string(*arg).unwrap_or_default();
            record.borrow_mut().push(format!("{kind}:{value}"));
        }
        scope.new_int32(42)
    });
    bridge.set_host(Rc::new(host));

    bridge
        .with_context(ctx, |scope| {
            let func = scope.new_function(17, "hostFn", 2);
            assert!(scope.is_function(func));
            set_global(scope, "hostFn", func);

            let before = scope.store().live_handles();
            let result = eval(scope, "hostFn(1, 'x')");
            // argument handles are gone; only the result handle remains
            assert_eq!(scope.store().live_handles(), before + 1);
            assert_eq!(int32(scope, result), 42);

            let meta = eval(scope, "hostFn.name + '/' + hostFn.length");
            assert_eq!(text(scope, meta), "hostFn/2");
        })
        .unwrap();

    assert_eq!(*seen.borrow(), vec!["number:1", "other:x"]);
}

#[test]
fn test_host_may_return_an_argument() {
    let (bridge, _, ctx) = new_bridge();
    let host = HostFunctions::new();
    let id = host.register(|_, args| args.first().copied().unwrap_or(Handle::NONE));
    bridge.set_host(Rc::new(host));

    bridge
        .with_context(ctx, |scope| {
            let func = scope.new_function(id, "identity", 1);
            set_global(scope, "identity", func);
            let result = eval(scope, "identity('same')");
            assert_eq!(text(scope, result), "same");
            let nothing = eval(scope, "identity()");
            assert!(scope.is_undefined(nothing));
        })
        .unwrap();
}

#[test]
fn test_host_exception_propagates_to_script() {
    let (bridge, _, ctx) = new_bridge();
    let host = HostFunctions::new();
    let id = host.register(|scope, _| scope.throw_message(ErrorKind::Type, "bad input"));
    bridge.set_host(Rc::new(host));

    bridge
        .with_context(ctx, |scope| {
            let func = scope.new_function(id, "fails", 0);
            set_global(scope, "fails", func);
            let caught = eval(
                scope,
                "try { fails(); 'no' } catch (e) { (e instanceof TypeError) + ':' + e.message }",
            );
            assert_eq!(text(scope, caught), "true:bad input");

            let uncaught = eval(scope, "fails()");
            assert!(scope.is_exception(uncaught));
            let error = scope.get_exception();
            assert_eq!(scope.error_string(error).as_deref(), Some("bad input"));
        })
        .unwrap();
}

#[test]
fn test_unknown_function_id_returns_undefined() {
    let (bridge, _, ctx) = new_bridge();
    bridge.set_host(Rc::new(HostFunctions::new()));
    bridge
        .with_context(ctx, |scope| {
            let func = scope.new_function(999, "", 0);
            set_global(scope, "ghost", func);
            let result = eval(scope, "ghost(1, 2)");
            assert!(scope.is_undefined(result));
        })
        .unwrap();
}

#[test]
fn test_reentrant_calls_stop_at_depth_limit() {
    let config = BridgeConfig {
        max_call_depth: 4,
        ..BridgeConfig::default()
    };
    let (bridge, _, ctx) = new_bridge_with(config);
    let depth = Rc::new(RefCell::new(0u32));
    let host = HostFunctions::new();
    let deepest = Rc::clone(&depth);
    let id = host.register(move |scope, args| {
        let mut max = deepest.borrow_mut();
        *max = (*max).max(scope.store().call_depth());
        drop(max);
        let global = scope.global_object();
        let recurse = scope.get_named(global, "recurse");
        let result = scope.call_with(recurse, Handle::NONE, args);
        scope.release(recurse);
        scope.release(global);
        result
    });
    bridge.set_host(Rc::new(host));

    bridge
        .with_context(ctx, |scope| {
            let func = scope.new_function(id, "host", 1);
            set_global(scope, "host", func);
            eval(scope, "function recurse(n) { return host(n + 1); }");
            let result = eval(scope, "recurse(0)");
            assert!(scope.is_exception(result));
            let error = scope.get_exception();
            let message = scope.error_string(error).unwrap();
            assert!(message.contains("depth"), "{message}");
        })
        .unwrap();
    assert_eq!(*depth.borrow(), 4);
}

#[test]
fn test_console_routes_through_host_log() {
    let (bridge, _, ctx) = new_bridge();
    let lines = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&lines);
    let host = HostFunctions::new().with_log_sink(move |line| sink.borrow_mut().push(line.to_string()));
    bridge.set_host(Rc::new(host));

    bridge
        .with_context(ctx, |scope| {
            assert_eq!(scope.add_console(), 0);
            let result = eval(scope, "console.log('a', 1, true); print('b'); console.error('c')");
            assert!(!scope.is_exception(result));
        })
        .unwrap();

    assert_eq!(*lines.borrow(), vec!["a 1 true\n", "b\n", "c\n"]);
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[test]
fn test_type_predicates() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let date = scope.new_date(0.0);
            assert!(scope.is_date(date));
            assert!(scope.is_object(date));
            assert!(!scope.is_map(date));

            let map = eval(scope, "new Map()");
            assert!(scope.is_map(map));
            let set = eval(scope, "new Set([1])");
            assert!(scope.is_set(set));
            let re = eval(scope, "/a+/g");
            assert!(scope.is_regexp(re));
            let array = scope.new_array();
            assert!(scope.is_array(array));
            let symbol = eval(scope, "Symbol('s')");
            assert!(scope.is_symbol(symbol));

            let thenable = eval(scope, "({ then() {} })");
            assert!(scope.is_promise(thenable));
            let plain = scope.new_object();
            assert!(!scope.is_promise(plain));

            let yes = scope.new_bool(true);
            assert!(scope.is_bool(yes));
            assert_eq!(scope.to_bool(yes), 1);
            let empty = scope.new_str("");
            assert_eq!(scope.to_bool(empty), 0);
        })
        .unwrap();
}

#[test]
fn test_typeof_names() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let cases = [
                (scope.new_undefined(), "undefined"),
                (scope.new_null(), "object"),
                (scope.new_bool(false), "boolean"),
                (scope.new_float64(1.5), "number"),
                (scope.new_str("s"), "string"),
                (scope.new_bigint64(1), "bigint"),
                (eval(scope, "(() => 1)"), "function"),
                (scope.new_object(), "object"),
            ];
            for (value, expected) in cases {
                let name = scope.type_of(value);
                assert_eq!(text(scope, name), expected);
            }
        })
        .unwrap();
}

#[test]
fn test_numeric_conversions() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let out = scope.store().alloc(8).unwrap();

            let big = scope.new_int64(1 << 40);
            assert!(scope.is_number(big));
            assert_eq!(scope.to_int64(big, out), 0);
            assert_eq!(scope.store().arena().read_i64(out).unwrap(), 1 << 40);

            let half = scope.new_float64(2.5);
            assert_eq!(scope.to_float64(half, out), 0);
            assert_eq!(scope.store().arena().read_f64(out).unwrap(), 2.5);

            let numeric = scope.new_str("12");
            assert_eq!(int32(scope, numeric), 12);

            let bigint = scope.new_bigint64(-5);
            assert!(scope.is_bigint(bigint));
            assert_eq!(scope.to_bigint64(bigint, out), 0);
            assert_eq!(scope.store().arena().read_i64(out).unwrap(), -5);

            let unsigned = scope.new_biguint64(u64::MAX);
            let shown = scope.to_string(unsigned);
            assert_eq!(text(scope, shown), "18446744073709551615");

            let plain = scope.new_int32(3);
            assert_eq!(scope.to_bigint64(plain, out), -1);
            let error = scope.get_exception();
            assert!(scope.is_error(error));

            assert_eq!(scope.to_int32(plain, NULL), -1);
        })
        .unwrap();
}

#[test]
fn test_cstring_lives_in_arena() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let value = eval(scope, "[1, 2]");
            let len_out = scope.store().alloc(4).unwrap();
            let addr = scope.to_cstring_len(value, len_out);
            assert_ne!(addr, NULL);
            assert_eq!(scope.store().arena().read_u32(len_out).unwrap(), 3);
            assert_eq!(scope.store().arena().read_cstr(addr).unwrap(), "1,2");
            scope.free_cstring(addr);

            let from_arena = scope.new_string(addr);
            assert_eq!(text(scope, from_arena), "1,2");
            let prefix = scope.new_string_len(addr, 1);
            assert_eq!(text(scope, prefix), "1");
        })
        .unwrap();
}

#[test]
fn test_property_access() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let object = scope.new_object();
            let (name, _) = scope.store().arena().write_str("answer").unwrap();
            let value = scope.new_int32(42);

            assert_eq!(scope.set_property(object, name, value), 1);
            assert!(scope.is_number(value));
            assert_eq!(scope.has_property(object, name), 1);
            let read = scope.get_property(object, name);
            assert_eq!(int32(scope, read), 42);

            let count_out = scope.store().alloc(4).unwrap();
            let flags = (PropertyFilter::STRING | PropertyFilter::ENUM_ONLY).bits();
            let names = scope.own_property_names(object, count_out, flags);
            assert!(scope.is_array(names));
            assert_eq!(scope.store().arena().read_u32(count_out).unwrap(), 1);
            let first = scope.get_index(names, 0);
            assert_eq!(text(scope, first), "answer");

            assert_eq!(scope.delete_property(object, name), 1);
            assert_eq!(scope.has_property(object, name), 0);

            let array = scope.new_array();
            assert_eq!(scope.set_index(array, 2, value), 1);
            let length = scope.get_named(array, "length");
            assert_eq!(int32(scope, length), 3);

            let number = scope.new_int32(1);
            let missing = scope.get_property(number, name);
            assert!(scope.is_undefined(missing));
            let not_object = scope.set_property(number, name, value);
            assert_eq!(not_object, -1);
            assert!(scope.has_exception());
        })
        .unwrap();
}

#[test]
fn test_own_property_names_honours_filter() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let object = eval(
                scope,
                "(() => { const o = { a: 1 }; \
                 Object.defineProperty(o, 'hidden', { value: 2, enumerable: false }); \
                 o[Symbol('s')] = 3; return o; })()",
            );
            let count_out = scope.store().alloc(4).unwrap();
            let count = |flags: PropertyFilter| {
                let names = scope.own_property_names(object, count_out, flags.bits());
                assert!(scope.is_array(names));
                scope.release(names);
                scope.store().arena().read_u32(count_out).unwrap()
            };

            assert_eq!(count(PropertyFilter::STRING | PropertyFilter::ENUM_ONLY), 1);
            assert_eq!(count(PropertyFilter::STRING), 2);
            assert_eq!(count(PropertyFilter::STRING | PropertyFilter::SYMBOL), 3);
            assert_eq!(count(PropertyFilter::empty()), 0);

            let number = scope.new_int32(1);
            let failed = scope.own_property_names(number, count_out, PropertyFilter::STRING.bits());
            assert!(scope.is_exception(failed));
        })
        .unwrap();
}

#[test]
fn test_primitive_receivers_are_boxed() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let abc = scope.new_str("abc");
            let length = scope.get_named(abc, "length");
            assert_eq!(int32(scope, length), 3);
            let second = scope.get_index(abc, 1);
            assert_eq!(text(scope, second), "b");

            let (upper, _) = scope.store().arena().write_str("toUpperCase").unwrap();
            let shouted = scope.invoke(abc, upper, 0, NULL);
            assert_eq!(text(scope, shouted), "ABC");

            let (fixed, _) = scope.store().arena().write_str("toFixed").unwrap();
            let pi = scope.new_float64(3.14159);
            let two = scope.new_int32(2);
            let argv = scope.store().arena().write_u32s(&[two.raw()]).unwrap();
            let rounded = scope.invoke(pi, fixed, 1, argv);
            assert_eq!(text(scope, rounded), "3.14");

            let nothing = scope.new_undefined();
            let failed = scope.get_named(nothing, "x");
            assert!(scope.is_exception(failed));
            let error = scope.get_exception();
            assert!(scope.is_error(error));
        })
        .unwrap();
}

#[test]
fn test_json_round_trip() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let (json, len) = scope.store().arena().write_str(r#"{"a":[1,2],"b":"c"}"#).unwrap();
            let parsed = scope.json_parse(json, len);
            assert!(scope.is_object(parsed));
            let back = scope.json_stringify(parsed);
            assert_eq!(text(scope, back), r#"{"a":[1,2],"b":"c"}"#);

            let (bad, len) = scope.store().arena().write_str("{nope").unwrap();
            let failed = scope.json_parse(bad, len);
            assert!(scope.is_exception(failed));

            let undefined = scope.new_undefined();
            let nothing = scope.json_stringify(undefined);
            assert!(scope.is_undefined(nothing));
        })
        .unwrap();
}

#[test]
fn test_array_buffer_copies() {
    let (bridge, _, ctx) = new_bridge();
    bridge
        .with_context(ctx, |scope| {
            let data = scope.store().arena().write_bytes(&[1, 2, 3, 4]).unwrap();
            let buffer = scope.new_array_buffer(data, 4);
            assert!(scope.is_object(buffer));
            assert_eq!(scope.array_buffer_len(buffer), 4);

            let len_out = scope.store().alloc(4).unwrap();
            let copy = scope.read_array_buffer(buffer, len_out);
            assert_ne!(copy, NULL);
            assert_eq!(scope.store().arena().read_u32(len_out).unwrap(), 4);
            assert_eq!(scope.store().arena().read(copy, 4).unwrap(), &[1, 2, 3, 4]);

            let not_buffer = scope.new_object();
            assert_eq!(scope.read_array_buffer(not_buffer, len_out), NULL);
            assert_eq!(scope.array_buffer_len(not_buffer), -1);
        })
        .unwrap();
}

#[test]
fn test_promise_resolves_after_job_drain() {
    let (bridge, rt, ctx) = new_bridge();
    let resolve = bridge
        .with_context(ctx, |scope| {
            let out = scope.store().alloc(8).unwrap();
            let promise = scope.new_promise(out);
            assert!(scope.is_promise(promise));
            let funcs = scope.store().arena().read_u32s(out, 2).unwrap();
            set_global(scope, "pending", promise);
            eval(scope, "var settled = 0; pending.then(v => { settled = v; });");
            Handle::from_raw(funcs[0])
        })
        .unwrap();

    bridge
        .with_context(ctx, |scope| {
            let value = scope.new_int32(9);
            let result = scope.call_with(resolve, Handle::NONE, &[value]);
            assert!(!scope.is_exception(result));
        })
        .unwrap();

    assert!(bridge.is_job_pending(rt).unwrap());
    assert!(bridge.execute_pending_jobs(rt).unwrap() >= 1);
    assert!(!bridge.is_job_pending(rt).unwrap());

    bridge
        .with_context(ctx, |scope| {
            let settled = eval(scope, "settled");
            assert_eq!(int32(scope, settled), 9);
        })
        .unwrap();
}

#[test]
fn test_runtime_limits_and_gc() {
    let (bridge, rt, ctx) = new_bridge();
    bridge.set_memory_limit(rt, 64 << 20).unwrap();
    bridge.set_max_stack_size(rt, 1 << 20).unwrap();
    bridge.run_gc(rt).unwrap();
    bridge
        .with_context(ctx, |scope| {
            let result = eval(scope, "function f(n) { return f(n + 1); } f(0)");
            assert!(scope.is_exception(result));
        })
        .unwrap();
    assert!(bridge.run_gc(RuntimeId::from_raw(0)).is_err());
}
