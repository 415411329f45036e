//! Value-level boundary operations for one entered context.
//!
//! Every operation follows the same convention: engine values come in and
//! go out as [`Handle`]s, text comes in as an arena address (nul-terminated,
//! or with an explicit length), and results that are not values are written
//! to caller-supplied arena addresses. Status-returning operations use `1`
//! or `0` for true/false and success, and `-1` when the call could not be
//! carried out.
//!
//! A call that throws still returns a non-zero handle. That handle reports
//! true from [`Scope::is_exception`], and the thrown value is held as the
//! context's pending exception until [`Scope::get_exception`] takes it.
//! [`Handle::NONE`] only ever signals a guard failure: a dead handle, a null
//! address, or an exhausted table.

use std::ffi::CString;
use std::rc::Rc;

use bitflags::bitflags;
use rquickjs::convert::Coerced;
use rquickjs::{qjs, Array, ArrayBuffer, BigInt, Ctx, Exception, Object, Persistent, Type, Value};

use crate::arena::{Addr, NULL};
use crate::handle::{ContextId, Handle, RuntimeId};
use crate::store::{Entry, Native, Store};

bitflags! {
    /// Evaluation mode. Bit values follow QuickJS `JS_EVAL_*`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EvalFlags: u32 {
        const MODULE = 1 << 0;
        const STRICT = 1 << 3;
    }
}

bitflags! {
    /// Key selection for [`Scope::own_property_names`]. Bit values follow
    /// QuickJS `JS_GPN_*`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PropertyFilter: u32 {
        const STRING = 1 << 0;
        const SYMBOL = 1 << 1;
        const PRIVATE = 1 << 2;
        const ENUM_ONLY = 1 << 4;
        const SET_ENUM = 1 << 5;
    }
}

/// QuickJS builtin class id of `Set` objects. The engine exports
/// `JS_IsMap` but no `Set` counterpart.
const JS_CLASS_SET: qjs::JSClassID = 36;

/// Error constructors available to [`Scope::throw_error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Internal,
    Type,
    Range,
    Syntax,
    Reference,
}

pub struct Scope<'js> {
    pub(crate) ctx: Ctx<'js>,
    pub(crate) id: ContextId,
    pub(crate) runtime: RuntimeId,
    pub(crate) store: Rc<Store>,
}

impl<'js> Scope<'js> {
    pub(crate) fn new(ctx: Ctx<'js>, id: ContextId, runtime: RuntimeId, store: Rc<Store>) -> Self {
        Scope {
            ctx,
            id,
            runtime,
            store,
        }
    }

    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    pub fn context_id(&self) -> ContextId {
        self.id
    }

    pub fn runtime_id(&self) -> RuntimeId {
        self.runtime
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ------------------------------------------------------------------
    // Handle plumbing
    // ------------------------------------------------------------------

    /// Takes ownership of `value` and returns its handle.
    pub fn store_value(&self, value: Value<'js>) -> Handle {
        let stored = Persistent::save(&self.ctx, value);
        self.store.insert(Entry {
            runtime: self.runtime,
            native: Native::Value(stored),
        })
    }

    pub(crate) fn store_result(&self, result: rquickjs::Result<Value<'js>>) -> Handle {
        match result {
            Ok(value) => self.store_value(value),
            Err(err) => self.store_error(err),
        }
    }

    /// Moves the thrown value into the pending slot and returns an
    /// exception handle. Non-exception errors are rethrown as InternalError.
    pub(crate) fn store_error(&self, err: rquickjs::Error) -> Handle {
        self.record_error(err);
        self.store.insert(Entry {
            runtime: self.runtime,
            native: Native::Exception,
        })
    }

    pub(crate) fn record_error(&self, err: rquickjs::Error) {
        if !matches!(err, rquickjs::Error::Exception) {
            let _ = Exception::throw_internal(&self.ctx, &err.to_string());
        }
        let thrown = self.ctx.catch();
        self.store
            .set_pending(self.id, Persistent::save(&self.ctx, thrown));
    }

    /// Drops an error raised while answering a query that has no channel
    /// for it.
    fn discard(&self, err: rquickjs::Error) {
        if matches!(err, rquickjs::Error::Exception) {
            let _ = self.ctx.catch();
        }
    }

    /// Resolves `handle` to a new reference. Dead handles and exception
    /// handles resolve to `None`.
    pub fn value(&self, handle: Handle) -> Option<Value<'js>> {
        match self.store.get(handle)?.native {
            Native::Value(stored) => match stored.restore(&self.ctx) {
                Ok(value) => Some(value),
                Err(err) => {
                    log::debug!("cannot restore {handle:?}: {err}");
                    None
                }
            },
            Native::Exception => None,
        }
    }

    pub(crate) fn value_or_undefined(&self, handle: Handle) -> Value<'js> {
        self.value(handle)
            .unwrap_or_else(|| Value::new_undefined(self.ctx.clone()))
    }

    /// Wraps an owned value returned by a raw engine call. The exception
    /// marker becomes [`rquickjs::Error::Exception`] with the thrown value
    /// still pending in the engine.
    pub(crate) fn from_raw(&self, raw: qjs::JSValue) -> rquickjs::Result<Value<'js>> {
        if unsafe { qjs::JS_IsException(raw) } {
            return Err(rquickjs::Error::Exception);
        }
        // SAFETY: `raw` is owned and was produced by this context.
        Ok(unsafe { Value::from_raw(self.ctx.clone(), raw) })
    }

    pub(crate) fn raw_ctx(&self) -> *mut qjs::JSContext {
        self.ctx.as_raw().as_ptr()
    }

    fn c_string(&self, text: &str, what: &str) -> rquickjs::Result<CString> {
        CString::new(text)
            .map_err(|_| Exception::throw_type(&self.ctx, &format!("{what} contains a nul byte")))
    }

    /// Reads `name` from any value. Primitives are boxed, so `"abc".length`
    /// works; `undefined` and `null` throw.
    pub(crate) fn property(&self, target: &Value<'js>, name: &str) -> rquickjs::Result<Value<'js>> {
        let name = self.c_string(name, "property name")?;
        // SAFETY: `target` stays alive for the call; the result is owned.
        let raw = unsafe { qjs::JS_GetPropertyStr(self.raw_ctx(), target.as_raw(), name.as_ptr()) };
        self.from_raw(raw)
    }

    /// Takes the value behind a handle returned by the host. An exception
    /// handle rethrows the pending exception.
    pub(crate) fn take_result(&self, handle: Handle) -> rquickjs::Result<Value<'js>> {
        match self.store.take(handle) {
            None => Ok(Value::new_undefined(self.ctx.clone())),
            Some(Entry {
                native: Native::Value(stored),
                ..
            }) => stored.restore(&self.ctx),
            Some(Entry {
                native: Native::Exception,
                ..
            }) => match self.store.take_pending(self.id) {
                Some(thrown) => {
                    let thrown = thrown.restore(&self.ctx)?;
                    Err(self.ctx.throw(thrown))
                }
                None => Err(Exception::throw_internal(&self.ctx, "host function failed")),
            },
        }
    }

    pub fn duplicate(&self, handle: Handle) -> Handle {
        self.store.duplicate(handle)
    }

    pub fn release(&self, handle: Handle) {
        self.store.release(handle);
    }

    fn text(&self, addr: Addr, len: u32) -> Option<String> {
        let read = self.store.arena().read_str(addr, len as usize);
        read.map_err(|err| log::debug!("bad text argument: {err}")).ok()
    }

    fn cstr(&self, addr: Addr) -> Option<String> {
        let read = self.store.arena().read_cstr(addr);
        read.map_err(|err| log::debug!("bad string argument: {err}")).ok()
    }

    fn object(&self, handle: Handle) -> Option<rquickjs::Result<Object<'js>>> {
        let value = self.value(handle)?;
        Some(match value.into_object() {
            Some(object) => Ok(object),
            None => Err(Exception::throw_type(&self.ctx, "not an object")),
        })
    }

    fn status(&self, result: rquickjs::Result<bool>) -> i32 {
        match result {
            Ok(flag) => flag as i32,
            Err(err) => {
                self.record_error(err);
                -1
            }
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluates `len` bytes of source at `code`. A null `filename` means
    /// `<eval>`.
    pub fn eval(&self, code: Addr, len: u32, filename: Addr, flags: u32) -> Handle {
        let Some(source) = self.text(code, len) else {
            return Handle::NONE;
        };
        let filename = if filename == NULL {
            "<eval>".to_string()
        } else {
            match self.cstr(filename) {
                Some(name) => name,
                None => return Handle::NONE,
            }
        };
        self.eval_source(&source, &filename, EvalFlags::from_bits_truncate(flags))
    }

    /// Evaluates `source` under `filename`, which appears in error
    /// locations and stack traces. Scripts return their completion value;
    /// modules return the promise of their evaluation.
    pub fn eval_source(&self, source: &str, filename: &str, flags: EvalFlags) -> Handle {
        log::trace!("eval {filename} ({} bytes, {flags:?})", source.len());
        let result = self.c_string(source, "source").and_then(|code| {
            let name = self.c_string(filename, "filename")?;
            // SAFETY: both strings are nul-terminated and outlive the call.
            let raw = unsafe {
                qjs::JS_Eval(
                    self.raw_ctx(),
                    code.as_ptr(),
                    source.len() as _,
                    name.as_ptr(),
                    flags.bits() as i32,
                )
            };
            self.from_raw(raw)
        });
        self.store_result(result)
    }

    // ------------------------------------------------------------------
    // Type predicates
    // ------------------------------------------------------------------

    fn check(&self, handle: Handle, pred: impl FnOnce(&Value<'js>) -> bool) -> bool {
        self.value(handle).is_some_and(|v| pred(&v))
    }

    pub fn is_exception(&self, handle: Handle) -> bool {
        self.store.is_exception(handle)
    }

    pub fn is_undefined(&self, handle: Handle) -> bool {
        self.check(handle, Value::is_undefined)
    }

    pub fn is_null(&self, handle: Handle) -> bool {
        self.check(handle, Value::is_null)
    }

    pub fn is_bool(&self, handle: Handle) -> bool {
        self.check(handle, Value::is_bool)
    }

    pub fn is_number(&self, handle: Handle) -> bool {
        self.check(handle, Value::is_number)
    }

    pub fn is_string(&self, handle: Handle) -> bool {
        self.check(handle, Value::is_string)
    }

    pub fn is_symbol(&self, handle: Handle) -> bool {
        self.check(handle, Value::is_symbol)
    }

    pub fn is_object(&self, handle: Handle) -> bool {
        self.check(handle, Value::is_object)
    }

    pub fn is_function(&self, handle: Handle) -> bool {
        self.check(handle, Value::is_function)
    }

    pub fn is_array(&self, handle: Handle) -> bool {
        self.check(handle, Value::is_array)
    }

    pub fn is_error(&self, handle: Handle) -> bool {
        self.check(handle, Value::is_error)
    }

    pub fn is_bigint(&self, handle: Handle) -> bool {
        self.check(handle, |v| v.type_of() == Type::BigInt)
    }

    pub fn is_date(&self, handle: Handle) -> bool {
        self.check(handle, |v| unsafe { qjs::JS_IsDate(v.as_raw()) })
    }

    pub fn is_regexp(&self, handle: Handle) -> bool {
        self.check(handle, |v| unsafe { qjs::JS_IsRegExp(v.as_raw()) })
    }

    pub fn is_map(&self, handle: Handle) -> bool {
        self.check(handle, |v| unsafe { qjs::JS_IsMap(v.as_raw()) })
    }

    pub fn is_set(&self, handle: Handle) -> bool {
        self.check(handle, |v| {
            let class = unsafe { qjs::JS_GetClassID(v.as_raw()) };
            class == JS_CLASS_SET
        })
    }

    /// Structural check: an object whose `then` is callable.
    pub fn is_promise(&self, handle: Handle) -> bool {
        let Some(object) = self.value(handle).and_then(|v| v.into_object()) else {
            return false;
        };
        match object.get::<_, Value>("then") {
            Ok(then) => then.is_function(),
            Err(err) => {
                self.discard(err);
                false
            }
        }
    }

    /// `value instanceof ctor`: 1, 0, or -1 when the check throws.
    pub fn instanceof(&self, value: Handle, ctor: Handle) -> i32 {
        let (Some(value), Some(ctor)) = (self.value(value), self.value(ctor)) else {
            return -1;
        };
        // SAFETY: both values stay alive for the call.
        let status = unsafe { qjs::JS_IsInstanceOf(self.raw_ctx(), value.as_raw(), ctor.as_raw()) };
        if status < 0 {
            self.record_error(rquickjs::Error::Exception);
            return -1;
        }
        status
    }

    /// Same tag and same identity. Numbers compare by value.
    pub fn strict_eq(&self, a: Handle, b: Handle) -> bool {
        match (self.value(a), self.value(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------

    pub fn to_bool(&self, handle: Handle) -> i32 {
        let Some(value) = self.value(handle) else {
            return -1;
        };
        self.status(value.get::<Coerced<bool>>().map(|c| c.0))
    }

    fn convert_into<T>(
        &self,
        handle: Handle,
        out: Addr,
        convert: impl FnOnce(Value<'js>) -> rquickjs::Result<T>,
        write: impl FnOnce(&mut crate::arena::Arena, Addr, T) -> Result<(), crate::ArenaError>,
    ) -> i32 {
        if out == NULL {
            return -1;
        }
        let Some(value) = self.value(handle) else {
            return -1;
        };
        match convert(value) {
            Ok(converted) => {
                let written = write(&mut self.store.arena(), out, converted);
                match written {
                    Ok(()) => 0,
                    Err(err) => {
                        log::debug!("cannot write conversion result: {err}");
                        -1
                    }
                }
            }
            Err(err) => {
                self.record_error(err);
                -1
            }
        }
    }

    pub fn to_int32(&self, handle: Handle, out: Addr) -> i32 {
        self.convert_into(
            handle,
            out,
            |v| v.get::<Coerced<i32>>().map(|c| c.0),
            |arena, addr, n| arena.write_i32(addr, n),
        )
    }

    pub fn to_int64(&self, handle: Handle, out: Addr) -> i32 {
        self.convert_into(
            handle,
            out,
            |v| v.get::<Coerced<i64>>().map(|c| c.0),
            |arena, addr, n| arena.write_i64(addr, n),
        )
    }

    pub fn to_float64(&self, handle: Handle, out: Addr) -> i32 {
        self.convert_into(
            handle,
            out,
            |v| v.get::<Coerced<f64>>().map(|c| c.0),
            |arena, addr, n| arena.write_f64(addr, n),
        )
    }

    pub fn to_bigint64(&self, handle: Handle, out: Addr) -> i32 {
        let ctx = self.ctx.clone();
        self.convert_into(
            handle,
            out,
            move |v| match v.into_big_int() {
                Some(big) => big.to_i64(),
                None => Err(Exception::throw_type(&ctx, "cannot convert to bigint")),
            },
            |arena, addr, n| arena.write_i64(addr, n),
        )
    }

    fn coerce_string(&self, handle: Handle) -> Option<String> {
        let value = self.value(handle)?;
        match value.get::<Coerced<String>>() {
            Ok(text) => Some(text.0),
            Err(err) => {
                self.record_error(err);
                None
            }
        }
    }

    /// Copies the string form of `handle` into the arena as a nul-terminated
    /// buffer. Returns 0 when conversion fails.
    pub fn to_cstring(&self, handle: Handle) -> Addr {
        self.to_cstring_len(handle, NULL)
    }

    /// Like [`Scope::to_cstring`], also writing the byte length to
    /// `len_out` when it is not null.
    pub fn to_cstring_len(&self, handle: Handle, len_out: Addr) -> Addr {
        let Some(text) = self.coerce_string(handle) else {
            return NULL;
        };
        let mut arena = self.store.arena();
        let (addr, len) = match arena.write_str(&text) {
            Ok(written) => written,
            Err(err) => {
                log::debug!("cannot copy string out: {err}");
                return NULL;
            }
        };
        if len_out != NULL && arena.write_u32(len_out, len).is_err() {
            return NULL;
        }
        addr
    }

    /// Strings returned by [`Scope::to_cstring`] live in the arena and are
    /// reclaimed with it, so there is nothing to free.
    pub fn free_cstring(&self, _addr: Addr) {}

    /// Reads a string value back as Rust text.
    pub fn to_rust_string(&self, handle: Handle) -> Option<String> {
        self.coerce_string(handle)
    }

    pub fn to_string(&self, handle: Handle) -> Handle {
        let Some(value) = self.value(handle) else {
            return Handle::NONE;
        };
        let result = value
            .get::<Coerced<rquickjs::String>>()
            .map(|s| s.0.into_value());
        self.store_result(result)
    }

    /// `typeof value` as a string handle.
    pub fn type_of(&self, handle: Handle) -> Handle {
        let Some(value) = self.value(handle) else {
            return Handle::NONE;
        };
        let name = if value.is_undefined() {
            "undefined"
        } else if value.is_bool() {
            "boolean"
        } else if value.is_number() {
            "number"
        } else if value.is_string() {
            "string"
        } else if value.is_symbol() {
            "symbol"
        } else if value.type_of() == Type::BigInt {
            "bigint"
        } else if value.is_function() {
            "function"
        } else {
            "object"
        };
        self.new_str(name)
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    pub fn new_undefined(&self) -> Handle {
        self.store_value(Value::new_undefined(self.ctx.clone()))
    }

    pub fn new_null(&self) -> Handle {
        self.store_value(Value::new_null(self.ctx.clone()))
    }

    pub fn new_bool(&self, value: bool) -> Handle {
        self.store_value(Value::new_bool(self.ctx.clone(), value))
    }

    pub fn new_int32(&self, value: i32) -> Handle {
        self.store_value(Value::new_int(self.ctx.clone(), value))
    }

    /// Small integers stay integers; the rest become doubles.
    pub fn new_int64(&self, value: i64) -> Handle {
        match i32::try_from(value) {
            Ok(small) => self.new_int32(small),
            Err(_) => self.new_float64(value as f64),
        }
    }

    pub fn new_float64(&self, value: f64) -> Handle {
        self.store_value(Value::new_float(self.ctx.clone(), value))
    }

    pub fn new_str(&self, text: &str) -> Handle {
        let result = rquickjs::String::from_str(self.ctx.clone(), text).map(|s| s.into_value());
        self.store_result(result)
    }

    /// String from a nul-terminated arena buffer.
    pub fn new_string(&self, addr: Addr) -> Handle {
        match self.cstr(addr) {
            Some(text) => self.new_str(&text),
            None => Handle::NONE,
        }
    }

    /// String from `len` bytes of UTF-8 at `addr`.
    pub fn new_string_len(&self, addr: Addr, len: u32) -> Handle {
        if len == 0 {
            return self.new_str("");
        }
        match self.text(addr, len) {
            Some(text) => self.new_str(&text),
            None => Handle::NONE,
        }
    }

    pub fn new_object(&self) -> Handle {
        let result = Object::new(self.ctx.clone()).map(|o| o.into_value());
        self.store_result(result)
    }

    pub fn new_array(&self) -> Handle {
        let result = Array::new(self.ctx.clone()).map(|a| a.into_value());
        self.store_result(result)
    }

    pub fn new_date(&self, epoch_ms: f64) -> Handle {
        // SAFETY: the result is owned.
        let raw = unsafe { qjs::JS_NewDate(self.raw_ctx(), epoch_ms) };
        self.store_result(self.from_raw(raw))
    }

    pub fn new_bigint64(&self, value: i64) -> Handle {
        let result = BigInt::from_i64(self.ctx.clone(), value).map(|b| b.into_value());
        self.store_result(result)
    }

    pub fn new_biguint64(&self, value: u64) -> Handle {
        let result = BigInt::from_u64(self.ctx.clone(), value).map(|b| b.into_value());
        self.store_result(result)
    }

    /// Creates a pending promise and writes its resolve and reject function
    /// handles to `resolving_out[0..2]`.
    pub fn new_promise(&self, resolving_out: Addr) -> Handle {
        if resolving_out == NULL {
            return Handle::NONE;
        }
        let (promise, resolve, reject) = match self.ctx.promise() {
            Ok(parts) => parts,
            Err(err) => return self.store_error(err),
        };
        let resolve = self.store_value(resolve.into_value());
        let reject = self.store_value(reject.into_value());
        let written = {
            let mut arena = self.store.arena();
            arena
                .write_u32(resolving_out, resolve.raw())
                .and_then(|_| arena.write_u32(resolving_out + 4, reject.raw()))
        };
        if let Err(err) = written {
            log::debug!("cannot write resolving functions: {err}");
            self.release(resolve);
            self.release(reject);
            return Handle::NONE;
        }
        self.store_value(promise.into_value())
    }

    pub fn global_object(&self) -> Handle {
        self.store_value(self.ctx.globals().into_value())
    }

    // ------------------------------------------------------------------
    // Object operations
    // ------------------------------------------------------------------

    pub fn get_property(&self, object: Handle, name: Addr) -> Handle {
        let Some(name) = self.cstr(name) else {
            return Handle::NONE;
        };
        self.get_named(object, &name)
    }

    /// Reads `target[name]`. Primitive targets are boxed.
    pub fn get_named(&self, target: Handle, name: &str) -> Handle {
        let Some(target) = self.value(target) else {
            return Handle::NONE;
        };
        self.store_result(self.property(&target, name))
    }

    /// Stores a new reference to `value` under `name`; the caller keeps
    /// `value`. Returns 1 on success.
    pub fn set_property(&self, object: Handle, name: Addr, value: Handle) -> i32 {
        let Some(name) = self.cstr(name) else {
            return -1;
        };
        self.set_named(object, &name, value)
    }

    pub fn set_named(&self, object: Handle, name: &str, value: Handle) -> i32 {
        let Some(value) = self.value(value) else {
            return -1;
        };
        let Some(object) = self.object(object) else {
            return -1;
        };
        self.status(object.and_then(|o| o.set(name, value)).map(|_| true))
    }

    pub fn has_property(&self, object: Handle, name: Addr) -> i32 {
        let Some(name) = self.cstr(name) else {
            return -1;
        };
        let Some(object) = self.object(object) else {
            return -1;
        };
        self.status(object.and_then(|o| o.contains_key(name.as_str())))
    }

    pub fn delete_property(&self, object: Handle, name: Addr) -> i32 {
        let Some(name) = self.cstr(name) else {
            return -1;
        };
        let Some(object) = self.object(object) else {
            return -1;
        };
        self.status(object.and_then(|o| o.remove(name.as_str())).map(|_| true))
    }

    pub fn get_index(&self, target: Handle, index: u32) -> Handle {
        let Some(target) = self.value(target) else {
            return Handle::NONE;
        };
        // SAFETY: `target` stays alive for the call; the result is owned.
        let raw = unsafe { qjs::JS_GetPropertyUint32(self.raw_ctx(), target.as_raw(), index) };
        self.store_result(self.from_raw(raw))
    }

    pub fn set_index(&self, object: Handle, index: u32, value: Handle) -> i32 {
        let Some(value) = self.value(value) else {
            return -1;
        };
        let Some(object) = self.object(object) else {
            return -1;
        };
        self.status(object.and_then(|o| o.set(index, value)).map(|_| true))
    }

    /// Own keys selected by `flags` (a [`PropertyFilter`] mask) as an array
    /// of strings; the key count is written to `count_out`.
    pub fn own_property_names(&self, object: Handle, count_out: Addr, flags: u32) -> Handle {
        if count_out == NULL {
            return Handle::NONE;
        }
        let Some(object) = self.value(object) else {
            return Handle::NONE;
        };
        let (names, count) = match self.own_keys(&object, flags) {
            Ok(pair) => pair,
            Err(err) => return self.store_error(err),
        };
        let written = self.store.arena().write_u32(count_out, count);
        if let Err(err) = written {
            log::debug!("cannot write property count: {err}");
            return Handle::NONE;
        }
        self.store_value(names.into_value())
    }

    fn own_keys(&self, object: &Value<'js>, flags: u32) -> rquickjs::Result<(Array<'js>, u32)> {
        let ctx = self.raw_ctx();
        let mut table: *mut qjs::JSPropertyEnum = std::ptr::null_mut();
        let mut len = 0u32;
        // SAFETY: `object` stays alive; on success the table is freed below.
        let status = unsafe {
            qjs::JS_GetOwnPropertyNames(ctx, &mut table, &mut len, object.as_raw(), flags as i32)
        };
        if status < 0 {
            return Err(rquickjs::Error::Exception);
        }
        let entries: &[qjs::JSPropertyEnum] = if table.is_null() {
            &[]
        } else {
            // SAFETY: the engine returned `len` initialised entries.
            unsafe { std::slice::from_raw_parts(table, len as usize) }
        };
        let names = Array::new(self.ctx.clone()).and_then(|names| {
            for (index, entry) in entries.iter().enumerate() {
                // SAFETY: the atom is live until the table is freed.
                let name = self.from_raw(unsafe { qjs::JS_AtomToString(ctx, entry.atom) })?;
                names.set(index, name)?;
            }
            Ok(names)
        });
        // SAFETY: frees every atom and the table itself exactly once.
        unsafe { qjs::JS_FreePropertyEnum(ctx, table, len) };
        Ok((names?, len))
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    pub fn has_exception(&self) -> bool {
        self.store.has_pending(self.id)
    }

    /// Takes the pending exception. Returns a null handle when nothing is
    /// pending.
    pub fn get_exception(&self) -> Handle {
        match self.store.take_pending(self.id) {
            Some(thrown) => self.store_result(thrown.restore(&self.ctx)),
            None => self.new_null(),
        }
    }

    /// Throws a new reference to `value`; the caller keeps `value`.
    pub fn throw(&self, value: Handle) -> Handle {
        let Some(value) = self.value(value) else {
            return Handle::NONE;
        };
        self.store_error(self.ctx.throw(value))
    }

    pub fn throw_error(&self, kind: ErrorKind, message: Addr) -> Handle {
        match self.cstr(message) {
            Some(message) => self.throw_message(kind, &message),
            None => Handle::NONE,
        }
    }

    pub fn throw_message(&self, kind: ErrorKind, message: &str) -> Handle {
        let err = match kind {
            ErrorKind::Internal => Exception::throw_internal(&self.ctx, message),
            ErrorKind::Type => Exception::throw_type(&self.ctx, message),
            ErrorKind::Range => Exception::throw_range(&self.ctx, message),
            ErrorKind::Syntax => Exception::throw_syntax(&self.ctx, message),
            ErrorKind::Reference => Exception::throw_reference(&self.ctx, message),
        };
        self.store_error(err)
    }

    fn error_text(&self, value: &Value<'js>) -> Option<String> {
        let message = value
            .as_object()
            .and_then(|o| o.get::<_, Value>("message").ok())
            .filter(|m| !m.is_undefined());
        let source = message.unwrap_or_else(|| value.clone());
        match source.get::<Coerced<String>>() {
            Ok(text) => Some(text.0),
            Err(err) => {
                self.discard(err);
                None
            }
        }
    }

    /// Copies the error's `message` (or its string form) into `buf`,
    /// truncated to `cap - 1` bytes and nul-terminated. Returns the number
    /// of bytes copied, without the nul.
    pub fn error_message(&self, error: Handle, buf: Addr, cap: u32) -> u32 {
        if buf == NULL || cap == 0 {
            return 0;
        }
        let text = self
            .value(error)
            .and_then(|v| self.error_text(&v))
            .unwrap_or_default();
        let mut len = text.len().min(cap as usize - 1);
        while !text.is_char_boundary(len) {
            len -= 1;
        }
        let mut arena = self.store.arena();
        let written = arena
            .write(buf, &text.as_bytes()[..len])
            .and_then(|_| arena.write(buf + len as Addr, &[0]));
        match written {
            Ok(()) => len as u32,
            Err(err) => {
                log::debug!("cannot write error message: {err}");
                0
            }
        }
    }

    /// Reads an error's message as Rust text.
    pub fn error_string(&self, error: Handle) -> Option<String> {
        self.value(error).and_then(|v| self.error_text(&v))
    }

    /// The error's `stack`, falling back to its string form.
    pub fn error_stack(&self, error: Handle) -> Handle {
        let Some(value) = self.value(error) else {
            return Handle::NONE;
        };
        let stack = value
            .as_object()
            .and_then(|o| o.get::<_, Value>("stack").ok())
            .filter(|s| !s.is_undefined());
        match stack {
            Some(stack) => self.store_value(stack),
            None => self.to_string(error),
        }
    }

    // ------------------------------------------------------------------
    // JSON and buffers
    // ------------------------------------------------------------------

    pub fn json_parse(&self, addr: Addr, len: u32) -> Handle {
        let Some(text) = self.text(addr, len) else {
            return Handle::NONE;
        };
        self.store_result(self.ctx.json_parse(text))
    }

    /// `JSON.stringify(value)`; undefined when the value has no JSON form.
    pub fn json_stringify(&self, handle: Handle) -> Handle {
        let Some(value) = self.value(handle) else {
            return Handle::NONE;
        };
        let result = self.ctx.json_stringify(value).map(|s| match s {
            Some(s) => s.into_value(),
            None => Value::new_undefined(self.ctx.clone()),
        });
        self.store_result(result)
    }

    /// ArrayBuffer holding a copy of `len` bytes at `addr`.
    pub fn new_array_buffer(&self, addr: Addr, len: u32) -> Handle {
        let bytes = if len == 0 {
            Vec::new()
        } else {
            let read = self
                .store
                .arena()
                .read(addr, len as usize)
                .map(<[u8]>::to_vec);
            match read {
                Ok(bytes) => bytes,
                Err(err) => {
                    log::debug!("bad buffer argument: {err}");
                    return Handle::NONE;
                }
            }
        };
        let result = ArrayBuffer::new_copy(self.ctx.clone(), bytes).map(|b| b.into_value());
        self.store_result(result)
    }

    /// Byte length of an ArrayBuffer, or -1 for non-buffers and detached
    /// buffers.
    pub fn array_buffer_len(&self, handle: Handle) -> i64 {
        self.value(handle)
            .and_then(|v| v.into_object())
            .and_then(ArrayBuffer::from_object)
            .and_then(|buffer| buffer.as_bytes().map(|bytes| bytes.len() as i64))
            .unwrap_or(-1)
    }

    /// Copies an ArrayBuffer's contents into the arena and writes its length
    /// to `len_out`. Returns 0 for non-buffers and detached buffers.
    pub fn read_array_buffer(&self, handle: Handle, len_out: Addr) -> Addr {
        if len_out == NULL {
            return NULL;
        }
        let Some(buffer) = self
            .value(handle)
            .and_then(|v| v.into_object())
            .and_then(ArrayBuffer::from_object)
        else {
            return NULL;
        };
        let Some(bytes) = buffer.as_bytes() else {
            return NULL;
        };
        let mut arena = self.store.arena();
        let addr = match arena.write_bytes(bytes) {
            Ok(addr) => addr,
            Err(err) => {
                log::debug!("cannot copy buffer out: {err}");
                return NULL;
            }
        };
        match arena.write_u32(len_out, bytes.len() as u32) {
            Ok(()) => addr,
            Err(_) => NULL,
        }
    }

    pub(crate) fn construct_value(
        &self,
        ctor: Value<'js>,
        args: Vec<Value<'js>>,
    ) -> rquickjs::Result<Value<'js>> {
        let mut argv: Vec<qjs::JSValue> = args.iter().map(Value::as_raw).collect();
        // SAFETY: `ctor` and `args` keep every borrowed value alive; the
        // result is owned.
        let raw = unsafe {
            qjs::JS_CallConstructor(self.raw_ctx(), ctor.as_raw(), argv.len() as i32, argv.as_mut_ptr())
        };
        self.from_raw(raw)
    }
}
