//! Host-to-engine calls: plain call, constructor call, and named method
//! invocation.
//!
//! `argv` is the arena address of `argc` little-endian `u32` handles.
//! Arguments reach the callee in the order they appear in that array.
//! Handles that no longer resolve are passed as `undefined`.

use rquickjs::function::{Rest, This};
use rquickjs::{Exception, Value};

use crate::arena::{Addr, NULL};
use crate::handle::Handle;
use crate::scope::Scope;

impl<'js> Scope<'js> {
    fn arguments(&self, argc: u32, argv: Addr) -> Option<Vec<Value<'js>>> {
        if argc == 0 {
            return Some(Vec::new());
        }
        if argv == NULL {
            return None;
        }
        let raw = self.store.arena().read_u32s(argv, argc as usize);
        let raw = raw
            .map_err(|err| log::debug!("bad argument array: {err}"))
            .ok()?;
        Some(
            raw.into_iter()
                .map(|h| self.value_or_undefined(Handle::from_raw(h)))
                .collect(),
        )
    }

    /// `func.apply(this, argv)`. A null `this` calls with `undefined`.
    pub fn call(&self, func: Handle, this: Handle, argc: u32, argv: Addr) -> Handle {
        let Some(callee) = self.value(func) else {
            return Handle::NONE;
        };
        let Some(args) = self.arguments(argc, argv) else {
            return Handle::NONE;
        };
        let this = self.value_or_undefined(this);
        let result = match callee.into_function() {
            Some(func) => func.call::<_, Value>((This(this), Rest(args))),
            None => Err(Exception::throw_type(&self.ctx, "not a function")),
        };
        self.store_result(result)
    }

    /// `new ctor(...argv)`.
    pub fn construct(&self, ctor: Handle, argc: u32, argv: Addr) -> Handle {
        let Some(ctor) = self.value(ctor) else {
            return Handle::NONE;
        };
        let Some(args) = self.arguments(argc, argv) else {
            return Handle::NONE;
        };
        self.store_result(self.construct_value(ctor, args))
    }

    /// `this[name](...argv)` with `name` a nul-terminated arena string.
    /// Primitive receivers are boxed for the lookup and passed unboxed as
    /// `this`.
    pub fn invoke(&self, this: Handle, name: Addr, argc: u32, argv: Addr) -> Handle {
        let Some(this) = self.value(this) else {
            return Handle::NONE;
        };
        let Some(name) = self.store.arena().read_cstr(name).ok() else {
            return Handle::NONE;
        };
        let Some(args) = self.arguments(argc, argv) else {
            return Handle::NONE;
        };
        let result = self.property(&this, &name).and_then(|method| match method.into_function() {
            Some(func) => func.call::<_, Value>((This(this), Rest(args))),
            None => Err(Exception::throw_type(
                &self.ctx,
                &format!("{name} is not a function"),
            )),
        });
        self.store_result(result)
    }

    /// Writes `args` into the arena and calls `func` with them.
    pub fn call_with(&self, func: Handle, this: Handle, args: &[Handle]) -> Handle {
        let argv = match self.write_handles(args) {
            Some(argv) => argv,
            None => return Handle::NONE,
        };
        self.call(func, this, args.len() as u32, argv)
    }

    /// Writes `args` into the arena and constructs `ctor` with them.
    pub fn construct_with(&self, ctor: Handle, args: &[Handle]) -> Handle {
        let argv = match self.write_handles(args) {
            Some(argv) => argv,
            None => return Handle::NONE,
        };
        self.construct(ctor, args.len() as u32, argv)
    }

    pub(crate) fn write_handles(&self, handles: &[Handle]) -> Option<Addr> {
        if handles.is_empty() {
            return Some(NULL);
        }
        let raw: Vec<u32> = handles.iter().map(|h| h.raw()).collect();
        let written = self.store.arena().write_u32s(&raw);
        written
            .map_err(|err| log::warn!("cannot marshal {} arguments: {err}", raw.len()))
            .ok()
    }
}
