//! Engine-to-host calls.
//!
//! Every host-exposed function is the same engine closure carrying one
//! host-chosen `func_id`. When a script calls it, the trampoline stores each
//! argument as a fresh handle, writes the handle array to the arena, and
//! forwards `(scope, func_id, argc, argv)` to the installed [`HostCall`].
//! The handle the host returns becomes the call's result.

use std::rc::{Rc, Weak};

use rquickjs::function::Rest;
use rquickjs::{Ctx, Exception, Function, Value};

use crate::arena::{Addr, NULL};
use crate::handle::{ContextId, Handle, RuntimeId};
use crate::scope::Scope;
use crate::store::{CallDepth, Store};

/// The single host entry point reached from scripts.
pub trait HostCall {
    /// Runs host function `func_id`.
    ///
    /// `argv` holds `argc` handles owned by the trampoline; they are
    /// released when the call returns. The returned handle is taken over by
    /// the trampoline: return a fresh or duplicated handle, an exception
    /// handle from [`Scope::throw_message`] to make the call throw, or
    /// [`Handle::NONE`] for `undefined`.
    fn call(&self, scope: &Scope<'_>, func_id: u32, argc: u32, argv: Addr) -> Handle;

    /// Receives `print` and `console.*` output, newline included.
    fn log(&self, message: &str) {
        log::info!(target: "qjs_bridge::console", "{}", message.trim_end_matches('\n'));
    }
}

impl<'js> Scope<'js> {
    /// Creates a script-callable function that forwards to the host under
    /// `func_id`, with the given `name` and declared `length`.
    pub fn new_function(&self, func_id: u32, name: &str, arity: u32) -> Handle {
        let result = self
            .host_function(func_id, name, arity)
            .map(|f| f.into_value());
        self.store_result(result)
    }

    /// [`Scope::new_function`] with the name read from a nul-terminated
    /// arena string. A null name leaves the function anonymous.
    pub fn new_function_at(&self, func_id: u32, name: Addr, arity: u32) -> Handle {
        let name = if name == NULL {
            String::new()
        } else {
            match self.store.arena().read_cstr(name) {
                Ok(name) => name,
                Err(_) => return Handle::NONE,
            }
        };
        self.new_function(func_id, &name, arity)
    }

    pub(crate) fn host_function(
        &self,
        func_id: u32,
        name: &str,
        arity: u32,
    ) -> rquickjs::Result<Function<'js>> {
        let store = Rc::downgrade(&self.store);
        let (id, runtime) = (self.id, self.runtime);
        let func = Function::new(
            self.ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
                trampoline(&store, ctx, id, runtime, func_id, args.0)
            },
        )?
        .with_length(arity as usize)?;
        if name.is_empty() {
            return Ok(func);
        }
        func.with_name(name)
    }
}

fn trampoline<'js>(
    store: &Weak<Store>,
    ctx: Ctx<'js>,
    id: ContextId,
    runtime: RuntimeId,
    func_id: u32,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let Some(store) = store.upgrade() else {
        return Ok(Value::new_undefined(ctx));
    };
    let Some(_depth) = CallDepth::enter(&store) else {
        log::warn!("host call {func_id} exceeds maximum call depth");
        return Err(Exception::throw_range(&ctx, "maximum host call depth exceeded"));
    };
    let Some(host) = store.host() else {
        log::debug!("host call {func_id} with no host installed");
        return Ok(Value::new_undefined(ctx));
    };

    let scope = Scope::new(ctx, id, runtime, Rc::clone(&store));
    let handles: Vec<Handle> = args.into_iter().map(|arg| scope.store_value(arg)).collect();
    let Some(argv) = scope.write_handles(&handles) else {
        for handle in handles {
            store.release(handle);
        }
        return Err(Exception::throw_internal(
            scope.ctx(),
            "cannot marshal host call arguments",
        ));
    };

    let result = host.call(&scope, func_id, handles.len() as u32, argv);
    // The result may be one of the argument handles.
    let value = scope.take_result(result);
    for handle in handles {
        store.release(handle);
    }
    value
}
