//! Host-side dispatch and the `print`/`console` globals.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};

use crate::arena::Addr;
use crate::handle::Handle;
use crate::scope::{ErrorKind, Scope};
use crate::store::Store;
use crate::trampoline::HostCall;

pub type HostFn = Rc<dyn Fn(&Scope<'_>, &[Handle]) -> Handle>;
pub type LogSink = Box<dyn Fn(&str)>;

const CONSOLE_METHODS: [&str; 5] = ["log", "info", "warn", "error", "debug"];

/// A [`HostCall`] that dispatches on `func_id` to registered closures.
///
/// Closures receive the argument handles and return the result handle with
/// the ownership rules of [`HostCall::call`]. Ids with no closure behind
/// them return `undefined`.
pub struct HostFunctions {
    functions: RefCell<HashMap<u32, HostFn>>,
    next_id: Cell<u32>,
    sink: Option<LogSink>,
}

impl HostFunctions {
    pub fn new() -> Self {
        HostFunctions {
            functions: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            sink: None,
        }
    }

    /// Routes console output to `sink` instead of the `log` facade.
    pub fn with_log_sink<S>(mut self, sink: S) -> Self
    where
        S: Fn(&str) + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Registers `f` under the next free id and returns that id.
    pub fn register<F>(&self, f: F) -> u32
    where
        F: Fn(&Scope<'_>, &[Handle]) -> Handle + 'static,
    {
        let mut id = self.next_id.get();
        while self.functions.borrow().contains_key(&id) {
            id = id.wrapping_add(1);
        }
        self.next_id.set(id.wrapping_add(1));
        self.functions.borrow_mut().insert(id, Rc::new(f));
        id
    }

    /// Registers `f` under a caller-chosen id, replacing any previous one.
    pub fn register_as<F>(&self, id: u32, f: F)
    where
        F: Fn(&Scope<'_>, &[Handle]) -> Handle + 'static,
    {
        self.functions.borrow_mut().insert(id, Rc::new(f));
    }

    pub fn unregister(&self, id: u32) -> bool {
        self.functions.borrow_mut().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.functions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.borrow().is_empty()
    }
}

impl Default for HostFunctions {
    fn default() -> Self {
        HostFunctions::new()
    }
}

impl HostCall for HostFunctions {
    fn call(&self, scope: &Scope<'_>, func_id: u32, argc: u32, argv: Addr) -> Handle {
        let args = if argc == 0 {
            Vec::new()
        } else {
            let raw = scope.store().arena().read_u32s(argv, argc as usize);
            match raw {
                Ok(raw) => raw.into_iter().map(Handle::from_raw).collect(),
                Err(err) => return scope.throw_message(ErrorKind::Internal, &err.to_string()),
            }
        };
        let function = self.functions.borrow().get(&func_id).cloned();
        match function {
            Some(function) => function(scope, &args),
            None => {
                log::debug!("no host function registered as {func_id}");
                scope.new_undefined()
            }
        }
    }

    fn log(&self, message: &str) {
        match &self.sink {
            Some(sink) => sink(message),
            None => log::info!(target: "qjs_bridge::console", "{}", message.trim_end_matches('\n')),
        }
    }
}

impl<'js> Scope<'js> {
    /// Defines `print` and `console.{log,info,warn,error,debug}`. Each joins
    /// the string forms of its arguments with spaces, appends a newline, and
    /// hands the line to [`HostCall::log`].
    pub fn add_console(&self) -> i32 {
        let result = install_console(&self.ctx, Rc::downgrade(&self.store));
        match result {
            Ok(()) => 0,
            Err(err) => {
                self.record_error(err);
                -1
            }
        }
    }
}

fn install_console<'js>(ctx: &Ctx<'js>, store: Weak<Store>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    let console = Object::new(ctx.clone())?;
    for method in CONSOLE_METHODS {
        console.set(method, print_function(ctx, store.clone(), method)?)?;
    }
    globals.set("console", console)?;
    globals.set("print", print_function(ctx, store, "print")?)?;
    Ok(())
}

fn print_function<'js>(
    ctx: &Ctx<'js>,
    store: Weak<Store>,
    name: &str,
) -> rquickjs::Result<Function<'js>> {
    Function::new(ctx.clone(), move |args: Rest<Value<'js>>| {
        let mut line = String::new();
        for (i, arg) in args.0.into_iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            line.push_str(&arg.get::<Coerced<String>>()?.0);
        }
        line.push('\n');
        match store.upgrade().and_then(|store| store.host()) {
            Some(host) => host.log(&line),
            None => log::info!(target: "qjs_bridge::console", "{}", line.trim_end()),
        }
        rquickjs::Result::Ok(())
    })?
    .with_name(name)
}
