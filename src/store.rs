//! Process-wide boundary state held in one owned object.
//!
//! The store owns the value handle table, the arena, the installed host,
//! each context's pending exception, and the nesting counters. Interior
//! mutability keeps it usable from engine callbacks, which only ever see a
//! shared reference. No `RefCell` borrow is held across a call into the
//! engine or the host.

use std::cell::{Cell, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

use rquickjs::{Persistent, Value};

use crate::arena::{Addr, Arena};
use crate::config::BridgeConfig;
use crate::error::ArenaError;
use crate::handle::{ContextId, Handle, RuntimeId};
use crate::handle_table::HandleTable;
use crate::trampoline::HostCall;

pub(crate) type Stored = Persistent<Value<'static>>;

#[derive(Clone)]
pub(crate) enum Native {
    /// Marks a call that threw; the thrown value is the context's pending
    /// exception.
    Exception,
    Value(Stored),
}

#[derive(Clone)]
pub(crate) struct Entry {
    pub(crate) runtime: RuntimeId,
    pub(crate) native: Native,
}

pub struct Store {
    values: RefCell<HandleTable<Entry>>,
    arena: RefCell<Arena>,
    host: RefCell<Option<Rc<dyn HostCall>>>,
    pending: RefCell<HashMap<ContextId, Stored>>,
    depth: Cell<u32>,
    max_depth: u32,
    entered: Cell<bool>,
}

impl Store {
    pub(crate) fn new(config: &BridgeConfig) -> Self {
        Store {
            values: RefCell::new(HandleTable::new(config.handle_capacity)),
            arena: RefCell::new(Arena::new(config.arena_size)),
            host: RefCell::new(None),
            pending: RefCell::new(HashMap::new()),
            depth: Cell::new(0),
            max_depth: config.max_call_depth,
            entered: Cell::new(false),
        }
    }

    // ----- memory -----

    /// Borrows the arena. Do not hold the guard across bridge calls.
    pub fn arena(&self) -> RefMut<'_, Arena> {
        self.arena.borrow_mut()
    }

    pub fn alloc(&self, size: usize) -> Result<Addr, ArenaError> {
        self.arena.borrow_mut().alloc(size)
    }

    pub fn reset_arena(&self) {
        self.arena.borrow_mut().reset();
    }

    pub fn arena_usage(&self) -> usize {
        self.arena.borrow().usage()
    }

    pub fn arena_capacity(&self) -> usize {
        self.arena.borrow().capacity()
    }

    // ----- handles -----

    pub(crate) fn insert(&self, entry: Entry) -> Handle {
        let rejected = match self.values.borrow_mut().allocate(entry) {
            Ok(handle) => return handle,
            Err(entry) => entry,
        };
        // The table refused ownership, so the reference is dropped here.
        drop(rejected);
        Handle::NONE
    }

    pub(crate) fn get(&self, handle: Handle) -> Option<Entry> {
        self.values.borrow().resolve(handle).cloned()
    }

    pub(crate) fn take(&self, handle: Handle) -> Option<Entry> {
        self.values.borrow_mut().release(handle)
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.values.borrow().resolve(handle).is_some()
    }

    pub fn is_exception(&self, handle: Handle) -> bool {
        matches!(
            self.values.borrow().resolve(handle),
            Some(Entry {
                native: Native::Exception,
                ..
            })
        )
    }

    /// Stores a new reference to the value behind `handle` in a fresh slot.
    /// Returns [`Handle::NONE`] for dead handles and on exhaustion.
    pub fn duplicate(&self, handle: Handle) -> Handle {
        let entry = match self.get(handle) {
            Some(entry) => entry,
            None => return Handle::NONE,
        };
        self.insert(entry)
    }

    /// Drops the reference behind `handle` and frees its slot.
    /// Dead handles are ignored.
    pub fn release(&self, handle: Handle) {
        let entry = self.take(handle);
        drop(entry);
    }

    pub fn live_handles(&self) -> usize {
        self.values.borrow().live()
    }

    pub fn free_handles(&self) -> usize {
        self.values.borrow().free_count()
    }

    pub(crate) fn purge_runtime(&self, runtime: RuntimeId) -> usize {
        let doomed = self
            .values
            .borrow_mut()
            .drain_where(|entry| entry.runtime == runtime);
        let count = doomed.len();
        drop(doomed);
        count
    }

    // ----- host -----

    pub(crate) fn set_host(&self, host: Option<Rc<dyn HostCall>>) {
        let previous = self.host.replace(host);
        drop(previous);
    }

    pub(crate) fn host(&self) -> Option<Rc<dyn HostCall>> {
        self.host.borrow().clone()
    }

    // ----- pending exceptions -----

    pub(crate) fn set_pending(&self, ctx: ContextId, value: Stored) {
        let previous = self.pending.borrow_mut().insert(ctx, value);
        drop(previous);
    }

    pub(crate) fn take_pending(&self, ctx: ContextId) -> Option<Stored> {
        self.pending.borrow_mut().remove(&ctx)
    }

    pub(crate) fn has_pending(&self, ctx: ContextId) -> bool {
        self.pending.borrow().contains_key(&ctx)
    }

    pub(crate) fn clear_pending(&self, ctx: ContextId) {
        let previous = self.take_pending(ctx);
        drop(previous);
    }

    pub(crate) fn clear_all(&self) {
        let pending: Vec<Stored> = self.pending.borrow_mut().drain().map(|(_, v)| v).collect();
        drop(pending);
        let values = self.values.borrow_mut().drain_where(|_| true);
        drop(values);
        self.set_host(None);
    }

    // ----- nesting -----

    pub fn call_depth(&self) -> u32 {
        self.depth.get()
    }

    pub(crate) fn is_entered(&self) -> bool {
        self.entered.get()
    }
}

/// Counts one level of engine-to-host nesting for as long as it lives.
pub(crate) struct CallDepth<'a> {
    store: &'a Store,
}

impl<'a> CallDepth<'a> {
    pub(crate) fn enter(store: &'a Store) -> Option<Self> {
        let depth = store.depth.get();
        if depth >= store.max_depth {
            return None;
        }
        store.depth.set(depth + 1);
        Some(CallDepth { store })
    }
}

impl Drop for CallDepth<'_> {
    fn drop(&mut self) {
        self.store.depth.set(self.store.depth.get() - 1);
    }
}

/// Marks the bridge as busy with an engine call. Only one may exist.
pub(crate) struct Entered<'a> {
    store: &'a Store,
}

impl<'a> Entered<'a> {
    pub(crate) fn enter(store: &'a Store) -> Option<Self> {
        if store.entered.replace(true) {
            return None;
        }
        Some(Entered { store })
    }
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.store.entered.set(false);
    }
}
