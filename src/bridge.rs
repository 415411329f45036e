//! Runtime and context lifecycle.
//!
//! A [`Bridge`] owns every runtime and context it creates, the shared
//! [`Store`], and the installed host. Runtimes and contexts are named by
//! generation-tagged ids, so a freed id never reaches a newer object.

use std::rc::Rc;

use rquickjs::{Context, Runtime};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::handle::{ContextId, RuntimeId};
use crate::handle_table::HandleTable;
use crate::scope::Scope;
use crate::store::{Entered, Store};
use crate::trampoline::HostCall;

const REGISTRY_CAPACITY: usize = 1024;

struct RuntimeEntry {
    runtime: Runtime,
}

struct ContextEntry {
    context: Context,
    runtime: RuntimeId,
}

pub struct Bridge {
    store: Rc<Store>,
    contexts: HandleTable<ContextEntry>,
    runtimes: HandleTable<RuntimeEntry>,
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Bridge {
            store: Rc::new(Store::new(&config)),
            contexts: HandleTable::new(REGISTRY_CAPACITY),
            runtimes: HandleTable::new(REGISTRY_CAPACITY),
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Handle table and arena shared by every context.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Installs the host that receives every trampoline call.
    pub fn set_host(&self, host: Rc<dyn HostCall>) {
        self.store.set_host(Some(host));
    }

    pub fn clear_host(&self) {
        self.store.set_host(None);
    }

    fn idle(&self) -> Result<Entered<'_>> {
        Entered::enter(&self.store).ok_or(BridgeError::Reentrant)
    }

    fn runtime(&self, id: RuntimeId) -> Result<&RuntimeEntry> {
        self.runtimes
            .resolve(id.0)
            .ok_or(BridgeError::UnknownRuntime(id.raw()))
    }

    // ------------------------------------------------------------------
    // Runtimes
    // ------------------------------------------------------------------

    pub fn new_runtime(&mut self) -> Result<RuntimeId> {
        let _busy = self.idle()?;
        let runtime = Runtime::new()?;
        if let Some(limit) = self.config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = self.config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        drop(_busy);
        let handle = self
            .runtimes
            .allocate(RuntimeEntry { runtime })
            .map_err(|_| BridgeError::Exhausted)?;
        log::debug!("created runtime {handle:?}");
        Ok(RuntimeId(handle))
    }

    /// Frees the runtime, its contexts, and every handle that refers to a
    /// value it owns.
    pub fn free_runtime(&mut self, id: RuntimeId) -> Result<()> {
        self.runtime(id)?;
        if self.store.is_entered() {
            return Err(BridgeError::Reentrant);
        }
        let contexts: Vec<ContextId> = self
            .contexts
            .iter()
            .filter(|(_, entry)| entry.runtime == id)
            .map(|(handle, _)| ContextId(handle))
            .collect();
        for ctx in contexts {
            self.free_context(ctx)?;
        }
        let purged = self.store.purge_runtime(id);
        let entry = self.runtimes.release(id.0);
        drop(entry);
        log::debug!("freed runtime {:?} ({purged} handles released)", id.0);
        Ok(())
    }

    pub fn set_memory_limit(&self, id: RuntimeId, limit: usize) -> Result<()> {
        self.runtime(id)?.runtime.set_memory_limit(limit);
        Ok(())
    }

    pub fn set_max_stack_size(&self, id: RuntimeId, size: usize) -> Result<()> {
        self.runtime(id)?.runtime.set_max_stack_size(size);
        Ok(())
    }

    pub fn run_gc(&self, id: RuntimeId) -> Result<()> {
        let entry = self.runtime(id)?;
        let _busy = self.idle()?;
        entry.runtime.run_gc();
        Ok(())
    }

    /// Runs queued jobs until none remain. Returns the number of jobs run,
    /// or -1 as soon as one throws.
    pub fn execute_pending_jobs(&self, id: RuntimeId) -> Result<i32> {
        let entry = self.runtime(id)?;
        let _busy = self.idle()?;
        let mut count = 0;
        loop {
            match entry.runtime.execute_pending_job() {
                Ok(true) => count += 1,
                Ok(false) => return Ok(count),
                Err(_) => {
                    log::debug!("pending job threw after {count} jobs");
                    return Ok(-1);
                }
            }
        }
    }

    pub fn is_job_pending(&self, id: RuntimeId) -> Result<bool> {
        Ok(self.runtime(id)?.runtime.is_job_pending())
    }

    // ------------------------------------------------------------------
    // Contexts
    // ------------------------------------------------------------------

    pub fn new_context(&mut self, runtime: RuntimeId) -> Result<ContextId> {
        let entry = self.runtime(runtime)?;
        let _busy = self.idle()?;
        let context = Context::full(&entry.runtime)?;
        drop(_busy);
        let handle = self
            .contexts
            .allocate(ContextEntry { context, runtime })
            .map_err(|_| BridgeError::Exhausted)?;
        log::debug!("created context {handle:?} on runtime {:?}", runtime.0);
        Ok(ContextId(handle))
    }

    pub fn free_context(&mut self, id: ContextId) -> Result<()> {
        if self.store.is_entered() {
            return Err(BridgeError::Reentrant);
        }
        let entry = self
            .contexts
            .release(id.0)
            .ok_or(BridgeError::UnknownContext(id.raw()))?;
        self.store.clear_pending(id);
        drop(entry);
        log::debug!("freed context {:?}", id.0);
        Ok(())
    }

    pub fn context_runtime(&self, id: ContextId) -> Option<RuntimeId> {
        self.contexts.resolve(id.0).map(|entry| entry.runtime)
    }

    /// Enters `ctx` and runs `f` with a [`Scope`] for it.
    ///
    /// Fails with [`BridgeError::Reentrant`] when called from inside a host
    /// function; use the scope passed to the host instead.
    pub fn with_context<R, F>(&self, ctx: ContextId, f: F) -> Result<R>
    where
        F: for<'js> FnOnce(&Scope<'js>) -> R,
    {
        let entry = self
            .contexts
            .resolve(ctx.0)
            .ok_or(BridgeError::UnknownContext(ctx.raw()))?;
        let _busy = self.idle()?;
        let store = Rc::clone(&self.store);
        let runtime = entry.runtime;
        Ok(entry.context.with(move |js| {
            let scope = Scope::new(js, ctx, runtime, store);
            f(&scope)
        }))
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Stored values must go before the runtimes that own them.
        self.store.clear_all();
    }
}
