//! Fixed-capacity slot table mapping handles to owned values.
//!
//! Each slot is either reserved (slot 0), free and threaded onto the
//! freelist, or in use and holding exactly one owned value. The freelist is
//! LIFO: the most recently released slot is handed out first. A fresh table
//! hands out slots 1, 2, 3, ... in order.
//!
//! Every release bumps the slot generation, so a handle kept past its
//! release no longer resolves and releasing it again is a no-op.
//! The generation is 16 bits wide and wraps: once one slot has been
//! released 65536 times, a stale handle to it resolves to whatever value
//! occupies the slot again.

use crate::handle::{Handle, MAX_CAPACITY};

pub const DEFAULT_CAPACITY: usize = MAX_CAPACITY;
pub const MIN_CAPACITY: usize = 2;

enum Slot<T> {
    Reserved,
    Free { next: u32, generation: u16 },
    InUse { value: T, generation: u16 },
}

pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    capacity: usize,
    // 0 terminates the list; slot 0 is never free.
    free_head: u32,
    live: usize,
}

impl<T> HandleTable<T> {
    /// Creates a table with `capacity` slots, clamped to `[2, 65536]`.
    /// Slot storage is built on first allocation.
    pub fn new(capacity: usize) -> Self {
        HandleTable {
            slots: Vec::new(),
            capacity: capacity.clamp(MIN_CAPACITY, MAX_CAPACITY),
            free_head: 0,
            live: 0,
        }
    }

    fn ensure_init(&mut self) {
        if !self.slots.is_empty() {
            return;
        }
        self.slots.reserve_exact(self.capacity);
        self.slots.push(Slot::Reserved);
        for index in 1..self.capacity as u32 {
            let next = if (index as usize) + 1 < self.capacity {
                index + 1
            } else {
                0
            };
            self.slots.push(Slot::Free { next, generation: 0 });
        }
        self.free_head = 1;
    }

    /// Total slot count, including the reserved slot 0.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live(&self) -> usize {
        self.live
    }

    /// Slots still available. At most `capacity() - 1`.
    pub fn free_count(&self) -> usize {
        self.capacity - 1 - self.live
    }

    /// Takes ownership of `value` and returns its handle.
    ///
    /// When the table is full the value is handed back untouched; the caller
    /// owns it again and must dispose of it.
    pub fn allocate(&mut self, value: T) -> Result<Handle, T> {
        self.ensure_init();
        let index = self.free_head;
        if index == 0 {
            log::warn!("handle table exhausted ({} slots)", self.capacity);
            return Err(value);
        }
        let slot = &mut self.slots[index as usize];
        let (next, generation) = match *slot {
            Slot::Free { next, generation } => (next, generation),
            _ => {
                log::error!("freelist head {index} is not a free slot");
                return Err(value);
            }
        };
        *slot = Slot::InUse { value, generation };
        self.free_head = next;
        self.live += 1;
        Ok(Handle::new(index, generation))
    }

    /// Returns the value behind `handle`, or `None` for 0, out-of-range,
    /// free, and stale handles.
    pub fn resolve(&self, handle: Handle) -> Option<&T> {
        if handle.is_none() {
            return None;
        }
        match self.slots.get(handle.index() as usize)? {
            Slot::InUse { value, generation } if *generation == handle.generation() => Some(value),
            _ => None,
        }
    }

    /// Removes the value behind `handle` and returns its slot to the
    /// freelist head. Stale and repeated releases return `None` and leave
    /// the table untouched.
    pub fn release(&mut self, handle: Handle) -> Option<T> {
        if self.resolve(handle).is_none() {
            if !handle.is_none() {
                log::debug!("ignoring release of dead handle {handle:?}");
            }
            return None;
        }
        let index = handle.index();
        let freed = Slot::Free {
            next: self.free_head,
            generation: handle.generation().wrapping_add(1),
        };
        match core::mem::replace(&mut self.slots[index as usize], freed) {
            Slot::InUse { value, .. } => {
                self.free_head = index;
                self.live -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    /// Iterates over live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::InUse { value, generation } => {
                    Some((Handle::new(index as u32, *generation), value))
                }
                _ => None,
            })
    }

    /// Releases every entry matching `remove` and returns the removed
    /// values, so the caller decides where they are dropped.
    pub fn drain_where<F>(&mut self, mut remove: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let doomed: Vec<Handle> = self
            .iter()
            .filter(|(_, value)| remove(*value))
            .map(|(handle, _)| handle)
            .collect();
        doomed.into_iter().filter_map(|h| self.release(h)).collect()
    }
}

impl<T: Clone> HandleTable<T> {
    /// Stores a clone of the value behind `handle` in a new slot.
    /// Returns `None` when `handle` is dead or the table is full.
    pub fn duplicate(&mut self, handle: Handle) -> Option<Handle> {
        let value = self.resolve(handle)?.clone();
        self.allocate(value).ok()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        HandleTable::new(DEFAULT_CAPACITY)
    }
}
