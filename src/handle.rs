//! 32-bit opaque handles handed across the boundary.
//!
//! A handle packs a slot index (low 16 bits) and the slot's generation
//! (high 16 bits). Index 0 is reserved, so no live handle is ever 0.
//! Generations wrap at 65536, after which a long-stale handle can name a
//! live value again.

use core::fmt;

pub const INDEX_BITS: u32 = 16;
pub const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
pub const MAX_CAPACITY: usize = 1 << INDEX_BITS;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Handle(u32);

impl Handle {
    /// "No value". Also returned when an allocation or a guarded operation fails.
    pub const NONE: Handle = Handle(0);

    #[inline]
    pub(crate) const fn new(index: u32, generation: u16) -> Self {
        Handle(((generation as u32) << INDEX_BITS) | (index & INDEX_MASK))
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        (self.0 >> INDEX_BITS) as u16
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.index() == 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("Handle(none)");
        }
        write!(f, "Handle({}@{})", self.index(), self.generation())
    }
}

impl From<Handle> for u32 {
    fn from(handle: Handle) -> u32 {
        handle.0
    }
}

/// Identity of a runtime as seen by the host.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RuntimeId(pub(crate) Handle);

/// Identity of a context as seen by the host.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ContextId(pub(crate) Handle);

impl RuntimeId {
    pub const fn raw(self) -> u32 {
        self.0.raw()
    }

    pub const fn from_raw(raw: u32) -> Self {
        RuntimeId(Handle::from_raw(raw))
    }
}

impl ContextId {
    pub const fn raw(self) -> u32 {
        self.0.raw()
    }

    pub const fn from_raw(raw: u32) -> Self {
        ContextId(Handle::from_raw(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_index_and_generation() {
        let h = Handle::new(0x1234, 7);
        assert_eq!(h.index(), 0x1234);
        assert_eq!(h.generation(), 7);
        assert_eq!(Handle::from_raw(h.raw()), h);
        assert!(!h.is_none());
    }

    #[test]
    fn index_zero_is_none_for_any_generation() {
        assert!(Handle::NONE.is_none());
        assert!(Handle::new(0, 3).is_none());
        assert_eq!(u32::from(Handle::NONE), 0);
    }
}
