//! Bump arena for transient buffers shared with the host.
//!
//! Addresses are 32-bit offsets into the arena biased by [`BASE`], so 0 is
//! always the null address. There is no per-allocation free. The whole
//! arena is reclaimed by [`Arena::reset`], or implicitly when an allocation
//! does not fit in the remaining space: the cursor then restarts at the
//! beginning and every address handed out earlier may be overwritten.
//!
//! The checked accessors only accept ranges below the cursor, so reads
//! through an address obtained before a reset fail instead of returning
//! stale bytes. Addresses obtained before a wraparound are not detected.

use crate::error::ArenaError;

pub type Addr = u32;

pub const ALIGN: usize = 8;
pub const BASE: Addr = ALIGN as Addr;
pub const NULL: Addr = 0;
pub const DEFAULT_ARENA_SIZE: usize = 4 << 20;
pub const MAX_ARENA_SIZE: usize = 1 << 30;

#[inline]
const fn align_up(size: usize) -> usize {
    (size + ALIGN - 1) & !(ALIGN - 1)
}

pub struct Arena {
    buf: Box<[u8]>,
    cursor: usize,
    wraps: u64,
}

impl Arena {
    pub fn new(size: usize) -> Self {
        let size = align_up(size.clamp(ALIGN, MAX_ARENA_SIZE));
        Arena {
            buf: vec![0u8; size].into_boxed_slice(),
            cursor: 0,
            wraps: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes handed out since the last reset or wraparound.
    pub fn usage(&self) -> usize {
        self.cursor
    }

    /// Number of implicit resets caused by overflow.
    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Allocates `size` bytes rounded up to [`ALIGN`].
    ///
    /// Wraps to the start when the request does not fit behind the cursor.
    /// Only a request larger than the whole arena fails.
    pub fn alloc(&mut self, size: usize) -> Result<Addr, ArenaError> {
        let size = align_up(size);
        if size > self.buf.len() {
            log::warn!(
                "arena request of {size} bytes exceeds capacity {}",
                self.buf.len()
            );
            return Err(ArenaError::TooLarge {
                requested: size,
                capacity: self.buf.len(),
            });
        }
        if self.cursor + size > self.buf.len() {
            log::debug!(
                "arena wrapped at {} of {} bytes",
                self.cursor,
                self.buf.len()
            );
            self.cursor = 0;
            self.wraps += 1;
        }
        let offset = self.cursor;
        self.cursor += size;
        Ok(BASE + offset as Addr)
    }

    fn range(&self, addr: Addr, len: usize) -> Result<core::ops::Range<usize>, ArenaError> {
        if addr == NULL {
            return Err(ArenaError::Null);
        }
        let start = addr
            .checked_sub(BASE)
            .ok_or(ArenaError::OutOfBounds { addr, len })? as usize;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.cursor)
            .ok_or(ArenaError::OutOfBounds { addr, len })?;
        Ok(start..end)
    }

    pub fn read(&self, addr: Addr, len: usize) -> Result<&[u8], ArenaError> {
        let range = self.range(addr, len)?;
        Ok(&self.buf[range])
    }

    pub fn write(&mut self, addr: Addr, bytes: &[u8]) -> Result<(), ArenaError> {
        let range = self.range(addr, bytes.len())?;
        self.buf[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies `bytes` into a fresh allocation.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<Addr, ArenaError> {
        let addr = self.alloc(bytes.len())?;
        self.write(addr, bytes)?;
        Ok(addr)
    }

    /// Copies `s` plus a trailing nul into a fresh allocation.
    /// Returns the address and the length without the nul.
    pub fn write_str(&mut self, s: &str) -> Result<(Addr, u32), ArenaError> {
        let addr = self.alloc(s.len() + 1)?;
        self.write(addr, s.as_bytes())?;
        self.write(addr + s.len() as Addr, &[0])?;
        Ok((addr, s.len() as u32))
    }

    pub fn read_str(&self, addr: Addr, len: usize) -> Result<String, ArenaError> {
        let bytes = self.read(addr, len)?;
        core::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ArenaError::InvalidUtf8 { addr })
    }

    /// Reads a nul-terminated string.
    pub fn read_cstr(&self, addr: Addr) -> Result<String, ArenaError> {
        let live = self.range(addr, 0)?.start;
        let tail = &self.buf[live..self.cursor];
        let len = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or(ArenaError::Unterminated { addr })?;
        self.read_str(addr, len)
    }

    pub fn write_u32s(&mut self, values: &[u32]) -> Result<Addr, ArenaError> {
        let addr = self.alloc(values.len() * 4)?;
        for (i, value) in values.iter().enumerate() {
            self.write(addr + (i * 4) as Addr, &value.to_le_bytes())?;
        }
        Ok(addr)
    }

    pub fn read_u32s(&self, addr: Addr, count: usize) -> Result<Vec<u32>, ArenaError> {
        let bytes = self.read(addr, count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn write_u32(&mut self, addr: Addr, value: u32) -> Result<(), ArenaError> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn read_u32(&self, addr: Addr) -> Result<u32, ArenaError> {
        let b = self.read(addr, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn write_i32(&mut self, addr: Addr, value: i32) -> Result<(), ArenaError> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn read_i32(&self, addr: Addr) -> Result<i32, ArenaError> {
        self.read_u32(addr).map(|v| v as i32)
    }

    pub fn write_i64(&mut self, addr: Addr, value: i64) -> Result<(), ArenaError> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn read_i64(&self, addr: Addr) -> Result<i64, ArenaError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.read(addr, 8)?);
        Ok(i64::from_le_bytes(raw))
    }

    pub fn write_f64(&mut self, addr: Addr, value: f64) -> Result<(), ArenaError> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn read_f64(&self, addr: Addr) -> Result<f64, ArenaError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.read(addr, 8)?);
        Ok(f64::from_le_bytes(raw))
    }
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new(DEFAULT_ARENA_SIZE)
    }
}
