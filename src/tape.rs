//! The 2^32-byte logical tape and its two backing strategies.
//!
//! [`Tape`] owns the persistent head position `mp` and is generic over a
//! [`TapeBackend`] that actually stores bytes; [`Paged`] lazily allocates
//! 1 MiB pages on first write, [`Mapped`] asks the host kernel for a
//! single non-reserving anonymous mapping spanning the whole address
//! space and lets it demand-page.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::error::Diagnostic;

/// Size of one [`Paged`] page, in bytes.
const PAGE_SIZE: usize = 1 << 20;
/// Page index mask / shift derived from [`PAGE_SIZE`].
const PAGE_SHIFT: u32 = 20;
const PAGE_MASK: u32 = (1 << PAGE_SHIFT) - 1;

/// A byte-addressable backend for the logical tape. All addresses are
/// already wrapped to `u32` by the caller ([`Tape`]).
pub trait TapeBackend {
    fn read(&self, addr: u32) -> u8;
    fn write(&mut self, addr: u32, value: u8);
}

/// The tape: a persistent head `mp` plus a pluggable [`TapeBackend`].
/// Every operation here is relative to the current head.
#[derive(Debug)]
pub struct Tape<B> {
    backend: B,
    mp: u32,
}

impl<B: TapeBackend> Tape<B> {
    pub fn new(backend: B) -> Tape<B> {
        Tape { backend, mp: 0 }
    }

    pub fn head(&self) -> u32 {
        self.mp
    }

    pub fn get(&self, offset: u32) -> u8 {
        self.backend.read(self.mp.wrapping_add(offset))
    }

    pub fn set(&mut self, offset: u32, value: u8) {
        let addr = self.mp.wrapping_add(offset);
        self.backend.write(addr, value);
    }

    pub fn add(&mut self, offset: u32, value: u8) {
        let addr = self.mp.wrapping_add(offset);
        let cur = self.backend.read(addr);
        self.backend.write(addr, cur.wrapping_add(value));
    }

    pub fn move_head(&mut self, delta: u32) {
        self.mp = self.mp.wrapping_add(delta);
    }

    /// Resolves an ambiguity in how `seek` composes its displacement
    /// with the first equality check: the displacement is applied
    /// first, then the cell at the post-displacement head is the first
    /// chance to match `target`, then the scan steps by `step`.
    pub fn seek(&mut self, offset: u32, target: u8, step: u32) {
        self.mp = self.mp.wrapping_add(offset);
        while self.backend.read(self.mp) != target {
            self.mp = self.mp.wrapping_add(step);
        }
    }
}

/// Lazily-allocated, page-retaining tape backend. Reading an unallocated
/// page returns 0 without allocating it.
#[derive(Debug, Default)]
pub struct Paged {
    pages: HashMap<u32, Box<[u8; PAGE_SIZE]>>,
}

impl Paged {
    pub fn new() -> Paged {
        Paged::default()
    }

    fn split(addr: u32) -> (u32, usize) {
        (addr >> PAGE_SHIFT, (addr & PAGE_MASK) as usize)
    }
}

impl TapeBackend for Paged {
    fn read(&self, addr: u32) -> u8 {
        let (page, off) = Self::split(addr);
        self.pages.get(&page).map_or(0, |p| p[off])
    }

    fn write(&mut self, addr: u32, value: u8) {
        let (page, off) = Self::split(addr);
        let page_ref = self.pages.entry(page).or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
        page_ref[off] = value;
    }
}

/// A single anonymous, private, non-reserving mapping spanning the full
/// 2^32-byte address space, relying on host demand-paging. Only
/// available where [`Mapped::new`] says so (unix + 64-bit pointers).
pub struct Mapped {
    #[cfg(unix)]
    base: *mut u8,
    #[cfg(unix)]
    len: usize,
}

impl Mapped {
    /// Returns `true` on hosts that can provide a non-reserving mapping
    /// at this size (unix with a pointer width of at least 64 bits).
    pub fn supported() -> bool {
        cfg!(unix) && usize::BITS >= 64
    }

    #[cfg(unix)]
    pub fn new() -> Result<Mapped, TapeError> {
        if !Self::supported() {
            return Err(TapeError::MappedUnsupported);
        }

        let len = 1usize << 32;
        // SAFETY: requests an anonymous, private, non-reserving mapping;
        // no file descriptor or prior allocation is involved.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(TapeError::OutOfMemory);
        }

        Ok(Mapped { base: ptr as *mut u8, len })
    }

    #[cfg(not(unix))]
    pub fn new() -> Result<Mapped, TapeError> {
        Err(TapeError::MappedUnsupported)
    }

    /// The raw base pointer, for handing to JIT'd code as the `memory`
    /// argument. Valid for exactly `1 << 32` bytes.
    #[cfg(unix)]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.base
    }
}

#[cfg(unix)]
impl Drop for Mapped {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` are exactly what `mmap` returned/was asked for.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(unix)]
impl TapeBackend for Mapped {
    fn read(&self, addr: u32) -> u8 {
        // SAFETY: the mapping spans the full 2^32-byte address space, so
        // every `u32` address is in bounds.
        unsafe { *self.base.add(addr as usize) }
    }

    fn write(&mut self, addr: u32, value: u8) {
        // SAFETY: see `read`.
        unsafe {
            *self.base.add(addr as usize) = value;
        }
    }
}

impl fmt::Debug for Mapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapped").finish_non_exhaustive()
    }
}

/// Errors from constructing a tape backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TapeError {
    #[error("the mapped tape backend is not supported on this host")]
    MappedUnsupported,
    #[error("failed to reserve tape memory")]
    OutOfMemory,
}

impl Diagnostic for TapeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paged_unallocated_reads_zero() {
        let p = Paged::new();
        assert_eq!(p.read(12345), 0);
    }

    #[test]
    fn paged_write_read_roundtrip() {
        let mut p = Paged::new();
        p.write(5, 42);
        p.write(PAGE_SIZE as u32 + 5, 7);
        assert_eq!(p.read(5), 42);
        assert_eq!(p.read(PAGE_SIZE as u32 + 5), 7);
        assert_eq!(p.read(6), 0);
    }

    #[test]
    fn tape_wraps_at_u32_boundary() {
        let mut t = Tape::new(Paged::new());
        t.set(0, 9);
        t.move_head(u32::MAX);
        t.move_head(1);
        assert_eq!(t.head(), 0);
        assert_eq!(t.get(0), 9);
    }

    #[test]
    fn tape_add_wraps_mod_256() {
        let mut t = Tape::new(Paged::new());
        t.set(0, 250);
        t.add(0, 10);
        assert_eq!(t.get(0), 4);
    }

    #[test]
    fn seek_applies_offset_before_first_check() {
        let mut t = Tape::new(Paged::new());
        // tape: mp+0=0(non-target by the naive reading), mp+1=5 (the target)
        t.set(1, 5);
        t.seek(1, 5, 1);
        assert_eq!(t.head(), 1);
    }

    #[test]
    fn seek_steps_until_target_found() {
        let mut t = Tape::new(Paged::new());
        t.set(3, 7);
        t.seek(0, 7, 1);
        assert_eq!(t.head(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn mapped_write_read_roundtrip() {
        if !Mapped::supported() {
            return;
        }
        let mut m = Mapped::new().unwrap();
        m.write(0, 1);
        m.write(4_000_000_000, 2);
        assert_eq!(m.read(0), 1);
        assert_eq!(m.read(4_000_000_000), 2);
        assert_eq!(m.read(123), 0);
    }
}
