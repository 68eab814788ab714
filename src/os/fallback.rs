//! Substrate stub for targets without a guarded-mmap implementation yet
//! (Windows, Mach-based systems, Haiku). `map_arena` always fails, so
//! `secure_malloc_init` returns a hard failure there instead of silently
//! running an unhardened heap.

use crate::error::{Error, Result};
use std::io;

const DEFAULT_PAGE_SIZE: usize = 4096;

pub struct MapHandle {
    pub map_base: *mut u8,
    pub arena_base: *mut u8,
    pub map_size: usize,
}

pub fn page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

pub fn map_arena(_size: usize, _page: usize) -> Result<MapHandle> {
    Err(Error::SystemCall(io::Error::new(
        io::ErrorKind::Unsupported,
        "secure heap arena mapping is not implemented for this target",
    )))
}

/// # Safety
/// No-op: `map_arena` never succeeds on this substrate, so there is never a
/// live mapping to unmap.
pub unsafe fn unmap(_map_base: *mut u8, _map_size: usize) -> Result<()> {
    Ok(())
}

pub fn install_guards(_map_base: *mut u8, _map_size: usize, _page: usize) -> Result<()> {
    Err(Error::SystemCall(io::Error::new(io::ErrorKind::Unsupported, "guard pages unsupported on this target")))
}

pub fn lock(_arena_base: *mut u8, _size: usize) -> Result<()> {
    Err(Error::SystemCall(io::Error::new(io::ErrorKind::Unsupported, "memory locking unsupported on this target")))
}

pub fn exclude_from_dump(_arena_base: *mut u8, _size: usize) -> Result<()> {
    Ok(())
}

pub fn cleanse(p: *mut u8, n: usize) {
    if p.is_null() || n == 0 {
        return;
    }
    unsafe {
        for i in 0..n {
            std::ptr::write_volatile(p.add(i), 0u8);
        }
    }
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
}
