//! POSIX substrate: `mmap`/`mprotect`/`mlock`/`madvise` via `libc`.

use crate::error::{Error, Result};
use libc::c_void;
use std::io;
use std::sync::atomic::{compiler_fence, Ordering};

const DEFAULT_PAGE_SIZE: usize = 4096;

/// A mapped region: `map_base..map_base+map_size` is the full reservation
/// (guard page + arena + guard page); `arena_base` is `map_base + page`.
pub struct MapHandle {
    pub map_base: *mut u8,
    pub arena_base: *mut u8,
    pub map_size: usize,
}

/// Queries the platform page size, falling back to 4 KiB if the query
/// fails.
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        DEFAULT_PAGE_SIZE
    }
}

/// Maps `page + size + page` bytes of anonymous, private memory and returns
/// the triple described by the platform substrate contract. Falls back to
/// mapping `/dev/zero` privately if anonymous mapping is unavailable.
pub fn map_arena(size: usize, page: usize) -> Result<MapHandle> {
    let map_size = page
        .checked_add(size)
        .and_then(|v| v.checked_add(page))
        .ok_or_else(|| Error::SystemCall(io::Error::new(io::ErrorKind::InvalidInput, "arena size overflows map size")))?;

    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            map_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };

    let addr = if addr == libc::MAP_FAILED {
        map_via_zero_device(map_size)?
    } else {
        addr
    };

    let map_base = addr as *mut u8;
    let arena_base = unsafe { map_base.add(page) };
    Ok(MapHandle { map_base, arena_base, map_size })
}

/// Fallback used when `MAP_ANON` itself is unsupported: map a private,
/// zero-initialised view of `/dev/zero`, per the platform substrate
/// contract's advisory fallback.
fn map_via_zero_device(map_size: usize) -> Result<*mut c_void> {
    let path = std::ffi::CString::new("/dev/zero").expect("no interior NUL");
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        return Err(Error::SystemCall(io::Error::last_os_error()));
    }

    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            map_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE,
            fd,
            0,
        )
    };
    unsafe {
        libc::close(fd);
    }

    if addr == libc::MAP_FAILED {
        Err(Error::SystemCall(io::Error::last_os_error()))
    } else {
        Ok(addr)
    }
}

/// Unmaps a region previously returned by [`map_arena`].
///
/// # Safety
/// `map_base`/`map_size` must be exactly the values returned together by a
/// prior, not-yet-unmapped `map_arena` call.
pub unsafe fn unmap(map_base: *mut u8, map_size: usize) -> Result<()> {
    if libc::munmap(map_base as *mut c_void, map_size) == 0 {
        Ok(())
    } else {
        Err(Error::SystemCall(io::Error::last_os_error()))
    }
}

/// Sets the leading and trailing guard pages to `PROT_NONE` so a linear
/// overrun/underrun of the arena traps instead of scribbling over the
/// bookkeeping arrays (which live outside the mapping entirely) or another
/// allocation.
pub fn install_guards(map_base: *mut u8, map_size: usize, page: usize) -> Result<()> {
    unsafe {
        let front = libc::mprotect(map_base as *mut c_void, page, libc::PROT_NONE);
        let back_base = map_base.add(map_size - page);
        let back = libc::mprotect(back_base as *mut c_void, page, libc::PROT_NONE);
        if front == 0 && back == 0 {
            Ok(())
        } else {
            Err(Error::SystemCall(io::Error::last_os_error()))
        }
    }
}

/// Requests that the arena's pages stay resident and never be paged to
/// swap.
pub fn lock(arena_base: *mut u8, size: usize) -> Result<()> {
    unsafe {
        if libc::mlock(arena_base as *const c_void, size) == 0 {
            Ok(())
        } else {
            Err(Error::SystemCall(io::Error::last_os_error()))
        }
    }
}

/// Hints the kernel to omit the arena from core dumps. Only implemented on
/// Linux (`MADV_DONTDUMP`); a no-op success elsewhere, since there is no
/// portable equivalent to withhold.
#[cfg(target_os = "linux")]
pub fn exclude_from_dump(arena_base: *mut u8, size: usize) -> Result<()> {
    unsafe {
        if libc::madvise(arena_base as *mut c_void, size, libc::MADV_DONTDUMP) == 0 {
            Ok(())
        } else {
            Err(Error::SystemCall(io::Error::last_os_error()))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn exclude_from_dump(_arena_base: *mut u8, _size: usize) -> Result<()> {
    Ok(())
}

/// Overwrites `n` bytes at `p` with zero through a volatile write loop
/// followed by a compiler fence, so the store can never be dead-code
/// eliminated even though nothing reads the memory afterwards.
pub fn cleanse(p: *mut u8, n: usize) {
    if p.is_null() || n == 0 {
        return;
    }
    unsafe {
        for i in 0..n {
            std::ptr::write_volatile(p.add(i), 0u8);
        }
    }
    compiler_fence(Ordering::SeqCst);
}
