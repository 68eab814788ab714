//! A process-local, hardened memory arena for short-lived cryptographic
//! secrets: keys, derived key material, intermediate state that should
//! never be paged to swap, never show up in a core dump, and never be
//! readable after it's freed.
//!
//! Three properties beyond an ordinary allocator:
//!
//! 1. the backing memory is locked resident (never paged to swap) and
//!    excluded from core dumps;
//! 2. it is flanked by unmapped guard regions so that pointer
//!    overruns/underruns trap synchronously, rather than silently
//!    corrupting adjacent data;
//! 3. freed blocks are zeroised before being returned to the free pool.
//!
//! Internally this is a binary buddy allocator over a single fixed-size,
//! power-of-two arena, with its bookkeeping (free-list heads, `present` and
//! `allocated` bitmaps) kept entirely outside the arena - the arena itself
//! holds only caller data and the transient free-list link nodes embedded
//! in free blocks.
//!
//! # Example
//!
//! ```
//! use secure_heap::{secure_malloc_init, secure_malloc, secure_free, secure_malloc_done, SecureHeapConfig};
//!
//! # fn main() -> Result<(), secure_heap::Error> {
//! secure_malloc_init(SecureHeapConfig::default())?;
//!
//! let key = secure_malloc(32, file!(), line!());
//! assert!(!key.is_null());
//! // ... use `key` ...
//! secure_free(key, file!(), line!());
//!
//! secure_malloc_done()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Non-goals
//!
//! No fragmentation-avoiding policy beyond buddy coalescing, no NUMA
//! awareness, no constant-time allocation, no resistance to a local
//! attacker with arbitrary read primitives, no persistence, no
//! cross-process sharing, no resize of the arena after init, no
//! thread-local caches.

mod arena;
mod bitindex;
mod bitmap;
mod buddy;
mod config;
mod error;
mod facade;
mod os;

pub use arena::InitOutcome;
pub use config::SecureHeapConfig;
pub use error::{Error, Result};
pub use facade::{
    secure_allocated, secure_clear_free, secure_free, secure_malloc, secure_malloc_done, secure_malloc_init,
    secure_malloc_initialized, secure_used, secure_actual_size, secure_zalloc,
};

/// A typed handle over the process-wide secure heap singleton, for callers
/// who would rather call methods than free functions. Every method simply
/// forwards to the corresponding `secure_*` free function; the free
/// functions remain the canonical, documented entry points.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureHeap;

impl SecureHeap {
    /// See [`secure_malloc_init`].
    pub fn init(self, config: SecureHeapConfig) -> Result<InitOutcome> {
        secure_malloc_init(config)
    }

    /// See [`secure_malloc_done`].
    pub fn done(self) -> Result<()> {
        secure_malloc_done()
    }

    /// See [`secure_malloc_initialized`].
    pub fn is_initialized(self) -> bool {
        secure_malloc_initialized()
    }

    /// See [`secure_malloc`].
    pub fn malloc(self, n: usize) -> *mut u8 {
        secure_malloc(n, file!(), line!())
    }

    /// See [`secure_zalloc`].
    pub fn zalloc(self, n: usize) -> *mut u8 {
        secure_zalloc(n, file!(), line!())
    }

    /// See [`secure_free`].
    pub fn free(self, p: *mut u8) {
        secure_free(p, file!(), line!())
    }

    /// See [`secure_clear_free`].
    pub fn clear_free(self, p: *mut u8, n: usize) {
        secure_clear_free(p, n, file!(), line!())
    }

    /// See [`secure_allocated`].
    pub fn allocated(self, p: *const u8) -> bool {
        secure_allocated(p)
    }

    /// See [`secure_used`].
    pub fn used(self) -> usize {
        secure_used()
    }

    /// See [`secure_actual_size`].
    pub fn actual_size(self, p: *const u8) -> usize {
        secure_actual_size(p)
    }
}
