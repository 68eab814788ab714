//! Error type returned by the fallible, typed corners of the public API.
//!
//! Structural invariant violations inside the buddy engine are *not*
//! represented here: per the design, a corrupted bitmap or free list means
//! undefined behaviour has already happened upstream (use-after-free,
//! out-of-arena write that skipped the guard pages) and the only safe
//! response is to abort via `assert!`/`debug_assert!`, not to return a
//! recoverable `Result`.

use std::io;
use thiserror::Error;

/// Errors surfaced by the typed corners of the secure heap API.
#[derive(Debug, Error)]
pub enum Error {
    /// `arena_size` / `min_size` failed the "positive power of two" check,
    /// or `min_size` exceeds `arena_size` once doubled to fit a free-list
    /// link node.
    #[error("{0} must be a positive power of two no larger than the arena")]
    InvalidConfig(&'static str),

    /// A syscall (`mmap`, `mprotect`, `mlock`, `madvise`, ...) failed.
    #[error("secure heap system call failed: {0}")]
    SystemCall(#[from] io::Error),

    /// `secure_malloc_done` was called while allocations are outstanding.
    #[error("secure heap has outstanding allocations")]
    HeapBusy,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
