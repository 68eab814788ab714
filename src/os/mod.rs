//! Platform substrate: page-size discovery, anonymous mapping, guard pages,
//! memory locking, dump exclusion and zeroisation.
//!
//! Split by target the same way the crate this is descended from splits
//! `os::{unix, windows, macos, haiku}`: one module per substrate, re-exported
//! flat at `crate::os`. Only the `unix` substrate is functionally complete;
//! other targets compile against a fallback that reports every hardening
//! step as unavailable, so `init` on those targets always returns a hard
//! mapping failure rather than silently shipping a non-secure heap.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use self::unix::*;

#[cfg(not(unix))]
mod fallback;
#[cfg(not(unix))]
pub use self::fallback::*;
