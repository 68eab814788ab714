//! Public façade: a process-wide singleton wrapping the buddy engine in a
//! single lock, with fallback to the host allocator when the secure heap is
//! not initialised or the pointer in question is foreign to the arena.
//!
//! Every entry point that touches heap structure acquires the lock in
//! write mode - the engine mutates bitmaps on every inspection path through
//! its structural assertions, so there is no safe reader-mode path. Only
//! `secure_used` and `secure_malloc_initialized` read a single atomic
//! without the lock.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::arena::{self, HeapState, InitOutcome};
use crate::config::SecureHeapConfig;
use crate::error::{Error, Result};
use crate::os;

struct Facade {
    state: RwLock<Option<HeapState>>,
    used: AtomicUsize,
    initialized: AtomicBool,
}

static FACADE: Facade = Facade {
    state: RwLock::new(None),
    used: AtomicUsize::new(0),
    initialized: AtomicBool::new(false),
};

/// Installs the secure heap. Idempotent: a second call while already
/// initialised is a no-op returning [`InitOutcome::AlreadyInitialized`].
pub fn secure_malloc_init(config: SecureHeapConfig) -> Result<InitOutcome> {
    if FACADE.initialized.load(Ordering::Acquire) {
        return Ok(InitOutcome::AlreadyInitialized);
    }

    let mut guard = FACADE.state.write();
    if guard.is_some() {
        return Ok(InitOutcome::AlreadyInitialized);
    }

    let (state, outcome) = arena::init(config)?;
    *guard = Some(state);
    FACADE.used.store(0, Ordering::Relaxed);
    FACADE.initialized.store(true, Ordering::Release);
    Ok(outcome)
}

/// Tears down the heap. Fails (without changing state) while allocations
/// are outstanding.
pub fn secure_malloc_done() -> Result<()> {
    if !FACADE.initialized.load(Ordering::Acquire) {
        return Ok(());
    }

    let mut guard = FACADE.state.write();
    if FACADE.used.load(Ordering::Relaxed) != 0 {
        return Err(Error::HeapBusy);
    }

    // Dropping the HeapState unmaps the arena and frees the bookkeeping
    // arrays; see `HeapState`'s `Drop` impl.
    drop(guard.take());
    FACADE.initialized.store(false, Ordering::Release);
    Ok(())
}

/// Whether the secure heap is currently live.
pub fn secure_malloc_initialized() -> bool {
    FACADE.initialized.load(Ordering::Acquire)
}

/// Allocates `n` bytes. Delegates to the host allocator if the secure heap
/// is not initialised; returns null on failure either way.
pub fn secure_malloc(n: usize, file: &str, line: u32) -> *mut u8 {
    log::trace!("secure_malloc({} bytes) at {}:{}", n, file, line);

    if !secure_malloc_initialized() {
        return unsafe { libc::malloc(n) as *mut u8 };
    }

    let mut guard = FACADE.state.write();
    match guard.as_mut() {
        Some(state) => match state.buddy.allocate(n) {
            Some(p) => {
                FACADE.used.fetch_add(state.buddy.actual_size(p), Ordering::Relaxed);
                p
            }
            None => ptr::null_mut(),
        },
        None => ptr::null_mut(),
    }
}

/// As [`secure_malloc`], but the returned memory (if any) is zeroed.
pub fn secure_zalloc(n: usize, file: &str, line: u32) -> *mut u8 {
    let p = secure_malloc(n, file, line);
    if !p.is_null() {
        unsafe { ptr::write_bytes(p, 0, n) };
    }
    p
}

/// Frees `p`. Routes to the arena (cleansing the full actual-size region
/// first) if `p` is inside it, otherwise to the host allocator. `p == null`
/// is a no-op.
pub fn secure_free(p: *mut u8, file: &str, line: u32) {
    log::trace!("secure_free({:p}) at {}:{}", p, file, line);

    if p.is_null() {
        return;
    }
    if !secure_malloc_initialized() {
        unsafe { libc::free(p as *mut libc::c_void) };
        return;
    }

    let mut guard = FACADE.state.write();
    match guard.as_mut() {
        Some(state) if state.contains(p) => {
            let size = state.buddy.actual_size(p);
            os::cleanse(p, size);
            FACADE.used.fetch_sub(size, Ordering::Relaxed);
            state.buddy.free(p);
        }
        _ => unsafe { libc::free(p as *mut libc::c_void) },
    }
}

/// As [`secure_free`], but for the host-allocator branch only the caller
/// supplied `n` bytes are cleansed before the free (the arena branch always
/// cleanses the full actual-size region, same as [`secure_free`]).
pub fn secure_clear_free(p: *mut u8, n: usize, file: &str, line: u32) {
    log::trace!("secure_clear_free({:p}, {} bytes) at {}:{}", p, n, file, line);

    if p.is_null() {
        return;
    }
    if !secure_malloc_initialized() {
        os::cleanse(p, n);
        unsafe { libc::free(p as *mut libc::c_void) };
        return;
    }

    let mut guard = FACADE.state.write();
    match guard.as_mut() {
        Some(state) if state.contains(p) => {
            let size = state.buddy.actual_size(p);
            os::cleanse(p, size);
            FACADE.used.fetch_sub(size, Ordering::Relaxed);
            state.buddy.free(p);
        }
        _ => {
            os::cleanse(p, n);
            unsafe { libc::free(p as *mut libc::c_void) };
        }
    }
}

/// Whether `p` lies inside the secure arena - a residency predicate, not an
/// "is currently handed out" predicate.
pub fn secure_allocated(p: *const u8) -> bool {
    if !secure_malloc_initialized() {
        return false;
    }
    let guard = FACADE.state.write();
    guard.as_ref().map(|state| state.contains(p)).unwrap_or(false)
}

/// Bytes currently handed out of the arena. Lock-free: a statistics
/// snapshot, not linearised with concurrent mutations.
pub fn secure_used() -> usize {
    FACADE.used.load(Ordering::Relaxed)
}

/// The rounded-up class size `p` was allocated from. Undefined if `p` is
/// not inside the arena.
pub fn secure_actual_size(p: *const u8) -> usize {
    let guard = FACADE.state.write();
    match guard.as_ref() {
        Some(state) => {
            debug_assert!(state.contains(p), "secure_actual_size called on a pointer outside the arena");
            state.buddy.actual_size(p)
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The façade is a single process-wide singleton; serialize the tests
    // that touch it so they don't interleave allocations from independent
    // scenarios.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn with_heap<R>(config: SecureHeapConfig, f: impl FnOnce() -> R) -> R {
        let _guard = SERIAL.lock().unwrap();
        secure_malloc_init(config).expect("init should succeed");
        let result = f();
        secure_malloc_done().expect("teardown should succeed once everything is freed");
        result
    }

    #[test]
    fn uninitialized_heap_delegates_to_host_allocator() {
        let _guard = SERIAL.lock().unwrap();
        assert!(!secure_malloc_initialized());
        let p = secure_malloc(64, file!(), line!());
        assert!(!p.is_null());
        assert!(!secure_allocated(p));
        secure_free(p, file!(), line!());
    }

    #[test]
    fn init_malloc_free_round_trip() {
        let page = os::page_size();
        with_heap(SecureHeapConfig::new(page, 32), || {
            let p = secure_malloc(16, file!(), line!());
            assert!(!p.is_null());
            assert!(secure_allocated(p));
            assert_eq!(secure_used(), secure_actual_size(p));
            secure_free(p, file!(), line!());
            assert_eq!(secure_used(), 0);
        });
    }

    #[test]
    fn zalloc_zeroes_memory() {
        let page = os::page_size();
        with_heap(SecureHeapConfig::new(page, 32), || {
            let p = secure_zalloc(64, file!(), line!());
            assert!(!p.is_null());
            let bytes = unsafe { std::slice::from_raw_parts(p, 64) };
            assert!(bytes.iter().all(|&b| b == 0));
            secure_free(p, file!(), line!());
        });
    }

    #[test]
    fn free_of_null_is_a_no_op() {
        let _guard = SERIAL.lock().unwrap();
        secure_free(ptr::null_mut(), file!(), line!());
        secure_clear_free(ptr::null_mut(), 0, file!(), line!());
    }

    #[test]
    fn done_fails_while_allocations_are_outstanding() {
        let _guard = SERIAL.lock().unwrap();
        let page = os::page_size();
        secure_malloc_init(SecureHeapConfig::new(page, 32)).expect("init");
        let p = secure_malloc(16, file!(), line!());
        assert!(matches!(secure_malloc_done(), Err(Error::HeapBusy)));
        secure_free(p, file!(), line!());
        secure_malloc_done().expect("teardown should now succeed");
    }

    #[test]
    fn second_init_is_idempotent_no_op() {
        let _guard = SERIAL.lock().unwrap();
        let page = os::page_size();
        let first = secure_malloc_init(SecureHeapConfig::new(page, 32)).expect("init");
        assert!(matches!(first, InitOutcome::Full | InitOutcome::Partial { .. }));
        let second = secure_malloc_init(SecureHeapConfig::new(page, 32)).expect("init");
        assert_eq!(second, InitOutcome::AlreadyInitialized);
        secure_malloc_done().expect("teardown");
    }

    #[test]
    fn clear_free_zeroes_full_actual_size_in_arena() {
        let page = os::page_size();
        with_heap(SecureHeapConfig::new(page, 32), || {
            let p = secure_malloc(16, file!(), line!());
            unsafe { ptr::write_bytes(p, 0xAB, 16) };
            secure_clear_free(p, 4, file!(), line!());
            // The block was cleansed before it re-entered the free list;
            // re-allocate the same size and confirm it comes back zeroed.
            let q = secure_malloc(16, file!(), line!());
            assert_eq!(p, q);
            let bytes = unsafe { std::slice::from_raw_parts(q, 16) };
            assert!(bytes.iter().all(|&b| b == 0));
            secure_free(q, file!(), line!());
        });
    }
}
