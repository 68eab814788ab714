//! Arena lifecycle: init (map + guard + lock + seed) and teardown
//! (unmap + free bookkeeping), plus the accessors the façade needs.

use crate::bitindex::{BitIndex, BitTree};
use crate::bitmap::Bitset;
use crate::buddy::Buddy;
use crate::config::SecureHeapConfig;
use crate::error::{Error, Result};
use crate::freelist::{FreeLists, MIN_NODE_SIZE};
use crate::os;

/// Outcome of a successful [`crate::secure_malloc_init`] call.
///
/// Mirrors the source allocator's `1`/`2` return codes as a typed value;
/// `From<InitOutcome> for i32` recovers the raw codes for FFI-shaped
/// callers that only check for non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Arena mapped, guarded, locked resident and excluded from dumps.
    Full,
    /// Arena mapped and usable, but one or more hardening steps failed.
    /// Each flag is `true` if that step failed.
    Partial {
        guard_failed: bool,
        lock_failed: bool,
        dump_failed: bool,
    },
    /// `init` was called while the heap was already live; a no-op.
    AlreadyInitialized,
}

impl From<InitOutcome> for i32 {
    fn from(outcome: InitOutcome) -> Self {
        match outcome {
            InitOutcome::Full => 1,
            InitOutcome::Partial { .. } => 2,
            InitOutcome::AlreadyInitialized => 0,
        }
    }
}

/// Live heap state: the mapped arena plus the buddy engine's bookkeeping.
///
/// Dropping a `HeapState` unmaps the arena (and its guard pages) and frees
/// the bookkeeping arrays - the same "done" behaviour the source allocator
/// performs explicitly, but expressed as RAII so it is automatically
/// idempotent (it can only ever run once per value) and automatically runs
/// on the `init` error-rewind path as well as on explicit teardown.
pub struct HeapState {
    map: os::MapHandle,
    arena_size: usize,
    pub(crate) buddy: Buddy,
}

// Raw pointers in `map`/`buddy` are only ever touched while the process-wide
// heap lock is held; the façade is the sole owner of that discipline.
unsafe impl Send for HeapState {}
unsafe impl Sync for HeapState {}

impl HeapState {
    /// Whether `p` lies inside the arena (the "residency" predicate used to
    /// decide which deallocator to route to).
    pub fn contains(&self, p: *const u8) -> bool {
        let addr = p as usize;
        let base = self.map.arena_base as usize;
        addr >= base && addr < base + self.arena_size
    }
}

impl Drop for HeapState {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = os::unmap(self.map.map_base, self.map.map_size) {
                log::error!("secure heap: failed to unmap arena during teardown: {e}");
            }
        }
        log::trace!("secure heap arena torn down");
    }
}

/// Installs a heap: maps the arena, seeds the buddy engine, installs guard
/// pages, requests locked-resident status and core-dump exclusion.
///
/// Configuration errors (non-power-of-two sizes) and resource exhaustion
/// (mapping failure) are hard failures returned as `Err`. Guard/lock/dump
/// failures are advisory and downgrade the result to
/// [`InitOutcome::Partial`] instead.
pub fn init(config: SecureHeapConfig) -> Result<(HeapState, InitOutcome)> {
    let SecureHeapConfig { arena_size, min_size } = config;

    if arena_size == 0 || !arena_size.is_power_of_two() {
        return Err(Error::InvalidConfig("arena_size"));
    }
    if min_size == 0 || !min_size.is_power_of_two() {
        return Err(Error::InvalidConfig("min_size"));
    }

    let mut minsize = min_size;
    while minsize < MIN_NODE_SIZE {
        minsize <<= 1;
    }
    if minsize > arena_size {
        return Err(Error::InvalidConfig("min_size"));
    }

    let l_max = (arena_size / minsize).trailing_zeros();
    let bittable_bits = 2 * (arena_size / minsize);

    let page = os::page_size();
    let map = os::map_arena(arena_size, page)?;

    let index = BitIndex::new(map.arena_base as usize, arena_size);
    let tree = BitTree::new(index, l_max, bittable_bits);
    let present = Bitset::new(bittable_bits);
    let allocated = Bitset::new(bittable_bits);
    let freelists = FreeLists::new(l_max as usize + 1);

    let mut buddy = Buddy::new(tree, present, allocated, freelists, arena_size, l_max);
    unsafe { buddy.seed(map.arena_base) };

    let guard_failed = match os::install_guards(map.map_base, map.map_size, page) {
        Ok(()) => false,
        Err(e) => {
            log::warn!("secure heap: failed to install guard pages: {e}");
            true
        }
    };
    let lock_failed = match os::lock(map.arena_base, arena_size) {
        Ok(()) => false,
        Err(e) => {
            log::warn!("secure heap: failed to lock arena pages resident: {e}");
            true
        }
    };
    let dump_failed = match os::exclude_from_dump(map.arena_base, arena_size) {
        Ok(()) => false,
        Err(e) => {
            log::warn!("secure heap: failed to exclude arena from core dumps: {e}");
            true
        }
    };

    let outcome = if guard_failed || lock_failed || dump_failed {
        InitOutcome::Partial { guard_failed, lock_failed, dump_failed }
    } else {
        InitOutcome::Full
    };

    let state = HeapState { map, arena_size, buddy };
    log::debug!("secure heap initialised: {:?}", outcome);
    Ok((state, outcome))
}
