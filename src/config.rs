//! Configuration for [`crate::secure_malloc_init`].

/// Parameters for a secure heap arena.
///
/// Both fields must be positive powers of two; `min_size` is raised by
/// doubling (during `init`) until it is at least large enough to hold a
/// free-list link node, exactly as described for the source allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureHeapConfig {
    /// Total arena size in bytes. Must already be a power of two and at
    /// least the platform page size.
    pub arena_size: usize,
    /// Smallest block size handed out by the buddy engine.
    pub min_size: usize,
}

impl Default for SecureHeapConfig {
    /// 16 MiB arena, 32 byte minimum block - enough for a handful of AES/EC
    /// keys and short-lived derived secrets without wasting pinned memory.
    fn default() -> Self {
        Self {
            arena_size: 16 * 1024 * 1024,
            min_size: 32,
        }
    }
}

impl SecureHeapConfig {
    /// Construct a configuration with the given arena and minimum block
    /// size. Both must be powers of two; this is validated by `init`, not
    /// here, since constructing the value itself cannot fail.
    pub fn new(arena_size: usize, min_size: usize) -> Self {
        Self { arena_size, min_size }
    }

    /// Builder-style setter for `arena_size`.
    pub fn arena_size(mut self, arena_size: usize) -> Self {
        self.arena_size = arena_size;
        self
    }

    /// Builder-style setter for `min_size`.
    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_16_mib_arena_32_byte_minsize() {
        let config = SecureHeapConfig::default();
        assert_eq!(config.arena_size, 16 * 1024 * 1024);
        assert_eq!(config.min_size, 32);
    }

    #[test]
    fn builder_setters_override_individual_fields() {
        let config = SecureHeapConfig::default().arena_size(4096).min_size(64);
        assert_eq!(config, SecureHeapConfig::new(4096, 64));
    }
}
