//! Capability flags and lifecycle modes negotiated with the backing store.
//!
//! Declared once when the cache is built, not per file.

use bitflags::bitflags;

bitflags! {
    /// What kind of read/write requests the backing store services directly.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RwCaps: u32 {
        /// Transfers may start at any position.
        const POS_RANDOM = 1 << 0;
        /// Transfers may have any byte length.
        const SIZE_ANY = 1 << 1;
        /// A backing write does not implicitly grow the reported file size,
        /// so the cache tracks the logical size itself.
        const WRITE_KEEPS_FILESIZE = 1 << 2;
    }

    /// Which logical resizes the backing store supports.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ResizeCaps: u32 {
        const GROW_TO_ANY = 1 << 0;
        const SHRINK_TO_ANY = 1 << 1;
        const TRUNCATE_AT_ZERO = 1 << 2;
    }
}

/// The negotiated capability set.
#[derive(Clone, Copy, Debug)]
pub struct CacheCaps {
    pub read: RwCaps,
    pub write: RwCaps,
    pub resize: ResizeCaps,
}

impl Default for CacheCaps {
    /// Full capabilities: random position, any size, cache-tracked size,
    /// grow/shrink/truncate all allowed.
    fn default() -> Self {
        Self {
            read: RwCaps::POS_RANDOM | RwCaps::SIZE_ANY,
            write: RwCaps::POS_RANDOM | RwCaps::SIZE_ANY | RwCaps::WRITE_KEEPS_FILESIZE,
            resize: ResizeCaps::GROW_TO_ANY | ResizeCaps::SHRINK_TO_ANY | ResizeCaps::TRUNCATE_AT_ZERO,
        }
    }
}

/// Flush policy for `file_close`/`close_cache`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushMode {
    /// Leave pending writes unflushed (the entry is dropped as-is).
    None,
    /// Flush pending writes before the close completes.
    Immediate,
}

/// Page retention policy for `file_close`/`close_cache`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurgeMode {
    /// Keep cached pages until the entry is dropped.
    None,
    /// Drop cached pages eagerly.
    All,
}

/// Advisory prefetch hint for `file_open`: number of leading bytes to fetch
/// eagerly. The façade always passes [`PREFETCH_NOTHING`].
pub const PREFETCH_NOTHING: u64 = 0;
