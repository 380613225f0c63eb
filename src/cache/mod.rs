//! Write-back file cache
//!
//! Responsibilities:
//! - Decouple façade reads/writes from the backing store: serve from cached
//!   pages, fetch misses and flush dirty data through the backing-store
//!   callback contracts in bounded chunks.
//! - Negotiate capability flags once at construction and honor them on the
//!   miss/flush paths.
//! - Track per-identity logical size (the cache is the size authority while
//!   a file is open) and keep entries addressable across renames.
//!
//! Submodules:
//! - `caps`: capability flags, flush/purge modes, prefetch hints
//! - `backing`: the consumed read-miss/write-back contracts + a file-backed
//!   implementation
//! - `adaptor`: the cache proper, keyed by path identity

pub mod adaptor;
pub mod backing;
pub mod caps;

pub use adaptor::{CacheLayout, FileCache, ReadOutcome, WriteOutcome};
pub use backing::{BackingStore, FileBacking, IoResult, IoStatus};
pub use caps::{CacheCaps, FlushMode, PurgeMode, ResizeCaps, RwCaps, PREFETCH_NOTHING};
