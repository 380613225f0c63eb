//! Operation façade
//!
//! Responsibilities:
//! - Expose the callback-shaped operation set a transport layer invokes
//!   (open/create/release/read/write/truncate/mkdir/rmdir/unlink/rename/
//!   getattr/chmod/chown/utimens/readdir/statfs/fallocate and friends).
//! - Own the handle table and compose the tree with the cache adaptor; the
//!   cache's backing store for an in-memory drive is the tree itself.
//! - Convert the typed error taxonomy to signed errno codes at the boundary.
//!
//! Submodules:
//! - `handles`: opaque handle table with run-once close transitions
//! - `backing`: the node-backed store the cache flushes into
//! - `facade`: the drive and its operation entry points

pub mod backing;
pub mod facade;
pub mod handles;

pub use backing::NodeBacking;
pub use facade::{Attributes, DirEntry, DriveConfig, MemDrive, SetTimes, StatFs};
pub use handles::{HandleTable, ReleaseOutcome};
