//! memdrive: an in-memory virtual drive.
//!
//! A concurrent POSIX-like directory tree (`tree`) fronted by a write-back
//! file cache (`cache`), composed behind a callback-style operation façade
//! (`ops`) that a FUSE dispatcher, NFS server or similar transport layer
//! drives. The transport and any wire protocol live outside this crate.

pub mod cache;
pub mod error;
pub mod ops;
pub mod tree;

pub use error::{CacheError, FsError, FsResult};
pub use ops::{DriveConfig, MemDrive};
