//! Virtual directory tree
//!
//! Responsibilities:
//! - Maintain the in-memory hierarchy of file and directory nodes with
//!   POSIX-like attributes and exclusively-owned file content.
//! - Resolve `/`-separated absolute paths, perform structural mutations
//!   (create/remove/rename) atomically under one tree-structure lock, and
//!   report aggregate space usage for free-space accounting.
//!
//! Submodules:
//! - `node`: tree entries, file content buffers and id allocation
//! - `index`: per-directory child collection with enumeration cursors
//! - `vtree`: path resolution and structural mutation

pub mod index;
pub mod node;
pub mod vtree;

pub use index::DirectoryIndex;
pub use node::{Node, NodeId, NodeKind, SECTOR_SIZE};
pub use vtree::VirtualTree;
