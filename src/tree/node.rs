//! Tree entries: files and directories.
//!
//! A `Node` owns its file bytes (or its child index for directories) and is
//! itself owned by the tree arena. The parent edge is a plain id, never an
//! ownership edge. Structural fields (`name`, `parent`) are mutated only
//! under the tree-structure lock in `vtree`; file content has its own
//! per-node lock so content I/O never contends with unrelated tree changes.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::error::{FsError, FsResult};
use crate::tree::index::DirectoryIndex;

/// Storage sector granularity used for space accounting.
pub const SECTOR_SIZE: u64 = 512;

/// Stable node identifier; never reused while anything may still hold it.
pub type NodeId = u64;

/// Round `n` up to the next sector boundary.
pub fn sector_round_up(n: u64) -> u64 {
    (n + SECTOR_SIZE - 1) & !(SECTOR_SIZE - 1)
}

/// Monotonic id source shared by one tree.
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    pub fn alloc(&self) -> NodeId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Clone, Copy, Debug)]
pub struct Timestamps {
    pub created: SystemTime,
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

impl Timestamps {
    fn now() -> Self {
        let t = SystemTime::now();
        Self { created: t, accessed: t, modified: t }
    }
}

/// Permission/ownership bits plus timestamps. Free-form, not validated.
#[derive(Clone, Copy, Debug)]
pub struct Attrs {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub times: Timestamps,
}

/// File bytes with independent logical size and allocation size.
///
/// Invariant: bytes in `data[size..]` are always zero, so growing the
/// logical size back over previously truncated ranges reads zeros.
pub struct FileContent {
    data: Vec<u8>,
    size: u64,
}

impl FileContent {
    fn new() -> Self {
        Self { data: Vec::new(), size: 0 }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn allocation_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Copy bytes into `buf`, clamped at the logical size. Zero bytes at or
    /// past end-of-file signals EOF; there is no distinct EOF error.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> usize {
        if offset >= self.size {
            return 0;
        }
        let end = self.size.min(offset.saturating_add(buf.len() as u64));
        let n = (end - offset) as usize;
        buf[..n].copy_from_slice(&self.data[offset as usize..end as usize]);
        n
    }

    /// Write bytes at `offset`, growing the logical size (and allocation)
    /// to cover the written range. Writes never fail to extend.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> usize {
        let end = offset + data.len() as u64;
        if end > self.size {
            self.size = end;
        }
        if (self.data.len() as u64) < self.size {
            self.data.resize(self.size as usize, 0);
        }
        self.data[offset as usize..end as usize].copy_from_slice(data);
        data.len()
    }

    /// Truncate or zero-extend to `new_size`. Shrinking keeps the
    /// allocation but zeroes the dropped tail.
    pub fn set_size(&mut self, new_size: u64) {
        if new_size < self.size {
            let upper = self.data.len().min(self.size as usize);
            self.data[new_size as usize..upper].fill(0);
        } else if (self.data.len() as u64) < new_size {
            self.data.resize(new_size as usize, 0);
        }
        self.size = new_size;
    }

    /// Adjust the underlying allocation independently of the logical size.
    /// Shrinking below the logical size truncates it as well.
    pub fn set_allocation_size(&mut self, new_alloc: u64) {
        self.data.resize(new_alloc as usize, 0);
        if self.size > new_alloc {
            self.size = new_alloc;
        }
    }
}

struct Link {
    name: String,
    parent: Option<NodeId>,
}

enum Body {
    File(Mutex<FileContent>),
    Dir(Mutex<DirectoryIndex>),
}

pub struct Node {
    id: NodeId,
    kind: NodeKind,
    link: Mutex<Link>,
    attrs: Mutex<Attrs>,
    body: Body,
}

/// Equality and debug output are keyed on `id`, the node's stable identity.
impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("id", &self.id).field("kind", &self.kind).finish()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, name: &str, mode: u32, uid: u32, gid: u32) -> Self {
        let body = match kind {
            NodeKind::File => Body::File(Mutex::new(FileContent::new())),
            NodeKind::Directory => Body::Dir(Mutex::new(DirectoryIndex::new())),
        };
        Self {
            id,
            kind,
            link: Mutex::new(Link { name: name.to_string(), parent: None }),
            attrs: Mutex::new(Attrs { mode, uid, gid, times: Timestamps::now() }),
            body,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn name(&self) -> String {
        self.link.lock().unwrap().name.clone()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.link.lock().unwrap().parent
    }

    /// Only `vtree` calls this, under the tree-structure write lock.
    pub(crate) fn set_parent(&self, parent: Option<NodeId>) {
        self.link.lock().unwrap().parent = parent;
    }

    /// Only `vtree` calls this, under the tree-structure write lock.
    pub(crate) fn set_name(&self, name: &str) {
        self.link.lock().unwrap().name = name.to_string();
    }

    pub fn attrs(&self) -> Attrs {
        *self.attrs.lock().unwrap()
    }

    pub fn set_mode(&self, mode: u32) {
        self.attrs.lock().unwrap().mode = mode;
    }

    pub fn set_owner(&self, uid: u32, gid: u32) {
        let mut a = self.attrs.lock().unwrap();
        a.uid = uid;
        a.gid = gid;
    }

    /// Apply explicit timestamps; `None` leaves the field untouched.
    pub fn set_times(&self, accessed: Option<SystemTime>, modified: Option<SystemTime>) {
        let mut a = self.attrs.lock().unwrap();
        if let Some(t) = accessed {
            a.times.accessed = t;
        }
        if let Some(t) = modified {
            a.times.modified = t;
        }
    }

    pub fn touch_modified(&self) {
        let mut a = self.attrs.lock().unwrap();
        let t = SystemTime::now();
        a.times.modified = t;
        a.times.accessed = t;
    }

    pub fn children(&self) -> Option<&Mutex<DirectoryIndex>> {
        match &self.body {
            Body::Dir(idx) => Some(idx),
            Body::File(_) => None,
        }
    }

    /// Logical content size; directories report zero here (their aggregate
    /// size comes from `VirtualTree::subtree_size`).
    pub fn content_size(&self) -> u64 {
        match &self.body {
            Body::File(c) => c.lock().unwrap().size(),
            Body::Dir(_) => 0,
        }
    }

    pub fn allocation_size(&self) -> u64 {
        match &self.body {
            Body::File(c) => c.lock().unwrap().allocation_size(),
            Body::Dir(_) => 0,
        }
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        match &self.body {
            Body::File(c) => Ok(c.lock().unwrap().read(offset, buf)),
            Body::Dir(_) => Err(FsError::IsADirectory),
        }
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> FsResult<usize> {
        match &self.body {
            Body::File(c) => Ok(c.lock().unwrap().write(offset, data)),
            Body::Dir(_) => Err(FsError::IsADirectory),
        }
    }

    pub fn set_size(&self, new_size: u64) -> FsResult<()> {
        match &self.body {
            Body::File(c) => {
                c.lock().unwrap().set_size(new_size);
                Ok(())
            }
            Body::Dir(_) => Err(FsError::NotSupported),
        }
    }

    pub fn set_allocation_size(&self, new_alloc: u64) -> FsResult<()> {
        match &self.body {
            Body::File(c) => {
                c.lock().unwrap().set_allocation_size(new_alloc);
                Ok(())
            }
            Body::Dir(_) => Err(FsError::NotSupported),
        }
    }
}
