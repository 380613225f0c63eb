//! The operation façade: the callback-shaped entry points a transport layer
//! (FUSE dispatch, an NFS server, a kernel driver shim) invokes.
//!
//! Every operation composes the tree and the cache and returns the typed
//! taxonomy; [`crate::error::FsError::errno`] converts it to the signed
//! errno convention at the boundary. Namespace mutations and their cache
//! bookkeeping serialize on one lock so a racing reader sees either the
//! fully-old or the fully-new mapping.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use log::debug;

use crate::cache::adaptor::{CacheLayout, FileCache};
use crate::cache::caps::{CacheCaps, FlushMode, PurgeMode, PREFETCH_NOTHING};
use crate::error::{CacheError, FsError, FsResult};
use crate::ops::backing::NodeBacking;
use crate::ops::handles::{HandleTable, ReleaseOutcome};
use crate::tree::node::{Node, NodeKind, SECTOR_SIZE};
use crate::tree::vtree::VirtualTree;

/// fallocate mode bit: adjust the allocation but keep the logical size.
pub const FALLOC_FL_KEEP_SIZE: u32 = 0x1;

/// Drive-wide configuration.
#[derive(Clone, Copy, Debug)]
pub struct DriveConfig {
    /// Reported drive capacity, in bytes.
    pub capacity: u64,
    pub caps: CacheCaps,
    pub layout: CacheLayout,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024 * 1024,
            caps: CacheCaps::default(),
            layout: CacheLayout::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Attributes {
    pub id: u64,
    pub kind: NodeKind,
    pub size: u64,
    pub allocation_size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub created: SystemTime,
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    pub id: u64,
    pub kind: NodeKind,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub created: SystemTime,
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

#[derive(Clone, Copy, Debug)]
pub struct StatFs {
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub free_blocks_avail: u64,
    pub max_name_len: u32,
}

/// Explicit timestamp updates for `utimens`; `None` leaves a field alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetTimes {
    pub accessed: Option<SystemTime>,
    pub modified: Option<SystemTime>,
}

pub struct MemDrive {
    tree: Arc<VirtualTree>,
    handles: Arc<HandleTable>,
    cache: FileCache<NodeBacking>,
    capacity: u64,
    ns_lock: tokio::sync::Mutex<()>,
}

impl MemDrive {
    pub fn new(config: DriveConfig) -> Self {
        let tree = Arc::new(VirtualTree::new());
        let handles = Arc::new(HandleTable::new());
        let backing = NodeBacking::new(handles.clone());
        let cache = FileCache::with_layout(backing, config.caps, config.layout);
        Self {
            tree,
            handles,
            cache,
            capacity: config.capacity,
            ns_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn tree(&self) -> &VirtualTree {
        &self.tree
    }

    pub fn cache(&self) -> &FileCache<NodeBacking> {
        &self.cache
    }

    /// Resolve the target node and the cache identity to use for it. A valid
    /// handle wins (its identity tracks renames); stateless callers fall back
    /// to path resolution.
    fn target(&self, path: &str, fh: Option<u64>) -> FsResult<(Arc<Node>, String)> {
        if let Some(fh) = fh
            && let Some(h) = self.handles.get(fh)
        {
            return Ok((h.node(), h.identity()));
        }
        Ok((self.tree.resolve(path)?, path.to_string()))
    }

    /// Open an existing file and register (or retain) its handle.
    pub async fn open(&self, path: &str) -> FsResult<u64> {
        let path = VirtualTree::norm_path(path);
        let node = self.tree.resolve(&path)?;
        if node.is_directory() {
            return Err(FsError::IsADirectory);
        }
        let (fh, created) = self.handles.open(node.clone(), &path);
        if created {
            self.cache
                .file_open(&path, node.content_size(), PREFETCH_NOTHING, fh)
                .await;
        }
        Ok(fh)
    }

    /// Create a file and open it; the cache identity starts at size zero.
    pub async fn create(&self, path: &str, mode: u32, uid: u32, gid: u32) -> FsResult<u64> {
        let path = VirtualTree::norm_path(path);
        let _ns = self.ns_lock.lock().await;
        let (parent, leaf) = self.tree.resolve_parent(&path)?;
        if leaf.is_empty() {
            return Err(FsError::AlreadyExists);
        }
        let node = self.tree.create(&parent, &leaf, NodeKind::File, mode, uid, gid)?;
        let (fh, created) = self.handles.open(node, &path);
        if created {
            self.cache.file_open(&path, 0, PREFETCH_NOTHING, fh).await;
        }
        Ok(fh)
    }

    /// Drop one handle reference. On the last reference the cache entry is
    /// flushed and closed before the handle mapping is torn down, so the
    /// flush can still resolve its backing handle.
    pub async fn release(&self, fh: u64) -> FsResult<()> {
        match self.handles.release(fh)? {
            ReleaseOutcome::Retained => Ok(()),
            ReleaseOutcome::Closed { node, identity } => {
                let res = self
                    .cache
                    .file_close(&identity, FlushMode::Immediate, PurgeMode::None)
                    .await;
                self.handles.remove(fh);
                if node.parent().is_none() && node.id() != self.tree.root_id() {
                    debug!("last handle of detached node {} closed", node.id());
                }
                match res {
                    Ok(()) | Err(CacheError::NotFound) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Read file bytes; a short result is EOF or a degraded transfer, never
    /// an error. Stateless callers may pass no handle.
    pub async fn read(
        &self,
        path: &str,
        fh: Option<u64>,
        offset: u64,
        len: usize,
    ) -> FsResult<Bytes> {
        let path = VirtualTree::norm_path(path);
        let (node, identity) = self.target(&path, fh)?;
        if node.is_directory() {
            return Err(FsError::IsADirectory);
        }
        if self.cache.exists(&identity) {
            let out = self.cache.read(&identity, offset, len).await?;
            return Ok(Bytes::from(out.data));
        }
        let mut buf = vec![0u8; len];
        let n = node.read(offset, &mut buf)?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// Write file bytes through the cache (write-back) or directly into the
    /// node when the identity is not open.
    pub async fn write(
        &self,
        path: &str,
        fh: Option<u64>,
        offset: u64,
        data: &[u8],
    ) -> FsResult<usize> {
        let path = VirtualTree::norm_path(path);
        let (node, identity) = self.target(&path, fh)?;
        if node.is_directory() {
            return Err(FsError::IsADirectory);
        }
        // grow the allocation eagerly: write-back is deferred, but space
        // accounting must see the pending bytes
        let end = offset + data.len() as u64;
        if end > node.allocation_size() {
            node.set_allocation_size(end)?;
        }
        let n = if self.cache.exists(&identity) {
            self.cache.write(&identity, offset, data).await?.bytes
        } else {
            node.write(offset, data)?
        };
        node.touch_modified();
        Ok(n)
    }

    /// Set the logical size on the node and propagate to the cache.
    pub async fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let path = VirtualTree::norm_path(path);
        let node = self.tree.resolve(&path)?;
        if node.is_directory() {
            return Err(FsError::IsADirectory);
        }
        node.set_size(size)?;
        if self.cache.exists(&path) {
            self.cache.set_size(&path, size, false).await?;
        }
        node.touch_modified();
        Ok(())
    }

    pub async fn mkdir(&self, path: &str, mode: u32, uid: u32, gid: u32) -> FsResult<()> {
        let path = VirtualTree::norm_path(path);
        let _ns = self.ns_lock.lock().await;
        let (parent, leaf) = self.tree.resolve_parent(&path)?;
        if leaf.is_empty() {
            return Err(FsError::AlreadyExists);
        }
        self.tree.create(&parent, &leaf, NodeKind::Directory, mode, uid, gid)?;
        Ok(())
    }

    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        let path = VirtualTree::norm_path(path);
        let _ns = self.ns_lock.lock().await;
        let node = self.tree.resolve(&path)?;
        if !node.is_directory() {
            return Err(FsError::NotADirectory);
        }
        if node.id() == self.tree.root_id() {
            return Err(FsError::NotSupported);
        }
        let empty = node
            .children()
            .map(|c| c.lock().unwrap().is_empty())
            .unwrap_or(true);
        if !empty {
            return Err(FsError::NotEmpty);
        }
        self.tree.remove(&node)
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        let path = VirtualTree::norm_path(path);
        let _ns = self.ns_lock.lock().await;
        let node = self.tree.resolve(&path)?;
        if node.is_directory() {
            return Err(FsError::IsADirectory);
        }
        self.tree.remove(&node)?;
        // pending cached writes go away with the file; any still-open handle
        // falls back to direct node I/O until its last release
        self.handles.retire_identity(node.id());
        self.cache.delete(&path);
        Ok(())
    }

    /// Move/rename: the tree swap happens first, then the cache identity is
    /// relabeled (deleting any entry already at the destination), then open
    /// handles learn the new identity.
    pub async fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        let old = VirtualTree::norm_path(old);
        let new = VirtualTree::norm_path(new);
        let _ns = self.ns_lock.lock().await;
        let node = self.tree.resolve(&old)?;
        let (new_parent, leaf) = self.tree.resolve_parent(&new)?;
        if leaf.is_empty() {
            return Err(FsError::AlreadyExists);
        }
        let victim = new_parent
            .children()
            .and_then(|c| c.lock().unwrap().get(&leaf));
        self.tree.rename(&node, &new_parent, &leaf)?;
        if let Some(victim_id) = victim
            && victim_id != node.id()
        {
            // an overwritten file may still be open; its eventual close must
            // not touch the entry now living under the destination identity
            self.handles.retire_identity(victim_id);
        }
        self.cache.delete(&new);
        match self.cache.rename(&old, &new) {
            Ok(()) | Err(CacheError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        self.handles.rename_identity(node.id(), &new);
        Ok(())
    }

    pub async fn getattr(&self, path: &str) -> FsResult<Attributes> {
        let path = VirtualTree::norm_path(path);
        let node = self.tree.resolve(&path)?;
        Ok(self.attributes_of(&path, &node).await)
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        let node = self.tree.resolve(path)?;
        node.set_mode(mode);
        Ok(())
    }

    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let node = self.tree.resolve(path)?;
        node.set_owner(uid, gid);
        Ok(())
    }

    pub async fn utimens(&self, path: &str, times: SetTimes) -> FsResult<()> {
        let node = self.tree.resolve(path)?;
        node.set_times(times.accessed, times.modified);
        Ok(())
    }

    /// Existence probe.
    pub async fn access(&self, path: &str) -> FsResult<()> {
        self.tree.resolve(path)?;
        Ok(())
    }

    /// Enumerate a directory, driving the filler callback per entry. A
    /// nonzero filler return stops the enumeration: the remaining entries
    /// are deferred to a continuation call, not an error. With `restart`
    /// clear the listing resumes at the directory's cursor (which any
    /// concurrent structural mutation resets to the beginning).
    pub async fn readdir(
        &self,
        path: &str,
        restart: bool,
        filler: &mut dyn FnMut(&DirEntry) -> i32,
    ) -> FsResult<()> {
        let path = VirtualTree::norm_path(path);
        let node = self.tree.resolve(&path)?;
        let Some(children) = node.children() else {
            return Err(FsError::NotADirectory);
        };
        if restart {
            children.lock().unwrap().reset_enumeration();
        }
        loop {
            let entry = children.lock().unwrap().next_entry();
            let Some(entry) = entry else { break };
            let Some(child) = self.tree.get(entry.id) else { continue };
            let child_path = if path == "/" {
                format!("/{}", entry.name)
            } else {
                format!("{}/{}", path, entry.name)
            };
            let size = if child.is_directory() {
                self.tree.subtree_size(&child)
            } else {
                match self.cache.size_of(&child_path).await {
                    Some(s) => s,
                    None => child.content_size(),
                }
            };
            let a = child.attrs();
            let de = DirEntry {
                name: entry.name.clone(),
                id: child.id(),
                kind: child.kind(),
                size,
                mode: a.mode,
                uid: a.uid,
                gid: a.gid,
                created: a.times.created,
                accessed: a.times.accessed,
                modified: a.times.modified,
            };
            if filler(&de) != 0 {
                break;
            }
        }
        Ok(())
    }

    /// Capacity report in sector-size blocks, free space from the root's
    /// aggregate usage.
    pub fn statfs(&self) -> StatFs {
        let used = self.tree.subtree_size(&self.tree.root());
        let free = (self.capacity.saturating_sub(used) + SECTOR_SIZE / 2) / SECTOR_SIZE;
        StatFs {
            block_size: SECTOR_SIZE as u32,
            total_blocks: self.capacity / SECTOR_SIZE,
            free_blocks: free,
            free_blocks_avail: free,
            max_name_len: 255,
        }
    }

    /// Pre-allocate storage. Unknown mode bits are rejected; the range never
    /// shrinks anything; without the keep-size bit the logical size is
    /// raised to the new allocation.
    pub async fn fallocate(
        &self,
        path: &str,
        mode: u32,
        offset: u64,
        length: u64,
    ) -> FsResult<()> {
        if mode & !FALLOC_FL_KEEP_SIZE != 0 {
            return Err(FsError::NotSupported);
        }
        let path = VirtualTree::norm_path(path);
        let node = self.tree.resolve(&path)?;
        if node.is_directory() {
            return Err(FsError::IsADirectory);
        }
        let end = offset + length;
        if end >= node.content_size() {
            if end > node.allocation_size() {
                node.set_allocation_size(end)?;
            }
            if mode & FALLOC_FL_KEEP_SIZE == 0 {
                let alloc = node.allocation_size();
                if node.content_size() < alloc {
                    node.set_size(alloc)?;
                    if self.cache.exists(&path) {
                        self.cache.set_size(&path, alloc, false).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Push one identity's pending writes without closing it.
    pub async fn flush(&self, path: &str) -> FsResult<()> {
        let path = VirtualTree::norm_path(path);
        match self.cache.flush(&path).await {
            Ok(()) | Err(CacheError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Flush and close every cache entry (the unmount path).
    pub async fn shutdown(&self) -> FsResult<()> {
        let res = self.cache.close_cache(FlushMode::Immediate, PurgeMode::None).await;
        debug!(
            "drive shut down: {} backing reads, {} backing writes",
            self.cache.backing().read_calls(),
            self.cache.backing().write_calls()
        );
        res.map_err(FsError::from)
    }

    async fn attributes_of(&self, path_norm: &str, node: &Arc<Node>) -> Attributes {
        let a = node.attrs();
        let size = if node.is_directory() {
            self.tree.subtree_size(node)
        } else {
            // the cache is the size authority while the file is open
            match self.cache.size_of(path_norm).await {
                Some(s) => s,
                None => node.content_size(),
            }
        };
        Attributes {
            id: node.id(),
            kind: node.kind(),
            size,
            allocation_size: node.allocation_size(),
            mode: a.mode,
            uid: a.uid,
            gid: a.gid,
            created: a.times.created,
            accessed: a.times.accessed,
            modified: a.times.modified,
        }
    }
}

impl Default for MemDrive {
    fn default() -> Self {
        Self::new(DriveConfig::default())
    }
}
