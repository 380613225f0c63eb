//! Path resolution and structural mutation over the node arena.
//!
//! All structural changes happen under one tree-structure `RwLock` held for
//! the whole operation, so a rename is a single transaction: concurrent
//! lookups see either the fully-old or the fully-new mapping, never a tree
//! with the entry missing from both places. Per-node content locks are
//! never taken while this lock is held.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{FsError, FsResult};
use crate::tree::node::{IdAllocator, Node, NodeId, NodeKind, sector_round_up};

pub struct VirtualTree {
    nodes: RwLock<HashMap<NodeId, Arc<Node>>>,
    ids: IdAllocator,
    root: Arc<Node>,
}

impl VirtualTree {
    pub fn new() -> Self {
        let ids = IdAllocator::new();
        let root_id = ids.alloc();
        let root = Arc::new(Node::new(root_id, NodeKind::Directory, "/", 0o755, 0, 0));
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root.clone());
        Self { nodes: RwLock::new(nodes), ids, root }
    }

    pub fn root(&self) -> Arc<Node> {
        self.root.clone()
    }

    pub fn root_id(&self) -> NodeId {
        self.root.id()
    }

    pub fn get(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.read().unwrap().get(&id).cloned()
    }

    /// Collapse repeated separators and force a leading `/`.
    pub fn norm_path(p: &str) -> String {
        let parts: Vec<&str> = p.split('/').filter(|s| !s.is_empty()).collect();
        let mut out = String::from("/");
        out.push_str(&parts.join("/"));
        out
    }

    /// Split a normalized path into (directory part, leaf name).
    pub fn split_dir_file(path: &str) -> (String, String) {
        let n = path.rfind('/').unwrap_or(0);
        if n == 0 {
            ("/".into(), path[1..].into())
        } else {
            (path[..n].into(), path[n + 1..].into())
        }
    }

    /// Walk the tree from the root, one segment at a time. Descending
    /// through a non-directory segment is rejected.
    pub fn resolve(&self, path: &str) -> FsResult<Arc<Node>> {
        let path = Self::norm_path(path);
        let nodes = self.nodes.read().unwrap();
        let mut cur = self.root.clone();
        if path == "/" {
            return Ok(cur);
        }
        for seg in path.trim_start_matches('/').split('/') {
            let idx = cur.children().ok_or(FsError::NotADirectory)?;
            let child_id = idx.lock().unwrap().get(seg).ok_or(FsError::NotFound)?;
            cur = nodes.get(&child_id).cloned().ok_or(FsError::NotFound)?;
        }
        Ok(cur)
    }

    /// Resolve the directory portion of `path`; returns it with the leaf
    /// name (empty for the root path itself).
    pub fn resolve_parent(&self, path: &str) -> FsResult<(Arc<Node>, String)> {
        let path = Self::norm_path(path);
        let (dir, leaf) = Self::split_dir_file(&path);
        let parent = self.resolve(&dir)?;
        if !parent.is_directory() {
            return Err(FsError::NotADirectory);
        }
        Ok((parent, leaf))
    }

    /// Allocate an id, construct the node and attach it under `parent`.
    pub fn create(
        &self,
        parent: &Arc<Node>,
        name: &str,
        kind: NodeKind,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> FsResult<Arc<Node>> {
        let mut nodes = self.nodes.write().unwrap();
        let idx = parent.children().ok_or(FsError::NotADirectory)?;
        let mut idx = idx.lock().unwrap();
        if idx.get(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let id = self.ids.alloc();
        let node = Arc::new(Node::new(id, kind, name, mode, uid, gid));
        node.set_parent(Some(parent.id()));
        idx.insert(id, name);
        nodes.insert(id, node.clone());
        Ok(node)
    }

    /// Detach `node` from its parent and drop the arena's ownership. Open
    /// handles keep the node alive until the last one closes. Emptiness of
    /// directories is a façade policy, not checked here.
    pub fn remove(&self, node: &Arc<Node>) -> FsResult<()> {
        let mut nodes = self.nodes.write().unwrap();
        let parent_id = node.parent().ok_or(FsError::NotFound)?;
        if let Some(parent) = nodes.get(&parent_id)
            && let Some(idx) = parent.children()
        {
            idx.lock().unwrap().remove(node.id());
        }
        node.set_parent(None);
        nodes.remove(&node.id());
        Ok(())
    }

    /// Move/rename in one locked transaction. An existing entry at the
    /// destination is removed first (delete-then-replace), except that
    /// replacing across kinds is rejected.
    pub fn rename(&self, node: &Arc<Node>, new_parent: &Arc<Node>, new_name: &str) -> FsResult<()> {
        let mut nodes = self.nodes.write().unwrap();
        let old_parent_id = node.parent().ok_or(FsError::NotFound)?;
        let new_idx = new_parent.children().ok_or(FsError::NotADirectory)?;

        let existing = new_idx.lock().unwrap().get(new_name);
        if let Some(target_id) = existing {
            if target_id == node.id() {
                // same slot: a case-only rename
                new_idx.lock().unwrap().rename(node.id(), new_name);
                node.set_name(new_name);
                return Ok(());
            }
            let target = nodes.get(&target_id).cloned().ok_or(FsError::NotFound)?;
            match (node.is_directory(), target.is_directory()) {
                (false, true) => return Err(FsError::IsADirectory),
                (true, false) => return Err(FsError::NotADirectory),
                _ => {}
            }
            new_idx.lock().unwrap().remove(target_id);
            target.set_parent(None);
            nodes.remove(&target_id);
        }

        if let Some(old_parent) = nodes.get(&old_parent_id)
            && let Some(idx) = old_parent.children()
        {
            idx.lock().unwrap().remove(node.id());
        }
        node.set_name(new_name);
        node.set_parent(Some(new_parent.id()));
        new_idx.lock().unwrap().insert(node.id(), new_name);
        Ok(())
    }

    /// Aggregate size of a directory's immediate children, each allocation
    /// rounded up to the sector size. Files report their own rounded
    /// allocation.
    pub fn subtree_size(&self, node: &Arc<Node>) -> u64 {
        let Some(idx) = node.children() else {
            return sector_round_up(node.allocation_size());
        };
        let children: Vec<Arc<Node>> = {
            let nodes = self.nodes.read().unwrap();
            let entries = idx.lock().unwrap().snapshot();
            entries.iter().filter_map(|e| nodes.get(&e.id).cloned()).collect()
        };
        children.iter().map(|n| sector_round_up(n.allocation_size())).sum()
    }
}

impl Default for VirtualTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mkdir(t: &VirtualTree, parent: &Arc<Node>, name: &str) -> Arc<Node> {
        t.create(parent, name, NodeKind::Directory, 0o755, 0, 0).unwrap()
    }

    fn mkfile(t: &VirtualTree, parent: &Arc<Node>, name: &str) -> Arc<Node> {
        t.create(parent, name, NodeKind::File, 0o644, 0, 0).unwrap()
    }

    #[test]
    fn resolve_walks_created_segments() {
        let t = VirtualTree::new();
        let a = mkdir(&t, &t.root(), "a");
        let b = mkdir(&t, &a, "b");
        let f = mkfile(&t, &b, "hello.txt");

        assert_eq!(t.resolve("/").unwrap().id(), t.root_id());
        assert_eq!(t.resolve("/a/b").unwrap().id(), b.id());
        assert_eq!(t.resolve("/a/b/hello.txt").unwrap().id(), f.id());
        assert_eq!(t.resolve("//a///b/").unwrap().id(), b.id());
        assert_eq!(t.resolve("/a/B/Hello.TXT").unwrap().id(), f.id());
        assert_eq!(t.resolve("/a/missing"), Err(FsError::NotFound));
    }

    #[test]
    fn resolve_rejects_descending_through_a_file() {
        let t = VirtualTree::new();
        let a = mkdir(&t, &t.root(), "a");
        mkfile(&t, &a, "f");
        assert_eq!(t.resolve("/a/f/x"), Err(FsError::NotADirectory));
    }

    #[test]
    fn duplicate_names_are_rejected_case_insensitively() {
        let t = VirtualTree::new();
        let root = t.root();
        mkfile(&t, &root, "File");
        let err = t.create(&root, "file", NodeKind::File, 0o644, 0, 0);
        assert_eq!(err.err(), Some(FsError::AlreadyExists));
        // the directory is unchanged
        assert_eq!(root.children().unwrap().lock().unwrap().len(), 1);
    }

    #[test]
    fn remove_detaches_and_resolution_fails_afterwards() {
        let t = VirtualTree::new();
        let f = mkfile(&t, &t.root(), "f");
        t.remove(&f).unwrap();
        assert_eq!(f.parent(), None);
        assert_eq!(t.resolve("/f"), Err(FsError::NotFound));
        assert_eq!(t.remove(&f), Err(FsError::NotFound));
    }

    #[test]
    fn rename_moves_and_keeps_id() {
        let t = VirtualTree::new();
        let root = t.root();
        let d = mkdir(&t, &root, "d");
        let f = mkfile(&t, &root, "old");
        let id = f.id();

        t.rename(&f, &d, "new").unwrap();
        assert_eq!(t.resolve("/old"), Err(FsError::NotFound));
        assert_eq!(t.resolve("/d/new").unwrap().id(), id);
        assert_eq!(f.name(), "new");
        assert_eq!(f.parent(), Some(d.id()));
    }

    #[test]
    fn rename_overwrites_same_kind_target() {
        let t = VirtualTree::new();
        let root = t.root();
        let a = mkfile(&t, &root, "a");
        let b = mkfile(&t, &root, "b");
        let victim = b.id();

        t.rename(&a, &root, "b").unwrap();
        let now = t.resolve("/b").unwrap();
        assert_eq!(now.id(), a.id());
        assert!(t.get(victim).is_none());
        assert_eq!(root.children().unwrap().lock().unwrap().len(), 1);
    }

    #[test]
    fn rename_rejects_cross_kind_overwrite() {
        let t = VirtualTree::new();
        let root = t.root();
        let f = mkfile(&t, &root, "f");
        let d = mkdir(&t, &root, "d");

        assert_eq!(t.rename(&f, &root, "d"), Err(FsError::IsADirectory));
        assert_eq!(t.rename(&d, &root, "f"), Err(FsError::NotADirectory));
        // both entries are still in place
        assert!(t.resolve("/f").is_ok());
        assert!(t.resolve("/d").is_ok());
    }

    #[test]
    fn case_only_rename_keeps_the_entry() {
        let t = VirtualTree::new();
        let root = t.root();
        let f = mkfile(&t, &root, "name");
        t.rename(&f, &root, "NAME").unwrap();
        assert_eq!(f.name(), "NAME");
        assert_eq!(t.resolve("/name").unwrap().id(), f.id());
        assert_eq!(root.children().unwrap().lock().unwrap().len(), 1);
    }

    #[test]
    fn subtree_size_rounds_allocations_to_sectors() {
        let t = VirtualTree::new();
        let root = t.root();
        let a = mkfile(&t, &root, "a");
        let b = mkfile(&t, &root, "b");
        a.write(0, &[1u8; 100]).unwrap();
        b.write(0, &[2u8; 1000]).unwrap();
        mkdir(&t, &root, "d");

        // 100 -> 512, 1000 -> 1024, directory -> 0
        assert_eq!(t.subtree_size(&root), 512 + 1024);
    }
}
