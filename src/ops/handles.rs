//! Open-handle table.
//!
//! Handles are opaque integers handed to the transport layer and resolved
//! back to nodes here. One handle exists per open path; opening an already
//! open path retains the same handle. The transition to zero references is
//! run-once: exactly one releaser observes it and performs the close path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{FsError, FsResult};
use crate::tree::node::{Node, NodeId};

pub struct OpenHandle {
    node: Arc<Node>,
    /// Cache identity the handle was opened under; tracks renames.
    identity: Mutex<String>,
    refs: AtomicU32,
}

impl OpenHandle {
    fn new(node: Arc<Node>, identity: &str) -> Self {
        Self {
            node,
            identity: Mutex::new(identity.to_string()),
            refs: AtomicU32::new(1),
        }
    }

    pub fn node(&self) -> Arc<Node> {
        self.node.clone()
    }

    pub fn identity(&self) -> String {
        self.identity.lock().unwrap().clone()
    }

    fn set_identity(&self, identity: &str) {
        *self.identity.lock().unwrap() = identity.to_string();
    }

    /// Increment unless the count already hit zero (a racing teardown must
    /// not be resurrected).
    fn try_retain(&self) -> bool {
        let mut cur = self.refs.load(Ordering::Acquire);
        loop {
            if cur == 0 {
                return false;
            }
            match self.refs.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(seen) => cur = seen,
            }
        }
    }

    /// Decrement, refusing underflow. Returns the previous count.
    fn release_ref(&self) -> Option<u32> {
        let mut cur = self.refs.load(Ordering::Acquire);
        loop {
            if cur == 0 {
                return None;
            }
            match self.refs.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(cur),
                Err(seen) => cur = seen,
            }
        }
    }
}

/// What a `release` call observed.
pub enum ReleaseOutcome {
    /// Other references remain.
    Retained,
    /// This caller saw the count reach zero and owns the close path. The
    /// table mapping stays alive until [`HandleTable::remove`] so the cache
    /// can still resolve the handle while flushing.
    Closed { node: Arc<Node>, identity: String },
}

#[derive(Default)]
struct Tables {
    by_id: HashMap<u64, Arc<OpenHandle>>,
    by_node: HashMap<NodeId, u64>,
}

pub struct HandleTable {
    tables: Mutex<Tables>,
    next: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self { tables: Mutex::new(Tables::default()), next: AtomicU64::new(1) }
    }

    /// Open (or re-open) `node`. Returns the handle and whether it was
    /// newly created, in which case the caller registers it with the cache.
    pub fn open(&self, node: Arc<Node>, identity: &str) -> (u64, bool) {
        let mut t = self.tables.lock().unwrap();
        if let Some(&fh) = t.by_node.get(&node.id())
            && let Some(h) = t.by_id.get(&fh)
            && h.try_retain()
        {
            return (fh, false);
        }
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(OpenHandle::new(node.clone(), identity));
        t.by_id.insert(fh, handle);
        t.by_node.insert(node.id(), fh);
        (fh, true)
    }

    pub fn get(&self, fh: u64) -> Option<Arc<OpenHandle>> {
        self.tables.lock().unwrap().by_id.get(&fh).cloned()
    }

    pub fn node_of(&self, fh: u64) -> Option<Arc<Node>> {
        self.get(fh).map(|h| h.node())
    }

    /// Drop one reference. Exactly one caller gets `Closed` for a handle;
    /// releasing an unknown or already-closed handle is a bad-handle error.
    pub fn release(&self, fh: u64) -> FsResult<ReleaseOutcome> {
        let handle = self.get(fh).ok_or(FsError::BadHandle)?;
        match handle.release_ref() {
            None => Err(FsError::BadHandle),
            Some(1) => Ok(ReleaseOutcome::Closed {
                node: handle.node(),
                identity: handle.identity(),
            }),
            Some(_) => Ok(ReleaseOutcome::Retained),
        }
    }

    /// Drop the table mapping once the close path has finished with it.
    pub fn remove(&self, fh: u64) {
        let mut t = self.tables.lock().unwrap();
        if let Some(h) = t.by_id.remove(&fh)
            && t.by_node.get(&h.node.id()) == Some(&fh)
        {
            t.by_node.remove(&h.node.id());
        }
    }

    /// Keep an open handle's cache identity in step with a rename.
    pub fn rename_identity(&self, node_id: NodeId, new_identity: &str) {
        let t = self.tables.lock().unwrap();
        if let Some(&fh) = t.by_node.get(&node_id)
            && let Some(h) = t.by_id.get(&fh)
        {
            h.set_identity(new_identity);
        }
    }

    /// Detach an open handle from its cache identity. Used when the cache
    /// entry the handle pointed at is deleted or relabeled away (unlink,
    /// rename overwrite): the handle's eventual close must not touch
    /// whatever entry lives under that identity afterwards.
    pub fn retire_identity(&self, node_id: NodeId) {
        let t = self.tables.lock().unwrap();
        if let Some(&fh) = t.by_node.get(&node_id)
            && let Some(h) = t.by_id.get(&fh)
        {
            h.set_identity("");
        }
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
