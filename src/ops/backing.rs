//! Backing store over the tree itself.
//!
//! The cache's "slower store" for an in-memory drive is the node content:
//! misses resolve the opaque handle through the shared table and read the
//! node, write-back pushes dirty pages into it. Transfer counters are kept
//! for the shutdown log line.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::warn;

use crate::cache::backing::{BackingStore, IoResult};
use crate::ops::handles::HandleTable;

pub struct NodeBacking {
    handles: Arc<HandleTable>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl NodeBacking {
    pub fn new(handles: Arc<HandleTable>) -> Self {
        Self { handles, reads: AtomicU64::new(0), writes: AtomicU64::new(0) }
    }

    pub fn read_calls(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackingStore for NodeBacking {
    async fn read_at(&self, handle: u64, pos: u64, buf: &mut [u8]) -> IoResult {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let Some(node) = self.handles.node_of(handle) else {
            warn!("read-miss callback with unknown handle {handle}");
            return IoResult::failed();
        };
        match node.read(pos, buf) {
            Ok(n) => IoResult::ok(n),
            Err(e) => {
                warn!("read-miss callback on node {} failed: {e}", node.id());
                IoResult::failed()
            }
        }
    }

    async fn write_at(&self, handle: u64, pos: u64, data: &[u8]) -> IoResult {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let Some(node) = self.handles.node_of(handle) else {
            warn!("write-back callback with unknown handle {handle}");
            return IoResult::failed();
        };
        match node.write(pos, data) {
            Ok(n) => IoResult::ok(n),
            Err(e) => {
                warn!("write-back callback on node {} failed: {e}", node.id());
                IoResult::failed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backing::IoStatus;
    use crate::tree::node::{Node, NodeKind};

    #[tokio::test]
    async fn resolves_handles_to_node_content() {
        let table = Arc::new(HandleTable::new());
        let node = Arc::new(Node::new(1, NodeKind::File, "f", 0o644, 0, 0));
        node.write(0, b"payload").unwrap();
        let (fh, _) = table.open(node.clone(), "/f");

        let backing = NodeBacking::new(table.clone());
        let mut buf = [0u8; 16];
        let r = backing.read_at(fh, 0, &mut buf).await;
        assert_eq!((r.bytes, r.status), (7, IoStatus::Ok));
        assert_eq!(&buf[..7], b"payload");

        let w = backing.write_at(fh, 7, b"!").await;
        assert_eq!(w.bytes, 1);
        assert_eq!(node.content_size(), 8);

        assert_eq!(backing.read_at(999, 0, &mut buf).await.status, IoStatus::Failed);
        assert_eq!(backing.read_calls(), 2);
        assert_eq!(backing.write_calls(), 1);
    }
}
