//! The consumed backing-store contracts.
//!
//! The cache never talks to a concrete store directly; it calls these two
//! callbacks with an opaque per-file handle, a position and a buffer, and
//! interprets the `(bytes, status)` pair. A short transfer with an `Ok`
//! status means "the store has nothing more there" (end-of-data, a sparse
//! hole); `Partial`, `Canceled` and `Failed` report degradation.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::warn;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoStatus {
    /// Transfer serviced; `bytes` may still be short of the request at
    /// end-of-data.
    Ok,
    /// The store moved fewer bytes than it could see remaining.
    Partial,
    /// Cooperative cancellation observed at a chunk boundary.
    Canceled,
    /// The store could not service the transfer at all.
    Failed,
}

#[derive(Clone, Copy, Debug)]
pub struct IoResult {
    pub bytes: usize,
    pub status: IoStatus,
}

impl IoResult {
    pub fn ok(bytes: usize) -> Self {
        Self { bytes, status: IoStatus::Ok }
    }

    pub fn partial(bytes: usize) -> Self {
        Self { bytes, status: IoStatus::Partial }
    }

    pub fn canceled() -> Self {
        Self { bytes: 0, status: IoStatus::Canceled }
    }

    pub fn failed() -> Self {
        Self { bytes: 0, status: IoStatus::Failed }
    }
}

/// Read-miss and write-back contract the cache adaptor drives in bounded
/// chunks.
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn read_at(&self, handle: u64, pos: u64, buf: &mut [u8]) -> IoResult;
    async fn write_at(&self, handle: u64, pos: u64, data: &[u8]) -> IoResult;
}

/// Backing store over a local directory: each registered handle maps to one
/// regular file. Slow-store stand-in for tests and the demo.
pub struct FileBacking {
    root: PathBuf,
    files: Mutex<HashMap<u64, PathBuf>>,
    next: AtomicU64,
}

impl FileBacking {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            files: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
        }
    }

    /// Associate a relative file name with a fresh opaque handle.
    pub fn register(&self, name: &str) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        let path = self.root.join(name.trim_start_matches('/'));
        self.files.lock().unwrap().insert(handle, path);
        handle
    }

    fn path_of(&self, handle: u64) -> Option<PathBuf> {
        self.files.lock().unwrap().get(&handle).cloned()
    }
}

#[async_trait]
impl BackingStore for FileBacking {
    async fn read_at(&self, handle: u64, pos: u64, buf: &mut [u8]) -> IoResult {
        let Some(path) = self.path_of(handle) else {
            return IoResult::failed();
        };
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            // nothing written yet: end-of-data right away
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return IoResult::ok(0),
            Err(e) => {
                warn!("backing read open {:?} failed: {e}", path);
                return IoResult::failed();
            }
        };
        if let Err(e) = file.seek(SeekFrom::Start(pos)).await {
            warn!("backing read seek {:?} failed: {e}", path);
            return IoResult::failed();
        }
        let mut total = 0usize;
        while total < buf.len() {
            match file.read(&mut buf[total..]).await {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => {
                    warn!("backing read {:?} failed: {e}", path);
                    return IoResult::failed();
                }
            }
        }
        IoResult::ok(total)
    }

    async fn write_at(&self, handle: u64, pos: u64, data: &[u8]) -> IoResult {
        let Some(path) = self.path_of(handle) else {
            return IoResult::failed();
        };
        if let Some(dir) = path.parent()
            && let Err(e) = tokio::fs::create_dir_all(dir).await
        {
            warn!("backing write mkdir {:?} failed: {e}", dir);
            return IoResult::failed();
        }
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                warn!("backing write open {:?} failed: {e}", path);
                return IoResult::failed();
            }
        };
        if let Err(e) = file.seek(SeekFrom::Start(pos)).await {
            warn!("backing write seek {:?} failed: {e}", path);
            return IoResult::failed();
        }
        match file.write_all(data).await {
            Ok(()) => match file.flush().await {
                Ok(()) => IoResult::ok(data.len()),
                Err(e) => {
                    warn!("backing write flush {:?} failed: {e}", path);
                    IoResult::failed()
                }
            },
            Err(e) => {
                warn!("backing write {:?} failed: {e}", path);
                IoResult::failed()
            }
        }
    }
}
