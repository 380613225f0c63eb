//! The cache proper: a write-back/read-through store keyed by file identity.
//!
//! Each open identity owns a sparse map of fixed-size pages plus the logical
//! size. Reads are served from pages; misses are fetched from the backing
//! store in bounded chunks and populate pages read-modify-write style, so a
//! present page is always fully valid. Writes land in pages and are marked
//! dirty; dirty runs are pushed back on flush/close, clipped to the logical
//! size. Per-identity I/O is linearized by one async lock per entry, so
//! concurrent writers never interleave at the byte level.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::Mutex as AsyncMutex;

use crate::cache::backing::{BackingStore, IoStatus};
use crate::cache::caps::{CacheCaps, FlushMode, PurgeMode, ResizeCaps, RwCaps};
use crate::error::CacheError;

/// Page and transfer-chunk geometry.
#[derive(Clone, Copy, Debug)]
pub struct CacheLayout {
    /// Fixed page granularity of the cache store.
    pub page_size: u32,
    /// Upper bound for one backing-store transfer.
    pub transfer_chunk: u32,
}

impl Default for CacheLayout {
    fn default() -> Self {
        Self { page_size: 64 * 1024, transfer_chunk: 1024 * 1024 }
    }
}

struct Page {
    data: Vec<u8>,
    dirty: bool,
}

impl Page {
    fn zeroed(page_size: u64) -> Self {
        Self { data: vec![0u8; page_size as usize], dirty: false }
    }
}

struct Entry {
    /// Opaque handle passed back to the backing-store contracts.
    handle: u64,
    /// Logical size; authoritative while the identity is open.
    size: u64,
    pages: BTreeMap<u64, Page>,
}

/// Result of a cache read: `data` may be shorter than requested when the
/// transfer degraded (`complete == false`) or at end-of-file.
#[derive(Debug)]
pub struct ReadOutcome {
    pub data: Vec<u8>,
    pub complete: bool,
}

/// Result of a cache write.
#[derive(Debug)]
pub struct WriteOutcome {
    pub bytes: usize,
    pub complete: bool,
}

enum FetchOutcome {
    Complete,
    /// Only this many leading pages of the run were stored.
    Short { pages: u64 },
}

pub struct FileCache<B: BackingStore> {
    backing: B,
    caps: CacheCaps,
    layout: CacheLayout,
    entries: Mutex<HashMap<String, Arc<AsyncMutex<Entry>>>>,
}

impl<B: BackingStore> FileCache<B> {
    pub fn new(backing: B, caps: CacheCaps) -> Self {
        Self::with_layout(backing, caps, CacheLayout::default())
    }

    pub fn with_layout(backing: B, caps: CacheCaps, layout: CacheLayout) -> Self {
        Self { backing, caps, layout, entries: Mutex::new(HashMap::new()) }
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    fn page_size(&self) -> u64 {
        self.layout.page_size as u64
    }

    /// One transfer worth of bytes, rounded down to a page multiple.
    fn chunk_bytes(&self) -> u64 {
        let ps = self.page_size();
        (self.layout.transfer_chunk as u64 / ps).max(1) * ps
    }

    fn entry(&self, identity: &str) -> Result<Arc<AsyncMutex<Entry>>, CacheError> {
        self.entries
            .lock()
            .unwrap()
            .get(identity)
            .cloned()
            .ok_or(CacheError::NotFound)
    }

    /// Register `identity` with the cache. Re-registering an already open
    /// identity keeps the existing state. `prefetch` is advisory: up to that
    /// many leading bytes are fetched eagerly, degradation is ignored.
    pub async fn file_open(&self, identity: &str, known_size: u64, prefetch: u64, handle: u64) {
        let entry = {
            let mut entries = self.entries.lock().unwrap();
            entries
                .entry(identity.to_string())
                .or_insert_with(|| {
                    Arc::new(AsyncMutex::new(Entry {
                        handle,
                        size: known_size,
                        pages: BTreeMap::new(),
                    }))
                })
                .clone()
        };
        if prefetch > 0 {
            let mut e = entry.lock().await;
            let end = e.size.min(prefetch);
            if end > 0
                && let Err(err) = self.ensure_cached(&mut e, 0, end).await
            {
                debug!("prefetch for {identity} abandoned: {err}");
            }
        }
    }

    /// Serve a read from the cache, fetching misses from the backing store.
    /// Reads clamp at the logical size; zero bytes at or past it is EOF.
    pub async fn read(
        &self,
        identity: &str,
        offset: u64,
        len: usize,
    ) -> Result<ReadOutcome, CacheError> {
        let entry = self.entry(identity)?;
        let mut e = entry.lock().await;
        if len == 0 || offset >= e.size {
            return Ok(ReadOutcome { data: Vec::new(), complete: true });
        }
        let end = e.size.min(offset.saturating_add(len as u64));
        let valid_up_to = self.ensure_cached(&mut e, offset, end).await?;
        let upto = valid_up_to.min(end);
        if upto <= offset {
            return Err(CacheError::FileFailure);
        }
        let mut out = vec![0u8; (upto - offset) as usize];
        Self::copy_from_pages(&e, self.page_size(), offset, &mut out);
        let complete = upto >= end;
        if !complete {
            debug!("short read for {identity}: {} of {} bytes", out.len(), end - offset);
        }
        Ok(ReadOutcome { data: out, complete })
    }

    /// Buffer a write. Data lands in dirty pages and is pushed to the
    /// backing store on flush/close, not synchronously. Grows the logical
    /// size to cover the written range.
    pub async fn write(
        &self,
        identity: &str,
        offset: u64,
        data: &[u8],
    ) -> Result<WriteOutcome, CacheError> {
        if data.is_empty() {
            self.entry(identity)?;
            return Ok(WriteOutcome { bytes: 0, complete: true });
        }
        let entry = self.entry(identity)?;
        let mut e = entry.lock().await;
        let ps = self.page_size();
        let end = offset + data.len() as u64;

        // Boundary pages that are only partially overwritten and overlap
        // existing content must be filled from the backing store first so
        // the page stays fully valid.
        let first_idx = offset / ps;
        let last_idx = (end - 1) / ps;
        let mut boundary = vec![first_idx];
        if last_idx != first_idx {
            boundary.push(last_idx);
        }
        for idx in boundary {
            let page_start = idx * ps;
            let page_end = page_start + ps;
            let fully_covered = offset <= page_start && end >= page_end;
            if fully_covered || e.pages.contains_key(&idx) || page_start >= e.size {
                continue;
            }
            let fill_end = e.size.min(page_end);
            match self.ensure_cached(&mut e, page_start, fill_end).await {
                Ok(v) if v >= fill_end => {}
                Ok(_) => return Err(CacheError::FileFailure),
                Err(err) => return Err(err),
            }
        }

        let mut done = 0usize;
        let mut off = offset;
        while done < data.len() {
            let idx = off / ps;
            let in_page = (off % ps) as usize;
            let take = (data.len() - done).min(ps as usize - in_page);
            let page = e.pages.entry(idx).or_insert_with(|| Page::zeroed(ps));
            page.data[in_page..in_page + take].copy_from_slice(&data[done..done + take]);
            page.dirty = true;
            done += take;
            off += take as u64;
        }
        if end > e.size {
            e.size = end;
        }
        Ok(WriteOutcome { bytes: data.len(), complete: true })
    }

    /// Adjust the logical size in the cache's bookkeeping. With `flush` set
    /// the pending state up to the new size is pushed to the backing store
    /// synchronously; otherwise the backing store is not touched.
    pub async fn set_size(
        &self,
        identity: &str,
        new_size: u64,
        flush: bool,
    ) -> Result<(), CacheError> {
        let entry = self.entry(identity)?;
        let mut e = entry.lock().await;
        if new_size > e.size && !self.caps.resize.contains(ResizeCaps::GROW_TO_ANY) {
            return Err(CacheError::Unsupported);
        }
        if new_size < e.size {
            let can_shrink = self.caps.resize.contains(ResizeCaps::SHRINK_TO_ANY)
                || (new_size == 0 && self.caps.resize.contains(ResizeCaps::TRUNCATE_AT_ZERO));
            if !can_shrink {
                return Err(CacheError::Unsupported);
            }
            let ps = self.page_size();
            let boundary = new_size.div_ceil(ps);
            e.pages.retain(|idx, _| *idx < boundary);
            // zero the tail of the boundary page so a later re-extension
            // reads zeros
            if new_size % ps != 0
                && let Some(p) = e.pages.get_mut(&(new_size / ps))
            {
                p.data[(new_size % ps) as usize..].fill(0);
            }
        }
        e.size = new_size;
        if flush {
            self.flush_entry(&mut e).await?;
        }
        Ok(())
    }

    /// Push pending writes for one identity without closing it.
    pub async fn flush(&self, identity: &str) -> Result<(), CacheError> {
        let entry = self.entry(identity)?;
        let mut e = entry.lock().await;
        self.flush_entry(&mut e).await
    }

    /// Close one identity. With `FlushMode::Immediate` the flush completes
    /// before this returns, so the caller can safely close its own backing
    /// handle afterwards. On flush failure the entry is retained for retry.
    pub async fn file_close(
        &self,
        identity: &str,
        flush: FlushMode,
        purge: PurgeMode,
    ) -> Result<(), CacheError> {
        let entry = self.entry(identity)?;
        {
            let mut e = entry.lock().await;
            if flush == FlushMode::Immediate {
                self.flush_entry(&mut e).await?;
            }
            if purge == PurgeMode::All {
                e.pages.clear();
            }
        }
        self.entries.lock().unwrap().remove(identity);
        debug!("cache entry {identity} closed");
        Ok(())
    }

    /// Relabel an entry in place; an existing entry under `new` is deleted
    /// first. No page data moves.
    pub fn rename(&self, old: &str, new: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.remove(old).ok_or(CacheError::NotFound)?;
        if entries.insert(new.to_string(), entry).is_some() {
            debug!("cache entry {new} replaced by rename");
        }
        Ok(())
    }

    /// Drop an entry without flushing (the file is going away).
    pub fn delete(&self, identity: &str) -> bool {
        self.entries.lock().unwrap().remove(identity).is_some()
    }

    pub fn exists(&self, identity: &str) -> bool {
        self.entries.lock().unwrap().contains_key(identity)
    }

    /// Logical size as tracked by the cache, if the identity is open.
    pub async fn size_of(&self, identity: &str) -> Option<u64> {
        let entry = self.entry(identity).ok()?;
        let e = entry.lock().await;
        Some(e.size)
    }

    /// Flush and close every entry (the unmount path).
    pub async fn close_cache(&self, flush: FlushMode, purge: PurgeMode) -> Result<(), CacheError> {
        let identities: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        let mut first_err = None;
        for identity in identities {
            match self.file_close(&identity, flush, purge).await {
                Ok(()) | Err(CacheError::NotFound) => {}
                Err(e) => {
                    warn!("closing cache entry {identity} failed: {e}");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Make every page covering `[start, end)` present, fetching missing
    /// runs from the backing store. Returns the absolute offset up to which
    /// the range is serviceable (== `end` when nothing degraded).
    async fn ensure_cached(
        &self,
        e: &mut Entry,
        start: u64,
        end: u64,
    ) -> Result<u64, CacheError> {
        let ps = self.page_size();
        let first = start / ps;
        let last = end.div_ceil(ps);
        let mut progressed = false;
        let mut pi = first;
        while pi < last {
            if e.pages.contains_key(&pi) {
                pi += 1;
                continue;
            }
            let run_start = pi;
            let mut run_end = pi + 1;
            while run_end < last && !e.pages.contains_key(&run_end) {
                run_end += 1;
            }
            match self.fetch_run(e, run_start, run_end, &mut progressed).await {
                Ok(FetchOutcome::Complete) => pi = run_end,
                Ok(FetchOutcome::Short { pages }) => return Ok((run_start + pages) * ps),
                Err(CacheError::FileFailure) if run_start > first => {
                    // a serviceable prefix exists; report a partial transfer
                    return Ok(run_start * ps);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(end)
    }

    /// Fetch one run of missing pages `[run_start, run_end)` in bounded
    /// chunks. A short `Ok` transfer is end-of-data: the rest of the run is
    /// a hole and is zero-filled. `Partial`/`Failed` degrade per the
    /// transfer contract; `progressed` tracks backing success across runs.
    async fn fetch_run(
        &self,
        e: &mut Entry,
        run_start: u64,
        run_end: u64,
        progressed: &mut bool,
    ) -> Result<FetchOutcome, CacheError> {
        let ps = self.page_size();
        let run_pos = run_start * ps;
        let end = run_end * ps;
        // without random positioning the store only reads from the front
        let mut cur = if self.caps.read.contains(RwCaps::POS_RANDOM) { run_pos } else { 0 };
        let chunk = self.chunk_bytes();
        let mut stored = 0u64;

        while cur < end {
            let take = chunk.min(end - cur) as usize;
            let mut tmp = vec![0u8; take];
            let r = self.backing.read_at(e.handle, cur, &mut tmp).await;
            match r.status {
                IoStatus::Canceled => return Err(CacheError::Canceled),
                IoStatus::Failed => {
                    if *progressed {
                        warn!("backing read failed mid-transfer at {cur}");
                        return Ok(FetchOutcome::Short { pages: stored });
                    }
                    return Err(CacheError::FileFailure);
                }
                IoStatus::Ok | IoStatus::Partial => {
                    let n = r.bytes.min(take);
                    if n > 0 {
                        *progressed = true;
                    }
                    let full = n as u64 / ps;
                    for i in 0..full {
                        let idx = cur / ps + i;
                        if !e.pages.contains_key(&idx) {
                            let off = (i * ps) as usize;
                            e.pages.insert(
                                idx,
                                Page { data: tmp[off..off + ps as usize].to_vec(), dirty: false },
                            );
                            if idx >= run_start {
                                stored += 1;
                            }
                        }
                    }
                    if r.status == IoStatus::Ok && n < take {
                        // end-of-data: the partial tail is valid (zeros
                        // follow), and every remaining missing page of the
                        // run is a zero hole
                        let rem = n - (full as usize * ps as usize);
                        if rem > 0 {
                            let idx = cur / ps + full;
                            e.pages.entry(idx).or_insert_with(|| {
                                let mut data = vec![0u8; ps as usize];
                                let off = (full * ps) as usize;
                                data[..rem].copy_from_slice(&tmp[off..off + rem]);
                                Page { data, dirty: false }
                            });
                        }
                        for idx in run_start..run_end {
                            e.pages.entry(idx).or_insert_with(|| Page::zeroed(ps));
                        }
                        return Ok(FetchOutcome::Complete);
                    }
                    if r.status == IoStatus::Partial && n < take {
                        warn!("partial backing read at {cur}: {n} of {take} bytes");
                        return Ok(FetchOutcome::Short { pages: stored });
                    }
                    cur += take as u64;
                }
            }
        }
        Ok(FetchOutcome::Complete)
    }

    /// Push every dirty run to the backing store, clipped to the logical
    /// size, then mark it clean. A degraded write-back leaves the affected
    /// run dirty for retry and reports a failure.
    async fn flush_entry(&self, e: &mut Entry) -> Result<(), CacheError> {
        let ps = self.page_size();
        let dirty: Vec<u64> = e
            .pages
            .iter()
            .filter(|(_, p)| p.dirty)
            .map(|(idx, _)| *idx)
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }

        let runs: Vec<(u64, u64)> = if self.caps.write.contains(RwCaps::POS_RANDOM) {
            // group consecutive dirty pages
            let mut runs = Vec::new();
            let mut start = dirty[0];
            let mut prev = dirty[0];
            for &idx in &dirty[1..] {
                if idx != prev + 1 {
                    runs.push((start, prev + 1));
                    start = idx;
                }
                prev = idx;
            }
            runs.push((start, prev + 1));
            runs
        } else {
            // the store only writes from the front: push the whole image
            let fill_end = e.size;
            if self.ensure_cached(e, 0, fill_end).await? < fill_end {
                return Err(CacheError::FileFailure);
            }
            vec![(0, fill_end.div_ceil(ps))]
        };

        for (run_start, run_end) in runs {
            let pos = run_start * ps;
            // a store that cannot take arbitrary sizes gets whole pages,
            // zero-padded past the logical size
            let limit = if self.caps.write.contains(RwCaps::SIZE_ANY) {
                e.size.min(run_end * ps)
            } else {
                run_end * ps
            };
            if pos >= limit {
                // nothing of this run is below the logical size
                for idx in run_start..run_end {
                    if let Some(p) = e.pages.get_mut(&idx) {
                        p.dirty = false;
                    }
                }
                continue;
            }
            let mut buf = vec![0u8; (limit - pos) as usize];
            Self::copy_from_pages(e, ps, pos, &mut buf);

            let chunk = self.chunk_bytes() as usize;
            let mut written = 0usize;
            while written < buf.len() {
                let take = chunk.min(buf.len() - written);
                let w = self
                    .backing
                    .write_at(e.handle, pos + written as u64, &buf[written..written + take])
                    .await;
                match w.status {
                    IoStatus::Canceled => return Err(CacheError::Canceled),
                    IoStatus::Failed => {
                        warn!("write-back failed at {}", pos + written as u64);
                        return Err(CacheError::FileFailure);
                    }
                    IoStatus::Ok | IoStatus::Partial => {
                        if w.bytes < take {
                            warn!(
                                "short write-back at {}: {} of {take} bytes",
                                pos + written as u64,
                                w.bytes
                            );
                            return Err(CacheError::FileFailure);
                        }
                        written += take;
                    }
                }
            }
            for idx in run_start..run_end {
                if let Some(p) = e.pages.get_mut(&idx) {
                    p.dirty = false;
                }
            }
        }
        Ok(())
    }

    fn copy_from_pages(e: &Entry, ps: u64, offset: u64, out: &mut [u8]) {
        let mut done = 0usize;
        let mut off = offset;
        while done < out.len() {
            let idx = off / ps;
            let in_page = (off % ps) as usize;
            let take = (out.len() - done).min(ps as usize - in_page);
            if let Some(page) = e.pages.get(&idx) {
                out[done..done + take].copy_from_slice(&page.data[in_page..in_page + take]);
            } else {
                out[done..done + take].fill(0);
            }
            done += take;
            off += take as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backing::IoResult;
    use crate::cache::caps::PREFETCH_NOTHING;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// What one scripted transfer should do.
    #[derive(Clone, Copy)]
    enum Plan {
        Pass,
        Short(usize),
        Cancel,
        Fail,
    }

    /// Backing store over one in-memory byte vector per handle, with an
    /// optional per-call script for the read/write side.
    #[derive(Default)]
    struct TestStore {
        content: Mutex<HashMap<u64, Vec<u8>>>,
        read_plan: Mutex<VecDeque<Plan>>,
        write_plan: Mutex<VecDeque<Plan>>,
        reads: AtomicUsize,
        writes: AtomicUsize,
        read_positions: Mutex<Vec<u64>>,
    }

    impl TestStore {
        fn seed(&self, handle: u64, data: &[u8]) {
            self.content.lock().unwrap().insert(handle, data.to_vec());
        }

        fn bytes(&self, handle: u64) -> Vec<u8> {
            self.content.lock().unwrap().get(&handle).cloned().unwrap_or_default()
        }

        fn plan_reads(&self, plans: &[Plan]) {
            self.read_plan.lock().unwrap().extend(plans.iter().copied());
        }

        fn plan_writes(&self, plans: &[Plan]) {
            self.write_plan.lock().unwrap().extend(plans.iter().copied());
        }
    }

    #[async_trait]
    impl BackingStore for TestStore {
        async fn read_at(&self, handle: u64, pos: u64, buf: &mut [u8]) -> IoResult {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.read_positions.lock().unwrap().push(pos);
            let plan = self.read_plan.lock().unwrap().pop_front().unwrap_or(Plan::Pass);
            let data = self.bytes(handle);
            let avail = data.len().saturating_sub(pos as usize).min(buf.len());
            buf[..avail].copy_from_slice(&data[pos as usize..pos as usize + avail]);
            match plan {
                Plan::Pass => IoResult::ok(avail),
                Plan::Short(n) => IoResult::partial(n.min(avail)),
                Plan::Cancel => IoResult::canceled(),
                Plan::Fail => IoResult::failed(),
            }
        }

        async fn write_at(&self, handle: u64, pos: u64, data: &[u8]) -> IoResult {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let plan = self.write_plan.lock().unwrap().pop_front().unwrap_or(Plan::Pass);
            match plan {
                Plan::Cancel => return IoResult::canceled(),
                Plan::Fail => return IoResult::failed(),
                Plan::Short(n) => {
                    let n = n.min(data.len());
                    let mut content = self.content.lock().unwrap();
                    let file = content.entry(handle).or_default();
                    let end = pos as usize + n;
                    if file.len() < end {
                        file.resize(end, 0);
                    }
                    file[pos as usize..end].copy_from_slice(&data[..n]);
                    IoResult::partial(n)
                }
                Plan::Pass => {
                    let mut content = self.content.lock().unwrap();
                    let file = content.entry(handle).or_default();
                    let end = pos as usize + data.len();
                    if file.len() < end {
                        file.resize(end, 0);
                    }
                    file[pos as usize..end].copy_from_slice(data);
                    IoResult::ok(data.len())
                }
            }
        }
    }

    fn small_layout() -> CacheLayout {
        CacheLayout { page_size: 8, transfer_chunk: 16 }
    }

    fn cache(store: TestStore) -> FileCache<TestStore> {
        FileCache::with_layout(store, CacheCaps::default(), small_layout())
    }

    #[tokio::test]
    async fn read_through_then_hits_pages() {
        let store = TestStore::default();
        store.seed(7, b"0123456789abcdef");
        let c = cache(store);
        c.file_open("/f", 16, PREFETCH_NOTHING, 7).await;

        let out = c.read("/f", 2, 10).await.unwrap();
        assert!(out.complete);
        assert_eq!(out.data, b"23456789ab");

        let before = c.backing().reads.load(Ordering::SeqCst);
        let again = c.read("/f", 2, 10).await.unwrap();
        assert_eq!(again.data, b"23456789ab");
        assert_eq!(c.backing().reads.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn read_clamps_at_logical_size() {
        let store = TestStore::default();
        store.seed(1, b"abcdef");
        let c = cache(store);
        c.file_open("/f", 6, 0, 1).await;

        let out = c.read("/f", 0, 100).await.unwrap();
        assert_eq!(out.data, b"abcdef");
        assert!(out.complete);
        let eof = c.read("/f", 6, 10).await.unwrap();
        assert!(eof.data.is_empty() && eof.complete);
    }

    #[tokio::test]
    async fn partial_on_later_chunk_yields_cumulative_count() {
        let store = TestStore::default();
        store.seed(1, &[9u8; 64]);
        // chunk is 16 bytes: first chunk passes, second degrades at 8 bytes
        store.plan_reads(&[Plan::Pass, Plan::Short(8)]);
        let c = cache(store);
        c.file_open("/f", 64, 0, 1).await;

        let out = c.read("/f", 0, 48).await.unwrap();
        assert!(!out.complete);
        assert_eq!(out.data.len(), 24);
        assert!(out.data.iter().all(|&b| b == 9));
    }

    #[tokio::test]
    async fn failure_on_first_chunk_is_file_failure() {
        let store = TestStore::default();
        store.seed(1, &[1u8; 32]);
        store.plan_reads(&[Plan::Fail]);
        let c = cache(store);
        c.file_open("/f", 32, 0, 1).await;

        assert_eq!(c.read("/f", 0, 32).await.err(), Some(CacheError::FileFailure));
    }

    #[tokio::test]
    async fn failure_after_success_is_partial_not_failure() {
        let store = TestStore::default();
        store.seed(1, &[3u8; 64]);
        store.plan_reads(&[Plan::Pass, Plan::Fail]);
        let c = cache(store);
        c.file_open("/f", 64, 0, 1).await;

        let out = c.read("/f", 0, 48).await.unwrap();
        assert!(!out.complete);
        assert_eq!(out.data.len(), 16);
    }

    #[tokio::test]
    async fn canceled_yields_no_data() {
        let store = TestStore::default();
        store.seed(1, &[1u8; 32]);
        store.plan_reads(&[Plan::Cancel]);
        let c = cache(store);
        c.file_open("/f", 32, 0, 1).await;

        assert_eq!(c.read("/f", 0, 32).await.err(), Some(CacheError::Canceled));
    }

    #[tokio::test]
    async fn writes_defer_until_close_then_flush() {
        let store = TestStore::default();
        let c = cache(store);
        c.file_open("/f", 0, 0, 5).await;

        let w = c.write("/f", 0, b"hello world").await.unwrap();
        assert_eq!(w.bytes, 11);
        assert_eq!(c.backing().writes.load(Ordering::SeqCst), 0);
        assert_eq!(c.size_of("/f").await, Some(11));

        c.file_close("/f", FlushMode::Immediate, PurgeMode::None).await.unwrap();
        assert_eq!(c.backing().bytes(5), b"hello world");
        assert!(!c.exists("/f"));
        assert_eq!(c.file_close("/f", FlushMode::Immediate, PurgeMode::None).await.err(),
            Some(CacheError::NotFound));
    }

    #[tokio::test]
    async fn boundary_write_preserves_backing_bytes() {
        let store = TestStore::default();
        store.seed(2, &[b'A'; 24]);
        let c = cache(store);
        c.file_open("/f", 24, 0, 2).await;

        // touches the middle of page 1 only: read-modify-write fill
        c.write("/f", 9, b"xy").await.unwrap();
        c.file_close("/f", FlushMode::Immediate, PurgeMode::None).await.unwrap();

        let mut expect = vec![b'A'; 24];
        expect[9] = b'x';
        expect[10] = b'y';
        assert_eq!(c.backing().bytes(2), expect);
    }

    #[tokio::test]
    async fn sparse_gap_reads_zeros() {
        let store = TestStore::default();
        store.seed(1, b"seed");
        let c = cache(store);
        c.file_open("/f", 4, 0, 1).await;

        // write far past the end: the gap is a hole
        c.write("/f", 30, b"Z").await.unwrap();
        assert_eq!(c.size_of("/f").await, Some(31));

        let out = c.read("/f", 0, 31).await.unwrap();
        assert!(out.complete);
        assert_eq!(&out.data[..4], b"seed");
        assert!(out.data[4..30].iter().all(|&b| b == 0));
        assert_eq!(out.data[30], b'Z');
    }

    #[tokio::test]
    async fn shrink_then_grow_reads_zeros() {
        let store = TestStore::default();
        let c = cache(store);
        c.file_open("/f", 0, 0, 1).await;
        c.write("/f", 0, b"abcdef").await.unwrap();

        c.set_size("/f", 3, false).await.unwrap();
        assert_eq!(c.size_of("/f").await, Some(3));
        c.set_size("/f", 6, false).await.unwrap();

        let out = c.read("/f", 0, 6).await.unwrap();
        assert_eq!(out.data, b"abc\0\0\0");
    }

    #[tokio::test]
    async fn flush_clips_to_logical_size() {
        let store = TestStore::default();
        let c = cache(store);
        c.file_open("/f", 0, 0, 1).await;
        c.write("/f", 0, &[7u8; 20]).await.unwrap();
        c.set_size("/f", 5, false).await.unwrap();

        c.flush("/f").await.unwrap();
        assert_eq!(c.backing().bytes(1), [7u8; 5]);
    }

    #[tokio::test]
    async fn rename_relabels_in_place_and_overwrites() {
        let store = TestStore::default();
        let c = cache(store);
        c.file_open("/a", 10, 0, 1).await;
        c.file_open("/b", 99, 0, 2).await;

        c.rename("/a", "/b").unwrap();
        assert!(!c.exists("/a"));
        assert_eq!(c.size_of("/b").await, Some(10));
        assert_eq!(c.rename("/a", "/c").err(), Some(CacheError::NotFound));
    }

    #[tokio::test]
    async fn resize_capabilities_are_enforced() {
        let store = TestStore::default();
        let caps = CacheCaps {
            resize: ResizeCaps::GROW_TO_ANY | ResizeCaps::TRUNCATE_AT_ZERO,
            ..CacheCaps::default()
        };
        let c = FileCache::with_layout(store, caps, small_layout());
        c.file_open("/f", 10, 0, 1).await;

        assert_eq!(c.set_size("/f", 5, false).await.err(), Some(CacheError::Unsupported));
        c.set_size("/f", 0, false).await.unwrap();
        c.set_size("/f", 20, false).await.unwrap();
    }

    #[tokio::test]
    async fn non_random_position_reads_start_at_zero() {
        let store = TestStore::default();
        store.seed(1, &[5u8; 64]);
        let caps = CacheCaps {
            read: RwCaps::SIZE_ANY,
            ..CacheCaps::default()
        };
        let c = FileCache::with_layout(store, caps, small_layout());
        c.file_open("/f", 64, 0, 1).await;

        let out = c.read("/f", 40, 8).await.unwrap();
        assert!(out.complete);
        assert_eq!(out.data, [5u8; 8]);
        let positions = c.backing().read_positions.lock().unwrap().clone();
        assert_eq!(positions.first(), Some(&0));
    }

    #[tokio::test]
    async fn non_any_size_writes_flush_whole_pages() {
        let store = TestStore::default();
        let caps = CacheCaps {
            write: RwCaps::POS_RANDOM | RwCaps::WRITE_KEEPS_FILESIZE,
            ..CacheCaps::default()
        };
        let c = FileCache::with_layout(store, caps, small_layout());
        c.file_open("/f", 0, 0, 1).await;
        c.write("/f", 0, b"abc").await.unwrap();
        c.flush("/f").await.unwrap();

        // page-granular store: the flush pads the page with zeros
        let bytes = c.backing().bytes(1);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..3], b"abc");
        assert!(bytes[3..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn write_back_failure_keeps_entry_dirty() {
        let store = TestStore::default();
        let c = cache(store);
        c.file_open("/f", 0, 0, 1).await;
        c.write("/f", 0, b"data").await.unwrap();

        c.backing().plan_writes(&[Plan::Fail]);
        assert_eq!(c.flush("/f").await.err(), Some(CacheError::FileFailure));

        // retry succeeds and pushes the same bytes
        c.flush("/f").await.unwrap();
        assert_eq!(c.backing().bytes(1), b"data");
    }

    #[tokio::test]
    async fn close_cache_sweeps_all_entries() {
        let store = TestStore::default();
        let c = cache(store);
        c.file_open("/a", 0, 0, 1).await;
        c.file_open("/b", 0, 0, 2).await;
        c.write("/a", 0, b"one").await.unwrap();
        c.write("/b", 0, b"two").await.unwrap();

        c.close_cache(FlushMode::Immediate, PurgeMode::None).await.unwrap();
        assert!(!c.exists("/a") && !c.exists("/b"));
        assert_eq!(c.backing().bytes(1), b"one");
        assert_eq!(c.backing().bytes(2), b"two");
    }

    #[tokio::test]
    async fn prefetch_populates_leading_pages() {
        let store = TestStore::default();
        store.seed(1, &[4u8; 32]);
        let c = cache(store);
        c.file_open("/f", 32, 16, 1).await;

        let fetched = c.backing().reads.load(Ordering::SeqCst);
        assert!(fetched > 0);
        let out = c.read("/f", 0, 16).await.unwrap();
        assert_eq!(out.data, [4u8; 16]);
        // prefetched range is served without further backing reads
        assert_eq!(c.backing().reads.load(Ordering::SeqCst), fetched);
    }
}
