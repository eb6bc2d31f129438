use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, warn};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::heap_page::{HeapPage, HeapPageId, Permission};
use crate::lock_manager::LockManager;
use crate::transaction::TransactionId;
use crate::tuple::Tuple;

pub const PAGE_SIZE: usize = 4096;
pub const DEFAULT_PAGES: usize = 50;

const NIL: usize = usize::MAX;

/// One slot in the LRU arena. `prev`/`next` are indices into `CacheInner::nodes`
/// rather than raw pointers, so the cache never needs unsafe self-referential
/// structures.
struct Node {
    pid: HeapPageId,
    page: Arc<RwLock<HeapPage>>,
    prev: usize,
    next: usize,
}

/// Intrusive doubly linked list over an arena of `Node`s. `head` is the most
/// recently used entry, `tail` the least recently used (the next eviction
/// candidate).
struct CacheInner {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<HeapPageId, usize>,
    head: usize,
    tail: usize,
}

impl CacheInner {
    fn new() -> Self {
        CacheInner {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().unwrap();
            (node.prev, node.next)
        };
        if prev != NIL {
            self.nodes[prev].as_mut().unwrap().next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].as_mut().unwrap().prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.nodes[idx].as_mut().unwrap();
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.nodes[old_head].as_mut().unwrap().prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn get(&mut self, pid: &HeapPageId) -> Option<Arc<RwLock<HeapPage>>> {
        let idx = *self.index.get(pid)?;
        self.touch(idx);
        Some(Arc::clone(&self.nodes[idx].as_ref().unwrap().page))
    }

    fn insert(&mut self, pid: HeapPageId, page: Arc<RwLock<HeapPage>>) {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(Node {
                    pid,
                    page,
                    prev: NIL,
                    next: NIL,
                });
                idx
            }
            None => {
                self.nodes.push(Some(Node {
                    pid,
                    page,
                    prev: NIL,
                    next: NIL,
                }));
                self.nodes.len() - 1
            }
        };
        self.index.insert(pid, idx);
        self.push_front(idx);
    }

    fn remove(&mut self, pid: &HeapPageId) {
        if let Some(idx) = self.index.remove(pid) {
            self.unlink(idx);
            self.nodes[idx] = None;
            self.free.push(idx);
        }
    }

    /// Scans tail-to-head for the first clean page and evicts it. NO-STEAL:
    /// dirty pages are never evicted, since they must stay available for
    /// abort to discard.
    fn evict_clean(&mut self) -> Option<HeapPageId> {
        let mut cur = self.tail;
        while cur != NIL {
            let (pid, is_clean) = {
                let node = self.nodes[cur].as_ref().unwrap();
                (node.pid, node.page.read().unwrap().is_dirty().is_none())
            };
            if is_clean {
                self.remove(&pid);
                return Some(pid);
            }
            cur = self.nodes[cur].as_ref().unwrap().prev;
        }
        None
    }
}

/// Fixed-capacity cache of pages kept in memory, mediating every page read
/// and write. Eviction is LRU among clean pages only (NO-STEAL): a dirty page
/// is flushed at commit or discarded at abort, never written out early.
pub struct BufferPool {
    cache: RwLock<CacheInner>,
    lock_manager: LockManager,
    num_pages: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PAGES)
    }

    pub fn with_capacity(num_pages: usize) -> Self {
        Self::with_config(num_pages, crate::lock_manager::DEFAULT_BACKOFF_MS)
    }

    pub fn with_config(num_pages: usize, lock_backoff_ms: u64) -> Self {
        BufferPool {
            cache: RwLock::new(CacheInner::new()),
            num_pages,
            lock_manager: LockManager::with_backoff(lock_backoff_ms),
        }
    }

    /// Retrieves the specified page from cache or disk, acquiring the
    /// necessary lock first.
    pub fn get_page(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        pid: HeapPageId,
        perm: Permission,
    ) -> Result<Arc<RwLock<HeapPage>>> {
        self.lock_manager.acquire_lock(tid, pid, perm)?;

        if let Some(page) = self.cache.write().unwrap().get(&pid) {
            return Ok(page);
        }

        let table = catalog.get_table_from_id(pid.get_table_id())?;
        let page = table.read_page(&pid)?;
        let page = Arc::new(RwLock::new(page));

        let mut cache = self.cache.write().unwrap();
        if cache.len() >= self.num_pages && !cache.index.contains_key(&pid) {
            match cache.evict_clean() {
                Some(evicted) => debug!("evicted page {:?} from buffer pool", evicted),
                None => return Err(Error::NoEvictionCandidate),
            }
        }
        cache.insert(pid, Arc::clone(&page));
        Ok(page)
    }

    /// Flushes every dirty page the transaction holds, then releases its
    /// locks. The flushed pages' before-images are updated so a later abort
    /// (of a different transaction re-using the same cached page) can't roll
    /// back past this commit.
    pub fn commit_transaction(&self, catalog: &Catalog, tid: TransactionId) -> Result<()> {
        let locked_pages = self.lock_manager.get_locked_pages(tid);
        for pid in locked_pages {
            let cached = self.cache.write().unwrap().get(&pid);
            if let Some(page) = cached {
                let mut page = page.write().unwrap();
                if page.is_dirty().is_some() {
                    let table = catalog.get_table_from_id(pid.get_table_id())?;
                    table.write_page(&page)?;
                    page.mark_dirty(false, tid);
                    page.set_before_image();
                }
            }
        }
        self.lock_manager.release_all_locks(tid);
        Ok(())
    }

    /// Discards the transaction's in-memory changes by replacing any cached
    /// dirty page it touched with its before-image, then releases its locks.
    pub fn abort_transaction(&self, tid: TransactionId) -> Result<()> {
        let locked_pages = self.lock_manager.get_locked_pages(tid);
        for pid in locked_pages {
            let cached = self.cache.write().unwrap().get(&pid);
            if let Some(page) = cached {
                let mut page = page.write().unwrap();
                if page.is_dirty().is_some() {
                    *page = page.get_before_image()?;
                    page.mark_dirty(false, tid);
                }
            }
        }
        self.lock_manager.release_all_locks(tid);
        warn!("transaction {:?} aborted", tid);
        Ok(())
    }

    pub fn insert_tuple(
        &self,
        catalog: &Catalog,
        tid: TransactionId,
        table_id: u32,
        tuple: Tuple,
    ) -> Result<()> {
        let table = catalog.get_table_from_id(table_id)?;
        table.add_tuple(self, catalog, tid, tuple)
    }

    pub fn delete_tuple(&self, catalog: &Catalog, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let table_id = tuple.get_record_id().get_page_id().get_table_id();
        let table = catalog.get_table_from_id(table_id)?;
        table.delete_tuple(self, catalog, tid, tuple)
    }

    pub fn get_num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn release_lock(&self, tid: TransactionId, pid: HeapPageId) {
        self.lock_manager.release_lock(tid, pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: HeapPageId) -> Option<Permission> {
        self.lock_manager.holds_lock(tid, pid)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap_file::HeapFile;
    use crate::tuple::TupleDesc;
    use crate::types::Type;

    fn desc() -> TupleDesc {
        TupleDesc::new(vec![Type::IntType], vec!["a".to_string()])
    }

    #[test]
    fn eviction_respects_capacity_and_skips_dirty_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.dat");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let heap_file = HeapFile::new(file, desc(), &path).unwrap();
        let catalog = Catalog::new();
        catalog.add_table(heap_file, "t".to_string(), None);
        let table_id = catalog.get_table_id("t").unwrap();

        let bp = BufferPool::with_capacity(2);
        let tid = TransactionId::new();
        for i in 0..3 {
            let pid = HeapPageId::new(table_id, i);
            bp.get_page(&catalog, tid, pid, Permission::Read).unwrap();
        }
        assert_eq!(bp.cache.read().unwrap().len(), 2);
        bp.commit_transaction(&catalog, tid).unwrap();
    }
}
