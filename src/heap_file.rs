use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use crate::buffer_pool::{BufferPool, PAGE_SIZE};
use crate::catalog::Catalog;
use crate::error::Result;
use crate::heap_page::{HeapPage, HeapPageId, Permission};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};

/// Table stored as a sequence of fixed-size pages in a single file.
pub struct HeapFile {
    file: Mutex<File>,
    td: TupleDesc,
    id: u32,
}

impl HeapFile {
    /// `id` is a deterministic hash of `path`'s canonical form, so re-opening
    /// the same file always yields the same table id (a random UUID, as the
    /// original prototype used, would not survive a process restart).
    pub fn new(file: File, td: TupleDesc, path: &Path) -> Result<Self> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        let id = hasher.finish() as u32;

        Ok(HeapFile {
            file: Mutex::new(file),
            td,
            id,
        })
    }

    pub fn get_id(&self) -> u32 {
        self.id
    }

    pub fn get_tuple_desc(&self) -> &TupleDesc {
        &self.td
    }

    /// Reads the page at `pid`, growing the file with zeroed pages first if
    /// `pid` is beyond the current end of file.
    pub fn read_page(&self, pid: &HeapPageId) -> Result<HeapPage> {
        if pid.get_table_id() != self.id {
            return Err(crate::error::Error::BadTable(*pid));
        }
        let mut data = vec![0; PAGE_SIZE];
        let mut file = self.file.lock().unwrap();
        let mut num_pages = (file.metadata()?.len() as f64 / PAGE_SIZE as f64).ceil() as usize;
        let page_no = pid.get_page_number();
        while num_pages <= page_no {
            file.seek(SeekFrom::Start((num_pages * PAGE_SIZE) as u64))?;
            file.write_all(&data)?;
            num_pages += 1;
        }

        file.seek(SeekFrom::Start((page_no * PAGE_SIZE) as u64))?;
        file.read_exact(&mut data)?;
        HeapPage::new(*pid, data, self.td.clone())
    }

    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let pid = page.get_id();
        let data = page.get_page_data();
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((pid.get_page_number() * PAGE_SIZE) as u64))?;
        file.write_all(&data)?;
        Ok(())
    }

    pub fn num_pages(&self) -> Result<usize> {
        let file = self.file.lock().unwrap();
        Ok((file.metadata()?.len() as f64 / PAGE_SIZE as f64).ceil() as usize)
    }

    /// Scans pages from 0 upward for the first with a free slot, appending a
    /// fresh page if none has room, and inserts `tuple` there.
    pub fn add_tuple(
        &self,
        bp: &BufferPool,
        catalog: &Catalog,
        tid: TransactionId,
        tuple: Tuple,
    ) -> Result<()> {
        let table_id = self.get_id();
        let mut page_no = 0;
        loop {
            let pid = HeapPageId::new(table_id, page_no);
            let page = bp.get_page(catalog, tid, pid, Permission::Read)?;
            let has_room = page.read().unwrap().get_num_empty_slots() > 0;
            if has_room {
                let page = bp.get_page(catalog, tid, pid, Permission::Write)?;
                let mut page = page.write().unwrap();
                page.add_tuple(tuple)?;
                page.mark_dirty(true, tid);
                return Ok(());
            }
            page_no += 1;
        }
    }

    pub fn delete_tuple(
        &self,
        bp: &BufferPool,
        catalog: &Catalog,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<()> {
        let pid = tuple.get_record_id().get_page_id();
        let page = bp.get_page(catalog, tid, pid, Permission::Write)?;
        let mut page = page.write().unwrap();
        page.delete_tuple(tuple)?;
        page.mark_dirty(true, tid);
        Ok(())
    }

    /// Lazily iterates all pages (and thus all tuples) of the file, fetching
    /// each page through the buffer pool.
    pub fn iter<'a>(
        &'a self,
        bp: &'a BufferPool,
        catalog: &'a Catalog,
        tid: TransactionId,
    ) -> HeapFileIterator<'a> {
        HeapFileIterator {
            heap_file: self,
            bp,
            catalog,
            current_page_index: 0,
            tid,
        }
    }
}

pub struct HeapFileIterator<'a> {
    heap_file: &'a HeapFile,
    bp: &'a BufferPool,
    catalog: &'a Catalog,
    current_page_index: usize,
    tid: TransactionId,
}

impl<'a> Iterator for HeapFileIterator<'a> {
    type Item = Result<Arc<RwLock<HeapPage>>>;

    fn next(&mut self) -> Option<Self::Item> {
        let num_pages = match self.heap_file.num_pages() {
            Ok(n) => n,
            Err(e) => return Some(Err(e)),
        };
        if self.current_page_index >= num_pages {
            return None;
        }
        let pid = HeapPageId::new(self.heap_file.get_id(), self.current_page_index);
        self.current_page_index += 1;
        Some(
            self.bp
                .get_page(self.catalog, self.tid, pid, Permission::Read),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn id_is_deterministic_for_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.dat");
        let td = TupleDesc::new(vec![Type::IntType], vec!["a".to_string()]);

        let open = || {
            std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)
                .unwrap()
        };
        let f1 = HeapFile::new(open(), td.clone(), &path).unwrap();
        let f2 = HeapFile::new(open(), td, &path).unwrap();
        assert_eq!(f1.get_id(), f2.get_id());
    }

    #[test]
    fn grows_file_when_reading_past_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("y.dat");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let td = TupleDesc::new(vec![Type::IntType], vec!["a".to_string()]);
        let hf = HeapFile::new(file, td, &path).unwrap();
        hf.read_page(&HeapPageId::new(hf.get_id(), 2)).unwrap();
        assert_eq!(hf.num_pages().unwrap(), 3);
    }
}
