use crate::buffer_pool::PAGE_SIZE;
use crate::error::{Error, Result};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};

#[derive(Debug, PartialEq, Eq, Clone, Hash, Copy)]
pub enum Permission {
    Read,
    Write,
}

/// Identifies a page: the table it belongs to and its offset within that
/// table's file.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Copy)]
pub struct HeapPageId {
    table_id: u32,
    page_number: usize,
}

impl HeapPageId {
    pub fn new(table_id: u32, page_number: usize) -> Self {
        HeapPageId {
            table_id,
            page_number,
        }
    }

    pub fn get_table_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_page_number(&self) -> usize {
        self.page_number
    }
}

/// A page's bytes, decoded into a bitmap header plus fixed-width tuple
/// slots. Header bit i set means slot i holds a valid tuple.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct HeapPage {
    pid: HeapPageId,
    td: TupleDesc,
    header_size: usize,
    header: Vec<u8>,
    tuples: Vec<Tuple>,
    num_slots: usize,
    old_data: Vec<u8>,
    dirtied_by: Option<TransactionId>,
}

impl HeapPage {
    pub fn new(pid: HeapPageId, data: Vec<u8>, td: TupleDesc) -> Result<Self> {
        let num_slots = Self::compute_num_slots(&td);
        let old_data = data.clone();

        let header_size = (num_slots as f64 / 8.0).ceil() as usize;
        let header = data[..header_size].to_vec();

        let mut tuples = Vec::with_capacity(num_slots);
        for i in 0..num_slots {
            if Self::get_slot(&header, i) {
                let start = header_size + i * td.get_size();
                let end = start + td.get_size();
                let tuple_data = &data[start..end];
                let mut tuple = Tuple::deserialize(tuple_data, &td)?;
                tuple.set_record_id(crate::tuple::RecordId::new(pid, i));
                tuples.push(tuple);
            } else {
                tuples.push(Tuple::new(vec![], &td));
            }
        }

        Ok(HeapPage {
            pid,
            td,
            header_size,
            header,
            tuples,
            num_slots,
            old_data,
            dirtied_by: None,
        })
    }

    /// `floor(PAGE_SIZE * 8 / (rowWidth * 8 + 1))`, the number of fixed-size
    /// slots a page can hold for tuples of this schema.
    pub fn compute_num_slots(td: &TupleDesc) -> usize {
        (PAGE_SIZE * 8) / (td.get_size() * 8 + 1)
    }

    pub fn get_id(&self) -> HeapPageId {
        self.pid
    }

    pub fn get_before_image(&self) -> Result<HeapPage> {
        HeapPage::new(self.pid, self.old_data.clone(), self.td.clone())
    }

    pub fn set_before_image(&mut self) {
        self.old_data = self.get_page_data();
    }

    pub fn get_page_data(&self) -> Vec<u8> {
        let mut data = self.header.clone();
        for i in 0..self.num_slots {
            if Self::get_slot(&self.header, i) {
                data.extend(self.tuples[i].serialize());
            } else {
                data.extend(vec![0; self.td.get_size()]);
            }
        }
        data.extend(vec![0; PAGE_SIZE - data.len()]);
        data
    }

    fn get_slot(header: &[u8], i: usize) -> bool {
        let idx = i / 8;
        let bit = i % 8;
        if idx >= header.len() {
            return false;
        }
        header[idx] & (1 << bit) != 0
    }

    fn set_slot(header: &mut [u8], i: usize, value: bool) {
        let idx = i / 8;
        let bit = i % 8;
        if value {
            header[idx] |= 1 << bit;
        } else {
            header[idx] &= !(1 << bit);
        }
    }

    /// Inserts into the lowest-numbered free slot; assigns `t`'s RecordId.
    pub fn add_tuple(&mut self, mut t: Tuple) -> Result<()> {
        if *t.get_tuple_desc() != self.td {
            return Err(Error::SchemaMismatch);
        }
        for i in 0..self.num_slots {
            if !Self::get_slot(&self.header, i) {
                t.set_record_id(crate::tuple::RecordId::new(self.pid, i));
                self.tuples[i] = t;
                Self::set_slot(&mut self.header, i, true);
                return Ok(());
            }
        }
        Err(Error::NoSpace(self.pid))
    }

    pub fn delete_tuple(&mut self, t: &Tuple) -> Result<()> {
        let rid = t.get_record_id();
        let tuple_no = rid.get_tuple_no();
        if rid.get_page_id() != self.pid || !Self::get_slot(&self.header, tuple_no) {
            return Err(Error::NotOnPage(self.pid));
        }
        self.tuples[tuple_no] = Tuple::new(vec![], &self.td);
        Self::set_slot(&mut self.header, tuple_no, false);
        Ok(())
    }

    pub fn get_num_empty_slots(&self) -> usize {
        (0..self.num_slots)
            .filter(|&i| !Self::get_slot(&self.header, i))
            .count()
    }

    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirtied_by = if dirty { Some(tid) } else { None };
    }

    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    pub fn iter(&self) -> HeapPageIterator<'_> {
        HeapPageIterator {
            page: self,
            index: 0,
        }
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }
}

pub struct HeapPageIterator<'a> {
    page: &'a HeapPage,
    index: usize,
}

impl<'a> Iterator for HeapPageIterator<'a> {
    type Item = &'a Tuple;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.page.num_slots {
            let i = self.index;
            self.index += 1;
            if HeapPage::get_slot(&self.page.header, i) {
                return Some(&self.page.tuples[i]);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::TupleDesc;
    use crate::types::Type;

    fn int_string_desc() -> TupleDesc {
        TupleDesc::new(
            vec![Type::IntType, Type::StringType],
            vec!["a".to_string(), "b".to_string()],
        )
    }

    #[test]
    fn num_slots_matches_spec_math() {
        let td = int_string_desc();
        assert_eq!(td.get_size(), 136);
        assert_eq!(HeapPage::compute_num_slots(&td), 30);
    }

    #[test]
    fn new_page_has_no_tuples() {
        let td = int_string_desc();
        let pid = HeapPageId::new(1, 0);
        let page = HeapPage::new(pid, vec![0; PAGE_SIZE], td).unwrap();
        assert_eq!(page.get_num_empty_slots(), page.num_slots());
        assert_eq!(page.iter().count(), 0);
    }

    #[test]
    fn add_then_iterate_round_trips() {
        use crate::fields::{FieldVal, IntField, StringField};
        let td = int_string_desc();
        let pid = HeapPageId::new(1, 0);
        let mut page = HeapPage::new(pid, vec![0; PAGE_SIZE], td.clone()).unwrap();
        let t = Tuple::new(
            vec![
                FieldVal::IntField(IntField::new(7)),
                FieldVal::StringField(StringField::new("hi".to_string(), 2)),
            ],
            &td,
        );
        page.add_tuple(t).unwrap();
        assert_eq!(page.iter().count(), 1);
        assert_eq!(page.get_num_empty_slots(), page.num_slots() - 1);
    }

    #[test]
    fn page_data_round_trips_bytewise() {
        let td = int_string_desc();
        let pid = HeapPageId::new(1, 0);
        let page = HeapPage::new(pid, vec![0; PAGE_SIZE], td.clone()).unwrap();
        let bytes = page.get_page_data();
        let page2 = HeapPage::new(pid, bytes.clone(), td).unwrap();
        assert_eq!(page2.get_page_data(), bytes);
    }

    #[test]
    fn delete_clears_slot() {
        use crate::fields::{FieldVal, IntField, StringField};
        let td = int_string_desc();
        let pid = HeapPageId::new(1, 0);
        let mut page = HeapPage::new(pid, vec![0; PAGE_SIZE], td.clone()).unwrap();
        let t = Tuple::new(
            vec![
                FieldVal::IntField(IntField::new(1)),
                FieldVal::StringField(StringField::new("x".to_string(), 1)),
            ],
            &td,
        );
        page.add_tuple(t).unwrap();
        let stored = page.iter().next().unwrap().clone();
        page.delete_tuple(&stored).unwrap();
        assert_eq!(page.iter().count(), 0);
    }

    #[test]
    fn add_tuple_fails_when_full() {
        use crate::fields::{FieldVal, IntField, StringField};
        let td = int_string_desc();
        let pid = HeapPageId::new(1, 0);
        let mut page = HeapPage::new(pid, vec![0; PAGE_SIZE], td.clone()).unwrap();
        let slots = page.num_slots();
        for i in 0..slots {
            let t = Tuple::new(
                vec![
                    FieldVal::IntField(IntField::new(i as i32)),
                    FieldVal::StringField(StringField::new("x".to_string(), 1)),
                ],
                &td,
            );
            page.add_tuple(t).unwrap();
        }
        let overflow = Tuple::new(
            vec![
                FieldVal::IntField(IntField::new(999)),
                FieldVal::StringField(StringField::new("y".to_string(), 1)),
            ],
            &td,
        );
        assert!(matches!(page.add_tuple(overflow), Err(Error::NoSpace(_))));
    }
}
