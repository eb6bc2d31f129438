//! Pull-based query operators. Every operator follows the same contract:
//! `open` once, then repeatedly call `next` until it returns `Ok(None)`,
//! optionally `rewind` to restart, then drop. All leaf access goes through
//! the `BufferPool`.

use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::fields::FieldVal;
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};

/// Sentinel group-field index meaning "aggregate without grouping".
pub const NO_GROUPING: usize = usize::MAX;

pub trait Operator {
    fn open(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<Option<Tuple>>;
    fn rewind(&mut self) -> Result<()>;
    fn tuple_desc(&self) -> &TupleDesc;
}

/// Leaf operator: pulls every tuple of one table, renaming its fields to
/// `"alias.fieldName"`.
pub struct SeqScan<'a> {
    bp: &'a BufferPool,
    catalog: &'a Catalog,
    tid: TransactionId,
    table_id: u32,
    desc: TupleDesc,
    cursor: Option<SeqScanCursor>,
}

struct SeqScanCursor {
    num_pages: usize,
    page_idx: usize,
    current_page_tuples: Vec<Tuple>,
    tuple_idx: usize,
}

impl<'a> SeqScan<'a> {
    pub fn new(
        bp: &'a BufferPool,
        catalog: &'a Catalog,
        tid: TransactionId,
        table_id: u32,
        alias: &str,
    ) -> Result<Self> {
        let raw = catalog.get_tuple_desc(table_id)?;
        let renamed_names: Vec<String> = (0..raw.get_num_fields())
            .map(|i| format!("{}.{}", alias, raw.get_field_name(i).cloned().unwrap_or_default()))
            .collect();
        let types: Vec<_> = (0..raw.get_num_fields())
            .map(|i| *raw.get_field_type(i).unwrap())
            .collect();
        let desc = TupleDesc::new(types, renamed_names);
        Ok(SeqScan {
            bp,
            catalog,
            tid,
            table_id,
            desc,
            cursor: None,
        })
    }
}

impl<'a> Operator for SeqScan<'a> {
    fn open(&mut self) -> Result<()> {
        let table = self.catalog.get_table_from_id(self.table_id)?;
        let num_pages = table.num_pages()?;
        self.cursor = Some(SeqScanCursor {
            num_pages,
            page_idx: 0,
            current_page_tuples: Vec::new(),
            tuple_idx: 0,
        });
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            {
                let cursor = self.cursor.as_ref().expect("open() must be called first");
                if cursor.tuple_idx < cursor.current_page_tuples.len() {
                    let t = cursor.current_page_tuples[cursor.tuple_idx].clone();
                    self.cursor.as_mut().unwrap().tuple_idx += 1;
                    let renamed = Tuple::new(t.get_fields().to_vec(), &self.desc);
                    return Ok(Some(renamed));
                }
            }
            let (page_idx, num_pages) = {
                let cursor = self.cursor.as_ref().unwrap();
                (cursor.page_idx, cursor.num_pages)
            };
            if page_idx >= num_pages {
                return Ok(None);
            }
            let pid = crate::heap_page::HeapPageId::new(self.table_id, page_idx);
            let page = self
                .bp
                .get_page(self.catalog, self.tid, pid, crate::heap_page::Permission::Read)?;
            let tuples: Vec<Tuple> = page.read().unwrap().iter().cloned().collect();
            let cursor = self.cursor.as_mut().unwrap();
            cursor.current_page_tuples = tuples;
            cursor.tuple_idx = 0;
            cursor.page_idx += 1;
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.open()
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

pub struct FilterPredicate {
    pub field_index: usize,
    pub op: CmpOp,
    pub constant: FieldVal,
}

impl FilterPredicate {
    fn matches(&self, tuple: &Tuple) -> bool {
        let field = match tuple.get_field(self.field_index) {
            Some(f) => f,
            None => return false,
        };
        match (field, &self.constant) {
            (FieldVal::IntField(a), FieldVal::IntField(b)) => {
                let (a, b) = (a.get_value(), b.get_value());
                match self.op {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                    CmpOp::Like => false,
                }
            }
            (FieldVal::StringField(a), FieldVal::StringField(b)) => {
                let (a, b) = (a.get_value(), b.get_value());
                match self.op {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                    CmpOp::Like => a.contains(&b),
                }
            }
            _ => false,
        }
    }
}

/// Re-yields child tuples matching `predicate`.
pub struct Filter<O: Operator> {
    predicate: FilterPredicate,
    child: O,
}

impl<O: Operator> Filter<O> {
    pub fn new(predicate: FilterPredicate, child: O) -> Self {
        Filter { predicate, child }
    }
}

impl<O: Operator> Operator for Filter<O> {
    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        while let Some(t) = self.child.next()? {
            if self.predicate.matches(&t) {
                return Ok(Some(t));
            }
        }
        Ok(None)
    }

    fn rewind(&mut self) -> Result<()> {
        self.child.rewind()
    }

    fn tuple_desc(&self) -> &TupleDesc {
        self.child.tuple_desc()
    }
}

pub struct JoinPredicate {
    pub left_field: usize,
    pub right_field: usize,
    pub op: CmpOp,
}

/// Nested-loop join: for each left tuple, rewinds and scans all of right.
pub struct Join<L: Operator, R: Operator> {
    predicate: JoinPredicate,
    left: L,
    right: R,
    desc: TupleDesc,
    current_left: Option<Tuple>,
}

impl<L: Operator, R: Operator> Join<L, R> {
    pub fn new(predicate: JoinPredicate, left: L, right: R) -> Self {
        let desc = TupleDesc::combine(left.tuple_desc(), right.tuple_desc());
        Join {
            predicate,
            left,
            right,
            desc,
            current_left: None,
        }
    }

    fn matches(&self, l: &Tuple, r: &Tuple) -> bool {
        let lf = l.get_field(self.predicate.left_field);
        let rf = r.get_field(self.predicate.right_field);
        match (lf, rf) {
            (Some(FieldVal::IntField(a)), Some(FieldVal::IntField(b))) => {
                let (a, b) = (a.get_value(), b.get_value());
                match self.predicate.op {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                    CmpOp::Like => false,
                }
            }
            (Some(FieldVal::StringField(a)), Some(FieldVal::StringField(b))) => {
                let (a, b) = (a.get_value(), b.get_value());
                match self.predicate.op {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                    CmpOp::Like => a.contains(&b),
                }
            }
            _ => false,
        }
    }
}

impl<L: Operator, R: Operator> Operator for Join<L, R> {
    fn open(&mut self) -> Result<()> {
        self.left.open()?;
        self.right.open()?;
        self.current_left = self.left.next()?;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            let left = match &self.current_left {
                Some(t) => t.clone(),
                None => return Ok(None),
            };
            while let Some(right) = self.right.next()? {
                if self.matches(&left, &right) {
                    let fields: Vec<_> = left
                        .get_fields()
                        .iter()
                        .cloned()
                        .chain(right.get_fields().iter().cloned())
                        .collect();
                    return Ok(Some(Tuple::new(fields, &self.desc)));
                }
            }
            self.right.rewind()?;
            self.current_left = self.left.next()?;
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.left.rewind()?;
        self.right.rewind()?;
        self.current_left = self.left.next()?;
        Ok(())
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

#[derive(Default, Clone, Copy)]
struct IntAcc {
    min: Option<i32>,
    max: Option<i32>,
    sum: i64,
    count: i64,
}

impl IntAcc {
    fn merge(&mut self, v: i32) {
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
        self.sum += v as i64;
        self.count += 1;
    }

    fn result(&self, op: AggOp) -> i32 {
        match op {
            AggOp::Min => self.min.unwrap_or_default(),
            AggOp::Max => self.max.unwrap_or_default(),
            AggOp::Sum => self.sum as i32,
            AggOp::Avg => (self.sum / self.count.max(1)) as i32,
            AggOp::Count => self.count as i32,
        }
    }
}

/// Fully drains its child on `open`, grouping by `group_field` (or
/// `NO_GROUPING`) and aggregating `agg_field` with `op`.
pub struct Aggregate<O: Operator> {
    child: O,
    agg_field: usize,
    group_field: usize,
    op: AggOp,
    desc: TupleDesc,
    groups: Vec<(Option<FieldVal>, IntAcc)>,
    cursor: usize,
}

impl<O: Operator> Aggregate<O> {
    pub fn new(child: O, agg_field: usize, group_field: usize, op: AggOp) -> Result<Self> {
        let child_desc = child.tuple_desc();
        if let Some(ty) = child_desc.get_field_type(agg_field) {
            if *ty == crate::types::Type::StringType && op != AggOp::Count {
                return Err(Error::UnsupportedAggregation);
            }
        }
        let desc = if group_field == NO_GROUPING {
            TupleDesc::new(vec![crate::types::Type::IntType], vec!["aggregate".to_string()])
        } else {
            let gtype = *child_desc.get_field_type(group_field).ok_or(Error::NoSuchField(
                "group field index out of range".to_string(),
            ))?;
            TupleDesc::new(
                vec![gtype, crate::types::Type::IntType],
                vec!["group".to_string(), "aggregate".to_string()],
            )
        };
        Ok(Aggregate {
            child,
            agg_field,
            group_field,
            op,
            desc,
            groups: Vec::new(),
            cursor: 0,
        })
    }
}

impl<O: Operator> Operator for Aggregate<O> {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        let mut groups: Vec<(Option<FieldVal>, IntAcc)> = Vec::new();
        while let Some(t) = self.child.next()? {
            let key = if self.group_field == NO_GROUPING {
                None
            } else {
                t.get_field(self.group_field).cloned()
            };
            let value = match t.get_field(self.agg_field) {
                Some(FieldVal::IntField(f)) => f.get_value(),
                _ => 0,
            };
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, acc)) => acc.merge(value),
                None => {
                    let mut acc = IntAcc::default();
                    acc.merge(value);
                    groups.push((key, acc));
                }
            }
        }
        self.groups = groups;
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.cursor >= self.groups.len() {
            return Ok(None);
        }
        let (key, acc) = &self.groups[self.cursor];
        self.cursor += 1;
        let agg_value = FieldVal::IntField(crate::fields::IntField::new(acc.result(self.op)));
        let fields = match key {
            Some(k) => vec![k.clone(), agg_value],
            None => vec![agg_value],
        };
        Ok(Some(Tuple::new(fields, &self.desc)))
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}

/// One-shot: on its first `next`, drains `child` into `BufferPool::insert_tuple`
/// and returns a single `(count)` tuple; every call after that returns `None`.
pub struct Insert<'a, O: Operator> {
    bp: &'a BufferPool,
    catalog: &'a Catalog,
    tid: TransactionId,
    table_id: u32,
    child: O,
    desc: TupleDesc,
    done: bool,
}

impl<'a, O: Operator> Insert<'a, O> {
    pub fn new(
        bp: &'a BufferPool,
        catalog: &'a Catalog,
        tid: TransactionId,
        table_id: u32,
        child: O,
    ) -> Result<Self> {
        let target = catalog.get_tuple_desc(table_id)?;
        if *child.tuple_desc() != target {
            return Err(Error::SchemaMismatch);
        }
        Ok(Insert {
            bp,
            catalog,
            tid,
            table_id,
            child,
            desc: TupleDesc::new(vec![crate::types::Type::IntType], vec!["count".to_string()]),
            done: false,
        })
    }
}

impl<'a, O: Operator> Operator for Insert<'a, O> {
    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut count = 0i32;
        while let Some(t) = self.child.next()? {
            self.bp
                .insert_tuple(self.catalog, self.tid, self.table_id, t)?;
            count += 1;
        }
        Ok(Some(Tuple::new(
            vec![FieldVal::IntField(crate::fields::IntField::new(count))],
            &self.desc,
        )))
    }

    fn rewind(&mut self) -> Result<()> {
        Err(Error::NoMoreTuples)
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}

/// One-shot delete, symmetric to `Insert`.
pub struct Delete<'a, O: Operator> {
    bp: &'a BufferPool,
    catalog: &'a Catalog,
    tid: TransactionId,
    child: O,
    desc: TupleDesc,
    done: bool,
}

impl<'a, O: Operator> Delete<'a, O> {
    pub fn new(bp: &'a BufferPool, catalog: &'a Catalog, tid: TransactionId, child: O) -> Self {
        Delete {
            bp,
            catalog,
            tid,
            child,
            desc: TupleDesc::new(vec![crate::types::Type::IntType], vec!["count".to_string()]),
            done: false,
        }
    }
}

impl<'a, O: Operator> Operator for Delete<'a, O> {
    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut count = 0i32;
        while let Some(t) = self.child.next()? {
            self.bp.delete_tuple(self.catalog, self.tid, &t)?;
            count += 1;
        }
        Ok(Some(Tuple::new(
            vec![FieldVal::IntField(crate::fields::IntField::new(count))],
            &self.desc,
        )))
    }

    fn rewind(&mut self) -> Result<()> {
        Err(Error::NoMoreTuples)
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}

/// Drains an operator into a `Vec`, for tests and simple callers.
pub fn collect_all(op: &mut dyn Operator) -> Result<Vec<Tuple>> {
    op.open()?;
    let mut out = Vec::new();
    while let Some(t) = op.next()? {
        out.push(t);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::fields::{IntField, StringField};
    use crate::types::Type;
    use std::io::Write as _;

    fn setup(dir: &tempfile::TempDir, name: &str) -> (Database, u32, TupleDesc) {
        let db = Database::new();
        let data_path = dir.path().join(format!("{}.dat", name));
        let schema_path = dir.path().join(format!("{}_schema.txt", name));
        let mut f = File::create(&schema_path).unwrap();
        writeln!(f, "{} {} (id int, label string)", data_path.display(), name).unwrap();
        db.get_catalog()
            .load_schema(schema_path.to_str().unwrap())
            .unwrap();
        let table_id = db.get_catalog().get_table_id(name).unwrap();
        let td = db.get_catalog().get_tuple_desc(table_id).unwrap();
        (db, table_id, td)
    }

    use std::fs::File;

    #[test]
    fn insert_then_scan_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (db, table_id, td) = setup(&dir, "t1");
        let tid = TransactionId::new();

        let values = Tuple::new(
            vec![
                FieldVal::IntField(IntField::new(1)),
                FieldVal::StringField(StringField::new("a".to_string(), 1)),
            ],
            &td,
        );
        struct OneShot(Option<Tuple>, TupleDesc);
        impl Operator for OneShot {
            fn open(&mut self) -> Result<()> {
                Ok(())
            }
            fn next(&mut self) -> Result<Option<Tuple>> {
                Ok(self.0.take())
            }
            fn rewind(&mut self) -> Result<()> {
                Ok(())
            }
            fn tuple_desc(&self) -> &TupleDesc {
                &self.1
            }
        }
        let mut insert = Insert::new(
            db.get_buffer_pool(),
            db.get_catalog(),
            tid,
            table_id,
            OneShot(Some(values), td.clone()),
        )
        .unwrap();
        let result = collect_all(&mut insert).unwrap();
        assert_eq!(result.len(), 1);

        let mut scan =
            SeqScan::new(db.get_buffer_pool(), db.get_catalog(), tid, table_id, "t1").unwrap();
        let scanned = collect_all(&mut scan).unwrap();
        assert_eq!(scanned.len(), 1);
    }

    #[test]
    fn aggregate_count_groups_by_first_field() {
        let dir = tempfile::tempdir().unwrap();
        let (db, table_id, td) = setup(&dir, "t2");
        let tid = TransactionId::new();

        for (i, label) in [(1, "a"), (1, "b"), (2, "c")] {
            let t = Tuple::new(
                vec![
                    FieldVal::IntField(IntField::new(i)),
                    FieldVal::StringField(StringField::new(label.to_string(), label.len() as u32)),
                ],
                &td,
            );
            db.get_buffer_pool()
                .insert_tuple(db.get_catalog(), tid, table_id, t)
                .unwrap();
        }

        let scan = SeqScan::new(db.get_buffer_pool(), db.get_catalog(), tid, table_id, "t2").unwrap();
        let mut agg = Aggregate::new(scan, 1, 0, AggOp::Count).unwrap();
        let mut rows = collect_all(&mut agg).unwrap();
        rows.sort_by_key(|t| match t.get_field(0) {
            Some(FieldVal::IntField(f)) => f.get_value(),
            _ => 0,
        });
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn string_aggregate_rejects_non_count() {
        let dir = tempfile::tempdir().unwrap();
        let (db, table_id, td) = setup(&dir, "t3");
        let tid = TransactionId::new();
        let scan = SeqScan::new(db.get_buffer_pool(), db.get_catalog(), tid, table_id, "t3").unwrap();
        let err = Aggregate::new(scan, 1, NO_GROUPING, AggOp::Sum);
        assert!(matches!(err, Err(Error::UnsupportedAggregation)));
    }
}
