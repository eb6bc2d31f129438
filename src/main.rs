use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use heapdb::config::DbConfig;
use heapdb::database::Database;
use heapdb::error::{Error, Result};
use heapdb::fields::{FieldVal, IntField, StringField};
use heapdb::operator::{collect_all, Insert, Operator, SeqScan};
use heapdb::transaction::TransactionId;
use heapdb::tuple::Tuple;

/// An operator over an in-memory vector of rows, used to feed `Insert` from
/// data that didn't come from a scan.
struct RowSource {
    rows: Vec<Tuple>,
    cursor: usize,
    desc: heapdb::tuple::TupleDesc,
}

impl Operator for RowSource {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.cursor < self.rows.len() {
            let t = self.rows[self.cursor].clone();
            self.cursor += 1;
            Ok(Some(t))
        } else {
            Ok(None)
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn tuple_desc(&self) -> &heapdb::tuple::TupleDesc {
        &self.desc
    }
}

/// Inserts 3 tuples into `table_id` under a fresh transaction, retrying the
/// whole transaction if the lock manager reports a deadlock.
fn insert_three(db: &Database, table_id: u32) -> Result<()> {
    loop {
        let tid = TransactionId::new();
        let result = (|| -> Result<()> {
            let td = db.get_catalog().get_tuple_desc(table_id)?;
            let name = format!("Alice_{}", tid.get_tid());
            let rows: Vec<Tuple> = (0..3)
                .map(|i| {
                    Tuple::new(
                        vec![
                            FieldVal::IntField(IntField::new(i)),
                            FieldVal::StringField(StringField::new(name.clone(), 7)),
                        ],
                        &td,
                    )
                })
                .collect();
            let source = RowSource {
                rows,
                cursor: 0,
                desc: td,
            };
            let mut insert = Insert::new(db.get_buffer_pool(), db.get_catalog(), tid, table_id, source)?;
            collect_all(&mut insert)?;
            db.get_buffer_pool().commit_transaction(db.get_catalog(), tid)
        })();

        match result {
            Ok(()) => {
                info!("transaction {:?} committed", tid);
                return Ok(());
            }
            Err(Error::Deadlock(_)) | Err(Error::TransactionAborted(_)) => {
                db.get_buffer_pool().abort_transaction(tid)?;
                warn!("transaction {:?} aborted, retrying", tid);
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(e),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let config = DbConfig::load("heapdb.toml")?;
    let db = Database::with_config(config);

    let mut schema_file_path = std::env::current_dir()?;
    schema_file_path.push("schemas.txt");
    db.get_catalog()
        .load_schema(schema_file_path.to_str().unwrap())?;

    let table_id = db.get_catalog().get_table_id("employees")?;
    let db = Arc::new(db);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || -> Result<()> { insert_three(&db, table_id) })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread panicked")?;
    }

    let tid = TransactionId::new();
    let mut scan = SeqScan::new(db.get_buffer_pool(), db.get_catalog(), tid, table_id, "employees")?;
    let tuples = collect_all(&mut scan)?;
    for tuple in &tuples {
        println!("{}", tuple);
    }
    db.get_buffer_pool().commit_transaction(db.get_catalog(), tid)?;
    println!("tuple count: {}", tuples.len());

    Ok(())
}
