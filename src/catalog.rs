use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::heap_file::HeapFile;
use crate::tuple::TupleDesc;
use crate::types::Type;

/// Process-wide registry of tables: name/id -> (HeapFile, schema, primary key).
pub struct Catalog {
    tables: RwLock<HashMap<String, Arc<HeapFile>>>,
    table_ids: RwLock<HashMap<u32, Arc<HeapFile>>>,
    primary_keys: RwLock<HashMap<u32, Option<String>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog {
            tables: RwLock::new(HashMap::new()),
            table_ids: RwLock::new(HashMap::new()),
            primary_keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_table(&self, file: HeapFile, name: String, primary_key: Option<String>) {
        let file_id = file.get_id();
        let file = Arc::new(file);
        self.tables.write().unwrap().insert(name, Arc::clone(&file));
        self.table_ids.write().unwrap().insert(file_id, file);
        self.primary_keys.write().unwrap().insert(file_id, primary_key);
    }

    pub fn get_table_id(&self, name: &str) -> Result<u32> {
        self.tables
            .read()
            .unwrap()
            .get(name)
            .map(|t| t.get_id())
            .ok_or_else(|| Error::NoSuchTable(name.to_string()))
    }

    pub fn get_table_from_name(&self, name: &str) -> Result<Arc<HeapFile>> {
        self.tables
            .read()
            .unwrap()
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| Error::NoSuchTable(name.to_string()))
    }

    pub fn get_table_from_id(&self, id: u32) -> Result<Arc<HeapFile>> {
        self.table_ids
            .read()
            .unwrap()
            .get(&id)
            .map(Arc::clone)
            .ok_or_else(|| Error::NoSuchTable(format!("table id {}", id)))
    }

    pub fn get_tuple_desc(&self, table_id: u32) -> Result<TupleDesc> {
        self.get_table_from_id(table_id)
            .map(|t| t.get_tuple_desc().clone())
    }

    pub fn get_primary_key(&self, table_id: u32) -> Option<String> {
        self.primary_keys
            .read()
            .unwrap()
            .get(&table_id)
            .cloned()
            .flatten()
    }

    /// Loads table definitions from a text ingest file. Each non-comment,
    /// non-blank line has the form:
    ///
    ///   path tableName (colName colType, colName colType pk, ...)
    ///
    /// `colType` is `int` or `string`; at most one column per table may carry
    /// the trailing `pk` marker. Lines starting with `#` are comments.
    pub fn load_schema(&self, schema_file_path: &str) -> Result<()> {
        let schema_file = File::open(schema_file_path)?;
        let reader = BufReader::new(schema_file);
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.load_line(line)?;
        }
        Ok(())
    }

    fn load_line(&self, line: &str) -> Result<()> {
        let open_paren = line
            .find('(')
            .ok_or_else(|| Error::CatalogParse(format!("missing '(' in line {:?}", line)))?;
        let close_paren = line
            .rfind(')')
            .ok_or_else(|| Error::CatalogParse(format!("missing ')' in line {:?}", line)))?;

        let head: Vec<&str> = line[..open_paren].split_whitespace().collect();
        if head.len() != 2 {
            return Err(Error::CatalogParse(format!(
                "expected 'path tableName (...)' in line {:?}",
                line
            )));
        }
        let path = head[0];
        let table_name = head[1].to_string();

        let mut field_types = vec![];
        let mut field_names = vec![];
        let mut primary_key = None;

        for col in line[open_paren + 1..close_paren].split(',') {
            let col = col.trim();
            if col.is_empty() {
                continue;
            }
            let parts: Vec<&str> = col.split_whitespace().collect();
            if parts.len() < 2 {
                return Err(Error::CatalogParse(format!(
                    "expected 'name type [pk]' in column spec {:?}",
                    col
                )));
            }
            let name = parts[0].to_string();
            let ty = Type::from_name(parts[1])
                .ok_or_else(|| Error::CatalogParse(format!("unknown type {:?}", parts[1])))?;
            if parts.len() > 2 && parts[2] == "pk" {
                primary_key = Some(name.clone());
            }
            field_names.push(name);
            field_types.push(ty);
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let heap_file = HeapFile::new(file, TupleDesc::new(field_types, field_names), Path::new(path))?;
        self.add_table(heap_file, table_name, primary_key);
        Ok(())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn parses_ingest_grammar_with_pk_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("employees.dat");
        let schema_path = dir.path().join("schemas.txt");
        let mut schema_file = File::create(&schema_path).unwrap();
        writeln!(schema_file, "# a comment line").unwrap();
        writeln!(
            schema_file,
            "{} employees (id int pk, name string)",
            data_path.display()
        )
        .unwrap();

        let catalog = Catalog::new();
        catalog.load_schema(schema_path.to_str().unwrap()).unwrap();

        let id = catalog.get_table_id("employees").unwrap();
        let td = catalog.get_tuple_desc(id).unwrap();
        assert_eq!(td.get_num_fields(), 2);
        assert_eq!(catalog.get_primary_key(id), Some("id".to_string()));
    }

    #[test]
    fn missing_table_is_an_error() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.get_table_id("nope"),
            Err(Error::NoSuchTable(_))
        ));
    }
}
