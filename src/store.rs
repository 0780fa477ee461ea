use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Result};
use crate::logging::log_table_replaced;
use crate::table::{Cell, Table};

/// Relational store holding source and forecast tables, addressed by name.
pub struct TableStore {
    conn: Connection,
}

impl TableStore {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    /// Drop any table of the same name and write `table` in its place.
    pub fn replace_table(&mut self, table: &Table) -> Result<()> {
        let name = quote_ident(&table.name);
        let defs: Vec<String> = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{} {}", quote_ident(col), table.column_type(i).sql()))
            .collect();

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {name};
             CREATE TABLE {name} ({});",
            defs.join(", ")
        ))?;
        if !table.columns.is_empty() {
            let placeholders: Vec<String> =
                (1..=table.columns.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!("INSERT INTO {} VALUES ({})", name, placeholders.join(", "));
            let mut stmt = tx.prepare(&sql)?;
            for row in &table.rows {
                stmt.execute(params_from_iter(row.iter().map(to_sql_value)))?;
            }
        }
        tx.commit()?;
        log_table_replaced(&table.name, table.len());
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Read a whole table in insertion order.
    pub fn read_table(&self, name: &str) -> Result<Table> {
        if !self.table_exists(name)? {
            return Err(PipelineError::MissingTable(name.to_string()));
        }
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} ORDER BY rowid", quote_ident(name)))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(from_sql_ref))
                    .collect::<rusqlite::Result<Vec<Cell>>>()
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Table {
            name: name.to_string(),
            columns,
            rows,
        })
    }

    /// SHA-256 over the column names and every cell, for change detection.
    pub fn table_digest(&self, name: &str) -> Result<String> {
        Ok(digest_table(&self.read_table(name)?))
    }
}

pub fn digest_table(table: &Table) -> String {
    let mut hasher = Sha256::new();
    for col in &table.columns {
        hasher.update(col.as_bytes());
        hasher.update([0x1f]);
    }
    for row in &table.rows {
        hasher.update([0x1e]);
        for cell in row {
            match cell {
                Cell::Null => hasher.update([0u8]),
                Cell::Int(v) => {
                    hasher.update([1u8]);
                    hasher.update(v.to_le_bytes());
                }
                Cell::Real(v) => {
                    hasher.update([2u8]);
                    hasher.update(v.to_bits().to_le_bytes());
                }
                Cell::Text(s) => {
                    hasher.update([3u8]);
                    hasher.update(s.as_bytes());
                    hasher.update([0x1f]);
                }
            }
        }
    }
    hex::encode(hasher.finalize())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Int(v) => Value::Integer(*v),
        Cell::Real(v) if v.is_finite() => Value::Real(*v),
        Cell::Real(_) => Value::Null,
        Cell::Text(s) => Value::Text(s.clone()),
    }
}

fn from_sql_ref(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(v) => Cell::Int(v),
        ValueRef::Real(v) => Cell::Real(v),
        ValueRef::Text(t) => Cell::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Cell::Text(String::from_utf8_lossy(b).into_owned()),
    }
}
