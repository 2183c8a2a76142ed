use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::{ReckonError, Result};
use crate::statements::{SqlValue, StatementSet};

/// Execution seam between the reconciliation core and the backing store.
/// Statement sets are executed as one transaction: all statements in a
/// batch commit together or the whole write fails.
pub trait DbClient {
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>>;
    fn execute(&self, statements: &StatementSet) -> Result<()>;
}

pub struct SqliteClient {
    conn: Mutex<Connection>,
}

impl SqliteClient {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run DDL against the connection, for schema setup.
    pub fn execute_batch_sql(&self, sql: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ReckonError::Other("database connection lock poisoned".to_string()))
    }
}

fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(f) => SqlValue::Float(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(_) => {
            log::warn!("blob column read as NULL - blob values are not part of the record model");
            SqlValue::Null
        }
    }
}

impl DbClient for SqliteClient {
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(column_count);
            for i in 0..column_count {
                record.push(from_sqlite(row.get_ref(i)?));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn execute(&self, statements: &StatementSet) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (sql, batches) in statements.iter() {
            let mut stmt = tx.prepare(sql)?;
            for params in batches {
                stmt.execute(rusqlite::params_from_iter(params.iter()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
