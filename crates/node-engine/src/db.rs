//! Database collaborator
//!
//! `sqlite_select` and `sqlite_insert` nodes go through the [`Database`]
//! trait. Handles are
//! cached per file, so every node pointing at the same database shares one
//! connection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;

use node_vm::{Table, Value};

use crate::error::{NodeEngineError, Result};

/// Open database, as handed out by [`Database::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbHandle(pub u64);

/// Blocking database access; call it from `spawn_blocking`
pub trait Database: Send + Sync {
    /// Handle for `path` and whether it was already open
    fn open(&self, path: &Path) -> Result<(DbHandle, bool)>;

    /// Run a read query
    fn query(&self, handle: DbHandle, sql: &str) -> Result<Table>;

    /// Run a write statement with `params` bound in order; returns the
    /// number of changed rows
    fn execute(&self, handle: DbHandle, sql: &str, params: &[Value]) -> Result<usize>;

    fn close(&self, handle: DbHandle);
}

/// SQLite files through rusqlite
#[derive(Default)]
pub struct SqliteDatabase {
    paths: Mutex<HashMap<PathBuf, DbHandle>>,
    conns: Mutex<HashMap<DbHandle, Arc<Mutex<Connection>>>>,
    next: AtomicU64,
}

impl SqliteDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn conn(&self, handle: DbHandle) -> Result<Arc<Mutex<Connection>>> {
        self.conns
            .lock()
            .get(&handle)
            .cloned()
            .ok_or_else(|| NodeEngineError::Database(format!("handle {} is not open", handle.0)))
    }

    pub fn num_open(&self) -> usize {
        self.conns.lock().len()
    }
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Text(String::new()),
        ValueRef::Integer(n) => Value::Number(n as f64),
        ValueRef::Real(n) => Value::Number(n),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::blob(b.to_vec()),
    }
}

/// Whole numbers bind as integers so they land in INTEGER columns unchanged
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => SqlValue::Integer(*n as i64),
        Value::Number(n) => SqlValue::Real(*n),
        Value::Text(t) => SqlValue::Text(t.clone()),
        Value::Blob(b) => SqlValue::Blob(b.data().to_vec()),
        other => SqlValue::Text(other.as_text()),
    }
}

impl Database for SqliteDatabase {
    fn open(&self, path: &Path) -> Result<(DbHandle, bool)> {
        let mut paths = self.paths.lock();
        if let Some(handle) = paths.get(path) {
            return Ok((*handle, true));
        }
        if !path.exists() {
            return Err(NodeEngineError::Database(format!(
                "file({}) doesn't exist",
                path.display()
            )));
        }

        let conn = Connection::open(path)?;
        if let Err(e) = conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(())) {
            log::warn!("Can't enable WAL for {}: {}", path.display(), e);
        }
        let handle = DbHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.conns.lock().insert(handle, Arc::new(Mutex::new(conn)));
        paths.insert(path.to_path_buf(), handle);
        log::debug!("Opened database {}", path.display());
        Ok((handle, false))
    }

    fn query(&self, handle: DbHandle, sql: &str) -> Result<Table> {
        let conn = self.conn(handle)?;
        let conn = conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut table = Table::new(columns);
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(to_value(row.get_ref(i)?));
            }
            table.push_row(values);
        }
        Ok(table)
    }

    fn execute(&self, handle: DbHandle, sql: &str, params: &[Value]) -> Result<usize> {
        let conn = self.conn(handle)?;
        let conn = conn.lock();
        let changed = conn.execute(sql, rusqlite::params_from_iter(params.iter().map(to_sql)))?;
        Ok(changed)
    }

    fn close(&self, handle: DbHandle) {
        self.conns.lock().remove(&handle);
        self.paths.lock().retain(|_, h| *h != handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db(dir: &Path) -> PathBuf {
        let path = dir.join("people.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE people (name TEXT, age INTEGER, score REAL, note TEXT);
             INSERT INTO people VALUES ('ann', 31, 2.5, NULL);
             INSERT INTO people VALUES ('bob', 42, 1.0, 'x');",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_query_converts_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_db(dir.path());
        let db = SqliteDatabase::new();

        let (handle, already) = db.open(&path).unwrap();
        assert!(!already);
        let table = db
            .query(handle, "SELECT name, age, score, note FROM people ORDER BY age")
            .unwrap();

        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.get(0, "name"), Some(&Value::Text("ann".into())));
        assert_eq!(table.get(1, "age"), Some(&Value::Number(42.0)));
        assert_eq!(table.get(0, "score"), Some(&Value::Number(2.5)));
        assert_eq!(table.get(0, "note"), Some(&Value::Text(String::new())));
    }

    #[test]
    fn test_handles_are_cached_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_db(dir.path());
        let db = SqliteDatabase::new();

        let (first, _) = db.open(&path).unwrap();
        let (second, already) = db.open(&path).unwrap();
        assert_eq!(first, second);
        assert!(already);
        assert_eq!(db.num_open(), 1);

        db.close(first);
        assert_eq!(db.num_open(), 0);
        assert!(db.query(first, "SELECT 1").is_err());
    }

    #[test]
    fn test_missing_file_and_bad_sql() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::new();
        let err = db.open(&dir.path().join("none.sqlite")).unwrap_err();
        assert!(err.to_string().contains("doesn't exist"));

        let (handle, _) = db.open(&sample_db(dir.path())).unwrap();
        assert!(matches!(
            db.query(handle, "SELECT * FROM nope"),
            Err(NodeEngineError::Database(_))
        ));
    }

    #[test]
    fn test_execute_binds_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_db(dir.path());
        let db = SqliteDatabase::new();
        let (handle, _) = db.open(&path).unwrap();

        let changed = db
            .execute(
                handle,
                "INSERT INTO people(name, age, score) VALUES(?, ?, ?)",
                &[Value::Text("cid".into()), Value::Number(7.0), Value::Number(0.5)],
            )
            .unwrap();
        assert_eq!(changed, 1);

        let table = db
            .query(handle, "SELECT age, typeof(age) AS kind, score FROM people WHERE name = 'cid'")
            .unwrap();
        assert_eq!(table.get(0, "age"), Some(&Value::Number(7.0)));
        assert_eq!(table.get(0, "kind"), Some(&Value::Text("integer".into())));
        assert_eq!(table.get(0, "score"), Some(&Value::Number(0.5)));

        assert!(db.execute(handle, "INSERT INTO nope VALUES(?)", &[Value::Number(1.0)]).is_err());
    }
}
