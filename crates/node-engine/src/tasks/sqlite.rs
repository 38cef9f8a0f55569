//! SQLite nodes

use std::path::PathBuf;
use std::sync::Arc;

use node_vm::{Table, Value};

use crate::db::{Database, DbHandle};
use crate::error::NodeEngineError;
use crate::extensions::extension_keys;
use crate::registry::{ExecContext, ExecOutput, NodeType, TaskRegistry};
use crate::types::AttrUi;
use crate::Result;

use super::{switch, GROUP_SQLITE};

const DEFAULT_INSERT_VALUES: &str = r#"[{"column": "a", "value": "1"}, {"column": "b", "value": "2"}]"#;

pub fn register(registry: &mut TaskRegistry) {
    registry.register(
        NodeType::new("sqlite_select", GROUP_SQLITE)
            .attr_ui("file", "", AttrUi::widget("file"))
            .attr("query", "\"SELECT * FROM sqlite_master\"")
            .attr_ui("_out", "", AttrUi::widget("table").read_only())
            .attr_ui("_rows", "0", AttrUi::default().read_only())
            .with_callback(sqlite_select),
    );
    registry.register(
        NodeType::new("sqlite_insert", GROUP_SQLITE)
            .attr_ui("trigger", "0", switch())
            .attr_ui("file", "", AttrUi::widget("file"))
            .attr("table", "")
            .attr("values", DEFAULT_INSERT_VALUES)
            .with_callback(sqlite_insert),
    );
}

/// Open `file` off the runtime; a failure is an error of the `file` attribute
async fn open_db(db: &Arc<dyn Database>, file: &str) -> Result<std::result::Result<DbHandle, String>> {
    let db = Arc::clone(db);
    let path = PathBuf::from(file);
    match tokio::task::spawn_blocking(move || db.open(&path)).await {
        Ok(Ok((handle, _))) => Ok(Ok(handle)),
        Ok(Err(e)) => Ok(Err(e.to_string())),
        Err(e) => Err(NodeEngineError::failed(e.to_string())),
    }
}

async fn sqlite_select(ctx: ExecContext) -> Result<ExecOutput> {
    let out = ExecOutput::new();
    let file = ctx.text("file");
    let query = ctx.text("query");
    if file.is_empty() {
        return Ok(out.attr_error("file", "empty"));
    }
    if query.is_empty() {
        return Ok(out.attr_error("query", "empty"));
    }

    let db = Arc::clone(ctx.extension::<Arc<dyn Database>>(extension_keys::DATABASE)?);
    let handle = match open_db(&db, &file).await? {
        Ok(handle) => handle,
        Err(e) => return Ok(out.attr_error("file", e)),
    };

    let table = match tokio::task::spawn_blocking(move || db.query(handle, &query)).await {
        Ok(Ok(table)) => table,
        Ok(Err(e)) => return Ok(out.attr_error("query", format!("Query() failed: {}", e))),
        Err(e) => return Err(NodeEngineError::failed(e.to_string())),
    };

    let rows = table.num_rows() as f64;
    Ok(out
        .output("_out", Value::Table(table))
        .output("_rows", Value::Number(rows)))
}

/// `(column, value)` pairs from `{column, value}` records
///
/// Accepts the records as a value or as JSON text.
fn insert_values(value: &Value) -> std::result::Result<Vec<(String, Value)>, String> {
    match value {
        Value::Text(_) | Value::Blob(_) => {
            let text = value.as_text();
            let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
            insert_values(&Value::from_json(&json))
        }
        Value::Array(items) => {
            let mut pairs = Vec::new();
            for item in items {
                pairs.extend(insert_values(item)?);
            }
            Ok(pairs)
        }
        Value::Table(table) => table_pairs(table),
        Value::Number(_) => Err("expects a list of {column, value} records".to_string()),
    }
}

fn table_pairs(table: &Table) -> std::result::Result<Vec<(String, Value)>, String> {
    (0..table.num_rows())
        .map(|row| {
            let column = table
                .get(row, "column")
                .map(Value::as_text)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| format!("record {} has no column", row))?;
            let value = table.get(row, "value").cloned().unwrap_or_default();
            Ok((column, value))
        })
        .collect()
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn insert_sql(table: &str, columns: &[&str]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let marks = vec!["?"; columns.len()];
    format!(
        "INSERT INTO {}({}) VALUES({});",
        quote_ident(table),
        names.join(","),
        marks.join(",")
    )
}

/// Insert one row when `trigger` is on, then switch the trigger off
async fn sqlite_insert(ctx: ExecContext) -> Result<ExecOutput> {
    let out = ExecOutput::new();
    if !ctx.bool("trigger") {
        return Ok(out);
    }
    let file = ctx.text("file");
    let table = ctx.text("table");
    if file.is_empty() {
        return Ok(out.attr_error("file", "empty"));
    }
    if table.is_empty() {
        return Ok(out.attr_error("table", "empty"));
    }
    let pairs = match insert_values(&ctx.input("values")) {
        Ok(pairs) if pairs.is_empty() => return Ok(out.attr_error("values", "empty")),
        Ok(pairs) => pairs,
        Err(e) => return Ok(out.attr_error("values", e)),
    };

    let db = Arc::clone(ctx.extension::<Arc<dyn Database>>(extension_keys::DATABASE)?);
    let handle = match open_db(&db, &file).await? {
        Ok(handle) => handle,
        Err(e) => return Ok(out.attr_error("file", e)),
    };

    let columns: Vec<&str> = pairs.iter().map(|(c, _)| c.as_str()).collect();
    let sql = insert_sql(&table, &columns);
    let params: Vec<Value> = pairs.into_iter().map(|(_, v)| v).collect();
    log::debug!("'{}' runs {}", ctx.path, sql);
    match tokio::task::spawn_blocking(move || db.execute(handle, &sql, &params)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(e),
        Err(e) => return Err(NodeEngineError::failed(e.to_string())),
    }

    Ok(out.set(ctx.node, None, "trigger", Value::Number(0.0)))
}
