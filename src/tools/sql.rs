//! Read-only SQL over CSV-backed tables.
//!
//! `sql_query` loads every `data/*.csv` in the sandbox into an in-memory
//! SQLite database — one table per file, named after the file stem — and
//! runs a single read-only statement against it. Columns get NUMERIC
//! affinity so quantities and prices aggregate as numbers while dates and
//! ids stay comparable as text. Malformed SQL comes back as `QueryError`;
//! nothing here can crash the process.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;

use super::{Tool, ToolContext, ToolError, ToolErrorKind};

/// Directory scanned for CSV tables, relative to the sandbox root.
const DATA_DIR: &str = "data";

#[derive(Debug, serde::Deserialize)]
struct SqlQueryParams {
    query: String,
}

/// Tool executing one read-only analytical query over the sandbox's CSVs.
pub struct SqlQueryTool;

impl SqlQueryTool {
    /// Creates a new SqlQueryTool instance.
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqlQueryTool {
    fn default() -> Self {
        Self::new()
    }
}

fn query_error(message: impl Into<String>) -> ToolError {
    ToolError::new(ToolErrorKind::QueryError, message)
}

/// Minimal RFC 4180 reader: quoted fields, escaped quotes, CRLF.
pub(crate) fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => {
                row.push(std::mem::take(&mut field));
            }
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Registers every `data/*.csv` file as a table named by its stem.
fn register_tables(conn: &Connection, sandbox_root: &Path) -> Result<usize, ToolError> {
    let data_dir = sandbox_root.join(DATA_DIR);
    let Ok(entries) = fs::read_dir(&data_dir) else {
        return Ok(0); // no data directory; queries will fail with QueryError
    };

    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    paths.sort();

    let mut registered = 0;
    for path in paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let text = fs::read_to_string(&path)
            .map_err(|e| ToolError::execution(format!("Failed to read {}: {e}", path.display())))?;
        let mut rows = parse_csv(&text).into_iter();
        let Some(header) = rows.next() else {
            continue; // empty file, e.g. a returns.csv with no rows at all
        };

        let columns: Vec<String> = header
            .iter()
            .map(|name| format!("{} NUMERIC", quote_ident(name)))
            .collect();
        let create = format!(
            "CREATE TABLE {} ({})",
            quote_ident(stem),
            columns.join(", ")
        );
        conn.execute(&create, [])
            .map_err(|e| ToolError::execution(format!("Failed to register table {stem}: {e}")))?;

        let placeholders: Vec<&str> = header.iter().map(|_| "?").collect();
        let insert = format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(stem),
            placeholders.join(", ")
        );
        let mut statement = conn
            .prepare(&insert)
            .map_err(|e| ToolError::execution(format!("Failed to prepare insert: {e}")))?;
        for row in rows {
            if row.iter().all(|f| f.is_empty()) {
                continue;
            }
            let params = rusqlite::params_from_iter(row.iter());
            statement
                .execute(params)
                .map_err(|e| ToolError::execution(format!("Failed to load {stem}: {e}")))?;
        }
        registered += 1;
    }
    Ok(registered)
}

fn is_read_only(query: &str) -> bool {
    let head = query
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    matches!(head.as_str(), "SELECT" | "WITH")
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(format!("<{} bytes>", b.len())),
    }
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        "sql_query"
    }

    fn description(&self) -> &str {
        "Execute a read-only SQL query against tables loaded from the sandbox's data/*.csv files. Table names are the file stems. Returns an ordered list of row objects."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "A single SELECT (or WITH ... SELECT) statement" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: SqlQueryParams = serde_json::from_value(args)
            .map_err(|e| ToolError::execution(format!("Invalid parameters: {e}")))?;

        if !is_read_only(&params.query) {
            return Err(query_error("Only SELECT queries are allowed"));
        }

        let conn = Connection::open_in_memory()
            .map_err(|e| ToolError::execution(format!("Failed to open in-memory db: {e}")))?;
        register_tables(&conn, &ctx.sandbox_root)?;

        let mut statement = conn
            .prepare(&params.query)
            .map_err(|e| query_error(format!("Query failed to parse: {e}")))?;
        let column_names: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        let mut rows = statement
            .query([])
            .map_err(|e| query_error(format!("Query failed: {e}")))?;
        let mut out = Vec::new();
        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(query_error(format!("Query failed: {e}"))),
            };
            let mut mapping = serde_json::Map::new();
            for (idx, name) in column_names.iter().enumerate() {
                let value = row
                    .get_ref(idx)
                    .map_err(|e| query_error(format!("Bad column {idx}: {e}")))?;
                mapping.insert(name.clone(), column_value(value));
            }
            out.push(Value::Object(mapping));
        }

        Ok(serde_json::json!({
            "columns": column_names,
            "rows": out,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::sandbox::SandboxInstance;

    fn seeded_sandbox() -> SandboxInstance {
        let sandbox = SandboxInstance::create().unwrap();
        sandbox
            .write_file(
                "data/orders.csv",
                "order_id,order_date,product_id,quantity,unit_price\n\
                 1001,2023-04-03,W1,2,20.0\n\
                 1002,2023-04-20,G1,1,45.0\n\
                 1003,2023-05-05,A1,5,12.0\n",
            )
            .unwrap();
        sandbox
            .write_file(
                "data/products.csv",
                "product_id,category\nW1,widgets\nG1,gadgets\nA1,accessories\n",
            )
            .unwrap();
        sandbox.write_file("data/returns.csv", "order_id\n1002\n").unwrap();
        sandbox
    }

    fn ctx_for(sandbox: &SandboxInstance) -> ToolContext {
        ToolContext::new(sandbox.root(), &HarnessConfig::new())
    }

    async fn run(sandbox: &SandboxInstance, query: &str) -> Result<Value, ToolError> {
        SqlQueryTool::new()
            .execute(serde_json::json!({ "query": query }), &ctx_for(sandbox))
            .await
    }

    #[test]
    fn test_parse_csv_quoted_fields() {
        let rows = parse_csv("a,b\n\"x, y\",\"he said \"\"hi\"\"\"\n");
        assert_eq!(rows[1][0], "x, y");
        assert_eq!(rows[1][1], "he said \"hi\"");
    }

    #[test]
    fn test_parse_csv_crlf_and_trailing_line() {
        let rows = parse_csv("a,b\r\n1,2\r\n3,4");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], vec!["3", "4"]);
    }

    #[tokio::test]
    async fn test_join_and_aggregate() {
        let mut sandbox = seeded_sandbox();
        let result = run(
            &sandbox,
            "SELECT p.category, SUM(o.quantity * o.unit_price) AS revenue \
             FROM orders o JOIN products p ON o.product_id = p.product_id \
             WHERE o.order_id NOT IN (SELECT order_id FROM returns) \
             GROUP BY p.category ORDER BY revenue DESC",
        )
        .await
        .unwrap();
        let rows = result["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["category"], "accessories");
        assert_eq!(rows[0]["revenue"].as_f64(), Some(60.0));
        assert_eq!(rows[1]["category"], "widgets");
        assert_eq!(rows[1]["revenue"].as_f64(), Some(40.0));
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_numeric_affinity() {
        let mut sandbox = seeded_sandbox();
        let result = run(&sandbox, "SELECT SUM(quantity) AS total FROM orders")
            .await
            .unwrap();
        assert_eq!(result["rows"][0]["total"], 8);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_sql_is_query_error() {
        let mut sandbox = seeded_sandbox();
        let err = run(&sandbox, "SELECT FROM WHERE").await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::QueryError);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_write_statement_rejected() {
        let mut sandbox = seeded_sandbox();
        let err = run(&sandbox, "DROP TABLE orders").await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::QueryError);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_table_is_query_error() {
        let mut sandbox = seeded_sandbox();
        let err = run(&sandbox, "SELECT * FROM nonexistent").await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::QueryError);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_empty_csv_is_skipped() {
        let mut sandbox = seeded_sandbox();
        sandbox.write_file("data/empty.csv", "").unwrap();
        let result = run(&sandbox, "SELECT COUNT(*) AS n FROM orders").await.unwrap();
        assert_eq!(result["rows"][0]["n"], 3);
        sandbox.teardown().unwrap();
    }
}
