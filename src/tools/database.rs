//! Read-only SQL access to the Marvel database.

use async_trait::async_trait;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::mcp::handler::{get_string_arg, structured_result, ToolContext, ToolHandler};
use crate::mcp::protocol::{Tool, ToolResult};

/// Most rows returned by one query.
pub const MAX_ROWS: usize = 200;

/// Rows returned by a query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub truncated: bool,
}

impl QueryTable {
    /// Render as a markdown table.
    pub fn to_markdown(&self) -> String {
        if self.columns.is_empty() {
            return "_Query returned no columns._".to_string();
        }

        let mut out = String::new();
        let header: Vec<String> = self.columns.iter().map(|c| escape_cell(c)).collect();
        out.push_str(&format!("| {} |\n", header.join(" | ")));
        out.push_str(&format!("|{}\n", " --- |".repeat(self.columns.len())));
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(cell_text).collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }

        if self.rows.is_empty() {
            out.push_str("\n_0 rows._");
        } else if self.truncated {
            out.push_str(&format!("\n_Showing the first {} rows._", self.rows.len()));
        }
        out.trim_end().to_string()
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => escape_cell(s),
        other => escape_cell(&other.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}

/// Reject anything that is not a single SELECT or WITH statement.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let statement = sql.trim().trim_end_matches(';').trim();
    if statement.is_empty() {
        return Err(Error::InvalidArguments("sql_query is empty".to_string()));
    }
    if has_separator(statement) {
        return Err(Error::InvalidArguments(
            "only a single statement is allowed".to_string(),
        ));
    }

    let leading = Regex::new(r"(?i)^[\s(]*(select|with)\b")
        .map_err(|e| Error::Internal(format!("invalid statement pattern: {}", e)))?;
    if !leading.is_match(statement) {
        return Err(Error::InvalidArguments(
            "only SELECT or WITH queries are allowed".to_string(),
        ));
    }
    Ok(())
}

/// True when `sql` has a `;` outside quotes, identifiers and comments.
fn has_separator(sql: &str) -> bool {
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                // A doubled quote is an escaped quote and keeps the literal open.
                while let Some(inner) = chars.next() {
                    if inner == c && chars.next_if_eq(&c).is_none() {
                        break;
                    }
                }
            }
            '[' => {
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                }
            }
            '-' if chars.next_if_eq(&'-').is_some() => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.next_if_eq(&'*').is_some() => {
                let mut star = false;
                for inner in chars.by_ref() {
                    if star && inner == '/' {
                        break;
                    }
                    star = inner == '*';
                }
            }
            ';' => return true,
            _ => {}
        }
    }
    false
}

/// Run one read-only query. Blocking.
pub fn run_query(database: &Path, sql: &str, max_rows: usize) -> Result<QueryTable> {
    if !database.is_file() {
        return Err(Error::Backend("database unavailable".to_string()));
    }

    let conn = Connection::open_with_flags(
        database,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(Error::InvalidArguments(
            "only read-only queries are allowed".to_string(),
        ));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut table = QueryTable {
        columns,
        rows: Vec::new(),
        truncated: false,
    };

    while let Some(row) = rows.next()? {
        if table.rows.len() == max_rows {
            table.truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(table.columns.len());
        for index in 0..table.columns.len() {
            values.push(to_json(row.get_ref(index)?));
        }
        table.rows.push(values);
    }

    Ok(table)
}

/// Runs read-only SQL against the Marvel database.
pub struct QueryMarvelDbTool {
    database: PathBuf,
    max_rows: usize,
}

impl QueryMarvelDbTool {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            max_rows: MAX_ROWS,
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }
}

#[async_trait]
impl ToolHandler for QueryMarvelDbTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "query_marvel_db".to_string(),
            description: "Run a read-only SQL SELECT against the Marvel database (tables: heroes, movies, hero_appearances).".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sql_query": {
                        "type": "string",
                        "description": "A single SELECT or WITH statement"
                    }
                },
                "required": ["sql_query"]
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": {
                    "columns": { "type": "array", "items": { "type": "string" } },
                    "rows": { "type": "array", "items": { "type": "array" } },
                    "truncated": { "type": "boolean" }
                },
                "required": ["columns", "rows", "truncated"]
            })),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>, _ctx: ToolContext) -> Result<ToolResult> {
        let sql = get_string_arg(&args, "sql_query")?;
        ensure_read_only(&sql)?;
        debug!("Running query: {}", sql);

        let database = self.database.clone();
        let max_rows = self.max_rows;
        let table = tokio::task::spawn_blocking(move || run_query(&database, &sql, max_rows))
            .await
            .map_err(|e| Error::Internal(format!("query task failed: {}", e)))??;

        Ok(structured_result(table.to_markdown(), serde_json::to_value(&table)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn database(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("marvel_data.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE heroes (id INTEGER PRIMARY KEY, name TEXT, power REAL, alias TEXT);
             INSERT INTO heroes (name, power, alias) VALUES
                ('Thor', 95.5, 'God of Thunder'),
                ('Hulk', 99.0, NULL),
                ('Black Widow', 60.0, 'Natasha | Nat');",
        )
        .unwrap();
        path
    }

    fn call(sql: &str) -> HashMap<String, Value> {
        HashMap::from([("sql_query".to_string(), json!(sql))])
    }

    #[test]
    fn test_ensure_read_only() {
        assert!(ensure_read_only("SELECT * FROM heroes").is_ok());
        assert!(ensure_read_only("  select name from heroes;  ").is_ok());
        assert!(ensure_read_only("WITH t AS (SELECT 1) SELECT * FROM t").is_ok());
        assert!(ensure_read_only("(SELECT 1)").is_ok());

        for sql in [
            "",
            "DELETE FROM heroes",
            "DROP TABLE heroes",
            "SELECT 1; DROP TABLE heroes",
            "PRAGMA table_info(heroes)",
        ] {
            assert!(
                matches!(ensure_read_only(sql), Err(Error::InvalidArguments(_))),
                "accepted {:?}",
                sql
            );
        }
    }

    #[test]
    fn test_semicolons_inside_literals_are_not_separators() {
        assert!(ensure_read_only("SELECT * FROM heroes WHERE name = 'a;b'").is_ok());
        assert!(ensure_read_only("SELECT 'it''s; fine', \"odd;col\" FROM heroes;").is_ok());
        assert!(ensure_read_only("SELECT 1 -- trailing; comment").is_ok());
        assert!(ensure_read_only("SELECT /* a;b */ 1").is_ok());
        assert!(ensure_read_only("SELECT 'a;b'; DELETE FROM heroes").is_err());
        assert!(ensure_read_only("SELECT 'it''s'; DROP TABLE heroes").is_err());
    }

    #[tokio::test]
    async fn test_query_matches_literal_with_semicolon() {
        let dir = TempDir::new().unwrap();
        let path = database(&dir);
        Connection::open(&path)
            .unwrap()
            .execute("INSERT INTO heroes (name) VALUES ('Semi;Colon')", [])
            .unwrap();
        let tool = QueryMarvelDbTool::new(&path);

        let result = tool
            .execute(
                call("SELECT name FROM heroes WHERE name = 'Semi;Colon'"),
                ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.structured_content.unwrap()["rows"], json!([["Semi;Colon"]]));
    }

    #[tokio::test]
    async fn test_query_returns_table() {
        let dir = TempDir::new().unwrap();
        let tool = QueryMarvelDbTool::new(database(&dir));

        let result = tool
            .execute(
                call("SELECT name, power, alias FROM heroes ORDER BY id"),
                ToolContext::default(),
            )
            .await
            .unwrap();

        let structured = result.structured_content.unwrap();
        assert_eq!(structured["columns"], json!(["name", "power", "alias"]));
        assert_eq!(structured["rows"][0], json!(["Thor", 95.5, "God of Thunder"]));
        assert_eq!(structured["rows"][1][2], Value::Null);
        assert_eq!(structured["truncated"], false);

        let crate::mcp::protocol::ContentBlock::Text { text } = &result.content[0];
        assert!(text.starts_with("| name | power | alias |"));
        assert!(text.contains("Natasha \\| Nat"));
    }

    #[tokio::test]
    async fn test_query_truncates() {
        let dir = TempDir::new().unwrap();
        let tool = QueryMarvelDbTool::new(database(&dir)).with_max_rows(2);

        let result = tool
            .execute(call("SELECT name FROM heroes"), ToolContext::default())
            .await
            .unwrap();
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["rows"].as_array().unwrap().len(), 2);
        assert_eq!(structured["truncated"], true);
    }

    #[tokio::test]
    async fn test_writes_are_rejected_and_never_run() {
        let dir = TempDir::new().unwrap();
        let path = database(&dir);
        let tool = QueryMarvelDbTool::new(&path);

        let err = tool
            .execute(
                call("WITH doomed AS (SELECT 1) DELETE FROM heroes"),
                ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);

        let count = run_query(&path, "SELECT COUNT(*) AS n FROM heroes", 10).unwrap();
        assert_eq!(count.rows[0][0], json!(3));
    }

    #[tokio::test]
    async fn test_backend_failures() {
        let dir = TempDir::new().unwrap();

        let missing = QueryMarvelDbTool::new(dir.path().join("absent.db"))
            .execute(call("SELECT 1"), ToolContext::default())
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::BackendFailure);
        assert!(!missing.client_message().contains("absent.db"));

        let bad_sql = QueryMarvelDbTool::new(database(&dir))
            .execute(call("SELECT * FROM villains"), ToolContext::default())
            .await
            .unwrap_err();
        assert_eq!(bad_sql.kind(), ErrorKind::BackendFailure);
    }

    #[test]
    fn test_markdown_for_empty_result() {
        let table = QueryTable {
            columns: vec!["name".to_string()],
            rows: Vec::new(),
            truncated: false,
        };
        assert_eq!(table.to_markdown(), "| name |\n| --- |\n\n_0 rows._");
    }
}
