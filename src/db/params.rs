//! Named placeholders and parameter binding.
//!
//! SQL produced by the query builder (and accepted by
//! [`Connection`](crate::db::Connection)) uses `:name` placeholders. Drivers
//! only understand positional ones, so [`compile`] rewrites the SQL into the
//! backend's form and returns the values in placeholder order. The `bind_*`
//! functions then attach those values to a sqlx query.

use crate::db::DatabaseType;
use crate::error::{DbError, DbResult};
use crate::models::{Bindings, Value};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

/// SQL rewritten to positional placeholders, with the values to bind in order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSql {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Rewrite `:name` placeholders for `db`.
///
/// MySQL and SQLite get `?` with one value per occurrence. PostgreSQL gets
/// `$n`, and a name used twice reuses its index. Quoted strings, quoted
/// identifiers, comments and `::` casts are copied untouched. Bindings that
/// no placeholder refers to are ignored.
pub fn compile(sql: &str, bindings: &Bindings, db: DatabaseType) -> DbResult<CompiledSql> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut params = Vec::new();
    let mut pg_names: Vec<&str> = Vec::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(bytes, i, quote, db == DatabaseType::MySql);
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = sql[i + 2..].find("*/").map_or(bytes.len(), |p| i + 2 + p + 2);
            }
            b':' if bytes.get(i + 1) == Some(&b':') => i += 2,
            b':' if bytes.get(i + 1).is_some_and(|b| is_ident_start(*b)) => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && is_ident_char(bytes[end]) {
                    end += 1;
                }
                let name = &sql[start..end];
                let value = bindings.get(name).ok_or_else(|| {
                    DbError::invalid_input(format!("Missing binding for placeholder :{}", name))
                })?;

                out.push_str(&sql[copied..i]);
                match db {
                    DatabaseType::Postgres => {
                        let idx = match pg_names.iter().position(|n| *n == name) {
                            Some(idx) => idx,
                            None => {
                                pg_names.push(name);
                                params.push(value.clone());
                                pg_names.len() - 1
                            }
                        };
                        out.push('$');
                        out.push_str(&(idx + 1).to_string());
                    }
                    DatabaseType::MySql | DatabaseType::SQLite => {
                        out.push('?');
                        params.push(value.clone());
                    }
                }
                copied = end;
                i = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);

    Ok(CompiledSql { sql: out, params })
}

/// Index just past the closing quote (or the end of input when unterminated).
fn skip_quoted(bytes: &[u8], open: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' && quote != b'`' {
            i += 2;
            continue;
        }
        if b == quote {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q Value,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q Value,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> Bindings {
        Bindings::new()
            .with("id", 7)
            .with("title", "hello")
            .with("unused", true)
    }

    #[test]
    fn test_compile_positional() {
        let compiled = compile(
            "UPDATE posts SET title = :title WHERE id = :id",
            &bindings(),
            DatabaseType::MySql,
        )
        .unwrap();
        assert_eq!(compiled.sql, "UPDATE posts SET title = ? WHERE id = ?");
        assert_eq!(
            compiled.params,
            vec![Value::Text("hello".to_string()), Value::Int(7)]
        );
    }

    #[test]
    fn test_compile_postgres_reuses_index() {
        let compiled = compile(
            "SELECT * FROM posts WHERE id = :id OR parent = :id AND title = :title",
            &bindings(),
            DatabaseType::Postgres,
        )
        .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT * FROM posts WHERE id = $1 OR parent = $1 AND title = $2"
        );
        assert_eq!(compiled.params.len(), 2);
    }

    #[test]
    fn test_compile_sqlite_repeats_values() {
        let compiled = compile("SELECT :id, :id", &bindings(), DatabaseType::SQLite).unwrap();
        assert_eq!(compiled.sql, "SELECT ?, ?");
        assert_eq!(compiled.params, vec![Value::Int(7), Value::Int(7)]);
    }

    #[test]
    fn test_compile_skips_quotes_casts_and_comments() {
        let sql = "SELECT ':id', \"a:b\", created::date -- :title\nFROM t /* :nope */ WHERE id = :id";
        let compiled = compile(sql, &bindings(), DatabaseType::Postgres).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT ':id', \"a:b\", created::date -- :title\nFROM t /* :nope */ WHERE id = $1"
        );
        assert_eq!(compiled.params, vec![Value::Int(7)]);
    }

    #[test]
    fn test_compile_mysql_backslash_escape() {
        let compiled = compile(
            r"SELECT 'it\'s :id' WHERE id = :id",
            &bindings(),
            DatabaseType::MySql,
        )
        .unwrap();
        assert_eq!(compiled.sql, r"SELECT 'it\'s :id' WHERE id = ?");
    }

    #[test]
    fn test_compile_missing_binding() {
        let err = compile("SELECT :missing", &bindings(), DatabaseType::MySql).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(err.to_string().contains(":missing"));
    }

    #[test]
    fn test_compile_no_placeholders() {
        let compiled = compile("SELECT 1", &Bindings::new(), DatabaseType::SQLite).unwrap();
        assert_eq!(compiled.sql, "SELECT 1");
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn test_compile_utf8_passthrough() {
        let compiled = compile(
            "SELECT 'héllo' AS été WHERE id = :id",
            &bindings(),
            DatabaseType::MySql,
        )
        .unwrap();
        assert_eq!(compiled.sql, "SELECT 'héllo' AS été WHERE id = ?");
    }
}
