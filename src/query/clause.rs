//! Clause building blocks for [`QueryBuilder`](super::QueryBuilder).

use crate::error::DbError;
use std::fmt;
use std::str::FromStr;

/// Statement kind rendered by a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Select,
    Update,
    Delete,
    Insert,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Insert => "INSERT",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SELECT" => Ok(Self::Select),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "INSERT" => Ok(Self::Insert),
            other => Err(DbError::query(format!("Unknown query type '{}'", other))),
        }
    }
}

/// ORDER BY direction suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A table reference with an optional alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} AS {}", self.name, alias),
            None => f.write_str(&self.name),
        }
    }
}

/// How a column's value reaches the SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Bound through the `:column` placeholder.
    Placeholder,
    /// Inlined verbatim. Never pass untrusted input here.
    Literal(String),
}

/// A column entry in the field list or the WHERE list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

impl Field {
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Placeholder,
        }
    }

    pub fn literal(name: impl Into<String>, literal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Literal(literal.into()),
        }
    }

    /// `col = :col` or `col = literal`.
    pub(crate) fn assignment(&self) -> String {
        match &self.value {
            FieldValue::Placeholder => format!("{} = :{}", self.name, self.name),
            FieldValue::Literal(literal) => format!("{} = {}", self.name, literal),
        }
    }

    /// `col`, or `expression AS col` for a literal select entry.
    pub(crate) fn selection(&self) -> String {
        match &self.value {
            FieldValue::Placeholder => self.name.clone(),
            FieldValue::Literal(expression) => format!("{} AS {}", expression, self.name),
        }
    }

    /// `:col` or the literal.
    pub(crate) fn insert_value(&self) -> String {
        match &self.value {
            FieldValue::Placeholder => format!(":{}", self.name),
            FieldValue::Literal(literal) => literal.clone(),
        }
    }
}

/// Insert `field` into an ordered list, replacing an entry with the same name in place.
pub(crate) fn upsert(list: &mut Vec<Field>, field: Field) {
    match list.iter_mut().find(|f| f.name == field.name) {
        Some(existing) => *existing = field,
        None => list.push(field),
    }
}

/// Anything that names one or more columns (or tables).
pub trait IntoColumns {
    fn into_columns(self) -> Vec<String>;
}

impl IntoColumns for &str {
    fn into_columns(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoColumns for String {
    fn into_columns(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoColumns for &String {
    fn into_columns(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl IntoColumns for &[&str] {
    fn into_columns(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl<const N: usize> IntoColumns for [&str; N] {
    fn into_columns(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl IntoColumns for Vec<&str> {
    fn into_columns(self) -> Vec<String> {
        self.into_iter().map(String::from).collect()
    }
}

impl IntoColumns for Vec<String> {
    fn into_columns(self) -> Vec<String> {
        self
    }
}

impl IntoColumns for &[String] {
    fn into_columns(self) -> Vec<String> {
        self.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_type_from_str() {
        assert_eq!("select".parse::<QueryType>().unwrap(), QueryType::Select);
        assert_eq!(" Insert ".parse::<QueryType>().unwrap(), QueryType::Insert);
        let err = "MERGE".parse::<QueryType>().unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));
        assert!(err.to_string().contains("Unknown query type"));
    }

    #[test]
    fn test_field_rendering() {
        let bound = Field::placeholder("title");
        assert_eq!(bound.assignment(), "title = :title");
        assert_eq!(bound.selection(), "title");
        assert_eq!(bound.insert_value(), ":title");

        let literal = Field::literal("updated_at", "NOW()");
        assert_eq!(literal.assignment(), "updated_at = NOW()");
        assert_eq!(literal.selection(), "NOW() AS updated_at");
        assert_eq!(literal.insert_value(), "NOW()");
    }

    #[test]
    fn test_table_ref_display() {
        let table = TableRef {
            name: "@posts".to_string(),
            alias: Some("p".to_string()),
        };
        assert_eq!(table.to_string(), "@posts AS p");
    }

    #[test]
    fn test_upsert_keeps_position() {
        let mut list = vec![Field::placeholder("a"), Field::placeholder("b")];
        upsert(&mut list, Field::literal("a", "1"));
        upsert(&mut list, Field::placeholder("c"));
        let names: Vec<_> = list.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(list[0].value, FieldValue::Literal("1".to_string()));
    }

    #[test]
    fn test_into_columns() {
        assert_eq!("a".into_columns(), vec!["a"]);
        assert_eq!(["a", "b"].into_columns(), vec!["a", "b"]);
        assert_eq!(vec!["x".to_string()].into_columns(), vec!["x"]);
    }
}
