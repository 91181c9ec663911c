//! SQL text assembly for the statements the engine issues.
//!
//! Statements are rendered once per plan into a [`PlannedStatement`]: the SQL
//! text plus the ordered list of parameter sources. Binding turns the sources
//! into concrete values for one invocation.

pub mod exporter;
pub mod expr;

use crate::catalog::types::{ColumnType, Value};
use crate::config::DialectKind;
use crate::error::DmlError;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`
    Question,
    /// `$1`, `$2`, ...
    Dollar,
    /// `:1`, `:2`, ...
    Colon,
}

/// Dialect-specific text the engine and the default schema exporter need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub kind: DialectKind,
    pub placeholder: PlaceholderStyle,
    pub create_global: &'static str,
    pub global_suffix: &'static str,
    pub create_local: &'static str,
    pub local_suffix: &'static str,
    pub create_persistent: &'static str,
    pub supports_if_exists: bool,
    pub max_identifier_len: usize,
    pub session_type: &'static str,
}

impl Dialect {
    pub fn for_kind(kind: DialectKind) -> Self {
        match kind {
            DialectKind::Sqlite => Self::sqlite(),
            DialectKind::Postgres => Self::postgres(),
            DialectKind::Oracle => Self::oracle(),
        }
    }

    pub fn sqlite() -> Self {
        Self {
            kind: DialectKind::Sqlite,
            placeholder: PlaceholderStyle::Question,
            create_global: "create table",
            global_suffix: "",
            create_local: "create temporary table",
            local_suffix: "",
            create_persistent: "create table",
            supports_if_exists: true,
            max_identifier_len: 128,
            session_type: "text",
        }
    }

    pub fn postgres() -> Self {
        Self {
            kind: DialectKind::Postgres,
            placeholder: PlaceholderStyle::Dollar,
            create_global: "create unlogged table",
            global_suffix: "",
            create_local: "create temporary table",
            local_suffix: "",
            create_persistent: "create table",
            supports_if_exists: true,
            max_identifier_len: 63,
            session_type: "varchar(36)",
        }
    }

    pub fn oracle() -> Self {
        Self {
            kind: DialectKind::Oracle,
            placeholder: PlaceholderStyle::Colon,
            create_global: "create global temporary table",
            global_suffix: " on commit preserve rows",
            create_local: "create private temporary table",
            local_suffix: " on commit preserve definition",
            create_persistent: "create table",
            supports_if_exists: false,
            max_identifier_len: 128,
            session_type: "varchar2(36 char)",
        }
    }

    pub fn type_name(&self, col_type: ColumnType) -> &'static str {
        match (self.kind, col_type) {
            (DialectKind::Sqlite, ColumnType::Integer)
            | (DialectKind::Sqlite, ColumnType::Boolean)
            | (DialectKind::Sqlite, ColumnType::Timestamp) => "integer",
            (DialectKind::Sqlite, ColumnType::Float) => "real",
            (DialectKind::Sqlite, ColumnType::Blob) => "blob",
            (DialectKind::Sqlite, ColumnType::Text) | (DialectKind::Sqlite, ColumnType::Uuid) => {
                "text"
            }
            (DialectKind::Postgres, ColumnType::Integer) => "bigint",
            (DialectKind::Postgres, ColumnType::Boolean) => "boolean",
            (DialectKind::Postgres, ColumnType::Timestamp) => "timestamp",
            (DialectKind::Postgres, ColumnType::Float) => "double precision",
            (DialectKind::Postgres, ColumnType::Blob) => "bytea",
            (DialectKind::Postgres, ColumnType::Text) => "varchar(255)",
            (DialectKind::Postgres, ColumnType::Uuid) => "uuid",
            (DialectKind::Oracle, ColumnType::Integer) => "number(19,0)",
            (DialectKind::Oracle, ColumnType::Boolean) => "number(1,0)",
            (DialectKind::Oracle, ColumnType::Timestamp) => "timestamp",
            (DialectKind::Oracle, ColumnType::Float) => "float",
            (DialectKind::Oracle, ColumnType::Blob) => "blob",
            (DialectKind::Oracle, ColumnType::Text) => "varchar2(255 char)",
            (DialectKind::Oracle, ColumnType::Uuid) => "raw(16)",
        }
    }
}

/// Where a rendered placeholder takes its value from at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamSource {
    Binding(usize),
    Literal(Value),
    SessionToken,
}

/// Rendered SQL plus its parameter sources, reusable across invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStatement {
    pub sql: String,
    pub params: Vec<ParamSource>,
}

impl PlannedStatement {
    pub fn bind(&self, bindings: &[Value], session_token: &Value) -> Result<Vec<Value>, DmlError> {
        self.params
            .iter()
            .map(|source| match source {
                ParamSource::Binding(index) => {
                    bindings
                        .get(*index)
                        .cloned()
                        .ok_or(DmlError::UnboundParameter {
                            index: *index,
                            available: bindings.len(),
                        })
                }
                ParamSource::Literal(value) => Ok(value.clone()),
                ParamSource::SessionToken => Ok(session_token.clone()),
            })
            .collect()
    }
}

pub(crate) struct SqlBuilder {
    sql: String,
    params: Vec<ParamSource>,
    style: PlaceholderStyle,
}

impl SqlBuilder {
    pub(crate) fn new(style: PlaceholderStyle) -> Self {
        Self {
            sql: String::with_capacity(128),
            params: Vec::new(),
            style,
        }
    }

    pub(crate) fn push(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    pub(crate) fn push_param(&mut self, source: ParamSource) -> &mut Self {
        self.params.push(source);
        let n = self.params.len();
        match self.style {
            PlaceholderStyle::Question => self.sql.push('?'),
            PlaceholderStyle::Dollar => {
                let _ = write!(self.sql, "${n}");
            }
            PlaceholderStyle::Colon => {
                let _ = write!(self.sql, ":{n}");
            }
        }
        self
    }

    /// `prefix.c1, prefix.c2` (or bare names when `prefix` is empty).
    pub(crate) fn push_columns(&mut self, prefix: &str, columns: &[&str]) -> &mut Self {
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            if !prefix.is_empty() {
                self.sql.push_str(prefix);
                self.sql.push('.');
            }
            self.sql.push_str(column);
        }
        self
    }

    /// Key membership test: `t.id in (` or `(t.a, t.b) in (` for composite keys.
    pub(crate) fn push_key_in(&mut self, prefix: &str, columns: &[&str]) -> &mut Self {
        if columns.len() == 1 {
            self.push_columns(prefix, columns);
        } else {
            self.sql.push('(');
            self.push_columns(prefix, columns);
            self.sql.push(')');
        }
        self.sql.push_str(" in (");
        self
    }

    /// `l.a = r.a and l.b = r.b`, pairing columns positionally.
    pub(crate) fn push_key_join(
        &mut self,
        left: &str,
        left_columns: &[&str],
        right: &str,
        right_columns: &[&str],
    ) -> &mut Self {
        for (i, (l, r)) in left_columns.iter().zip(right_columns.iter()).enumerate() {
            if i > 0 {
                self.sql.push_str(" and ");
            }
            let _ = write!(self.sql, "{left}.{l} = {right}.{r}");
        }
        self
    }

    pub(crate) fn finish(self) -> PlannedStatement {
        PlannedStatement {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Truncates a generated identifier to the dialect's limit.
pub(crate) fn fit_identifier(raw: &str, max_len: usize) -> String {
    raw.chars().take(max_len).collect()
}
