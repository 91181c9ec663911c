use crate::catalog::types::Value;
use crate::error::DmlError;
use crate::sql::{ParamSource, SqlBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Maximum nesting depth for restrictions to prevent stack overflow while rendering.
const MAX_EXPR_DEPTH: usize = 32;

/// A column of a mapped table, referenced by table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

pub fn col(table: &str, column: &str) -> ColumnRef {
    ColumnRef::new(table, column)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// Positional binding from the execution context.
    Param(usize),
    Value(Value),
    Column(ColumnRef),
}

pub fn param(index: usize) -> Operand {
    Operand::Param(index)
}

pub fn lit(value: impl Into<Value>) -> Operand {
    Operand::Value(value.into())
}

impl From<ColumnRef> for Operand {
    fn from(value: ColumnRef) -> Self {
        Operand::Column(value)
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

/// Pre-built row-matching restriction handed over by the statement translator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Eq(ColumnRef, Operand),
    Ne(ColumnRef, Operand),
    Lt(ColumnRef, Operand),
    Lte(ColumnRef, Operand),
    Gt(ColumnRef, Operand),
    Gte(ColumnRef, Operand),
    In(ColumnRef, Vec<Operand>),
    Between(ColumnRef, Operand, Operand),
    IsNull(ColumnRef),
    IsNotNull(ColumnRef),
    Like(ColumnRef, Operand),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl ColumnRef {
    pub fn eq(self, rhs: impl Into<Operand>) -> Expr {
        Expr::Eq(self, rhs.into())
    }

    pub fn neq(self, rhs: impl Into<Operand>) -> Expr {
        Expr::Ne(self, rhs.into())
    }

    pub fn lt(self, rhs: impl Into<Operand>) -> Expr {
        Expr::Lt(self, rhs.into())
    }

    pub fn lte(self, rhs: impl Into<Operand>) -> Expr {
        Expr::Lte(self, rhs.into())
    }

    pub fn gt(self, rhs: impl Into<Operand>) -> Expr {
        Expr::Gt(self, rhs.into())
    }

    pub fn gte(self, rhs: impl Into<Operand>) -> Expr {
        Expr::Gte(self, rhs.into())
    }

    pub fn between(self, low: impl Into<Operand>, high: impl Into<Operand>) -> Expr {
        Expr::Between(self, low.into(), high.into())
    }

    pub fn in_(self, values: Vec<Operand>) -> Expr {
        Expr::In(self, values)
    }

    pub fn like(self, pattern: impl Into<Operand>) -> Expr {
        Expr::Like(self, pattern.into())
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(self)
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNotNull(self)
    }

    pub fn set(self, value: impl Into<Operand>) -> Assignment {
        Assignment {
            column: self,
            value: value.into(),
        }
    }
}

impl Expr {
    pub fn and(self, rhs: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn depth(&self) -> usize {
        self.depth_up_to(usize::MAX)
    }

    /// Nesting depth, walked without recursion. Stops at the first level past
    /// `limit`, so the result is at most `limit + 1`.
    fn depth_up_to(&self, limit: usize) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1usize)];
        while let Some((expr, level)) = pending.pop() {
            deepest = deepest.max(level);
            if level > limit {
                break;
            }
            match expr {
                Expr::Not(inner) => pending.push((inner.as_ref(), level + 1)),
                Expr::And(left, right) | Expr::Or(left, right) => {
                    pending.push((left.as_ref(), level + 1));
                    pending.push((right.as_ref(), level + 1));
                }
                _ => {}
            }
        }
        deepest
    }

    pub fn validate_depth(&self) -> Result<(), DmlError> {
        if self.depth_up_to(MAX_EXPR_DEPTH) > MAX_EXPR_DEPTH {
            return Err(DmlError::Validation(format!(
                "restriction exceeds maximum allowed depth of {}",
                MAX_EXPR_DEPTH
            )));
        }
        Ok(())
    }

    /// Every table a column reference in this restriction points at.
    pub fn referenced_tables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_tables(&mut out);
        out
    }

    fn collect_tables<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Eq(c, o)
            | Expr::Ne(c, o)
            | Expr::Lt(c, o)
            | Expr::Lte(c, o)
            | Expr::Gt(c, o)
            | Expr::Gte(c, o)
            | Expr::Like(c, o) => {
                out.insert(c.table.as_str());
                o.collect_tables(out);
            }
            Expr::In(c, items) => {
                out.insert(c.table.as_str());
                for item in items {
                    item.collect_tables(out);
                }
            }
            Expr::Between(c, low, high) => {
                out.insert(c.table.as_str());
                low.collect_tables(out);
                high.collect_tables(out);
            }
            Expr::IsNull(c) | Expr::IsNotNull(c) => {
                out.insert(c.table.as_str());
            }
            Expr::Not(inner) => inner.collect_tables(out),
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_tables(out);
                right.collect_tables(out);
            }
        }
    }
}

impl Operand {
    fn collect_tables<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        if let Operand::Column(c) = self {
            out.insert(c.table.as_str());
        }
    }

    pub fn reads_column(&self) -> bool {
        matches!(self, Operand::Column(_))
    }
}

/// `column = value` in a bulk UPDATE.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub column: ColumnRef,
    pub value: Operand,
}

impl Assignment {
    pub fn new(column: ColumnRef, value: impl Into<Operand>) -> Self {
        Self {
            column,
            value: value.into(),
        }
    }
}

/// Maps logical table names in column references to the qualifier rendered in SQL.
#[derive(Debug, Clone, Default)]
pub(crate) struct Qualifiers {
    map: HashMap<String, String>,
}

impl Qualifiers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Qualifies `table` with its own name.
    pub(crate) fn with_table(self, table: &str) -> Self {
        self.with(table, table)
    }

    pub(crate) fn with(mut self, logical: &str, qualifier: &str) -> Self {
        self.map.insert(logical.to_string(), qualifier.to_string());
        self
    }

    fn qualify(&self, column: &ColumnRef) -> Result<String, DmlError> {
        match self.map.get(&column.table) {
            Some(q) => Ok(format!("{q}.{}", column.column)),
            None => Err(DmlError::Validation(format!(
                "column '{}.{}' references a table outside this statement",
                column.table, column.column
            ))),
        }
    }
}

pub(crate) fn render_operand(
    operand: &Operand,
    b: &mut SqlBuilder,
    q: &Qualifiers,
) -> Result<(), DmlError> {
    match operand {
        Operand::Param(index) => {
            b.push_param(ParamSource::Binding(*index));
        }
        Operand::Value(value) => {
            b.push_param(ParamSource::Literal(value.clone()));
        }
        Operand::Column(column) => {
            let rendered = q.qualify(column)?;
            b.push(&rendered);
        }
    }
    Ok(())
}

fn render_comparison(
    column: &ColumnRef,
    op: &str,
    rhs: &Operand,
    b: &mut SqlBuilder,
    q: &Qualifiers,
) -> Result<(), DmlError> {
    let lhs = q.qualify(column)?;
    b.push(&lhs).push(" ").push(op).push(" ");
    render_operand(rhs, b, q)
}

pub(crate) fn render_expr(expr: &Expr, b: &mut SqlBuilder, q: &Qualifiers) -> Result<(), DmlError> {
    match expr {
        Expr::Eq(c, o) => render_comparison(c, "=", o, b, q),
        Expr::Ne(c, o) => render_comparison(c, "<>", o, b, q),
        Expr::Lt(c, o) => render_comparison(c, "<", o, b, q),
        Expr::Lte(c, o) => render_comparison(c, "<=", o, b, q),
        Expr::Gt(c, o) => render_comparison(c, ">", o, b, q),
        Expr::Gte(c, o) => render_comparison(c, ">=", o, b, q),
        Expr::Like(c, o) => render_comparison(c, "like", o, b, q),
        Expr::In(c, items) => {
            if items.is_empty() {
                return Err(DmlError::Validation(format!(
                    "IN list on '{}.{}' is empty",
                    c.table, c.column
                )));
            }
            let lhs = q.qualify(c)?;
            b.push(&lhs).push(" in (");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    b.push(", ");
                }
                render_operand(item, b, q)?;
            }
            b.push(")");
            Ok(())
        }
        Expr::Between(c, low, high) => {
            let lhs = q.qualify(c)?;
            b.push(&lhs).push(" between ");
            render_operand(low, b, q)?;
            b.push(" and ");
            render_operand(high, b, q)
        }
        Expr::IsNull(c) => {
            let lhs = q.qualify(c)?;
            b.push(&lhs).push(" is null");
            Ok(())
        }
        Expr::IsNotNull(c) => {
            let lhs = q.qualify(c)?;
            b.push(&lhs).push(" is not null");
            Ok(())
        }
        Expr::And(left, right) => render_binary(left, "and", right, b, q),
        Expr::Or(left, right) => render_binary(left, "or", right, b, q),
        Expr::Not(inner) => {
            b.push("not (");
            render_expr(inner, b, q)?;
            b.push(")");
            Ok(())
        }
    }
}

fn render_binary(
    left: &Expr,
    op: &str,
    right: &Expr,
    b: &mut SqlBuilder,
    q: &Qualifiers,
) -> Result<(), DmlError> {
    b.push("(");
    render_expr(left, b, q)?;
    b.push(" ").push(op).push(" ");
    render_expr(right, b, q)?;
    b.push(")");
    Ok(())
}
