//! Statements that carry the restriction directly instead of going through a
//! staging relation.
//!
//! The fallback is only sound when every step can re-evaluate the restriction
//! on its own: union leaves are self-contained, and on a shared layout the
//! restriction must read the root table alone (dependents then match through a
//! `select root.id from root where ...` subquery, evaluated before the root is
//! touched).

use crate::catalog::{HierarchyLayout, MutationTarget, PhysicalTable};
use crate::error::DmlError;
use crate::mutation::sequencer::push_set_list;
use crate::sql::expr::{Assignment, Expr, Qualifiers, render_expr};
use crate::sql::{Dialect, PlannedStatement, SqlBuilder};
use crate::statement::BulkStatement;

/// Whether `statement` can run without a staging relation.
pub fn restricted_fallback_applies(target: &MutationTarget, statement: &BulkStatement) -> bool {
    match &target.layout {
        HierarchyLayout::UnionOfLeaves { .. } => true,
        HierarchyLayout::Shared => {
            let root = target.root.name.as_str();
            let root_only = statement
                .restriction()
                .map(|r| r.referenced_tables().into_iter().all(|t| t == root))
                .unwrap_or(true);
            if !root_only {
                return false;
            }
            match statement {
                BulkStatement::Delete { .. } => true,
                BulkStatement::Update { assignments, .. } => {
                    let Some(first) = assignments.first() else {
                        return false;
                    };
                    let table = first.column.table.as_str();
                    let same_table = assignments.iter().all(|a| a.column.table == table);
                    let required = table == root
                        || target.dependent(table).is_some_and(|d| !d.is_optional());
                    same_table && required
                }
            }
        }
    }
}

/// `select root.ids from root [where R]`, or one `union all` branch per leaf.
pub(crate) fn push_root_id_subquery(
    b: &mut SqlBuilder,
    target: &MutationTarget,
    restriction: Option<&Expr>,
) -> Result<(), DmlError> {
    let keys: Vec<&str> = target.root.key_columns.iter().map(|c| c.name.as_str()).collect();
    let root = target.root.name.as_str();
    let sources: Vec<&str> = match target.union_leaves() {
        Some(leaves) => leaves.iter().map(String::as_str).collect(),
        None => vec![root],
    };
    for (i, source) in sources.iter().enumerate() {
        if i > 0 {
            b.push(" union all ");
        }
        b.push("select ")
            .push_columns(source, &keys)
            .push(" from ")
            .push(source);
        if let Some(expr) = restriction {
            b.push(" where ");
            render_expr(expr, b, &Qualifiers::new().with(root, source))?;
        }
    }
    Ok(())
}

fn push_where(
    b: &mut SqlBuilder,
    restriction: Option<&Expr>,
    qualifiers: &Qualifiers,
) -> Result<(), DmlError> {
    if let Some(expr) = restriction {
        b.push(" where ");
        render_expr(expr, b, qualifiers)?;
    }
    Ok(())
}

/// `t.k in (select root.ids from root [where R])`
fn push_subquery_membership(
    b: &mut SqlBuilder,
    target: &MutationTarget,
    table: &PhysicalTable<'_>,
    restriction: Option<&Expr>,
) -> Result<(), DmlError> {
    b.push(" where ").push_key_in(table.name, &table.key_columns);
    push_root_id_subquery(b, target, restriction)?;
    b.push(")");
    Ok(())
}

/// UPDATE of one table: the root (or a union leaf, via `logical`) takes the
/// restriction directly; a dependent matches through the root subquery.
pub(crate) fn restricted_update(
    target: &MutationTarget,
    table: &PhysicalTable<'_>,
    logical: &str,
    assignments: &[&Assignment],
    restriction: Option<&Expr>,
    dialect: &Dialect,
) -> Result<PlannedStatement, DmlError> {
    let qualifiers = Qualifiers::new().with(logical, table.name);
    let mut b = SqlBuilder::new(dialect.placeholder);
    b.push("update ").push(table.name).push(" set ");
    push_set_list(&mut b, assignments, &qualifiers)?;
    if table.is_root || target.union_leaves().is_some() {
        push_where(&mut b, restriction, &qualifiers)?;
    } else {
        push_subquery_membership(&mut b, target, table, restriction)?;
    }
    Ok(b.finish())
}

/// DELETE of one table, with the same placement rules as [`restricted_update`].
pub(crate) fn restricted_delete(
    target: &MutationTarget,
    table: &PhysicalTable<'_>,
    restriction: Option<&Expr>,
    dialect: &Dialect,
) -> Result<PlannedStatement, DmlError> {
    let mut b = SqlBuilder::new(dialect.placeholder);
    b.push("delete from ").push(table.name);
    if table.is_root || target.union_leaves().is_some() {
        let qualifiers = Qualifiers::new().with(&target.root.name, table.name);
        push_where(&mut b, restriction, &qualifiers)?;
    } else {
        push_subquery_membership(&mut b, target, table, restriction)?;
    }
    Ok(b.finish())
}
