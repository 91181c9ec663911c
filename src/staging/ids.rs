use crate::catalog::MutationTarget;
use crate::error::DmlError;
use crate::sql::expr::{Expr, Qualifiers, render_expr};
use crate::sql::{Dialect, ParamSource, PlannedStatement, SqlBuilder};
use crate::staging::StagingTable;
use crate::statement::ExecutionContext;
use tracing::debug;

/// Renders the single mutation that copies every matching identifier into the
/// staging relation.
///
/// Shared layouts select from the root table, left-joining only the dependent
/// tables the restriction reads. Union layouts emit one `union all` branch per
/// leaf with the restriction re-targeted from the root name to the leaf.
pub fn build_staging_insert(
    target: &MutationTarget,
    staging: &StagingTable,
    restriction: Option<&Expr>,
    dialect: &Dialect,
) -> Result<PlannedStatement, DmlError> {
    let mut b = SqlBuilder::new(dialect.placeholder);
    b.push("insert into ")
        .push(&staging.name)
        .push(" (")
        .push_columns("", &staging.id_column_names());
    if let Some(session) = &staging.session_column {
        b.push(", ").push(session);
    }
    b.push(") ");

    let root = target.root.name.as_str();
    let root_keys: Vec<&str> = target.root.key_columns.iter().map(|c| c.name.as_str()).collect();
    match target.union_leaves() {
        None => {
            let referenced = restriction.map(Expr::referenced_tables).unwrap_or_default();
            push_branch_head(&mut b, root, &root_keys, staging);
            let mut qualifiers = Qualifiers::new().with_table(root);
            for dependent in &target.dependents {
                if !referenced.contains(dependent.name.as_str()) {
                    continue;
                }
                let dep_keys: Vec<&str> = dependent.key_columns.iter().map(String::as_str).collect();
                b.push(" left join ")
                    .push(&dependent.name)
                    .push(" on ")
                    .push_key_join(&dependent.name, &dep_keys, root, &root_keys);
                qualifiers = qualifiers.with_table(&dependent.name);
            }
            push_where(&mut b, restriction, &qualifiers)?;
        }
        Some(leaves) => {
            for (i, leaf) in leaves.iter().enumerate() {
                if i > 0 {
                    b.push(" union all ");
                }
                push_branch_head(&mut b, leaf, &root_keys, staging);
                let qualifiers = Qualifiers::new().with(root, leaf);
                push_where(&mut b, restriction, &qualifiers)?;
            }
        }
    }
    Ok(b.finish())
}

fn push_branch_head(b: &mut SqlBuilder, from: &str, keys: &[&str], staging: &StagingTable) {
    b.push("select ").push_columns(from, keys);
    if staging.session_column.is_some() {
        b.push(", ").push_param(ParamSource::SessionToken);
    }
    b.push(" from ").push(from);
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

/// Runs the staging insert on the session connection. Every later step reads
/// the rows it produced, so it always completes first.
pub async fn stage_matching_ids(
    insert: &PlannedStatement,
    ctx: &ExecutionContext,
) -> Result<u64, DmlError> {
    let staged = ctx.execute(insert).await?;
    debug!(session = %ctx.session.id, staged, "matching ids staged");
    Ok(staged)
}
