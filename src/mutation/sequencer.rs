use crate::catalog::PhysicalTable;
use crate::error::DmlError;
use crate::mutation::executor::Phase;
use crate::mutation::{TableOutcome, TableStep};
use crate::sql::expr::{Assignment, Qualifiers, render_operand};
use crate::sql::{Dialect, PlannedStatement, SqlBuilder};
use crate::staging::StagingTable;
use crate::statement::ExecutionContext;
use tracing::debug;

/// `t.k in (select ids from staging [where session = ?])`
fn push_staged_membership(b: &mut SqlBuilder, table: &PhysicalTable<'_>, staging: &StagingTable) {
    b.push_key_in(table.name, &table.key_columns);
    staging.push_id_subquery(b);
    b.push(")");
}

/// `c1 = v1, c2 = v2` with values qualified against `qualifiers`.
pub(crate) fn push_set_list(
    b: &mut SqlBuilder,
    assignments: &[&Assignment],
    qualifiers: &Qualifiers,
) -> Result<(), DmlError> {
    for (i, assignment) in assignments.iter().enumerate() {
        if i > 0 {
            b.push(", ");
        }
        b.push(&assignment.column.column).push(" = ");
        render_operand(&assignment.value, b, qualifiers)?;
    }
    Ok(())
}

pub(crate) fn staged_update(
    table: &PhysicalTable<'_>,
    assignments: &[&Assignment],
    qualifiers: &Qualifiers,
    staging: &StagingTable,
    dialect: &Dialect,
) -> Result<PlannedStatement, DmlError> {
    let mut b = SqlBuilder::new(dialect.placeholder);
    b.push("update ").push(table.name).push(" set ");
    push_set_list(&mut b, assignments, qualifiers)?;
    b.push(" where ");
    push_staged_membership(&mut b, table, staging);
    Ok(b.finish())
}

pub(crate) fn staged_delete(
    table: &PhysicalTable<'_>,
    staging: &StagingTable,
    dialect: &Dialect,
) -> PlannedStatement {
    let mut b = SqlBuilder::new(dialect.placeholder);
    b.push("delete from ").push(table.name).push(" where ");
    push_staged_membership(&mut b, table, staging);
    b.finish()
}

/// Inserts a row into an optional table for every staged id it lacks,
/// carrying the assigned values. Assignment values must not read columns.
pub(crate) fn compensating_insert(
    table: &PhysicalTable<'_>,
    assignments: &[&Assignment],
    staging: &StagingTable,
    dialect: &Dialect,
) -> Result<PlannedStatement, DmlError> {
    let mut b = SqlBuilder::new(dialect.placeholder);
    b.push("insert into ")
        .push(table.name)
        .push(" (")
        .push_columns("", &table.key_columns);
    for assignment in assignments {
        b.push(", ").push(&assignment.column.column);
    }
    b.push(") select ")
        .push_columns(&staging.name, &staging.id_column_names());
    let no_columns = Qualifiers::new();
    for assignment in assignments {
        b.push(", ");
        render_operand(&assignment.value, &mut b, &no_columns)?;
    }
    b.push(" from ").push(&staging.name).push(" where ");
    if staging.push_session_predicate(&mut b) {
        b.push(" and ");
    }
    b.push("not exists (select 1 from ")
        .push(table.name)
        .push(" where ")
        .push_key_join(table.name, &table.key_columns, &staging.name, &staging.id_column_names())
        .push(")");
    Ok(b.finish())
}

/// Runs the table steps one after another. With `expected` set (staged
/// UPDATE), optional tables are topped up so that every staged id ends with a
/// row; a table whose counts still disagree fails the statement.
pub(crate) async fn run_table_steps(
    steps: &[TableStep],
    ctx: &ExecutionContext,
    expected: Option<u64>,
) -> Result<Vec<TableOutcome>, DmlError> {
    let mut outcomes = Vec::with_capacity(steps.len());
    for step in steps {
        let affected = ctx.execute(&step.mutate).await?;
        debug!(phase = Phase::Mutate.as_str(), table = %step.table, affected, "table step");
        let mut inserted = 0;
        if let (Some(insert), Some(expected)) = (&step.compensate, expected) {
            if affected < expected {
                inserted = ctx.execute(insert).await?;
                debug!(
                    phase = Phase::CompensateInsert.as_str(),
                    table = %step.table,
                    inserted,
                    "missing rows inserted"
                );
            }
            if affected + inserted != expected {
                return Err(DmlError::RowCountMismatch {
                    table: step.table.clone(),
                    expected,
                    updated: affected,
                    inserted,
                });
            }
        }
        outcomes.push(TableOutcome {
            is_root: step.is_root,
            affected,
            inserted,
        });
    }
    Ok(outcomes)
}
