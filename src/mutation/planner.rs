use crate::catalog::{MutationTarget, PhysicalTable};
use crate::error::DmlError;
use crate::mutation::collections::{OwnerKeys, collection_cleanup};
use crate::mutation::restricted::{restricted_delete, restricted_fallback_applies, restricted_update};
use crate::mutation::sequencer::{compensating_insert, staged_delete, staged_update};
use crate::mutation::{ExecutionStrategy, MutationPlan, RowCountPolicy, TableStep};
use crate::sql::Dialect;
use crate::sql::expr::{Assignment, Operand, Qualifiers};
use crate::staging::StagingTable;
use crate::staging::ids::build_staging_insert;
use crate::statement::{BulkStatement, StatementKind};

/// Builds the plan for `statement` against `target`.
///
/// Chooses the restricted form when it is equivalent (and `force_staging` is
/// off); otherwise stages the matching ids first.
pub fn build_plan(
    target: &MutationTarget,
    statement: &BulkStatement,
    staging: &StagingTable,
    dialect: &Dialect,
    force_staging: bool,
) -> Result<MutationPlan, DmlError> {
    if statement.entity() != target.entity_name {
        return Err(DmlError::Validation(format!(
            "statement targets '{}' but plan is for '{}'",
            statement.entity(),
            target.entity_name
        )));
    }
    if let Some(restriction) = statement.restriction() {
        restriction.validate_depth()?;
    }
    validate_assignments(target, statement.assignments(), statement.kind())?;

    if !force_staging && restricted_fallback_applies(target, statement) {
        restricted_plan(target, statement, dialect)
    } else {
        staged_plan(target, statement, staging, dialect)
    }
}

fn validate_assignments(
    target: &MutationTarget,
    assignments: &[Assignment],
    kind: StatementKind,
) -> Result<(), DmlError> {
    if kind == StatementKind::Update && assignments.is_empty() {
        return Err(DmlError::Validation(format!(
            "update of '{}' has no assignments",
            target.entity_name
        )));
    }
    let union = target.union_leaves().is_some();
    for assignment in assignments {
        let table = assignment.column.table.as_str();
        let mapped = if union {
            table == target.root.name
        } else {
            target.maps_table(table)
        };
        if !mapped {
            return Err(DmlError::Validation(format!(
                "assignment to '{table}.{}' targets a table entity '{}' does not map",
                assignment.column.column, target.entity_name
            )));
        }
        if let Operand::Column(source) = &assignment.value {
            if source.table != table {
                return Err(DmlError::Validation(format!(
                    "assignment to '{table}.{}' reads column '{}.{}' of another table",
                    assignment.column.column, source.table, source.column
                )));
            }
            if target.dependent(table).is_some_and(|d| d.is_optional()) {
                return Err(DmlError::Validation(format!(
                    "assignment to optional table '{table}' cannot read column '{}'",
                    source.column
                )));
            }
        }
    }
    Ok(())
}

/// Tables the per-table steps visit, in constraint order.
fn physical_tables(target: &MutationTarget) -> Vec<PhysicalTable<'_>> {
    match target.union_leaves() {
        Some(leaves) => {
            let keys: Vec<&str> = target.root.key_columns.iter().map(|c| c.name.as_str()).collect();
            leaves
                .iter()
                .map(|leaf| PhysicalTable {
                    name: leaf.as_str(),
                    key_columns: keys.clone(),
                    optional: false,
                    is_root: false,
                })
                .collect()
        }
        None => target.constraint_order(),
    }
}

/// Assignments written into `table`. Union leaves take every assignment.
fn assignments_for<'a>(
    target: &MutationTarget,
    table: &PhysicalTable<'_>,
    assignments: &'a [Assignment],
) -> Vec<&'a Assignment> {
    let logical = if target.union_leaves().is_some() {
        target.root.name.as_str()
    } else {
        table.name
    };
    assignments
        .iter()
        .filter(|a| a.column.table == logical)
        .collect()
}

fn logical_name<'a>(target: &'a MutationTarget, table: &PhysicalTable<'a>) -> &'a str {
    if target.union_leaves().is_some() {
        &target.root.name
    } else {
        table.name
    }
}

fn staged_plan(
    target: &MutationTarget,
    statement: &BulkStatement,
    staging: &StagingTable,
    dialect: &Dialect,
) -> Result<MutationPlan, DmlError> {
    let insert = build_staging_insert(target, staging, statement.restriction(), dialect)?;
    let tables = physical_tables(target);
    let union = target.union_leaves().is_some();

    let (collection_statements, table_steps, row_count_policy) = match statement {
        BulkStatement::Update { assignments, .. } => {
            let mut steps = Vec::new();
            for table in &tables {
                let assigned = assignments_for(target, table, assignments);
                if assigned.is_empty() {
                    continue;
                }
                let qualifiers = Qualifiers::new().with(logical_name(target, table), table.name);
                let mutate = staged_update(table, &assigned, &qualifiers, staging, dialect)?;
                let compensate = if table.optional {
                    Some(compensating_insert(table, &assigned, staging, dialect)?)
                } else {
                    None
                };
                steps.push(TableStep {
                    table: table.name.to_string(),
                    is_root: table.is_root,
                    mutate,
                    compensate,
                });
            }
            // Staged ids without a row in a required subclass table are never
            // updated, so only root or compensated steps cover every staged id.
            let policy = if union || steps.iter().any(|s| s.is_root || s.compensate.is_some()) {
                RowCountPolicy::StagedRows
            } else {
                RowCountPolicy::SumOfTables
            };
            (Vec::new(), steps, policy)
        }
        BulkStatement::Delete { .. } => {
            let collections = collection_cleanup(target, OwnerKeys::Staged(staging), dialect)?;
            let steps = tables
                .iter()
                .rev()
                .map(|table| TableStep {
                    table: table.name.to_string(),
                    is_root: table.is_root,
                    mutate: staged_delete(table, staging, dialect),
                    compensate: None,
                })
                .collect();
            let policy = if union {
                RowCountPolicy::SumOfTables
            } else {
                RowCountPolicy::RootTable
            };
            (collections, steps, policy)
        }
    };

    Ok(MutationPlan {
        entity: target.entity_name.clone(),
        kind: statement.kind(),
        strategy: ExecutionStrategy::Staged { insert },
        collection_cleanup: collection_statements,
        table_steps,
        row_count_policy,
    })
}

fn restricted_plan(
    target: &MutationTarget,
    statement: &BulkStatement,
    dialect: &Dialect,
) -> Result<MutationPlan, DmlError> {
    let tables = physical_tables(target);
    let union = target.union_leaves().is_some();
    let restriction = statement.restriction();

    let (collection_statements, table_steps, row_count_policy) = match statement {
        BulkStatement::Update { assignments, .. } => {
            let mut steps = Vec::new();
            for table in &tables {
                let assigned = assignments_for(target, table, assignments);
                if assigned.is_empty() {
                    continue;
                }
                let mutate = restricted_update(
                    target,
                    table,
                    logical_name(target, table),
                    &assigned,
                    restriction,
                    dialect,
                )?;
                steps.push(TableStep {
                    table: table.name.to_string(),
                    is_root: table.is_root,
                    mutate,
                    compensate: None,
                });
            }
            let policy = if steps.iter().any(|s| s.is_root) {
                RowCountPolicy::RootTable
            } else {
                RowCountPolicy::SumOfTables
            };
            (Vec::new(), steps, policy)
        }
        BulkStatement::Delete { .. } => {
            let owners = match restriction {
                Some(expr) => OwnerKeys::Matching(expr),
                None => OwnerKeys::All,
            };
            let collections = collection_cleanup(target, owners, dialect)?;
            let steps = tables
                .iter()
                .rev()
                .map(|table| {
                    Ok(TableStep {
                        table: table.name.to_string(),
                        is_root: table.is_root,
                        mutate: restricted_delete(target, table, restriction, dialect)?,
                        compensate: None,
                    })
                })
                .collect::<Result<Vec<_>, DmlError>>()?;
            let policy = if union {
                RowCountPolicy::SumOfTables
            } else {
                RowCountPolicy::RootTable
            };
            (collections, steps, policy)
        }
    };

    Ok(MutationPlan {
        entity: target.entity_name.clone(),
        kind: statement.kind(),
        strategy: ExecutionStrategy::Restricted,
        collection_cleanup: collection_statements,
        table_steps,
        row_count_policy,
    })
}
