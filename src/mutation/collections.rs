use crate::catalog::MutationTarget;
use crate::error::DmlError;
use crate::mutation::executor::Phase;
use crate::mutation::restricted::push_root_id_subquery;
use crate::sql::expr::Expr;
use crate::sql::{Dialect, PlannedStatement, SqlBuilder};
use crate::staging::StagingTable;
use crate::statement::ExecutionContext;
use tracing::debug;

/// Where collection rows get their owner keys from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum OwnerKeys<'a> {
    Staged(&'a StagingTable),
    Matching(&'a Expr),
    All,
}

/// One DELETE per owned collection table, removing the rows that belong to
/// the owners about to be deleted.
pub(crate) fn collection_cleanup(
    target: &MutationTarget,
    owners: OwnerKeys<'_>,
    dialect: &Dialect,
) -> Result<Vec<PlannedStatement>, DmlError> {
    target
        .collections
        .iter()
        .map(|collection| {
            let keys: Vec<&str> = collection.key_columns.iter().map(String::as_str).collect();
            let mut b = SqlBuilder::new(dialect.placeholder);
            b.push("delete from ").push(&collection.name);
            match owners {
                OwnerKeys::All => {}
                OwnerKeys::Staged(staging) => {
                    b.push(" where ").push_key_in(&collection.name, &keys);
                    staging.push_id_subquery(&mut b);
                    b.push(")");
                }
                OwnerKeys::Matching(restriction) => {
                    b.push(" where ").push_key_in(&collection.name, &keys);
                    push_root_id_subquery(&mut b, target, Some(restriction))?;
                    b.push(")");
                }
            }
            Ok(b.finish())
        })
        .collect()
}

pub(crate) async fn run_collection_cleanup(
    statements: &[PlannedStatement],
    ctx: &ExecutionContext,
) -> Result<u64, DmlError> {
    let mut removed = 0;
    for statement in statements {
        removed += ctx.execute(statement).await?;
    }
    if !statements.is_empty() {
        debug!(phase = Phase::CleanupCollections.as_str(), removed, "collection rows removed");
    }
    Ok(removed)
}
