use crate::error::DmlError;
use crate::mutation::collections::run_collection_cleanup;
use crate::mutation::sequencer::run_table_steps;
use crate::mutation::{ExecutionStrategy, MutationPlan, TableOutcome};
use crate::staging::StagingTableManager;
use crate::staging::ids::stage_matching_ids;
use crate::statement::{ExecutionContext, StatementKind};
use std::future::Future;
use tracing::{debug, warn};

/// Where an invocation is in its pipeline; carried on log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    PrepareTable,
    StageIds,
    CleanupCollections,
    Mutate,
    CompensateInsert,
    ReleaseTable,
    Done,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::PrepareTable => "prepare_table",
            Phase::StageIds => "stage_ids",
            Phase::CleanupCollections => "cleanup_collections",
            Phase::Mutate => "mutate",
            Phase::CompensateInsert => "compensate_insert",
            Phase::ReleaseTable => "release_table",
            Phase::Done => "done",
            Phase::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOutcome {
    pub rows: u64,
    pub staged: Option<u64>,
    pub collection_rows: u64,
    pub tables: Vec<TableOutcome>,
}

/// Awaits `body`, then always awaits `cleanup(body_succeeded)`.
///
/// A body failure wins over a cleanup failure; the cleanup failure is then
/// only logged.
pub(crate) async fn run_then_cleanup<T, B, C, CF>(body: B, cleanup: C) -> Result<T, DmlError>
where
    B: Future<Output = Result<T, DmlError>>,
    C: FnOnce(bool) -> CF,
    CF: Future<Output = Result<(), DmlError>>,
{
    let outcome = body.await;
    let cleaned = cleanup(outcome.is_ok()).await;
    match (outcome, cleaned) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            warn!(
                error = %cleanup_err,
                code = cleanup_err.code_str(),
                original = %err,
                "cleanup failed after an earlier failure"
            );
            Err(err)
        }
    }
}

/// Runs one plan for one invocation, optionally inside a transaction on the
/// session connection.
pub(crate) async fn execute_plan(
    plan: &MutationPlan,
    staging: &StagingTableManager,
    ctx: &ExecutionContext,
) -> Result<PlanOutcome, DmlError> {
    debug!(phase = Phase::Init.as_str(), entity = %plan.entity, staged = plan.is_staged(), "executing plan");
    let result = if ctx.options.transactional {
        if plan.is_staged() && staging.strategy().uses_shared_relation() {
            // shared DDL goes through the pool, outside the caller's transaction
            staging.prepare().await?;
        }
        let conn = ctx.connection().clone();
        conn.begin_transaction().await?;
        run_then_cleanup(run_pipeline(plan, staging, ctx), |succeeded| async move {
            if succeeded {
                conn.commit_transaction().await
            } else {
                conn.rollback_transaction().await
            }
        })
        .await
    } else {
        run_pipeline(plan, staging, ctx).await
    };
    match &result {
        Ok(outcome) => debug!(phase = Phase::Done.as_str(), rows = outcome.rows, "plan finished"),
        Err(err) => debug!(phase = Phase::Error.as_str(), error = %err, "plan failed"),
    }
    result
}

async fn run_pipeline(
    plan: &MutationPlan,
    staging: &StagingTableManager,
    ctx: &ExecutionContext,
) -> Result<PlanOutcome, DmlError> {
    match &plan.strategy {
        ExecutionStrategy::Restricted => run_steps(plan, None, ctx).await,
        ExecutionStrategy::Staged { insert } => {
            debug!(phase = Phase::PrepareTable.as_str(), table = %staging.table().name, "before use");
            staging.before_use(ctx).await?;
            run_then_cleanup(
                async {
                    debug!(phase = Phase::StageIds.as_str(), "staging matching ids");
                    let staged = stage_matching_ids(insert, ctx).await?;
                    if staged == 0 {
                        return Ok(PlanOutcome {
                            rows: 0,
                            staged: Some(0),
                            collection_rows: 0,
                            tables: Vec::new(),
                        });
                    }
                    run_steps(plan, Some(staged), ctx).await
                },
                move |_| async move {
                    debug!(phase = Phase::ReleaseTable.as_str(), table = %staging.table().name, "after use");
                    staging.after_use(ctx).await
                },
            )
            .await
        }
    }
}

async fn run_steps(
    plan: &MutationPlan,
    staged: Option<u64>,
    ctx: &ExecutionContext,
) -> Result<PlanOutcome, DmlError> {
    let collection_rows = run_collection_cleanup(&plan.collection_cleanup, ctx).await?;
    let expected = match plan.kind {
        StatementKind::Update => staged,
        StatementKind::Delete => None,
    };
    let tables = run_table_steps(&plan.table_steps, ctx, expected).await?;
    Ok(PlanOutcome {
        rows: plan.row_count_policy.resolve(staged, &tables),
        staged,
        collection_rows,
        tables,
    })
}
