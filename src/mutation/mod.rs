//! Mutation plans: the ordered SQL a bulk statement turns into, and the cache
//! that keeps one plan per statement shape.

pub mod collections;
pub mod executor;
pub mod planner;
pub mod restricted;
pub mod sequencer;

use crate::sql::PlannedStatement;
use crate::statement::{BulkStatement, StatementKind};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Matching ids are copied into the staging relation first.
    Staged { insert: PlannedStatement },
    /// Every step carries the restriction (or a subquery over it) directly.
    Restricted,
}

/// Which counts make up the statement's reported row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCountPolicy {
    /// Number of staged ids.
    StagedRows,
    /// Rows affected in the root table.
    RootTable,
    /// Rows affected summed over every table step.
    SumOfTables,
}

impl RowCountPolicy {
    pub fn resolve(self, staged: Option<u64>, outcomes: &[TableOutcome]) -> u64 {
        match self {
            RowCountPolicy::StagedRows => staged.unwrap_or(0),
            RowCountPolicy::RootTable => outcomes
                .iter()
                .find(|o| o.is_root)
                .map(|o| o.affected)
                .unwrap_or(0),
            RowCountPolicy::SumOfTables => outcomes.iter().map(|o| o.affected).sum(),
        }
    }
}

/// One physical table's mutation within a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStep {
    pub table: String,
    pub is_root: bool,
    pub mutate: PlannedStatement,
    /// Inserts the rows an optional secondary table is missing.
    pub compensate: Option<PlannedStatement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOutcome {
    pub is_root: bool,
    pub affected: u64,
    pub inserted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationPlan {
    pub entity: String,
    pub kind: StatementKind,
    pub strategy: ExecutionStrategy,
    /// Collection-table deletes, run before any table step.
    pub collection_cleanup: Vec<PlannedStatement>,
    /// In execution order: constraint order for updates, reverse for deletes.
    pub table_steps: Vec<TableStep>,
    pub row_count_policy: RowCountPolicy,
}

impl MutationPlan {
    pub fn is_staged(&self) -> bool {
        matches!(self.strategy, ExecutionStrategy::Staged { .. })
    }

    /// Every statement in execution order, staging insert first.
    pub fn statements(&self) -> Vec<&PlannedStatement> {
        let mut out = Vec::new();
        if let ExecutionStrategy::Staged { insert } = &self.strategy {
            out.push(insert);
        }
        out.extend(self.collection_cleanup.iter());
        for step in &self.table_steps {
            out.push(&step.mutate);
            if let Some(insert) = &step.compensate {
                out.push(insert);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PlanKey {
    pub(crate) statement: BulkStatement,
    pub(crate) force_staging: bool,
    /// Registration generation of the target the plan was built from.
    pub(crate) generation: u64,
}

/// Bounded LRU of plans keyed by statement shape.
pub(crate) struct PlanCache {
    inner: Mutex<LruCache<PlanKey, Arc<MutationPlan>>>,
}

impl PlanCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub(crate) fn get(&self, key: &PlanKey) -> Option<Arc<MutationPlan>> {
        self.inner.lock().get(key).cloned()
    }

    pub(crate) fn insert(&self, key: PlanKey, plan: Arc<MutationPlan>) {
        self.inner.lock().put(key, plan);
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
