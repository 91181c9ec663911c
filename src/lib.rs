pub mod catalog;
pub mod config;
pub mod connection;
pub mod error;
mod lib_helpers;
pub mod mutation;
pub mod sql;
pub mod staging;
pub mod statement;
pub mod sync_bridge;
pub mod telemetry;
#[cfg(test)]
mod test_support;

use crate::catalog::MutationTarget;
use crate::config::{DmlConfig, validate_config};
use crate::connection::ConnectionPool;
use crate::error::DmlError;
use crate::lib_helpers::*;
use crate::mutation::executor::execute_plan;
use crate::mutation::planner::build_plan;
use crate::mutation::{MutationPlan, PlanCache, PlanKey};
use crate::sql::Dialect;
use crate::sql::exporter::{SchemaExporter, StandardSchemaExporter};
use crate::staging::{StagingTable, StagingTableManager};
use crate::statement::{BulkStatement, ExecutionContext, ExecutionOptions};
use crate::telemetry::Observers;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{Instrument, info, info_span, warn};

pub use crate::telemetry::{EngineMetrics, LifecycleEvent, LifecycleHook};

pub(crate) struct RegisteredTarget {
    target: MutationTarget,
    staging: Arc<StagingTableManager>,
    /// Registration this target came from; part of every plan-cache key.
    generation: u64,
}

/// Executes bulk UPDATE/DELETE statements against registered mutation targets.
///
/// Each target gets a staging-table manager; entities whose staging relation
/// has the same shape share one manager, so the relation is created and
/// dropped once.
pub struct BulkDmlEngine {
    config: DmlConfig,
    dialect: Dialect,
    exporter: Arc<dyn SchemaExporter>,
    pool: Arc<dyn ConnectionPool>,
    targets: RwLock<HashMap<String, Arc<RegisteredTarget>>>,
    plans: PlanCache,
    generation: AtomicU64,
    observers: Arc<Observers>,
    /// Set once `shutdown` starts; new statements are rejected from then on.
    shutting_down: AtomicBool,
}

impl BulkDmlEngine {
    pub fn new(config: DmlConfig, pool: Arc<dyn ConnectionPool>) -> Result<Self, DmlError> {
        let exporter = Arc::new(StandardSchemaExporter::new(Dialect::for_kind(config.dialect)));
        Self::with_exporter(config, pool, exporter)
    }

    pub fn with_exporter(
        config: DmlConfig,
        pool: Arc<dyn ConnectionPool>,
        exporter: Arc<dyn SchemaExporter>,
    ) -> Result<Self, DmlError> {
        validate_config(&config)?;
        Ok(Self {
            dialect: Dialect::for_kind(config.dialect),
            plans: PlanCache::new(config.plan_cache_capacity),
            generation: AtomicU64::new(0),
            config,
            exporter,
            pool,
            targets: RwLock::new(HashMap::new()),
            observers: Arc::new(Observers::default()),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &DmlConfig {
        &self.config
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Registers (or replaces) the mapping for `target.entity_name`. Cached
    /// plans are discarded.
    ///
    /// A replacement that would strand a created staging relation, or reuse
    /// its name with a different shape, is rejected; shut the engine down
    /// first.
    pub fn register(&self, target: MutationTarget) -> Result<(), DmlError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(shut_down_error());
        }
        target.validate()?;
        let table = StagingTable::for_target(&target, &self.config, &self.dialect);
        let mut targets = self.targets.write();
        if let Some(conflict) = conflicting_manager(&targets, &target.entity_name, &table) {
            return Err(DmlError::Validation(format!(
                "staging table '{}' is live with a different shape than entity '{}' needs",
                conflict.table().name,
                target.entity_name
            )));
        }
        let staging = match manager_for_table(&targets, &table) {
            Some(existing) => existing,
            None => Arc::new(StagingTableManager::new(
                &target,
                &self.config,
                &self.dialect,
                self.exporter.as_ref(),
                Arc::clone(&self.pool),
                Arc::clone(&self.observers),
            )),
        };
        let entity = target.entity_name.clone();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        targets.insert(
            entity.clone(),
            Arc::new(RegisteredTarget {
                target,
                staging,
                generation,
            }),
        );
        drop(targets);
        self.plans.clear();
        info!(entity = %entity, staging_table = %table.name, "mutation target registered");
        Ok(())
    }

    pub fn target(&self, entity: &str) -> Option<MutationTarget> {
        self.targets.read().get(entity).map(|r| r.target.clone())
    }

    pub fn staging_manager(&self, entity: &str) -> Option<Arc<StagingTableManager>> {
        self.targets.read().get(entity).map(|r| Arc::clone(&r.staging))
    }

    /// Creates the shared staging relations configured for creation at startup.
    pub async fn start(&self) -> Result<(), DmlError> {
        let managers = unique_managers(&self.targets.read());
        let mut created = 0usize;
        for manager in managers {
            let strategy = manager.strategy();
            if strategy.uses_shared_relation() && strategy.create_on_startup {
                manager.prepare().await?;
                created += 1;
            }
        }
        info!(staging_tables = created, "bulk dml engine started");
        Ok(())
    }

    /// Releases every staging relation. All managers are released even when
    /// one fails; the first failure is returned.
    pub async fn shutdown(&self) -> Result<(), DmlError> {
        self.shutting_down.store(true, Ordering::Release);
        let managers = unique_managers(&self.targets.read());
        let mut first_error = None;
        for manager in managers {
            if let Err(err) = manager.release().await {
                warn!(table = %manager.table().name, error = %err, "staging table release failed");
                first_error.get_or_insert(err);
            }
        }
        info!("bulk dml engine shut down");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Plan for `statement`, served from the plan cache when possible.
    pub fn plan(
        &self,
        statement: &BulkStatement,
        options: &ExecutionOptions,
    ) -> Result<Arc<MutationPlan>, DmlError> {
        let registered = self.lookup(statement.entity())?;
        self.plan_for(&registered, statement, options.force_staging)
    }

    /// Executes one bulk statement and returns the affected row count.
    pub async fn execute(
        &self,
        statement: &BulkStatement,
        ctx: &ExecutionContext,
    ) -> Result<u64, DmlError> {
        let span = info_span!(
            "bulk_dml",
            entity = statement.entity(),
            kind = statement.kind().as_str(),
            session = %ctx.session.id
        );
        self.execute_inner(statement, ctx).instrument(span).await
    }

    async fn execute_inner(
        &self,
        statement: &BulkStatement,
        ctx: &ExecutionContext,
    ) -> Result<u64, DmlError> {
        let prepared = if self.shutting_down.load(Ordering::Acquire) {
            Err(shut_down_error())
        } else {
            self.lookup(statement.entity()).and_then(|registered| {
                let plan = self.plan_for(&registered, statement, ctx.options.force_staging)?;
                Ok((registered, plan))
            })
        };
        let (registered, plan) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                self.observers.telemetry.record_rejected();
                warn!(error = %err, code = err.code_str(), "bulk statement rejected");
                return Err(err);
            }
        };

        let started = Instant::now();
        let result = execute_plan(&plan, &registered.staging, ctx).await;
        let telemetry = &self.observers.telemetry;
        match result {
            Ok(outcome) => {
                for table in outcome.tables.iter().filter(|t| t.inserted > 0) {
                    telemetry.record_compensation(table.inserted);
                }
                telemetry.record_statement(plan.is_staged(), started.elapsed(), Some(outcome.rows));
                info!(
                    rows = outcome.rows,
                    staged = ?outcome.staged,
                    collection_rows = outcome.collection_rows,
                    "bulk statement executed"
                );
                Ok(outcome.rows)
            }
            Err(err) => {
                telemetry.record_statement(plan.is_staged(), started.elapsed(), None);
                warn!(error = %err, code = err.code_str(), "bulk statement failed");
                Err(err)
            }
        }
    }

    fn lookup(&self, entity: &str) -> Result<Arc<RegisteredTarget>, DmlError> {
        self.targets
            .read()
            .get(entity)
            .cloned()
            .ok_or_else(|| DmlError::UnknownEntity {
                entity: entity.to_string(),
            })
    }

    fn plan_for(
        &self,
        registered: &RegisteredTarget,
        statement: &BulkStatement,
        force_staging: bool,
    ) -> Result<Arc<MutationPlan>, DmlError> {
        let key = PlanKey {
            statement: statement.clone(),
            force_staging,
            generation: registered.generation,
        };
        if let Some(plan) = self.plans.get(&key) {
            self.observers.telemetry.record_plan_lookup(true);
            return Ok(plan);
        }
        self.observers.telemetry.record_plan_lookup(false);
        let plan = Arc::new(build_plan(
            &registered.target,
            statement,
            registered.staging.table(),
            &self.dialect,
            force_staging,
        )?);
        self.plans.insert(key, Arc::clone(&plan));
        Ok(plan)
    }

    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.observers.telemetry.snapshot()
    }

    pub fn add_lifecycle_hook(&self, hook: Arc<dyn LifecycleHook>) {
        self.observers.add_hook(hook);
    }

    pub fn remove_lifecycle_hook(&self, hook: &Arc<dyn LifecycleHook>) {
        self.observers.remove_hook(hook);
    }
}
