use crate::catalog::MutationTarget;
use crate::config::{AfterUseAction, DdlTransactionHandling, DmlConfig};
use crate::connection::ConnectionPool;
use crate::error::{DmlError, LifecycleAction};
use crate::sql::exporter::SchemaExporter;
use crate::sql::{Dialect, PlannedStatement, SqlBuilder};
use crate::staging::once::RunOnce;
use crate::staging::{BeforeUseAction, StagingTable, StagingTableStrategy};
use crate::statement::ExecutionContext;
use crate::telemetry::{LifecycleEvent, Observers};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns one entity's staging relation: creation, per-statement before/after
/// use actions, and the final drop.
///
/// Shared relations (Global, Persistent) are created at most once and dropped
/// at most once for the lifetime of the manager, whatever the number of
/// concurrent callers. Local relations are created and removed on the caller's
/// own connection around every statement.
pub struct StagingTableManager {
    entity: String,
    table: StagingTable,
    strategy: StagingTableStrategy,
    ddl_handling: DdlTransactionHandling,
    create_sql: String,
    drop_sql: String,
    clean: PlannedStatement,
    pool: Arc<dyn ConnectionPool>,
    observers: Arc<Observers>,
    created: RunOnce,
    released: RunOnce,
}

impl StagingTableManager {
    pub(crate) fn new(
        target: &MutationTarget,
        config: &DmlConfig,
        dialect: &Dialect,
        exporter: &dyn SchemaExporter,
        pool: Arc<dyn ConnectionPool>,
        observers: Arc<Observers>,
    ) -> Self {
        let table = StagingTable::for_target(target, config, dialect);
        let strategy = StagingTableStrategy::for_config(config);
        let mut clean = SqlBuilder::new(dialect.placeholder);
        clean.push("delete from ").push(&table.name);
        if table.session_column.is_some() {
            clean.push(" where ");
            table.push_session_predicate(&mut clean);
        }
        Self {
            entity: target.entity_name.clone(),
            create_sql: exporter.create_staging_table(&table),
            drop_sql: exporter.drop_staging_table(&table),
            clean: clean.finish(),
            table,
            strategy,
            ddl_handling: config.ddl_transaction_handling,
            pool,
            observers,
            created: RunOnce::new(),
            released: RunOnce::new(),
        }
    }

    pub fn table(&self) -> &StagingTable {
        &self.table
    }

    pub fn strategy(&self) -> &StagingTableStrategy {
        &self.strategy
    }

    pub fn is_created(&self) -> bool {
        self.created.succeeded()
    }

    pub fn is_released(&self) -> bool {
        self.released.is_settled()
    }

    /// Creates the shared relation unless an earlier call already tried.
    pub async fn prepare(&self) -> Result<(), DmlError> {
        if !self.strategy.uses_shared_relation() {
            return Ok(());
        }
        if self.is_released() {
            return Err(self.unavailable());
        }
        self.ensure_ddl_supported()?;
        self.created
            .run(
                || self.create_shared(),
                |message| self.lifecycle_error(LifecycleAction::Create, message),
            )
            .await
    }

    /// Drops the shared relation once. Later calls return the memoized outcome.
    pub async fn release(&self) -> Result<(), DmlError> {
        self.released
            .run(
                || self.release_once(),
                |message| self.lifecycle_error(LifecycleAction::Drop, message),
            )
            .await
    }

    pub async fn before_use(&self, ctx: &ExecutionContext) -> Result<(), DmlError> {
        if self.is_released() {
            return Err(self.unavailable());
        }
        match self.strategy.before_use {
            BeforeUseAction::PrepareShared => self.prepare().await,
            BeforeUseAction::CreatePerStatement => {
                self.ensure_ddl_supported()?;
                ctx.connection()
                    .execute_unprepared(&self.create_sql)
                    .await
                    .map_err(|err| self.lifecycle_error(LifecycleAction::Create, &err.to_string()))?;
                debug!(table = %self.table.name, session = %ctx.session.id, "local staging table created");
                Ok(())
            }
        }
    }

    pub async fn after_use(&self, ctx: &ExecutionContext) -> Result<(), DmlError> {
        match self.strategy.after_use {
            AfterUseAction::Clean => {
                let removed = ctx
                    .execute(&self.clean)
                    .await
                    .map_err(|err| self.lifecycle_error(LifecycleAction::Clean, &err.to_string()))?;
                debug!(table = %self.table.name, session = %ctx.session.id, removed, "staging rows cleaned");
            }
            AfterUseAction::Drop => {
                self.ensure_ddl_supported()?;
                ctx.connection()
                    .execute_unprepared(&self.drop_sql)
                    .await
                    .map_err(|err| self.lifecycle_error(LifecycleAction::Drop, &err.to_string()))?;
                debug!(table = %self.table.name, session = %ctx.session.id, "local staging table dropped");
            }
        }
        Ok(())
    }

    fn ensure_ddl_supported(&self) -> Result<(), DmlError> {
        match self.ddl_handling {
            DdlTransactionHandling::None => Ok(()),
            other => Err(DmlError::Unsupported(format!(
                "staging table DDL with {other:?} transaction handling"
            ))),
        }
    }

    async fn create_shared(&self) -> Result<(), DmlError> {
        let result = async {
            let conn = self.pool.connection().await?;
            conn.execute_unprepared(&self.create_sql).await
        }
        .await;
        if let Err(err) = result {
            return Err(self.lifecycle_error(LifecycleAction::Create, &err.to_string()));
        }
        info!(
            entity = %self.entity,
            table = %self.table.name,
            scope = self.table.scope.as_str(),
            "staging table created"
        );
        self.observers.emit(LifecycleEvent::StagingTableCreated {
            entity: self.entity.clone(),
            table_name: self.table.name.clone(),
            scope: self.table.scope,
        });
        Ok(())
    }

    async fn release_once(&self) -> Result<(), DmlError> {
        if !self.strategy.uses_shared_relation() {
            return Ok(());
        }
        // Waits for an in-flight creation; seals the cell if none ever started.
        let sealed = self
            .created
            .run(
                || async { Err(self.unavailable()) },
                |message| self.lifecycle_error(LifecycleAction::Create, message),
            )
            .await;
        if sealed.is_err() || !self.strategy.drop_on_shutdown {
            debug!(table = %self.table.name, "staging table left in place at release");
            return Ok(());
        }

        let result = async {
            let conn = self.pool.connection().await?;
            conn.execute_unprepared(&self.drop_sql).await
        }
        .await;
        match result {
            Ok(()) => {
                info!(entity = %self.entity, table = %self.table.name, "staging table dropped");
                self.observers.emit(LifecycleEvent::StagingTableDropped {
                    entity: self.entity.clone(),
                    table_name: self.table.name.clone(),
                });
                Ok(())
            }
            Err(err) => {
                self.observers.emit(LifecycleEvent::StagingTableDropFailed {
                    entity: self.entity.clone(),
                    table_name: self.table.name.clone(),
                    message: err.to_string(),
                });
                if self.strategy.tolerate_drop_failure {
                    warn!(table = %self.table.name, error = %err, "unable to drop staging table");
                    Ok(())
                } else {
                    Err(self.lifecycle_error(LifecycleAction::Drop, &err.to_string()))
                }
            }
        }
    }

    fn lifecycle_error(&self, action: LifecycleAction, message: &str) -> DmlError {
        DmlError::Lifecycle {
            table: self.table.name.clone(),
            action,
            message: message.to_string(),
        }
    }

    fn unavailable(&self) -> DmlError {
        DmlError::Unavailable {
            message: format!("staging table '{}' has been released", self.table.name),
        }
    }
}
