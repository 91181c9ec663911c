use crate::BulkDmlEngine;
use crate::catalog::MutationTarget;
use crate::error::DmlError;
use crate::mutation::MutationPlan;
use crate::statement::{BulkStatement, ExecutionContext, ExecutionOptions};
use crate::telemetry::EngineMetrics;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;

pub fn block_on_engine<F, T>(rt: &Handle, f: F) -> T
where
    F: Future<Output = T>,
{
    match Handle::try_current() {
        Ok(_) => tokio::task::block_in_place(|| rt.block_on(f)),
        Err(_) => rt.block_on(f),
    }
}

/// Blocking facade over [`BulkDmlEngine`] for callers without an async context.
pub struct BulkDmlSync {
    inner: Arc<BulkDmlEngine>,
    rt: Handle,
}

impl BulkDmlSync {
    pub fn new(inner: Arc<BulkDmlEngine>, rt: Handle) -> Self {
        Self { inner, rt }
    }

    pub fn engine(&self) -> &Arc<BulkDmlEngine> {
        &self.inner
    }

    pub fn register(&self, target: MutationTarget) -> Result<(), DmlError> {
        self.inner.register(target)
    }

    pub fn start(&self) -> Result<(), DmlError> {
        block_on_engine(&self.rt, self.inner.start())
    }

    pub fn shutdown(&self) -> Result<(), DmlError> {
        block_on_engine(&self.rt, self.inner.shutdown())
    }

    pub fn execute(
        &self,
        statement: &BulkStatement,
        ctx: &ExecutionContext,
    ) -> Result<u64, DmlError> {
        block_on_engine(&self.rt, self.inner.execute(statement, ctx))
    }

    pub fn plan(
        &self,
        statement: &BulkStatement,
        options: &ExecutionOptions,
    ) -> Result<Arc<MutationPlan>, DmlError> {
        self.inner.plan(statement, options)
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.inner.metrics()
    }
}
