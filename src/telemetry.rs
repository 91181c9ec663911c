use crate::config::StagingScope;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    StagingTableCreated {
        entity: String,
        table_name: String,
        scope: StagingScope,
    },
    StagingTableDropped {
        entity: String,
        table_name: String,
    },
    StagingTableDropFailed {
        entity: String,
        table_name: String,
        message: String,
    },
}

pub trait LifecycleHook: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

#[derive(Debug, Default)]
pub(crate) struct EngineTelemetry {
    statements_total: AtomicU64,
    statement_errors: AtomicU64,
    staged_statements: AtomicU64,
    restricted_statements: AtomicU64,
    rows_affected: AtomicU64,
    compensating_inserts: AtomicU64,
    rows_compensated: AtomicU64,
    staging_tables_created: AtomicU64,
    staging_tables_dropped: AtomicU64,
    staging_drop_failures: AtomicU64,
    plan_cache_hits: AtomicU64,
    plan_cache_misses: AtomicU64,
    total_latency_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineMetrics {
    pub statements_total: u64,
    pub statement_errors: u64,
    pub staged_statements: u64,
    pub restricted_statements: u64,
    pub rows_affected: u64,
    pub compensating_inserts: u64,
    pub rows_compensated: u64,
    pub staging_tables_created: u64,
    pub staging_tables_dropped: u64,
    pub staging_drop_failures: u64,
    pub plan_cache_hits: u64,
    pub plan_cache_misses: u64,
    pub avg_statement_latency_micros: u64,
}

impl EngineTelemetry {
    pub(crate) fn record_statement(&self, staged: bool, elapsed: Duration, rows: Option<u64>) {
        self.statements_total.fetch_add(1, Ordering::Relaxed);
        if staged {
            self.staged_statements.fetch_add(1, Ordering::Relaxed);
        } else {
            self.restricted_statements.fetch_add(1, Ordering::Relaxed);
        }
        match rows {
            Some(rows) => {
                self.rows_affected.fetch_add(rows, Ordering::Relaxed);
            }
            None => {
                self.statement_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.total_latency_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.statements_total.fetch_add(1, Ordering::Relaxed);
        self.statement_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compensation(&self, rows: u64) {
        self.compensating_inserts.fetch_add(1, Ordering::Relaxed);
        self.rows_compensated.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_plan_lookup(&self, hit: bool) {
        if hit {
            self.plan_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.plan_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> EngineMetrics {
        let statements_total = self.statements_total.load(Ordering::Relaxed);
        let total_latency = self.total_latency_micros.load(Ordering::Relaxed);
        EngineMetrics {
            statements_total,
            statement_errors: self.statement_errors.load(Ordering::Relaxed),
            staged_statements: self.staged_statements.load(Ordering::Relaxed),
            restricted_statements: self.restricted_statements.load(Ordering::Relaxed),
            rows_affected: self.rows_affected.load(Ordering::Relaxed),
            compensating_inserts: self.compensating_inserts.load(Ordering::Relaxed),
            rows_compensated: self.rows_compensated.load(Ordering::Relaxed),
            staging_tables_created: self.staging_tables_created.load(Ordering::Relaxed),
            staging_tables_dropped: self.staging_tables_dropped.load(Ordering::Relaxed),
            staging_drop_failures: self.staging_drop_failures.load(Ordering::Relaxed),
            plan_cache_hits: self.plan_cache_hits.load(Ordering::Relaxed),
            plan_cache_misses: self.plan_cache_misses.load(Ordering::Relaxed),
            avg_statement_latency_micros: if statements_total == 0 {
                0
            } else {
                total_latency / statements_total
            },
        }
    }
}

/// Telemetry counters plus registered lifecycle hooks, shared by the engine
/// and every staging-table manager.
#[derive(Default)]
pub(crate) struct Observers {
    pub(crate) telemetry: EngineTelemetry,
    hooks: Mutex<Vec<Arc<dyn LifecycleHook>>>,
}

impl Observers {
    pub(crate) fn add_hook(&self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.lock().push(hook);
    }

    pub(crate) fn remove_hook(&self, hook: &Arc<dyn LifecycleHook>) {
        let mut hooks = self.hooks.lock();
        hooks.retain(|existing| !Arc::ptr_eq(existing, hook));
    }

    pub(crate) fn emit(&self, event: LifecycleEvent) {
        let counter = match &event {
            LifecycleEvent::StagingTableCreated { .. } => &self.telemetry.staging_tables_created,
            LifecycleEvent::StagingTableDropped { .. } => &self.telemetry.staging_tables_dropped,
            LifecycleEvent::StagingTableDropFailed { .. } => {
                &self.telemetry.staging_drop_failures
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let hooks = self.hooks.lock().clone();
        for hook in &hooks {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook.on_event(&event)))
                .is_err()
            {
                warn!("lifecycle hook panicked while handling event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panicking;

    impl LifecycleHook for Panicking {
        fn on_event(&self, _event: &LifecycleEvent) {
            panic!("hook failure");
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<LifecycleEvent>>);

    impl LifecycleHook for Recording {
        fn on_event(&self, event: &LifecycleEvent) {
            self.0.lock().push(event.clone());
        }
    }

    #[test]
    fn panicking_hooks_do_not_stop_dispatch() {
        let observers = Observers::default();
        let recording = Arc::new(Recording::default());
        observers.add_hook(Arc::new(Panicking));
        observers.add_hook(recording.clone());
        observers.emit(LifecycleEvent::StagingTableDropped {
            entity: "Pig".into(),
            table_name: "ht_pig".into(),
        });
        assert_eq!(recording.0.lock().len(), 1);
        assert_eq!(observers.telemetry.snapshot().staging_tables_dropped, 1);

        let hook: Arc<dyn LifecycleHook> = recording.clone();
        observers.remove_hook(&hook);
        observers.emit(LifecycleEvent::StagingTableDropped {
            entity: "Pig".into(),
            table_name: "ht_pig".into(),
        });
        assert_eq!(recording.0.lock().len(), 1);
    }

    #[test]
    fn average_latency_is_zero_without_statements() {
        let telemetry = EngineTelemetry::default();
        assert_eq!(telemetry.snapshot().avg_statement_latency_micros, 0);
        telemetry.record_statement(true, Duration::from_micros(40), Some(3));
        telemetry.record_statement(false, Duration::from_micros(20), None);
        let metrics = telemetry.snapshot();
        assert_eq!(metrics.avg_statement_latency_micros, 30);
        assert_eq!(metrics.rows_affected, 3);
        assert_eq!(metrics.statement_errors, 1);
    }
}
