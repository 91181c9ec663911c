//! Staging ("ID") tables: the relation that remembers which rows a bulk
//! statement matched while the per-table operations run.

pub mod ids;
pub mod lifecycle;
pub(crate) mod once;

use crate::catalog::MutationTarget;
use crate::catalog::schema::KeyColumn;
use crate::catalog::types::Value;
use crate::config::{AfterUseAction, DmlConfig, StagingScope};
use crate::sql::{Dialect, ParamSource, SqlBuilder, fit_identifier};

pub use lifecycle::StagingTableManager;

/// Physical shape of an entity's staging relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingTable {
    pub name: String,
    pub scope: StagingScope,
    pub id_columns: Vec<KeyColumn>,
    pub session_column: Option<String>,
}

impl StagingTable {
    pub fn for_target(target: &MutationTarget, config: &DmlConfig, dialect: &Dialect) -> Self {
        let raw = format!("{}{}", config.staging_table_prefix, target.root.name);
        Self {
            name: fit_identifier(&raw, dialect.max_identifier_len),
            scope: config.staging_scope,
            id_columns: target.root.key_columns.clone(),
            session_column: config
                .staging_scope
                .is_session_correlated()
                .then(|| config.session_column.clone()),
        }
    }

    pub fn id_column_names(&self) -> Vec<&str> {
        self.id_columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// `select ids from staging [where staging.session = ?]`, without parentheses.
    pub(crate) fn push_id_subquery(&self, b: &mut SqlBuilder) {
        b.push("select ")
            .push_columns(&self.name, &self.id_column_names())
            .push(" from ")
            .push(&self.name);
        if self.session_column.is_some() {
            b.push(" where ");
            self.push_session_predicate(b);
        }
    }

    /// `staging.session = ?` when rows are session-correlated; nothing otherwise.
    pub(crate) fn push_session_predicate(&self, b: &mut SqlBuilder) -> bool {
        match &self.session_column {
            Some(column) => {
                b.push(&self.name)
                    .push(".")
                    .push(column)
                    .push(" = ")
                    .push_param(ParamSource::SessionToken);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeforeUseAction {
    /// Ensure the shared relation exists (created once per engine lifetime).
    PrepareShared,
    /// Create the connection-private relation for this statement.
    CreatePerStatement,
}

/// Scope-specific policy for one staging relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingTableStrategy {
    pub scope: StagingScope,
    pub before_use: BeforeUseAction,
    pub after_use: AfterUseAction,
    pub create_on_startup: bool,
    pub drop_on_shutdown: bool,
    /// Shutdown drop failures are logged instead of returned.
    pub tolerate_drop_failure: bool,
}

impl StagingTableStrategy {
    pub fn for_config(config: &DmlConfig) -> Self {
        match config.staging_scope {
            StagingScope::Global => Self {
                scope: StagingScope::Global,
                before_use: BeforeUseAction::PrepareShared,
                after_use: AfterUseAction::Clean,
                create_on_startup: config.create_on_startup,
                drop_on_shutdown: config.drop_on_shutdown,
                tolerate_drop_failure: true,
            },
            StagingScope::Persistent => Self {
                scope: StagingScope::Persistent,
                before_use: BeforeUseAction::PrepareShared,
                after_use: AfterUseAction::Clean,
                create_on_startup: config.create_on_startup,
                drop_on_shutdown: config.drop_on_shutdown,
                tolerate_drop_failure: false,
            },
            StagingScope::Local => Self {
                scope: StagingScope::Local,
                before_use: BeforeUseAction::CreatePerStatement,
                after_use: config.local_after_use,
                create_on_startup: false,
                drop_on_shutdown: false,
                tolerate_drop_failure: false,
            },
        }
    }

    pub fn uses_shared_relation(&self) -> bool {
        matches!(self.before_use, BeforeUseAction::PrepareShared)
    }

    /// Value that isolates one invocation's rows, if the scope needs one.
    pub fn correlation_key(&self, session_token: &Value) -> Option<Value> {
        self.scope
            .is_session_correlated()
            .then(|| session_token.clone())
    }
}
