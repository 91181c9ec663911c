use crate::catalog::types::Value;
use crate::connection::ReactiveConnection;
use crate::error::DmlError;
use crate::sql::PlannedStatement;
use crate::sql::expr::{Assignment, Expr};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Update,
    Delete,
}

impl StatementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
        }
    }
}

/// A translated bulk mutation: the restriction and assignments are already
/// structured and reference parameters by position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BulkStatement {
    Update {
        entity: String,
        assignments: Vec<Assignment>,
        restriction: Option<Expr>,
    },
    Delete {
        entity: String,
        restriction: Option<Expr>,
    },
}

impl BulkStatement {
    pub fn update(entity: impl Into<String>, assignments: Vec<Assignment>) -> Self {
        BulkStatement::Update {
            entity: entity.into(),
            assignments,
            restriction: None,
        }
    }

    pub fn delete(entity: impl Into<String>) -> Self {
        BulkStatement::Delete {
            entity: entity.into(),
            restriction: None,
        }
    }

    pub fn with_restriction(mut self, expr: Expr) -> Self {
        match &mut self {
            BulkStatement::Update { restriction, .. } | BulkStatement::Delete { restriction, .. } => {
                *restriction = Some(expr);
            }
        }
        self
    }

    pub fn kind(&self) -> StatementKind {
        match self {
            BulkStatement::Update { .. } => StatementKind::Update,
            BulkStatement::Delete { .. } => StatementKind::Delete,
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            BulkStatement::Update { entity, .. } | BulkStatement::Delete { entity, .. } => entity,
        }
    }

    pub fn restriction(&self) -> Option<&Expr> {
        match self {
            BulkStatement::Update { restriction, .. }
            | BulkStatement::Delete { restriction, .. } => restriction.as_ref(),
        }
    }

    pub fn assignments(&self) -> &[Assignment] {
        match self {
            BulkStatement::Update { assignments, .. } => assignments,
            BulkStatement::Delete { .. } => &[],
        }
    }
}

/// The caller's session: an id used as the staging correlation key, plus the
/// connection every statement of the invocation runs on.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub connection: Arc<dyn ReactiveConnection>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

impl SessionHandle {
    pub fn new(connection: Arc<dyn ReactiveConnection>) -> Self {
        Self::with_id(Uuid::new_v4(), connection)
    }

    pub fn with_id(id: Uuid, connection: Arc<dyn ReactiveConnection>) -> Self {
        Self { id, connection }
    }

    pub fn token(&self) -> Value {
        Value::text(self.id.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Always take the staged path, even when a restricted form would do.
    pub force_staging: bool,
    /// Wrap the whole invocation in begin/commit on the session connection.
    pub transactional: bool,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub session: SessionHandle,
    pub params: Vec<Value>,
    pub options: ExecutionOptions,
}

impl ExecutionContext {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            params: Vec::new(),
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn connection(&self) -> &Arc<dyn ReactiveConnection> {
        &self.session.connection
    }

    pub(crate) fn bind(&self, statement: &PlannedStatement) -> Result<Vec<Value>, DmlError> {
        statement.bind(&self.params, &self.session.token())
    }

    /// Binds and executes one mutation on the session connection.
    pub(crate) async fn execute(&self, statement: &PlannedStatement) -> Result<u64, DmlError> {
        let params = self.bind(statement)?;
        self.connection().execute_update(&statement.sql, params).await
    }
}
