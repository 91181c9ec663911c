use thiserror::Error;

/// Boxed driver error carried through the engine without rewrapping.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Create,
    Clean,
    Drop,
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleAction::Create => write!(f, "create"),
            LifecycleAction::Clean => write!(f, "clean"),
            LifecycleAction::Drop => write!(f, "drop"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlErrorCode {
    Database,
    Validation,
    InvalidConfig,
    UnknownEntity,
    UnboundParameter,
    StagingCreateFailed,
    StagingCleanFailed,
    StagingDropFailed,
    RowCountMismatch,
    Unsupported,
    Unavailable,
}

impl DmlErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DmlErrorCode::Database => "database",
            DmlErrorCode::Validation => "validation",
            DmlErrorCode::InvalidConfig => "invalid_config",
            DmlErrorCode::UnknownEntity => "unknown_entity",
            DmlErrorCode::UnboundParameter => "unbound_parameter",
            DmlErrorCode::StagingCreateFailed => "staging_create_failed",
            DmlErrorCode::StagingCleanFailed => "staging_clean_failed",
            DmlErrorCode::StagingDropFailed => "staging_drop_failed",
            DmlErrorCode::RowCountMismatch => "row_count_mismatch",
            DmlErrorCode::Unsupported => "unsupported",
            DmlErrorCode::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Error)]
pub enum DmlError {
    #[error("database error: {0}")]
    Database(#[source] BoxError),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("entity '{entity}' is not registered")]
    UnknownEntity { entity: String },
    #[error("parameter {index} is not bound ({available} bindings supplied)")]
    UnboundParameter { index: usize, available: usize },
    #[error("staging table '{table}' {action} failed: {message}")]
    Lifecycle {
        table: String,
        action: LifecycleAction,
        message: String,
    },
    #[error(
        "row count mismatch on table '{table}': expected {expected}, updated {updated}, inserted {inserted}"
    )]
    RowCountMismatch {
        table: String,
        expected: u64,
        updated: u64,
        inserted: u64,
    },
    #[error("not supported: {0}")]
    Unsupported(String),
    #[error("resource unavailable: {message}")]
    Unavailable { message: String },
}

impl DmlError {
    /// Wraps a driver error so it reaches the caller unchanged.
    pub fn database(err: impl Into<BoxError>) -> Self {
        DmlError::Database(err.into())
    }

    pub fn code(&self) -> DmlErrorCode {
        match self {
            DmlError::Database(_) => DmlErrorCode::Database,
            DmlError::Validation(_) => DmlErrorCode::Validation,
            DmlError::InvalidConfig { .. } => DmlErrorCode::InvalidConfig,
            DmlError::UnknownEntity { .. } => DmlErrorCode::UnknownEntity,
            DmlError::UnboundParameter { .. } => DmlErrorCode::UnboundParameter,
            DmlError::Lifecycle { action, .. } => match action {
                LifecycleAction::Create => DmlErrorCode::StagingCreateFailed,
                LifecycleAction::Clean => DmlErrorCode::StagingCleanFailed,
                LifecycleAction::Drop => DmlErrorCode::StagingDropFailed,
            },
            DmlError::RowCountMismatch { .. } => DmlErrorCode::RowCountMismatch,
            DmlError::Unsupported(_) => DmlErrorCode::Unsupported,
            DmlError::Unavailable { .. } => DmlErrorCode::Unavailable,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
