use crate::error::DmlError;
use serde::{Deserialize, Serialize};

/// Where the staging relation lives and how concurrent invocations are kept apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingScope {
    /// Shared temporary relation created once; rows carry the session token.
    #[default]
    Global,
    /// Connection-private relation created and removed around each statement.
    Local,
    /// Physical relation created at startup; rows carry the session token.
    Persistent,
}

impl StagingScope {
    pub fn as_str(self) -> &'static str {
        match self {
            StagingScope::Global => "global",
            StagingScope::Local => "local",
            StagingScope::Persistent => "persistent",
        }
    }

    pub fn is_session_correlated(self) -> bool {
        !matches!(self, StagingScope::Local)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterUseAction {
    /// Delete the invocation's rows and keep the relation.
    Clean,
    /// Drop the relation.
    #[default]
    Drop,
}

/// How staging-table DDL interacts with the caller's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DdlTransactionHandling {
    /// DDL runs on the connection as-is.
    #[default]
    None,
    /// DDL must run in its own isolated transaction. Not supported.
    Isolate,
    /// DDL must run isolated and inside an explicit transaction. Not supported.
    IsolateAndTransact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectKind {
    #[default]
    Sqlite,
    Postgres,
    Oracle,
}

/// Runtime configuration for a bulk mutation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmlConfig {
    pub dialect: DialectKind,
    pub staging_scope: StagingScope,
    pub staging_table_prefix: String,
    pub session_column: String,
    pub create_on_startup: bool,
    pub drop_on_shutdown: bool,
    pub local_after_use: AfterUseAction,
    pub ddl_transaction_handling: DdlTransactionHandling,
    pub plan_cache_capacity: usize,
}

impl Default for DmlConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::Sqlite,
            staging_scope: StagingScope::Global,
            staging_table_prefix: "ht_".into(),
            session_column: "session_uid".into(),
            create_on_startup: true,
            drop_on_shutdown: true,
            local_after_use: AfterUseAction::Drop,
            ddl_transaction_handling: DdlTransactionHandling::None,
            plan_cache_capacity: 256,
        }
    }
}

impl DmlConfig {
    pub fn global() -> Self {
        Self::default()
    }

    /// Connection-private staging; every statement pays for its own DDL.
    pub fn local() -> Self {
        Self {
            staging_scope: StagingScope::Local,
            create_on_startup: false,
            drop_on_shutdown: false,
            ..Self::default()
        }
    }

    pub fn persistent() -> Self {
        Self {
            staging_scope: StagingScope::Persistent,
            ..Self::default()
        }
    }

    pub fn with_dialect(mut self, dialect: DialectKind) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn from_json_str(raw: &str) -> Result<Self, DmlError> {
        let config: DmlConfig = serde_json::from_str(raw).map_err(|e| DmlError::InvalidConfig {
            message: format!("malformed config: {e}"),
        })?;
        validate_config(&config)?;
        Ok(config)
    }
}

pub(crate) fn is_simple_identifier(raw: &str) -> bool {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate_config(config: &DmlConfig) -> Result<(), DmlError> {
    if config.staging_table_prefix.is_empty() || !is_simple_identifier(&config.staging_table_prefix)
    {
        return Err(DmlError::InvalidConfig {
            message: format!(
                "staging_table_prefix '{}' is not a valid identifier prefix",
                config.staging_table_prefix
            ),
        });
    }
    if !is_simple_identifier(&config.session_column) {
        return Err(DmlError::InvalidConfig {
            message: format!(
                "session_column '{}' is not a valid identifier",
                config.session_column
            ),
        });
    }
    if config.plan_cache_capacity == 0 {
        return Err(DmlError::InvalidConfig {
            message: "plan_cache_capacity must be > 0".into(),
        });
    }
    Ok(())
}
