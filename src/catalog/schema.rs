use crate::catalog::types::ColumnType;
use serde::{Deserialize, Serialize};

/// One identifier column of an entity's root table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct KeyColumn {
    pub name: String,
    pub col_type: ColumnType,
}

impl KeyColumn {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootTable {
    pub name: String,
    pub key_columns: Vec<KeyColumn>,
}

impl RootTable {
    pub fn new(name: impl Into<String>, key_columns: Vec<KeyColumn>) -> Self {
        Self {
            name: name.into(),
            key_columns,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TableRole {
    /// Joined-subclass table; a row exists for every instance of the subclass.
    Subclass,
    /// Secondary table. When `optional`, a row may be missing for a matched entity.
    Secondary { optional: bool },
}

/// A table other than the root holding part of the entity's state. Its key
/// columns reference the root identifier positionally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependentTable {
    pub name: String,
    pub key_columns: Vec<String>,
    pub role: TableRole,
}

impl DependentTable {
    pub fn is_optional(&self) -> bool {
        matches!(self.role, TableRole::Secondary { optional: true })
    }
}

/// An owned collection/element table keyed by the owner's identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionTable {
    pub name: String,
    pub key_columns: Vec<String>,
}
