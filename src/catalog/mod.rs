pub mod schema;
pub mod types;

use crate::catalog::schema::{CollectionTable, DependentTable, KeyColumn, RootTable, TableRole};
use crate::config::is_simple_identifier;
use crate::error::DmlError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum HierarchyLayout {
    /// Root table plus joined-subclass/secondary tables.
    #[default]
    Shared,
    /// One self-contained physical table per concrete subtype. Column references
    /// against the root table name are re-targeted to each leaf.
    UnionOfLeaves { leaves: Vec<String> },
}

/// Mapping metadata for an entity that bulk statements mutate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationTarget {
    pub entity_name: String,
    pub root: RootTable,
    /// Parent-first constraint order.
    pub dependents: Vec<DependentTable>,
    pub collections: Vec<CollectionTable>,
    pub layout: HierarchyLayout,
}

/// A table the sequencer visits, root or dependent, seen uniformly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalTable<'a> {
    pub name: &'a str,
    pub key_columns: Vec<&'a str>,
    pub optional: bool,
    pub is_root: bool,
}

impl MutationTarget {
    pub fn new(entity_name: impl Into<String>, root: RootTable) -> Self {
        Self {
            entity_name: entity_name.into(),
            root,
            dependents: Vec::new(),
            collections: Vec::new(),
            layout: HierarchyLayout::Shared,
        }
    }

    /// Entity with a single root table keyed by `key`.
    pub fn single_table(
        entity_name: impl Into<String>,
        table: impl Into<String>,
        key: KeyColumn,
    ) -> Self {
        Self::new(entity_name, RootTable::new(table, vec![key]))
    }

    /// Table-per-concrete-class hierarchy. `root` names the logical table that
    /// restrictions and assignments reference.
    pub fn union_of_leaves(
        entity_name: impl Into<String>,
        root: RootTable,
        leaves: Vec<String>,
    ) -> Self {
        Self {
            layout: HierarchyLayout::UnionOfLeaves { leaves },
            ..Self::new(entity_name, root)
        }
    }

    pub fn with_subclass_table(mut self, name: impl Into<String>, key_columns: &[&str]) -> Self {
        self.dependents.push(DependentTable {
            name: name.into(),
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
            role: TableRole::Subclass,
        });
        self
    }

    pub fn with_secondary_table(
        mut self,
        name: impl Into<String>,
        key_columns: &[&str],
        optional: bool,
    ) -> Self {
        self.dependents.push(DependentTable {
            name: name.into(),
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
            role: TableRole::Secondary { optional },
        });
        self
    }

    pub fn with_collection_table(mut self, name: impl Into<String>, key_columns: &[&str]) -> Self {
        self.collections.push(CollectionTable {
            name: name.into(),
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn root_key_names(&self) -> Vec<String> {
        self.root.key_columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn union_leaves(&self) -> Option<&[String]> {
        match &self.layout {
            HierarchyLayout::UnionOfLeaves { leaves } => Some(leaves),
            HierarchyLayout::Shared => None,
        }
    }

    pub fn dependent(&self, table: &str) -> Option<&DependentTable> {
        self.dependents.iter().find(|d| d.name == table)
    }

    /// Whether `table` is the root or one of the dependents.
    pub fn maps_table(&self, table: &str) -> bool {
        self.root.name == table || self.dependent(table).is_some()
    }

    /// Root first, then dependents parent-first. Deletes walk this in reverse.
    pub fn constraint_order(&self) -> Vec<PhysicalTable<'_>> {
        std::iter::once(PhysicalTable {
            name: self.root.name.as_str(),
            key_columns: self.root.key_columns.iter().map(|c| c.name.as_str()).collect(),
            optional: false,
            is_root: true,
        })
        .chain(self.dependents.iter().map(|d| PhysicalTable {
            name: d.name.as_str(),
            key_columns: d.key_columns.iter().map(String::as_str).collect(),
            optional: d.is_optional(),
            is_root: false,
        }))
        .collect()
    }

    pub fn validate(&self) -> Result<(), DmlError> {
        if self.entity_name.trim().is_empty() {
            return Err(DmlError::Validation("entity name must not be empty".into()));
        }
        if self.root.key_columns.is_empty() {
            return Err(DmlError::Validation(format!(
                "entity '{}' has no identifier columns",
                self.entity_name
            )));
        }
        let key_len = self.root.key_columns.len();
        let mut seen = HashSet::new();
        check_identifier(&self.root.name)?;
        seen.insert(self.root.name.as_str());
        for key in &self.root.key_columns {
            check_identifier(&key.name)?;
        }
        for dependent in &self.dependents {
            check_table(&mut seen, &dependent.name, &dependent.key_columns, key_len)?;
        }
        for collection in &self.collections {
            check_table(&mut seen, &collection.name, &collection.key_columns, key_len)?;
        }
        if let HierarchyLayout::UnionOfLeaves { leaves } = &self.layout {
            if leaves.is_empty() {
                return Err(DmlError::Validation(format!(
                    "union hierarchy '{}' has no leaf tables",
                    self.entity_name
                )));
            }
            if !self.dependents.is_empty() {
                return Err(DmlError::Validation(format!(
                    "union hierarchy '{}' cannot map dependent tables",
                    self.entity_name
                )));
            }
            let mut leaf_names = HashSet::new();
            for leaf in leaves {
                check_identifier(leaf)?;
                if !leaf_names.insert(leaf.as_str()) {
                    return Err(DmlError::Validation(format!(
                        "leaf table '{leaf}' listed twice"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_identifier(raw: &str) -> Result<(), DmlError> {
    if is_simple_identifier(raw) {
        Ok(())
    } else {
        Err(DmlError::Validation(format!(
            "'{raw}' is not a valid SQL identifier"
        )))
    }
}

fn check_table<'a>(
    seen: &mut HashSet<&'a str>,
    name: &'a str,
    key_columns: &[String],
    key_len: usize,
) -> Result<(), DmlError> {
    check_identifier(name)?;
    if !seen.insert(name) {
        return Err(DmlError::Validation(format!(
            "table '{name}' is mapped more than once"
        )));
    }
    if key_columns.len() != key_len {
        return Err(DmlError::Validation(format!(
            "table '{name}' has {} key columns, identifier has {key_len}",
            key_columns.len()
        )));
    }
    for column in key_columns {
        check_identifier(column)?;
    }
    Ok(())
}
