use crate::config::StagingScope;
use crate::sql::Dialect;
use crate::staging::StagingTable;

/// Produces the DDL for staging relations. Dialect-specific deployments can
/// supply their own implementation via `BulkDmlEngine::with_exporter`.
pub trait SchemaExporter: Send + Sync {
    fn create_staging_table(&self, table: &StagingTable) -> String;
    fn drop_staging_table(&self, table: &StagingTable) -> String;
}

#[derive(Debug, Clone)]
pub struct StandardSchemaExporter {
    dialect: Dialect,
}

impl StandardSchemaExporter {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn create_prefix(&self, scope: StagingScope) -> (&'static str, &'static str) {
        match scope {
            StagingScope::Global => (self.dialect.create_global, self.dialect.global_suffix),
            StagingScope::Local => (self.dialect.create_local, self.dialect.local_suffix),
            StagingScope::Persistent => (self.dialect.create_persistent, ""),
        }
    }
}

impl SchemaExporter for StandardSchemaExporter {
    fn create_staging_table(&self, table: &StagingTable) -> String {
        let (prefix, suffix) = self.create_prefix(table.scope);
        let mut sql = String::from(prefix);
        if self.dialect.supports_if_exists {
            sql.push_str(" if not exists");
        }
        sql.push(' ');
        sql.push_str(&table.name);
        sql.push_str(" (");
        let mut columns: Vec<String> = table
            .id_columns
            .iter()
            .map(|c| format!("{} {} not null", c.name, self.dialect.type_name(c.col_type)))
            .collect();
        if let Some(session) = &table.session_column {
            columns.push(format!("{session} {} not null", self.dialect.session_type));
        }
        sql.push_str(&columns.join(", "));
        sql.push(')');
        sql.push_str(suffix);
        sql
    }

    fn drop_staging_table(&self, table: &StagingTable) -> String {
        if self.dialect.supports_if_exists {
            format!("drop table if exists {}", table.name)
        } else {
            format!("drop table {}", table.name)
        }
    }
}
