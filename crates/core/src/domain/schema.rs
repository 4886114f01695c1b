// Table Schema Catalog
// Column allowlists and baseline DDL. Caller-supplied field names are
// checked against the catalog before they are ever used as SQL
// identifiers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// SQLite column type affinity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Blob,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// One declared column of a managed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, col_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable,
        }
    }
}

/// Declared shape of one managed table.
///
/// The `id TEXT PRIMARY KEY` column is implicit: it is always generated by
/// the service and is not part of the caller-writable allowlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<TableColumn>,
    /// Column linking rows to their owning entity (fetch-by-owner and
    /// parent/child linkage in grouped creates).
    pub owner_column: Option<String>,
    /// Column used to order fetch-by-owner results, newest first.
    pub recency_column: Option<String>,
    /// Parent table this table's rows belong to. Parent and child must
    /// live on the same partition (registry validation enforces it).
    pub parent: Option<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<TableColumn>) -> Self {
        Self {
            name: name.into(),
            columns,
            owner_column: None,
            recency_column: None,
            parent: None,
        }
    }

    pub fn with_owner(mut self, column: impl Into<String>) -> Self {
        self.owner_column = Some(column.into());
        self
    }

    pub fn with_recency(mut self, column: impl Into<String>) -> Self {
        self.recency_column = Some(column.into());
        self
    }

    pub fn with_parent(mut self, table: impl Into<String>) -> Self {
        self.parent = Some(table.into());
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Baseline DDL for this table.
    pub fn create_sql(&self) -> String {
        let mut columns = vec!["id TEXT PRIMARY KEY".to_string()];
        for col in &self.columns {
            let mut def = format!("{} {}", col.name, col.col_type.as_sql());
            if !col.nullable {
                def.push_str(" NOT NULL");
            }
            columns.push(def);
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            columns.join(", ")
        )
    }

    /// Index DDL for the owner column, if one is declared.
    pub fn owner_index_sql(&self) -> Option<String> {
        self.owner_column.as_ref().map(|owner| {
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({})",
                self.name, owner, self.name, owner
            )
        })
    }
}

/// The set of tables the service manages, keyed by table name.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaCatalog {
    /// Build a catalog, rejecting malformed declarations up front:
    /// duplicate tables, non-identifier names, a declared `id` column,
    /// owner/recency columns or parent tables that do not exist.
    pub fn new(tables: Vec<TableSchema>) -> Result<Self> {
        let mut map: BTreeMap<String, TableSchema> = BTreeMap::new();

        for table in &tables {
            check_identifier(&table.name)?;
            if map.contains_key(&table.name) {
                return Err(AppError::Config(format!(
                    "Duplicate table declaration: {}",
                    table.name
                )));
            }

            let mut seen = Vec::new();
            for col in &table.columns {
                check_identifier(&col.name)?;
                if col.name == "id" {
                    return Err(AppError::Config(format!(
                        "Table {} declares reserved column id",
                        table.name
                    )));
                }
                if seen.contains(&col.name.as_str()) {
                    return Err(AppError::Config(format!(
                        "Table {} declares column {} twice",
                        table.name, col.name
                    )));
                }
                seen.push(&col.name);
            }

            for referenced in [&table.owner_column, &table.recency_column]
                .into_iter()
                .flatten()
            {
                if !table.has_column(referenced) {
                    return Err(AppError::Config(format!(
                        "Table {} references undeclared column {}",
                        table.name, referenced
                    )));
                }
            }

            map.insert(table.name.clone(), table.clone());
        }

        // Parent references can only be checked once every table is known
        for table in map.values() {
            if let Some(parent) = &table.parent {
                if !map.contains_key(parent) {
                    return Err(AppError::Config(format!(
                        "Table {} references unknown parent table {}",
                        table.name, parent
                    )));
                }
            }
        }

        Ok(Self { tables: map })
    }

    /// Exact lookup; `UnknownTable` for anything outside the catalog.
    pub fn table(&self, name: &str) -> Result<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| AppError::UnknownTable(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Stock catalog shipped with the service.
    pub fn stock() -> Result<Self> {
        use ColumnType::{Integer, Real, Text};

        Self::new(vec![
            TableSchema::new(
                "accounts",
                vec![
                    TableColumn::new("name", Text, false),
                    TableColumn::new("balance", Real, false),
                    TableColumn::new("currency", Text, true),
                    TableColumn::new("created_at", Integer, true),
                ],
            )
            .with_recency("created_at"),
            TableSchema::new(
                "ledger_entries",
                vec![
                    TableColumn::new("account_id", Text, false),
                    TableColumn::new("amount", Real, false),
                    TableColumn::new("entry_type", Text, true),
                    TableColumn::new("memo", Text, true),
                    TableColumn::new("created_at", Integer, true),
                ],
            )
            .with_owner("account_id")
            .with_recency("created_at")
            .with_parent("accounts"),
            TableSchema::new(
                "orders",
                vec![
                    TableColumn::new("customer_id", Text, true),
                    TableColumn::new("status", Text, true),
                    TableColumn::new("total", Real, true),
                    TableColumn::new("created_at", Integer, true),
                ],
            )
            .with_owner("customer_id")
            .with_recency("created_at"),
            TableSchema::new(
                "order_items",
                vec![
                    TableColumn::new("order_id", Text, false),
                    TableColumn::new("sku", Text, false),
                    TableColumn::new("qty", Integer, false),
                    TableColumn::new("unit_price", Real, true),
                    TableColumn::new("created_at", Integer, true),
                ],
            )
            .with_owner("order_id")
            .with_recency("created_at")
            .with_parent("orders"),
        ])
    }
}

/// SQL identifiers never come from user input unvalidated.
fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::Config(format!("Invalid SQL identifier: {name:?}")))
    }
}
