// =====================================================
// COMMON DATABASE TYPES AND STRUCTURES
// =====================================================

use serde::{Deserialize, Serialize};

// --- Connection Configuration ---
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub database: Option<String>,
    // PostgreSQL specific
    #[serde(rename = "sslMode")]
    pub ssl_mode: Option<String>,
    pub schema: Option<String>,
    // MSSQL specific
    #[serde(rename = "trustCert", default)]
    pub trust_cert: bool,
}

// --- Query Result ---
#[derive(Serialize, Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

// --- ERP Table Layout ---
//
// The three tables the insert workflows touch. Names are configurable so
// dev/test clones with prefixed names keep working.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErpTables {
    pub schema: String,
    pub project: String,
    pub address: String,
    pub location: String,
}

impl Default for ErpTables {
    fn default() -> Self {
        Self {
            schema: "dbo".to_string(),
            project: "Projekt".to_string(),
            address: "Adresse".to_string(),
            location: "Ort".to_string(),
        }
    }
}

impl ErpTables {
    pub fn qualified_project(&self) -> String {
        qualified_table_name(&self.schema, &self.project)
    }

    pub fn qualified_address(&self) -> String {
        qualified_table_name(&self.schema, &self.address)
    }

    pub fn qualified_location(&self) -> String {
        qualified_table_name(&self.schema, &self.location)
    }
}

// --- Identifier Helpers (MSSQL) ---

pub fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

pub fn qualified_table_name(schema: &str, table: &str) -> String {
    // Table values may already carry their schema ("dbo.Projekt").
    if let Some(pos) = table.find('.') {
        let (s, t) = (&table[..pos], &table[pos + 1..]);
        format!("{}.{}", quote_identifier(s), quote_identifier(t))
    } else {
        format!("{}.{}", quote_identifier(schema), quote_identifier(table))
    }
}

pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}
